use std::path::PathBuf;

use anyhow::{anyhow, Result};
use apportion_api::ApiContext;
use clap::{Parser, Subcommand};
use serde::Serialize;
use shared::domain::{AllocationGroupId, BaseKind, ModelId, ProposedMember};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod config;
mod importer;

use config::{load_settings, prepare_database_url, DEFAULT_CONFIG_FILE};
use importer::{read_json_rows, JsonFileImporter};

#[derive(Parser, Debug)]
#[command(name = "apportion", about = "Common-area apportionment tools")]
struct Cli {
    /// Overrides the configured database url.
    #[arg(long)]
    database_url: Option<String>,
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replaces the unit (`unit`) or common-area (`common`) base rows from a JSON file.
    ImportBase { kind: String, file: PathBuf },
    ListUnits,
    /// Saves an allocation from a JSON array of `{group_name, unit}` rows.
    SaveAllocation { name: String, file: PathBuf },
    DeleteAllocation { name: String },
    ListGroups,
    AddModel {
        name: String,
        #[arg(long)]
        parent: Option<i64>,
    },
    ListModels,
    Compute {
        #[arg(long)]
        model: i64,
        #[arg(long, value_delimiter = ',', required = true)]
        common: Vec<i64>,
        #[arg(long, value_delimiter = ',', required = true)]
        participants: Vec<i64>,
        #[arg(long)]
        parent_coefficient: Option<f64>,
    },
    Apportionable {
        #[arg(long)]
        model: i64,
        #[arg(long, value_delimiter = ',', required = true)]
        common: Vec<i64>,
        #[arg(long)]
        parent_coefficient: Option<f64>,
    },
    DeleteModel { id: i64 },
    Results,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn group_ids(raw: &[i64]) -> Vec<AllocationGroupId> {
    raw.iter().copied().map(AllocationGroupId).collect()
}

async fn run(ctx: &ApiContext, command: Command) -> Result<()> {
    match command {
        Command::ImportBase { kind, file } => {
            let kind = BaseKind::parse(&kind)
                .ok_or_else(|| anyhow!("unknown base kind '{kind}', expected unit or common"))?;
            let saved =
                apportion_api::import_base_records(ctx, kind, &JsonFileImporter::new(file)).await?;
            println!("saved {saved} {} rows", kind.as_str());
        }
        Command::ListUnits => {
            print_json(&apportion_api::list_building_units(ctx).await?)?;
        }
        Command::SaveAllocation { name, file } => {
            let proposed: Vec<ProposedMember> = read_json_rows(&file).await?;
            let loaded = apportion_api::list_building_units(ctx).await?;
            let tables = apportion_api::save_allocation(ctx, &name, &proposed, &loaded).await?;
            for table in tables {
                println!("saved table_id={} name={}", table.id.0, table.name);
            }
        }
        Command::DeleteAllocation { name } => {
            let dropped = apportion_api::delete_allocation(ctx, &name).await?;
            if dropped.is_empty() {
                println!("nothing deleted for '{name}'");
            }
            for table in dropped {
                println!("deleted table_id={} name={}", table.id.0, table.name);
            }
        }
        Command::ListGroups => {
            print_json(&apportion_api::list_allocation_groups(ctx).await?)?;
        }
        Command::AddModel { name, parent } => {
            let model_id = apportion_api::register_model(ctx, &name, parent.map(ModelId)).await?;
            println!("created model_id={}", model_id.0);
        }
        Command::ListModels => {
            print_json(&apportion_api::list_model_hierarchy(ctx).await?)?;
        }
        Command::Compute {
            model,
            common,
            participants,
            parent_coefficient,
        } => {
            let outcome = apportion_api::compute_coefficient(
                ctx,
                ModelId(model),
                &group_ids(&common),
                &group_ids(&participants),
                parent_coefficient,
            )
            .await?;
            println!(
                "model {} coefficient={} (C={}, H={}, parent={})",
                outcome.model_name,
                outcome.coefficient_text(),
                outcome.common_area,
                outcome.participant_area,
                outcome.parent_coefficient
            );
            print_json(&outcome.shares)?;
        }
        Command::Apportionable {
            model,
            common,
            parent_coefficient,
        } => {
            let shares = apportion_api::compute_apportionable_area(
                ctx,
                ModelId(model),
                &group_ids(&common),
                parent_coefficient,
            )
            .await?;
            print_json(&shares)?;
        }
        Command::DeleteModel { id } => {
            let removed = apportion_api::delete_model(ctx, ModelId(id)).await?;
            println!("deleted model_id={id}; removed columns: {}", removed.join(", "));
        }
        Command::Results => {
            print_json(&apportion_api::coefficient_table(ctx).await?)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli.config);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let raw_url = cli.database_url.as_deref().unwrap_or(&settings.database_url);
    let database_url = prepare_database_url(raw_url)?;
    let ctx = ApiContext::open(&database_url).await.map_err(|err| {
        error!(%database_url, "failed to open apportionment store: {err}");
        err
    })?;
    info!(%database_url, "apportionment store ready");

    let outcome = run(&ctx, cli.command).await;
    ctx.close().await;
    outcome
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
