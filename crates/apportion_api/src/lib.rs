use std::collections::HashSet;

use async_trait::async_trait;
use shared::{
    domain::{AllocationGroupId, BaseKind, BaseRecord, ModelId, ProposedMember, UnitRow},
    error::{ApiError, ErrorCode},
    protocol::{
        AllocationGroupEntry, AllocationTable, CalculatedCoefficient, CoefficientOutcome,
        CoefficientRequest, CoefficientTable, ModelHierarchyEntry, UnitShare,
    },
};
use storage::Storage;
use tracing::{info, warn};

mod validator;

pub use validator::validate;

/// Source of base rows, e.g. a spreadsheet or file reader. An empty result
/// means the import was cancelled or failed.
#[async_trait]
pub trait RowImporter: Send + Sync {
    async fn import_rows(&self) -> Vec<BaseRecord>;
}

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

impl ApiContext {
    pub async fn open(database_url: &str) -> Result<Self, ApiError> {
        let storage = Storage::new(database_url).await?;
        Ok(Self { storage })
    }

    pub async fn close(self) {
        self.storage.close().await;
    }
}

pub async fn import_base_records(
    ctx: &ApiContext,
    kind: BaseKind,
    importer: &dyn RowImporter,
) -> Result<usize, ApiError> {
    let rows = importer.import_rows().await;
    if rows.is_empty() {
        warn!(kind = kind.as_str(), "importer returned no rows; stored records untouched");
        return Err(ApiError::new(ErrorCode::ValidationFailed, "no rows to save"));
    }
    Ok(ctx.storage.save_base_records(kind, &rows).await?)
}

pub async fn list_base_records(ctx: &ApiContext, kind: BaseKind) -> Result<Vec<BaseRecord>, ApiError> {
    Ok(ctx.storage.list_base_records(kind).await?)
}

/// Rows a user distributes into groups: the whole-building membership.
pub async fn list_building_units(ctx: &ApiContext) -> Result<Vec<UnitRow>, ApiError> {
    Ok(ctx.storage.list_building_units().await?)
}

/// Validates the proposal against the rows it was built from, then replaces
/// the whole allocation.
pub async fn save_allocation(
    ctx: &ApiContext,
    allocation_name: &str,
    proposed: &[ProposedMember],
    loaded: &[UnitRow],
) -> Result<Vec<AllocationTable>, ApiError> {
    let report = validate(proposed, loaded);
    if !report.is_ok() {
        warn!(
            allocation = allocation_name,
            problems = report.errors.len(),
            "allocation rejected by validation"
        );
        return Err(ApiError::new(
            ErrorCode::ValidationFailed,
            format!(
                "allocation '{allocation_name}' has {} problem(s)",
                report.errors.len()
            ),
        )
        .with_details(report.errors));
    }
    Ok(ctx.storage.save_allocation(allocation_name, proposed).await?)
}

pub async fn create_group(
    ctx: &ApiContext,
    allocation_name: &str,
    group_name: &str,
    members: &[UnitRow],
) -> Result<AllocationGroupId, ApiError> {
    Ok(ctx
        .storage
        .create_group(allocation_name, group_name, members)
        .await?)
}

pub async fn create_subgroup(
    ctx: &ApiContext,
    parent: AllocationGroupId,
    group_name: &str,
    members: &[UnitRow],
) -> Result<AllocationGroupId, ApiError> {
    Ok(ctx.storage.create_subgroup(parent, group_name, members).await?)
}

pub async fn delete_allocation(
    ctx: &ApiContext,
    allocation_name: &str,
) -> Result<Vec<AllocationTable>, ApiError> {
    Ok(ctx.storage.delete_allocation(allocation_name).await?)
}

pub async fn delete_group(
    ctx: &ApiContext,
    id: AllocationGroupId,
) -> Result<Vec<AllocationTable>, ApiError> {
    Ok(ctx.storage.delete_group(id).await?)
}

pub async fn list_available_leaf_groups(ctx: &ApiContext) -> Result<Vec<AllocationTable>, ApiError> {
    Ok(ctx.storage.list_available_leaf_groups().await?)
}

pub async fn list_allocation_options(ctx: &ApiContext) -> Result<Vec<String>, ApiError> {
    Ok(ctx.storage.list_allocation_options().await?)
}

pub async fn list_allocation_tables(
    ctx: &ApiContext,
    allocation_name: &str,
) -> Result<Vec<AllocationTable>, ApiError> {
    Ok(ctx.storage.list_allocation_tables(allocation_name).await?)
}

pub async fn list_allocation_groups(ctx: &ApiContext) -> Result<Vec<AllocationGroupEntry>, ApiError> {
    Ok(ctx.storage.list_allocation_groups().await?)
}

pub async fn group_members(ctx: &ApiContext, id: AllocationGroupId) -> Result<Vec<UnitRow>, ApiError> {
    Ok(ctx.storage.group_members(id).await?)
}

pub async fn total_area(ctx: &ApiContext, tables: &[AllocationGroupId]) -> Result<f64, ApiError> {
    Ok(ctx.storage.total_area(tables).await?)
}

pub async fn register_model(
    ctx: &ApiContext,
    name: &str,
    parent: Option<ModelId>,
) -> Result<ModelId, ApiError> {
    Ok(ctx.storage.insert_model(name, parent).await?)
}

pub async fn list_model_hierarchy(ctx: &ApiContext) -> Result<Vec<ModelHierarchyEntry>, ApiError> {
    Ok(ctx.storage.list_model_hierarchy().await?)
}

/// Models that may become the parent of `current`: everything outside its
/// own subtree. With no current model every model qualifies.
pub async fn available_parent_models(
    ctx: &ApiContext,
    current: Option<ModelId>,
) -> Result<Vec<ModelHierarchyEntry>, ApiError> {
    let all = ctx.storage.list_model_hierarchy().await?;
    let Some(current) = current else {
        return Ok(all);
    };
    let excluded: HashSet<ModelId> = ctx.storage.model_subtree(current).await?.into_iter().collect();
    Ok(all
        .into_iter()
        .filter(|entry| !excluded.contains(&entry.model.id))
        .collect())
}

/// Every descendant of `id` in display order, i.e. what a delete would
/// take with it.
pub async fn child_models(ctx: &ApiContext, id: ModelId) -> Result<Vec<ModelHierarchyEntry>, ApiError> {
    let descendants: HashSet<ModelId> = ctx
        .storage
        .model_subtree(id)
        .await?
        .into_iter()
        .filter(|&model| model != id)
        .collect();
    Ok(ctx
        .storage
        .list_model_hierarchy()
        .await?
        .into_iter()
        .filter(|entry| descendants.contains(&entry.model.id))
        .collect())
}

async fn resolve_parent_coefficient(
    ctx: &ApiContext,
    model_id: ModelId,
    supplied: Option<f64>,
) -> Result<f64, ApiError> {
    match supplied {
        Some(value) => Ok(value),
        None => Ok(ctx.storage.inherited_coefficient(model_id).await?),
    }
}

/// Computes and stores a model's coefficient. Without an explicit parent
/// coefficient the parent model's stored coefficient is used.
pub async fn compute_coefficient(
    ctx: &ApiContext,
    model_id: ModelId,
    common_tables: &[AllocationGroupId],
    participant_tables: &[AllocationGroupId],
    parent_coefficient: Option<f64>,
) -> Result<CoefficientOutcome, ApiError> {
    let parent_coefficient = resolve_parent_coefficient(ctx, model_id, parent_coefficient).await?;
    let request = CoefficientRequest {
        model_id,
        common_tables: common_tables.to_vec(),
        participant_tables: participant_tables.to_vec(),
        parent_coefficient,
    };
    let outcome = ctx.storage.compute_and_store(&request).await.map_err(|err| {
        let err = ApiError::from(err);
        warn!(model_id = model_id.0, code = ?err.code, "coefficient computation failed");
        err
    })?;
    info!(
        model_id = model_id.0,
        coefficient = %outcome.coefficient_text(),
        "coefficient stored"
    );
    Ok(outcome)
}

pub async fn compute_apportionable_area(
    ctx: &ApiContext,
    model_id: ModelId,
    common_tables: &[AllocationGroupId],
    parent_coefficient: Option<f64>,
) -> Result<Vec<UnitShare>, ApiError> {
    let parent_coefficient = resolve_parent_coefficient(ctx, model_id, parent_coefficient).await?;
    Ok(ctx
        .storage
        .store_apportionable_area(model_id, common_tables, parent_coefficient)
        .await?)
}

/// Deletes a model with its descendants; returns the result columns removed.
pub async fn delete_model(ctx: &ApiContext, id: ModelId) -> Result<Vec<String>, ApiError> {
    Ok(ctx.storage.delete_model(id).await?)
}

pub async fn delete_model_named(
    ctx: &ApiContext,
    name: &str,
) -> Result<(ModelId, Vec<String>), ApiError> {
    Ok(ctx.storage.delete_model_named(name).await?)
}

pub async fn model_coefficient(ctx: &ApiContext, id: ModelId) -> Result<Option<f64>, ApiError> {
    Ok(ctx.storage.model_coefficient(id).await?)
}

pub async fn calculated_coefficients(
    ctx: &ApiContext,
) -> Result<Vec<CalculatedCoefficient>, ApiError> {
    Ok(ctx.storage.calculated_coefficients().await?)
}

pub async fn coefficient_table(ctx: &ApiContext) -> Result<CoefficientTable, ApiError> {
    Ok(ctx.storage.coefficient_table().await?)
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
