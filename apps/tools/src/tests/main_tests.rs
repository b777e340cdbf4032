use super::*;

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(std::iter::once("apportion").chain(args.iter().copied()))
        .expect("valid arguments")
}

#[test]
fn parses_comma_separated_table_ids() {
    let cli = parse(&[
        "compute",
        "--model",
        "3",
        "--common",
        "2,5",
        "--participants",
        "1",
    ]);
    match cli.command {
        Command::Compute {
            model,
            common,
            participants,
            parent_coefficient,
        } => {
            assert_eq!(model, 3);
            assert_eq!(common, vec![2, 5]);
            assert_eq!(participants, vec![1]);
            assert_eq!(parent_coefficient, None);
        }
        other => panic!("unexpected command {other:?}"),
    }
    assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_FILE));
}

#[test]
fn compute_requires_participants() {
    let parsed = Cli::try_parse_from(["apportion", "compute", "--model", "1", "--common", "2"]);
    assert!(parsed.is_err());
}

#[tokio::test]
async fn runs_import_allocation_and_compute_end_to_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let units = dir.path().join("units.json");
    std::fs::write(
        &units,
        r#"[
            {"source_id": "1", "room": "101", "inner_area": "100"},
            {"source_id": "2", "room": "102", "inner_area": "100"}
        ]"#,
    )
    .expect("units");
    let commons = dir.path().join("commons.json");
    std::fs::write(&commons, r#"[{"source_id": "1", "room": "stair", "inner_area": "50"}]"#)
        .expect("commons");
    let allocation = dir.path().join("allocation.json");
    std::fs::write(
        &allocation,
        r#"[
            {"group_name": "Homes", "unit": {"id": "H1", "room": "101", "inner_area": "100"}},
            {"group_name": "Homes", "unit": {"id": "H2", "room": "102", "inner_area": "100"}},
            {"group_name": "分摊公共建筑部位", "unit": {"id": "C1", "room": "stair", "inner_area": "50"}}
        ]"#,
    )
    .expect("allocation");

    let ctx = ApiContext::open("sqlite::memory:").await.expect("db");
    let units_arg = units.to_string_lossy().to_string();
    let commons_arg = commons.to_string_lossy().to_string();
    let allocation_arg = allocation.to_string_lossy().to_string();

    run(&ctx, parse(&["import-base", "unit", &units_arg]).command)
        .await
        .expect("import units");
    run(&ctx, parse(&["import-base", "common", &commons_arg]).command)
        .await
        .expect("import commons");
    run(&ctx, parse(&["save-allocation", "Block", &allocation_arg]).command)
        .await
        .expect("save allocation");
    run(&ctx, parse(&["add-model", "Block"]).command)
        .await
        .expect("add model");

    let tables = apportion_api::list_allocation_tables(&ctx, "Block")
        .await
        .expect("tables");
    let homes = tables[0].id.0.to_string();
    let common = tables[1].id.0.to_string();
    let model = apportion_api::list_model_hierarchy(&ctx).await.expect("models")[0]
        .model
        .id
        .0
        .to_string();

    run(
        &ctx,
        parse(&[
            "compute",
            "--model",
            &model,
            "--common",
            &common,
            "--participants",
            &homes,
        ])
        .command,
    )
    .await
    .expect("compute");

    let table = apportion_api::coefficient_table(&ctx).await.expect("table");
    assert_eq!(table.cell("H2", "Block_coefficient"), Some("0.250000"));
    assert_eq!(table.cell("H2", "Block_apportionedArea"), Some("25.00"));

    run(&ctx, parse(&["delete-model", &model]).command)
        .await
        .expect("delete model");
    assert!(apportion_api::calculated_coefficients(&ctx)
        .await
        .expect("list")
        .is_empty());
}

#[tokio::test]
async fn unknown_base_kind_is_rejected() {
    let ctx = ApiContext::open("sqlite::memory:").await.expect("db");
    let err = run(&ctx, parse(&["import-base", "garage", "rows.json"]).command)
        .await
        .expect_err("bad kind");
    assert!(err.to_string().contains("unknown base kind"));
}

#[tokio::test]
async fn invalid_allocation_surfaces_validation_details() {
    let dir = tempfile::tempdir().expect("tempdir");
    let units = dir.path().join("units.json");
    std::fs::write(&units, r#"[{"source_id": "1", "room": "101", "inner_area": "10"}]"#)
        .expect("units");
    let allocation = dir.path().join("allocation.json");
    std::fs::write(&allocation, "[]").expect("allocation");

    let ctx = ApiContext::open("sqlite::memory:").await.expect("db");
    run(&ctx, parse(&["import-base", "unit", &units.to_string_lossy()]).command)
        .await
        .expect("import");
    let err = run(
        &ctx,
        parse(&["save-allocation", "Block", &allocation.to_string_lossy()]).command,
    )
    .await
    .expect_err("missing unit");
    let api = err.downcast_ref::<shared::error::ApiError>().expect("api error");
    assert_eq!(api.code, shared::error::ErrorCode::ValidationFailed);
    assert_eq!(api.details, vec!["ID H1 is missing; room: 101".to_string()]);
}
