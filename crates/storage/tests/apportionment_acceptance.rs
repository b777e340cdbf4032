use shared::{
    domain::{BaseKind, BaseRecord, ProposedMember, COMMON_PARTS_SUFFIX},
    protocol::CoefficientRequest,
};
use storage::Storage;

fn record(source_id: &str, floor: &str, room: &str, inner_area: &str) -> BaseRecord {
    BaseRecord {
        source_id: source_id.into(),
        floor: floor.into(),
        room: room.into(),
        main_area: String::new(),
        balcony_area: String::new(),
        inner_area: inner_area.into(),
        usage: String::new(),
    }
}

#[tokio::test]
async fn building_to_results_acceptance() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");

    storage
        .save_base_records(
            BaseKind::UnitInterior,
            &[
                record("1", "1", "101", "50"),
                record("2", "1", "102", "150"),
                record("3", "2", "201", "200"),
            ],
        )
        .await
        .expect("unit records");
    storage
        .save_base_records(BaseKind::CommonBuilding, &[record("1", "1", "stair", "100")])
        .await
        .expect("common records");

    let loaded = storage.list_building_units().await.expect("loaded");
    let ids: Vec<&str> = loaded.iter().map(|u| u.id.as_str()).collect();
    assert_eq!(ids, vec!["H1", "H2", "H3", "C1"]);

    let proposed: Vec<ProposedMember> = loaded
        .iter()
        .map(|unit| {
            let group = if unit.id.starts_with('C') {
                COMMON_PARTS_SUFFIX
            } else if unit.room.starts_with('1') {
                "1F"
            } else {
                "2F"
            };
            ProposedMember::new(group, unit.clone())
        })
        .collect();
    let tables = storage
        .save_allocation("Floor", &proposed)
        .await
        .expect("allocation");
    assert_eq!(tables.len(), 3);
    let common = tables[2].id;
    let floors = vec![tables[0].id, tables[1].id];

    let leaves = storage.list_available_leaf_groups().await.expect("leaves");
    assert_eq!(leaves.len(), 3, "root plus the two floors");

    let building = storage.insert_model("Building", None).await.expect("model");
    let stairs = storage
        .insert_model("Stairs", Some(building))
        .await
        .expect("child model");

    let root = storage.whole_building_group().await.expect("root");
    storage
        .compute_and_store(&CoefficientRequest {
            model_id: building,
            common_tables: vec![common],
            participant_tables: vec![root],
            parent_coefficient: 0.0,
        })
        .await
        .expect("building");
    let parent = storage.inherited_coefficient(stairs).await.expect("inherited");
    assert_eq!(parent, 0.2);
    let outcome = storage
        .compute_and_store(&CoefficientRequest {
            model_id: stairs,
            common_tables: vec![common],
            participant_tables: floors,
            parent_coefficient: parent,
        })
        .await
        .expect("stairs");
    assert_eq!(outcome.coefficient_text(), "0.300000");

    let table = storage.coefficient_table().await.expect("table");
    assert_eq!(table.row("H1").expect("row").total_coefficient, "0.500000");
    assert_eq!(table.cell("H1", "Stairs_apportionedArea"), Some("15.00"));
    assert_eq!(table.row("C1").expect("row").total_coefficient, "0.200000");

    let removed = storage.delete_model(building).await.expect("delete");
    assert_eq!(
        removed,
        vec![
            "Building_coefficient".to_string(),
            "Building_apportionedArea".to_string(),
            "Stairs_coefficient".to_string(),
            "Stairs_apportionedArea".to_string(),
        ]
    );
    let table = storage.coefficient_table().await.expect("table");
    assert_eq!(table.columns, vec!["ID", "room", "innerArea", "totalCoefficient"]);
    assert!(table.rows.iter().all(|r| r.total_coefficient == "0.000000"));

    let dropped = storage.delete_allocation("Floor").await.expect("allocation");
    assert_eq!(dropped.len(), 4);
    assert_eq!(storage.list_available_leaf_groups().await.expect("leaves").len(), 1);
}

#[tokio::test]
async fn concurrent_recomputes_never_duplicate_rows() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let common = storage
        .create_group("Common", "Stair", &[shared::domain::UnitRow::new("C1", "stair", "30")])
        .await
        .expect("common");
    let units = storage
        .create_group(
            "Floor",
            "1F",
            &[
                shared::domain::UnitRow::new("H1", "101", "60"),
                shared::domain::UnitRow::new("H2", "102", "40"),
            ],
        )
        .await
        .expect("units");
    let model = storage.insert_model("Stairs", None).await.expect("model");

    let mut handles = Vec::new();
    for _ in 0..8 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            storage
                .compute_and_store(&CoefficientRequest {
                    model_id: model,
                    common_tables: vec![common],
                    participant_tables: vec![units],
                    parent_coefficient: 0.0,
                })
                .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("compute");
    }

    let table = storage.coefficient_table().await.expect("table");
    assert_eq!(table.columns.len(), 7);
    assert_eq!(table.rows.len(), 2);
    assert_eq!(table.cell("H2", "Stairs_coefficient"), Some("0.300000"));
    assert_eq!(storage.calculated_coefficients().await.expect("list").len(), 1);
}
