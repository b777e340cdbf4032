use super::*;

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("temp dir");
    let db_path = temp_root.path().join("nested").join("apportion.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    storage.close().await;

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn reopening_a_file_database_keeps_state() {
    let temp_root = tempfile::tempdir().expect("temp dir");
    let db_path = temp_root.path().join("apportion.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    let model = storage.insert_model("Floor", None).await.expect("model");
    let root = storage.whole_building_group().await.expect("root");
    storage.close().await;

    let reopened = Storage::new(&database_url).await.expect("reopen");
    assert_eq!(
        reopened.find_model_by_name("Floor").await.expect("lookup"),
        Some(model)
    );
    assert_eq!(reopened.whole_building_group().await.expect("root"), root);
}

#[tokio::test]
async fn seeds_the_whole_building_root() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let root = storage.whole_building_group().await.expect("root");
    let node = storage
        .get_group(root)
        .await
        .expect("lookup")
        .expect("root exists");
    assert_eq!(node.name, "整幢");
    assert!(node.permanent);
    assert_eq!(node.parent_id, None);
}

#[test]
fn memory_urls_have_no_parent_dir() {
    assert_eq!(sqlite_path("sqlite::memory:"), None);
    assert_eq!(sqlite_path("postgres://localhost/db"), None);
    assert_eq!(
        sqlite_path("sqlite://./data/apportion.db?mode=rwc"),
        Some(PathBuf::from("./data/apportion.db"))
    );
}
