use super::*;

use std::collections::HashMap;

fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |key| vars.get(key).cloned()
}

#[test]
fn defaults_apply_without_file_or_env() {
    let dir = tempfile::tempdir().expect("tempdir");
    let settings = load_settings_with(&dir.path().join("absent.toml"), env_from(&[]));
    assert_eq!(settings, Settings::default());
}

#[test]
fn file_then_environment_override_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(DEFAULT_CONFIG_FILE);
    fs::write(
        &path,
        "database_url = \"sqlite://./from-file.db\"\nlog_filter = \"debug\"\n",
    )
    .expect("write config");

    let from_file = load_settings_with(&path, env_from(&[]));
    assert_eq!(from_file.database_url, "sqlite://./from-file.db");
    assert_eq!(from_file.log_filter, "debug");

    let from_env = load_settings_with(
        &path,
        env_from(&[
            ("DATABASE_URL", "sqlite://./generic.db"),
            ("APPORTION_DATABASE_URL", "sqlite://./specific.db"),
            ("APPORTION_LOG", "storage=trace"),
        ]),
    );
    assert_eq!(from_env.database_url, "sqlite://./specific.db");
    assert_eq!(from_env.log_filter, "storage=trace");
}

#[test]
fn malformed_file_is_ignored() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(DEFAULT_CONFIG_FILE);
    fs::write(&path, "database_url = [").expect("write config");
    assert_eq!(load_settings_with(&path, env_from(&[])), Settings::default());
}

#[test]
fn normalizes_plain_file_path_to_sqlite_url() {
    assert_eq!(
        normalize_database_url("./data/test.db"),
        "sqlite://./data/test.db"
    );
    assert_eq!(normalize_database_url("sqlite:./x.db"), "sqlite://./x.db");
    assert_eq!(normalize_database_url("sqlite::memory:"), "sqlite::memory:");
    assert_eq!(normalize_database_url("   "), Settings::default().database_url);
}

#[test]
fn windows_paths_keep_a_single_sqlite_colon() {
    assert_eq!(
        normalize_database_url("C:\\Users\\alice\\test.db"),
        "sqlite:C:/Users/alice/test.db"
    );
    assert_eq!(
        normalize_database_url("sqlite://C:/Users/alice/test.db"),
        "sqlite:C:/Users/alice/test.db"
    );
}

#[tokio::test]
async fn prepared_database_url_creates_openable_sqlite_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db_path = dir.path().join("nested").join("apportion.db");

    let prepared = prepare_database_url(db_path.to_string_lossy().as_ref()).expect("prepare");
    assert!(dir.path().join("nested").exists());

    let ctx = apportion_api::ApiContext::open(&prepared)
        .await
        .expect("open sqlite");
    ctx.close().await;
    assert!(db_path.exists(), "database file should be created: {}", db_path.display());
}
