mod common;

use common::{spawn_api, API_KEY, SUBDOMAIN};
use lib_common::assets::thinkific_pipeline::{materialize, ThinkificPipelineConfig, ASSET_KEYS};
use lib_common::configs::{ProviderKind, ProviderLayer, RuntimeConfig};
use lib_common::destinations::{DestinationKind, SqliteDestination};
use lib_common::ingestors::{ThinkificCredentials, ThinkificSource};
use lib_common::pipeline::Pipeline;

#[tokio::test]
async fn test_second_run_merges_on_id() {
    let (api, base_url) = spawn_api().await;
    let credentials = ThinkificCredentials {
        api_key: API_KEY.to_string(),
        subdomain: SUBDOMAIN.to_string(),
    };
    let source = ThinkificSource::connect(&credentials, &base_url).unwrap();
    let pipeline = Pipeline::new("thinkific", "data", SqliteDestination::open_in_memory().unwrap());

    let first = pipeline.run(&source).await.unwrap();
    assert!(first.first_run);
    assert_eq!(first.total_rows(), 13);

    *api.users_name_suffix.lock().unwrap() = " (renamed)".to_string();
    *api.extra_user.lock().unwrap() = true;
    let second = pipeline.run(&source).await.unwrap();
    assert!(!second.first_run);
    assert_ne!(first.load_id, second.load_id);

    let users = pipeline.destination().read_table("data", "users").unwrap();
    assert_eq!(users.len(), 4);
    let names: Vec<&str> = users.iter().map(|u| u["first_name"].as_str().unwrap()).collect();
    assert!(names.contains(&"Ada (renamed)"));
    assert!(!names.contains(&"Ada"));
    assert!(names.contains(&"Barbara"));

    // Unchanged resources keep one row per id.
    assert_eq!(pipeline.destination().read_table("data", "enrollments").unwrap().len(), 4);
    assert_eq!(pipeline.destination().read_table("data", "course_reviews").unwrap().len(), 4);
}

#[tokio::test]
async fn test_materialize_reports_every_asset_from_config() {
    let (_api, base_url) = spawn_api().await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("thinkific.db");
    let db = db_path.to_string_lossy().to_string();

    let runtime = RuntimeConfig::from_layers(
        dir.path().to_path_buf(),
        vec![ProviderLayer::new(
            ProviderKind::Environment,
            [
                ("THINKIFIC_API_KEY", API_KEY),
                ("THINKIFIC_SUBDOMAIN", SUBDOMAIN),
                ("SOURCES__THINKIFIC__BASE_URL", base_url.as_str()),
                ("DESTINATION__SQLITE__CREDENTIALS", db.as_str()),
            ],
        )],
    );
    let config = ThinkificPipelineConfig {
        destination: DestinationKind::Sqlite,
        ..ThinkificPipelineConfig::default()
    };

    let results = materialize(&config, &runtime).await.unwrap();

    let keys: Vec<String> = results.iter().map(|r| r.asset_key.to_string()).collect();
    assert_eq!(keys, ASSET_KEYS.to_vec());
    for result in &results {
        assert_eq!(result.metadata.len(), 6);
        assert_eq!(result.metadata["dataset_name"], "thinkific");
        assert_eq!(result.metadata["destination_type"], "sqlite");
        assert_eq!(result.metadata["first_run"], "true");
    }

    let stored = SqliteDestination::open(&db_path).unwrap();
    assert_eq!(stored.read_table("thinkific", "courses").unwrap().len(), 2);
}
