//! Config file loading

use std::io::Write;
use std::time::Duration;

use tempfile::NamedTempFile;

use npc_memory::config::{Config, IndexBackend, PipelineMode};

#[test]
fn test_load_explicit_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[server]
listen_addr = "0.0.0.0:7070"

[pipeline]
mode = "sync"
request_timeout_secs = 3

[index]
backend = "elasticsearch"
url = "http://localhost:9200"
"#
    )
    .unwrap();

    let config = Config::load(Some(file.path())).unwrap();
    assert_eq!(config.server.listen_addr, "0.0.0.0:7070");
    assert_eq!(config.pipeline.mode, PipelineMode::Sync);
    assert_eq!(config.pipeline.request_timeout(), Duration::from_secs(3));
    assert_eq!(config.index.backend, IndexBackend::Elasticsearch);
    assert_eq!(config.worker.max_in_flight, 4);
}

#[test]
fn test_missing_explicit_file_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = Config::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
    assert_eq!(err.kind(), "config");
}

#[test]
fn test_invalid_toml_is_config_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[pipeline\nmode = ").unwrap();

    let err = Config::from_file(file.path()).unwrap_err();
    assert_eq!(err.kind(), "config");
    assert!(err.to_string().contains("parse"));
}

#[test]
fn test_default_paths_end_with_local_file() {
    let paths = Config::default_paths();
    assert_eq!(
        paths.last().map(|p| p.to_string_lossy().into_owned()),
        Some("config.toml".to_string())
    );
}

#[test]
fn test_out_of_range_ranking_is_rejected_at_load() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[ranking]
rrf_k = -1.0
"#
    )
    .unwrap();

    let err = Config::load(Some(file.path())).unwrap_err();
    assert_eq!(err.kind(), "config");
    assert!(err.to_string().contains("rrf_k"));
}

#[test]
fn test_importance_floor_above_one_is_rejected() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[ranking]\nimportance_floor = 1.2").unwrap();

    let err = Config::from_file(file.path()).unwrap_err();
    assert!(err.to_string().contains("importance_floor"));
}
