//! Environment-variable configuration layering. These tests mutate
//! process-wide environment state, so they run serially.

use loreforge::config::{DimensionReduction, EnvName, IngestConfig, SplitBy, VectorBackend};
use serial_test::serial;

fn clear_vars() {
    for var in [
        "VECTOR_STORE_BACKEND",
        "ASTRA_REQUIRE_CREDS",
        "ASTRA_SIMULATE",
        "ASTRA_INSECURE",
        "CASSANDRA_KEYSPACE",
        "CASSANDRA_TABLE",
        "CASSANDRA_VECTOR_SCAN_LIMIT",
        "CHUNK_MAX_CHARS",
        "CHUNK_HARD_CAP",
        "CHUNK_MIN_CHARS",
        "CHUNK_OVERLAP",
        "SPLIT_BY",
        "MODEL_DIM",
        "EMBED_DIM_REDUCTION",
        "ABORT_ON_INCOMPATIBLE_VECTOR",
        "GRAPH_BACKEND",
        "SSL_NO_VERIFY",
    ] {
        std::env::remove_var(var);
    }
}

#[test]
#[serial]
fn defaults_without_environment() {
    clear_vars();
    let config = IngestConfig::from_env(EnvName::Dev).unwrap();
    assert_eq!(config.vector_store.backend, VectorBackend::Memory);
    assert_eq!(config.chunking.max_chars, 500);
    assert_eq!(config.embedding.model_dim, 1024);
    assert_eq!(config.embedding.reduction, DimensionReduction::Pca1024);
    assert_eq!(config.chunking.split_by, SplitBy::Word);
}

#[test]
#[serial]
fn environment_overrides_apply() {
    clear_vars();
    std::env::set_var("VECTOR_STORE_BACKEND", "cassandra");
    std::env::set_var("CASSANDRA_KEYSPACE", "lore");
    std::env::set_var("CASSANDRA_TABLE", "fragments");
    std::env::set_var("CASSANDRA_VECTOR_SCAN_LIMIT", "500");
    std::env::set_var("CHUNK_MAX_CHARS", "400");
    std::env::set_var("CHUNK_HARD_CAP", "450");
    std::env::set_var("CHUNK_OVERLAP", "40");
    std::env::set_var("SPLIT_BY", "sentence");
    std::env::set_var("EMBED_DIM_REDUCTION", "truncate");
    std::env::set_var("ABORT_ON_INCOMPATIBLE_VECTOR", "false");

    let config = IngestConfig::from_env(EnvName::Test).unwrap();
    assert_eq!(config.vector_store.backend, VectorBackend::Cassandra);
    assert_eq!(config.vector_store.wide_column.keyspace, "lore");
    assert_eq!(config.vector_store.wide_column.table, "fragments");
    assert_eq!(config.vector_store.wide_column.scan_limit, 500);
    assert_eq!(config.chunking.max_chars, 400);
    assert_eq!(config.chunking.hard_cap, 450);
    assert_eq!(config.chunking.overlap, 40);
    assert_eq!(config.chunking.split_by, SplitBy::Sentence);
    assert_eq!(config.embedding.reduction, DimensionReduction::Truncate);
    assert!(!config.embedding.abort_on_incompatible);

    clear_vars();
}

#[test]
#[serial]
fn unknown_backend_is_fatal() {
    clear_vars();
    std::env::set_var("VECTOR_STORE_BACKEND", "pinecone");
    let result = IngestConfig::from_env(EnvName::Dev);
    assert!(result.is_err());
    clear_vars();
}

#[test]
#[serial]
fn ssl_bypass_rejected_outside_dev() {
    clear_vars();
    std::env::set_var("SSL_NO_VERIFY", "true");
    assert!(IngestConfig::from_env(EnvName::Prod).is_err());
    assert!(IngestConfig::from_env(EnvName::Dev).is_ok());
    clear_vars();
}
