//! Knowledge-graph pipeline
//!
//! Takes the graph produced by an upstream RAG indexer and:
//! - parses it (GraphML, intermediate JSON, or vector-db dumps) into a canonical model
//! - ingests it into Neo4j in bounded, idempotent, retried batches
//! - computes connectivity analytics (counts, relationship types, degree centrality)
//! - lays it out deterministically and exports an SVG / HTML visualization

pub mod analytics;
pub mod error;
pub mod export;
pub mod graph;
pub mod ingest;
pub mod layout;
pub mod neo4j;

use anyhow::{bail, Result};
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use graph::DanglingPolicy;
use ingest::IngestOptions;
use layout::LayoutParams;
use neo4j::{Neo4jClient, RetryPolicy};

/// File names inside the working directory.
pub mod artifacts {
    pub const GRAPHML: &str = "graph_chunk_entity_relation.graphml";
    pub const GRAPH_JSON: &str = "graph_data.json";
    pub const VDB_ENTITIES: &str = "vdb_entities.json";
    pub const VDB_RELATIONSHIPS: &str = "vdb_relationships.json";
    pub const INGEST_REPORT: &str = "ingest_report.json";
    pub const GRAPH_STATS: &str = "graph_stats.json";
    pub const VISUALIZATION: &str = "knowledge_graph.html";
}

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub working_dir: Option<String>,
    pub neo4j: Neo4jYamlConfig,
    pub ingest: IngestYamlConfig,
    pub analytics: AnalyticsYamlConfig,
    pub layout: LayoutYamlConfig,
}

/// Neo4j configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Neo4jYamlConfig {
    /// HTTP base URL of the server
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl Default for Neo4jYamlConfig {
    fn default() -> Self {
        Self {
            uri: "http://localhost:7474".into(),
            user: "neo4j".into(),
            password: "password".into(),
            database: "neo4j".into(),
        }
    }
}

/// Ingestion section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngestYamlConfig {
    pub node_batch_size: usize,
    pub edge_batch_size: usize,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub request_timeout_ms: u64,
    pub concurrency: usize,
    pub dangling: DanglingPolicy,
}

impl Default for IngestYamlConfig {
    fn default() -> Self {
        Self {
            node_batch_size: 500,
            edge_batch_size: 100,
            max_retries: 3,
            backoff_initial_ms: 200,
            backoff_max_ms: 5000,
            request_timeout_ms: 30_000,
            concurrency: 4,
            dangling: DanglingPolicy::Exclude,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsYamlConfig {
    pub top_k: usize,
}

impl Default for AnalyticsYamlConfig {
    fn default() -> Self {
        Self {
            top_k: analytics::DEFAULT_TOP_K,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LayoutYamlConfig {
    pub iterations: usize,
    pub seed: u64,
    pub width: f64,
    pub height: f64,
}

impl Default for LayoutYamlConfig {
    fn default() -> Self {
        Self {
            iterations: 50,
            seed: 42,
            width: 1200.0,
            height: 900.0,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub working_dir: PathBuf,
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,
    pub neo4j_database: String,
    pub node_batch_size: usize,
    pub edge_batch_size: usize,
    pub max_retries: u32,
    pub backoff_initial_ms: u64,
    pub backoff_max_ms: u64,
    pub request_timeout_ms: u64,
    pub concurrency: usize,
    pub dangling: DanglingPolicy,
    pub top_k: usize,
    pub layout_iterations: usize,
    pub layout_seed: u64,
    pub layout_width: f64,
    pub layout_height: f64,
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.parse().ok())
}

impl Config {
    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "kgpipe.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let config = Self {
            working_dir: std::env::var("KG_WORKING_DIR")
                .ok()
                .or(yaml.working_dir)
                .unwrap_or_else(|| "./index_default".into())
                .into(),
            neo4j_uri: std::env::var("NEO4J_URI").unwrap_or(yaml.neo4j.uri),
            neo4j_user: std::env::var("NEO4J_USER").unwrap_or(yaml.neo4j.user),
            neo4j_password: std::env::var("NEO4J_PASSWORD").unwrap_or(yaml.neo4j.password),
            neo4j_database: std::env::var("NEO4J_DATABASE").unwrap_or(yaml.neo4j.database),
            node_batch_size: env_parse("KG_NODE_BATCH_SIZE").unwrap_or(yaml.ingest.node_batch_size),
            edge_batch_size: env_parse("KG_EDGE_BATCH_SIZE").unwrap_or(yaml.ingest.edge_batch_size),
            max_retries: env_parse("KG_MAX_RETRIES").unwrap_or(yaml.ingest.max_retries),
            backoff_initial_ms: yaml.ingest.backoff_initial_ms,
            backoff_max_ms: yaml.ingest.backoff_max_ms,
            request_timeout_ms: yaml.ingest.request_timeout_ms,
            concurrency: env_parse("KG_CONCURRENCY").unwrap_or(yaml.ingest.concurrency),
            dangling: yaml.ingest.dangling,
            top_k: env_parse("KG_TOP_K").unwrap_or(yaml.analytics.top_k),
            layout_iterations: env_parse("KG_LAYOUT_ITERATIONS").unwrap_or(yaml.layout.iterations),
            layout_seed: env_parse("KG_LAYOUT_SEED").unwrap_or(yaml.layout.seed),
            layout_width: yaml.layout.width,
            layout_height: yaml.layout.height,
        };
        config.validate()?;
        Ok(config)
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("kgpipe.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }

    /// Reject values no run can work with.
    pub fn validate(&self) -> Result<()> {
        if self.node_batch_size == 0 || self.edge_batch_size == 0 {
            bail!("batch sizes must be greater than zero");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be greater than zero");
        }
        if self.backoff_initial_ms > self.backoff_max_ms {
            bail!(
                "backoff_initial_ms ({}) exceeds backoff_max_ms ({})",
                self.backoff_initial_ms,
                self.backoff_max_ms
            );
        }
        if self.request_timeout_ms == 0 {
            bail!("request_timeout_ms must be greater than zero");
        }
        if !(self.layout_width > 0.0 && self.layout_height > 0.0) {
            bail!("layout width and height must be positive");
        }
        Ok(())
    }

    pub fn artifact(&self, name: &str) -> PathBuf {
        self.working_dir.join(name)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_initial: Duration::from_millis(self.backoff_initial_ms),
            backoff_max: Duration::from_millis(self.backoff_max_ms),
            attempt_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn ingest_options(&self) -> Result<IngestOptions> {
        let non_zero = |v: usize, name: &str| {
            NonZeroUsize::new(v).ok_or_else(|| anyhow::anyhow!("{} must be greater than zero", name))
        };
        Ok(IngestOptions {
            node_batch_size: non_zero(self.node_batch_size, "node_batch_size")?,
            edge_batch_size: non_zero(self.edge_batch_size, "edge_batch_size")?,
            concurrency: non_zero(self.concurrency, "concurrency")?,
            retry: self.retry_policy(),
        })
    }

    pub fn layout_params(&self) -> LayoutParams {
        LayoutParams {
            iterations: self.layout_iterations,
            seed: self.layout_seed,
        }
    }

    /// Build the Neo4j client described by this config.
    pub fn neo4j_client(&self) -> Result<Neo4jClient> {
        Ok(Neo4jClient::new(
            &self.neo4j_uri,
            &self.neo4j_user,
            &self.neo4j_password,
            &self.neo4j_database,
            Duration::from_millis(self.request_timeout_ms),
        )?)
    }
}

// ============================================================================
// Tests
// ============================================================================
