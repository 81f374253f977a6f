use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	pub providers: Providers,
	#[serde(default)]
	pub orchestrator: Orchestrator,
	#[serde(default)]
	pub fusion: Fusion,
	#[serde(default)]
	pub cross_validation: CrossValidation,
	#[serde(default)]
	pub confidence: Confidence,
	#[serde(default)]
	pub thresholds: Thresholds,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
	pub qdrant: Qdrant,
	#[serde(default)]
	pub graph: GraphTables,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Qdrant {
	pub url: String,
	pub collection: String,
	pub vector_dim: u32,
}

/// Postgres tables backing the graph-relationship index.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphTables {
	pub nodes_table: String,
	pub edges_table: String,
}
impl Default for GraphTables {
	fn default() -> Self {
		Self { nodes_table: "graph_nodes".to_string(), edges_table: "graph_edges".to_string() }
	}
}

#[derive(Debug, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub classifier: LlmProviderConfig,
	pub query_generator: LlmProviderConfig,
}

#[derive(Debug, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Orchestrator {
	/// Shared bound for every task launched by a multi-backend mode.
	pub task_timeout_ms: u64,
	/// Bound for a single adapter call, retries excluded.
	pub backend_timeout_ms: u64,
	pub classify_timeout_ms: u64,
	pub max_workers: usize,
	pub max_retries: u32,
	pub retry_backoff_ms: u64,
	pub traverse_depth: u32,
	/// Passed to the query generator alongside the question. Optional.
	pub schema_hint: Option<String>,
}
impl Default for Orchestrator {
	fn default() -> Self {
		Self {
			task_timeout_ms: 60_000,
			backend_timeout_ms: 30_000,
			classify_timeout_ms: 15_000,
			max_workers: 3,
			max_retries: 1,
			retry_backoff_ms: 200,
			traverse_depth: 2,
			schema_hint: None,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Fusion {
	pub rrf_k: u32,
	/// Keyed by intent subtype, then backend name. Lower values win ties.
	pub priority_overrides: BTreeMap<String, BTreeMap<String, i32>>,
}
impl Default for Fusion {
	fn default() -> Self {
		Self { rrf_k: 60, priority_overrides: BTreeMap::new() }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CrossValidation {
	pub enabled: bool,
	pub boost: f64,
	pub top_n: usize,
}
impl Default for CrossValidation {
	fn default() -> Self {
		Self { enabled: true, boost: 1.15, top_n: 10 }
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Confidence {
	pub source_weight: f64,
	pub top_score_weight: f64,
	pub cross_validated_weight: f64,
	pub top_n: usize,
	pub source_saturation: usize,
}
impl Default for Confidence {
	fn default() -> Self {
		Self {
			source_weight: 0.3,
			top_score_weight: 0.4,
			cross_validated_weight: 0.3,
			top_n: 10,
			source_saturation: 3,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Thresholds {
	pub vector_min_score: f64,
	pub graph_min_score: f64,
	pub keyword_min_score: f64,
	/// Raw BM25 scores are divided by this before the minimum applies.
	pub keyword_score_scale: f64,
}
impl Default for Thresholds {
	fn default() -> Self {
		Self {
			vector_min_score: 0.35,
			graph_min_score: 0.25,
			keyword_min_score: 0.1,
			keyword_score_scale: 30.0,
		}
	}
}
