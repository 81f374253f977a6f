mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Confidence, Config, CrossValidation, EmbeddingProviderConfig, Fusion, GraphTables,
	LlmProviderConfig, Orchestrator, Postgres, Providers, Qdrant, Service, Storage, Thresholds,
};

use std::{fs, path::Path};

pub const BACKEND_NAMES: [&str; 4] = ["relational", "vector", "graph", "keyword"];
pub const SUBTYPE_NAMES: [&str; 10] = [
	"list",
	"aggregation",
	"ranking",
	"trendanalysis",
	"concept",
	"recommendation",
	"comparison",
	"compound",
	"impactranking",
	"default",
];

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.storage.qdrant.url.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.qdrant.url must be non-empty.".to_string(),
		});
	}

	for (label, table) in [
		("storage.graph.nodes_table", &cfg.storage.graph.nodes_table),
		("storage.graph.edges_table", &cfg.storage.graph.edges_table),
	] {
		if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
			return Err(Error::Validation {
				message: format!("{label} must be a plain SQL identifier."),
			});
		}
	}

	if cfg.providers.embedding.dimensions == 0 {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must be greater than zero.".to_string(),
		});
	}
	if cfg.providers.embedding.dimensions != cfg.storage.qdrant.vector_dim {
		return Err(Error::Validation {
			message: "providers.embedding.dimensions must match storage.qdrant.vector_dim."
				.to_string(),
		});
	}

	for (label, key) in [
		("embedding", &cfg.providers.embedding.api_key),
		("classifier", &cfg.providers.classifier.api_key),
		("query_generator", &cfg.providers.query_generator.api_key),
	] {
		if key.trim().is_empty() {
			return Err(Error::Validation {
				message: format!("Provider {label} api_key must be non-empty."),
			});
		}
	}

	validate_orchestrator(&cfg.orchestrator)?;
	validate_fusion(&cfg.fusion)?;

	let cross = &cfg.cross_validation;

	if !cross.boost.is_finite() || cross.boost <= 1.0 {
		return Err(Error::Validation {
			message: "cross_validation.boost must be a finite number greater than 1.0."
				.to_string(),
		});
	}
	if cross.top_n == 0 {
		return Err(Error::Validation {
			message: "cross_validation.top_n must be greater than zero.".to_string(),
		});
	}

	validate_confidence(&cfg.confidence)?;
	validate_thresholds(&cfg.thresholds)?;

	Ok(())
}

fn validate_orchestrator(cfg: &Orchestrator) -> Result<()> {
	for (label, value) in [
		("orchestrator.task_timeout_ms", cfg.task_timeout_ms),
		("orchestrator.backend_timeout_ms", cfg.backend_timeout_ms),
		("orchestrator.classify_timeout_ms", cfg.classify_timeout_ms),
	] {
		if value == 0 {
			return Err(Error::Validation {
				message: format!("{label} must be greater than zero."),
			});
		}
	}

	if cfg.max_workers == 0 {
		return Err(Error::Validation {
			message: "orchestrator.max_workers must be greater than zero.".to_string(),
		});
	}
	if cfg.traverse_depth == 0 {
		return Err(Error::Validation {
			message: "orchestrator.traverse_depth must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_fusion(cfg: &Fusion) -> Result<()> {
	if cfg.rrf_k == 0 {
		return Err(Error::Validation {
			message: "fusion.rrf_k must be greater than zero.".to_string(),
		});
	}

	for (subtype, priorities) in &cfg.priority_overrides {
		let normalized: String = subtype
			.chars()
			.filter(|c| *c != '_' && *c != '-')
			.flat_map(char::to_lowercase)
			.collect();

		if !SUBTYPE_NAMES.contains(&normalized.as_str()) {
			return Err(Error::Validation {
				message: format!("fusion.priority_overrides has unknown subtype {subtype}."),
			});
		}

		for backend in priorities.keys() {
			if !BACKEND_NAMES.contains(&backend.as_str()) {
				return Err(Error::Validation {
					message: format!(
						"fusion.priority_overrides.{subtype} has unknown backend {backend}."
					),
				});
			}
		}
	}

	Ok(())
}

fn validate_confidence(cfg: &Confidence) -> Result<()> {
	let weights = [
		("confidence.source_weight", cfg.source_weight),
		("confidence.top_score_weight", cfg.top_score_weight),
		("confidence.cross_validated_weight", cfg.cross_validated_weight),
	];

	for (label, weight) in weights {
		if !weight.is_finite() {
			return Err(Error::Validation { message: format!("{label} must be a finite number.") });
		}
		if !(0.0..=1.0).contains(&weight) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}

	let sum: f64 = weights.iter().map(|(_, weight)| weight).sum();

	if (sum - 1.0).abs() > 1e-6 {
		return Err(Error::Validation {
			message: "confidence weights must sum to 1.0.".to_string(),
		});
	}
	if cfg.top_n == 0 {
		return Err(Error::Validation {
			message: "confidence.top_n must be greater than zero.".to_string(),
		});
	}
	if cfg.source_saturation == 0 {
		return Err(Error::Validation {
			message: "confidence.source_saturation must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn validate_thresholds(cfg: &Thresholds) -> Result<()> {
	for (label, value) in [
		("thresholds.vector_min_score", cfg.vector_min_score),
		("thresholds.graph_min_score", cfg.graph_min_score),
		("thresholds.keyword_min_score", cfg.keyword_min_score),
	] {
		if !value.is_finite() || !(0.0..=1.0).contains(&value) {
			return Err(Error::Validation {
				message: format!("{label} must be in the range 0.0-1.0."),
			});
		}
	}

	if !cfg.keyword_score_scale.is_finite() || cfg.keyword_score_scale <= 0.0 {
		return Err(Error::Validation {
			message: "thresholds.keyword_score_scale must be greater than zero.".to_string(),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	if cfg.orchestrator.schema_hint.as_deref().map(|hint| hint.trim().is_empty()).unwrap_or(false)
	{
		cfg.orchestrator.schema_hint = None;
	}

	cfg.service.log_level = cfg.service.log_level.trim().to_string();
}
