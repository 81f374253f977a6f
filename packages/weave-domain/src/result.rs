use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::plan::{BackendKind, ExecutionMode};

pub const META_CROSS_VALIDATED: &str = "crossValidated";
pub const META_RRF_SCORE: &str = "rrfScore";
pub const META_SOURCE_SCORE: &str = "sourceScore";
pub const META_SOURCES: &str = "sources";

const ID_COLUMNS: [&str; 3] = ["node_id", "id", "document_id"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
	pub node_id: String,
	pub display_name: String,
	pub entity_type: String,
	pub score: f64,
	#[serde(default)]
	pub metadata: Map<String, Value>,
}
impl SearchResult {
	pub fn new(
		node_id: impl Into<String>,
		display_name: impl Into<String>,
		entity_type: impl Into<String>,
		score: f64,
	) -> Self {
		Self {
			node_id: node_id.into(),
			display_name: display_name.into(),
			entity_type: entity_type.into(),
			score: clamp01(score),
			metadata: Map::new(),
		}
	}

	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		self.metadata.insert(key.into(), value.into());

		self
	}

	pub fn is_cross_validated(&self) -> bool {
		self.metadata.get(META_CROSS_VALIDATED).and_then(Value::as_bool).unwrap_or(false)
	}

	/// Best score a backend assigned before fusion, falling back to the current score.
	pub fn source_score(&self) -> f64 {
		self.metadata.get(META_SOURCE_SCORE).and_then(Value::as_f64).unwrap_or(self.score)
	}

	/// Copy marked as corroborated with its score multiplied by `boost` and capped at 1.0.
	pub fn cross_validated(&self, boost: f64) -> Self {
		let mut next = self.clone();

		if !next.is_cross_validated() {
			next.score = clamp01(next.score * boost);
		}

		next.metadata.insert(META_CROSS_VALIDATED.to_string(), Value::Bool(true));

		next
	}

	pub fn rescored(&self, score: f64) -> Self {
		let mut next = self.clone();

		next.score = clamp01(score);

		next
	}
}

/// One backend's ordered output, the unit RankFusion consumes.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedList {
	pub source: BackendKind,
	pub results: Vec<SearchResult>,
}
impl RankedList {
	pub fn new(source: BackendKind, results: Vec<SearchResult>) -> Self {
		Self { source, results }
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabularResult {
	pub columns: Vec<String>,
	pub rows: Vec<Vec<Value>>,
	pub row_count: usize,
	pub elapsed_ms: f64,
	pub success: bool,
	pub error: Option<String>,
}
impl TabularResult {
	pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>, elapsed_ms: f64) -> Self {
		let row_count = rows.len();

		Self { columns, rows, row_count, elapsed_ms, success: true, error: None }
	}

	pub fn failed(error: impl Into<String>, elapsed_ms: f64) -> Self {
		Self {
			columns: Vec::new(),
			rows: Vec::new(),
			row_count: 0,
			elapsed_ms,
			success: false,
			error: Some(error.into()),
		}
	}

	pub fn has_rows(&self) -> bool {
		self.success && self.row_count > 0
	}

	pub fn truncated(mut self, max_rows: usize) -> Self {
		self.rows.truncate(max_rows);
		self.row_count = self.rows.len();

		self
	}

	pub fn column_index(&self, name: &str) -> Option<usize> {
		self.columns.iter().position(|column| column.eq_ignore_ascii_case(name))
	}

	/// Identifiers found in the first identifier-like column, if any.
	pub fn identifiers(&self) -> BTreeSet<String> {
		let Some(index) = ID_COLUMNS.iter().find_map(|name| self.column_index(name)) else {
			return BTreeSet::new();
		};

		self.rows.iter().filter_map(|row| row.get(index)).filter_map(value_to_key).collect()
	}

	/// Reads a label/count table (e.g. organization, document_count) as a ranking.
	///
	/// The label is the first textual column, the count the first numeric one. Row order is kept;
	/// scores are counts relative to the largest count.
	pub fn to_ranked(&self, entity_type: &str) -> Vec<SearchResult> {
		if !self.success || self.rows.is_empty() {
			return Vec::new();
		}

		let first = &self.rows[0];
		let Some(label_index) = first.iter().position(Value::is_string) else {
			return Vec::new();
		};
		let count_index = first.iter().position(Value::is_number);
		let counts: Vec<f64> = self
			.rows
			.iter()
			.map(|row| {
				count_index.and_then(|index| row.get(index)).and_then(Value::as_f64).unwrap_or(0.0)
			})
			.collect();
		let max = counts.iter().copied().fold(0.0_f64, f64::max);
		let mut seen = BTreeSet::new();
		let mut out = Vec::new();

		for (row, count) in self.rows.iter().zip(counts) {
			let Some(label) = row.get(label_index).and_then(Value::as_str) else {
				continue;
			};
			let key = normalize_label(label);

			if key.is_empty() || !seen.insert(key.clone()) {
				continue;
			}

			let score = if max > 0.0 { count / max } else { 0.0 };

			out.push(
				SearchResult::new(key, label.trim(), entity_type, score)
					.with_metadata("count", count),
			);
		}

		out
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendErrorKind {
	Timeout,
	Unavailable,
	MalformedResponse,
}
impl BackendErrorKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Timeout => "timeout",
			Self::Unavailable => "unavailable",
			Self::MalformedResponse => "malformed_response",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorDescriptor {
	pub kind: BackendErrorKind,
	pub message: String,
}

/// Outcome of one backend branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceDescriptor {
	pub backend: BackendKind,
	pub label: String,
	pub success: bool,
	pub result_count: usize,
	pub sub_query: Option<usize>,
	pub error: Option<ErrorDescriptor>,
}
impl SourceDescriptor {
	pub fn succeeded(backend: BackendKind, label: impl Into<String>, result_count: usize) -> Self {
		Self {
			backend,
			label: label.into(),
			success: true,
			result_count,
			sub_query: None,
			error: None,
		}
	}

	pub fn failed(backend: BackendKind, label: impl Into<String>, error: ErrorDescriptor) -> Self {
		Self {
			backend,
			label: label.into(),
			success: false,
			result_count: 0,
			sub_query: None,
			error: Some(error),
		}
	}

	pub fn for_sub_query(mut self, index: usize) -> Self {
		self.sub_query = Some(index);

		self
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergedContext {
	pub tabular: BTreeMap<String, TabularResult>,
	pub ranked: Vec<SearchResult>,
	pub confidence: f64,
	pub sources_used: Vec<SourceDescriptor>,
	pub stage_timings_ms: BTreeMap<String, f64>,
	pub mode: ExecutionMode,
}
impl MergedContext {
	pub fn empty(mode: ExecutionMode) -> Self {
		Self {
			tabular: BTreeMap::new(),
			ranked: Vec::new(),
			confidence: 0.0,
			sources_used: Vec::new(),
			stage_timings_ms: BTreeMap::new(),
			mode,
		}
	}

	/// Backends that answered without error and returned at least one result.
	pub fn productive_backends(&self) -> BTreeSet<BackendKind> {
		self.sources_used
			.iter()
			.filter(|source| source.success && source.result_count > 0)
			.map(|source| source.backend)
			.collect()
	}

	pub fn has_results(&self) -> bool {
		!self.ranked.is_empty() || self.tabular.values().any(TabularResult::has_rows)
	}

	pub fn is_partial_failure(&self) -> bool {
		let failed = self.sources_used.iter().any(|source| !source.success);
		let succeeded = self.sources_used.iter().any(|source| source.success);

		failed && succeeded
	}
}

pub fn clamp01(value: f64) -> f64 {
	if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

pub fn normalize_label(label: &str) -> String {
	label.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

fn value_to_key(value: &Value) -> Option<String> {
	match value {
		Value::String(text) => Some(text.clone()),
		Value::Number(number) => Some(number.to_string()),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn to_ranked_reads_label_and_count_columns() {
		let table = TabularResult::new(
			vec!["organization".to_string(), "document_count".to_string()],
			vec![
				vec![json!("Acme Labs"), json!(40)],
				vec![json!("Borealis"), json!(10)],
				vec![json!("acme  labs"), json!(5)],
			],
			3.0,
		);
		let ranked = table.to_ranked("organization");

		assert_eq!(ranked.len(), 2);
		assert_eq!(ranked[0].node_id, "acme labs");
		assert_eq!(ranked[0].score, 1.0);
		assert_eq!(ranked[1].score, 0.25);
	}

	#[test]
	fn identifiers_use_first_id_like_column() {
		let table = TabularResult::new(
			vec!["title".to_string(), "id".to_string()],
			vec![vec![json!("x"), json!("D1")], vec![json!("y"), json!(7)]],
			1.0,
		);

		assert_eq!(table.identifiers(), BTreeSet::from(["D1".to_string(), "7".to_string()]));
	}

	#[test]
	fn cross_validated_boost_is_capped() {
		let result = SearchResult::new("a", "A", "document", 0.95).cross_validated(1.15);

		assert_eq!(result.score, 1.0);
		assert!(result.is_cross_validated());
	}
}
