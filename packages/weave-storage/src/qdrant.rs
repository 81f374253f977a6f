use std::collections::HashMap;

use qdrant_client::qdrant::{
	Document, PointId, PrefetchQueryBuilder, Query, QueryPointsBuilder, ScoredPoint, Value,
	point_id::PointIdOptions, value::Kind,
};

use weave_domain::SearchResult;

use crate::Result;

pub const DENSE_VECTOR_NAME: &str = "dense";
pub const BM25_VECTOR_NAME: &str = "bm25";
pub const BM25_MODEL: &str = "qdrant/bm25";

const DEFAULT_ENTITY_TYPE: &str = "document";
const PASSTHROUGH_FIELDS: [&str; 4] = ["organization", "community", "classification_code", "year"];

pub struct QdrantStore {
	pub client: qdrant_client::Qdrant,
	pub collection: String,
	pub vector_dim: u32,
}
impl QdrantStore {
	pub fn new(cfg: &weave_config::Qdrant) -> Result<Self> {
		let client = qdrant_client::Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { client, collection: cfg.collection.clone(), vector_dim: cfg.vector_dim })
	}

	/// Dense nearest-neighbour search. Scores are the collection's similarity values.
	pub async fn search_dense(&self, vector: Vec<f32>, limit: usize) -> Result<Vec<SearchResult>> {
		let prefetch = PrefetchQueryBuilder::default()
			.query(Query::new_nearest(vector))
			.using(DENSE_VECTOR_NAME)
			.limit(limit as u64);
		let search = QueryPointsBuilder::new(self.collection.clone())
			.add_prefetch(prefetch)
			.with_payload(true)
			.limit(limit as u64);
		let response = self.client.query(search).await?;

		Ok(response.result.iter().filter_map(|point| point_to_result(point, 1.0)).collect())
	}

	/// BM25 search over the sparse vector. Raw scores are unbounded, so each is divided by
	/// `score_scale` before clamping into `[0, 1]`.
	pub async fn search_bm25(
		&self,
		text: &str,
		limit: usize,
		score_scale: f64,
	) -> Result<Vec<SearchResult>> {
		let search = QueryPointsBuilder::new(self.collection.clone())
			.query(Query::new_nearest(Document::new(text.to_string(), BM25_MODEL)))
			.using(BM25_VECTOR_NAME)
			.with_payload(true)
			.limit(limit as u64);
		let response = self.client.query(search).await?;

		Ok(response.result.iter().filter_map(|point| point_to_result(point, score_scale)).collect())
	}
}

/// Converts a scored point into a result. Points without a usable identifier are dropped.
pub fn point_to_result(point: &ScoredPoint, score_scale: f64) -> Option<SearchResult> {
	let payload = &point.payload;
	let node_id = payload_string(payload, "node_id")
		.or_else(|| point.id.as_ref().and_then(point_id_to_string))?;
	let display_name = payload_string(payload, "display_name")
		.or_else(|| payload_string(payload, "title"))
		.unwrap_or_else(|| node_id.clone());
	let entity_type =
		payload_string(payload, "entity_type").unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string());
	let score = f64::from(point.score) / score_scale.max(f64::EPSILON);
	let mut result = SearchResult::new(node_id, display_name, entity_type, score);

	for field in PASSTHROUGH_FIELDS {
		if let Some(value) = payload.get(field).and_then(payload_json) {
			result = result.with_metadata(field, value);
		}
	}

	Some(result)
}

fn point_id_to_string(point_id: &PointId) -> Option<String> {
	match &point_id.point_id_options {
		Some(PointIdOptions::Uuid(id)) => uuid::Uuid::parse_str(id).ok().map(|id| id.to_string()),
		Some(PointIdOptions::Num(num)) => Some(num.to_string()),
		None => None,
	}
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	let value = payload.get(key)?;

	match &value.kind {
		Some(Kind::StringValue(text)) if !text.trim().is_empty() => Some(text.trim().to_string()),
		Some(Kind::IntegerValue(value)) => Some(value.to_string()),
		_ => None,
	}
}

fn payload_json(value: &Value) -> Option<serde_json::Value> {
	match &value.kind {
		Some(Kind::StringValue(text)) => Some(serde_json::Value::from(text.as_str())),
		Some(Kind::IntegerValue(value)) => Some(serde_json::Value::from(*value)),
		Some(Kind::DoubleValue(value)) => Some(serde_json::Value::from(*value)),
		Some(Kind::BoolValue(value)) => Some(serde_json::Value::from(*value)),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn point(id: &str, payload: &[(&str, Value)]) -> ScoredPoint {
		ScoredPoint {
			id: Some(PointId { point_id_options: Some(PointIdOptions::Uuid(id.to_string())) }),
			payload: payload.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
			score: 0.75,
			..Default::default()
		}
	}

	#[test]
	fn payload_fields_map_onto_result() {
		let point = point(
			"00000000-0000-0000-0000-000000000001",
			&[
				("node_id", Value::from("P-1")),
				("display_name", Value::from("Solid-state battery")),
				("entity_type", Value::from("patent")),
				("organization", Value::from("Acme")),
			],
		);
		let result = point_to_result(&point, 1.0).expect("Expected a result.");

		assert_eq!(result.node_id, "P-1");
		assert_eq!(result.entity_type, "patent");
		assert_eq!(result.score, 0.75);
		assert_eq!(result.metadata.get("organization"), Some(&serde_json::json!("Acme")));
	}

	#[test]
	fn point_id_is_used_when_payload_has_no_node_id() {
		let id = "00000000-0000-0000-0000-000000000002";
		let result = point_to_result(&point(id, &[]), 1.0).expect("Expected a result.");

		assert_eq!(result.node_id, id);
		assert_eq!(result.display_name, id);
		assert_eq!(result.entity_type, DEFAULT_ENTITY_TYPE);
	}

	#[test]
	fn bm25_scores_are_rescaled_and_clamped() {
		let mut raw = point("00000000-0000-0000-0000-000000000003", &[]);

		raw.score = 15.0;

		assert_eq!(point_to_result(&raw, 30.0).map(|r| r.score), Some(0.5));
		assert_eq!(point_to_result(&raw, 5.0).map(|r| r.score), Some(1.0));
	}
}
