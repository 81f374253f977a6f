use serde::Deserialize;
use serde_json::Value;

use weave_domain::{ClassifiedQuery, IntentKind, IntentSubtype, RankingKind, SubQuery};

use crate::{Error, Result};

const MAX_ATTEMPTS: usize = 3;
const SYSTEM_PROMPT: &str = "\
Classify the user's question for a retrieval planner. Respond with one JSON object and nothing \
else, using these fields:
- intentKind: one of tabular, semantic, hybrid, direct.
- intentSubtype: one of list, aggregation, ranking, trendAnalysis, concept, recommendation, \
comparison, compound, impactRanking.
- rankingKind: simple or complex. Use complex when the ranking needs counting or grouping.
- entityTypes: array of entity types such as document, patent, proposal, project, equipment, \
scorecard.
- keywords: array of salient search terms.
- subQueries: for compound questions only, an array of objects with index, text, subtype, \
entityTypes, keywords and an optional dependsOn index of an earlier sub-query.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Classification {
	intent_kind: String,
	intent_subtype: String,
	#[serde(default)]
	ranking_kind: Option<String>,
	#[serde(default)]
	entity_types: Vec<String>,
	#[serde(default)]
	keywords: Vec<String>,
	#[serde(default)]
	sub_queries: Vec<SubQuery>,
}

pub async fn classify(
	cfg: &weave_config::LlmProviderConfig,
	text: &str,
) -> Result<ClassifiedQuery> {
	let messages = vec![
		serde_json::json!({ "role": "system", "content": SYSTEM_PROMPT }),
		serde_json::json!({ "role": "user", "content": text }),
	];
	let mut last_err = None;

	for attempt in 0..MAX_ATTEMPTS {
		let json = crate::chat(cfg, &messages).await?;

		match parse_classification(text, &json) {
			Ok(query) => return Ok(query),
			Err(err) => {
				tracing::warn!(
					error = %err,
					attempt = attempt + 1,
					"Classifier returned malformed output."
				);

				last_err = Some(err);
			},
		}
	}

	Err(last_err.unwrap_or_else(|| Error::InvalidResponse {
		message: "Classifier returned no usable output.".to_string(),
	}))
}

fn parse_classification(text: &str, json: &Value) -> Result<ClassifiedQuery> {
	let content = crate::choice_content(json).ok_or_else(|| Error::InvalidResponse {
		message: "Classifier response is missing message content.".to_string(),
	})?;
	let parsed: Classification = serde_json::from_str(crate::strip_code_fence(content))?;
	let intent_kind = parse_intent_kind(&parsed.intent_kind).ok_or_else(|| {
		Error::InvalidResponse { message: format!("Unknown intent kind {}.", parsed.intent_kind) }
	})?;
	let ranking_kind = match parsed.ranking_kind.as_deref().map(str::trim) {
		Some(kind) if kind.eq_ignore_ascii_case("complex") => RankingKind::Complex,
		_ => RankingKind::Simple,
	};
	let query = ClassifiedQuery::new(text, intent_kind, IntentSubtype::parse(&parsed.intent_subtype))
		.with_ranking_kind(ranking_kind)
		.with_entity_types(parsed.entity_types.iter().map(|entity| entity.trim().to_lowercase()))
		.with_keywords(parsed.keywords)
		.with_sub_queries(parsed.sub_queries);

	query.validate().map_err(|err| Error::InvalidResponse {
		message: format!("Classifier returned an unusable sub-query plan. {err}"),
	})?;

	Ok(query)
}

fn parse_intent_kind(raw: &str) -> Option<IntentKind> {
	match raw.trim().to_lowercase().as_str() {
		"tabular" => Some(IntentKind::Tabular),
		"semantic" => Some(IntentKind::Semantic),
		"hybrid" => Some(IntentKind::Hybrid),
		"direct" => Some(IntentKind::Direct),
		_ => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn response(content: &str) -> Value {
		serde_json::json!({ "choices": [{ "message": { "content": content } }] })
	}

	#[test]
	fn parses_compound_classification() {
		let json = response(
			"```json\n{\"intentKind\":\"Hybrid\",\"intentSubtype\":\"compound\",\
			\"entityTypes\":[\"Patent\"],\"keywords\":[\"battery\"],\
			\"subQueries\":[{\"index\":0,\"text\":\"a\",\"subtype\":\"list\"},\
			{\"index\":1,\"text\":\"b\",\"subtype\":\"concept\",\"dependsOn\":0}]}\n```",
		);
		let query = parse_classification("question", &json).expect("parse failed");

		assert_eq!(query.intent_kind, IntentKind::Hybrid);
		assert_eq!(query.intent_subtype, IntentSubtype::Compound);
		assert!(query.is_compound);
		assert!(query.entity_types.contains("patent"));
		assert_eq!(query.sub_queries[1].depends_on, Some(0));
	}

	#[test]
	fn unknown_subtype_is_kept_and_ranking_defaults_to_simple() {
		let json =
			response("{\"intentKind\":\"tabular\",\"intentSubtype\":\"forecast\",\"keywords\":[]}");
		let query = parse_classification("q", &json).expect("parse failed");

		assert_eq!(query.intent_subtype, IntentSubtype::Other("forecast".to_string()));
		assert_eq!(query.ranking_kind, RankingKind::Simple);
	}

	#[test]
	fn malformed_content_is_rejected() {
		assert!(parse_classification("q", &response("not json")).is_err());
		assert!(matches!(
			parse_classification("q", &response("{\"intentKind\":\"x\",\"intentSubtype\":\"list\"}")),
			Err(Error::InvalidResponse { .. })
		));
	}

	#[test]
	fn cyclic_sub_queries_are_rejected() {
		let json = response(
			"{\"intentKind\":\"hybrid\",\"intentSubtype\":\"compound\",\
			\"subQueries\":[{\"index\":0,\"text\":\"a\",\"subtype\":\"list\",\"dependsOn\":1},\
			{\"index\":1,\"text\":\"b\",\"subtype\":\"list\",\"dependsOn\":0}]}",
		);

		assert!(matches!(
			parse_classification("q", &json),
			Err(Error::InvalidResponse { message }) if message.contains("cycle")
		));
	}
}
