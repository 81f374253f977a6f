//! Rule-based relational query builders tried before the LLM query generator.
//!
//! Matchers are pure: they read the question text and classifier hints, and either build a
//! parameterized query or decline with `None`. Malformed or unexpected input always declines.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{plan::SearchPlan, query::IntentSubtype, resolver::SCORECARD_ENTITY};

const DEFAULT_TOP_N: i64 = 10;
const MAX_TOP_N: i64 = 100;
const MAX_INPUT_CHARS: usize = 2_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "camelCase")]
pub enum QueryParam {
	Text(String),
	Int(i64),
}

/// A relational query ready for execution. `loader` names the matcher that built it, or
/// `generated` for LLM output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationalQuery {
	pub loader: String,
	pub sql: String,
	pub params: Vec<QueryParam>,
}
impl RelationalQuery {
	pub fn generated(sql: impl Into<String>) -> Self {
		Self { loader: "generated".to_string(), sql: sql.into(), params: Vec::new() }
	}

	pub fn is_deterministic(&self) -> bool {
		self.loader != "generated"
	}
}

pub struct MatchContext<'a> {
	pub text: &'a str,
	pub subtype: &'a IntentSubtype,
	pub entity_type: &'a str,
	pub keywords: &'a [String],
}

pub trait QueryMatcher
where
	Self: Send + Sync,
{
	fn id(&self) -> &'static str;

	fn applies_to(&self, subtype: &IntentSubtype, entity_type: &str) -> bool;

	fn try_match(&self, ctx: &MatchContext<'_>) -> Option<RelationalQuery>;
}

/// Ordered chain of matchers.
pub struct LoaderRegistry {
	matchers: Vec<Box<dyn QueryMatcher>>,
}
impl LoaderRegistry {
	pub fn new(matchers: Vec<Box<dyn QueryMatcher>>) -> Self {
		Self { matchers }
	}

	pub fn builtin() -> Self {
		Self::new(vec![
			Box::new(ScorecardLookup),
			Box::new(ApplicantRanking),
			Box::new(CategoryListing),
			Box::new(YearlyCounts),
		])
	}

	pub fn ids(&self) -> Vec<&'static str> {
		self.matchers.iter().map(|matcher| matcher.id()).collect()
	}

	/// Tries the plan's pinned loader first, then every matcher keyed to this subtype and entity.
	pub fn find(&self, plan: &SearchPlan, ctx: &MatchContext<'_>) -> Option<RelationalQuery> {
		if ctx.text.trim().is_empty() || ctx.text.chars().count() > MAX_INPUT_CHARS {
			return None;
		}

		let pinned = plan.loader_id.as_deref().filter(|_| plan.use_deterministic_loader);

		if let Some(pinned) = pinned
			&& let Some(matcher) = self.matchers.iter().find(|matcher| matcher.id() == pinned)
			&& let Some(query) = matcher.try_match(ctx)
		{
			return Some(query);
		}

		self.matchers
			.iter()
			.filter(|matcher| Some(matcher.id()) != pinned)
			.filter(|matcher| matcher.applies_to(ctx.subtype, ctx.entity_type))
			.find_map(|matcher| matcher.try_match(ctx))
	}
}
impl Default for LoaderRegistry {
	fn default() -> Self {
		Self::builtin()
	}
}

/// "Top N organizations in <technology> [based in <region>]".
pub struct ApplicantRanking;
impl QueryMatcher for ApplicantRanking {
	fn id(&self) -> &'static str {
		"applicant_ranking"
	}

	fn applies_to(&self, subtype: &IntentSubtype, _entity_type: &str) -> bool {
		*subtype == IntentSubtype::Ranking
	}

	fn try_match(&self, ctx: &MatchContext<'_>) -> Option<RelationalQuery> {
		if !is_match(r"(?i)\b(top|most|leading|rank(ed|ing)?|largest)\b", ctx.text) {
			return None;
		}
		if !is_match(
			r"(?i)\b(organi[sz]ations?|applicants?|compan(y|ies)|institutions?|holders?)\b",
			ctx.text,
		) {
			return None;
		}

		let technology = capture(
			r"(?i)\b(?:in|for|on|about)\s+([a-z0-9][a-z0-9 \-]{1,60}?)\s*(?:technolog(?:y|ies)|fields?|domains?|patents?|\?|,|$)",
			ctx.text,
		)
		.filter(|value| !is_region_phrase(value))
		.or_else(|| ctx.keywords.first().cloned())?;
		let top_n = capture(r"(?i)\btop\s+(\d{1,4})\b", ctx.text)
			.and_then(|value| value.parse::<i64>().ok())
			.unwrap_or(DEFAULT_TOP_N)
			.clamp(1, MAX_TOP_N);
		let region = region_of(ctx.text).unwrap_or_default();

		Some(RelationalQuery {
			loader: self.id().to_string(),
			sql: "\
SELECT d.organization AS organization, COUNT(*) AS document_count
FROM documents d
WHERE (d.title ILIKE '%' || $1 || '%' OR d.abstract ILIKE '%' || $1 || '%')
	AND ($2 = '' OR d.region ILIKE $2)
	AND d.organization IS NOT NULL
GROUP BY d.organization
ORDER BY document_count DESC, organization ASC
LIMIT $3"
				.to_string(),
			params: vec![
				QueryParam::Text(technology.trim().to_string()),
				QueryParam::Text(region),
				QueryParam::Int(top_n),
			],
		})
	}
}

/// "Documents of category X held by Y [in Z]".
pub struct CategoryListing;
impl QueryMatcher for CategoryListing {
	fn id(&self) -> &'static str {
		"category_listing"
	}

	fn applies_to(&self, subtype: &IntentSubtype, _entity_type: &str) -> bool {
		*subtype == IntentSubtype::List
	}

	fn try_match(&self, ctx: &MatchContext<'_>) -> Option<RelationalQuery> {
		let category =
			capture(r#"(?i)\bcategory\s+["']?([a-z0-9][a-z0-9.\-/]{0,31})["']?"#, ctx.text)?;
		let organization = capture(
			r"(?i)\b(?:held|owned|filed|registered)\s+by\s+(.+?)(?:\s+(?:in|located in|based in)\s+|\?|\.|$)",
			ctx.text,
		)
		.unwrap_or_default();
		let region = region_of(ctx.text).unwrap_or_default();

		if organization.trim().is_empty() && region.is_empty() {
			return None;
		}

		Some(RelationalQuery {
			loader: self.id().to_string(),
			sql: "\
SELECT d.id AS id, d.title AS title, d.organization AS organization, d.region AS region
FROM documents d
WHERE d.category_code ILIKE $1 || '%'
	AND ($2 = '' OR d.organization ILIKE '%' || $2 || '%')
	AND ($3 = '' OR d.region ILIKE $3)
ORDER BY d.filed_on DESC NULLS LAST, d.id ASC
LIMIT 100"
				.to_string(),
			params: vec![
				QueryParam::Text(category.to_uppercase()),
				QueryParam::Text(organization.trim().to_string()),
				QueryParam::Text(region),
			],
		})
	}
}

/// Per-year document counts for a topic, optionally "since YYYY".
pub struct YearlyCounts;
impl QueryMatcher for YearlyCounts {
	fn id(&self) -> &'static str {
		"yearly_counts"
	}

	fn applies_to(&self, subtype: &IntentSubtype, _entity_type: &str) -> bool {
		matches!(subtype, IntentSubtype::TrendAnalysis | IntentSubtype::Aggregation)
	}

	fn try_match(&self, ctx: &MatchContext<'_>) -> Option<RelationalQuery> {
		if !is_match(
			r"(?i)\b(per|by|each|every)\s+year\b|\byearly\b|\btrends?\b|\bannual(ly)?\b",
			ctx.text,
		) {
			return None;
		}

		let topic = ctx.keywords.first()?.trim().to_string();

		if topic.is_empty() {
			return None;
		}

		let since = capture(r"(?i)\b(?:since|from|after)\s+(\d{4})\b", ctx.text)
			.and_then(|value| value.parse::<i64>().ok())
			.filter(|year| (1900..=2100).contains(year))
			.unwrap_or(0);

		Some(RelationalQuery {
			loader: self.id().to_string(),
			sql: "\
SELECT EXTRACT(YEAR FROM d.filed_on)::int AS year, COUNT(*) AS document_count
FROM documents d
WHERE (d.title ILIKE '%' || $1 || '%' OR d.abstract ILIKE '%' || $1 || '%')
	AND d.filed_on IS NOT NULL
	AND EXTRACT(YEAR FROM d.filed_on) >= $2
GROUP BY 1
ORDER BY 1 ASC"
				.to_string(),
			params: vec![QueryParam::Text(topic), QueryParam::Int(since)],
		})
	}
}

/// Evaluation criteria for a named programme.
pub struct ScorecardLookup;
impl QueryMatcher for ScorecardLookup {
	fn id(&self) -> &'static str {
		"scorecard_lookup"
	}

	fn applies_to(&self, _subtype: &IntentSubtype, entity_type: &str) -> bool {
		entity_type == SCORECARD_ENTITY
	}

	fn try_match(&self, ctx: &MatchContext<'_>) -> Option<RelationalQuery> {
		let programme = capture(
			r#"(?i)\b(?:programme|program|announcement|call)\s+["']?([^"'?,.]{2,80}?)["']?\s*(?:\?|,|\.|$)"#,
			ctx.text,
		)
		.or_else(|| ctx.keywords.first().cloned())?;
		let programme = programme.trim().to_string();

		if programme.is_empty() {
			return None;
		}

		Some(RelationalQuery {
			loader: self.id().to_string(),
			sql: "\
SELECT s.programme AS programme, s.criterion AS criterion, s.weight AS weight, s.max_score AS max_score
FROM scorecards s
WHERE s.programme ILIKE '%' || $1 || '%'
ORDER BY s.programme ASC, s.weight DESC, s.criterion ASC
LIMIT 100"
				.to_string(),
			params: vec![QueryParam::Text(programme)],
		})
	}
}

fn is_match(pattern: &str, text: &str) -> bool {
	Regex::new(pattern).map(|re| re.is_match(text)).unwrap_or(false)
}

fn capture(pattern: &str, text: &str) -> Option<String> {
	let re = Regex::new(pattern).ok()?;
	let value = re.captures(text)?.get(1)?.as_str().trim();

	if value.is_empty() { None } else { Some(value.to_string()) }
}

fn region_of(text: &str) -> Option<String> {
	capture(r"(?i)\b(?:located in|based in|region)\s+([a-z][a-z \-]{1,40}?)\s*(?:\?|,|\.|$)", text)
}

fn is_region_phrase(value: &str) -> bool {
	is_match(r"(?i)^(located|based|region)\b", value)
}

#[cfg(test)]
mod tests {
	use crate::{
		plan::{BackendKind, GraphStrategy, KeywordMode, ResultLimits},
		query::IntentSubtype,
	};

	use super::*;

	fn plan(loader: Option<&str>) -> SearchPlan {
		SearchPlan {
			primary_sources: vec![BackendKind::Relational],
			fallback_sources: Vec::new(),
			graph_strategy: GraphStrategy::None,
			keyword_mode: KeywordMode::Off,
			merge_priority: Default::default(),
			limits: ResultLimits { relational: 10, vector: 10, graph: 10, keyword: 10 },
			use_deterministic_loader: loader.is_some(),
			loader_id: loader.map(str::to_string),
		}
	}

	fn ctx<'a>(
		text: &'a str,
		subtype: &'a IntentSubtype,
		keywords: &'a [String],
	) -> MatchContext<'a> {
		MatchContext { text, subtype, entity_type: "patent", keywords }
	}

	#[test]
	fn applicant_ranking_reads_top_n_and_region() {
		let subtype = IntentSubtype::Ranking;
		let text = "Top 5 organizations in solid-state battery technology based in Bavaria?";
		let query = LoaderRegistry::builtin()
			.find(&plan(Some("applicant_ranking")), &ctx(text, &subtype, &[]))
			.expect("expected applicant ranking");

		assert_eq!(query.loader, "applicant_ranking");
		assert_eq!(
			query.params,
			vec![
				QueryParam::Text("solid-state battery".to_string()),
				QueryParam::Text("Bavaria".to_string()),
				QueryParam::Int(5),
			]
		);
	}

	#[test]
	fn category_listing_needs_a_scope() {
		let subtype = IntentSubtype::List;
		let registry = LoaderRegistry::builtin();

		let unscoped = ctx("List category H01M documents", &subtype, &[]);

		assert!(registry.find(&plan(None), &unscoped).is_none());

		let text = "List documents of category H01M held by Acme Labs located in Texas";
		let query = registry
			.find(&plan(None), &ctx(text, &subtype, &[]))
			.expect("expected category listing");

		assert_eq!(query.params[0], QueryParam::Text("H01M".to_string()));
		assert_eq!(query.params[1], QueryParam::Text("Acme Labs".to_string()));
		assert_eq!(query.params[2], QueryParam::Text("Texas".to_string()));
	}
}
