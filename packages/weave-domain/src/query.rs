use std::{
	collections::{BTreeMap, BTreeSet},
	fmt,
};

use serde::{Deserialize, Serialize};

use crate::{Error, Result, keywords};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IntentKind {
	Tabular,
	Semantic,
	Hybrid,
	Direct,
}
impl IntentKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Tabular => "tabular",
			Self::Semantic => "semantic",
			Self::Hybrid => "hybrid",
			Self::Direct => "direct",
		}
	}
}

/// Classified purpose of a question. Unrecognized labels are kept verbatim in `Other` so the
/// resolver can route them to the default plan.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum IntentSubtype {
	List,
	Aggregation,
	Ranking,
	TrendAnalysis,
	Concept,
	Recommendation,
	Comparison,
	Compound,
	ImpactRanking,
	Other(String),
}
impl IntentSubtype {
	pub fn parse(raw: &str) -> Self {
		let normalized: String = raw
			.trim()
			.chars()
			.filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
			.flat_map(char::to_lowercase)
			.collect();

		match normalized.as_str() {
			"list" => Self::List,
			"aggregation" => Self::Aggregation,
			"ranking" => Self::Ranking,
			"trendanalysis" | "trend" => Self::TrendAnalysis,
			"concept" => Self::Concept,
			"recommendation" => Self::Recommendation,
			"comparison" => Self::Comparison,
			"compound" => Self::Compound,
			"impactranking" => Self::ImpactRanking,
			_ => Self::Other(raw.trim().to_string()),
		}
	}

	pub fn as_str(&self) -> &str {
		match self {
			Self::List => "list",
			Self::Aggregation => "aggregation",
			Self::Ranking => "ranking",
			Self::TrendAnalysis => "trendAnalysis",
			Self::Concept => "concept",
			Self::Recommendation => "recommendation",
			Self::Comparison => "comparison",
			Self::Compound => "compound",
			Self::ImpactRanking => "impactRanking",
			Self::Other(raw) => raw.as_str(),
		}
	}
}
impl From<String> for IntentSubtype {
	fn from(raw: String) -> Self {
		Self::parse(&raw)
	}
}
impl From<IntentSubtype> for String {
	fn from(subtype: IntentSubtype) -> Self {
		subtype.as_str().to_string()
	}
}
impl fmt::Display for IntentSubtype {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RankingKind {
	#[default]
	Simple,
	Complex,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifiedQuery {
	pub raw_text: String,
	pub intent_kind: IntentKind,
	pub intent_subtype: IntentSubtype,
	#[serde(default)]
	pub ranking_kind: RankingKind,
	#[serde(default)]
	pub entity_types: BTreeSet<String>,
	#[serde(default)]
	pub keywords: Vec<String>,
	#[serde(default)]
	pub is_compound: bool,
	#[serde(default)]
	pub sub_queries: Vec<SubQuery>,
}
impl ClassifiedQuery {
	pub fn new(
		raw_text: impl Into<String>,
		intent_kind: IntentKind,
		subtype: IntentSubtype,
	) -> Self {
		Self {
			raw_text: raw_text.into(),
			intent_kind,
			intent_subtype: subtype,
			ranking_kind: RankingKind::Simple,
			entity_types: BTreeSet::new(),
			keywords: Vec::new(),
			is_compound: false,
			sub_queries: Vec::new(),
		}
	}

	/// Plan used when the classifier is unreachable: hybrid intent, keywords taken from the text.
	pub fn fallback(raw_text: &str) -> Self {
		let mut query =
			Self::new(raw_text, IntentKind::Hybrid, IntentSubtype::Other("default".to_string()));

		query.keywords = keywords::extract_keywords(raw_text, keywords::DEFAULT_MAX_KEYWORDS);

		query
	}

	pub fn with_entity_types<I, S>(mut self, entity_types: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.entity_types = entity_types.into_iter().map(Into::into).collect();

		self
	}

	pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.keywords = keywords.into_iter().map(Into::into).collect();

		self
	}

	pub fn with_ranking_kind(mut self, ranking_kind: RankingKind) -> Self {
		self.ranking_kind = ranking_kind;

		self
	}

	pub fn with_sub_queries(mut self, sub_queries: Vec<SubQuery>) -> Self {
		self.is_compound = !sub_queries.is_empty();
		self.sub_queries = sub_queries;

		self
	}

	/// Checks the compound flag against the sub-query list and builds the dependency graph.
	pub fn validate(&self) -> Result<Option<SubQueryGraph>> {
		if self.is_compound && self.sub_queries.is_empty() {
			return Err(Error::Configuration {
				message: "Compound query must carry at least one sub-query.".to_string(),
			});
		}
		if !self.is_compound && !self.sub_queries.is_empty() {
			return Err(Error::Configuration {
				message: "Non-compound query must not carry sub-queries.".to_string(),
			});
		}
		if !self.is_compound {
			return Ok(None);
		}

		SubQueryGraph::new(&self.sub_queries).map(Some)
	}

	/// Derives the standalone query a sub-query is executed as.
	pub fn for_sub_query(&self, sub_query: &SubQuery, inherited_keywords: &[String]) -> Self {
		let mut keywords = sub_query.keywords.clone();

		for keyword in self.keywords.iter().chain(inherited_keywords) {
			if !keywords.iter().any(|existing| existing.eq_ignore_ascii_case(keyword)) {
				keywords.push(keyword.clone());
			}
		}

		Self {
			raw_text: sub_query.text.clone(),
			intent_kind: sub_query.intent_kind(),
			intent_subtype: sub_query.subtype.clone(),
			ranking_kind: self.ranking_kind,
			entity_types: sub_query.entity_types.clone(),
			keywords,
			is_compound: false,
			sub_queries: Vec::new(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubQuery {
	pub index: usize,
	pub text: String,
	pub subtype: IntentSubtype,
	#[serde(default)]
	pub entity_types: BTreeSet<String>,
	#[serde(default)]
	pub keywords: Vec<String>,
	#[serde(default)]
	pub depends_on: Option<usize>,
}
impl SubQuery {
	pub fn new(index: usize, text: impl Into<String>, subtype: IntentSubtype) -> Self {
		Self {
			index,
			text: text.into(),
			subtype,
			entity_types: BTreeSet::new(),
			keywords: Vec::new(),
			depends_on: None,
		}
	}

	pub fn depending_on(mut self, index: usize) -> Self {
		self.depends_on = Some(index);

		self
	}

	pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
		self.entity_types.insert(entity_type.into());

		self
	}

	/// Tabular-leaning subtypes run against the relational store, concepts go to retrieval.
	pub fn intent_kind(&self) -> IntentKind {
		match self.subtype {
			IntentSubtype::Concept => IntentKind::Semantic,
			_ => IntentKind::Tabular,
		}
	}

	/// Key under which this sub-query's tabular output is stored.
	pub fn entity_key(&self) -> String {
		self.entity_types
			.iter()
			.next()
			.cloned()
			.unwrap_or_else(|| format!("subquery_{}", self.index))
	}
}

/// Validated dependency structure over a compound query's sub-queries.
///
/// Construction rejects duplicate indices, unknown or self references, cycles, and references to
/// later sub-queries. Every accepted graph is a forest where each edge points backwards.
#[derive(Debug, Clone)]
pub struct SubQueryGraph {
	sub_queries: Vec<SubQuery>,
	dependents: BTreeMap<usize, Vec<usize>>,
}
impl SubQueryGraph {
	pub fn new(sub_queries: &[SubQuery]) -> Result<Self> {
		let mut by_index = BTreeMap::new();

		for sub_query in sub_queries {
			if by_index.insert(sub_query.index, sub_query).is_some() {
				return Err(Error::Configuration {
					message: format!("Duplicate sub-query index {}.", sub_query.index),
				});
			}
		}

		for sub_query in sub_queries {
			let Some(target) = sub_query.depends_on else {
				continue;
			};

			if !by_index.contains_key(&target) {
				return Err(Error::Configuration {
					message: format!(
						"Sub-query {} depends on unknown sub-query {target}.",
						sub_query.index
					),
				});
			}
		}

		for sub_query in sub_queries {
			let mut cursor = sub_query.depends_on;
			let mut steps = 0;

			while let Some(current) = cursor {
				if current == sub_query.index {
					return Err(Error::Configuration {
						message: format!(
							"Sub-query dependency cycle detected at index {}.",
							sub_query.index
						),
					});
				}

				steps += 1;

				if steps > sub_queries.len() {
					break;
				}

				cursor = by_index.get(&current).and_then(|next| next.depends_on);
			}
		}

		for sub_query in sub_queries {
			if let Some(target) = sub_query.depends_on
				&& target >= sub_query.index
			{
				return Err(Error::Configuration {
					message: format!(
						"Sub-query {} may only depend on an earlier sub-query, found {target}.",
						sub_query.index
					),
				});
			}
		}

		let ordered: Vec<SubQuery> = by_index.into_values().cloned().collect();
		let mut dependents: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

		for sub_query in &ordered {
			if let Some(target) = sub_query.depends_on {
				dependents.entry(target).or_default().push(sub_query.index);
			}
		}

		Ok(Self { sub_queries: ordered, dependents })
	}

	pub fn len(&self) -> usize {
		self.sub_queries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.sub_queries.is_empty()
	}

	pub fn get(&self, index: usize) -> Option<&SubQuery> {
		self.sub_queries.iter().find(|sub_query| sub_query.index == index)
	}

	/// Sub-queries with no dependency, in index order.
	pub fn roots(&self) -> impl Iterator<Item = &SubQuery> {
		self.sub_queries.iter().filter(|sub_query| sub_query.depends_on.is_none())
	}

	/// Sub-queries that wait on `index`, in index order.
	pub fn dependents(&self, index: usize) -> impl Iterator<Item = &SubQuery> {
		self.dependents
			.get(&index)
			.into_iter()
			.flatten()
			.filter_map(|dependent| self.get(*dependent))
	}

	pub fn iter(&self) -> impl Iterator<Item = &SubQuery> {
		self.sub_queries.iter()
	}
}
