//! Table-driven mapping from a classified intent to a [`SearchPlan`].

use std::collections::{BTreeMap, BTreeSet};

use crate::{
	plan::{
		BackendKind::{self, Graph, Keyword, Relational, Vector},
		GraphStrategy, KeywordMode, ResultLimits, SearchPlan,
	},
	query::{IntentKind, IntentSubtype, RankingKind},
};

pub const SCORECARD_ENTITY: &str = "scorecard";
pub const EQUIPMENT_ENTITY: &str = "equipment";
pub const PATENT_ENTITY: &str = "patent";
pub const PROPOSAL_ENTITY: &str = "proposal";

const UNSCOPED_RELATIONAL_LIMIT: usize = 20;
const UNSCOPED_RETRIEVAL_LIMIT: usize = 10;

/// Pure plan resolver. Holds only the per-subtype merge priority overrides.
#[derive(Debug, Clone, Default)]
pub struct StrategyResolver {
	priority_overrides: BTreeMap<String, BTreeMap<BackendKind, i32>>,
}
impl StrategyResolver {
	pub fn new(cfg: &weave_config::Fusion) -> Self {
		let priority_overrides = cfg
			.priority_overrides
			.iter()
			.map(|(subtype, priorities)| {
				let parsed = priorities
					.iter()
					.filter_map(|(name, value)| BackendKind::parse(name).map(|kind| (kind, *value)))
					.collect();

				(override_key(&IntentSubtype::parse(subtype)).to_string(), parsed)
			})
			.collect();

		Self { priority_overrides }
	}

	pub fn resolve(
		&self,
		subtype: &IntentSubtype,
		ranking_kind: RankingKind,
		entity_types: &BTreeSet<String>,
		intent_kind: IntentKind,
	) -> SearchPlan {
		let mut plan = base_plan(subtype, ranking_kind);

		adjust_for_entity_types(&mut plan, subtype, entity_types);
		adjust_for_intent_kind(&mut plan, intent_kind);

		if entity_types.is_empty() {
			plan.limits = plan.limits.capped(UNSCOPED_RELATIONAL_LIMIT, UNSCOPED_RETRIEVAL_LIMIT);
		}
		if let Some(overrides) = self.priority_overrides.get(override_key(subtype)) {
			for (backend, value) in overrides {
				plan.merge_priority.insert(*backend, *value);
			}
		}

		sync_sources(&mut plan);

		plan
	}
}

fn override_key(subtype: &IntentSubtype) -> &str {
	match subtype {
		IntentSubtype::Other(_) => "default",
		known => known.as_str(),
	}
}

struct BasePlan {
	primary: &'static [BackendKind],
	fallback: &'static [BackendKind],
	graph: GraphStrategy,
	keyword: KeywordMode,
	priority: &'static [(BackendKind, i32)],
	limits: ResultLimits,
	loader: Option<&'static str>,
}

const fn limits(relational: usize, vector: usize, graph: usize, keyword: usize) -> ResultLimits {
	ResultLimits { relational, vector, graph, keyword }
}

fn base_table(subtype: &IntentSubtype, ranking_kind: RankingKind) -> BasePlan {
	match (subtype, ranking_kind) {
		(IntentSubtype::List, _) => BasePlan {
			primary: &[Relational],
			fallback: &[Vector],
			graph: GraphStrategy::None,
			keyword: KeywordMode::Off,
			priority: &[(Relational, 0), (Vector, 1), (Keyword, 2), (Graph, 3)],
			limits: limits(100, 15, 15, 15),
			loader: None,
		},
		(IntentSubtype::Aggregation, _) => BasePlan {
			primary: &[Relational],
			fallback: &[],
			graph: GraphStrategy::None,
			keyword: KeywordMode::Off,
			priority: &[(Relational, 0)],
			limits: limits(1000, 10, 10, 10),
			loader: None,
		},
		(IntentSubtype::TrendAnalysis, _) => BasePlan {
			primary: &[Relational],
			fallback: &[Keyword],
			graph: GraphStrategy::None,
			keyword: KeywordMode::Off,
			priority: &[(Relational, 0), (Keyword, 1)],
			limits: limits(500, 10, 10, 30),
			loader: Some("yearly_counts"),
		},
		(IntentSubtype::Ranking, RankingKind::Simple) => BasePlan {
			primary: &[Keyword, Vector],
			fallback: &[Relational],
			graph: GraphStrategy::GraphEnhanced,
			keyword: KeywordMode::Boost,
			priority: &[(Keyword, 0), (Vector, 1), (Relational, 2), (Graph, 3)],
			limits: limits(10, 15, 15, 20),
			loader: None,
		},
		(IntentSubtype::Ranking, RankingKind::Complex) => BasePlan {
			primary: &[Relational, Keyword],
			fallback: &[Vector],
			graph: GraphStrategy::None,
			keyword: KeywordMode::Aggregation,
			priority: &[(Relational, 0), (Keyword, 1), (Vector, 2)],
			limits: limits(50, 15, 15, 20),
			loader: Some("applicant_ranking"),
		},
		(IntentSubtype::ImpactRanking, _) => BasePlan {
			primary: &[Relational, Graph],
			fallback: &[],
			graph: GraphStrategy::GraphOnly,
			keyword: KeywordMode::Off,
			priority: &[(Relational, 0), (Graph, 1)],
			limits: limits(50, 20, 20, 20),
			loader: None,
		},
		(IntentSubtype::Concept, _) => BasePlan {
			primary: &[Vector],
			fallback: &[Keyword, Graph],
			graph: GraphStrategy::VectorOnly,
			keyword: KeywordMode::Off,
			priority: &[(Vector, 0), (Graph, 1), (Keyword, 2), (Relational, 3)],
			limits: limits(10, 15, 15, 10),
			loader: None,
		},
		(IntentSubtype::Recommendation, _) => BasePlan {
			primary: &[Relational, Vector, Graph],
			fallback: &[Keyword],
			graph: GraphStrategy::GraphEnhanced,
			keyword: KeywordMode::Off,
			priority: &[(Relational, 0), (Vector, 1), (Graph, 2), (Keyword, 3)],
			limits: limits(50, 20, 20, 15),
			loader: None,
		},
		(IntentSubtype::Comparison, _) => BasePlan {
			primary: &[Relational, Vector],
			fallback: &[],
			graph: GraphStrategy::Hybrid,
			keyword: KeywordMode::Off,
			priority: &[(Relational, 0), (Vector, 1), (Keyword, 2), (Graph, 3)],
			limits: limits(100, 15, 15, 10),
			loader: None,
		},
		(IntentSubtype::Compound, _) => BasePlan {
			primary: &[Relational, Vector],
			fallback: &[Keyword],
			graph: GraphStrategy::Hybrid,
			keyword: KeywordMode::Off,
			priority: &[(Relational, 0), (Vector, 1), (Keyword, 2), (Graph, 3)],
			limits: limits(100, 15, 15, 15),
			loader: None,
		},
		(IntentSubtype::Other(_), _) => BasePlan {
			primary: &[Relational, Vector],
			fallback: &[Keyword],
			graph: GraphStrategy::None,
			keyword: KeywordMode::Off,
			priority: &[(Relational, 0), (Vector, 1), (Keyword, 2), (Graph, 3)],
			limits: limits(100, 15, 15, 15),
			loader: None,
		},
	}
}

fn base_plan(subtype: &IntentSubtype, ranking_kind: RankingKind) -> SearchPlan {
	let base = base_table(subtype, ranking_kind);

	SearchPlan {
		primary_sources: base.primary.to_vec(),
		fallback_sources: base.fallback.to_vec(),
		graph_strategy: base.graph,
		keyword_mode: base.keyword,
		merge_priority: base.priority.iter().copied().collect(),
		limits: base.limits,
		use_deterministic_loader: base.loader.is_some(),
		loader_id: base.loader.map(str::to_string),
	}
}

fn adjust_for_entity_types(
	plan: &mut SearchPlan,
	subtype: &IntentSubtype,
	entity_types: &BTreeSet<String>,
) {
	if entity_types.contains(SCORECARD_ENTITY) {
		plan.graph_strategy = GraphStrategy::None;
		plan.keyword_mode = KeywordMode::Off;
		plan.use_deterministic_loader = true;
		plan.loader_id = Some("scorecard_lookup".to_string());
		plan.fallback_sources.retain(|backend| *backend != Graph);
	}
	if entity_types.contains(EQUIPMENT_ENTITY)
		&& matches!(subtype, IntentSubtype::List | IntentSubtype::Recommendation)
	{
		plan.keyword_mode = KeywordMode::Boost;
		plan.graph_strategy = GraphStrategy::Hybrid;
		plan.primary_sources = vec![Keyword, Vector];
		plan.fallback_sources = vec![Relational];
	}
	if entity_types.contains(PATENT_ENTITY)
		&& matches!(subtype, IntentSubtype::List | IntentSubtype::Ranking)
		&& plan.keyword_mode == KeywordMode::Off
	{
		plan.keyword_mode = KeywordMode::Boost;
	}
	if entity_types.contains(PROPOSAL_ENTITY) && *subtype == IntentSubtype::Recommendation {
		plan.graph_strategy = GraphStrategy::GraphEnhanced;
	}
}

fn adjust_for_intent_kind(plan: &mut SearchPlan, intent_kind: IntentKind) {
	match intent_kind {
		IntentKind::Direct => {
			plan.primary_sources.clear();
			plan.fallback_sources.clear();
			plan.graph_strategy = GraphStrategy::None;
			plan.keyword_mode = KeywordMode::Off;
			plan.use_deterministic_loader = false;
			plan.loader_id = None;
		},
		IntentKind::Tabular => {
			plan.graph_strategy = GraphStrategy::None;

			if plan.keyword_mode == KeywordMode::Boost {
				plan.keyword_mode = KeywordMode::Off;
			}

			let keep_keyword = plan.keyword_mode == KeywordMode::Aggregation;

			plan.primary_sources.retain(|backend| *backend == Keyword && keep_keyword);
			plan.primary_sources.insert(0, Relational);
			plan.fallback_sources.retain(|backend| *backend != Graph);
		},
		IntentKind::Semantic => {
			plan.primary_sources.retain(|backend| *backend != Relational);
			plan.fallback_sources.retain(|backend| *backend != Relational);

			if plan.keyword_mode == KeywordMode::Aggregation {
				plan.keyword_mode = KeywordMode::Boost;
			}
			if plan.graph_strategy == GraphStrategy::None {
				plan.graph_strategy = GraphStrategy::VectorOnly;
			}
			if plan.primary_sources.is_empty() {
				plan.primary_sources.push(Vector);
			}
		},
		IntentKind::Hybrid => {
			plan.primary_sources.retain(|backend| *backend != Relational);
			plan.primary_sources.insert(0, Relational);

			if !plan.graph_strategy.uses_graph()
				&& !plan.graph_strategy.uses_vector()
				&& plan.keyword_mode == KeywordMode::Off
				&& !plan.primary_sources.contains(&Vector)
			{
				plan.primary_sources.push(Vector);
			}
		},
	}
}

/// Makes `primary_sources` agree with the graph strategy and keyword mode, keeping order.
fn sync_sources(plan: &mut SearchPlan) {
	if plan.is_direct() {
		return;
	}

	let strategy = plan.graph_strategy;

	if strategy.uses_vector() {
		push_unique(&mut plan.primary_sources, Vector);
	}
	if strategy.uses_graph() {
		push_unique(&mut plan.primary_sources, Graph);
	} else {
		plan.primary_sources.retain(|backend| *backend != Graph);
	}
	if plan.keyword_mode == KeywordMode::Off {
		plan.primary_sources.retain(|backend| *backend != Keyword);
	} else {
		push_unique(&mut plan.primary_sources, Keyword);
	}

	let mut seen = BTreeSet::new();

	plan.primary_sources.retain(|backend| seen.insert(*backend));

	let primary = plan.primary_sources.clone();

	plan.fallback_sources.retain(|backend| !primary.contains(backend));
	plan.fallback_sources.dedup();
}

fn push_unique(sources: &mut Vec<BackendKind>, backend: BackendKind) {
	if !sources.contains(&backend) {
		sources.push(backend);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entities(values: &[&str]) -> BTreeSet<String> {
		values.iter().map(|value| value.to_string()).collect()
	}

	#[test]
	fn tabular_kind_never_keeps_graph() {
		let resolver = StrategyResolver::default();
		let plan = resolver.resolve(
			&IntentSubtype::Recommendation,
			RankingKind::Simple,
			&entities(&["proposal"]),
			IntentKind::Tabular,
		);

		assert_eq!(plan.graph_strategy, GraphStrategy::None);
		assert_eq!(plan.primary_sources, vec![Relational]);
	}

	#[test]
	fn semantic_kind_never_keeps_relational() {
		let resolver = StrategyResolver::default();
		let plan = resolver.resolve(
			&IntentSubtype::Aggregation,
			RankingKind::Simple,
			&entities(&["patent"]),
			IntentKind::Semantic,
		);

		assert!(!plan.uses(Relational));
		assert_eq!(plan.primary_sources, vec![Vector]);
		assert_eq!(plan.graph_strategy, GraphStrategy::VectorOnly);
	}

	#[test]
	fn overrides_replace_base_priorities() {
		let mut cfg = weave_config::Fusion::default();

		cfg.priority_overrides
			.insert("trend_analysis".to_string(), BTreeMap::from([("keyword".to_string(), -1)]));

		let plan = StrategyResolver::new(&cfg).resolve(
			&IntentSubtype::TrendAnalysis,
			RankingKind::Simple,
			&entities(&["patent"]),
			IntentKind::Tabular,
		);

		assert_eq!(plan.priority(Keyword), -1);
		assert_eq!(plan.priority(Relational), 0);
	}
}
