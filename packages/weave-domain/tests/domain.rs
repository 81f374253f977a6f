use std::collections::{BTreeMap, BTreeSet};

use weave_domain::{
	BackendKind, ClassifiedQuery, Error, ExecutionMode, GraphStrategy, IntentKind, IntentSubtype,
	KeywordMode, MergedContext, RankedList, RankingKind, SearchResult, SourceDescriptor, SubQuery,
	SubQueryGraph, TabularResult, confidence, cross_validation,
	fusion::{self, DEFAULT_RRF_K},
	loader::{LoaderRegistry, MatchContext},
	resolver::StrategyResolver,
};

fn ranked(source: BackendKind, ids: &[&str]) -> RankedList {
	RankedList::new(
		source,
		ids.iter().map(|id| SearchResult::new(*id, id.to_uppercase(), "document", 0.9)).collect(),
	)
}

fn ids(results: &[SearchResult]) -> Vec<&str> {
	results.iter().map(|result| result.node_id.as_str()).collect()
}

fn entities(values: &[&str]) -> BTreeSet<String> {
	values.iter().map(|value| value.to_string()).collect()
}

#[test]
fn fusion_matches_reference_example() {
	let fused = fusion::fuse(
		&[
			ranked(BackendKind::Vector, &["A", "B", "C"]),
			ranked(BackendKind::Graph, &["B", "A", "D"]),
		],
		&BTreeMap::new(),
		DEFAULT_RRF_K,
	);
	let score = |id: &str| {
		fused.iter().find(|result| result.node_id == id).map(|result| result.score).unwrap_or(-1.0)
	};

	assert_eq!(ids(&fused), vec!["A", "B", "D", "C"]);
	assert!((score("A") - (1.0 / 61.0 + 1.0 / 62.0)).abs() < 1e-12);
	assert!((score("B") - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
	assert!((score("C") - 1.0 / 63.0).abs() < 1e-12);
	assert!((score("D") - 1.0 / 62.0).abs() < 1e-12);
}

#[test]
fn fusing_a_single_list_keeps_its_order_and_is_repeatable() {
	let list = ranked(BackendKind::Vector, &["x", "y", "z"]);
	let first = fusion::fuse(std::slice::from_ref(&list), &BTreeMap::new(), DEFAULT_RRF_K);
	let second = fusion::fuse(std::slice::from_ref(&list), &BTreeMap::new(), DEFAULT_RRF_K);

	assert_eq!(ids(&first), vec!["x", "y", "z"]);
	assert_eq!(first, second);

	for (rank, result) in first.iter().enumerate() {
		assert!((result.score - fusion::rrf_term(DEFAULT_RRF_K, rank)).abs() < 1e-12);
	}
}

#[test]
fn fusion_output_is_strictly_descending() {
	let fused = fusion::fuse(
		&[
			ranked(BackendKind::Vector, &["a", "b", "c", "d"]),
			ranked(BackendKind::Keyword, &["d", "c"]),
			ranked(BackendKind::Graph, &["c"]),
		],
		&BTreeMap::new(),
		DEFAULT_RRF_K,
	);

	assert_eq!(fused[0].node_id, "c");
	assert!(fused.windows(2).all(|pair| pair[0].score >= pair[1].score));
}

#[test]
fn cyclic_sub_queries_are_a_configuration_error() {
	let err = SubQueryGraph::new(&[
		SubQuery::new(0, "first", IntentSubtype::List).depending_on(1),
		SubQuery::new(1, "second", IntentSubtype::List).depending_on(0),
	])
	.expect_err("expected cycle rejection");

	assert!(matches!(err, Error::Configuration { .. }));
	assert!(err.to_string().contains("cycle"), "Unexpected error: {err}");
}

#[test]
fn forward_and_dangling_references_are_rejected() {
	let forward = SubQueryGraph::new(&[
		SubQuery::new(0, "first", IntentSubtype::List).depending_on(1),
		SubQuery::new(1, "second", IntentSubtype::List),
	]);
	let dangling =
		SubQueryGraph::new(&[SubQuery::new(0, "first", IntentSubtype::List).depending_on(4)]);

	assert!(matches!(forward, Err(Error::Configuration { .. })));
	assert!(matches!(dangling, Err(Error::Configuration { .. })));
}

#[test]
fn compound_flag_must_agree_with_sub_queries() {
	let mut query = ClassifiedQuery::new("q", IntentKind::Hybrid, IntentSubtype::Compound);

	query.is_compound = true;

	assert!(query.validate().is_err());

	let query = ClassifiedQuery::new("q", IntentKind::Hybrid, IntentSubtype::Compound)
		.with_sub_queries(vec![SubQuery::new(0, "a", IntentSubtype::List)]);

	assert!(query.validate().expect("valid compound query").is_some());
}

#[test]
fn resolver_is_deterministic() {
	let resolver = StrategyResolver::default();
	let entity_types = entities(&["patent", "proposal"]);
	let first = resolver.resolve(
		&IntentSubtype::Recommendation,
		RankingKind::Simple,
		&entity_types,
		IntentKind::Hybrid,
	);

	for _ in 0..10 {
		assert_eq!(
			resolver.resolve(
				&IntentSubtype::Recommendation,
				RankingKind::Simple,
				&entity_types,
				IntentKind::Hybrid,
			),
			first
		);
	}
}

#[test]
fn base_plans_follow_subtype_table() {
	let resolver = StrategyResolver::default();
	let scope = entities(&["patent"]);
	let aggregation = resolver.resolve(
		&IntentSubtype::Aggregation,
		RankingKind::Simple,
		&scope,
		IntentKind::Tabular,
	);
	let concept =
		resolver.resolve(&IntentSubtype::Concept, RankingKind::Simple, &scope, IntentKind::Semantic);
	let recommendation = resolver.resolve(
		&IntentSubtype::Recommendation,
		RankingKind::Simple,
		&entities(&["project"]),
		IntentKind::Hybrid,
	);

	assert_eq!(aggregation.primary_sources, vec![BackendKind::Relational]);
	assert_eq!(concept.primary_sources, vec![BackendKind::Vector]);
	assert_eq!(
		recommendation.primary_sources,
		vec![BackendKind::Relational, BackendKind::Vector, BackendKind::Graph]
	);
	assert_eq!(recommendation.graph_strategy, GraphStrategy::GraphEnhanced);
}

#[test]
fn unknown_subtype_gets_balanced_plan_without_graph() {
	let plan = StrategyResolver::default().resolve(
		&IntentSubtype::Other("forecast".to_string()),
		RankingKind::Simple,
		&entities(&["project"]),
		IntentKind::Hybrid,
	);

	assert_eq!(plan.primary_sources, vec![BackendKind::Relational, BackendKind::Vector]);
	assert!(!plan.uses(BackendKind::Graph));
}

#[test]
fn scorecard_entity_forces_loader_and_skips_graph() {
	let plan = StrategyResolver::default().resolve(
		&IntentSubtype::Recommendation,
		RankingKind::Simple,
		&entities(&["scorecard"]),
		IntentKind::Hybrid,
	);

	assert!(plan.use_deterministic_loader);
	assert_eq!(plan.loader_id.as_deref(), Some("scorecard_lookup"));
	assert_eq!(plan.graph_strategy, GraphStrategy::None);
	assert!(!plan.uses(BackendKind::Graph));
	assert!(!plan.fallback_sources.contains(&BackendKind::Graph));
}

#[test]
fn empty_entity_scope_yields_low_limits() {
	let plan = StrategyResolver::default().resolve(
		&IntentSubtype::List,
		RankingKind::Simple,
		&BTreeSet::new(),
		IntentKind::Tabular,
	);

	assert!(!plan.primary_sources.is_empty());
	assert!(plan.limits.relational <= 20);
	assert!(plan.limits.vector <= 10);
}

#[test]
fn ranking_kind_selects_execution_mode() {
	let resolver = StrategyResolver::default();
	let scope = entities(&["patent"]);
	let complex = ClassifiedQuery::new("q", IntentKind::Tabular, IntentSubtype::Ranking)
		.with_ranking_kind(RankingKind::Complex);
	let simple = ClassifiedQuery::new("q", IntentKind::Semantic, IntentSubtype::Ranking);
	let complex_plan =
		resolver.resolve(&complex.intent_subtype, complex.ranking_kind, &scope, complex.intent_kind);
	let simple_plan =
		resolver.resolve(&simple.intent_subtype, simple.ranking_kind, &scope, simple.intent_kind);

	assert_eq!(complex_plan.keyword_mode, KeywordMode::Aggregation);
	assert_eq!(complex_plan.execution_mode(&complex), ExecutionMode::RankingParallel);
	assert_eq!(simple_plan.execution_mode(&simple), ExecutionMode::Single);
}

#[test]
fn direct_intent_has_no_sources() {
	let query =
		ClassifiedQuery::new("hello", IntentKind::Direct, IntentSubtype::Other("chat".into()));
	let plan = StrategyResolver::default().resolve(
		&query.intent_subtype,
		query.ranking_kind,
		&query.entity_types,
		query.intent_kind,
	);

	assert!(plan.primary_sources.is_empty());
	assert_eq!(plan.execution_mode(&query), ExecutionMode::Direct);
}

#[test]
fn empty_context_has_zero_confidence() {
	let mut ctx = MergedContext::empty(ExecutionMode::Parallel);

	ctx.sources_used = vec![
		SourceDescriptor::failed(
			BackendKind::Relational,
			"relational",
			weave_domain::ErrorDescriptor {
				kind: weave_domain::BackendErrorKind::Timeout,
				message: "timed out".to_string(),
			},
		),
		SourceDescriptor::failed(
			BackendKind::Vector,
			"vector",
			weave_domain::ErrorDescriptor {
				kind: weave_domain::BackendErrorKind::Unavailable,
				message: "down".to_string(),
			},
		),
	];

	assert_eq!(confidence::score(&ctx, &weave_config::Confidence::default()), 0.0);
}

#[test]
fn tabular_only_context_counts_rows_as_top_score() {
	let mut ctx = MergedContext::empty(ExecutionMode::Single);

	ctx.tabular.insert(
		"patent".to_string(),
		TabularResult::new(vec!["id".to_string()], vec![vec![serde_json::json!("P1")]], 2.0),
	);
	ctx.sources_used = vec![SourceDescriptor::succeeded(BackendKind::Relational, "relational", 1)];

	let parts = confidence::breakdown(&ctx, &weave_config::Confidence::default());

	assert_eq!(parts.top_result_score, 1.0);
	assert_eq!(parts.cross_validated_ratio, 0.0);
}

#[test]
fn cross_validation_is_a_no_op_when_graph_is_unreachable() {
	let input = fusion::fuse(
		&[ranked(BackendKind::Vector, &["a", "b", "c"])],
		&BTreeMap::new(),
		DEFAULT_RRF_K,
	);
	let output = cross_validation::validate(
		&input,
		&weave_config::CrossValidation::default(),
		|_, _| Err::<bool, _>("connection refused"),
	);

	assert_eq!(output, input);
}

#[test]
fn matchers_decline_malformed_input() {
	let registry = LoaderRegistry::builtin();
	let plan = StrategyResolver::default().resolve(
		&IntentSubtype::Ranking,
		RankingKind::Complex,
		&entities(&["patent"]),
		IntentKind::Tabular,
	);
	let long = "top ".repeat(5_000);

	for text in ["", "   ", "\u{0}\u{FFFF}??", "top organizations", long.as_str(), "category"] {
		for subtype in [IntentSubtype::Ranking, IntentSubtype::List, IntentSubtype::TrendAnalysis] {
			let ctx = MatchContext { text, subtype: &subtype, entity_type: "patent", keywords: &[] };

			assert!(registry.find(&plan, &ctx).is_none(), "Unexpected match for {text:?}");
		}
	}
}

#[test]
fn matcher_chain_respects_registration_order() {
	assert_eq!(
		LoaderRegistry::builtin().ids(),
		vec!["scorecard_lookup", "applicant_ranking", "category_listing", "yearly_counts"]
	);
}
