//! The orchestration state machine: `Planning -> Executing -> Merging -> Done`.

mod branches;
mod sub_queries;

use std::{
	collections::BTreeMap,
	convert::Infallible,
	sync::Arc,
	time::Instant,
};

use weave_config::Config;
use weave_domain::{
	BackendKind, ClassifiedQuery, ExecutionMode, MergedContext, RankedList, SearchPlan,
	SearchResult, SourceDescriptor, Stage, TabularResult, confidence, cross_validation, fusion,
	loader::LoaderRegistry, resolver::StrategyResolver,
};

use crate::{
	Error, Result,
	adapters::Backends,
	pool::WorkerPool,
	retry::{RetryPolicy, call_with_retry},
};

#[derive(Clone)]
pub struct Orchestrator {
	shared: Arc<Shared>,
}
impl Orchestrator {
	pub fn new(cfg: Arc<Config>, backends: Backends) -> Self {
		Self::with_registry(cfg, backends, LoaderRegistry::builtin())
	}

	pub fn with_registry(cfg: Arc<Config>, backends: Backends, registry: LoaderRegistry) -> Self {
		let shared = Shared {
			resolver: StrategyResolver::new(&cfg.fusion),
			pool: WorkerPool::from_config(&cfg.orchestrator),
			retry: RetryPolicy::from_config(&cfg.orchestrator),
			registry,
			backends,
			cfg,
		};

		Self { shared: Arc::new(shared) }
	}

	pub fn plan(&self, query: &ClassifiedQuery) -> SearchPlan {
		self.shared.plan_for(query)
	}

	/// Runs one classified query to completion.
	///
	/// Backend failures are recorded in `sources_used` and never returned. The only error is a
	/// malformed query: a compound flag that disagrees with its sub-queries, or a sub-query
	/// dependency graph with cycles, forward or dangling references.
	pub async fn orchestrate(&self, query: ClassifiedQuery) -> Result<MergedContext> {
		let mut clock = StageClock::start();
		let sub_query_graph = query.validate()?;
		let plan = self.shared.plan_for(&query);
		let mode = plan.execution_mode(&query);

		tracing::info!(
			intent = query.intent_kind.as_str(),
			subtype = %query.intent_subtype,
			mode = mode.as_str(),
			backends = ?plan.primary_sources,
			"Resolved search plan."
		);

		clock.advance();

		let query = Arc::new(query);
		let collected = match (mode, sub_query_graph) {
			(ExecutionMode::SubQueries, Some(graph)) =>
				sub_queries::run(&self.shared, query, graph).await,
			(ExecutionMode::SubQueries, None) => {
				return Err(Error::Configuration {
					message: "Compound execution requires a sub-query graph.".to_string(),
				});
			},
			(mode, _) => execute_plan(&self.shared, query, Arc::new(plan), mode).await,
		};

		clock.advance();

		let mut ctx = self.shared.merge(collected, mode).await;

		clock.advance();

		ctx.stage_timings_ms = clock.finish();

		Ok(ctx)
	}
}

pub(crate) struct Shared {
	pub(crate) cfg: Arc<Config>,
	pub(crate) backends: Backends,
	pub(crate) resolver: StrategyResolver,
	pub(crate) registry: LoaderRegistry,
	pub(crate) pool: WorkerPool,
	pub(crate) retry: RetryPolicy,
}
impl Shared {
	pub(crate) fn plan_for(&self, query: &ClassifiedQuery) -> SearchPlan {
		self.resolver.resolve(
			&query.intent_subtype,
			query.ranking_kind,
			&query.entity_types,
			query.intent_kind,
		)
	}

	async fn merge(&self, collected: Collected, mode: ExecutionMode) -> MergedContext {
		let cv_cfg = &self.cfg.cross_validation;
		let mut ctx = MergedContext::empty(mode);
		let mut ranked = fusion::fuse(&collected.lists, &collected.priority, self.cfg.fusion.rrf_k);

		if cv_cfg.enabled && collected.corroborate_with_tabular {
			ranked = cross_validation::corroborate_with_tabular(
				&ranked,
				collected.tabular.iter().map(|(_, table)| table),
				cv_cfg.boost,
			);
		}
		if cv_cfg.enabled && collected.cross_validate_with_graph && ranked.len() >= 2 {
			ranked = self.cross_validate_with_graph(ranked).await;
		}

		for (key, table) in collected.tabular {
			insert_tabular(&mut ctx.tabular, key, table);
		}

		ctx.ranked = ranked;
		ctx.sources_used = collected.sources;
		ctx.confidence = confidence::score(&ctx, &self.cfg.confidence);

		if ctx.is_partial_failure() {
			let failed: Vec<&str> = ctx
				.sources_used
				.iter()
				.filter(|source| !source.success)
				.map(|source| source.label.as_str())
				.collect();

			tracing::warn!(?failed, confidence = ctx.confidence, "Partial backend failure.");
		}

		ctx
	}

	async fn cross_validate_with_graph(&self, ranked: Vec<SearchResult>) -> Vec<SearchResult> {
		let cv_cfg = &self.cfg.cross_validation;
		let ids: Vec<String> =
			ranked.iter().take(cv_cfg.top_n).map(|result| result.node_id.clone()).collect();
		let graph = &self.backends.graph;

		match call_with_retry(&self.retry, "graph", || graph.adjacency(&ids)).await {
			Ok(adjacency) => cross_validation::validate(&ranked, cv_cfg, |a, b| {
				Ok::<_, Infallible>(adjacency.is_adjacent(a, b))
			}),
			Err(err) => {
				tracing::warn!(
					error_kind = err.kind().as_str(),
					error = %err,
					"Graph adjacency unavailable. Skipping cross-validation."
				);

				ranked
			},
		}
	}
}

/// Output of the executing stage. Tasks fill their own instance; instances are combined only
/// after every task of the stage has settled.
#[derive(Debug, Default)]
pub(crate) struct Collected {
	pub(crate) tabular: Vec<(String, TabularResult)>,
	pub(crate) lists: Vec<RankedList>,
	pub(crate) sources: Vec<SourceDescriptor>,
	pub(crate) priority: BTreeMap<BackendKind, i32>,
	pub(crate) corroborate_with_tabular: bool,
	pub(crate) cross_validate_with_graph: bool,
}
impl Collected {
	pub(crate) fn for_plan(plan: &SearchPlan, mode: ExecutionMode) -> Self {
		Self {
			priority: plan.merge_priority.clone(),
			corroborate_with_tabular: mode == ExecutionMode::Parallel,
			cross_validate_with_graph: plan.uses(BackendKind::Graph),
			..Self::default()
		}
	}

	pub(crate) fn has_results(&self) -> bool {
		self.tabular.iter().any(|(_, table)| table.has_rows())
			|| self.lists.iter().any(|list| !list.results.is_empty())
	}

	pub(crate) fn absorb(&mut self, other: Self) {
		self.tabular.extend(other.tabular);
		self.lists.extend(other.lists);
		self.sources.extend(other.sources);

		for (backend, priority) in other.priority {
			self.priority
				.entry(backend)
				.and_modify(|current| *current = (*current).min(priority))
				.or_insert(priority);
		}

		self.corroborate_with_tabular |= other.corroborate_with_tabular;
		self.cross_validate_with_graph |= other.cross_validate_with_graph;
	}
}

/// Dispatches a resolved plan to the branch runner for its mode.
pub(crate) async fn execute_plan(
	shared: &Arc<Shared>,
	query: Arc<ClassifiedQuery>,
	plan: Arc<SearchPlan>,
	mode: ExecutionMode,
) -> Collected {
	match mode {
		ExecutionMode::Direct | ExecutionMode::SubQueries => Collected::default(),
		ExecutionMode::RankingParallel => branches::run_ranking(shared, query, plan).await,
		ExecutionMode::Single | ExecutionMode::Parallel =>
			branches::run_with_fallback(shared, query, plan, mode).await,
	}
}

fn insert_tabular(tables: &mut BTreeMap<String, TabularResult>, key: String, table: TabularResult) {
	match tables.get(&key) {
		None => {
			tables.insert(key, table);
		},
		Some(existing) if !existing.success && table.success => {
			tables.insert(key, table);
		},
		Some(_) => {
			let mut suffix = 2;

			while tables.contains_key(&format!("{key}#{suffix}")) {
				suffix += 1;
			}

			tables.insert(format!("{key}#{suffix}"), table);
		},
	}
}

struct StageClock {
	stage: Stage,
	started: Instant,
	stage_started: Instant,
	timings: BTreeMap<String, f64>,
}
impl StageClock {
	fn start() -> Self {
		let now = Instant::now();

		Self { stage: Stage::Planning, started: now, stage_started: now, timings: BTreeMap::new() }
	}

	fn advance(&mut self) {
		let now = Instant::now();
		let elapsed_ms = now.duration_since(self.stage_started).as_secs_f64() * 1_000.0;

		tracing::debug!(stage = self.stage.as_str(), elapsed_ms, "Stage finished.");

		self.timings.insert(self.stage.as_str().to_string(), elapsed_ms);

		self.stage = self.stage.next();
		self.stage_started = now;
	}

	fn finish(mut self) -> BTreeMap<String, f64> {
		self.timings.insert("total".to_string(), self.started.elapsed().as_secs_f64() * 1_000.0);

		self.timings
	}
}
