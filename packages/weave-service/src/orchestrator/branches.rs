use std::{sync::Arc, time::Instant};

use weave_domain::{
	BackendKind, ClassifiedQuery, ExecutionMode, GraphStrategy, KeywordMode, RankedList,
	SearchPlan, SearchResult, SourceDescriptor, TabularResult, keywords,
	loader::{MatchContext, RelationalQuery},
	query_guard, ranking,
};

use crate::{
	adapters::{BackendError, BackendResult},
	orchestrator::{Collected, Shared},
	pool::WorkerPool,
	retry::call_with_retry,
};

const DEFAULT_ENTITY_TYPE: &str = "document";
const ORGANIZATION_FIELD: &str = "organization";
const GRAPH_SEED_COUNT: usize = 5;
const KEYWORD_AGGREGATION_FANOUT: usize = 5;

/// Runs the plan's primary sources and, when they produced nothing, its fallback sources once.
pub(super) async fn run_with_fallback(
	shared: &Arc<Shared>,
	query: Arc<ClassifiedQuery>,
	plan: Arc<SearchPlan>,
	mode: ExecutionMode,
) -> Collected {
	let mut collected = run_plan(shared, query.clone(), plan.clone(), mode).await;

	if collected.has_results() {
		return collected;
	}

	let Some(fallback) = plan.fallback_plan() else {
		return collected;
	};

	tracing::info!(
		backends = ?fallback.primary_sources,
		"Primary sources returned nothing. Running fallback sources."
	);

	let fallback_mode = fallback.execution_mode(&query);
	let second = run_plan(shared, query, Arc::new(fallback), fallback_mode).await;

	collected.absorb(second);

	collected
}

/// Launches the relational and retrieval branches as independent pool tasks.
async fn run_plan(
	shared: &Arc<Shared>,
	query: Arc<ClassifiedQuery>,
	plan: Arc<SearchPlan>,
	mode: ExecutionMode,
) -> Collected {
	let mut collected = Collected::for_plan(&plan, mode);
	let relational = plan.uses(BackendKind::Relational).then(|| {
		let task = (shared.clone(), query.clone(), plan.clone());

		shared.pool.spawn("relational", async move {
			let (shared, query, plan) = task;

			relational_branch(&shared, &query, &plan).await
		})
	});
	let retrieval = plan.retrieval_sources().next().is_some().then(|| {
		let task = (shared.clone(), query.clone(), plan.clone());

		shared.pool.spawn("retrieval", async move {
			let (shared, query, plan) = task;

			retrieval_branch(&shared, &query, &plan).await
		})
	});

	if let Some(handle) = relational {
		match WorkerPool::join(handle).await {
			Ok(output) => collected.absorb(output),
			Err(err) => collected.absorb(relational_task_failed(&query, &err)),
		}
	}
	if let Some(handle) = retrieval {
		match WorkerPool::join(handle).await {
			Ok(output) => collected.absorb(output),
			Err(err) => {
				for backend in plan.retrieval_sources() {
					record_failure(&mut collected, backend, backend.as_str(), &err);
				}
			},
		}
	}

	collected
}

/// Relational aggregation and keyword aggregation run side by side; both become entity rankings
/// that compete in fusion.
pub(super) async fn run_ranking(
	shared: &Arc<Shared>,
	query: Arc<ClassifiedQuery>,
	plan: Arc<SearchPlan>,
) -> Collected {
	let mut collected = Collected::for_plan(&plan, ExecutionMode::RankingParallel);
	let relational = {
		let task = (shared.clone(), query.clone(), plan.clone());

		shared.pool.spawn("relational", async move {
			let (shared, query, plan) = task;

			relational_branch(&shared, &query, &plan).await
		})
	};
	let keyword = {
		let task = (shared.clone(), query.clone(), plan.clone());

		shared.pool.spawn("keyword", async move {
			let (shared, query, plan) = task;
			let limit = plan.limits.keyword.max(1);
			let hits = above(
				keyword_search(&shared, &query, limit * KEYWORD_AGGREGATION_FANOUT).await,
				shared.cfg.thresholds.keyword_min_score,
			)?;

			Ok::<_, BackendError>(ranking::aggregate_by_field(
				&hits,
				ORGANIZATION_FIELD,
				ORGANIZATION_FIELD,
				limit,
			))
		})
	};

	match WorkerPool::join(relational).await {
		Ok(output) => {
			for (_, table) in &output.tabular {
				let ranked = table.to_ranked(ORGANIZATION_FIELD);

				if !ranked.is_empty() {
					collected.lists.push(RankedList::new(BackendKind::Relational, ranked));
				}
			}

			collected.absorb(output);
		},
		Err(err) => collected.absorb(relational_task_failed(&query, &err)),
	}

	let keyword = WorkerPool::join(keyword).await.and_then(|outcome| outcome);

	record(&mut collected, BackendKind::Keyword, keyword);

	collected
}

async fn relational_branch(
	shared: &Shared,
	query: &ClassifiedQuery,
	plan: &SearchPlan,
) -> Collected {
	let mut out = Collected::default();
	let mut loaded = Vec::new();

	for entity_type in entity_scope(query) {
		let ctx = MatchContext {
			text: &query.raw_text,
			subtype: &query.intent_subtype,
			entity_type: &entity_type,
			keywords: &query.keywords,
		};
		let Some(found) = shared.registry.find(plan, &ctx) else {
			continue;
		};

		if loaded.iter().any(|(_, existing)| *existing == found) {
			tracing::debug!(
				loader = found.loader.as_str(),
				entity_type = entity_type.as_str(),
				"Loader built an identical query. Skipping."
			);

			continue;
		}

		tracing::info!(
			loader = found.loader.as_str(),
			entity_type = entity_type.as_str(),
			"Deterministic loader matched."
		);

		loaded.push((entity_type, found));
	}

	if loaded.is_empty() {
		let entity_type = entity_scope(query).swap_remove(0);
		let started = Instant::now();

		match generate_query(shared, query).await {
			Ok(generated) => loaded.push((entity_type, generated)),
			Err(err) => {
				let failed = TabularResult::failed(err.to_string(), elapsed_ms(started));

				out.tabular.push((entity_type, failed));
				record_failure(&mut out, BackendKind::Relational, "relational:generated", &err);

				return out;
			},
		}
	}

	for (entity_type, relational_query) in loaded {
		let started = Instant::now();
		let label = format!("relational:{}", relational_query.loader);
		let limit = plan.limits.relational;
		let backend = &shared.backends.relational;
		let outcome = call_with_retry(&shared.retry, "relational", || {
			backend.execute(&relational_query, limit)
		})
		.await;

		match outcome {
			Ok(table) => {
				let table = table.truncated(limit);

				out.sources.push(SourceDescriptor::succeeded(
					BackendKind::Relational,
					label,
					table.row_count,
				));
				out.tabular.push((entity_type, table));
			},
			Err(err) => {
				let failed = TabularResult::failed(err.to_string(), elapsed_ms(started));

				record_failure(&mut out, BackendKind::Relational, &label, &err);
				out.tabular.push((entity_type, failed));
			},
		}
	}

	out
}

async fn generate_query(
	shared: &Shared,
	query: &ClassifiedQuery,
) -> BackendResult<RelationalQuery> {
	let generator = &shared.backends.query_generator;
	let hint = shared.cfg.orchestrator.schema_hint.as_deref();
	let sql = call_with_retry(&shared.retry, "query_generator", || {
		generator.generate(&query.raw_text, hint)
	})
	.await?;
	let vetted = query_guard::check_read_only(&sql)
		.map_err(|violation| BackendError::MalformedResponse { message: violation.message() })?;

	Ok(RelationalQuery::generated(vetted))
}

async fn retrieval_branch(
	shared: &Shared,
	query: &ClassifiedQuery,
	plan: &SearchPlan,
) -> Collected {
	let thresholds = &shared.cfg.thresholds;
	let mut out = Collected::default();
	let vector = async {
		if plan.uses(BackendKind::Vector) {
			Some(vector_search(shared, query, plan.limits.vector).await)
		} else {
			None
		}
	};
	let keyword = async {
		if plan.uses(BackendKind::Keyword) && plan.keyword_mode != KeywordMode::Off {
			Some(keyword_search(shared, query, plan.limits.keyword).await)
		} else {
			None
		}
	};
	let (vector, keyword) = tokio::join!(vector, keyword);
	let vector = vector.map(|outcome| above(outcome, thresholds.vector_min_score));
	let keyword = keyword.map(|outcome| above(outcome, thresholds.keyword_min_score));
	let graph = if plan.uses(BackendKind::Graph) {
		let seeds = graph_seeds(query, plan, vector.as_ref());
		let outcome = graph_traverse(shared, &seeds, plan.limits.graph).await;

		Some(above(outcome, thresholds.graph_min_score))
	} else {
		None
	};

	for (backend, outcome) in [
		(BackendKind::Vector, vector),
		(BackendKind::Graph, graph),
		(BackendKind::Keyword, keyword),
	] {
		if let Some(outcome) = outcome {
			record(&mut out, backend, outcome);
		}
	}

	out
}

async fn vector_search(
	shared: &Shared,
	query: &ClassifiedQuery,
	limit: usize,
) -> BackendResult<Vec<SearchResult>> {
	let embedder = &shared.backends.embedder;
	let embedding =
		call_with_retry(&shared.retry, "embedder", || embedder.embed(&query.raw_text)).await?;
	let vector = &shared.backends.vector;

	call_with_retry(&shared.retry, "vector", || vector.search(&embedding, limit)).await
}

async fn keyword_search(
	shared: &Shared,
	query: &ClassifiedQuery,
	limit: usize,
) -> BackendResult<Vec<SearchResult>> {
	let text = if query.keywords.is_empty() {
		query.raw_text.clone()
	} else {
		query.keywords.join(" ")
	};
	let keyword = &shared.backends.keyword;

	call_with_retry(&shared.retry, "keyword", || keyword.search(&text, limit)).await
}

async fn graph_traverse(
	shared: &Shared,
	seeds: &[String],
	limit: usize,
) -> BackendResult<Vec<SearchResult>> {
	if seeds.is_empty() {
		return Ok(Vec::new());
	}

	let depth = shared.cfg.orchestrator.traverse_depth;
	let graph = &shared.backends.graph;

	call_with_retry(&shared.retry, "graph", || graph.traverse(seeds, depth, limit)).await
}

/// Graph-enhanced plans expand from the best vector hits; everything else starts from keywords.
fn graph_seeds(
	query: &ClassifiedQuery,
	plan: &SearchPlan,
	vector: Option<&BackendResult<Vec<SearchResult>>>,
) -> Vec<String> {
	if plan.graph_strategy == GraphStrategy::GraphEnhanced
		&& let Some(Ok(hits)) = vector
		&& !hits.is_empty()
	{
		return hits.iter().take(GRAPH_SEED_COUNT).map(|hit| hit.node_id.clone()).collect();
	}
	if !query.keywords.is_empty() {
		return query.keywords.clone();
	}

	keywords::extract_keywords(&query.raw_text, keywords::DEFAULT_MAX_KEYWORDS)
}

fn above(
	outcome: BackendResult<Vec<SearchResult>>,
	min_score: f64,
) -> BackendResult<Vec<SearchResult>> {
	outcome.map(|hits| hits.into_iter().filter(|hit| hit.score >= min_score).collect())
}

fn entity_scope(query: &ClassifiedQuery) -> Vec<String> {
	if query.entity_types.is_empty() {
		vec![DEFAULT_ENTITY_TYPE.to_string()]
	} else {
		query.entity_types.iter().cloned().collect()
	}
}

fn relational_task_failed(query: &ClassifiedQuery, err: &BackendError) -> Collected {
	let mut out = Collected::default();

	for entity_type in entity_scope(query) {
		out.tabular.push((entity_type, TabularResult::failed(err.to_string(), 0.0)));
	}

	record_failure(&mut out, BackendKind::Relational, BackendKind::Relational.as_str(), err);

	out
}

fn record(out: &mut Collected, backend: BackendKind, outcome: BackendResult<Vec<SearchResult>>) {
	match outcome {
		Ok(hits) => {
			out.sources.push(SourceDescriptor::succeeded(backend, backend.as_str(), hits.len()));

			if !hits.is_empty() {
				out.lists.push(RankedList::new(backend, hits));
			}
		},
		Err(err) => record_failure(out, backend, backend.as_str(), &err),
	}
}

fn record_failure(out: &mut Collected, backend: BackendKind, label: &str, err: &BackendError) {
	tracing::warn!(
		backend = backend.as_str(),
		label,
		error_kind = err.kind().as_str(),
		error = %err,
		"Backend branch failed."
	);

	out.sources.push(SourceDescriptor::failed(backend, label, err.to_descriptor()));
}

fn elapsed_ms(started: Instant) -> f64 {
	started.elapsed().as_secs_f64() * 1_000.0
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use weave_domain::{IntentKind, IntentSubtype, resolver::StrategyResolver};

	use super::*;

	fn plan(subtype: IntentSubtype) -> SearchPlan {
		StrategyResolver::default().resolve(
			&subtype,
			Default::default(),
			&BTreeSet::new(),
			IntentKind::Hybrid,
		)
	}

	#[test]
	fn enhanced_graph_seeds_come_from_vector_hits() {
		let query = ClassifiedQuery::new("q", IntentKind::Hybrid, IntentSubtype::Recommendation)
			.with_keywords(["battery"]);
		let hits: BackendResult<Vec<SearchResult>> =
			Ok(vec![SearchResult::new("v1", "V1", "patent", 0.9)]);
		let plan = plan(IntentSubtype::Recommendation);

		assert_eq!(graph_seeds(&query, &plan, Some(&hits)), vec!["v1"]);
		assert_eq!(graph_seeds(&query, &plan, None), vec!["battery"]);
	}

	#[test]
	fn thresholds_drop_weak_hits() {
		let hits = vec![
			SearchResult::new("a", "A", "patent", 0.8),
			SearchResult::new("b", "B", "patent", 0.2),
		];
		let kept = above(Ok(hits), 0.35).expect("ok outcome");

		assert_eq!(kept.len(), 1);
		assert_eq!(kept[0].node_id, "a");
	}
}
