use std::{
	collections::{BTreeMap, HashMap},
	sync::Arc,
};

use tokio::task::{Id, JoinError, JoinSet};

use weave_domain::{
	BackendErrorKind, ClassifiedQuery, ErrorDescriptor, SearchPlan, SourceDescriptor, SubQuery,
	SubQueryGraph,
};

use crate::orchestrator::{Collected, Shared, execute_plan};

const MAX_INHERITED_KEYWORDS: usize = 5;

type Joined = Result<(Id, (usize, Collected)), JoinError>;

/// Runs a compound query's sub-queries. Roots start together; a dependent starts only after its
/// dependency settles and inherits keywords from that result. A failed dependency still lets its
/// dependents run, without inherited context.
pub(super) async fn run(
	shared: &Arc<Shared>,
	parent: Arc<ClassifiedQuery>,
	graph: SubQueryGraph,
) -> Collected {
	let mut running = JoinSet::new();
	let mut indices = HashMap::new();
	let mut finished = BTreeMap::new();

	for root in graph.roots() {
		spawn(&mut running, &mut indices, shared, &parent, root, Vec::new());
	}

	while let Some(joined) = running.join_next_with_id().await {
		let Some((index, outcome)) = settle(joined, &mut indices) else {
			continue;
		};
		let outcome = match outcome {
			Ok(outcome) => outcome,
			Err(err) => {
				tracing::warn!(index, error = %err, "Sub-query task aborted.");

				graph
					.get(index)
					.map(|sub_query| {
						let plan = shared.plan_for(&parent.for_sub_query(sub_query, &[]));

						aborted(&plan, &err.to_string())
					})
					.unwrap_or_default()
			},
		};
		let inherited = inherited_keywords(&outcome);

		tracing::debug!(index, inherited = inherited.len(), "Sub-query finished.");

		for dependent in graph.dependents(index) {
			spawn(&mut running, &mut indices, shared, &parent, dependent, inherited.clone());
		}

		finished.insert(index, outcome);
	}

	let mut collected = Collected::default();

	for sub_query in graph.iter() {
		let Some(outcome) = finished.remove(&sub_query.index) else {
			continue;
		};

		absorb_keyed(&mut collected, sub_query, outcome);
	}

	collected
}

fn spawn(
	running: &mut JoinSet<(usize, Collected)>,
	indices: &mut HashMap<Id, usize>,
	shared: &Arc<Shared>,
	parent: &ClassifiedQuery,
	sub_query: &SubQuery,
	inherited: Vec<String>,
) {
	let index = sub_query.index;
	let query = Arc::new(parent.for_sub_query(sub_query, &inherited));
	let shared = shared.clone();
	let handle = running.spawn(async move {
		let plan = shared.plan_for(&query);
		let mode = plan.execution_mode(&query);

		tracing::debug!(index, mode = mode.as_str(), "Sub-query started.");

		(index, execute_plan(&shared, query, Arc::new(plan), mode).await)
	});

	indices.insert(handle.id(), index);
}

/// Maps a joined task back to its sub-query index, including tasks that panicked or were
/// aborted.
fn settle(
	joined: Joined,
	indices: &mut HashMap<Id, usize>,
) -> Option<(usize, Result<Collected, JoinError>)> {
	match joined {
		Ok((id, (index, outcome))) => {
			indices.remove(&id);

			Some((index, Ok(outcome)))
		},
		Err(err) => indices.remove(&err.id()).map(|index| (index, Err(err))),
	}
}

/// Output of a sub-query whose task died: every planned source is reported unavailable.
fn aborted(plan: &SearchPlan, message: &str) -> Collected {
	let sources = plan
		.primary_sources
		.iter()
		.map(|backend| {
			SourceDescriptor::failed(
				*backend,
				backend.as_str(),
				ErrorDescriptor {
					kind: BackendErrorKind::Unavailable,
					message: message.to_string(),
				},
			)
		})
		.collect();

	Collected { sources, ..Collected::default() }
}

/// Keeps each table under the entity type the branch produced it for when the sub-query declared
/// that type; anything else goes under the sub-query's entity key. Descriptors are tagged with
/// the sub-query index.
fn absorb_keyed(collected: &mut Collected, sub_query: &SubQuery, mut outcome: Collected) {
	for (branch_key, table) in std::mem::take(&mut outcome.tabular) {
		let base = if sub_query.entity_types.contains(&branch_key) {
			branch_key
		} else {
			sub_query.entity_key()
		};
		let key = if collected.tabular.iter().any(|(key, _)| *key == base) {
			format!("{base}#{}", sub_query.index)
		} else {
			base
		};

		collected.tabular.push((key, table));
	}

	outcome.sources =
		outcome.sources.into_iter().map(|source| source.for_sub_query(sub_query.index)).collect();

	collected.absorb(outcome);
}

fn inherited_keywords(outcome: &Collected) -> Vec<String> {
	let ranked = outcome.lists.iter().flat_map(|list| list.results.iter());
	let tabular = outcome
		.tabular
		.iter()
		.filter(|(_, table)| table.has_rows())
		.flat_map(|(_, table)| table.to_ranked(""));
	let names = ranked
		.map(|result| result.display_name.clone())
		.chain(tabular.map(|result| result.display_name));
	let mut keywords: Vec<String> = Vec::new();

	for name in names {
		if keywords.len() >= MAX_INHERITED_KEYWORDS {
			break;
		}
		if !keywords.iter().any(|existing| existing.eq_ignore_ascii_case(&name)) {
			keywords.push(name);
		}
	}

	keywords
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeSet;

	use weave_domain::{
		BackendKind, IntentKind, IntentSubtype, RankedList, RankingKind, SearchResult,
		TabularResult, resolver::StrategyResolver,
	};

	use super::*;

	#[test]
	fn colliding_entity_keys_get_index_suffix() {
		let mut collected = Collected::default();
		let first = SubQuery::new(0, "a", IntentSubtype::List).with_entity_type("patent");
		let second = SubQuery::new(1, "b", IntentSubtype::List).with_entity_type("patent");
		let table = || Collected {
			tabular: vec![("patent".to_string(), TabularResult::new(vec![], vec![], 1.0))],
			..Collected::default()
		};

		absorb_keyed(&mut collected, &first, table());
		absorb_keyed(&mut collected, &second, table());

		let keys: Vec<&str> = collected.tabular.iter().map(|(key, _)| key.as_str()).collect();

		assert_eq!(keys, vec!["patent", "patent#1"]);
	}

	#[test]
	fn tables_keep_their_declared_entity_type() {
		let mut collected = Collected::default();
		let scoped = SubQuery::new(0, "a", IntentSubtype::List)
			.with_entity_type("patent")
			.with_entity_type("proposal");
		let unscoped = SubQuery::new(1, "b", IntentSubtype::List);
		let table = || TabularResult::new(vec![], vec![], 1.0);

		absorb_keyed(
			&mut collected,
			&scoped,
			Collected {
				tabular: vec![("patent".to_string(), table()), ("proposal".to_string(), table())],
				..Collected::default()
			},
		);
		absorb_keyed(
			&mut collected,
			&unscoped,
			Collected { tabular: vec![("document".to_string(), table())], ..Collected::default() },
		);

		let keys: Vec<&str> = collected.tabular.iter().map(|(key, _)| key.as_str()).collect();

		assert_eq!(keys, vec!["patent", "proposal", "subquery_1"]);
	}

	#[tokio::test]
	async fn aborted_tasks_keep_their_index() {
		let mut running = JoinSet::new();
		let mut indices = HashMap::new();
		let handle = running.spawn(std::future::pending::<(usize, Collected)>());

		indices.insert(handle.id(), 3);
		handle.abort();

		let joined = running.join_next_with_id().await.expect("one task was spawned");
		let (index, outcome) = settle(joined, &mut indices).expect("index is known");

		assert_eq!(index, 3);
		assert!(outcome.is_err());
		assert!(indices.is_empty());
	}

	#[test]
	fn aborted_sub_query_reports_every_planned_source() {
		let plan = StrategyResolver::default().resolve(
			&IntentSubtype::Recommendation,
			RankingKind::Simple,
			&BTreeSet::from(["project".to_string()]),
			IntentKind::Hybrid,
		);
		let outcome = aborted(&plan, "task panicked");

		assert_eq!(outcome.sources.len(), plan.primary_sources.len());
		assert!(outcome.sources.iter().all(|source| {
			!source.success
				&& source.error.as_ref().map(|err| err.kind) == Some(BackendErrorKind::Unavailable)
		}));
	}

	#[test]
	fn inherited_keywords_prefer_ranked_names() {
		let outcome = Collected {
			lists: vec![RankedList::new(
				BackendKind::Vector,
				vec![
					SearchResult::new("a", "Acme", "organization", 0.9),
					SearchResult::new("b", "acme", "organization", 0.8),
				],
			)],
			..Collected::default()
		};

		assert_eq!(inherited_keywords(&outcome), vec!["Acme"]);
	}
}
