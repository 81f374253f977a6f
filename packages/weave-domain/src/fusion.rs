//! Reciprocal Rank Fusion over heterogeneously scored result lists.

use std::{
	cmp::Ordering,
	collections::{BTreeMap, HashMap, HashSet},
};

use serde_json::{Value, json};

use crate::{
	plan::{BackendKind, DEFAULT_PRIORITY},
	result::{META_RRF_SCORE, META_SOURCE_SCORE, META_SOURCES, RankedList, SearchResult, clamp01},
};

pub const DEFAULT_RRF_K: u32 = 60;

struct FusedEntry {
	result: SearchResult,
	rrf: f64,
	best_priority: i32,
	first_seen: usize,
	source_score: f64,
	sources: Vec<BackendKind>,
}

pub fn rrf_term(k: u32, rank: usize) -> f64 {
	1.0 / (f64::from(k) + rank as f64 + 1.0)
}

/// Fuses ranked lists into one ordering.
///
/// Each distinct `node_id` scores `Σ 1/(k + rank + 1)` over the lists it appears in, counting
/// only its first occurrence within a list. Ties fall to the best (lowest) priority among the
/// contributing sources, then to first appearance when lists are read in priority order.
/// Metadata is merged so that a higher-priority source keeps every key it set.
pub fn fuse(
	lists: &[RankedList],
	priority: &BTreeMap<BackendKind, i32>,
	k: u32,
) -> Vec<SearchResult> {
	let priority_of =
		|source: BackendKind| priority.get(&source).copied().unwrap_or(DEFAULT_PRIORITY);
	let mut order: Vec<usize> = (0..lists.len()).collect();

	order.sort_by_key(|idx| priority_of(lists[*idx].source));

	let mut entries: Vec<FusedEntry> = Vec::new();
	let mut by_id: HashMap<String, usize> = HashMap::new();

	for idx in order {
		let list = &lists[idx];
		let source_priority = priority_of(list.source);
		let mut seen_in_list = HashSet::new();
		let mut rank = 0;

		for result in &list.results {
			if !seen_in_list.insert(result.node_id.as_str()) {
				continue;
			}

			let contribution = rrf_term(k, rank);

			rank += 1;

			match by_id.get(&result.node_id) {
				Some(entry_idx) => {
					let entry = &mut entries[*entry_idx];

					entry.rrf += contribution;
					entry.best_priority = entry.best_priority.min(source_priority);
					entry.source_score = entry.source_score.max(result.source_score());

					if !entry.sources.contains(&list.source) {
						entry.sources.push(list.source);
					}

					for (key, value) in &result.metadata {
						entry.result.metadata.entry(key.clone()).or_insert_with(|| value.clone());
					}
				},
				None => {
					by_id.insert(result.node_id.clone(), entries.len());
					entries.push(FusedEntry {
						result: result.clone(),
						rrf: contribution,
						best_priority: source_priority,
						first_seen: entries.len(),
						source_score: result.source_score(),
						sources: vec![list.source],
					});
				},
			}
		}
	}

	entries.sort_by(|a, b| {
		cmp_f64_desc(a.rrf, b.rrf)
			.then_with(|| a.best_priority.cmp(&b.best_priority))
			.then_with(|| a.first_seen.cmp(&b.first_seen))
	});

	entries
		.into_iter()
		.map(|entry| {
			let mut result = entry.result;
			let sources: Vec<Value> =
				entry.sources.iter().map(|source| Value::from(source.as_str())).collect();

			result.score = clamp01(entry.rrf);
			result.metadata.insert(META_RRF_SCORE.to_string(), json!(entry.rrf));
			result.metadata.insert(META_SOURCE_SCORE.to_string(), json!(entry.source_score));
			result.metadata.insert(META_SOURCES.to_string(), Value::Array(sources));

			result
		})
		.collect()
}

pub fn cmp_f64_desc(a: f64, b: f64) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn list(source: BackendKind, ids: &[&str]) -> RankedList {
		RankedList::new(
			source,
			ids.iter().map(|id| SearchResult::new(*id, id.to_uppercase(), "document", 0.5)).collect(),
		)
	}

	#[test]
	fn duplicate_ids_within_a_list_count_once() {
		let fused = fuse(
			&[list(BackendKind::Vector, &["a", "a", "b"])],
			&BTreeMap::new(),
			DEFAULT_RRF_K,
		);

		assert_eq!(fused.len(), 2);
		assert!((fused[1].score - rrf_term(DEFAULT_RRF_K, 1)).abs() < 1e-12);
	}

	#[test]
	fn lower_priority_value_wins_ties() {
		let priority = BTreeMap::from([(BackendKind::Keyword, 0), (BackendKind::Vector, 1)]);
		let fused = fuse(
			&[list(BackendKind::Vector, &["v"]), list(BackendKind::Keyword, &["k"])],
			&priority,
			DEFAULT_RRF_K,
		);
		let ids: Vec<&str> = fused.iter().map(|result| result.node_id.as_str()).collect();

		assert_eq!(ids, vec!["k", "v"]);
	}

	#[test]
	fn higher_priority_metadata_is_not_overwritten() {
		let priority = BTreeMap::from([(BackendKind::Relational, 0), (BackendKind::Keyword, 1)]);
		let relational = RankedList::new(
			BackendKind::Relational,
			vec![SearchResult::new("x", "X", "organization", 1.0).with_metadata("count", 40)],
		);
		let keyword = RankedList::new(
			BackendKind::Keyword,
			vec![
				SearchResult::new("x", "X", "organization", 0.4)
					.with_metadata("count", 3)
					.with_metadata("community", 7),
			],
		);
		let fused = fuse(&[keyword, relational], &priority, DEFAULT_RRF_K);

		assert_eq!(fused[0].metadata["count"], json!(40));
		assert_eq!(fused[0].metadata["community"], json!(7));
		assert_eq!(fused[0].metadata[META_SOURCE_SCORE], json!(1.0));
	}
}
