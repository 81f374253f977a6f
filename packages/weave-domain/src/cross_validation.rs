use std::collections::{BTreeSet, HashSet};

use crate::{
	fusion::cmp_f64_desc,
	result::{SearchResult, TabularResult},
};

/// Unordered set of node pairs the graph backend reported as directly related.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphAdjacency {
	pairs: BTreeSet<(String, String)>,
}
impl GraphAdjacency {
	pub fn new<I>(pairs: I) -> Self
	where
		I: IntoIterator<Item = (String, String)>,
	{
		let mut adjacency = Self::default();

		for (a, b) in pairs {
			adjacency.insert(a, b);
		}

		adjacency
	}

	pub fn insert(&mut self, a: String, b: String) {
		if a == b {
			return;
		}

		let pair = if a <= b { (a, b) } else { (b, a) };

		self.pairs.insert(pair);
	}

	pub fn is_adjacent(&self, a: &str, b: &str) -> bool {
		let (low, high) = if a <= b { (a, b) } else { (b, a) };

		self.pairs.contains(&(low.to_string(), high.to_string()))
	}

	pub fn len(&self) -> usize {
		self.pairs.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pairs.is_empty()
	}
}

/// Marks results that are mutually adjacent in the graph and boosts their scores.
///
/// Only the first `cfg.top_n` results are compared pairwise. Any adjacency error aborts the pass
/// and returns the input unchanged; a disabled config does the same.
pub fn validate<F, E>(
	results: &[SearchResult],
	cfg: &weave_config::CrossValidation,
	mut adjacency: F,
) -> Vec<SearchResult>
where
	F: FnMut(&str, &str) -> Result<bool, E>,
	E: std::fmt::Display,
{
	if !cfg.enabled || results.len() < 2 {
		return results.to_vec();
	}

	let window = results.len().min(cfg.top_n);
	let mut corroborated = HashSet::new();

	for i in 0..window {
		for j in (i + 1)..window {
			let a = results[i].node_id.as_str();
			let b = results[j].node_id.as_str();

			if a == b {
				continue;
			}

			match adjacency(a, b) {
				Ok(true) => {
					corroborated.insert(i);
					corroborated.insert(j);
				},
				Ok(false) => {},
				Err(err) => {
					tracing::warn!(error = %err, "Graph adjacency failed. Skipping cross-validation.");

					return results.to_vec();
				},
			}
		}
	}

	if corroborated.is_empty() {
		return results.to_vec();
	}

	apply_boost(results, &corroborated, cfg.boost)
}

/// Marks ranked results whose identifiers also appear in a successful tabular result.
pub fn corroborate_with_tabular<'a, I>(
	results: &[SearchResult],
	tables: I,
	boost: f64,
) -> Vec<SearchResult>
where
	I: IntoIterator<Item = &'a TabularResult>,
{
	let identifiers: BTreeSet<String> = tables
		.into_iter()
		.filter(|table| table.success)
		.flat_map(TabularResult::identifiers)
		.collect();

	if identifiers.is_empty() {
		return results.to_vec();
	}

	let corroborated: HashSet<usize> = results
		.iter()
		.enumerate()
		.filter(|(_, result)| identifiers.contains(&result.node_id))
		.map(|(idx, _)| idx)
		.collect();

	if corroborated.is_empty() {
		return results.to_vec();
	}

	apply_boost(results, &corroborated, boost)
}

fn apply_boost(
	results: &[SearchResult],
	corroborated: &HashSet<usize>,
	boost: f64,
) -> Vec<SearchResult> {
	let mut out: Vec<SearchResult> = results
		.iter()
		.enumerate()
		.map(|(idx, result)| {
			if corroborated.contains(&idx) { result.cross_validated(boost) } else { result.clone() }
		})
		.collect();

	out.sort_by(|a, b| cmp_f64_desc(a.score, b.score));

	out
}
