use std::collections::HashMap;

use serde_json::Value;

use crate::{
	fusion::cmp_f64_desc,
	result::{SearchResult, normalize_label},
};

/// Collapses document hits into an entity ranking keyed by a metadata field.
///
/// Each entity's score is the number of hits carrying it relative to the busiest entity. Ties
/// keep the order in which entities were first seen.
pub fn aggregate_by_field(
	hits: &[SearchResult],
	field: &str,
	entity_type: &str,
	limit: usize,
) -> Vec<SearchResult> {
	let mut counts: Vec<(String, String, usize)> = Vec::new();
	let mut by_key: HashMap<String, usize> = HashMap::new();

	for hit in hits {
		let Some(label) = hit.metadata.get(field).and_then(Value::as_str) else {
			continue;
		};
		let key = normalize_label(label);

		if key.is_empty() {
			continue;
		}

		match by_key.get(&key) {
			Some(idx) => counts[*idx].2 += 1,
			None => {
				by_key.insert(key.clone(), counts.len());
				counts.push((key, label.trim().to_string(), 1));
			},
		}
	}

	let max = counts.iter().map(|(_, _, count)| *count).max().unwrap_or(0);

	if max == 0 {
		return Vec::new();
	}

	let mut ranked: Vec<SearchResult> = counts
		.into_iter()
		.map(|(key, label, count)| {
			SearchResult::new(key, label, entity_type, count as f64 / max as f64)
				.with_metadata("count", count)
		})
		.collect();

	ranked.sort_by(|a, b| cmp_f64_desc(a.score, b.score));
	ranked.truncate(limit);

	ranked
}
