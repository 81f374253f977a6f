use serde::Serialize;

use crate::result::{MergedContext, TabularResult, clamp01};

/// Inputs to the confidence formula, kept for explain output and tests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceBreakdown {
	pub normalized_source_count: f64,
	pub top_result_score: f64,
	pub cross_validated_ratio: f64,
}

pub fn breakdown(ctx: &MergedContext, cfg: &weave_config::Confidence) -> ConfidenceBreakdown {
	let saturation = cfg.source_saturation.max(1);
	let productive = ctx.productive_backends().len().min(saturation);
	let normalized_source_count = productive as f64 / saturation as f64;
	let top_result_score = match ctx.ranked.first() {
		Some(top) => clamp01(top.source_score()),
		None if ctx.tabular.values().any(TabularResult::has_rows) => 1.0,
		None => 0.0,
	};
	let window = ctx.ranked.len().min(cfg.top_n);
	let cross_validated_ratio = if window == 0 {
		0.0
	} else {
		let validated =
			ctx.ranked.iter().take(window).filter(|result| result.is_cross_validated()).count();

		validated as f64 / window as f64
	};

	ConfidenceBreakdown { normalized_source_count, top_result_score, cross_validated_ratio }
}

/// `clamp01(w1 * sources + w2 * top score + w3 * cross-validated ratio)`.
///
/// A context in which no backend produced anything scores exactly zero.
pub fn score(ctx: &MergedContext, cfg: &weave_config::Confidence) -> f64 {
	if !ctx.has_results() {
		return 0.0;
	}

	let parts = breakdown(ctx, cfg);

	clamp01(
		cfg.source_weight * parts.normalized_source_count
			+ cfg.top_score_weight * parts.top_result_score
			+ cfg.cross_validated_weight * parts.cross_validated_ratio,
	)
}

#[cfg(test)]
mod tests {
	use crate::{
		plan::{BackendKind, ExecutionMode},
		result::{SearchResult, SourceDescriptor},
	};

	use super::*;

	fn cfg() -> weave_config::Confidence {
		weave_config::Confidence::default()
	}

	#[test]
	fn empty_context_scores_zero() {
		assert_eq!(score(&MergedContext::empty(ExecutionMode::Parallel), &cfg()), 0.0);
	}

	#[test]
	fn fully_cross_validated_context_gets_full_weight() {
		let mut ctx = MergedContext::empty(ExecutionMode::Single);

		ctx.ranked = vec![
			SearchResult::new("a", "A", "document", 0.8).cross_validated(1.0),
			SearchResult::new("b", "B", "document", 0.6).cross_validated(1.0),
		];
		ctx.sources_used = vec![SourceDescriptor::succeeded(BackendKind::Vector, "vector", 2)];

		let parts = breakdown(&ctx, &cfg());

		assert_eq!(parts.cross_validated_ratio, 1.0);
		assert!((parts.normalized_source_count - 1.0 / 3.0).abs() < 1e-12);
		assert!((score(&ctx, &cfg()) - (0.1 + 0.32 + 0.3)).abs() < 1e-9);
	}
}
