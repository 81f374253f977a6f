use std::{
	collections::HashSet,
	fs,
	path::{Path, PathBuf},
	time::Instant,
};

use clap::Parser;
use color_eyre::eyre;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tracing_subscriber::EnvFilter;

use weave_config::Config;
use weave_domain::MergedContext;
use weave_service::WeaveService;

const DEFAULT_TOP_K: u32 = 10;

#[derive(Debug, Parser)]
#[command(
	version = weave_cli::VERSION,
	rename_all = "kebab",
	styles = weave_cli::styles(),
)]
pub struct Args {
	#[arg(long, short = 'c', value_name = "FILE")]
	pub config: PathBuf,
	#[arg(long, short = 'd', value_name = "FILE")]
	pub dataset: PathBuf,
	#[arg(long, value_name = "N")]
	pub top_k: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct EvalDataset {
	name: Option<String>,
	top_k: Option<u32>,
	queries: Vec<EvalQuery>,
}

#[derive(Debug, Deserialize)]
struct EvalQuery {
	id: Option<String>,
	query: String,
	top_k: Option<u32>,
	expected_node_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
struct EvalOutput {
	generated_at: String,
	dataset: EvalDatasetInfo,
	settings: EvalSettings,
	summary: EvalSummary,
	queries: Vec<QueryReport>,
}

#[derive(Debug, Serialize)]
struct EvalDatasetInfo {
	name: String,
	query_count: usize,
}

#[derive(Debug, Serialize)]
struct EvalSettings {
	config_path: String,
	top_k: u32,
	rrf_k: u32,
}

#[derive(Debug, Serialize)]
struct EvalSummary {
	avg_recall_at_k: f64,
	avg_precision_at_k: f64,
	mean_rr: f64,
	mean_ndcg: f64,
	mean_confidence: f64,
	failed_queries: usize,
	latency_ms_p50: f64,
	latency_ms_p95: f64,
}

#[derive(Debug, Serialize)]
struct QueryReport {
	id: String,
	query: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	mode: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	error: Option<String>,
	expected_count: usize,
	retrieved_count: usize,
	relevant_count: usize,
	recall_at_k: f64,
	precision_at_k: f64,
	rr: f64,
	ndcg: f64,
	confidence: f64,
	latency_ms: f64,
	failed_backends: Vec<String>,
	expected_node_ids: Vec<String>,
	retrieved_node_ids: Vec<String>,
}

#[derive(Debug, Default, PartialEq)]
struct Metrics {
	recall_at_k: f64,
	precision_at_k: f64,
	rr: f64,
	ndcg: f64,
	relevant_count: usize,
}

pub async fn run(args: Args) -> color_eyre::Result<()> {
	let config = weave_config::load(&args.config)?;

	init_tracing(&config);

	let dataset = load_dataset(&args.dataset)?;
	let top_k = args.top_k.or(dataset.top_k).unwrap_or(DEFAULT_TOP_K).max(1);
	let settings = EvalSettings {
		config_path: args.config.display().to_string(),
		top_k,
		rrf_k: config.fusion.rrf_k,
	};
	let service = WeaveService::new(config).await?;
	let mut reports = Vec::with_capacity(dataset.queries.len());
	let mut latencies_ms = Vec::with_capacity(dataset.queries.len());

	for (index, query) in dataset.queries.iter().enumerate() {
		let k = query.top_k.unwrap_or(top_k).max(1) as usize;
		let started = Instant::now();
		let outcome = service.answer_context(&query.query).await;
		let latency_ms = started.elapsed().as_secs_f64() * 1_000.0;
		let id = query.id.clone().unwrap_or_else(|| format!("q{index}"));

		latencies_ms.push(latency_ms);

		let report = match outcome {
			Ok(ctx) => report_for(id, query, &ctx, k, latency_ms),
			Err(err) => {
				tracing::warn!(error = %err, query_id = id.as_str(), "Query failed.");

				failed_report(id, query, err.to_string(), latency_ms)
			},
		};

		reports.push(report);
	}

	let output = EvalOutput {
		generated_at: OffsetDateTime::now_utc().format(&Rfc3339)?,
		dataset: EvalDatasetInfo {
			name: dataset.name.clone().unwrap_or_else(|| "dataset".to_string()),
			query_count: dataset.queries.len(),
		},
		settings,
		summary: summarize(&reports, &latencies_ms),
		queries: reports,
	};
	let json = serde_json::to_string_pretty(&output)?;

	println!("{json}");

	Ok(())
}

fn init_tracing(config: &Config) {
	let filter =
		EnvFilter::try_new(&config.service.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

	tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_dataset(path: &Path) -> color_eyre::Result<EvalDataset> {
	let raw = fs::read_to_string(path)?;

	parse_dataset(&raw)
}

fn parse_dataset(raw: &str) -> color_eyre::Result<EvalDataset> {
	let dataset: EvalDataset = serde_json::from_str(raw)?;

	if dataset.queries.is_empty() {
		return Err(eyre::eyre!("Dataset must include at least one query."));
	}
	if let Some(query) = dataset.queries.iter().find(|query| query.query.trim().is_empty()) {
		return Err(eyre::eyre!(
			"Dataset query {} has empty text.",
			query.id.as_deref().unwrap_or("<unnamed>")
		));
	}

	Ok(dataset)
}

fn report_for(
	id: String,
	query: &EvalQuery,
	ctx: &MergedContext,
	k: usize,
	latency_ms: f64,
) -> QueryReport {
	let retrieved = unique_ids(ctx.ranked.iter().map(|result| result.node_id.as_str()), k);
	let expected: HashSet<&str> = query.expected_node_ids.iter().map(String::as_str).collect();
	let metrics = compute_metrics(&retrieved, &expected, k);
	let failed_backends = ctx
		.sources_used
		.iter()
		.filter(|source| !source.success)
		.map(|source| source.label.clone())
		.collect();

	QueryReport {
		id,
		query: query.query.clone(),
		mode: Some(ctx.mode.as_str().to_string()),
		error: None,
		expected_count: expected.len(),
		retrieved_count: retrieved.len(),
		relevant_count: metrics.relevant_count,
		recall_at_k: metrics.recall_at_k,
		precision_at_k: metrics.precision_at_k,
		rr: metrics.rr,
		ndcg: metrics.ndcg,
		confidence: ctx.confidence,
		latency_ms,
		failed_backends,
		expected_node_ids: query.expected_node_ids.clone(),
		retrieved_node_ids: retrieved,
	}
}

fn failed_report(id: String, query: &EvalQuery, error: String, latency_ms: f64) -> QueryReport {
	QueryReport {
		id,
		query: query.query.clone(),
		mode: None,
		error: Some(error),
		expected_count: query.expected_node_ids.len(),
		retrieved_count: 0,
		relevant_count: 0,
		recall_at_k: 0.0,
		precision_at_k: 0.0,
		rr: 0.0,
		ndcg: 0.0,
		confidence: 0.0,
		latency_ms,
		failed_backends: Vec::new(),
		expected_node_ids: query.expected_node_ids.clone(),
		retrieved_node_ids: Vec::new(),
	}
}

fn unique_ids<'a, I>(iter: I, k: usize) -> Vec<String>
where
	I: IntoIterator<Item = &'a str>,
{
	let mut seen = HashSet::new();
	let mut out = Vec::new();

	for id in iter {
		if out.len() == k {
			break;
		}
		if seen.insert(id) {
			out.push(id.to_string());
		}
	}

	out
}

fn compute_metrics(retrieved: &[String], expected: &HashSet<&str>, k: usize) -> Metrics {
	if expected.is_empty() {
		return Metrics::default();
	}

	let mut relevant_count = 0_usize;
	let mut dcg = 0.0_f64;
	let mut first_hit = None;

	for (idx, id) in retrieved.iter().enumerate() {
		if !expected.contains(id.as_str()) {
			continue;
		}

		let rank = idx + 1;

		relevant_count += 1;
		dcg += 1.0 / (rank as f64 + 1.0).log2();
		first_hit.get_or_insert(rank);
	}

	let ideal_hits = expected.len().min(k);
	let idcg: f64 = (1..=ideal_hits).map(|rank| 1.0 / (rank as f64 + 1.0).log2()).sum();

	Metrics {
		recall_at_k: relevant_count as f64 / expected.len() as f64,
		precision_at_k: relevant_count as f64 / k as f64,
		rr: first_hit.map(|rank| 1.0 / rank as f64).unwrap_or(0.0),
		ndcg: if idcg > 0.0 { dcg / idcg } else { 0.0 },
		relevant_count,
	}
}

fn summarize(reports: &[QueryReport], latencies_ms: &[f64]) -> EvalSummary {
	let count = reports.len().max(1) as f64;
	let mean = |f: fn(&QueryReport) -> f64| reports.iter().map(f).sum::<f64>() / count;
	let mut sorted = latencies_ms.to_vec();

	sorted.sort_by(f64::total_cmp);

	EvalSummary {
		avg_recall_at_k: mean(|r| r.recall_at_k),
		avg_precision_at_k: mean(|r| r.precision_at_k),
		mean_rr: mean(|r| r.rr),
		mean_ndcg: mean(|r| r.ndcg),
		mean_confidence: mean(|r| r.confidence),
		failed_queries: reports.iter().filter(|r| r.error.is_some()).count(),
		latency_ms_p50: percentile(&sorted, 0.50),
		latency_ms_p95: percentile(&sorted, 0.95),
	}
}

/// Linear interpolation between closest ranks over an ascending slice.
fn percentile(values: &[f64], percentile: f64) -> f64 {
	if values.is_empty() {
		return 0.0;
	}

	let pos = percentile.clamp(0.0, 1.0) * (values.len() as f64 - 1.0);
	let lower = pos.floor() as usize;
	let upper = pos.ceil() as usize;

	if lower == upper {
		values[lower]
	} else {
		let weight = pos - lower as f64;

		values[lower] * (1.0 - weight) + values[upper] * weight
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn ids(values: &[&str]) -> Vec<String> {
		values.iter().map(|value| value.to_string()).collect()
	}

	#[test]
	fn metrics_reward_early_hits() {
		let expected = HashSet::from(["b", "d"]);
		let metrics = compute_metrics(&ids(&["a", "b", "c", "d"]), &expected, 4);

		assert_eq!(metrics.relevant_count, 2);
		assert_eq!(metrics.recall_at_k, 1.0);
		assert_eq!(metrics.precision_at_k, 0.5);
		assert_eq!(metrics.rr, 0.5);
		assert!(metrics.ndcg > 0.0 && metrics.ndcg < 1.0, "Unexpected ndcg: {}", metrics.ndcg);
	}

	#[test]
	fn perfect_ranking_has_unit_ndcg() {
		let expected = HashSet::from(["a", "b"]);
		let metrics = compute_metrics(&ids(&["a", "b", "x"]), &expected, 3);

		assert!((metrics.ndcg - 1.0).abs() < 1e-12);
		assert_eq!(metrics.rr, 1.0);
	}

	#[test]
	fn unique_ids_truncate_after_dedup() {
		assert_eq!(unique_ids(["a", "a", "b", "c"], 2), ids(&["a", "b"]));
	}

	#[test]
	fn percentile_interpolates() {
		let values = [10.0, 20.0, 30.0, 40.0];

		assert_eq!(percentile(&values, 0.0), 10.0);
		assert_eq!(percentile(&values, 0.5), 25.0);
		assert_eq!(percentile(&values, 1.0), 40.0);
		assert_eq!(percentile(&[], 0.95), 0.0);
	}

	#[test]
	fn datasets_need_queries_with_text() {
		assert!(parse_dataset(r#"{ "queries": [] }"#).is_err());
		assert!(
			parse_dataset(r#"{ "queries": [{ "query": " ", "expected_node_ids": [] }] }"#).is_err()
		);

		let dataset = parse_dataset(
			r#"{ "name": "smoke", "queries": [{ "id": "q1", "query": "battery patents", "expected_node_ids": ["n1"] }] }"#,
		)
		.expect("parse failed");

		assert_eq!(dataset.queries.len(), 1);
		assert_eq!(dataset.name.as_deref(), Some("smoke"));
	}
}
