use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::query::ClassifiedQuery;

pub const DEFAULT_PRIORITY: i32 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackendKind {
	Relational,
	Vector,
	Graph,
	Keyword,
}
impl BackendKind {
	pub const ALL: [Self; 4] = [Self::Relational, Self::Vector, Self::Graph, Self::Keyword];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Relational => "relational",
			Self::Vector => "vector",
			Self::Graph => "graph",
			Self::Keyword => "keyword",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|kind| kind.as_str() == raw)
	}

	pub fn is_retrieval(self) -> bool {
		!matches!(self, Self::Relational)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GraphStrategy {
	None,
	GraphOnly,
	VectorOnly,
	Hybrid,
	GraphEnhanced,
}
impl GraphStrategy {
	pub fn uses_graph(self) -> bool {
		matches!(self, Self::GraphOnly | Self::Hybrid | Self::GraphEnhanced)
	}

	pub fn uses_vector(self) -> bool {
		matches!(self, Self::VectorOnly | Self::Hybrid | Self::GraphEnhanced)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeywordMode {
	Off,
	/// Keyword hits are fused into the retrieval ranking.
	Boost,
	/// Keyword hits are aggregated into an entity ranking that competes with the relational one.
	Aggregation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultLimits {
	pub relational: usize,
	pub vector: usize,
	pub graph: usize,
	pub keyword: usize,
}
impl ResultLimits {
	pub fn get(&self, backend: BackendKind) -> usize {
		match backend {
			BackendKind::Relational => self.relational,
			BackendKind::Vector => self.vector,
			BackendKind::Graph => self.graph,
			BackendKind::Keyword => self.keyword,
		}
	}

	pub fn capped(self, relational: usize, retrieval: usize) -> Self {
		Self {
			relational: self.relational.min(relational),
			vector: self.vector.min(retrieval),
			graph: self.graph.min(retrieval),
			keyword: self.keyword.min(retrieval),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPlan {
	pub primary_sources: Vec<BackendKind>,
	pub fallback_sources: Vec<BackendKind>,
	pub graph_strategy: GraphStrategy,
	pub keyword_mode: KeywordMode,
	pub merge_priority: BTreeMap<BackendKind, i32>,
	pub limits: ResultLimits,
	pub use_deterministic_loader: bool,
	pub loader_id: Option<String>,
}
impl SearchPlan {
	pub fn uses(&self, backend: BackendKind) -> bool {
		self.primary_sources.contains(&backend)
	}

	pub fn priority(&self, backend: BackendKind) -> i32 {
		self.merge_priority.get(&backend).copied().unwrap_or(DEFAULT_PRIORITY)
	}

	pub fn retrieval_sources(&self) -> impl Iterator<Item = BackendKind> + '_ {
		self.primary_sources.iter().copied().filter(|backend| backend.is_retrieval())
	}

	pub fn is_direct(&self) -> bool {
		self.primary_sources.is_empty()
	}

	pub fn execution_mode(&self, query: &ClassifiedQuery) -> ExecutionMode {
		if query.is_compound {
			return ExecutionMode::SubQueries;
		}
		if self.is_direct() {
			return ExecutionMode::Direct;
		}

		let relational = self.uses(BackendKind::Relational);

		if relational
			&& self.uses(BackendKind::Keyword)
			&& self.keyword_mode == KeywordMode::Aggregation
		{
			return ExecutionMode::RankingParallel;
		}
		if relational && self.retrieval_sources().next().is_some() {
			return ExecutionMode::Parallel;
		}

		ExecutionMode::Single
	}

	/// Plan that only runs `fallback_sources`, used when the primary pass found nothing.
	pub fn fallback_plan(&self) -> Option<Self> {
		let sources: Vec<BackendKind> = self
			.fallback_sources
			.iter()
			.copied()
			.filter(|backend| !self.primary_sources.contains(backend))
			.collect();

		if sources.is_empty() {
			return None;
		}

		let graph_strategy = match (
			sources.contains(&BackendKind::Vector),
			sources.contains(&BackendKind::Graph),
		) {
			(true, true) => GraphStrategy::Hybrid,
			(false, true) => GraphStrategy::GraphOnly,
			(true, false) => GraphStrategy::VectorOnly,
			(false, false) => GraphStrategy::None,
		};
		let keyword_mode = if sources.contains(&BackendKind::Keyword) {
			KeywordMode::Boost
		} else {
			KeywordMode::Off
		};

		Some(Self {
			primary_sources: sources,
			fallback_sources: Vec::new(),
			graph_strategy,
			keyword_mode,
			merge_priority: self.merge_priority.clone(),
			limits: self.limits,
			use_deterministic_loader: self.use_deterministic_loader,
			loader_id: self.loader_id.clone(),
		})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExecutionMode {
	Direct,
	Single,
	Parallel,
	RankingParallel,
	SubQueries,
}
impl ExecutionMode {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Direct => "direct",
			Self::Single => "single",
			Self::Parallel => "parallel",
			Self::RankingParallel => "ranking_parallel",
			Self::SubQueries => "sub_queries",
		}
	}
}

/// Orchestration progress. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
	Planning,
	Executing,
	Merging,
	Done,
}
impl Stage {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Planning => "planning",
			Self::Executing => "executing",
			Self::Merging => "merging",
			Self::Done => "done",
		}
	}

	pub fn next(self) -> Self {
		match self {
			Self::Planning => Self::Executing,
			Self::Executing => Self::Merging,
			Self::Merging | Self::Done => Self::Done,
		}
	}
}
