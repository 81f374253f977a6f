//! Seams between the orchestrator and its external collaborators.
//!
//! Every trait returns a `BackendError` on failure; the orchestrator turns those into error
//! descriptors and never propagates them.

use std::{future::Future, pin::Pin, sync::Arc};

use weave_config::Config;
use weave_domain::{
	BackendErrorKind, ClassifiedQuery, ErrorDescriptor, SearchResult, TabularResult,
	cross_validation::GraphAdjacency, loader::RelationalQuery,
};
use weave_providers::{classifier, embedding, query_gen};
use weave_storage::{db::Db, graph::GraphStore, qdrant::QdrantStore, relational};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
	#[error("Backend timed out: {message}")]
	Timeout { message: String },
	#[error("Backend unavailable: {message}")]
	Unavailable { message: String },
	#[error("Backend returned a malformed response: {message}")]
	MalformedResponse { message: String },
}
impl BackendError {
	pub fn from_kind(kind: BackendErrorKind, message: impl Into<String>) -> Self {
		let message = message.into();

		match kind {
			BackendErrorKind::Timeout => Self::Timeout { message },
			BackendErrorKind::Unavailable => Self::Unavailable { message },
			BackendErrorKind::MalformedResponse => Self::MalformedResponse { message },
		}
	}

	pub fn kind(&self) -> BackendErrorKind {
		match self {
			Self::Timeout { .. } => BackendErrorKind::Timeout,
			Self::Unavailable { .. } => BackendErrorKind::Unavailable,
			Self::MalformedResponse { .. } => BackendErrorKind::MalformedResponse,
		}
	}

	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Unavailable { .. })
	}

	pub fn to_descriptor(&self) -> ErrorDescriptor {
		let message = match self {
			Self::Timeout { message }
			| Self::Unavailable { message }
			| Self::MalformedResponse { message } => message.clone(),
		};

		ErrorDescriptor { kind: self.kind(), message }
	}
}

impl From<weave_storage::Error> for BackendError {
	fn from(err: weave_storage::Error) -> Self {
		let message = err.to_string();

		if err.is_unavailable() {
			Self::Unavailable { message }
		} else {
			Self::MalformedResponse { message }
		}
	}
}

impl From<weave_providers::Error> for BackendError {
	fn from(err: weave_providers::Error) -> Self {
		let message = err.to_string();

		if err.is_timeout() {
			Self::Timeout { message }
		} else if err.is_transport() {
			Self::Unavailable { message }
		} else {
			Self::MalformedResponse { message }
		}
	}
}

pub trait RelationalBackend
where
	Self: Send + Sync,
{
	fn execute<'a>(
		&'a self,
		query: &'a RelationalQuery,
		max_rows: usize,
	) -> BoxFuture<'a, BackendResult<TabularResult>>;
}

pub trait VectorBackend
where
	Self: Send + Sync,
{
	fn search<'a>(
		&'a self,
		embedding: &'a [f32],
		limit: usize,
	) -> BoxFuture<'a, BackendResult<Vec<SearchResult>>>;
}

pub trait KeywordBackend
where
	Self: Send + Sync,
{
	/// Scores must already be normalized into `[0, 1]`.
	fn search<'a>(
		&'a self,
		text: &'a str,
		limit: usize,
	) -> BoxFuture<'a, BackendResult<Vec<SearchResult>>>;
}

pub trait GraphBackend
where
	Self: Send + Sync,
{
	fn traverse<'a>(
		&'a self,
		seeds: &'a [String],
		depth: u32,
		limit: usize,
	) -> BoxFuture<'a, BackendResult<Vec<SearchResult>>>;

	fn adjacency<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, BackendResult<GraphAdjacency>>;
}

pub trait Embedder
where
	Self: Send + Sync,
{
	fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, BackendResult<Vec<f32>>>;
}

pub trait Classifier
where
	Self: Send + Sync,
{
	fn classify<'a>(&'a self, text: &'a str) -> BoxFuture<'a, BackendResult<ClassifiedQuery>>;
}

pub trait QueryGenerator
where
	Self: Send + Sync,
{
	fn generate<'a>(
		&'a self,
		text: &'a str,
		schema_hint: Option<&'a str>,
	) -> BoxFuture<'a, BackendResult<String>>;
}

#[derive(Clone)]
pub struct Backends {
	pub relational: Arc<dyn RelationalBackend>,
	pub vector: Arc<dyn VectorBackend>,
	pub keyword: Arc<dyn KeywordBackend>,
	pub graph: Arc<dyn GraphBackend>,
	pub embedder: Arc<dyn Embedder>,
	pub classifier: Arc<dyn Classifier>,
	pub query_generator: Arc<dyn QueryGenerator>,
}

/// Production adapters over Postgres, Qdrant and the HTTP providers.
pub struct DefaultBackends {
	cfg: Arc<Config>,
	db: Db,
	qdrant: QdrantStore,
	graph: GraphStore,
}
impl DefaultBackends {
	pub async fn connect(cfg: Arc<Config>) -> weave_storage::Result<Self> {
		let db = Db::connect(&cfg.storage.postgres).await?;
		let qdrant = QdrantStore::new(&cfg.storage.qdrant)?;
		let graph = GraphStore::new(db.pool.clone(), &cfg.storage.graph);

		Ok(Self { cfg, db, qdrant, graph })
	}

	pub fn into_backends(self) -> Backends {
		let shared = Arc::new(self);

		Backends {
			relational: shared.clone(),
			vector: shared.clone(),
			keyword: shared.clone(),
			graph: shared.clone(),
			embedder: shared.clone(),
			classifier: shared.clone(),
			query_generator: shared,
		}
	}
}

impl RelationalBackend for DefaultBackends {
	fn execute<'a>(
		&'a self,
		query: &'a RelationalQuery,
		max_rows: usize,
	) -> BoxFuture<'a, BackendResult<TabularResult>> {
		Box::pin(async move { Ok(relational::execute(&self.db.pool, query, max_rows).await?) })
	}
}

impl VectorBackend for DefaultBackends {
	fn search<'a>(
		&'a self,
		embedding: &'a [f32],
		limit: usize,
	) -> BoxFuture<'a, BackendResult<Vec<SearchResult>>> {
		Box::pin(async move { Ok(self.qdrant.search_dense(embedding.to_vec(), limit).await?) })
	}
}

impl KeywordBackend for DefaultBackends {
	fn search<'a>(
		&'a self,
		text: &'a str,
		limit: usize,
	) -> BoxFuture<'a, BackendResult<Vec<SearchResult>>> {
		let scale = self.cfg.thresholds.keyword_score_scale;

		Box::pin(async move { Ok(self.qdrant.search_bm25(text, limit, scale).await?) })
	}
}

impl GraphBackend for DefaultBackends {
	fn traverse<'a>(
		&'a self,
		seeds: &'a [String],
		depth: u32,
		limit: usize,
	) -> BoxFuture<'a, BackendResult<Vec<SearchResult>>> {
		Box::pin(async move { Ok(self.graph.traverse(seeds, depth, limit).await?) })
	}

	fn adjacency<'a>(&'a self, ids: &'a [String]) -> BoxFuture<'a, BackendResult<GraphAdjacency>> {
		Box::pin(async move { Ok(self.graph.adjacency(ids).await?) })
	}
}

impl Embedder for DefaultBackends {
	fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, BackendResult<Vec<f32>>> {
		Box::pin(async move {
			let texts = [text.to_string()];
			let mut vectors = embedding::embed(&self.cfg.providers.embedding, &texts).await?;

			vectors.pop().ok_or_else(|| BackendError::MalformedResponse {
				message: "Embedding provider returned no vectors.".to_string(),
			})
		})
	}
}

impl Classifier for DefaultBackends {
	fn classify<'a>(&'a self, text: &'a str) -> BoxFuture<'a, BackendResult<ClassifiedQuery>> {
		Box::pin(async move { Ok(classifier::classify(&self.cfg.providers.classifier, text).await?) })
	}
}

impl QueryGenerator for DefaultBackends {
	fn generate<'a>(
		&'a self,
		text: &'a str,
		schema_hint: Option<&'a str>,
	) -> BoxFuture<'a, BackendResult<String>> {
		Box::pin(async move {
			Ok(query_gen::generate(&self.cfg.providers.query_generator, text, schema_hint).await?)
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn only_unavailable_is_retryable() {
		assert!(BackendError::Unavailable { message: String::new() }.is_retryable());
		assert!(!BackendError::Timeout { message: String::new() }.is_retryable());
		assert!(!BackendError::MalformedResponse { message: String::new() }.is_retryable());
	}

	#[test]
	fn descriptor_keeps_kind_and_message() {
		let descriptor =
			BackendError::from_kind(BackendErrorKind::Timeout, "slow").to_descriptor();

		assert_eq!(descriptor.kind, BackendErrorKind::Timeout);
		assert_eq!(descriptor.message, "slow");
	}
}
