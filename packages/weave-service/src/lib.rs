pub mod adapters;
pub mod orchestrator;
pub mod pool;
pub mod retry;

mod error;

pub use adapters::{
	BackendError, BackendResult, Backends, BoxFuture, Classifier, DefaultBackends, Embedder,
	GraphBackend, KeywordBackend, QueryGenerator, RelationalBackend, VectorBackend,
};
pub use error::{Error, Result};
pub use orchestrator::Orchestrator;

use std::{sync::Arc, time::Duration};

use tokio::time;

use weave_config::Config;
use weave_domain::{ClassifiedQuery, MergedContext};

pub struct WeaveService {
	pub cfg: Arc<Config>,
	pub orchestrator: Orchestrator,
	classifier: Arc<dyn Classifier>,
}
impl WeaveService {
	pub async fn new(cfg: Config) -> Result<Self> {
		let cfg = Arc::new(cfg);
		let backends = DefaultBackends::connect(cfg.clone()).await?.into_backends();

		Ok(Self::with_backends(cfg, backends))
	}

	pub fn with_backends(cfg: Arc<Config>, backends: Backends) -> Self {
		let classifier = backends.classifier.clone();
		let orchestrator = Orchestrator::new(cfg.clone(), backends);

		Self { cfg, orchestrator, classifier }
	}

	pub async fn orchestrate(&self, query: ClassifiedQuery) -> Result<MergedContext> {
		self.orchestrator.orchestrate(query).await
	}

	/// Classifies `text`, falling back to a hybrid plan when the classifier fails or is slow.
	pub async fn classify(&self, text: &str) -> ClassifiedQuery {
		let timeout = Duration::from_millis(self.cfg.orchestrator.classify_timeout_ms);

		match time::timeout(timeout, self.classifier.classify(text)).await {
			Ok(Ok(query)) => match query.validate() {
				Ok(_) => query,
				Err(err) => {
					tracing::warn!(
						error = %err,
						"Classification is inconsistent. Using hybrid fallback."
					);

					ClassifiedQuery::fallback(text)
				},
			},
			Ok(Err(err)) => {
				tracing::warn!(
					error_kind = err.kind().as_str(),
					error = %err,
					"Classification failed. Using hybrid fallback."
				);

				ClassifiedQuery::fallback(text)
			},
			Err(_) => {
				tracing::warn!(
					timeout_ms = self.cfg.orchestrator.classify_timeout_ms,
					"Classification timed out. Using hybrid fallback."
				);

				ClassifiedQuery::fallback(text)
			},
		}
	}

	/// Classifies and orchestrates a raw question, producing the context for answer generation.
	pub async fn answer_context(&self, text: &str) -> Result<MergedContext> {
		let query = self.classify(text).await;

		self.orchestrate(query).await
	}
}
