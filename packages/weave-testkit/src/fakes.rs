//! Scripted implementations of the service's backend traits.
//!
//! Each fake answers with a fixed value or a fixed failure, optionally after a delay, counts its
//! calls, and can write `start:<label>` / `finish:<label>` entries to a shared [`EventLog`].

use std::{
	sync::{
		Arc, Mutex,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use weave_domain::{
	BackendErrorKind, ClassifiedQuery, SearchResult, TabularResult,
	cross_validation::GraphAdjacency, loader::RelationalQuery,
};
use weave_service::{
	BackendError, BackendResult, Backends, BoxFuture, Classifier, Embedder, GraphBackend,
	KeywordBackend, QueryGenerator, RelationalBackend, VectorBackend,
};

#[derive(Clone, Default)]
pub struct EventLog {
	events: Arc<Mutex<Vec<String>>>,
}
impl EventLog {
	pub fn record(&self, event: impl Into<String>) {
		self.events.lock().unwrap_or_else(|err| err.into_inner()).push(event.into());
	}

	pub fn snapshot(&self) -> Vec<String> {
		self.events.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	pub fn position(&self, event: &str) -> Option<usize> {
		self.snapshot().iter().position(|recorded| recorded == event)
	}
}

/// Shared behaviour behind every fake.
#[derive(Clone)]
pub struct Script<T> {
	outcome: Result<T, BackendErrorKind>,
	delay: Option<Duration>,
	calls: Arc<AtomicUsize>,
	log: Option<EventLog>,
}
impl<T> Script<T>
where
	T: Clone + Send + Sync + 'static,
{
	pub fn ok(value: T) -> Self {
		Self { outcome: Ok(value), delay: None, calls: Arc::new(AtomicUsize::new(0)), log: None }
	}

	pub fn failing(kind: BackendErrorKind) -> Self {
		Self { outcome: Err(kind), delay: None, calls: Arc::new(AtomicUsize::new(0)), log: None }
	}

	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);

		self
	}

	pub fn with_log(mut self, log: EventLog) -> Self {
		self.log = Some(log);

		self
	}

	/// Handle that keeps counting after the script is moved into a fake.
	pub fn call_counter(&self) -> Arc<AtomicUsize> {
		self.calls.clone()
	}

	async fn play(&self, label: String) -> BackendResult<T> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		if let Some(log) = &self.log {
			log.record(format!("start:{label}"));
		}
		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}
		if let Some(log) = &self.log {
			log.record(format!("finish:{label}"));
		}

		match &self.outcome {
			Ok(value) => Ok(value.clone()),
			Err(kind) => Err(BackendError::from_kind(*kind, format!("scripted {label} failure"))),
		}
	}
}

pub struct FakeRelational(pub Script<TabularResult>);
impl RelationalBackend for FakeRelational {
	fn execute<'a>(
		&'a self,
		query: &'a RelationalQuery,
		_max_rows: usize,
	) -> BoxFuture<'a, BackendResult<TabularResult>> {
		Box::pin(self.0.play(format!("relational:{}", query.sql)))
	}
}

pub struct FakeVector(pub Script<Vec<SearchResult>>);
impl VectorBackend for FakeVector {
	fn search<'a>(
		&'a self,
		_embedding: &'a [f32],
		_limit: usize,
	) -> BoxFuture<'a, BackendResult<Vec<SearchResult>>> {
		Box::pin(self.0.play("vector".to_string()))
	}
}

pub struct FakeKeyword(pub Script<Vec<SearchResult>>);
impl KeywordBackend for FakeKeyword {
	fn search<'a>(
		&'a self,
		text: &'a str,
		_limit: usize,
	) -> BoxFuture<'a, BackendResult<Vec<SearchResult>>> {
		Box::pin(self.0.play(format!("keyword:{text}")))
	}
}

pub struct FakeGraph {
	pub traverse: Script<Vec<SearchResult>>,
	pub adjacency: Script<GraphAdjacency>,
}
impl GraphBackend for FakeGraph {
	fn traverse<'a>(
		&'a self,
		_seeds: &'a [String],
		_depth: u32,
		_limit: usize,
	) -> BoxFuture<'a, BackendResult<Vec<SearchResult>>> {
		Box::pin(self.traverse.play("graph:traverse".to_string()))
	}

	fn adjacency<'a>(&'a self, _ids: &'a [String]) -> BoxFuture<'a, BackendResult<GraphAdjacency>> {
		Box::pin(self.adjacency.play("graph:adjacency".to_string()))
	}
}

pub struct FakeEmbedder(pub Script<Vec<f32>>);
impl Embedder for FakeEmbedder {
	fn embed<'a>(&'a self, text: &'a str) -> BoxFuture<'a, BackendResult<Vec<f32>>> {
		Box::pin(self.0.play(format!("embed:{text}")))
	}
}

pub struct FakeClassifier(pub Script<ClassifiedQuery>);
impl Classifier for FakeClassifier {
	fn classify<'a>(&'a self, text: &'a str) -> BoxFuture<'a, BackendResult<ClassifiedQuery>> {
		Box::pin(self.0.play(format!("classify:{text}")))
	}
}

/// Answers every question with `SELECT '<question>' AS label`, or with the scripted failure.
pub struct FakeQueryGenerator(pub Script<()>);
impl QueryGenerator for FakeQueryGenerator {
	fn generate<'a>(
		&'a self,
		text: &'a str,
		_schema_hint: Option<&'a str>,
	) -> BoxFuture<'a, BackendResult<String>> {
		Box::pin(async move {
			self.0.play(format!("generate:{text}")).await?;

			Ok(format!("SELECT '{}' AS label", text.replace('\'', "''")))
		})
	}
}

/// Builder over a full set of fakes. Every backend succeeds with empty output by default.
pub struct FakeBackends {
	pub relational: Script<TabularResult>,
	pub vector: Script<Vec<SearchResult>>,
	pub keyword: Script<Vec<SearchResult>>,
	pub traverse: Script<Vec<SearchResult>>,
	pub adjacency: Script<GraphAdjacency>,
	pub embedder: Script<Vec<f32>>,
	pub classifier: Script<ClassifiedQuery>,
	pub query_generator: Script<()>,
}
impl FakeBackends {
	pub fn build(self) -> Backends {
		Backends {
			relational: Arc::new(FakeRelational(self.relational)),
			vector: Arc::new(FakeVector(self.vector)),
			keyword: Arc::new(FakeKeyword(self.keyword)),
			graph: Arc::new(FakeGraph { traverse: self.traverse, adjacency: self.adjacency }),
			embedder: Arc::new(FakeEmbedder(self.embedder)),
			classifier: Arc::new(FakeClassifier(self.classifier)),
			query_generator: Arc::new(FakeQueryGenerator(self.query_generator)),
		}
	}
}
impl Default for FakeBackends {
	fn default() -> Self {
		Self {
			relational: Script::ok(TabularResult::new(Vec::new(), Vec::new(), 1.0)),
			vector: Script::ok(Vec::new()),
			keyword: Script::ok(Vec::new()),
			traverse: Script::ok(Vec::new()),
			adjacency: Script::ok(GraphAdjacency::default()),
			embedder: Script::ok(vec![0.0; 4]),
			classifier: Script::failing(BackendErrorKind::Unavailable),
			query_generator: Script::ok(()),
		}
	}
}

/// `count` results with descending scores starting at `top`.
pub fn results(prefix: &str, entity_type: &str, count: usize, top: f64) -> Vec<SearchResult> {
	(0..count)
		.map(|i| {
			SearchResult::new(
				format!("{prefix}{i}"),
				format!("{prefix} {i}"),
				entity_type,
				top - i as f64 * 0.05,
			)
		})
		.collect()
}
