pub mod confidence;
pub mod cross_validation;
pub mod fusion;
pub mod keywords;
pub mod loader;
pub mod plan;
pub mod query;
pub mod query_guard;
pub mod ranking;
pub mod resolver;
pub mod result;

mod error;

pub use error::{Error, Result};
pub use plan::{
	BackendKind, ExecutionMode, GraphStrategy, KeywordMode, ResultLimits, SearchPlan, Stage,
};
pub use query::{ClassifiedQuery, IntentKind, IntentSubtype, RankingKind, SubQuery, SubQueryGraph};
pub use result::{
	BackendErrorKind, ErrorDescriptor, MergedContext, RankedList, SearchResult, SourceDescriptor,
	TabularResult,
};
