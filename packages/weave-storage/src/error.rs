#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Sqlx(#[from] sqlx::Error),
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),
	#[error(transparent)]
	Qdrant(#[from] Box<qdrant_client::QdrantError>),
}
impl From<qdrant_client::QdrantError> for Error {
	fn from(err: qdrant_client::QdrantError) -> Self {
		Self::Qdrant(Box::new(err))
	}
}
impl Error {
	/// Connection-level failures the orchestrator may retry.
	pub fn is_unavailable(&self) -> bool {
		match self {
			Self::Sqlx(err) => matches!(
				err,
				sqlx::Error::Io(_)
					| sqlx::Error::Tls(_)
					| sqlx::Error::PoolTimedOut
					| sqlx::Error::PoolClosed
					| sqlx::Error::WorkerCrashed
			),
			Self::Qdrant(_) => true,
			Self::InvalidArgument(_) => false,
		}
	}
}
