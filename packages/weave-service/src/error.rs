pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Configuration error: {message}")]
	Configuration { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<weave_domain::Error> for Error {
	fn from(err: weave_domain::Error) -> Self {
		match err {
			weave_domain::Error::Configuration { message } => Self::Configuration { message },
		}
	}
}

impl From<weave_storage::Error> for Error {
	fn from(err: weave_storage::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}
