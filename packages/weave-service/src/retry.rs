use std::{future::Future, time::Duration};

use tokio::time;

use crate::adapters::{BackendError, BackendResult};

/// Per-call bound and retry budget applied to every adapter call.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
	pub timeout: Duration,
	pub max_retries: u32,
	pub backoff: Duration,
}
impl RetryPolicy {
	pub fn from_config(cfg: &weave_config::Orchestrator) -> Self {
		Self {
			timeout: Duration::from_millis(cfg.backend_timeout_ms),
			max_retries: cfg.max_retries,
			backoff: Duration::from_millis(cfg.retry_backoff_ms),
		}
	}
}

/// Runs `call` under the per-call timeout. Only `Unavailable` failures are retried, with a
/// linearly growing pause between attempts.
pub async fn call_with_retry<T, F, Fut>(
	policy: &RetryPolicy,
	label: &str,
	mut call: F,
) -> BackendResult<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = BackendResult<T>>,
{
	let mut attempt = 0;

	loop {
		let outcome = match time::timeout(policy.timeout, call()).await {
			Ok(outcome) => outcome,
			Err(_) => Err(BackendError::Timeout {
				message: format!(
					"{label} did not answer within {} ms.",
					policy.timeout.as_millis()
				),
			}),
		};

		match outcome {
			Err(err) if err.is_retryable() && attempt < policy.max_retries => {
				attempt += 1;

				tracing::debug!(backend = label, attempt, error = %err, "Retrying backend call.");

				time::sleep(policy.backoff.saturating_mul(attempt)).await;
			},
			outcome => return outcome,
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	};

	use super::*;

	fn policy(max_retries: u32) -> RetryPolicy {
		RetryPolicy {
			timeout: Duration::from_millis(50),
			max_retries,
			backoff: Duration::from_millis(1),
		}
	}

	#[tokio::test]
	async fn unavailable_is_retried_until_success() {
		let calls = Arc::new(AtomicU32::new(0));
		let outcome = call_with_retry(&policy(2), "vector", || {
			let calls = calls.clone();

			async move {
				if calls.fetch_add(1, Ordering::SeqCst) == 0 {
					Err(BackendError::Unavailable { message: "refused".to_string() })
				} else {
					Ok(7)
				}
			}
		})
		.await;

		assert_eq!(outcome.expect("second attempt succeeds"), 7);
		assert_eq!(calls.load(Ordering::SeqCst), 2);
	}

	#[tokio::test]
	async fn malformed_responses_are_not_retried() {
		let calls = Arc::new(AtomicU32::new(0));
		let outcome: BackendResult<()> = call_with_retry(&policy(3), "graph", || {
			let calls = calls.clone();

			async move {
				calls.fetch_add(1, Ordering::SeqCst);

				Err(BackendError::MalformedResponse { message: "bad".to_string() })
			}
		})
		.await;

		assert!(matches!(outcome, Err(BackendError::MalformedResponse { .. })));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn slow_calls_time_out() {
		let outcome: BackendResult<()> = call_with_retry(&policy(0), "relational", || async {
			time::sleep(Duration::from_millis(500)).await;

			Ok(())
		})
		.await;

		assert!(matches!(outcome, Err(BackendError::Timeout { .. })));
	}
}
