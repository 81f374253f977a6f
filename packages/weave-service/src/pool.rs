use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::Semaphore, task::JoinHandle, time};

use crate::adapters::{BackendError, BackendResult};

/// Bounded set of concurrent tasks shared by every execution mode.
///
/// A task waits for a permit, then runs under the task timeout. A task that exceeds the timeout
/// is dropped, which cancels whatever backend call it was awaiting.
#[derive(Clone)]
pub struct WorkerPool {
	permits: Arc<Semaphore>,
	task_timeout: Duration,
}
impl WorkerPool {
	pub fn new(max_workers: usize, task_timeout: Duration) -> Self {
		Self { permits: Arc::new(Semaphore::new(max_workers.max(1))), task_timeout }
	}

	pub fn from_config(cfg: &weave_config::Orchestrator) -> Self {
		Self::new(cfg.max_workers, Duration::from_millis(cfg.task_timeout_ms))
	}

	pub fn spawn<F, T>(&self, label: &'static str, task: F) -> JoinHandle<BackendResult<T>>
	where
		F: Future<Output = T> + Send + 'static,
		T: Send + 'static,
	{
		let permits = self.permits.clone();
		let task_timeout = self.task_timeout;

		tokio::spawn(async move {
			let _permit = permits.acquire_owned().await.map_err(|_| BackendError::Unavailable {
				message: "Worker pool is closed.".to_string(),
			})?;

			time::timeout(task_timeout, task).await.map_err(|_| {
				tracing::warn!(
					task = label,
					timeout_ms = task_timeout.as_millis() as u64,
					"Task timed out."
				);

				BackendError::Timeout {
					message: format!(
						"{label} task exceeded {} ms.",
						task_timeout.as_millis()
					),
				}
			})
		})
	}

	/// Awaits a spawned task, folding a panic or abort into `Unavailable`.
	pub async fn join<T>(handle: JoinHandle<BackendResult<T>>) -> BackendResult<T> {
		match handle.await {
			Ok(outcome) => outcome,
			Err(err) => Err(BackendError::Unavailable { message: format!("Task failed: {err}.") }),
		}
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use super::*;

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrency_never_exceeds_worker_count() {
		let pool = WorkerPool::new(2, Duration::from_secs(5));
		let running = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));
		let handles: Vec<_> = (0..6)
			.map(|_| {
				let running = running.clone();
				let peak = peak.clone();

				pool.spawn("probe", async move {
					let now = running.fetch_add(1, Ordering::SeqCst) + 1;

					peak.fetch_max(now, Ordering::SeqCst);
					time::sleep(Duration::from_millis(20)).await;
					running.fetch_sub(1, Ordering::SeqCst);
				})
			})
			.collect();

		for handle in handles {
			WorkerPool::join(handle).await.expect("task should finish");
		}

		assert!(peak.load(Ordering::SeqCst) <= 2);
	}

	#[tokio::test]
	async fn overlong_tasks_become_timeouts() {
		let pool = WorkerPool::new(1, Duration::from_millis(20));
		let handle = pool.spawn("slow", time::sleep(Duration::from_secs(5)));

		assert!(matches!(WorkerPool::join(handle).await, Err(BackendError::Timeout { .. })));
	}
}
