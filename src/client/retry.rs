//! Attempt budgeting for outbound service calls.

// crates.io
use tokio::time;
// self
use crate::{_prelude::*, config::RetryPolicy};

/// Tracks attempts and wall-clock budget for one logical service call.
///
/// The overall deadline bounds the call regardless of how many retries the
/// policy nominally allows; each attempt gets at most the per-attempt timeout
/// and never more than the remaining budget.
#[derive(Debug)]
pub struct ServiceRetry<'a> {
	policy: &'a RetryPolicy,
	deadline: Instant,
	retries_used: u32,
}
impl<'a> ServiceRetry<'a> {
	/// Start budgeting under the given policy.
	pub fn begin(policy: &'a RetryPolicy) -> Self {
		Self { policy, deadline: Instant::now() + policy.deadline, retries_used: 0 }
	}

	/// Timeout for the next attempt, or `None` when the budget is spent.
	pub fn attempt_timeout(&self) -> Option<Duration> {
		let remaining = self.deadline.saturating_duration_since(Instant::now());
		let timeout = remaining.min(self.policy.attempt_timeout);

		if timeout.is_zero() { None } else { Some(timeout) }
	}

	/// Number of retries consumed so far.
	pub fn attempts_used(&self) -> u32 {
		self.retries_used
	}

	/// Sleep out the backoff before the next attempt.
	///
	/// Returns `false` when the retry count is exhausted; the delay is clamped
	/// to the remaining deadline so the budget cannot be slept past.
	pub async fn backoff_and_wait(&mut self) -> bool {
		if self.retries_used >= self.policy.max_retries {
			tracing::debug!(retries = self.retries_used, "retry count exhausted");

			return false;
		}

		let delay = self
			.policy
			.compute_backoff(self.retries_used)
			.min(self.deadline.saturating_duration_since(Instant::now()));

		self.retries_used += 1;

		if !delay.is_zero() {
			time::sleep(delay).await;
		}

		true
	}
}
