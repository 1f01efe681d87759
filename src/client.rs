//! Outbound LTI Advantage service clients.
//!
//! AGS and NRPS calls authenticate with client-credentials access tokens
//! obtained through signed JWT assertions, and share one retry discipline for
//! transient upstream failures.

pub mod ags;
pub mod nrps;
pub mod retry;
pub mod token;

// crates.io
use reqwest::RequestBuilder;
// self
use crate::{_prelude::*, config::RetryPolicy, jwks::classify};
use self::retry::ServiceRetry;

pub use self::{
	ags::{ActivityProgress, GradingProgress, Score, ScorePublisher},
	nrps::{Member, RosterClient},
	token::AccessTokenProvider,
};

/// Send a request, retrying timeouts and 5xx responses under the policy.
///
/// 4xx responses are terminal; the body is captured for diagnostics because
/// platforms put the useful detail there.
pub(crate) async fn send_with_retry(
	policy: &RetryPolicy,
	request: RequestBuilder,
	url: &str,
) -> Result<reqwest::Response> {
	let mut retry = ServiceRetry::begin(policy);
	let mut last_err;

	loop {
		let Some(timeout) = retry.attempt_timeout() else {
			return Err(Error::UpstreamTimeout { url: url.to_string() });
		};
		let attempt = request
			.try_clone()
			.ok_or_else(|| Error::Persistence("Request body is not replayable.".into()))?;

		match attempt.timeout(timeout).send().await {
			Ok(response) if response.status().is_success() => return Ok(response),
			Ok(response) => {
				let status = response.status().as_u16();
				let body = response.text().await.ok().filter(|body| !body.is_empty());
				let err = Error::UpstreamStatus { status, url: url.to_string(), body };

				if !err.is_retryable() {
					return Err(err);
				}

				last_err = err;
			},
			Err(err) => {
				let err = classify(err, url);

				if !err.is_retryable() {
					return Err(err);
				}

				last_err = err;
			},
		}

		if !retry.backoff_and_wait().await {
			return Err(last_err);
		}

		tracing::debug!(url, attempt = retry.attempts_used(), "retrying upstream request");
	}
}
