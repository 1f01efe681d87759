//! Tool configuration and retry policy.
//!
//! Defaults are conservative and line up with the LTI security framework:
//! login state lives for ten minutes, platform JWKS documents are cached for
//! an hour, and rotated signing keys stay verifiable for a day.

// std
use std::cell::RefCell;
// crates.io
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use url::Url;
// self
use crate::_prelude::*;

thread_local! {
	static SMALL_RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

/// Default lifetime of a login state record.
pub const DEFAULT_STATE_TTL: Duration = Duration::from_secs(10 * 60);
/// Default platform JWKS cache lifetime.
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(60 * 60);
/// Default overlap window during which a rotated signing key stays published.
pub const DEFAULT_KEY_OVERLAP: Duration = Duration::from_secs(24 * 60 * 60);
/// Default clock-skew tolerance applied to token timestamps.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(5 * 60);
/// Default cooldown between kid-miss JWKS refreshes for one registration.
pub const DEFAULT_KID_MISS_COOLDOWN: Duration = Duration::from_secs(30);

/// Supported jitter strategies for retry policies.
#[derive(Clone, Debug, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterStrategy {
	/// No jitter; deterministic backoff schedule.
	None,
	/// Full jitter; randomize delay between 80% and 100% of the current backoff.
	#[default]
	Full,
	/// Decorrelated jitter per AWS architecture guidance.
	Decorrelated,
}

/// Retry configuration for outbound HTTP calls (token endpoint, JWKS, AGS, NRPS).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Maximum number of retry attempts to perform after the initial request.
	pub max_retries: u32,
	/// Timeout applied to each individual HTTP attempt.
	pub attempt_timeout: Duration,
	/// Initial delay before retrying after a failure.
	pub initial_backoff: Duration,
	/// Upper bound applied to exponential backoff growth.
	pub max_backoff: Duration,
	/// Overall deadline that bounds the entire retry sequence.
	pub deadline: Duration,
	/// Strategy used to randomize the computed backoff.
	#[serde(default)]
	pub jitter: JitterStrategy,
}
impl RetryPolicy {
	/// Validate invariants for retry configuration.
	pub fn validate(&self) -> Result<()> {
		if self.attempt_timeout < Duration::from_millis(100) {
			return Err(Error::Validation {
				field: "retry_policy.attempt_timeout",
				reason: "Must be at least 100 ms.".into(),
			});
		}
		if self.initial_backoff.is_zero() {
			return Err(Error::Validation {
				field: "retry_policy.initial_backoff",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.max_backoff < self.initial_backoff {
			return Err(Error::Validation {
				field: "retry_policy.max_backoff",
				reason: "Must be greater than or equal to initial_backoff.".into(),
			});
		}
		if self.deadline < self.attempt_timeout {
			return Err(Error::Validation {
				field: "retry_policy.deadline",
				reason: "Must be greater than or equal to attempt_timeout.".into(),
			});
		}

		Ok(())
	}

	/// Exponential backoff with jitter for the given zero-based attempt.
	pub fn compute_backoff(&self, attempt: u32) -> Duration {
		let exponent = attempt.min(32);
		let base = self.initial_backoff.mul_f64(2f64.powi(exponent as i32));
		let bounded = base.min(self.max_backoff).max(self.initial_backoff);

		self.apply_jitter(bounded, attempt)
	}

	fn apply_jitter(&self, bounded: Duration, attempt: u32) -> Duration {
		match self.jitter {
			JitterStrategy::None => bounded,
			JitterStrategy::Full => {
				let lower = bounded.mul_f64(0.8).max(self.initial_backoff);
				let upper = bounded.min(self.max_backoff);

				random_within(lower, upper)
			},
			JitterStrategy::Decorrelated => {
				let prev = if attempt == 0 { self.initial_backoff } else { bounded };
				let ceiling = self.max_backoff.min(prev.mul_f64(3.0));

				random_within(self.initial_backoff, ceiling.max(self.initial_backoff))
			},
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_retries: 2,
			attempt_timeout: Duration::from_secs(5),
			initial_backoff: Duration::from_millis(250),
			max_backoff: Duration::from_secs(2),
			deadline: Duration::from_secs(15),
			jitter: JitterStrategy::Full,
		}
	}
}

/// Top-level configuration for an [`LtiTool`](crate::LtiTool) instance.
#[derive(Clone, Debug)]
pub struct ToolConfig {
	/// Public base URL of the tool; tenant redirect URIs are derived from it.
	pub redirect_base: Url,
	/// Lifetime of a login state record before it is rejected as expired.
	pub state_ttl: Duration,
	/// Cache lifetime for platform JWKS documents.
	pub jwks_ttl: Duration,
	/// Cooldown between JWKS refreshes triggered by an unknown `kid`.
	pub kid_miss_cooldown: Duration,
	/// Window during which a rotated signing key remains published and usable.
	pub key_overlap: Duration,
	/// Tolerance applied when checking `exp`/`iat` on inbound tokens.
	pub clock_skew: Duration,
	/// Retry policy for outbound calls to the platform.
	pub retry_policy: RetryPolicy,
}
impl ToolConfig {
	/// Construct a configuration with defaults for the given public base URL.
	pub fn new(redirect_base: impl AsRef<str>) -> Result<Self> {
		let redirect_base = Url::parse(redirect_base.as_ref())?;

		Ok(Self {
			redirect_base,
			state_ttl: DEFAULT_STATE_TTL,
			jwks_ttl: DEFAULT_JWKS_TTL,
			kid_miss_cooldown: DEFAULT_KID_MISS_COOLDOWN,
			key_overlap: DEFAULT_KEY_OVERLAP,
			clock_skew: DEFAULT_CLOCK_SKEW,
			retry_policy: RetryPolicy::default(),
		})
	}

	/// Tenant-specific redirect URI the platform posts the id_token back to.
	pub fn redirect_uri(&self, tenant_id: &str) -> Result<Url> {
		Ok(self.redirect_base.join(&format!("{tenant_id}/lti/callback"))?)
	}

	/// Validate the configuration against the documented constraints.
	pub fn validate(&self) -> Result<()> {
		if self.redirect_base.cannot_be_a_base() {
			return Err(Error::Validation {
				field: "redirect_base",
				reason: "Must be an absolute http(s) URL.".into(),
			});
		}
		if self.state_ttl < Duration::from_secs(30) {
			return Err(Error::Validation {
				field: "state_ttl",
				reason: "Must be at least 30 seconds.".into(),
			});
		}
		if self.jwks_ttl < Duration::from_secs(60) {
			return Err(Error::Validation {
				field: "jwks_ttl",
				reason: "Must be at least 60 seconds.".into(),
			});
		}
		if self.key_overlap < self.jwks_ttl {
			return Err(Error::Validation {
				field: "key_overlap",
				reason: "Must cover at least one JWKS cache lifetime.".into(),
			});
		}
		if self.clock_skew > Duration::from_secs(10 * 60) {
			return Err(Error::Validation {
				field: "clock_skew",
				reason: "Must be 10 minutes or less.".into(),
			});
		}

		self.retry_policy.validate()
	}
}

fn random_within(min: Duration, max: Duration) -> Duration {
	if max <= min {
		return max;
	}
	SMALL_RNG.with(|cell| {
		let mut rng = cell.borrow_mut();
		let nanos = max.as_nanos() - min.as_nanos();
		let jitter = rng.random_range(0..=nanos.min(u64::MAX as u128));

		min + Duration::from_nanos(jitter as u64)
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	fn config() -> ToolConfig {
		ToolConfig::new("https://tool.example/").expect("config")
	}

	#[test]
	fn defaults_pass_validation() {
		assert!(config().validate().is_ok());
	}

	#[test]
	fn redirect_uri_is_tenant_scoped() {
		let uri = config().redirect_uri("acme").expect("redirect uri");

		assert_eq!(uri.as_str(), "https://tool.example/acme/lti/callback");
	}

	#[test]
	fn short_state_ttl_is_rejected() {
		let mut config = config();

		config.state_ttl = Duration::from_secs(5);

		assert!(matches!(
			config.validate(),
			Err(Error::Validation { field: "state_ttl", .. })
		));
	}

	#[test]
	fn backoff_grows_and_stays_bounded() {
		let policy = RetryPolicy { jitter: JitterStrategy::None, ..RetryPolicy::default() };

		assert_eq!(policy.compute_backoff(0), policy.initial_backoff);
		assert_eq!(policy.compute_backoff(1), policy.initial_backoff * 2);
		assert_eq!(policy.compute_backoff(30), policy.max_backoff);
	}

	#[test]
	fn zero_initial_backoff_is_rejected() {
		let policy = RetryPolicy { initial_backoff: Duration::ZERO, ..RetryPolicy::default() };

		assert!(policy.validate().is_err());
	}
}
