//! Injected time and randomness seams.
//!
//! The tool is constructed with explicit [`Clock`] and [`RandomSource`]
//! implementations so tests can pin time and observe token generation
//! deterministically; production code uses [`SystemClock`] and [`OsRandom`].

// crates.io
use base64::prelude::*;
use rand::RngCore;
// self
use crate::_prelude::*;

/// Source of wall-clock time.
pub trait Clock: Send + Sync + std::fmt::Debug {
	/// Current UTC time.
	fn now(&self) -> DateTime<Utc>;
}

/// System wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Source of cryptographically secure random bytes.
pub trait RandomSource: Send + Sync + std::fmt::Debug {
	/// Fill the buffer with random bytes.
	fn fill(&self, buf: &mut [u8]);
}

/// Operating-system CSPRNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandom;
impl RandomSource for OsRandom {
	fn fill(&self, buf: &mut [u8]) {
		rand::rng().fill_bytes(buf);
	}
}

/// Generate an opaque 256-bit token, base64url-encoded without padding.
///
/// Used for login `state` values, nonces, and client-assertion `jti` values.
pub fn generate_token(random: &dyn RandomSource) -> String {
	let mut bytes = [0u8; 32];

	random.fill(&mut bytes);

	BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn tokens_are_unique_and_url_safe() {
		let first = generate_token(&OsRandom);
		let second = generate_token(&OsRandom);

		// 32 bytes base64url without padding.
		assert_eq!(first.len(), 43);
		assert_ne!(first, second);
		assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
	}
}
