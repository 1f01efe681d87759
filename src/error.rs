//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the LTI integration layer.
///
/// Security-relevant rejections (`InvalidState`, `NonceReplay`, `BadSignature`,
/// `ClaimMismatch`) carry enough detail for server-side logs; callers rendering
/// to a browser must never surface the message text directly.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Jsonwebtoken(#[from] jsonwebtoken::errors::Error),
	#[error(transparent)]
	Pkcs8(#[from] rsa::pkcs8::Error),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Rsa(#[from] rsa::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),

	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
	#[error(
		"No active platform registered for tenant '{tenant}', issuer '{issuer}', client '{client_id}'."
	)]
	UnknownPlatform { tenant: String, issuer: String, client_id: String },
	#[error("Registration '{registration}' not found for tenant '{tenant}'.")]
	UnknownRegistration { tenant: String, registration: String },
	#[error("Resource link '{resource_link}' not found for tenant '{tenant}'.")]
	UnknownResourceLink { tenant: String, resource_link: String },
	#[error("Context '{context}' not found for tenant '{tenant}'.")]
	UnknownContext { tenant: String, context: String },

	#[error("Login state rejected: {0}")]
	InvalidState(&'static str),
	#[error("Nonce does not match the value issued for this login attempt.")]
	NonceReplay,
	#[error("Token signature could not be verified: {0}")]
	BadSignature(String),
	#[error("Claim '{claim}' rejected: {reason}")]
	ClaimMismatch { claim: &'static str, reason: String },
	#[error("Unsupported LTI message type '{0}'.")]
	UnsupportedMessageType(String),

	#[error("Upstream request to {url} timed out.")]
	UpstreamTimeout { url: String },
	#[error("Upstream HTTP status {status} from {url}: {body:?}")]
	UpstreamStatus { status: u16, url: String, body: Option<String> },
	#[error("Persistence error: {0}")]
	Persistence(String),
	#[error("Key material error: {0}")]
	Key(String),
}
impl Error {
	/// Whether the failure is transient and safe to retry with backoff.
	///
	/// Timeouts and 5xx responses are retryable; 4xx responses and every
	/// validation or security rejection are fatal.
	pub fn is_retryable(&self) -> bool {
		match self {
			Self::UpstreamTimeout { .. } => true,
			Self::UpstreamStatus { status, .. } => *status >= 500,
			Self::Reqwest(err) => err.is_timeout() || err.is_connect(),
			_ => false,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn retryability_classification() {
		let timeout = Error::UpstreamTimeout { url: "https://lms.example/token".into() };
		let server = Error::UpstreamStatus { status: 503, url: "x".into(), body: None };
		let client = Error::UpstreamStatus { status: 400, url: "x".into(), body: None };
		let replay = Error::NonceReplay;

		assert!(timeout.is_retryable());
		assert!(server.is_retryable());
		assert!(!client.is_retryable());
		assert!(!replay.is_retryable());
	}
}
