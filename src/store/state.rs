//! Single-use login state records.
//!
//! One [`OidcState`] row exists per login attempt, binding the opaque `state`
//! token to the nonce, the target link, and the registration that issued it.
//! Consumption is atomic: under concurrent delivery of the same callback only
//! one caller receives the record, every other caller gets `InvalidState`.

// std
use std::collections::HashMap;
// crates.io
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;
// self
use crate::_prelude::*;

/// State record created per OIDC login attempt.
#[derive(Clone, Debug)]
pub struct OidcState {
	/// Opaque `state` token round-tripped through the platform.
	pub state: String,
	/// Nonce the returned id_token must echo.
	pub nonce: String,
	/// The platform's `login_hint`.
	pub login_hint: String,
	/// The platform's `lti_message_hint`, when supplied.
	pub message_hint: Option<String>,
	/// The link the launch ultimately targets.
	pub target_link_uri: String,
	/// Registration the attempt belongs to.
	pub registration_id: Uuid,
	/// Tenant scope.
	pub tenant_id: String,
	/// Creation timestamp.
	pub created_at: DateTime<Utc>,
	/// Expiry deadline (`created_at + state_ttl`).
	pub expires_at: DateTime<Utc>,
	/// Whether the state has already been consumed by a callback.
	pub consumed: bool,
}

/// Storage for short-lived, single-use login state.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
	/// Persist a freshly issued state record.
	async fn insert(&self, record: OidcState) -> Result<()>;

	/// Atomically consume a state record.
	///
	/// Returns the record for exactly one caller; missing, expired, and
	/// already-consumed states all fail with `InvalidState`.
	async fn consume(&self, tenant_id: &str, state: &str, now: DateTime<Utc>)
	-> Result<OidcState>;

	/// Delete expired rows, returning how many were removed.
	async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// In-memory [`StateStore`] for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
	records: Mutex<HashMap<(String, String), OidcState>>,
}
impl MemoryStateStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}
}
#[async_trait]
impl StateStore for MemoryStateStore {
	async fn insert(&self, record: OidcState) -> Result<()> {
		let key = (record.tenant_id.clone(), record.state.clone());
		let mut records = self.records.lock().await;

		records.insert(key, record);

		Ok(())
	}

	async fn consume(
		&self,
		tenant_id: &str,
		state: &str,
		now: DateTime<Utc>,
	) -> Result<OidcState> {
		let key = (tenant_id.to_string(), state.to_string());
		// The whole check-and-mark runs under one lock acquisition, so a
		// concurrent duplicate callback always loses.
		let mut records = self.records.lock().await;
		let record = records.get_mut(&key).ok_or(Error::InvalidState("unknown state"))?;

		if record.consumed {
			return Err(Error::InvalidState("state already consumed"));
		}
		if now >= record.expires_at {
			return Err(Error::InvalidState("state expired"));
		}

		record.consumed = true;

		Ok(record.clone())
	}

	async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
		let mut records = self.records.lock().await;
		let before = records.len();

		records.retain(|_, record| now < record.expires_at && !record.consumed);

		Ok(before - records.len())
	}
}
