//! Platform JWKS retrieval and caching.
//!
//! Verification keys are always resolved by `kid` against the platform's
//! published JWKS — key material embedded in a token is never trusted. Each
//! registration has its own cache slot with a single-flight guard, so
//! concurrent misses coalesce into one upstream fetch, and a kid miss only
//! triggers a refresh once per cooldown window.

// std
use std::collections::HashMap;
// crates.io
use jsonwebtoken::{DecodingKey, jwk::JwkSet};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
// self
use crate::{_prelude::*, registry::PlatformRegistration};

#[derive(Clone, Debug)]
struct CachedJwks {
	jwks: Arc<JwkSet>,
	fetched_at: Instant,
	expires_at: Instant,
}
impl CachedJwks {
	fn is_fresh(&self, now: Instant) -> bool {
		now < self.expires_at
	}
}

#[derive(Debug, Default)]
struct CacheSlot {
	// Serialises upstream fetches for one registration; reads go through the
	// RwLock without touching this.
	single_flight: Mutex<()>,
	state: RwLock<Option<CachedJwks>>,
}

/// Per-registration cache over platform JWKS endpoints.
#[derive(Clone, Debug)]
pub struct PlatformJwksCache {
	client: reqwest::Client,
	ttl: Duration,
	kid_miss_cooldown: Duration,
	fetch_timeout: Duration,
	slots: Arc<RwLock<HashMap<(String, Uuid), Arc<CacheSlot>>>>,
}
impl PlatformJwksCache {
	/// Create a cache with the given freshness and fetch bounds.
	pub fn new(
		client: reqwest::Client,
		ttl: Duration,
		kid_miss_cooldown: Duration,
		fetch_timeout: Duration,
	) -> Self {
		Self {
			client,
			ttl,
			kid_miss_cooldown,
			fetch_timeout,
			slots: Arc::new(RwLock::new(HashMap::new())),
		}
	}

	/// Resolve the verification key for `kid` from the registration's JWKS.
	///
	/// Serves from cache while fresh; refreshes on expiry or on a kid miss
	/// (subject to the cooldown). A kid absent after a refresh is a
	/// `BadSignature` rejection.
	#[tracing::instrument(
		skip(self, registration),
		fields(tenant = %registration.tenant_id, registration = %registration.id, kid = %kid)
	)]
	pub async fn resolve_key(
		&self,
		registration: &PlatformRegistration,
		kid: &str,
	) -> Result<DecodingKey> {
		let slot = self.slot(registration).await;
		let now = Instant::now();

		{
			let state = slot.state.read().await;

			if let Some(cached) = state.as_ref()
				&& cached.is_fresh(now)
				&& let Some(key) = decoding_key(&cached.jwks, kid)?
			{
				return Ok(key);
			}
		}

		let _guard = slot.single_flight.lock().await;
		// Another flight may have refreshed while this one waited on the guard.
		let now = Instant::now();
		let cooled_down = {
			let state = slot.state.read().await;

			match state.as_ref() {
				Some(cached) => {
					if cached.is_fresh(now)
						&& let Some(key) = decoding_key(&cached.jwks, kid)?
					{
						return Ok(key);
					}

					!cached.is_fresh(now) || now >= cached.fetched_at + self.kid_miss_cooldown
				},
				None => true,
			}
		};

		if !cooled_down {
			tracing::warn!("kid miss within refresh cooldown");

			return Err(Error::BadSignature(format!(
				"No key with kid '{kid}' in the cached platform JWKS."
			)));
		}

		let jwks = self.fetch(registration).await?;
		let fetched_at = Instant::now();
		let cached =
			CachedJwks { jwks: jwks.clone(), fetched_at, expires_at: fetched_at + self.ttl };

		*slot.state.write().await = Some(cached);

		decoding_key(&jwks, kid)?.ok_or_else(|| {
			Error::BadSignature(format!("No key with kid '{kid}' in the platform JWKS."))
		})
	}

	async fn slot(&self, registration: &PlatformRegistration) -> Arc<CacheSlot> {
		let key = (registration.tenant_id.clone(), registration.id);

		{
			let slots = self.slots.read().await;

			if let Some(slot) = slots.get(&key) {
				return slot.clone();
			}
		}

		let mut slots = self.slots.write().await;

		slots.entry(key).or_default().clone()
	}

	async fn fetch(&self, registration: &PlatformRegistration) -> Result<Arc<JwkSet>> {
		let url = registration.jwks_url.clone();
		let started = Instant::now();
		let response = self
			.client
			.get(url.clone())
			.timeout(self.fetch_timeout)
			.send()
			.await
			.map_err(|err| classify(err, url.as_str()))?;
		let status = response.status();

		if !status.is_success() {
			let body = response.text().await.ok();

			return Err(Error::UpstreamStatus {
				status: status.as_u16(),
				url: url.into(),
				body,
			});
		}

		let jwks: JwkSet = response.json().await.map_err(|err| classify(err, url.as_str()))?;

		tracing::debug!(elapsed = ?started.elapsed(), keys = jwks.keys.len(), "platform jwks fetched");

		Ok(Arc::new(jwks))
	}
}

fn decoding_key(jwks: &JwkSet, kid: &str) -> Result<Option<DecodingKey>> {
	match jwks.find(kid) {
		Some(jwk) => Ok(Some(DecodingKey::from_jwk(jwk)?)),
		None => Ok(None),
	}
}

pub(crate) fn classify(err: reqwest::Error, url: &str) -> Error {
	if err.is_timeout() {
		Error::UpstreamTimeout { url: url.to_string() }
	} else {
		Error::Reqwest(err)
	}
}
