//! Client-credentials access tokens via signed JWT assertions.
//!
//! Each (tenant, registration, scope) triple caches its token until shortly
//! before expiry; concurrent callers needing a fresh token collapse onto a
//! single token-endpoint request.

// std
use std::collections::HashMap;
// crates.io
use jsonwebtoken::{Algorithm, Header, encode};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	client::send_with_retry,
	clock::{Clock, RandomSource, generate_token},
	config::ToolConfig,
	registry::{PlatformRegistration, PlatformRegistry},
};

const ASSERTION_TYPE: &str = "urn:ietf:params:oauth:client-assertion-type:jwt-bearer";
/// Lifetime of a client assertion JWT.
const ASSERTION_TTL_SECS: i64 = 60;
/// Tokens are refreshed this long before their reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 30;
/// Assumed lifetime when the platform omits `expires_in`.
const DEFAULT_EXPIRES_IN: u64 = 3600;

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
	iss: &'a str,
	sub: &'a str,
	aud: &'a str,
	jti: String,
	iat: i64,
	exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
	access_token: String,
	#[serde(default)]
	expires_in: Option<u64>,
}

#[derive(Clone, Debug)]
struct CachedToken {
	bearer: String,
	refresh_after: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct TokenSlot {
	single_flight: Mutex<()>,
	state: RwLock<Option<CachedToken>>,
}

/// Obtains and caches platform access tokens per (tenant, registration, scope).
#[derive(Clone, Debug)]
pub struct AccessTokenProvider {
	client: reqwest::Client,
	registry: PlatformRegistry,
	clock: Arc<dyn Clock>,
	random: Arc<dyn RandomSource>,
	config: Arc<ToolConfig>,
	slots: Arc<RwLock<HashMap<(String, Uuid, String), Arc<TokenSlot>>>>,
}
impl AccessTokenProvider {
	pub(crate) fn new(
		client: reqwest::Client,
		registry: PlatformRegistry,
		clock: Arc<dyn Clock>,
		random: Arc<dyn RandomSource>,
		config: Arc<ToolConfig>,
	) -> Self {
		Self { client, registry, clock, random, config, slots: Arc::new(RwLock::new(HashMap::new())) }
	}

	/// A bearer token for the given scope, from cache when still fresh.
	#[tracing::instrument(skip(self), fields(tenant = %tenant_id, registration = %registration_id))]
	pub async fn bearer(
		&self,
		tenant_id: &str,
		registration_id: Uuid,
		scope: &str,
	) -> Result<String> {
		// The tenant-scoped lookup runs before any cache read; a registration
		// id alone never reaches another tenant's slot.
		let registration = self.registry.get(tenant_id, registration_id).await?;
		let slot = self.slot(tenant_id, registration_id, scope).await;

		if let Some(token) = self.fresh(&slot).await {
			return Ok(token);
		}

		let _flight = slot.single_flight.lock().await;

		// A concurrent caller may have refreshed while this one waited.
		if let Some(token) = self.fresh(&slot).await {
			return Ok(token);
		}

		let token = self.request_token(&registration, scope).await?;

		*slot.state.write().await = Some(token.clone());

		Ok(token.bearer)
	}

	async fn slot(&self, tenant_id: &str, registration_id: Uuid, scope: &str) -> Arc<TokenSlot> {
		let key = (tenant_id.to_string(), registration_id, scope.to_string());

		if let Some(slot) = self.slots.read().await.get(&key) {
			return slot.clone();
		}

		self.slots.write().await.entry(key).or_default().clone()
	}

	async fn fresh(&self, slot: &TokenSlot) -> Option<String> {
		let state = slot.state.read().await;
		let token = state.as_ref()?;

		(self.clock.now() < token.refresh_after).then(|| token.bearer.clone())
	}

	async fn request_token(
		&self,
		registration: &PlatformRegistration,
		scope: &str,
	) -> Result<CachedToken> {
		let assertion = self.sign_assertion(registration)?;
		let form = [
			("grant_type", "client_credentials"),
			("client_assertion_type", ASSERTION_TYPE),
			("client_assertion", assertion.as_str()),
			("scope", scope),
		];
		let url = registration.token_endpoint.as_str();
		let request = self.client.post(registration.token_endpoint.clone()).form(&form);
		let response = send_with_retry(&self.config.retry_policy, request, url).await?;
		let body = response.json::<TokenResponse>().await.map_err(Error::Reqwest)?;
		let lifetime = body.expires_in.unwrap_or(DEFAULT_EXPIRES_IN) as i64;
		let refresh_after = self.clock.now()
			+ chrono::TimeDelta::seconds((lifetime - EXPIRY_MARGIN_SECS).max(0));

		tracing::debug!(scope, lifetime, "access token obtained");

		Ok(CachedToken { bearer: body.access_token, refresh_after })
	}

	/// Sign an RFC 7523 assertion: the tool is both issuer and subject, the
	/// token endpoint is the audience.
	fn sign_assertion(&self, registration: &PlatformRegistration) -> Result<String> {
		let key = registration.keys.current()?;
		let now = self.clock.now().timestamp();
		let claims = AssertionClaims {
			iss: &registration.client_id,
			sub: &registration.client_id,
			aud: registration.token_endpoint.as_str(),
			jti: generate_token(self.random.as_ref()),
			iat: now,
			exp: now + ASSERTION_TTL_SECS,
		};
		let mut header = Header::new(Algorithm::RS256);

		header.kid = Some(key.kid.clone());

		Ok(encode(&header, &claims, &key.encoding_key()?)?)
	}
}
