//! OIDC third-party initiated login.
//!
//! The platform opens `/lti/login` with `iss`, `login_hint`,
//! `target_link_uri`, and `client_id`; the initiator binds a fresh
//! state/nonce pair to the matching registration and redirects the browser to
//! the platform's authorization endpoint.

// crates.io
use serde::Deserialize;
use url::Url;
// self
use crate::{
	_prelude::*,
	clock::{Clock, RandomSource, generate_token},
	config::ToolConfig,
	registry::PlatformRegistry,
	store::state::{OidcState, StateStore},
};

/// Parameters the platform sends to the login endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct LoginParams {
	/// Platform issuer.
	pub iss: String,
	/// Opaque hint identifying the user at the platform.
	pub login_hint: String,
	/// The link the launch targets.
	pub target_link_uri: String,
	/// OAuth2 client id the platform assigned to the tool.
	pub client_id: String,
	/// Opaque message hint, echoed back to the platform.
	pub lti_message_hint: Option<String>,
}

/// Result of a successful login initiation.
#[derive(Clone, Debug)]
pub struct LoginRedirect {
	/// Authorization URL the browser is redirected to.
	pub url: Url,
	/// The issued `state` token (also embedded in `url`).
	pub state: String,
}

/// Builds the authorization-request redirect for the login flow.
#[derive(Clone, Debug)]
pub struct LoginInitiator {
	registry: PlatformRegistry,
	states: Arc<dyn StateStore>,
	clock: Arc<dyn Clock>,
	random: Arc<dyn RandomSource>,
	config: Arc<ToolConfig>,
}
impl LoginInitiator {
	pub(crate) fn new(
		registry: PlatformRegistry,
		states: Arc<dyn StateStore>,
		clock: Arc<dyn Clock>,
		random: Arc<dyn RandomSource>,
		config: Arc<ToolConfig>,
	) -> Self {
		Self { registry, states, clock, random, config }
	}

	/// Validate the login request and build the authorization redirect.
	#[tracing::instrument(skip(self, params), fields(tenant = %tenant_id, issuer = %params.iss))]
	pub async fn initiate(&self, params: LoginParams, tenant_id: &str) -> Result<LoginRedirect> {
		for (field, value) in [
			("iss", &params.iss),
			("login_hint", &params.login_hint),
			("target_link_uri", &params.target_link_uri),
			("client_id", &params.client_id),
		] {
			if value.is_empty() {
				return Err(Error::Validation { field, reason: "Must not be empty.".into() });
			}
		}

		let registration =
			self.registry.find_for_login(tenant_id, &params.iss, &params.client_id).await?;
		let state = generate_token(self.random.as_ref());
		let nonce = generate_token(self.random.as_ref());
		let now = self.clock.now();
		let ttl = chrono::TimeDelta::from_std(self.config.state_ttl).map_err(|err| {
			Error::Validation { field: "state_ttl", reason: err.to_string() }
		})?;

		self.states
			.insert(OidcState {
				state: state.clone(),
				nonce: nonce.clone(),
				login_hint: params.login_hint.clone(),
				message_hint: params.lti_message_hint.clone(),
				target_link_uri: params.target_link_uri.clone(),
				registration_id: registration.id,
				tenant_id: tenant_id.to_string(),
				created_at: now,
				expires_at: now + ttl,
				consumed: false,
			})
			.await?;

		let redirect_uri = self.config.redirect_uri(tenant_id)?;
		let mut url = registration.auth_endpoint.clone();

		url.query_pairs_mut()
			.append_pair("scope", "openid")
			.append_pair("response_type", "id_token")
			.append_pair("response_mode", "form_post")
			.append_pair("prompt", "none")
			.append_pair("client_id", &registration.client_id)
			.append_pair("redirect_uri", redirect_uri.as_str())
			.append_pair("login_hint", &params.login_hint)
			.append_pair("state", &state)
			.append_pair("nonce", &nonce);

		if let Some(hint) = &params.lti_message_hint {
			url.query_pairs_mut().append_pair("lti_message_hint", hint);
		}

		tracing::debug!(registration = %registration.id, "login initiated");

		Ok(LoginRedirect { url, state })
	}
}
