//! Callback validation state machine.
//!
//! A callback advances `Received → StateValidated → TokenVerified →
//! ClaimsValidated → Dispatched`; any rejection is terminal and carries a
//! distinct error kind. The browser-facing layer must map every rejection to
//! a generic message — the detail here is for server-side logs only.

// crates.io
use jsonwebtoken::{Algorithm, Validation, decode, decode_header, errors::ErrorKind};
use serde::Deserialize;
// self
use crate::{
	_prelude::*,
	clock::Clock,
	config::ToolConfig,
	jwks::PlatformJwksCache,
	launch::{
		claims::{IdTokenClaims, LaunchContext},
		handlers::build_launch_context,
	},
	registry::{PlatformRegistration, PlatformRegistry},
	store::{
		context::{ContextStore, LtiContext, LtiResourceLink, LtiUser},
		state::{OidcState, StateStore},
	},
};

/// Form parameters the platform posts to the callback endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct CallbackParams {
	/// The `state` issued at login initiation.
	pub state: String,
	/// The signed id_token.
	pub id_token: String,
}

/// Progress of a callback through validation; used for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchPhase {
	/// Callback parameters received.
	Received,
	/// State consumed; nonce and registration known.
	StateValidated,
	/// Signature and registered claims verified.
	TokenVerified,
	/// LTI claims extracted and checked.
	ClaimsValidated,
	/// Handler ran and correlation records were persisted.
	Dispatched,
}

/// Verifies returned id_tokens and dispatches launches by message type.
#[derive(Clone, Debug)]
pub struct LaunchValidator {
	registry: PlatformRegistry,
	states: Arc<dyn StateStore>,
	contexts: Arc<dyn ContextStore>,
	jwks: PlatformJwksCache,
	clock: Arc<dyn Clock>,
	config: Arc<ToolConfig>,
}
impl LaunchValidator {
	pub(crate) fn new(
		registry: PlatformRegistry,
		states: Arc<dyn StateStore>,
		contexts: Arc<dyn ContextStore>,
		jwks: PlatformJwksCache,
		clock: Arc<dyn Clock>,
		config: Arc<ToolConfig>,
	) -> Self {
		Self { registry, states, contexts, jwks, clock, config }
	}

	/// Validate a launch callback end to end.
	#[tracing::instrument(skip(self, params), fields(tenant = %tenant_id))]
	pub async fn handle_callback(
		&self,
		params: CallbackParams,
		tenant_id: &str,
	) -> Result<LaunchContext> {
		let mut phase = LaunchPhase::Received;
		let result = self.validate(&params, tenant_id, &mut phase).await;

		match &result {
			Ok(context) => {
				tracing::info!(
					registration = %context.registration_id,
					message_type = context.message_type.as_str(),
					subject = %context.subject,
					"launch dispatched"
				);
			},
			Err(err) => {
				tracing::warn!(?phase, error = %err, "launch rejected");
			},
		}

		result
	}

	async fn validate(
		&self,
		params: &CallbackParams,
		tenant_id: &str,
		phase: &mut LaunchPhase,
	) -> Result<LaunchContext> {
		if params.state.is_empty() || params.id_token.is_empty() {
			return Err(Error::InvalidState("missing state or id_token"));
		}

		let now = self.clock.now();
		// Consume-if-unconsumed: a concurrent duplicate callback loses here.
		let login_state = self.states.consume(tenant_id, &params.state, now).await?;

		*phase = LaunchPhase::StateValidated;

		let registration = self.registry.get(tenant_id, login_state.registration_id).await?;
		let claims = self.verify_token(&params.id_token, &registration, &login_state).await?;

		*phase = LaunchPhase::TokenVerified;

		let context = build_launch_context(&claims, &registration)?;

		if context.target_link_uri.as_deref() != Some(login_state.target_link_uri.as_str()) {
			tracing::debug!(
				stored = %login_state.target_link_uri,
				"target_link_uri differs from the login request"
			);
		}

		*phase = LaunchPhase::ClaimsValidated;

		self.persist(&context).await?;
		self.registry.promote_on_launch(tenant_id, registration.id).await?;

		*phase = LaunchPhase::Dispatched;

		Ok(context)
	}

	async fn verify_token(
		&self,
		id_token: &str,
		registration: &PlatformRegistration,
		login_state: &OidcState,
	) -> Result<IdTokenClaims> {
		let header = decode_header(id_token)
			.map_err(|err| Error::BadSignature(format!("Malformed token header: {err}.")))?;

		if !matches!(header.alg, Algorithm::RS256 | Algorithm::ES256) {
			return Err(Error::BadSignature(format!(
				"Unsupported signing algorithm {:?}.",
				header.alg
			)));
		}

		let kid = header
			.kid
			.as_deref()
			.ok_or_else(|| Error::BadSignature("Token header carries no kid.".into()))?;
		// Key resolution goes through the platform's published JWKS only.
		let key = self.jwks.resolve_key(registration, kid).await?;
		let mut validation = Validation::new(header.alg);

		// The audience is checked after decoding; `aud` may arrive as a
		// string or an array, and a multi-valued audience is still a match
		// as long as it contains the registered client id.
		validation.validate_aud = false;
		validation.set_issuer(&[registration.issuer.as_str()]);
		validation.leeway = self.config.clock_skew.as_secs();

		let data =
			decode::<IdTokenClaims>(id_token, &key, &validation).map_err(map_decode_error)?;
		let claims = data.claims;

		if !claims.aud.contains(&registration.client_id) {
			return Err(Error::ClaimMismatch {
				claim: "aud",
				reason: "Audience does not contain the registered client id.".into(),
			});
		}

		match claims.nonce.as_deref() {
			Some(nonce) if nonce == login_state.nonce => {},
			_ => return Err(Error::NonceReplay),
		}

		let now = self.clock.now().timestamp();
		let skew = self.config.clock_skew.as_secs() as i64;

		if claims.iat > now + skew {
			return Err(Error::ClaimMismatch {
				claim: "iat",
				reason: "Issued in the future beyond the allowed clock skew.".into(),
			});
		}

		Ok(claims)
	}

	/// Persist correlation records learned from the launch.
	///
	/// Deliberately separate from claim extraction so handlers stay pure.
	async fn persist(&self, context: &LaunchContext) -> Result<()> {
		if let Some(claim) = &context.context {
			self.contexts
				.upsert_context(LtiContext {
					tenant_id: context.tenant_id.clone(),
					registration_id: context.registration_id,
					context_id: claim.id.clone(),
					title: claim.title.clone(),
					label: claim.label.clone(),
					memberships_url: context
						.nrps
						.as_ref()
						.map(|nrps| nrps.context_memberships_url.clone()),
				})
				.await?;
		}

		if let Some(claim) = &context.resource_link {
			self.contexts
				.upsert_resource_link(LtiResourceLink {
					tenant_id: context.tenant_id.clone(),
					registration_id: context.registration_id,
					resource_link_id: claim.id.clone(),
					context_id: context.context.as_ref().map(|c| c.id.clone()),
					title: claim.title.clone(),
					line_item_url: context.ags.as_ref().and_then(|ags| ags.lineitem.clone()),
				})
				.await?;
		}

		self.contexts
			.upsert_user(LtiUser {
				tenant_id: context.tenant_id.clone(),
				registration_id: context.registration_id,
				subject: context.subject.clone(),
				name: context.name.clone(),
				email: context.email.clone(),
				roles: context.roles.clone(),
			})
			.await?;

		Ok(())
	}
}

fn map_decode_error(err: jsonwebtoken::errors::Error) -> Error {
	match err.kind() {
		ErrorKind::InvalidIssuer => Error::ClaimMismatch {
			claim: "iss",
			reason: "Issuer does not match the registration.".into(),
		},
		ErrorKind::ExpiredSignature => Error::ClaimMismatch {
			claim: "exp",
			reason: "Token is expired beyond the allowed clock skew.".into(),
		},
		ErrorKind::ImmatureSignature => Error::ClaimMismatch {
			claim: "nbf",
			reason: "Token is not yet valid.".into(),
		},
		_ => Error::BadSignature(err.to_string()),
	}
}
