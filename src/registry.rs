//! Tenant-scoped platform registrations.
//!
//! The registry owns every LMS platform a tenant has plugged the tool into:
//! issuer, client id, the platform's OIDC endpoints, and the tool's own
//! signing keys for that registration. All lookups are tenant-scoped; there is
//! no cross-tenant path through this map.

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use url::Url;
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	clock::Clock,
	keys::{ToolJwks, ToolKeySet},
};

/// Lifecycle state of a platform registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationState {
	/// Registered but not yet confirmed by a successful launch.
	Pending,
	/// Confirmed; launches and service calls are permitted.
	Active,
	/// Administratively disabled; all login attempts are rejected.
	Disabled,
}

/// Input for registering a new platform.
#[derive(Clone, Debug, Deserialize)]
pub struct NewPlatform {
	/// Tenant that owns the registration.
	pub tenant_id: String,
	/// Human-readable platform name.
	pub name: String,
	/// The platform's `iss` value, compared verbatim against token claims.
	pub issuer: String,
	/// OAuth2 client id the platform assigned to the tool.
	pub client_id: String,
	/// The platform's OIDC authorization endpoint.
	pub auth_endpoint: Url,
	/// The platform's OAuth2 token endpoint.
	pub token_endpoint: Url,
	/// The platform's published JWKS endpoint.
	pub jwks_url: Url,
}

/// A registered LMS platform for one tenant.
#[derive(Clone, Debug)]
pub struct PlatformRegistration {
	/// Registration identifier.
	pub id: Uuid,
	/// Tenant that owns the registration.
	pub tenant_id: String,
	/// Human-readable platform name.
	pub name: String,
	/// The platform's `iss` value.
	pub issuer: String,
	/// OAuth2 client id the platform assigned to the tool.
	pub client_id: String,
	/// The platform's OIDC authorization endpoint.
	pub auth_endpoint: Url,
	/// The platform's OAuth2 token endpoint.
	pub token_endpoint: Url,
	/// The platform's published JWKS endpoint.
	pub jwks_url: Url,
	/// Lifecycle state.
	pub state: RegistrationState,
	/// The tool's signing keys for this registration.
	pub keys: ToolKeySet,
	/// When the registration was created.
	pub created_at: DateTime<Utc>,
}

/// Uniqueness key for registrations within the registry.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct PlatformKey {
	tenant_id: String,
	issuer: String,
	client_id: String,
}

#[derive(Debug, Default)]
struct RegistryState {
	by_id: HashMap<(String, Uuid), Arc<PlatformRegistration>>,
	by_platform: HashMap<PlatformKey, Uuid>,
}

/// Tenant-scoped CRUD over platform registrations.
#[derive(Clone, Debug)]
pub struct PlatformRegistry {
	inner: Arc<RwLock<RegistryState>>,
	clock: Arc<dyn Clock>,
	require_https: bool,
}
impl PlatformRegistry {
	/// Create an empty registry.
	pub fn new(clock: Arc<dyn Clock>, require_https: bool) -> Self {
		Self { inner: Arc::new(RwLock::new(RegistryState::default())), clock, require_https }
	}

	/// Register a platform, generating the tool's signing keypair for it.
	///
	/// The registration starts out `Pending` and is promoted to `Active` by the
	/// first successfully validated launch. Fails when `(tenant, issuer,
	/// client_id)` is already registered.
	#[tracing::instrument(skip(self, platform), fields(tenant = %platform.tenant_id, issuer = %platform.issuer))]
	pub async fn register(&self, platform: NewPlatform) -> Result<Uuid> {
		validate_tenant_id(&platform.tenant_id)?;
		validate_opaque_id("client_id", &platform.client_id)?;
		validate_issuer(&platform.issuer)?;

		if self.require_https {
			for (field, url) in [
				("auth_endpoint", &platform.auth_endpoint),
				("token_endpoint", &platform.token_endpoint),
				("jwks_url", &platform.jwks_url),
			] {
				if url.scheme() != "https" {
					return Err(Error::Validation {
						field,
						reason: format!("Endpoint {url} must use HTTPS."),
					});
				}
			}
		}

		let key = PlatformKey {
			tenant_id: platform.tenant_id.clone(),
			issuer: platform.issuer.clone(),
			client_id: platform.client_id.clone(),
		};
		let now = self.clock.now();
		let registration = PlatformRegistration {
			id: Uuid::new_v4(),
			tenant_id: platform.tenant_id,
			name: platform.name,
			issuer: platform.issuer,
			client_id: platform.client_id,
			auth_endpoint: platform.auth_endpoint,
			token_endpoint: platform.token_endpoint,
			jwks_url: platform.jwks_url,
			state: RegistrationState::Pending,
			keys: ToolKeySet::generate(now)?,
			created_at: now,
		};
		let id = registration.id;
		let mut state = self.inner.write().await;

		if state.by_platform.contains_key(&key) {
			return Err(Error::Validation {
				field: "registration",
				reason: "Platform is already registered for this tenant.".into(),
			});
		}

		state.by_platform.insert(key, id);
		state.by_id.insert((registration.tenant_id.clone(), id), Arc::new(registration));

		tracing::info!(registration = %id, "platform registered");

		Ok(id)
	}

	/// Fetch a registration by id within a tenant.
	pub async fn get(&self, tenant_id: &str, id: Uuid) -> Result<Arc<PlatformRegistration>> {
		let state = self.inner.read().await;

		state.by_id.get(&(tenant_id.to_string(), id)).cloned().ok_or_else(|| {
			Error::UnknownRegistration { tenant: tenant_id.into(), registration: id.to_string() }
		})
	}

	/// List all registrations for a tenant.
	pub async fn list(&self, tenant_id: &str) -> Vec<Arc<PlatformRegistration>> {
		let state = self.inner.read().await;

		state
			.by_id
			.iter()
			.filter(|((tenant, _), _)| tenant == tenant_id)
			.map(|(_, registration)| registration.clone())
			.collect()
	}

	/// Resolve the registration a login attempt refers to.
	///
	/// Missing and `Disabled` registrations both surface as `UnknownPlatform`;
	/// `Pending` is acceptable because the first launch is what confirms a
	/// registration.
	pub async fn find_for_login(
		&self,
		tenant_id: &str,
		issuer: &str,
		client_id: &str,
	) -> Result<Arc<PlatformRegistration>> {
		let key = PlatformKey {
			tenant_id: tenant_id.into(),
			issuer: issuer.into(),
			client_id: client_id.into(),
		};
		let state = self.inner.read().await;
		let registration = state
			.by_platform
			.get(&key)
			.and_then(|id| state.by_id.get(&(tenant_id.to_string(), *id)))
			.cloned();

		match registration {
			Some(registration) if registration.state != RegistrationState::Disabled =>
				Ok(registration),
			_ => Err(Error::UnknownPlatform {
				tenant: tenant_id.into(),
				issuer: issuer.into(),
				client_id: client_id.into(),
			}),
		}
	}

	/// Mark a registration `Active`.
	pub async fn activate(&self, tenant_id: &str, id: Uuid) -> Result<()> {
		self.update(tenant_id, id, |registration| registration.state = RegistrationState::Active)
			.await
	}

	/// Mark a registration `Disabled`, blocking further logins.
	pub async fn disable(&self, tenant_id: &str, id: Uuid) -> Result<()> {
		self.update(tenant_id, id, |registration| registration.state = RegistrationState::Disabled)
			.await
	}

	/// Remove a registration entirely.
	pub async fn remove(&self, tenant_id: &str, id: Uuid) -> Result<bool> {
		let mut state = self.inner.write().await;
		let removed = state.by_id.remove(&(tenant_id.to_string(), id));

		if let Some(registration) = &removed {
			state.by_platform.remove(&PlatformKey {
				tenant_id: registration.tenant_id.clone(),
				issuer: registration.issuer.clone(),
				client_id: registration.client_id.clone(),
			});
		}

		Ok(removed.is_some())
	}

	/// Rotate the signing key for a registration, returning the new `kid`.
	#[tracing::instrument(skip(self), fields(tenant = %tenant_id, registration = %id))]
	pub async fn rotate_keys(&self, tenant_id: &str, id: Uuid, overlap: Duration) -> Result<String> {
		let now = self.clock.now();
		let mut kid = String::new();

		self.update(tenant_id, id, |registration| {
			if let Ok(key) = registration.keys.rotate(now, overlap) {
				kid = key.kid.clone();
			}
		})
		.await?;

		if kid.is_empty() {
			return Err(Error::Key("Key rotation failed to produce a signing key.".into()));
		}

		tracing::info!(%kid, "signing key rotated");

		Ok(kid)
	}

	/// Export the tenant's published JWKS across all of its registrations.
	pub async fn published_jwks(&self, tenant_id: &str) -> ToolJwks {
		let now = self.clock.now();
		let state = self.inner.read().await;
		let mut keys = Vec::new();

		for ((tenant, _), registration) in state.by_id.iter() {
			if tenant == tenant_id {
				keys.extend(registration.keys.published_jwks(now).keys);
			}
		}

		ToolJwks { keys }
	}

	/// Promote a `Pending` registration after its first validated launch.
	pub(crate) async fn promote_on_launch(&self, tenant_id: &str, id: Uuid) -> Result<()> {
		self.update(tenant_id, id, |registration| {
			if registration.state == RegistrationState::Pending {
				registration.state = RegistrationState::Active;
			}
		})
		.await
	}

	async fn update(
		&self,
		tenant_id: &str,
		id: Uuid,
		apply: impl FnOnce(&mut PlatformRegistration),
	) -> Result<()> {
		let mut state = self.inner.write().await;
		let slot = state.by_id.get_mut(&(tenant_id.to_string(), id)).ok_or_else(|| {
			Error::UnknownRegistration { tenant: tenant_id.into(), registration: id.to_string() }
		})?;
		let mut updated = (**slot).clone();

		apply(&mut updated);

		*slot = Arc::new(updated);

		Ok(())
	}
}

/// Validate a tenant identifier.
pub fn validate_tenant_id(value: &str) -> Result<()> {
	if value.is_empty() {
		return Err(Error::Validation { field: "tenant_id", reason: "Must not be empty.".into() });
	}
	if value.len() > 64 {
		return Err(Error::Validation {
			field: "tenant_id",
			reason: "Must be 64 characters or fewer.".into(),
		});
	}
	if !value.as_bytes().iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-') {
		return Err(Error::Validation {
			field: "tenant_id",
			reason: "May only contain ASCII letters, numbers, and '-'.".into(),
		});
	}

	Ok(())
}

fn validate_opaque_id(field: &'static str, value: &str) -> Result<()> {
	if value.is_empty() {
		return Err(Error::Validation { field, reason: "Must not be empty.".into() });
	}
	if value.len() > 256 {
		return Err(Error::Validation { field, reason: "Must be 256 characters or fewer.".into() });
	}

	Ok(())
}

fn validate_issuer(value: &str) -> Result<()> {
	let url = Url::parse(value).map_err(|err| Error::Validation {
		field: "issuer",
		reason: format!("Must be an absolute URL: {err}."),
	})?;

	if url.host_str().is_none() {
		return Err(Error::Validation {
			field: "issuer",
			reason: "Must include a host component.".into(),
		});
	}

	Ok(())
}
