//! The tool facade: one configured instance wiring every component together.

// crates.io
use tokio::{task::JoinHandle, time};
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	client::{
		AccessTokenProvider, Member, RosterClient, Score, ScorePublisher,
	},
	clock::{Clock, OsRandom, RandomSource, SystemClock},
	config::ToolConfig,
	deep_linking::{ContentItem, DeepLinkResponder, DeepLinkResponse, DeepLinkingRequest},
	jwks::PlatformJwksCache,
	keys::ToolJwks,
	launch::{
		claims::LaunchContext,
		validator::{CallbackParams, LaunchValidator},
	},
	login::{LoginInitiator, LoginParams, LoginRedirect},
	registry::{NewPlatform, PlatformRegistration, PlatformRegistry},
	store::{
		context::{ContextStore, MemoryContextStore},
		state::{MemoryStateStore, StateStore},
	},
};

/// Builder for [`LtiTool`] enabling storage and clock injection.
#[derive(Debug)]
pub struct LtiToolBuilder {
	config: ToolConfig,
	require_https: bool,
	http_client: Option<reqwest::Client>,
	clock: Option<Arc<dyn Clock>>,
	random: Option<Arc<dyn RandomSource>>,
	states: Option<Arc<dyn StateStore>>,
	contexts: Option<Arc<dyn ContextStore>>,
}
impl LtiToolBuilder {
	/// Create a builder around the given configuration.
	pub fn new(config: ToolConfig) -> Self {
		Self {
			config,
			require_https: true,
			http_client: None,
			clock: None,
			random: None,
			states: None,
			contexts: None,
		}
	}

	/// Enforce HTTPS for registered platform endpoints (enabled by default).
	pub fn require_https(mut self, require_https: bool) -> Self {
		self.require_https = require_https;

		self
	}

	/// Supply a shared HTTP client instead of constructing one.
	pub fn http_client(mut self, client: reqwest::Client) -> Self {
		self.http_client = Some(client);

		self
	}

	/// Override the wall-clock source.
	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);

		self
	}

	/// Override the randomness source used for states, nonces, and jtis.
	pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
		self.random = Some(random);

		self
	}

	/// Use an external login-state store instead of the in-memory one.
	pub fn state_store(mut self, states: Arc<dyn StateStore>) -> Self {
		self.states = Some(states);

		self
	}

	/// Use an external correlation store instead of the in-memory one.
	pub fn context_store(mut self, contexts: Arc<dyn ContextStore>) -> Self {
		self.contexts = Some(contexts);

		self
	}

	/// Finalise the configuration and construct an [`LtiTool`].
	pub fn build(self) -> Result<LtiTool> {
		self.config.validate()?;

		let config = Arc::new(self.config);
		let client = self.http_client.unwrap_or_default();
		let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
		let random = self.random.unwrap_or_else(|| Arc::new(OsRandom));
		let states = self.states.unwrap_or_else(|| Arc::new(MemoryStateStore::default()));
		let contexts = self.contexts.unwrap_or_else(|| Arc::new(MemoryContextStore::default()));
		let registry = PlatformRegistry::new(clock.clone(), self.require_https);
		let jwks = PlatformJwksCache::new(
			client.clone(),
			config.jwks_ttl,
			config.kid_miss_cooldown,
			config.retry_policy.attempt_timeout,
		);
		let login = LoginInitiator::new(
			registry.clone(),
			states.clone(),
			clock.clone(),
			random.clone(),
			config.clone(),
		);
		let validator = LaunchValidator::new(
			registry.clone(),
			states.clone(),
			contexts.clone(),
			jwks,
			clock.clone(),
			config.clone(),
		);
		let deep_linking = DeepLinkResponder::new(registry.clone(), clock.clone(), random.clone());
		let tokens = AccessTokenProvider::new(
			client.clone(),
			registry.clone(),
			clock.clone(),
			random.clone(),
			config.clone(),
		);
		let scores =
			ScorePublisher::new(client.clone(), contexts.clone(), tokens.clone(), config.clone());
		let roster = RosterClient::new(client, contexts.clone(), tokens.clone(), config.clone());

		Ok(LtiTool {
			config,
			registry,
			states,
			contexts,
			clock,
			login,
			validator,
			deep_linking,
			tokens,
			scores,
			roster,
		})
	}
}

/// A configured LTI tool instance.
///
/// Cloning is cheap; all clones share the same registries, caches, and stores.
#[derive(Clone, Debug)]
pub struct LtiTool {
	config: Arc<ToolConfig>,
	registry: PlatformRegistry,
	states: Arc<dyn StateStore>,
	contexts: Arc<dyn ContextStore>,
	clock: Arc<dyn Clock>,
	login: LoginInitiator,
	validator: LaunchValidator,
	deep_linking: DeepLinkResponder,
	tokens: AccessTokenProvider,
	scores: ScorePublisher,
	roster: RosterClient,
}
impl LtiTool {
	/// Create an [`LtiToolBuilder`] around the given configuration.
	pub fn builder(config: ToolConfig) -> LtiToolBuilder {
		LtiToolBuilder::new(config)
	}

	/// The active configuration.
	pub fn config(&self) -> &ToolConfig {
		&self.config
	}

	/// The correlation store shared with launch validation.
	pub fn contexts(&self) -> Arc<dyn ContextStore> {
		self.contexts.clone()
	}

	// ---- registrations -----------------------------------------------------

	/// Register a platform for a tenant.
	pub async fn register_platform(&self, platform: NewPlatform) -> Result<Uuid> {
		self.registry.register(platform).await
	}

	/// Fetch one registration.
	pub async fn platform(&self, tenant_id: &str, id: Uuid) -> Result<Arc<PlatformRegistration>> {
		self.registry.get(tenant_id, id).await
	}

	/// List a tenant's registrations.
	pub async fn platforms(&self, tenant_id: &str) -> Vec<Arc<PlatformRegistration>> {
		self.registry.list(tenant_id).await
	}

	/// Mark a registration active.
	pub async fn activate_platform(&self, tenant_id: &str, id: Uuid) -> Result<()> {
		self.registry.activate(tenant_id, id).await
	}

	/// Disable a registration, blocking logins through it.
	pub async fn disable_platform(&self, tenant_id: &str, id: Uuid) -> Result<()> {
		self.registry.disable(tenant_id, id).await
	}

	/// Remove a registration.
	pub async fn remove_platform(&self, tenant_id: &str, id: Uuid) -> Result<bool> {
		self.registry.remove(tenant_id, id).await
	}

	/// Rotate a registration's signing key; the old key stays published for
	/// the configured overlap window.
	pub async fn rotate_keys(&self, tenant_id: &str, id: Uuid) -> Result<String> {
		self.registry.rotate_keys(tenant_id, id, self.config.key_overlap).await
	}

	/// The tenant's published JWKS document.
	pub async fn published_jwks(&self, tenant_id: &str) -> ToolJwks {
		self.registry.published_jwks(tenant_id).await
	}

	// ---- launch flow -------------------------------------------------------

	/// Handle a third-party login initiation.
	pub async fn initiate_login(
		&self,
		params: LoginParams,
		tenant_id: &str,
	) -> Result<LoginRedirect> {
		self.login.initiate(params, tenant_id).await
	}

	/// Validate a launch callback and return the launch context.
	pub async fn handle_callback(
		&self,
		params: CallbackParams,
		tenant_id: &str,
	) -> Result<LaunchContext> {
		self.validator.handle_callback(params, tenant_id).await
	}

	// ---- services ----------------------------------------------------------

	/// Sign a deep-linking response for the selected content items.
	pub async fn create_deep_link_response(
		&self,
		request: &DeepLinkingRequest,
		items: &[ContentItem],
		tenant_id: &str,
	) -> Result<DeepLinkResponse> {
		self.deep_linking.create(request, items, tenant_id).await
	}

	/// Publish a score through AGS.
	pub async fn send_score(
		&self,
		tenant_id: &str,
		registration_id: Uuid,
		resource_link_id: &str,
		score: &Score,
	) -> Result<()> {
		self.scores.send_score(tenant_id, registration_id, resource_link_id, score).await
	}

	/// Fetch a context roster through NRPS.
	pub async fn get_members(
		&self,
		tenant_id: &str,
		registration_id: Uuid,
		context_id: &str,
	) -> Result<Vec<Member>> {
		self.roster.get_members(tenant_id, registration_id, context_id).await
	}

	/// Obtain a platform access token directly, for service calls this crate
	/// does not wrap.
	pub async fn access_token(
		&self,
		tenant_id: &str,
		registration_id: Uuid,
		scope: &str,
	) -> Result<String> {
		self.tokens.bearer(tenant_id, registration_id, scope).await
	}

	// ---- maintenance -------------------------------------------------------

	/// Drop expired and consumed login states once.
	pub async fn sweep_states(&self) -> Result<usize> {
		self.states.purge_expired(self.clock.now()).await
	}

	/// Spawn a background task sweeping login states at the given period.
	pub fn spawn_state_sweeper(&self, period: Duration) -> JoinHandle<()> {
		let states = self.states.clone();
		let clock = self.clock.clone();

		tokio::spawn(async move {
			let mut ticker = time::interval(period);

			// The first tick fires immediately; skip it.
			ticker.tick().await;

			loop {
				ticker.tick().await;

				match states.purge_expired(clock.now()).await {
					Ok(purged) if purged > 0 => {
						tracing::debug!(purged, "expired login states swept");
					},
					Ok(_) => {},
					Err(err) => tracing::warn!(error = %err, "login state sweep failed"),
				}
			}
		})
	}
}
