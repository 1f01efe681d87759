//! Names and Role Provisioning Services roster retrieval.

// crates.io
use serde::Deserialize;
use url::Url;
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	client::{send_with_retry, token::AccessTokenProvider},
	config::ToolConfig,
	store::context::ContextStore,
};

/// OAuth2 scope required to read context membership.
pub const MEMBERSHIP_SCOPE: &str =
	"https://purl.imsglobal.org/spec/lti-nrps/scope/contextmembership.readonly";
const CONTAINER_MEDIA_TYPE: &str = "application/vnd.ims.lti-nrps.v2.membershipcontainer+json";
/// Upper bound on followed pagination links for one roster request.
const MAX_PAGES: usize = 64;

/// One member of a context roster.
#[derive(Clone, Debug, Deserialize)]
pub struct Member {
	/// Platform subject identifier, matching `sub` in launches.
	pub user_id: String,
	/// Display name.
	#[serde(default)]
	pub name: Option<String>,
	/// Email address, when the platform shares it.
	#[serde(default)]
	pub email: Option<String>,
	/// Role URIs held in the context.
	#[serde(default)]
	pub roles: Vec<String>,
	/// Membership status; `Active` when the platform omits it.
	#[serde(default)]
	pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MembershipContainer {
	#[serde(default)]
	members: Vec<Member>,
}

/// Retrieves context rosters through the membership service URL recorded at
/// launch time.
#[derive(Clone, Debug)]
pub struct RosterClient {
	client: reqwest::Client,
	contexts: Arc<dyn ContextStore>,
	tokens: AccessTokenProvider,
	config: Arc<ToolConfig>,
}
impl RosterClient {
	pub(crate) fn new(
		client: reqwest::Client,
		contexts: Arc<dyn ContextStore>,
		tokens: AccessTokenProvider,
		config: Arc<ToolConfig>,
	) -> Self {
		Self { client, contexts, tokens, config }
	}

	/// Fetch the full roster for a context, following pagination.
	#[tracing::instrument(
		skip(self),
		fields(tenant = %tenant_id, registration = %registration_id, context = %context_id)
	)]
	pub async fn get_members(
		&self,
		tenant_id: &str,
		registration_id: Uuid,
		context_id: &str,
	) -> Result<Vec<Member>> {
		let context = self
			.contexts
			.find_context(tenant_id, context_id)
			.await?
			.ok_or_else(|| Error::UnknownContext {
				tenant: tenant_id.into(),
				context: context_id.into(),
			})?;
		let mut next = Some(context.memberships_url.ok_or(Error::Validation {
			field: "memberships_url",
			reason: "No membership service was advertised for this context.".into(),
		})?);
		let bearer = self.tokens.bearer(tenant_id, registration_id, MEMBERSHIP_SCOPE).await?;
		let mut members = Vec::new();
		let mut pages = 0;

		while let Some(url) = next.take() {
			if pages == MAX_PAGES {
				return Err(Error::Persistence(format!(
					"Membership pagination exceeded {MAX_PAGES} pages."
				)));
			}

			pages += 1;

			let request = self
				.client
				.get(url.clone())
				.bearer_auth(&bearer)
				.header(reqwest::header::ACCEPT, CONTAINER_MEDIA_TYPE);
			let response =
				send_with_retry(&self.config.retry_policy, request, url.as_str()).await?;

			next = next_page(&response)?;

			let container = response.json::<MembershipContainer>().await.map_err(Error::Reqwest)?;

			members.extend(container.members);
		}

		tracing::info!(members = members.len(), pages, "roster retrieved");

		Ok(members)
	}
}

fn next_page(response: &reqwest::Response) -> Result<Option<Url>> {
	let Some(header) = response.headers().get(reqwest::header::LINK) else {
		return Ok(None);
	};
	let value = header.to_str().map_err(|_| {
		Error::Persistence("Membership Link header is not valid ASCII.".into())
	})?;

	match parse_next_link(value) {
		Some(raw) => Ok(Some(Url::parse(raw)?)),
		None => Ok(None),
	}
}

/// Extract the `rel="next"` target from an RFC 8288 `Link` header.
fn parse_next_link(header: &str) -> Option<&str> {
	for part in header.split(',') {
		let part = part.trim();
		let Some((target, params)) = part.split_once('>') else {
			continue;
		};
		let Some(target) = target.strip_prefix('<') else {
			continue;
		};

		for param in params.split(';') {
			let param = param.trim();

			if let Some(rel) = param.strip_prefix("rel=") {
				if rel.trim_matches('"').split_ascii_whitespace().any(|rel| rel == "next") {
					return Some(target);
				}
			}
		}
	}

	None
}
