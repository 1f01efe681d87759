//! Deep-linking response construction.
//!
//! After a `LtiDeepLinkingRequest` launch the tool lets the user pick content,
//! then posts a signed response JWT back to the platform's return URL. The
//! request's `data` claim is echoed verbatim so the platform can detect
//! tampering.

// std
use std::collections::HashMap;
// crates.io
use jsonwebtoken::{Algorithm, Header, encode};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	clock::{Clock, RandomSource, generate_token},
	launch::claims::{LTI_VERSION, LaunchContext, MessageType},
	registry::PlatformRegistry,
};

/// Lifetime of a deep-linking response JWT.
const RESPONSE_TTL_SECS: i64 = 300;

const CONTENT_ITEMS_CLAIM: &str = "https://purl.imsglobal.org/spec/lti-dl/claim/content_items";
const DATA_CLAIM: &str = "https://purl.imsglobal.org/spec/lti-dl/claim/data";

/// Line-item hint attached to a returned resource link for auto-grading.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItemHint {
	/// Maximum score for the line item the platform should create.
	pub score_maximum: f64,
	/// Line-item label.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub label: Option<String>,
	/// Tool-side resource identifier.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub resource_id: Option<String>,
	/// Grouping tag.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub tag: Option<String>,
}

/// A content item returned to the platform.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentItem {
	/// Plain hyperlink.
	#[serde(rename = "link")]
	Link {
		/// Target URL.
		url: Url,
		/// Display title.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		title: Option<String>,
	},
	/// An LTI resource link launched back through this tool.
	#[serde(rename = "ltiResourceLink", rename_all = "camelCase")]
	LtiResourceLink {
		/// Launch URL; defaults to the registration's target when omitted.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		url: Option<Url>,
		/// Display title.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		title: Option<String>,
		/// Custom parameters replayed on every launch of the link.
		#[serde(default, skip_serializing_if = "HashMap::is_empty")]
		custom: HashMap<String, String>,
		/// Line-item hint for auto-grading.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		line_item: Option<LineItemHint>,
	},
	/// Downloadable file.
	#[serde(rename = "file", rename_all = "camelCase")]
	File {
		/// File URL.
		url: Url,
		/// Display title.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		title: Option<String>,
		/// Expiry of the download URL.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		expires_at: Option<DateTime<Utc>>,
	},
	/// Embedded image.
	#[serde(rename = "image")]
	Image {
		/// Image URL.
		url: Url,
		/// Display title.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		title: Option<String>,
		/// Pixel width.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		width: Option<u32>,
		/// Pixel height.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		height: Option<u32>,
	},
}

/// The subset of a deep-linking launch the response is built from.
#[derive(Clone, Debug, Deserialize)]
pub struct DeepLinkingRequest {
	/// Registration the launch arrived through.
	pub registration_id: Uuid,
	/// Deployment id from the launch.
	pub deployment_id: String,
	/// URL the response JWT is posted back to.
	pub return_url: Url,
	/// Opaque platform state to echo verbatim.
	#[serde(default)]
	pub data: Option<String>,
}
impl DeepLinkingRequest {
	/// Extract the request from a validated deep-linking launch.
	pub fn from_launch(context: &LaunchContext) -> Result<Self> {
		if context.message_type != MessageType::LtiDeepLinkingRequest {
			return Err(Error::ClaimMismatch {
				claim: "message_type",
				reason: "Launch is not a deep-linking request.".into(),
			});
		}

		let settings = context.deep_linking.as_ref().ok_or(Error::ClaimMismatch {
			claim: "deep_linking_settings",
			reason: "Missing on deep-linking launch.".into(),
		})?;

		Ok(Self {
			registration_id: context.registration_id,
			deployment_id: context.deployment_id.clone(),
			return_url: settings.deep_link_return_url.clone(),
			data: settings.data.clone(),
		})
	}
}

/// Signed response handed to the auto-posting form.
#[derive(Clone, Debug, Serialize)]
pub struct DeepLinkResponse {
	/// Signed response JWT carrying the content items.
	pub jwt: String,
	/// URL the form posts to.
	pub return_url: Url,
	/// Whether the hosting page should submit the form without interaction.
	pub auto_submit: bool,
}

#[derive(Debug, Serialize)]
struct ResponseClaims<'a> {
	iss: &'a str,
	aud: &'a str,
	iat: i64,
	exp: i64,
	nonce: String,
	#[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/message_type")]
	message_type: &'static str,
	#[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/version")]
	version: &'static str,
	#[serde(rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id")]
	deployment_id: &'a str,
	#[serde(rename = "https://purl.imsglobal.org/spec/lti-dl/claim/content_items")]
	content_items: &'a [ContentItem],
	#[serde(
		rename = "https://purl.imsglobal.org/spec/lti-dl/claim/data",
		skip_serializing_if = "Option::is_none"
	)]
	data: Option<&'a str>,
}

/// Builds and signs deep-linking response JWTs.
#[derive(Clone, Debug)]
pub struct DeepLinkResponder {
	registry: PlatformRegistry,
	clock: Arc<dyn Clock>,
	random: Arc<dyn RandomSource>,
}
impl DeepLinkResponder {
	pub(crate) fn new(
		registry: PlatformRegistry,
		clock: Arc<dyn Clock>,
		random: Arc<dyn RandomSource>,
	) -> Self {
		Self { registry, clock, random }
	}

	/// Sign the selected content items into a response for the platform.
	///
	/// In the response the tool is the issuer and the platform the audience,
	/// the mirror image of the launch direction.
	#[tracing::instrument(skip(self, request, items), fields(tenant = %tenant_id, registration = %request.registration_id))]
	pub async fn create(
		&self,
		request: &DeepLinkingRequest,
		items: &[ContentItem],
		tenant_id: &str,
	) -> Result<DeepLinkResponse> {
		let registration = self.registry.get(tenant_id, request.registration_id).await?;
		let now = self.clock.now();
		let key = registration.keys.current()?;
		let claims = ResponseClaims {
			iss: &registration.client_id,
			aud: &registration.issuer,
			iat: now.timestamp(),
			exp: now.timestamp() + RESPONSE_TTL_SECS,
			nonce: generate_token(self.random.as_ref()),
			message_type: "LtiDeepLinkingResponse",
			version: LTI_VERSION,
			deployment_id: &request.deployment_id,
			content_items: items,
			data: request.data.as_deref(),
		};
		let mut header = Header::new(Algorithm::RS256);

		header.kid = Some(key.kid.clone());

		let jwt = encode(&header, &claims, &key.encoding_key()?)?;

		tracing::debug!(items = items.len(), "deep-linking response signed");

		Ok(DeepLinkResponse { jwt, return_url: request.return_url.clone(), auto_submit: true })
	}
}
