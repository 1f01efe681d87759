//! Typed LTI 1.3 claim set.
//!
//! The id_token carries LTI data under full claim URIs; this module maps them
//! onto serde structs and defines the [`LaunchContext`] handed to the
//! application after a successful launch.

// std
use std::collections::HashMap;
// crates.io
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// LTI version this layer accepts.
pub const LTI_VERSION: &str = "1.3.0";

/// LTI message types this layer dispatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
	/// Ordinary resource-link launch.
	LtiResourceLinkRequest,
	/// Content selection flow; answered with a deep-linking response.
	LtiDeepLinkingRequest,
	/// Instructor review of a learner submission.
	LtiSubmissionReviewRequest,
}
impl MessageType {
	/// Parse the raw `message_type` claim value.
	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"LtiResourceLinkRequest" => Some(Self::LtiResourceLinkRequest),
			"LtiDeepLinkingRequest" => Some(Self::LtiDeepLinkingRequest),
			"LtiSubmissionReviewRequest" => Some(Self::LtiSubmissionReviewRequest),
			_ => None,
		}
	}

	/// The wire value of the claim.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::LtiResourceLinkRequest => "LtiResourceLinkRequest",
			Self::LtiDeepLinkingRequest => "LtiDeepLinkingRequest",
			Self::LtiSubmissionReviewRequest => "LtiSubmissionReviewRequest",
		}
	}
}

/// `aud` appears as a single string or an array of strings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
	/// Single audience value.
	One(String),
	/// Multiple audience values.
	Many(Vec<String>),
}
impl Audience {
	/// Whether the audience contains the given client id.
	pub fn contains(&self, client_id: &str) -> bool {
		match self {
			Self::One(value) => value == client_id,
			Self::Many(values) => values.iter().any(|value| value == client_id),
		}
	}
}

/// The `context` claim: course-level information.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextClaim {
	/// Stable context identifier.
	pub id: String,
	/// Short label, e.g. a course code.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub label: Option<String>,
	/// Human-readable title.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	/// Context type URIs.
	#[serde(default, rename = "type", skip_serializing_if = "Vec::is_empty")]
	pub kind: Vec<String>,
}

/// The `resource_link` claim: link-level information.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceLinkClaim {
	/// Stable resource link identifier.
	pub id: String,
	/// Link title.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	/// Link description.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
}

/// The AGS `endpoint` claim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgsEndpointClaim {
	/// Scopes the platform grants for this launch.
	#[serde(default)]
	pub scope: Vec<String>,
	/// Line-item collection URL.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lineitems: Option<Url>,
	/// Line-item URL coupled to the launched resource link.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub lineitem: Option<Url>,
}

/// The NRPS `namesroleservice` claim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NrpsClaim {
	/// Membership container URL for the launched context.
	pub context_memberships_url: Url,
	/// NRPS versions the platform supports.
	#[serde(default)]
	pub service_versions: Vec<String>,
}

/// The deep-linking settings claim carried by `LtiDeepLinkingRequest`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeepLinkingSettings {
	/// URL the signed response JWT is posted back to.
	pub deep_link_return_url: Url,
	/// Content item types the platform accepts.
	#[serde(default)]
	pub accept_types: Vec<String>,
	/// Presentation targets the platform accepts.
	#[serde(default)]
	pub accept_presentation_document_targets: Vec<String>,
	/// Whether multiple content items may be returned.
	#[serde(default)]
	pub accept_multiple: bool,
	/// Opaque platform state; must be echoed verbatim in the response.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<String>,
	/// Title suggested for the selection.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
}

/// The `for_user` claim on submission-review launches.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ForUserClaim {
	/// Subject whose submission is under review.
	pub user_id: String,
	/// Display name, when shared.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
}

/// Full id_token claim set for an LTI launch.
#[derive(Clone, Debug, Deserialize)]
pub struct IdTokenClaims {
	/// Token issuer; must equal the registration's issuer.
	pub iss: String,
	/// Audience; must contain the registration's client id.
	pub aud: Audience,
	/// Stable subject identifier of the launching user.
	pub sub: String,
	/// Expiry, seconds since epoch.
	pub exp: i64,
	/// Issued-at, seconds since epoch.
	pub iat: i64,
	/// Nonce bound to the login attempt.
	#[serde(default)]
	pub nonce: Option<String>,
	/// Display name.
	#[serde(default)]
	pub name: Option<String>,
	/// Email address.
	#[serde(default)]
	pub email: Option<String>,

	/// LTI message type.
	#[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/message_type")]
	pub message_type: Option<String>,
	/// LTI version; must be `1.3.0`.
	#[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/version")]
	pub version: Option<String>,
	/// Deployment id scoping the launch within the platform.
	#[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/deployment_id")]
	pub deployment_id: Option<String>,
	/// The link the launch targets.
	#[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/target_link_uri")]
	pub target_link_uri: Option<String>,
	/// Role URIs of the launching user.
	#[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/roles")]
	pub roles: Vec<String>,
	/// Course context.
	#[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/context")]
	pub context: Option<ContextClaim>,
	/// Resource link.
	#[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/resource_link")]
	pub resource_link: Option<ResourceLinkClaim>,
	/// Custom parameters configured on the platform.
	#[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/custom")]
	pub custom: HashMap<String, serde_json::Value>,
	/// AGS endpoints.
	#[serde(default, rename = "https://purl.imsglobal.org/spec/lti-ags/claim/endpoint")]
	pub ags: Option<AgsEndpointClaim>,
	/// NRPS endpoint.
	#[serde(
		default,
		rename = "https://purl.imsglobal.org/spec/lti-nrps/claim/namesroleservice"
	)]
	pub nrps: Option<NrpsClaim>,
	/// Deep-linking settings.
	#[serde(
		default,
		rename = "https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings"
	)]
	pub deep_linking_settings: Option<DeepLinkingSettings>,
	/// Reviewed user on submission-review launches.
	#[serde(default, rename = "https://purl.imsglobal.org/spec/lti/claim/for_user")]
	pub for_user: Option<ForUserClaim>,
}

/// Everything the application needs from a validated launch.
///
/// Ephemeral: built per launch and handed to the hosting page; the durable
/// pieces are persisted separately through the context store.
#[derive(Clone, Debug)]
pub struct LaunchContext {
	/// Message type the launch carried.
	pub message_type: MessageType,
	/// Tenant scope.
	pub tenant_id: String,
	/// Registration the launch arrived through.
	pub registration_id: Uuid,
	/// Deployment id scoping the launch within the platform.
	pub deployment_id: String,
	/// Stable subject identifier of the launching user.
	pub subject: String,
	/// Display name, when shared.
	pub name: Option<String>,
	/// Email, when shared.
	pub email: Option<String>,
	/// Role URIs of the launching user.
	pub roles: Vec<String>,
	/// Course context, when present.
	pub context: Option<ContextClaim>,
	/// Resource link, on resource-link and submission-review launches.
	pub resource_link: Option<ResourceLinkClaim>,
	/// The link the launch targets.
	pub target_link_uri: Option<String>,
	/// Custom parameters, flattened to strings.
	pub custom: HashMap<String, String>,
	/// AGS endpoints granted for this launch.
	pub ags: Option<AgsEndpointClaim>,
	/// NRPS endpoint granted for this launch.
	pub nrps: Option<NrpsClaim>,
	/// Deep-linking settings, on deep-linking launches.
	pub deep_linking: Option<DeepLinkingSettings>,
	/// Reviewed user, on submission-review launches.
	pub for_user: Option<ForUserClaim>,
}
impl LaunchContext {
	/// Whether the launching user carries the given role, matched against the
	/// short name or the full role URI.
	pub fn has_role(&self, role: &str) -> bool {
		self.roles.iter().any(|candidate| {
			candidate == role || candidate.rsplit('#').next() == Some(role)
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn audience_matches_string_and_array_forms() {
		let one = Audience::One("abc".into());
		let many = Audience::Many(vec!["other".into(), "abc".into()]);

		assert!(one.contains("abc"));
		assert!(many.contains("abc"));
		assert!(!one.contains("xyz"));
		assert!(!many.contains("xyz"));
	}

	#[test]
	fn role_matching_accepts_short_names_and_uris() {
		let context = LaunchContext {
			message_type: MessageType::LtiResourceLinkRequest,
			tenant_id: "acme".into(),
			registration_id: Uuid::new_v4(),
			deployment_id: "d1".into(),
			subject: "sub".into(),
			name: None,
			email: None,
			roles: vec![
				"http://purl.imsglobal.org/vocab/lis/v2/membership#Instructor".into(),
			],
			context: None,
			resource_link: None,
			target_link_uri: None,
			custom: HashMap::new(),
			ags: None,
			nrps: None,
			deep_linking: None,
			for_user: None,
		};

		assert!(context.has_role("Instructor"));
		assert!(
			context.has_role("http://purl.imsglobal.org/vocab/lis/v2/membership#Instructor")
		);
		assert!(!context.has_role("Learner"));
	}

	#[test]
	fn claim_uris_deserialize_into_typed_fields() {
		let json = serde_json::json!({
			"iss": "https://moodle.example",
			"aud": "abc",
			"sub": "user-1",
			"exp": 2_000_000_000,
			"iat": 1_999_999_700,
			"nonce": "n",
			"https://purl.imsglobal.org/spec/lti/claim/message_type": "LtiResourceLinkRequest",
			"https://purl.imsglobal.org/spec/lti/claim/version": "1.3.0",
			"https://purl.imsglobal.org/spec/lti/claim/deployment_id": "dep-1",
			"https://purl.imsglobal.org/spec/lti/claim/roles": [
				"http://purl.imsglobal.org/vocab/lis/v2/membership#Learner"
			],
			"https://purl.imsglobal.org/spec/lti/claim/context": { "id": "course-1", "title": "Biology" },
			"https://purl.imsglobal.org/spec/lti/claim/resource_link": { "id": "rl-1" },
			"https://purl.imsglobal.org/spec/lti/claim/custom": { "chapter": 7 }
		});
		let claims: IdTokenClaims = serde_json::from_value(json).expect("claims");

		assert_eq!(claims.message_type.as_deref(), Some("LtiResourceLinkRequest"));
		assert_eq!(claims.context.as_ref().unwrap().id, "course-1");
		assert_eq!(claims.resource_link.as_ref().unwrap().id, "rl-1");
		assert_eq!(claims.custom["chapter"], serde_json::json!(7));
	}
}
