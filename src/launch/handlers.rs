//! Per-message-type launch handling.
//!
//! Claim extraction is a pure function from verified claims to a
//! [`LaunchContext`]; the validator persists correlation records afterwards as
//! a separate step, so handlers never touch storage.

// self
use crate::{
	_prelude::*,
	launch::claims::{IdTokenClaims, LaunchContext, LTI_VERSION, MessageType},
	registry::PlatformRegistration,
};

/// Build a [`LaunchContext`] from verified claims.
///
/// Enforces the message-agnostic LTI requirements (version, deployment id)
/// and the per-message-type required claims.
pub fn build_launch_context(
	claims: &IdTokenClaims,
	registration: &PlatformRegistration,
) -> Result<LaunchContext> {
	let version = claims.version.as_deref().unwrap_or_default();

	if version != LTI_VERSION {
		return Err(Error::ClaimMismatch {
			claim: "version",
			reason: format!("Expected LTI {LTI_VERSION}, got '{version}'."),
		});
	}

	let deployment_id = claims
		.deployment_id
		.as_deref()
		.filter(|value| !value.is_empty())
		.ok_or(Error::ClaimMismatch {
			claim: "deployment_id",
			reason: "Missing or empty.".into(),
		})?;
	let raw_type = claims.message_type.as_deref().unwrap_or_default();
	let message_type = MessageType::parse(raw_type)
		.ok_or_else(|| Error::UnsupportedMessageType(raw_type.to_string()))?;

	match message_type {
		MessageType::LtiResourceLinkRequest => {
			require(claims.resource_link.is_some(), "resource_link")?;
			require(claims.target_link_uri.is_some(), "target_link_uri")?;
		},
		MessageType::LtiDeepLinkingRequest => {
			require(claims.deep_linking_settings.is_some(), "deep_linking_settings")?;
		},
		MessageType::LtiSubmissionReviewRequest => {
			require(claims.resource_link.is_some(), "resource_link")?;
			require(claims.for_user.is_some(), "for_user")?;
		},
	}

	Ok(LaunchContext {
		message_type,
		tenant_id: registration.tenant_id.clone(),
		registration_id: registration.id,
		deployment_id: deployment_id.to_string(),
		subject: claims.sub.clone(),
		name: claims.name.clone(),
		email: claims.email.clone(),
		roles: claims.roles.clone(),
		context: claims.context.clone(),
		resource_link: claims.resource_link.clone(),
		target_link_uri: claims.target_link_uri.clone(),
		custom: flatten_custom(claims),
		ags: claims.ags.clone(),
		nrps: claims.nrps.clone(),
		deep_linking: claims.deep_linking_settings.clone(),
		for_user: claims.for_user.clone(),
	})
}

fn require(present: bool, claim: &'static str) -> Result<()> {
	if present {
		Ok(())
	} else {
		Err(Error::ClaimMismatch { claim, reason: "Required for this message type.".into() })
	}
}

// Custom parameter values are strings per the LTI spec, but platforms send
// bare numbers and booleans in practice.
fn flatten_custom(claims: &IdTokenClaims) -> std::collections::HashMap<String, String> {
	claims
		.custom
		.iter()
		.map(|(key, value)| {
			let value = match value {
				serde_json::Value::String(s) => s.clone(),
				other => other.to_string(),
			};

			(key.clone(), value)
		})
		.collect()
}

#[cfg(test)]
mod tests {
	// crates.io
	use url::Url;
	// self
	use super::*;
	use crate::{
		keys::ToolKeySet,
		registry::{PlatformRegistration, RegistrationState},
	};

	fn registration() -> PlatformRegistration {
		let now = chrono::Utc::now();

		PlatformRegistration {
			id: uuid::Uuid::new_v4(),
			tenant_id: "acme".into(),
			name: "Moodle".into(),
			issuer: "https://moodle.example".into(),
			client_id: "abc".into(),
			auth_endpoint: Url::parse("https://moodle.example/auth").unwrap(),
			token_endpoint: Url::parse("https://moodle.example/token").unwrap(),
			jwks_url: Url::parse("https://moodle.example/jwks").unwrap(),
			state: RegistrationState::Active,
			keys: ToolKeySet::generate(now).unwrap(),
			created_at: now,
		}
	}

	fn claims(message_type: &str) -> IdTokenClaims {
		serde_json::from_value(serde_json::json!({
			"iss": "https://moodle.example",
			"aud": "abc",
			"sub": "user-1",
			"exp": 2_000_000_000,
			"iat": 1_999_999_700,
			"https://purl.imsglobal.org/spec/lti/claim/message_type": message_type,
			"https://purl.imsglobal.org/spec/lti/claim/version": "1.3.0",
			"https://purl.imsglobal.org/spec/lti/claim/deployment_id": "dep-1",
			"https://purl.imsglobal.org/spec/lti/claim/target_link_uri": "https://tool.example/launch",
			"https://purl.imsglobal.org/spec/lti/claim/roles": [
				"http://purl.imsglobal.org/vocab/lis/v2/membership#Instructor"
			],
			"https://purl.imsglobal.org/spec/lti/claim/resource_link": { "id": "rl-1" }
		}))
		.expect("claims")
	}

	#[test]
	fn resource_link_launch_builds_context_with_roles() {
		let context =
			build_launch_context(&claims("LtiResourceLinkRequest"), &registration()).expect("context");

		assert_eq!(context.message_type, MessageType::LtiResourceLinkRequest);
		assert!(context.has_role("Instructor"));
		assert_eq!(context.resource_link.unwrap().id, "rl-1");
	}

	#[test]
	fn unknown_message_type_is_rejected() {
		let err = build_launch_context(&claims("LtiWeirdRequest"), &registration()).unwrap_err();

		assert!(matches!(err, Error::UnsupportedMessageType(raw) if raw == "LtiWeirdRequest"));
	}

	#[test]
	fn wrong_version_is_rejected() {
		let mut claims = claims("LtiResourceLinkRequest");

		claims.version = Some("1.1".into());

		let err = build_launch_context(&claims, &registration()).unwrap_err();

		assert!(matches!(err, Error::ClaimMismatch { claim: "version", .. }));
	}

	#[test]
	fn deep_linking_requires_settings_claim() {
		let err =
			build_launch_context(&claims("LtiDeepLinkingRequest"), &registration()).unwrap_err();

		assert!(matches!(err, Error::ClaimMismatch { claim: "deep_linking_settings", .. }));
	}

	#[test]
	fn submission_review_requires_for_user() {
		let err = build_launch_context(&claims("LtiSubmissionReviewRequest"), &registration())
			.unwrap_err();

		assert!(matches!(err, Error::ClaimMismatch { claim: "for_user", .. }));
	}
}
