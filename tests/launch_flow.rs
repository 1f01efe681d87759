//! End-to-end login and launch validation against a mock platform.

mod common;

// std
use std::{collections::HashMap, sync::Arc};
// crates.io
use lti_bridge::{
	Error, LoginParams, LtiTool, NewPlatform, Result, ToolConfig,
	launch::validator::CallbackParams,
	store::context::ContextStore as _,
};
use url::Url;
use uuid::Uuid;
use wiremock::MockServer;
// self
use common::PlatformSigner;

const ISSUER: &str = "https://moodle.example";
const CLIENT_ID: &str = "client-77";

async fn tool_with_platform(server: &MockServer) -> Result<(LtiTool, Uuid)> {
	let tool = LtiTool::builder(ToolConfig::new("https://tool.example/")?)
		.require_https(false)
		.build()?;
	let id = tool
		.register_platform(NewPlatform {
			tenant_id: "acme".into(),
			name: "Moodle".into(),
			issuer: ISSUER.into(),
			client_id: CLIENT_ID.into(),
			auth_endpoint: Url::parse("https://moodle.example/auth").unwrap(),
			token_endpoint: format!("{}/token", server.uri()).parse().unwrap(),
			jwks_url: format!("{}/jwks", server.uri()).parse().unwrap(),
		})
		.await?;

	Ok((tool, id))
}

/// Run the login initiation and hand back the issued state and nonce.
async fn begin_login(tool: &LtiTool) -> Result<(String, String)> {
	let redirect = tool
		.initiate_login(
			LoginParams {
				iss: ISSUER.into(),
				login_hint: "hint-1".into(),
				target_link_uri: "https://tool.example/launch".into(),
				client_id: CLIENT_ID.into(),
				lti_message_hint: None,
			},
			"acme",
		)
		.await?;
	let query: HashMap<_, _> = redirect.url.query_pairs().into_owned().collect();

	Ok((query["state"].clone(), query["nonce"].clone()))
}

fn resource_link_claims(nonce: &str) -> serde_json::Value {
	let now = chrono::Utc::now().timestamp();

	serde_json::json!({
		"iss": ISSUER,
		"aud": CLIENT_ID,
		"sub": "user-1",
		"exp": now + 300,
		"iat": now - 5,
		"nonce": nonce,
		"name": "Ada Lovelace",
		"email": "ada@example.edu",
		"https://purl.imsglobal.org/spec/lti/claim/message_type": "LtiResourceLinkRequest",
		"https://purl.imsglobal.org/spec/lti/claim/version": "1.3.0",
		"https://purl.imsglobal.org/spec/lti/claim/deployment_id": "dep-1",
		"https://purl.imsglobal.org/spec/lti/claim/target_link_uri": "https://tool.example/launch",
		"https://purl.imsglobal.org/spec/lti/claim/roles": [
			"http://purl.imsglobal.org/vocab/lis/v2/membership#Instructor"
		],
		"https://purl.imsglobal.org/spec/lti/claim/context": {
			"id": "course-9",
			"title": "Analytical Engines 101"
		},
		"https://purl.imsglobal.org/spec/lti/claim/resource_link": {
			"id": "rl-1",
			"title": "Week 3 quiz"
		},
		"https://purl.imsglobal.org/spec/lti/claim/custom": { "chapter": 3 },
		"https://purl.imsglobal.org/spec/lti-ags/claim/endpoint": {
			"scope": ["https://purl.imsglobal.org/spec/lti-ags/scope/score"],
			"lineitem": "https://moodle.example/lineitems/42"
		},
		"https://purl.imsglobal.org/spec/lti-nrps/claim/namesroleservice": {
			"context_memberships_url": "https://moodle.example/members",
			"service_versions": ["2.0"]
		}
	})
}

#[tokio::test]
async fn full_launch_validates_and_persists_correlation_records() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	common::mount_jwks(&server, &signer).await;

	let (tool, registration_id) = tool_with_platform(&server).await?;
	let (state, nonce) = begin_login(&tool).await?;
	let id_token = signer.sign(&resource_link_claims(&nonce));
	let context = tool.handle_callback(CallbackParams { state, id_token }, "acme").await?;

	assert_eq!(context.tenant_id, "acme");
	assert_eq!(context.registration_id, registration_id);
	assert_eq!(context.subject, "user-1");
	assert!(context.has_role("Instructor"));
	assert_eq!(context.custom["chapter"], "3");

	// The launch promoted the registration and persisted correlation records.
	let registration = tool.platform("acme", registration_id).await?;

	assert_eq!(registration.state, lti_bridge::RegistrationState::Active);

	let stores = tool.contexts();
	let link = stores.find_resource_link("acme", "rl-1").await?.expect("resource link");

	assert_eq!(
		link.line_item_url.unwrap().as_str(),
		"https://moodle.example/lineitems/42"
	);

	let course = stores.find_context("acme", "course-9").await?.expect("context");

	assert_eq!(course.memberships_url.unwrap().as_str(), "https://moodle.example/members");

	let user = stores.find_user("acme", "user-1").await?.expect("user");

	assert_eq!(user.email.as_deref(), Some("ada@example.edu"));

	Ok(())
}

#[tokio::test]
async fn replayed_state_is_rejected() -> Result<()> {
	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	common::mount_jwks(&server, &signer).await;

	let (tool, _) = tool_with_platform(&server).await?;
	let (state, nonce) = begin_login(&tool).await?;
	let id_token = signer.sign(&resource_link_claims(&nonce));

	tool.handle_callback(
		CallbackParams { state: state.clone(), id_token: id_token.clone() },
		"acme",
	)
	.await?;

	let err = tool.handle_callback(CallbackParams { state, id_token }, "acme").await.unwrap_err();

	assert!(matches!(err, Error::InvalidState(_)));

	Ok(())
}

#[tokio::test]
async fn unknown_kid_is_a_signature_failure() -> Result<()> {
	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	common::mount_jwks(&server, &signer).await;

	let (tool, _) = tool_with_platform(&server).await?;
	let (state, nonce) = begin_login(&tool).await?;
	let id_token = signer.sign_with_kid(&resource_link_claims(&nonce), "rotated-away");
	let err = tool.handle_callback(CallbackParams { state, id_token }, "acme").await.unwrap_err();

	assert!(matches!(err, Error::BadSignature(_)));

	Ok(())
}

#[tokio::test]
async fn nonce_from_a_different_login_is_rejected() -> Result<()> {
	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	common::mount_jwks(&server, &signer).await;

	let (tool, _) = tool_with_platform(&server).await?;
	let (state, _) = begin_login(&tool).await?;
	let id_token = signer.sign(&resource_link_claims("a-nonce-from-elsewhere"));
	let err = tool.handle_callback(CallbackParams { state, id_token }, "acme").await.unwrap_err();

	assert!(matches!(err, Error::NonceReplay));

	Ok(())
}

#[tokio::test]
async fn audience_mismatch_is_rejected() -> Result<()> {
	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	common::mount_jwks(&server, &signer).await;

	let (tool, _) = tool_with_platform(&server).await?;
	let (state, nonce) = begin_login(&tool).await?;
	let mut claims = resource_link_claims(&nonce);

	claims["aud"] = serde_json::json!("some-other-client");

	let id_token = signer.sign(&claims);
	let err = tool.handle_callback(CallbackParams { state, id_token }, "acme").await.unwrap_err();

	assert!(matches!(err, Error::ClaimMismatch { claim: "aud", .. }));

	Ok(())
}

#[tokio::test]
async fn audience_arrays_match_on_the_registered_client_id() -> Result<()> {
	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	common::mount_jwks(&server, &signer).await;

	let (tool, _) = tool_with_platform(&server).await?;
	let (state, nonce) = begin_login(&tool).await?;
	let mut claims = resource_link_claims(&nonce);

	claims["aud"] = serde_json::json!(["another-listener", CLIENT_ID]);

	let id_token = signer.sign(&claims);
	let context = tool.handle_callback(CallbackParams { state, id_token }, "acme").await?;

	assert_eq!(context.subject, "user-1");

	Ok(())
}

#[tokio::test]
async fn tenants_cannot_consume_each_others_states() -> Result<()> {
	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	common::mount_jwks(&server, &signer).await;

	let (tool, _) = tool_with_platform(&server).await?;

	// Same platform registered under a second tenant.
	tool.register_platform(NewPlatform {
		tenant_id: "globex".into(),
		name: "Moodle".into(),
		issuer: ISSUER.into(),
		client_id: CLIENT_ID.into(),
		auth_endpoint: Url::parse("https://moodle.example/auth").unwrap(),
		token_endpoint: format!("{}/token", server.uri()).parse().unwrap(),
		jwks_url: format!("{}/jwks", server.uri()).parse().unwrap(),
	})
	.await?;

	let (state, nonce) = begin_login(&tool).await?;
	let id_token = signer.sign(&resource_link_claims(&nonce));
	let err =
		tool.handle_callback(CallbackParams { state, id_token }, "globex").await.unwrap_err();

	assert!(matches!(err, Error::InvalidState(_)));

	Ok(())
}

#[tokio::test]
async fn deep_linking_launch_yields_the_return_settings() -> Result<()> {
	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	common::mount_jwks(&server, &signer).await;

	let (tool, _) = tool_with_platform(&server).await?;
	let (state, nonce) = begin_login(&tool).await?;
	let now = chrono::Utc::now().timestamp();
	let claims = serde_json::json!({
		"iss": ISSUER,
		"aud": CLIENT_ID,
		"sub": "user-1",
		"exp": now + 300,
		"iat": now - 5,
		"nonce": nonce,
		"https://purl.imsglobal.org/spec/lti/claim/message_type": "LtiDeepLinkingRequest",
		"https://purl.imsglobal.org/spec/lti/claim/version": "1.3.0",
		"https://purl.imsglobal.org/spec/lti/claim/deployment_id": "dep-1",
		"https://purl.imsglobal.org/spec/lti/claim/roles": [],
		"https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings": {
			"deep_link_return_url": "https://moodle.example/deep-link/return",
			"accept_types": ["ltiResourceLink"],
			"accept_presentation_document_targets": ["iframe", "window"],
			"accept_multiple": true,
			"data": "platform-opaque"
		}
	});
	let id_token = signer.sign(&claims);
	let context = tool.handle_callback(CallbackParams { state, id_token }, "acme").await?;
	let settings = context.deep_linking.as_ref().expect("settings");

	assert_eq!(settings.data.as_deref(), Some("platform-opaque"));

	let request = lti_bridge::deep_linking::DeepLinkingRequest::from_launch(&context)?;
	let response = tool
		.create_deep_link_response(
			&request,
			&[lti_bridge::deep_linking::ContentItem::Link {
				url: Url::parse("https://tool.example/acme/reading").unwrap(),
				title: Some("Reading list".into()),
			}],
			"acme",
		)
		.await?;

	assert!(response.auto_submit);
	assert_eq!(response.return_url.as_str(), "https://moodle.example/deep-link/return");

	Ok(())
}

#[tokio::test]
async fn repeated_launches_fetch_the_platform_jwks_once() -> Result<()> {
	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	wiremock::Mock::given(wiremock::matchers::method("GET"))
		.and(wiremock::matchers::path("/jwks"))
		.respond_with(
			wiremock::ResponseTemplate::new(200)
				.set_body_string(signer.jwks_body.clone())
				.insert_header("content-type", "application/json"),
		)
		.expect(1)
		.mount(&server)
		.await;

	let (tool, _) = tool_with_platform(&server).await?;

	for _ in 0..3 {
		let (state, nonce) = begin_login(&tool).await?;
		let id_token = signer.sign(&resource_link_claims(&nonce));

		tool.handle_callback(CallbackParams { state, id_token }, "acme").await?;
	}

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn concurrent_cold_cache_launches_share_one_jwks_fetch() -> Result<()> {
	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	wiremock::Mock::given(wiremock::matchers::method("GET"))
		.and(wiremock::matchers::path("/jwks"))
		.respond_with(
			wiremock::ResponseTemplate::new(200)
				.set_body_string(signer.jwks_body.clone())
				.insert_header("content-type", "application/json"),
		)
		.expect(1)
		.mount(&server)
		.await;

	let (tool, _) = tool_with_platform(&server).await?;
	let mut callbacks = Vec::new();

	for _ in 0..4 {
		let (state, nonce) = begin_login(&tool).await?;
		let id_token = signer.sign(&resource_link_claims(&nonce));

		callbacks.push(CallbackParams { state, id_token });
	}

	let tool = Arc::new(tool);
	let mut tasks = Vec::new();

	// Distinct logins racing into an empty cache; the misses must coalesce.
	for params in callbacks {
		let tool = tool.clone();

		tasks.push(tokio::spawn(
			async move { tool.handle_callback(params, "acme").await },
		));
	}

	for task in tasks {
		task.await.expect("join")?;
	}

	server.verify().await;
	Ok(())
}

#[tokio::test]
async fn concurrent_duplicate_callbacks_have_one_winner() -> Result<()> {
	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	common::mount_jwks(&server, &signer).await;

	let (tool, _) = tool_with_platform(&server).await?;
	let (state, nonce) = begin_login(&tool).await?;
	let id_token = signer.sign(&resource_link_claims(&nonce));
	let tool = Arc::new(tool);
	let mut tasks = Vec::new();

	for _ in 0..4 {
		let tool = tool.clone();
		let params = CallbackParams { state: state.clone(), id_token: id_token.clone() };

		tasks.push(tokio::spawn(async move { tool.handle_callback(params, "acme").await }));
	}

	let mut won = 0;

	for task in tasks {
		if task.await.expect("join").is_ok() {
			won += 1;
		}
	}

	assert_eq!(won, 1);

	Ok(())
}
