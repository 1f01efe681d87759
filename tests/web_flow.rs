//! The browser-facing flow driven through the router.

mod common;

// std
use std::{collections::HashMap, sync::Arc};
// crates.io
use axum::{
	body::Body,
	http::{Request, StatusCode},
};
use lti_bridge::{
	LtiTool, NewPlatform, Result, ToolConfig,
	web::{self, PlainLaunchPage},
};
use tower::ServiceExt;
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

async fn body_string(response: axum::response::Response) -> String {
	let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.expect("body");

	String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

#[tokio::test]
async fn launch_round_trip_over_http() -> Result<()> {
	let _ = tracing_subscriber::fmt::try_init();

	let server = MockServer::start().await;
	let signer = PlatformSigner::generate("platform-key");

	common::mount_jwks(&server, &signer).await;

	let (tool, _) = tool_with_platform(&server).await?;
	let app = web::router(tool, Arc::new(PlainLaunchPage));

	// Login initiation as the platform would POST it.
	let login_body = format!(
		"iss={}&login_hint=hint-1&target_link_uri={}&client_id={}",
		urlencode(ISSUER),
		urlencode("https://tool.example/launch"),
		CLIENT_ID,
	);
	let response = app
		.clone()
		.oneshot(
			Request::post("/acme/lti/login")
				.header("content-type", "application/x-www-form-urlencoded")
				.body(Body::from(login_body))
				.unwrap(),
		)
		.await
		.expect("login response");

	assert_eq!(response.status(), StatusCode::SEE_OTHER);

	let location = response.headers()["location"].to_str().unwrap().to_string();
	let auth_url = Url::parse(&location).unwrap();
	let query: HashMap<_, _> = auth_url.query_pairs().into_owned().collect();

	assert_eq!(query["response_mode"], "form_post");

	// The platform posts the signed id_token back to the callback.
	let now = chrono::Utc::now().timestamp();
	let id_token = signer.sign(&serde_json::json!({
		"iss": ISSUER,
		"aud": CLIENT_ID,
		"sub": "user-1",
		"exp": now + 300,
		"iat": now - 5,
		"nonce": query["nonce"],
		"name": "Ada Lovelace",
		"https://purl.imsglobal.org/spec/lti/claim/message_type": "LtiResourceLinkRequest",
		"https://purl.imsglobal.org/spec/lti/claim/version": "1.3.0",
		"https://purl.imsglobal.org/spec/lti/claim/deployment_id": "dep-1",
		"https://purl.imsglobal.org/spec/lti/claim/target_link_uri": "https://tool.example/launch",
		"https://purl.imsglobal.org/spec/lti/claim/roles": [],
		"https://purl.imsglobal.org/spec/lti/claim/resource_link": { "id": "rl-1" }
	}));
	let callback_body = format!("state={}&id_token={}", query["state"], id_token);
	let response = app
		.oneshot(
			Request::post("/acme/lti/callback")
				.header("content-type", "application/x-www-form-urlencoded")
				.body(Body::from(callback_body))
				.unwrap(),
		)
		.await
		.expect("callback response");

	assert_eq!(response.status(), StatusCode::OK);
	assert!(body_string(response).await.contains("Ada Lovelace"));

	Ok(())
}

#[tokio::test]
async fn deep_link_selection_returns_a_verifiable_auto_post_form() -> Result<()> {
	let server = MockServer::start().await;
	let (tool, id) = tool_with_platform(&server).await?;
	let jwks = tool.published_jwks("acme").await;
	let app = web::router(tool, Arc::new(PlainLaunchPage));
	let selection = serde_json::json!({
		"request": {
			"registration_id": id,
			"deployment_id": "dep-1",
			"return_url": "https://moodle.example/deep-link/return",
			"data": "platform-opaque"
		},
		"items": [
			{ "type": "ltiResourceLink", "title": "Chapter 7 quiz", "lineItem": { "scoreMaximum": 100.0 } }
		]
	});
	let response = app
		.oneshot(
			Request::post("/acme/lti/deep-linking/select")
				.header("content-type", "application/json")
				.body(Body::from(selection.to_string()))
				.unwrap(),
		)
		.await
		.expect("selection response");

	assert_eq!(response.status(), StatusCode::OK);

	let page = body_string(response).await;

	assert!(page.contains("action=\"https://moodle.example/deep-link/return\""));

	let jwt = page
		.split("name=\"JWT\" value=\"")
		.nth(1)
		.and_then(|rest| rest.split('"').next())
		.expect("jwt field");

	// The form JWT must verify against the tenant's own published JWKS.
	let jwk = &jwks.keys[0];
	let decoding =
		jsonwebtoken::DecodingKey::from_rsa_components(&jwk.n, &jwk.e).expect("decoding key");
	let mut validation = jsonwebtoken::Validation::new(jsonwebtoken::Algorithm::RS256);

	validation.set_audience(&[ISSUER]);
	validation.set_issuer(&[CLIENT_ID]);

	let decoded =
		jsonwebtoken::decode::<serde_json::Value>(jwt, &decoding, &validation).expect("verify");

	assert_eq!(
		decoded.claims["https://purl.imsglobal.org/spec/lti-dl/claim/data"],
		"platform-opaque"
	);
	assert_eq!(
		decoded.claims["https://purl.imsglobal.org/spec/lti-dl/claim/content_items"][0]["type"],
		"ltiResourceLink"
	);

	Ok(())
}

fn urlencode(raw: &str) -> String {
	let mut out = String::new();

	for byte in raw.bytes() {
		match byte {
			b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' =>
				out.push(byte as char),
			_ => out.push_str(&format!("%{byte:02X}")),
		}
	}

	out
}
