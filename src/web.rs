//! HTTP surface for the launch flow.
//!
//! Browser-facing failures never leak validation detail; the page shows a
//! generic message with a correlation id, and the full error goes to the log
//! under that id.

// crates.io
use async_trait::async_trait;
use axum::{
	Router,
	extract::{Form, Path, Query, State},
	http::StatusCode,
	response::{Html, IntoResponse, Json, Redirect, Response},
	routing::{get, post},
};
use serde::Deserialize;
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	deep_linking::{ContentItem, DeepLinkingRequest},
	launch::{claims::LaunchContext, validator::CallbackParams},
	login::LoginParams,
	tool::LtiTool,
};

/// Application hook invoked once a launch has been fully validated.
#[async_trait]
pub trait LaunchHandler: Send + Sync + std::fmt::Debug {
	/// Render the response shown to the launched user.
	async fn on_launch(&self, context: LaunchContext) -> Response;
}

/// Default [`LaunchHandler`] rendering a plain confirmation page.
#[derive(Debug, Default)]
pub struct PlainLaunchPage;
#[async_trait]
impl LaunchHandler for PlainLaunchPage {
	async fn on_launch(&self, context: LaunchContext) -> Response {
		let who = context.name.as_deref().unwrap_or("there");

		Html(format!("<!doctype html><p>Hello, {}.</p>", escape(who))).into_response()
	}
}

#[derive(Clone, Debug)]
struct AppState {
	tool: LtiTool,
	launches: Arc<dyn LaunchHandler>,
}

/// Build the tenant-scoped LTI router.
pub fn router(tool: LtiTool, launches: Arc<dyn LaunchHandler>) -> Router {
	Router::new()
		.route("/{tenant}/lti/login", get(login_get).post(login_post))
		.route("/{tenant}/lti/callback", post(callback))
		.route("/{tenant}/lti/jwks", get(jwks))
		.route("/{tenant}/lti/deep-linking/select", post(deep_link_select))
		.with_state(AppState { tool, launches })
}

// Platforms are inconsistent about the login initiation method; both are
// required to be accepted.
async fn login_get(
	State(state): State<AppState>,
	Path(tenant): Path<String>,
	Query(params): Query<LoginParams>,
) -> Response {
	login(state, tenant, params).await
}

async fn login_post(
	State(state): State<AppState>,
	Path(tenant): Path<String>,
	Form(params): Form<LoginParams>,
) -> Response {
	login(state, tenant, params).await
}

async fn login(state: AppState, tenant: String, params: LoginParams) -> Response {
	match state.tool.initiate_login(params, &tenant).await {
		Ok(redirect) => Redirect::to(redirect.url.as_str()).into_response(),
		Err(err) => reject(err),
	}
}

async fn callback(
	State(state): State<AppState>,
	Path(tenant): Path<String>,
	Form(params): Form<CallbackParams>,
) -> Response {
	match state.tool.handle_callback(params, &tenant).await {
		Ok(context) => state.launches.on_launch(context).await,
		Err(err) => reject(err),
	}
}

async fn jwks(State(state): State<AppState>, Path(tenant): Path<String>) -> Response {
	Json(state.tool.published_jwks(&tenant).await).into_response()
}

#[derive(Debug, Deserialize)]
struct DeepLinkSelection {
	request: DeepLinkingRequest,
	items: Vec<ContentItem>,
}

/// Sign the selection and answer with a self-submitting form posting the
/// response JWT back to the platform.
async fn deep_link_select(
	State(state): State<AppState>,
	Path(tenant): Path<String>,
	Json(selection): Json<DeepLinkSelection>,
) -> Response {
	match state
		.tool
		.create_deep_link_response(&selection.request, &selection.items, &tenant)
		.await
	{
		Ok(response) => Html(format!(
			"<!doctype html><html><body onload=\"document.forms[0].submit()\">\
			<form method=\"post\" action=\"{}\">\
			<input type=\"hidden\" name=\"JWT\" value=\"{}\">\
			<noscript><button type=\"submit\">Continue</button></noscript>\
			</form></body></html>",
			escape(response.return_url.as_str()),
			escape(&response.jwt),
		))
		.into_response(),
		Err(err) => reject(err),
	}
}

fn reject(err: Error) -> Response {
	let correlation = Uuid::new_v4();
	let status = status_for(&err);

	tracing::warn!(%correlation, error = %err, "request rejected");

	(
		status,
		Html(format!(
			"<!doctype html><html><body>\
			<p>We were unable to start this activity. Please try again from your course.</p>\
			<p>Reference: {correlation}</p>\
			</body></html>"
		)),
	)
		.into_response()
}

fn status_for(err: &Error) -> StatusCode {
	match err {
		Error::Validation { .. }
		| Error::InvalidState(_)
		| Error::NonceReplay
		| Error::BadSignature(_)
		| Error::ClaimMismatch { .. }
		| Error::UnsupportedMessageType(_) => StatusCode::BAD_REQUEST,
		Error::UnknownPlatform { .. }
		| Error::UnknownRegistration { .. }
		| Error::UnknownResourceLink { .. }
		| Error::UnknownContext { .. } => StatusCode::NOT_FOUND,
		Error::UpstreamTimeout { .. } | Error::UpstreamStatus { .. } | Error::Reqwest(_) =>
			StatusCode::BAD_GATEWAY,
		_ => StatusCode::INTERNAL_SERVER_ERROR,
	}
}

fn escape(raw: &str) -> String {
	let mut out = String::with_capacity(raw.len());

	for c in raw.chars() {
		match c {
			'&' => out.push_str("&amp;"),
			'<' => out.push_str("&lt;"),
			'>' => out.push_str("&gt;"),
			'"' => out.push_str("&quot;"),
			'\'' => out.push_str("&#39;"),
			_ => out.push(c),
		}
	}

	out
}
