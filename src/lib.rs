//! Async LTI 1.3 tool integration layer with OIDC third-party login, signed
//! launch validation, deep linking, grade passback, and roster retrieval,
//! built for multi-tenant Rust services.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod client;
pub mod deep_linking;
pub mod keys;
pub mod launch;
pub mod store;
pub mod web;

mod clock;
mod config;
mod error;
mod jwks;
mod login;
mod registry;
mod tool;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, Utc};
	pub use tokio::time::Instant;

	pub use crate::{Error, Result};
}

pub use crate::{
	clock::{Clock, OsRandom, RandomSource, SystemClock},
	config::{JitterStrategy, RetryPolicy, ToolConfig},
	error::{Error, Result},
	jwks::PlatformJwksCache,
	login::{LoginParams, LoginRedirect},
	registry::{NewPlatform, PlatformRegistration, PlatformRegistry, RegistrationState},
	tool::{LtiTool, LtiToolBuilder},
};
