//! Durable, tenant-scoped LTI correlation records.
//!
//! Contexts, resource links, and users are upserted after every validated
//! launch so later AGS/NRPS calls can resolve line items and membership URLs
//! without re-launching. Upserts merge: a launch that omits an optional field
//! never erases a value learned from an earlier launch.

// std
use std::collections::HashMap;
// crates.io
use async_trait::async_trait;
use tokio::sync::RwLock;
use url::Url;
use uuid::Uuid;
// self
use crate::_prelude::*;

/// Course-level correlation record.
#[derive(Clone, Debug)]
pub struct LtiContext {
	/// Tenant scope.
	pub tenant_id: String,
	/// Registration the context was learned from.
	pub registration_id: Uuid,
	/// The platform's context id.
	pub context_id: String,
	/// Context title, when the platform supplied one.
	pub title: Option<String>,
	/// Short context label.
	pub label: Option<String>,
	/// NRPS membership URL for roster retrieval.
	pub memberships_url: Option<Url>,
}

/// Link-level correlation record.
#[derive(Clone, Debug)]
pub struct LtiResourceLink {
	/// Tenant scope.
	pub tenant_id: String,
	/// Registration the link was learned from.
	pub registration_id: Uuid,
	/// The platform's resource link id.
	pub resource_link_id: String,
	/// Context the link lives in.
	pub context_id: Option<String>,
	/// Link title.
	pub title: Option<String>,
	/// AGS line-item URL for grade passback.
	pub line_item_url: Option<Url>,
}

/// External subject mapped into the tool.
#[derive(Clone, Debug)]
pub struct LtiUser {
	/// Tenant scope.
	pub tenant_id: String,
	/// Registration the user was learned from.
	pub registration_id: Uuid,
	/// The platform's stable subject identifier.
	pub subject: String,
	/// Display name.
	pub name: Option<String>,
	/// Email address.
	pub email: Option<String>,
	/// Roles observed on the most recent launch.
	pub roles: Vec<String>,
}

/// Storage for durable LTI correlation records.
#[async_trait]
pub trait ContextStore: Send + Sync + std::fmt::Debug {
	/// Insert or merge a context record.
	async fn upsert_context(&self, context: LtiContext) -> Result<()>;
	/// Insert or merge a resource link record.
	async fn upsert_resource_link(&self, link: LtiResourceLink) -> Result<()>;
	/// Insert or merge a user record.
	async fn upsert_user(&self, user: LtiUser) -> Result<()>;
	/// Look up a context by id within a tenant.
	async fn find_context(&self, tenant_id: &str, context_id: &str)
	-> Result<Option<LtiContext>>;
	/// Look up a resource link by id within a tenant.
	async fn find_resource_link(
		&self,
		tenant_id: &str,
		resource_link_id: &str,
	) -> Result<Option<LtiResourceLink>>;
	/// Look up a user by subject within a tenant.
	async fn find_user(&self, tenant_id: &str, subject: &str) -> Result<Option<LtiUser>>;
}

/// In-memory [`ContextStore`] for single-process deployments and tests.
#[derive(Debug, Default)]
pub struct MemoryContextStore {
	contexts: RwLock<HashMap<(String, String), LtiContext>>,
	links: RwLock<HashMap<(String, String), LtiResourceLink>>,
	users: RwLock<HashMap<(String, String), LtiUser>>,
}
impl MemoryContextStore {
	/// Create an empty store.
	pub fn new() -> Self {
		Self::default()
	}
}
#[async_trait]
impl ContextStore for MemoryContextStore {
	async fn upsert_context(&self, context: LtiContext) -> Result<()> {
		let key = (context.tenant_id.clone(), context.context_id.clone());
		let mut contexts = self.contexts.write().await;

		match contexts.get_mut(&key) {
			Some(existing) => {
				existing.registration_id = context.registration_id;
				merge(&mut existing.title, context.title);
				merge(&mut existing.label, context.label);
				merge(&mut existing.memberships_url, context.memberships_url);
			},
			None => {
				contexts.insert(key, context);
			},
		}

		Ok(())
	}

	async fn upsert_resource_link(&self, link: LtiResourceLink) -> Result<()> {
		let key = (link.tenant_id.clone(), link.resource_link_id.clone());
		let mut links = self.links.write().await;

		match links.get_mut(&key) {
			Some(existing) => {
				existing.registration_id = link.registration_id;
				merge(&mut existing.context_id, link.context_id);
				merge(&mut existing.title, link.title);
				merge(&mut existing.line_item_url, link.line_item_url);
			},
			None => {
				links.insert(key, link);
			},
		}

		Ok(())
	}

	async fn upsert_user(&self, user: LtiUser) -> Result<()> {
		let key = (user.tenant_id.clone(), user.subject.clone());
		let mut users = self.users.write().await;

		match users.get_mut(&key) {
			Some(existing) => {
				existing.registration_id = user.registration_id;
				merge(&mut existing.name, user.name);
				merge(&mut existing.email, user.email);

				if !user.roles.is_empty() {
					existing.roles = user.roles;
				}
			},
			None => {
				users.insert(key, user);
			},
		}

		Ok(())
	}

	async fn find_context(
		&self,
		tenant_id: &str,
		context_id: &str,
	) -> Result<Option<LtiContext>> {
		let contexts = self.contexts.read().await;

		Ok(contexts.get(&(tenant_id.to_string(), context_id.to_string())).cloned())
	}

	async fn find_resource_link(
		&self,
		tenant_id: &str,
		resource_link_id: &str,
	) -> Result<Option<LtiResourceLink>> {
		let links = self.links.read().await;

		Ok(links.get(&(tenant_id.to_string(), resource_link_id.to_string())).cloned())
	}

	async fn find_user(&self, tenant_id: &str, subject: &str) -> Result<Option<LtiUser>> {
		let users = self.users.read().await;

		Ok(users.get(&(tenant_id.to_string(), subject.to_string())).cloned())
	}
}

fn merge<T>(existing: &mut Option<T>, incoming: Option<T>) {
	if incoming.is_some() {
		*existing = incoming;
	}
}
