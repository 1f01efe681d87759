//! Assignment and Grade Services score publishing.

// crates.io
use serde::Serialize;
use url::Url;
use uuid::Uuid;
// self
use crate::{
	_prelude::*,
	client::{send_with_retry, token::AccessTokenProvider},
	config::ToolConfig,
	store::context::ContextStore,
};

/// OAuth2 scope required to post scores.
pub const SCORE_SCOPE: &str = "https://purl.imsglobal.org/spec/lti-ags/scope/score";
const SCORE_MEDIA_TYPE: &str = "application/vnd.ims.lis.v1.score+json";

/// Learner activity progress reported with a score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum ActivityProgress {
	/// The learner has not started.
	Initialized,
	/// The learner has started but not submitted.
	Started,
	/// The learner is working on the activity.
	InProgress,
	/// The learner has submitted.
	Submitted,
	/// The activity is complete.
	Completed,
}

/// Grading state reported with a score.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum GradingProgress {
	/// The score is final.
	FullyGraded,
	/// Grading is pending automatic processing.
	Pending,
	/// Grading awaits a human.
	PendingManual,
	/// Grading failed.
	Failed,
	/// No grade will be produced.
	NotReady,
}

/// A score for one learner on one line item.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
	/// The platform subject identifier of the learner.
	pub user_id: String,
	/// Points awarded; omitted for progress-only updates.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub score_given: Option<f64>,
	/// Maximum points; required when `score_given` is present.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub score_maximum: Option<f64>,
	/// Activity progress.
	pub activity_progress: ActivityProgress,
	/// Grading progress.
	pub grading_progress: GradingProgress,
	/// When the score was determined.
	pub timestamp: DateTime<Utc>,
	/// Free-text comment shown to the learner.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub comment: Option<String>,
}
impl Score {
	fn validate(&self) -> Result<()> {
		if self.user_id.is_empty() {
			return Err(Error::Validation { field: "user_id", reason: "Must not be empty.".into() });
		}
		if self.score_given.is_some() && self.score_maximum.is_none() {
			return Err(Error::Validation {
				field: "score_maximum",
				reason: "Required when score_given is present.".into(),
			});
		}
		if let Some(maximum) = self.score_maximum
			&& maximum <= 0.0
		{
			return Err(Error::Validation {
				field: "score_maximum",
				reason: "Must be greater than zero.".into(),
			});
		}
		if let Some(given) = self.score_given
			&& given < 0.0
		{
			return Err(Error::Validation {
				field: "score_given",
				reason: "Must not be negative.".into(),
			});
		}

		Ok(())
	}
}

/// Posts scores to the line item recorded for a resource link.
#[derive(Clone, Debug)]
pub struct ScorePublisher {
	client: reqwest::Client,
	contexts: Arc<dyn ContextStore>,
	tokens: AccessTokenProvider,
	config: Arc<ToolConfig>,
}
impl ScorePublisher {
	pub(crate) fn new(
		client: reqwest::Client,
		contexts: Arc<dyn ContextStore>,
		tokens: AccessTokenProvider,
		config: Arc<ToolConfig>,
	) -> Self {
		Self { client, contexts, tokens, config }
	}

	/// Publish a score against the line item learned from the launch.
	#[tracing::instrument(
		skip(self, score),
		fields(tenant = %tenant_id, registration = %registration_id, resource_link = %resource_link_id)
	)]
	pub async fn send_score(
		&self,
		tenant_id: &str,
		registration_id: Uuid,
		resource_link_id: &str,
		score: &Score,
	) -> Result<()> {
		score.validate()?;

		let link = self
			.contexts
			.find_resource_link(tenant_id, resource_link_id)
			.await?
			.ok_or_else(|| Error::UnknownResourceLink {
				tenant: tenant_id.into(),
				resource_link: resource_link_id.into(),
			})?;
		let line_item = link.line_item_url.ok_or(Error::Validation {
			field: "line_item",
			reason: "No line item was advertised for this resource link.".into(),
		})?;
		let url = scores_url(&line_item)?;
		let bearer = self.tokens.bearer(tenant_id, registration_id, SCORE_SCOPE).await?;
		let request = self
			.client
			.post(url.clone())
			.bearer_auth(bearer)
			.header(reqwest::header::CONTENT_TYPE, SCORE_MEDIA_TYPE)
			.body(serde_json::to_vec(score)?);

		send_with_retry(&self.config.retry_policy, request, url.as_str()).await?;

		tracing::info!(user = %score.user_id, "score published");

		Ok(())
	}
}

/// Derive the scores URL from a line-item URL, preserving its query string.
///
/// Some platforms carry routing parameters in the line-item query; `/scores`
/// must be appended to the path, not the full URL.
fn scores_url(line_item: &Url) -> Result<Url> {
	let mut url = line_item.clone();
	let path = format!("{}/scores", url.path().trim_end_matches('/'));

	url.set_path(&path);

	Ok(url)
}
