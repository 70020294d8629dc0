//! Pull operations against the marketplace REST API.

use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::types::{Group, MemberProfile, Message};

/// Request body for opening a conversation with a seller about a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewGroup {
    pub name: String,
    pub members: Vec<String>,
    pub product_id: String,
    pub cover_image: String,
}

/// Result of contacting a seller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContactOutcome {
    Created(String),
    /// The buyer already has a conversation about this listing.
    Existing(String),
}

impl ContactOutcome {
    pub fn group_id(&self) -> &str {
        match self {
            Self::Created(id) | Self::Existing(id) => id,
        }
    }
}

/// Answer to a trade confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfirmReceipt {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub confirmed_by: String,
    #[serde(default)]
    pub status: bool,
}

/// The pull side of the backend, as the synchronizer consumes it.
pub trait ChatBackend {
    fn list_groups(&self) -> impl Future<Output = Result<Vec<Group>>> + Send;

    fn get_group(&self, group_id: &str) -> impl Future<Output = Result<Group>> + Send;

    fn fetch_messages(&self, group_id: &str) -> impl Future<Output = Result<Vec<Message>>> + Send;

    fn mark_read(&self, group_id: &str) -> impl Future<Output = Result<()>> + Send;

    fn fetch_profile(&self, email: &str) -> impl Future<Output = Result<MemberProfile>> + Send;

    fn confirm_trade(
        &self,
        group_id: &str,
        confirmed: bool,
    ) -> impl Future<Output = Result<ConfirmReceipt>> + Send;

    fn create_group(&self, group: &NewGroup) -> impl Future<Output = Result<ContactOutcome>> + Send;
}

/// reqwest-backed [`ChatBackend`] authenticating with a bearer token.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base: Url,
    token: String,
}

#[derive(Deserialize)]
struct CreatedGroup {
    group_id: String,
}

impl HttpBackend {
    pub fn new(base_url: &str, token: impl Into<String>, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| SyncError::InvalidUrl {
            url: base_url.to_string(),
            reason: e.to_string(),
        })?;
        if base.cannot_be_a_base() || !matches!(base.scheme(), "http" | "https") {
            return Err(SyncError::InvalidUrl {
                url: base_url.to_string(),
                reason: "expected an http(s) base url".to_string(),
            });
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            token: token.into(),
        })
    }

    /// Build an endpoint url; each segment is percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn request(&self, method: Method, segments: &[&str]) -> reqwest::RequestBuilder {
        let url = self.endpoint(segments);
        debug!(%method, %url, "backend request");
        self.client
            .request(method, url)
            .bearer_auth(&self.token)
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SyncError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let resp = self.request(Method::GET, segments).send().await?;
        Ok(Self::check(resp).await?.json().await?)
    }
}

impl ChatBackend for HttpBackend {
    async fn list_groups(&self) -> Result<Vec<Group>> {
        let groups: Option<Vec<Group>> = self.get_json(&["chat", "groups"]).await?;
        Ok(groups.unwrap_or_default())
    }

    async fn get_group(&self, group_id: &str) -> Result<Group> {
        self.get_json(&["chat", "groups", group_id]).await
    }

    async fn fetch_messages(&self, group_id: &str) -> Result<Vec<Message>> {
        let messages: Option<Vec<Message>> =
            self.get_json(&["chat", "messages", group_id]).await?;
        Ok(messages.unwrap_or_default())
    }

    async fn mark_read(&self, group_id: &str) -> Result<()> {
        let resp = self
            .request(Method::PUT, &["chat", "groups", group_id, "read-status"])
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn fetch_profile(&self, email: &str) -> Result<MemberProfile> {
        self.get_json(&["user", "profile", email]).await
    }

    async fn confirm_trade(&self, group_id: &str, confirmed: bool) -> Result<ConfirmReceipt> {
        let resp = self
            .request(Method::PATCH, &["chat", "groups", group_id, "confirm"])
            .json(&serde_json::json!({ "confirmed": confirmed }))
            .send()
            .await?;
        Ok(Self::check(resp).await?.json().await?)
    }

    async fn create_group(&self, group: &NewGroup) -> Result<ContactOutcome> {
        let resp = self
            .request(Method::POST, &["chat", "group"])
            .json(group)
            .send()
            .await?;
        if resp.status() == StatusCode::CONFLICT {
            let body = resp.text().await.unwrap_or_default();
            return match serde_json::from_str::<CreatedGroup>(&body) {
                Ok(existing) => Ok(ContactOutcome::Existing(existing.group_id)),
                Err(_) => Err(SyncError::Status {
                    status: StatusCode::CONFLICT.as_u16(),
                    body,
                }),
            };
        }
        let created: CreatedGroup = Self::check(resp).await?.json().await?;
        Ok(ContactOutcome::Created(created.group_id))
    }
}
