use std::time::Duration;

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::{ChannelPost, ChannelPostMedia, SourceError, Submission, SubmissionSource};
use crate::config::RedditConfig;

const AUTH_URL: &str = "https://www.reddit.com";
const API_URL: &str = "https://oauth.reddit.com";

/// Refresh the token a bit before reddit would reject it.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

lazy_static! {
    static ref IMAGE_LINK: Regex = Regex::new(r"(?i)\.(jpe?g|png|gif)$").unwrap();
    static ref VIDEO_LINK: Regex = Regex::new(r"(?i)\.(mp4|webm)$").unwrap();
}

/// A `t3` thing from a subreddit listing, before it becomes a `ChannelPost`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RawSubmission {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub selftext: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub created_utc: f64,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub media: Option<Value>,
    #[serde(default)]
    pub secure_media: Option<Value>,
    #[serde(default)]
    pub preview: Option<Value>,
}

impl RawSubmission {
    /// Picks the media to attach: hosted video, then preview image,
    /// then a direct image link, then a direct video link.
    pub fn extract_media(&self) -> Option<ChannelPostMedia> {
        if self.is_video {
            match self.hosted_video_url() {
                Some(url) => return Some(ChannelPostMedia::Video(url.into())),
                None => debug!(
                    post_id = %self.id,
                    "video submission without reddit_video fallback url"
                ),
            }
        }

        if let Some(preview) = &self.preview {
            match preview.pointer("/images/0/source/url").and_then(Value::as_str) {
                Some(url) => return Some(ChannelPostMedia::Photo(url.into())),
                None => debug!(post_id = %self.id, "preview without a source image"),
            }
        }

        let link = self.url.as_deref().unwrap_or_default();

        if IMAGE_LINK.is_match(link) {
            return Some(ChannelPostMedia::Photo(link.into()));
        }
        if VIDEO_LINK.is_match(link) {
            return Some(ChannelPostMedia::Video(link.into()));
        }

        debug!(post_id = %self.id, "no media found");
        None
    }

    fn hosted_video_url(&self) -> Option<&str> {
        [&self.media, &self.secure_media]
            .into_iter()
            .flatten()
            .find_map(|m| m.pointer("/reddit_video/fallback_url").and_then(Value::as_str))
    }
}

impl Submission for RawSubmission {
    fn id(&self) -> &str {
        &self.id
    }

    fn created_at(&self) -> i64 {
        self.created_utc as i64
    }

    fn into_post(self) -> Result<ChannelPost, SourceError> {
        let media = self.extract_media();
        let created_at = self.created_at();

        let title = self.title.ok_or_else(|| SourceError::MissingField {
            id: self.id.clone(),
            field: "title",
        })?;

        Ok(ChannelPost {
            id: self.id,
            title,
            body: self.selftext.unwrap_or_default(),
            media,
            created_at,
        })
    }
}

#[derive(Deserialize)]
struct Listing {
    data: ListingData,
}

#[derive(Deserialize)]
struct ListingData {
    children: Vec<Thing>,
}

#[derive(Deserialize)]
struct Thing {
    data: Value,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
}

/// Decodes listing children one by one, so one odd submission
/// does not cost the whole batch.
fn decode_children(children: Vec<Thing>) -> Vec<RawSubmission> {
    let mut res = vec![];

    for thing in children {
        let id = thing
            .data
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("?")
            .to_owned();

        match serde_json::from_value::<RawSubmission>(thing.data) {
            Ok(submission) => res.push(submission),
            Err(e) => warn!(post_id = %id, error = %e, "skipping undecodable submission"),
        }
    }

    res
}

/// Error for a non-success response, carrying its body.
async fn api_error(res: reqwest::Response) -> SourceError {
    SourceError::Api {
        status: res.status().as_u16(),
        body: res.text().await.unwrap_or_default(),
    }
}

struct Session {
    token: String,
    expires_at: Instant,
}

/// Application-only OAuth client for a single subreddit.
pub struct RedditClient {
    client: reqwest::Client,
    client_id: String,
    client_secret: String,
    subreddit: String,
    auth_url: String,
    api_url: String,
    session: Option<Session>,
}

impl RedditClient {
    pub fn new(cfg: &RedditConfig) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            subreddit: cfg.subreddit.clone(),
            auth_url: AUTH_URL.into(),
            api_url: API_URL.into(),
            session: None,
        })
    }

    /// Points the client at other hosts, e.g. a local mock.
    #[cfg(test)]
    pub fn with_endpoints(
        mut self,
        auth_url: impl Into<String>,
        api_url: impl Into<String>,
    ) -> Self {
        self.auth_url = auth_url.into();
        self.api_url = api_url.into();
        self
    }

    async fn request_token(&self) -> Result<Session, SourceError> {
        let res = self
            .client
            .post(format!("{}/api/v1/access_token", self.auth_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(SourceError::Auth(res.text().await.unwrap_or_default()));
        }
        if !status.is_success() {
            return Err(api_error(res).await);
        }

        let token: TokenResponse = res.json().await?;

        match token.access_token {
            Some(access_token) => {
                let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
                Ok(Session {
                    token: access_token,
                    expires_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
                })
            }
            None => Err(SourceError::Auth(
                token
                    .error
                    .unwrap_or_else(|| "no access token in response".into()),
            )),
        }
    }

    async fn check_subreddit(&self, token: &str) -> Result<(), SourceError> {
        let res = self
            .client
            .get(format!("{}/r/{}/about", self.api_url, self.subreddit))
            .bearer_auth(token)
            .query(&[("raw_json", "1")])
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(api_error(res).await);
        }

        Ok(())
    }
}

#[async_trait]
impl SubmissionSource for RedditClient {
    type Item = RawSubmission;

    async fn connect(&mut self) -> Result<(), SourceError> {
        let session = self.request_token().await?;
        self.check_subreddit(&session.token).await?;
        self.session = Some(session);

        info!(subreddit = %self.subreddit, "connected to reddit");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| Instant::now() < s.expires_at)
    }

    async fn newest(&mut self, limit: usize) -> Result<Vec<RawSubmission>, SourceError> {
        let token = match &self.session {
            Some(s) => s.token.clone(),
            None => return Err(SourceError::Auth("not connected".into())),
        };

        let res = self
            .client
            .get(format!("{}/r/{}/new", self.api_url, self.subreddit))
            .bearer_auth(token)
            .query(&[("limit", limit.to_string()), ("raw_json", "1".into())])
            .send()
            .await?;

        let status = res.status();
        if status == StatusCode::UNAUTHORIZED {
            // next poll goes through `connect` again
            self.session = None;
            return Err(SourceError::Auth(res.text().await.unwrap_or_default()));
        }
        if !status.is_success() {
            return Err(api_error(res).await);
        }

        let listing: Listing = res.json().await?;

        Ok(decode_children(listing.data.children))
    }

    async fn close(&mut self) -> Result<(), SourceError> {
        let Some(session) = self.session.take() else {
            return Ok(());
        };

        let res = self
            .client
            .post(format!("{}/api/v1/revoke_token", self.auth_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[
                ("token", session.token.as_str()),
                ("token_type_hint", "access_token"),
            ])
            .send()
            .await?;

        if !res.status().is_success() {
            return Err(api_error(res).await);
        }

        info!("reddit session closed");
        Ok(())
    }
}
