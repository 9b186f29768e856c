use async_trait::async_trait;

use super::SourceError;

/// Generic channel post, fetched from a `SubmissionSource`
/// and sent to the destination chat.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelPost {
    /// Source post ID. Used to detect already delivered posts.
    pub id: String,
    /// Post title. May be empty string if not exists.
    pub title: String,
    /// Post text. May be empty string if not exists.
    pub body: String,
    /// Post media (photo or video). May be absent.
    pub media: Option<ChannelPostMedia>,
    /// Creation time, seconds since epoch.
    pub created_at: i64,
}

/// Generic media in channel post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelPostMedia {
    /// Photo. .png, .jpeg or etc...
    Photo(String),
    /// Video. .mp4 and .webm, or a hosted video stream.
    Video(String),
}

impl ChannelPostMedia {
    pub fn url(&self) -> &str {
        match self {
            Self::Photo(url) | Self::Video(url) => url,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, Self::Video(_))
    }
}

/// A submission as the source returns it, before it becomes a `ChannelPost`.
pub trait Submission {
    fn id(&self) -> &str;

    /// Creation time, whole seconds since epoch.
    fn created_at(&self) -> i64;

    fn into_post(self) -> Result<ChannelPost, SourceError>;
}

/// Connection to the place posts come from.
#[async_trait]
pub trait SubmissionSource: Send {
    type Item: Submission + Send;

    /// Establishes a session. Called again whenever `is_connected`
    /// reports false.
    async fn connect(&mut self) -> Result<(), SourceError>;

    fn is_connected(&self) -> bool;

    /// Up to `limit` most recent submissions, newest first.
    async fn newest(&mut self, limit: usize) -> Result<Vec<Self::Item>, SourceError>;

    /// Releases the session. Must be safe without a prior `connect`.
    async fn close(&mut self) -> Result<(), SourceError>;
}
