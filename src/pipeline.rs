//! Best-effort delivery of one formatted post.
//!
//! A post with media is first sent as a photo or video with the text as
//! caption. If that fails the text is sent alone, once. Whatever the final
//! attempt returns is classified and logged here; the caller only learns
//! whether delivery must halt.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::format::FormattedMessage;
use crate::sources::ChannelPostMedia;
use crate::telegram::{Destination, FailureKind, TelegramError};

/// Pause after every delivery.
pub const POST_DELAY: Duration = Duration::from_secs(2);
/// Extra pause after Telegram reported a rate limit.
pub const RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

/// What the scheduler should do after a delivery.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Signal {
    Continue,
    /// The bot lost permission to post; nothing else will get through.
    Halt,
}

/// Both attempts of a delivery.
#[derive(Debug)]
pub struct DeliveryReport {
    /// Media send, if the message had media.
    pub media_attempt: Option<Result<(), TelegramError>>,
    /// The attempt that decided the delivery: the media send when it
    /// worked, the text send otherwise.
    pub outcome: Result<(), TelegramError>,
}

impl DeliveryReport {
    pub fn fell_back(&self) -> bool {
        matches!(self.media_attempt, Some(Err(_)))
    }

    pub fn failure(&self) -> Option<FailureKind> {
        self.outcome.as_ref().err().map(TelegramError::kind)
    }

    pub fn signal(&self) -> Signal {
        match self.failure() {
            Some(FailureKind::Forbidden) => Signal::Halt,
            _ => Signal::Continue,
        }
    }
}

pub struct Delivery<D> {
    destination: D,
}

impl<D: Destination> Delivery<D> {
    pub fn new(destination: D) -> Self {
        Self { destination }
    }

    pub fn destination(&self) -> &D {
        &self.destination
    }

    pub async fn deliver(&self, message: &FormattedMessage) -> DeliveryReport {
        let report = self.attempt(message).await;

        match &report.outcome {
            Ok(()) if report.fell_back() => {
                info!(post_id = %message.post_id, "posted without media")
            }
            Ok(()) => info!(post_id = %message.post_id, video = message.is_video(), "posted"),
            Err(e) => log_failure(e, "send post", Some(&message.post_id)),
        }

        sleep(POST_DELAY).await;

        if report.failure() == Some(FailureKind::RateLimited) {
            sleep(RATE_LIMIT_BACKOFF).await;
        }

        report
    }

    async fn attempt(&self, message: &FormattedMessage) -> DeliveryReport {
        let Some(media) = &message.media else {
            return DeliveryReport {
                media_attempt: None,
                outcome: self.destination.send_message(&message.text).await,
            };
        };

        let media_attempt = match media {
            ChannelPostMedia::Video(url) => self.destination.send_video(url, &message.text).await,
            ChannelPostMedia::Photo(url) => self.destination.send_photo(url, &message.text).await,
        };

        let outcome = match &media_attempt {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(
                    post_id = %message.post_id,
                    media = %media.url(),
                    error = %e,
                    "failed to send media, falling back to text-only"
                );
                self.destination.send_message(&message.text).await
            }
        };

        DeliveryReport {
            media_attempt: Some(media_attempt),
            outcome,
        }
    }
}

/// Logs a failed Telegram call according to its kind.
pub fn log_failure(err: &TelegramError, operation: &str, post_id: Option<&str>) {
    let post_id = post_id.unwrap_or("-");

    match err.kind() {
        FailureKind::Forbidden => error!(
            post_id, operation, error = %err,
            "telegram refused the bot; ensure it is added to the channel as an administrator"
        ),
        FailureKind::BadRequest => error!(
            post_id, operation, error = %err,
            "message formatting error, check the MarkdownV2 escaping"
        ),
        FailureKind::RateLimited => warn!(
            post_id, operation, error = %err,
            "rate limit reached, backing off"
        ),
        FailureKind::Other => error!(post_id, operation, error = %err, "telegram call failed"),
    }
}
