//! Poll loop tying the feed, formatter and delivery together.

use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::time::Duration;

use futures::FutureExt;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::cursor::CursorStore;
use crate::format::Formatter;
use crate::pipeline::{log_failure, Delivery, Signal};
use crate::sources::feed::PostFeed;
use crate::sources::{SourceError, SubmissionSource};
use crate::telegram::Destination;

pub const ANNOUNCEMENT: &str = "🤖 Reddit to Telegram Bot started\\!";

/// Pause between two posts of a batch, on top of the delivery pause.
pub const ITEM_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Stopped,
    Running,
}

/// Why `Relay::run` returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Exit {
    /// Startup announcement failed, nothing was polled.
    NotStarted,
    /// Telegram refused a post; delivery stopped for this run.
    Halted,
    /// Shutdown was requested.
    Shutdown,
}

pub struct Relay<S, K, D> {
    feed: PostFeed<S, K>,
    delivery: Delivery<D>,
    formatter: Formatter,
    check_interval: Duration,
    state: RunState,
}

impl<S, K, D> Relay<S, K, D>
where
    S: SubmissionSource,
    K: CursorStore,
    D: Destination,
{
    pub fn new(
        feed: PostFeed<S, K>,
        delivery: Delivery<D>,
        formatter: Formatter,
        check_interval: Duration,
    ) -> Self {
        Self {
            feed,
            delivery,
            formatter,
            check_interval,
            state: RunState::Stopped,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Announces the bot in the channel. Only a successful announcement
    /// lets the relay run.
    pub async fn start(&mut self) -> RunState {
        match self.delivery.destination().send_message(ANNOUNCEMENT).await {
            Ok(()) => {
                info!("bot started successfully");
                self.state = RunState::Running;
            }
            Err(e) => {
                log_failure(&e, "announce startup", None);
                error!("failed to send startup message, not polling");
            }
        }

        self.state
    }

    /// One poll cycle. Does nothing unless running.
    pub async fn process_new_posts(&mut self) -> Result<(), SourceError> {
        if self.state != RunState::Running {
            return Ok(());
        }

        let posts = self.feed.fetch_new().await?;

        for post in posts {
            let message = self.formatter.format(&post);
            let report = self.delivery.deliver(&message).await;

            if report.signal() == Signal::Halt {
                warn!(post_id = %post.id, "delivery stopped until restart");
                self.state = RunState::Stopped;
                break;
            }

            sleep(ITEM_DELAY).await;
        }

        Ok(())
    }

    async fn poll(&mut self) -> Result<Exit, SourceError> {
        loop {
            self.process_new_posts().await?;

            if self.state != RunState::Running {
                return Ok(Exit::Halted);
            }

            sleep(self.check_interval).await;
        }
    }

    /// Starts, then polls until halted, failed or `shutdown` resolves.
    /// The source is closed exactly once on every way out, panics included.
    pub async fn run<F>(mut self, shutdown: F) -> Result<Exit, SourceError>
    where
        F: Future<Output = ()>,
    {
        let outcome = if self.start().await == RunState::Running {
            let polling = AssertUnwindSafe(self.poll()).catch_unwind();

            tokio::select! {
                res = polling => res,
                () = shutdown => {
                    info!("shutdown requested");
                    Ok(Ok(Exit::Shutdown))
                }
            }
        } else {
            Ok(Ok(Exit::NotStarted))
        };

        self.feed.close().await;
        self.state = RunState::Stopped;

        match outcome {
            Ok(res) => res,
            Err(panic) => panic::resume_unwind(panic),
        }
    }
}
