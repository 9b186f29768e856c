use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{ChannelPost, SourceError, Submission, SubmissionSource};
use crate::cursor::{Cursor, CursorStore};

/// How many of the newest submissions are looked at per poll.
pub const WINDOW: usize = 5;

pub const CONNECT_ATTEMPTS: u32 = 3;
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// New posts from a source, resumed from a persisted cursor.
pub struct PostFeed<S, K> {
    source: S,
    store: K,
    cursor: Cursor,
    /// Set after the first successful connect. From then on a failed
    /// reconnect only costs the current poll.
    connected_once: bool,
}

impl<S: SubmissionSource, K: CursorStore> PostFeed<S, K> {
    /// Loads the cursor once. Unreadable storage starts from scratch.
    pub fn new(source: S, store: K) -> Self {
        let cursor = match store.load() {
            Ok(cursor) => {
                info!(
                    last_post_id = ?cursor.last_id,
                    last_post_timestamp = cursor.last_timestamp,
                    "loaded cursor"
                );
                cursor
            }
            Err(e) => {
                error!(error = %e, "failed to load cursor, starting without one");
                Cursor::default()
            }
        };

        Self {
            source,
            store,
            cursor,
            connected_once: false,
        }
    }

    #[cfg(test)]
    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    #[cfg(test)]
    pub fn source(&self) -> &S {
        &self.source
    }

    async fn ensure_connected(&mut self) -> Result<(), SourceError> {
        if self.source.is_connected() {
            return Ok(());
        }

        let mut attempt = 1;
        loop {
            match self.source.connect().await {
                Ok(()) => {
                    self.connected_once = true;
                    return Ok(());
                }
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    warn!(
                        attempt,
                        max = CONNECT_ATTEMPTS,
                        error = %e,
                        "failed to connect to source, retrying"
                    );
                    sleep(CONNECT_RETRY_DELAY).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        attempts = CONNECT_ATTEMPTS,
                        error = %e,
                        "failed to connect to source"
                    );
                    return Err(SourceError::Connect {
                        attempts: CONNECT_ATTEMPTS,
                        source: Box::new(e),
                    });
                }
            }
        }
    }

    /// Posts newer than the cursor, newest first.
    ///
    /// Only a failed first connection is returned as an error. A failed
    /// reconnect or poll is logged and yields no posts.
    pub async fn fetch_new(&mut self) -> Result<Vec<ChannelPost>, SourceError> {
        if let Err(e) = self.ensure_connected().await {
            if !self.connected_once {
                return Err(e);
            }

            warn!(error = %e, "reconnect failed, skipping this poll");
            return Ok(vec![]);
        }

        let batch = match self.source.newest(WINDOW).await {
            Ok(batch) => batch,
            Err(e) => {
                error!(error = %e, "failed to fetch new posts");
                return Ok(vec![]);
            }
        };

        let posts = self.select_new(batch);

        let Some(newest) = posts.first() else {
            info!("no new posts found");
            return Ok(posts);
        };

        self.cursor.advance(newest.id.clone(), newest.created_at);
        match self.store.save(&self.cursor) {
            Ok(()) => debug!(last_post_id = %newest.id, "saved cursor"),
            Err(e) => error!(last_post_id = %newest.id, error = %e, "failed to save cursor"),
        }

        info!(count = posts.len(), "found new posts");
        Ok(posts)
    }

    /// Walks a newest-first batch down to the cursor.
    fn select_new(&self, batch: Vec<S::Item>) -> Vec<ChannelPost> {
        let mut res = vec![];

        for submission in batch {
            if self.cursor.is_boundary(submission.id()) {
                break;
            }

            // the boundary post may be gone, so the timestamp guards too
            if self.cursor.is_stale(submission.created_at()) {
                debug!(post_id = %submission.id(), "skipping already seen post");
                continue;
            }

            let id = submission.id().to_owned();
            match submission.into_post() {
                Ok(post) => {
                    debug!(post_id = %id, "processed post");
                    res.push(post);
                }
                Err(e) => error!(post_id = %id, error = %e, "failed to process post"),
            }
        }

        res
    }

    /// Releases the source. Errors are only logged.
    pub async fn close(&mut self) {
        if let Err(e) = self.source.close().await {
            error!(error = %e, "failed to close source");
        }
    }
}


#[cfg(test)]
mod tests {
    use tokio::time::Instant;

    use super::fake::{raw, FakeSource};
    use super::*;
    use crate::cursor::MemoryStore;

    fn ids(posts: &[ChannelPost]) -> Vec<&str> {
        posts.iter().map(|p| p.id.as_str()).collect()
    }

    fn cursor(id: &str, ts: i64) -> Cursor {
        let mut c = Cursor::default();
        c.advance(id, ts);
        c
    }

    #[tokio::test]
    async fn first_run_takes_everything() {
        let store = MemoryStore::default();
        let source = FakeSource::with_batches(vec![Some(vec![
            raw("c", 30.0),
            raw("b", 20.0),
            raw("a", 10.0),
        ])]);
        let mut feed = PostFeed::new(source, store.clone());

        let posts = feed.fetch_new().await.unwrap();

        assert_eq!(ids(&posts), ["c", "b", "a"]);
        assert_eq!(store.get(), Some(cursor("c", 30)));
    }

    #[tokio::test]
    async fn stops_at_last_delivered() {
        let store = MemoryStore::with(cursor("b", 20));
        let source = FakeSource::with_batches(vec![Some(vec![
            raw("d", 40.0),
            raw("c", 30.0),
            raw("b", 20.0),
            raw("a", 10.0),
        ])]);
        let mut feed = PostFeed::new(source, store.clone());

        let posts = feed.fetch_new().await.unwrap();

        assert_eq!(ids(&posts), ["d", "c"]);
        assert_eq!(store.get(), Some(cursor("d", 40)));
    }

    #[tokio::test]
    async fn boundary_is_hard_stop() {
        // "z" is newer than the cursor but sits below the boundary post
        let store = MemoryStore::with(cursor("b", 20));
        let source = FakeSource::with_batches(vec![Some(vec![
            raw("c", 30.0),
            raw("b", 20.0),
            raw("z", 99.0),
        ])]);
        let mut feed = PostFeed::new(source, store);

        let posts = feed.fetch_new().await.unwrap();

        assert_eq!(ids(&posts), ["c"]);
    }

    #[tokio::test]
    async fn stale_posts_are_skipped_without_stopping() {
        // boundary post was deleted; older and same-second posts are filtered
        let store = MemoryStore::with(cursor("gone", 20));
        let source = FakeSource::with_batches(vec![Some(vec![
            raw("e", 50.0),
            raw("x", 20.9),
            raw("d", 40.0),
            raw("a", 10.0),
        ])]);
        let mut feed = PostFeed::new(source, store);

        let posts = feed.fetch_new().await.unwrap();

        assert_eq!(ids(&posts), ["e", "d"]);
        assert_eq!(feed.cursor(), &cursor("e", 50));
    }

    #[tokio::test]
    async fn unchanged_batch_is_not_redelivered() {
        let batch = vec![raw("c", 30.0), raw("b", 20.0)];
        let store = MemoryStore::default();
        let source = FakeSource::with_batches(vec![Some(batch.clone()), Some(batch)]);
        let mut feed = PostFeed::new(source, store.clone());

        assert_eq!(feed.fetch_new().await.unwrap().len(), 2);
        assert!(feed.fetch_new().await.unwrap().is_empty());
        assert_eq!(store.save_count(), 1);
    }

    #[tokio::test]
    async fn broken_item_skips_only_itself() {
        let mut untitled = raw("b", 20.0);
        untitled.title = None;
        let store = MemoryStore::default();
        let source = FakeSource::with_batches(vec![Some(vec![
            raw("c", 30.0),
            untitled,
            raw("a", 10.0),
        ])]);
        let mut feed = PostFeed::new(source, store);

        let posts = feed.fetch_new().await.unwrap();

        assert_eq!(ids(&posts), ["c", "a"]);
    }

    #[tokio::test]
    async fn failed_poll_is_an_empty_batch() {
        let store = MemoryStore::with(cursor("b", 20));
        let source =
            FakeSource::with_batches(vec![None, Some(vec![raw("c", 30.0), raw("b", 20.0)])]);
        let mut feed = PostFeed::new(source, store.clone());

        assert!(feed.fetch_new().await.unwrap().is_empty());
        assert_eq!(store.save_count(), 0);
        assert_eq!(store.get(), Some(cursor("b", 20)));

        assert_eq!(ids(&feed.fetch_new().await.unwrap()), ["c"]);
    }

    #[tokio::test]
    async fn connects_once() {
        let source = FakeSource::with_batches(vec![Some(vec![]), Some(vec![])]);
        let mut feed = PostFeed::new(source, MemoryStore::default());

        feed.fetch_new().await.unwrap();
        feed.fetch_new().await.unwrap();

        assert_eq!(feed.source().connects(), 1);
        assert_eq!(feed.source().polls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_retries_then_succeeds() {
        let source = FakeSource::with_batches(vec![Some(vec![raw("a", 1.0)])]).failing_connects(2);
        let mut feed = PostFeed::new(source, MemoryStore::default());
        let start = Instant::now();

        let posts = feed.fetch_new().await.unwrap();

        assert_eq!(posts.len(), 1);
        assert_eq!(feed.source().connects(), 3);
        assert!(start.elapsed() >= CONNECT_RETRY_DELAY * 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_gives_up_after_three_attempts() {
        let source = FakeSource::default().failing_connects(10);
        let mut feed = PostFeed::new(source, MemoryStore::default());

        let err = feed.fetch_new().await.unwrap_err();

        assert!(matches!(err, SourceError::Connect { attempts: 3, .. }));
        assert_eq!(feed.source().connects(), 3);
        assert_eq!(feed.source().polls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_reconnect_skips_the_poll() {
        let source = FakeSource::with_batches(vec![
            Some(vec![raw("a", 10.0)]),
            Some(vec![raw("b", 20.0), raw("a", 10.0)]),
        ]);
        let mut feed = PostFeed::new(source.clone(), MemoryStore::default());

        assert_eq!(ids(&feed.fetch_new().await.unwrap()), ["a"]);

        // session lapses and reddit is down for every retry
        feed.source.close().await.unwrap();
        source.refuse_connects(CONNECT_ATTEMPTS);

        assert!(feed.fetch_new().await.unwrap().is_empty());
        assert_eq!(feed.source().connects(), 1 + CONNECT_ATTEMPTS as usize);
        assert_eq!(feed.source().polls(), 1);

        // next cycle reconnects and picks up where it left off
        assert_eq!(ids(&feed.fetch_new().await.unwrap()), ["b"]);
        assert_eq!(feed.cursor(), &cursor("b", 20));
    }

    #[tokio::test]
    async fn unreadable_store_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cursor.json");
        std::fs::write(&path, "garbage").unwrap();

        let feed = PostFeed::new(FakeSource::default(), crate::cursor::JsonFileStore::new(&path));

        assert_eq!(feed.cursor(), &Cursor::default());
    }

    #[tokio::test]
    async fn close_without_connect() {
        let mut feed = PostFeed::new(FakeSource::default(), MemoryStore::default());

        feed.close().await;

        assert_eq!(feed.source().closes(), 1);
    }
}
