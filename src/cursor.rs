//! Watermark of the last delivered post and where it is kept.

use std::{fs, io, path::PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CursorStoreError {
    #[error("cursor storage I/O failed: {0}")]
    Io(#[from] io::Error),

    #[error("cursor storage is corrupt: {0}")]
    Json(#[from] serde_json::Error),
}

/// Last delivered post. Posts at or before it are never fetched again.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "last_post_id")]
    pub last_id: Option<String>,
    #[serde(rename = "last_post_timestamp", default, deserialize_with = "whole_seconds")]
    pub last_timestamp: i64,
}

/// Accepts fractional timestamps too, as reddit hands them out.
fn whole_seconds<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(f64::deserialize(d)? as i64)
}

impl Cursor {
    /// `id` marks the boundary where a newest-first walk must stop.
    pub fn is_boundary(&self, id: &str) -> bool {
        self.last_id.as_deref() == Some(id)
    }

    /// Older than (or as old as) the watermark. Only meaningful once
    /// a post was delivered.
    pub fn is_stale(&self, created_at: i64) -> bool {
        self.last_id.is_some() && created_at <= self.last_timestamp
    }

    pub fn advance(&mut self, id: impl Into<String>, created_at: i64) {
        self.last_id = Some(id.into());
        self.last_timestamp = created_at;
    }
}

/// Durable home of the `Cursor`. Whole record is read and written at once.
pub trait CursorStore: Send {
    fn load(&self) -> Result<Cursor, CursorStoreError>;
    fn save(&mut self, cursor: &Cursor) -> Result<(), CursorStoreError>;
}

/// Cursor kept as a small json file, overwritten on every save.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CursorStore for JsonFileStore {
    fn load(&self) -> Result<Cursor, CursorStoreError> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Cursor::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn save(&mut self, cursor: &Cursor) -> Result<(), CursorStoreError> {
        let export = serde_json::to_string(cursor)?;
        fs::write(&self.path, export)?;
        Ok(())
    }
}

#[cfg(test)]
pub use memory::MemoryStore;
