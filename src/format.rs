//! Turns a `ChannelPost` into Telegram MarkdownV2 text.
//!
//! Every reserved character is escaped with a backslash, title and body
//! separately. Escaping is not idempotent: running it over already
//! escaped text escapes the escapes.
//!
//! Long messages are cut *after* escaping, but only between escape units
//! (a backslash and the character it protects are never separated), and
//! finished with an escaped ellipsis. The result never exceeds the limit.

use lazy_static::lazy_static;
use regex::Regex;

use crate::sources::{ChannelPost, ChannelPostMedia};

/// Escaped `...`
pub const ELLIPSIS: &str = "\\.\\.\\.";

pub const DEFAULT_MAX_LENGTH: usize = 4096;

const SPECIAL_CHARS: &str = "_*[]()~`>#+-=|{}.!";

lazy_static! {
    static ref SPECIAL: Regex = Regex::new(r"[_*\[\]()~`>#+\-=|{}.!]").unwrap();
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FormattedMessage {
    /// Source post, for logs.
    pub post_id: String,
    pub text: String,
    pub media: Option<ChannelPostMedia>,
}

impl FormattedMessage {
    pub fn is_video(&self) -> bool {
        self.media.as_ref().is_some_and(ChannelPostMedia::is_video)
    }
}

pub fn escape_markdown_v2(text: &str) -> String {
    SPECIAL.replace_all(text, "\\$0").into_owned()
}

#[derive(Clone, Copy, Debug)]
pub struct Formatter {
    max_length: usize,
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_LENGTH)
    }
}

impl Formatter {
    pub fn new(max_length: usize) -> Self {
        Self { max_length }
    }

    pub fn format(&self, post: &ChannelPost) -> FormattedMessage {
        let title = escape_markdown_v2(&post.title);
        let mut text = format!("*{title}*");

        if !post.body.is_empty() {
            text.push_str("\n\n");
            text.push_str(&escape_markdown_v2(&post.body));
        }

        FormattedMessage {
            post_id: post.id.clone(),
            text: truncate_escaped(text, self.max_length),
            media: post.media.clone(),
        }
    }
}

/// Cuts escaped text to at most `max` characters, ellipsis included.
fn truncate_escaped(text: String, max: usize) -> String {
    if text.chars().count() <= max {
        return text;
    }

    let budget = max.saturating_sub(ELLIPSIS.len());
    let mut kept = 0;
    let mut end = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        let escaped = c == '\\' && chars.peek().is_some_and(|(_, n)| SPECIAL_CHARS.contains(*n));
        let width = if escaped { 2 } else { 1 };

        if kept + width > budget {
            break;
        }

        kept += width;
        end = idx + c.len_utf8();
        if escaped {
            if let Some((next_idx, next)) = chars.next() {
                end = next_idx + next.len_utf8();
            }
        }
    }

    // a raw backslash left at the cut would swallow the ellipsis escape;
    // escape units never end in one, so only raw ones are dropped
    let mut res = text[..end].trim_end_matches('\\').to_owned();
    res.push_str(ELLIPSIS);
    res
}
