//! Message ledger rules
//!
//! Messages are append-only. The store hands out ids while the owning thread is
//! locked, so id order is insertion order and is the only order readers see.

use learnhub_shared::{SenderType, UserId};
use time::OffsetDateTime;

use super::error::{SupportError, SupportResult};
use super::model::{NewMessage, SupportMessage};

/// Longer content is cut to this many characters rather than rejected
pub const MAX_CONTENT_CHARS: usize = 5000;

/// Longest attachment URL the schema accepts
pub const MAX_ATTACHMENT_URL_CHARS: usize = 1024;

/// Trim an optional string, mapping blank input to `None`
pub fn trim_to_none(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Cut `value` to at most `max` characters (not bytes)
pub fn truncate_chars(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((byte_idx, _)) => value[..byte_idx].to_string(),
        None => value.to_string(),
    }
}

pub fn normalize_content(raw: &str) -> SupportResult<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(SupportError::InvalidArgument(
            "Message content must not be empty".to_string(),
        ));
    }
    // Re-trim: the cut can expose trailing whitespace
    Ok(truncate_chars(trimmed, MAX_CONTENT_CHARS).trim_end().to_string())
}

/// Trim URLs, drop blanks and collapse duplicates, keeping first-seen order
pub fn normalize_attachments(raw: &[String]) -> SupportResult<Vec<String>> {
    let mut urls: Vec<String> = Vec::with_capacity(raw.len());
    for url in raw.iter().filter_map(|u| trim_to_none(Some(u))) {
        if url.chars().count() > MAX_ATTACHMENT_URL_CHARS {
            return Err(SupportError::InvalidArgument(format!(
                "Attachment URL too long (max {} characters)",
                MAX_ATTACHMENT_URL_CHARS
            )));
        }
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    Ok(urls)
}

/// Validate message input and stamp it with `now`
pub fn compose(
    sender_id: Option<UserId>,
    sender_type: SenderType,
    content: &str,
    attachments: &[String],
    now: OffsetDateTime,
) -> SupportResult<NewMessage> {
    Ok(NewMessage {
        sender_id,
        sender_type,
        content: normalize_content(content)?,
        attachments: normalize_attachments(attachments)?,
        created_at: now,
    })
}

pub fn sort_ledger(messages: &mut [SupportMessage]) {
    messages.sort_unstable_by_key(|m| m.id);
}
