// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use lanectl_core::{CompletionContract, CoreError, DispatchEnvelope};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchParseError {
    #[error("no JSON object found in message body")]
    NoJsonBlock,
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("contract validation failed: {0}")]
    Invalid(#[from] CoreError),
}

/// Pull the first balanced `{...}` block out of a chat message body.
///
/// Planner/worker lanes send dispatch and completion payloads embedded in
/// ordinary chat text (often inside a fenced code block); this scans for
/// the first top-level JSON object rather than requiring the whole message
/// to be JSON.
pub fn extract_json_block(body: &str) -> Option<&str> {
    let start = body.find('{')?;
    let bytes = body.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&body[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Pull the body out of the first `<completion>...</completion>` block,
/// matched case-insensitively.
fn extract_completion_tag(body: &str) -> Option<&str> {
    let lower = body.to_ascii_lowercase();
    let open_start = lower.find("<completion")?;
    let open_end = lower[open_start..].find('>')? + open_start + 1;
    let close_start = lower[open_end..].find("</completion>")? + open_end;
    Some(body[open_end..close_start].trim())
}

/// Pull the contents of the first ```json fenced block, or a plain ``` fence.
fn extract_fenced_block(body: &str) -> Option<&str> {
    let fence = "```json";
    if let Some(start) = body.find(fence) {
        let after = start + fence.len();
        let end = body[after..].find("```")? + after;
        return Some(body[after..end].trim());
    }
    let start = body.find("```")?;
    let after = start + 3;
    let end = body[after..].find("```")? + after;
    Some(body[after..end].trim())
}

/// Locate the JSON text a completion or dispatch payload is carried in:
/// a fenced block first, then the first balanced `{...}`.
fn locate_json_text(body: &str) -> Option<&str> {
    extract_fenced_block(body).or_else(|| extract_json_block(body))
}

/// Undo one layer of `\n`, `\"`, `\\` escaping. Used when a completion body
/// arrives as a JSON string that itself contains the completion JSON.
fn unescape_one_layer(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.peek() {
                Some('n') => {
                    out.push('\n');
                    chars.next();
                }
                Some('"') => {
                    out.push('"');
                    chars.next();
                }
                Some('\\') => {
                    out.push('\\');
                    chars.next();
                }
                _ => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

pub fn parse_dispatch(body: &str) -> Result<DispatchEnvelope, DispatchParseError> {
    let json = extract_json_block(body).ok_or(DispatchParseError::NoJsonBlock)?;
    let envelope: DispatchEnvelope = serde_json::from_str(json)?;
    envelope.validate()?;
    Ok(envelope)
}

/// Parses a worker's completion contract out of a chat message body.
///
/// Extracts the first `<completion>...</completion>` block (case-insensitive)
/// if present, then looks for a ```json fenced block or a bare `{...}`
/// object. If that text doesn't parse as JSON, retries after undoing one
/// layer of `\n`/`\"`/`\\` escaping, to cover completions whose body is
/// itself a JSON string wrapping the real payload.
///
/// This only does structural parsing; semantic validation against the
/// originating dispatch (`run_id`/`branch` match, required fields, browser
/// evidence) happens at the call site via [`CompletionContract::validate`].
pub fn parse_completion(body: &str) -> Result<CompletionContract, DispatchParseError> {
    let scoped = extract_completion_tag(body).unwrap_or(body);
    let candidate = locate_json_text(scoped).ok_or(DispatchParseError::NoJsonBlock)?;

    match serde_json::from_str(candidate) {
        Ok(contract) => Ok(contract),
        Err(first_err) => {
            let unescaped = unescape_one_layer(candidate);
            let reextracted = locate_json_text(&unescaped)
                .map(str::to_string)
                .unwrap_or(unescaped);
            serde_json::from_str(&reextracted).map_err(|_| DispatchParseError::Json(first_err))
        }
    }
}
