// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Event-template substitution for commands and env values.
//!
//! Two layers of expansion, applied in this order:
//! `${VAR}` / `${VAR:-default}` environment expansion, then `{{...}}` event
//! tokens resolved against the triggering event. Unknown tokens are left
//! intact so a literal `{{foo}}` in a command survives untouched.

use crate::config::ProcessKind;
use crate::event::Event;
use regex::Regex;
use std::sync::LazyLock;

/// Regex pattern for {{dotted.token.path}}
// Allow expect here as the regex is compile-time verified to be valid
#[allow(clippy::expect_used)]
static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z0-9_-]+)*)\s*\}\}")
        .expect("constant regex pattern is valid")
});

// Regex pattern for ${VAR} and ${VAR:-default} environment expansion
#[allow(clippy::expect_used)]
static ENV_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{(\w+)(?::-([^}]*))?\}").expect("constant regex pattern is valid")
});

/// Everything a `{{...}}` token can resolve against.
pub struct TemplateContext<'a> {
    /// The event that satisfied the final trigger, if any.
    pub event: Option<&'a Event>,
    pub process_name: &'a str,
    pub process_kind: ProcessKind,
    pub project: &'a str,
}

/// Expand `${VAR}` and `${VAR:-default}` from the daemon's environment.
///
/// Unset variables without a default are left as-is.
pub fn expand_os_env(input: &str) -> String {
    ENV_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            match std::env::var(&caps[1]) {
                Ok(val) => val,
                Err(_) => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    None => caps[0].to_string(),
                },
            }
        })
        .to_string()
}

/// Expand `{{...}}` tokens against the context.
///
/// Recognized tokens: `event.name`, `event.source`, `event.type`,
/// `event.timestamp`, `event.data.<path>`, `process.name`, `process.type`,
/// `clier.project`. Anything else — including `event.data` paths that do
/// not resolve — is left intact.
pub fn expand_tokens(input: &str, ctx: &TemplateContext<'_>) -> String {
    TOKEN_PATTERN
        .replace_all(input, |caps: &regex::Captures| {
            resolve_token(&caps[1], ctx).unwrap_or_else(|| caps[0].to_string())
        })
        .to_string()
}

fn resolve_token(token: &str, ctx: &TemplateContext<'_>) -> Option<String> {
    match token {
        "process.name" => return Some(ctx.process_name.to_string()),
        "process.type" => {
            return Some(
                match ctx.process_kind {
                    ProcessKind::Service => "service",
                    ProcessKind::Task => "task",
                }
                .to_string(),
            )
        }
        "clier.project" => return Some(ctx.project.to_string()),
        _ => {}
    }

    let event = ctx.event?;
    match token {
        "event.name" => Some(event.name.clone()),
        "event.source" => Some(event.process_name.clone()),
        "event.type" => Some(event.kind_str().to_string()),
        "event.timestamp" => Some(event.timestamp_ms.to_string()),
        _ => {
            let path = token.strip_prefix("event.data.")?;
            resolve_data_path(event.data.as_ref()?, path).map(render_value)
        }
    }
}

/// Walk a dot-separated path into the event payload. Segments of ASCII
/// digits index into arrays; anything unresolved yields `None`.
fn resolve_data_path<'v>(
    data: &'v serde_json::Value,
    path: &str,
) -> Option<&'v serde_json::Value> {
    let mut current = data;
    for segment in path.split('.') {
        current = if segment.bytes().all(|b| b.is_ascii_digit()) {
            match current {
                serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                serde_json::Value::Object(map) => map.get(segment)?,
                _ => return None,
            }
        } else {
            current.as_object()?.get(segment)?
        };
    }
    Some(current)
}

/// Strings substitute raw; other values substitute as compact JSON.
fn render_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
#[path = "template_tests.rs"]
mod tests;
