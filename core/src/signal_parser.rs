//! `parse_signal`: pure text-tag parser over agent response output.
//!
//! Grounded on the reference codebase's `flow_executor.rs::OrchestratorDecision::parse`
//! (lowercase, scan for a marker substring, then extract an attribute-like
//! `reason="..."` value) -- adapted here to the literal tag vocabulary this
//! core recognizes: `<complete/>`, `<blocked reason="..."/>`,
//! `<approve reason="..."/>`, `<reject reason="..."/>`. The function is pure
//! and total, so equal inputs always yield equal outputs.

use crate::model::{Signal, SignalResult};

const NO_REASON: &str = "";

/// Extract the value of a `reason="..."` (or `reason='...'`) attribute
/// following `tag_start` inside `lower` (already-lowercased haystack), using
/// the original-case `text` to preserve the reason's casing in the result.
fn extract_reason(text: &str, lower: &str, tag_start: usize) -> String {
    // Look for `reason=` within a bounded window after the tag so we don't
    // accidentally pick up an unrelated later occurrence.
    let window_end = lower[tag_start..]
        .find('>')
        .map(|rel| tag_start + rel + 1)
        .unwrap_or(lower.len());
    let window = &lower[tag_start..window_end];
    let Some(rel_idx) = window.find("reason=") else {
        return NO_REASON.to_string();
    };
    let abs_idx = tag_start + rel_idx + "reason=".len();
    let bytes = text.as_bytes();
    if abs_idx >= bytes.len() {
        return NO_REASON.to_string();
    }
    let quote = bytes[abs_idx] as char;
    if quote != '"' && quote != '\'' {
        return NO_REASON.to_string();
    }
    let rest = &text[abs_idx + 1..];
    match rest.find(quote) {
        Some(end) => rest[..end].to_string(),
        None => NO_REASON.to_string(),
    }
}

/// Parse the first recognized signal tag out of `text`. Recognized tags are
/// matched case-insensitively; everything else (no tag, or an unrecognized
/// one) yields `Signal::Continue`.
pub fn parse_signal(text: &str) -> SignalResult {
    let lower = text.to_lowercase();

    // Scan left-to-right so the *first* tag to appear wins, matching the
    // natural reading order an agent would emit a single terminal signal in.
    let candidates = [
        ("<complete", Signal::Complete),
        ("<blocked", Signal::Blocked),
        ("<approve", Signal::Approve),
        ("<reject", Signal::Reject),
    ];

    let mut best: Option<(usize, &str, Signal)> = None;
    for (marker, sig) in candidates {
        if let Some(idx) = lower.find(marker) {
            let should_replace = match &best {
                Some((best_idx, _, _)) => idx < *best_idx,
                None => true,
            };
            if should_replace {
                best = Some((idx, marker, sig.clone()));
            }
        }
    }

    match best {
        None => SignalResult::continue_(),
        Some((idx, _marker, signal)) => {
            let reason = match signal {
                Signal::Complete => NO_REASON.to_string(),
                _ => extract_reason(text, &lower, idx),
            };
            SignalResult { signal, reason }
        }
    }
}
