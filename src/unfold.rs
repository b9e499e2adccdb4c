//! Argument-unfolding grammar: turns one folded command line into the
//! Cartesian product of concrete command strings.
//!
//! Two folded-token kinds are recognized, the range template tried before
//! the list template at every position (the range grammar is strictly more
//! specific, so matching it first avoids the list template eating a range
//! token). Ground truth for both regexes:
//! `original_source/smartdispatch/argument_template.py`.

use regex::Regex;
use std::sync::OnceLock;

use crate::uid::command_uid;

fn range_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+):(\d+)(?::(\d+))?\]").unwrap())
}

fn list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[[^\[\]]*\]").unwrap())
}

// Escaped brackets are swapped for these private-use markers prior to
// tokenization and restored once unfolding is complete, per spec.md's
// escape-rule implementation hint.
const ESCAPED_OPEN: &str = "\u{E000}";
const ESCAPED_CLOSE: &str = "\u{E001}";

fn mask_escapes(command: &str) -> String {
    command.replace("\\[", ESCAPED_OPEN).replace("\\]", ESCAPED_CLOSE)
}

fn unmask_escapes(command: &str) -> String {
    command.replace(ESCAPED_OPEN, "[").replace(ESCAPED_CLOSE, "]")
}

/// One segment of the command: either literal text or a set of
/// alternatives produced by unfolding a single bracketed token.
enum Segment {
    Literal(String),
    Alternatives(Vec<String>),
}

fn unfold_range(token: &str) -> Vec<String> {
    let caps = range_regex().captures(token).expect("token matched range_regex");
    let start: u64 = caps[1].parse().unwrap();
    let end: u64 = caps[2].parse().unwrap();
    let step: u64 = caps.get(3).map_or(1, |m| m.as_str().parse().unwrap());

    if step == 0 {
        return Vec::new();
    }

    let mut values = Vec::new();
    let mut v = start;
    while v < end {
        values.push(v.to_string());
        v += step;
    }
    values
}

fn unfold_list(token: &str) -> Vec<String> {
    let inner = &token[1..token.len() - 1];
    if inner.is_empty() {
        return vec![String::new()];
    }
    inner.split(' ').map(|s| s.to_string()).collect()
}

/// Split `command` into an alternating sequence of literal runs and
/// alternative sets, scanning left to right and trying the range template
/// before the list template at each position.
fn tokenize(command: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut rest = command;

    loop {
        let range_match = range_regex().find(rest);
        let list_match = list_regex().find(rest);

        let next_match = match (range_match, list_match) {
            (Some(r), Some(l)) if r.start() <= l.start() => Some(r),
            (Some(r), None) => Some(r),
            (_, Some(l)) => Some(l),
            (None, None) => None,
        };

        match next_match {
            None => {
                if !rest.is_empty() {
                    segments.push(Segment::Literal(rest.to_string()));
                }
                break;
            }
            Some(m) => {
                if m.start() > 0 {
                    segments.push(Segment::Literal(rest[..m.start()].to_string()));
                }

                let token = m.as_str();
                let alternatives = if range_regex().is_match(token) {
                    unfold_range(token)
                } else {
                    unfold_list(token)
                };
                segments.push(Segment::Alternatives(alternatives));

                rest = &rest[m.end()..];
            }
        }
    }

    segments
}

/// Cartesian product of the alternative sets, each joined by its
/// neighbouring literals. An empty alternative set (e.g. an empty range)
/// kills the whole product, matching spec.md's "empty range ... yields
/// zero commands".
fn cartesian_join(segments: &[Segment]) -> Vec<String> {
    let mut outputs = vec![String::new()];

    for segment in segments {
        match segment {
            Segment::Literal(text) => {
                for out in outputs.iter_mut() {
                    out.push_str(text);
                }
            }
            Segment::Alternatives(values) => {
                if values.is_empty() {
                    return Vec::new();
                }
                let mut next = Vec::with_capacity(outputs.len() * values.len());
                for out in &outputs {
                    for value in values {
                        let mut combined = out.clone();
                        combined.push_str(value);
                        next.push(combined);
                    }
                }
                outputs = next;
            }
        }
    }

    outputs
}

/// Unfold one folded command line into the ordered Cartesian product of
/// concrete command strings. Pure function of the input (spec.md P6).
pub fn unfold_command(command: &str) -> Vec<String> {
    let masked = mask_escapes(command);
    let segments = tokenize(&masked);
    cartesian_join(&segments)
        .into_iter()
        .map(|s| unmask_escapes(&s))
        .collect()
}

/// Replace every occurrence of the literal token `{UID}` in `command` with
/// the SHA-256 hex digest of `command` as it was *before* substitution.
pub fn substitute_uid_tag(command: &str) -> String {
    if !command.contains("{UID}") {
        return command.to_string();
    }
    let uid = command_uid(command);
    command.replace("{UID}", &uid)
}
