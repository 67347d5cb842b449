//! Signal Parser (C4): extracts `<kind session="TOKEN">body</kind>` markers
//! from captured agent output and validates the session token binding.
//!
//! Grounded in the teacher's regex-based tag scanning in
//! `td/src/loop/validation.rs`, generalized from a single fixed tag to an
//! arbitrary closed set of signal kinds.

use std::sync::OnceLock;

use regex::Regex;

use crate::session::SessionToken;

/// The closed set of completion signal kinds an agent phase can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    TaskDone,
    TestsDone,
    ReviewApproved,
    ReviewRejected,
    FixDone,
}

impl SignalKind {
    pub fn tag(&self) -> &'static str {
        match self {
            SignalKind::TaskDone => "task-done",
            SignalKind::TestsDone => "tests-done",
            SignalKind::ReviewApproved => "review-approved",
            SignalKind::ReviewRejected => "review-rejected",
            SignalKind::FixDone => "fix-done",
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "task-done" => Some(SignalKind::TaskDone),
            "tests-done" => Some(SignalKind::TestsDone),
            "review-approved" => Some(SignalKind::ReviewApproved),
            "review-rejected" => Some(SignalKind::ReviewRejected),
            "fix-done" => Some(SignalKind::FixDone),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParsedSignal {
    pub kind: SignalKind,
    pub session_token: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalError {
    /// No marker of the expected kind was found in the output at all.
    NoSignal,
    /// A marker of the expected kind was found, but its token didn't match.
    InvalidToken,
}

fn signal_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)<([a-zA-Z0-9_-]+)\s+session="([^"]*)">(.*?)</\1>"#).unwrap()
    })
}

/// Scan `output` for every signal marker present, in order of appearance.
fn all_signals(output: &str) -> Vec<(SignalKind, String, String)> {
    signal_regex()
        .captures_iter(output)
        .filter_map(|cap| {
            let tag = cap.get(1)?.as_str();
            let kind = SignalKind::from_tag(tag)?;
            let token = cap.get(2)?.as_str().to_string();
            let body = cap.get(3)?.as_str().to_string();
            Some((kind, token, body))
        })
        .collect()
}

/// Find the signal of `expected` kind in `output`, validating it against
/// `session_token`. If multiple signals of the same kind are present, the
/// last one wins (spec.md §4.4).
pub fn parse_signal(
    output: &str,
    expected: SignalKind,
    session_token: &SessionToken,
) -> Result<ParsedSignal, SignalError> {
    let matches: Vec<_> = all_signals(output)
        .into_iter()
        .filter(|(kind, ..)| *kind == expected)
        .collect();

    let Some((kind, token, body)) = matches.into_iter().next_back() else {
        return Err(SignalError::NoSignal);
    };

    if token != session_token.as_str() {
        return Err(SignalError::InvalidToken);
    }

    Ok(ParsedSignal {
        kind,
        session_token: token,
        body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn token() -> SessionToken {
        SessionToken::parse("ralph-20260727-120000-0123456789abcdef0123456789abcdef").unwrap()
    }

    #[test]
    fn extracts_matching_signal() {
        let t = token();
        let output = format!(r#"some preamble <task-done session="{t}">all good</task-done>"#);
        let parsed = parse_signal(&output, SignalKind::TaskDone, &t).unwrap();
        assert_eq!(parsed.body, "all good");
    }

    #[test]
    fn missing_signal_is_no_signal() {
        let t = token();
        let err = parse_signal("no markers here", SignalKind::TaskDone, &t).unwrap_err();
        assert_eq!(err, SignalError::NoSignal);
    }

    #[test]
    fn wrong_token_is_invalid_token() {
        let t = token();
        let output = r#"<task-done session="wrong-token">body</task-done>"#;
        let err = parse_signal(output, SignalKind::TaskDone, &t).unwrap_err();
        assert_eq!(err, SignalError::InvalidToken);
    }

    #[test]
    fn last_signal_of_same_kind_wins() {
        let t = token();
        let output = format!(
            r#"<task-done session="{t}">first</task-done> blah <task-done session="{t}">second</task-done>"#
        );
        let parsed = parse_signal(&output, SignalKind::TaskDone, &t).unwrap();
        assert_eq!(parsed.body, "second");
    }

    #[test]
    fn only_expected_kind_counts_when_multiple_kinds_present() {
        let t = token();
        let output = format!(
            r#"<tests-done session="{t}">wrong kind</tests-done><task-done session="{t}">right kind</task-done>"#
        );
        let parsed = parse_signal(&output, SignalKind::TaskDone, &t).unwrap();
        assert_eq!(parsed.body, "right kind");
    }

    #[test]
    fn empty_body_review_approved_is_valid() {
        let t = token();
        let output = format!(r#"<review-approved session="{t}"></review-approved>"#);
        let parsed = parse_signal(&output, SignalKind::ReviewApproved, &t).unwrap();
        assert_eq!(parsed.body, "");
    }
}
