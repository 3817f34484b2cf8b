//! Metadata filtering between HTTP headers and the backend call context.
//!
//! # Matching
//! - Each configured key becomes a [`KeyPattern`]: exact when it has no `*`,
//!   a glob otherwise (`*` matches any run of characters, including none).
//! - Matching is anchored and ASCII case-insensitive. Header names arrive
//!   lowercased from the HTTP stack, so `GRPC-Metadata-*` matches
//!   `grpc-metadata-foo` and `grpc-metadata-` but not `grpc-metadata`.
//! - Rules are evaluated in registration order; the first matching rule
//!   decides. Keys no rule matches are dropped: the filter is an allow-list.
//!
//! # Directions
//! Rules are fanned out at registration time into a request list and a
//! response list. Request rules build the [`Metadata`] forwarded into the
//! backend call; response rules filter the `grpc-metadata-*` headers of a
//! successful backend response (see [`RESPONSE_METADATA_PREFIX`]).

use std::collections::BTreeMap;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

/// Header namespace carrying backend response metadata.
pub const RESPONSE_METADATA_PREFIX: &str = "grpc-metadata-";

/// Which list(s) a rule is registered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Request,
    Response,
    Bidirectional,
}

impl Direction {
    fn applies_to_request(self) -> bool {
        matches!(self, Direction::Request | Direction::Bidirectional)
    }

    fn applies_to_response(self) -> bool {
        matches!(self, Direction::Response | Direction::Bidirectional)
    }
}

/// What happens to a key whose first matching rule is this one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetaAction {
    /// Copy every value of the key into the output.
    PassThrough,
    /// Reserved. Currently produces no output for the key.
    Append,
    /// Drop the key.
    Delete,
}

/// A compiled key pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    raw: String,
    kind: PatternKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternKind {
    Exact(String),
    /// Literal pieces between `*` markers, lowercased.
    Glob(Vec<String>),
}

impl KeyPattern {
    /// Compile a literal key or `*` glob.
    pub fn compile(key: &str) -> Self {
        let lowered = key.to_ascii_lowercase();
        let kind = if lowered.contains('*') {
            PatternKind::Glob(lowered.split('*').map(str::to_string).collect())
        } else {
            PatternKind::Exact(lowered)
        };

        Self {
            raw: key.to_string(),
            kind,
        }
    }

    /// The key as it was configured.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the pattern contains a wildcard.
    pub fn is_glob(&self) -> bool {
        matches!(self.kind, PatternKind::Glob(_))
    }

    /// Anchored, ASCII case-insensitive match.
    pub fn matches(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        match &self.kind {
            PatternKind::Exact(expected) => *expected == key,
            PatternKind::Glob(pieces) => glob_match(pieces, &key),
        }
    }
}

/// `pieces` always has at least two entries: the text before the first `*`
/// and the text after the last one.
fn glob_match(pieces: &[String], key: &str) -> bool {
    let (first, rest) = match pieces.split_first() {
        Some(split) => split,
        None => return key.is_empty(),
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return key == first,
    };

    if key.len() < first.len() + last.len() {
        return false;
    }
    if !key.starts_with(first.as_str()) || !key.ends_with(last.as_str()) {
        return false;
    }

    let mut cursor = &key[first.len()..key.len() - last.len()];
    for piece in middle {
        match cursor.find(piece.as_str()) {
            Some(at) => cursor = &cursor[at + piece.len()..],
            None => return false,
        }
    }
    true
}

/// One configured rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRule {
    pub pattern: KeyPattern,
    pub action: MetaAction,
}

/// Ordered rule list for one direction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRules {
    rules: Vec<MatchRule>,
}

impl MetadataRules {
    /// Append a rule; earlier rules win.
    pub fn push(&mut self, rule: MatchRule) {
        self.rules.push(rule);
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Rules in match order.
    pub fn iter(&self) -> impl Iterator<Item = &MatchRule> {
        self.rules.iter()
    }

    /// First rule whose pattern matches `key`.
    pub fn first_match(&self, key: &str) -> Option<&MatchRule> {
        self.rules.iter().find(|rule| rule.pattern.matches(key))
    }

    /// Build the metadata forwarded for `headers`.
    ///
    /// When `prefix` is non-empty it is stripped from keys that carry it
    /// before matching, and the stripped key is what lands in the output.
    pub fn match_headers(&self, headers: &HeaderMap, prefix: &str) -> Metadata {
        let prefix = prefix.to_ascii_lowercase();
        let mut md = Metadata::default();

        for name in headers.keys() {
            let key = name.as_str();
            let key = match key.strip_prefix(prefix.as_str()) {
                Some(stripped) if !prefix.is_empty() => stripped,
                _ => key,
            };

            let Some(rule) = self.first_match(key) else {
                continue;
            };

            match rule.action {
                MetaAction::PassThrough => {
                    let values = headers
                        .get_all(name)
                        .iter()
                        .filter_map(|v| v.to_str().ok())
                        .map(str::to_string)
                        .collect();
                    md.set(key, values);
                }
                MetaAction::Append | MetaAction::Delete => {}
            }
        }

        md
    }

    /// Drop response metadata headers whose first matching rule is not a pass-through.
    ///
    /// Headers outside [`RESPONSE_METADATA_PREFIX`] are left alone.
    pub fn retain_response_headers(&self, headers: &mut HeaderMap) {
        let doomed: Vec<_> = headers
            .keys()
            .filter(|name| name.as_str().starts_with(RESPONSE_METADATA_PREFIX))
            .filter(|name| {
                !matches!(
                    self.first_match(name.as_str()).map(|rule| rule.action),
                    Some(MetaAction::PassThrough)
                )
            })
            .cloned()
            .collect();

        for name in doomed {
            headers.remove(&name);
        }
    }
}

/// Request and response rule lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataPolicy {
    request: MetadataRules,
    response: MetadataRules,
}

impl MetadataPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward these keys.
    pub fn pass_through<I, S>(self, keys: I, direction: Direction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rules(keys, MetaAction::PassThrough, direction)
    }

    /// Drop these keys.
    pub fn delete<I, S>(self, keys: I, direction: Direction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.rules(keys, MetaAction::Delete, direction)
    }

    /// Register one rule per key with `action`.
    pub fn rules<I, S>(mut self, keys: I, action: MetaAction, direction: Direction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for key in keys {
            self.add(
                MatchRule {
                    pattern: KeyPattern::compile(key.as_ref()),
                    action,
                },
                direction,
            );
        }
        self
    }

    /// Add `rule` to the lists `direction` covers.
    pub fn add(&mut self, rule: MatchRule, direction: Direction) {
        if direction.applies_to_request() {
            self.request.push(rule.clone());
        }
        if direction.applies_to_response() {
            self.response.push(rule);
        }
    }

    /// Rules applied to incoming headers.
    pub fn request(&self) -> &MetadataRules {
        &self.request
    }

    /// Rules applied to `grpc-metadata-` response headers.
    pub fn response(&self) -> &MetadataRules {
        &self.response
    }

    /// Metadata forwarded into the backend call for an inbound request.
    pub fn incoming(&self, headers: &HeaderMap) -> Metadata {
        if self.request.is_empty() {
            return Metadata::default();
        }
        self.request.match_headers(headers, "")
    }

    /// Filter backend metadata headers on an outbound response.
    pub fn outgoing(&self, headers: &mut HeaderMap) {
        if !self.response.is_empty() {
            self.response.retain_response_headers(headers);
        }
    }
}

/// Key/value metadata attached to a backend call. Keys are lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    entries: BTreeMap<String, Vec<String>>,
}

impl Metadata {
    /// Replace the values of `key`.
    pub fn set(&mut self, key: &str, values: Vec<String>) {
        self.entries.insert(key.to_ascii_lowercase(), values);
    }

    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_all(key).first().map(String::as_str)
    }

    /// Every value for `key`, in arrival order.
    pub fn get_all(&self, key: &str) -> &[String] {
        self.entries
            .get(&key.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&key.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}
