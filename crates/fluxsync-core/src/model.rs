// ── Synchronized resource types ──
//
// Values carried on the resource set/delete channels. Timestamps are
// signed nanoseconds since the Unix epoch, matching `DataType::Timestamp`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// A composite key that could not be parsed from its string form.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid {kind} key '{key}'")]
pub struct KeyError {
    kind: &'static str,
    key: String,
}

impl KeyError {
    fn new(kind: &'static str, key: &str) -> Self {
        Self {
            kind,
            key: key.to_owned(),
        }
    }
}

/// Severity of a [`Status`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Variant {
    Success,
    Info,
    Warning,
    Error,
    Loading,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub variant: Variant,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Nanoseconds since the Unix epoch.
    #[serde(default)]
    pub time: i64,
    #[serde(default)]
    pub details: Option<Value>,
}

impl Status {
    pub fn timestamp(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.time)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub key: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub task_type: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub internal: bool,
    #[serde(default)]
    pub snapshot: bool,
}

/// Half-open interval `[start, end)` in nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

impl TimeRange {
    pub fn contains(&self, ts: i64) -> bool {
        self.start <= ts && ts < self.end
    }

    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            DateTime::from_timestamp_nanos(self.start),
            DateTime::from_timestamp_nanos(self.end),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub key: Uuid,
    pub name: String,
    pub time_range: TimeRange,
    #[serde(default)]
    pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub key: Uuid,
    pub name: String,
    pub color: String,
}

// ── Range aliases ────────────────────────────────────────────────────

/// A range-local name for a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub range: Uuid,
    pub channel: u32,
    pub alias: String,
}

impl Alias {
    pub fn key(&self) -> AliasKey {
        AliasKey {
            range: self.range,
            channel: self.channel,
        }
    }
}

/// Identifies an alias on the delete channel, encoded as `<range>---<channel>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AliasKey {
    pub range: Uuid,
    pub channel: u32,
}

const ALIAS_SEPARATOR: &str = "---";

impl FromStr for AliasKey {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KeyError::new("alias", s);
        let (range, channel) = s.split_once(ALIAS_SEPARATOR).ok_or_else(invalid)?;
        Ok(Self {
            range: range.parse().map_err(|_| invalid())?,
            channel: channel.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for AliasKey {
    type Error = KeyError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<AliasKey> for String {
    fn from(key: AliasKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for AliasKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{ALIAS_SEPARATOR}{}", self.range, self.channel)
    }
}

// ── Ontology relationships ───────────────────────────────────────────

/// Relationship type from a parent resource to its child.
pub const PARENT_OF: &str = "parent";

/// Relationship type from a resource to one of its labels.
pub const LABELED_BY: &str = "labeled_by";

/// A resource in the ontology graph, written `<type>:<key>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OntologyId {
    #[serde(rename = "type")]
    pub kind: String,
    pub key: String,
}

impl OntologyId {
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            key: key.into(),
        }
    }
}

impl FromStr for OntologyId {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((kind, key)) if !kind.is_empty() => Ok(Self::new(kind, key)),
            _ => Err(KeyError::new("ontology ID", s)),
        }
    }
}

impl fmt::Display for OntologyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// A directed, typed edge between two ontology resources.
///
/// Arrives either as an object or in its key form
/// `<from>-><type>-><to>`; deletes always use the key form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RelationshipRepr")]
pub struct Relationship {
    pub from: OntologyId,
    #[serde(rename = "type")]
    pub kind: String,
    pub to: OntologyId,
}

impl Relationship {
    /// `true` if this edge has type `kind` and starts at `from`.
    pub fn is_from(&self, kind: &str, from: &OntologyId) -> bool {
        self.kind == kind && self.from == *from
    }

    /// `true` if this edge has type `kind` and ends at `to`.
    pub fn is_to(&self, kind: &str, to: &OntologyId) -> bool {
        self.kind == kind && self.to == *to
    }
}

impl FromStr for Relationship {
    type Err = KeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || KeyError::new("relationship", s);
        let mut parts = s.split("->");
        let (Some(from), Some(kind), Some(to), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if kind.is_empty() {
            return Err(invalid());
        }
        Ok(Self {
            from: from.parse().map_err(|_| invalid())?,
            kind: kind.to_owned(),
            to: to.parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}->{}", self.from, self.kind, self.to)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RelationshipRepr {
    Key(String),
    Fields {
        from: OntologyId,
        #[serde(rename = "type")]
        kind: String,
        to: OntologyId,
    },
}

impl TryFrom<RelationshipRepr> for Relationship {
    type Error = KeyError;

    fn try_from(repr: RelationshipRepr) -> Result<Self, Self::Error> {
        match repr {
            RelationshipRepr::Key(key) => key.parse(),
            RelationshipRepr::Fields { from, kind, to } => Ok(Self { from, kind, to }),
        }
    }
}
