//! Identifiers and backend key layout.
//!
//! Keys are laid out per session so that everything a session owns shares
//! the `{session_id}/` prefix:
//!
//! ```text
//! {session_id}/page/{page_id}/{version}   serialized page state
//! {session_id}/tracking                   write-order tracking record
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest session id accepted, in bytes.
pub const MAX_SESSION_ID_LEN: usize = 256;

/// Opaque identifier of a user session.
///
/// Session ids become key prefixes, so they may not contain `/`,
/// whitespace or control characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Validate and wrap a session id.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::InvalidArgument("session id is empty".to_string()));
        }
        if id.len() > MAX_SESSION_ID_LEN {
            return Err(Error::InvalidArgument(format!(
                "session id exceeds {} bytes",
                MAX_SESSION_ID_LEN
            )));
        }
        if let Some(c) = id
            .chars()
            .find(|c| *c == '/' || c.is_whitespace() || c.is_control())
        {
            return Err(Error::InvalidArgument(format!(
                "session id contains forbidden character {:?}",
                c
            )));
        }
        Ok(Self(id))
    }

    /// The raw id.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the session's tracking record.
    pub fn tracking_key(&self) -> String {
        format!("{}/tracking", self.0)
    }

    /// Prefix shared by every key the session owns.
    pub fn key_prefix(&self) -> String {
        format!("{}/", self.0)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for SessionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<&str> for SessionId {
    type Error = Error;

    fn try_from(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        Self::new(s)
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Self::new(raw).map_err(serde::de::Error::custom)
    }
}

/// Identifier of a page, unique within its session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(pub u64);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for PageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Version sequence number of a page. Starts at 1 and only grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[derive(Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionSeq(pub u64);

impl VersionSeq {
    /// The version assigned to a page's first write.
    pub const FIRST: VersionSeq = VersionSeq(1);

    /// The version following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for VersionSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for VersionSeq {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

/// Key of a stored page version.
pub fn page_key(session_id: &SessionId, page_id: PageId, version: VersionSeq) -> String {
    format!("{}/page/{}/{}", session_id, page_id, version)
}
