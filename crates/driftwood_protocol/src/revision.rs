//! Revision identifiers.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Number of digest bytes kept in a revision id.
const DIGEST_BYTES: usize = 16;

/// Identifies one revision of a document.
///
/// Revisions are written as `<generation>-<digest>`, where the generation
/// counts edits along a branch and the digest is a SHA-256 prefix over the
/// parent revision and the revision content. Ordering is by generation, then
/// digest, which gives every replica the same deterministic winner among
/// concurrent branches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RevisionId {
    generation: u64,
    digest: String,
}

impl RevisionId {
    /// Derives the revision that follows `parent` for the given content.
    pub fn next(parent: Option<&RevisionId>, content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        if let Some(parent) = parent {
            hasher.update(parent.to_string().as_bytes());
        }
        hasher.update(content);
        let hash = hasher.finalize();

        let digest = hash[..DIGEST_BYTES]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect();

        Self {
            generation: parent.map_or(1, |p| p.generation + 1),
            digest,
        }
    }

    /// Returns the generation of this revision.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the digest part of this revision.
    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for RevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.digest)
    }
}

/// Error returned when parsing a malformed revision id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed revision id: {0}")]
pub struct ParseRevisionError(String);

impl FromStr for RevisionId {
    type Err = ParseRevisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, digest) = s
            .split_once('-')
            .ok_or_else(|| ParseRevisionError(s.to_string()))?;
        let generation: u64 = generation
            .parse()
            .map_err(|_| ParseRevisionError(s.to_string()))?;
        if generation == 0 || digest.is_empty() || !digest.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(ParseRevisionError(s.to_string()));
        }
        Ok(Self {
            generation,
            digest: digest.to_string(),
        })
    }
}

impl TryFrom<String> for RevisionId {
    type Error = ParseRevisionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RevisionId> for String {
    fn from(rev: RevisionId) -> Self {
        rev.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generations_advance() {
        let first = RevisionId::next(None, b"a");
        let second = RevisionId::next(Some(&first), b"b");
        assert_eq!(first.generation(), 1);
        assert_eq!(second.generation(), 2);
        assert_eq!(first.digest().len(), DIGEST_BYTES * 2);
        assert!(second > first);
    }

    #[test]
    fn digest_depends_on_parent() {
        let root_a = RevisionId::next(None, b"a");
        let root_b = RevisionId::next(None, b"b");
        assert_ne!(
            RevisionId::next(Some(&root_a), b"x"),
            RevisionId::next(Some(&root_b), b"x")
        );
        assert_eq!(RevisionId::next(None, b"a"), root_a);
    }

    #[test]
    fn parse_and_display() {
        let rev: RevisionId = "3-abc123".parse().unwrap();
        assert_eq!(rev.generation(), 3);
        assert_eq!(rev.digest(), "abc123");
        assert_eq!(rev.to_string(), "3-abc123");

        assert!("abc".parse::<RevisionId>().is_err());
        assert!("0-abc".parse::<RevisionId>().is_err());
        assert!("x-abc".parse::<RevisionId>().is_err());
        assert!("2-".parse::<RevisionId>().is_err());
    }

    #[test]
    fn serde_as_string() {
        let rev: RevisionId = "2-ff00".parse().unwrap();
        let json = serde_json::to_string(&rev).unwrap();
        assert_eq!(json, "\"2-ff00\"");
        let back: RevisionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rev);
    }
}
