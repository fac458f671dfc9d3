use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptState {
    Claimed,
    Running,
    Succeeded,
    Failed,
}

/// Where a source came from. Uploads are deleted after success, local files are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Upload,
    Local,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Ladder,
    SingleQuality,
}

/// A source file plus the key its claim marker is stored under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRef {
    pub key: String,
    pub name: String,
    pub path: PathBuf,
    pub kind: SourceKind,
}

impl SourceRef {
    pub fn upload(id: &str, path: PathBuf) -> Self {
        Self {
            key: format!("upload-{}", escape_key(id)),
            name: id.to_string(),
            path,
            kind: SourceKind::Upload,
        }
    }

    pub fn local(filename: &str, path: PathBuf) -> Self {
        Self {
            key: format!("local-{}", escape_key(filename)),
            name: filename.to_string(),
            path,
            kind: SourceKind::Local,
        }
    }
}

/// Claim record persisted for every in-flight attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingAttempt {
    pub identity: Uuid,
    pub source_key: String,
    pub source_path: PathBuf,
    pub claimed_at: DateTime<Utc>,
    /// Refreshed while the owner is alive; staleness is measured from here
    pub renewed_at: DateTime<Utc>,
    pub state: AttemptState,
}

impl ProcessingAttempt {
    pub fn new(source: &SourceRef, identity: Uuid) -> Self {
        let now = Utc::now();
        Self {
            identity,
            source_key: source.key.clone(),
            source_path: source.path.clone(),
            claimed_at: now,
            renewed_at: now,
            state: AttemptState::Claimed,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.renewed_at).to_std().unwrap_or(Duration::ZERO)
    }

    pub fn is_stale(&self, ttl: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > ttl
    }
}

/// Claim keys only ever contain `[A-Za-z0-9._-]` and `%XX` escapes.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && !key.starts_with('.')
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '%'))
}

fn escape_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{:02X}", byte);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_keys_are_prefixed_and_escaped() {
        let upload = SourceRef::upload("2f6c0a", PathBuf::from("/u/2f6c0a"));
        assert_eq!(upload.key, "upload-2f6c0a");

        let local = SourceRef::local("My Movie.mp4", PathBuf::from("/v/My Movie.mp4"));
        assert_eq!(local.key, "local-My%20Movie.mp4");
        assert!(is_valid_key(&local.key));
    }

    #[test]
    fn test_escaping_is_injective() {
        let a = SourceRef::local("a b.mp4", PathBuf::new());
        let b = SourceRef::local("a_b.mp4", PathBuf::new());
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_invalid_keys() {
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("../etc"));
        assert!(!is_valid_key("a/b"));
        assert!(!is_valid_key(".hidden"));
    }

    #[test]
    fn test_staleness_uses_renewal_time() {
        let source = SourceRef::upload("abc", PathBuf::from("/u/abc"));
        let mut attempt = ProcessingAttempt::new(&source, Uuid::new_v4());
        let ttl = Duration::from_secs(30 * 60);
        let now = Utc::now();

        attempt.renewed_at = now - ChronoDuration::minutes(31);
        assert!(attempt.is_stale(ttl, now));

        attempt.renewed_at = now - ChronoDuration::minutes(29);
        assert!(!attempt.is_stale(ttl, now));
    }

    #[test]
    fn test_attempt_roundtrips_as_json() {
        let source = SourceRef::upload("abc", PathBuf::from("/u/abc"));
        let attempt = ProcessingAttempt::new(&source, Uuid::new_v4());
        let json = serde_json::to_string(&attempt).unwrap();
        assert!(json.contains("\"state\":\"claimed\""));
        let back: ProcessingAttempt = serde_json::from_str(&json).unwrap();
        assert_eq!(back, attempt);
    }
}
