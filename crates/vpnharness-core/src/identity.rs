//! Process-unique run identifiers.
//!
//! Every cloud resource a run creates carries its `RunId`, so parallel runs
//! in the same account never collide.

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const RANDOM_LEN: usize = 5;
const MAX_LEN: usize = 16;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Lowercase alphanumeric label, always starting with a letter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    /// Generate a new id: five random characters followed by a base-36
    /// per-process sequence number. The random part has fixed width, so two
    /// different sequence numbers can never render the same id.
    pub fn generate() -> Self {
        let seq = SEQUENCE.fetch_add(1, Ordering::Relaxed);
        let bytes = uuid::Uuid::new_v4().into_bytes();

        let mut id = String::with_capacity(RANDOM_LEN + 4);
        // first character must be a letter: bucket and key names start with one
        id.push(ALPHABET[(bytes[0] % 26) as usize] as char);
        for b in &bytes[1..RANDOM_LEN] {
            id.push(ALPHABET[(*b as usize) % ALPHABET.len()] as char);
        }
        id.push_str(&base36(seq));
        RunId(id)
    }

    /// Accept an operator-supplied id, for reproducing a specific run.
    pub fn parse(s: &str) -> Result<Self> {
        let valid = !s.is_empty()
            && s.len() <= MAX_LEN
            && s.starts_with(|c: char| c.is_ascii_lowercase())
            && s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
        if !valid {
            return Err(HarnessError::InvalidConfig(format!(
                "run id '{}' must be 1-{} lowercase alphanumerics starting with a letter",
                s, MAX_LEN
            )));
        }
        Ok(RunId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `"{prefix}-{id}"`
    pub fn namespaced(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.0)
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Base-36 with `0-9a-z` digits.
fn base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generated_ids_are_unique() {
        let ids: HashSet<RunId> = (0..10_000).map(|_| RunId::generate()).collect();
        assert_eq!(ids.len(), 10_000);
    }

    #[test]
    fn test_generated_ids_unique_across_threads() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| (0..1_000).map(|_| RunId::generate()).collect::<Vec<_>>()))
            .collect();
        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate run id");
            }
        }
        assert_eq!(all.len(), 8_000);
    }

    #[test]
    fn test_generated_id_shape() {
        let id = RunId::generate();
        assert!(id.as_str().starts_with(|c: char| c.is_ascii_lowercase()));
        assert!(id
            .as_str()
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(RunId::parse(id.as_str()).is_ok());
    }

    #[test]
    fn test_parse_rejects_invalid() {
        assert!(RunId::parse("abc").is_ok());
        assert!(RunId::parse("").is_err());
        assert!(RunId::parse("1abc").is_err());
        assert!(RunId::parse("ABC").is_err());
        assert!(RunId::parse("ab-c").is_err());
        assert!(RunId::parse("abcdefghijklmnopq").is_err());
    }

    #[test]
    fn test_namespaced() {
        let id = RunId::parse("abc").unwrap();
        assert_eq!(id.namespaced("pritunl-backups"), "pritunl-backups-abc");
    }

    #[test]
    fn test_base36() {
        assert_eq!(base36(0), "0");
        assert_eq!(base36(35), "z");
        assert_eq!(base36(36), "10");
    }
}
