//! Column family and key layout shared by the persistent stores
//!
//! RocksDB uses the column families directly; the file store mirrors them as
//! one file (or directory) per family inside each project directory.

/// Column family for routing patterns
pub const CF_PATTERNS: &str = "patterns";

/// Column family for session records
pub const CF_SESSIONS: &str = "sessions";

/// Column family for the attempt log
pub const CF_ATTEMPTS: &str = "attempts";

/// Column family for guardrails
pub const CF_GUARDRAILS: &str = "guardrails";

/// All column family names
pub const ALL_CFS: &[&str] = &[CF_PATTERNS, CF_SESSIONS, CF_ATTEMPTS, CF_GUARDRAILS];

/// Key prefixes for compound keys
///
/// Every key starts with the project so a prefix scan stays inside one project.
pub mod keys {
    /// Prefix covering every key of a project
    pub fn project(project: &str) -> String {
        format!("{}\x00", project)
    }

    /// Pattern key (project + signature + model)
    pub fn pattern(project: &str, signature: &str, model: &str) -> String {
        format!("{}\x00pat:{}:{}", project, signature, model)
    }

    /// Prefix for all patterns of one signature
    pub fn pattern_prefix(project: &str, signature: &str) -> String {
        format!("{}\x00pat:{}:", project, signature)
    }

    /// Session key
    pub fn session(project: &str, session_id: &str) -> String {
        format!("{}\x00sess:{}", project, session_id)
    }

    /// Attempt key, ordered by insertion sequence
    pub fn attempt(project: &str, seq: u64) -> String {
        format!("{}\x00att:{:020}", project, seq)
    }

    /// Guardrail key, ordered by insertion sequence
    pub fn guardrail(project: &str, seq: u64) -> String {
        format!("{}\x00grd:{:020}", project, seq)
    }

    /// Parse the sequence number from an attempt or guardrail key
    pub fn parse_seq(key: &str) -> Option<u64> {
        key.rsplit(':').next()?.parse().ok()
    }
}

/// Make a project id safe to use as a directory name
pub fn sanitize_project(project: &str) -> String {
    let cleaned: String = project
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_generation() {
        assert_eq!(keys::session("p", "abc123"), "p\x00sess:abc123");
        assert_eq!(keys::pattern("p", "sig", "gpt-4o"), "p\x00pat:sig:gpt-4o");
        assert!(keys::pattern("p", "sig", "m").starts_with(&keys::pattern_prefix("p", "sig")));
        assert!(keys::pattern("p", "sig", "m").starts_with(&keys::project("p")));
    }

    #[test]
    fn test_project_prefix_does_not_overlap() {
        let a = keys::session("proj", "x");
        assert!(!a.starts_with(&keys::project("pro")));
    }

    #[test]
    fn test_sequence_key_ordering() {
        let key1 = keys::attempt("p", 9);
        let key2 = keys::attempt("p", 10);
        assert!(key1 < key2);
        assert_eq!(keys::parse_seq(&key2), Some(10));
    }

    #[test]
    fn test_sanitize_project() {
        assert_eq!(sanitize_project("my-app"), "my-app");
        assert_eq!(sanitize_project("../etc/passwd"), "_etc_passwd");
        assert_eq!(sanitize_project("a b/c"), "a_b_c");
        assert_eq!(sanitize_project(".."), "_");
    }
}
