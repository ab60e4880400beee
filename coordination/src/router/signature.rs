//! Task signatures
//!
//! A signature groups "similar" tasks so routing history can be shared
//! between them. It is a pure function of complexity, the tag set, and a
//! coarse file-count bucket.

use serde::{Deserialize, Serialize};

use crate::prd::{Complexity, Task};

/// Coarse file-count grouping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesBucket {
    /// 0-2 files
    Few,
    /// 3-5 files
    Some,
    /// 6 or more files
    Many,
}

impl FilesBucket {
    pub fn from_count(count: usize) -> Self {
        match count {
            0..=2 => Self::Few,
            3..=5 => Self::Some,
            _ => Self::Many,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Few => "few",
            Self::Some => "some",
            Self::Many => "many",
        }
    }
}

impl std::fmt::Display for FilesBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable grouping key for routing history
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskSignature {
    /// Hex digest of the normalized tuple
    pub hash: String,
    pub complexity: Complexity,
    /// Lowercased, sorted, deduplicated
    pub tags: Vec<String>,
    pub files_bucket: FilesBucket,
}

impl TaskSignature {
    pub fn new<S: AsRef<str>>(complexity: Complexity, tags: &[S], file_count: usize) -> Self {
        let tags = normalize_tags(tags);
        let files_bucket = FilesBucket::from_count(file_count);

        let mut hasher = blake3::Hasher::new();
        hasher.update(complexity.as_str().as_bytes());
        hasher.update(b"\x1f");
        for tag in &tags {
            hasher.update(tag.as_bytes());
            hasher.update(b"\x1e");
        }
        hasher.update(b"\x1f");
        hasher.update(files_bucket.as_str().as_bytes());
        let hex = hasher.finalize().to_hex();

        Self {
            hash: hex[..16].to_string(),
            complexity,
            tags,
            files_bucket,
        }
    }

    pub fn for_task(task: &Task) -> Self {
        Self::new(task.complexity, &task.tags, task.file_count())
    }
}

impl std::fmt::Display for TaskSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[{}|{}|{}]",
            self.hash,
            self.complexity,
            self.tags.join(","),
            self.files_bucket
        )
    }
}

fn normalize_tags<S: AsRef<str>>(tags: &[S]) -> Vec<String> {
    let mut out: Vec<String> = tags
        .iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}
