//! Read-only problem definitions. Storage itself is out of scope; this
//! store resolves `problem_id -> definition` from a directory of JSON
//! files, one file per problem.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Language;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Hidden,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Public
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemCase {
    pub id: u32,
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub languages: Vec<Language>,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    #[serde(default)]
    pub wall_time_limit_ms: Option<u64>,
    /// Strip stdout/stderr from every event published for submissions
    /// against this problem.
    #[serde(default)]
    pub hide_output: bool,
    pub test_cases: Vec<ProblemCase>,
}

impl Problem {
    pub fn allows(&self, language: Language) -> bool {
        self.languages.contains(&language)
    }
}

#[derive(Debug, Error)]
pub enum ProblemStoreError {
    #[error("invalid problem id: {0:?}")]
    InvalidId(String),
    #[error("failed to read problem definition: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed problem definition: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Directory-backed problem store: `<dir>/<id>.json`.
#[derive(Debug, Clone)]
pub struct FileProblemStore {
    dir: PathBuf,
}

impl FileProblemStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileProblemStore { dir: dir.into() }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Problem>, ProblemStoreError> {
        // ids come straight from clients; never let them walk the tree
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ProblemStoreError::InvalidId(id.to_string()));
        }
        let path = self.dir.join(format!("{}.json", id));
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_traversal_ids() {
        let store = FileProblemStore::new("problems");
        assert!(matches!(
            store.get("../etc/passwd").await,
            Err(ProblemStoreError::InvalidId(_))
        ));
        assert!(matches!(
            store.get("").await,
            Err(ProblemStoreError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn missing_problem_is_none() {
        let store = FileProblemStore::new(std::env::temp_dir());
        assert!(store.get("no-such-problem").await.unwrap().is_none());
    }

    #[test]
    fn case_visibility_defaults_to_public() {
        let case: ProblemCase =
            serde_json::from_str(r#"{"id":1,"input":"1 2","output":"3"}"#).unwrap();
        assert_eq!(case.visibility, Visibility::Public);
    }

    #[test]
    fn problem_parses_with_defaults() {
        let problem: Problem = serde_json::from_str(
            r#"{
                "id": "sum",
                "languages": ["c", "python"],
                "time_limit_ms": 1000,
                "memory_limit_kb": 262144,
                "test_cases": [{"id": 1, "input": "1 2", "output": "3", "visibility": "hidden"}]
            }"#,
        )
        .unwrap();
        assert!(problem.allows(Language::Python));
        assert!(!problem.allows(Language::Java));
        assert!(!problem.hide_output);
        assert_eq!(problem.test_cases[0].visibility, Visibility::Hidden);
    }
}
