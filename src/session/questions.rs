//! # Question Pool
//!
//! Interview questions handed to each session's engine. The pool file is
//! read once at startup; every new session gets its own in-memory copy
//! through the session context, so concurrent sessions can consume their
//! pools independently and nothing is ever written back to disk.

use serde_json::Value;
use tracing::{info, warn};

/// The startup-loaded question pool.
#[derive(Debug, Clone, Default)]
pub struct QuestionPool {
    questions: Vec<Value>,
}

impl QuestionPool {
    /// Load the pool from a JSON file holding an array of questions.
    ///
    /// A missing or malformed file yields an empty pool with a warning —
    /// sessions still run, engines just have no prepared questions.
    pub fn load(path: &str) -> Self {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) => {
                warn!(
                    "Question file {} unavailable ({}); starting with an empty pool",
                    path, err
                );
                return Self::default();
            }
        };

        match serde_json::from_str::<Vec<Value>>(&text) {
            Ok(questions) => {
                info!("Loaded {} questions from {}", questions.len(), path);
                Self { questions }
            }
            Err(err) => {
                warn!(
                    "Question file {} is not a JSON array ({}); starting with an empty pool",
                    path, err
                );
                Self::default()
            }
        }
    }

    pub fn from_questions(questions: Vec<Value>) -> Self {
        Self { questions }
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    /// An independent copy for one session. Sessions may drain or reorder
    /// their copy without affecting each other.
    pub fn session_copy(&self) -> Vec<Value> {
        self.questions.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 1, "text": "Any allergies?"}}, {{"id": 2, "text": "Current medication?"}}]"#
        )
        .unwrap();

        let pool = QuestionPool::load(file.path().to_str().unwrap());
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.session_copy()[0]["text"], "Any allergies?");
    }

    #[test]
    fn test_missing_file_yields_empty_pool() {
        let pool = QuestionPool::load("/nonexistent/questions.json");
        assert!(pool.is_empty());
    }

    #[test]
    fn test_session_copies_are_independent() {
        let pool = QuestionPool::from_questions(vec![json!({"id": 1})]);

        let mut first = pool.session_copy();
        first.clear();

        assert_eq!(pool.session_copy().len(), 1);
    }
}
