//! Session directory
//!
//! The hub only uses session ids as partition keys; this directory answers
//! whether an id exists and hands out new sessions with starter code.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;

/// Language used when a session is created without one
pub const DEFAULT_LANGUAGE: &str = "javascript";

/// A shared document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    /// Session id
    pub session_id: String,
    /// Language tag
    pub language: String,
    /// Current source text
    pub code: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

/// Starter code for a new session
pub fn starter_code(language: &str) -> &'static str {
    match language {
        "javascript" => "// JavaScript Example\nconsole.log(\"Hello World\");",
        "python" => "# Python Example\nprint(\"Hello World\")",
        "go" => "// Go Example\npackage main\nimport \"fmt\"\nfunc main() {\n\tfmt.Println(\"Hello World\")\n}",
        _ => "",
    }
}

/// Lookup and creation of sessions
#[async_trait]
pub trait SessionDirectory: Send + Sync {
    /// Create a session for `language`
    async fn create(&self, language: &str) -> Result<SessionRecord>;

    /// Fetch a session
    async fn get(&self, id: &str) -> Result<Option<SessionRecord>>;

    /// Whether a session exists
    async fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.get(id).await?.is_some())
    }
}

/// Non-durable directory kept in process memory
#[derive(Default)]
pub struct InMemorySessionDirectory {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl InMemorySessionDirectory {
    /// Create an empty directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session with a caller-chosen id
    pub async fn insert(&self, id: &str, language: &str) -> SessionRecord {
        let now = Utc::now();
        let record = SessionRecord {
            session_id: id.to_string(),
            language: language.to_string(),
            code: starter_code(language).to_string(),
            created_at: now,
            updated_at: now,
        };
        self.sessions
            .write()
            .await
            .insert(id.to_string(), record.clone());
        record
    }
}

#[async_trait]
impl SessionDirectory for InMemorySessionDirectory {
    async fn create(&self, language: &str) -> Result<SessionRecord> {
        let id = Uuid::new_v4().to_string();
        let record = self.insert(&id, language).await;
        debug!("Created session {} ({})", id, language);
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<Option<SessionRecord>> {
        Ok(self.sessions.read().await.get(id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_seeds_starter_code() {
        let directory = InMemorySessionDirectory::new();
        let session = directory.create("python").await.unwrap();

        assert_eq!(session.language, "python");
        assert!(session.code.contains("print(\"Hello World\")"));
        assert!(directory.exists(&session.session_id).await.unwrap());
        assert!(!directory.exists("missing").await.unwrap());
    }

    #[test]
    fn test_unknown_language_has_empty_starter() {
        assert_eq!(starter_code("cobol"), "");
        assert!(starter_code("go").contains("package main"));
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let now = Utc::now();
        let record = SessionRecord {
            session_id: "abc".to_string(),
            language: "go".to_string(),
            code: String::new(),
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["sessionId"], "abc");
        assert!(json.get("createdAt").is_some());
    }
}
