//! ContentValidator port - 本文のチェック（外部）

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentReport {
    pub valid: bool,
    pub issues: Vec<String>,
}

impl ContentReport {
    pub fn valid() -> Self {
        Self {
            valid: true,
            issues: Vec::new(),
        }
    }

    pub fn from_issues(issues: Vec<String>) -> Self {
        Self {
            valid: issues.is_empty(),
            issues,
        }
    }
}

#[async_trait]
pub trait ContentValidator: Send + Sync {
    async fn validate(&self, subject: &str, body: &str) -> ContentReport;
}
