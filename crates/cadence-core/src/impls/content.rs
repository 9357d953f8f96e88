//! ContentValidator 実装
//!
//! - **AcceptAll**: 何もチェックしない
//! - **BasicContentValidator**: 空文字・未解決プレースホルダ・長すぎる件名

use async_trait::async_trait;

use crate::ports::{ContentReport, ContentValidator};

#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

#[async_trait]
impl ContentValidator for AcceptAll {
    async fn validate(&self, _subject: &str, _body: &str) -> ContentReport {
        ContentReport::valid()
    }
}

#[derive(Debug, Clone)]
pub struct BasicContentValidator {
    pub max_subject_chars: usize,
}

impl Default for BasicContentValidator {
    fn default() -> Self {
        Self {
            max_subject_chars: 150,
        }
    }
}

#[async_trait]
impl ContentValidator for BasicContentValidator {
    async fn validate(&self, subject: &str, body: &str) -> ContentReport {
        let mut issues = Vec::new();
        if subject.trim().is_empty() {
            issues.push("subject is empty".to_string());
        }
        if body.trim().is_empty() {
            issues.push("body is empty".to_string());
        }
        let subject_len = subject.chars().count();
        if subject_len > self.max_subject_chars {
            issues.push(format!(
                "subject has {subject_len} characters, limit is {}",
                self.max_subject_chars
            ));
        }
        for (field, text) in [("subject", subject), ("body", body)] {
            if text.contains("{{") {
                issues.push(format!("{field} has unresolved placeholders"));
            }
        }
        ContentReport::from_issues(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn basic_validator_flags_leftover_placeholders() {
        let report = BasicContentValidator::default()
            .validate("Invoice {{invoice_number}}", "Please pay")
            .await;
        assert!(!report.valid);
        assert_eq!(report.issues, vec!["subject has unresolved placeholders"]);
    }

    #[tokio::test]
    async fn basic_validator_accepts_clean_text() {
        let report = BasicContentValidator::default()
            .validate("Invoice INV-1", "Please pay 100.00 SAR")
            .await;
        assert!(report.valid);
    }
}
