//! Sequence definitions: ordered reminder steps with per-language templates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::constraint::{ConstraintConfig, Tone};
use super::errors::CadenceError;
use super::ids::{SequenceId, TenantId};
use super::message::Priority;

/// Predicate checked before a step runs; a hit stops the execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopCondition {
    /// Cumulative payments cover the total owed.
    PaymentReceived,
    /// Target moved to a terminal status (paid, cancelled, written off).
    TargetResolved,
}

fn default_stop_conditions() -> Vec<StopCondition> {
    vec![StopCondition::PaymentReceived, StopCondition::TargetResolved]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTemplate {
    pub subject: String,
    pub body: String,
}

impl StepTemplate {
    pub fn new(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceStep {
    /// Days after the previous step (after start for the first step).
    pub delay_days: u32,
    /// Keyed by language variant ("en", "ar", ...).
    pub templates: BTreeMap<String, StepTemplate>,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default = "default_stop_conditions")]
    pub stop_conditions: Vec<StopCondition>,
}

impl SequenceStep {
    pub fn new(delay_days: u32) -> Self {
        Self {
            delay_days,
            templates: BTreeMap::new(),
            tone: Tone::default(),
            stop_conditions: default_stop_conditions(),
        }
    }

    pub fn with_template(mut self, language: impl Into<String>, template: StepTemplate) -> Self {
        self.templates.insert(language.into(), template);
        self
    }

    pub fn with_tone(mut self, tone: Tone) -> Self {
        self.tone = tone;
        self
    }

    pub fn with_stop_conditions(mut self, conditions: Vec<StopCondition>) -> Self {
        self.stop_conditions = conditions;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceDefinition {
    pub id: SequenceId,
    pub tenant_id: TenantId,
    pub name: String,
    pub active: bool,
    pub steps: Vec<SequenceStep>,
    /// One message per language variant is dispatched for every step.
    pub languages: Vec<String>,
    pub constraints: ConstraintConfig,
    #[serde(default)]
    pub priority: Priority,
}

impl SequenceDefinition {
    pub fn total_steps(&self) -> u32 {
        self.steps.len() as u32
    }

    /// 1-based step lookup.
    pub fn step(&self, number: u32) -> Option<&SequenceStep> {
        let index = number.checked_sub(1)? as usize;
        self.steps.get(index)
    }

    pub fn validate(&self) -> Result<(), CadenceError> {
        if self.steps.is_empty() {
            return Err(CadenceError::Validation(format!(
                "sequence {} has no steps",
                self.id
            )));
        }
        if self.languages.is_empty() {
            return Err(CadenceError::Validation(format!(
                "sequence {} has no language variants",
                self.id
            )));
        }
        for (index, step) in self.steps.iter().enumerate() {
            for language in &self.languages {
                if !step.templates.contains_key(language) {
                    return Err(CadenceError::Validation(format!(
                        "sequence {} step {} has no `{language}` template",
                        self.id,
                        index + 1
                    )));
                }
            }
        }
        self.constraints.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn definition(steps: Vec<SequenceStep>) -> SequenceDefinition {
        SequenceDefinition {
            id: SequenceId::from_ulid(Ulid::nil()),
            tenant_id: TenantId::new("acme"),
            name: "overdue".into(),
            active: true,
            steps,
            languages: vec!["en".into()],
            constraints: ConstraintConfig::default(),
            priority: Priority::Normal,
        }
    }

    fn step(delay: u32) -> SequenceStep {
        SequenceStep::new(delay).with_template("en", StepTemplate::new("s", "b"))
    }

    #[test]
    fn steps_are_one_based() {
        let def = definition(vec![step(7), step(7), step(5)]);
        assert_eq!(def.total_steps(), 3);
        assert!(def.step(0).is_none());
        assert_eq!(def.step(3).map(|s| s.delay_days), Some(5));
        assert!(def.step(4).is_none());
        def.validate().unwrap();
    }

    #[test]
    fn missing_language_template_is_rejected() {
        let mut def = definition(vec![step(1)]);
        def.languages.push("ar".into());
        assert!(matches!(def.validate(), Err(CadenceError::Validation(_))));
    }

    #[test]
    fn stop_conditions_default_to_payment_and_resolution() {
        let json = r#"{"delay_days": 3, "templates": {"en": {"subject": "s", "body": "b"}}}"#;
        let step: SequenceStep = serde_json::from_str(json).unwrap();
        assert_eq!(
            step.stop_conditions,
            vec![StopCondition::PaymentReceived, StopCondition::TargetResolved]
        );
    }
}
