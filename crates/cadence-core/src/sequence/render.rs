//! Template rendering: `{{variable}}` substitution against a target.
//!
//! # 学習ポイント
//! - 未知のプレースホルダはそのまま残す（ContentValidator が検出する）
//! - 複数明細（consolidated）の場合は合計と明細リストを組み立てる

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::domain::target::format_amount;
use crate::domain::{StepTemplate, TargetEntity};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub subject: String,
    pub body: String,
}

pub fn render(template: &StepTemplate, target: &TargetEntity) -> RenderedContent {
    let vars = variables(target);
    RenderedContent {
        subject: substitute(&template.subject, &vars),
        body: substitute(&template.body, &vars),
    }
}

/// Variables available to templates. Target fields override nothing built-in.
pub fn variables(target: &TargetEntity) -> BTreeMap<String, String> {
    let mut vars: BTreeMap<String, String> = target
        .fields
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    let name = target
        .recipient
        .name
        .clone()
        .unwrap_or_else(|| target.recipient.address.clone());
    let references: Vec<&str> = target.items.iter().map(|i| i.reference.as_str()).collect();

    let builtins = [
        ("recipient_name", name.clone()),
        ("customer_name", name),
        ("target_id", target.id.to_string()),
        ("currency", target.currency.clone()),
        ("total_owed", format_amount(target.total_owed())),
        ("total_paid", format_amount(target.total_paid())),
        ("amount_due", format_amount(target.outstanding())),
        (
            "due_date",
            target
                .earliest_due_date()
                .map(|d| d.to_string())
                .unwrap_or_default(),
        ),
        ("item_count", target.items.len().to_string()),
        ("invoice_number", references.join(", ")),
    ];
    for (key, value) in builtins {
        vars.insert(key.to_string(), value);
    }
    // Single-item targets have no sub-list; `{{items}}` stays for the validator to flag.
    if target.is_consolidated() {
        vars.insert("items".to_string(), item_list(target));
    }
    vars
}

fn item_list(target: &TargetEntity) -> String {
    let mut out = String::new();
    for item in target.items.iter().filter(|i| i.outstanding() > 0) {
        if !out.is_empty() {
            out.push('\n');
        }
        let _ = write!(
            out,
            "- {}: {} {} (due {})",
            item.reference,
            format_amount(item.outstanding()),
            target.currency,
            item.due_date
        );
    }
    out
}

fn substitute(text: &str, vars: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            out.push_str(&rest[open..]);
            return out;
        };
        let key = after[..close].trim();
        match vars.get(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[open..open + 2 + close + 2]),
        }
        rest = &after[close + 2..];
    }
    out.push_str(rest);
    out
}
