//! Target entity read model (invoice or consolidated bundle of invoices).
//!
//! Amounts are integer minor units (cents, fils, ...).

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::ids::{TargetId, TenantId};
use super::message::Recipient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetStatus {
    Open,
    PartiallyPaid,
    Paid,
    Cancelled,
    WrittenOff,
}

impl TargetStatus {
    /// No further reminders make sense once the target is in one of these.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TargetStatus::Paid | TargetStatus::Cancelled | TargetStatus::WrittenOff
        )
    }
}

impl fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetStatus::Open => "open",
            TargetStatus::PartiallyPaid => "partially paid",
            TargetStatus::Paid => "paid",
            TargetStatus::Cancelled => "cancelled",
            TargetStatus::WrittenOff => "written off",
        };
        f.write_str(s)
    }
}

/// One underlying obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub reference: String,
    pub amount_owed: i64,
    #[serde(default)]
    pub amount_paid: i64,
    pub due_date: NaiveDate,
}

impl LineItem {
    pub fn new(reference: impl Into<String>, amount_owed: i64, due_date: NaiveDate) -> Self {
        Self {
            reference: reference.into(),
            amount_owed,
            amount_paid: 0,
            due_date,
        }
    }

    pub fn outstanding(&self) -> i64 {
        (self.amount_owed - self.amount_paid).max(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetEntity {
    pub id: TargetId,
    pub tenant_id: TenantId,
    pub recipient: Recipient,
    pub status: TargetStatus,
    pub currency: String,
    pub items: Vec<LineItem>,
    /// Extra template variables (customer number, account manager, ...).
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

impl TargetEntity {
    pub fn total_owed(&self) -> i64 {
        self.items.iter().map(|i| i.amount_owed).sum()
    }

    pub fn total_paid(&self) -> i64 {
        self.items.iter().map(|i| i.amount_paid).sum()
    }

    pub fn outstanding(&self) -> i64 {
        (self.total_owed() - self.total_paid()).max(0)
    }

    /// Cumulative payments cover everything owed.
    pub fn is_fully_paid(&self) -> bool {
        self.total_owed() > 0 && self.total_paid() >= self.total_owed()
            || self.status == TargetStatus::Paid
    }

    /// One execution stands for several underlying items.
    pub fn is_consolidated(&self) -> bool {
        self.items.len() > 1
    }

    pub fn earliest_due_date(&self) -> Option<NaiveDate> {
        self.items.iter().map(|i| i.due_date).min()
    }
}

/// Format minor units as `1234.50`.
pub fn format_amount(minor_units: i64) -> String {
    let sign = if minor_units < 0 { "-" } else { "" };
    let abs = minor_units.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}
