//! InMemoryTargetDirectory - 請求対象・抑止リストのメモリ実装

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{StoreError, TargetEntity, TargetId, TargetStatus, TenantId};
use crate::ports::TargetDirectory;

#[derive(Default)]
pub struct InMemoryTargetDirectory {
    targets: RwLock<HashMap<TargetId, TargetEntity>>,
    suppressed: RwLock<HashSet<String>>,
    suspended: RwLock<HashSet<TenantId>>,
}

impl InMemoryTargetDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, target: TargetEntity) {
        self.targets.write().await.insert(target.id.clone(), target);
    }

    /// Apply a payment against the first item with an outstanding balance,
    /// spilling over to the next ones. Marks the target PAID when covered.
    pub async fn record_payment(&self, id: &TargetId, mut amount: i64) -> Option<TargetEntity> {
        let mut targets = self.targets.write().await;
        let target = targets.get_mut(id)?;
        for item in target.items.iter_mut() {
            if amount <= 0 {
                break;
            }
            let applied = item.outstanding().min(amount);
            item.amount_paid += applied;
            amount -= applied;
        }
        if amount > 0 {
            if let Some(last) = target.items.last_mut() {
                last.amount_paid += amount;
            }
        }
        target.status = if target.is_fully_paid() {
            TargetStatus::Paid
        } else if target.total_paid() > 0 {
            TargetStatus::PartiallyPaid
        } else {
            target.status
        };
        Some(target.clone())
    }

    pub async fn set_status(&self, id: &TargetId, status: TargetStatus) {
        if let Some(target) = self.targets.write().await.get_mut(id) {
            target.status = status;
        }
    }

    pub async fn suppress(&self, address: &str) {
        self.suppressed
            .write()
            .await
            .insert(address.trim().to_ascii_lowercase());
    }

    pub async fn suspend_tenant(&self, tenant_id: TenantId) {
        self.suspended.write().await.insert(tenant_id);
    }
}

#[async_trait]
impl TargetDirectory for InMemoryTargetDirectory {
    async fn target(&self, id: &TargetId) -> Result<Option<TargetEntity>, StoreError> {
        Ok(self.targets.read().await.get(id).cloned())
    }

    async fn is_suppressed(&self, address: &str) -> Result<bool, StoreError> {
        Ok(self
            .suppressed
            .read()
            .await
            .contains(&address.trim().to_ascii_lowercase()))
    }

    async fn is_tenant_suspended(&self, tenant_id: &TenantId) -> Result<bool, StoreError> {
        Ok(self.suspended.read().await.contains(tenant_id))
    }
}
