//! TargetDirectory port - 請求対象・抑止リスト・テナント状態（外部）

use async_trait::async_trait;

use crate::domain::{StoreError, TargetEntity, TargetId, TenantId};

#[async_trait]
pub trait TargetDirectory: Send + Sync {
    async fn target(&self, id: &TargetId) -> Result<Option<TargetEntity>, StoreError>;

    /// Recipient opted out or bounced hard; never contact.
    async fn is_suppressed(&self, address: &str) -> Result<bool, StoreError>;

    async fn is_tenant_suspended(&self, tenant_id: &TenantId) -> Result<bool, StoreError>;
}
