//! App - アプリケーション層
//!
//! このモジュールは、ports・queue・sequence を組み合わせて公開操作を提供します。
//!
//! # 主要コンポーネント
//! - **CadenceBuilder**: ポートと設定のワイヤリング（起動時検証）
//! - **CadenceService**: 公開操作の表面（OperationResult を返す）
//! - **Sweeper / SweepGroup**: 定期実行ループ（continue_due → process_due）

pub mod builder;
pub mod service;
pub mod sweep;

pub use self::builder::{BuildError, CadenceBuilder};
pub use self::service::CadenceService;
pub use self::sweep::{SweepGroup, SweepReport, Sweeper};
