//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryMessageStore / InMemorySequenceStore**: 正本のメモリ版
//! - **InMemoryRateCounter**: 窓カウンタ
//! - **InMemoryTargetDirectory**: 請求対象・抑止リスト
//! - **RecordingTransport**: 送信内容の記録（失敗を台本で注入可能）
//! - **AcceptAll / BasicContentValidator**: 本文チェック
//!
//! 本番用の実装（DB, SMTP プロバイダなど）は別クレートに置く想定。

pub mod content;
pub mod inmem_directory;
pub mod inmem_messages;
pub mod inmem_rates;
pub mod inmem_sequences;
pub mod recording_transport;

pub use self::content::{AcceptAll, BasicContentValidator};
pub use self::inmem_directory::InMemoryTargetDirectory;
pub use self::inmem_messages::InMemoryMessageStore;
pub use self::inmem_rates::InMemoryRateCounter;
pub use self::inmem_sequences::InMemorySequenceStore;
pub use self::recording_transport::RecordingTransport;
