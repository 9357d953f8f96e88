//! cadence-core
//!
//! Payment-reminder scheduling and sequence execution.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, message, constraint, sequence, execution, target, outcome, errors）
//! - **ports**: 抽象化レイヤー（MessageStore, SequenceStore, RateCounter, MailTransport, など）
//! - **impls**: 実装（InMemory* など開発・テスト用）
//! - **schedule**: 送信時刻の解決（Resolver）
//! - **queue**: レート制限付き配送キュー
//! - **sequence**: 多段リマインダーの実行エンジン
//! - **app**: 公開操作・ビルダー・定期実行
//! - **config**: 設定の読み込み（figment）

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
pub mod schedule;
pub mod sequence;

#[cfg(test)]
pub(crate) mod fixtures;

pub use crate::app::{CadenceBuilder, CadenceService};
pub use crate::config::CadenceConfig;
pub use crate::domain::{CadenceError, OperationResult};
