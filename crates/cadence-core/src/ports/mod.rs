//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部システム（ストレージ、メール送信、請求システム）への
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 状態はすべてストアに永続化（メモリ上の継続を持たない）
//! - 競合の判定（claim, version, rate reservation）はストア側で原子的に行う

pub mod clock;
pub mod content_validator;
pub mod id_generator;
pub mod message_store;
pub mod rate_counter;
pub mod sequence_store;
pub mod target_directory;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::content_validator::{ContentReport, ContentValidator};
pub use self::id_generator::{IdGenerator, SequentialIdGenerator, UlidGenerator};
pub use self::message_store::{MessageFilter, MessageStore};
pub use self::rate_counter::{RateCounter, RateLimits, RateScope, Reservation};
pub use self::sequence_store::SequenceStore;
pub use self::target_directory::TargetDirectory;
pub use self::transport::{DeliveryReceipt, MailTransport};
