//! CadenceBuilder - ポートと設定のワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）: 設定不正・ポート不足は build() で止める
//! - `in_memory()` は開発用の既定アダプタをすべて埋める

use std::sync::Arc;

use crate::app::service::CadenceService;
use crate::config::CadenceConfig;
use crate::impls::{
    AcceptAll, InMemoryMessageStore, InMemoryRateCounter, InMemorySequenceStore,
    InMemoryTargetDirectory, RecordingTransport,
};
use crate::ports::{
    Clock, ContentValidator, IdGenerator, MailTransport, MessageStore, RateCounter,
    SequenceStore, SystemClock, TargetDirectory, UlidGenerator,
};
use crate::queue::{DispatchPorts, DispatchQueue};
use crate::schedule::Resolver;
use crate::sequence::{EnginePorts, SequenceEngine};

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing ports: {0:?}. These ports must be provided before build().")]
    MissingPorts(Vec<&'static str>),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// CadenceBuilder は CadenceService を構築
///
/// # 使用例
/// ```ignore
/// let service = CadenceBuilder::new(config)
///     .with_message_store(store)
///     .with_transport(smtp)
///     // ...
///     .build()?;
/// ```
pub struct CadenceBuilder {
    config: CadenceConfig,
    messages: Option<Arc<dyn MessageStore>>,
    sequences: Option<Arc<dyn SequenceStore>>,
    rates: Option<Arc<dyn RateCounter>>,
    transport: Option<Arc<dyn MailTransport>>,
    directory: Option<Arc<dyn TargetDirectory>>,
    validator: Option<Arc<dyn ContentValidator>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl CadenceBuilder {
    pub fn new(config: CadenceConfig) -> Self {
        Self {
            config,
            messages: None,
            sequences: None,
            rates: None,
            transport: None,
            directory: None,
            validator: None,
            clock: None,
            ids: None,
        }
    }

    /// Every port filled with its in-memory adapter, wall clock and ULIDs.
    /// Individual ports can still be replaced afterwards.
    pub fn in_memory(config: CadenceConfig) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self::new(config)
            .with_message_store(Arc::new(InMemoryMessageStore::new()))
            .with_sequence_store(Arc::new(InMemorySequenceStore::new()))
            .with_rate_counter(Arc::new(InMemoryRateCounter::new()))
            .with_transport(Arc::new(RecordingTransport::new()))
            .with_directory(Arc::new(InMemoryTargetDirectory::new()))
            .with_validator(Arc::new(AcceptAll))
            .with_id_generator(Arc::new(UlidGenerator::new(clock.clone())))
            .with_clock(clock)
    }

    pub fn with_message_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.messages = Some(store);
        self
    }

    pub fn with_sequence_store(mut self, store: Arc<dyn SequenceStore>) -> Self {
        self.sequences = Some(store);
        self
    }

    pub fn with_rate_counter(mut self, rates: Arc<dyn RateCounter>) -> Self {
        self.rates = Some(rates);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn MailTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_directory(mut self, directory: Arc<dyn TargetDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn ContentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// # 検証
    /// - 設定の validate()
    /// - すべてのポートが揃っているか（不足は一覧で返す）
    pub fn build(self) -> Result<CadenceService, BuildError> {
        self.config
            .validate()
            .map_err(|e| BuildError::InvalidConfig(e.to_string()))?;

        let missing: Vec<&'static str> = [
            ("message_store", self.messages.is_none()),
            ("sequence_store", self.sequences.is_none()),
            ("rate_counter", self.rates.is_none()),
            ("transport", self.transport.is_none()),
            ("directory", self.directory.is_none()),
            ("validator", self.validator.is_none()),
            ("clock", self.clock.is_none()),
            ("id_generator", self.ids.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, absent)| absent.then_some(name))
        .collect();

        let (
            Some(messages),
            Some(sequences),
            Some(rates),
            Some(transport),
            Some(directory),
            Some(validator),
            Some(clock),
            Some(ids),
        ) = (
            self.messages,
            self.sequences,
            self.rates,
            self.transport,
            self.directory,
            self.validator,
            self.clock,
            self.ids,
        )
        else {
            return Err(BuildError::MissingPorts(missing));
        };

        let resolver = Resolver::new(self.config.resolver);
        let queue = Arc::new(DispatchQueue::new(
            DispatchPorts {
                store: messages,
                rates: rates.clone(),
                transport,
                directory: directory.clone(),
                clock: clock.clone(),
                ids: ids.clone(),
            },
            resolver,
            self.config.dispatch_settings(),
        ));
        let engine = Arc::new(SequenceEngine::new(
            EnginePorts {
                sequences: sequences.clone(),
                directory,
                rates,
                validator,
                clock: clock.clone(),
                ids,
            },
            queue.clone(),
            resolver,
            self.config.sequence_settings(),
        ));
        Ok(CadenceService::new(queue, engine, sequences, clock))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_builds() {
        assert!(CadenceBuilder::in_memory(CadenceConfig::default()).build().is_ok());
    }

    #[test]
    fn missing_ports_are_listed() {
        let result = CadenceBuilder::new(CadenceConfig::default())
            .with_message_store(Arc::new(InMemoryMessageStore::new()))
            .build();
        let Err(BuildError::MissingPorts(missing)) = result else {
            panic!("expected missing ports");
        };
        assert_eq!(missing.len(), 7);
        assert!(missing.contains(&"transport"));
        assert!(!missing.contains(&"message_store"));
    }

    #[test]
    fn invalid_config_fails_fast() {
        let mut config = CadenceConfig::default();
        config.dispatch.burst_limit = 0;
        assert!(matches!(
            CadenceBuilder::in_memory(config).build(),
            Err(BuildError::InvalidConfig(_))
        ));
    }
}
