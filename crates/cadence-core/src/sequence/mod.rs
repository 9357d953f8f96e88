//! Sequence module: multi-step reminder executions, rendering, analytics.

pub mod analytics;
pub mod engine;
pub mod render;

pub use self::analytics::{SequenceAnalytics, StepFunnel};
pub use self::engine::{
    EnginePorts, PAYMENT_RECEIVED, SequenceEngine, SequenceSettings, StartOptions,
};
pub use self::render::{RenderedContent, render};
