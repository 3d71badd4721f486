//! Cellular-automaton simulations delivered as looping GIFs.
//!
//! This crate provides:
//! - Run-length pattern and snapshot decoding
//! - Rule classification and color resolution
//! - Pattern sources (inline, chat history, random soup)
//! - The external engine adapter and per-request artifacts
//! - A size-capped GIF renderer running on worker pools
//! - Interactive sessions (cancel, extend, accelerate, inactivity timeout)
//! - An HTTP front end

pub mod artifacts;
pub mod color;
pub mod config;
pub mod engine;
pub mod front;
pub mod pattern;
pub mod pipeline;
pub mod render;
pub mod rle;
pub mod rule;
pub mod session;
pub mod snapshot;

pub use artifacts::{Artifacts, RequestId, RequestIds};
pub use color::{ColorOptions, ColorTable, RuleFamily};
pub use config::{CatererConfig, ConfigError};
pub use engine::{Engine, EngineError, EngineJob, EngineRule, ProcessEngine};
pub use front::{HttpFrontEnd, HttpServer};
pub use pipeline::{Pipeline, PipelineError, PipelineRunner, PoolKind, StagePools, WorkerPools};
pub use render::{render_gif, RenderError, RenderJob, RenderOutcome};
pub use rule::{Algorithm, RuleKind};
pub use session::{
    ActivityLog, Dispatcher, FrontEnd, Session, SessionContext, SessionLimits, Signal, SignalKind,
    Status, Submission,
};
pub use snapshot::{parse_snapshots, SnapshotSet};
