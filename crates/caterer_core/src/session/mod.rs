//! Interactive simulation sessions.
//!
//! One task per session drives a request through
//!
//! ```text
//! WAITING -> SIMMING -> COMPLETED -> (extend | accelerate) -> SIMMING ...
//!               |            |
//!               |            +-> closed on cancel or inactivity
//!               +-> CANCELED / FAILED
//! ```
//!
//! The session talks to the outside world through three collaborators: an
//! [`Engine`](crate::engine::Engine), a [`PipelineRunner`](crate::pipeline::PipelineRunner)
//! and a [`FrontEnd`]. Interactive signals arrive on an `async_channel`.

mod activity;
mod annotation;
mod dispatch;
mod machine;
mod request;

pub use activity::{ActivityEntry, ActivityLog, Status};
pub use annotation::{announcement, Annotation, PatternSource, Timing, TimingVerbosity, TOO_LARGE_HINT};
pub use dispatch::{Dispatcher, SessionHandle};
pub use machine::{can_extend, extend_increment, Session, SessionContext, SessionError};
pub use request::{normalize_counts, SimRequest, Submission, ValidationError};

use crate::artifacts::RequestId;
use crate::config::CatererConfig;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Limits every session runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Largest generation/step ratio.
    pub frame_cap: u64,
    /// How long a completed session waits for the next choice.
    pub wait: Duration,
    /// History messages searched for a missing pattern or rule.
    pub lookback: usize,
    /// Third-party cancel markers must exceed this count.
    pub cancel_quorum: u32,
    pub size_cap: u64,
    /// Largest GIF the front end accepts.
    pub delivery_limit: u64,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self::from(&CatererConfig::default())
    }
}

impl From<&CatererConfig> for SessionLimits {
    fn from(config: &CatererConfig) -> Self {
        Self {
            frame_cap: config.frame_cap,
            wait: config.wait(),
            lookback: config.lookback,
            cancel_quorum: config.cancel_quorum,
            size_cap: config.size_cap,
            delivery_limit: config.delivery_limit,
        }
    }
}

/// Kinds of interactive signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    /// Withdrawal marker on the announcement.
    Cancel,
    /// Grow the generation target.
    Extend,
    /// Double the step.
    Accelerate,
}

/// An interactive signal aimed at one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    pub kind: SignalKind,
    /// Identity of whoever sent it.
    pub from: String,
    /// Cancel markers currently on the announcement, including this one.
    pub markers: u32,
}

impl Signal {
    pub fn new(kind: SignalKind, from: impl Into<String>) -> Self {
        Self {
            kind,
            from: from.into(),
            markers: 1,
        }
    }

    pub fn with_markers(mut self, markers: u32) -> Self {
        self.markers = markers;
        self
    }
}

/// Errors delivering a result to the requester.
#[derive(Debug)]
pub enum DeliveryError {
    /// The GIF is larger than the front end accepts.
    TooLarge { size: u64, limit: u64 },
    /// The front end refused for another reason.
    Rejected(String),
    Io(std::io::Error),
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TooLarge { .. } => write!(f, "HTTP 413: {}", TOO_LARGE_HINT),
            Self::Rejected(s) => write!(f, "Delivery failed: {}", s),
            Self::Io(e) => write!(f, "Delivery failed: {}", e),
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DeliveryError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// A rendered result on its way to the requester.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub gif: Vec<u8>,
    pub annotation: Annotation,
    /// Whether "extend" is on offer; "accelerate" always is.
    pub extendable: bool,
}

/// Where sessions post their output.
pub trait FrontEnd: Send + Sync + 'static {
    /// Post or refresh the run announcement, which carries the cancel marker.
    fn announce(
        &self,
        id: RequestId,
        text: &str,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Present a rendered result with its extend/accelerate choices.
    fn deliver(
        &self,
        id: RequestId,
        delivery: Delivery,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;

    /// Take the delivered result back once the requester picked a choice.
    fn retract(&self, id: RequestId) -> impl Future<Output = ()> + Send;

    /// Tell the requester something went wrong.
    fn notify(&self, id: RequestId, message: &str) -> impl Future<Output = ()> + Send;

    /// The session is over; release every affordance.
    fn close(&self, id: RequestId, status: Status) -> impl Future<Output = ()> + Send;
}
