//! The per-session state machine.

use super::activity::{ActivityEntry, ActivityLog, Status};
use super::annotation::{announcement, Annotation, Timing};
use super::request::SimRequest;
use super::{Delivery, DeliveryError, FrontEnd, SessionLimits, Signal, SignalKind};
use crate::artifacts::{Artifacts, RequestId};
use crate::engine::{Engine, EngineError, EngineJob, EngineRule};
use crate::pipeline::{PipelineError, PipelineReport, PipelineRequest, PipelineRunner};
use crate::render::RenderJob;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, info, warn};

/// Largest `extend` growth for a target `t` is `⌊EXTEND_SCALE · ln(1 + t)⌋`.
const EXTEND_SCALE: f64 = 50.0;

/// How much `extend` grows a target by.
///
/// Grows sublinearly with the target and never past `frame_cap × step`.
/// Below the cap the increment is at least one generation.
pub fn extend_increment(target: u64, step: u64, frame_cap: u64) -> u64 {
    let cap = frame_cap.saturating_mul(step);
    let remaining = cap.saturating_sub(target);
    let growth = ((EXTEND_SCALE * (target as f64).ln_1p()).floor() as u64).max(1);
    remaining.min(growth)
}

/// Whether `extend` is offered.
pub fn can_extend(target: u64, step: u64, frame_cap: u64, truncated: bool) -> bool {
    target < frame_cap.saturating_mul(step) && !truncated
}

/// Why a session failed.
#[derive(Debug)]
pub enum SessionError {
    Io(std::io::Error),
    Engine(EngineError),
    Pipeline(PipelineError),
    Delivery(DeliveryError),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Engine(e) => write!(f, "{}", e),
            Self::Pipeline(e) => write!(f, "{}", e),
            Self::Delivery(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Engine(e) => Some(e),
            Self::Pipeline(e) => Some(e),
            Self::Delivery(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<EngineError> for SessionError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<PipelineError> for SessionError {
    fn from(e: PipelineError) -> Self {
        Self::Pipeline(e)
    }
}

impl From<DeliveryError> for SessionError {
    fn from(e: DeliveryError) -> Self {
        Self::Delivery(e)
    }
}

/// Collaborators and settings shared by every session.
pub struct SessionContext<E, P, F> {
    pub engine: Arc<E>,
    pub pipeline: Arc<P>,
    pub front: Arc<F>,
    pub activity: Arc<ActivityLog>,
    pub limits: SessionLimits,
    pub artifact_dir: PathBuf,
}

/// Outcome of racing the pipeline against cancellation.
enum Race {
    Finished(Result<PipelineReport, PipelineError>),
    Canceled,
}

/// What the requester chose after a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Choice {
    Extend,
    Accelerate,
    Close,
}

/// One simulation request from submission to close.
pub struct Session<E, P, F> {
    id: RequestId,
    request: SimRequest,
    submitted: DateTime<Utc>,
    status: Status,
    truncated: bool,
    artifacts: Artifacts,
    ctx: Arc<SessionContext<E, P, F>>,
    signals: async_channel::Receiver<Signal>,
}

impl<E, P, F> Session<E, P, F>
where
    E: Engine,
    P: PipelineRunner,
    F: FrontEnd,
{
    pub fn new(
        id: RequestId,
        request: SimRequest,
        ctx: Arc<SessionContext<E, P, F>>,
        signals: async_channel::Receiver<Signal>,
    ) -> Self {
        Self {
            id,
            artifacts: Artifacts::new(ctx.artifact_dir.clone(), id),
            request,
            submitted: Utc::now(),
            status: Status::Waiting,
            truncated: false,
            ctx,
            signals,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Drive the session to its end and clean up. Returns the final status.
    pub async fn run(mut self) -> Status {
        self.set_status(Status::Waiting);

        let status = match self.drive().await {
            Ok(status) => status,
            Err(e) => {
                error!(request = %self.id, "Session failed: {}", e);
                self.ctx.front.notify(self.id, &e.to_string()).await;
                Status::Failed
            }
        };

        self.set_status(status);
        self.ctx.front.close(self.id, status).await;
        self.artifacts.remove_all();
        status
    }

    async fn drive(&mut self) -> Result<Status, SessionError> {
        self.write_inputs()?;
        self.ctx.front.announce(self.id, &self.announcement()).await?;

        loop {
            self.invoke_engine().await?;
            self.set_status(Status::Simming);

            let report = match self.race_pipeline().await {
                Race::Finished(result) => result?,
                Race::Canceled => return Ok(Status::Canceled),
            };
            self.truncated = report.truncated;
            if report.truncated {
                info!(request = %self.id, "Result truncated after {} frames", report.frames);
            }

            self.deliver(&report).await?;
            self.set_status(Status::Completed);

            match self.await_choice().await {
                Some(Choice::Extend) => {
                    let inc = extend_increment(
                        self.request.generations,
                        self.request.step,
                        self.ctx.limits.frame_cap,
                    );
                    self.request.generations += inc;
                    info!(request = %self.id, "Extending to {} generations", self.request.generations);
                }
                Some(Choice::Accelerate) => {
                    self.request.step = self.request.step.saturating_mul(2);
                    self.truncated = false;
                    info!(request = %self.id, "Accelerating to step {}", self.request.step);
                }
                Some(Choice::Close) => {
                    self.ctx.front.retract(self.id).await;
                    return Ok(Status::Completed);
                }
                None => return Ok(Status::Completed),
            }

            self.ctx.front.retract(self.id).await;
            self.ctx.front.announce(self.id, &self.announcement()).await?;
        }
    }

    fn announcement(&self) -> String {
        announcement(
            &self.request.source,
            &self.request.rule,
            self.request.step,
            self.request.generations,
            self.request.algorithm,
        )
    }

    fn write_inputs(&mut self) -> Result<(), SessionError> {
        let header_rule = match self.request.rule_file.clone() {
            Some(file) => {
                self.artifacts.write_rule(&self.request.rule, &file)?;
                Artifacts::rule_stem(&self.request.rule, self.id)
            }
            None => self.request.rule.clone(),
        };
        self.artifacts.write_input(&header_rule, &self.request.body)?;
        Ok(())
    }

    async fn invoke_engine(&self) -> Result<(), EngineError> {
        let rule = if self.request.rule_file.is_some() {
            EngineRule::SearchDir(self.artifacts.dir().to_path_buf())
        } else {
            EngineRule::Rulestring(self.request.rule.clone())
        };
        let job = EngineJob {
            algorithm: self.request.algorithm,
            rule,
            generations: self.request.generations,
            step: self.request.step,
            input: self.artifacts.input_path(),
            output: self.artifacts.output_path(),
        };
        debug!(request = %self.id, "Invoking engine for {} generations", job.generations);

        let engine = self.ctx.engine.clone();
        tokio::task::spawn_blocking(move || engine.run(&job))
            .await
            .map_err(|e| EngineError::Join(e.to_string()))?
    }

    /// Run the pipeline unless a cancellation arrives first.
    ///
    /// Completion wins ties. A canceled run is told to stop and awaited so
    /// nothing writes the GIF after it is removed.
    async fn race_pipeline(&self) -> Race {
        let abort = Arc::new(AtomicBool::new(false));
        let request = PipelineRequest {
            snapshots: self.artifacts.output_path(),
            gif: self.artifacts.gif_path(),
            colors: self.request.colors.clone(),
            job: RenderJob::new(self.request.generations, self.request.step, self.request.track)
                .with_size_cap(self.ctx.limits.size_cap),
            pools: self.request.pools,
            abort: abort.clone(),
        };

        let run = self.ctx.pipeline.run(request);
        tokio::pin!(run);

        let race = tokio::select! {
            biased;
            result = &mut run => Race::Finished(result),
            _ = self.cancellation() => Race::Canceled,
        };

        if let Race::Canceled = race {
            info!(request = %self.id, "Canceled while simulating");
            abort.store(true, Ordering::Relaxed);
            if let Err(e) = run.await {
                debug!(request = %self.id, "Canceled pipeline ended with: {}", e);
            }
            self.artifacts.remove_gif();
        }
        race
    }

    /// Resolves when a cancel marker counts: from the requester, or from
    /// anyone once the markers exceed the quorum.
    async fn cancellation(&self) {
        while let Ok(signal) = self.signals.recv().await {
            if signal.kind != SignalKind::Cancel {
                debug!(request = %self.id, "Ignoring {:?} while simulating", signal.kind);
                continue;
            }
            if signal.from == self.request.requester
                || signal.markers > self.ctx.limits.cancel_quorum
            {
                return;
            }
        }
        // no more signals can arrive
        std::future::pending::<()>().await
    }

    async fn deliver(&self, report: &PipelineReport) -> Result<(), SessionError> {
        let path = self.artifacts.gif_path();
        let size = std::fs::metadata(&path)?.len();
        if size > self.ctx.limits.delivery_limit {
            return Err(DeliveryError::TooLarge {
                size,
                limit: self.ctx.limits.delivery_limit,
            }
            .into());
        }

        let gif = tokio::task::spawn_blocking(move || std::fs::read(path))
            .await
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))??;

        let delivery = Delivery {
            gif,
            annotation: Annotation {
                mention: self.request.mention.then(|| self.request.requester.clone()),
                tag: self.request.tag.clone(),
                timing: Timing::from_report(report, self.request.time),
                truncated: report.truncated,
            },
            extendable: self.extendable(),
        };
        self.ctx.front.deliver(self.id, delivery).await?;
        self.artifacts.remove_gif();
        Ok(())
    }

    fn extendable(&self) -> bool {
        can_extend(
            self.request.generations,
            self.request.step,
            self.ctx.limits.frame_cap,
            self.truncated,
        )
    }

    /// Wait for the requester's next choice, or `None` on inactivity.
    async fn await_choice(&self) -> Option<Choice> {
        let deadline = Instant::now() + self.ctx.limits.wait;
        let extendable = self.extendable();

        let choice = async {
            while let Ok(signal) = self.signals.recv().await {
                if signal.from != self.request.requester {
                    continue;
                }
                match signal.kind {
                    SignalKind::Cancel => return Some(Choice::Close),
                    SignalKind::Accelerate => return Some(Choice::Accelerate),
                    SignalKind::Extend if extendable => return Some(Choice::Extend),
                    SignalKind::Extend => {
                        debug!(request = %self.id, "Extend not on offer; ignoring");
                    }
                }
            }
            None
        };

        match timeout_at(deadline, choice).await {
            Ok(choice) => choice,
            Err(_) => {
                info!(request = %self.id, "No choice within {:?}; closing", self.ctx.limits.wait);
                None
            }
        }
    }

    fn set_status(&mut self, status: Status) {
        if self.status != status {
            debug!(request = %self.id, "{} -> {}", self.status, status);
        }
        self.status = status;
        self.ctx.activity.record(self.summary());
        if status == Status::Failed {
            warn!(request = %self.id, "Marked FAILED");
        }
    }

    fn summary(&self) -> ActivityEntry {
        ActivityEntry {
            id: self.id,
            requester: self.request.requester.clone(),
            rule: self.request.rule.clone(),
            submitted: self.submitted,
            generations: self.request.generations,
            step: self.request.step,
            status: self.status,
            colors: self.request.colors.as_ref().clone(),
            track: self.request.track,
        }
    }
}
