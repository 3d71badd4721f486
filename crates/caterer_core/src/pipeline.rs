//! Parse-then-render pipeline on long-lived worker pools.
//!
//! Each stage is handed to a pool chosen per request:
//! - `PoolKind::Compute`: a dedicated rayon pool, isolated from the runtime
//! - `PoolKind::Blocking`: tokio's blocking thread pool
//!
//! The pools are created once per process and shared by every session.

use crate::color::ColorTable;
use crate::render::{render_gif, RenderError, RenderJob};
use crate::snapshot::{parse_file, DecodeError};
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::debug;

/// Which pool a stage runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PoolKind {
    #[default]
    Compute,
    Blocking,
}

impl PoolKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Compute => "compute pool",
            Self::Blocking => "blocking pool",
        }
    }
}

impl std::fmt::Display for PoolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PoolKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compute" | "ppe" => Ok(Self::Compute),
            "blocking" | "tpe" => Ok(Self::Blocking),
            other => Err(format!("unknown pool '{}'", other)),
        }
    }
}

/// Pool assignment for the two stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StagePools {
    pub parse: PoolKind,
    pub render: PoolKind,
}

impl StagePools {
    /// Read a `"compute,blocking"` style list. Missing or unknown entries
    /// keep their default.
    pub fn from_list(list: &str) -> Self {
        let mut kinds = list.split(',').map(|s| s.parse::<PoolKind>().ok());
        let defaults = Self::default();
        Self {
            parse: kinds.next().flatten().unwrap_or(defaults.parse),
            render: kinds.next().flatten().unwrap_or(defaults.render),
        }
    }
}

/// Errors from running the pipeline.
#[derive(Debug)]
pub enum PipelineError {
    Decode(DecodeError),
    Render(RenderError),
    /// The session canceled the run.
    Aborted,
    /// The compute pool could not be built.
    PoolBuild(String),
    /// A pool dropped the job without answering.
    PoolClosed,
    /// The stage panicked.
    Panicked(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decode(e) => write!(f, "Failed to read engine output: {}", e),
            Self::Render(e) => write!(f, "Failed to render: {}", e),
            Self::Aborted => write!(f, "Pipeline aborted"),
            Self::PoolBuild(s) => write!(f, "Failed to build worker pool: {}", s),
            Self::PoolClosed => write!(f, "Worker pool closed"),
            Self::Panicked(s) => write!(f, "Worker panicked: {}", s),
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Decode(e) => Some(e),
            Self::Render(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for PipelineError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

impl From<RenderError> for PipelineError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Aborted => Self::Aborted,
            other => Self::Render(other),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// The process-wide worker pools.
pub struct WorkerPools {
    compute: rayon::ThreadPool,
}

impl WorkerPools {
    /// Build the compute pool; `threads == 0` uses one thread per core.
    pub fn new(threads: usize) -> Result<Self, PipelineError> {
        let compute = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("caterer-compute-{}", i))
            .build()
            .map_err(|e| PipelineError::PoolBuild(e.to_string()))?;
        Ok(Self { compute })
    }

    /// Run `job` on the chosen pool and wait for it without blocking the
    /// runtime.
    pub async fn run<F, T>(&self, kind: PoolKind, job: F) -> Result<T, PipelineError>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        match kind {
            PoolKind::Compute => {
                let (tx, rx) = oneshot::channel();
                self.compute.spawn(move || {
                    let _ = tx.send(catch_unwind(AssertUnwindSafe(job)));
                });
                rx.await
                    .map_err(|_| PipelineError::PoolClosed)?
                    .map_err(|p| PipelineError::Panicked(panic_message(p)))
            }
            PoolKind::Blocking => tokio::task::spawn_blocking(job).await.map_err(|e| {
                if e.is_panic() {
                    PipelineError::Panicked(panic_message(e.into_panic()))
                } else {
                    PipelineError::PoolClosed
                }
            }),
        }
    }
}

/// Everything one pipeline run needs.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    /// Engine output to parse (deleted once parsed).
    pub snapshots: PathBuf,
    /// Where the GIF goes.
    pub gif: PathBuf,
    pub colors: Arc<ColorTable>,
    pub job: RenderJob,
    pub pools: StagePools,
    /// Set by the session to stop the run between frames.
    pub abort: Arc<AtomicBool>,
}

/// Stage timings and the render outcome.
#[derive(Debug, Clone, Copy)]
pub struct PipelineReport {
    pub parse_started: Instant,
    pub parse_finished: Instant,
    pub render_finished: Instant,
    pub frames: usize,
    pub truncated: bool,
    pub pools: StagePools,
}

impl PipelineReport {
    pub fn parse_secs(&self) -> f64 {
        (self.parse_finished - self.parse_started).as_secs_f64()
    }

    pub fn render_secs(&self) -> f64 {
        (self.render_finished - self.parse_finished).as_secs_f64()
    }

    pub fn total_secs(&self) -> f64 {
        (self.render_finished - self.parse_started).as_secs_f64()
    }
}

/// Runs the two stages of one request.
pub trait PipelineRunner: Send + Sync + 'static {
    fn run(
        &self,
        request: PipelineRequest,
    ) -> impl Future<Output = Result<PipelineReport, PipelineError>> + Send;
}

/// Parser then renderer on the shared pools.
#[derive(Clone)]
pub struct Pipeline {
    pools: Arc<WorkerPools>,
}

impl Pipeline {
    pub fn new(pools: Arc<WorkerPools>) -> Self {
        Self { pools }
    }
}

impl PipelineRunner for Pipeline {
    async fn run(&self, request: PipelineRequest) -> Result<PipelineReport, PipelineError> {
        let PipelineRequest {
            snapshots,
            gif,
            colors,
            job,
            pools,
            abort,
        } = request;

        let parse_started = Instant::now();
        let set = self
            .pools
            .run(pools.parse, move || parse_file(&snapshots))
            .await??;
        let parse_finished = Instant::now();
        debug!(
            "Parsed {} generations in {:.2}s",
            set.generations.len(),
            (parse_finished - parse_started).as_secs_f64()
        );

        if abort.load(Ordering::Relaxed) {
            return Err(PipelineError::Aborted);
        }

        let outcome = self
            .pools
            .run(pools.render, move || {
                render_gif(&set, &colors, &job, &gif, &abort)
            })
            .await??;

        Ok(PipelineReport {
            parse_started,
            parse_finished,
            render_finished: Instant::now(),
            frames: outcome.frames,
            truncated: outcome.truncated,
            pools,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ColorOptions, RuleFamily};

    const GLIDER: &str = "(0, 0)\n(3, 3)\nbo$2bo$3o!\n\
                          (0, 1)\n(3, 3)\nobo$b2o$bo!\n";

    fn request(dir: &std::path::Path, pools: StagePools, abort: bool) -> PipelineRequest {
        let snapshots = dir.join("1_out.rle");
        std::fs::write(&snapshots, GLIDER).unwrap();
        let colors =
            ColorTable::resolve(&RuleFamily::TwoState, &ColorOptions::default()).unwrap();
        PipelineRequest {
            snapshots,
            gif: dir.join("1.gif"),
            colors: Arc::new(colors),
            job: RenderJob::new(1, 1, false),
            pools,
            abort: Arc::new(AtomicBool::new(abort)),
        }
    }

    #[test]
    fn test_stage_pools_from_list() {
        assert_eq!(StagePools::from_list(""), StagePools::default());
        assert_eq!(
            StagePools::from_list("blocking"),
            StagePools {
                parse: PoolKind::Blocking,
                render: PoolKind::Compute
            }
        );
        assert_eq!(
            StagePools::from_list("compute, tpe"),
            StagePools {
                parse: PoolKind::Compute,
                render: PoolKind::Blocking
            }
        );
        assert_eq!(StagePools::from_list("bogus,bogus"), StagePools::default());
    }

    #[tokio::test]
    async fn test_pools_run_jobs() {
        let pools = WorkerPools::new(2).unwrap();
        assert_eq!(pools.run(PoolKind::Compute, || 2 + 2).await.unwrap(), 4);
        assert_eq!(pools.run(PoolKind::Blocking, || "done").await.unwrap(), "done");
    }

    #[tokio::test]
    async fn test_pool_panic_is_an_error() {
        let pools = WorkerPools::new(1).unwrap();
        let result: Result<(), _> = pools.run(PoolKind::Compute, || panic!("boom")).await;
        assert!(matches!(result, Err(PipelineError::Panicked(msg)) if msg == "boom"));
    }

    #[tokio::test]
    async fn test_pipeline_produces_gif() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(Arc::new(WorkerPools::new(1).unwrap()));
        let pools = StagePools::from_list("compute,blocking");

        let report = pipeline.run(request(dir.path(), pools, false)).await.unwrap();
        assert_eq!(report.frames, 2);
        assert!(!report.truncated);
        assert_eq!(report.pools, pools);
        assert!(report.parse_finished >= report.parse_started);
        assert!(report.render_finished >= report.parse_finished);
        assert!(dir.path().join("1.gif").exists());
        assert!(!dir.path().join("1_out.rle").exists());
    }

    #[tokio::test]
    async fn test_pipeline_aborted_between_stages() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(Arc::new(WorkerPools::new(1).unwrap()));
        let result = pipeline
            .run(request(dir.path(), StagePools::default(), true))
            .await;
        assert!(matches!(result, Err(PipelineError::Aborted)));
        assert!(!dir.path().join("1.gif").exists());
    }

    #[tokio::test]
    async fn test_pipeline_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = Pipeline::new(Arc::new(WorkerPools::new(1).unwrap()));
        let req = request(dir.path(), StagePools::default(), false);
        std::fs::write(&req.snapshots, "(0, 0)\n").unwrap();

        let result = pipeline.run(req).await;
        assert!(matches!(result, Err(PipelineError::Decode(_))));
    }
}
