//! Session lifecycle against a fake engine and a recording front end.

use caterer_core::artifacts::{RequestId, RequestIds};
use caterer_core::engine::{Engine, EngineError, EngineJob};
use caterer_core::pipeline::{
    Pipeline, PipelineError, PipelineReport, PipelineRequest, PipelineRunner, WorkerPools,
};
use caterer_core::session::{
    ActivityLog, Delivery, DeliveryError, Dispatcher, FrontEnd, SessionContext, SessionLimits,
    Signal, SignalKind, Status, Submission,
};
use caterer_rules::InMemoryRuleStore;
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

const GLIDER_PHASES: [&str; 2] = [
    "(0, 0)\n(3, 3)\nbo$2bo$3o!\n",
    "(0, 1)\n(3, 3)\nobo$b2o$bo!\n",
];

/// Writes a few glider snapshots instead of simulating.
#[derive(Default)]
struct FakeEngine {
    fail: Option<String>,
    jobs: Mutex<Vec<(u64, u64)>>,
}

impl Engine for FakeEngine {
    fn run(&self, job: &EngineJob) -> Result<(), EngineError> {
        self.jobs.lock().unwrap().push((job.generations, job.step));
        if let Some(message) = &self.fail {
            return Err(EngineError::Diagnostic(message.clone()));
        }
        let frames = (job.generations / job.step + 1).min(4) as usize;
        let text: String = (0..frames).map(|i| GLIDER_PHASES[i % 2]).collect();
        std::fs::write(&job.output, text).map_err(EngineError::Spawn)
    }
}

/// The real pipeline, held back until the test opens the gate.
struct GatedPipeline {
    inner: Pipeline,
    gate: Arc<Semaphore>,
}

impl GatedPipeline {
    fn new(open: bool) -> Self {
        let pools = Arc::new(WorkerPools::new(2).unwrap());
        let permits = if open { Semaphore::MAX_PERMITS } else { 0 };
        Self {
            inner: Pipeline::new(pools),
            gate: Arc::new(Semaphore::new(permits)),
        }
    }
}

impl PipelineRunner for GatedPipeline {
    async fn run(&self, request: PipelineRequest) -> Result<PipelineReport, PipelineError> {
        loop {
            if request.abort.load(Ordering::Relaxed) {
                return Err(PipelineError::Aborted);
            }
            tokio::select! {
                permit = self.gate.acquire() => {
                    permit.map_err(|_| PipelineError::PoolClosed)?.forget();
                    break;
                }
                _ = tokio::time::sleep(Duration::from_millis(5)) => {}
            }
        }
        self.inner.run(request).await
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Announce(String),
    Deliver { extendable: bool, gif: Vec<u8> },
    Retract,
    Notify(String),
    Close(Status),
}

#[derive(Default)]
struct RecordingFront {
    limit: Option<u64>,
    events: Mutex<Vec<Event>>,
}

impl RecordingFront {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn deliveries(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Deliver { .. }))
            .count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl FrontEnd for RecordingFront {
    async fn announce(&self, _id: RequestId, text: &str) -> Result<(), DeliveryError> {
        self.push(Event::Announce(text.to_string()));
        Ok(())
    }

    async fn deliver(&self, _id: RequestId, delivery: Delivery) -> Result<(), DeliveryError> {
        let size = delivery.gif.len() as u64;
        if let Some(limit) = self.limit.filter(|limit| size > *limit) {
            return Err(DeliveryError::TooLarge { size, limit });
        }
        self.push(Event::Deliver {
            extendable: delivery.extendable,
            gif: delivery.gif,
        });
        Ok(())
    }

    async fn retract(&self, _id: RequestId) {
        self.push(Event::Retract);
    }

    async fn notify(&self, _id: RequestId, message: &str) {
        self.push(Event::Notify(message.to_string()));
    }

    async fn close(&self, _id: RequestId, status: Status) {
        self.push(Event::Close(status));
    }
}

type TestDispatcher = Dispatcher<FakeEngine, GatedPipeline, RecordingFront>;

fn dispatcher(
    dir: &Path,
    engine: Arc<FakeEngine>,
    pipeline: GatedPipeline,
    front: RecordingFront,
    wait: Duration,
) -> TestDispatcher {
    let ctx = SessionContext {
        engine,
        pipeline: Arc::new(pipeline),
        front: Arc::new(front),
        activity: Arc::new(ActivityLog::new(5)),
        limits: SessionLimits {
            wait,
            ..SessionLimits::default()
        },
        artifact_dir: dir.to_path_buf(),
    };
    Dispatcher::with_ids(ctx, Arc::new(InMemoryRuleStore::new()), RequestIds::starting_at(1))
}

fn glider_submission(requester: &str, generation: u64) -> Submission {
    Submission {
        requester: requester.to_string(),
        pattern: Some("bo$2bo$3o!".to_string()),
        generation: Some(generation),
        ..Submission::default()
    }
}

fn status_of(dispatcher: &TestDispatcher, id: RequestId) -> Option<Status> {
    dispatcher
        .activity()
        .into_iter()
        .find(|e| e.id == id)
        .map(|e| e.status)
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn is_empty_dir(dir: &Path) -> bool {
    std::fs::read_dir(dir).unwrap().next().is_none()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_while_simulating() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(
        dir.path(),
        Arc::new(FakeEngine::default()),
        GatedPipeline::new(false),
        RecordingFront::default(),
        Duration::from_secs(5),
    );

    let handle = d.submit(&glider_submission("alice", 10)).unwrap();
    let id = handle.id;
    wait_until(|| status_of(&d, id) == Some(Status::Simming)).await;

    assert!(d.signal(id, Signal::new(SignalKind::Cancel, "alice")));
    assert_eq!(handle.wait().await, Status::Canceled);

    let events = d.front().events();
    assert!(matches!(events[0], Event::Announce(_)));
    assert_eq!(d.front().deliveries(), 0);
    assert_eq!(events.last(), Some(&Event::Close(Status::Canceled)));
    assert_eq!(status_of(&d, id), Some(Status::Canceled));
    assert!(!d.is_live(id));
    assert!(is_empty_dir(dir.path()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_third_party_cancel_needs_quorum() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(
        dir.path(),
        Arc::new(FakeEngine::default()),
        GatedPipeline::new(false),
        RecordingFront::default(),
        Duration::from_secs(5),
    );

    let handle = d.submit(&glider_submission("alice", 10)).unwrap();
    let id = handle.id;
    wait_until(|| status_of(&d, id) == Some(Status::Simming)).await;

    d.signal(id, Signal::new(SignalKind::Cancel, "eve").with_markers(3));
    d.signal(id, Signal::new(SignalKind::Extend, "alice"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(status_of(&d, id), Some(Status::Simming));
    assert!(d.is_live(id));

    d.signal(id, Signal::new(SignalKind::Cancel, "mallory").with_markers(4));
    assert_eq!(handle.wait().await, Status::Canceled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_cancel_closes_completed_session() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(
        dir.path(),
        Arc::new(FakeEngine::default()),
        GatedPipeline::new(true),
        RecordingFront::default(),
        Duration::from_secs(5),
    );

    let handle = d.submit(&glider_submission("alice", 10)).unwrap();
    let id = handle.id;
    wait_until(|| status_of(&d, id) == Some(Status::Completed)).await;
    assert_eq!(d.front().deliveries(), 1);

    // not the requester
    d.signal(id, Signal::new(SignalKind::Cancel, "eve").with_markers(9));
    d.signal(id, Signal::new(SignalKind::Cancel, "alice"));
    assert_eq!(handle.wait().await, Status::Completed);

    let events = d.front().events();
    let n = events.len();
    assert_eq!(events[n - 2], Event::Retract);
    assert_eq!(events[n - 1], Event::Close(Status::Completed));
    assert!(is_empty_dir(dir.path()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_inactivity_keeps_delivered_result() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(
        dir.path(),
        Arc::new(FakeEngine::default()),
        GatedPipeline::new(true),
        RecordingFront::default(),
        Duration::from_millis(100),
    );

    let handle = d.submit(&glider_submission("alice", 10)).unwrap();
    assert_eq!(handle.wait().await, Status::Completed);

    let events = d.front().events();
    assert!(!events.contains(&Event::Retract));
    assert_eq!(events.last(), Some(&Event::Close(Status::Completed)));
    assert!(is_empty_dir(dir.path()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_extend_then_accelerate() {
    let dir = tempfile::tempdir().unwrap();
    let engine = Arc::new(FakeEngine::default());
    let d = dispatcher(
        dir.path(),
        engine.clone(),
        GatedPipeline::new(true),
        RecordingFront::default(),
        Duration::from_secs(5),
    );

    let handle = d.submit(&glider_submission("alice", 10)).unwrap();
    let id = handle.id;

    wait_until(|| d.front().deliveries() == 1).await;
    d.signal(id, Signal::new(SignalKind::Extend, "alice"));
    wait_until(|| d.front().deliveries() == 2).await;
    d.signal(id, Signal::new(SignalKind::Accelerate, "alice"));
    wait_until(|| d.front().deliveries() == 3).await;
    d.signal(id, Signal::new(SignalKind::Cancel, "alice"));
    assert_eq!(handle.wait().await, Status::Completed);

    // 9 + ⌊50 · ln 10⌋
    assert_eq!(
        *engine.jobs.lock().unwrap(),
        vec![(9, 1), (124, 1), (124, 2)]
    );

    let events = d.front().events();
    let announcements: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            Event::Announce(text) => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(announcements.len(), 3);
    assert!(announcements[0].contains("for `10` generation(s)"));
    assert!(announcements[1].contains("for `125` generation(s)"));
    assert!(announcements[2].contains("with step `2`"));
    assert!(events
        .iter()
        .all(|e| !matches!(e, Event::Deliver { extendable: false, .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_engine_failure_notifies_requester() {
    let dir = tempfile::tempdir().unwrap();
    let engine = FakeEngine {
        fail: Some("Unknown rule".to_string()),
        ..FakeEngine::default()
    };
    let d = dispatcher(
        dir.path(),
        Arc::new(engine),
        GatedPipeline::new(true),
        RecordingFront::default(),
        Duration::from_secs(5),
    );

    let handle = d.submit(&glider_submission("alice", 10)).unwrap();
    let id = handle.id;
    assert_eq!(handle.wait().await, Status::Failed);

    let events = d.front().events();
    assert!(events.contains(&Event::Notify("Unknown rule".to_string())));
    assert_eq!(events.last(), Some(&Event::Close(Status::Failed)));
    assert_eq!(status_of(&d, id), Some(Status::Failed));
    assert!(is_empty_dir(dir.path()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_oversized_delivery_fails() {
    let dir = tempfile::tempdir().unwrap();
    let front = RecordingFront {
        limit: Some(10),
        ..RecordingFront::default()
    };
    let d = dispatcher(
        dir.path(),
        Arc::new(FakeEngine::default()),
        GatedPipeline::new(true),
        front,
        Duration::from_secs(5),
    );

    let handle = d.submit(&glider_submission("alice", 10)).unwrap();
    assert_eq!(handle.wait().await, Status::Failed);

    let events = d.front().events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::Notify(m) if m.starts_with("HTTP 413"))));
    assert!(is_empty_dir(dir.path()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rejected_submission_starts_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(
        dir.path(),
        Arc::new(FakeEngine::default()),
        GatedPipeline::new(true),
        RecordingFront::default(),
        Duration::from_secs(5),
    );

    let mut submission = glider_submission("alice", 10);
    submission.generation = None;
    assert!(d.submit(&submission).is_err());

    let mut submission = glider_submission("alice", 10);
    submission.rule = Some("NoSuchTable".to_string());
    assert!(d.submit(&submission).is_err());

    assert!(d.activity().is_empty());
    assert!(d.front().events().is_empty());
    assert!(is_empty_dir(dir.path()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delivered_gif_decodes() {
    let dir = tempfile::tempdir().unwrap();
    let d = dispatcher(
        dir.path(),
        Arc::new(FakeEngine::default()),
        GatedPipeline::new(true),
        RecordingFront::default(),
        Duration::from_millis(50),
    );

    let handle = d.submit(&glider_submission("alice", 4)).unwrap();
    assert_eq!(handle.wait().await, Status::Completed);

    let gif = d
        .front()
        .events()
        .into_iter()
        .find_map(|e| match e {
            Event::Deliver { gif, .. } => Some(gif),
            _ => None,
        })
        .unwrap();
    assert!(gif.starts_with(b"GIF89a"));
    let image = image::load_from_memory(&gif).unwrap();
    assert_eq!(image.width(), 170);
}
