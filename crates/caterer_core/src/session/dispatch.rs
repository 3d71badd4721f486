//! Accepts submissions, spawns sessions and routes signals to them.

use super::activity::{ActivityEntry, Status};
use super::machine::{Session, SessionContext};
use super::request::{Submission, ValidationError};
use super::{FrontEnd, Signal};
use crate::artifacts::{RequestId, RequestIds};
use crate::engine::Engine;
use crate::pipeline::PipelineRunner;
use caterer_rules::RuleLookup;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A running session.
pub struct SessionHandle {
    pub id: RequestId,
    join: JoinHandle<Status>,
}

impl SessionHandle {
    /// Wait for the session to end.
    pub async fn wait(self) -> Status {
        match self.join.await {
            Ok(status) => status,
            Err(e) => {
                warn!(request = %self.id, "Session task died: {}", e);
                Status::Failed
            }
        }
    }
}

type Mailboxes = Arc<Mutex<HashMap<RequestId, async_channel::Sender<Signal>>>>;

/// Front door for the session layer.
///
/// Safe to call from outside the runtime (the HTTP thread does); sessions
/// are spawned on the runtime captured at construction.
pub struct Dispatcher<E, P, F> {
    ctx: Arc<SessionContext<E, P, F>>,
    rules: Arc<dyn RuleLookup>,
    ids: RequestIds,
    mailboxes: Mailboxes,
    runtime: Handle,
}

impl<E, P, F> Dispatcher<E, P, F>
where
    E: Engine,
    P: PipelineRunner,
    F: FrontEnd,
{
    /// Must be called from within a tokio runtime.
    pub fn new(ctx: SessionContext<E, P, F>, rules: Arc<dyn RuleLookup>) -> Self {
        Self::with_ids(ctx, rules, RequestIds::new())
    }

    pub fn with_ids(ctx: SessionContext<E, P, F>, rules: Arc<dyn RuleLookup>, ids: RequestIds) -> Self {
        Self {
            ctx: Arc::new(ctx),
            rules,
            ids,
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
            runtime: Handle::current(),
        }
    }

    /// Validate a submission and start its session.
    ///
    /// Rejected submissions create no artifacts and no session.
    pub fn submit(&self, submission: &Submission) -> Result<SessionHandle, ValidationError> {
        let request =
            submission.validate(self.rules.as_ref(), &self.ctx.limits, &mut rand::thread_rng())?;
        let id = self.ids.next();
        info!(
            request = %id,
            "Accepted {} from {} in rule {}",
            request.algorithm,
            request.requester,
            request.rule
        );

        let (tx, rx) = async_channel::unbounded();
        self.mailboxes.lock().unwrap().insert(id, tx);

        let session = Session::new(id, request, self.ctx.clone(), rx);
        let mailboxes = self.mailboxes.clone();
        let join = self.runtime.spawn(async move {
            let status = session.run().await;
            mailboxes.lock().unwrap().remove(&id);
            info!(request = %id, "Session ended {}", status);
            status
        });

        Ok(SessionHandle { id, join })
    }

    /// Route a signal to a live session. Returns false if none is listening.
    pub fn signal(&self, id: RequestId, signal: Signal) -> bool {
        match self.mailboxes.lock().unwrap().get(&id) {
            Some(tx) => tx.try_send(signal).is_ok(),
            None => false,
        }
    }

    /// Whether a session is still running.
    pub fn is_live(&self, id: RequestId) -> bool {
        self.mailboxes.lock().unwrap().contains_key(&id)
    }

    /// Last recorded status of a recent session.
    pub fn status(&self, id: RequestId) -> Option<Status> {
        self.ctx.activity.status(id)
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.ctx.activity.snapshot()
    }

    pub fn front(&self) -> &Arc<F> {
        &self.ctx.front
    }
}
