//! HTTP front end.
//!
//! A small REST API standing in for a chat client:
//!
//! # Endpoints
//!
//! - `GET /health` - Health check
//! - `POST /messages` - Post a chat message (searched for patterns and rules)
//! - `POST /sim` - Submit a simulation (JSON `Submission`)
//! - `GET /sim/{id}` - Announcement, annotation and notices of a session
//! - `GET /sim/{id}/gif` - The delivered animation
//! - `POST /sim/{id}/{cancel|extend|accelerate}?from=NAME&markers=N` - Signals
//! - `GET /activity` - Recent sessions
//! - `GET /rules` - Names of uploaded rules
//! - `POST /rules` - Upload a `.rule` file
//! - `DELETE /rules/{name}` - Remove an uploaded rule

use crate::artifacts::RequestId;
use crate::engine::Engine;
use crate::pipeline::PipelineRunner;
use crate::session::{
    Annotation, Delivery, DeliveryError, Dispatcher, FrontEnd, Signal, SignalKind, Status,
    Submission,
};
use caterer_rules::{RuleDefinition, SqliteRuleStore};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io::Read;
use std::sync::{Arc, Mutex};
use tiny_http::{Header, Method, Request, Response, Server};
use tracing::{debug, info, warn};

/// Identity used when a request names nobody.
pub const DEFAULT_REQUESTER: &str = "anonymous";

/// Conversations kept after their session closed.
const MAX_CONVERSATIONS: usize = 64;

/// Largest request body read.
const MAX_BODY: u64 = 16 * 1024 * 1024;

/// What one session has shown so far.
#[derive(Debug, Clone, Default, Serialize)]
struct Conversation {
    announcement: Option<String>,
    annotation: Option<String>,
    #[serde(skip)]
    gif: Option<Vec<u8>>,
    has_gif: bool,
    extendable: bool,
    notices: Vec<String>,
    status: Option<Status>,
    closed: bool,
}

/// Keeps session output in memory for HTTP clients to poll.
pub struct HttpFrontEnd {
    delivery_limit: u64,
    history_len: usize,
    conversations: Mutex<BTreeMap<RequestId, Conversation>>,
    history: Mutex<VecDeque<String>>,
}

impl HttpFrontEnd {
    pub fn new(delivery_limit: u64, history_len: usize) -> Self {
        Self {
            delivery_limit,
            history_len,
            conversations: Mutex::new(BTreeMap::new()),
            history: Mutex::new(VecDeque::new()),
        }
    }

    /// Add a chat message to the searchable history.
    pub fn post_message(&self, text: &str) {
        let mut history = self.history.lock().unwrap();
        history.push_front(text.to_string());
        history.truncate(self.history_len);
    }

    /// Recent messages, newest first.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().unwrap().iter().cloned().collect()
    }

    /// JSON view of a session's conversation.
    pub fn view(&self, id: RequestId) -> Option<serde_json::Value> {
        let conversations = self.conversations.lock().unwrap();
        conversations
            .get(&id)
            .and_then(|c| serde_json::to_value(c).ok())
    }

    /// The currently delivered GIF of a session.
    pub fn gif(&self, id: RequestId) -> Option<Vec<u8>> {
        self.conversations
            .lock()
            .unwrap()
            .get(&id)
            .and_then(|c| c.gif.clone())
    }

    fn with_conversation<T>(&self, id: RequestId, f: impl FnOnce(&mut Conversation) -> T) -> T {
        let mut conversations = self.conversations.lock().unwrap();
        if !conversations.contains_key(&id) && conversations.len() >= MAX_CONVERSATIONS {
            let oldest_closed = conversations
                .iter()
                .find(|(_, c)| c.closed)
                .map(|(k, _)| *k);
            if let Some(old) = oldest_closed {
                conversations.remove(&old);
            }
        }
        f(conversations.entry(id).or_default())
    }
}

impl FrontEnd for HttpFrontEnd {
    async fn announce(&self, id: RequestId, text: &str) -> Result<(), DeliveryError> {
        self.with_conversation(id, |c| c.announcement = Some(text.to_string()));
        Ok(())
    }

    async fn deliver(&self, id: RequestId, delivery: Delivery) -> Result<(), DeliveryError> {
        let size = delivery.gif.len() as u64;
        if size > self.delivery_limit {
            return Err(DeliveryError::TooLarge {
                size,
                limit: self.delivery_limit,
            });
        }
        self.with_conversation(id, |c| {
            c.annotation = Some(chat_markup(&delivery.annotation));
            c.gif = Some(delivery.gif);
            c.has_gif = true;
            c.extendable = delivery.extendable;
        });
        Ok(())
    }

    async fn retract(&self, id: RequestId) {
        self.with_conversation(id, |c| {
            c.gif = None;
            c.has_gif = false;
            c.annotation = None;
        });
    }

    async fn notify(&self, id: RequestId, message: &str) {
        self.with_conversation(id, |c| c.notices.push(message.to_string()));
    }

    async fn close(&self, id: RequestId, status: Status) {
        self.with_conversation(id, |c| {
            if status == Status::Canceled {
                c.announcement = None;
                c.gif = None;
                c.has_gif = false;
            }
            c.extendable = false;
            c.status = Some(status);
            c.closed = true;
        });
    }
}

/// Chat rendering of an annotation: `@mention **tag**`, then the details.
fn chat_markup(annotation: &Annotation) -> String {
    let header = match (&annotation.mention, &annotation.tag) {
        (Some(m), Some(t)) => Some(format!("@{} **{}**", m, t)),
        (Some(m), None) => Some(format!("@{}", m)),
        (None, Some(t)) => Some(format!("**{}**", t)),
        (None, None) => None,
    };
    header
        .into_iter()
        .chain(annotation.details())
        .collect::<Vec<_>>()
        .join("\n")
}

/// A response before it is written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Reply {
    fn json(status: u16, value: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn error(status: u16, message: &str) -> Self {
        Self::json(status, json!({ "error": message }))
    }

    fn into_response(self) -> Response<std::io::Cursor<Vec<u8>>> {
        let mut response = Response::from_data(self.body).with_status_code(self.status);
        if let Ok(header) = Header::from_bytes("Content-Type", self.content_type) {
            response = response.with_header(header);
        }
        response
    }
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| {
            let v = v.replace('+', " ");
            let value = urlencoding::decode(&v)
                .map(|s| s.into_owned())
                .unwrap_or(v.clone());
            (k.to_string(), value)
        })
        .collect()
}

/// Serves the REST API for one dispatcher.
pub struct HttpServer<E, P> {
    dispatcher: Arc<Dispatcher<E, P, HttpFrontEnd>>,
    store: SqliteRuleStore,
}

impl<E, P> HttpServer<E, P>
where
    E: Engine,
    P: PipelineRunner,
{
    pub fn new(dispatcher: Arc<Dispatcher<E, P, HttpFrontEnd>>, store: SqliteRuleStore) -> Self {
        Self { dispatcher, store }
    }

    /// Handle requests until the server shuts down (blocking).
    pub fn serve(&self, server: &Server) {
        for request in server.incoming_requests() {
            self.handle(request);
        }
        info!("HTTP server stopped");
    }

    fn handle(&self, mut request: Request) {
        let method = request.method().clone();
        let url = request.url().to_string();

        let mut body = Vec::new();
        if let Err(e) = request.as_reader().take(MAX_BODY).read_to_end(&mut body) {
            let reply = Reply::error(400, &format!("Failed to read body: {}", e));
            let _ = request.respond(reply.into_response());
            return;
        }

        let reply = self.route(&method, &url, &body);
        debug!("{} {} -> {}", method, url, reply.status);
        if let Err(e) = request.respond(reply.into_response()) {
            warn!("Failed to respond to {} {}: {}", method, url, e);
        }
    }

    /// Route one request.
    pub fn route(&self, method: &Method, url: &str, body: &[u8]) -> Reply {
        let (path, query) = url.split_once('?').unwrap_or((url, ""));
        let query = parse_query(query);
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        let front = self.dispatcher.front();

        match (method, segments.as_slice()) {
            (Method::Get, ["health"]) => Reply::json(200, json!({ "status": "ok" })),

            (Method::Post, ["messages"]) => match std::str::from_utf8(body) {
                Ok(text) => {
                    front.post_message(text);
                    Reply::json(200, json!({ "ok": true }))
                }
                Err(_) => Reply::error(400, "Message is not UTF-8"),
            },

            (Method::Post, ["sim"]) => self.submit(body),

            (Method::Get, ["sim", id]) => match parse_id(id).and_then(|id| front.view(id)) {
                Some(view) => Reply::json(200, view),
                None => Reply::error(404, "No such session"),
            },

            (Method::Get, ["sim", id, "gif"]) => match parse_id(id).and_then(|id| front.gif(id)) {
                Some(gif) => Reply {
                    status: 200,
                    content_type: "image/gif",
                    body: gif,
                },
                None => Reply::error(404, "No GIF delivered"),
            },

            (Method::Post, ["sim", id, action]) => {
                let kind = match *action {
                    "cancel" => SignalKind::Cancel,
                    "extend" => SignalKind::Extend,
                    "accelerate" => SignalKind::Accelerate,
                    _ => return Reply::error(404, "Unknown action"),
                };
                let Some(id) = parse_id(id) else {
                    return Reply::error(404, "No such session");
                };
                let from = query
                    .get("from")
                    .filter(|f| !f.is_empty())
                    .map_or(DEFAULT_REQUESTER, String::as_str);
                let markers = query
                    .get("markers")
                    .and_then(|m| m.parse().ok())
                    .unwrap_or(1);

                if self
                    .dispatcher
                    .signal(id, Signal::new(kind, from).with_markers(markers))
                {
                    return Reply::json(202, json!({ "accepted": true }));
                }
                match self.dispatcher.status(id) {
                    Some(status) => Reply::error(409, &format!("Session already ended ({})", status)),
                    None => Reply::error(404, "No live session"),
                }
            }

            (Method::Get, ["activity"]) => match serde_json::to_value(self.dispatcher.activity()) {
                Ok(value) => Reply::json(200, value),
                Err(e) => Reply::error(500, &e.to_string()),
            },

            (Method::Get, ["rules"]) => match self.store.names() {
                Ok(names) => Reply::json(200, json!(names)),
                Err(e) => Reply::error(500, &e.to_string()),
            },

            (Method::Post, ["rules"]) => match RuleDefinition::from_rule_file(body) {
                Ok(rule) => match self.store.upsert(&rule) {
                    Ok(()) => {
                        info!("Uploaded rule {} ({} states)", rule.name, rule.n_states);
                        Reply::json(200, json!({ "name": rule.name, "n_states": rule.n_states }))
                    }
                    Err(e) => Reply::error(500, &e.to_string()),
                },
                Err(e) => Reply::error(400, &e.to_string()),
            },

            (Method::Delete, ["rules", name]) => match self.store.delete(name) {
                Ok(true) => {
                    info!("Removed rule {}", name);
                    Reply::json(200, json!({ "removed": name }))
                }
                Ok(false) => Reply::error(404, "No such rule"),
                Err(e) => Reply::error(500, &e.to_string()),
            },

            _ => Reply::error(404, "Not found"),
        }
    }

    fn submit(&self, body: &[u8]) -> Reply {
        let mut submission: Submission = match serde_json::from_slice(body) {
            Ok(s) => s,
            Err(e) => return Reply::error(400, &format!("Invalid JSON: {}", e)),
        };
        if submission.requester.is_empty() {
            submission.requester = DEFAULT_REQUESTER.to_string();
        }
        if submission.history.is_empty() {
            submission.history = self.dispatcher.front().history();
        }

        match self.dispatcher.submit(&submission) {
            Ok(handle) => Reply::json(200, json!({ "id": handle.id })),
            Err(e) => Reply::error(400, &e.to_string()),
        }
    }
}

fn parse_id(text: &str) -> Option<RequestId> {
    text.parse().ok().map(RequestId)
}
