//! Front ends that sessions can talk to.

mod http;

pub use http::{HttpFrontEnd, HttpServer, Reply, DEFAULT_REQUESTER};
