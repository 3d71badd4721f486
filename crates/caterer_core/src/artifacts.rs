//! Per-request files on disk.
//!
//! Every file belonging to one request shares the request id as its stem,
//! so concurrent sessions never touch each other's artifacts.

use caterer_rules::is_valid_name;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Unique identifier of one simulation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(pub u64);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out request ids that do not repeat across restarts.
#[derive(Debug)]
pub struct RequestIds {
    next: AtomicU64,
}

impl RequestIds {
    /// Start counting from the current time in milliseconds.
    pub fn new() -> Self {
        let start = chrono::Utc::now().timestamp_millis().max(0) as u64;
        Self::starting_at(start)
    }

    pub fn starting_at(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    pub fn next(&self) -> RequestId {
        RequestId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

/// The set of files one request may create.
///
/// Files are removed by [`Artifacts::remove_all`] and again on drop, so an
/// early return or a panic in the owning session still cleans up.
#[derive(Debug)]
pub struct Artifacts {
    dir: PathBuf,
    id: RequestId,
    rule_name: Option<String>,
}

impl Artifacts {
    pub fn new(dir: impl Into<PathBuf>, id: RequestId) -> Self {
        Self {
            dir: dir.into(),
            id,
            rule_name: None,
        }
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{id}_in.rle`: the starting pattern handed to the engine.
    pub fn input_path(&self) -> PathBuf {
        self.dir.join(format!("{}_in.rle", self.id))
    }

    /// `{id}_out.rle`: the engine's snapshot stream.
    pub fn output_path(&self) -> PathBuf {
        self.dir.join(format!("{}_out.rle", self.id))
    }

    /// `{id}.gif`: the rendered animation.
    pub fn gif_path(&self) -> PathBuf {
        self.dir.join(format!("{}.gif", self.id))
    }

    /// Name under which an uploaded rule is written for the engine.
    pub fn rule_stem(rule: &str, id: RequestId) -> String {
        format!("{}_{}", rule, id)
    }

    /// `{rule}_{id}.rule`, if a rule file was written.
    pub fn rule_path(&self) -> Option<PathBuf> {
        self.rule_name
            .as_ref()
            .map(|name| self.dir.join(format!("{}.rule", Self::rule_stem(name, self.id))))
    }

    /// Write the engine input: a minimal header naming the rule, then the body.
    pub fn write_input(&self, rule: &str, body: &str) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.input_path();
        std::fs::write(&path, format!("x=0,y=0,rule={}\n{}", rule, body))?;
        Ok(path)
    }

    /// Write an uploaded rule's file next to the other artifacts.
    ///
    /// Names that could leave the artifact directory are refused.
    pub fn write_rule(&mut self, rule: &str, file: &[u8]) -> io::Result<PathBuf> {
        if !is_valid_name(rule) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("Invalid rule name: {}", rule),
            ));
        }
        std::fs::create_dir_all(&self.dir)?;
        self.rule_name = Some(rule.to_string());
        let path = self.dir.join(format!("{}.rule", Self::rule_stem(rule, self.id)));
        std::fs::write(&path, file)?;
        Ok(path)
    }

    /// Remove the rendered GIF only.
    pub fn remove_gif(&self) {
        remove_quietly(&self.gif_path());
    }

    /// Remove every artifact of this request. Missing files are fine.
    pub fn remove_all(&self) {
        let mut paths = vec![self.input_path(), self.output_path(), self.gif_path()];
        paths.extend(self.rule_path());
        for path in &paths {
            remove_quietly(path);
        }
        debug!(request = %self.id, "Artifacts removed");
    }
}

impl Drop for Artifacts {
    fn drop(&mut self) {
        self.remove_all();
    }
}

fn remove_quietly(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
    }
}
