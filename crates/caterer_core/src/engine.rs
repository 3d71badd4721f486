//! Simulation engine invocation.
//!
//! The engine is an external command-line program. It reads a starting
//! pattern, advances it under a rule, and writes one snapshot per emitted
//! generation in the format read by [`crate::snapshot`]. Anything it prints
//! is treated as a diagnostic and fails the request.

use crate::rule::Algorithm;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// How the engine should find the rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRule {
    /// A rulestring the engine parses itself.
    Rulestring(String),
    /// A directory holding a written-out `.rule` file; the input header
    /// names the rule.
    SearchDir(PathBuf),
}

/// One engine invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineJob {
    pub algorithm: Algorithm,
    pub rule: EngineRule,
    /// Normalized generation target.
    pub generations: u64,
    pub step: u64,
    pub input: PathBuf,
    pub output: PathBuf,
}

/// Errors from running the engine.
#[derive(Debug)]
pub enum EngineError {
    /// The engine could not be started.
    Spawn(std::io::Error),
    /// The engine reported a problem; surfaced to the requester verbatim.
    Diagnostic(String),
    /// The engine exited quietly but wrote no output.
    MissingOutput(PathBuf),
    /// The blocking task running the engine died.
    Join(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Spawn(e) => write!(f, "Failed to start engine: {}", e),
            Self::Diagnostic(s) => write!(f, "{}", s),
            Self::MissingOutput(p) => write!(f, "Engine produced no output at {}", p.display()),
            Self::Join(s) => write!(f, "Engine task failed: {}", s),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

/// Something that can run a simulation to completion.
///
/// Implementations block; callers run them on a blocking pool.
pub trait Engine: Send + Sync + 'static {
    fn run(&self, job: &EngineJob) -> Result<(), EngineError>;
}

/// Runs a `bgolly`-style binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessEngine {
    binary: PathBuf,
}

impl ProcessEngine {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Arguments for one job, in the order the engine expects.
    pub fn args(job: &EngineJob) -> Vec<String> {
        let mut args = vec!["-a".to_string(), job.algorithm.engine_name().to_string()];
        match &job.rule {
            EngineRule::Rulestring(rule) => {
                args.push("-r".to_string());
                args.push(rule.clone());
            }
            EngineRule::SearchDir(dir) => {
                args.push("-s".to_string());
                let mut dir = dir.to_string_lossy().into_owned();
                if !dir.ends_with('/') {
                    dir.push('/');
                }
                args.push(dir);
            }
        }
        args.extend([
            "-m".to_string(),
            job.generations.to_string(),
            "-i".to_string(),
            job.step.to_string(),
            "-o".to_string(),
            job.output.to_string_lossy().into_owned(),
            job.input.to_string_lossy().into_owned(),
        ]);
        args
    }
}

impl Engine for ProcessEngine {
    fn run(&self, job: &EngineJob) -> Result<(), EngineError> {
        let args = Self::args(job);
        debug!("Running {} {:?}", self.binary.display(), args);

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(EngineError::Spawn)?;

        let mut diagnostic = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !diagnostic.is_empty() {
                diagnostic.push('\n');
            }
            diagnostic.push_str(stderr.trim());
        }

        if !diagnostic.is_empty() {
            warn!("Engine reported: {}", diagnostic);
            return Err(EngineError::Diagnostic(diagnostic));
        }
        if !output.status.success() {
            return Err(EngineError::Diagnostic(format!("Engine exited with {}", output.status)));
        }
        if !job.output.exists() {
            return Err(EngineError::MissingOutput(job.output.clone()));
        }
        Ok(())
    }
}
