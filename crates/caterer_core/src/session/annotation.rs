//! Text that accompanies announcements and delivered animations.

use crate::pipeline::PipelineReport;
use crate::rule::Algorithm;
use serde::{Deserialize, Serialize};

/// How much timing detail the requester asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimingVerbosity {
    #[default]
    None,
    /// Total seconds only.
    Total,
    /// Per-stage seconds with the pool each ran on.
    All,
}

/// Timing breakdown of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Timing {
    Total {
        total: f64,
    },
    Stages {
        parse: f64,
        parse_pool: &'static str,
        render: f64,
        render_pool: &'static str,
        total: f64,
    },
}

impl Timing {
    pub fn from_report(report: &PipelineReport, verbosity: TimingVerbosity) -> Option<Self> {
        match verbosity {
            TimingVerbosity::None => None,
            TimingVerbosity::Total => Some(Self::Total {
                total: report.total_secs(),
            }),
            TimingVerbosity::All => Some(Self::Stages {
                parse: report.parse_secs(),
                parse_pool: report.pools.parse.name(),
                render: report.render_secs(),
                render_pool: report.pools.render.name(),
                total: report.total_secs(),
            }),
        }
    }
}

/// Status text delivered alongside a rendered animation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Annotation {
    /// Requester to mention, if they asked to be tagged.
    pub mention: Option<String>,
    /// Free-text label chosen by the requester.
    pub tag: Option<String>,
    pub timing: Option<Timing>,
    pub truncated: bool,
}

impl Annotation {
    /// Timing and truncation lines, without the mention or tag.
    pub fn details(&self) -> Vec<String> {
        let mut lines = Vec::new();
        match self.timing {
            Some(Timing::Total { total }) => lines.push(format!("{:.2}s", total)),
            Some(Timing::Stages {
                parse,
                parse_pool,
                render,
                render_pool,
                total,
            }) => {
                lines.push("Times:".to_string());
                lines.push(format!("Parsing frames: {:.2}s ({})", parse, parse_pool));
                lines.push(format!("Saving frames to GIF: {:.2}s ({})", render, render_pool));
                lines.push(format!("(Total: {:.2}s)", total));
            }
            None => {}
        }
        if self.truncated {
            lines.push("(Truncated to fit under 8MB)".to_string());
        }
        lines
    }
}

/// Plain text: `mention: tag` on the first line, then the details.
impl std::fmt::Display for Annotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let header = match (&self.mention, &self.tag) {
            (Some(m), Some(t)) => Some(format!("{}: {}", m, t)),
            (Some(m), None) => Some(m.clone()),
            (None, Some(t)) => Some(t.clone()),
            (None, None) => None,
        };
        let lines: Vec<String> = header.into_iter().chain(self.details()).collect();
        write!(f, "{}", lines.join("\n"))
    }
}

/// What the session is running, for the announcement line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternSource {
    Supplied,
    Soup { width: u32, height: u32 },
}

/// Announcement posted when a run starts and refreshed on each re-entry.
pub fn announcement(
    source: &PatternSource,
    rule: &str,
    step: u64,
    generations: u64,
    algorithm: Algorithm,
) -> String {
    let what = match source {
        PatternSource::Supplied => "Running supplied pattern".to_string(),
        PatternSource::Soup { width, height } => format!("Running `{}×{}` soup", width, height),
    };
    let using = if algorithm == Algorithm::QuickLife {
        ".".to_string()
    } else {
        format!(" using `{}`.", algorithm)
    };
    format!(
        "{} in rule `{}` with step `{}` for `{}` generation(s){}",
        what,
        rule,
        step,
        generations + 1,
        using
    )
}

/// Guidance sent when a result is too large to deliver.
pub const TOO_LARGE_HINT: &str = "GIF too large. Try a higher STEP or lower GEN!";
