//! Parser for the engine's per-generation snapshot stream.
//!
//! Format (three lines per emitted generation):
//! ```text
//! (x, y)        origin of the generation's sub-grid
//! (w, h)        extent of its live cells
//! 3o$2bo$obo!   run-length rows
//! ```
//!
//! The extent line may also carry four fields `(x, y, w, h)`; only the last
//! two are used. Literals are read with a small explicit grammar, never
//! evaluated.

use crate::rle::{parse_rows, RunEncodedRow, RunError};
use std::io;
use std::path::Path;

/// Origin of a generation's sub-grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub x: i64,
    pub y: i64,
}

/// Axis-aligned rectangle in engine coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: i64,
    pub y: i64,
    pub width: u64,
    pub height: u64,
}

impl BoundingBox {
    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y + self.height as i64
    }

    /// Smallest box containing both.
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        BoundingBox {
            x,
            y,
            width: (self.right().max(other.right()) - x) as u64,
            height: (self.bottom().max(other.bottom()) - y) as u64,
        }
    }

    /// Whether `other` lies entirely inside this box.
    pub fn contains(&self, other: &BoundingBox) -> bool {
        other.x >= self.x
            && other.y >= self.y
            && other.right() <= self.right()
            && other.bottom() <= self.bottom()
    }
}

/// One emitted generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub position: Position,
    pub bbox: BoundingBox,
    pub rows: Vec<RunEncodedRow>,
}

/// Everything the renderer needs from one engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSet {
    /// Generations in emission order.
    pub generations: Vec<Generation>,
    /// Union of every generation's box.
    pub global: BoundingBox,
    /// Largest per-generation (width, height), used when tracking.
    pub max_extent: (u64, u64),
}

/// Errors while decoding the engine output.
#[derive(Debug)]
pub enum DecodeError {
    /// Reading or removing the artifact failed.
    Io(io::Error),
    /// A position or extent line is not a valid integer tuple.
    Literal { line: usize, text: String },
    /// An extent had a negative component.
    NegativeExtent { line: usize },
    /// A pattern line has invalid runs.
    Rows { line: usize, source: RunError },
    /// The line count is not a multiple of three.
    MissingChunk { lines: usize },
    /// The artifact holds no generations.
    Empty,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Literal { line, text } => {
                write!(f, "line {}: expected an integer tuple, got {:?}", line, text)
            }
            Self::NegativeExtent { line } => write!(f, "line {}: negative extent", line),
            Self::Rows { line, source } => write!(f, "line {}: {}", line, source),
            Self::MissingChunk { lines } => {
                write!(f, "truncated output: {} lines is not a whole number of generations", lines)
            }
            Self::Empty => write!(f, "engine output contains no generations"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Rows { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Read an integer tuple such as `(3, -4)` or `[1,2,3,4]`.
fn parse_tuple(text: &str) -> Option<Vec<i64>> {
    let inner = text.trim();
    let inner = inner
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .or_else(|| inner.strip_prefix('[').and_then(|s| s.strip_suffix(']')))?;

    let mut fields: Vec<&str> = inner.split(',').map(str::trim).collect();
    if fields.last() == Some(&"") {
        fields.pop();
    }
    let values = fields
        .iter()
        .map(|f| f.parse::<i64>().ok())
        .collect::<Option<Vec<_>>>()?;
    (values.len() >= 2).then_some(values)
}

/// Decode the full snapshot stream.
pub fn parse_snapshots(text: &str) -> Result<SnapshotSet, DecodeError> {
    let lines: Vec<&str> = text.lines().map(|l| l.trim_end_matches('\r')).collect();
    if lines.len() % 3 != 0 {
        return Err(DecodeError::MissingChunk { lines: lines.len() });
    }

    let mut generations = Vec::with_capacity(lines.len() / 3);
    for (chunk_idx, chunk) in lines.chunks(3).enumerate() {
        let first_line = chunk_idx * 3 + 1;

        let pos = parse_tuple(chunk[0])
            .filter(|v| v.len() == 2)
            .ok_or_else(|| DecodeError::Literal {
                line: first_line,
                text: chunk[0].to_string(),
            })?;
        let extent = parse_tuple(chunk[1])
            .filter(|v| v.len() == 2 || v.len() == 4)
            .ok_or_else(|| DecodeError::Literal {
                line: first_line + 1,
                text: chunk[1].to_string(),
            })?;
        let (w, h) = (extent[extent.len() - 2], extent[extent.len() - 1]);
        if w < 0 || h < 0 {
            return Err(DecodeError::NegativeExtent {
                line: first_line + 1,
            });
        }
        let rows = parse_rows(chunk[2]).map_err(|source| DecodeError::Rows {
            line: first_line + 2,
            source,
        })?;

        generations.push(Generation {
            position: Position {
                x: pos[0],
                y: pos[1],
            },
            bbox: BoundingBox {
                x: pos[0],
                y: pos[1],
                width: w as u64,
                height: h as u64,
            },
            rows,
        });
    }

    let first = generations.first().ok_or(DecodeError::Empty)?.bbox;
    let global = generations
        .iter()
        .skip(1)
        .fold(first, |acc, g| acc.union(&g.bbox));
    let max_extent = generations.iter().fold((0, 0), |(w, h), g| {
        (w.max(g.bbox.width), h.max(g.bbox.height))
    });

    Ok(SnapshotSet {
        generations,
        global,
        max_extent,
    })
}

/// Decode an engine output artifact and delete it once it parsed cleanly.
///
/// On failure the file is left in place; the owning session removes it.
pub fn parse_file(path: &Path) -> Result<SnapshotSet, DecodeError> {
    let text = std::fs::read_to_string(path)?;
    let set = parse_snapshots(&text)?;
    std::fs::remove_file(path)?;
    Ok(set)
}
