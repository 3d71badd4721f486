//! Rasterize decoded generations into an animated GIF.
//!
//! Each generation is drawn onto a bordered canvas, magnified so small
//! patterns stay visible, and streamed into a [`FrameSink`]. The sink's size
//! is checked after every frame; once it passes the cap, rendering stops and
//! the already-written frames are kept.
//!
//! # Example
//!
//! ```ignore
//! let set = snapshot::parse_file(&artifacts.output_path())?;
//! let job = RenderJob::new(generations, step, track);
//! let outcome = render_gif(&set, &colors, &job, &artifacts.gif_path(), &abort)?;
//! if outcome.truncated {
//!     // tell the requester
//! }
//! ```

mod canvas;
mod sink;

pub use canvas::Canvas;
pub use sink::{FrameSink, GifFileSink};

use crate::color::ColorTable;
use crate::snapshot::SnapshotSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Encoded size after which no further frames are appended.
pub const DEFAULT_SIZE_CAP: u64 = 7_600_000;

/// Smaller canvas side, in pixels, that magnification aims for.
pub const MIN_DISPLAY_SIDE: u64 = 100;

/// Largest side a GIF frame can have.
const MAX_GIF_SIDE: u64 = u16::MAX as u64;

/// Largest unmagnified canvas, in cells.
const MAX_CANVAS_CELLS: u64 = 1 << 26;

/// Errors while rendering.
#[derive(Debug)]
pub enum RenderError {
    Io(std::io::Error),
    Image(image::ImageError),
    /// A generation uses a state the color table does not cover.
    UnknownState(u16),
    /// The owning session asked the render to stop.
    Aborted,
    /// The bordered canvas cannot be encoded or held in memory.
    TooLarge { width: u64, height: u64 },
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Image(e) => write!(f, "Image error: {}", e),
            Self::UnknownState(s) => write!(f, "State {} has no color", s),
            Self::Aborted => write!(f, "Render aborted"),
            Self::TooLarge { width, height } => {
                write!(f, "Pattern too large to render ({}x{} cells)", width, height)
            }
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Image(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RenderError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<image::ImageError> for RenderError {
    fn from(e: image::ImageError) -> Self {
        Self::Image(e)
    }
}

/// Per-request render settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderJob {
    /// Normalized generation target.
    pub generations: u64,
    pub step: u64,
    /// Follow the pattern instead of framing the whole run.
    pub track: bool,
    pub size_cap: u64,
}

impl RenderJob {
    pub fn new(generations: u64, step: u64, track: bool) -> Self {
        Self {
            generations,
            step,
            track,
            size_cap: DEFAULT_SIZE_CAP,
        }
    }

    pub fn with_size_cap(mut self, size_cap: u64) -> Self {
        self.size_cap = size_cap;
        self
    }
}

/// What a finished render produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOutcome {
    pub frames: usize,
    /// Stopped early because the output reached the size cap.
    pub truncated: bool,
}

/// Display time of every frame.
///
/// One second for a single-frame run, otherwise `5 / (generations * step)`
/// seconds clamped to `[1/60, 1/6]`.
pub fn frame_duration(generations: u64, step: u64) -> Duration {
    if generations == 0 {
        return Duration::from_secs(1);
    }
    let seconds = 5.0 / (generations as f64 * step.max(1) as f64);
    Duration::from_secs_f64(seconds.clamp(1.0 / 60.0, 1.0 / 6.0))
}

/// Integer upscale factor for a canvas whose smaller side is `min_side`.
pub fn magnification(min_side: u64) -> u64 {
    let side = min_side.max(1);
    if side >= MIN_DISPLAY_SIDE {
        1
    } else {
        MIN_DISPLAY_SIDE.div_ceil(side)
    }
}

/// Canvas size without the border: the whole run or the largest generation.
fn frame_extent(set: &SnapshotSet, track: bool) -> (u64, u64) {
    if track {
        set.max_extent
    } else {
        (set.global.width, set.global.height)
    }
}

/// Canvas size with the one-cell border, refused before anything is
/// allocated when it could never become a GIF frame.
fn bordered_extent(width: u64, height: u64) -> Result<(usize, usize), RenderError> {
    let too_large = || RenderError::TooLarge {
        width: width.saturating_add(2),
        height: height.saturating_add(2),
    };
    let w = width.checked_add(2).filter(|w| *w <= MAX_GIF_SIDE).ok_or_else(too_large)?;
    let h = height.checked_add(2).filter(|h| *h <= MAX_GIF_SIDE).ok_or_else(too_large)?;
    match w.checked_mul(h) {
        Some(cells) if cells <= MAX_CANVAS_CELLS => Ok((w as usize, h as usize)),
        _ => Err(too_large()),
    }
}

/// Draw every generation into `sink`, stopping at the size cap.
pub fn render_frames<S: FrameSink>(
    set: &SnapshotSet,
    colors: &ColorTable,
    job: &RenderJob,
    sink: &mut S,
    abort: &AtomicBool,
) -> Result<RenderOutcome, RenderError> {
    let (width, height) = frame_extent(set, job.track);
    let bordered = bordered_extent(width, height)?;

    // keep the magnified frame within GIF limits
    let largest = bordered.0.max(bordered.1) as u64;
    let factor = magnification(width.min(height))
        .min((MAX_GIF_SIDE / largest).max(1)) as u32;

    let background = colors.background();
    let mut canvas = Canvas::filled(bordered.0, bordered.1, background);
    let mut frames = 0;

    for generation in &set.generations {
        if abort.load(Ordering::Relaxed) {
            return Err(RenderError::Aborted);
        }

        canvas.fill(background);
        let (dx, dy) = if job.track {
            (1, 1)
        } else {
            (
                1 + generation.position.x - set.global.x,
                1 + generation.position.y - set.global.y,
            )
        };

        for (i, row) in generation.rows.iter().enumerate() {
            let pixels = row
                .cells()
                .take(bordered.0)
                .map(|state| colors.get(state).ok_or(RenderError::UnknownState(state)))
                .collect::<Result<Vec<_>, _>>()?;
            canvas.blit_row(dx, dy + i as i64, pixels);
        }

        sink.append(&canvas, factor)?;
        frames += 1;

        if sink.encoded_size() > job.size_cap {
            info!(
                "Output reached {} bytes after {} of {} frames; truncating",
                sink.encoded_size(),
                frames,
                set.generations.len()
            );
            return Ok(RenderOutcome {
                frames,
                truncated: true,
            });
        }
    }

    debug!("Rendered {} frames at {}x", frames, factor);
    Ok(RenderOutcome {
        frames,
        truncated: false,
    })
}

/// Render to a looping GIF at `path`.
pub fn render_gif(
    set: &SnapshotSet,
    colors: &ColorTable,
    job: &RenderJob,
    path: &Path,
    abort: &AtomicBool,
) -> Result<RenderOutcome, RenderError> {
    let mut sink = GifFileSink::create(path, frame_duration(job.generations, job.step))?;
    let outcome = render_frames(set, colors, job, &mut sink, abort)?;
    sink.finish()?;
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::{ColorOptions, RuleFamily};
    use crate::snapshot::parse_snapshots;

    /// Sink that records frames and reports a scripted size per frame.
    struct RecordingSink {
        frames: Vec<(Canvas, u32)>,
        bytes_per_frame: u64,
    }

    impl RecordingSink {
        fn new(bytes_per_frame: u64) -> Self {
            Self {
                frames: Vec::new(),
                bytes_per_frame,
            }
        }
    }

    impl FrameSink for RecordingSink {
        fn append(&mut self, canvas: &Canvas, factor: u32) -> Result<(), RenderError> {
            self.frames.push((canvas.clone(), factor));
            Ok(())
        }

        fn encoded_size(&self) -> u64 {
            self.frames.len() as u64 * self.bytes_per_frame
        }

        fn finish(self) -> Result<(), RenderError> {
            Ok(())
        }
    }

    fn two_state() -> ColorTable {
        ColorTable::resolve(&RuleFamily::TwoState, &ColorOptions::default()).unwrap()
    }

    const GLIDER: &str = "(0, 0)\n(3, 3)\nbo$2bo$3o!\n\
                          (0, 1)\n(3, 3)\nobo$b2o$bo!\n\
                          (1, 1)\n(3, 3)\n2bo$obo$b2o!\n";

    #[test]
    fn test_magnification() {
        assert_eq!(magnification(40), 3);
        assert_eq!(magnification(150), 1);
        assert_eq!(magnification(100), 1);
        assert_eq!(magnification(0), 100);
        assert_eq!(magnification(3), 34);
    }

    #[test]
    fn test_frame_duration() {
        assert_eq!(frame_duration(0, 1), Duration::from_secs(1));
        assert_eq!(frame_duration(3000, 1), Duration::from_secs_f64(1.0 / 60.0));
        assert_eq!(frame_duration(10, 1), Duration::from_secs_f64(1.0 / 6.0));
        assert_eq!(frame_duration(100, 1), Duration::from_secs_f64(0.05));
    }

    #[test]
    fn test_fixed_frame_placement() {
        let set = parse_snapshots(GLIDER).unwrap();
        let mut sink = RecordingSink::new(1);
        let job = RenderJob::new(2, 1, false);
        let outcome =
            render_frames(&set, &two_state(), &job, &mut sink, &AtomicBool::new(false)).unwrap();

        assert_eq!(outcome, RenderOutcome { frames: 3, truncated: false });
        // global box is 4x4, plus border
        let (last, factor) = &sink.frames[2];
        assert_eq!((last.width, last.height), (6, 6));
        assert_eq!(*factor, 25);

        // third generation sits at (1, 1): cells land at border + offset
        let fg = [255, 255, 255];
        assert_eq!(last.get(4, 2), Some(fg));
        assert_eq!(last.get(2, 3), Some(fg));
        assert_eq!(last.get(1, 1), Some(crate::color::DEFAULT_BACKGROUND));
        assert_eq!(last.get(0, 0), Some(crate::color::DEFAULT_BACKGROUND));
    }

    #[test]
    fn test_track_mode_uses_largest_generation() {
        let set = parse_snapshots(GLIDER).unwrap();
        let mut sink = RecordingSink::new(1);
        let job = RenderJob::new(2, 1, true);
        render_frames(&set, &two_state(), &job, &mut sink, &AtomicBool::new(false)).unwrap();

        let (last, _) = &sink.frames[2];
        assert_eq!((last.width, last.height), (5, 5));
        // `2bo` row drawn at the fixed border offset
        assert_eq!(last.get(3, 1), Some([255, 255, 255]));
    }

    #[test]
    fn test_truncates_at_size_cap() {
        let set = parse_snapshots(GLIDER).unwrap();
        let mut sink = RecordingSink::new(100);
        // exceeded after the second frame
        let job = RenderJob::new(2, 1, false).with_size_cap(150);
        let outcome =
            render_frames(&set, &two_state(), &job, &mut sink, &AtomicBool::new(false)).unwrap();

        assert_eq!(outcome, RenderOutcome { frames: 2, truncated: true });
        assert_eq!(sink.frames.len(), 2);
    }

    #[test]
    fn test_abort_stops_before_next_frame() {
        let set = parse_snapshots(GLIDER).unwrap();
        let mut sink = RecordingSink::new(1);
        let job = RenderJob::new(2, 1, false);
        let result = render_frames(&set, &two_state(), &job, &mut sink, &AtomicBool::new(true));
        assert!(matches!(result, Err(RenderError::Aborted)));
        assert!(sink.frames.is_empty());
    }

    #[test]
    fn test_oversized_canvas_is_refused() {
        let job = RenderJob::new(0, 1, false);
        for (text, width, height) in [
            ("(0, 0)\n(70000, 1)\no!\n", 70002, 3),
            ("(0, 0)\n(10000, 10000)\no!\n", 10002, 10002),
        ] {
            let set = parse_snapshots(text).unwrap();
            let mut sink = RecordingSink::new(1);
            let result =
                render_frames(&set, &two_state(), &job, &mut sink, &AtomicBool::new(false));
            assert!(
                matches!(result, Err(RenderError::TooLarge { width: w, height: h }) if w == width && h == height),
                "{}",
                text
            );
            assert!(sink.frames.is_empty());
        }
    }

    #[test]
    fn test_unknown_state_fails() {
        let set = parse_snapshots("(0, 0)\n(2, 1)\n.C!\n").unwrap();
        let mut sink = RecordingSink::new(1);
        let job = RenderJob::new(0, 1, false);
        let result = render_frames(&set, &two_state(), &job, &mut sink, &AtomicBool::new(false));
        assert!(matches!(result, Err(RenderError::UnknownState(3))));
    }

    #[test]
    fn test_render_gif_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("5.gif");
        let set = parse_snapshots(GLIDER).unwrap();
        let job = RenderJob::new(2, 1, false);

        let outcome = render_gif(&set, &two_state(), &job, &path, &AtomicBool::new(false)).unwrap();
        assert_eq!(outcome.frames, 3);
        assert!(!outcome.truncated);

        let decoded = image::open(&path).unwrap();
        assert_eq!(decoded.width(), 6 * 25);
        assert_eq!(decoded.height(), 6 * 25);
    }
}
