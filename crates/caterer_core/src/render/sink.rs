//! Destinations for rendered frames.

use super::canvas::Canvas;
use super::RenderError;
use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, Frame};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Quantizer speed handed to the GIF encoder (1 = best, 30 = fastest).
const GIF_SPEED: i32 = 10;

/// Receives frames in order and reports how large the output has grown.
pub trait FrameSink {
    /// Encode one frame, magnified by `factor`.
    fn append(&mut self, canvas: &Canvas, factor: u32) -> Result<(), RenderError>;

    /// Bytes of encoded output so far.
    fn encoded_size(&self) -> u64;

    /// Flush and close the output.
    fn finish(self) -> Result<(), RenderError>
    where
        Self: Sized;
}

/// Writer that counts the bytes passing through it.
struct CountingWriter<W> {
    inner: W,
    written: Arc<AtomicU64>,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written.fetch_add(n as u64, Ordering::Relaxed);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Looping animated GIF written straight to a file.
pub struct GifFileSink {
    encoder: GifEncoder<CountingWriter<File>>,
    written: Arc<AtomicU64>,
    delay: Delay,
}

impl GifFileSink {
    /// Create the file and write the GIF header.
    pub fn create(path: &Path, frame_duration: Duration) -> Result<Self, RenderError> {
        let written = Arc::new(AtomicU64::new(0));
        let writer = CountingWriter {
            inner: File::create(path)?,
            written: written.clone(),
        };
        let mut encoder = GifEncoder::new_with_speed(writer, GIF_SPEED);
        encoder.set_repeat(Repeat::Infinite)?;
        Ok(Self {
            encoder,
            written,
            delay: Delay::from_saturating_duration(frame_duration),
        })
    }
}

impl FrameSink for GifFileSink {
    fn append(&mut self, canvas: &Canvas, factor: u32) -> Result<(), RenderError> {
        let frame = Frame::from_parts(canvas.to_image(factor), 0, 0, self.delay);
        self.encoder.encode_frame(frame)?;
        Ok(())
    }

    fn encoded_size(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }

    fn finish(self) -> Result<(), RenderError> {
        // dropping the encoder writes the trailer
        drop(self.encoder);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gif_sink_writes_animation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("1.gif");

        let mut sink = GifFileSink::create(&path, Duration::from_millis(100)).unwrap();
        let mut canvas = Canvas::filled(4, 4, [54, 57, 62]);
        sink.append(&canvas, 2).unwrap();
        let after_one = sink.encoded_size();
        assert!(after_one > 0);

        canvas.blit_row(1, 1, [[255, 255, 255]]);
        sink.append(&canvas, 2).unwrap();
        assert!(sink.encoded_size() > after_one);
        sink.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"GIF89a"));
        assert_eq!(bytes.last(), Some(&0x3b));
    }
}
