//! Frame sinks: where composited frames go once the timeline is assembled.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use image::RgbaImage;
use tracing::debug;

use crate::error::EncodeError;

/// Passed to [`FrameSink::begin`] once per run.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkConfig {
    pub out_path: PathBuf,
    /// Soundtrack muxed under the frames.
    pub audio_path: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Total length in seconds; the output is cut to exactly this.
    pub duration: f64,
}

/// Consumes frames in strictly increasing index order.
pub trait FrameSink: Send {
    fn begin(&mut self, cfg: SinkConfig) -> Result<(), EncodeError>;
    fn push_frame(&mut self, index: u64, frame: &RgbaImage) -> Result<(), EncodeError>;
    fn end(&mut self) -> Result<(), EncodeError>;

    /// Tears down after a failed run. The output file is the caller's to remove.
    fn abort(&mut self) {}
}

/// Streams raw RGBA frames into a system `ffmpeg` producing H.264/AAC MP4.
#[derive(Default)]
pub struct FfmpegSink {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
    scratch: Vec<u8>,
    cfg: Option<SinkConfig>,
    last_index: Option<u64>,
}

impl FfmpegSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FrameSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> Result<(), EncodeError> {
        if cfg.fps == 0 {
            return Err(EncodeError::Settings("fps must be non-zero".into()));
        }
        if cfg.width == 0 || cfg.height == 0 {
            return Err(EncodeError::Settings("width/height must be non-zero".into()));
        }
        if !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2) {
            return Err(EncodeError::Settings(
                "width/height must be even (required for yuv420p mp4 output)".into(),
            ));
        }
        ensure_parent_dir(&cfg.out_path)?;
        if !is_ffmpeg_on_path() {
            return Err(EncodeError::FfmpegMissing);
        }

        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.args(["-y", "-loglevel", "error"]);
        cmd.args([
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &cfg.fps.to_string(),
            "-i",
            "pipe:0",
        ]);
        if let Some(audio) = &cfg.audio_path {
            cmd.arg("-i").arg(audio).args(["-c:a", "aac"]);
        } else {
            cmd.arg("-an");
        }
        cmd.args([
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-r",
            &cfg.fps.to_string(),
            "-t",
            &format!("{:.6}", cfg.duration),
            "-movflags",
            "+faststart",
            "-f",
            "mp4",
        ]);
        cmd.arg(&cfg.out_path);

        debug!("Spawning ffmpeg for {}", cfg.out_path.display());
        let mut child = cmd
            .spawn()
            .map_err(|e| EncodeError::Ffmpeg(format!("failed to spawn ffmpeg: {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EncodeError::Ffmpeg("failed to open ffmpeg stdin".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| EncodeError::Ffmpeg("failed to open ffmpeg stderr".into()))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        self.scratch = vec![0u8; cfg.width as usize * cfg.height as usize * 4];
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.last_index = None;
        Ok(())
    }

    fn push_frame(&mut self, index: u64, frame: &RgbaImage) -> Result<(), EncodeError> {
        let cfg = self.cfg.as_ref().ok_or(EncodeError::NotStarted)?;
        if self.last_index.is_some_and(|last| index <= last) {
            return Err(EncodeError::Ffmpeg(format!(
                "out-of-order frame index {index}"
            )));
        }
        if frame.width() != cfg.width || frame.height() != cfg.height {
            return Err(EncodeError::FrameSize {
                got_w: frame.width(),
                got_h: frame.height(),
                want_w: cfg.width,
                want_h: cfg.height,
            });
        }
        self.last_index = Some(index);

        flatten_over_black(&mut self.scratch, frame.as_raw());
        let stdin = self.stdin.as_mut().ok_or(EncodeError::NotStarted)?;
        if let Err(e) = stdin.write_all(&self.scratch) {
            self.abort();
            return Err(EncodeError::Ffmpeg(format!(
                "failed to write frame to ffmpeg stdin: {e}"
            )));
        }
        Ok(())
    }

    fn end(&mut self) -> Result<(), EncodeError> {
        drop(self.stdin.take());
        let mut child = self.child.take().ok_or(EncodeError::NotStarted)?;
        let status = child.wait()?;
        let stderr = match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| EncodeError::Ffmpeg("stderr drain thread panicked".into()))??,
            None => Vec::new(),
        };
        self.cfg = None;
        if !status.success() {
            return Err(EncodeError::Ffmpeg(format!(
                "exited with status {}: {}",
                status,
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.stdin = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        self.stderr_drain = None;
        self.cfg = None;
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        if self.child.is_some() {
            self.abort();
        }
    }
}

// Straight alpha over opaque black.
fn flatten_over_black(dst: &mut [u8], src: &[u8]) {
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = s[3] as u16;
        if a == 255 {
            d.copy_from_slice(s);
            continue;
        }
        for i in 0..3 {
            d[i] = ((s[i] as u16 * a + 127) / 255) as u8;
        }
        d[3] = 255;
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<(), EncodeError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// What an [`InMemorySink`] saw.
#[derive(Debug, Clone, Default)]
pub struct Captured {
    pub config: Option<SinkConfig>,
    pub frame_count: u64,
    pub first: Option<RgbaImage>,
    pub last: Option<RgbaImage>,
    /// Every frame, only when created with [`InMemorySink::keeping_frames`].
    pub frames: Vec<RgbaImage>,
    pub finished: bool,
}

/// Records frames instead of encoding them. `end` leaves an empty file at the output path.
#[derive(Debug, Clone, Default)]
pub struct InMemorySink {
    captured: Arc<Mutex<Captured>>,
    keep_frames: bool,
    fail_at: Option<u64>,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keeping_frames() -> Self {
        Self {
            keep_frames: true,
            ..Self::default()
        }
    }

    /// Fails on frame `index`, for exercising encoder error paths.
    pub fn failing_at(index: u64) -> Self {
        Self {
            fail_at: Some(index),
            ..Self::default()
        }
    }

    /// Shared view of the recorded state, usable after the sink is moved away.
    pub fn captured(&self) -> Arc<Mutex<Captured>> {
        Arc::clone(&self.captured)
    }

    fn with<R>(&self, f: impl FnOnce(&mut Captured) -> R) -> R {
        let mut guard = self
            .captured
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl FrameSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> Result<(), EncodeError> {
        self.with(|c| {
            *c = Captured {
                config: Some(cfg),
                ..Captured::default()
            }
        });
        Ok(())
    }

    fn push_frame(&mut self, index: u64, frame: &RgbaImage) -> Result<(), EncodeError> {
        if self.fail_at == Some(index) {
            return Err(EncodeError::Ffmpeg(format!("injected failure at frame {index}")));
        }
        let keep = self.keep_frames;
        self.with(|c| {
            let cfg = c.config.as_ref().ok_or(EncodeError::NotStarted)?;
            if index != c.frame_count {
                return Err(EncodeError::Ffmpeg(format!(
                    "expected frame {}, got {index}",
                    c.frame_count
                )));
            }
            if frame.dimensions() != (cfg.width, cfg.height) {
                return Err(EncodeError::FrameSize {
                    got_w: frame.width(),
                    got_h: frame.height(),
                    want_w: cfg.width,
                    want_h: cfg.height,
                });
            }
            if c.first.is_none() {
                c.first = Some(frame.clone());
            }
            c.last = Some(frame.clone());
            if keep {
                c.frames.push(frame.clone());
            }
            c.frame_count += 1;
            Ok(())
        })
    }

    fn end(&mut self) -> Result<(), EncodeError> {
        let out = self.with(|c| {
            c.finished = true;
            c.config.as_ref().map(|cfg| cfg.out_path.clone())
        });
        let out = out.ok_or(EncodeError::NotStarted)?;
        ensure_parent_dir(&out)?;
        std::fs::write(&out, b"")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn cfg(out: PathBuf) -> SinkConfig {
        SinkConfig {
            out_path: out,
            audio_path: None,
            width: 4,
            height: 2,
            fps: 24,
            duration: 1.0,
        }
    }

    #[test]
    fn flatten_keeps_opaque_and_darkens_translucent() {
        let src = [10u8, 20, 30, 255, 200, 100, 50, 0, 200, 100, 50, 128];
        let mut dst = [0u8; 12];
        flatten_over_black(&mut dst, &src);
        assert_eq!(&dst[..4], &[10, 20, 30, 255]);
        assert_eq!(&dst[4..8], &[0, 0, 0, 255]);
        assert_eq!(&dst[8..], &[100, 50, 25, 255]);
    }

    #[test]
    fn ffmpeg_sink_rejects_odd_sizes_before_spawning() {
        let mut sink = FfmpegSink::new();
        let mut c = cfg(std::env::temp_dir().join("storyreel-odd.mp4"));
        c.width = 5;
        assert!(matches!(sink.begin(c), Err(EncodeError::Settings(_))));
        let frame = RgbaImage::new(4, 2);
        assert!(matches!(
            sink.push_frame(0, &frame),
            Err(EncodeError::NotStarted)
        ));
    }

    #[test]
    fn in_memory_sink_checks_order_and_size() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sink.mp4");
        let mut sink = InMemorySink::keeping_frames();
        let captured = sink.captured();
        sink.begin(cfg(out.clone())).unwrap();
        let frame = RgbaImage::from_pixel(4, 2, Rgba([1, 2, 3, 255]));
        sink.push_frame(0, &frame).unwrap();
        sink.push_frame(1, &frame).unwrap();
        assert!(sink.push_frame(5, &frame).is_err());
        assert!(matches!(
            sink.push_frame(2, &RgbaImage::new(2, 2)),
            Err(EncodeError::FrameSize { .. })
        ));
        sink.end().unwrap();

        let c = captured.lock().unwrap();
        assert_eq!(c.frame_count, 2);
        assert_eq!(c.frames.len(), 2);
        assert!(c.finished);
        assert!(out.exists());
    }
}
