use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Command, Stdio};

use image::RgbaImage;
use serde::Deserialize;
use tracing::debug;

use super::{ClipInfo, FrameSource};
use crate::config::Canvas;
use crate::error::BackgroundError;

/// Source geometry and length as reported by ffprobe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbedClip {
    pub width: u32,
    pub height: u32,
    pub duration: f64,
}

pub fn probe_clip(path: &Path) -> Result<ProbedClip, BackgroundError> {
    #[derive(Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
    }
    #[derive(Deserialize)]
    struct ProbeFormat {
        duration: Option<String>,
    }
    #[derive(Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
        format: Option<ProbeFormat>,
    }

    let probe_err = |reason: String| BackgroundError::Probe {
        path: path.to_path_buf(),
        reason,
    };

    if !path.is_file() {
        return Err(probe_err("no such file".into()));
    }

    let out = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .map_err(|e| probe_err(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(probe_err(
            String::from_utf8_lossy(&out.stderr).trim().to_string(),
        ));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| probe_err(format!("ffprobe json parse failed: {e}")))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| probe_err("no video stream found".into()))?;
    let (width, height) = match (video.width, video.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err(probe_err("missing video dimensions".into())),
    };
    let duration = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| probe_err("missing or zero duration".into()))?;

    Ok(ProbedClip {
        width,
        height,
        duration,
    })
}

/// Decodes a video file through an ffmpeg pipe, already scaled and cropped to the canvas
/// and resampled to the pipeline frame rate.
///
/// Frames are read sequentially. Asking for an earlier frame restarts the decoder
/// with an input seek, which is what happens at every loop boundary.
pub struct FfmpegFrameSource {
    path: PathBuf,
    canvas: Canvas,
    fps: u32,
    frame_count: u64,
    child: Option<Child>,
    stdout: Option<ChildStdout>,
    next: u64,
    last: Option<(u64, RgbaImage)>,
    /// Set at the first early EOF: frames decodable, and the frame repeated past them.
    tail: Option<(u64, RgbaImage)>,
    spawns: u64,
}

impl FfmpegFrameSource {
    pub fn open(path: &Path, canvas: Canvas, fps: u32) -> Result<Self, BackgroundError> {
        if fps == 0 {
            return Err(BackgroundError::ZeroFps);
        }
        let probed = probe_clip(path)?;
        let frame_count = ((probed.duration * fps as f64).floor() as u64).max(1);
        debug!(
            "Probed {}: {}x{} {:.3}s -> {} frames at {} fps",
            path.display(),
            probed.width,
            probed.height,
            probed.duration,
            frame_count,
            fps
        );
        Ok(Self {
            path: path.to_path_buf(),
            canvas,
            fps,
            frame_count,
            child: None,
            stdout: None,
            next: 0,
            last: None,
            tail: None,
            spawns: 0,
        })
    }

    fn filter(&self) -> String {
        let Canvas { width, height } = self.canvas;
        format!(
            "scale={width}:{height}:force_original_aspect_ratio=increase,crop={width}:{height},fps={}",
            self.fps
        )
    }

    fn restart(&mut self, index: u64) -> Result<(), BackgroundError> {
        self.stop();
        let mut cmd = Command::new("ffmpeg");
        cmd.args(["-v", "error", "-nostdin"]);
        if index > 0 {
            cmd.args(["-ss", &format!("{:.6}", index as f64 / self.fps as f64)]);
        }
        cmd.arg("-i")
            .arg(&self.path)
            .args(["-an", "-vf", &self.filter()])
            .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        let mut child = cmd
            .spawn()
            .map_err(|e| BackgroundError::Decode(format!("failed to spawn ffmpeg: {e}")))?;
        self.stdout = child.stdout.take();
        self.child = Some(child);
        self.next = index;
        self.spawns += 1;
        Ok(())
    }

    fn read_next(&mut self) -> Result<Option<RgbaImage>, BackgroundError> {
        let Some(stdout) = self.stdout.as_mut() else {
            return Err(BackgroundError::Decode("decoder not running".into()));
        };
        let len = self.canvas.width as usize * self.canvas.height as usize * 4;
        let mut buf = vec![0u8; len];
        match stdout.read_exact(&mut buf) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let frame = RgbaImage::from_raw(self.canvas.width, self.canvas.height, buf)
            .ok_or_else(|| BackgroundError::Decode("short frame buffer".into()))?;
        Ok(Some(frame))
    }

    fn stop(&mut self) {
        self.stdout = None;
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

impl FrameSource for FfmpegFrameSource {
    fn info(&self) -> ClipInfo {
        ClipInfo {
            width: self.canvas.width,
            height: self.canvas.height,
            frame_count: self.frame_count,
        }
    }

    fn frame(&mut self, index: u64) -> Result<RgbaImage, BackgroundError> {
        if index >= self.frame_count {
            return Err(BackgroundError::OutOfRange {
                index,
                len: self.frame_count,
            });
        }
        if let Some((at, img)) = &self.last {
            if *at == index {
                return Ok(img.clone());
            }
        }
        if let Some((decodable, img)) = &self.tail {
            if index >= *decodable {
                return Ok(img.clone());
            }
        }
        if self.child.is_none() || index < self.next {
            self.restart(index)?;
        }
        while self.next <= index {
            match self.read_next()? {
                Some(frame) => {
                    self.last = Some((self.next, frame));
                    self.next += 1;
                }
                // Probed duration can overshoot the decodable frames by one or two.
                None => match self.last.take() {
                    Some((_, img)) => {
                        debug!(
                            "{} ends after {} of {} frames",
                            self.path.display(),
                            self.next,
                            self.frame_count
                        );
                        self.tail = Some((self.next, img.clone()));
                        self.last = Some((index, img.clone()));
                        self.stop();
                        return Ok(img);
                    }
                    None => {
                        return Err(BackgroundError::Decode(format!(
                            "no frames decoded from '{}'",
                            self.path.display()
                        )));
                    }
                },
            }
        }
        self.last
            .as_ref()
            .map(|(_, img)| img.clone())
            .ok_or_else(|| BackgroundError::Decode("decoder produced no frame".into()))
    }
}

impl Drop for FfmpegFrameSource {
    fn drop(&mut self) {
        debug!("Decoder for {} spawned {} times", self.path.display(), self.spawns);
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_of_missing_file_is_a_probe_error() {
        let err = probe_clip(Path::new("/nonexistent/bg.mp4")).unwrap_err();
        assert!(matches!(err, BackgroundError::Probe { .. }));
        assert!(err.to_string().contains("bg.mp4"));
    }

    fn ffmpeg_tools_available() -> bool {
        ["ffmpeg", "ffprobe"].iter().all(|tool| {
            Command::new(tool)
                .arg("-version")
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .map(|s| s.success())
                .unwrap_or(false)
        })
    }

    #[test]
    fn frames_past_the_decodable_end_repeat_without_respawning() {
        if !ffmpeg_tools_available() {
            eprintln!("skipping: ffmpeg/ffprobe not available");
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("red.mp4");
        let status = Command::new("ffmpeg")
            .args(["-v", "error", "-y", "-f", "lavfi", "-i", "color=c=red:s=16x16:r=24:d=1"])
            .args(["-pix_fmt", "yuv420p", "-c:v", "libx264"])
            .arg(&clip)
            .status()
            .unwrap();
        assert!(status.success());

        let canvas = Canvas {
            width: 16,
            height: 16,
        };
        let mut src = FfmpegFrameSource::open(&clip, canvas, 24).unwrap();
        // Pretend the container claims more frames than the stream holds.
        src.frame_count += 6;
        let count = src.info().frame_count;
        let frames: Vec<RgbaImage> = (0..count).map(|i| src.frame(i).unwrap()).collect();

        let decodable = src.tail.as_ref().map(|(n, _)| *n).unwrap();
        assert!(decodable < count);
        assert!(frames[decodable as usize..].iter().all(|f| f == &frames[decodable as usize - 1]));
        assert_eq!(src.spawns, 1);

        // The next loop restarts once and still serves the tail from cache.
        src.frame(0).unwrap();
        for i in decodable..count {
            src.frame(i).unwrap();
        }
        assert_eq!(src.spawns, 2);
    }

    #[test]
    fn open_rejects_zero_fps() {
        let err = FfmpegFrameSource::open(Path::new("x.mp4"), Canvas::default(), 0);
        assert!(matches!(err, Err(BackgroundError::ZeroFps)));
    }
}
