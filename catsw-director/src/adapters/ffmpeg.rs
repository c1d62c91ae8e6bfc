//! Single-frame RTSP grabber backed by the ffmpeg CLI

use super::process::{run_with_deadline, ProcessError};
use crate::collaborators::{FrameError, FrameSource};
use crate::types::{Frame, SourceRef};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

/// Grabs one PNG frame per call with `ffmpeg -frames:v 1`
#[derive(Debug, Clone)]
pub struct FfmpegFrameSource {
    ffmpeg: PathBuf,
    /// Degrees; 180 flips the frame both ways
    rotation: u16,
}

impl FfmpegFrameSource {
    pub fn new(ffmpeg: impl Into<PathBuf>, rotation: u16) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            rotation,
        }
    }

    fn command(&self, source: &SourceRef) -> Command {
        let mut cmd = Command::new(&self.ffmpeg);
        cmd.args(["-hide_banner", "-loglevel", "error"]);
        if source.as_str().starts_with("rtsp://") {
            cmd.args(["-rtsp_transport", "tcp"]);
        }
        cmd.args(["-i", source.as_str(), "-an", "-frames:v", "1"]);
        if self.rotation == 180 {
            cmd.args(["-vf", "hflip,vflip"]);
        }
        cmd.args(["-f", "image2pipe", "-vcodec", "png", "-"]);
        cmd
    }
}

impl FrameSource for FfmpegFrameSource {
    fn latest_frame(&self, source: &SourceRef, timeout: Duration) -> Result<Frame, FrameError> {
        match run_with_deadline(self.command(source), None, timeout) {
            Ok(data) if data.is_empty() => Err(FrameError::Unavailable(format!(
                "ffmpeg returned no frame for {}",
                source
            ))),
            Ok(data) => Ok(Frame::new(data)),
            Err(ProcessError::Timeout { .. }) => Err(FrameError::Timeout(timeout)),
            Err(e) => Err(FrameError::Unavailable(e.to_string())),
        }
    }
}
