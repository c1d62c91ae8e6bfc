//! Detector bridge to an external program
//!
//! The program receives one encoded frame on stdin and prints a JSON object
//! `{"present": bool, "confidence": number}` on stdout.

use super::process::{run_with_deadline, ProcessError};
use crate::collaborators::{Detector, DetectorError};
use crate::types::{Detection, Frame};
use serde::Deserialize;
use std::process::Command;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct DetectorReply {
    present: bool,
    #[serde(default)]
    confidence: f64,
}

#[derive(Debug, Clone)]
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    /// `command` is the program followed by its arguments; `None` when empty
    pub fn new(command: &[String], timeout: Duration) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
            timeout,
        })
    }
}

impl Detector for CommandDetector {
    fn detect(&self, frame: &Frame) -> Result<Detection, DetectorError> {
        let mut command = Command::new(&self.program);
        command.args(&self.args);

        let stdout = run_with_deadline(command, Some(frame.data.clone()), self.timeout).map_err(
            |e| match e {
                ProcessError::Timeout { timeout, .. } => DetectorError::Timeout(timeout),
                other => DetectorError::Failed(other.to_string()),
            },
        )?;
        parse_reply(&stdout)
    }
}

/// Last non-empty stdout line is the verdict; anything before it is ignored
fn parse_reply(stdout: &[u8]) -> Result<Detection, DetectorError> {
    let text = String::from_utf8_lossy(stdout);
    let line = text
        .lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .ok_or_else(|| DetectorError::Failed("detector printed nothing".to_string()))?;
    let reply: DetectorReply = serde_json::from_str(line.trim())
        .map_err(|e| DetectorError::Failed(format!("unreadable detector output: {}", e)))?;

    Ok(Detection {
        present: reply.present,
        confidence: reply.confidence.clamp(0.0, 1.0),
    })
}
