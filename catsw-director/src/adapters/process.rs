//! Run a child process with a hard deadline
//!
//! stdin is fed and stdout drained on helper threads so a child that stops
//! reading or writing can never wedge the caller. A child still running at
//! the deadline is killed and reaped.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

const WAIT_POLL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} still running after {timeout:?}, killed")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },

    #[error("waiting for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// Run `command` to completion and return its stdout
///
/// `input` is written to the child's stdin, which is then closed.
pub fn run_with_deadline(
    mut command: Command,
    input: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<Vec<u8>, ProcessError> {
    let program = command.get_program().to_string_lossy().into_owned();
    let deadline = Instant::now() + timeout;

    command
        .stdin(if input.is_some() { Stdio::piped() } else { Stdio::null() })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.clone(),
        source,
    })?;

    if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
        // Broken pipe just means the child did not want all of it.
        thread::spawn(move || {
            let _ = stdin.write_all(&input);
        });
    }
    let stdout = child.stdout.take().map(|mut out| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = out.read_to_end(&mut buf);
            buf
        })
    });
    let stderr = child.stderr.take().map(|mut err| {
        thread::spawn(move || {
            let mut buf = String::new();
            let _ = err.read_to_string(&mut buf);
            buf
        })
    });

    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if Instant::now() >= deadline => {
                kill_and_reap(&mut child);
                return Err(ProcessError::Timeout { program, timeout });
            }
            Ok(None) => thread::sleep(WAIT_POLL),
            Err(source) => {
                kill_and_reap(&mut child);
                return Err(ProcessError::Wait { program, source });
            }
        }
    };

    // The pipes close once the child has exited, so these joins return.
    let output = stdout.and_then(|t| t.join().ok()).unwrap_or_default();
    if !status.success() {
        let stderr = stderr.and_then(|t| t.join().ok()).unwrap_or_default();
        return Err(ProcessError::Failed {
            program,
            status,
            stderr: last_line(&stderr),
        });
    }
    Ok(output)
}

fn last_line(text: &str) -> String {
    text.lines()
        .rev()
        .find(|l| !l.trim().is_empty())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// Kill the child and collect its exit status so no zombie is left
fn kill_and_reap(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}
