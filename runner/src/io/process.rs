//! Child processes for the compiler and for exercise cases.
//!
//! Every child gets a deadline and a cap on how much of its output is kept, so
//! a runaway exercise or a wedged compiler never blocks the runner.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes kept from one output stream, plus how many were dropped past the cap.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    /// Lossy text of the kept bytes, with a notice line when some were dropped.
    pub fn text(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.bytes).into_owned();
        if self.dropped > 0 {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&format!("[output truncated {} bytes]\n", self.dropped));
        }
        text
    }
}

/// How a child process ended and what it printed.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    /// The child outlived its deadline and was killed.
    pub timed_out: bool,
}

impl ProcessOutcome {
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.status.success()
    }
}

/// Run `cmd` to completion or until `timeout` elapses, whichever comes first.
///
/// Both pipes are drained on their own threads while the child runs, keeping at
/// most `keep_bytes` of each. Spawn and wait failures are errors; a non-zero
/// exit or a timeout is reported in the outcome.
#[instrument(skip_all, fields(program = ?cmd.get_program(), timeout_ms = timeout.as_millis() as u64))]
pub fn run_with_deadline(
    mut cmd: Command,
    timeout: Duration,
    keep_bytes: usize,
) -> Result<ProcessOutcome> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let program = cmd.get_program().to_string_lossy().into_owned();
    let mut child = cmd.spawn().map_err(|err| {
        error!(err = %err, program = %program, "failed to spawn");
        anyhow::Error::new(err).context(format!("spawn {program}"))
    })?;

    let (stdout, stderr) = drain_pipes(&mut child, keep_bytes)?;
    let (status, timed_out) = wait_or_kill(&mut child, timeout)?;
    let stdout = collect(stdout).context("collect stdout")?;
    let stderr = collect(stderr).context("collect stderr")?;

    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "child output exceeded the capture limit"
        );
    }
    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(ProcessOutcome {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

type Drain = JoinHandle<Result<Captured>>;

fn drain_pipes(child: &mut Child, keep_bytes: usize) -> Result<(Drain, Drain)> {
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("child stdout is not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("child stderr is not piped"))?;
    Ok((
        thread::spawn(move || capture(stdout, keep_bytes)),
        thread::spawn(move || capture(stderr, keep_bytes)),
    ))
}

fn wait_or_kill(child: &mut Child, timeout: Duration) -> Result<(ExitStatus, bool)> {
    if let Some(status) = child.wait_timeout(timeout).context("wait for child")? {
        return Ok((status, false));
    }
    warn!(timeout_ms = timeout.as_millis() as u64, "deadline passed, killing child");
    child.kill().context("kill child")?;
    let status = child.wait().context("reap killed child")?;
    Ok((status, true))
}

fn collect(handle: Drain) -> Result<Captured> {
    handle
        .join()
        .map_err(|_| anyhow!("output reader thread panicked"))?
}

/// Read `reader` to the end, keeping the first `keep_bytes` bytes.
fn capture<R: Read>(mut reader: R, keep_bytes: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read child output")?;
        if n == 0 {
            return Ok(captured);
        }
        let room = keep_bytes.saturating_sub(captured.bytes.len()).min(n);
        captured.bytes.extend_from_slice(&chunk[..room]);
        captured.dropped += n - room;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    #[test]
    fn captures_both_streams() {
        let outcome = run_with_deadline(sh("echo out; echo err >&2"), Duration::from_secs(5), 1024)
            .expect("run");
        assert!(outcome.succeeded());
        assert_eq!(outcome.stdout.text(), "out\n");
        assert_eq!(outcome.stderr.text(), "err\n");
    }

    #[test]
    fn drops_bytes_past_the_cap() {
        let outcome =
            run_with_deadline(sh("printf 'abcdefgh'"), Duration::from_secs(5), 4).expect("run");
        assert_eq!(
            outcome.stdout,
            Captured {
                bytes: b"abcd".to_vec(),
                dropped: 4,
            }
        );
        assert_eq!(outcome.stdout.text(), "abcd\n[output truncated 4 bytes]\n");
    }

    #[test]
    fn nonzero_exit_is_not_success() {
        let outcome = run_with_deadline(sh("exit 3"), Duration::from_secs(5), 1024).expect("run");
        assert!(!outcome.succeeded());
        assert!(!outcome.timed_out);
        assert_eq!(outcome.status.code(), Some(3));
    }

    #[test]
    fn kills_after_the_deadline() {
        let outcome =
            run_with_deadline(sh("sleep 5"), Duration::from_millis(200), 1024).expect("run");
        assert!(outcome.timed_out);
        assert!(!outcome.succeeded());
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_with_deadline(
            Command::new("definitely-not-a-real-program-koans"),
            Duration::from_secs(1),
            1024,
        )
        .expect_err("spawn should fail");
        assert!(format!("{err:#}").contains("spawn"));
    }
}
