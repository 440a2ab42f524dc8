//! Child processes with a wall-clock timeout and bounded output capture.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

use crate::core::result_code;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60 * 60);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 4_000_000;

/// Bounds applied to every child process the crate spawns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessLimits {
    pub timeout: Duration,
    /// Bytes of stdout (and, separately, stderr) kept in memory.
    pub output_limit_bytes: usize,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }
}

/// What a finished (or killed) child left behind.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exit code mapped onto the crate's result-code convention.
    ///
    /// A timeout or a signal-terminated child is an infrastructure failure.
    pub fn result_code(&self) -> i32 {
        if self.timed_out {
            return result_code::INFRASTRUCTURE_FAILURE;
        }
        self.status
            .code()
            .unwrap_or(result_code::INFRASTRUCTURE_FAILURE)
    }

    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Stdout followed by stderr, with truncation and timeout notices.
    pub fn combined_text(&self) -> String {
        let mut buf = String::from_utf8_lossy(&self.stdout).into_owned();
        if self.stdout_truncated > 0 {
            buf.push_str(&format!(
                "\n[stdout truncated {} bytes]\n",
                self.stdout_truncated
            ));
        }
        if !self.stderr.is_empty() {
            if !buf.is_empty() && !buf.ends_with('\n') {
                buf.push('\n');
            }
            buf.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        if self.stderr_truncated > 0 {
            buf.push_str(&format!(
                "\n[stderr truncated {} bytes]\n",
                self.stderr_truncated
            ));
        }
        if self.timed_out {
            buf.push_str("\n[command timed out]\n");
        }
        buf
    }
}

/// Build a command that runs `command_line` through the platform shell.
pub fn shell_command(command_line: &str) -> Command {
    if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command_line);
        cmd
    } else {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command_line);
        cmd
    }
}

/// Join argv into one command line for [`shell_command`].
///
/// A single argument is taken as a complete shell command line and passed
/// through untouched. Several arguments are quoted one by one so the shell
/// sees the same argument boundaries.
pub fn shell_join(argv: &[String]) -> String {
    match argv {
        [line] => line.clone(),
        args => args
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if plain {
        return arg.to_string();
    }
    if cfg!(windows) {
        format!("\"{}\"", arg.replace('"', "\\\""))
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// Build a command from an argv vector.
pub fn argv_command(argv: &[String]) -> Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("command must not be empty"))?;
    let mut cmd = Command::new(program);
    cmd.args(args);
    Ok(cmd)
}

/// Spawn `cmd`, wait up to `limits.timeout`, and capture both output streams.
///
/// Each stream is drained on its own thread while the child runs so a chatty
/// child never blocks on a full pipe. Bytes past `limits.output_limit_bytes`
/// are counted and dropped.
///
/// On unix the child leads its own process group, and a timeout kills the
/// whole group so processes forked by a shell script cannot keep the pipes
/// open. Elsewhere only the direct child is killed.
#[instrument(
    skip_all,
    fields(program = ?cmd.get_program(), timeout_secs = limits.timeout.as_secs())
)]
pub fn run_command_with_timeout(
    mut cmd: Command,
    limits: &ProcessLimits,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let mut child = cmd.spawn().map_err(|err| {
        error!(%err, "spawn failed");
        anyhow::Error::new(err).context(format!("spawn {:?}", cmd.get_program()))
    })?;

    let limit = limits.output_limit_bytes;
    let stdout_reader = spawn_reader("stdout", child.stdout.take(), limit)?;
    let stderr_reader = spawn_reader("stderr", child.stderr.take(), limit)?;

    let (status, timed_out) = match child.wait_timeout(limits.timeout).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!("timeout elapsed, killing child");
            kill_tree(&mut child)?;
            (child.wait().context("reap killed child")?, true)
        }
    };

    let stdout = finish_reader(stdout_reader).context("collect stdout")?;
    let stderr = finish_reader(stderr_reader).context("collect stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "output exceeded limit"
        );
    }

    debug!(code = ?status.code(), timed_out, "child exited");
    Ok(CommandOutput {
        status,
        stdout: stdout.bytes,
        stderr: stderr.bytes,
        stdout_truncated: stdout.dropped,
        stderr_truncated: stderr.dropped,
        timed_out,
    })
}

#[cfg(unix)]
fn kill_tree(child: &mut Child) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let pgid = i32::try_from(child.id()).context("child pid out of range")?;
    match killpg(Pid::from_raw(pgid), Signal::SIGKILL) {
        // ESRCH: every member already exited.
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(err) => Err(anyhow::Error::new(err).context("kill process group")),
    }
}

#[cfg(not(unix))]
fn kill_tree(child: &mut Child) -> Result<()> {
    child.kill().context("kill child")
}

/// Bytes kept from one stream and the count that did not fit.
struct Captured {
    bytes: Vec<u8>,
    dropped: usize,
}

type Reader = thread::JoinHandle<Result<Captured>>;

fn spawn_reader<R: Read + Send + 'static>(
    name: &str,
    pipe: Option<R>,
    limit: usize,
) -> Result<Reader> {
    let pipe = pipe.ok_or_else(|| anyhow!("{name} is not piped"))?;
    thread::Builder::new()
        .name(format!("covrun-{name}"))
        .spawn(move || capture(pipe, limit))
        .with_context(|| format!("spawn {name} reader"))
}

fn finish_reader(reader: Reader) -> Result<Captured> {
    reader
        .join()
        .unwrap_or_else(|_| Err(anyhow!("reader thread panicked")))
}

fn capture<R: Read>(mut pipe: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured {
        bytes: Vec::new(),
        dropped: 0,
    };
    let mut chunk = [0u8; 8192];
    loop {
        let read = pipe.read(&mut chunk).context("read pipe")?;
        if read == 0 {
            return Ok(captured);
        }
        let room = limit.saturating_sub(captured.bytes.len()).min(read);
        captured.bytes.extend_from_slice(&chunk[..room]);
        captured.dropped += read - room;
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Instant;

    use super::*;

    #[test]
    fn captures_exit_code_and_output() {
        let output = run_command_with_timeout(
            shell_command("echo hello; echo oops >&2; exit 3"),
            &ProcessLimits::default(),
        )
        .expect("run");
        assert_eq!(output.result_code(), 3);
        assert_eq!(output.stdout_text(), "hello\n");
        assert_eq!(output.combined_text(), "hello\noops\n");
    }

    #[test]
    fn truncates_beyond_limit() {
        let limits = ProcessLimits {
            output_limit_bytes: 4,
            ..ProcessLimits::default()
        };
        let output =
            run_command_with_timeout(shell_command("printf 0123456789"), &limits).expect("run");
        assert_eq!(output.stdout, b"0123");
        assert_eq!(output.stdout_truncated, 6);
        assert!(output.combined_text().contains("[stdout truncated 6 bytes]"));
    }

    #[test]
    fn timeout_is_infrastructure_failure() {
        let limits = ProcessLimits {
            timeout: Duration::from_millis(100),
            ..ProcessLimits::default()
        };
        let output = run_command_with_timeout(shell_command("exec sleep 5"), &limits).expect("run");
        assert!(output.timed_out);
        assert_eq!(output.result_code(), result_code::INFRASTRUCTURE_FAILURE);
    }

    #[test]
    fn timeout_kills_processes_forked_by_the_shell() {
        let limits = ProcessLimits {
            timeout: Duration::from_millis(200),
            ..ProcessLimits::default()
        };
        let started = Instant::now();
        let output =
            run_command_with_timeout(shell_command("sleep 4; echo done"), &limits).expect("run");
        assert!(output.timed_out);
        assert!(started.elapsed() < Duration::from_secs(2), "{:?}", started.elapsed());
        assert!(!output.stdout_text().contains("done"));
    }

    #[test]
    fn spawn_failure_is_an_error() {
        let err = run_command_with_timeout(
            Command::new("covrun-definitely-missing-binary"),
            &ProcessLimits::default(),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("spawn"));
    }

    #[test]
    fn shell_join_keeps_argument_boundaries() {
        let argv: Vec<String> = ["printf", "%s|", "a b", "it's", ""]
            .into_iter()
            .map(String::from)
            .collect();
        let line = shell_join(&argv);
        assert_eq!(line, "printf '%s|' 'a b' 'it'\\''s' ''");

        let output =
            run_command_with_timeout(shell_command(&line), &ProcessLimits::default()).expect("run");
        assert_eq!(output.stdout_text(), "a b|it's||");
    }

    #[test]
    fn shell_join_passes_single_argument_through() {
        let argv = vec!["echo tests ran; exit 3".to_string()];
        assert_eq!(shell_join(&argv), "echo tests ran; exit 3");
    }

    #[test]
    fn argv_command_rejects_empty() {
        assert!(argv_command(&[]).is_err());
    }
}
