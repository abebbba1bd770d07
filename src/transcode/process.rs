//! External process boundary.
//!
//! The pipeline never talks to `tokio::process` directly. It asks a
//! [`Launcher`] for a [`ProcessHandle`]: an input sink, an output source, a
//! diagnostics source and a [`ChildProcess`] to kill and reap. The production
//! launcher runs the transcoder; tests substitute programs such as `cat`.

use std::io;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

use futures_util::future::BoxFuture;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

pub type ProcessInput = Box<dyn AsyncWrite + Send + Unpin>;
pub type ProcessOutput = Box<dyn AsyncRead + Send + Unpin>;

/// Fixed transcoder arguments: QSV decode and scale to 854x480, constant
/// quality H.264, audio copied, timestamps preserved, MPEG-TS on stdout.
pub const TRANSCODER_ARGS: &[&str] = &[
    "-hide_banner",
    "-hwaccel", "qsv",
    "-hwaccel_output_format", "qsv",
    "-i", "pipe:0",
    "-vf", "scale_qsv=w=854:h=480",
    "-c:v", "h264_qsv",
    "-rc_mode", "CQP",
    "-q:v", "25",
    "-c:a", "copy",
    "-copyts",
    "-f", "mpegts",
    "pipe:1",
];

/// Control over a running process.
pub trait ChildProcess: Send {
    /// OS process id, if the process is still known to the OS.
    fn id(&self) -> Option<u32>;

    /// Ask the OS to kill the process. Does not wait for it to exit.
    fn start_kill(&mut self) -> io::Result<()>;

    /// Wait for the process to exit and collect its status.
    fn wait(&mut self) -> BoxFuture<'_, io::Result<ExitStatus>>;
}

impl ChildProcess for Child {
    fn id(&self) -> Option<u32> {
        Child::id(self)
    }

    fn start_kill(&mut self) -> io::Result<()> {
        Child::start_kill(self)
    }

    fn wait(&mut self) -> BoxFuture<'_, io::Result<ExitStatus>> {
        Box::pin(Child::wait(self))
    }
}

/// One running process with its three channels.
pub struct ProcessHandle {
    pub input: ProcessInput,
    pub output: ProcessOutput,
    pub diagnostics: ProcessOutput,
    pub child: Box<dyn ChildProcess>,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.child.id())
            .finish_non_exhaustive()
    }
}

/// Starts one process per call. Implementations must never reuse a process.
pub trait Launcher: Send + Sync + 'static {
    fn launch(&self) -> io::Result<ProcessHandle>;
}

/// Program and argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    program: PathBuf,
    args: Vec<String>,
}

impl ProcessSpec {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// The transcoder invocation with its fixed argument vector.
    pub fn transcoder(program: impl Into<PathBuf>) -> Self {
        Self::new(program, TRANSCODER_ARGS.iter().copied())
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

/// Launches a [`ProcessSpec`] with all three standard streams piped.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    spec: ProcessSpec,
}

impl CommandLauncher {
    pub fn new(spec: ProcessSpec) -> Self {
        Self { spec }
    }
}

impl Launcher for CommandLauncher {
    fn launch(&self) -> io::Result<ProcessHandle> {
        let mut child = Command::new(&self.spec.program)
            .args(&self.spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Reaps and kills the child if the session is dropped without `finish`.
            .kill_on_drop(true)
            .spawn()?;

        let input = child.stdin.take().ok_or_else(|| missing_pipe("stdin"))?;
        let output = child.stdout.take().ok_or_else(|| missing_pipe("stdout"))?;
        let diagnostics = child.stderr.take().ok_or_else(|| missing_pipe("stderr"))?;

        Ok(ProcessHandle {
            input: Box::new(input),
            output: Box::new(output),
            diagnostics: Box::new(diagnostics),
            child: Box::new(child),
        })
    }
}

fn missing_pipe(name: &str) -> io::Error {
    io::Error::other(format!("child {} was not captured", name))
}
