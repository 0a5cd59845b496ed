//! External process adapters: the analysis worker and the upload preprocessor.

use crate::ports::preprocess::VideoPreprocessor;
use crate::ports::worker::{WorkerError, WorkerEvent, WorkerHandle, WorkerPort};
use async_trait::async_trait;
use std::io;
use std::path::Path;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Buffered worker events before the supervisor waits on the consumer
const EVENT_BUFFER: usize = 256;

/// Longest output line kept. The rest of a longer line is discarded.
const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Program plus leading arguments. The input path is appended last.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Whitespace separated, no quoting.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace().map(String::from);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .env("PYTHONUNBUFFERED", "1")
            .stdin(Stdio::null());
        command
    }
}

/// Runs the analysis worker as a child process.
#[derive(Clone, Debug)]
pub struct ProcessWorker {
    command: CommandLine,
}

impl ProcessWorker {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

#[async_trait]
impl WorkerPort for ProcessWorker {
    async fn start(&self, input: &Path) -> Result<WorkerHandle, WorkerError> {
        let mut child = self
            .command
            .command()
            .arg(input)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let pid = child.id();
        info!(
            "Spawned worker {} (pid {:?}) on {:?}",
            self.command.program, pid, input
        );

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(pid, stderr));
        }
        let stdout = child.stdout.take();
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        tokio::spawn(supervise(child, stdout, tx));

        Ok(WorkerHandle::new(pid, rx))
    }
}

/// Forwards stdout line by line, then reports the exit code. Stdout is read
/// to EOF before waiting on the child so the tail is never dropped.
async fn supervise(mut child: Child, stdout: Option<ChildStdout>, tx: mpsc::Sender<WorkerEvent>) {
    let pid = child.id();

    if let Some(stdout) = stdout {
        let mut reader = BufReader::new(stdout);
        let mut receiver_gone = false;
        while let Some(line) = read_line_lossy(&mut reader).await {
            debug!("[worker {:?}] {}", pid, line);
            // keep draining after the receiver is gone, the worker must not block on a full pipe
            if !receiver_gone && tx.send(WorkerEvent::Line(line)).await.is_err() {
                receiver_gone = true;
            }
        }
    }

    let code = match child.wait().await {
        Ok(status) => status.code().unwrap_or(-1),
        Err(e) => {
            error!("Failed to wait for worker {:?}: {}", pid, e);
            -1
        }
    };
    info!("Worker {:?} exited with code {}", pid, code);
    let _ = tx.send(WorkerEvent::Exited(code)).await;
}

async fn log_stderr<R: AsyncRead + Unpin>(pid: Option<u32>, stderr: R) {
    let mut reader = BufReader::new(stderr);
    while let Some(line) = read_line_lossy(&mut reader).await {
        warn!("[worker {:?} stderr] {}", pid, line);
    }
}

/// Next line without its terminator, truncated to `MAX_LINE_BYTES`.
/// Invalid UTF-8 is replaced rather than ending the stream.
async fn read_line_lossy<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> Option<String> {
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES)
        .read_until(b'\n', &mut buf)
        .await;

    match read {
        Ok(0) => None,
        Ok(n) => {
            if n as u64 == MAX_LINE_BYTES && buf.last() != Some(&b'\n') {
                warn!("Worker output line longer than {} bytes, truncated", MAX_LINE_BYTES);
                if let Err(e) = skip_rest_of_line(reader).await {
                    warn!("Error reading worker output: {}", e);
                }
            }
            let line = String::from_utf8_lossy(&buf);
            Some(line.trim_end_matches(['\r', '\n']).to_string())
        }
        Err(e) => {
            warn!("Error reading worker output: {}", e);
            None
        }
    }
}

async fn skip_rest_of_line<R: AsyncRead + Unpin>(reader: &mut BufReader<R>) -> io::Result<()> {
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(());
        }
        match available.iter().position(|b| *b == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(());
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Runs a command as `<program> <args..> <input> <output>` and waits for it.
#[derive(Clone, Debug)]
pub struct CommandPreprocessor {
    command: CommandLine,
}

impl CommandPreprocessor {
    pub fn new(command: CommandLine) -> Self {
        Self { command }
    }
}

#[async_trait]
impl VideoPreprocessor for CommandPreprocessor {
    async fn preprocess(&self, input: &Path, output: &Path) -> Result<(), WorkerError> {
        info!("Preprocessing {:?} into {:?}", input, output);
        let result = self
            .command
            .command()
            .arg(input)
            .arg(output)
            .output()
            .await?;

        if !result.status.success() {
            let code = result.status.code().unwrap_or(-1);
            error!(
                "Preprocessing {:?} failed with code {}: {}",
                input,
                code,
                String::from_utf8_lossy(&result.stderr).trim()
            );
            return Err(WorkerError::Execution(code));
        }
        Ok(())
    }
}
