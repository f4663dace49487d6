//! Subprocess duplex
//!
//! Spawns a program on `init`. Its stdin is the sink side, its stdout the
//! source side, and every stderr line is logged. The child is killed on
//! shutdown or when the component is dropped.

use std::process::Stdio;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

use crate::component::{Component, Sink, Source};
use crate::error::{ConnectionError, Error, Result};
use crate::registry::{BuildContext, Factory};

/// Options of the `exec` process
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecOptions {
    /// Program to run, looked up in `PATH` when not absolute
    pub path: String,
    /// Program arguments
    #[serde(default)]
    pub args: Vec<String>,
}

/// Child process exposed as a duplex
pub struct ExecProcess {
    id: String,
    options: ExecOptions,
    child: StdMutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<ChildStdout>>,
}

impl ExecProcess {
    /// Create a process that is spawned on `init`
    pub fn new(id: impl Into<String>, options: ExecOptions) -> Self {
        Self {
            id: id.into(),
            options,
            child: StdMutex::new(None),
            stdin: Mutex::new(None),
            stdout: Mutex::new(None),
        }
    }

    /// OS process id, while the child is running
    pub fn pid(&self) -> Option<u32> {
        self.child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .and_then(Child::id)
    }
}

#[async_trait]
impl Component for ExecProcess {
    fn kind(&self) -> &'static str {
        "exec"
    }

    async fn init(&self) -> Result<()> {
        let mut child = Command::new(&self.options.path)
            .args(&self.options.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::factory(&self.id, format!("spawn {}: {}", self.options.path, e)))?;

        let pid = child.id();
        tracing::info!(
            id = %self.id,
            path = %self.options.path,
            args = ?self.options.args,
            pid = ?pid,
            "Process started"
        );

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(self.id.clone(), stderr));
        }
        *self.stdin.lock().await = child.stdin.take();
        *self.stdout.lock().await = child.stdout.take();
        *self.child.lock().unwrap_or_else(PoisonError::into_inner) = Some(child);

        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        // Closing stdin lets well-behaved children exit on their own
        self.stdin.lock().await.take();

        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut child) = child {
            if let Err(e) = child.kill().await {
                tracing::debug!(id = %self.id, error = %e, "Kill failed");
            }
            tracing::info!(id = %self.id, "Process stopped");
        }
        Ok(())
    }
}

#[async_trait]
impl Source for ExecProcess {
    async fn read(&self, buf: &mut BytesMut) -> Result<usize> {
        let mut stdout = self.stdout.lock().await;
        let stdout = stdout.as_mut().ok_or(ConnectionError::NotReady)?;

        match stdout.read(&mut buf[..]).await? {
            // The child closed stdout; nothing more will ever come
            0 => Err(ConnectionError::Closed.into()),
            n => Ok(n),
        }
    }
}

#[async_trait]
impl Sink for ExecProcess {
    async fn write(&self, chunk: Bytes) -> Result<usize> {
        let mut stdin = self.stdin.lock().await;
        let stdin = stdin.as_mut().ok_or(ConnectionError::NotReady)?;

        stdin.write_all(&chunk).await?;
        stdin.flush().await?;
        Ok(chunk.len())
    }
}

async fn log_stderr(id: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::info!(id = %id, "{}", line),
            Ok(None) => break,
            Err(e) => {
                tracing::error!(id = %id, error = %e, "Failed to read stderr");
                break;
            }
        }
    }
}

/// Constructor for the `exec` process
pub struct ExecFactory;

impl Factory for ExecFactory {
    type Options = ExecOptions;
    type Output = ExecProcess;

    fn build(&self, id: &str, options: ExecOptions, _ctx: &mut BuildContext) -> Result<ExecProcess> {
        if options.path.is_empty() {
            return Err(Error::factory(id, "path must not be empty"));
        }
        Ok(ExecProcess::new(id, options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_failure_is_factory_error() {
        let process = ExecProcess::new(
            "ghost",
            ExecOptions {
                path: "/nonexistent/relay-test-binary".into(),
                args: Vec::new(),
            },
        );
        assert!(matches!(
            process.init().await,
            Err(Error::Factory { ref id, .. }) if id == "ghost"
        ));
    }

    #[tokio::test]
    async fn test_io_before_init() {
        let process = ExecProcess::new(
            "idle",
            ExecOptions {
                path: "cat".into(),
                args: Vec::new(),
            },
        );
        let mut buf = BytesMut::zeroed(8);
        assert!(matches!(
            process.read(&mut buf).await,
            Err(Error::Connection(ConnectionError::NotReady))
        ));
        assert!(process.write(Bytes::from_static(b"x")).await.is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cat_echo() {
        let process = ExecProcess::new(
            "echo",
            ExecOptions {
                path: "cat".into(),
                args: Vec::new(),
            },
        );
        process.init().await.unwrap();
        assert!(process.pid().is_some());

        process.write(Bytes::from_static(b"round trip")).await.unwrap();

        let mut got = Vec::new();
        let mut buf = BytesMut::zeroed(64);
        while got.len() < 10 {
            let n = process.read(&mut buf).await.unwrap();
            got.extend_from_slice(&buf[..n]);
        }
        assert_eq!(got, b"round trip");

        process.shutdown().await.unwrap();
        assert!(process.pid().is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stdout_eof_is_terminal() {
        let process = ExecProcess::new(
            "short",
            ExecOptions {
                path: "true".into(),
                args: Vec::new(),
            },
        );
        process.init().await.unwrap();

        let mut buf = BytesMut::zeroed(8);
        assert!(matches!(
            process.read(&mut buf).await,
            Err(Error::Connection(ConnectionError::Closed))
        ));
        process.shutdown().await.unwrap();
    }
}
