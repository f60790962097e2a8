//! Spawns a shell under a PTY and exposes it as a set of channels: a sender
//! for stdin bytes, a single-consumer receiver for output chunks, and a
//! sticky exit status that supports bounded waiting.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use portable_pty::CommandBuilder;
use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tokio::sync::Notify;
use tokio::sync::Mutex as TokioMutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio::time::sleep_until;

const OUTPUT_CHANNEL_CAPACITY: usize = 256;
const READ_BUF_SIZE: usize = 8_192;

/// Exit state of the child process. Once `exited` flips to true it stays
/// true; the exit code is recorded by the wait task before signalling.
#[derive(Debug)]
pub struct ExitStatus {
    exited: AtomicBool,
    code: StdMutex<Option<i32>>,
    notify: Notify,
}

impl ExitStatus {
    fn new() -> Self {
        Self {
            exited: AtomicBool::new(false),
            code: StdMutex::new(None),
            notify: Notify::new(),
        }
    }

    fn signal(&self, code: i32) {
        if let Ok(mut guard) = self.code.lock() {
            *guard = Some(code);
        }
        self.exited.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.code.lock().ok().and_then(|guard| *guard)
    }

    /// Wait until the process exits or `deadline` passes; returns whether
    /// the process has exited.
    pub async fn wait_for_exit_until(&self, deadline: Instant) -> bool {
        if self.exited.load(Ordering::Acquire) {
            return true;
        }

        let notified = self.notify.notified();
        let sleep = sleep_until(deadline);

        // Re-check after creating the notified future in case we raced
        // with signal().
        if self.exited.load(Ordering::Acquire) {
            return true;
        }

        tokio::pin!(notified);
        tokio::pin!(sleep);
        tokio::select! {
            _ = &mut notified => {},
            _ = &mut sleep => {},
        }

        self.exited.load(Ordering::Acquire)
    }
}

/// Handle to a spawned shell process. Owns the PTY plumbing tasks; dropping
/// the handle kills the child and aborts the tasks.
#[derive(Debug)]
pub struct ShellProcess {
    writer_tx: mpsc::Sender<Vec<u8>>,
    killer: StdMutex<Option<Box<dyn portable_pty::ChildKiller + Send + Sync>>>,
    reader_handle: StdMutex<Option<JoinHandle<()>>>,
    writer_handle: StdMutex<Option<JoinHandle<()>>>,
    wait_handle: StdMutex<Option<JoinHandle<()>>>,
    exit_status: Arc<ExitStatus>,
}

impl ShellProcess {
    pub fn writer_sender(&self) -> mpsc::Sender<Vec<u8>> {
        self.writer_tx.clone()
    }

    pub fn exit_status(&self) -> Arc<ExitStatus> {
        Arc::clone(&self.exit_status)
    }

    pub fn has_exited(&self) -> bool {
        self.exit_status.has_exited()
    }

    /// Hard-kill the child process. The wait task observes the death and
    /// signals `ExitStatus` as usual.
    pub fn kill(&self) -> Result<()> {
        if let Ok(mut killer_opt) = self.killer.lock()
            && let Some(mut killer) = killer_opt.take()
        {
            killer.kill()?;
        }
        Ok(())
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        if let Ok(mut killer_opt) = self.killer.lock()
            && let Some(mut killer) = killer_opt.take()
        {
            let _ = killer.kill();
        }

        for handle in [&self.reader_handle, &self.writer_handle, &self.wait_handle] {
            if let Ok(mut guard) = handle.lock()
                && let Some(task) = guard.take()
            {
                task.abort();
            }
        }
    }
}

/// A freshly spawned shell: the process handle plus the output end of its
/// PTY. The receiver is handed to exactly one consumer.
#[derive(Debug)]
pub struct SpawnedShell {
    pub process: ShellProcess,
    pub output_rx: mpsc::Receiver<Vec<u8>>,
}

/// Spawn `program` with `args` under a new PTY rooted at `cwd`. The child
/// inherits the parent environment; `extra_env` entries are layered on top.
pub async fn spawn_pty_process(
    program: &str,
    args: &[String],
    cwd: &Path,
    extra_env: &HashMap<String, String>,
) -> Result<SpawnedShell> {
    if program.is_empty() {
        anyhow::bail!("missing program for PTY spawn");
    }

    let pty_system = native_pty_system();
    let pair = pty_system.openpty(PtySize {
        rows: 24,
        cols: 80,
        pixel_width: 0,
        pixel_height: 0,
    })?;

    let mut command_builder = CommandBuilder::new(program);
    command_builder.cwd(cwd);
    for arg in args {
        command_builder.arg(arg);
    }
    for (key, value) in extra_env {
        command_builder.env(key, value);
    }

    let mut child = pair.slave.spawn_command(command_builder)?;
    let killer = child.clone_killer();

    let (writer_tx, mut writer_rx) = mpsc::channel::<Vec<u8>>(128);
    let (output_tx, output_rx) = mpsc::channel::<Vec<u8>>(OUTPUT_CHANNEL_CAPACITY);

    let mut reader = pair.master.try_clone_reader()?;
    let reader_handle: JoinHandle<()> = tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if output_tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(5));
                    continue;
                }
                Err(_) => break,
            }
        }
    });

    let writer = pair.master.take_writer()?;
    let writer = Arc::new(TokioMutex::new(writer));
    let writer_handle: JoinHandle<()> = tokio::spawn({
        let writer = Arc::clone(&writer);
        async move {
            while let Some(bytes) = writer_rx.recv().await {
                let mut guard = writer.lock().await;
                use std::io::Write;
                let _ = guard.write_all(&bytes);
                let _ = guard.flush();
            }
        }
    });

    let exit_status = Arc::new(ExitStatus::new());
    let wait_exit_status = Arc::clone(&exit_status);
    let wait_handle: JoinHandle<()> = tokio::task::spawn_blocking(move || {
        let code = match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(_) => -1,
        };
        wait_exit_status.signal(code);
    });

    let process = ShellProcess {
        writer_tx,
        killer: StdMutex::new(Some(killer)),
        reader_handle: StdMutex::new(Some(reader_handle)),
        writer_handle: StdMutex::new(Some(writer_handle)),
        wait_handle: StdMutex::new(Some(wait_handle)),
        exit_status,
    };

    Ok(SpawnedShell { process, output_rx })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tokio::time::Duration;

    #[cfg(unix)]
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn spawn_echo_and_observe_exit() {
        let mut spawned = spawn_pty_process(
            "/bin/sh",
            &["-c".to_string(), "echo pty-works".to_string()],
            Path::new("/tmp"),
            &HashMap::new(),
        )
        .await
        .unwrap();

        let mut collected = Vec::new();
        while let Some(chunk) = spawned.output_rx.recv().await {
            collected.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&collected);
        assert!(text.contains("pty-works"), "unexpected output: {text}");

        let deadline = Instant::now() + Duration::from_secs(5);
        assert!(spawned.process.exit_status().wait_for_exit_until(deadline).await);
        assert_eq!(spawned.process.exit_status().exit_code(), Some(0));
    }

    #[tokio::test]
    async fn empty_program_is_rejected() {
        let err = spawn_pty_process("", &[], Path::new("."), &HashMap::new())
            .await
            .err();
        assert!(err.is_some());
    }
}
