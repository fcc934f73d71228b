//! Last-resort backend: plain anonymous pipes instead of a pseudoterminal.
//!
//! No real terminal means no job control, no window-size ioctls, and no
//! raw-mode line discipline — callers get a usable but degraded session.
//! Never used for [`PtyKind::TmuxControl`]: tmux itself refuses `-CC` when
//! its stdin isn't a tty, so [`super::PtyManager::create`] rejects that
//! combination before reaching this module.

use super::{resolve_shell, Backend, CreateOptions, PtyEvent, PtyKind, SessionHandle, SessionId};
use crate::error::PtyError;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

/// Ctrl-C. With no PTY line discipline to turn this byte into `SIGINT`
/// for us, a write containing it is split around the byte and the signal
/// sent explicitly.
const CTRL_C: u8 = 0x03;

pub fn spawn(
    session_id: SessionId,
    kind: PtyKind,
    opts: &CreateOptions,
    tx: UnboundedSender<PtyEvent>,
) -> Result<PipeHandle, PtyError> {
    let program = opts
        .command
        .clone()
        .unwrap_or_else(|| resolve_shell(opts.shell.as_deref()));

    let mut args = opts.args.clone();
    if args.is_empty() && kind == PtyKind::Shell && opts.command.is_none() {
        args.push("-i".to_string());
    }

    let mut command = Command::new(&program);
    command
        .args(&args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    if let Some(cwd) = &opts.cwd {
        command.current_dir(cwd);
    }

    for (var, value) in [
        ("TERM", "xterm-256color"),
        ("COLORTERM", "truecolor"),
        ("FORCE_COLOR", "1"),
    ] {
        if std::env::var_os(var).is_none() {
            command.env(var, value);
        }
    }

    let mut child = command.spawn().map_err(|e| PtyError::SpawnFailed {
        command: program.clone(),
        source: e,
    })?;

    let pid = child.id();
    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| PtyError::SpawnFailed {
            command: program.clone(),
            source: std::io::Error::other("child stdin not piped"),
        })?;
    let stdout = child.stdout.take().ok_or_else(|| PtyError::SpawnFailed {
        command: program.clone(),
        source: std::io::Error::other("child stdout not piped"),
    })?;
    let stderr = child.stderr.take().ok_or_else(|| PtyError::SpawnFailed {
        command: program.clone(),
        source: std::io::Error::other("child stderr not piped"),
    })?;

    spawn_output_thread(stdout, session_id, kind, tx.clone(), false);
    spawn_output_thread_buffered(stderr, session_id, kind, tx.clone());

    let child = Arc::new(Mutex::new(child));
    spawn_wait_thread(child.clone(), session_id, kind, tx);

    Ok(PipeHandle {
        stdin: Arc::new(Mutex::new(stdin)),
        child,
        pid,
        killed: Arc::new(AtomicBool::new(false)),
    })
}

/// `\n` -> `\r\n` is the one normalization a real PTY's line discipline
/// would have applied for us; everything else passes through untouched.
fn normalize_newlines(bytes: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(bytes.len());
    for &b in bytes {
        if b == b'\n' {
            out.push(b'\r');
        }
        out.push(b);
    }
    out
}

fn spawn_output_thread(
    mut reader: impl Read + Send + 'static,
    session_id: SessionId,
    kind: PtyKind,
    tx: UnboundedSender<PtyEvent>,
    _unused: bool,
) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    let _ = tx.send(PtyEvent::Data {
                        session_id,
                        kind,
                        backend: Backend::Pipe,
                        bytes: normalize_newlines(&buf[..n]),
                    });
                }
            }
        }
    });
}

fn spawn_output_thread_buffered(
    reader: impl Read + Send + 'static,
    session_id: SessionId,
    kind: PtyKind,
    tx: UnboundedSender<PtyEvent>,
) {
    spawn_output_thread(BufReader::new(reader), session_id, kind, tx, false);
}

fn spawn_wait_thread(
    child: Arc<Mutex<Child>>,
    session_id: SessionId,
    kind: PtyKind,
    tx: UnboundedSender<PtyEvent>,
) {
    std::thread::spawn(move || {
        let status = loop {
            let mut guard = child.lock().unwrap_or_else(|e| e.into_inner());
            match guard.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    drop(guard);
                    std::thread::sleep(std::time::Duration::from_millis(25));
                }
                Err(_) => return,
            }
        };
        let exit_code = status.code().unwrap_or(-1);
        let _ = tx.send(PtyEvent::Exit {
            session_id,
            kind,
            exit_code,
        });
    });
}

pub struct PipeHandle {
    stdin: Arc<Mutex<ChildStdin>>,
    child: Arc<Mutex<Child>>,
    pid: u32,
    killed: Arc<AtomicBool>,
}

impl SessionHandle for PipeHandle {
    fn write(&self, bytes: &[u8]) -> bool {
        if let Some(pos) = bytes.iter().position(|&b| b == CTRL_C) {
            if !self.write_raw(&bytes[..pos]) {
                return false;
            }
            self.send_sigint();
            return self.write_raw(&bytes[pos + 1..]);
        }
        self.write_raw(bytes)
    }

    /// No ioctl can resize a plain pipe; the child simply never learns
    /// its terminal size changed.
    fn resize(&self, _cols: u16, _rows: u16) {}

    fn kill(&self) {
        if self.killed.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}

impl PipeHandle {
    fn write_raw(&self, bytes: &[u8]) -> bool {
        if bytes.is_empty() {
            return true;
        }
        let mut guard = self.stdin.lock().unwrap_or_else(|e| e.into_inner());
        guard.write_all(bytes).is_ok() && guard.flush().is_ok()
    }

    #[cfg(unix)]
    fn send_sigint(&self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        let _ = kill(Pid::from_raw(self.pid as i32), Signal::SIGINT);
    }

    #[cfg(not(unix))]
    fn send_sigint(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_newlines_inserts_carriage_return() {
        assert_eq!(normalize_newlines(b"a\nb"), b"a\r\nb".to_vec());
        assert_eq!(normalize_newlines(b"no newline"), b"no newline".to_vec());
    }

    #[test]
    fn spawn_runs_a_real_process_and_streams_output() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let opts = CreateOptions {
            command: Some("/bin/echo".to_string()),
            args: vec!["hello-from-pipe".to_string()],
            cols: 80,
            rows: 24,
            ..Default::default()
        };
        let handle = spawn(SessionId(1), PtyKind::Shell, &opts, tx).expect("spawn should succeed");
        assert!(handle.pid() > 0);

        let mut saw_output = false;
        let mut saw_exit = false;
        for _ in 0..200 {
            match rx.try_recv() {
                Ok(PtyEvent::Data { bytes, .. }) => {
                    if String::from_utf8_lossy(&bytes).contains("hello-from-pipe") {
                        saw_output = true;
                    }
                }
                Ok(PtyEvent::Exit { .. }) => {
                    saw_exit = true;
                    break;
                }
                Err(_) => std::thread::sleep(std::time::Duration::from_millis(10)),
            }
        }
        assert!(saw_output, "expected echoed output on the pipe backend");
        assert!(saw_exit, "expected an Exit event once /bin/echo terminates");
    }
}
