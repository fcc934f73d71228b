//! Fallback backend: a companion helper process that itself opens a PTY
//! and speaks line-delimited JSON over its stdin/stdout. Used when the
//! native backend is unavailable (e.g. sandboxed environments that can't
//! `openpty` directly but can still exec a trusted helper binary).

use super::{resolve_shell, Backend, CreateOptions, PtyEvent, PtyKind, SessionHandle, SessionId};
use crate::config::Config;
use crate::error::PtyError;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::UnboundedSender;

/// One line of the helper protocol, in either direction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HelperMessage {
    #[serde(rename = "create")]
    Create {
        session_id: u64,
        command: String,
        args: Vec<String>,
        cols: u16,
        rows: u16,
    },
    #[serde(rename = "created")]
    Created { session_id: u64, pid: u32 },
    #[serde(rename = "create-error")]
    CreateError { session_id: u64, message: String },
    #[serde(rename = "write")]
    Write { session_id: u64, data: String },
    #[serde(rename = "resize")]
    Resize {
        session_id: u64,
        cols: u16,
        rows: u16,
    },
    #[serde(rename = "kill")]
    Kill { session_id: u64 },
    #[serde(rename = "data")]
    Data { session_id: u64, data: String },
    #[serde(rename = "exit")]
    Exit { session_id: u64, exit_code: i32 },
}

const HELPER_BINARY_ENV: &str = "TMUX_CORE_PTY_HELPER";
const DEFAULT_HELPER_BINARY: &str = "tmux-core-pty-helper";

pub fn spawn(
    session_id: SessionId,
    kind: PtyKind,
    opts: &CreateOptions,
    _config: &Config,
    tx: UnboundedSender<PtyEvent>,
) -> Result<HelperHandle, PtyError> {
    let helper_bin =
        std::env::var(HELPER_BINARY_ENV).unwrap_or_else(|_| DEFAULT_HELPER_BINARY.to_string());

    let mut child = Command::new(&helper_bin)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|_| PtyError::HelperUnavailable(helper_bin.clone()))?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| PtyError::HelperUnavailable(helper_bin.clone()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| PtyError::HelperUnavailable(helper_bin.clone()))?;

    let stdin = Arc::new(Mutex::new(stdin));

    let create_msg = HelperMessage::Create {
        session_id: raw_id(session_id),
        command: opts
            .command
            .clone()
            .unwrap_or_else(|| resolve_shell(opts.shell.as_deref())),
        args: opts.args.clone(),
        cols: opts.cols,
        rows: opts.rows,
    };
    send_line(&stdin, &create_msg).map_err(|_| PtyError::HelperUnavailable(helper_bin.clone()))?;

    let (ack_tx, ack_rx) = std_mpsc::channel::<Result<u32, String>>();
    spawn_reader_thread(stdout, session_id, kind, tx, ack_tx);

    let pid = ack_rx
        .recv_timeout(std::time::Duration::from_secs(3))
        .map_err(|_| PtyError::HelperUnavailable(helper_bin.clone()))?
        .map_err(PtyError::HelperUnavailable)?;

    Ok(HelperHandle { stdin, child: Arc::new(Mutex::new(child)), pid, session_id })
}

fn raw_id(session_id: SessionId) -> u64 {
    session_id.0
}

fn send_line(stdin: &Arc<Mutex<ChildStdin>>, msg: &HelperMessage) -> std::io::Result<()> {
    let mut guard = stdin.lock().unwrap_or_else(|e| e.into_inner());
    let encoded = serde_json::to_string(msg).map_err(std::io::Error::other)?;
    guard.write_all(encoded.as_bytes())?;
    guard.write_all(b"\n")?;
    guard.flush()
}

fn spawn_reader_thread(
    stdout: std::process::ChildStdout,
    session_id: SessionId,
    kind: PtyKind,
    tx: UnboundedSender<PtyEvent>,
    ack_tx: std_mpsc::Sender<Result<u32, String>>,
) {
    std::thread::spawn(move || {
        let reader = BufReader::new(stdout);
        let mut acked = false;
        for line in reader.lines() {
            let Ok(line) = line else { break };
            let Ok(msg) = serde_json::from_str::<HelperMessage>(&line) else {
                continue;
            };
            match msg {
                HelperMessage::Created { pid, .. } if !acked => {
                    acked = true;
                    let _ = ack_tx.send(Ok(pid));
                }
                HelperMessage::CreateError { message, .. } if !acked => {
                    acked = true;
                    let _ = ack_tx.send(Err(message));
                    return;
                }
                HelperMessage::Data { data, .. } => {
                    let _ = tx.send(PtyEvent::Data {
                        session_id,
                        kind,
                        backend: Backend::Helper,
                        bytes: data.into_bytes(),
                    });
                }
                HelperMessage::Exit { exit_code, .. } => {
                    let _ = tx.send(PtyEvent::Exit {
                        session_id,
                        kind,
                        exit_code,
                    });
                    return;
                }
                _ => {}
            }
        }
        if !acked {
            let _ = ack_tx.send(Err("helper exited before acknowledging create".to_string()));
        }
    });
}

pub struct HelperHandle {
    stdin: Arc<Mutex<ChildStdin>>,
    child: Arc<Mutex<Child>>,
    pid: u32,
    session_id: SessionId,
}

impl SessionHandle for HelperHandle {
    fn write(&self, bytes: &[u8]) -> bool {
        let msg = HelperMessage::Write {
            session_id: raw_id(self.session_id),
            data: String::from_utf8_lossy(bytes).into_owned(),
        };
        send_line(&self.stdin, &msg).is_ok()
    }

    fn resize(&self, cols: u16, rows: u16) {
        let msg = HelperMessage::Resize {
            session_id: raw_id(self.session_id),
            cols,
            rows,
        };
        let _ = send_line(&self.stdin, &msg);
    }

    fn kill(&self) {
        let msg = HelperMessage::Kill {
            session_id: raw_id(self.session_id),
        };
        let _ = send_line(&self.stdin, &msg);
        if let Ok(mut child) = self.child.lock() {
            let _ = child.kill();
        }
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helper_message_round_trips_through_json() {
        let msg = HelperMessage::Create {
            session_id: 7,
            command: "/bin/bash".to_string(),
            args: vec![],
            cols: 80,
            rows: 24,
        };
        let encoded = serde_json::to_string(&msg).unwrap();
        let decoded: HelperMessage = serde_json::from_str(&encoded).unwrap();
        match decoded {
            HelperMessage::Create { session_id, command, .. } => {
                assert_eq!(session_id, 7);
                assert_eq!(command, "/bin/bash");
            }
            _ => panic!("expected Create"),
        }
    }

    #[test]
    fn missing_helper_binary_yields_unavailable_error() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        unsafe {
            std::env::set_var(HELPER_BINARY_ENV, "/nonexistent/tmux-core-pty-helper-test");
        }
        let result = spawn(
            SessionId(1),
            PtyKind::Shell,
            &CreateOptions {
                cols: 80,
                rows: 24,
                ..Default::default()
            },
            &Config::default(),
            tx,
        );
        unsafe {
            std::env::remove_var(HELPER_BINARY_ENV);
        }
        assert!(matches!(result, Err(PtyError::HelperUnavailable(_))));
    }
}
