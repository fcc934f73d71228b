//! Pseudoterminal session manager (C4).
//!
//! Owns every child process the core spawns, on top of one of three
//! backends tried in order per [`PtyManager::create`]: a real PTY
//! ([`native`]), a companion helper process speaking line-delimited JSON
//! ([`helper`]), or anonymous pipes as a last resort ([`pipe`]). All three
//! expose the same [`SessionHandle`] contract so the rest of the crate
//! never has to know which one backs a given session.

pub mod helper;
pub mod native;
pub mod pipe;

use crate::config::{Config, MIN_COLS, MIN_ROWS};
use crate::error::PtyError;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Opaque, process-unique PTY session identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// What kind of process is running under this session. Only `Shell`
/// sessions may fall back to a non-PTY backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtyKind {
    Shell,
    TmuxControl,
}

/// Which backend actually ended up hosting a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Pty,
    Helper,
    Pipe,
}

/// Parameters for spawning a new session.
#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub cwd: Option<PathBuf>,
    pub shell: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cols: u16,
    pub rows: u16,
}

impl CreateOptions {
    fn clamped_size(&self) -> (u16, u16) {
        (self.cols.max(MIN_COLS), self.rows.max(MIN_ROWS))
    }
}

/// Resolve the shell to run when no explicit `command` is given: the
/// requested shell, else `$SHELL`, else the first of `/bin/zsh`,
/// `/bin/bash` that exists, falling back to `/bin/sh`. On Windows,
/// `%COMSPEC%` or `powershell.exe`.
#[cfg(not(target_os = "windows"))]
pub fn resolve_shell(requested: Option<&str>) -> String {
    if let Some(shell) = requested {
        return shell.to_string();
    }
    if let Ok(shell) = std::env::var("SHELL")
        && !shell.is_empty()
    {
        return shell;
    }
    for candidate in ["/bin/zsh", "/bin/bash"] {
        if std::path::Path::new(candidate).exists() {
            return candidate.to_string();
        }
    }
    "/bin/sh".to_string()
}

#[cfg(target_os = "windows")]
pub fn resolve_shell(requested: Option<&str>) -> String {
    if let Some(shell) = requested {
        return shell.to_string();
    }
    std::env::var("COMSPEC").unwrap_or_else(|_| "powershell.exe".to_string())
}

/// The terminal name reported to the child process.
pub fn term_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "xterm-256color"
    } else {
        "xterm-color"
    }
}

/// Events the manager delivers to its single registered consumer, per
/// session: zero-or-more `Data`, then exactly one `Exit`, then nothing.
#[derive(Debug, Clone)]
pub enum PtyEvent {
    Data {
        session_id: SessionId,
        kind: PtyKind,
        backend: Backend,
        bytes: Vec<u8>,
    },
    Exit {
        session_id: SessionId,
        kind: PtyKind,
        exit_code: i32,
    },
}

/// Uniform contract every backend's session handle implements.
pub trait SessionHandle: Send + Sync {
    /// Write bytes to the child's input. Returns `false` only when the
    /// session is already gone — writes are best-effort, never queued.
    fn write(&self, bytes: &[u8]) -> bool;
    fn resize(&self, cols: u16, rows: u16);
    fn kill(&self);
    fn pid(&self) -> u32;
}

struct SessionEntry {
    kind: PtyKind,
    backend: Backend,
    handle: Box<dyn SessionHandle>,
}

/// Registry of every child process the core owns.
pub struct PtyManager {
    config: Config,
    sessions: HashMap<SessionId, SessionEntry>,
    consumer: mpsc::UnboundedSender<PtyEvent>,
    next_id: AtomicU64,
}

impl PtyManager {
    pub fn new(config: Config, consumer: mpsc::UnboundedSender<PtyEvent>) -> Self {
        Self {
            config,
            sessions: HashMap::new(),
            consumer,
            next_id: AtomicU64::new(1),
        }
    }

    fn alloc_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Spawn a session, trying backends in order: PTY, then helper, then
    /// pipe. A `TmuxControl` session must end up on a real PTY — tmux
    /// refuses `-CC` on a non-tty — so the pipe tier is skipped for it.
    pub fn create(
        &mut self,
        kind: PtyKind,
        mut opts: CreateOptions,
    ) -> Result<(SessionId, u32, Backend), PtyError> {
        let (cols, rows) = opts.clamped_size();
        opts.cols = cols;
        opts.rows = rows;

        let session_id = self.alloc_id();
        let tx = self.consumer.clone();

        match native::spawn(session_id, kind, &opts, &self.config, tx.clone()) {
            Ok(handle) => {
                let pid = handle.pid();
                self.sessions.insert(
                    session_id,
                    SessionEntry {
                        kind,
                        backend: Backend::Pty,
                        handle: Box::new(handle),
                    },
                );
                return Ok((session_id, pid, Backend::Pty));
            }
            Err(native_err) => {
                log::warn!("native PTY backend unavailable for {session_id}: {native_err}");
            }
        }

        match helper::spawn(session_id, kind, &opts, &self.config, tx.clone()) {
            Ok(handle) => {
                let pid = handle.pid();
                self.sessions.insert(
                    session_id,
                    SessionEntry {
                        kind,
                        backend: Backend::Helper,
                        handle: Box::new(handle),
                    },
                );
                return Ok((session_id, pid, Backend::Helper));
            }
            Err(helper_err) => {
                log::warn!("helper PTY backend unavailable for {session_id}: {helper_err}");
            }
        }

        if kind == PtyKind::TmuxControl {
            return Err(PtyError::BackendNotPty);
        }

        let handle = pipe::spawn(session_id, kind, &opts, tx)?;
        let pid = handle.pid();
        self.sessions.insert(
            session_id,
            SessionEntry {
                kind,
                backend: Backend::Pipe,
                handle: Box::new(handle),
            },
        );
        Ok((session_id, pid, Backend::Pipe))
    }

    pub fn write(&self, session_id: SessionId, bytes: &[u8]) -> bool {
        match self.sessions.get(&session_id) {
            Some(entry) => entry.handle.write(bytes),
            None => false,
        }
    }

    pub fn resize(&self, session_id: SessionId, cols: u16, rows: u16) -> bool {
        let cols = cols.max(MIN_COLS);
        let rows = rows.max(MIN_ROWS);
        match self.sessions.get(&session_id) {
            Some(entry) => {
                entry.handle.resize(cols, rows);
                true
            }
            None => false,
        }
    }

    pub fn kill(&mut self, session_id: SessionId) -> bool {
        match self.sessions.remove(&session_id) {
            Some(entry) => {
                entry.handle.kill();
                true
            }
            None => false,
        }
    }

    pub fn backend_of(&self, session_id: SessionId) -> Option<Backend> {
        self.sessions.get(&session_id).map(|e| e.backend)
    }

    pub fn kind_of(&self, session_id: SessionId) -> Option<PtyKind> {
        self.sessions.get(&session_id).map(|e| e.kind)
    }

    /// Drop the bookkeeping for a session once its `Exit` event has been
    /// delivered and the consumer no longer needs the handle.
    pub fn forget(&mut self, session_id: SessionId) {
        self.sessions.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_sizes_to_spec_minimums() {
        let opts = CreateOptions {
            cols: 0,
            rows: 0,
            ..Default::default()
        };
        assert_eq!(opts.clamped_size(), (MIN_COLS, MIN_ROWS));
    }

    #[test]
    fn resolve_shell_prefers_explicit_request() {
        assert_eq!(resolve_shell(Some("/bin/fish")), "/bin/fish");
    }

    #[test]
    fn unknown_session_write_resize_kill_are_false() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut mgr = PtyManager::new(Config::default(), tx);
        let bogus = SessionId(999);
        assert!(!mgr.write(bogus, b"hi"));
        assert!(!mgr.resize(bogus, 80, 24));
        assert!(!mgr.kill(bogus));
    }
}
