//! Per-component error types.
//!
//! Each component that can fail in a way the caller must react to gets its
//! own `thiserror` enum. Failures the spec says must recover locally (layout
//! parse failure, capture failure/empty, transaction timeout) never reach
//! these types — the owning component swallows them and substitutes the
//! documented fallback instead.

use thiserror::Error;

/// Failures from the pseudoterminal session manager (C4).
#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to spawn {command}: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("tmux control mode requires a PTY backend")]
    BackendNotPty,

    #[error("unknown session {0:?}")]
    UnknownSession(crate::pty::SessionId),

    #[error("helper process unavailable: {0}")]
    HelperUnavailable(String),
}

/// Failures surfaced by the tmux controller (C5) that must propagate.
#[derive(Debug, Error)]
pub enum TmuxControllerError {
    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error("control pty exited before bootstrap completed")]
    ControlPtyExited,
}

/// Failures from the workspace coordinator (C6).
#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Pty(#[from] PtyError),

    #[error(transparent)]
    Tmux(#[from] TmuxControllerError),

    #[error("no such tab {0:?}")]
    UnknownTab(crate::workspace::TabId),

    #[error("no such pane {0:?}")]
    UnknownPane(crate::layout::PaneId),
}
