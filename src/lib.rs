//! `tmux-core`: a PTY session manager and tmux control-mode client for
//! building a terminal multiplexer front-end.
//!
//! - [`layout`] — the generic split-pane layout tree (C1).
//! - [`pty`] — the local pseudoterminal session manager (C4).
//! - [`tmux`] — the tmux control-mode layout parser (C2), line parser (C3),
//!   and per-session controller (C5).
//! - [`workspace`] — the coordinator tying tabs, PTYs, and tmux controllers
//!   together (C6).

pub mod config;
pub mod debug;
pub mod error;
pub mod layout;
pub mod pty;
pub mod tmux;
pub mod workspace;

pub use config::Config;
pub use error::{PtyError, TmuxControllerError, WorkspaceError};
pub use workspace::WorkspaceCoordinator;
