//! tmux control-mode integration.
//!
//! - `types.rs`: tmux-side identifiers (`%N`/`@N`/`$N`) (C3 support).
//! - `control_parser.rs`: stateless control-mode line parser (C3).
//! - `layout_parser.rs`: tmux layout-string parser into a binary tree (C2).
//! - `commands.rs`: command builders for the control protocol.
//! - `controller.rs`: per-control-session state machine (C5).
//! - `session.rs`: spawning a control PTY and the attach/picker protocol.

pub mod commands;
pub mod control_parser;
pub mod controller;
pub mod layout_parser;
pub mod session;
pub mod types;

pub use commands::TmuxCommand;
pub use control_parser::ControlEvent;
pub use controller::{ControllerAction, TmuxController};
pub use layout_parser::{fallback_layout, parse_layout};
pub use types::{TmuxPaneId, TmuxSessionId, TmuxWindowId};
