//! tmux command builders for control mode.
//!
//! Type-safe builders for commands sent on the control PTY. Every command
//! is newline-terminated when serialized.

use super::types::{TmuxPaneId, TmuxWindowId};

/// A tmux command ready to be sent.
#[derive(Debug, Clone)]
pub struct TmuxCommand {
    command: String,
}

impl TmuxCommand {
    fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.command
    }

    pub fn as_bytes(&self) -> Vec<u8> {
        let mut bytes = self.command.as_bytes().to_vec();
        bytes.push(b'\n');
        bytes
    }

    // -- Session --

    pub fn list_sessions() -> Self {
        Self::new(r#"list-sessions -F "#{session_name}""#)
    }

    pub fn new_session(name: Option<&str>) -> Self {
        match name {
            Some(n) => Self::new(format!("new-session -A -s '{n}'")),
            None => Self::new("new-session"),
        }
    }

    pub fn detach_client() -> Self {
        Self::new("detach-client")
    }

    // -- Window --

    pub fn new_window(name: Option<&str>) -> Self {
        match name {
            Some(n) => Self::new(format!("new-window -n '{n}'")),
            None => Self::new("new-window"),
        }
    }

    pub fn kill_window(window_id: TmuxWindowId) -> Self {
        Self::new(format!("kill-window -t {window_id}"))
    }

    pub fn rename_window(window_id: TmuxWindowId, name: &str) -> Self {
        let escaped = name.replace('\'', "'\\''");
        Self::new(format!("rename-window -t {window_id} '{escaped}'"))
    }

    // -- Pane --

    pub fn split_horizontal(pane_id: TmuxPaneId) -> Self {
        Self::new(format!("split-window -h -t {pane_id}"))
    }

    pub fn split_vertical(pane_id: TmuxPaneId) -> Self {
        Self::new(format!("split-window -v -t {pane_id}"))
    }

    pub fn select_pane(pane_id: TmuxPaneId) -> Self {
        Self::new(format!("select-pane -t {pane_id}"))
    }

    pub fn kill_pane(pane_id: TmuxPaneId) -> Self {
        Self::new(format!("kill-pane -t {pane_id}"))
    }

    pub fn resize_pane(pane_id: TmuxPaneId, cols: u16, rows: u16) -> Self {
        Self::new(format!("resize-pane -t {pane_id} -x {cols} -y {rows}"))
    }

    /// Hex-encoded keystrokes, per §4.5: each byte as two lowercase hex
    /// digits, space-separated. Control mode's `-H` flag decodes this back
    /// to raw bytes, sidestepping any quoting issues with the single-quoted
    /// forms below.
    pub fn send_keys_hex(pane_id: TmuxPaneId, bytes: &[u8]) -> Self {
        let hex = bytes.iter().map(|b| format!("{b:02x}")).collect::<Vec<_>>().join(" ");
        Self::new(format!("send-keys -t {pane_id} -H {hex}"))
    }

    /// Literal text, quote-escaped — used for commands issued on the
    /// controller's own behalf (bootstrap markers), not for user keystrokes.
    pub fn send_literal(pane_id: TmuxPaneId, text: &str) -> Self {
        let escaped = text.replace('\'', "'\\''");
        Self::new(format!("send-keys -t {pane_id} -l '{escaped}'"))
    }

    pub fn capture_pane(pane_id: TmuxPaneId, start_line: Option<i64>) -> Self {
        let mut cmd = format!("capture-pane -t {pane_id} -p -J");
        if let Some(start) = start_line {
            cmd.push_str(&format!(" -S {start}"));
        } else {
            cmd.push_str(" -S -");
        }
        Self::new(cmd)
    }

    // -- Control mode specific --

    pub fn socket_path_probe() -> Self {
        Self::new(r#"display-message -p "__SOCKET__::#{socket_path}""#)
    }

    pub fn pane_list_probe() -> Self {
        Self::new(r#"list-panes -s -F "__PANE__::#{window_id}::#{pane_id}""#)
    }

    pub fn window_list_probe() -> Self {
        Self::new(r#"list-windows -F "__WINDOW__::#{window_id}::#{window_name}::#{window_layout}""#)
    }

    pub fn refresh_client() -> Self {
        Self::new("refresh-client")
    }

    pub fn set_client_size(cols: u16, rows: u16) -> Self {
        Self::new(format!("refresh-client -C {cols}x{rows}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_sessions_is_well_formed() {
        assert!(TmuxCommand::list_sessions().as_str().starts_with("list-sessions"));
    }

    #[test]
    fn split_horizontal_targets_pane() {
        assert_eq!(
            TmuxCommand::split_horizontal(TmuxPaneId(5)).as_str(),
            "split-window -h -t %5"
        );
    }

    #[test]
    fn send_keys_hex_matches_spec_format() {
        let cmd = TmuxCommand::send_keys_hex(TmuxPaneId(1), b"ab");
        assert_eq!(cmd.as_str(), "send-keys -t %1 -H 61 62");
    }

    #[test]
    fn kill_window_uses_at_prefix() {
        assert_eq!(TmuxCommand::kill_window(TmuxWindowId(3)).as_str(), "kill-window -t @3");
    }

    #[test]
    fn as_bytes_appends_newline() {
        let cmd = TmuxCommand::detach_client();
        assert_eq!(cmd.as_bytes(), b"detach-client\n".to_vec());
    }
}
