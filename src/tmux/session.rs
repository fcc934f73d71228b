//! Spawning a control PTY and the session-picker protocols (§6).
//!
//! Unlike a gateway that writes `tmux -CC` into an already-running shell's
//! PTY, the workspace coordinator always spawns a *dedicated* PTY for
//! control mode: one [`TmuxController`](super::controller::TmuxController)
//! per control PTY, matching the "no shared mutability" design.

use std::time::Duration;

/// Where to run the control session.
#[derive(Debug, Clone, Default)]
pub struct ControlTarget {
    pub session_name: Option<String>,
    pub ssh_target: Option<String>,
    pub ssh_port: Option<u16>,
}

/// Total time budget for the shell-probe protocol (§6).
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(2200);

/// Build the `(command, args)` pair to spawn a control PTY for this target,
/// per §6's "Tmux invocation" table.
pub fn control_command(target: &ControlTarget) -> (String, Vec<String>) {
    let mut tmux_args = vec!["-CC".to_string(), "new-session".to_string(), "-A".to_string()];
    if let Some(name) = &target.session_name {
        tmux_args.push("-s".to_string());
        tmux_args.push(name.clone());
    }

    match &target.ssh_target {
        Some(host) => {
            let mut args = Vec::new();
            if let Some(port) = target.ssh_port {
                args.push("-p".to_string());
                args.push(port.to_string());
            }
            args.push("-tt".to_string());
            args.push(host.clone());
            args.push("tmux".to_string());
            args.extend(tmux_args);
            ("ssh".to_string(), args)
        }
        None => ("tmux".to_string(), tmux_args),
    }
}

/// The command to enumerate sessions on a local or already-targeted tmux
/// server, per §6.
pub fn list_sessions_command() -> (String, Vec<String>) {
    (
        "tmux".to_string(),
        vec!["list-sessions".to_string(), "-F".to_string(), "#{session_name}".to_string()],
    )
}

/// Parse `tmux list-sessions -F "#{session_name}"` output into session
/// names, dropping blank lines.
pub fn parse_session_list(output: &str) -> Vec<String> {
    output.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect()
}

const MIN_CAPTURE_LINES: i64 = 100;
const MAX_CAPTURE_LINES: i64 = 5000;
const DEFAULT_CAPTURE_LINES: i64 = 2000;

/// Build the out-of-band `capture-pane` invocation per §6: `-S -` first,
/// with a `-S -<lines>` fallback when the caller asks for a bounded amount.
pub fn capture_pane_command(
    pane_id: super::types::TmuxPaneId,
    lines: Option<i64>,
    socket_path: Option<&str>,
) -> (String, Vec<String>) {
    let mut args = Vec::new();
    if let Some(socket) = socket_path {
        args.push("-S".to_string());
        args.push(socket.to_string());
    }
    args.push("capture-pane".to_string());
    args.push("-p".to_string());
    args.push("-J".to_string());
    let clamped = lines.unwrap_or(DEFAULT_CAPTURE_LINES).clamp(MIN_CAPTURE_LINES, MAX_CAPTURE_LINES);
    args.push("-S".to_string());
    args.push(format!("-{clamped}"));
    args.push("-t".to_string());
    args.push(pane_id.to_string());
    ("tmux".to_string(), args)
}

/// Build the unbounded variant of the out-of-band capture (`-S -`, the full
/// scrollback), tried first per §4.5's history-hydration strategy before
/// falling back to [`capture_pane_command`]'s bounded form on an empty
/// result.
pub fn capture_pane_command_unbounded(
    pane_id: super::types::TmuxPaneId,
    socket_path: Option<&str>,
) -> (String, Vec<String>) {
    let mut args = Vec::new();
    if let Some(socket) = socket_path {
        args.push("-S".to_string());
        args.push(socket.to_string());
    }
    args.push("capture-pane".to_string());
    args.push("-p".to_string());
    args.push("-J".to_string());
    args.push("-S".to_string());
    args.push("-".to_string());
    args.push("-t".to_string());
    args.push(pane_id.to_string());
    ("tmux".to_string(), args)
}

/// Result of running the shell-probe protocol against an already-open shell
/// PTY: where that shell is, and what tmux sessions it can see.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeResult {
    pub source_label: String,
    pub ssh_target: Option<String>,
    pub ssh_port: Option<u16>,
    pub sessions: Vec<String>,
}

/// The three lines to inject into the shell PTY for the shell-probe
/// protocol, using `token` as the begin/end marker suffix.
pub fn probe_script(token: &str) -> String {
    format!(
        "printf '__PTMUX_BEGIN_{token}__\\n'\n\
         printf '__PTMUX_CTX__::%s::%s::%s\\n' \"$USER\" \"$HOSTNAME\" \"$SSH_CONNECTION\"\n\
         tmux list-sessions -F '#{{session_name}}' 2>/dev/null\n\
         printf '__PTMUX_END_{token}__\\n'\n"
    )
}

/// Parse the captured output of [`probe_script`] (already ANSI-stripped)
/// between its begin/end markers into a [`ProbeResult`].
pub fn parse_probe_output(output: &str, token: &str) -> Option<ProbeResult> {
    let begin_marker = format!("__PTMUX_BEGIN_{token}__");
    let end_marker = format!("__PTMUX_END_{token}__");

    let start = output.find(&begin_marker)? + begin_marker.len();
    let end = output[start..].find(&end_marker)? + start;
    let body = &output[start..end];

    let mut source_label = "Local machine".to_string();
    let mut ssh_target = None;
    let mut ssh_port = None;
    let mut sessions = Vec::new();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix("__PTMUX_CTX__::") {
            let mut fields = rest.splitn(3, "::");
            let user = fields.next().unwrap_or_default();
            let host = fields.next().unwrap_or_default();
            let ssh_connection = fields.next().unwrap_or_default();
            let mut conn_fields = ssh_connection.split_whitespace();
            let _client_ip = conn_fields.next();
            let _client_port = conn_fields.next();
            let server_ip = conn_fields.next();
            let server_port = conn_fields.next();
            if let (Some(ip), Some(port)) = (server_ip, server_port)
                && let Ok(port) = port.parse::<u16>()
            {
                ssh_target = Some(format!("{user}@{ip}"));
                ssh_port = Some(port);
                source_label = host.to_string();
            }
            continue;
        }
        sessions.push(line.to_string());
    }

    Some(ProbeResult { source_label, ssh_target, ssh_port, sessions })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tmux::types::TmuxPaneId;

    #[test]
    fn control_command_local_named_session() {
        let target = ControlTarget { session_name: Some("dev".to_string()), ..Default::default() };
        let (cmd, args) = control_command(&target);
        assert_eq!(cmd, "tmux");
        assert_eq!(args, vec!["-CC", "new-session", "-A", "-s", "dev"]);
    }

    #[test]
    fn control_command_local_unnamed_session() {
        let (cmd, args) = control_command(&ControlTarget::default());
        assert_eq!(cmd, "tmux");
        assert_eq!(args, vec!["-CC", "new-session", "-A"]);
    }

    #[test]
    fn control_command_remote_wraps_in_ssh() {
        let target = ControlTarget {
            session_name: Some("dev".to_string()),
            ssh_target: Some("user@host".to_string()),
            ssh_port: Some(2222),
        };
        let (cmd, args) = control_command(&target);
        assert_eq!(cmd, "ssh");
        assert_eq!(
            args,
            vec!["-p", "2222", "-tt", "user@host", "tmux", "-CC", "new-session", "-A", "-s", "dev"]
        );
    }

    #[test]
    fn parse_session_list_skips_blanks() {
        let parsed = parse_session_list("dev\n\nwork\n");
        assert_eq!(parsed, vec!["dev".to_string(), "work".to_string()]);
    }

    #[test]
    fn capture_pane_command_clamps_lines() {
        let (cmd, args) = capture_pane_command(TmuxPaneId(1), Some(50), None);
        assert_eq!(cmd, "tmux");
        assert!(args.contains(&"-100".to_string()));

        let (_, args) = capture_pane_command(TmuxPaneId(1), Some(999_999), None);
        assert!(args.contains(&"-5000".to_string()));
    }

    #[test]
    fn capture_pane_command_defaults_to_2000_lines() {
        let (_, args) = capture_pane_command(TmuxPaneId(1), None, None);
        assert!(args.contains(&"-2000".to_string()));
    }

    #[test]
    fn parse_probe_output_extracts_remote_target_and_sessions() {
        let output = "\
__PTMUX_BEGIN_abc__\n\
__PTMUX_CTX__::alice::devbox::10.0.0.5 53212 10.0.0.9 22\n\
dev\n\
work\n\
__PTMUX_END_abc__\n";
        let probe = parse_probe_output(output, "abc").unwrap();
        assert_eq!(probe.ssh_target.as_deref(), Some("alice@10.0.0.9"));
        assert_eq!(probe.ssh_port, Some(22));
        assert_eq!(probe.source_label, "devbox");
        assert_eq!(probe.sessions, vec!["dev".to_string(), "work".to_string()]);
    }

    #[test]
    fn parse_probe_output_returns_none_without_markers() {
        assert!(parse_probe_output("no markers here", "abc").is_none());
    }

    #[test]
    fn capture_pane_command_unbounded_requests_full_scrollback() {
        let (cmd, args) = capture_pane_command_unbounded(TmuxPaneId(1), None);
        assert_eq!(cmd, "tmux");
        assert_eq!(args, vec!["capture-pane", "-p", "-J", "-S", "-", "-t", "%1"]);
    }

    #[test]
    fn capture_pane_command_unbounded_threads_socket_path() {
        let (_, args) = capture_pane_command_unbounded(TmuxPaneId(3), Some("/tmp/sock"));
        assert_eq!(args, vec!["-S", "/tmp/sock", "capture-pane", "-p", "-J", "-S", "-", "-t", "%3"]);
    }
}
