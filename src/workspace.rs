//! Workspace Coordinator (C6).
//!
//! Owns the ordered set of tabs and mediates between UI-facing actions, the
//! PTY manager, and the tmux controllers bound to any attached control
//! sessions. This is the only place that knows both "what the user asked
//! for" and "which backend (local PTY vs. tmux window) actually owns a
//! given pane".

use crate::config::Config;
use crate::error::WorkspaceError;
use crate::layout::{LayoutNode, PaneId, SplitDirection};
use crate::pty::{Backend, CreateOptions, PtyKind, PtyManager, PtyEvent, SessionId as PtySessionId};
use crate::tmux::controller::{ControllerAction, TmuxController};
use crate::tmux::types::{TmuxPaneId, TmuxWindowId};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque, process-unique tab identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

impl TabId {
    pub fn fresh() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TabId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Which backend a pane's bytes flow through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneBackendKind {
    Local { session_id: PtySessionId },
    Tmux { control_session_id: PtySessionId, tmux_pane_id: TmuxPaneId },
}

/// One tab in the workspace: either a plain local shell (single pane, no
/// layout tree needed beyond the trivial one-pane case) or a window bound
/// to a tmux control session, whose layout is reconciled by that session's
/// [`TmuxController`].
pub struct Tab {
    pub id: TabId,
    pub title: String,
    pub layout: LayoutNode<PaneId>,
    pub active_pane_id: PaneId,
    pub backend: HashMap<PaneId, PaneBackendKind>,
    pub control_session_id: Option<PtySessionId>,
}

impl Tab {
    fn new_local(id: TabId, title: String, pane_id: PaneId, session_id: PtySessionId) -> Self {
        let mut backend = HashMap::new();
        backend.insert(pane_id, PaneBackendKind::Local { session_id });
        Self {
            id,
            title,
            layout: LayoutNode::pane(pane_id),
            active_pane_id: pane_id,
            backend,
            control_session_id: None,
        }
    }

    fn is_tmux_bound(&self) -> bool {
        self.control_session_id.is_some()
    }
}

/// A user-facing request the host surface (menu, keybinding) can issue.
#[derive(Debug, Clone)]
pub enum MenuAction {
    NewTab,
    TmuxAttach { session_name: Option<String> },
    TmuxDetach,
    SplitHorizontal,
    SplitVertical,
    ClosePane,
}

/// Events the coordinator raises for the renderer to react to.
#[derive(Debug, Clone)]
pub enum WorkspaceEvent {
    TabCreated { tab_id: TabId },
    TabClosed { tab_id: TabId },
    TabRenamed { tab_id: TabId, title: String },
    LayoutChanged { tab_id: TabId },
    ActivePaneChanged { tab_id: TabId, pane_id: PaneId },
    PaneOutput { pane_id: PaneId, bytes: Vec<u8> },
    PaneNotice { pane_id: PaneId, text: String },
}

pub struct WorkspaceCoordinator {
    config: Config,
    order: Vec<TabId>,
    tabs: HashMap<TabId, Tab>,
    active_tab: Option<TabId>,
    controllers: HashMap<PtySessionId, TmuxController>,
    pty_session_to_pane: HashMap<PtySessionId, (TabId, PaneId)>,
}

impl WorkspaceCoordinator {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            order: Vec::new(),
            tabs: HashMap::new(),
            active_tab: None,
            controllers: HashMap::new(),
            pty_session_to_pane: HashMap::new(),
        }
    }

    pub fn active_tab(&self) -> Option<&Tab> {
        self.active_tab.and_then(|id| self.tabs.get(&id))
    }

    pub fn tabs_in_order(&self) -> impl Iterator<Item = &Tab> {
        self.order.iter().filter_map(|id| self.tabs.get(id))
    }

    /// *Create local tab*: spawn a shell and give it a single-pane tab.
    pub fn create_local_tab(
        &mut self,
        pty: &mut PtyManager,
        opts: CreateOptions,
    ) -> Result<TabId, WorkspaceError> {
        let (session_id, _pid, backend) = pty.create(PtyKind::Shell, opts)?;
        let tab_id = TabId::fresh();
        let pane_id = PaneId::fresh();
        let tab = Tab::new_local(tab_id, "shell".to_string(), pane_id, session_id);
        self.tabs.insert(tab_id, tab);
        self.order.push(tab_id);
        self.active_tab = Some(tab_id);
        self.pty_session_to_pane.insert(session_id, (tab_id, pane_id));
        log::info!("created local tab {tab_id} on {backend:?} backend");
        Ok(tab_id)
    }

    /// *Split active pane*: tmux pane → emit a control command; local pane
    /// → spawn another shell and graft it into the tab's layout tree.
    pub fn split_active_pane(
        &mut self,
        pty: &mut PtyManager,
        direction: SplitDirection,
        opts: CreateOptions,
    ) -> Result<(), WorkspaceError> {
        let tab_id = self.active_tab.ok_or(WorkspaceError::UnknownTab(TabId(0)))?;
        let tab = self.tabs.get(&tab_id).ok_or(WorkspaceError::UnknownTab(tab_id))?;

        if let Some(PaneBackendKind::Tmux { control_session_id, tmux_pane_id }) =
            tab.backend.get(&tab.active_pane_id).copied()
        {
            let cmd = match direction {
                SplitDirection::Horizontal => crate::tmux::commands::TmuxCommand::split_horizontal(tmux_pane_id),
                SplitDirection::Vertical => crate::tmux::commands::TmuxCommand::split_vertical(tmux_pane_id),
            };
            pty.write(control_session_id, &cmd.as_bytes());
            return Ok(());
        }

        let (session_id, _pid, _backend) = pty.create(PtyKind::Shell, opts)?;
        let new_pane = PaneId::fresh();
        let tab = self.tabs.get_mut(&tab_id).ok_or(WorkspaceError::UnknownTab(tab_id))?;
        tab.layout = tab.layout.split_at(&tab.active_pane_id, direction, new_pane);
        tab.backend.insert(new_pane, PaneBackendKind::Local { session_id });
        tab.active_pane_id = new_pane;
        self.pty_session_to_pane.insert(session_id, (tab_id, new_pane));
        Ok(())
    }

    /// *Close active pane*.
    pub fn close_active_pane(&mut self, pty: &mut PtyManager) -> Result<(), WorkspaceError> {
        let tab_id = self.active_tab.ok_or(WorkspaceError::UnknownTab(TabId(0)))?;
        let tab = self.tabs.get(&tab_id).ok_or(WorkspaceError::UnknownTab(tab_id))?;
        let active_pane = tab.active_pane_id;

        match tab.backend.get(&active_pane).copied() {
            Some(PaneBackendKind::Tmux { control_session_id, tmux_pane_id }) => {
                let cmd = crate::tmux::commands::TmuxCommand::kill_pane(tmux_pane_id);
                pty.write(control_session_id, &cmd.as_bytes());
            }
            Some(PaneBackendKind::Local { session_id }) => {
                if tab.backend.len() > 1 {
                    let remaining = tab.layout.remove_pane(&active_pane);
                    pty.kill(session_id);
                    self.pty_session_to_pane.remove(&session_id);
                    let tab = self.tabs.get_mut(&tab_id).expect("tab exists");
                    tab.backend.remove(&active_pane);
                    if let Some(layout) = remaining {
                        let next_active = layout.collect_panes().into_iter().next();
                        tab.layout = layout;
                        if let Some(next) = next_active {
                            tab.active_pane_id = next;
                        }
                    }
                } else {
                    pty.kill(session_id);
                    self.pty_session_to_pane.remove(&session_id);
                    self.close_tab_internal(tab_id);
                }
            }
            None => {}
        }
        Ok(())
    }

    /// *Close tab*.
    pub fn close_tab(&mut self, pty: &mut PtyManager, tab_id: TabId) -> Result<(), WorkspaceError> {
        let tab = self.tabs.get(&tab_id).ok_or(WorkspaceError::UnknownTab(tab_id))?;
        if let Some(control_session_id) = tab.control_session_id {
            let remaining_tmux_tabs = self
                .tabs
                .values()
                .filter(|t| t.control_session_id == Some(control_session_id))
                .count();
            if remaining_tmux_tabs <= 1 {
                pty.write(control_session_id, &crate::tmux::commands::TmuxCommand::detach_client().as_bytes());
            } else if let Some(window_id) = self.window_id_for_tab(control_session_id, tab_id) {
                let cmd = crate::tmux::commands::TmuxCommand::kill_window(window_id);
                pty.write(control_session_id, &cmd.as_bytes());
            }
        } else {
            let sessions: Vec<PtySessionId> = tab
                .backend
                .values()
                .filter_map(|b| match b {
                    PaneBackendKind::Local { session_id } => Some(*session_id),
                    PaneBackendKind::Tmux { .. } => None,
                })
                .collect();
            for session_id in sessions {
                pty.kill(session_id);
                self.pty_session_to_pane.remove(&session_id);
            }
        }
        self.close_tab_internal(tab_id);
        Ok(())
    }

    fn window_id_for_tab(&self, control_session_id: PtySessionId, tab_id: TabId) -> Option<TmuxWindowId> {
        self.controllers
            .get(&control_session_id)
            .and_then(|c| c.window_for_tab(tab_id))
    }

    fn close_tab_internal(&mut self, tab_id: TabId) {
        self.tabs.remove(&tab_id);
        self.order.retain(|id| *id != tab_id);
        if self.active_tab == Some(tab_id) {
            self.active_tab = self.order.first().copied();
        }
    }

    /// *Attach tmux*: spawn a dedicated control PTY for `target` and
    /// register a fresh controller for it, issuing the bootstrap commands.
    /// Fails if the resulting backend isn't a real PTY (§6 — `start_tmux_control`).
    pub fn start_tmux_control(
        &mut self,
        pty: &mut PtyManager,
        target: &crate::tmux::session::ControlTarget,
        cwd: Option<std::path::PathBuf>,
    ) -> Result<PtySessionId, WorkspaceError> {
        let (command, args) = crate::tmux::session::control_command(target);
        let opts = CreateOptions { cwd, command: Some(command), args, ..Default::default() };
        let (session_id, _pid, backend) = pty.create(PtyKind::TmuxControl, opts)?;
        debug_assert_ne!(backend, Backend::Pipe, "PtyManager enforces this for TmuxControl kind");

        let mut controller = TmuxController::new(self.config.clone());
        let bootstrap = controller.bootstrap_commands();
        self.controllers.insert(session_id, controller);
        self.apply_controller_actions(pty, session_id, bootstrap);
        Ok(session_id)
    }

    /// *Detach*: send `detach-client` on a control session's PTY.
    pub fn detach(&mut self, pty: &mut PtyManager, control_session_id: PtySessionId) {
        pty.write(control_session_id, &crate::tmux::commands::TmuxCommand::detach_client().as_bytes());
    }

    /// Route a keystroke from the active pane: local panes go straight to
    /// the PTY, tmux panes are hex-encoded per §4.5.
    pub fn write_active_pane(&mut self, pty: &mut PtyManager, bytes: &[u8]) -> bool {
        let Some(tab) = self.active_tab().and_then(|t| Some((t.id, t.active_pane_id, t.backend.get(&t.active_pane_id).copied())))
        else {
            return false;
        };
        let (_tab_id, _pane_id, backend) = tab;
        match backend {
            Some(PaneBackendKind::Local { session_id }) => pty.write(session_id, bytes),
            Some(PaneBackendKind::Tmux { control_session_id, tmux_pane_id }) => {
                if bytes.is_empty() {
                    return true;
                }
                let cmd = crate::tmux::commands::TmuxCommand::send_keys_hex(tmux_pane_id, bytes);
                pty.write(control_session_id, &cmd.as_bytes())
            }
            None => false,
        }
    }

    /// Exit routing for a PTY session that just reported `exit`.
    pub fn handle_pty_exit(&mut self, pty: &mut PtyManager, session_id: PtySessionId, exit_code: i32) -> Vec<WorkspaceEvent> {
        let mut events = Vec::new();

        if let Some((tab_id, pane_id)) = self.pty_session_to_pane.remove(&session_id) {
            let notice = format!("\r\n[Process exited with code {exit_code}]\r\n");
            events.push(WorkspaceEvent::PaneNotice { pane_id, text: notice });
            let _ = tab_id;
            return events;
        }

        if let Some(controller) = self.controllers.remove(&session_id) {
            let bound_tabs: Vec<TabId> = self
                .tabs
                .iter()
                .filter(|(_, t)| t.control_session_id == Some(session_id))
                .map(|(id, _)| *id)
                .collect();
            for tab_id in &bound_tabs {
                events.push(WorkspaceEvent::TabClosed { tab_id: *tab_id });
            }
            for tab_id in bound_tabs {
                self.close_tab_internal(tab_id);
            }
            drop(controller);

            if self.tabs.is_empty() {
                if let Ok(tab_id) = self.create_local_tab(pty, CreateOptions::default()) {
                    events.push(WorkspaceEvent::TabCreated { tab_id });
                }
            }
        }

        events
    }

    /// Apply controller-produced reconciliation actions to the workspace's
    /// own tab bookkeeping, translating the controller's internal view into
    /// [`WorkspaceEvent`]s for the renderer.
    pub fn apply_controller_actions(
        &mut self,
        pty: &mut PtyManager,
        control_session_id: PtySessionId,
        actions: Vec<ControllerAction>,
    ) -> Vec<WorkspaceEvent> {
        let mut events = Vec::new();
        for action in actions {
            match action {
                ControllerAction::WriteControlCommand(command) => {
                    pty.write(control_session_id, command.as_bytes());
                }
                ControllerAction::TabBound { tab_id, layout, panes, active_pane_id, title } => {
                    let entry = self.tabs.entry(tab_id).or_insert_with(|| Tab {
                        id: tab_id,
                        title: title.clone(),
                        layout: LayoutNode::pane(active_pane_id),
                        active_pane_id,
                        backend: HashMap::new(),
                        control_session_id: Some(control_session_id),
                    });
                    entry.title = title;
                    entry.layout = layout;
                    entry.active_pane_id = active_pane_id;
                    for (tmux_pane_id, pane_id) in panes {
                        entry.backend.insert(
                            pane_id,
                            PaneBackendKind::Tmux { control_session_id, tmux_pane_id },
                        );
                    }
                    if !self.order.contains(&tab_id) {
                        self.order.push(tab_id);
                        if self.active_tab.is_none() {
                            self.active_tab = Some(tab_id);
                        }
                        events.push(WorkspaceEvent::TabCreated { tab_id });
                    }
                    events.push(WorkspaceEvent::LayoutChanged { tab_id });
                }
                ControllerAction::TabRenamed { tab_id, title } => {
                    if let Some(tab) = self.tabs.get_mut(&tab_id) {
                        tab.title = title.clone();
                    }
                    events.push(WorkspaceEvent::TabRenamed { tab_id, title });
                }
                ControllerAction::TabUnbound { tab_id } => {
                    self.close_tab_internal(tab_id);
                    events.push(WorkspaceEvent::TabClosed { tab_id });
                    if self.tabs.is_empty() {
                        if let Ok(new_tab) = self.create_local_tab(pty, CreateOptions::default()) {
                            events.push(WorkspaceEvent::TabCreated { tab_id: new_tab });
                        }
                    }
                }
                ControllerAction::ActivePaneChanged { tab_id, pane_id } => {
                    if let Some(tab) = self.tabs.get_mut(&tab_id) {
                        tab.active_pane_id = pane_id;
                    }
                    events.push(WorkspaceEvent::ActivePaneChanged { tab_id, pane_id });
                }
                ControllerAction::PaneOutput { pane_id, bytes } => {
                    events.push(WorkspaceEvent::PaneOutput { pane_id, bytes });
                }
                ControllerAction::CaptureOutOfBand { tmux_pane_id, socket_path, lines } => {
                    let captured = capture_pane_out_of_band(tmux_pane_id, socket_path.as_deref(), lines);
                    let follow_up = {
                        let Some(controller) = self.controllers.get_mut(&control_session_id) else {
                            continue;
                        };
                        // `lines: None` is how the bootstrap sniffer marks a
                        // capture issued before the pane has a tab binding
                        // (pane-list probe runs before window-list probe);
                        // its result can only be stashed as a prefetch, not
                        // resolved directly.
                        if lines.is_none() {
                            if let Some(bytes) = captured {
                                controller.record_prefetch(tmux_pane_id, bytes);
                            }
                            Vec::new()
                        } else {
                            controller.resolve_capture(tmux_pane_id, captured)
                        }
                    };
                    events.extend(self.apply_controller_actions(pty, control_session_id, follow_up));
                }
                ControllerAction::SessionRenamed(_) => {
                    // No tab-level effect; the controller already updated
                    // its own session_name for future command construction.
                }
            }
        }
        events
    }

    /// Drive bytes arriving on a control session's PTY through its
    /// controller and apply whatever reconciliation falls out.
    pub fn feed_control_bytes(
        &mut self,
        pty: &mut PtyManager,
        control_session_id: PtySessionId,
        bytes: &[u8],
    ) -> Vec<WorkspaceEvent> {
        let Some(controller) = self.controllers.get_mut(&control_session_id) else {
            return Vec::new();
        };
        let actions = controller.feed(bytes);
        self.apply_controller_actions(pty, control_session_id, actions)
    }

    pub fn register_controller(&mut self, control_session_id: PtySessionId, controller: TmuxController) {
        self.controllers.insert(control_session_id, controller);
    }

    pub fn handle_pty_data(&mut self, pty: &mut PtyManager, event: PtyEvent) -> Vec<WorkspaceEvent> {
        match event {
            PtyEvent::Data { session_id, kind, backend, bytes } => {
                let _ = backend;
                match kind {
                    PtyKind::TmuxControl => self.feed_control_bytes(pty, session_id, &bytes),
                    PtyKind::Shell => {
                        if let Some((_tab_id, pane_id)) = self.pty_session_to_pane.get(&session_id).copied() {
                            vec![WorkspaceEvent::PaneOutput { pane_id, bytes }]
                        } else {
                            Vec::new()
                        }
                    }
                }
            }
            PtyEvent::Exit { session_id, exit_code, .. } => self.handle_pty_exit(pty, session_id, exit_code),
        }
    }

    /// *List tmux sessions*: best-effort enumeration of sessions visible on
    /// the local tmux server. Empty on Windows (no local tmux to probe) or
    /// on any subprocess error, per §6.
    pub fn list_tmux_sessions(&self) -> Vec<String> {
        if cfg!(windows) {
            return Vec::new();
        }
        let (program, args) = crate::tmux::session::list_sessions_command();
        match run_tmux_command(&program, &args) {
            Some(bytes) => crate::tmux::session::parse_session_list(&String::from_utf8_lossy(&bytes)),
            None => Vec::new(),
        }
    }

    /// *Capture tmux pane*: an explicit, renderer-requested capture of a
    /// pane's scrollback, independent of the controller's own history
    /// hydration. `lines` defaults to 2000 and is clamped to [100, 5000].
    pub fn capture_tmux_pane(
        &self,
        pane_id: TmuxPaneId,
        lines: Option<i64>,
        socket_path: Option<&str>,
    ) -> Option<String> {
        let (program, args) = crate::tmux::session::capture_pane_command(pane_id, lines, socket_path);
        run_tmux_command(&program, &args).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Run an out-of-band `capture-pane` for history hydration, following
/// §4.5's fallback: the full scrollback first, then a bounded retry (the
/// explicitly requested line count, or 3000) if the first attempt came back
/// empty or failed.
fn capture_pane_out_of_band(
    tmux_pane_id: TmuxPaneId,
    socket_path: Option<&str>,
    lines: Option<i64>,
) -> Option<Vec<u8>> {
    let (program, args) = crate::tmux::session::capture_pane_command_unbounded(tmux_pane_id, socket_path);
    if let Some(output) = run_tmux_command(&program, &args)
        && !output.is_empty()
    {
        return Some(output);
    }

    let (program, args) =
        crate::tmux::session::capture_pane_command(tmux_pane_id, Some(lines.unwrap_or(3000)), socket_path);
    run_tmux_command(&program, &args).filter(|output| !output.is_empty())
}

/// Run a tmux subprocess to completion and return its stdout on success.
/// Blocking, matching this codebase's idiom for one-off external commands
/// (see e.g. snippet/trigger invocation): `capture-pane` and `list-sessions`
/// are short-lived and this isn't called from a context where blocking the
/// caller's thread is unacceptable.
fn run_tmux_command(program: &str, args: &[String]) -> Option<Vec<u8>> {
    let output = std::process::Command::new(program).args(args).output().ok()?;
    output.status.success().then_some(output.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tab_id_fresh_values_are_unique() {
        let a = TabId::fresh();
        let b = TabId::fresh();
        assert_ne!(a, b);
    }
}
