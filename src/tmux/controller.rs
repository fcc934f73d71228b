//! Per-control-session state machine (C5).
//!
//! One [`TmuxController`] owns a single control PTY's byte stream: it does
//! line framing, correlates `%begin`/`%end` transactions FIFO, sniffs the
//! bootstrap markers emitted during startup, dispatches the remaining
//! control-mode events (C3), and reconciles tmux windows/panes into tabs
//! and a [`LayoutNode`] per §4.5. It never touches the PTY registry or the
//! workspace's tab list directly — it only ever returns a list of
//! [`ControllerAction`]s for the caller (the workspace coordinator) to
//! apply, keeping each piece of state owned by exactly one part of the
//! system (see §9's "no shared mutability" note).

use super::control_parser::{self, ControlEvent};
use super::layout_parser::{self, TmuxLayoutNode};
use super::types::{TmuxPaneId, TmuxWindowId};
use crate::config::Config;
use crate::layout::{LayoutNode, PaneId, SplitDirection};
use crate::workspace::TabId;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use tokio::time::{Duration, Instant};

const ED3J: &[&str] = &["\u{1b}[?3J", "\u{1b}[3J"];

#[derive(Debug)]
struct PaneBinding {
    tab_id: TabId,
    pane_id: PaneId,
}

#[derive(Debug, Default)]
struct BootstrapBuffer {
    chunks: Vec<u8>,
    deadline: Option<Instant>,
    resolved: bool,
}

/// A queued `%begin`/`%end` correlated command, not yet written.
struct PendingTransaction {
    command: String,
    resolver: oneshot::Sender<String>,
}

/// The transaction currently at the head of the queue, already written.
struct ActiveTransaction {
    resolver: oneshot::Sender<String>,
    lines: Vec<String>,
    collecting: bool,
    deadline: Instant,
}

/// Reconciled state for one tmux window bound to a tab.
#[derive(Debug, Clone)]
struct ControlledTab {
    layout: TmuxLayoutNode,
    panes: HashMap<TmuxPaneId, PaneId>,
    active_pane_id: Option<PaneId>,
    title: String,
}

/// Output of [`TmuxController::feed`]/[`TmuxController::poll_timeouts`] for
/// the workspace coordinator to apply.
#[derive(Debug, Clone)]
pub enum ControllerAction {
    /// Write this command (already newline-terminated) to the control PTY.
    WriteControlCommand(String),
    /// A tab is now bound (or re-bound) to this reconciled tmux state.
    TabBound {
        tab_id: TabId,
        layout: LayoutNode<PaneId>,
        panes: Vec<(TmuxPaneId, PaneId)>,
        active_pane_id: PaneId,
        title: String,
    },
    TabRenamed { tab_id: TabId, title: String },
    TabUnbound { tab_id: TabId },
    ActivePaneChanged { tab_id: TabId, pane_id: PaneId },
    PaneOutput { pane_id: PaneId, bytes: Vec<u8> },
    /// Ask the caller to run an out-of-band `tmux ... capture-pane` and
    /// report back via [`TmuxController::resolve_capture`].
    CaptureOutOfBand {
        tmux_pane_id: TmuxPaneId,
        socket_path: Option<String>,
        lines: Option<i64>,
    },
    SessionRenamed(String),
}

pub struct TmuxController {
    session_name: String,
    socket_path: Option<String>,
    tmux_binary: String,
    window_to_tab: HashMap<TmuxWindowId, TabId>,
    tab_to_window: HashMap<TabId, TmuxWindowId>,
    pane_to_native: HashMap<TmuxPaneId, PaneBinding>,
    tabs: HashMap<TabId, ControlledTab>,
    line_buffer: Vec<u8>,
    pending_transactions: VecDeque<PendingTransaction>,
    active_transaction: Option<ActiveTransaction>,
    prefetched_history: HashMap<TmuxPaneId, Vec<u8>>,
    bootstrap_buffers: HashMap<TmuxPaneId, BootstrapBuffer>,
    last_client_size: Option<(u16, u16)>,
    last_pane_size: HashMap<TmuxPaneId, (u16, u16)>,
    config: Config,
}

impl TmuxController {
    pub fn new(config: Config) -> Self {
        Self {
            session_name: String::new(),
            socket_path: None,
            tmux_binary: config.tmux_binary.clone(),
            window_to_tab: HashMap::new(),
            tab_to_window: HashMap::new(),
            pane_to_native: HashMap::new(),
            tabs: HashMap::new(),
            line_buffer: Vec::new(),
            pending_transactions: VecDeque::new(),
            active_transaction: None,
            prefetched_history: HashMap::new(),
            bootstrap_buffers: HashMap::new(),
            last_client_size: None,
            last_pane_size: HashMap::new(),
            config,
        }
    }

    pub fn window_for_tab(&self, tab_id: TabId) -> Option<TmuxWindowId> {
        self.tab_to_window.get(&tab_id).copied()
    }

    /// Bootstrap commands submitted right after the control PTY is spawned,
    /// in the fixed order §4.5 specifies.
    pub fn bootstrap_commands(&mut self) -> Vec<ControllerAction> {
        let mut actions = Vec::new();
        actions.extend(self.enqueue(super::commands::TmuxCommand::socket_path_probe().as_str()));
        actions.extend(self.enqueue(super::commands::TmuxCommand::pane_list_probe().as_str()));
        actions.extend(self.enqueue(super::commands::TmuxCommand::window_list_probe().as_str()));
        actions
    }

    fn enqueue(&mut self, command: &str) -> Vec<ControllerAction> {
        let (resolver, _rx) = oneshot::channel();
        self.pending_transactions.push_back(PendingTransaction {
            command: command.to_string(),
            resolver,
        });
        self.try_activate_next()
    }

    fn try_activate_next(&mut self) -> Vec<ControllerAction> {
        if self.active_transaction.is_some() {
            return Vec::new();
        }
        let Some(pending) = self.pending_transactions.pop_front() else {
            return Vec::new();
        };
        let deadline = Instant::now() + Duration::from_millis(self.config.transaction_timeout_ms);
        self.active_transaction = Some(ActiveTransaction {
            resolver: pending.resolver,
            lines: Vec::new(),
            collecting: false,
            deadline,
        });
        vec![ControllerAction::WriteControlCommand(format!("{}\n", pending.command))]
    }

    /// The earliest deadline this controller is waiting on: the active
    /// transaction's 5s timer, or the nearest bootstrap flush deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        let tx_deadline = self.active_transaction.as_ref().map(|a| a.deadline);
        let buf_deadline = self.bootstrap_buffers.values().filter_map(|b| b.deadline).min();
        match (tx_deadline, buf_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Called when `next_deadline()` has elapsed; resolves whichever
    /// deadline(s) actually passed.
    pub fn poll_timeouts(&mut self) -> Vec<ControllerAction> {
        let mut actions = Vec::new();
        let now = Instant::now();

        if let Some(active) = &self.active_transaction
            && active.deadline <= now
        {
            let active = self.active_transaction.take().unwrap();
            let _ = active.resolver.send(String::new());
            actions.extend(self.try_activate_next());
        }

        let expired: Vec<TmuxPaneId> = self
            .bootstrap_buffers
            .iter()
            .filter(|(_, b)| b.deadline.is_some_and(|d| d <= now))
            .map(|(id, _)| *id)
            .collect();
        for tmux_pane_id in expired {
            actions.extend(self.flush_bootstrap(tmux_pane_id, None));
        }

        actions
    }

    /// Feed freshly-arrived bytes through line framing and dispatch.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<ControllerAction> {
        self.line_buffer.extend_from_slice(bytes);
        let mut actions = Vec::new();

        loop {
            let Some(newline_pos) = self.line_buffer.iter().position(|&b| b == b'\n') else {
                break;
            };
            let mut line_bytes: Vec<u8> = self.line_buffer.drain(..=newline_pos).collect();
            line_bytes.pop();
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.pop();
            }
            let line = String::from_utf8_lossy(&line_bytes).into_owned();
            actions.extend(self.handle_line(&line));
        }

        actions
    }

    fn handle_line(&mut self, line: &str) -> Vec<ControllerAction> {
        if let Some(actions) = self.handle_transaction_line(line) {
            return actions;
        }
        if let Some(actions) = self.handle_bootstrap_sniffer(line) {
            return actions;
        }
        self.dispatch_event(control_parser::parse_line(line))
    }

    fn handle_transaction_line(&mut self, line: &str) -> Option<Vec<ControllerAction>> {
        let active = self.active_transaction.as_mut()?;

        if let Some(_rest) = line.strip_prefix("%begin") {
            active.collecting = true;
            return Some(Vec::new());
        }
        if line.starts_with("%end") {
            let active = self.active_transaction.take().unwrap();
            let _ = active.resolver.send(active.lines.join("\n"));
            return Some(self.try_activate_next());
        }
        if line.starts_with("%error") {
            let active = self.active_transaction.take().unwrap();
            let _ = active.resolver.send(String::new());
            return Some(self.try_activate_next());
        }
        if active.collecting && !line.starts_with('%') {
            active.lines.push(line.to_string());
            return Some(Vec::new());
        }
        None
    }

    fn handle_bootstrap_sniffer(&mut self, line: &str) -> Option<Vec<ControllerAction>> {
        if let Some(path) = line.strip_prefix("__SOCKET__::") {
            self.socket_path = Some(path.to_string());
            return Some(Vec::new());
        }
        if let Some(rest) = line.strip_prefix("__PANE__::") {
            let mut parts = rest.splitn(2, "::");
            let (Some(_window_id), Some(pane_id)) = (parts.next(), parts.next()) else {
                return Some(Vec::new());
            };
            let Ok(tmux_pane_id) = pane_id.parse::<TmuxPaneId>() else {
                return Some(Vec::new());
            };
            let mut actions = Vec::new();
            actions.push(ControllerAction::CaptureOutOfBand {
                tmux_pane_id,
                socket_path: self.socket_path.clone(),
                lines: None,
            });
            return Some(actions);
        }
        if let Some(rest) = line.strip_prefix("__WINDOW__::") {
            let mut parts = rest.splitn(3, "::");
            let (Some(window_id), Some(name), Some(layout)) =
                (parts.next(), parts.next(), parts.next())
            else {
                return Some(Vec::new());
            };
            let Ok(window_id) = window_id.parse::<TmuxWindowId>() else {
                return Some(Vec::new());
            };
            return Some(self.apply_layout(window_id, layout, Some(name.to_string())));
        }
        None
    }

    fn dispatch_event(&mut self, event: ControlEvent) -> Vec<ControllerAction> {
        match event {
            ControlEvent::Output { pane_id, data } => self.handle_output(&pane_id, data),
            ControlEvent::WindowAdd { window_id } => match window_id.parse::<TmuxWindowId>() {
                Ok(window_id) => self.apply_layout(window_id, "80x24,0,0,0", None),
                Err(_) => Vec::new(),
            },
            ControlEvent::WindowClose { window_id } => match window_id.parse::<TmuxWindowId>() {
                Ok(window_id) => self.handle_window_close(window_id),
                Err(_) => Vec::new(),
            },
            ControlEvent::WindowRenamed { window_id, name } => match window_id.parse::<TmuxWindowId>() {
                Ok(window_id) => self.handle_window_renamed(window_id, name),
                Err(_) => Vec::new(),
            },
            ControlEvent::LayoutChange { window_id, layout } => match window_id.parse::<TmuxWindowId>() {
                Ok(window_id) => self.apply_layout(window_id, &layout, None),
                Err(_) => Vec::new(),
            },
            ControlEvent::WindowPaneChanged { window_id, pane_id } => match window_id.parse::<TmuxWindowId>() {
                Ok(window_id) => self.handle_window_pane_changed(window_id, &pane_id),
                Err(_) => Vec::new(),
            },
            ControlEvent::SessionChanged { session_name } => {
                self.session_name = session_name.clone();
                vec![ControllerAction::SessionRenamed(session_name)]
            }
            ControlEvent::Begin | ControlEvent::End | ControlEvent::Error { .. } | ControlEvent::Other { .. } => {
                Vec::new()
            }
        }
    }

    fn handle_output(&mut self, pane_id: &str, data: Vec<u8>) -> Vec<ControllerAction> {
        let Ok(tmux_pane_id) = pane_id.parse::<TmuxPaneId>() else {
            return Vec::new();
        };
        let sanitized = strip_erase_scrollback(&data);

        if let Some(buffer) = self.bootstrap_buffers.get_mut(&tmux_pane_id) {
            buffer.chunks.extend_from_slice(&sanitized);
            if buffer.chunks.len() > self.config.bootstrap_buffer_cap_bytes {
                let overflow = buffer.chunks.len() - self.config.bootstrap_buffer_cap_bytes;
                buffer.chunks.drain(..overflow.min(buffer.chunks.len()));
            }
            return Vec::new();
        }

        let Some(binding) = self.pane_to_native.get(&tmux_pane_id) else {
            return Vec::new();
        };
        vec![ControllerAction::PaneOutput { pane_id: binding.pane_id, bytes: sanitized }]
    }

    fn handle_window_close(&mut self, window_id: TmuxWindowId) -> Vec<ControllerAction> {
        let Some(tab_id) = self.window_to_tab.remove(&window_id) else {
            return Vec::new();
        };
        self.tab_to_window.remove(&tab_id);
        self.tabs.remove(&tab_id);
        let stale: Vec<TmuxPaneId> = self
            .pane_to_native
            .iter()
            .filter(|(_, binding)| binding.tab_id == tab_id)
            .map(|(id, _)| *id)
            .collect();
        for tmux_pane_id in stale {
            self.pane_to_native.remove(&tmux_pane_id);
            self.bootstrap_buffers.remove(&tmux_pane_id);
            self.last_pane_size.remove(&tmux_pane_id);
        }
        vec![ControllerAction::TabUnbound { tab_id }]
    }

    fn handle_window_renamed(&mut self, window_id: TmuxWindowId, name: String) -> Vec<ControllerAction> {
        let Some(&tab_id) = self.window_to_tab.get(&window_id) else {
            return Vec::new();
        };
        if let Some(tab) = self.tabs.get_mut(&tab_id) {
            tab.title = name.clone();
        }
        vec![ControllerAction::TabRenamed { tab_id, title: name }]
    }

    fn handle_window_pane_changed(&mut self, window_id: TmuxWindowId, pane_id: &str) -> Vec<ControllerAction> {
        let Some(&tab_id) = self.window_to_tab.get(&window_id) else {
            return Vec::new();
        };
        let Ok(tmux_pane_id) = pane_id.parse::<TmuxPaneId>() else {
            return Vec::new();
        };
        let Some(binding) = self.pane_to_native.get(&tmux_pane_id) else {
            return Vec::new();
        };
        if let Some(tab) = self.tabs.get_mut(&tab_id) {
            tab.active_pane_id = Some(binding.pane_id);
        }
        vec![ControllerAction::ActivePaneChanged { tab_id, pane_id: binding.pane_id }]
    }

    /// §4.5's 8-step reconciliation.
    fn apply_layout(
        &mut self,
        window_id: TmuxWindowId,
        layout_str: &str,
        title: Option<String>,
    ) -> Vec<ControllerAction> {
        let mut actions = Vec::new();

        // Step 1: look up or create the TabId for this window.
        let tab_id = *self.window_to_tab.entry(window_id).or_insert_with(TabId::fresh);
        self.tab_to_window.insert(tab_id, window_id);

        // Step 2: parse, minting native panes for any new tmux pane id.
        let parsed = layout_parser::parse_layout(layout_str).unwrap_or_else(layout_parser::fallback_layout);
        let mut freshly_bound = Vec::new();
        for tmux_pane_id in parsed.collect_panes() {
            let already_bound = self
                .pane_to_native
                .get(&tmux_pane_id)
                .is_some_and(|b| b.tab_id == tab_id);
            if !already_bound {
                let pane_id = PaneId::fresh();
                self.pane_to_native.insert(tmux_pane_id, PaneBinding { tab_id, pane_id });
                let deadline = Instant::now() + Duration::from_millis(self.config.bootstrap_flush_deadline_ms);
                self.bootstrap_buffers.insert(
                    tmux_pane_id,
                    BootstrapBuffer { chunks: Vec::new(), deadline: Some(deadline), resolved: false },
                );
                freshly_bound.push(tmux_pane_id);
            }
        }

        // Step 3: drop bindings for panes no longer live in this tab.
        let live: std::collections::HashSet<TmuxPaneId> = parsed.collect_panes().into_iter().collect();
        let stale: Vec<TmuxPaneId> = self
            .pane_to_native
            .iter()
            .filter(|(tmux_pane_id, binding)| binding.tab_id == tab_id && !live.contains(tmux_pane_id))
            .map(|(id, _)| *id)
            .collect();
        for tmux_pane_id in stale {
            self.pane_to_native.remove(&tmux_pane_id);
            self.bootstrap_buffers.remove(&tmux_pane_id);
            self.last_pane_size.remove(&tmux_pane_id);
        }

        // Step 4: compute the tab's pane map and active pane.
        let panes: HashMap<TmuxPaneId, PaneId> = live
            .iter()
            .filter_map(|id| self.pane_to_native.get(id).map(|b| (*id, b.pane_id)))
            .collect();
        let previous = self.tabs.get(&tab_id);
        let active_pane_id = previous
            .and_then(|t| t.active_pane_id)
            .filter(|p| panes.values().any(|v| v == p))
            .or_else(|| parsed.collect_panes().first().and_then(|id| panes.get(id).copied()));

        // Step 5: merge with the previous layout, translating tmux ids to
        // native ones as we go so ratios line up against the prior tree.
        let native_layout = translate_layout(&parsed, &panes);
        let merged = match previous.map(|t| translate_layout(&t.layout, &panes)) {
            Some(prev_native) => prev_native.preserve_ratios(&native_layout),
            None => native_layout,
        };

        // Step 6: install the reconciled state. `layout` persists the
        // *merged* (ratio-preserved) tree, translated back into tmux-id
        // space, so the next reconciliation's `previous` reflects what was
        // actually installed rather than tmux's raw last-reported ratio.
        let reverse_panes: HashMap<PaneId, TmuxPaneId> = panes.iter().map(|(t, n)| (*n, *t)).collect();
        let merged_tmux = translate_layout_to_tmux(&merged, &reverse_panes);
        let resolved_title = title
            .or_else(|| previous.map(|t| t.title.clone()))
            .unwrap_or_else(|| format!("tmux {window_id}"));
        self.tabs.insert(
            tab_id,
            ControlledTab {
                layout: merged_tmux,
                panes: panes.clone(),
                active_pane_id,
                title: resolved_title.clone(),
            },
        );

        let Some(active_pane_id) = active_pane_id else {
            return actions;
        };

        actions.push(ControllerAction::TabBound {
            tab_id,
            layout: merged,
            panes: panes.into_iter().collect(),
            active_pane_id,
            title: resolved_title,
        });

        // Step 7: schedule history hydration for freshly bound panes.
        for tmux_pane_id in freshly_bound {
            if let Some(prefetched) = self.prefetched_history.remove(&tmux_pane_id) {
                actions.extend(self.flush_bootstrap(tmux_pane_id, Some(prefetched)));
            } else {
                actions.push(ControllerAction::CaptureOutOfBand {
                    tmux_pane_id,
                    socket_path: self.socket_path.clone(),
                    lines: Some(2000),
                });
            }
        }

        actions
    }

    /// A completed out-of-band capture (possibly empty on failure) arrives
    /// here; resolves hydration for that pane per the flush rules in §4.5.
    pub fn resolve_capture(&mut self, tmux_pane_id: TmuxPaneId, captured: Option<Vec<u8>>) -> Vec<ControllerAction> {
        self.flush_bootstrap(tmux_pane_id, captured)
    }

    /// Flush a pane's bootstrap state: `history` (when `Some`) is written
    /// first, then the buffered bootstrap chunks are discarded only when no
    /// history was supplied via prefetch; on total failure (`None`), just
    /// the buffered chunks go out.
    fn flush_bootstrap(&mut self, tmux_pane_id: TmuxPaneId, history: Option<Vec<u8>>) -> Vec<ControllerAction> {
        let Some(binding) = self.pane_to_native.get(&tmux_pane_id) else {
            self.bootstrap_buffers.remove(&tmux_pane_id);
            return Vec::new();
        };
        let pane_id = binding.pane_id;
        let Some(mut buffer) = self.bootstrap_buffers.remove(&tmux_pane_id) else {
            return Vec::new();
        };
        if buffer.resolved {
            return Vec::new();
        }
        buffer.resolved = true;

        let mut actions = Vec::new();
        match history {
            Some(bytes) if !bytes.is_empty() => {
                actions.push(ControllerAction::PaneOutput { pane_id, bytes });
                if !buffer.chunks.is_empty() {
                    actions.push(ControllerAction::PaneOutput { pane_id, bytes: buffer.chunks });
                }
            }
            _ => {
                if !buffer.chunks.is_empty() {
                    actions.push(ControllerAction::PaneOutput { pane_id, bytes: buffer.chunks });
                }
            }
        }
        actions
    }

    /// Record a socket-side prefetch result captured ahead of the pane
    /// actually being bound (triggered by the `__PANE__` bootstrap line).
    pub fn record_prefetch(&mut self, tmux_pane_id: TmuxPaneId, captured: Vec<u8>) {
        self.prefetched_history.insert(tmux_pane_id, captured);
    }

    /// Composite grid for a tab's layout given per-pane sizes reported by
    /// the renderer, per §4.5's client-size sync rule.
    pub fn composite_size(layout: &LayoutNode<PaneId>, sizes: &HashMap<PaneId, (u16, u16)>) -> (u16, u16) {
        match layout {
            LayoutNode::Pane(id) => sizes.get(id).copied().unwrap_or((80, 24)),
            LayoutNode::Split { direction, first, second, .. } => {
                let (fc, fr) = Self::composite_size(first, sizes);
                let (sc, sr) = Self::composite_size(second, sizes);
                match direction {
                    SplitDirection::Horizontal => (fc + sc, fr.max(sr)),
                    SplitDirection::Vertical => (fc.max(sc), fr + sr),
                }
            }
        }
    }

    /// Produce the `resize`+`refresh-client -C` commands if the composite
    /// size differs from the last one sent for this control session.
    pub fn sync_client_size(&mut self, cols: u16, rows: u16) -> Vec<ControllerAction> {
        use crate::config::{MIN_COLS, MIN_ROWS};
        let cols = cols.max(MIN_COLS);
        let rows = rows.max(MIN_ROWS);
        if self.last_client_size == Some((cols, rows)) {
            return Vec::new();
        }
        self.last_client_size = Some((cols, rows));
        let cmd = super::commands::TmuxCommand::set_client_size(cols, rows);
        vec![ControllerAction::WriteControlCommand(format!("{}\n", cmd.as_str()))]
    }

    /// Emit `resize-pane` for a tmux pane whose size changed.
    pub fn sync_pane_size(&mut self, tmux_pane_id: TmuxPaneId, cols: u16, rows: u16) -> Vec<ControllerAction> {
        if self.last_pane_size.get(&tmux_pane_id) == Some(&(cols, rows)) {
            return Vec::new();
        }
        self.last_pane_size.insert(tmux_pane_id, (cols, rows));
        let cmd = super::commands::TmuxCommand::resize_pane(tmux_pane_id, cols, rows);
        vec![ControllerAction::WriteControlCommand(format!("{}\n", cmd.as_str()))]
    }
}

/// Strip `ESC[?3J` / `ESC[3J` ("erase scrollback") so a pane that already
/// has pre-hydrated history doesn't lose it to a live clear-scrollback
/// escape that arrives right after attach.
fn strip_erase_scrollback(data: &[u8]) -> Vec<u8> {
    let mut text = match std::str::from_utf8(data) {
        Ok(s) => s.to_string(),
        Err(_) => return data.to_vec(),
    };
    for seq in ED3J {
        text = text.replace(seq, "");
    }
    text.into_bytes()
}

/// Map a tree over tmux pane ids to the equivalent tree over native ids,
/// dropping any leaf without a binding (shouldn't happen by construction,
/// but keeps this total rather than partial).
fn translate_layout(
    node: &TmuxLayoutNode,
    panes: &HashMap<TmuxPaneId, PaneId>,
) -> LayoutNode<PaneId> {
    match node {
        LayoutNode::Pane(tmux_id) => {
            LayoutNode::pane(panes.get(tmux_id).copied().unwrap_or(PaneId(0)))
        }
        LayoutNode::Split { direction, ratio_bits, first, second } => LayoutNode::Split {
            direction: *direction,
            ratio_bits: *ratio_bits,
            first: Box::new(translate_layout(first, panes)),
            second: Box::new(translate_layout(second, panes)),
        },
    }
}

/// The inverse of [`translate_layout`]: map a tree over native ids back to
/// tmux pane ids, so the ratio-preserved result of `preserve_ratios` can be
/// stored back on [`ControlledTab`] (which only ever holds a
/// [`TmuxLayoutNode`]) instead of the raw, unmerged parse. Without this the
/// next `%layout-change` would merge against last event's reported ratio
/// rather than the ratio actually installed, undoing the persistence
/// `preserve_ratios` is there to provide.
fn translate_layout_to_tmux(
    node: &LayoutNode<PaneId>,
    reverse_panes: &HashMap<PaneId, TmuxPaneId>,
) -> TmuxLayoutNode {
    match node {
        LayoutNode::Pane(pane_id) => {
            LayoutNode::pane(reverse_panes.get(pane_id).copied().unwrap_or(TmuxPaneId(0)))
        }
        LayoutNode::Split { direction, ratio_bits, first, second } => LayoutNode::Split {
            direction: *direction,
            ratio_bits: *ratio_bits,
            first: Box::new(translate_layout_to_tmux(first, reverse_panes)),
            second: Box::new(translate_layout_to_tmux(second, reverse_panes)),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_fifo_resolves_in_order() {
        let mut controller = TmuxController::new(Config::default());
        let (r1, mut rx1) = oneshot::channel();
        let (r2, mut rx2) = oneshot::channel();
        controller.pending_transactions.push_back(PendingTransaction {
            command: "capture-pane-1".to_string(),
            resolver: r1,
        });
        controller.pending_transactions.push_back(PendingTransaction {
            command: "capture-pane-2".to_string(),
            resolver: r2,
        });
        let actions = controller.try_activate_next();
        assert!(matches!(&actions[0], ControllerAction::WriteControlCommand(c) if c.contains("capture-pane-1")));

        controller.feed(b"%begin 1\ndataA\n%end 1\n");
        assert_eq!(rx1.try_recv().unwrap(), "dataA");

        // Second request should now be active.
        assert!(controller.active_transaction.is_some());
        controller.feed(b"%begin 2\ndataB\n%end 2\n");
        assert_eq!(rx2.try_recv().unwrap(), "dataB");
    }

    #[test]
    fn window_add_creates_single_pane_tab() {
        let mut controller = TmuxController::new(Config::default());
        let actions = controller.dispatch_event(ControlEvent::WindowAdd { window_id: "@1".to_string() });
        assert!(actions.iter().any(|a| matches!(a, ControllerAction::TabBound { .. })));
    }

    #[test]
    fn layout_reconciliation_preserves_ratio_scenario() {
        let mut controller = TmuxController::new(Config::default());
        // First layout: two equal panes.
        let first = controller.apply_layout(TmuxWindowId(1), "120x30,0,0{60x30,0,0,1,60x30,60,0,2}", None);
        let tab_id = first
            .iter()
            .find_map(|a| match a {
                ControllerAction::TabBound { tab_id, .. } => Some(*tab_id),
                _ => None,
            })
            .unwrap();

        // Force the kept ratio to 0.7 to emulate a user-adjusted split
        // before the next layout-change arrives.
        if let Some(tab) = controller.tabs.get_mut(&tab_id) {
            let panes = tab.layout.clone().collect_panes();
            tab.layout = LayoutNode::split(
                SplitDirection::Horizontal,
                0.7,
                LayoutNode::pane(panes[0]),
                LayoutNode::pane(panes[1]),
            );
        }

        // tmux reports the panes as equal-width again, but the user's 0.7
        // split must survive the merge rather than snapping back to 0.5.
        let second = controller.apply_layout(TmuxWindowId(1), "120x30,0,0{60x30,0,0,1,60x30,60,0,2}", None);
        let layout = second
            .iter()
            .find_map(|a| match a {
                ControllerAction::TabBound { layout, .. } => Some(layout.clone()),
                _ => None,
            })
            .expect("apply_layout emits TabBound");
        assert!((layout.ratio().unwrap() - 0.7).abs() < 0.01);

        // And the ratio must keep surviving a third identical layout-change,
        // proving the merged layout (not the raw parse) was persisted.
        let third = controller.apply_layout(TmuxWindowId(1), "120x30,0,0{60x30,0,0,1,60x30,60,0,2}", None);
        let layout = third
            .iter()
            .find_map(|a| match a {
                ControllerAction::TabBound { layout, .. } => Some(layout.clone()),
                _ => None,
            })
            .expect("apply_layout emits TabBound");
        assert!((layout.ratio().unwrap() - 0.7).abs() < 0.01);
    }

    #[test]
    fn bootstrap_sniffer_socket_path_is_consumed() {
        let mut controller = TmuxController::new(Config::default());
        let actions = controller.feed(b"__SOCKET__::/tmp/tmux-0/default\n");
        assert!(actions.is_empty());
        assert_eq!(controller.socket_path.as_deref(), Some("/tmp/tmux-0/default"));
    }

    #[test]
    fn composite_size_sums_widths_for_horizontal_split() {
        let layout = LayoutNode::split(
            SplitDirection::Horizontal,
            0.5,
            LayoutNode::pane(PaneId(1)),
            LayoutNode::pane(PaneId(2)),
        );
        let mut sizes = HashMap::new();
        sizes.insert(PaneId(1), (40, 24));
        sizes.insert(PaneId(2), (40, 20));
        assert_eq!(TmuxController::composite_size(&layout, &sizes), (80, 24));
    }
}
