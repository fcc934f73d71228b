//! Minimal headless driver for `tmux-core`: spawns a local shell tab (or a
//! tmux control session, if `--tmux [name]` is given) and streams its
//! output to stdout. Exists for manual smoke-testing the library outside a
//! full renderer; the renderer this core is meant to back lives elsewhere.

use anyhow::Result;
use std::io::Write;
use tmux_core::config::Config;
use tmux_core::pty::{CreateOptions, PtyEvent, PtyManager};
use tmux_core::tmux::session::ControlTarget;
use tmux_core::workspace::WorkspaceCoordinator;
use tokio::runtime::Builder;

fn main() -> Result<()> {
    tmux_core::debug::init_log_bridge(None);
    log::info!("starting tmux-core headless driver");

    // §5: a single-threaded cooperative executor drives the whole core.
    let runtime = Builder::new_current_thread().enable_all().build()?;
    runtime.block_on(run())
}

async fn run() -> Result<()> {
    let config = Config::load();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PtyEvent>();
    let mut pty = PtyManager::new(config.clone(), tx);
    let mut workspace = WorkspaceCoordinator::new(config.clone());

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--tmux") {
        let session_name = args.get(1).cloned();
        let target = ControlTarget { session_name, ..Default::default() };
        workspace.start_tmux_control(&mut pty, &target, None)?;
    } else {
        workspace.create_local_tab(&mut pty, CreateOptions::default())?;
    }

    let mut stdout = std::io::stdout();
    while let Some(event) = rx.recv().await {
        for workspace_event in workspace.handle_pty_data(&mut pty, event) {
            if let tmux_core::workspace::WorkspaceEvent::PaneOutput { bytes, .. } = workspace_event {
                let _ = stdout.write_all(&bytes);
                let _ = stdout.flush();
            }
        }
        if workspace.tabs_in_order().next().is_none() {
            break;
        }
    }

    Ok(())
}
