//! Primary backend: a real pseudoterminal via `nix`/`libc`, fork+exec'd
//! directly rather than through `std::process::Command` so the child can
//! get a controlling terminal before `exec`.

use super::{resolve_shell, term_name, Backend, CreateOptions, PtyEvent, PtyKind, SessionHandle, SessionId};
use crate::config::Config;
use crate::error::PtyError;
use std::ffi::CString;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::UnboundedSender;

#[cfg(unix)]
pub fn spawn(
    session_id: SessionId,
    kind: PtyKind,
    opts: &CreateOptions,
    config: &Config,
    tx: UnboundedSender<PtyEvent>,
) -> Result<NativeHandle, PtyError> {
    use nix::pty::{openpty, OpenptyResult, Winsize};
    use nix::unistd::{chdir, close, dup2, execvpe, fork, setsid, ForkResult};
    use std::os::fd::{AsRawFd, IntoRawFd};

    let winsize = Winsize {
        ws_row: opts.rows,
        ws_col: opts.cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };

    let OpenptyResult { master, slave } = openpty(Some(&winsize), None).map_err(|e| {
        PtyError::SpawnFailed {
            command: "openpty".to_string(),
            source: std::io::Error::from(e),
        }
    })?;

    let master_fd = master.as_raw_fd();
    let slave_fd = slave.as_raw_fd();

    let program = opts
        .command
        .clone()
        .unwrap_or_else(|| resolve_shell(opts.shell.as_deref()));
    let args = opts.args.clone();

    // Everything the child needs after fork() must already be allocated: the
    // CStrings for argv/envp and the cwd, built here so the child only makes
    // async-signal-safe calls (dup2/close/chdir/execve) before exec.
    let program_c = CString::new(program.as_str()).unwrap_or_else(|_| CString::new("/bin/sh").unwrap());
    let mut arg_cstrings = vec![program_c.clone()];
    arg_cstrings.extend(args.iter().filter_map(|a| CString::new(a.as_str()).ok()));
    let arg_refs: Vec<&std::ffi::CStr> = arg_cstrings.iter().map(|s| s.as_c_str()).collect();

    let mut env_cstrings: Vec<CString> = std::env::vars()
        .filter(|(k, _)| k != "TERM" && k != "COLORTERM")
        .filter_map(|(k, v)| CString::new(format!("{k}={v}")).ok())
        .collect();
    env_cstrings.push(CString::new(format!("TERM={}", term_name())).expect("TERM value has no NUL"));
    if kind == PtyKind::Shell {
        env_cstrings.push(CString::new("COLORTERM=truecolor").expect("no NUL"));
    }
    let env_refs: Vec<&std::ffi::CStr> = env_cstrings.iter().map(|s| s.as_c_str()).collect();

    let cwd_c = opts
        .cwd
        .as_ref()
        .and_then(|p| p.to_str())
        .and_then(|s| CString::new(s).ok());

    match unsafe { fork() }.map_err(|e| PtyError::SpawnFailed {
        command: program.clone(),
        source: std::io::Error::from(e),
    })? {
        ForkResult::Child => {
            drop(master);
            setsid().ok();
            unsafe {
                libc::ioctl(slave_fd, libc::TIOCSCTTY as _, 0);
            }
            dup2(slave_fd, 0).ok();
            dup2(slave_fd, 1).ok();
            dup2(slave_fd, 2).ok();
            if slave_fd > 2 {
                close(slave_fd).ok();
            }

            if let Some(cwd_c) = &cwd_c {
                let _ = chdir(cwd_c.as_c_str());
            }

            let _ = execvpe(&program_c, &arg_refs, &env_refs);
            std::process::exit(127);
        }
        ForkResult::Parent { child } => {
            drop(slave);

            unsafe {
                let flags = libc::fcntl(master_fd, libc::F_GETFL);
                libc::fcntl(master_fd, libc::F_SETFL, flags | libc::O_NONBLOCK);
            }

            let pid = child.as_raw() as u32;
            let reader_fd = master.into_raw_fd();
            spawn_reader_thread(reader_fd, session_id, kind, child, tx);

            Ok(NativeHandle {
                master_fd: reader_fd,
                pid,
                killed: AtomicBool::new(false),
            })
        }
    }
}

#[cfg(not(unix))]
pub fn spawn(
    _session_id: SessionId,
    _kind: PtyKind,
    _opts: &CreateOptions,
    _config: &Config,
    _tx: UnboundedSender<PtyEvent>,
) -> Result<NativeHandle, PtyError> {
    Err(PtyError::SpawnFailed {
        command: "native-pty".to_string(),
        source: std::io::Error::other("native PTY backend is unix-only"),
    })
}

#[cfg(unix)]
fn spawn_reader_thread(
    master_fd: std::os::fd::RawFd,
    session_id: SessionId,
    kind: PtyKind,
    child: nix::unistd::Pid,
    tx: UnboundedSender<PtyEvent>,
) {
    std::thread::spawn(move || {
        use nix::sys::wait::waitpid;
        use nix::unistd::read;
        use std::time::Duration;

        let mut buf = [0u8; 8192];
        loop {
            match read(master_fd, &mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    let _ = tx.send(PtyEvent::Data {
                        session_id,
                        kind,
                        backend: Backend::Pty,
                        bytes: buf[..n].to_vec(),
                    });
                }
                Err(nix::errno::Errno::EAGAIN) => {
                    std::thread::sleep(Duration::from_millis(5));
                }
                Err(_) => break,
            }
        }

        let exit_code = match waitpid(child, None) {
            Ok(nix::sys::wait::WaitStatus::Exited(_, code)) => code,
            Ok(nix::sys::wait::WaitStatus::Signaled(_, signal, _)) => 128 + signal as i32,
            _ => -1,
        };

        let _ = tx.send(PtyEvent::Exit {
            session_id,
            kind,
            exit_code,
        });

        unsafe {
            libc::close(master_fd);
        }
    });
}

pub struct NativeHandle {
    #[cfg(unix)]
    master_fd: std::os::fd::RawFd,
    #[cfg(not(unix))]
    #[allow(dead_code)]
    master_fd: i32,
    pid: u32,
    killed: AtomicBool,
}

impl SessionHandle for NativeHandle {
    fn write(&self, bytes: &[u8]) -> bool {
        if self.killed.load(Ordering::Relaxed) {
            return false;
        }
        #[cfg(unix)]
        {
            nix::unistd::write(unsafe { std::os::fd::BorrowedFd::borrow_raw(self.master_fd) }, bytes).is_ok()
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    fn resize(&self, cols: u16, rows: u16) {
        #[cfg(unix)]
        {
            let winsize = libc::winsize {
                ws_row: rows,
                ws_col: cols,
                ws_xpixel: 0,
                ws_ypixel: 0,
            };
            unsafe {
                libc::ioctl(self.master_fd, libc::TIOCSWINSZ, &winsize);
            }
        }
    }

    fn kill(&self) {
        if self.killed.swap(true, Ordering::Relaxed) {
            return;
        }
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(self.pid as i32), Signal::SIGHUP);
        }
    }

    fn pid(&self) -> u32 {
        self.pid
    }
}
