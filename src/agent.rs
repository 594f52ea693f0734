//! Per-box SSH agent processes.
//!
//! Each box name maps to one socket path; the agent serving a box is found by scanning
//! live process command lines for that path. There is no lock: two concurrent invocations
//! can both see "no agent" and both start one. The socket path is the identity, so the
//! loser's agent fails to bind and exits.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, info};

use crate::errors::{ProboxError, Result};

/// Where the agent socket appears inside every box.
pub const CONTAINER_AGENT_SOCKET: &str = "/run/probox/agent.sock";

/// OS process collaborator.
pub trait ProcessRegistry {
    /// Pids whose command line contains `pattern`.
    fn find_by_pattern(&self, pattern: &str) -> Result<Vec<u32>>;

    /// Run `program args...` to completion; daemonizing programs return once forked.
    fn spawn_detached(&self, program: &str, args: &[OsString]) -> Result<()>;

    fn terminate(&self, pid: u32) -> Result<()>;
}

/// Live processes via `/proc` and POSIX signals.
#[derive(Debug, Clone, Default)]
pub struct SystemProcesses;

impl ProcessRegistry for SystemProcesses {
    fn find_by_pattern(&self, pattern: &str) -> Result<Vec<u32>> {
        let own = std::process::id();
        let mut pids = Vec::new();
        for entry in fs::read_dir("/proc")? {
            let Ok(entry) = entry else { continue };
            let Some(pid) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<u32>().ok())
            else {
                continue;
            };
            if pid == own {
                continue;
            }
            // Processes may exit between readdir and read; skip them.
            let Ok(raw) = fs::read(entry.path().join("cmdline")) else {
                continue;
            };
            let cmdline = raw
                .split(|b| *b == 0)
                .filter(|part| !part.is_empty())
                .map(|part| String::from_utf8_lossy(part).into_owned())
                .collect::<Vec<_>>()
                .join(" ");
            if cmdline.contains(pattern) {
                pids.push(pid);
            }
        }
        pids.sort_unstable();
        Ok(pids)
    }

    fn spawn_detached(&self, program: &str, args: &[OsString]) -> Result<()> {
        let status = std::process::Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .status()?;
        if status.success() {
            Ok(())
        } else {
            Err(ProboxError::ExternalTool {
                command: program.to_string(),
                code: status.code(),
                stderr: String::new(),
            })
        }
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => Ok(()),
            // Already gone counts as terminated.
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(ProboxError::Io(io::Error::from(e))),
        }
    }
}

/// Default directory for agent sockets: `$XDG_RUNTIME_DIR/probox/agents` or the temp dir.
pub fn default_socket_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("probox")
        .join("agents")
}

pub struct AgentManager<'a> {
    processes: &'a dyn ProcessRegistry,
    program: String,
    socket_dir: PathBuf,
    wait_attempts: u32,
}

impl<'a> AgentManager<'a> {
    pub fn new(processes: &'a dyn ProcessRegistry, program: impl Into<String>, socket_dir: PathBuf) -> Self {
        Self {
            processes,
            program: program.into(),
            socket_dir,
            wait_attempts: 40,
        }
    }

    /// How many 50ms polls to wait for a freshly spawned agent's socket.
    pub fn with_wait_attempts(mut self, attempts: u32) -> Self {
        self.wait_attempts = attempts;
        self
    }

    pub fn socket_path(&self, name: &str) -> PathBuf {
        self.socket_dir.join(format!("{name}.sock"))
    }

    /// Pid of the agent serving `name`, if one is alive.
    pub fn find(&self, name: &str) -> Result<Option<u32>> {
        let sock = self.socket_path(name);
        let pids = self
            .processes
            .find_by_pattern(&sock.display().to_string())?;
        Ok(pids.first().copied())
    }

    /// Start the agent for `name` unless one is already running; returns its socket path.
    pub fn ensure_started(&self, name: &str) -> Result<PathBuf> {
        let sock = self.socket_path(name);
        if let Some(pid) = self.find(name)? {
            debug!(name, pid, "agent already running");
            return Ok(sock);
        }
        fs::create_dir_all(&self.socket_dir)?;
        set_private(&self.socket_dir);
        // Left behind by an agent that died without cleaning up (crash, kill -9).
        remove_stale_socket(&sock)?;

        info!(name, socket = %sock.display(), program = %self.program, "starting agent");
        self.processes.spawn_detached(
            &self.program,
            &[OsString::from("-a"), sock.clone().into_os_string()],
        )?;
        self.wait_for_socket(&sock)?;
        Ok(sock)
    }

    fn wait_for_socket(&self, sock: &Path) -> Result<()> {
        for _ in 0..self.wait_attempts {
            if sock.exists() {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        if sock.exists() {
            return Ok(());
        }
        Err(ProboxError::Other(anyhow::anyhow!(
            "agent '{}' did not create its socket at {}",
            self.program,
            sock.display()
        )))
    }

    /// Terminate the agent for `name` if one is alive. Returns whether one was signalled.
    pub fn stop(&self, name: &str) -> Result<bool> {
        let sock = self.socket_path(name);
        let pids = self
            .processes
            .find_by_pattern(&sock.display().to_string())?;
        for pid in &pids {
            info!(name, pid, "stopping agent");
            self.processes.terminate(*pid)?;
        }
        Ok(!pids.is_empty())
    }
}

fn remove_stale_socket(sock: &Path) -> Result<()> {
    match fs::remove_file(sock) {
        Ok(()) => {
            debug!(socket = %sock.display(), "removed stale agent socket");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(unix)]
fn set_private(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(dir, fs::Permissions::from_mode(0o700));
}

#[cfg(not(unix))]
fn set_private(_dir: &Path) {}
