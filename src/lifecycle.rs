//! Box lifecycle: create, run, stop, remove, and the ephemeral `temp` composition.
//!
//! States per project path: unbound -> created (stopped) <-> running -> removed.
//! Ordering constraints:
//! - the agent is started before `create` (its socket is a bind-mount source) and before
//!   every `start` (after a host reboot the container survives but the agent does not);
//! - `stop` always tries to stop the agent, whatever state the container was in;
//! - `temp` stops and removes its container on every exit path, including a failed run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::agent::{AgentManager, CONTAINER_AGENT_SOCKET};
use crate::config::Config;
use crate::directory::{ContainerDirectory, ContainerRecord};
use crate::errors::{ProboxError, Result};
use crate::images::{ImageCache, KEEP_ALIVE};
use crate::labels::{self, UserTriple};
use crate::naming::{absolutize, suggest_name, temp_name, validate_name};
use crate::overlay;
use crate::runtime::{CreateSpec, ExecSpec, Mount, Runtime};
use crate::util::EnvFile;

/// Facts about the invoking user and terminal, captured once per invocation.
#[derive(Debug, Clone)]
pub struct Context {
    pub cwd: PathBuf,
    pub home: PathBuf,
    pub user: UserTriple,
    /// Attach stdin (and a tty when stdout is one too) to exec'd commands.
    pub stdin_tty: bool,
    pub stdout_tty: bool,
    /// Host variables forwarded to every exec (e.g. TERM).
    pub passthrough_env: Vec<(String, String)>,
}

impl Context {
    #[cfg(unix)]
    pub fn current() -> Result<Self> {
        let cwd = std::env::current_dir()?;
        let home = home::home_dir()
            .ok_or_else(|| ProboxError::config("cannot determine the home directory"))?;
        let passthrough_env = ["TERM", "COLORTERM", "LANG"]
            .iter()
            .filter_map(|k| {
                std::env::var(k)
                    .ok()
                    .filter(|v| !v.is_empty())
                    .map(|v| (k.to_string(), v))
            })
            .collect();
        Ok(Self {
            cwd,
            home,
            user: UserTriple::current()?,
            stdin_tty: atty::is(atty::Stream::Stdin),
            stdout_tty: atty::is(atty::Stream::Stdout),
            passthrough_env,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    /// Defaults to the current directory.
    pub path: Option<PathBuf>,
    pub name: Option<String>,
    /// Base image reference; defaults to the configured base image.
    pub from: Option<String>,
    pub push_overlay: bool,
}

pub struct Orchestrator<'a> {
    runtime: &'a dyn Runtime,
    agents: AgentManager<'a>,
    config: &'a Config,
    ctx: Context,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        runtime: &'a dyn Runtime,
        agents: AgentManager<'a>,
        config: &'a Config,
        ctx: Context,
    ) -> Self {
        Self {
            runtime,
            agents,
            config,
            ctx,
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn agents(&self) -> &AgentManager<'a> {
        &self.agents
    }

    /// Identity-scoped image for `from` (or the configured base image).
    pub fn image_for(&self, from: Option<&str>) -> Result<String> {
        let base = from.unwrap_or(&self.config.base_image);
        ImageCache::new(self.runtime).get_or_build(base, &self.ctx.user)
    }

    /// Bind a new box to a path. Fails without touching the runtime if the path is taken.
    pub fn create(&self, dir: &ContainerDirectory, opts: &CreateOptions) -> Result<ContainerRecord> {
        let path = absolutize(opts.path.as_deref().unwrap_or(&self.ctx.cwd), &self.ctx.cwd)?;
        if let Some(existing) = dir.by_path.get(&path) {
            return Err(ProboxError::Conflict {
                path,
                existing: existing.name.clone(),
            });
        }

        let name = match opts.name.as_deref() {
            Some(n) => n.trim().to_string(),
            None => suggest_name(&path, &dir.names(), &self.ctx.cwd)?,
        };
        validate_name(&name)?;
        if let Some(existing) = dir.by_name.get(&name) {
            return Err(ProboxError::config(format!(
                "name '{name}' is already taken by the box for {}",
                existing.project_path.display()
            )));
        }

        let image = self.image_for(opts.from.as_deref())?;

        let sock = self.agents.ensure_started(&name)?;
        let spec = self.create_spec(&name, &path, &image, &sock);
        if let Err(e) = self.runtime.create_container(&spec) {
            // No container will ever use this agent.
            let _ = self.agents.stop(&name);
            return Err(e);
        }
        let use_err = crate::color_enabled_stderr();
        crate::log_info_stderr(
            use_err,
            &format!("probox: created box '{name}' for {}", path.display()),
        );

        let mut record = ContainerRecord {
            name,
            project_path: path,
            running: false,
            default_shell: None,
        };

        if opts.push_overlay {
            if let Some(root) = self.config.overlay_dir() {
                let has_content = overlay::plan(&root)?.is_some_and(|p| !p.is_empty());
                if has_content {
                    self.ensure_running(&record)?;
                    record.running = true;
                    overlay::push(self.runtime, &record.name, &self.ctx.user, &root)?;
                }
            }
        }
        Ok(record)
    }

    fn create_spec(&self, name: &str, path: &Path, image: &str, sock: &Path) -> CreateSpec {
        let mut labels = BTreeMap::new();
        labels.insert(labels::PROJECT_PATH.to_string(), path.display().to_string());
        labels.insert(labels::PROJECT_NAME.to_string(), name.to_string());

        // Relabeling the whole home directory would rewrite SELinux contexts of everything
        // in it; for that one case turn labeling off for the container instead.
        let binds_home = path == self.ctx.home;
        let mut project = Mount::new(path, path).option("rw");
        if binds_home {
            crate::warn_print(&format!(
                "{} is your home directory; disabling SELinux label separation for box '{name}' instead of relabeling it",
                path.display()
            ));
        } else {
            project = project.option("z");
        }

        CreateSpec {
            name: name.to_string(),
            hostname: name.to_string(),
            image: image.to_string(),
            labels,
            mounts: vec![project, Mount::new(sock, CONTAINER_AGENT_SOCKET)],
            network: Some(self.config.network.clone()).filter(|n| !n.trim().is_empty()),
            disable_label_isolation: binds_home,
            keep_user_namespace: true,
            command: KEEP_ALIVE.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Make sure the agent is alive and the container is running. Idempotent.
    pub fn ensure_running(&self, record: &ContainerRecord) -> Result<()> {
        self.agents.ensure_started(&record.name)?;
        if record.running {
            debug!(name = %record.name, "box already running");
            return Ok(());
        }
        info!(name = %record.name, "starting box");
        self.runtime.start_container(&record.name)
    }

    /// Working directory inside the box: the caller's cwd when it lies in the project,
    /// otherwise the user's home.
    pub fn workdir_for(&self, record: &ContainerRecord) -> PathBuf {
        if self.ctx.cwd.starts_with(&record.project_path) {
            self.ctx.cwd.clone()
        } else {
            PathBuf::from(self.ctx.user.home_dir())
        }
    }

    fn command_for(&self, record: &ContainerRecord, command: &[String]) -> Vec<String> {
        if !command.is_empty() {
            return command.to_vec();
        }
        let shell = record
            .default_shell
            .as_deref()
            .unwrap_or(&self.config.default_shell);
        let words: Vec<String> = shell.split_whitespace().map(str::to_string).collect();
        if words.is_empty() {
            vec![crate::config::DEFAULT_SHELL.to_string()]
        } else {
            words
        }
    }

    /// Start if needed, then run `command` (or the box's shell). Returns its exit code.
    pub fn run(&self, record: &ContainerRecord, command: &[String]) -> Result<i32> {
        self.ensure_running(record)?;

        let workdir = self.workdir_for(record);
        let user = &self.ctx.user;
        let mut env = EnvFile::new();
        for (k, v) in &self.ctx.passthrough_env {
            env.set(k.as_str(), v.as_str());
        }
        env.set("SSH_AUTH_SOCK", CONTAINER_AGENT_SOCKET)
            .set("DBUS_SESSION_BUS_ADDRESS", user.session_bus_address())
            .set("XDG_RUNTIME_DIR", user.runtime_dir())
            .set("PWD", workdir.display().to_string());
        // Deleted when `env_file` drops, whatever exec returns.
        let env_file = env.write_temp(None)?;

        let spec = ExecSpec {
            container: record.name.clone(),
            command: self.command_for(record, command),
            user: Some(user.username.clone()),
            workdir: Some(workdir),
            env: Vec::new(),
            env_file: Some(env_file.path().to_path_buf()),
            interactive: self.ctx.stdin_tty,
            tty: self.ctx.stdin_tty && self.ctx.stdout_tty,
        };
        let code = self.runtime.exec(&spec)?;
        debug!(name = %record.name, code, "exec finished");
        Ok(code)
    }

    /// Stop the container if running; always attempt to stop its agent.
    pub fn stop(&self, record: &ContainerRecord) -> Result<()> {
        let container = if record.running {
            info!(name = %record.name, "stopping box");
            self.runtime.stop_container(&record.name)
        } else {
            debug!(name = %record.name, "box already stopped; skipping runtime stop");
            Ok(())
        };
        let agent = self.agents.stop(&record.name);
        container?;
        agent.map(|_| ())
    }

    pub fn remove(&self, record: &ContainerRecord) -> Result<()> {
        self.stop(record)?;
        self.runtime.remove_container(&record.name)?;
        let use_err = crate::color_enabled_stderr();
        crate::log_info_stderr(
            use_err,
            &format!(
                "probox: removed box '{}' ({})",
                record.name,
                record.project_path.display()
            ),
        );
        Ok(())
    }

    /// Push the overlay into the box, starting it first if needed.
    pub fn push_overlay(&self, record: &ContainerRecord) -> Result<usize> {
        let root = self
            .config
            .overlay_dir()
            .ok_or_else(|| ProboxError::config("no overlay directory configured"))?;
        self.ensure_running(record)?;
        overlay::push(self.runtime, &record.name, &self.ctx.user, &root)
    }

    /// Create -> run -> stop -> remove with a random name. The container and its agent are
    /// torn down even when the run fails.
    pub fn temp(
        &self,
        dir: &ContainerDirectory,
        path: Option<PathBuf>,
        from: Option<String>,
        command: &[String],
    ) -> Result<i32> {
        let opts = CreateOptions {
            path,
            name: Some(temp_name(&dir.names())),
            from,
            push_overlay: false,
        };
        let record = self.create(dir, &opts)?;
        let _teardown = EphemeralBox {
            orchestrator: self,
            name: record.name.clone(),
        };
        self.run(&record, command)
    }
}

/// Stops and removes an ephemeral box (and its agent) when dropped.
struct EphemeralBox<'o, 'a> {
    orchestrator: &'o Orchestrator<'a>,
    name: String,
}

impl Drop for EphemeralBox<'_, '_> {
    fn drop(&mut self) {
        let o = self.orchestrator;
        let use_err = crate::color_enabled_stderr();
        if let Err(e) = o.runtime.stop_container(&self.name) {
            crate::log_warn_stderr(
                use_err,
                &format!("probox: warning: failed to stop {}: {e}", self.name),
            );
        }
        if let Err(e) = o.agents.stop(&self.name) {
            crate::log_warn_stderr(
                use_err,
                &format!("probox: warning: failed to stop agent for {}: {e}", self.name),
            );
        }
        if let Err(e) = o.runtime.remove_container(&self.name) {
            crate::log_warn_stderr(
                use_err,
                &format!("probox: warning: failed to remove {}: {e}", self.name),
            );
        }
    }
}
