#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use probox::agent::ProcessRegistry;
use probox::labels;
use probox::runtime::{ContainerSummary, CreateSpec, ExecSpec, ImageSummary};
use probox::{
    AgentManager, Config, Context, Orchestrator, ProboxError, Result, Runtime, UserTriple,
};

pub type Events = Rc<RefCell<Vec<String>>>;

/// One exec as the fake runtime saw it, including the env file body at call time.
#[derive(Debug, Clone)]
pub struct ExecRecord {
    pub spec: ExecSpec,
    pub env_file_body: Option<String>,
}

/// In-memory container engine. Mutating verbs append to the shared event log.
pub struct FakeRuntime {
    pub events: Events,
    pub containers: RefCell<Vec<ContainerSummary>>,
    pub container_images: RefCell<BTreeMap<String, String>>,
    pub images: RefCell<Vec<ImageSummary>>,
    /// Images that `pull` makes appear locally.
    pub registry: RefCell<BTreeMap<String, ImageSummary>>,
    pub creates: RefCell<Vec<CreateSpec>>,
    pub execs: RefCell<Vec<ExecRecord>>,
    /// Exec commands containing this text return `exec_fail_code`.
    pub exec_fail_on: RefCell<Option<String>>,
    pub exec_fail_code: Cell<i32>,
    /// Exec commands containing this text make the runtime call itself fail.
    pub exec_error_on: RefCell<Option<String>>,
    next_id: Cell<u32>,
}

impl FakeRuntime {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            containers: RefCell::new(Vec::new()),
            container_images: RefCell::new(BTreeMap::new()),
            images: RefCell::new(Vec::new()),
            registry: RefCell::new(BTreeMap::new()),
            creates: RefCell::new(Vec::new()),
            execs: RefCell::new(Vec::new()),
            exec_fail_on: RefCell::new(None),
            exec_fail_code: Cell::new(1),
            exec_error_on: RefCell::new(None),
            next_id: Cell::new(1),
        }
    }

    fn fresh_id(&self, prefix: &str) -> String {
        let n = self.next_id.get();
        self.next_id.set(n + 1);
        format!("{prefix}{n:012x}")
    }

    fn log(&self, s: String) {
        self.events.borrow_mut().push(s);
    }

    /// Add a base image carrying the setup-identity label.
    pub fn add_base_image(&self, id: &str, name: &str) {
        let mut labels = BTreeMap::new();
        labels.insert(
            labels::IMAGE_SETUP_IDENTITY_CMD.to_string(),
            "useradd -u $PROBOX_UID $PROBOX_USER".to_string(),
        );
        self.add_image(id, name, labels);
    }

    pub fn add_image(&self, id: &str, name: &str, labels: BTreeMap<String, String>) {
        self.images.borrow_mut().push(ImageSummary {
            id: id.to_string(),
            names: if name.is_empty() {
                Vec::new()
            } else {
                vec![name.to_string()]
            },
            labels,
        });
    }

    pub fn add_box(&self, name: &str, path: &str, running: bool) {
        let mut labels = BTreeMap::new();
        labels.insert(labels::PROJECT_PATH.to_string(), path.to_string());
        labels.insert(labels::PROJECT_NAME.to_string(), name.to_string());
        self.add_container(name, labels, running);
    }

    pub fn add_container(&self, name: &str, labels: BTreeMap<String, String>, running: bool) {
        let id = self.fresh_id("c");
        self.containers.borrow_mut().push(ContainerSummary {
            id,
            names: vec![name.to_string()],
            labels,
            state: if running { "running" } else { "exited" }.to_string(),
        });
    }

    pub fn container_names(&self) -> Vec<String> {
        self.containers
            .borrow()
            .iter()
            .flat_map(|c| c.names.clone())
            .collect()
    }

    pub fn state_of(&self, name: &str) -> Option<String> {
        self.containers
            .borrow()
            .iter()
            .find(|c| c.names.iter().any(|n| n == name))
            .map(|c| c.state.clone())
    }

    /// Mutating calls only (queries are not logged).
    pub fn mutations(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .filter(|e| !e.starts_with("agent:"))
            .cloned()
            .collect()
    }

    fn set_state(&self, name: &str, state: &str) -> Result<()> {
        let mut cs = self.containers.borrow_mut();
        match cs.iter_mut().find(|c| c.names.iter().any(|n| n == name)) {
            Some(c) => {
                c.state = state.to_string();
                Ok(())
            }
            None => Err(no_such(name)),
        }
    }

    fn image_matches(im: &ImageSummary, filter: &str) -> bool {
        if let Some(r) = filter.strip_prefix("reference=") {
            return im.names.iter().any(|n| {
                n == r || *n == format!("localhost/{r}:latest") || *n == format!("{r}:latest")
            });
        }
        if let Some(id) = filter.strip_prefix("id=") {
            return im.id.starts_with(id);
        }
        if let Some(kv) = filter.strip_prefix("label=") {
            return match kv.split_once('=') {
                Some((k, v)) => im.labels.get(k).map(String::as_str) == Some(v),
                None => im.labels.contains_key(kv),
            };
        }
        false
    }
}

fn no_such(name: &str) -> ProboxError {
    ProboxError::ExternalTool {
        command: format!("fake {name}"),
        code: Some(125),
        stderr: format!("no such container {name}"),
    }
}

impl Runtime for FakeRuntime {
    fn list_containers(&self, label_key: &str) -> Result<Vec<ContainerSummary>> {
        Ok(self
            .containers
            .borrow()
            .iter()
            .filter(|c| c.labels.contains_key(label_key))
            .cloned()
            .collect())
    }

    fn list_images(&self, filters: &[String]) -> Result<Vec<ImageSummary>> {
        Ok(self
            .images
            .borrow()
            .iter()
            .filter(|im| filters.iter().all(|f| Self::image_matches(im, f)))
            .cloned()
            .collect())
    }

    fn pull_image(&self, reference: &str) -> Result<()> {
        self.log(format!("pull {reference}"));
        match self.registry.borrow().get(reference) {
            Some(im) => {
                self.images.borrow_mut().push(im.clone());
                Ok(())
            }
            None => Err(ProboxError::ExternalTool {
                command: format!("podman pull {reference}"),
                code: Some(125),
                stderr: "manifest unknown".to_string(),
            }),
        }
    }

    fn create_container(&self, spec: &CreateSpec) -> Result<String> {
        self.log(format!("create {}", spec.name));
        if self.container_names().contains(&spec.name) {
            return Err(ProboxError::ExternalTool {
                command: format!("podman create --name {}", spec.name),
                code: Some(125),
                stderr: "name is already in use".to_string(),
            });
        }
        for m in &spec.mounts {
            if !m.host.exists() && m.container == Path::new(probox::agent::CONTAINER_AGENT_SOCKET) {
                return Err(ProboxError::ExternalTool {
                    command: format!("podman create --name {}", spec.name),
                    code: Some(125),
                    stderr: format!("mount source {} does not exist", m.host.display()),
                });
            }
        }
        self.creates.borrow_mut().push(spec.clone());
        let id = self.fresh_id("c");
        self.containers.borrow_mut().push(ContainerSummary {
            id: id.clone(),
            names: vec![spec.name.clone()],
            labels: spec.labels.clone(),
            state: "created".to_string(),
        });
        self.container_images
            .borrow_mut()
            .insert(spec.name.clone(), spec.image.clone());
        Ok(id)
    }

    fn start_container(&self, name: &str) -> Result<()> {
        self.log(format!("start {name}"));
        self.set_state(name, "running")
    }

    fn stop_container(&self, name: &str) -> Result<()> {
        self.log(format!("stop {name}"));
        self.set_state(name, "exited")
    }

    fn remove_container(&self, name: &str) -> Result<()> {
        self.log(format!("rm {name}"));
        let mut cs = self.containers.borrow_mut();
        let before = cs.len();
        cs.retain(|c| !c.names.iter().any(|n| n == name));
        if cs.len() == before {
            return Err(no_such(name));
        }
        Ok(())
    }

    fn exec(&self, spec: &ExecSpec) -> Result<i32> {
        let joined = spec.command.join(" ");
        self.log(format!("exec {} {}", spec.container, joined));
        let env_file_body = spec
            .env_file
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok());
        self.execs.borrow_mut().push(ExecRecord {
            spec: spec.clone(),
            env_file_body,
        });
        if self.state_of(&spec.container).as_deref() != Some("running") {
            return Err(ProboxError::ExternalTool {
                command: format!("podman exec {}", spec.container),
                code: Some(125),
                stderr: "container is not running".to_string(),
            });
        }
        if let Some(pat) = self.exec_error_on.borrow().as_deref() {
            if joined.contains(pat) {
                return Err(ProboxError::ExternalTool {
                    command: format!("podman exec {}", spec.container),
                    code: Some(255),
                    stderr: "exec failed".to_string(),
                });
            }
        }
        if let Some(pat) = self.exec_fail_on.borrow().as_deref() {
            if joined.contains(pat) {
                return Ok(self.exec_fail_code.get());
            }
        }
        Ok(0)
    }

    fn commit_container(&self, name: &str, labels: &BTreeMap<String, String>) -> Result<String> {
        self.log(format!("commit {name}"));
        let parent = self
            .container_images
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| no_such(name))?;
        let mut merged = self
            .images
            .borrow()
            .iter()
            .find(|im| im.id == parent)
            .map(|im| im.labels.clone())
            .unwrap_or_default();
        merged.extend(labels.clone());
        let id = self.fresh_id("d");
        self.images.borrow_mut().push(ImageSummary {
            id: id.clone(),
            names: Vec::new(),
            labels: merged,
        });
        Ok(id)
    }

    fn copy_to_container(&self, host: &Path, name: &str, dest: &Path) -> Result<()> {
        self.log(format!("cp {} {name}:{}", host.display(), dest.display()));
        Ok(())
    }
}

/// Process table where "agents" are entries whose argv names a socket path.
pub struct FakeProcesses {
    pub events: Events,
    pub live: RefCell<BTreeMap<u32, String>>,
    next_pid: Cell<u32>,
}

impl FakeProcesses {
    pub fn new(events: Events) -> Self {
        Self {
            events,
            live: RefCell::new(BTreeMap::new()),
            next_pid: Cell::new(4000),
        }
    }

    pub fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    /// Pretend an agent is already serving `sock` (e.g. left over from a crash).
    pub fn add_agent(&self, sock: &Path) -> u32 {
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        self.live
            .borrow_mut()
            .insert(pid, format!("ssh-agent -a {}", sock.display()));
        pid
    }
}

impl ProcessRegistry for FakeProcesses {
    fn find_by_pattern(&self, pattern: &str) -> Result<Vec<u32>> {
        Ok(self
            .live
            .borrow()
            .iter()
            .filter(|(_, cmd)| cmd.contains(pattern))
            .map(|(pid, _)| *pid)
            .collect())
    }

    fn spawn_detached(&self, program: &str, args: &[OsString]) -> Result<()> {
        let sock = PathBuf::from(args.last().cloned().unwrap_or_default());
        self.events
            .borrow_mut()
            .push(format!("agent:spawn {}", sock.display()));
        // Like ssh-agent: binding over an existing socket path fails.
        if sock.exists() {
            return Err(ProboxError::ExternalTool {
                command: format!("{program} -a {}", sock.display()),
                code: Some(2),
                stderr: "bind: Address already in use".to_string(),
            });
        }
        if let Some(parent) = sock.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&sock, b"")?;
        let pid = self.next_pid.get();
        self.next_pid.set(pid + 1);
        self.live
            .borrow_mut()
            .insert(pid, format!("{program} -a {}", sock.display()));
        Ok(())
    }

    fn terminate(&self, pid: u32) -> Result<()> {
        self.events
            .borrow_mut()
            .push(format!("agent:terminate {pid}"));
        if let Some(cmd) = self.live.borrow_mut().remove(&pid) {
            if let Some(sock) = cmd.split_whitespace().last() {
                let _ = std::fs::remove_file(sock);
            }
        }
        Ok(())
    }
}

pub fn user() -> UserTriple {
    UserTriple::new("u", 1000, 1000)
}

pub fn context(cwd: &str, home: &str) -> Context {
    Context {
        cwd: PathBuf::from(cwd),
        home: PathBuf::from(home),
        user: user(),
        stdin_tty: false,
        stdout_tty: false,
        passthrough_env: vec![("TERM".to_string(), "xterm-256color".to_string())],
    }
}

/// Config that never touches the invoking user's overlay.
pub fn config(scratch: &Path) -> Config {
    Config {
        overlay_dir: Some(scratch.join("overlay")),
        ..Config::default()
    }
}

/// Everything a lifecycle test needs, wired to one event log.
pub struct Harness {
    pub scratch: tempfile::TempDir,
    pub events: Events,
    pub runtime: FakeRuntime,
    pub processes: FakeProcesses,
    pub config: Config,
}

impl Harness {
    pub fn new() -> Self {
        let scratch = tempfile::tempdir().expect("tmpdir");
        let events: Events = Rc::new(RefCell::new(Vec::new()));
        let runtime = FakeRuntime::new(events.clone());
        runtime.add_base_image("b0b0b0b0b0b0b0b0", "localhost/base:latest");
        let processes = FakeProcesses::new(events.clone());
        let config = config(scratch.path());
        Self {
            scratch,
            events,
            runtime,
            processes,
            config,
        }
    }

    pub fn socket_dir(&self) -> PathBuf {
        self.scratch.path().join("agents")
    }

    pub fn orchestrator(&self, cwd: &str, home: &str) -> Orchestrator<'_> {
        let agents = AgentManager::new(&self.processes, "ssh-agent", self.socket_dir())
            .with_wait_attempts(1);
        Orchestrator::new(&self.runtime, agents, &self.config, context(cwd, home))
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    pub fn clear_events(&self) {
        self.events.borrow_mut().clear();
    }

    pub fn directory(&self) -> probox::ContainerDirectory {
        probox::list_containers(&self.runtime).expect("list containers")
    }
}
