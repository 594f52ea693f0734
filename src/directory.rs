//! Container directory: every probox-labelled container, indexed by bound path and by name.
//!
//! Rebuilt from runtime labels on every invocation and passed by value into the resolver
//! and the lifecycle code; nothing is cached across invocations.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use tracing::warn;

use crate::errors::Result;
use crate::labels;
use crate::runtime::{ContainerSummary, Runtime};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub name: String,
    pub project_path: PathBuf,
    pub running: bool,
    /// Value of the default-shell label, if the container carries one.
    pub default_shell: Option<String>,
}

impl ContainerRecord {
    fn from_summary(c: &ContainerSummary) -> Option<Self> {
        let path = c.label(labels::PROJECT_PATH)?.trim();
        if path.is_empty() {
            return None;
        }
        let name = c
            .name()
            .or_else(|| c.label(labels::PROJECT_NAME))?
            .to_string();
        Some(Self {
            name,
            project_path: PathBuf::from(path),
            running: c.is_running(),
            default_shell: c
                .label(labels::CONTAINER_DEFAULT_SHELL)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContainerDirectory {
    pub by_path: BTreeMap<PathBuf, ContainerRecord>,
    pub by_name: BTreeMap<String, ContainerRecord>,
}

impl ContainerDirectory {
    /// Build the indexes. A duplicated path label (external tagging) resolves last-write-wins.
    pub fn from_records<I: IntoIterator<Item = ContainerRecord>>(records: I) -> Self {
        let mut dir = Self::default();
        for r in records {
            if let Some(prev) = dir.by_path.get(&r.project_path) {
                warn!(
                    path = %r.project_path.display(),
                    previous = %prev.name,
                    current = %r.name,
                    "two containers claim the same project path; keeping the later one"
                );
            }
            dir.by_path.insert(r.project_path.clone(), r.clone());
            dir.by_name.insert(r.name.clone(), r);
        }
        dir
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.by_name.keys().cloned().collect()
    }

    /// Known paths and names, for "not found" diagnostics.
    pub fn known_tokens(&self) -> Vec<String> {
        let mut out: Vec<String> = self.by_name.keys().cloned().collect();
        out.extend(self.by_path.keys().map(|p| p.display().to_string()));
        out
    }

    pub fn get(&self, name: &str) -> Option<&ContainerRecord> {
        self.by_name.get(name)
    }

    pub fn records(&self) -> impl Iterator<Item = &ContainerRecord> {
        self.by_name.values()
    }
}

/// Query the runtime for every container carrying the project-path label, running or not.
pub fn list_containers(runtime: &dyn Runtime) -> Result<ContainerDirectory> {
    let summaries = runtime.list_containers(labels::PROJECT_PATH)?;
    Ok(ContainerDirectory::from_records(
        summaries.iter().filter_map(ContainerRecord::from_summary),
    ))
}
