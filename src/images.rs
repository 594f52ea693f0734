//! Identity-scoped image cache.
//!
//! A derived image is a base image with one `(username, uid, gid)` provisioned into it by the
//! base image's own setup command. Derived images are found again through their
//! `parent_id` + `user_triple` labels; the key is the parent's immutable id, never its
//! (re-taggable) name. Nothing here ever deletes a derived image.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};

use crate::errors::{ProboxError, Result};
use crate::labels::{self, UserTriple};
use crate::runtime::{CreateSpec, ExecSpec, ImageSummary, Runtime};
use crate::util::id::random_hex;

/// Keep-alive command for throwaway containers.
pub const KEEP_ALIVE: &[&str] = &["sleep", "infinity"];

pub struct ImageCache<'a> {
    runtime: &'a dyn Runtime,
}

impl<'a> ImageCache<'a> {
    pub fn new(runtime: &'a dyn Runtime) -> Self {
        Self { runtime }
    }

    /// Return the id of `base_ref` with `user` provisioned, building it on first use.
    pub fn get_or_build(&self, base_ref: &str, user: &UserTriple) -> Result<String> {
        let parent = self.resolve_parent(base_ref)?;
        let existing = self.derived_index(&parent.id)?;
        if let Some(id) = existing.get(user) {
            debug!(parent = %parent.id, user = %user, image = %id, "derived image cache hit");
            return Ok(id.clone());
        }
        info!(parent = %parent.id, user = %user, "derived image cache miss; provisioning");
        self.provision(&parent, user)
    }

    /// Resolve a reference to exactly one local image, pulling once if it is absent.
    pub fn resolve_parent(&self, base_ref: &str) -> Result<ImageSummary> {
        let mut found = self.lookup(base_ref)?;
        if found.is_empty() {
            let use_err = crate::color_enabled_stderr();
            crate::log_info_stderr(
                use_err,
                &format!("probox: image {base_ref} not present locally; pulling"),
            );
            self.runtime.pull_image(base_ref)?;
            found = self.lookup(base_ref)?;
        }
        match found.len() {
            0 => Err(ProboxError::config(format!(
                "base image '{base_ref}' could not be found, even after pulling"
            ))),
            1 => Ok(found.remove(0)),
            _ => Err(ProboxError::config(format!(
                "base image reference '{base_ref}' is ambiguous; it matches {}. Use a fully qualified reference or image id",
                found
                    .iter()
                    .map(describe_image)
                    .collect::<Vec<_>>()
                    .join(", ")
            ))),
        }
    }

    // Distinct images matching a reference (or, failing that, an id prefix).
    fn lookup(&self, base_ref: &str) -> Result<Vec<ImageSummary>> {
        let mut hits = self
            .runtime
            .list_images(&[format!("reference={base_ref}")])?;
        if hits.is_empty() && looks_like_image_id(base_ref) {
            hits = self.runtime.list_images(&[format!("id={base_ref}")])?;
        }
        let mut seen = BTreeSet::new();
        hits.retain(|im| seen.insert(im.id.clone()));
        Ok(hits)
    }

    /// Derived images of `parent_id`, keyed by the identity they carry.
    pub fn derived_index(&self, parent_id: &str) -> Result<BTreeMap<UserTriple, String>> {
        let filter = format!("label={}={}", labels::IMAGE_PARENT_ID, parent_id);
        let mut index = BTreeMap::new();
        for im in self.runtime.list_images(&[filter])? {
            // Filter semantics differ between runtimes; re-check the label ourselves.
            if im.label(labels::IMAGE_PARENT_ID) != Some(parent_id) {
                continue;
            }
            let Some(raw) = im.label(labels::IMAGE_USER_TRIPLE) else {
                continue;
            };
            match raw.parse::<UserTriple>() {
                Ok(t) => {
                    index.entry(t).or_insert(im.id);
                }
                Err(e) => warn!(image = %im.id, "skipping derived image: {e}"),
            }
        }
        Ok(index)
    }

    fn provision(&self, parent: &ImageSummary, user: &UserTriple) -> Result<String> {
        let setup = parent
            .label(labels::IMAGE_SETUP_IDENTITY_CMD)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                ProboxError::config(format!(
                    "base image {} has no '{}' label; choose a base image that can provision users",
                    describe_image(parent),
                    labels::IMAGE_SETUP_IDENTITY_CMD
                ))
            })?
            .to_string();

        let use_err = crate::color_enabled_stderr();
        crate::log_info_stderr(
            use_err,
            &format!(
                "probox: preparing image {} for {}",
                describe_image(parent),
                user
            ),
        );

        let name = format!("probox-provision-{}", random_hex(4));
        self.runtime.create_container(&CreateSpec {
            name: name.clone(),
            hostname: name.clone(),
            image: parent.id.clone(),
            command: KEEP_ALIVE.iter().map(|s| s.to_string()).collect(),
            ..CreateSpec::default()
        })?;
        let mut scratch = DisposableContainer::new(self.runtime, name);

        self.runtime.start_container(scratch.name())?;
        scratch.mark_started();

        let spec = ExecSpec {
            container: scratch.name().to_string(),
            command: vec!["/bin/sh".to_string(), "-c".to_string(), setup.clone()],
            user: Some("root".to_string()),
            env: vec![
                ("PROBOX_USER".to_string(), user.username.clone()),
                ("PROBOX_UID".to_string(), user.uid.to_string()),
                ("PROBOX_GID".to_string(), user.gid.to_string()),
            ],
            ..ExecSpec::default()
        };
        let code = self.runtime.exec(&spec)?;
        if code != 0 {
            return Err(ProboxError::ExternalTool {
                command: format!("setup-identity command `{setup}`"),
                code: Some(code),
                stderr: String::new(),
            });
        }

        let mut commit_labels = BTreeMap::new();
        commit_labels.insert(labels::IMAGE_PARENT_ID.to_string(), parent.id.clone());
        commit_labels.insert(labels::IMAGE_USER_TRIPLE.to_string(), user.to_string());
        let image_id = self
            .runtime
            .commit_container(scratch.name(), &commit_labels)?;
        info!(parent = %parent.id, user = %user, image = %image_id, "derived image committed");
        Ok(image_id)
    }
}

fn describe_image(im: &ImageSummary) -> String {
    let short: String = im.id.chars().take(12).collect();
    match im.names.first() {
        Some(n) => format!("{n} ({short})"),
        None => short,
    }
}

fn looks_like_image_id(s: &str) -> bool {
    let s = s.strip_prefix("sha256:").unwrap_or(s);
    s.len() >= 12 && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Throwaway container that is stopped (if started) and removed on every exit path.
pub(crate) struct DisposableContainer<'a> {
    runtime: &'a dyn Runtime,
    name: String,
    started: bool,
}

impl<'a> DisposableContainer<'a> {
    pub(crate) fn new(runtime: &'a dyn Runtime, name: String) -> Self {
        Self {
            runtime,
            name,
            started: false,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn mark_started(&mut self) {
        self.started = true;
    }
}

impl Drop for DisposableContainer<'_> {
    fn drop(&mut self) {
        let use_err = crate::color_enabled_stderr();
        if self.started {
            if let Err(e) = self.runtime.stop_container(&self.name) {
                crate::log_warn_stderr(
                    use_err,
                    &format!("probox: warning: failed to stop {}: {e}", self.name),
                );
            }
        }
        if let Err(e) = self.runtime.remove_container(&self.name) {
            crate::log_warn_stderr(
                use_err,
                &format!("probox: warning: failed to remove {}: {e}", self.name),
            );
        }
    }
}
