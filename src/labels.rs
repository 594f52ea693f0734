//! Runtime label schema. Labels are the only persistence this tool has: everything
//! about boxes and derived images is recovered from them on every invocation.

use std::fmt;
use std::str::FromStr;

use crate::errors::ProboxError;

/// Absolute host path a box is bound to (on containers).
pub const PROJECT_PATH: &str = "probox.project.path";
/// Box name; redundant with the container name.
pub const PROJECT_NAME: &str = "probox.project.name";
/// Id of the unmodified base image a derived image was built from.
pub const IMAGE_PARENT_ID: &str = "probox.image.parent_id";
/// Identity provisioned into a derived image, encoded as `username:uid:gid`.
pub const IMAGE_USER_TRIPLE: &str = "probox.image.user_triple";
/// Provisioning command, set by the operator on base images.
pub const IMAGE_SETUP_IDENTITY_CMD: &str = "probox.image.setup_identity_cmd";
/// Optional per-box override of the command `run` starts when none is given.
pub const CONTAINER_DEFAULT_SHELL: &str = "probox.container.default_shell";

/// `(username, uid, gid)` identity provisioned into a derived image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserTriple {
    pub username: String,
    pub uid: u32,
    pub gid: u32,
}

impl UserTriple {
    pub fn new(username: impl Into<String>, uid: u32, gid: u32) -> Self {
        Self {
            username: username.into(),
            uid,
            gid,
        }
    }

    /// Identity of the invoking user.
    #[cfg(unix)]
    pub fn current() -> Result<Self, ProboxError> {
        use nix::unistd::{getgid, getuid, User};

        let uid = getuid();
        let user = User::from_uid(uid)
            .map_err(|e| ProboxError::Io(std::io::Error::from(e)))?
            .ok_or_else(|| ProboxError::config(format!("no passwd entry for uid {uid}")))?;
        Ok(Self::new(user.name, uid.as_raw(), getgid().as_raw()))
    }

    pub fn home_dir(&self) -> String {
        format!("/home/{}", self.username)
    }

    pub fn runtime_dir(&self) -> String {
        format!("/run/user/{}", self.uid)
    }

    pub fn session_bus_address(&self) -> String {
        format!("unix:path=/run/user/{}/bus", self.uid)
    }
}

impl fmt::Display for UserTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.username, self.uid, self.gid)
    }
}

impl FromStr for UserTriple {
    type Err = ProboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ProboxError::config(format!("malformed user triple label '{s}'"));
        let mut parts = s.rsplitn(3, ':');
        let gid = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let uid = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let username = parts.next().filter(|u| !u.is_empty()).ok_or_else(bad)?;
        Ok(Self::new(username, uid, gid))
    }
}
