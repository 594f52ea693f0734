#![allow(clippy::module_name_repetitions)]
//! probox: per-project development containers.
//!
//! A box is a podman container bound one-to-one to a host project directory. Everything
//! probox knows about boxes and the images behind them lives in runtime labels and is
//! re-read on every invocation:
//! - `directory` lists boxes and indexes them by path and name;
//! - `resolve` turns a user token (path, name, or nothing) into one box;
//! - `naming` suggests collision-free names for new boxes;
//! - `images` derives and caches per-user images from operator-supplied base images;
//! - `lifecycle` sequences create/run/stop/remove/temp, with `agent` and `overlay` as
//!   side services.

pub mod agent;
mod color;
pub mod config;
pub mod directory;
mod errors;
pub mod images;
pub mod labels;
pub mod lifecycle;
pub mod logging;
pub mod naming;
pub mod overlay;
pub mod resolve;
pub mod runtime;
mod ui;
pub mod util;

pub use agent::{AgentManager, ProcessRegistry, SystemProcesses};
pub use color::*;
pub use config::Config;
pub use directory::{list_containers, ContainerDirectory, ContainerRecord};
pub use errors::*;
pub use images::ImageCache;
pub use labels::UserTriple;
pub use lifecycle::{Context, CreateOptions, Orchestrator};
pub use naming::{suggest_name, validate_name};
pub use resolve::resolve;
pub use runtime::{CliRuntime, Runtime};
pub use ui::warn::warn_print;
