use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "probox",
    version,
    about = "Manage containers for your development projects (with podman)."
)]
pub(crate) struct Cli {
    /// Print every runtime command before running it
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Colorize output: auto|always|never
    #[arg(long = "color", value_enum, global = true)]
    pub color: Option<probox::ColorMode>,

    #[command(subcommand)]
    pub command: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub(crate) enum Cmd {
    /// Create a new box for a project directory
    Create {
        /// Path to bind to the box (default: working directory)
        path: Option<PathBuf>,
        /// Name for the box (default: derived from the path)
        #[arg(long)]
        name: Option<String>,
        /// Base image to derive the box image from
        #[arg(long = "from")]
        from: Option<String>,
        /// Do not push the home overlay after creating
        #[arg(long = "no-overlay")]
        no_overlay: bool,
    },

    /// Run a command (default: the box's shell) in a box, starting it if needed
    Run {
        /// Path or name of the box (default: working directory)
        path_or_name: Option<String>,
        /// Command and arguments to execute (after --)
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// Stop a box and its SSH agent
    Stop {
        /// Path or name of the box (default: working directory)
        path_or_name: Option<String>,
    },

    /// Stop and delete a box
    #[command(alias = "remove")]
    Rm {
        /// Path or name of the box (default: working directory)
        path_or_name: Option<String>,
    },

    /// Run a command in a throwaway box that is removed afterwards
    Temp {
        /// Path to bind (default: working directory)
        path: Option<PathBuf>,
        /// Base image to derive the box image from
        #[arg(long = "from")]
        from: Option<String>,
        /// Command and arguments to execute (after --)
        #[arg(last = true)]
        command: Vec<String>,
    },

    /// List all boxes
    Ps,

    /// Copy the home overlay into a box
    Push {
        /// Path or name of the box (default: working directory)
        path_or_name: Option<String>,
    },

    /// Print the identity-scoped image id for a base image, building it if needed
    Image {
        /// Base image (default: configured base image)
        #[arg(long = "from")]
        from: Option<String>,
    },
}
