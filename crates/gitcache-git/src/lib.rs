//! The Git tier: resolving symbolic refs to commits and building tarball
//! artifacts from checked-out repositories.
//!
//! Both halves shell out to external tools (`git`, `npm`) with bounded
//! timeouts; nothing here links against libgit2 or reimplements npm.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub use crate::build::{BuildOptions, TarballArtifact, TarballBuilder};
pub use crate::resolve::{RefResolver, ResolvedDependencies};

mod build;
mod process;
mod resolve;

#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run `{0}`")]
    Spawn(String, #[source] io::Error),

    #[error("`{0}` timed out after {1} seconds")]
    Timeout(String, u64),

    /// An external tool exited non-zero; its output rides along.
    #[error("{message}:\n--- stdout:\n{stdout}\n--- stderr:\n{stderr}\n---")]
    Command {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("could not resolve ref `{reference}` for {url}")]
    RefResolution { url: String, reference: String },

    #[error("`{0}` is not a 40-hex commit id")]
    MalformedCommit(String),

    #[error("failed to check out {commit} from {url}")]
    Checkout {
        url: String,
        commit: String,
        #[source]
        source: Box<GitError>,
    },

    /// Both the lockfile-based and the plain install attempt failed.
    #[error("failed to install dependencies for {0}")]
    Install(String, #[source] Box<GitError>),

    #[error("failed to pack {0}")]
    Pack(String, #[source] Box<GitError>),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("failed to encode artifact metadata")]
    Metadata(#[from] serde_json::Error),
}

/// Locate an external tool, falling back to bare invocation via `PATH`.
fn find_tool(name: &str) -> PathBuf {
    which::which(name).unwrap_or_else(|_| PathBuf::from(name))
}
