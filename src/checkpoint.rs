//! Snapshot committer: durable, versioned checkpoints of the storage tree.
//!
//! The storage engine never talks to version control directly. It calls a
//! [`Checkpointer`] once per successful write cycle, which makes it possible
//! to swap git for any other content-addressed store without touching the
//! pipeline.

use std::fmt;
use std::path::Path;
use std::process::Command;

use crate::error::CheckpointError;

/// Message used for the checkpoint taken right after initialization.
pub const INITIAL_COMMIT_MESSAGE: &str = "Initial commit";

/// Records the whole current state of a storage tree as one revision.
///
/// # Contract
///
/// - [`commit`](Checkpointer::commit) must stage and record the entire tree
///   under `root` atomically, labelled with `message`.
/// - [`init`](Checkpointer::init) runs once, when the storage root has just
///   been created and before the first commit.
pub trait Checkpointer: Send + Sync {
    /// Prepare a freshly created storage root for checkpointing.
    ///
    /// The default implementation does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the root cannot be prepared.
    fn init(&self, root: &Path) -> Result<(), CheckpointError> {
        let _ = root;
        Ok(())
    }

    /// Checkpoint the entire tree under `root` with the given message.
    ///
    /// # Errors
    ///
    /// Returns [`CheckpointError`] if the revision could not be recorded.
    fn commit(&self, root: &Path, message: &str) -> Result<(), CheckpointError>;
}

/// Optional author identity passed to git on every invocation.
#[derive(Debug, Clone)]
struct Identity {
    name: String,
    email: String,
}

/// [`Checkpointer`] that shells out to the `git` binary.
///
/// `init` runs `git init`, `commit` runs `git add .` followed by
/// `git commit -m <message>`, all with `-C <root>`.
///
/// # Examples
///
/// ```
/// use eventgit::GitCheckpointer;
///
/// let git = GitCheckpointer::new().with_identity("eventgit", "eventgit@localhost");
/// ```
#[derive(Clone, Default)]
pub struct GitCheckpointer {
    program: Option<String>,
    identity: Option<Identity>,
}

impl fmt::Debug for GitCheckpointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitCheckpointer")
            .field("program", &self.program())
            .finish()
    }
}

impl GitCheckpointer {
    /// Create a checkpointer that runs `git` from `PATH`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git executable instead of the one on `PATH`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Commit as the given author instead of relying on the host's git
    /// configuration.
    ///
    /// # Arguments
    ///
    /// * `name` - Value for `user.name`.
    /// * `email` - Value for `user.email`.
    pub fn with_identity(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.identity = Some(Identity {
            name: name.into(),
            email: email.into(),
        });
        self
    }

    fn program(&self) -> &str {
        self.program.as_deref().unwrap_or("git")
    }

    /// Run one git subcommand inside `root` and map failure to an error.
    fn git(&self, root: &Path, command: &str, args: &[&str]) -> Result<(), CheckpointError> {
        let mut cmd = Command::new(self.program());
        cmd.arg("-C").arg(root);
        if let Some(identity) = &self.identity {
            cmd.arg("-c")
                .arg(format!("user.name={}", identity.name))
                .arg("-c")
                .arg(format!("user.email={}", identity.email));
        }
        cmd.arg(command).args(args);

        let output = cmd.output().map_err(CheckpointError::Spawn)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            tracing::warn!(command, status = %output.status, stderr = %stderr, "git failed");
            return Err(CheckpointError::Failed {
                command: command.to_owned(),
                status: output.status,
                stderr,
            });
        }
        Ok(())
    }
}

impl Checkpointer for GitCheckpointer {
    fn init(&self, root: &Path) -> Result<(), CheckpointError> {
        self.git(root, "init", &["--quiet"])
    }

    fn commit(&self, root: &Path, message: &str) -> Result<(), CheckpointError> {
        self.git(root, "add", &["."])?;
        self.git(root, "commit", &["--quiet", "-m", message])?;
        tracing::debug!(root = %root.display(), label = message, "checkpoint committed");
        Ok(())
    }
}
