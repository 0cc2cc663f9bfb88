use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use caravel_domain::ImageReference;
use caravel_engine::{ArtifactBuilder, ArtifactError};

/// Artifact builder backed by the `docker` binary.
///
/// `docker build -q` prints only the resulting image id, which is immutable
/// and therefore usable as the bound reference.
pub struct DockerBuilder {
    binary: PathBuf,
}

impl DockerBuilder {
    /// Locate `docker` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns an error when the binary cannot be found.
    pub fn discover() -> Result<Self, ArtifactError> {
        let binary = which::which("docker").map_err(|_| ArtifactError::BuilderMissing {
            binary: "docker".to_string(),
        })?;
        Ok(Self { binary })
    }
}

impl ArtifactBuilder for DockerBuilder {
    fn build(&self, context_dir: &Path) -> Result<ImageReference, ArtifactError> {
        let context = context_dir.display().to_string();
        if !context_dir.is_dir() {
            return Err(ArtifactError::MissingContext { context });
        }

        let output = Command::new(&self.binary)
            .arg("build")
            .arg("-q")
            .arg(context_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|source| ArtifactError::Spawn {
                context: context.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ArtifactError::BuildFailed {
                context,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let reference = String::from_utf8_lossy(&output.stdout).trim().to_string();
        ImageReference::try_from(reference).map_err(|_| ArtifactError::EmptyReference { context })
    }
}
