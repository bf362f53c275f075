//! Buildah image store
//!
//! Implements the ImageStore trait by invoking the `buildah` executable
//! once per operation. Requires buildah to be installed and usable by the
//! current user.

use crate::error::{KilnError, KilnResult};
use crate::orchestration::images::{
    exec_form, names_containing, parse_image_listing, CommitOptions, ConfigChange,
};
use crate::orchestration::store::ImageStore;
use crate::orchestration::{error_tail, stream_child_output};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default executable name, resolved through PATH
pub const DEFAULT_BUILDAH_PATH: &str = "buildah";

/// Image store backed by the buildah CLI
pub struct BuildahStore {
    path: String,
}

impl BuildahStore {
    /// Create a store that invokes the executable at `path`
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    /// The executable this store invokes
    pub fn path(&self) -> &str {
        &self.path
    }

    fn display(&self, args: &[String]) -> String {
        format!("{} {}", self.path, args.join(" "))
    }

    fn spawn_error(&self, args: &[String], e: std::io::Error) -> KilnError {
        if e.kind() == ErrorKind::NotFound {
            KilnError::BackendUnavailable {
                path: self.path.clone(),
            }
        } else {
            KilnError::command_failed(self.display(args), e)
        }
    }

    /// Execute a buildah command and return the output
    async fn exec(&self, args: &[String]) -> KilnResult<std::process::Output> {
        debug!("Executing: {}", self.display(args));

        Command::new(&self.path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| self.spawn_error(args, e))
    }

    /// Execute a buildah command that must succeed, returning its stdout
    async fn exec_checked(&self, args: &[String]) -> KilnResult<String> {
        let output = self.exec(args).await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(KilnError::command_exec(self.display(args), stderr.trim()))
        }
    }

    async fn try_create(&self, from_image: &str, name: &str) -> KilnResult<Result<(), String>> {
        let args = from_args(from_image, name);
        let output = self.exec(&args).await?;
        if output.status.success() {
            Ok(Ok(()))
        } else {
            Ok(Err(String::from_utf8_lossy(&output.stderr).trim().to_string()))
        }
    }
}

impl Default for BuildahStore {
    fn default() -> Self {
        Self::new(DEFAULT_BUILDAH_PATH)
    }
}

/// `from --name <name> <image>`
fn from_args(from_image: &str, name: &str) -> Vec<String> {
    vec![
        "from".to_string(),
        "--name".to_string(),
        name.to_string(),
        from_image.to_string(),
    ]
}

/// `run [-e K=V]... <name> -- <command...>`
fn run_args(
    name: &str,
    command: &[String],
    env: Option<&BTreeMap<String, String>>,
) -> Vec<String> {
    let mut args = vec!["run".to_string()];
    for (k, v) in env.into_iter().flatten() {
        args.push("-e".to_string());
        args.push(format!("{}={}", k, v));
    }
    args.push(name.to_string());
    args.push("--".to_string());
    args.extend(command.iter().cloned());
    args
}

/// `config <--flag value>... <name>`
fn config_args(name: &str, changes: &[ConfigChange]) -> Vec<String> {
    let mut args = vec!["config".to_string()];
    for change in changes {
        args.extend(change.to_args());
    }
    args.push(name.to_string());
    args
}

/// `commit [--squash] [--cmd json] [--change c]... <name> <tag>`
fn commit_args(name: &str, tag: &str, options: &CommitOptions) -> Vec<String> {
    let mut args = vec!["commit".to_string()];
    if options.squash {
        args.push("--squash".to_string());
    }
    if let Some(cmd) = options.cmd.as_deref().filter(|c| !c.is_empty()) {
        args.push("--cmd".to_string());
        args.push(exec_form(cmd));
    }
    for change in &options.changes {
        args.push("--change".to_string());
        args.push(change.clone());
    }
    args.push(name.to_string());
    args.push(tag.to_string());
    args
}

/// Whether `from` failed because the container name is taken
fn is_name_conflict(stderr: &str) -> bool {
    stderr.contains("already in use")
}

/// Whether `rmi` failed because the image is already gone
fn is_image_missing(stderr: &str) -> bool {
    stderr.contains("image not known") || stderr.contains("no such image")
}

#[async_trait]
impl ImageStore for BuildahStore {
    async fn ensure_available(&self) -> KilnResult<()> {
        let args = vec!["--version".to_string()];
        let output = self.exec(&args).await?;
        if output.status.success() {
            debug!(
                "Using {}",
                String::from_utf8_lossy(&output.stdout).trim()
            );
            Ok(())
        } else {
            Err(KilnError::BackendUnavailable {
                path: self.path.clone(),
            })
        }
    }

    async fn create_container(&self, from_image: &str, name: &str) -> KilnResult<()> {
        debug!("Spawning container {} from {}", name, from_image);

        match self.try_create(from_image, name).await? {
            Ok(()) => return Ok(()),
            Err(stderr) if is_name_conflict(&stderr) => {
                info!("Container name {} in use, removing stale container", name);
            }
            Err(stderr) => {
                return Err(KilnError::ContainerCreate {
                    name: name.to_string(),
                    image: from_image.to_string(),
                    stderr,
                })
            }
        }

        self.remove_container(name).await;

        match self.try_create(from_image, name).await? {
            Ok(()) => Ok(()),
            Err(stderr) => Err(KilnError::ContainerNameConflict {
                name: name.to_string(),
                stderr,
            }),
        }
    }

    async fn remove_container(&self, name: &str) {
        let args = vec!["rm".to_string(), name.to_string()];
        match self.exec(&args).await {
            Ok(output) if output.status.success() => debug!("Removed container {}", name),
            Ok(output) => debug!(
                "Ignoring container removal failure for {}: {}",
                name,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => debug!("Ignoring container removal failure for {}: {}", name, e),
        }
    }

    async fn image_exists(&self, tag: &str) -> bool {
        let args = vec!["images".to_string(), "-q".to_string(), tag.to_string()];
        match self.exec(&args).await {
            Ok(output) if output.status.success() => {
                !String::from_utf8_lossy(&output.stdout).trim().is_empty()
            }
            Ok(_) => false,
            Err(e) => {
                debug!("Image lookup for {} failed, treating as miss: {}", tag, e);
                false
            }
        }
    }

    async fn execute(
        &self,
        name: &str,
        command: &[String],
        env: Option<&BTreeMap<String, String>>,
    ) -> KilnResult<()> {
        let args = run_args(name, command, env);
        debug!("Executing: {}", self.display(&args));

        let mut child = Command::new(&self.path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| self.spawn_error(&args, e))?;

        let lines = stream_child_output(&mut child, &|line| println!("{}", line)).await;

        let status = child
            .wait()
            .await
            .map_err(|e| KilnError::io(format!("waiting for {}", self.display(&args)), e))?;

        if status.success() {
            Ok(())
        } else {
            Err(KilnError::StepExecutionFailed {
                command: command.join(" "),
                code: status.code().unwrap_or(-1),
                output: error_tail(&lines),
            })
        }
    }

    async fn execute_capture(&self, name: &str, command: &[String]) -> KilnResult<String> {
        let args = run_args(name, command, None);
        let output = self.exec(&args).await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stdout = String::from_utf8_lossy(&output.stdout);
            let stderr = String::from_utf8_lossy(&output.stderr);
            let lines: Vec<String> = stdout
                .lines()
                .chain(stderr.lines())
                .map(str::to_string)
                .collect();
            Err(KilnError::StepExecutionFailed {
                command: command.join(" "),
                code: output.status.code().unwrap_or(-1),
                output: error_tail(&lines),
            })
        }
    }

    async fn configure(&self, name: &str, changes: &[ConfigChange]) -> KilnResult<()> {
        if changes.is_empty() {
            return Ok(());
        }
        self.exec_checked(&config_args(name, changes)).await?;
        Ok(())
    }

    async fn copy_from_host(&self, name: &str, host_path: &Path, dest: &str) -> KilnResult<()> {
        if !host_path.exists() {
            return Err(KilnError::SourceNotFound(host_path.to_path_buf()));
        }

        let args = vec![
            "copy".to_string(),
            name.to_string(),
            host_path.display().to_string(),
            dest.to_string(),
        ];
        self.exec_checked(&args).await?;
        Ok(())
    }

    async fn copy_from_image(
        &self,
        source_image: &str,
        name: &str,
        src: &str,
        dest: &str,
    ) -> KilnResult<()> {
        let args = vec![
            "copy".to_string(),
            "--from".to_string(),
            source_image.to_string(),
            name.to_string(),
            src.to_string(),
            dest.to_string(),
        ];
        self.exec_checked(&args).await?;
        Ok(())
    }

    async fn commit(&self, name: &str, tag: &str, options: &CommitOptions) -> KilnResult<()> {
        self.exec_checked(&commit_args(name, tag, options)).await?;
        info!("Committed {} as {}", name, tag);
        Ok(())
    }

    async fn list_images(&self, prefix: &str) -> KilnResult<Vec<String>> {
        let args = vec!["images".to_string(), "--json".to_string()];
        let stdout = self.exec_checked(&args).await?;
        let records = parse_image_listing(&stdout)?;
        Ok(names_containing(&records, prefix))
    }

    async fn delete_image(&self, tag: &str) -> KilnResult<()> {
        let args = vec!["rmi".to_string(), tag.to_string()];
        let output = self.exec(&args).await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_image_missing(&stderr) {
            // Removing a parent can cascade-delete its children
            warn!("Image {} already removed", tag);
            Ok(())
        } else {
            Err(KilnError::command_exec(self.display(&args), stderr.trim()))
        }
    }

    fn backend_name(&self) -> &'static str {
        "buildah"
    }
}
