//! In-memory image store for tests
//!
//! Records every call so tests can assert on what the cache controller
//! asked the backend to do.

use crate::error::{KilnError, KilnResult};
use crate::orchestration::images::{CommitOptions, ConfigChange};
use crate::orchestration::store::ImageStore;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// A recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Call {
    Create { from: String, name: String },
    Remove(String),
    Exists(String),
    Execute(Vec<String>),
    Capture(Vec<String>),
    Configure(Vec<ConfigChange>),
    CopyHost { dest: String },
    CopyImage { image: String, src: String, dest: String },
    Commit { tag: String, squash: bool },
    List(String),
    Delete(String),
}

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    /// Tagged images present in the store
    pub images: BTreeSet<String>,
    /// Live working containers, by name, with the image they came from
    pub containers: BTreeMap<String, String>,
    /// Commands (joined with spaces) that exit non-zero
    pub failing_commands: BTreeSet<String>,
    /// Canned stdout for captured commands
    pub captures: BTreeMap<String, String>,
    /// Images whose deletion fails
    pub undeletable: BTreeSet<String>,
    /// Container names that can never be created
    pub stuck_names: BTreeSet<String>,
    pub calls: Vec<Call>,
}

/// Image store whose state lives in memory
#[derive(Debug, Default)]
pub(crate) struct FakeStore {
    state: Mutex<FakeState>,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_images(images: &[&str]) -> Self {
        let store = Self::new();
        store
            .state()
            .images
            .extend(images.iter().map(|s| s.to_string()));
        store
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn fail_command(&self, command: &str) {
        self.state().failing_commands.insert(command.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Commands executed through `execute`, joined with spaces
    pub fn executed(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Execute(cmd) => Some(cmd.join(" ")),
                _ => None,
            })
            .collect()
    }

    pub fn commits(&self) -> Vec<String> {
        self.state()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Commit { tag, .. } => Some(tag.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn has_image(&self, tag: &str) -> bool {
        self.state().images.contains(tag)
    }

    pub fn live_containers(&self) -> BTreeMap<String, String> {
        self.state().containers.clone()
    }
}

#[async_trait]
impl ImageStore for FakeStore {
    async fn ensure_available(&self) -> KilnResult<()> {
        Ok(())
    }

    async fn create_container(&self, from_image: &str, name: &str) -> KilnResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Create {
            from: from_image.to_string(),
            name: name.to_string(),
        });
        if state.stuck_names.contains(name) {
            return Err(KilnError::ContainerNameConflict {
                name: name.to_string(),
                stderr: "already in use".to_string(),
            });
        }
        state
            .containers
            .insert(name.to_string(), from_image.to_string());
        Ok(())
    }

    async fn remove_container(&self, name: &str) {
        let mut state = self.state();
        state.calls.push(Call::Remove(name.to_string()));
        state.containers.remove(name);
    }

    async fn image_exists(&self, tag: &str) -> bool {
        let mut state = self.state();
        state.calls.push(Call::Exists(tag.to_string()));
        state.images.contains(tag)
    }

    async fn execute(
        &self,
        _name: &str,
        command: &[String],
        _env: Option<&BTreeMap<String, String>>,
    ) -> KilnResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Execute(command.to_vec()));
        let joined = command.join(" ");
        if state.failing_commands.contains(&joined) {
            return Err(KilnError::StepExecutionFailed {
                command: joined,
                code: 1,
                output: "simulated failure".to_string(),
            });
        }
        Ok(())
    }

    async fn execute_capture(&self, _name: &str, command: &[String]) -> KilnResult<String> {
        let mut state = self.state();
        state.calls.push(Call::Capture(command.to_vec()));
        let joined = command.join(" ");
        if state.failing_commands.contains(&joined) {
            return Err(KilnError::StepExecutionFailed {
                command: joined,
                code: 1,
                output: "simulated failure".to_string(),
            });
        }
        Ok(state.captures.get(&joined).cloned().unwrap_or_default())
    }

    async fn configure(&self, _name: &str, changes: &[ConfigChange]) -> KilnResult<()> {
        self.state().calls.push(Call::Configure(changes.to_vec()));
        Ok(())
    }

    async fn copy_from_host(&self, _name: &str, host_path: &Path, dest: &str) -> KilnResult<()> {
        if !host_path.exists() {
            return Err(KilnError::SourceNotFound(host_path.to_path_buf()));
        }
        self.state().calls.push(Call::CopyHost {
            dest: dest.to_string(),
        });
        Ok(())
    }

    async fn copy_from_image(
        &self,
        source_image: &str,
        _name: &str,
        src: &str,
        dest: &str,
    ) -> KilnResult<()> {
        let mut state = self.state();
        state.calls.push(Call::CopyImage {
            image: source_image.to_string(),
            src: src.to_string(),
            dest: dest.to_string(),
        });
        if !state.images.contains(source_image) {
            return Err(KilnError::command_exec(
                "copy --from",
                format!("{}: image not known", source_image),
            ));
        }
        Ok(())
    }

    async fn commit(&self, _name: &str, tag: &str, options: &CommitOptions) -> KilnResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Commit {
            tag: tag.to_string(),
            squash: options.squash,
        });
        state.images.insert(tag.to_string());
        Ok(())
    }

    async fn list_images(&self, prefix: &str) -> KilnResult<Vec<String>> {
        let mut state = self.state();
        state.calls.push(Call::List(prefix.to_string()));
        Ok(state
            .images
            .iter()
            .filter(|name| name.contains(prefix))
            .cloned()
            .collect())
    }

    async fn delete_image(&self, tag: &str) -> KilnResult<()> {
        let mut state = self.state();
        state.calls.push(Call::Delete(tag.to_string()));
        if state.undeletable.contains(tag) {
            return Err(KilnError::command_exec(
                "rmi",
                "image is in use by a container",
            ));
        }
        state.images.remove(tag);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "fake"
    }
}
