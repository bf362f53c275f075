//! Build step execution

use crate::error::KilnResult;
use crate::orchestration::ImageStore;
use std::collections::BTreeMap;
use tracing::debug;

/// Runs one step inside a working container, uncached.
///
/// Output is streamed live by the store; a non-zero exit surfaces as
/// `StepExecutionFailed` unchanged.
pub struct StepExecutor<'a> {
    store: &'a dyn ImageStore,
    working_name: String,
}

impl<'a> StepExecutor<'a> {
    pub fn new(store: &'a dyn ImageStore, working_name: impl Into<String>) -> Self {
        Self {
            store,
            working_name: working_name.into(),
        }
    }

    pub async fn run(
        &self,
        command: &[String],
        env: Option<&BTreeMap<String, String>>,
    ) -> KilnResult<()> {
        debug!("{} run {} -- {}", self.store.backend_name(), self.working_name, command.join(" "));
        self.store.execute(&self.working_name, command, env).await
    }

    pub async fn capture(&self, command: &[String]) -> KilnResult<String> {
        self.store.execute_capture(&self.working_name, command).await
    }
}
