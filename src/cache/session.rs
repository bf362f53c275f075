//! Layer-cached build sessions
//!
//! A session owns one working container and a `current_image` pointer that
//! names the lineage the container's state derives from. Each cached step is
//! keyed on that pointer, so the cache forms a chain: a hit replaces the
//! working container with the cached layer and moves the pointer to it, a
//! miss runs the step, commits it under its key and moves the pointer the
//! same way.
//!
//! Re-running a session that failed part-way replays every step before the
//! failure as a cache hit and resumes execution from the failed step.
//!
//! Two sessions writing to the same cache namespace at the same time are not
//! coordinated; callers must serialize them.
//!
//! # Session States
//!
//! | State | Accepts steps | Entered by |
//! |-------|---------------|------------|
//! | Active | yes | `open` |
//! | Finalized | no | `commit_final` |
//! | Aborted | no | any fatal error |

use crate::cache::executor::StepExecutor;
use crate::cache::key::{cache_tag, StepRequest, DEFAULT_KEY_LENGTH};
use crate::error::{KilnError, KilnResult};
use crate::orchestration::{CommitOptions, ConfigChange, ImageStore};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

/// Parameters fixed for the lifetime of a session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Image the working container starts from
    pub base_image: String,
    /// Name of the one working container this session uses
    pub working_name: String,
    /// Repository name under which cache entries are tagged
    pub namespace: String,
    /// Hex characters kept from each cache digest
    pub key_length: usize,
}

impl SessionConfig {
    pub fn new(
        base_image: impl Into<String>,
        working_name: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            base_image: base_image.into(),
            working_name: working_name.into(),
            namespace: namespace.into(),
            key_length: DEFAULT_KEY_LENGTH,
        }
    }

    pub fn with_key_length(mut self, key_length: usize) -> Self {
        self.key_length = key_length;
        self
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Finalized,
    Aborted,
}

impl SessionState {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Finalized => "finalized",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a cached step was satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A matching layer existed; nothing was executed
    Cached { key: String, tag: String },
    /// The step ran and its result was committed
    Built { key: String, tag: String },
}

impl StepOutcome {
    pub fn key(&self) -> &str {
        match self {
            Self::Cached { key, .. } | Self::Built { key, .. } => key,
        }
    }

    pub fn tag(&self) -> &str {
        match self {
            Self::Cached { tag, .. } | Self::Built { tag, .. } => tag,
        }
    }

    pub fn was_cached(&self) -> bool {
        matches!(self, Self::Cached { .. })
    }
}

/// One image build against a single working container
pub struct BuildSession<'a> {
    store: &'a dyn ImageStore,
    executor: StepExecutor<'a>,
    config: SessionConfig,
    current_image: String,
    state: SessionState,
}

impl<'a> BuildSession<'a> {
    /// Create the working container from the base image
    pub async fn open(store: &'a dyn ImageStore, config: SessionConfig) -> KilnResult<Self> {
        if config.namespace.is_empty() {
            return Err(KilnError::EmptyCachePrefix);
        }

        store
            .create_container(&config.base_image, &config.working_name)
            .await?;
        info!(
            "Opened session {} from {} (cache: {})",
            config.working_name, config.base_image, config.namespace
        );

        Ok(Self {
            store,
            executor: StepExecutor::new(store, config.working_name.clone()),
            current_image: config.base_image.clone(),
            config,
            state: SessionState::Active,
        })
    }

    pub fn base_image(&self) -> &str {
        &self.config.base_image
    }

    /// Image identity the working container's state derives from
    pub fn current_image(&self) -> &str {
        &self.current_image
    }

    pub fn working_name(&self) -> &str {
        &self.config.working_name
    }

    pub fn namespace(&self) -> &str {
        &self.config.namespace
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Cache key `step` would get if run now
    pub fn key_for(&self, step: &StepRequest) -> String {
        step.key(&self.current_image, self.config.key_length)
    }

    /// Run a step unless a layer for it already exists.
    ///
    /// On a hit the working container is recreated from the cached layer,
    /// not from the base, so later keys chain from the cached identity.
    pub async fn run_cached(&mut self, step: &StepRequest) -> KilnResult<StepOutcome> {
        self.ensure_active("run a cached step")?;

        let key = self.key_for(step);
        let tag = cache_tag(&self.config.namespace, &key);

        if self.store.image_exists(&tag).await {
            info!("Using cached layer {}", tag);
            self.store.remove_container(&self.config.working_name).await;
            let recreated = self
                .store
                .create_container(&tag, &self.config.working_name)
                .await;
            self.check(recreated)?;
            self.current_image = tag.clone();
            return Ok(StepOutcome::Cached { key, tag });
        }

        debug!("Cache miss for {}", tag);
        let ran = self.executor.run(&step.command, step.env.as_ref()).await;
        self.check(ran)?;

        let committed = self
            .store
            .commit(&self.config.working_name, &tag, &CommitOptions::default())
            .await;
        self.check(committed)?;

        self.current_image = tag.clone();
        Ok(StepOutcome::Built { key, tag })
    }

    /// Run a command without touching the cache.
    ///
    /// `current_image` does not move, so the change is invisible to later
    /// cache keys. Use for steps the chain need not capture.
    pub async fn run_uncached(
        &mut self,
        command: &[String],
        env: Option<&BTreeMap<String, String>>,
    ) -> KilnResult<()> {
        self.ensure_active("run a step")?;
        let ran = self.executor.run(command, env).await;
        self.check(ran)
    }

    /// Run a command without caching and return its stdout
    pub async fn capture(&mut self, command: &[String]) -> KilnResult<String> {
        self.ensure_active("run a step")?;
        let captured = self.executor.capture(command).await;
        self.check(captured)
    }

    /// Apply image configuration to the working container
    pub async fn configure(&mut self, changes: &[ConfigChange]) -> KilnResult<()> {
        self.ensure_active("configure")?;
        let configured = self
            .store
            .configure(&self.config.working_name, changes)
            .await;
        self.check(configured)
    }

    /// Copy a host file or directory into the working container
    pub async fn copy_from_host(&mut self, host_path: &Path, dest: &str) -> KilnResult<()> {
        self.ensure_active("copy")?;
        if !host_path.exists() {
            self.state = SessionState::Aborted;
            return Err(KilnError::SourceNotFound(host_path.to_path_buf()));
        }
        let copied = self
            .store
            .copy_from_host(&self.config.working_name, host_path, dest)
            .await;
        self.check(copied)
    }

    /// Stage a path from a separately built image into the working container
    pub async fn copy_from_image(&mut self, source_image: &str, src: &str, dest: &str) -> KilnResult<()> {
        self.ensure_active("copy")?;
        let copied = self
            .store
            .copy_from_image(source_image, &self.config.working_name, src, dest)
            .await;
        self.check(copied)
    }

    /// Apply final configuration and commit the result tag
    pub async fn commit_final(
        &mut self,
        tag: &str,
        changes: &[ConfigChange],
        options: &CommitOptions,
    ) -> KilnResult<()> {
        self.ensure_active("commit")?;

        if !changes.is_empty() {
            let configured = self
                .store
                .configure(&self.config.working_name, changes)
                .await;
            self.check(configured)?;
        }

        let committed = self
            .store
            .commit(&self.config.working_name, tag, options)
            .await;
        self.check(committed)?;

        self.state = SessionState::Finalized;
        info!("Session {} finalized as {}", self.config.working_name, tag);
        Ok(())
    }

    /// Remove the working container. Never fails.
    pub async fn close(self) {
        self.store.remove_container(&self.config.working_name).await;
        debug!(
            "Closed session {} ({})",
            self.config.working_name, self.state
        );
    }

    fn ensure_active(&self, operation: &'static str) -> KilnResult<()> {
        if self.state == SessionState::Active {
            Ok(())
        } else {
            Err(KilnError::InvalidSessionState {
                operation,
                state: self.state.as_str(),
            })
        }
    }

    fn check<T>(&mut self, result: KilnResult<T>) -> KilnResult<T> {
        if let Err(ref e) = result {
            if e.is_fatal() {
                self.state = SessionState::Aborted;
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestration::fake::{Call, FakeStore};

    const NS: &str = "proj/cache/core/8.0";

    fn config() -> SessionConfig {
        SessionConfig::new("base:latest", "proj-core", NS)
    }

    fn step(name: &str) -> StepRequest {
        StepRequest::new(["sh", "-c", name]).extra("step", name)
    }

    async fn run_steps(store: &FakeStore, steps: &[StepRequest]) -> (KilnResult<()>, String) {
        let mut session = BuildSession::open(store, config()).await.unwrap();
        let mut result = Ok(());
        for s in steps {
            if let Err(e) = session.run_cached(s).await {
                result = Err(e);
                break;
            }
        }
        let current = session.current_image().to_string();
        session.close().await;
        (result, current)
    }

    #[tokio::test]
    async fn open_creates_working_container_from_base() {
        let store = FakeStore::new();
        let session = BuildSession::open(&store, config()).await.unwrap();

        assert_eq!(session.current_image(), "base:latest");
        assert_eq!(session.base_image(), "base:latest");
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(
            store.live_containers().get("proj-core"),
            Some(&"base:latest".to_string())
        );
    }

    #[tokio::test]
    async fn empty_namespace_is_rejected() {
        let store = FakeStore::new();
        let result = BuildSession::open(&store, SessionConfig::new("base", "w", "")).await;
        assert!(matches!(result, Err(KilnError::EmptyCachePrefix)));
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn open_propagates_unresolved_name_conflict() {
        let store = FakeStore::new();
        store.state().stuck_names.insert("proj-core".to_string());
        let result = BuildSession::open(&store, config()).await;
        assert!(matches!(result, Err(KilnError::ContainerNameConflict { .. })));
    }

    #[tokio::test]
    async fn miss_executes_and_commits_under_namespace() {
        let store = FakeStore::new();
        let mut session = BuildSession::open(&store, config()).await.unwrap();
        let compile = step("compile");
        let expected_key = compile.key("base:latest", DEFAULT_KEY_LENGTH);

        let outcome = session.run_cached(&compile).await.unwrap();

        assert!(!outcome.was_cached());
        assert_eq!(outcome.key(), expected_key);
        assert_eq!(outcome.tag(), format!("{}:{}", NS, expected_key));
        assert_eq!(session.current_image(), outcome.tag());
        assert_eq!(store.executed(), vec!["sh -c compile"]);
        assert_eq!(store.commits(), vec![outcome.tag().to_string()]);
        assert!(store.has_image(outcome.tag()));
    }

    #[tokio::test]
    async fn second_session_is_served_from_cache() {
        let store = FakeStore::new();
        let steps = [step("deps"), step("compile")];

        let (first, first_image) = run_steps(&store, &steps).await;
        first.unwrap();
        assert_eq!(store.executed().len(), 2);

        store.clear_calls();
        let (second, second_image) = run_steps(&store, &steps).await;
        second.unwrap();

        assert!(store.executed().is_empty());
        assert!(store.commits().is_empty());
        assert_eq!(first_image, second_image);
    }

    #[tokio::test]
    async fn hit_recreates_container_from_cached_layer() {
        let store = FakeStore::new();
        let deps = step("deps");
        let tag = cache_tag(NS, &deps.key("base:latest", DEFAULT_KEY_LENGTH));
        store.state().images.insert(tag.clone());

        let mut session = BuildSession::open(&store, config()).await.unwrap();
        store.clear_calls();
        let outcome = session.run_cached(&deps).await.unwrap();

        assert!(outcome.was_cached());
        assert_eq!(
            store.calls(),
            vec![
                Call::Exists(tag.clone()),
                Call::Remove("proj-core".to_string()),
                Call::Create {
                    from: tag.clone(),
                    name: "proj-core".to_string(),
                },
            ]
        );
        assert_eq!(session.current_image(), tag);
        assert_eq!(store.live_containers().get("proj-core"), Some(&tag));
    }

    #[tokio::test]
    async fn keys_chain_from_previous_step() {
        let store = FakeStore::new();
        let mut session = BuildSession::open(&store, config()).await.unwrap();

        let first = session.run_cached(&step("deps")).await.unwrap();
        let compile = step("compile");
        let chained = session.key_for(&compile);

        assert_eq!(chained, compile.key(first.tag(), DEFAULT_KEY_LENGTH));
        assert_ne!(chained, compile.key("base:latest", DEFAULT_KEY_LENGTH));
    }

    #[tokio::test]
    async fn failed_run_resumes_from_failing_step() {
        let store = FakeStore::new();
        let steps = [step("a"), step("b"), step("c")];
        store.fail_command("sh -c c");

        let (result, _) = run_steps(&store, &steps).await;
        assert!(matches!(result, Err(KilnError::StepExecutionFailed { .. })));
        assert_eq!(store.executed(), vec!["sh -c a", "sh -c b", "sh -c c"]);
        assert_eq!(store.commits().len(), 2);
        assert!(store.live_containers().is_empty());

        store.state().failing_commands.clear();
        store.clear_calls();
        let (result, _) = run_steps(&store, &steps).await;
        result.unwrap();
        assert_eq!(store.executed(), vec!["sh -c c"]);
    }

    #[tokio::test]
    async fn uncached_steps_do_not_move_the_chain() {
        let store = FakeStore::new();
        let mut session = BuildSession::open(&store, config()).await.unwrap();
        let compile = step("compile");
        let before = session.key_for(&compile);

        session
            .run_uncached(&["test".to_string(), "-x".to_string(), "/bin/sh".to_string()], None)
            .await
            .unwrap();

        assert_eq!(session.current_image(), "base:latest");
        assert_eq!(session.key_for(&compile), before);
        assert!(store.commits().is_empty());
    }

    #[tokio::test]
    async fn capture_returns_stdout() {
        let store = FakeStore::new();
        store
            .state()
            .captures
            .insert("valkey-server --version".to_string(), "Valkey server v=8.0.1".to_string());
        let mut session = BuildSession::open(&store, config()).await.unwrap();

        let out = session
            .capture(&["valkey-server".to_string(), "--version".to_string()])
            .await
            .unwrap();
        assert_eq!(out, "Valkey server v=8.0.1");
    }

    #[tokio::test]
    async fn commit_final_finalizes_session() {
        let store = FakeStore::new();
        let mut session = BuildSession::open(&store, config()).await.unwrap();
        let changes = [ConfigChange::Label("org.valkey.version".to_string(), "8.0".to_string())];

        session
            .commit_final("proj-core:8.0", &changes, &CommitOptions::default())
            .await
            .unwrap();

        assert_eq!(session.state(), SessionState::Finalized);
        assert!(store.has_image("proj-core:8.0"));
        assert!(store.calls().contains(&Call::Configure(changes.to_vec())));

        let err = session.run_cached(&step("late")).await.unwrap_err();
        assert!(matches!(
            err,
            KilnError::InvalidSessionState {
                state: "finalized",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn fatal_error_aborts_session() {
        let store = FakeStore::new();
        store.fail_command("sh -c a");
        let mut session = BuildSession::open(&store, config()).await.unwrap();

        assert!(session.run_cached(&step("a")).await.is_err());
        assert_eq!(session.state(), SessionState::Aborted);
        assert_eq!(session.current_image(), "base:latest");

        let err = session.run_cached(&step("b")).await.unwrap_err();
        assert!(matches!(err, KilnError::InvalidSessionState { .. }));
        assert_eq!(store.executed(), vec!["sh -c a"]);
    }

    #[tokio::test]
    async fn missing_host_source_fails_before_copy() {
        let store = FakeStore::new();
        let mut session = BuildSession::open(&store, config()).await.unwrap();

        let err = session
            .copy_from_host(Path::new("/nonexistent/kiln/valkey.conf"), "/etc/valkey.conf")
            .await
            .unwrap_err();

        assert!(matches!(err, KilnError::SourceNotFound(_)));
        assert!(!store
            .calls()
            .iter()
            .any(|c| matches!(c, Call::CopyHost { .. })));
    }

    #[tokio::test]
    async fn close_removes_working_container() {
        let store = FakeStore::new();
        let session = BuildSession::open(&store, config()).await.unwrap();
        session.close().await;
        assert!(store.live_containers().is_empty());
    }
}
