//! Observe API client.
//!
//! [`Client`] wraps a [`Backend`] transport and adds what every resource
//! handler needs on top of raw API calls: queries and monitors are compiled
//! before submission, source metadata is stamped onto inputs, mutations are
//! serialized, and asynchronous app changes are waited on.
//!
//! # Example
//!
//! ```ignore
//! use observe_provider::client::Client;
//! use observe_provider::config::ClientConfig;
//! use observe_provider::query::{Input, Query, Stage};
//! use observe_provider::wire::DatasetInput;
//!
//! let client = Client::new(MyBackend::connect().await?, ClientConfig::from_value(&config)?);
//! let query = Query::new()
//!     .with_input("obs", Input::dataset("o:dataset:41000100"))
//!     .with_stage(Stage::new("filter severity = \"error\""));
//! let dataset = client
//!     .save_dataset("41000001", DatasetInput { label: "errors".into(), ..Default::default() }, &query)
//!     .await?;
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, instrument, warn};

use crate::backoff::Backoff;
use crate::config::ClientConfig;
use crate::error::ProviderError;
use crate::monitor::{Monitor, MonitorConfig};
use crate::query::{Query, QueryConfig};
use crate::result::{decode_task_results, QueryResult};
use crate::wire::{
    self, App, AppInput, AppState, Dataset, DatasetInput, DeferredForeignKey,
    DeferredForeignKeyInput, MultiStageQueryInput, QueryParams, StageInput, TaskResult,
};

/// Transport to the Observe API.
///
/// Implementations perform a single request per call and return errors as
/// [`ProviderError`]s; the [`Client`] passes them through unchanged.
#[async_trait]
pub trait Backend: Send + Sync + 'static {
    /// Fetch a dataset by id.
    async fn get_dataset(&self, id: &str) -> Result<Dataset, ProviderError>;

    /// Create or update a dataset and its transform.
    async fn save_dataset(
        &self,
        workspace_id: &str,
        input: DatasetInput,
        query: MultiStageQueryInput,
    ) -> Result<Dataset, ProviderError>;

    /// Delete a dataset.
    async fn delete_dataset(&self, id: &str) -> Result<(), ProviderError>;

    /// Create a deferred foreign key.
    async fn create_foreign_key(
        &self,
        workspace_id: &str,
        input: DeferredForeignKeyInput,
    ) -> Result<DeferredForeignKey, ProviderError>;

    /// Update a deferred foreign key.
    async fn update_foreign_key(
        &self,
        id: &str,
        input: DeferredForeignKeyInput,
    ) -> Result<DeferredForeignKey, ProviderError>;

    /// Fetch a deferred foreign key.
    async fn get_foreign_key(&self, id: &str) -> Result<DeferredForeignKey, ProviderError>;

    /// Delete a deferred foreign key.
    async fn delete_foreign_key(&self, id: &str) -> Result<(), ProviderError>;

    /// Create a monitor.
    async fn create_monitor(
        &self,
        workspace_id: &str,
        input: wire::MonitorInput,
    ) -> Result<wire::Monitor, ProviderError>;

    /// Update a monitor.
    async fn update_monitor(
        &self,
        id: &str,
        input: wire::MonitorInput,
    ) -> Result<wire::Monitor, ProviderError>;

    /// Fetch a monitor.
    async fn get_monitor(&self, id: &str) -> Result<wire::Monitor, ProviderError>;

    /// Delete a monitor.
    async fn delete_monitor(&self, id: &str) -> Result<(), ProviderError>;

    /// Install an app.
    async fn create_app(&self, workspace_id: &str, input: AppInput) -> Result<App, ProviderError>;

    /// Reconfigure an installed app.
    async fn update_app(&self, id: &str, input: AppInput) -> Result<App, ProviderError>;

    /// Fetch an app.
    async fn get_app(&self, id: &str) -> Result<App, ProviderError>;

    /// Start uninstalling an app.
    async fn delete_app(&self, id: &str) -> Result<(), ProviderError>;

    /// Run a query and return the raw task results.
    async fn query(
        &self,
        stages: Vec<StageInput>,
        params: QueryParams,
    ) -> Result<Vec<TaskResult>, ProviderError>;
}

/// Serializes mutating API calls.
///
/// Clones share the same lock, so one lock can be handed to several clients.
#[derive(Debug, Clone, Default)]
pub struct MutationLock(Arc<Mutex<()>>);

impl MutationLock {
    /// Create an unlocked lock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access.
    pub async fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }
}

/// High level Observe client.
pub struct Client<B> {
    backend: Arc<B>,
    config: ClientConfig,
    lock: MutationLock,
    backoff: Backoff,
}

impl<B> Clone for Client<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            lock: self.lock.clone(),
            backoff: self.backoff,
        }
    }
}

impl<B: Backend> Client<B> {
    /// Create a client with its own mutation lock.
    pub fn new(backend: B, config: ClientConfig) -> Self {
        Self::from_arc(Arc::new(backend), config)
    }

    /// Create a client over a shared backend.
    pub fn from_arc(backend: Arc<B>, config: ClientConfig) -> Self {
        Self {
            backend,
            config,
            lock: MutationLock::new(),
            backoff: Backoff::app_sync(),
        }
    }

    /// Use `lock` to serialize mutations, e.g. to share it with other clients.
    pub fn with_lock(mut self, lock: MutationLock) -> Self {
        self.lock = lock;
        self
    }

    /// Override the delay schedule used while waiting on apps.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// The client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    async fn lock_mutations(&self) -> Option<MutexGuard<'_, ()>> {
        if self.config.allow_concurrent_mutations() {
            None
        } else {
            Some(self.lock.acquire().await)
        }
    }

    async fn with_poll_timeout<T, F>(&self, wait: F) -> Result<T, ProviderError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        match self.config.poll_timeout {
            Some(limit) => tokio::time::timeout(limit, wait).await.map_err(|_| {
                ProviderError::DeadlineExceeded(format!(
                    "app did not settle within {:?}",
                    limit
                ))
            })?,
            None => wait.await,
        }
    }

    // =========================================================================
    // Datasets
    // =========================================================================

    /// Fetch a dataset.
    #[instrument(skip(self), name = "client.get_dataset")]
    pub async fn get_dataset(&self, id: &str) -> Result<Dataset, ProviderError> {
        self.backend.get_dataset(id).await
    }

    /// Compile `query` and save it as the dataset's transform.
    #[instrument(skip(self, input, query), name = "client.save_dataset")]
    pub async fn save_dataset(
        &self,
        workspace_id: &str,
        mut input: DatasetInput,
        query: &Query,
    ) -> Result<Dataset, ProviderError> {
        let compiled = query.to_wire()?;

        if let Some(source) = &self.config.source {
            input.source = Some(source.clone());
        }
        if let Some(id) = &self.config.managing_object_id {
            input.managed_by_id = Some(id.clone());
        }

        let _guard = self.lock_mutations().await;
        self.backend.save_dataset(workspace_id, input, compiled).await
    }

    /// Delete a dataset.
    #[instrument(skip(self), name = "client.delete_dataset")]
    pub async fn delete_dataset(&self, id: &str) -> Result<(), ProviderError> {
        let _guard = self.lock_mutations().await;
        self.backend.delete_dataset(id).await
    }

    // =========================================================================
    // Foreign keys
    // =========================================================================

    /// Create a foreign key.
    ///
    /// If the backend accepts the key but cannot resolve it, the key is
    /// deleted again and the resolution error is returned.
    #[instrument(skip(self, input), name = "client.create_foreign_key")]
    pub async fn create_foreign_key(
        &self,
        workspace_id: &str,
        input: DeferredForeignKeyInput,
    ) -> Result<DeferredForeignKey, ProviderError> {
        let _guard = self.lock_mutations().await;
        let created = self.backend.create_foreign_key(workspace_id, input).await?;

        if created.status.error_text.is_empty() {
            return Ok(created);
        }

        // Already holding the lock, so go straight to the backend.
        let id = created.id.to_string();
        if let Err(e) = self.backend.delete_foreign_key(&id).await {
            warn!(foreign_key_id = %id, error = %e, "Failed to clean up unresolved foreign key");
        }
        Err(ProviderError::Backend(created.status.error_text))
    }

    /// Update a foreign key, failing if it no longer resolves.
    #[instrument(skip(self, input), name = "client.update_foreign_key")]
    pub async fn update_foreign_key(
        &self,
        id: &str,
        input: DeferredForeignKeyInput,
    ) -> Result<DeferredForeignKey, ProviderError> {
        let _guard = self.lock_mutations().await;
        let updated = self.backend.update_foreign_key(id, input).await?;

        if updated.status.error_text.is_empty() {
            Ok(updated)
        } else {
            Err(ProviderError::Backend(updated.status.error_text))
        }
    }

    /// Fetch a foreign key.
    #[instrument(skip(self), name = "client.get_foreign_key")]
    pub async fn get_foreign_key(&self, id: &str) -> Result<DeferredForeignKey, ProviderError> {
        self.backend.get_foreign_key(id).await
    }

    /// Delete a foreign key.
    #[instrument(skip(self), name = "client.delete_foreign_key")]
    pub async fn delete_foreign_key(&self, id: &str) -> Result<(), ProviderError> {
        let _guard = self.lock_mutations().await;
        self.backend.delete_foreign_key(id).await
    }

    // =========================================================================
    // Monitors
    // =========================================================================

    /// Compile and create a monitor.
    #[instrument(skip(self, config), fields(name = %config.name), name = "client.create_monitor")]
    pub async fn create_monitor(
        &self,
        workspace_id: &str,
        config: &MonitorConfig,
    ) -> Result<Monitor, ProviderError> {
        let mut input = config.to_wire()?;
        if let Some(source) = &self.config.source {
            input.source = Some(source.clone());
        }
        if let Some(id) = &self.config.managing_object_id {
            input.managed_by_id = Some(id.clone());
        }

        let _guard = self.lock_mutations().await;
        let created = self.backend.create_monitor(workspace_id, input).await?;
        Monitor::from_wire(&created)
    }

    /// Compile and update a monitor.
    ///
    /// The managing object is only set on create.
    #[instrument(skip(self, config), fields(name = %config.name), name = "client.update_monitor")]
    pub async fn update_monitor(
        &self,
        id: &str,
        config: &MonitorConfig,
    ) -> Result<Monitor, ProviderError> {
        let mut input = config.to_wire()?;
        if let Some(source) = &self.config.source {
            input.source = Some(source.clone());
        }

        let _guard = self.lock_mutations().await;
        let updated = self.backend.update_monitor(id, input).await?;
        Monitor::from_wire(&updated)
    }

    /// Fetch a monitor.
    #[instrument(skip(self), name = "client.get_monitor")]
    pub async fn get_monitor(&self, id: &str) -> Result<Monitor, ProviderError> {
        let monitor = self.backend.get_monitor(id).await?;
        Monitor::from_wire(&monitor)
    }

    /// Delete a monitor.
    #[instrument(skip(self), name = "client.delete_monitor")]
    pub async fn delete_monitor(&self, id: &str) -> Result<(), ProviderError> {
        let _guard = self.lock_mutations().await;
        self.backend.delete_monitor(id).await
    }

    // =========================================================================
    // Apps
    // =========================================================================

    /// Poll while the app is installing.
    ///
    /// A failed poll stops waiting and the last known state is returned.
    async fn wait_for_install(&self, mut app: App) -> Result<App, ProviderError> {
        let mut delays = self.backoff.delays();
        while app.status.state == AppState::Installing {
            let delay = delays.next().unwrap_or(self.backoff.cap);
            tokio::time::sleep(delay).await;

            match self.backend.get_app(&app.id.to_string()).await {
                Ok(latest) => app = latest,
                Err(e) => {
                    warn!(app_id = %app.id, error = %e, "Polling app failed, returning last known state");
                    break;
                },
            }
        }
        Ok(app)
    }

    /// Install an app and wait for the install to finish.
    ///
    /// The app is configured again right after creation, so that the returned
    /// state reflects `input` even if creation alone ignored part of it.
    #[instrument(skip(self, input), fields(module_id = %input.module_id), name = "client.create_app")]
    pub async fn create_app(&self, workspace_id: &str, input: AppInput) -> Result<App, ProviderError> {
        let _guard = self.lock_mutations().await;
        let created = self.backend.create_app(workspace_id, input.clone()).await?;
        let updated = self
            .backend
            .update_app(&created.id.to_string(), input)
            .await?;

        self.with_poll_timeout(self.wait_for_install(updated)).await
    }

    /// Reconfigure an app and wait for the change to apply.
    #[instrument(skip(self, input), name = "client.update_app")]
    pub async fn update_app(&self, id: &str, input: AppInput) -> Result<App, ProviderError> {
        let _guard = self.lock_mutations().await;
        let updated = self.backend.update_app(id, input).await?;

        self.with_poll_timeout(self.wait_for_install(updated)).await
    }

    /// Fetch an app.
    #[instrument(skip(self), name = "client.get_app")]
    pub async fn get_app(&self, id: &str) -> Result<App, ProviderError> {
        self.backend.get_app(id).await
    }

    /// Uninstall an app and wait until it is gone.
    ///
    /// Fails with [`ProviderError::FailedPrecondition`] if the app is still
    /// there once it stops deleting.
    #[instrument(skip(self), name = "client.delete_app")]
    pub async fn delete_app(&self, id: &str) -> Result<(), ProviderError> {
        let _guard = self.lock_mutations().await;
        self.backend.delete_app(id).await?;

        let wait = async {
            let mut delays = self.backoff.delays();
            loop {
                match self.backend.get_app(id).await {
                    Ok(app) if app.status.state == AppState::Deleting => {
                        let delay = delays.next().unwrap_or(self.backoff.cap);
                        tokio::time::sleep(delay).await;
                    },
                    Ok(app) => {
                        return Err(ProviderError::FailedPrecondition(format!(
                            "failed to delete app {}: {:?}",
                            id, app.status.state
                        )))
                    },
                    Err(e) => {
                        debug!(app_id = %id, reason = %e, "App no longer readable, delete complete");
                        return Ok(());
                    },
                }
            }
        };

        self.with_poll_timeout(wait).await
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Run a query and decode its results.
    #[instrument(skip(self, config), fields(limit = config.limit), name = "client.query")]
    pub async fn query(&self, config: &QueryConfig) -> Result<QueryResult, ProviderError> {
        let (stages, params) = config.to_wire()?;
        let results = self.backend.query(stages, params).await?;
        decode_task_results(&results)
    }
}
