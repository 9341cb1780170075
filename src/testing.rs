//! Testing utilities for code built on the client.
//!
//! [`MockBackend`] is an in-memory [`Backend`] that records every call it
//! receives. Resource handlers can be tested against it without an Observe
//! account, and asynchronous behavior (app installs and deletes, unresolved
//! foreign keys, transport failures) can be scripted.
//!
//! # Example
//!
//! ```ignore
//! use observe_provider::client::Client;
//! use observe_provider::config::ClientConfig;
//! use observe_provider::testing::{BackendCall, MockBackend};
//!
//! #[tokio::test]
//! async fn test_delete_dataset() {
//!     let client = Client::new(MockBackend::new(), ClientConfig::new("101"));
//!     client.delete_dataset("41000100").await.unwrap();
//!
//!     assert!(matches!(
//!         client.backend().calls()[..],
//!         [BackendCall::DeleteDataset { .. }]
//!     ));
//! }
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::Value;

use crate::client::Backend;
use crate::error::ProviderError;
use crate::validation::{Diagnostic, DiagnosticSeverity};
use crate::wire::{
    App, AppInput, AppState, AppStatus, Dataset, DatasetInput, DeferredForeignKey,
    DeferredForeignKeyInput, DeferredForeignKeyStatus, Monitor, MonitorInput, MonitorRule,
    MultiStageQuery, MultiStageQueryInput, NotificationImportance, NotificationMerge,
    NotificationSelection, NotificationSpecification, ObjectIdScalar, QueryParams, StageInput,
    TaskResult, Transform, TransformVersion,
};

const FIRST_ID: i64 = 41_000_100;

/// A call received by [`MockBackend`], with its arguments.
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum BackendCall {
    GetDataset {
        id: String,
    },
    SaveDataset {
        workspace_id: String,
        input: DatasetInput,
        query: MultiStageQueryInput,
    },
    DeleteDataset {
        id: String,
    },
    CreateForeignKey {
        workspace_id: String,
        input: DeferredForeignKeyInput,
    },
    UpdateForeignKey {
        id: String,
        input: DeferredForeignKeyInput,
    },
    GetForeignKey {
        id: String,
    },
    DeleteForeignKey {
        id: String,
    },
    CreateMonitor {
        workspace_id: String,
        input: MonitorInput,
    },
    UpdateMonitor {
        id: String,
        input: MonitorInput,
    },
    GetMonitor {
        id: String,
    },
    DeleteMonitor {
        id: String,
    },
    CreateApp {
        workspace_id: String,
        input: AppInput,
    },
    UpdateApp {
        id: String,
        input: AppInput,
    },
    GetApp {
        id: String,
    },
    DeleteApp {
        id: String,
    },
    Query {
        stages: Vec<StageInput>,
        params: QueryParams,
    },
}

#[derive(Debug, Default)]
struct State {
    calls: Vec<BackendCall>,
    next_id: i64,
    failures: VecDeque<ProviderError>,

    datasets: HashMap<String, Dataset>,
    foreign_keys: HashMap<String, DeferredForeignKey>,
    foreign_key_error: Option<String>,
    fail_deletes: bool,
    monitors: HashMap<String, Monitor>,

    apps: HashMap<String, App>,
    app_states: VecDeque<AppState>,
    fail_app_reads: bool,
    deletion_script: VecDeque<AppState>,
    deleting: HashMap<String, VecDeque<AppState>>,

    query_results: Vec<TaskResult>,
}

impl State {
    fn record(&mut self, call: BackendCall) -> Result<(), ProviderError> {
        self.calls.push(call);
        match self.failures.pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn allocate_id(&mut self) -> ObjectIdScalar {
        if self.next_id == 0 {
            self.next_id = FIRST_ID;
        }
        let id = ObjectIdScalar(self.next_id);
        self.next_id += 1;
        id
    }

    fn apply_app_script(&mut self, app: &mut App) {
        if let Some(state) = self.app_states.pop_front() {
            app.status.state = state;
        }
    }

    fn foreign_key_status(&self) -> DeferredForeignKeyStatus {
        let resolved = self.foreign_key_error.is_none();
        DeferredForeignKeyStatus {
            found_source: resolved,
            found_target: resolved,
            matched_source_fields: resolved,
            matched_target_fields: resolved,
            field_types_are_comparable: resolved,
            error_text: self.foreign_key_error.clone().unwrap_or_default(),
        }
    }
}

fn not_found(kind: &str, id: &str) -> ProviderError {
    ProviderError::NotFound(format!("{} {}", kind, id))
}

fn monitor_from_input(
    id: ObjectIdScalar,
    workspace_id: ObjectIdScalar,
    input: MonitorInput,
) -> Result<Monitor, ProviderError> {
    let (type_name, fields) = match (&input.rule.count_rule, &input.rule.change_rule) {
        (Some(count), None) => ("MonitorRuleCount", serde_json::to_value(count)?),
        (None, Some(change)) => ("MonitorRuleChange", serde_json::to_value(change)?),
        _ => {
            return Err(ProviderError::Validation(
                "exactly one of countRule and changeRule must be set".to_string(),
            ))
        },
    };
    let fields = match fields {
        Value::Object(map) => map,
        _ => serde_json::Map::new(),
    };

    let spec = input.notification_spec;
    Ok(Monitor {
        id,
        workspace_id,
        name: input.name,
        description: input.description.unwrap_or_default(),
        icon_url: input.icon_url.unwrap_or_default(),
        query: MultiStageQuery::from(input.query),
        rule: MonitorRule {
            type_name: type_name.to_string(),
            source_column: input.rule.source_column,
            group_by: input.rule.group_by,
            group_by_columns: input.rule.group_by_columns,
            fields,
        },
        notification_spec: NotificationSpecification {
            importance: spec
                .importance
                .unwrap_or(NotificationImportance::Informational),
            merge: spec.merge.unwrap_or(NotificationMerge::Merged),
            selection: spec.selection.unwrap_or(NotificationSelection::Any),
            selection_value: spec.selection_value,
        },
    })
}

/// In-memory [`Backend`] for tests.
#[derive(Debug, Default)]
pub struct MockBackend {
    state: Mutex<State>,
}

impl MockBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test must not hide the calls made before it.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<BackendCall> {
        self.state().calls.clone()
    }

    /// Fail the next call, whatever it is, with `err`. Queued failures are
    /// used in order.
    pub fn fail_next(&self, err: ProviderError) {
        self.state().failures.push_back(err);
    }

    /// Report foreign keys as unresolved with `message` from now on.
    pub fn set_foreign_key_error(&self, message: impl Into<String>) {
        self.state().foreign_key_error = Some(message.into());
    }

    /// Make every foreign key delete fail.
    pub fn fail_deletes(&self, fail: bool) {
        self.state().fail_deletes = fail;
    }

    /// Number of stored foreign keys.
    pub fn foreign_key_count(&self) -> usize {
        self.state().foreign_keys.len()
    }

    /// States handed out by successive app creates, updates and reads.
    ///
    /// Once the script runs out the app keeps its last state. Apps start out
    /// `Installed`.
    pub fn script_app_states(&self, states: impl IntoIterator<Item = AppState>) {
        self.state().app_states.extend(states);
    }

    /// Make every app read fail.
    pub fn fail_app_reads(&self, fail: bool) {
        self.state().fail_app_reads = fail;
    }

    /// States reported by reads of the next app to be deleted.
    ///
    /// Once the script runs out the app is gone.
    pub fn script_deletion(&self, states: impl IntoIterator<Item = AppState>) {
        self.state().deletion_script.extend(states);
    }

    /// Add a task result to return from the next query.
    pub fn push_query_result(&self, result: TaskResult) {
        self.state().query_results.push(result);
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn get_dataset(&self, id: &str) -> Result<Dataset, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::GetDataset { id: id.to_string() })?;
        state
            .datasets
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("dataset", id))
    }

    async fn save_dataset(
        &self,
        workspace_id: &str,
        input: DatasetInput,
        query: MultiStageQueryInput,
    ) -> Result<Dataset, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::SaveDataset {
            workspace_id: workspace_id.to_string(),
            input: input.clone(),
            query: query.clone(),
        })?;

        let id = match &input.id {
            Some(id) => {
                let id: i64 = id
                    .parse()
                    .map_err(|_| ProviderError::Validation(format!("invalid dataset id {:?}", id)))?;
                ObjectIdScalar(id)
            },
            None => state.allocate_id(),
        };
        let workspace_id: i64 = workspace_id.parse().map_err(|_| {
            ProviderError::Validation(format!("invalid workspace id {:?}", workspace_id))
        })?;
        let version = state.allocate_id().to_string();

        let dataset = Dataset {
            id,
            workspace_id: ObjectIdScalar(workspace_id),
            version,
            label: input.label,
            description: input.description,
            icon_url: input.icon_url,
            path_cost: input.path_cost,
            transform: Some(Transform {
                current: Some(TransformVersion {
                    query: MultiStageQuery::from(query),
                }),
            }),
        };
        state.datasets.insert(id.to_string(), dataset.clone());
        Ok(dataset)
    }

    async fn delete_dataset(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::DeleteDataset { id: id.to_string() })?;
        state.datasets.remove(id);
        Ok(())
    }

    async fn create_foreign_key(
        &self,
        workspace_id: &str,
        input: DeferredForeignKeyInput,
    ) -> Result<DeferredForeignKey, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::CreateForeignKey {
            workspace_id: workspace_id.to_string(),
            input: input.clone(),
        })?;

        let workspace_id: i64 = workspace_id.parse().map_err(|_| {
            ProviderError::Validation(format!("invalid workspace id {:?}", workspace_id))
        })?;
        let fk = DeferredForeignKey {
            id: state.allocate_id(),
            workspace_id: ObjectIdScalar(workspace_id),
            source_dataset: input.source_dataset,
            target_dataset: input.target_dataset,
            src_fields: input.src_fields,
            dst_fields: input.dst_fields,
            label: input.label,
            status: state.foreign_key_status(),
        };
        state.foreign_keys.insert(fk.id.to_string(), fk.clone());
        Ok(fk)
    }

    async fn update_foreign_key(
        &self,
        id: &str,
        input: DeferredForeignKeyInput,
    ) -> Result<DeferredForeignKey, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::UpdateForeignKey {
            id: id.to_string(),
            input: input.clone(),
        })?;

        let status = state.foreign_key_status();
        let fk = state
            .foreign_keys
            .get_mut(id)
            .ok_or_else(|| not_found("foreign key", id))?;
        fk.source_dataset = input.source_dataset;
        fk.target_dataset = input.target_dataset;
        fk.src_fields = input.src_fields;
        fk.dst_fields = input.dst_fields;
        fk.label = input.label;
        fk.status = status;
        Ok(fk.clone())
    }

    async fn get_foreign_key(&self, id: &str) -> Result<DeferredForeignKey, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::GetForeignKey { id: id.to_string() })?;
        state
            .foreign_keys
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("foreign key", id))
    }

    async fn delete_foreign_key(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::DeleteForeignKey { id: id.to_string() })?;
        if state.fail_deletes {
            return Err(ProviderError::Unavailable("delete rejected".to_string()));
        }
        state.foreign_keys.remove(id);
        Ok(())
    }

    async fn create_monitor(
        &self,
        workspace_id: &str,
        input: MonitorInput,
    ) -> Result<Monitor, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::CreateMonitor {
            workspace_id: workspace_id.to_string(),
            input: input.clone(),
        })?;

        let workspace_id: i64 = workspace_id.parse().map_err(|_| {
            ProviderError::Validation(format!("invalid workspace id {:?}", workspace_id))
        })?;
        let id = state.allocate_id();
        let monitor = monitor_from_input(id, ObjectIdScalar(workspace_id), input)?;
        state.monitors.insert(id.to_string(), monitor.clone());
        Ok(monitor)
    }

    async fn update_monitor(&self, id: &str, input: MonitorInput) -> Result<Monitor, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::UpdateMonitor {
            id: id.to_string(),
            input: input.clone(),
        })?;

        let existing = state
            .monitors
            .get(id)
            .ok_or_else(|| not_found("monitor", id))?;
        let monitor = monitor_from_input(existing.id, existing.workspace_id, input)?;
        state.monitors.insert(id.to_string(), monitor.clone());
        Ok(monitor)
    }

    async fn get_monitor(&self, id: &str) -> Result<Monitor, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::GetMonitor { id: id.to_string() })?;
        state
            .monitors
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("monitor", id))
    }

    async fn delete_monitor(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::DeleteMonitor { id: id.to_string() })?;
        state
            .monitors
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| not_found("monitor", id))
    }

    async fn create_app(&self, workspace_id: &str, input: AppInput) -> Result<App, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::CreateApp {
            workspace_id: workspace_id.to_string(),
            input: input.clone(),
        })?;

        let workspace_id: i64 = workspace_id.parse().map_err(|_| {
            ProviderError::Validation(format!("invalid workspace id {:?}", workspace_id))
        })?;
        let mut app = App {
            id: state.allocate_id(),
            workspace_id: ObjectIdScalar(workspace_id),
            name: input.module_id,
            status: AppStatus {
                state: AppState::Installed,
                internal_error: None,
            },
        };
        state.apply_app_script(&mut app);
        state.apps.insert(app.id.to_string(), app.clone());
        Ok(app)
    }

    async fn update_app(&self, id: &str, input: AppInput) -> Result<App, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::UpdateApp {
            id: id.to_string(),
            input,
        })?;

        let mut app = state
            .apps
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("app", id))?;
        state.apply_app_script(&mut app);
        state.apps.insert(id.to_string(), app.clone());
        Ok(app)
    }

    async fn get_app(&self, id: &str) -> Result<App, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::GetApp { id: id.to_string() })?;
        if state.fail_app_reads {
            return Err(ProviderError::Unavailable("app read rejected".to_string()));
        }

        let mut app = state
            .apps
            .get(id)
            .cloned()
            .ok_or_else(|| not_found("app", id))?;

        if let Some(script) = state.deleting.get_mut(id) {
            match script.pop_front() {
                Some(next) => app.status.state = next,
                None => {
                    state.deleting.remove(id);
                    state.apps.remove(id);
                    return Err(not_found("app", id));
                },
            }
        } else {
            state.apply_app_script(&mut app);
        }

        state.apps.insert(id.to_string(), app.clone());
        Ok(app)
    }

    async fn delete_app(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::DeleteApp { id: id.to_string() })?;
        if !state.apps.contains_key(id) {
            return Err(not_found("app", id));
        }
        let script = std::mem::take(&mut state.deletion_script);
        state.deleting.insert(id.to_string(), script);
        Ok(())
    }

    async fn query(
        &self,
        stages: Vec<StageInput>,
        params: QueryParams,
    ) -> Result<Vec<TaskResult>, ProviderError> {
        let mut state = self.state();
        state.record(BackendCall::Query { stages, params })?;
        Ok(std::mem::take(&mut state.query_results))
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &[Diagnostic]) {
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
        .collect();

    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors.iter().map(|d| &d.summary).collect::<Vec<_>>()
    );
}

/// Assert that diagnostics contain an error with the given summary substring.
///
/// # Panics
///
/// Panics if no error diagnostic contains the given substring.
pub fn assert_error_contains(diagnostics: &[Diagnostic], substring: &str) {
    let has_matching_error = diagnostics
        .iter()
        .any(|d| matches!(d.severity, DiagnosticSeverity::Error) && d.summary.contains(substring));

    assert!(
        has_matching_error,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        diagnostics
            .iter()
            .filter(|d| matches!(d.severity, DiagnosticSeverity::Error))
            .map(|d| &d.summary)
            .collect::<Vec<_>>()
    );
}
