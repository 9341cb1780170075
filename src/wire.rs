//! Backend wire types.
//!
//! These mirror the JSON shapes exchanged with the Observe API. Field names
//! are fixed by the backend and must not be changed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The backend's numeric object id, transported as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectIdScalar(pub i64);

impl fmt::Display for ObjectIdScalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for ObjectIdScalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ObjectIdScalar {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Number(i64),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(ObjectIdScalar(n)),
            Repr::Text(s) => s
                .parse()
                .map(ObjectIdScalar)
                .map_err(|e| serde::de::Error::custom(format!("invalid object id {:?}: {}", s, e))),
        }
    }
}

/// The backend's generic numeric scalar.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NumberScalar(pub f64);

// ============================================================================
// Multi-stage queries
// ============================================================================

/// One named input of a stage, bound to either a dataset or an earlier stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InputDefinitionInput {
    pub input_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<ObjectIdScalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_id: Option<String>,
}

/// A stage as submitted when saving a transform or monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageQueryInput {
    #[serde(rename = "stageID")]
    pub stage_id: String,
    pub input: Vec<InputDefinitionInput>,
    pub pipeline: String,
}

/// A multi-stage query as submitted to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MultiStageQueryInput {
    pub output_stage: String,
    pub stages: Vec<StageQueryInput>,
}

/// Role of an input in a stage, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputRole {
    #[serde(rename = "")]
    Default,
    Data,
    Reference,
}

/// One named input of a stage, as read back from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct InputDefinition {
    pub input_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_role: Option<InputRole>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<ObjectIdScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_path: Option<String>,
    #[serde(default)]
    pub stage_id: String,
}

/// A stage as read back from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageQuery {
    pub id: String,
    #[serde(default)]
    pub input: Vec<InputDefinition>,
    pub pipeline: String,
}

/// A multi-stage query as read back from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MultiStageQuery {
    pub output_stage: String,
    #[serde(default)]
    pub stages: Vec<StageQuery>,
}

impl From<MultiStageQueryInput> for MultiStageQuery {
    fn from(input: MultiStageQueryInput) -> Self {
        Self {
            output_stage: input.output_stage,
            stages: input
                .stages
                .into_iter()
                .map(|stage| StageQuery {
                    id: stage.stage_id,
                    input: stage
                        .input
                        .into_iter()
                        .map(|i| InputDefinition {
                            input_name: i.input_name,
                            dataset_id: i.dataset_id,
                            stage_id: i.stage_id.unwrap_or_default(),
                            ..Default::default()
                        })
                        .collect(),
                    pipeline: stage.pipeline,
                })
                .collect(),
        }
    }
}

// ============================================================================
// Ad-hoc query execution
// ============================================================================

/// Which parts of a stage's output the backend should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResultKind {
    #[serde(rename = "ResultKindData")]
    Data,
    #[serde(rename = "ResultKindSchema")]
    Schema,
    #[serde(rename = "ResultKindSuppress")]
    Suppress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StagePresentationInput {
    pub result_kinds: Vec<ResultKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

/// A stage as submitted for ad-hoc execution.
///
/// Same content as [`StageQueryInput`], but the backend names the stage id
/// field differently here and expects a presentation block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageInput {
    pub input: Vec<InputDefinitionInput>,
    #[serde(rename = "stageId")]
    pub stage_id: String,
    pub pipeline: String,
    pub presentation: StagePresentationInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryParams {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

/// Column schema of a task result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskResultSchema {
    pub typedef_definition: TypedefDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TypedefDefinition {
    #[serde(default)]
    pub fields: Vec<serde_json::Map<String, serde_json::Value>>,
}

/// Columnar result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SnowflakeCursor {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub query_id: String,
    #[serde(default)]
    pub total_row_count: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub column_desc: Vec<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub columns: Vec<Vec<Option<String>>>,
}

/// The result of executing one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    #[serde(default)]
    pub query_id: String,
    #[serde(default)]
    pub stage_id: String,
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result_cursor: Option<SnowflakeCursor>,
    #[serde(default)]
    pub result_kind: Option<ResultKind>,
    #[serde(default)]
    pub result_schema: Option<TaskResultSchema>,
    #[serde(default)]
    pub error: Option<String>,
}

// ============================================================================
// Datasets and foreign keys
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DatasetInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_cost: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_by_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transform {
    #[serde(default)]
    pub current: Option<TransformVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformVersion {
    pub query: MultiStageQuery,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    pub id: ObjectIdScalar,
    pub workspace_id: ObjectIdScalar,
    #[serde(default)]
    pub version: String,
    pub label: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon_url: Option<String>,
    #[serde(default)]
    pub path_cost: Option<i64>,
    #[serde(default)]
    pub transform: Option<Transform>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeferredDatasetReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<ObjectIdScalar>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeferredForeignKeyInput {
    pub source_dataset: DeferredDatasetReference,
    pub target_dataset: DeferredDatasetReference,
    pub src_fields: Vec<String>,
    pub dst_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Resolution status of a deferred foreign key.
///
/// `error_text` is empty when the key resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct DeferredForeignKeyStatus {
    #[serde(default)]
    pub found_source: bool,
    #[serde(default)]
    pub found_target: bool,
    #[serde(default)]
    pub matched_source_fields: bool,
    #[serde(default)]
    pub matched_target_fields: bool,
    #[serde(default)]
    pub field_types_are_comparable: bool,
    #[serde(default)]
    pub error_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeferredForeignKey {
    pub id: ObjectIdScalar,
    pub workspace_id: ObjectIdScalar,
    #[serde(rename = "source")]
    pub source_dataset: DeferredDatasetReference,
    #[serde(rename = "target")]
    pub target_dataset: DeferredDatasetReference,
    pub src_fields: Vec<String>,
    pub dst_fields: Vec<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub status: DeferredForeignKeyStatus,
}

// ============================================================================
// Monitors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateFunction {
    Avg,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    Absolute,
    Relative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareFunction {
    Equal,
    NotEqual,
    Greater,
    GreaterOrEqual,
    Less,
    LessOrEqual,
    BetweenHalfOpen,
    NotBetweenHalfOpen,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MonitorGrouping {
    None,
    Value,
    Resource,
    LinkTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationImportance {
    Informational,
    Important,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationMerge {
    Merged,
    Separate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationSelection {
    Any,
    All,
    Percentage,
    Count,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRuleCountInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_function: Option<CompareFunction>,
    pub compare_values: Vec<NumberScalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookback_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRuleChangeInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_type: Option<ChangeType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_function: Option<AggregateFunction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compare_function: Option<CompareFunction>,
    pub compare_values: Vec<NumberScalar>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookback_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub baseline_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRuleInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_column: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by: Option<MonitorGrouping>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub group_by_columns: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count_rule: Option<MonitorRuleCountInput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_rule: Option<MonitorRuleChangeInput>,
}

/// A monitor rule as read back from the backend.
///
/// The variant specific fields stay untyped until the discriminator has
/// been inspected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorRule {
    #[serde(rename = "__typename")]
    pub type_name: String,
    #[serde(default)]
    pub source_column: Option<String>,
    #[serde(default)]
    pub group_by: Option<MonitorGrouping>,
    #[serde(default)]
    pub group_by_columns: Vec<String>,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSpecificationInput {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub importance: Option<NotificationImportance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<NotificationMerge>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection: Option<NotificationSelection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selection_value: Option<NumberScalar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct MonitorInput {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub query: MultiStageQueryInput,
    pub rule: MonitorRuleInput,
    pub notification_spec: NotificationSpecificationInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub managed_by_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSpecification {
    pub importance: NotificationImportance,
    pub merge: NotificationMerge,
    pub selection: NotificationSelection,
    #[serde(default)]
    pub selection_value: Option<NumberScalar>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monitor {
    pub id: ObjectIdScalar,
    pub workspace_id: ObjectIdScalar,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub icon_url: String,
    pub query: MultiStageQuery,
    pub rule: MonitorRule,
    pub notification_spec: NotificationSpecification,
}

// ============================================================================
// Apps
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppInput {
    pub module_id: String,
    pub version: String,
    #[serde(default)]
    pub variables: Vec<AppVariableInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppVariableInput {
    pub name: String,
    pub value: String,
}

/// Lifecycle state of an app installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppState {
    Initializing,
    Installing,
    Installed,
    Error,
    Deleting,
    #[serde(other)]
    Unknown,
}

impl AppState {
    /// Whether the backend is still working on the app.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppState::Installing | AppState::Deleting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatus {
    pub state: AppState,
    #[serde(default)]
    pub internal_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct App {
    pub id: ObjectIdScalar,
    pub workspace_id: ObjectIdScalar,
    pub name: String,
    pub status: AppStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_object_id_scalar_encoding() {
        assert_eq!(serde_json::to_value(ObjectIdScalar(42)).unwrap(), json!("42"));

        let id: ObjectIdScalar = serde_json::from_value(json!("41000123")).unwrap();
        assert_eq!(id, ObjectIdScalar(41000123));

        let id: ObjectIdScalar = serde_json::from_value(json!(7)).unwrap();
        assert_eq!(id, ObjectIdScalar(7));

        assert!(serde_json::from_value::<ObjectIdScalar>(json!("abc")).is_err());
    }

    #[test]
    fn test_stage_query_input_field_names() {
        let stage = StageQueryInput {
            stage_id: "stage-0".to_string(),
            input: vec![InputDefinitionInput {
                input_name: "obs".to_string(),
                dataset_id: Some(ObjectIdScalar(42)),
                stage_id: None,
            }],
            pipeline: "filter true".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&stage).unwrap(),
            json!({
                "stageID": "stage-0",
                "input": [{"inputName": "obs", "datasetId": "42"}],
                "pipeline": "filter true"
            })
        );
    }

    #[test]
    fn test_task_result_decode() {
        let result: TaskResult = serde_json::from_value(json!({
            "queryId": "q1",
            "stageId": "stage-0",
            "startTime": "2023-01-01T00:00:00Z",
            "endTime": "2023-01-01T01:00:00Z",
            "resultCursor": {
                "totalRowCount": 1,
                "columns": [["5"], [null]]
            },
            "resultSchema": {
                "typedefDefinition": {
                    "fields": [
                        {"name": "a", "type": {"rep": "int64"}},
                        {"name": "b", "type": {"rep": "string"}}
                    ]
                }
            },
            "error": null
        }))
        .unwrap();

        let cursor = result.result_cursor.unwrap();
        assert_eq!(cursor.total_row_count, 1);
        assert_eq!(cursor.columns[0][0].as_deref(), Some("5"));
        assert_eq!(cursor.columns[1][0], None);
        assert!(result.error.is_none());
    }

    #[test]
    fn test_monitor_rule_keeps_variant_fields() {
        let rule: MonitorRule = serde_json::from_value(json!({
            "__typename": "MonitorRuleCount",
            "sourceColumn": "count",
            "groupByColumns": [],
            "compareFunction": "Greater",
            "compareValues": [1.0],
            "lookbackTime": "60000000000"
        }))
        .unwrap();

        assert_eq!(rule.type_name, "MonitorRuleCount");
        assert_eq!(rule.source_column.as_deref(), Some("count"));
        assert_eq!(rule.fields["lookbackTime"], json!("60000000000"));
        assert!(!rule.fields.contains_key("sourceColumn"));
    }

    #[test]
    fn test_app_state() {
        let status: AppStatus = serde_json::from_value(json!({"state": "Installing"})).unwrap();
        assert!(status.state.is_transient());

        let status: AppStatus = serde_json::from_value(json!({"state": "Upgrading"})).unwrap();
        assert_eq!(status.state, AppState::Unknown);
        assert!(!status.state.is_transient());
    }
}
