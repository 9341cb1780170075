//! Monitor configuration and rule mapping.
//!
//! A monitor rule is either a count rule or a change rule. Going out, the
//! rule becomes a [`MonitorRuleInput`] with exactly one variant set. Coming
//! back, the backend returns a [`MonitorRule`] tagged by `__typename` whose
//! variant fields are decoded here.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::ProviderError;
use crate::oid::{ObjectType, Oid};
use crate::query::Query;
use crate::wire::{
    self, AggregateFunction, ChangeType, CompareFunction, MonitorGrouping, MonitorInput,
    MonitorRule, MonitorRuleChangeInput, MonitorRuleCountInput, MonitorRuleInput,
    NotificationImportance, NotificationMerge, NotificationSelection,
    NotificationSpecificationInput, NumberScalar,
};

const COUNT_RULE_TYPE: &str = "MonitorRuleCount";
const CHANGE_RULE_TYPE: &str = "MonitorRuleChange";

/// Triggers when the number of matching rows compares true.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CountRuleConfig {
    /// Comparison applied to the row count.
    pub compare_function: Option<CompareFunction>,
    /// Values the count is compared against.
    pub compare_values: Vec<f64>,
    /// Window the count is taken over.
    pub lookback_time: Option<Duration>,
}

/// Triggers when an aggregate changes relative to a baseline.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeRuleConfig {
    /// Absolute or relative change.
    pub change_type: ChangeType,
    pub aggregate_function: Option<AggregateFunction>,
    pub compare_function: Option<CompareFunction>,
    pub compare_values: Vec<f64>,
    /// Window the current value is aggregated over.
    pub lookback_time: Option<Duration>,
    /// Window the baseline is aggregated over.
    pub baseline_time: Option<Duration>,
}

/// The rule variant of a monitor.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleConfig {
    /// Count rule.
    Count(CountRuleConfig),
    /// Change rule.
    Change(ChangeRuleConfig),
}

/// A monitor rule: shared grouping fields plus the rule variant.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitorRuleConfig {
    /// Column the rule evaluates.
    pub source_column: Option<String>,
    pub group_by: Option<MonitorGrouping>,
    /// Columns to group by when `group_by` is `Value`.
    pub group_by_columns: Vec<String>,
    /// `None` is rejected by [`MonitorRuleConfig::to_wire`].
    pub rule: Option<RuleConfig>,
}

fn to_nanos_string(d: Duration) -> String {
    d.as_nanos().to_string()
}

fn to_number_scalars(values: &[f64]) -> Vec<NumberScalar> {
    values.iter().copied().map(NumberScalar).collect()
}

fn from_number_scalars(values: Option<Vec<NumberScalar>>) -> Vec<f64> {
    values.unwrap_or_default().into_iter().map(|v| v.0).collect()
}

impl CountRuleConfig {
    fn to_wire(&self) -> MonitorRuleCountInput {
        MonitorRuleCountInput {
            compare_function: self.compare_function,
            compare_values: to_number_scalars(&self.compare_values),
            lookback_time: self.lookback_time.map(to_nanos_string),
        }
    }
}

impl ChangeRuleConfig {
    fn to_wire(&self) -> MonitorRuleChangeInput {
        MonitorRuleChangeInput {
            change_type: Some(self.change_type),
            aggregate_function: self.aggregate_function,
            compare_function: self.compare_function,
            compare_values: to_number_scalars(&self.compare_values),
            lookback_time: self.lookback_time.map(to_nanos_string),
            baseline_time: self.baseline_time.map(to_nanos_string),
        }
    }
}

/// Durations come back as nanosecond counts, usually as decimal strings.
fn deserialize_nanos<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Text(String),
        Number(u64),
    }

    let nanos = match Option::<Repr>::deserialize(deserializer)? {
        None => return Ok(None),
        Some(Repr::Number(n)) => n,
        Some(Repr::Text(s)) => s.parse().map_err(|e| {
            serde::de::Error::custom(format!("invalid nanosecond duration {:?}: {}", s, e))
        })?,
    };
    Ok(Some(Duration::from_nanos(nanos)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountRuleFields {
    #[serde(default)]
    compare_function: Option<CompareFunction>,
    #[serde(default)]
    compare_values: Option<Vec<NumberScalar>>,
    #[serde(default, deserialize_with = "deserialize_nanos")]
    lookback_time: Option<Duration>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChangeRuleFields {
    change_type: ChangeType,
    #[serde(default)]
    aggregate_function: Option<AggregateFunction>,
    #[serde(default)]
    compare_function: Option<CompareFunction>,
    #[serde(default)]
    compare_values: Option<Vec<NumberScalar>>,
    #[serde(default, deserialize_with = "deserialize_nanos")]
    lookback_time: Option<Duration>,
    #[serde(default, deserialize_with = "deserialize_nanos")]
    baseline_time: Option<Duration>,
}

impl MonitorRuleConfig {
    /// Convert to the backend rule input.
    pub fn to_wire(&self) -> Result<MonitorRuleInput, ProviderError> {
        let mut input = MonitorRuleInput {
            source_column: self.source_column.clone(),
            group_by: self.group_by,
            group_by_columns: self.group_by_columns.clone(),
            ..Default::default()
        };

        match &self.rule {
            Some(RuleConfig::Count(count)) => input.count_rule = Some(count.to_wire()),
            Some(RuleConfig::Change(change)) => input.change_rule = Some(change.to_wire()),
            None => return Err(ProviderError::NoRuleSpecified),
        }

        Ok(input)
    }

    /// Rebuild a rule config from the rule the backend returned.
    pub fn from_wire(rule: &MonitorRule) -> Result<Self, ProviderError> {
        let fields = serde_json::Value::Object(rule.fields.clone());

        let config = match rule.type_name.as_str() {
            COUNT_RULE_TYPE => {
                let f: CountRuleFields = serde_json::from_value(fields)?;
                RuleConfig::Count(CountRuleConfig {
                    compare_function: f.compare_function,
                    compare_values: from_number_scalars(f.compare_values),
                    lookback_time: f.lookback_time,
                })
            },
            CHANGE_RULE_TYPE => {
                let f: ChangeRuleFields = serde_json::from_value(fields)?;
                RuleConfig::Change(ChangeRuleConfig {
                    change_type: f.change_type,
                    aggregate_function: f.aggregate_function,
                    compare_function: f.compare_function,
                    compare_values: from_number_scalars(f.compare_values),
                    lookback_time: f.lookback_time,
                    baseline_time: f.baseline_time,
                })
            },
            other => return Err(ProviderError::UnhandledRuleType(other.to_string())),
        };

        Ok(Self {
            source_column: rule.source_column.clone(),
            group_by: rule.group_by,
            group_by_columns: rule.group_by_columns.clone(),
            rule: Some(config),
        })
    }
}

/// How notifications raised by a monitor are grouped and ranked.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotificationSpecConfig {
    pub importance: Option<NotificationImportance>,
    pub merge: Option<NotificationMerge>,
    pub selection: Option<NotificationSelection>,
    pub selection_value: Option<f64>,
}

/// The user-managed part of a monitor.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MonitorConfig {
    /// Query whose output the rule watches.
    pub query: Query,
    /// Display name.
    pub name: String,
    pub description: Option<String>,
    pub icon_url: Option<String>,
    pub rule: MonitorRuleConfig,
    pub notification_spec: NotificationSpecConfig,
}

impl MonitorConfig {
    /// Compile the query and rule into a monitor input.
    pub fn to_wire(&self) -> Result<MonitorInput, ProviderError> {
        let query = self.query.to_wire()?;
        let rule = self.rule.to_wire()?;

        Ok(MonitorInput {
            name: self.name.clone(),
            description: self.description.clone(),
            icon_url: self.icon_url.clone(),
            query,
            rule,
            notification_spec: NotificationSpecificationInput {
                importance: self.notification_spec.importance,
                merge: self.notification_spec.merge,
                selection: self.notification_spec.selection,
                selection_value: self.notification_spec.selection_value.map(NumberScalar),
            },
            ..Default::default()
        })
    }
}

/// A monitor as known to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Monitor {
    /// Backend id.
    pub id: String,
    /// Id of the owning workspace.
    pub workspace_id: String,
    /// Current configuration.
    pub config: MonitorConfig,
}

impl Monitor {
    /// Rebuild a monitor from its backend representation.
    pub fn from_wire(monitor: &wire::Monitor) -> Result<Self, ProviderError> {
        let spec = &monitor.notification_spec;
        let non_empty = |s: &str| (!s.is_empty()).then(|| s.to_string());

        Ok(Self {
            id: monitor.id.to_string(),
            workspace_id: monitor.workspace_id.to_string(),
            config: MonitorConfig {
                query: Query::from_wire(&monitor.query),
                name: monitor.name.clone(),
                description: non_empty(&monitor.description),
                icon_url: non_empty(&monitor.icon_url),
                rule: MonitorRuleConfig::from_wire(&monitor.rule)?,
                notification_spec: NotificationSpecConfig {
                    importance: Some(spec.importance),
                    merge: Some(spec.merge),
                    selection: Some(spec.selection),
                    selection_value: spec.selection_value.map(|v| v.0),
                },
            },
        })
    }

    /// The monitor's OID.
    pub fn oid(&self) -> Oid {
        Oid::new(ObjectType::Monitor, self.id.clone())
    }
}
