//! Multi-stage query compiler.
//!
//! Users describe a query as a set of named dataset inputs and an ordered
//! list of stages. A stage reads from the previous stage unless it names an
//! input explicitly, and can be given an alias so that later stages may refer
//! to it, either as their input or through `@alias` inside the pipeline.
//!
//! The backend wants something more explicit: every stage has a synthetic id
//! (`stage-<n>`) and a full list of the inputs it reads. [`Query::to_wire`]
//! lowers the user form into a [`MultiStageQueryInput`], and
//! [`Query::from_wire`] reconstructs a user form from what the backend
//! returns.
//!
//! # Example
//!
//! ```
//! use observe_provider::query::{Input, Query, Stage};
//!
//! let query = Query::new()
//!     .with_input("obs", Input::dataset("o:dataset:42"))
//!     .with_stage(Stage::new("filter true").with_alias("filtered"))
//!     .with_stage(Stage::new("statsby count()"));
//!
//! let wire = query.to_wire().unwrap();
//! assert_eq!(wire.output_stage, "stage-1");
//! assert_eq!(wire.stages[1].input[0].input_name, "filtered");
//! assert_eq!(wire.stages[1].input[0].stage_id.as_deref(), Some("stage-0"));
//! ```

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ProviderError;
use crate::oid::{ObjectType, Oid};
use crate::wire::{
    InputDefinitionInput, MultiStageQuery, MultiStageQueryInput, ObjectIdScalar, QueryParams,
    ResultKind, StageInput, StagePresentationInput, StageQueryInput,
};

/// A user-facing multi-stage query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Query {
    /// Named dataset inputs.
    #[serde(default)]
    pub inputs: BTreeMap<String, Input>,
    /// Stages, applied in order.
    #[serde(default)]
    pub stages: Vec<Stage>,
}

/// Stage applies a pipeline to an input.
///
/// If no input is provided, the stage follows on from the previous one.
/// The alias is the name other stages use to reference this stage; it is not
/// the stage id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Stage {
    /// Name under which later stages can reference this one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    /// Explicit input: a declared input name or an earlier alias.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// OPAL pipeline text.
    pub pipeline: String,
}

/// A reference to an existing dataset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Input {
    /// Dataset OID, e.g. `o:dataset:41000123`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
}

impl Input {
    /// Create an input referencing a dataset OID.
    pub fn dataset(oid: impl Into<String>) -> Self {
        Self {
            dataset: Some(oid.into()),
        }
    }

    /// Resolve the referenced dataset into the backend's numeric id.
    fn dataset_id(&self) -> Result<ObjectIdScalar, String> {
        let raw = self.dataset.as_deref().ok_or("input is empty")?;
        let oid: Oid = raw
            .parse()
            .map_err(|e: ProviderError| format!("dataset: {}", e))?;
        if !oid.is_type(ObjectType::Dataset) {
            return Err(format!(
                "dataset: expected a dataset OID, got {}",
                oid.object_type
            ));
        }
        oid.id
            .parse()
            .map(ObjectIdScalar)
            .map_err(|_| format!("dataset: id {:?} is not numeric", oid.id))
    }
}

impl Stage {
    /// Create an anonymous stage that follows on from the previous one.
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            alias: None,
            input: None,
            pipeline: pipeline.into(),
        }
    }

    /// Name the stage so later stages can reference it.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Read from a named input or alias instead of the previous stage.
    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }
}

impl Query {
    /// Create an empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named input.
    pub fn with_input(mut self, name: impl Into<String>, input: Input) -> Self {
        self.inputs.insert(name.into(), input);
        self
    }

    /// Append a stage.
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Compile into the backend's multi-stage form.
    ///
    /// Input names are scanned in lexicographic order followed by aliases in
    /// declaration order, so the output is stable across runs.
    ///
    /// A stage whose pipeline is empty or only whitespace fails with
    /// [`ProviderError::MissingPipeline`].
    pub fn to_wire(&self) -> Result<MultiStageQueryInput, ProviderError> {
        let mut known: HashMap<String, InputDefinitionInput> =
            HashMap::with_capacity(self.inputs.len() + self.stages.len());
        let mut scan_order: Vec<String> = Vec::with_capacity(self.inputs.len());

        // BTreeMap iteration is already sorted by name.
        for (name, input) in &self.inputs {
            let dataset_id = input
                .dataset_id()
                .map_err(|e| ProviderError::InvalidInput(format!("{:?}: {}", name, e)))?;
            known.insert(
                name.clone(),
                InputDefinitionInput {
                    input_name: name.clone(),
                    dataset_id: Some(dataset_id),
                    stage_id: None,
                },
            );
            scan_order.push(name.clone());
        }

        let mut default_input = match scan_order.len() {
            0 => {
                return Err(ProviderError::MissingInput(
                    "query declares no inputs".to_string(),
                ))
            },
            1 => known.get(&scan_order[0]).cloned(),
            _ => None,
        };

        let mut stages = Vec::with_capacity(self.stages.len());
        for (i, stage) in self.stages.iter().enumerate() {
            let stage_id = format!("stage-{}", i);

            if stage.pipeline.trim().is_empty() {
                return Err(ProviderError::MissingPipeline(stage_id));
            }

            if let Some(name) = &stage.input {
                let resolved = known.get(name).ok_or_else(|| {
                    ProviderError::UnresolvedInput(format!("{}: {:?}", stage_id, name))
                })?;
                default_input = Some(resolved.clone());
            }

            let primary = default_input.take().ok_or_else(|| {
                ProviderError::MissingInput(format!(
                    "{}: query has several inputs, the first stage must name one",
                    stage_id
                ))
            })?;

            // Primary input first, then anything else the pipeline mentions.
            let mut input = vec![primary.clone()];
            for name in &scan_order {
                let candidate = &known[name];
                if *candidate != primary && stage.pipeline.contains(&format!("@{}", name)) {
                    input.push(candidate.clone());
                }
            }

            let mut next = InputDefinitionInput {
                input_name: stage_id.clone(),
                dataset_id: None,
                stage_id: Some(stage_id.clone()),
            };
            if let Some(alias) = &stage.alias {
                next.input_name = alias.clone();
                if known.insert(alias.clone(), next.clone()).is_none() {
                    scan_order.push(alias.clone());
                }
            }
            default_input = Some(next);

            stages.push(StageQueryInput {
                stage_id,
                input,
                pipeline: stage.pipeline.clone(),
            });
        }

        let output_stage = stages
            .last()
            .map(|s| s.stage_id.clone())
            .ok_or(ProviderError::NoStages)?;

        debug!(
            inputs = self.inputs.len(),
            stages = stages.len(),
            output_stage = %output_stage,
            "Compiled query"
        );

        Ok(MultiStageQueryInput {
            output_stage,
            stages,
        })
    }

    /// Reconstruct a user-facing query from the backend form.
    ///
    /// This is a best-effort inverse of [`Query::to_wire`]. Aliases that no
    /// later stage refers to cannot be recovered, and neither can inputs that
    /// no stage reads.
    pub fn from_wire(wire: &MultiStageQuery) -> Self {
        let mut inputs = BTreeMap::new();
        // stage id -> name other stages use for it
        let mut stage_names: HashMap<&str, &str> = HashMap::new();

        for stage in &wire.stages {
            for def in &stage.input {
                if let Some(id) = def.dataset_id {
                    inputs.insert(
                        def.input_name.clone(),
                        Input::dataset(Oid::dataset(id.to_string()).to_string()),
                    );
                }
                if !def.stage_id.is_empty() {
                    stage_names.insert(def.stage_id.as_str(), def.input_name.as_str());
                }
            }
        }

        let mut stages: Vec<Stage> = Vec::with_capacity(wire.stages.len());
        for (i, wire_stage) in wire.stages.iter().enumerate() {
            let alias = stage_names
                .get(wire_stage.id.as_str())
                .filter(|name| **name != wire_stage.id)
                .map(|name| name.to_string());

            let input = wire_stage.input.first().and_then(|def| {
                let name = def.input_name.as_str();
                let implicit = if i == 0 {
                    inputs.len() == 1
                } else {
                    stages[i - 1].alias.as_deref() == Some(name)
                };
                // a raw stage id means we follow on from an anonymous stage
                let anonymous = stage_names.get(name).is_some_and(|n| !n.is_empty());

                if implicit || anonymous {
                    None
                } else {
                    Some(name.to_string())
                }
            });

            stages.push(Stage {
                alias,
                input,
                pipeline: wire_stage.pipeline.clone(),
            });
        }

        Self { inputs, stages }
    }
}

/// A query submitted for immediate execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryConfig {
    /// The query to run.
    pub query: Query,
    /// Maximum number of rows returned from the output stage.
    pub limit: i64,
    /// Start of the query window.
    pub start: DateTime<Utc>,
    /// End of the query window.
    pub end: DateTime<Utc>,
}

impl QueryConfig {
    /// Compile into executable stages and query parameters.
    ///
    /// Only the output stage returns data and schema; every other stage has
    /// its results suppressed.
    pub fn to_wire(&self) -> Result<(Vec<StageInput>, QueryParams), ProviderError> {
        let compiled = self.query.to_wire()?;
        let last = compiled.stages.len().saturating_sub(1);

        let stages = compiled
            .stages
            .into_iter()
            .enumerate()
            .map(|(i, stage)| {
                let presentation = if i == last {
                    StagePresentationInput {
                        result_kinds: vec![ResultKind::Data, ResultKind::Schema],
                        limit: Some(self.limit),
                    }
                } else {
                    StagePresentationInput {
                        result_kinds: vec![ResultKind::Suppress],
                        limit: None,
                    }
                };
                StageInput {
                    input: stage.input,
                    stage_id: stage.stage_id,
                    pipeline: stage.pipeline,
                    presentation,
                }
            })
            .collect();

        Ok((
            stages,
            QueryParams {
                start_time: self.start,
                end_time: self.end,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dataset_input(name: &str, id: i64) -> InputDefinitionInput {
        InputDefinitionInput {
            input_name: name.to_string(),
            dataset_id: Some(ObjectIdScalar(id)),
            stage_id: None,
        }
    }

    fn stage_input(name: &str, stage: &str) -> InputDefinitionInput {
        InputDefinitionInput {
            input_name: name.to_string(),
            dataset_id: None,
            stage_id: Some(stage.to_string()),
        }
    }

    #[test]
    fn test_single_input_single_stage() {
        let query = Query::new()
            .with_input("obs", Input::dataset("o:dataset:42"))
            .with_stage(Stage::new("filter true"));

        let wire = query.to_wire().unwrap();
        assert_eq!(wire.output_stage, "stage-0");
        assert_eq!(wire.stages.len(), 1);
        assert_eq!(wire.stages[0].stage_id, "stage-0");
        assert_eq!(wire.stages[0].input, vec![dataset_input("obs", 42)]);
        assert_eq!(wire.stages[0].pipeline, "filter true");
    }

    #[test]
    fn test_versioned_dataset_input() {
        let query = Query::new()
            .with_input("obs", Input::dataset("o:dataset:42:1700000000"))
            .with_stage(Stage::new("filter true"));

        let wire = query.to_wire().unwrap();
        assert_eq!(wire.stages[0].input, vec![dataset_input("obs", 42)]);
    }

    #[test]
    fn test_alias_chaining() {
        let query = Query::new()
            .with_input("obs", Input::dataset("o:dataset:42"))
            .with_stage(Stage::new("filter true").with_alias("a"))
            .with_stage(Stage::new("pick_col x"))
            .with_stage(Stage::new("join on(x=@a.x)").with_input("a"));

        let wire = query.to_wire().unwrap();
        assert_eq!(wire.output_stage, "stage-2");

        // implicit follow-on from the aliased stage
        assert_eq!(wire.stages[1].input, vec![stage_input("a", "stage-0")]);

        // explicit reference resolves to the same stage, and the @a mention
        // does not add it a second time
        assert_eq!(wire.stages[2].input, vec![stage_input("a", "stage-0")]);
    }

    #[test]
    fn test_anonymous_stage_chaining() {
        let query = Query::new()
            .with_input("obs", Input::dataset("o:dataset:42"))
            .with_stage(Stage::new("filter true"))
            .with_stage(Stage::new("dedup"));

        let wire = query.to_wire().unwrap();
        assert_eq!(wire.stages[1].input, vec![stage_input("stage-0", "stage-0")]);
    }

    #[test]
    fn test_pipeline_references_add_inputs() {
        let query = Query::new()
            .with_input("main", Input::dataset("o:dataset:1"))
            .with_input("users", Input::dataset("o:dataset:2"))
            .with_input("hosts", Input::dataset("o:dataset:3"))
            .with_stage(
                Stage::new("join on(uid=@users.uid) | join on(host=@hosts.name)")
                    .with_input("main"),
            );

        let wire = query.to_wire().unwrap();
        // primary first, then sorted by name
        assert_eq!(
            wire.stages[0].input,
            vec![
                dataset_input("main", 1),
                dataset_input("hosts", 3),
                dataset_input("users", 2),
            ]
        );
    }

    #[test]
    fn test_aliases_scanned_after_inputs() {
        let query = Query::new()
            .with_input("z", Input::dataset("o:dataset:1"))
            .with_input("b", Input::dataset("o:dataset:2"))
            .with_stage(Stage::new("filter true").with_input("z").with_alias("a"))
            .with_stage(Stage::new("union @a, @b").with_input("z"));

        let wire = query.to_wire().unwrap();
        assert_eq!(
            wire.stages[1].input,
            vec![
                dataset_input("z", 1),
                dataset_input("b", 2),
                stage_input("a", "stage-0"),
            ]
        );
    }

    #[test]
    fn test_multiple_inputs_require_explicit_first_input() {
        let query = Query::new()
            .with_input("a", Input::dataset("o:dataset:1"))
            .with_input("b", Input::dataset("o:dataset:2"))
            .with_stage(Stage::new("filter true"));

        let err = query.to_wire().unwrap_err();
        assert!(matches!(err, ProviderError::MissingInput(msg) if msg.starts_with("stage-0")));
    }

    #[test]
    fn test_no_inputs() {
        let query = Query::new().with_stage(Stage::new("filter true"));
        let err = query.to_wire().unwrap_err();
        assert!(matches!(err, ProviderError::MissingInput(_)));
    }

    #[test]
    fn test_no_stages() {
        let query = Query::new().with_input("obs", Input::dataset("o:dataset:42"));
        let err = query.to_wire().unwrap_err();
        assert!(matches!(err, ProviderError::NoStages));
    }

    #[test]
    fn test_missing_pipeline() {
        let query = Query::new()
            .with_input("obs", Input::dataset("o:dataset:42"))
            .with_stage(Stage::new("filter true"))
            .with_stage(Stage::new("  "));

        let err = query.to_wire().unwrap_err();
        assert!(matches!(err, ProviderError::MissingPipeline(id) if id == "stage-1"));
    }

    #[test]
    fn test_at_reference_is_textual_containment() {
        // "@ab" also mentions "@a"
        let query = Query::new()
            .with_input("a", Input::dataset("o:dataset:1"))
            .with_input("ab", Input::dataset("o:dataset:2"))
            .with_stage(Stage::new("join on(x=@ab.x)").with_input("ab"));

        let wire = query.to_wire().unwrap();
        assert_eq!(
            wire.stages[0].input,
            vec![dataset_input("ab", 2), dataset_input("a", 1)]
        );
    }

    #[test]
    fn test_alias_shadowing_not_scanned_twice() {
        let query = Query::new()
            .with_input("obs", Input::dataset("o:dataset:1"))
            .with_stage(Stage::new("filter true").with_alias("x"))
            .with_stage(Stage::new("filter false").with_alias("x"))
            .with_stage(Stage::new("join on(k=@x.k) | filter @x.k > 0").with_input("obs"));

        let wire = query.to_wire().unwrap();
        assert_eq!(wire.stages[1].input, vec![stage_input("x", "stage-0")]);
        // the later alias wins and is listed once
        assert_eq!(
            wire.stages[2].input,
            vec![dataset_input("obs", 1), stage_input("x", "stage-1")]
        );
        assert_eq!(wire.output_stage, "stage-2");
    }

    #[test]
    fn test_unresolved_input() {
        let query = Query::new()
            .with_input("obs", Input::dataset("o:dataset:42"))
            .with_stage(Stage::new("filter true").with_input("later"))
            .with_stage(Stage::new("filter true").with_alias("later"));

        let err = query.to_wire().unwrap_err();
        assert!(matches!(err, ProviderError::UnresolvedInput(msg) if msg.contains("later")));
    }

    #[test]
    fn test_invalid_inputs() {
        for dataset in [None, Some("42"), Some("o:monitor:42"), Some("o:dataset:abc")] {
            let query = Query::new()
                .with_input("obs", Input { dataset: dataset.map(String::from) })
                .with_stage(Stage::new("filter true"));

            let err = query.to_wire().unwrap_err();
            assert!(
                matches!(err, ProviderError::InvalidInput(_)),
                "expected InvalidInput for {:?}, got {:?}",
                dataset,
                err
            );
        }
    }

    #[test]
    fn test_deterministic_output() {
        let build = || {
            Query::new()
                .with_input("c", Input::dataset("o:dataset:3"))
                .with_input("a", Input::dataset("o:dataset:1"))
                .with_input("b", Input::dataset("o:dataset:2"))
                .with_stage(Stage::new("union @a, @b, @c").with_input("a"))
        };
        assert_eq!(build().to_wire().unwrap(), build().to_wire().unwrap());
    }

    #[test]
    fn test_round_trip_forward_conventions() {
        let query = Query::new()
            .with_input("obs", Input::dataset("o:dataset:42"))
            .with_stage(Stage::new("filter true").with_alias("a"))
            .with_stage(Stage::new("pick_col x"))
            .with_stage(Stage::new("dedup").with_alias("b"))
            .with_stage(Stage::new("union @b").with_input("a"));

        let wire: MultiStageQuery = query.to_wire().unwrap().into();
        let back = Query::from_wire(&wire);
        assert_eq!(back, query);
    }

    #[test]
    fn test_round_trip_multiple_inputs() {
        let query = Query::new()
            .with_input("logs", Input::dataset("o:dataset:1"))
            .with_input("users", Input::dataset("o:dataset:2"))
            .with_stage(Stage::new("join on(uid=@users.uid)").with_input("logs"))
            .with_stage(Stage::new("statsby count(), group_by(uid)"));

        let wire: MultiStageQuery = query.to_wire().unwrap().into();
        assert_eq!(Query::from_wire(&wire), query);
    }

    #[test]
    fn test_reverse_is_lossy_for_unreferenced_names() {
        // Reconstruction only sees names that some stage actually reads: an
        // alias on the final stage and an unused input both disappear.
        let query = Query::new()
            .with_input("obs", Input::dataset("o:dataset:42"))
            .with_input("unused", Input::dataset("o:dataset:7"))
            .with_stage(Stage::new("filter true").with_input("obs"))
            .with_stage(Stage::new("dedup").with_alias("last"));

        let wire: MultiStageQuery = query.to_wire().unwrap().into();
        let back = Query::from_wire(&wire);

        assert_eq!(back.inputs.len(), 1);
        assert!(back.inputs.contains_key("obs"));
        assert_eq!(back.stages[1].alias, None);
        // with a single recovered input the first stage reads it implicitly
        assert_eq!(back.stages[0].input, None);

        let pipelines: Vec<_> = back.stages.iter().map(|s| s.pipeline.as_str()).collect();
        assert_eq!(pipelines, ["filter true", "dedup"]);

        // the reconstruction still compiles to the same stage graph
        assert_eq!(back.to_wire().unwrap().stages, query.to_wire().unwrap().stages);
    }

    #[test]
    fn test_query_config_presentation() {
        let config = QueryConfig {
            query: Query::new()
                .with_input("obs", Input::dataset("o:dataset:42"))
                .with_stage(Stage::new("filter true"))
                .with_stage(Stage::new("limit 10")),
            limit: 100,
            start: Utc.timestamp_opt(0, 0).unwrap(),
            end: Utc.timestamp_opt(3600, 0).unwrap(),
        };

        let (stages, params) = config.to_wire().unwrap();
        assert_eq!(stages.len(), 2);
        assert_eq!(stages[0].presentation.result_kinds, vec![ResultKind::Suppress]);
        assert_eq!(stages[0].presentation.limit, None);
        assert_eq!(
            stages[1].presentation.result_kinds,
            vec![ResultKind::Data, ResultKind::Schema]
        );
        assert_eq!(stages[1].presentation.limit, Some(100));
        assert_eq!(params.end_time, Utc.timestamp_opt(3600, 0).unwrap());
    }

    #[test]
    fn test_serde_user_form() {
        let query: Query = serde_json::from_value(serde_json::json!({
            "inputs": {"obs": {"dataset": "o:dataset:42"}},
            "stages": [{"pipeline": "filter true", "alias": "a"}]
        }))
        .unwrap();

        assert_eq!(query.stages[0].alias.as_deref(), Some("a"));
        assert!(query.to_wire().is_ok());
    }
}
