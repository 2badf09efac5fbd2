// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::{DataProvider, RunDescriptor};

pub const KEY_IS_PIPELINE: &str = "is_pipeline";
pub const KEY_PIPELINES: &str = "pipelines";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StageStatus {
    #[display("NOT_EXECUTED")]
    NotExecuted,
    #[display("ABORTED")]
    Aborted,
    #[display("SUCCESS")]
    Success,
    #[display("IN_PROGRESS")]
    InProgress,
    #[display("PAUSED_PENDING_INPUT")]
    PausedPendingInput,
    #[display("FAILED")]
    Failed,
    #[display("UNSTABLE")]
    Unstable,
}

/// One pipeline stage. Times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub node:          String,
    pub name:          String,
    pub start_time_ms: i64,
    pub duration_ms:   i64,
    #[serde(default)]
    pub pause_ms:      i64,
    #[serde(default)]
    pub error:         Option<String>,
    pub status:        StageStatus,
}

impl Stage {
    fn describe(&self) -> Value {
        let mut item = vec![
            format!("node={}", self.node),
            format!("name={}", self.name),
            format!("start_time={}", self.start_time_ms),
            format!("duration={}", self.duration_ms),
            format!("pause={}", self.pause_ms),
        ];
        if let Some(error) = &self.error {
            item.push(format!("error={error}"));
        }
        item.push(format!("status={}", self.status));
        Value::from(item)
    }
}

/// Publishes `is_pipeline` and one `key=value` list per stage under
/// `pipelines`. Non-pipeline runs get `false` and an empty list.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineProvider;

impl DataProvider for PipelineProvider {
    fn provide_completed_run_data(&self, run: &RunDescriptor, body: &mut Map<String, Value>) {
        let stages = run.stages.as_deref().unwrap_or_default();
        body.insert(KEY_IS_PIPELINE.to_string(), Value::Bool(run.stages.is_some()));
        body.insert(
            KEY_PIPELINES.to_string(),
            Value::Array(stages.iter().map(Stage::describe).collect()),
        );
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn stage(name: &str, error: Option<&str>, status: StageStatus) -> Stage {
        Stage {
            node: "agent-1".to_string(),
            name: name.to_string(),
            start_time_ms: 1_700_000_000_000,
            duration_ms: 2_500,
            pause_ms: 0,
            error: error.map(str::to_string),
            status,
        }
    }

    #[test]
    fn test_pipeline_stages() {
        let run = RunDescriptor {
            stages: Some(vec![
                stage("build", None, StageStatus::Success),
                stage("test", Some("2 tests failed"), StageStatus::Failed),
            ]),
            ..RunDescriptor::default()
        };
        let mut body = Map::new();
        PipelineProvider.provide_completed_run_data(&run, &mut body);

        assert_eq!(body[KEY_IS_PIPELINE], json!(true));
        assert_eq!(
            body[KEY_PIPELINES],
            json!([
                [
                    "node=agent-1",
                    "name=build",
                    "start_time=1700000000000",
                    "duration=2500",
                    "pause=0",
                    "status=SUCCESS"
                ],
                [
                    "node=agent-1",
                    "name=test",
                    "start_time=1700000000000",
                    "duration=2500",
                    "pause=0",
                    "error=2 tests failed",
                    "status=FAILED"
                ]
            ])
        );
    }

    #[test]
    fn test_freestyle_run() {
        let mut body = Map::new();
        PipelineProvider.provide_completed_run_data(&RunDescriptor::default(), &mut body);

        assert_eq!(body[KEY_IS_PIPELINE], json!(false));
        assert_eq!(body[KEY_PIPELINES], json!([]));
    }

    #[test]
    fn test_status_wire_names() {
        let status: StageStatus = serde_json::from_str("\"PAUSED_PENDING_INPUT\"").unwrap();
        assert_eq!(status, StageStatus::PausedPendingInput);
        assert_eq!(status.to_string(), "PAUSED_PENDING_INPUT");
    }
}
