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

//! Payload producers.
//!
//! A [`DataProvider`] looks at one completed run and adds the keys it owns
//! to the message body. [`PayloadBuilder`] chains providers and serialises
//! the result into the bytes handed to [`crate::Publisher::enqueue`].

mod cause;
mod payload;
mod pipeline;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use self::{
    cause::{CauseProvider, KEY_CAUSES},
    payload::PayloadBuilder,
    pipeline::{KEY_IS_PIPELINE, KEY_PIPELINES, PipelineProvider, Stage, StageStatus},
};

/// Adds facets of a completed run to the message body.
pub trait DataProvider: Send + Sync {
    fn provide_completed_run_data(&self, run: &RunDescriptor, body: &mut Map<String, Value>);
}

/// What the host knows about a finished run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunDescriptor {
    pub name:   String,
    pub number: u64,
    pub url:    String,
    pub result: String,
    pub causes: Vec<Cause>,
    /// `None` for runs that are not pipelines.
    pub stages: Option<Vec<Stage>>,
}

/// Why a run was started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cause {
    Upstream {
        project:      String,
        build:        u64,
        #[serde(default)]
        upstream_url: Option<String>,
    },
    User {
        #[serde(default)]
        user_id:   Option<String>,
        user_name: String,
    },
    Remote {
        addr: String,
        #[serde(default)]
        note: Option<String>,
    },
    Timer,
    Scm,
    /// Causes no provider knows how to describe.
    #[serde(other)]
    Other,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_json() {
        let run: RunDescriptor = serde_json::from_str(
            r#"{
                "name": "nightly",
                "number": 42,
                "causes": [
                    {"kind": "upstream", "project": "core", "build": 7},
                    {"kind": "timer"},
                    {"kind": "webhook"}
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(run.name, "nightly");
        assert_eq!(run.number, 42);
        assert_eq!(run.stages, None);
        assert_eq!(run.causes, vec![
            Cause::Upstream {
                project:      "core".to_string(),
                build:        7,
                upstream_url: None,
            },
            Cause::Timer,
            Cause::Other,
        ]);
    }
}
