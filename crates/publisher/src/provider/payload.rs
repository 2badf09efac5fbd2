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

use serde_json::{Map, Value};

use super::{CauseProvider, DataProvider, PipelineProvider, RunDescriptor};

pub const KEY_NAME: &str = "name";
pub const KEY_NUMBER: &str = "number";
pub const KEY_URL: &str = "url";
pub const KEY_RESULT: &str = "result";
pub const KEY_STATE: &str = "state";

const STATE_COMPLETED: &str = "COMPLETED";

/// Builds the JSON body of a run-completed message.
///
/// The body always carries `name`, `number`, `url`, `result` and `state`;
/// each provider then adds its own keys, later providers overwriting earlier
/// ones on conflict.
pub struct PayloadBuilder {
    providers: Vec<Box<dyn DataProvider>>,
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self {
            providers: vec![Box::new(CauseProvider), Box::new(PipelineProvider)],
        }
    }
}

impl PayloadBuilder {
    /// A builder with no providers; only the base keys are emitted.
    #[must_use]
    pub fn empty() -> Self { Self { providers: Vec::new() } }

    #[must_use]
    pub fn with_provider(mut self, provider: impl DataProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }

    #[must_use]
    pub fn body(&self, run: &RunDescriptor) -> Map<String, Value> {
        let mut body = Map::new();
        body.insert(KEY_NAME.to_string(), Value::from(run.name.as_str()));
        body.insert(KEY_NUMBER.to_string(), Value::from(run.number));
        body.insert(KEY_URL.to_string(), Value::from(run.url.as_str()));
        body.insert(KEY_RESULT.to_string(), Value::from(run.result.as_str()));
        body.insert(KEY_STATE.to_string(), Value::from(STATE_COMPLETED));

        for provider in &self.providers {
            provider.provide_completed_run_data(run, &mut body);
        }
        body
    }

    pub fn build(&self, run: &RunDescriptor) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.body(run))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::provider::{Cause, KEY_CAUSES, KEY_IS_PIPELINE};

    struct Tagger;

    impl DataProvider for Tagger {
        fn provide_completed_run_data(&self, run: &RunDescriptor, body: &mut Map<String, Value>) {
            body.insert("tag".to_string(), Value::from(format!("{}#{}", run.name, run.number)));
            body.insert(KEY_STATE.to_string(), Value::from("TAGGED"));
        }
    }

    fn run() -> RunDescriptor {
        RunDescriptor {
            name: "nightly".to_string(),
            number: 42,
            url: "job/nightly/42/".to_string(),
            result: "SUCCESS".to_string(),
            causes: vec![Cause::Timer],
            stages: None,
        }
    }

    #[test]
    fn test_default_providers() {
        let bytes = PayloadBuilder::default().build(&run()).unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body[KEY_NAME], json!("nightly"));
        assert_eq!(body[KEY_NUMBER], json!(42));
        assert_eq!(body[KEY_URL], json!("job/nightly/42/"));
        assert_eq!(body[KEY_RESULT], json!("SUCCESS"));
        assert_eq!(body[KEY_STATE], json!("COMPLETED"));
        assert_eq!(body[KEY_CAUSES], json!(["Started by timer"]));
        assert_eq!(body[KEY_IS_PIPELINE], json!(false));
    }

    #[test]
    fn test_custom_provider_runs_last() {
        let body = PayloadBuilder::empty().with_provider(Tagger).body(&run());

        assert_eq!(body["tag"], json!("nightly#42"));
        assert_eq!(body[KEY_STATE], json!("TAGGED"));
        assert!(!body.contains_key(KEY_CAUSES));
    }
}
