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

use super::{Cause, DataProvider, RunDescriptor};

pub const KEY_CAUSES: &str = "causes";

/// Lists the short description of every known cause under `causes`.
/// An upstream cause with a build URL contributes the URL as a second entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct CauseProvider;

impl CauseProvider {
    fn describe(cause: &Cause, out: &mut Vec<Value>) {
        let description = match cause {
            Cause::Upstream {
                project,
                build,
                upstream_url,
            } => {
                out.push(Value::from(format!(
                    "Started by upstream project \"{project}\" build number {build}"
                )));
                if let Some(url) = upstream_url {
                    out.push(Value::from(url.as_str()));
                }
                return;
            }
            Cause::User { user_name, .. } => format!("Started by user {user_name}"),
            Cause::Remote { addr, note: None } => format!("Started by remote host {addr}"),
            Cause::Remote {
                addr,
                note: Some(note),
            } => format!("Started by remote host {addr} with note: {note}"),
            Cause::Timer => "Started by timer".to_string(),
            Cause::Scm => "Started by an SCM change".to_string(),
            Cause::Other => return,
        };
        out.push(Value::from(description));
    }
}

impl DataProvider for CauseProvider {
    fn provide_completed_run_data(&self, run: &RunDescriptor, body: &mut Map<String, Value>) {
        let mut causes = Vec::with_capacity(run.causes.len());
        for cause in &run.causes {
            Self::describe(cause, &mut causes);
        }
        body.insert(KEY_CAUSES.to_string(), Value::Array(causes));
    }
}
