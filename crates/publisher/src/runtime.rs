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

use std::sync::atomic::{AtomicUsize, Ordering};

use bon::Builder;
use smart_default::SmartDefault;
use snafu::ResultExt;
use tokio::runtime::{Builder as TokioBuilder, Runtime};

use crate::error::{Result, RuntimeSnafu};

/// Settings for the runtime a publisher creates when the host does not hand
/// it one.
#[derive(Debug, Clone, SmartDefault, Builder)]
#[builder(finish_fn = build)]
pub struct RuntimeOptions {
    /// The drainer itself only ever occupies one.
    #[default(2)]
    #[builder(default = 2)]
    pub worker_threads: usize,

    #[default("mqnotify-drainer".to_string())]
    #[builder(default = "mqnotify-drainer".to_string())]
    pub thread_name: String,
}

impl RuntimeOptions {
    /// Build a multi-thread runtime with IO and time drivers and sequential
    /// thread names.
    pub fn create(self) -> Result<Runtime> {
        let mut builder = TokioBuilder::new_multi_thread();
        builder.worker_threads(self.worker_threads.max(1));
        builder.enable_all();

        let counter = AtomicUsize::new(0);
        let thread_name = self.thread_name;
        builder.thread_name_fn(move || {
            let idx = counter.fetch_add(1, Ordering::SeqCst);
            format!("{thread_name}-{idx}")
        });

        builder.build().context(RuntimeSnafu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_runtime() {
        let runtime = RuntimeOptions::builder().worker_threads(1).build().create().unwrap();
        let name = runtime.block_on(async {
            tokio::task::spawn(async { std::thread::current().name().map(str::to_string) })
                .await
                .unwrap()
        });
        assert!(name.unwrap().starts_with("mqnotify-drainer-"));
    }
}
