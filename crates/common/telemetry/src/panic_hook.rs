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

//! Panic hook that routes panics through tracing before the default handler
//! runs.

use std::{panic, sync::LazyLock, thread};

use backtrace::Backtrace;
use prometheus::{IntCounter, register_int_counter};

pub static PANIC_COUNTER: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("mqnotify_panic_total", "Number of panics observed").unwrap()
});

/// Installs the hook. The previously installed hook still runs afterwards.
pub fn set_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        let backtrace = format!("{:?}", Backtrace::new());
        let thread = thread::current();
        let thread_name = thread.name().unwrap_or("<unnamed>");

        if let Some(location) = info.location() {
            tracing::error!(
                message = %info,
                backtrace = %backtrace,
                thread = thread_name,
                panic.file = location.file(),
                panic.line = location.line(),
                panic.column = location.column(),
            );
        } else {
            tracing::error!(message = %info, backtrace = %backtrace, thread = thread_name);
        }
        PANIC_COUNTER.inc();
        default_hook(info);
    }));
}
