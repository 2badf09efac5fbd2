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

//! Benchmarks for the queue file.
//!
//! Every append and remove fsyncs, so these numbers are dominated by the
//! storage device.

use std::hint::black_box;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use mqnotify_common_storage_queue::{QueueBuilder, QueueFile};
use tempfile::TempDir;

const PAYLOAD_SIZES: &[usize] = &[256, 4096, 65536];

fn create_queue(temp_dir: &TempDir) -> QueueFile {
    QueueBuilder::new(temp_dir.path().join("build.db"))
        .build()
        .expect("Failed to create queue")
}

fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for &size in PAYLOAD_SIZES {
        let payload = vec![0xABu8; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            let temp_dir = TempDir::new().expect("Failed to create temp dir");
            let queue = create_queue(&temp_dir);
            b.iter(|| queue.append(black_box(payload)).expect("append"));
        });
    }
    group.finish();
}

fn bench_peek_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("peek_remove");

    for &size in PAYLOAD_SIZES {
        let payload = vec![0xCDu8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &payload, |b, payload| {
            b.iter_batched(
                || {
                    let temp_dir = TempDir::new().expect("Failed to create temp dir");
                    let queue = create_queue(&temp_dir);
                    for _ in 0..16 {
                        queue.append(payload).expect("append");
                    }
                    (temp_dir, queue)
                },
                |(_temp_dir, queue)| {
                    while let Some(record) = queue.peek().expect("peek") {
                        black_box(record);
                        queue.remove().expect("remove");
                    }
                },
                BatchSize::PerIteration,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_append, bench_peek_remove);
criterion_main!(benches);
