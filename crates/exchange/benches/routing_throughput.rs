// Copyright 2025 itscheems
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anvil_exchange::{FieldTable, FieldValue, VirtualHost};
use anvil_storage::MemoryStorage;

const BINDING_COUNTS: &[usize] = &[10, 100, 1_000];
const ROUTER_COUNTS: &[usize] = &[1, 2, 4, 8];
const ROUTES_PER_THREAD: u64 = 10_000;

fn vhost_with_bindings(kind: &str, bindings: usize) -> VirtualHost {
	let vhost = VirtualHost::new("/", Arc::new(MemoryStorage::new()));
	vhost
		.declare_exchange("bench", kind, false, false, false, FieldTable::new())
		.unwrap();

	for i in 0..bindings {
		let queue = format!("q-{}", i);
		let (routing_key, arguments) = match kind {
			"topic" => (format!("market.{}.#", i % 50), FieldTable::new()),
			"headers" => {
				let mut args = FieldTable::new();
				args.insert("x-match".to_string(), FieldValue::from("any"));
				args.insert("region".to_string(), FieldValue::Int((i % 50) as i64));
				(String::new(), args)
			}
			_ => (format!("key-{}", i), FieldTable::new()),
		};
		vhost
			.bind_queue("bench", &queue, &routing_key, arguments, false)
			.unwrap();
	}

	vhost
}

fn benchmark_kind(c: &mut Criterion, kind: &str) {
	let mut group = c.benchmark_group(format!("route_{}", kind));

	let mut headers = FieldTable::new();
	headers.insert("region".to_string(), FieldValue::Int(7));

	for &bindings in BINDING_COUNTS {
		let vhost = vhost_with_bindings(kind, bindings);
		let routing_key = match kind {
			"topic" => "market.7.btc.usdt",
			_ => "key-7",
		};

		group.bench_with_input(
			BenchmarkId::from_parameter(format!("{}b", bindings)),
			&bindings,
			|b, _| {
				b.iter(|| {
					black_box(vhost.route(
						black_box("bench"),
						black_box(routing_key),
						Some(&headers),
					))
				});
			},
		);
	}

	group.finish();
}

/// Several threads routing through one exchange, contending on its lock
fn bench_concurrent_routing(c: &mut Criterion) {
	let mut group = c.benchmark_group("route_topic_concurrent");
	group.sample_size(10);
	group.measurement_time(Duration::from_secs(10));

	let vhost = Arc::new(vhost_with_bindings("topic", 100));

	for &routers in ROUTER_COUNTS {
		group.bench_with_input(
			BenchmarkId::from_parameter(format!("{}t", routers)),
			&routers,
			|b, &num_routers| {
				b.iter_custom(|iters| {
					let mut total_duration = Duration::ZERO;

					for _ in 0..iters {
						let start = Instant::now();
						let handles: Vec<_> = (0..num_routers)
							.map(|t| {
								let vhost = vhost.clone();
								thread::spawn(move || {
									let routing_key = format!("market.{}.btc", t % 50);
									for _ in 0..ROUTES_PER_THREAD {
										black_box(vhost.route("bench", &routing_key, None));
									}
								})
							})
							.collect();

						for handle in handles {
							handle.join().unwrap();
						}
						total_duration += start.elapsed();
					}

					total_duration
				});
			},
		);
	}

	group.finish();
}

fn bench_direct(c: &mut Criterion) {
	benchmark_kind(c, "direct");
}

fn bench_fanout(c: &mut Criterion) {
	benchmark_kind(c, "fanout");
}

fn bench_topic(c: &mut Criterion) {
	benchmark_kind(c, "topic");
}

fn bench_headers(c: &mut Criterion) {
	benchmark_kind(c, "headers");
}

criterion_group!(
	benches,
	bench_direct,
	bench_fanout,
	bench_topic,
	bench_headers,
	bench_concurrent_routing
);
criterion_main!(benches);
