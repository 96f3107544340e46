use mojito::{Bytes, Kuid, Testnet};
use std::time::{Duration, Instant};

/// End-to-end latency of lookups and stores on an in-memory testnet.
///
/// Nodes run on their own actor threads and talk over a `MemoryNetwork`, so
/// the numbers are dominated by actor scheduling, not by the network.
fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    println!("latency\n");

    for size in [10, 50] {
        let testnet = Testnet::new(size).unwrap();
        let nodes = &testnet.nodes;

        let (key, stored) = nodes[0].put_immutable(Bytes::from_static(b"bench_payload"));
        stored.get().unwrap();

        // GET
        let samples = 30;
        let mut timings = Vec::with_capacity(samples);
        let mut misses = 0;

        for i in 0..samples {
            let node_idx = (i % (size - 1)) + 1;
            let start = Instant::now();
            let result = nodes[node_idx].get(key).get();
            timings.push(start.elapsed());
            if result.is_err() {
                misses += 1;
            }
        }

        println!("get ({size} nodes, {misses} misses)");
        print_stats(&timings);

        // FIND_NODE
        let samples = 30;
        let mut timings = Vec::with_capacity(samples);

        for i in 0..samples {
            let start = Instant::now();
            let _ = nodes[i % size].find_node(Kuid::random()).get();
            timings.push(start.elapsed());
        }

        println!("find_node ({size} nodes)");
        print_stats(&timings);

        // PUT
        let samples = 20;
        let mut timings = Vec::with_capacity(samples);

        for i in 0..samples {
            let value = Bytes::from(format!("put_bench_{size}_{i}"));
            let start = Instant::now();
            let (_, stored) = nodes[i % size].put_immutable(value);
            let _ = stored.get();
            timings.push(start.elapsed());
        }

        println!("put ({size} nodes)");
        print_stats(&timings);
    }
}

fn print_stats(timings: &[Duration]) {
    let mut us: Vec<_> = timings.iter().map(|d| d.as_micros()).collect();
    us.sort_unstable();
    let n = us.len();
    let mean = us.iter().sum::<u128>() / n as u128;

    println!(
        "n={n} min={:.2}ms mean={:.2}ms p50={:.2}ms p95={:.2}ms max={:.2}ms\n",
        us[0] as f64 / 1000.0,
        mean as f64 / 1000.0,
        us[n / 2] as f64 / 1000.0,
        us[n * 95 / 100] as f64 / 1000.0,
        us[n - 1] as f64 / 1000.0,
    );
}
