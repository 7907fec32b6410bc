//! Throughput of the hot paths: local edits, remote merges and snapshots.
//!
//! Run:  cargo run --example perf --release -p json-crdt-core

use std::time::Instant;

use json_crdt_core::json_crdt::{ModelCodec, VerboseCodec};
use json_crdt_core::{Model, Patch, PatchBuilder};
use serde_json::json;

// ── harness ───────────────────────────────────────────────────────────────────

fn bench<F: FnMut()>(n: u32, mut f: F) -> u64 {
    let warmup = std::cmp::max(50, n / 10);
    for _ in 0..warmup {
        f();
    }
    let start = Instant::now();
    for _ in 0..n {
        f();
    }
    let elapsed = start.elapsed();
    (n as f64 / elapsed.as_secs_f64()) as u64
}

fn fmt(n: u64) -> String {
    // comma-grouped number
    let s = n.to_string();
    let mut out = String::new();
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.chars().rev().collect()
}

fn row(label: &str, ops: u64) {
    println!("  {:<20}  {:>16} op/s", label, fmt(ops));
}

/// 100 single-character appends to a fresh string, one patch each.
fn typing_session(sid: u64) -> (Model, Vec<Patch>) {
    let mut model = Model::new(sid);
    let mut patches = Vec::with_capacity(101);
    let mut api = model.api();
    let text = api.root(&json!("")).expect("seed");
    patches.push(api.flush());
    for i in 0..100usize {
        let ch = char::from(b'a' + (i % 26) as u8).to_string();
        api.str_ins(text, i, &ch).expect("append");
        patches.push(api.flush());
    }
    drop(api);
    (model, patches)
}

// ── main ──────────────────────────────────────────────────────────────────────

fn main() {
    println!("\n  json-crdt-core\n");
    println!("  {:<20}  {:>16}", "operation", "ops/sec");
    println!("  {}", "-".repeat(42));

    let mut sid: u64 = 65_536;
    let mut next_sid = || {
        sid += 1;
        sid
    };

    row(
        "model_create",
        bench(50_000, || {
            let _ = Model::new(next_sid());
        }),
    );

    row(
        "set_flush",
        bench(10_000, || {
            let mut m = Model::new(next_sid());
            let mut b = PatchBuilder::from_clock_vector(&m.clock);
            let obj = b
                .json(&json!({"x": 1, "y": 2, "active": false}))
                .expect("build");
            b.root(obj).expect("root");
            m.apply_patch(&b.flush()).expect("apply");
        }),
    );

    row(
        "str_ins×100",
        bench(500, || {
            let _ = typing_session(next_sid());
        }),
    );

    {
        let (_, patches) = typing_session(next_sid());
        row(
            "merge×101",
            bench(500, || {
                let mut m = Model::new(next_sid());
                for p in &patches {
                    m.apply_patch(p).expect("apply");
                }
            }),
        );
    }

    {
        let (m, _) = typing_session(next_sid());
        let codec = VerboseCodec::new();
        let bytes = codec.encode(&m).expect("encode");
        row(
            "snapshot_encode",
            bench(5_000, || {
                let _ = codec.encode(&m).expect("encode");
            }),
        );
        row(
            "snapshot_decode",
            bench(5_000, || {
                let _ = codec.decode(&bytes).expect("decode");
            }),
        );
    }

    println!();
}
