//! Measures instruction throughput of independent sessions, one per thread.
//!
//! ```sh
//! cargo run --release -p engine-core --example throughput
//! ```
//!
//! Each thread owns its session and restarts a short ALU loop with a fixed
//! instruction count until the measurement window closes. A second pass
//! repeats the run with a code hook installed to show dispatch overhead.

#![allow(clippy::pedantic)]

use bitflags as _;
use env_logger as _;
use log as _;
use parking_lot as _;
use proptest as _;
use rstest as _;
#[cfg(feature = "serde")]
use serde as _;
use serde_json as _;
use thiserror as _;

use engine_core::cpu::nullbyte::encoding::encode_primary_word as encode;
use engine_core::{Arch, HookRange, Mode, Permission, Session};

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const NUM_THREADS: usize = 4;
const SLICE_INSTRUCTIONS: u64 = 10_000;

#[derive(Debug, Clone, Copy)]
struct BenchmarkResult {
    name: &'static str,
    instructions_per_second: f64,
}

fn alu_session(hooked: bool) -> Result<Session, engine_core::Error> {
    // loop: ADD R0,R1; SUB R2,R1; XOR R3,R1; JMP loop
    let words = [
        encode(0x4, 0, 1, 0x0, 0),
        encode(0x4, 2, 1, 0x1, 0),
        encode(0x4, 3, 1, 0x4, 0),
        encode(0x6, 0, 0, 0x6, 4),
        0x0000,
    ];
    let bytes: Vec<u8> = words.iter().flat_map(|word| word.to_le_bytes()).collect();

    let mut session = Session::open(Arch::Nullbyte, Mode::MODE_16)?;
    session.mem_map(0, 0x1000, Permission::READ | Permission::EXEC)?;
    session.mem_write(0, &bytes)?;
    if hooked {
        session.add_code_hook(|_, _, _, _| {}, 0, HookRange::ALL)?;
    }
    Ok(session)
}

fn benchmark(name: &'static str, hooked: bool, duration: Duration) -> BenchmarkResult {
    let (tx, rx) = mpsc::channel();

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|_| {
            let tx = tx.clone();
            thread::spawn(move || {
                let Ok(mut session) = alu_session(hooked) else {
                    return;
                };
                let start = Instant::now();
                while start.elapsed() < duration {
                    if session.start(0, u64::MAX, 0, SLICE_INSTRUCTIONS).is_err() {
                        break;
                    }
                }
                tx.send(session.retired()).ok();
            })
        })
        .collect();

    for h in handles {
        h.join().ok();
    }
    drop(tx);

    let total: u64 = rx.iter().sum();
    BenchmarkResult {
        name,
        instructions_per_second: total as f64 / duration.as_secs_f64(),
    }
}

fn main() {
    let duration = Duration::from_secs(2);
    for result in [
        benchmark("alu_loop", false, duration),
        benchmark("alu_loop_code_hook", true, duration),
    ] {
        println!(
            "{:<20} {:>14.0} instructions/s",
            result.name, result.instructions_per_second
        );
    }
}
