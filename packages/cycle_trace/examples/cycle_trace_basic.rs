//! Instruments a small simulated game loop and writes the result as a Chrome trace.
//!
//! Open the resulting `cycle_trace_basic.json` in `chrome://tracing`, Perfetto or
//! Speedscope.
//!
//! Run with: `cargo run --example cycle_trace_basic`.
#![expect(
    clippy::arithmetic_side_effects,
    reason = "this is example code that does not need production-level safety"
)]

use std::hint::black_box;

use cycle_trace::{Profiler, TraceWriter, mark, scope};

const FRAMES: u32 = 5;
const ENTITIES: u32 = 256;

fn update(profiler: &Profiler) -> cycle_trace::Result<()> {
    let _span = scope!(profiler, "update", ENTITIES)?;

    let mut checksum = 0_u64;
    for entity in 0..ENTITIES {
        checksum = checksum.wrapping_mul(31).wrapping_add(u64::from(entity));
    }
    black_box(checksum);

    Ok(())
}

fn render(profiler: &Profiler) -> cycle_trace::Result<()> {
    let _span = scope!(profiler, "render")?;

    let pixels: Vec<u32> = (0..10_000).map(|i| i * 3).collect();
    black_box(pixels);

    mark!(profiler, "present")?;
    Ok(())
}

fn main() -> cycle_trace::Result<()> {
    let profiler = Profiler::builder().calibrated_frequency().build();

    match profiler.frequency_hz() {
        Some(hz) => println!("Counter runs at about {hz} Hz; trace times are in ms."),
        None => println!("Counter frequency unknown; trace times are in raw cycles."),
    }

    let mut trace = TraceWriter::create("cycle_trace_basic.json")?;

    for _ in 0..FRAMES {
        {
            let _frame = scope!(profiler, "frame")?;
            update(&profiler)?;
            render(&profiler)?;
        }

        trace.write_chunk(&profiler)?;
    }

    trace.finish()?;

    println!();
    println!("{:<10} {:>8} {:>14}", "record", "hits", "cycles");
    for (_, info) in profiler.records() {
        println!(
            "{:<10} {:>8} {:>14}",
            info.name(),
            info.totals().hits(),
            info.totals().cycles()
        );
    }

    println!();
    println!("Wrote cycle_trace_basic.json");

    Ok(())
}
