//! Decode Loop Example
//!
//! Two worker threads, each pinned to its own accelerator, run a prefill step
//! and a few decode steps through a toy MoE gate and flush one expert trace
//! record per step into a per-worker log.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

use expert_trace::prelude::*;

const HIDDEN_DIM: usize = 8;
const NUM_EXPERTS: usize = 8;
const TOP_K: usize = 2;
const MOE_LAYERS: usize = 4;

fn run_worker(tracer: Arc<TraceRegistry>, ordinal: u32, log_path: PathBuf) -> expert_trace::Result<()> {
    set_current_device(DeviceId::Accelerator(ordinal));
    tracer.ready()?;

    let gates: Vec<LinearRouter> = (0..MOE_LAYERS)
        .map(|layer| LinearRouter::new(HIDDEN_DIM, NUM_EXPERTS).with_random_init(layer as u64 + 1))
        .collect();

    let prompt_tokens = 5;
    let prompt: Vec<f32> = (0..prompt_tokens * HIDDEN_DIM)
        .map(|i| ((i as u32 * 7 + ordinal) % 11) as f32 * 0.1)
        .collect();
    for gate in &gates {
        tracer.add("toy-moe", gate.route(&prompt, prompt_tokens)?, TOP_K)?;
    }
    tracer.dump(&log_path, "prefill")?;

    for step in 0..3u32 {
        let token: Vec<f32> = (0..HIDDEN_DIM as u32)
            .map(|i| ((i * 3 + step + ordinal) % 5) as f32 * 0.2)
            .collect();
        for gate in &gates {
            tracer.add("toy-moe", gate.route(&token, 1)?, TOP_K)?;
        }
        tracer.dump(&log_path, "decode")?;
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Expert Trace Decode Loop Example");
    println!("================================");

    let out_dir = std::env::temp_dir().join("expert_trace_decode_loop");
    let tracer = Arc::new(TraceRegistry::new(TracerConfig::default()));

    let handles: Vec<_> = (0..2u32)
        .map(|ordinal| {
            let tracer = Arc::clone(&tracer);
            let log_path = out_dir.join(format!("worker_{ordinal}.json"));
            thread::spawn(move || run_worker(tracer, ordinal, log_path.clone()).map(|()| log_path))
        })
        .collect();

    for handle in handles {
        let log_path = handle.join().map_err(|_| "worker panicked")??;
        println!("\n{}", log_path.display());
        print!("{}", expert_trace::report::generate_report(&log_path, false)?);
    }

    Ok(())
}
