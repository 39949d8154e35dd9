use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

fn usage() -> ! {
    eprintln!("Usage: expert_trace_report <trace.json> [--json]");
    eprintln!();
    eprintln!("Example:");
    eprintln!("  expert_trace_report expert_trace.json");
    std::process::exit(2);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1).collect::<Vec<_>>();
    let json = match args.iter().position(|a| a == "--json") {
        Some(i) => {
            args.remove(i);
            true
        }
        None => false,
    };
    if args.len() != 1 {
        usage();
    }
    let log_path = PathBuf::from(args.remove(0));

    match expert_trace::report::generate_report(&log_path, json) {
        Ok(out) => print!("{out}"),
        Err(e) => {
            tracing::error!(path = %log_path.display(), error = %e, "failed to load expert trace log");
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}
