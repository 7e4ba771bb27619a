// rpgo_sim/src/main.rs

use clap::Parser;
use tracing::error;

use rpgo_sim::prelude::*;

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("rpgo_core=info".parse().expect("static directive"))
                .add_directive("rpgo_sim=info".parse().expect("static directive")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        error!("{}", e);
        std::process::exit(1);
    }
}
