//! CLI binary entry point. Owns argv parsing, logging setup, and the exit
//! code mapping; everything else lives in [`wifi_ufo::cli`].

use std::error::Error;

use clap::Parser;
use wifi_ufo::cli::{run, Cli};

fn print_chain(err: &(dyn Error + 'static)) {
    eprintln!("error: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        eprintln!("  caused by: {cause}");
        source = cause.source();
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        print_chain(&err);
        std::process::exit(1);
    }
}
