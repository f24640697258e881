use std::process;

use clap::Parser;
use nsfc_report::cli::{run, Cli};

#[tokio::main]
async fn main() {
    if let Err(err) = run(Cli::parse()).await {
        eprintln!("{err}");
        process::exit(1);
    }
}
