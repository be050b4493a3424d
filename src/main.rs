//! proxy-augment: prepares API proxy bundles by injecting shared-flow callout
//! policies into their request and response flows.
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod apigee;
mod auth;
mod bundle;
mod cli;
mod commands;
mod config;
mod error;
mod flow;
mod pipeline;
mod policy;
mod routing;
mod scaffold;
mod storage;
#[cfg(test)]
mod testutil;

fn main() {
    let args = cli::RootArgs::parse();
    init_tracing(args.verbose);
    if let Err(err) = commands::run(args) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

/// Logs go to stderr so `--json` output stays clean on stdout.
fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,proxy_augment={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
