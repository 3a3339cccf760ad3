use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod config;
mod fleet;
mod frame;
mod link;
mod oneshot;
mod port;
mod pose;
mod proto;
mod radio;
mod robot;
mod run;
mod scenario;
mod stats;
mod vision;

fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let level = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("fleet_radio={level}"))),
        )
        .with_writer(std::io::stderr)
        .init();

    match args.cmd {
        cli::Cmd::Run(opts) => run::run(opts),
        cli::Cmd::Robot(opts) => oneshot::robot(opts),
        cli::Cmd::Scenario(opts) => oneshot::scenario(opts),
        cli::Cmd::Config(opts) => oneshot::config(opts),
        cli::Cmd::Describe => oneshot::describe(),
    }
}
