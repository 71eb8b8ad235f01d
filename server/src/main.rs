use std::path::PathBuf;

use clap::{arg, Command};
use dork_env::Config;
use dork_server::server::run_server;
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("dork-server")
        .about("Authoritative match server of dork.fun.")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("run").arg(
                arg!([config] "The path to config file")
                    .value_parser(clap::value_parser!(PathBuf)),
            ),
        )
}

pub async fn run(path: &PathBuf) {
    let config = Config::from_path(path).await;
    run_server(config).await.expect("Unexpected error occured");
}

#[tokio::main]
pub async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let matches = cli().get_matches();
    match matches.subcommand() {
        Some(("run", subcommand_matches)) => {
            let path = subcommand_matches.get_one::<PathBuf>("config");
            run(path.unwrap_or(&"config.toml".into())).await;
        }
        _ => unreachable!(),
    }
}
