//! Identity-exchange harness CLI

use clap::{builder::PossibleValuesParser, Arg, ArgAction, Command};
use idex_harness::{
    client::HttpClient,
    config::Config,
    scenario::{self, Context},
    telemetry, webhook, Error,
};
use idex_observer::broker::Router;
use prometheus_client::registry::Registry;
use std::{path::PathBuf, process::ExitCode, sync::Arc};
use tokio::net::TcpListener;
use tracing::{error, info, Level};

/// Returns the version of the crate.
pub const fn crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Flag for verbose output
const VERBOSE_FLAG: &str = "verbose";

/// Run scenarios against a deployment
const RUN_CMD: &str = "run";

/// Prefix of every exported metric
const METRICS_PREFIX: &str = "idex";

/// Entrypoint for the harness CLI
#[tokio::main]
async fn main() -> ExitCode {
    // Define application
    let matches = Command::new("idex-harness")
        .version(crate_version())
        .about("Drive identity-exchange scenarios and verify every notification each actor receives.")
        .arg(
            Arg::new(VERBOSE_FLAG)
                .short('v')
                .long(VERBOSE_FLAG)
                .global(true)
                .action(ArgAction::SetTrue),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new(RUN_CMD)
                .about("Run scenarios sequentially, stopping at the first failure.")
                .arg(
                    Arg::new("config")
                        .long("config")
                        .required(true)
                        .help("Path to YAML config file")
                        .value_parser(clap::value_parser!(PathBuf)),
                )
                .arg(
                    Arg::new("scenario")
                        .long("scenario")
                        .help("Scenario to run (repeatable, defaults to all)")
                        .action(ArgAction::Append)
                        .value_parser(PossibleValuesParser::new(scenario::ALL)),
                ),
        )
        .get_matches();
    let verbose = matches.get_flag(VERBOSE_FLAG);

    // Parse subcommands
    match matches.subcommand() {
        Some((RUN_CMD, matches)) => {
            let config_path = matches.get_one::<PathBuf>("config").unwrap();
            let scenarios: Vec<String> = match matches.get_many::<String>("scenario") {
                Some(selected) => selected.cloned().collect(),
                None => scenario::ALL.iter().map(|name| name.to_string()).collect(),
            };
            let config = match Config::load(config_path) {
                Ok(config) => config,
                Err(e) => {
                    tracing_subscriber::fmt().with_max_level(Level::ERROR).init();
                    error!(error=?e, path=?config_path, "failed to load config");
                    return ExitCode::FAILURE;
                }
            };
            if let Err(e) = run(config, &scenarios, verbose).await {
                error!(error=?e, "run failed");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        _ => ExitCode::FAILURE,
    }
}

/// Serve callbacks and run `scenarios` against the deployment described by `config`.
async fn run(config: Config, scenarios: &[String], verbose: bool) -> Result<(), Error> {
    // Initialize telemetry
    let level = if verbose { Level::DEBUG } else { config.level()? };
    let mut registry = Registry::with_prefix(METRICS_PREFIX);
    let brokers = Router::with_registry(
        config.actors.iter().map(|actor| actor.node_id.clone()),
        &mut registry,
    );
    telemetry::init(level, config.metrics.map(|address| (address, Arc::new(registry))))?;

    // Receive callbacks
    let listener = TcpListener::bind(config.callback).await?;
    info!(address = %config.callback, url = %config.callback_url(), "receiving callbacks");
    let server = tokio::spawn(webhook::serve(listener, brokers.clone()));

    // Run scenarios
    let client = HttpClient::new(&config, config.callback_url())?;
    let context = Context::new(brokers, client, &config)?;
    let mut result = Ok(());
    for name in scenarios {
        if let Err(e) = context.run(name).await {
            error!(scenario = %name, error=?e, "scenario failed");
            result = Err(e);
            break;
        }
    }
    server.abort();
    if result.is_ok() {
        info!(count = scenarios.len(), "all scenarios passed");
    }
    result
}
