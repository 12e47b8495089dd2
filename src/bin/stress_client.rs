use std::error::Error;
use std::process;

use env_logger::Env;
use log::{error, info};

use mq_stress::cli::{self, USAGE};
use mq_stress::{lifecycle, Config};

static DEFAULT_LOG_FILTER: &str = "stress_client=info,mq_stress=info";

/// log an error and everything that caused it
fn report(err: &dyn Error) {
    error!("{}", err);
    let mut source = err.source();
    while let Some(cause) = source {
        error!("  caused by: {}", cause);
        source = cause.source();
    }
}

/// run the stress client
fn main() {
    // set up logger
    env_logger::Builder::from_env(Env::default().default_filter_or(DEFAULT_LOG_FILTER)).init();

    let mode = match cli::parse_mode(std::env::args_os()) {
        Ok(mode) => mode,
        Err(_) => {
            eprintln!("{}", USAGE);
            process::exit(1);
        }
    };

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            report(&e);
            process::exit(1);
        }
    };

    if let Err(e) = lifecycle::run(mode, &config) {
        report(&e);
        process::exit(1);
    }
    info!("{} finished", mode);
}
