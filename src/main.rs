use anyhow::Result;
use std::process;
use log::error;
use scancore::{app, cli, logging};

fn main() {
    if let Err(e) = run() {
        error!("Application error: {:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

fn run() -> Result<()> {
    let args = cli::parse_args();
    cli::validate_args(&args)?;

    let config_manager = app::load_configuration(&args)?;
    let log_config = app::configure_logging(&args, &config_manager)?;
    logging::init_logger(log_config)?;

    if args.list_modules {
        return app::list_modules();
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_cpus::get())
        .enable_all()
        .build()?;

    runtime.block_on(app::run_scan(&args, &config_manager))
}
