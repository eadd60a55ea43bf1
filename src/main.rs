use std::fs::File;

use anyhow::{Result, anyhow};
use clap::Parser;
use daemonize::Daemonize;
use log::{LevelFilter, error, info};
use syslog::{BasicLogger, Facility, Formatter3164};

use picpd::{application::Application, cli::Cli, config::ConfigManager};

fn init_log() -> Result<()> {
    syslog::unix(Formatter3164 {
        facility: Facility::LOG_DAEMON,
        hostname: None,
        process: "picpd".into(),
        pid: 0,
    })
    .map_err(|e| anyhow!("{e}"))
    .and_then(|logger| {
        log::set_boxed_logger(Box::new(BasicLogger::new(logger)))
            .map(|_| log::set_max_level(LevelFilter::Info))
            .map_err(|e| anyhow!("{e}"))
    })
}

fn into_daemon() -> Result<()> {
    File::create("/var/tmp/picpd.log")
        .and_then(|out| Ok((out.try_clone()?, out)))
        .map_err(|e| anyhow!("{e}"))
        .and_then(|(stderr, stdout)| {
            Daemonize::new()
                .stdout(stdout)
                .stderr(stderr)
                .start()
                .map_err(|e| anyhow!("{e}"))
        })
}

async fn run(cli: Cli) -> Result<()> {
    let config_manager = ConfigManager::load(cli.config).await?;

    let level = match cli.log_level {
        Some(level) => level,
        None => config_manager
            .common()
            .await
            .log_level
            .parse()
            .unwrap_or(LevelFilter::Info),
    };
    log::set_max_level(level);
    info!(
        "picpd {} starting with {}",
        env!("CARGO_PKG_VERSION"),
        config_manager.path().display()
    );

    Application::builder()
        .with_config_manager(config_manager)
        .build()
        .await?
        .run()
        .await
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_log()?;

    // Forking is only safe before the runtime spawns its worker threads.
    if cli.daemonize {
        into_daemon()?;
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(cli)).inspect_err(|e| error!("{e:#}"))
}
