use anyhow::Context;
use clap::Parser;
use config::Config;
use orchestrator::clock::SystemClock;
use orchestrator::enforcement;
use orchestrator::persistence::{LedgerStore, MemoryLedgerStore, SqliteLedgerStore};
use orchestrator::{ContainmentController, Services};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing::{debug, trace, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use virusguard::cli::Cli;
use virusguard::dispatch::{Dispatcher, Outcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let request = cli.request().unwrap_or_else(|err| err.exit());

    // load config
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        _ => {
            let mut candidates = glob::glob("/etc/virusguard/config.d/*.toml")?
                .filter_map(Result::ok)
                .collect::<Vec<_>>();
            candidates.insert(0, "/etc/virusguard/config.toml".into());
            Config::load_multiple(candidates)?
        }
    };

    // NOTE: The verbosity flag takes precedence over the environment variable
    // for log control. `VIRUSGUARD_LOG` can only set the log level per crate,
    // e.g. `VIRUSGUARD_LOG=orchestrator=trace virusguard -v ...`.
    let env_filter = EnvFilter::builder()
        .with_default_directive("sqlx=warn".parse()?)
        .with_env_var("VIRUSGUARD_LOG")
        .from_env()?
        .add_directive(cli.verbosity.log_level_filter().as_str().parse()?);

    let logfile = cli.logfile.as_ref().or(config.log.file.as_ref());
    let writer = match logfile {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stderr),
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_ansi(logfile.is_none())
        .with_writer(writer);

    tracing_subscriber::registry()
        .with(layer)
        .with(env_filter)
        .init();
    debug!(?config, ?cli);

    // open the ledger only for actions that use it
    let store: Box<dyn LedgerStore> = if cli.no_persist || !request.action.uses_ledger() {
        trace!("using in-memory ledger");
        Box::new(MemoryLedgerStore::new())
    } else {
        let path = cli.ledger.clone().unwrap_or_else(|| config.ledger.path.clone());
        Box::new(SqliteLedgerStore::open(&path).await?)
    };

    let controller = ContainmentController::new(
        &config,
        Services {
            enforcement: enforcement::from_config(&config),
            store,
            clock: Box::new(SystemClock),
        },
    );
    let dispatcher = Dispatcher::new(config, controller);

    let result = tokio::select! {
        res = dispatcher.run(&request) => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, abandoning {:?}", request.action);
            if let Err(err) = dispatcher.release_abandoned(&request).await {
                warn!(%err, "cannot release abandoned enforcement");
            }
            dispatcher.close().await;
            anyhow::bail!("interrupted");
        }
    };
    dispatcher.close().await;

    report(&result?);
    Ok(())
}

#[allow(clippy::print_stdout)]
fn report(outcome: &Outcome) {
    print!("{outcome}");
}
