use clap::Parser;
use tokio_util::sync::CancellationToken;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod error;
mod file;
mod output;
mod scenario;

use cli::{BarrageCli, Command, RunArgs};
use error::{exit_code, CliError, EXIT_INTERRUPTED};
use file::LoadTest;

#[tokio::main]
async fn main() {
    let cli = BarrageCli::parse();
    init_logging(cli.verbose);

    let code = match cli.command {
        Command::Run(args) => match run(args).await {
            Ok(code) => code,
            Err(err) => {
                error!("{err}");
                err.exit_code()
            }
        },
    };
    std::process::exit(code);
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "barrage=info,barrage_cli=info",
        1 => "barrage=debug,barrage_cli=debug",
        _ => "barrage=trace,barrage_cli=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: RunArgs) -> Result<i32, CliError> {
    let file = file::load(&args.config)?;
    let test = LoadTest::try_from(file)?;
    info!("Loaded {} from {}", test.config.name, args.config.display());

    let stop = CancellationToken::new();
    tokio::spawn(handle_interrupts(stop.clone()));

    let report = scenario::run(test, stop).await?;
    println!("{}", output::summary(&report));

    if let Some(out) = &args.out {
        output::write_report(out, &report)?;
        info!("Report written to {}", out.display());
    }

    Ok(exit_code(&report))
}

/// First ctrl-c drains the run, a second one exits immediately.
async fn handle_interrupts(stop: CancellationToken) {
    if tokio::signal::ctrl_c().await.is_err() {
        warn!("Unable to listen for ctrl-c.");
        return;
    }
    warn!("Interrupt received; finishing in-flight iterations. Press ctrl-c again to exit now.");
    stop.cancel();

    if tokio::signal::ctrl_c().await.is_ok() {
        error!("Second interrupt; exiting without a report.");
        std::process::exit(EXIT_INTERRUPTED);
    }
}
