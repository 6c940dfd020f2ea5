use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "barrage", version, about = "Staged-ramp load tests with SLO thresholds")]
pub struct BarrageCli {
    /// Raise log verbosity (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the load test described by a YAML or JSON file.
    Run(RunArgs),
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the run configuration (`.yaml`, `.yml` or `.json`).
    pub config: PathBuf,

    /// Write the final report as JSON to this path.
    #[arg(short, long)]
    pub out: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run() {
        let cli =
            BarrageCli::try_parse_from(["barrage", "run", "hello.yaml", "--out", "r.json", "-vv"])
                .unwrap();
        assert_eq!(cli.verbose, 2);
        let Command::Run(args) = cli.command;
        assert_eq!(args.config, PathBuf::from("hello.yaml"));
        assert_eq!(args.out, Some(PathBuf::from("r.json")));
    }

    #[test]
    fn config_is_required() {
        assert!(BarrageCli::try_parse_from(["barrage", "run"]).is_err());
    }
}
