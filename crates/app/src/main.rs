use clap::Parser;
use signsight::{cli, recognition::telemetry};

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            eprintln!("ignoring .env: {err}");
        }
    }
    let cli = cli::Cli::parse();
    let _telemetry = telemetry::install(&cli.telemetry());
    cli::execute(cli)
}
