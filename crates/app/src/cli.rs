use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use crate::recognition::{
    ArtifactFactory, EngineArgs, EngineConfig, RecognitionEngine, TelemetryOptions, run_server,
};

#[derive(Parser, Debug)]
#[command(name = "signsight", version, about = "Live sign-language recognition engine")]
pub struct Cli {
    /// Write a Chrome trace of engine spans to this file.
    #[arg(long, global = true, env = "SIGNSIGHT_CHROME_TRACE")]
    pub chrome_trace: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn telemetry(&self) -> TelemetryOptions {
        TelemetryOptions {
            chrome_trace_path: self.chrome_trace.clone(),
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Initialise the engine and serve the stream and prediction API.
    Serve(ServeArgs),
    /// Classify one image file and print the prediction as JSON.
    Predict {
        #[command(flatten)]
        engine: EngineArgs,
        image: PathBuf,
    },
    /// Print the sign labels the classifier knows, one per line.
    Signs {
        #[command(flatten)]
        engine: EngineArgs,
    },
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub engine: EngineArgs,
    /// Address the preview server binds to.
    #[arg(long, env = "SIGNSIGHT_BIND", default_value = "0.0.0.0:5000")]
    pub bind: String,
}

fn build_engine(args: EngineArgs) -> Result<RecognitionEngine> {
    let config = EngineConfig::try_from(args).context("invalid engine configuration")?;
    let factory = Arc::new(ArtifactFactory::new(config.artifacts));
    Ok(RecognitionEngine::new(factory, config.settings))
}

pub fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Serve(args) => {
            let engine = build_engine(args.engine)?;
            let status = engine
                .initialize()
                .context("recognition engine failed to initialise")?;
            info!(?status, bind = %args.bind, "starting preview server");
            run_server(engine, &args.bind)
        }
        Command::Predict { engine, image } => {
            let engine = build_engine(engine)?;
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let prediction = engine.predict_image_bytes(&bytes);
            engine.release();
            println!("{}", serde_json::to_string(&prediction)?);
            Ok(())
        }
        Command::Signs { engine } => {
            let engine = build_engine(engine)?;
            let signs = engine.get_available_signs();
            engine.release();
            if signs.is_empty() {
                bail!("no sign labels available; check --labels");
            }
            for sign in signs {
                println!("{sign}");
            }
            Ok(())
        }
    }
}
