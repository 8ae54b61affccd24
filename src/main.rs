use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info};

use stock_forecast::config::Config;
use stock_forecast::data::run_pipeline;
use stock_forecast::ml::{run_training, Forecaster};
use stock_forecast::web::PredictionServer;

#[derive(Parser)]
#[command(name = "stock-forecast")]
#[command(about = "LSTM next-close stock price forecasting: fetch data, train, serve")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download closing prices and build the train/test windows
    Fetch,
    /// Train the model on the processed dataset and evaluate it
    Train,
    /// Serve predictions over HTTP from the trained artifacts
    Serve {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_file(&cli.config)?;

    match cli.command {
        Command::Fetch => {
            info!("Starting data download and preprocessing");
            let dataset = run_pipeline(&config).await?;
            info!(
                "Data stage complete: {} train / {} test windows",
                dataset.train.len(),
                dataset.test.len()
            );
        }
        Command::Train => {
            info!("Starting model training");
            let training_config = config.clone();
            let report =
                tokio::task::spawn_blocking(move || run_training(&training_config)).await??;
            if let Some(eval) = report.evaluation {
                info!("Training stage complete: test RMSE {:.4}", eval.rmse);
            }
        }
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            let server_config = &config.server;
            let forecaster = match Forecaster::load(
                &server_config.model_path(),
                &server_config.scaler_path(),
            ) {
                Ok(forecaster) => forecaster,
                Err(e) => {
                    error!("Refusing to start: {}", e);
                    return Err(e.into());
                }
            };

            let server = PredictionServer::new(Arc::new(forecaster));
            server.start(&server_config.host, server_config.port).await?;
        }
    }

    Ok(())
}
