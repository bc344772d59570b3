use clap::Parser;
use stt_gate_stream::cli::{self, CliArgs};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();

    let args = CliArgs::parse();
    cli::init_logging(args.debug);
    cli::run(args).await
}
