use anyhow::Result;
use clap::Parser;
use gcodestream::{default_config_path, init_logging, Config};

mod cli;
mod session;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    init_logging(args.log_json)?;
    tracing::debug!(
        "gcodestream {} built {}",
        gcodestream::VERSION,
        gcodestream::BUILD_DATE
    );

    let config = match &args.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load_or_default(&default_config_path())?,
    };

    match args.cmd {
        cli::Cmd::Ports => session::ports(),
        cli::Cmd::Stream(opts) => session::stream(config, opts).await,
        cli::Cmd::Console(opts) => session::console(config, opts).await,
    }
}
