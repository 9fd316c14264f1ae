//! Prompt callers for credentials and connect them to a templated gateway.

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use gaxgate::{Error, ListenerBuilder, TokioReactor};

#[derive(Parser)]
#[command(
    name = "gaxproxy",
    about = "Collect credentials from callers and connect them to a gateway"
)]
struct Cli {
    /// Connection string to listen on
    #[arg(short, long, default_value = "tcp,localhost,8772")]
    listen: String,

    /// Number of lines prompted for; available as `%0`, `%1`, ... in the
    /// gateway template
    #[arg(long, default_value_t = 1)]
    require_creds: usize,

    /// Gateway connection template
    #[arg(short, long, default_value = "%0")]
    gateway: String,
}

fn run(cli: Cli) -> Result<(), Error> {
    let mut reactor = TokioReactor::new()?;
    let accepter = reactor.listen(&cli.listen)?;

    let mut listener = ListenerBuilder::new()
        .spawn(cli.gateway)
        .require_credentials(cli.require_creds)
        .build(Box::new(accepter))?;

    listener.startup()?;
    info!(
        "listening on {} ({} credentials per caller)",
        cli.listen, cli.require_creds
    );
    listener.run(&mut reactor);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
