//! Listen for connections and hand each one to a program, the console or
//! a gateway.

use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use gaxgate::{Error, ListenerBuilder, TokioReactor};

#[derive(Parser)]
#[command(
    name = "gaxlisten",
    about = "Hand off inbound connections to a program or the console"
)]
struct Cli {
    /// Connection string to listen on
    #[arg(short, long, default_value = "tcp,localhost,8772")]
    listen: String,

    /// Target opened per connection. `%U`/`%S` expand to the peer callsign
    /// and address; an `rms,` prefix logs in to a Winlink gateway
    #[arg(default_value = "stdio(self)")]
    spawn: String,

    /// Line sent to each caller before relaying starts
    #[arg(short, long)]
    banner: Option<String>,

    /// Gateway login password
    #[arg(short, long)]
    password: Option<String>,
}

fn run(cli: Cli) -> Result<(), Error> {
    let mut reactor = TokioReactor::new()?;
    let accepter = reactor.listen(&cli.listen)?;

    let mut builder = ListenerBuilder::new().spawn(cli.spawn);
    if let Some(banner) = cli.banner {
        builder = builder.banner(banner);
    }
    if let Some(password) = cli.password {
        builder = builder.password(password);
    }
    let mut listener = builder.build(Box::new(accepter))?;

    listener.startup()?;
    info!("listening on {}", cli.listen);
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
