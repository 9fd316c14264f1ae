//! Bridge radio sessions from a VARA modem to a Winlink gateway.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use gaxgate::error::ConfigError;
use gaxgate::{Error, ModemBuilder, TokioReactor};

#[derive(Parser)]
#[command(name = "varagate", about = "VARA modem to Winlink gateway bridge")]
struct Cli {
    /// Station callsign announced to the modem
    callsign: String,

    /// Modem control port as host:port; the data port is the next one
    #[arg(long, default_value = "localhost:8300")]
    vara: String,

    /// Target opened per radio session; `rms,` logs in to the gateway
    #[arg(short, long, default_value = "rms,tcp,cms.winlink.org,8772")]
    gateway: String,

    /// Gateway login password
    #[arg(short, long)]
    password: Option<String>,

    /// Line sent over the air when a station connects
    #[arg(short, long)]
    banner: Option<String>,

    /// Seconds to wait for the modem to confirm a disconnect
    #[arg(long, default_value_t = 120)]
    disconnect_timeout: u64,
}

fn modem_address(vara: &str) -> Result<(&str, u16), ConfigError> {
    let invalid = || ConfigError::Invalid {
        name: "vara",
        message: format!("expected host:port, got '{vara}'"),
    };
    let (host, port) = vara.rsplit_once(':').ok_or_else(invalid)?;
    let port = port.parse::<u16>().map_err(|_| invalid())?;
    if host.is_empty() || port == u16::MAX {
        return Err(invalid());
    }
    Ok((host, port))
}

fn run(cli: Cli) -> Result<(), Error> {
    let (host, port) = modem_address(&cli.vara)?;

    let mut builder = ModemBuilder::new(cli.callsign)
        .tcp(host, port)
        .gateway(&cli.gateway)
        .disconnect_timeout(Duration::from_secs(cli.disconnect_timeout));
    if let Some(password) = cli.password {
        builder = builder.password(password);
    }
    if let Some(banner) = cli.banner {
        builder = builder.banner(banner);
    }
    let mut modem = builder.build()?;

    let mut reactor = TokioReactor::new()?;
    modem.start(&mut reactor)?;
    info!("connected to modem at {}", cli.vara);
    modem.run(&mut reactor);
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
