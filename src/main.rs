use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use solarlink::modbus::SerialConfig;
use solarlink::util::hex::{decode_hex, split_hex};
use solarlink::{
    decode_response, init_logger_with, log_info, AppConfig, Device, DeviceKind, ReloadablePort,
    Runner, SlaveBus,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "solarlink")]
#[command(about = "Solar charge controller acquisition over Modbus RTU")]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum KindArg {
    Rover,
    PzemShunt,
}

impl From<KindArg> for DeviceKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Rover => DeviceKind::Rover,
            KindArg::PzemShunt => DeviceKind::PzemShunt,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Poll the configured devices until interrupted
    Run {
        #[arg(short, long)]
        config: PathBuf,
        /// Arm an on-request command sequence at startup (repeatable)
        #[arg(long = "request")]
        requests: Vec<String>,
    },
    /// Read one device once and print the reading as JSON
    Read {
        #[arg(short, long)]
        port: String,
        #[arg(short, long)]
        address: u8,
        #[arg(short, long, value_enum, default_value = "rover")]
        kind: KindArg,
        #[arg(short, long, default_value = "9600")]
        baudrate: u32,
    },
    /// Decode a captured RTU response, e.g. "01 03 02 00 64 B9 AF"
    Decode { hex: String },
    /// Validate a configuration file
    CheckConfig {
        #[arg(short, long)]
        config: PathBuf,
    },
}

fn load(path: &PathBuf) -> Result<AppConfig> {
    AppConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger_with(cli.verbose);

    match cli.command {
        Commands::Run { config, requests } => {
            let config = load(&config)?;
            let port = ReloadablePort::open(&config.serial.port, config.serial.line.clone());
            let mut runner = Runner::from_config(&config, port)?;
            for id in &requests {
                runner.engine_mut().request(id, chrono::Utc::now())?;
            }

            let (stop, shutdown) = tokio::sync::watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log_info("Interrupt received");
                    let _ = stop.send(true);
                }
            });
            runner.run(config.handler_chain(), shutdown).await?;
        }
        Commands::Read {
            port,
            address,
            kind,
            baudrate,
        } => {
            let line = SerialConfig {
                baudrate,
                ..SerialConfig::default()
            };
            let timeout = line.response_timeout();
            let mut bus = SlaveBus::new(ReloadablePort::open(&port, line), timeout);
            let reading = Device::new(kind.into(), address, 0).read(&mut bus).await?;
            println!("{}", serde_json::to_string_pretty(&reading)?);
        }
        Commands::Decode { hex } => {
            let bytes = decode_hex(&hex)?;
            match decode_response(&bytes) {
                Ok(frame) => println!(
                    "address: {} function: 0x{:02X} payload: [{}]",
                    frame.address,
                    frame.function,
                    split_hex(&frame.payload)
                ),
                Err(e) => bail!("{:?}: {e}", e.kind()),
            }
        }
        Commands::CheckConfig { config } => {
            let config = load(&config)?;
            println!(
                "ok: {} devices, {} handlers, {} command sequences",
                config.devices.len(),
                config.handlers.len(),
                config.command_sequences.len()
            );
        }
    }

    Ok(())
}
