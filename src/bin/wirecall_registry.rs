//! wirecall Registry Binary
//!
//! Menjalankan registry dengan demo contracts:
//! - Discovery (`?`) dengan record 128 atau 100 byte
//! - Unary command lewat raw TCP atau HTTP
//! - Stream `LiveTelemetry` lewat WebSocket (~60Hz)
//!
//! Usage:
//!   cargo run --release --bin wirecall_registry [OPTIONS]

use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;

use wirecall::core::logging;
use wirecall::registry::{demo, RegistryServer};
use wirecall::{RecordLayout, RegistryConfig};

#[derive(Parser, Debug)]
#[command(name = "wirecall_registry", version, about = "Demo registry for the wirecall protocol")]
struct Args {
    /// Bind address
    #[arg(short, long, env = "WIRECALL_BIND", default_value = "0.0.0.0:8081")]
    bind: String,

    /// Stream broadcast interval in milliseconds
    #[arg(long, env = "WIRECALL_TICK_MS", default_value_t = 16)]
    tick_ms: u64,

    /// Serve the 100-byte legacy discovery records
    #[arg(long, env = "WIRECALL_LEGACY")]
    legacy: bool,
}

impl From<Args> for RegistryConfig {
    fn from(args: Args) -> Self {
        Self {
            bind_addr: args.bind,
            tick: Duration::from_millis(args.tick_ms.max(1)),
            layout: if args.legacy {
                RecordLayout::Legacy
            } else {
                RecordLayout::Current
            },
        }
    }
}

fn run_server(config: RegistryConfig) -> Result<(), Box<dyn std::error::Error>> {
    let registry = demo::registry(Instant::now())?;
    for contract in registry.contracts() {
        info!(
            id = %contract.id,
            name = %contract.name,
            kind = contract.kind.as_str(),
            "contract registered"
        );
    }

    let mut server = RegistryServer::bind(registry, config)?;
    server.run()?;
    Ok(())
}

fn main() -> ExitCode {
    logging::init("info");
    let config = RegistryConfig::from(Args::parse());

    match run_server(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ Registry error: {}", e);
            ExitCode::FAILURE
        }
    }
}
