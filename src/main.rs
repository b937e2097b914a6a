//! wirecall - explorer dan generator untuk registry binary RPC
//!
//! Usage:
//!   wirecall discover
//!   wirecall call 4 name=Ann email=a@x password=pw
//!   wirecall subscribe 3 --duration-secs 5
//!   wirecall generate --out generated/binary_client.rs

use std::cell::Cell;
use std::error::Error as StdError;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};

use wirecall::client::{DynamicClient, ResultBoard, SharedBoard};
use wirecall::core::logging;
use wirecall::generator;
use wirecall::{
    ClientConfig, CommandId, Contract, Dialect, Error, RecordLayout, Session, Strictness,
};

#[derive(Parser, Debug)]
#[command(name = "wirecall", version, about = "Explore and call a self-describing binary RPC registry")]
struct Cli {
    /// Registry host
    #[arg(long, env = "WIRECALL_HOST", default_value = "127.0.0.1", global = true)]
    host: String,

    /// Registry port
    #[arg(short, long, env = "WIRECALL_PORT", default_value_t = 8081, global = true)]
    port: u16,

    /// Framing of unary calls
    #[arg(long, env = "WIRECALL_DIALECT", value_enum, default_value = "http", global = true)]
    dialect: DialectArg,

    /// Discovery record layout
    #[arg(long, env = "WIRECALL_LAYOUT", value_enum, default_value = "current", global = true)]
    layout: LayoutArg,

    /// Reject missing fields and malformed numbers instead of defaulting them
    #[arg(long, env = "WIRECALL_STRICT", global = true)]
    strict: bool,

    /// Give up on a call after this many milliseconds
    #[arg(long, env = "WIRECALL_TIMEOUT_MS", global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the registry's contracts
    Discover,
    /// Call a unary contract with `field=value` inputs
    Call {
        /// Single-character command id
        id: String,
        /// Request fields as `name=value`
        inputs: Vec<String>,
    },
    /// Print records of a stream contract
    Subscribe {
        id: String,
        /// Stop after this many seconds
        #[arg(short, long, default_value_t = 10)]
        duration_secs: u64,
    },
    /// Generate a typed client module from the current contracts
    Generate {
        #[arg(short, long, default_value = "generated/binary_client.rs")]
        out: PathBuf,
        /// Also write here, if the directory exists
        #[arg(long)]
        mirror: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DialectArg {
    Http,
    Raw,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LayoutArg {
    Current,
    Legacy,
}

impl Cli {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.host.clone(), self.port)
            .with_dialect(match self.dialect {
                DialectArg::Http => Dialect::Http,
                DialectArg::Raw => Dialect::Raw,
            })
            .with_layout(match self.layout {
                LayoutArg::Current => RecordLayout::Current,
                LayoutArg::Legacy => RecordLayout::Legacy,
            })
            .with_strictness(if self.strict {
                Strictness::Strict
            } else {
                Strictness::Lenient
            });
        if let Some(ms) = self.timeout_ms {
            config = config.with_call_timeout(Duration::from_millis(ms));
        }
        config
    }
}

fn parse_id(raw: &str) -> Result<CommandId, String> {
    let mut chars = raw.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => {
            CommandId::from_char(c).ok_or_else(|| format!("command id '{}' is not a single byte", c))
        }
        _ => Err(format!("command id must be exactly one character, got '{}'", raw)),
    }
}

fn parse_inputs(raw: &[String]) -> Result<Vec<(String, String)>, String> {
    raw.iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.trim().to_string(), v.to_string()))
                .ok_or_else(|| format!("input '{}' is not in name=value form", pair))
        })
        .collect()
}

fn print_contracts(contracts: &[Contract]) {
    println!("{:<3} {:<24} {:<7} {:>6}  schema", "id", "name", "kind", "size");
    for c in contracts {
        let size = match c.response_size {
            0 => "var".to_string(),
            n => n.to_string(),
        };
        println!("{:<3} {:<24} {:<7} {:>6}  {}", c.id, c.name, c.kind.as_str(), size, c.response_schema);
        if !c.request_schema.is_empty() {
            println!("{:<3} {:<24} {:<7} {:>6}  request: {}", "", "", "", "", c.request_schema);
        }
    }
}

fn print_board(board: &ResultBoard) {
    println!("status: {}", board.status());
    if let Some(entry) = board.entries().first() {
        println!("[{}] {}", entry.received_at.format("%H:%M:%S"), entry.command);
        print!("{}", entry.response.render());
        println!("hex:   {}", entry.response.hex());
        println!("ascii: {}", entry.response.printable());
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn StdError>> {
    let config = cli.client_config();
    let session = Session::open(config.clone()).map_err(Error::from)?;
    let mut client = DynamicClient::new(session, config.layout, config.strictness);
    let board: SharedBoard = ResultBoard::shared();

    board.borrow_mut().begin_discovery();
    let discovered = client.discover().map(<[Contract]>::to_vec);
    board.borrow_mut().finish_discovery(&discovered);
    let contracts = match discovered {
        Ok(contracts) => contracts,
        Err(e) => {
            println!("status: {}", board.borrow().status());
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Discover => {
            println!("status: {}", board.borrow().status());
            print_contracts(&contracts);
        }
        Command::Call { id, inputs } => {
            let id = parse_id(&id)?;
            let inputs = parse_inputs(&inputs)?;
            if let Some(contract) = client.contract(id) {
                board.borrow_mut().begin_call(contract);
                println!("status: {}", board.borrow().status());
            }
            match client.call(id, &inputs) {
                Ok(response) => {
                    board.borrow_mut().finish_call(Ok(response));
                    print_board(&board.borrow());
                }
                Err(e) => {
                    board.borrow_mut().finish_call(Err(&e));
                    print_board(&board.borrow());
                    return Err(e.into());
                }
            }
        }
        Command::Subscribe { id, duration_secs } => {
            let id = parse_id(&id)?;
            let sink = board.clone();
            let received = Rc::new(Cell::new(0usize));
            let counter = received.clone();
            let subscription = client
                .subscribe(id, move |response| {
                    let line = match &response.decoded {
                        Ok(record) => record
                            .iter()
                            .map(|(name, value)| format!("{}={}", name, value))
                            .collect::<Vec<_>>()
                            .join(" "),
                        Err(e) => format!("decode failed: {}", e),
                    };
                    println!("{} {}", response.command, line);
                    counter.set(counter.get() + 1);
                    sink.borrow_mut().record_stream(response);
                })?;

            client.run_for(Duration::from_secs(duration_secs))?;
            if let Some(reason) = subscription.last_error() {
                println!("stream ended: {}", reason);
            }
            subscription.unsubscribe();
            // Let the close frame go out.
            client.run_for(Duration::from_millis(50))?;
            println!("status: {}", board.borrow().status());
            println!("{} records received", received.get());
        }
        Command::Generate { out, mirror } => {
            let source = generator::generate(&contracts, chrono::Utc::now());
            let written = generator::write_artifact(&source, &out, mirror.as_deref())?;
            for path in written {
                println!("proxy written to {}", path.display());
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    logging::init("info");
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<Error>() {
                Some(err) => eprintln!("❌ {} ({})", err, err.class()),
                None => eprintln!("❌ {}", e),
            }
            ExitCode::FAILURE
        }
    }
}
