use clap::{Parser, Subcommand};
use nostr_sdk::prelude::*;
use tracing_subscriber::EnvFilter;

use jurai::config::{Config, ConfigError};
use jurai::supervisor;

#[derive(Parser)]
#[command(name = "jurai")]
#[command(about = "Nostr AI assistant that answers DMs and mentions via Ollama")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent (default)
    Run,
    /// Generate a new Nostr keypair and print it
    Keygen,
    /// Show the identity derived from PRIVATE_KEY
    Whoami,
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_agent().await,
        Commands::Keygen => cmd_keygen(),
        Commands::Whoami => cmd_whoami(),
    }
}

async fn run_agent() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(ConfigError::MissingKey) => {
            eprintln!(
                "The environment variable \"PRIVATE_KEY\" is not set. \
                 Generating a new one for you, set it as env var:"
            );
            print_keypair(&Keys::generate());
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = supervisor::run(&config).await {
        tracing::error!("Fatal: {:#}", e);
        std::process::exit(1);
    }

    // Graceful interrupt path: connections are already closed.
    std::process::exit(1);
}

fn cmd_keygen() {
    println!("🔑 New Nostr keypair generated:\n");
    print_keypair(&Keys::generate());
}

fn cmd_whoami() {
    let key_str = match std::env::var("PRIVATE_KEY") {
        Ok(s) if !s.trim().is_empty() => s,
        _ => {
            eprintln!("{}", ConfigError::MissingKey);
            std::process::exit(1);
        }
    };
    match Keys::parse(key_str.trim()) {
        Ok(keys) => {
            let pk = keys.public_key();
            println!("🔑 Nostr identity:\n");
            println!("  npub: {}", pk.to_bech32().unwrap_or_else(|_| pk.to_hex()));
            println!("  hex:  {}", pk.to_hex());
        }
        Err(e) => {
            eprintln!("invalid private key: {e}");
            std::process::exit(1);
        }
    }
}

fn print_keypair(keys: &Keys) {
    let sk = keys.secret_key();
    let pk = keys.public_key();
    println!(
        "Private key: {}",
        sk.to_bech32().unwrap_or_else(|_| sk.to_secret_hex())
    );
    println!(
        "Public key: {}",
        pk.to_bech32().unwrap_or_else(|_| pk.to_hex())
    );
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
