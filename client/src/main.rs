use clap::Parser;
use client::network::Client;
use client::token_cache::TokenCache;
use log::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short = 's', long, default_value = "ws://127.0.0.1:8080")]
    server: String,

    /// Path of the token cache used to resume a previous session
    #[arg(short = 't', long, default_value = "token.txt")]
    token_file: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let args = Args::parse();

    info!("Connecting to: {}", args.server);

    let mut client = Client::new(&args.server, TokenCache::new(&args.token_file));
    client.run().await
}
