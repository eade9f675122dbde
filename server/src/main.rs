use clap::Parser;
use log::info;
use server::network::Server;
use server::store::FileStore;
use std::io::{self, BufRead, Write};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind both channels to
    #[arg(short = 'H', long, default_value = "0.0.0.0")]
    host: String,

    /// Reliable channel port
    #[arg(long, default_value_t = shared::TCP_PORT)]
    tcp_port: u16,

    /// Unreliable/discovery channel port
    #[arg(long, default_value_t = shared::UDP_PORT)]
    udp_port: u16,

    /// Server name announced to discovery probes (prompted if omitted)
    #[arg(short, long)]
    name: Option<String>,

    /// Directory holding player records
    #[arg(long, default_value = "characters")]
    characters: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let name = match args.name {
        Some(name) => name,
        None => prompt_server_name()?,
    };
    if name.trim().is_empty() {
        eprintln!("A server name is required");
        std::process::exit(1);
    }

    info!("Starting server '{}'", name.trim());
    let store = FileStore::new(&args.characters);
    let mut server = Server::bind(
        &args.host,
        args.tcp_port,
        args.udp_port,
        name.trim().to_string(),
        Box::new(store),
    )
    .await?;

    server.run().await
}

fn prompt_server_name() -> io::Result<String> {
    print!("Enter server name: ");
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
