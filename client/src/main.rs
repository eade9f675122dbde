use clap::Parser;
use client::discovery;
use client::network::Controller;
use client::presentation::{ConsolePresentation, MoveIntent};
use log::info;
use std::io::{self, BufRead, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server TCP address; skips discovery when given
    #[arg(short = 's', long)]
    server: Option<String>,

    /// Server UDP (unreliable/discovery) port
    #[arg(long, default_value_t = shared::UDP_PORT)]
    udp_port: u16,

    /// Player name (prompted if omitted)
    #[arg(short, long)]
    name: Option<String>,

    /// Discovery window in milliseconds
    #[arg(long, default_value_t = shared::DISCOVERY_TIMEOUT_MS)]
    discovery_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let tcp_addr = match args.server {
        Some(ref server) => parse_server_addr(server)?,
        None => choose_server(args.udp_port, args.discovery_timeout).await?,
    };

    let name = match args.name {
        Some(name) => name,
        None => prompt("Name: ")?,
    };
    if name.trim().is_empty() {
        eprintln!("A player name is required");
        std::process::exit(1);
    }

    info!("Connecting to {} as {}", tcp_addr, name.trim());
    println!("Move with w/a/s/d lines (combine for diagonals, e.g. 'wd').");
    println!("Uppercase confirms the move so the server persists it (e.g. 'W').");

    let (intent_tx, intent_rx) = mpsc::unbounded_channel();
    spawn_input_reader(intent_tx);

    let mut controller = Controller::new(
        tcp_addr,
        args.udp_port,
        &name,
        ConsolePresentation,
        intent_rx,
    );
    controller.run().await
}

/// Discovery-first host selection, falling back to manual entry when the
/// probe window returns nothing (or the user declines the list).
async fn choose_server(
    udp_port: u16,
    timeout_ms: u64,
) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    println!("Searching for servers ({} ms)...", timeout_ms);
    let servers = discovery::discover(udp_port, timeout_ms).await?;

    if servers.is_empty() {
        println!("No servers found.");
        let host = prompt("Host: ")?;
        return parse_server_addr(&host);
    }

    for (i, (name, addr)) in servers.iter().enumerate() {
        println!("  [{}] {} ({})", i + 1, name, addr.ip());
    }
    let choice = prompt("Select server (number, or a host address): ")?;

    if let Ok(index) = choice.trim().parse::<usize>() {
        if let Some((_, addr)) = servers.get(index.wrapping_sub(1)) {
            return Ok(SocketAddr::new(addr.ip(), shared::TCP_PORT));
        }
    }
    parse_server_addr(&choice)
}

fn parse_server_addr(input: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    let input = input.trim();
    // Bare host gets the fixed reliable port.
    let candidate = if input.contains(':') {
        input.to_string()
    } else {
        format!("{}:{}", input, shared::TCP_PORT)
    };
    candidate
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("cannot resolve '{}'", input).into())
}

fn prompt(label: &str) -> io::Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Turns stdin lines into move intents on a plain thread; stdin has no
/// async story worth the trouble here.
fn spawn_input_reader(intent_tx: mpsc::UnboundedSender<MoveIntent>) {
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if let Some(intent) = parse_intent(&line) {
                if intent_tx.send(intent).is_err() {
                    break;
                }
            }
        }
    });
}

/// `w/a/s/d` for up/left/down/right, combined for diagonals; any uppercase
/// letter marks the move as confirmed (persisted by the server).
fn parse_intent(line: &str) -> Option<MoveIntent> {
    let line = line.trim();
    if line.is_empty() || line.len() > 2 {
        return None;
    }

    let finished = line.chars().any(|c| c.is_ascii_uppercase());
    let mut dx = 0;
    let mut dy = 0;
    for c in line.chars() {
        match c.to_ascii_lowercase() {
            'w' => dy = -1,
            's' => dy = 1,
            'a' => dx = -1,
            'd' => dx = 1,
            _ => return None,
        }
    }

    if (dx, dy) == (0, 0) {
        return None;
    }
    Some(MoveIntent { dx, dy, finished })
}
