use std::path::PathBuf;

use anyhow::bail;
use clap::{Parser, Subcommand};
use tally::{
    protocol::parse_datagram,
    rpc::{RpcClient, STATUS_OK},
    util::get_socket_path,
};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Socket path (defaults to TALLY_SOCKET or /tmp/tally.sock)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Submit raw datagrams, e.g. `http.response.500:1|c`
    Send { datagrams: Vec<String> },

    /// Increment a counter
    Incr { metric: String },

    /// Decrement a counter
    Decr { metric: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let datagrams = match args.command {
        Command::Send { datagrams } => datagrams,
        Command::Incr { metric } => vec![format!("{metric}:1|c")],
        Command::Decr { metric } => vec![format!("{metric}:-1|c")],
    };

    for datagram in &datagrams {
        if let Err(e) = parse_datagram(datagram) {
            bail!("invalid datagram {datagram:?}: {e}");
        }
    }

    let socket = args.socket.unwrap_or_else(get_socket_path);
    let mut client = RpcClient::connect(&socket).await?;

    for datagram in &datagrams {
        let status = client.call_metric(datagram).await?;
        if status != STATUS_OK {
            bail!("server rejected {datagram:?} with status {status}");
        }
        println!("{datagram}");
    }

    Ok(())
}
