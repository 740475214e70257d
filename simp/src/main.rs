//! Entry point for `simp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client** mode.
//! All protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing) and the terminal side of the chat.

use std::io::{self, BufRead, Write};
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::net::lookup_host;

use simp::{codec, Chat, Client, Message, Server, SessionConfig, Socket};

/// Chat over the SIMP protocol.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Wait for one client and chat with it.
    Server(Endpoint),
    /// Connect to a server and chat.
    Client(Endpoint),
}

#[derive(Args)]
struct Endpoint {
    /// Host to bind (server) or connect to (client).
    host: String,
    /// UDP port.
    port: u16,
    /// Display name; prompted for when omitted.
    #[arg(short, long, env = "SIMP_NAME")]
    name: Option<String>,
    /// Seconds to wait for any single response.
    #[arg(long, env = "SIMP_TIMEOUT", default_value_t = 5)]
    timeout: u64,
    /// Retransmissions of an unacknowledged chat message.
    #[arg(long, env = "SIMP_RETRIES", default_value_t = 1)]
    retries: u32,
}

impl Endpoint {
    fn config(&self) -> SessionConfig {
        SessionConfig::default()
            .with_timeout(Duration::from_secs(self.timeout))
            .with_max_retries(self.retries)
    }

    async fn resolve(&self) -> Result<SocketAddr> {
        lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .with_context(|| format!("cannot resolve {}:{}", self.host, self.port))
    }

    /// Display name, checked against the `user` header field up front so a
    /// bad name fails before any socket is bound.
    fn name(&self) -> Result<String> {
        let name = match &self.name {
            Some(name) => name.clone(),
            None => prompt("Enter your name: ")?.context("no name given")?,
        };
        codec::check_user(&name).with_context(|| format!("invalid name {name:?}"))?;
        Ok(name)
    }
}

/// Terminal side of the chat: stdin for input, stdout for output.
struct Terminal;

impl Chat for Terminal {
    fn compose(&mut self) -> Option<String> {
        prompt("Enter your message: ").ok().flatten()
    }

    fn display(&mut self, message: &Message) {
        println!("{message}");
    }

    fn notice(&mut self, text: &str) {
        println!("{text}");
    }
}

/// Print `label` and read one line; `None` at end of input.
fn prompt(label: &str) -> Result<Option<String>> {
    print!("{label}");
    io::stdout().flush()?;
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Ok(None);
    }
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

fn ask_operator(candidate: SocketAddr, user: &str) -> bool {
    let question = format!("{candidate} ({user}) wants to connect. Accept? (y/n): ");
    matches!(prompt(&question), Ok(Some(answer)) if answer.trim() == "y")
}

async fn run_server(endpoint: Endpoint) -> Result<()> {
    let bind = endpoint.resolve().await?;
    let name = endpoint.name()?;
    let socket = Socket::bind(bind).await?;
    println!("Welcome {name}");
    println!("Listening on {}", socket.local_addr);

    let mut server = Server::new(socket, name, ask_operator, endpoint.config());
    server.run(&mut Terminal).await?;
    Ok(())
}

async fn run_client(endpoint: Endpoint) -> Result<()> {
    let server = endpoint.resolve().await?;
    let name = endpoint.name()?;
    let local: SocketAddr = if server.is_ipv4() {
        "0.0.0.0:0".parse()?
    } else {
        "[::]:0".parse()?
    };
    let socket = Socket::bind(local).await?;
    println!("Hello {name}");

    let mut client = Client::new(socket, server, name, endpoint.config());
    client.run(&mut Terminal).await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let result = match cli.mode {
        Mode::Server(endpoint) => {
            log::info!("Starting server on {}:{}", endpoint.host, endpoint.port);
            run_server(endpoint).await
        }
        Mode::Client(endpoint) => {
            log::info!("Starting client, connecting to {}:{}", endpoint.host, endpoint.port);
            run_client(endpoint).await
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
