//! `peerchat` -- line-mode chat client.
//!
//! Joins one room and relays stdin lines to it. Configuration via CLI flags,
//! environment variables, or config file (`~/.config/peerchat/config.toml`).
//!
//! ```bash
//! # Offline (a private in-process network, nobody else to talk to)
//! cargo run --bin peerchat
//!
//! # Connect to a hub
//! cargo run --bin peerchat -- --hub-url ws://127.0.0.1:9000/ws \
//!     --name alice --room rust
//! ```

use std::path::Path;
use std::process;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use peerchat::config::{CliArgs, ClientConfig};
use peerchat::console::{self, Command};
use peerchat::room::{RelayError, RoomChannels, RoomRelay};
use peerchat::transport::PubSub;
use peerchat::transport::hub::HubHost;
use peerchat::transport::memory::MemoryNetwork;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e}");
            process::exit(1);
        }
    };

    let _log_guard = init_logging(&config.log_level, config.log_file.as_deref());
    tracing::info!(peer_id = %config.peer_id, "peerchat starting");

    let result = if let Some(hub_url) = &config.hub_url {
        match HubHost::connect(hub_url, config.local_peer_id(), &config.hub_client_config()).await
        {
            Ok(host) => run(&host, &config).await,
            Err(e) => {
                eprintln!("Error: could not connect to hub {hub_url}: {e}");
                process::exit(1);
            }
        }
    } else {
        println!("no hub configured, chatting offline");
        let host = MemoryNetwork::new().host(config.local_peer_id());
        run(&host, &config).await
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }

    tracing::info!("peerchat exiting");
}

/// Initialize file-based logging.
///
/// Stdout belongs to the chat, so logs go to a file. The returned guard must
/// be held until shutdown so buffered entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("peerchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Joins the configured room on `host` and runs the input/output loop until
/// `/quit` or end of input.
async fn run<H: PubSub>(host: &H, config: &ClientConfig) -> Result<(), RelayError> {
    let (relay, channels) =
        RoomRelay::join(host, &config.name, &config.room, &config.relay_config()).await?;
    let RoomChannels {
        mut inbound,
        outbound,
        mut logs,
    } = channels;

    println!(
        "joined {} as {} ({})",
        relay.room_name(),
        relay.user_name(),
        relay.self_id()
    );
    println!("{}", console::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut inbound_open = true;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to read stdin");
                        break;
                    }
                };
                match Command::parse(&line) {
                    Command::Say(text) => {
                        let sent = console::send_line(&outbound, text, &mut logs, |event| {
                            println!("{}", console::render_log(event));
                        })
                        .await;
                        if !sent {
                            break;
                        }
                    }
                    Command::Name(name) => {
                        relay.update_user(name);
                        println!("you are now {}", relay.user_name());
                    }
                    Command::Peers => println!("{}", console::render_peers(&relay.peer_list())),
                    Command::Quit => break,
                    Command::Help => println!("{}", console::HELP),
                    Command::Empty => {}
                }
            }
            msg = inbound.recv(), if inbound_open => {
                if let Some(envelope) = msg {
                    let now = chrono::Local::now();
                    println!("{}", console::render_message(&envelope, &now, &config.timestamp_format));
                } else {
                    inbound_open = false;
                }
            }
            Some(event) = logs.recv() => println!("{}", console::render_log(&event)),
        }
    }

    relay.exit().await;
    Ok(())
}
