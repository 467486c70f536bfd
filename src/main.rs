use std::net::SocketAddr;

use anyhow::Context;
use clap::{Parser, Subcommand};
use duet::{
    client::{ClientError, ClientUpdate, FailoverController, HttpConnector},
    rooms::Participant,
    server, ChatConfig, RoomError,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(version, about = "Two-person realtime chat")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the chat server.
    Serve {
        /// Overrides DUET_BIND.
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Chat from the terminal. Lines typed are sent; `/quit` leaves.
    Chat {
        #[arg(long)]
        id: u64,
        #[arg(long)]
        name: String,
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut config = ChatConfig::from_env().context("invalid configuration")?;

    match Cli::parse().command {
        Command::Serve { bind } => {
            if let Some(bind) = bind {
                config.bind = bind;
            }
            server::serve(config).await
        }
        Command::Chat { id, name, url } => chat(config, Participant::new(id, name), &url).await,
    }
}

async fn chat(config: ChatConfig, me: Participant, url: &str) -> anyhow::Result<()> {
    let connector = HttpConnector::new(url, &config);
    let mut controller = FailoverController::new(connector, me, &config);

    match controller.start().await {
        Ok(update) => show(&update),
        Err(ClientError::Room(RoomError::RoomFull)) => {
            println!("The room is full, try again later.");
            return Ok(());
        }
        Err(err) => return Err(err).context("could not join the room"),
    }
    println!("Joined as {} over {:?}.", controller.participant().display_name, controller.state());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim() == "/quit" {
                    break;
                }
                match controller.send(&line).await {
                    Ok(_) => {}
                    Err(ClientError::Room(RoomError::EmptyContent)) => {}
                    Err(err) => println!("! message not sent: {err}"),
                }
            }
            update = controller.next_update() => match update {
                Ok(update) => show(&update),
                Err(ClientError::Room(RoomError::RoomFull)) => {
                    println!("Lost our seat: the room filled up while reconnecting.");
                    return Ok(());
                }
                Err(err) => println!("! connection problem: {err}"),
            },
        }
    }

    controller.leave().await.ok();
    println!("Bye.");
    Ok(())
}

fn show(update: &ClientUpdate) {
    for message in &update.messages {
        println!("[{}] {}: {}", message.id, message.author_display_name, message.content);
    }
    if let Some(participants) = &update.participants {
        let names: Vec<_> = participants.iter().map(|p| p.display_name.as_str()).collect();
        println!("-- online: {}", names.join(", "));
    }
}
