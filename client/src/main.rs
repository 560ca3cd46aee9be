use clap::Parser;
use client::network::Client;
use log::info;
use shared::UPDATE_INTERVAL;
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    server: String,

    /// Join as a graphics (spectator) client instead of a player
    #[arg(long)]
    graphics: bool,

    /// Identity token from a previous session, to reclaim a player slot
    #[arg(long)]
    rejoin: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let client = if args.graphics {
        Client::connect_graphics(&args.server).await?
    } else {
        Client::connect_player(&args.server, args.rejoin).await?
    };
    info!("client id: {}", client.identity());

    // Placeholder observation loop; real deployments merge the received
    // game value into the local simulation and render it.
    let mut ticker = interval(UPDATE_INTERVAL);
    loop {
        ticker.tick().await;

        if !client.is_alive() {
            info!("connection dead, quitting");
            break;
        }
        if client.take_disconnection_break().await {
            info!("session paused, waiting for a player to rejoin");
        }
        if let Some(game) = client.get_game().await {
            info!("game: {}", game);
        }
    }

    Ok(())
}
