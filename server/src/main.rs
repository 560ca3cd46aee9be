use clap::Parser;
use log::info;
use serde_json::json;
use server::network::Server;
use shared::{JOIN_TIMEOUT, N_PLAYER_CLIENTS_NEEDED, UPDATE_INTERVAL};
use tokio::time::interval;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = "127.0.0.1:5555")]
    listen: String,

    /// Number of player clients required before the session starts
    #[arg(short, long, default_value_t = N_PLAYER_CLIENTS_NEEDED)]
    players: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let args = Args::parse();

    let server = Server::bind(&args.listen, args.players, JOIN_TIMEOUT).await?;
    info!("waiting for {} players", args.players);
    server.wait_for_players().await;
    info!("all players connected, starting session");

    // Placeholder game loop: echoes the collected inputs back as the game
    // value. Real deployments replace this with the game simulation.
    let mut ticker = interval(UPDATE_INTERVAL);
    let mut tick: u64 = 0;
    loop {
        ticker.tick().await;

        server.handle_disconnections().await;

        let inputs = server.collect_inputs().await;
        tick += 1;
        server.send_game(&json!({ "tick": tick, "inputs": inputs })).await;
    }
}
