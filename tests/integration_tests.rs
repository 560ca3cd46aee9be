//! Integration tests for the session layer over real localhost sockets.
//!
//! These tests validate the join/rejoin protocol, the relay and the
//! disconnection barrier end to end: a bound server, real TCP clients,
//! and the actual wire frames in between.

use client::network::{Client, JoinError};
use serde_json::json;
use server::network::Server;
use shared::{ID_SUFFIX_LENGTH, JOIN_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

const POLL: Duration = Duration::from_millis(10);
const DEADLINE: Duration = Duration::from_secs(2);

async fn bind_server(players: usize) -> (Arc<Server>, String) {
    let server = Server::bind("127.0.0.1:0", players, JOIN_TIMEOUT)
        .await
        .expect("failed to bind test server");
    let addr = server.local_addr().to_string();
    (Arc::new(server), addr)
}

/// HANDSHAKE PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    #[tokio::test]
    async fn player_joins_get_sequential_slots_until_declined() {
        let (_server, addr) = bind_server(2).await;

        let first = Client::connect_player(&addr, None).await.unwrap();
        let second = Client::connect_player(&addr, None).await.unwrap();

        assert!(first.identity().starts_with("0#"));
        assert!(second.identity().starts_with("1#"));
        assert_ne!(first.identity(), second.identity());
        assert_eq!(first.identity().len(), 2 + ID_SUFFIX_LENGTH);

        let declined = Client::connect_player(&addr, None).await;
        assert!(matches!(
            declined,
            Err(JoinError::Declined {
                request: "PLAYER_JOIN"
            })
        ));
    }

    #[tokio::test]
    async fn graphics_joins_are_always_approved() {
        let (_server, addr) = bind_server(1).await;

        for _ in 0..3 {
            let spectator = Client::connect_graphics(&addr).await.unwrap();
            assert!(spectator.identity().starts_with("x#"));
        }
    }

    #[tokio::test]
    async fn rejoin_token_of_a_live_player_is_declined() {
        let (_server, addr) = bind_server(1).await;

        let player = Client::connect_player(&addr, None).await.unwrap();
        let token = player.identity().to_string();

        let rejoin = Client::connect_player(&addr, Some(token)).await;
        assert!(matches!(
            rejoin,
            Err(JoinError::Declined {
                request: "PLAYER_REJOIN"
            })
        ));
        assert!(player.is_alive());
    }

    #[tokio::test]
    async fn rejoin_with_an_unknown_token_is_declined() {
        let (_server, addr) = bind_server(1).await;

        let rejoin = Client::connect_player(&addr, Some("0#zzzzzz".to_string())).await;
        assert!(matches!(rejoin, Err(JoinError::Declined { .. })));
    }
}

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    #[tokio::test]
    async fn dropped_player_can_rejoin_with_its_token() {
        let (server, addr) = bind_server(1).await;

        let player = Client::connect_player(&addr, None).await.unwrap();
        let token = player.identity().to_string();
        server.wait_for_players().await;

        drop(player);
        let deadline = Instant::now() + DEADLINE;
        while server.n_players_connected().await != 0 {
            assert!(
                Instant::now() < deadline,
                "server never noticed the disconnect"
            );
            sleep(POLL).await;
        }

        let rejoined = Client::connect_player(&addr, Some(token.clone()))
            .await
            .unwrap();
        assert_eq!(rejoined.identity(), token);

        timeout(DEADLINE, server.wait_for_players())
            .await
            .expect("rejoin should refill the player slots");
    }

    #[tokio::test]
    async fn join_timeout_drops_idle_sockets_and_keeps_accepting() {
        let server = Server::bind("127.0.0.1:0", 1, Duration::from_millis(100))
            .await
            .unwrap();
        let addr = server.local_addr().to_string();

        // A connection that never sends its join request gets hung up on
        // without any reply.
        let mut idle = TcpStream::connect(&addr).await.unwrap();
        let mut buffer = [0u8; 64];
        let read = timeout(DEADLINE, idle.read(&mut buffer))
            .await
            .expect("server should close the idle socket")
            .unwrap();
        assert_eq!(read, 0);

        // The acceptor is released and the next join proceeds normally.
        let player = timeout(DEADLINE, Client::connect_player(&addr, None))
            .await
            .expect("acceptor should be unblocked after the timeout")
            .unwrap();
        assert!(player.identity().starts_with("0#"));
    }
}

/// GAME/INPUT RELAY TESTS
mod relay_tests {
    use super::*;

    #[tokio::test]
    async fn game_broadcast_reaches_players_and_graphics() {
        let (server, addr) = bind_server(1).await;

        let player = Client::connect_player(&addr, None).await.unwrap();
        let spectator = Client::connect_graphics(&addr).await.unwrap();

        let game = json!({"tick": 1, "board": [0, 1, 0]});
        server.send_game(&game).await;
        server.send_game(&json!({"tick": 2, "board": [1, 1, 0]})).await;

        // Both broadcasts reach both roles; a drain only ever moves
        // forward, so the second tick is the last value observed.
        for client in [&player, &spectator] {
            let deadline = Instant::now() + DEADLINE;
            loop {
                match client.get_game().await {
                    Some(value) if value["tick"] == json!(2) => break,
                    Some(value) => assert_eq!(value["tick"], json!(1)),
                    None => {}
                }
                assert!(Instant::now() < deadline, "game value never arrived");
                sleep(POLL).await;
            }
        }
    }

    #[tokio::test]
    async fn inputs_arrive_deduplicated_at_the_player_slot() {
        let (server, addr) = bind_server(2).await;

        let first = Client::connect_player(&addr, None).await.unwrap();
        let _second = Client::connect_player(&addr, None).await.unwrap();

        first.send_inputs(vec!["left".into(), "left".into(), "jump".into()]);
        first.send_inputs(vec!["jump".into(), "right".into()]);

        let deadline = Instant::now() + DEADLINE;
        let mut collected: Vec<String> = Vec::new();
        while collected.len() < 3 {
            assert!(Instant::now() < deadline, "inputs never arrived");
            sleep(POLL).await;
            let batch = server.collect_inputs().await.remove(0);
            for (position, token) in batch.iter().enumerate() {
                assert!(
                    !batch[..position].contains(token),
                    "duplicate token within one drain"
                );
            }
            for token in batch {
                if !collected.contains(&token) {
                    collected.push(token);
                }
            }
        }
        assert_eq!(collected, vec!["left", "jump", "right"]);

        // The next drain starts fresh.
        first.send_inputs(vec!["left".into()]);
        let deadline = Instant::now() + DEADLINE;
        loop {
            let inputs = server.collect_inputs().await;
            assert!(inputs[1].is_empty());
            if inputs[0] == vec!["left".to_string()] {
                break;
            }
            assert!(inputs[0].is_empty(), "stale tokens leaked into the drain");
            assert!(Instant::now() < deadline, "second batch never arrived");
            sleep(POLL).await;
        }
    }
}

/// DISCONNECTION BARRIER TESTS
mod barrier_tests {
    use super::*;

    #[tokio::test]
    async fn disconnection_pauses_the_session_until_the_player_returns() {
        let (server, addr) = bind_server(2).await;

        let first = Client::connect_player(&addr, None).await.unwrap();
        let second = Client::connect_player(&addr, None).await.unwrap();
        let spectator = Client::connect_graphics(&addr).await.unwrap();
        let token = first.identity().to_string();
        server.wait_for_players().await;

        drop(first);
        let deadline = Instant::now() + DEADLINE;
        while server.n_players_connected().await != 1 {
            assert!(
                Instant::now() < deadline,
                "server never noticed the disconnect"
            );
            sleep(POLL).await;
        }

        let barrier = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.handle_disconnections().await })
        };

        // Every surviving connection is told about the break.
        for client in [&second, &spectator] {
            let deadline = Instant::now() + DEADLINE;
            while !client.take_disconnection_break().await {
                assert!(
                    Instant::now() < deadline,
                    "DISCONNECTION_BREAK never arrived"
                );
                sleep(POLL).await;
            }
        }

        // The barrier holds while the slot is dark.
        sleep(Duration::from_millis(50)).await;
        assert!(!barrier.is_finished());

        let rejoined = Client::connect_player(&addr, Some(token.clone()))
            .await
            .unwrap();
        assert_eq!(rejoined.identity(), token);

        timeout(DEADLINE, barrier)
            .await
            .expect("barrier should release after the rejoin")
            .unwrap();
    }

    #[tokio::test]
    async fn barrier_is_a_no_op_while_all_players_are_connected() {
        let (server, addr) = bind_server(1).await;
        let _player = Client::connect_player(&addr, None).await.unwrap();
        server.wait_for_players().await;

        timeout(DEADLINE, server.handle_disconnections())
            .await
            .expect("barrier must return immediately with no dropped player");
    }
}
