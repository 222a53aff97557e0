//! Ping-pong demo - request/response over a frisbee connection.
//!
//! Starts a TCP accept loop and a client in the same process. The server
//! answers every PING with a PONG carrying the same id; the client fires a
//! batch of pings and waits for the replies.
//!
//! ```sh
//! cargo run --example ping_pong
//! ```

use std::sync::Arc;
use std::time::Instant;

use frisbee::router::route;
use frisbee::{Action, Client, Conn, Message, Options, Packet, Router};
use tokio::net::TcpListener;

const PING: u32 = 16;
const PONG: u32 = 17;
const COUNT: u64 = 10_000;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    // Accept loop: the listener side is plain tokio; frisbee takes over per
    // accepted stream.
    tokio::spawn(async move {
        let router = Arc::new(Router::new().with_heartbeat_echo().register(
            PING,
            |message: Message, _content| async move {
                let reply = Message {
                    id: message.id,
                    operation: PONG,
                    ..Default::default()
                };
                (Some(Packet::empty(reply)), Action::None)
            },
        ));
        loop {
            let Ok((stream, peer)) = listener.accept().await else {
                return;
            };
            let span = tracing::info_span!("server_conn", %peer);
            let conn = Conn::wrap_tcp(stream, span);
            let router = router.clone();
            tokio::spawn(async move {
                let _ = route(&conn, &router, None).await;
            });
        }
    });

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let done_tx = std::sync::Mutex::new(Some(done_tx));
    let client_router = Router::new().register(PONG, move |message: Message, _content| {
        let done = if message.id == COUNT {
            done_tx.lock().unwrap().take()
        } else {
            None
        };
        async move {
            if let Some(done) = done {
                let _ = done.send(());
            }
            (None, Action::None)
        }
    });

    let client = Client::new(addr.to_string(), client_router, Options::new());
    client.connect().await?;

    let start = Instant::now();
    for id in 1..=COUNT {
        let ping = Message {
            id,
            operation: PING,
            ..Default::default()
        };
        client.write_message(&ping, None).await?;
    }
    client.flush().await?;

    done_rx.await?;
    let elapsed = start.elapsed();
    println!(
        "{} round trips in {:?} ({:.0}/s)",
        COUNT,
        elapsed,
        COUNT as f64 / elapsed.as_secs_f64()
    );

    client.close().await?;
    Ok(())
}
