//! Sub-stream demo - multiplexed byte transfer.
//!
//! The client opens a sub-stream and pushes a blob through it; the server
//! picks the stream up from its new-stream channel and drains it.
//!
//! ```sh
//! cargo run --example stream
//! ```

use frisbee::{Client, Conn, Options, Router};
use tokio::net::TcpListener;

const STREAM_ID: u64 = 7;
const BLOB_SIZE: usize = 8 << 20;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let server = tokio::spawn(async move {
        let (stream, peer) = listener.accept().await.unwrap();
        let conn = Conn::wrap_tcp(stream, tracing::info_span!("server_conn", %peer));

        let stream_conn = conn.next_stream_conn().await.unwrap();
        println!("server: stream {} opened", stream_conn.id());

        let mut sink = Vec::new();
        let drained = stream_conn.write_to(&mut sink).await.unwrap();
        println!("server: drained {} bytes", drained);
        drained
    });

    let client = Client::new(addr.to_string(), Router::new(), Options::new());
    client.connect().await?;

    let blob: Vec<u8> = (0..BLOB_SIZE).map(|i| (i % 251) as u8).collect();
    let stream_conn = client.new_stream_conn(STREAM_ID)?;
    let mut source = &blob[..];
    let sent = stream_conn.read_from(&mut source).await?;
    stream_conn.close().await?;
    println!("client: sent {} bytes", sent);

    let drained = server.await?;
    assert_eq!(drained, BLOB_SIZE as u64);

    client.close().await?;
    Ok(())
}
