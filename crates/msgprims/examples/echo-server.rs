//! Minimal echo server: accepts peers and echoes every message back.
//!
//! Run with:
//!   cargo run --example echo-server --features peer
//!
//! In another terminal:
//!   cargo run --features cli -- send /tmp/msgprims-echo-<pid>/echo.sock \
//!     --json '{"hello":"world"}' --wait --wait-timeout 3s

use msgprims::peer::{PeerConfig, PeerEvent, Server, ServerEvent};
use msgprims::transport::Endpoint;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let sock_dir = std::env::temp_dir().join(format!("msgprims-echo-{}", std::process::id()));
    std::fs::create_dir_all(&sock_dir)?;
    let endpoint = Endpoint::Unix(sock_dir.join("echo.sock"));

    let mut server = Server::bind(&endpoint, PeerConfig::default()).await?;
    eprintln!("Listening on {endpoint}");

    loop {
        match server.next_event().await? {
            ServerEvent::Connected { connection, remote } => {
                eprintln!("Peer connected: {connection} ({remote})");
            }
            ServerEvent::Peer { connection, event } => match event {
                PeerEvent::Message {
                    data,
                    reply: Some(reply),
                    ..
                } => reply.send(&data).await?,
                PeerEvent::Message { data, .. } => server.send_to(connection, &data).await?,
                PeerEvent::Request {
                    payload,
                    mut writer,
                } => {
                    writer.send(&payload).await?;
                    writer.end().await?;
                }
                PeerEvent::FrameError(err) => eprintln!("{connection}: bad frame: {err}"),
                PeerEvent::Disconnected(reason) => {
                    eprintln!("Peer disconnected: {connection} ({reason})");
                }
            },
        }
    }
}
