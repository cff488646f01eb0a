use msgprims_peer::{ConnectionId, PeerEvent, Server, ServerEvent};
use tracing::{info, warn};

use crate::cmd::{Context, EchoArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};

pub async fn run(args: EchoArgs, ctx: &Context) -> CliResult<i32> {
    let mut server = Server::bind(&args.endpoint, ctx.config.clone())
        .await
        .map_err(|err| peer_error("bind failed", err))?;
    if let Ok(endpoint) = server.local_endpoint() {
        info!(%endpoint, "echo server ready");
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let event = tokio::select! {
            event = server.next_event() => event.map_err(|err| peer_error("accept failed", err))?,
            _ = &mut shutdown => {
                info!("interrupted; shutting down");
                break;
            }
        };
        if let ServerEvent::Peer { connection, event } = event {
            echo(&server, connection, event).await;
        }
    }

    server.close_all();
    Ok(SUCCESS)
}

/// Messages come back as they were sent, callbacks are answered with their
/// own data, requests get their payload streamed back as a single packet.
async fn echo(server: &Server, connection: ConnectionId, event: PeerEvent) {
    let result = match event {
        PeerEvent::Message {
            data,
            reply: Some(reply),
            ..
        } => {
            info!(%connection, "answering callback");
            reply.send(&data).await
        }
        PeerEvent::Message { data, .. } => {
            info!(%connection, "echoing message");
            server.send_to(connection, &data).await
        }
        PeerEvent::Request {
            payload,
            mut writer,
        } => {
            info!(%connection, stream_id = writer.stream_id(), "echoing request");
            match writer.send(&payload).await {
                Ok(()) => writer.end().await,
                Err(err) => Err(err),
            }
        }
        PeerEvent::FrameError(err) => {
            warn!(%connection, error = %err, "skipped undecodable frame");
            Ok(())
        }
        PeerEvent::Disconnected(reason) => {
            info!(%connection, %reason, "peer disconnected");
            Ok(())
        }
    };
    if let Err(err) = result {
        warn!(%connection, error = %err, "echo failed");
    }
}
