use msgprims_peer::{PeerEvent, Server, ServerEvent};
use tracing::{info, warn};

use crate::cmd::{Context, ListenArgs};
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_record, RecordKind};

pub async fn run(args: ListenArgs, ctx: &Context) -> CliResult<i32> {
    let mut server = Server::bind(&args.endpoint, ctx.config.clone())
        .await
        .map_err(|err| peer_error("bind failed", err))?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut printed = 0usize;

    loop {
        let event = tokio::select! {
            event = server.next_event() => event.map_err(|err| peer_error("accept failed", err))?,
            _ = &mut shutdown => break,
        };
        let ServerEvent::Peer { connection, event } = event else {
            continue;
        };
        let peer = connection.to_string();

        match event {
            PeerEvent::Message {
                data, type_name, ..
            } => {
                print_record(
                    RecordKind::Message,
                    &peer,
                    type_name.as_deref(),
                    &data,
                    ctx.format,
                );
            }
            PeerEvent::Request {
                payload,
                mut writer,
            } => {
                print_record(RecordKind::Request, &peer, None, &payload, ctx.format);
                // Nothing to stream back; end it so the requester is not left waiting.
                if let Err(err) = writer.end().await {
                    warn!(%connection, error = %err, "failed ending request");
                }
            }
            PeerEvent::FrameError(err) => {
                warn!(%connection, error = %err, "skipped undecodable frame");
                continue;
            }
            PeerEvent::Disconnected(reason) => {
                info!(%connection, %reason, "peer disconnected");
                continue;
            }
        }

        printed = printed.saturating_add(1);
        if let Some(count) = args.count {
            if printed >= count {
                break;
            }
        }
    }

    server.close_all();
    Ok(SUCCESS)
}
