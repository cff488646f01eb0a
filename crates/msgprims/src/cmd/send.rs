use msgprims_peer::connect;
use msgprims_peer::envelope::shape_tag;

use crate::cmd::{parse_duration, Context, SendArgs};
use crate::exit::{peer_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_record, RecordKind};

pub async fn run(args: SendArgs, ctx: &Context) -> CliResult<i32> {
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let payload = args.payload.resolve()?;

    let (peer, _events) = connect(&args.endpoint, ctx.config.clone())
        .await
        .map_err(|err| peer_error("connect failed", err))?;

    if args.wait {
        let reply = peer
            .send_with_callback(&payload)
            .await
            .map_err(|err| peer_error("send failed", err))?;
        let data = tokio::time::timeout(wait_timeout, reply)
            .await
            .map_err(|_| {
                CliError::new(
                    TIMEOUT,
                    format!("no reply within {}", args.wait_timeout),
                )
            })?
            .map_err(|err| peer_error("receive failed", err))?;
        print_record(
            RecordKind::Reply,
            peer.id(),
            Some(shape_tag(&data)),
            &data,
            ctx.format,
        );
    } else {
        let sent = match &args.type_name {
            Some(type_name) => peer.send_typed(type_name, &payload).await,
            None => peer.send(&payload).await,
        };
        sent.map_err(|err| peer_error("send failed", err))?;
    }

    peer.close();
    Ok(SUCCESS)
}
