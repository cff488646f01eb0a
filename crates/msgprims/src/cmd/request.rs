use msgprims_peer::{connect, ResponseTimeout};
use tracing::debug;

use crate::cmd::{parse_duration, Context, RequestArgs};
use crate::exit::{peer_error, stream_error, CliResult, SUCCESS};
use crate::output::{print_record, RecordKind};

pub async fn run(args: RequestArgs, ctx: &Context) -> CliResult<i32> {
    let timeout = match &args.timeout {
        Some(input) => ResponseTimeout::After(parse_duration(input)?),
        None => ctx.config.response_timeout,
    };
    let payload = args.payload.resolve()?;

    let (peer, _events) = connect(&args.endpoint, ctx.config.clone())
        .await
        .map_err(|err| peer_error("connect failed", err))?;

    let mut stream = peer
        .request_with_timeout(&payload, timeout)
        .await
        .map_err(|err| peer_error("request failed", err))?;

    let mut packets = 0usize;
    while let Some(item) = stream.next().await {
        let data = item.map_err(|err| stream_error("request failed", err))?;
        print_record(RecordKind::Packet, peer.id(), None, &data, ctx.format);
        packets += 1;
    }
    debug!(packets, stream_id = stream.stream_id(), "response stream ended");

    peer.close();
    Ok(SUCCESS)
}
