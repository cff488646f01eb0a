//! The per-connection task.
//!
//! One task owns everything attached to a connection: the read half, the
//! liveness monitor, pending callbacks and open response streams. Frames,
//! timer ticks, expirations and calls made through a [`PeerHandle`] are all
//! handled in that task, one at a time, so none of this state is locked.
//!
//! Outbound frames are queued to a second task that owns the write half.
//! Reading never waits on a write, so two peers flooding each other cannot
//! stall both connections.
//!
//! The connection task ends when the transport closes, the peer stops
//! answering pings, [`PeerHandle::close`] is called, or every
//! [`PeerHandle`] (including those inside writers and replies) is dropped.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::{SinkExt, StreamExt};
use msgprims_frame::{decode_payload, encode_text, DelimitedCodec, FrameError};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::callback::{CallbackCorrelator, ReplyFuture, Resolver};
use crate::config::{PeerConfig, ResponseTimeout};
use crate::envelope::{DataEnvelope, Envelope, Pong, Request, ResponseBody, ResponsePacket};
use crate::error::{PeerError, Result, StreamError};
use crate::liveness::{unix_millis, LivenessMonitor, PingRecord, Tick};
use crate::registry::TimedRegistry;
use crate::stream::{self, ResponseStream, ResponseWriter, StreamSink};

static NEXT_PEER_ID: AtomicU64 = AtomicU64::new(1);

/// Something the application observed on a connection.
#[derive(Debug)]
pub enum PeerEvent {
    /// Application data. `reply` is set when the sender asked for a
    /// callback reply.
    Message {
        data: Value,
        type_name: Option<String>,
        reply: Option<CallbackReply>,
    },
    /// The remote side opened a streaming request.
    Request {
        payload: Value,
        writer: ResponseWriter,
    },
    /// A frame could not be decoded and was skipped.
    FrameError(FrameError),
    /// The connection is gone. Always the last event.
    Disconnected(DisconnectReason),
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The remote side closed the transport.
    Closed,
    /// Too many consecutive pings went unanswered.
    PeerUnresponsive,
    /// Closed locally through [`PeerHandle::close`], or every handle was
    /// dropped.
    Local,
    /// Reading from or writing to the transport failed.
    Io(String),
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DisconnectReason::Closed => f.write_str("closed by peer"),
            DisconnectReason::PeerUnresponsive => f.write_str("peer unresponsive"),
            DisconnectReason::Local => f.write_str("closed locally"),
            DisconnectReason::Io(err) => write!(f, "transport error: {err}"),
        }
    }
}

/// Snapshot of a connection's bookkeeping.
#[derive(Debug, Clone)]
pub struct PeerStats {
    pub pending_callbacks: usize,
    pub open_streams: usize,
    pub ping_interval: Duration,
    pub recent_pings: Vec<PingRecord>,
}

pub(crate) enum Command {
    Write {
        frame: Bytes,
        ack: oneshot::Sender<Result<()>>,
    },
    WriteWithCallback {
        envelope: DataEnvelope,
        resolver: Resolver,
        ack: oneshot::Sender<Result<()>>,
    },
    OpenStream {
        payload: Value,
        timeout: Option<ResponseTimeout>,
        reply: oneshot::Sender<Result<ResponseStream>>,
    },
    CloseStream {
        stream_id: u64,
    },
    SetPingInterval(Duration),
    Stats(oneshot::Sender<PeerStats>),
    Close,
}

pub(crate) type EventSink = Box<dyn FnMut(PeerEvent) + Send>;

/// One queued frame for the writer task. `ack` learns when it hit the
/// transport.
struct Outbound {
    frame: Bytes,
    ack: Option<oneshot::Sender<Result<()>>>,
}

pub(crate) fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Value> {
    serde_json::to_value(value).map_err(|err| FrameError::Serialize(err).into())
}

fn disconnected() -> PeerError {
    PeerError::Disconnected("connection task has stopped".to_string())
}

/// Cloneable handle for talking to a connection.
///
/// Every call is queued to the connection task. Sends complete once the
/// frame has been written to the transport; after the connection ends they
/// fail with [`PeerError::Disconnected`].
#[derive(Debug, Clone)]
pub struct PeerHandle {
    id: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    allow_non_json: bool,
    legacy_peer: bool,
}

impl PeerHandle {
    /// Label used in logs.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Fire-and-forget send; the type tag is derived from the JSON shape.
    pub async fn send<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        let envelope = DataEnvelope::new(to_json(data)?);
        self.write_envelope(Envelope::Data(envelope)).await
    }

    /// Send with an explicit application type tag.
    pub async fn send_typed<T: Serialize + ?Sized>(&self, type_name: &str, data: &T) -> Result<()> {
        let envelope = DataEnvelope::typed(type_name, to_json(data)?)?;
        self.write_envelope(Envelope::Data(envelope)).await
    }

    /// Send raw text outside any envelope. Requires `allow_non_json`.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let frame = encode_text(text, self.allow_non_json)?;
        self.write_frame(frame).await
    }

    /// Send data and wait for the peer to answer it through its
    /// [`CallbackReply`]. The wait has no timeout.
    pub async fn send_with_callback<T: Serialize + ?Sized>(&self, data: &T) -> Result<ReplyFuture> {
        let (resolver, reply) = ReplyFuture::channel();
        self.send_with_resolver(data, resolver).await?;
        Ok(reply)
    }

    /// Send data; `resolver` runs on the connection task with the reply.
    pub async fn send_with_resolver<T, F>(&self, data: &T, resolver: F) -> Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce(Value) + Send + 'static,
    {
        let envelope = DataEnvelope::new(to_json(data)?);
        let (ack, done) = oneshot::channel();
        self.command(Command::WriteWithCallback {
            envelope,
            resolver: Box::new(resolver),
            ack,
        })?;
        done.await.map_err(|_| disconnected())?
    }

    /// Open a streaming request using the connection's default timeout.
    pub async fn request<T: Serialize + ?Sized>(&self, payload: &T) -> Result<ResponseStream> {
        self.open_stream(payload, None).await
    }

    /// Open a streaming request with its own timeout.
    pub async fn request_with_timeout<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        timeout: ResponseTimeout,
    ) -> Result<ResponseStream> {
        self.open_stream(payload, Some(timeout)).await
    }

    /// Change the ping interval; zero turns liveness checks off. Fails with
    /// [`PeerError::Unsupported`] for a legacy peer.
    pub fn set_ping_interval(&self, interval: Duration) -> Result<()> {
        if self.legacy_peer {
            return Err(PeerError::Unsupported("ping/pong liveness checks"));
        }
        self.command(Command::SetPingInterval(interval))
    }

    /// Snapshot of pending callbacks, open streams and recent pings.
    pub async fn stats(&self) -> Result<PeerStats> {
        let (reply, stats) = oneshot::channel();
        self.command(Command::Stats(reply))?;
        stats.await.map_err(|_| disconnected())
    }

    /// Close the connection. Open response streams end with
    /// [`StreamError::Stopped`].
    pub fn close(&self) {
        let _ = self.commands.send(Command::Close);
    }

    /// True once the connection task has stopped.
    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }

    pub(crate) async fn write_envelope(&self, envelope: Envelope) -> Result<()> {
        let frame = envelope.encode()?;
        self.write_frame(frame).await
    }

    async fn write_frame(&self, frame: Bytes) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.command(Command::Write { frame, ack })?;
        done.await.map_err(|_| disconnected())?
    }

    async fn open_stream<T: Serialize + ?Sized>(
        &self,
        payload: &T,
        timeout: Option<ResponseTimeout>,
    ) -> Result<ResponseStream> {
        if self.legacy_peer {
            return Err(PeerError::Unsupported("streaming requests"));
        }
        let payload = to_json(payload)?;
        let (reply, opened) = oneshot::channel();
        self.command(Command::OpenStream {
            payload,
            timeout,
            reply,
        })?;
        opened.await.map_err(|_| disconnected())?
    }

    fn command(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| disconnected())
    }
}

/// Answers one message that asked for a callback reply.
#[derive(Debug)]
pub struct CallbackReply {
    callback_id: u64,
    peer: PeerHandle,
}

impl CallbackReply {
    /// Correlation id the reply will carry.
    pub fn callback_id(&self) -> u64 {
        self.callback_id
    }

    /// Send the reply. Consumes the handle so it can only be sent once.
    pub async fn send<T: Serialize + ?Sized>(self, data: &T) -> Result<()> {
        let envelope = DataEnvelope {
            callback_id: Some(self.callback_id),
            ..DataEnvelope::new(to_json(data)?)
        };
        self.peer.write_envelope(Envelope::Data(envelope)).await
    }
}

/// Events from one connection, ending with [`PeerEvent::Disconnected`].
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<PeerEvent>,
}

impl EventStream {
    /// Wait for the next event; `None` after `Disconnected` was delivered.
    pub async fn next(&mut self) -> Option<PeerEvent> {
        self.rx.recv().await
    }
}

impl Stream for EventStream {
    type Item = PeerEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<PeerEvent>> {
        self.rx.poll_recv(cx)
    }
}

/// Connection task over any byte stream.
pub struct Peer<T> {
    id: Arc<str>,
    reader: FramedRead<ReadHalf<T>, DelimitedCodec>,
    outbound: mpsc::UnboundedSender<Outbound>,
    write_failed: oneshot::Receiver<String>,
    config: PeerConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    // Weak so that dropping every application handle ends the task.
    commands_tx: mpsc::WeakUnboundedSender<Command>,
    events: EventSink,
    liveness: LivenessMonitor,
    ping_timer: Option<Interval>,
    callbacks: CallbackCorrelator,
    streams: TimedRegistry<u64, StreamSink>,
    next_stream_id: u64,
}

impl<T> Peer<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Start the connection task. Must be called from within a tokio
    /// runtime.
    pub fn spawn(stream: T, config: PeerConfig) -> (PeerHandle, EventStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = format!("peer-{}", NEXT_PEER_ID.fetch_add(1, Ordering::Relaxed));
        let handle = Self::spawn_with_sink(
            stream,
            config,
            id,
            Box::new(move |event: PeerEvent| {
                let _ = tx.send(event);
            }),
        );
        (handle, EventStream { rx })
    }

    pub(crate) fn spawn_with_sink(
        stream: T,
        config: PeerConfig,
        id: String,
        events: EventSink,
    ) -> PeerHandle {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let handle = PeerHandle {
            id: Arc::from(id),
            commands: commands_tx,
            allow_non_json: config.allow_non_json,
            legacy_peer: config.legacy_peer,
        };

        let (read_half, write_half) = tokio::io::split(stream);
        let frame = config.frame_config();
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (failed_tx, write_failed) = oneshot::channel();
        tokio::spawn(write_loop(
            handle.id.clone(),
            FramedWrite::new(write_half, DelimitedCodec::new(frame.terminators.clone())),
            outbound_rx,
            failed_tx,
        ));

        let mut peer = Peer {
            id: handle.id.clone(),
            reader: FramedRead::new(read_half, DelimitedCodec::new(frame.terminators)),
            outbound,
            write_failed,
            commands,
            commands_tx: handle.commands.downgrade(),
            events,
            liveness: LivenessMonitor::default(),
            ping_timer: None,
            callbacks: CallbackCorrelator::new(),
            streams: TimedRegistry::new(),
            next_stream_id: 0,
            config,
        };
        peer.set_ping_interval(peer.config.effective_ping_interval());

        debug!(peer = %peer.id, "connection task started");
        tokio::spawn(peer.run());
        handle
    }

    async fn run(mut self) {
        let reason = loop {
            let step = tokio::select! {
                frame = self.reader.next() => match frame {
                    Some(Ok(frame)) => self.on_frame(frame),
                    Some(Err(FrameError::Io(err))) => Err(DisconnectReason::Io(err.to_string())),
                    Some(Err(err)) => {
                        self.emit(PeerEvent::FrameError(err));
                        Ok(())
                    }
                    None => Err(DisconnectReason::Closed),
                },
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => Err(DisconnectReason::Local),
                },
                failure = &mut self.write_failed => Err(DisconnectReason::Io(
                    failure.unwrap_or_else(|_| "writer stopped".to_string()),
                )),
                _ = next_tick(&mut self.ping_timer) => self.on_ping_tick(),
                stream_id = self.streams.expired() => {
                    debug!(peer = %self.id, stream_id, "response stream timed out");
                    Ok(())
                }
            };
            if let Err(reason) = step {
                break reason;
            }
        };
        self.shutdown(reason);
    }

    fn on_frame(&mut self, frame: Bytes) -> std::result::Result<(), DisconnectReason> {
        let value = match decode_payload(&frame, self.config.allow_non_json) {
            Ok(value) => value,
            Err(err) => {
                warn!(peer = %self.id, error = %err, "skipping undecodable frame");
                self.emit(PeerEvent::FrameError(err));
                return Ok(());
            }
        };

        match Envelope::parse(value) {
            Envelope::Ping(ping) => {
                let pong = Pong {
                    id: ping.id,
                    returned: unix_millis(),
                };
                return self.write(Envelope::Pong(pong));
            }
            Envelope::Pong(pong) => {
                if !self.liveness.conclude(&pong, unix_millis()) {
                    debug!(peer = %self.id, id = pong.id, "ignoring pong for unknown ping");
                }
            }
            Envelope::Request(request) => match self.handle() {
                Some(handle) => {
                    let writer = ResponseWriter::new(request.stream_id, handle);
                    self.emit(PeerEvent::Request {
                        payload: request.payload,
                        writer,
                    });
                }
                None => debug!(
                    peer = %self.id,
                    stream_id = request.stream_id,
                    "no handle left to answer request"
                ),
            },
            Envelope::Response(packet) => self.on_response(packet),
            Envelope::Data(envelope) => self.on_data(envelope),
        }
        Ok(())
    }

    fn on_response(&mut self, packet: ResponsePacket) {
        let stream_id = packet.stream_id;
        if !self.streams.contains_key(&stream_id) {
            debug!(peer = %self.id, stream_id, "dropping packet for unknown stream");
            return;
        }
        match packet.body {
            ResponseBody::Data(data) => {
                let delivered = self
                    .streams
                    .get(&stream_id)
                    .is_some_and(|sink| sink.push(data));
                if !delivered {
                    debug!(peer = %self.id, stream_id, "stream consumer gone; releasing");
                    let _ = self.streams.delete(&stream_id);
                }
            }
            ResponseBody::End => {
                let _ = self.streams.delete(&stream_id);
            }
            ResponseBody::Error(message) => {
                if let Ok(sink) = self.streams.extract(&stream_id) {
                    sink.fail(StreamError::Remote(message));
                }
            }
        }
    }

    fn on_data(&mut self, envelope: DataEnvelope) {
        if let Some(callback_id) = envelope.callback_id {
            if !self.callbacks.resolve(callback_id, envelope.data) {
                debug!(peer = %self.id, callback_id, "reply for unknown callback");
            }
            return;
        }
        let reply = match envelope.id {
            Some(callback_id) => match self.handle() {
                Some(peer) => Some(CallbackReply { callback_id, peer }),
                None => return,
            },
            None => None,
        };
        self.emit(PeerEvent::Message {
            data: envelope.data,
            type_name: envelope.type_name,
            reply,
        });
    }

    fn on_command(&mut self, command: Command) -> std::result::Result<(), DisconnectReason> {
        match command {
            Command::Write { frame, ack } => self.queue(frame, Some(ack)),
            Command::WriteWithCallback {
                mut envelope,
                resolver,
                ack,
            } => {
                let id = self.callbacks.register(resolver);
                envelope.id = Some(id);
                match Envelope::Data(envelope).encode() {
                    Ok(frame) => self.queue(frame, Some(ack)),
                    Err(err) => {
                        self.callbacks.cancel(id);
                        let _ = ack.send(Err(err));
                        Ok(())
                    }
                }
            }
            Command::OpenStream {
                payload,
                timeout,
                reply,
            } => self.open_stream(payload, timeout, reply),
            Command::CloseStream { stream_id } => {
                if self.streams.delete(&stream_id).is_ok() {
                    debug!(peer = %self.id, stream_id, "response stream closed by consumer");
                }
                Ok(())
            }
            Command::SetPingInterval(interval) => {
                self.set_ping_interval(interval);
                Ok(())
            }
            Command::Stats(reply) => {
                let _ = reply.send(PeerStats {
                    pending_callbacks: self.callbacks.len(),
                    open_streams: self.streams.len(),
                    ping_interval: self.liveness.interval(),
                    recent_pings: self.liveness.history().copied().collect(),
                });
                Ok(())
            }
            Command::Close => Err(DisconnectReason::Local),
        }
    }

    fn open_stream(
        &mut self,
        payload: Value,
        timeout: Option<ResponseTimeout>,
        reply: oneshot::Sender<Result<ResponseStream>>,
    ) -> std::result::Result<(), DisconnectReason> {
        let Some(commands) = self.commands_tx.upgrade() else {
            let _ = reply.send(Err(disconnected()));
            return Ok(());
        };
        self.next_stream_id += 1;
        let stream_id = self.next_stream_id;
        let timeout = timeout
            .unwrap_or(self.config.response_timeout)
            .as_duration();

        let (sink, response) = stream::channel(stream_id, timeout, commands);
        self.streams
            .set(stream_id, sink, timeout, |_, sink, terminal| {
                sink.finish(terminal)
            });
        debug!(peer = %self.id, stream_id, ?timeout, "opening response stream");

        match self.write(Envelope::Request(Request { stream_id, payload })) {
            Ok(()) => {
                let _ = reply.send(Ok(response));
                Ok(())
            }
            Err(reason) => {
                let _ = self.streams.extract(&stream_id);
                let _ = reply.send(Err(PeerError::Disconnected(reason.to_string())));
                Err(reason)
            }
        }
    }

    fn on_ping_tick(&mut self) -> std::result::Result<(), DisconnectReason> {
        match self.liveness.tick(unix_millis()) {
            Tick::Send(ping) => self.write(Envelope::Ping(ping)),
            Tick::PeerDead { ping, unanswered } => {
                self.write(Envelope::Ping(ping))?;
                warn!(
                    peer = %self.id,
                    unanswered,
                    interval_ms = self.liveness.interval().as_millis() as u64,
                    "peer stopped answering pings"
                );
                Err(DisconnectReason::PeerUnresponsive)
            }
        }
    }

    fn set_ping_interval(&mut self, interval: Duration) {
        self.liveness.set_interval(interval);
        self.ping_timer = if interval.is_zero() {
            None
        } else {
            let mut timer = interval_at(Instant::now() + interval, interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            Some(timer)
        };
    }

    fn write(&self, envelope: Envelope) -> std::result::Result<(), DisconnectReason> {
        match envelope.encode() {
            Ok(frame) => self.queue(frame, None),
            Err(err) => {
                warn!(peer = %self.id, error = %err, "dropping unencodable envelope");
                Ok(())
            }
        }
    }

    /// Hand a frame to the writer task. Fails only once that task is gone.
    fn queue(
        &self,
        frame: Bytes,
        ack: Option<oneshot::Sender<Result<()>>>,
    ) -> std::result::Result<(), DisconnectReason> {
        self.outbound
            .send(Outbound { frame, ack })
            .map_err(|_| DisconnectReason::Io("writer stopped".to_string()))
    }

    /// A fresh handle for writers and replies, unless the application has
    /// already dropped every handle.
    fn handle(&self) -> Option<PeerHandle> {
        Some(PeerHandle {
            id: self.id.clone(),
            commands: self.commands_tx.upgrade()?,
            allow_non_json: self.config.allow_non_json,
            legacy_peer: self.config.legacy_peer,
        })
    }

    fn emit(&mut self, event: PeerEvent) {
        (self.events)(event);
    }

    fn shutdown(mut self, reason: DisconnectReason) {
        self.ping_timer = None;
        info!(
            peer = %self.id,
            %reason,
            open_streams = self.streams.len(),
            pending_callbacks = self.callbacks.len(),
            "connection closed"
        );
        self.streams.stop();
        self.callbacks.clear();
        self.emit(PeerEvent::Disconnected(reason));
    }
}

/// Writer task: drains the outbound queue in order, acking each frame once
/// it is flushed. Closes the transport after the connection task drops the
/// queue, so frames queued before teardown still go out.
async fn write_loop<T: AsyncWrite>(
    id: Arc<str>,
    mut writer: FramedWrite<WriteHalf<T>, DelimitedCodec>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    failed: oneshot::Sender<String>,
) {
    while let Some(Outbound { frame, ack }) = outbound.recv().await {
        match writer.send(frame).await {
            Ok(()) => {
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(err) => {
                warn!(peer = %id, error = %err, "write failed");
                let message = err.to_string();
                if let Some(ack) = ack {
                    let _ = ack.send(Err(PeerError::Disconnected(message.clone())));
                }
                let _ = failed.send(message);
                return;
            }
        }
    }
    if let Err(err) = writer.close().await {
        debug!(peer = %id, error = %err, "closing transport failed");
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}
