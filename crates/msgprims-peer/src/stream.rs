//! Streaming request/response exchanges.
//!
//! The initiator gets a [`ResponseStream`] backed by an entry in the
//! connection's timed registry; the replier gets a stateless
//! [`ResponseWriter`] bound to the request's stream id.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures_core::Stream;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::envelope::{Envelope, ResponseBody, ResponsePacket};
use crate::error::{PeerError, Result, StreamError};
use crate::peer::{to_json, Command, PeerHandle};
use crate::registry::Terminal;

/// One packet of a response stream, or the error that ended it.
pub type StreamItem = std::result::Result<Value, StreamError>;

/// Registry value on the initiating side: where packets for one stream go.
#[derive(Debug)]
pub(crate) struct StreamSink {
    tx: mpsc::UnboundedSender<StreamItem>,
    timeout: Option<Duration>,
}

impl StreamSink {
    /// Queue a packet. False once the consumer has gone away.
    pub(crate) fn push(&self, data: Value) -> bool {
        self.tx.send(Ok(data)).is_ok()
    }

    pub(crate) fn fail(self, err: StreamError) {
        let _ = self.tx.send(Err(err));
    }

    /// Registry terminal notification. A clean delete just drops the sender,
    /// which ends the stream without an error.
    pub(crate) fn finish(self, terminal: Terminal) {
        match terminal {
            Terminal::Deleted => {}
            Terminal::TimedOut => {
                let after = self.timeout.unwrap_or_default();
                self.fail(StreamError::TimedOut(after));
            }
            Terminal::Stopped => self.fail(StreamError::Stopped),
            Terminal::Overwritten => self.fail(StreamError::Replaced),
        }
    }
}

pub(crate) fn channel(
    stream_id: u64,
    timeout: Option<Duration>,
    commands: mpsc::UnboundedSender<Command>,
) -> (StreamSink, ResponseStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        StreamSink { tx, timeout },
        ResponseStream {
            stream_id,
            rx,
            commands,
            finished: false,
        },
    )
}

/// Reply packets of one streaming request, in arrival order.
///
/// Ends with `None` after the replier's terminal packet, or with a single
/// `Some(Err(_))` on timeout, remote error or connection teardown. Dropping
/// the stream releases its registry entry.
#[derive(Debug)]
pub struct ResponseStream {
    stream_id: u64,
    rx: mpsc::UnboundedReceiver<StreamItem>,
    commands: mpsc::UnboundedSender<Command>,
    finished: bool,
}

impl ResponseStream {
    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Wait for the next packet.
    pub async fn next(&mut self) -> Option<StreamItem> {
        std::future::poll_fn(|cx| self.poll_item(cx)).await
    }

    /// Drain the stream, stopping at the first error.
    pub async fn collect_values(mut self) -> std::result::Result<Vec<Value>, StreamError> {
        let mut values = Vec::new();
        while let Some(item) = self.next().await {
            values.push(item?);
        }
        Ok(values)
    }

    /// Stop listening and release the registry entry. Idempotent.
    pub fn close(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let _ = self.commands.send(Command::CloseStream {
            stream_id: self.stream_id,
        });
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn poll_item(&mut self, cx: &mut Context<'_>) -> Poll<Option<StreamItem>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(data))) => Poll::Ready(Some(Ok(data))),
            Poll::Ready(Some(Err(err))) => {
                self.finished = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Stream for ResponseStream {
    type Item = StreamItem;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamItem>> {
        self.get_mut().poll_item(cx)
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.close();
    }
}

/// Replier side of a streaming request.
#[derive(Debug)]
pub struct ResponseWriter {
    stream_id: u64,
    peer: PeerHandle,
    ended: bool,
}

impl ResponseWriter {
    pub(crate) fn new(stream_id: u64, peer: PeerHandle) -> Self {
        Self {
            stream_id,
            peer,
            ended: false,
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Send one response packet.
    pub async fn send<T: Serialize + ?Sized>(&mut self, payload: &T) -> Result<()> {
        if self.ended {
            return Err(PeerError::StreamEnded(self.stream_id));
        }
        let data = to_json(payload)?;
        self.packet(ResponseBody::Data(data)).await
    }

    /// Send the terminal packet. A second call is a no-op.
    pub async fn end(&mut self) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.packet(ResponseBody::End).await
    }

    /// End the stream with an error the initiator sees as
    /// [`StreamError::Remote`]. No-op once ended.
    pub async fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;
        self.packet(ResponseBody::Error(message.into())).await
    }

    async fn packet(&self, body: ResponseBody) -> Result<()> {
        self.peer
            .write_envelope(Envelope::Response(ResponsePacket {
                stream_id: self.stream_id,
                body,
            }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn pair() -> (
        StreamSink,
        ResponseStream,
        mpsc::UnboundedReceiver<Command>,
    ) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (sink, stream) = channel(5, Some(Duration::from_millis(50)), commands);
        (sink, stream, command_rx)
    }

    #[tokio::test]
    async fn packets_then_clean_end() {
        let (sink, mut stream, _commands) = pair();
        assert!(sink.push(json!(1)));
        assert!(sink.push(json!(2)));
        sink.finish(Terminal::Deleted);

        assert_eq!(stream.next().await, Some(Ok(json!(1))));
        assert_eq!(stream.next().await, Some(Ok(json!(2))));
        assert_eq!(stream.next().await, None);
        assert!(stream.is_finished());
    }

    #[tokio::test]
    async fn timeout_ends_with_error_once() {
        let (sink, stream, _commands) = pair();
        sink.push(json!("partial"));
        sink.finish(Terminal::TimedOut);

        assert_eq!(
            stream.collect_values().await,
            Err(StreamError::TimedOut(Duration::from_millis(50)))
        );
    }

    #[tokio::test]
    async fn stop_reports_local_stop() {
        let (sink, mut stream, _commands) = pair();
        sink.finish(Terminal::Stopped);
        assert_eq!(stream.next().await, Some(Err(StreamError::Stopped)));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_notifies_once() {
        let (sink, mut stream, mut commands) = pair();
        stream.close();
        stream.close();
        drop(stream);

        assert!(matches!(
            commands.try_recv(),
            Ok(Command::CloseStream { stream_id: 5 })
        ));
        assert!(commands.try_recv().is_err());
        assert!(!sink.push(json!("late")));
    }

    #[tokio::test]
    async fn dropping_unfinished_stream_releases_entry() {
        let (_sink, stream, mut commands) = pair();
        drop(stream);
        assert!(matches!(
            commands.try_recv(),
            Ok(Command::CloseStream { stream_id: 5 })
        ));
    }
}
