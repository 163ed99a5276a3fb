//! WebSocket plumbing shared by the control and signaling channels.
//!
//! A [`Socket`] owns one background task that connects, then multiplexes
//! outbound frames and inbound messages with `tokio::select!`. Inbound text
//! frames are parsed into the channel's message type; anything unparseable is
//! logged and skipped without closing the socket.

use crate::error::{RealtimeError, Result};
use futures_util::{SinkExt, StreamExt};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as WsMessage};
use tracing::{debug, info, trace, warn};

const CONNECTING: u8 = 0;
const OPEN: u8 = 1;
const CLOSED: u8 = 2;

/// Lifecycle notifications from a socket task.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent<M> {
    Opened,
    Message(M),
    Error(String),
    /// The remote side or the network ended the connection, or the connect
    /// attempt failed. Not emitted for closes requested through [`Socket::close`].
    Closed,
}

enum Frame {
    Text(String),
    Close,
}

/// Cloneable sending half. Messages are dropped, not queued, while the socket
/// is not open.
#[derive(Clone)]
pub struct Outbound {
    channel: &'static str,
    tx: mpsc::UnboundedSender<Frame>,
    state: Arc<AtomicU8>,
}

impl Outbound {
    pub fn is_open(&self) -> bool {
        self.state.load(Ordering::Acquire) == OPEN
    }

    /// Serializes and queues `msg` if the socket is open. Returns whether the
    /// message was queued.
    pub fn send_if_open<T: Serialize>(&self, msg: &T) -> Result<bool> {
        if !self.is_open() {
            trace!(channel = self.channel, "Socket not open; dropping message");
            return Ok(false);
        }
        let text = serde_json::to_string(msg)?;
        self.tx
            .send(Frame::Text(text))
            .map_err(|_| RealtimeError::ChannelClosed(self.channel))?;
        Ok(true)
    }

    #[cfg(test)]
    pub(crate) fn detached(channel: &'static str, open: bool) -> (Self, TestReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(if open { OPEN } else { CONNECTING }));
        (
            Self {
                channel,
                tx,
                state: state.clone(),
            },
            TestReceiver { rx, state },
        )
    }
}

/// Receives what a detached [`Outbound`] queued, for unit tests.
#[cfg(test)]
pub(crate) struct TestReceiver {
    rx: mpsc::UnboundedReceiver<Frame>,
    state: Arc<AtomicU8>,
}

#[cfg(test)]
impl TestReceiver {
    pub(crate) fn set_open(&self, open: bool) {
        let next = if open { OPEN } else { CLOSED };
        self.state.store(next, Ordering::Release);
    }

    pub(crate) fn try_recv_text(&mut self) -> Option<String> {
        match self.rx.try_recv() {
            Ok(Frame::Text(text)) => Some(text),
            _ => None,
        }
    }

    pub(crate) async fn recv_text(&mut self) -> Option<String> {
        loop {
            match self.rx.recv().await? {
                Frame::Text(text) => return Some(text),
                Frame::Close => continue,
            }
        }
    }
}

/// One WebSocket connection and its background task.
pub struct Socket {
    outbound: Outbound,
    task: JoinHandle<()>,
}

impl Socket {
    /// Starts connecting to `url` in the background. `on_event` is called from
    /// the socket task for every lifecycle change and parsed message.
    pub fn open<M, F>(channel: &'static str, url: String, on_event: F) -> Self
    where
        M: DeserializeOwned + Send + 'static,
        F: Fn(SocketEvent<M>) + Send + Sync + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(CONNECTING));
        let task = tokio::spawn(run(channel, url, state.clone(), rx, on_event));
        Self {
            outbound: Outbound { channel, tx, state },
            task,
        }
    }

    pub fn outbound(&self) -> Outbound {
        self.outbound.clone()
    }

    pub fn is_open(&self) -> bool {
        self.outbound.is_open()
    }

    /// Closes the socket. A connect still in flight is abandoned; an open
    /// connection gets a close frame.
    pub fn close(&self) -> Result<()> {
        let previous = self.outbound.state.swap(CLOSED, Ordering::AcqRel);
        match previous {
            CONNECTING => {
                self.task.abort();
                Ok(())
            }
            OPEN => self
                .outbound
                .tx
                .send(Frame::Close)
                .map_err(|_| RealtimeError::ChannelClosed(self.outbound.channel)),
            _ => Ok(()),
        }
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

async fn run<M, F>(
    channel: &'static str,
    url: String,
    state: Arc<AtomicU8>,
    mut rx: mpsc::UnboundedReceiver<Frame>,
    on_event: F,
) where
    M: DeserializeOwned + Send + 'static,
    F: Fn(SocketEvent<M>) + Send + Sync + 'static,
{
    debug!(channel, "Connecting");
    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            warn!(channel, error = %e, "Failed to connect");
            state.store(CLOSED, Ordering::Release);
            on_event(SocketEvent::Error(e.to_string()));
            on_event(SocketEvent::Closed);
            return;
        }
    };
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    if state
        .compare_exchange(CONNECTING, OPEN, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        debug!(channel, "Closed while connecting");
        let _ = ws_tx.send(WsMessage::Close(None)).await;
        return;
    }
    info!(channel, "Connected");
    on_event(SocketEvent::Opened);

    loop {
        tokio::select! {
            frame = rx.recv() => match frame {
                Some(Frame::Text(text)) => {
                    if let Err(e) = ws_tx.send(WsMessage::Text(text.into())).await {
                        warn!(channel, error = %e, "Failed to send frame");
                        on_event(SocketEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Frame::Close) | None => {
                    let _ = ws_tx.send(WsMessage::Close(None)).await;
                    let _ = ws_tx.close().await;
                    info!(channel, "Closed locally");
                    return;
                }
            },
            msg = ws_rx.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<M>(&text) {
                    Ok(message) => on_event(SocketEvent::Message(message)),
                    Err(e) => warn!(channel, error = %e, "Failed to parse message"),
                },
                Some(Ok(WsMessage::Binary(data))) => {
                    trace!(channel, len = data.len(), "Ignoring binary frame");
                }
                Some(Ok(WsMessage::Close(close_frame))) => {
                    info!(channel, ?close_frame, "Closed by remote");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(channel, error = %e, "Read error");
                    on_event(SocketEvent::Error(e.to_string()));
                    break;
                }
                None => break,
            },
        }
    }

    let locally_closed = state.swap(CLOSED, Ordering::AcqRel) == CLOSED;
    if !locally_closed {
        on_event(SocketEvent::Closed);
    }
}
