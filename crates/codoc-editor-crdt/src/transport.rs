//! WebSocket connection to the relay.
//!
//! One binary frame carries one postcard-encoded [`CollabMessage`]. The
//! socket is split: a writer task drains the outgoing channel, a reader task
//! decodes frames onto the incoming channel and answers pings.

use bytes::Bytes;
use codoc_common::CollabMessage;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::error::CrdtError;

/// Cloneable, thread-safe handle for queueing outgoing messages.
#[derive(Clone, Debug)]
pub struct RelaySender {
    tx: mpsc::UnboundedSender<CollabMessage>,
}

impl RelaySender {
    pub fn send(&self, message: CollabMessage) -> Result<(), CrdtError> {
        trace!(kind = message.kind(), "relay: queue message");
        self.tx.send(message).map_err(|_| CrdtError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl From<mpsc::UnboundedSender<CollabMessage>> for RelaySender {
    fn from(tx: mpsc::UnboundedSender<CollabMessage>) -> Self {
        Self { tx }
    }
}

/// Messages sent to the writer task by the reader
enum WriteCommand {
    Pong(Bytes),
}

/// A live relay connection (or an in-memory stand-in built from channels).
pub struct RelayClient {
    sender: RelaySender,
    incoming: Option<mpsc::UnboundedReceiver<CollabMessage>>,
    shutdown: Option<oneshot::Sender<()>>,
    reader: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
}

impl RelayClient {
    /// Connect to `url` and start the reader and writer tasks.
    pub async fn connect(url: &Url) -> Result<Self, CrdtError> {
        info!(url = %url, "relay: connecting");
        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        info!(url = %url, "relay: connected");

        let (write, read) = ws_stream.split();
        let (out_tx, out_rx) = mpsc::unbounded_channel::<CollabMessage>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<CollabMessage>();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<WriteCommand>();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let writer = tokio::spawn(run_writer(write, out_rx, cmd_rx, shutdown_rx));
        let reader = tokio::spawn(run_reader(read, in_tx, cmd_tx));

        Ok(Self {
            sender: out_tx.into(),
            incoming: Some(in_rx),
            shutdown: Some(shutdown_tx),
            reader: Some(reader),
            writer: Some(writer),
        })
    }

    /// Client over plain channels, without a socket.
    pub fn from_channels(
        outgoing: mpsc::UnboundedSender<CollabMessage>,
        incoming: mpsc::UnboundedReceiver<CollabMessage>,
    ) -> Self {
        Self {
            sender: outgoing.into(),
            incoming: Some(incoming),
            shutdown: None,
            reader: None,
            writer: None,
        }
    }

    pub fn sender(&self) -> RelaySender {
        self.sender.clone()
    }

    /// Take the incoming stream; `None` if already taken.
    pub fn take_incoming(&mut self) -> Option<mpsc::UnboundedReceiver<CollabMessage>> {
        self.incoming.take()
    }

    /// Stop reading and let the writer flush what is queued, then close the
    /// socket. Does not wait for the tasks.
    pub fn close(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.writer.take();
        self.incoming.take();
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("connected", &self.reader.is_some())
            .field("incoming_taken", &self.incoming.is_none())
            .finish()
    }
}

async fn run_reader<S>(
    mut read: S,
    in_tx: mpsc::UnboundedSender<CollabMessage>,
    cmd_tx: mpsc::UnboundedSender<WriteCommand>,
) where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Binary(data)) => match CollabMessage::from_bytes(&data) {
                Ok(message) => {
                    trace!(kind = message.kind(), len = data.len(), "relay: received");
                    if in_tx.send(message).is_err() {
                        debug!("relay: incoming channel closed, stopping reader");
                        return;
                    }
                }
                Err(e) => {
                    warn!(error = %e, len = data.len(), "relay: dropping undecodable frame");
                }
            },
            Ok(Message::Ping(data)) => {
                if cmd_tx.send(WriteCommand::Pong(data)).is_err() {
                    return;
                }
            }
            Ok(Message::Close(frame)) => {
                info!(?frame, "relay: connection closed by server");
                return;
            }
            Ok(_) => {
                // Text frames are not part of the protocol; pongs need nothing.
            }
            Err(e) => {
                warn!(error = %e, "relay: read error");
                return;
            }
        }
    }
}

async fn run_writer<S>(
    mut write: S,
    mut out_rx: mpsc::UnboundedReceiver<CollabMessage>,
    mut cmd_rx: mpsc::UnboundedReceiver<WriteCommand>,
    mut shutdown: oneshot::Receiver<()>,
) where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let mut reader_gone = false;
    loop {
        tokio::select! {
            biased;

            cmd = cmd_rx.recv(), if !reader_gone => {
                match cmd {
                    Some(WriteCommand::Pong(data)) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            warn!(error = %e, "relay: failed to send pong");
                            return;
                        }
                    }
                    None => reader_gone = true,
                }
            }

            message = out_rx.recv() => {
                let Some(message) = message else {
                    break;
                };
                if let Err(e) = send_message(&mut write, &message).await {
                    warn!(error = %e, kind = message.kind(), "relay: failed to send");
                    return;
                }
            }

            _ = &mut shutdown => {
                // Flush whatever was queued before the close request.
                while let Ok(message) = out_rx.try_recv() {
                    if send_message(&mut write, &message).await.is_err() {
                        return;
                    }
                }
                break;
            }
        }
    }

    let _ = write.send(Message::Close(None)).await;
    debug!("relay: writer finished");
}

async fn send_message<S>(write: &mut S, message: &CollabMessage) -> Result<(), String>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    let bytes = message.to_bytes().map_err(|e| e.to_string())?;
    write
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| e.to_string())
}
