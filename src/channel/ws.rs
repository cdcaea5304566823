//! WebSocket transport on `tokio-tungstenite`.
//!
//! Each [`Transport::open`] spawns one background task that owns the
//! socket. Outbound frames reach it over an mpsc channel; everything that
//! happens on the socket is reported back as `(ConnectionId, TransportEvent)`
//! on the receiver returned by [`WsTransport::new`].

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use url::Url;

use super::{ChannelError, CloseInfo, ConnectionId, Transport, TransportEvent};

/// Receiving half of the transport event stream.
pub type TransportEvents = mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>;

enum LinkCommand {
    Text(String),
    Close { code: u16, reason: String },
}

#[derive(Debug)]
struct Link {
    id: ConnectionId,
    commands: mpsc::UnboundedSender<LinkCommand>,
    task: JoinHandle<()>,
}

/// Production transport: one tokio task per connection.
#[derive(Debug)]
pub struct WsTransport {
    events: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    link: Option<Link>,
}

impl WsTransport {
    /// Create a transport and the stream its events arrive on.
    #[must_use]
    pub fn new() -> (Self, TransportEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        (Self { events, link: None }, rx)
    }
}

impl Transport for WsTransport {
    fn open(&mut self, id: ConnectionId, url: &str) -> Result<(), ChannelError> {
        let parsed = Url::parse(url)
            .map_err(|e| ChannelError::Transport(format!("invalid url {url:?}: {e}")))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(ChannelError::Transport(format!(
                "unsupported scheme {:?}",
                parsed.scheme()
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ChannelError::Transport(format!("no async runtime: {e}")))?;

        if let Some(old) = self.link.take() {
            old.task.abort();
        }
        let (commands, rx) = mpsc::unbounded_channel();
        let events = self.events.clone();
        let task = runtime.spawn(run_link(id, parsed.to_string(), events, rx));
        self.link = Some(Link { id, commands, task });
        Ok(())
    }

    fn send(&mut self, id: ConnectionId, text: String) -> Result<(), ChannelError> {
        match &self.link {
            Some(link) if link.id == id => link
                .commands
                .send(LinkCommand::Text(text))
                .map_err(|_| ChannelError::Transport("connection task has exited".into())),
            _ => Err(ChannelError::Transport(format!("no live connection {id}"))),
        }
    }

    fn close(&mut self, id: ConnectionId, code: u16, reason: &str) {
        if let Some(link) = &self.link
            && link.id == id
        {
            let _ = link.commands.send(LinkCommand::Close {
                code,
                reason: reason.to_owned(),
            });
        }
    }
}

/// Own one socket until it closes.
async fn run_link(
    id: ConnectionId,
    url: String,
    events: mpsc::UnboundedSender<(ConnectionId, TransportEvent)>,
    mut commands: mpsc::UnboundedReceiver<LinkCommand>,
) {
    let emit = |event: TransportEvent| {
        // Receiver gone means the runtime is shutting down.
        let _ = events.send((id, event));
    };

    let connecting = connect_async(url.as_str());
    tokio::pin!(connecting);
    let stream = loop {
        tokio::select! {
            result = &mut connecting => match result {
                Ok((stream, _response)) => break stream,
                Err(e) => {
                    emit(TransportEvent::Error(format!("connect: {e}")));
                    emit(TransportEvent::Closed(CloseInfo::abnormal("connect failed")));
                    return;
                }
            },
            command = commands.recv() => match command {
                Some(LinkCommand::Close { code, reason }) => {
                    emit(TransportEvent::Closed(CloseInfo { code, reason, clean: true }));
                    return;
                }
                Some(LinkCommand::Text(_)) => {
                    tracing::debug!(connection = id, "dropping frame queued before open");
                }
                None => return,
            },
        }
    };

    emit(TransportEvent::Opened);
    let (mut write, mut read) = stream.split();
    let mut closing = false;

    loop {
        tokio::select! {
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => emit(TransportEvent::Message(text)),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.into_owned()))
                        .unwrap_or((1005, String::new()));
                    emit(TransportEvent::Closed(CloseInfo { code, reason, clean: true }));
                    return;
                }
                Some(Ok(_)) => {} // Binary, Ping/Pong frames handled by tungstenite.
                Some(Err(e)) => {
                    if closing {
                        emit(TransportEvent::Closed(CloseInfo {
                            code: super::NORMAL_CLOSE,
                            reason: String::new(),
                            clean: true,
                        }));
                    } else {
                        emit(TransportEvent::Error(format!("read: {e}")));
                        emit(TransportEvent::Closed(CloseInfo::abnormal(e.to_string())));
                    }
                    return;
                }
                None => {
                    emit(TransportEvent::Closed(if closing {
                        CloseInfo { code: super::NORMAL_CLOSE, reason: String::new(), clean: true }
                    } else {
                        CloseInfo::abnormal("connection dropped")
                    }));
                    return;
                }
            },
            command = commands.recv(), if !closing => match command {
                Some(LinkCommand::Text(text)) => {
                    if let Err(e) = write.send(Message::Text(text)).await {
                        emit(TransportEvent::Error(format!("send: {e}")));
                        emit(TransportEvent::Closed(CloseInfo::abnormal(e.to_string())));
                        return;
                    }
                }
                Some(LinkCommand::Close { code, reason }) => {
                    closing = true;
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(e) = write.send(Message::Close(Some(frame))).await {
                        tracing::debug!(connection = id, "close frame not sent: {e}");
                        emit(TransportEvent::Closed(CloseInfo { code, reason, clean: true }));
                        return;
                    }
                }
                None => {
                    let _ = write.close().await;
                    return;
                }
            },
        }
    }
}
