//! WebSocket connection to the relay and frame handling

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use super::{ChannelError, SharedChannel, Subscription, WireFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Live subscriptions, plus frames that arrived before the first one
/// (the relay replays its snapshot as soon as we connect).
#[derive(Default)]
struct Fanout {
    subscribers: Vec<mpsc::UnboundedSender<WireFrame>>,
    backlog: Vec<WireFrame>,
}

impl Fanout {
    fn deliver(&mut self, frame: WireFrame) {
        if self.subscribers.is_empty() {
            self.backlog.push(frame);
            return;
        }
        self.subscribers.retain(|tx| tx.send(frame.clone()).is_ok());
    }
}

type Subscribers = Arc<Mutex<Fanout>>;

/// Socket state shared between the handle and the supervisor task.
#[derive(Default)]
struct Link {
    connected: AtomicBool,
    /// Completed reconnects.
    epoch: AtomicU64,
}

/// Reason the socket pump exited.
enum Disconnect {
    /// Local close, or the handle is gone. Do not reconnect.
    Shutdown,
    /// Socket error or relay-initiated close. Should reconnect.
    Lost(String),
}

/// Client side of the shared channel.
///
/// Sends are queued to a supervisor task so publishing never waits on the
/// network. The supervisor decodes incoming frames and fans them out to
/// every subscription. When the socket dies it redials with exponential
/// backoff (0.5s, 1s, 2s, ... capped at 30s); subscriptions stay open
/// across the gap and sends fail with `Disconnected` until it is back.
pub struct WsChannel {
    outgoing: mpsc::UnboundedSender<Message>,
    subscribers: Subscribers,
    link: Arc<Link>,
    supervisor: JoinHandle<()>,
}

impl WsChannel {
    pub async fn connect(relay_url: &str) -> Result<Self, ChannelError> {
        let url =
            url::Url::parse(relay_url).map_err(|_| ChannelError::InvalidUrl(relay_url.into()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(ChannelError::InvalidUrl(relay_url.into()));
        }

        let stream = dial(&url).await?;
        let (outgoing, out_rx) = mpsc::unbounded_channel::<Message>();
        let subscribers: Subscribers = Arc::new(Mutex::new(Fanout::default()));
        let link = Arc::new(Link::default());
        link.connected.store(true, Ordering::SeqCst);

        let supervisor = tokio::spawn(supervise(
            url,
            stream,
            out_rx,
            Arc::clone(&subscribers),
            Arc::clone(&link),
        ));

        Ok(Self {
            outgoing,
            subscribers,
            link,
            supervisor,
        })
    }

    /// Send a close frame and wait for queued frames to flush.
    pub async fn close(&mut self) {
        let _ = self.outgoing.send(Message::Close(None));
        let _ = (&mut self.supervisor).await;
    }
}

async fn dial(url: &url::Url) -> Result<WsStream, ChannelError> {
    tracing::info!("Connecting WebSocket to {}", url);
    let (stream, response) = connect_async(url.as_str()).await?;
    tracing::info!("WebSocket connected (status={})", response.status());
    Ok(stream)
}

/// Pump the socket; when it is lost, redial and pump again until shutdown.
async fn supervise(
    url: url::Url,
    mut stream: WsStream,
    mut out_rx: mpsc::UnboundedReceiver<Message>,
    fanout: Subscribers,
    link: Arc<Link>,
) {
    loop {
        match pump(stream, &mut out_rx, &fanout).await {
            Disconnect::Shutdown => break,
            Disconnect::Lost(reason) => {
                link.connected.store(false, Ordering::SeqCst);
                tracing::warn!("Relay connection lost: {}", reason);
            }
        }

        stream = match redial(&url, &mut out_rx).await {
            Some(stream) => stream,
            None => break,
        };
        let epoch = link.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        link.connected.store(true, Ordering::SeqCst);
        tracing::info!("Relay connection restored (reconnect #{})", epoch);
    }

    link.connected.store(false, Ordering::SeqCst);
    // Dropping the senders ends every subscription.
    fanout
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .subscribers
        .clear();
}

async fn pump(
    stream: WsStream,
    out_rx: &mut mpsc::UnboundedReceiver<Message>,
    fanout: &Subscribers,
) -> Disconnect {
    let (mut sink, mut stream) = stream.split();
    loop {
        tokio::select! {
            msg = out_rx.recv() => {
                let Some(msg) = msg else { return Disconnect::Shutdown };
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = sink.send(msg).await {
                    if closing {
                        return Disconnect::Shutdown;
                    }
                    return Disconnect::Lost(format!("send failed: {}", e));
                }
                if closing {
                    return Disconnect::Shutdown;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    tracing::debug!("WS recv: {}", text);
                    match WireFrame::decode(&text) {
                        Ok(frame) => fanout
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .deliver(frame),
                        Err(e) => tracing::warn!("Dropping undecodable frame: {}", e),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    return Disconnect::Lost(format!("closed by relay: {:?}", frame));
                }
                Some(Ok(other)) => {
                    tracing::debug!("WS frame (ignored): {:?}", other);
                }
                Some(Err(e)) => return Disconnect::Lost(format!("receive error: {}", e)),
                None => return Disconnect::Lost("stream ended".into()),
            }
        }
    }
}

/// Redial with capped exponential backoff. `None` if the handle closed
/// while we were waiting.
async fn redial(
    url: &url::Url,
    out_rx: &mut mpsc::UnboundedReceiver<Message>,
) -> Option<WsStream> {
    let mut backoff = INITIAL_BACKOFF;
    loop {
        tracing::info!("Reconnecting in {:?}...", backoff);
        let sleep = time::sleep(backoff);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                msg = out_rx.recv() => match msg {
                    None | Some(Message::Close(_)) => return None,
                    Some(_) => tracing::debug!("Dropping frame queued while disconnected"),
                },
            }
        }

        match dial(url).await {
            Ok(stream) => return Some(stream),
            Err(e) => {
                tracing::warn!("Reconnect failed: {}", e);
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

impl SharedChannel for WsChannel {
    fn send_frame(&self, frame: WireFrame) -> Result<(), ChannelError> {
        if self.outgoing.is_closed() {
            return Err(ChannelError::Closed);
        }
        if !self.link.connected.load(Ordering::SeqCst) {
            return Err(ChannelError::Disconnected);
        }
        let text = frame.encode()?;
        tracing::debug!("WS send: {}", text);
        self.outgoing
            .send(Message::Text(text))
            .map_err(|_| ChannelError::Closed)
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut fanout = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        for frame in fanout.backlog.drain(..) {
            let _ = tx.send(frame);
        }
        fanout.subscribers.push(tx);
        Subscription::new(rx)
    }

    fn epoch(&self) -> u64 {
        self.link.epoch.load(Ordering::SeqCst)
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.supervisor.abort();
    }
}
