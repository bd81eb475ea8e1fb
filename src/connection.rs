use crate::context::RequestContext;
use crate::error::{Result, SwitcherError};
use crate::protocol::{RpcRequest, RpcResponse};
use crate::settings::AdapterConfig;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A logical request waiting for its turn on the socket
struct PendingRequest {
    id: Uuid,
    payload: String,
    reply_tx: oneshot::Sender<Result<Vec<u8>>>,
}

/// One WebSocket shared by every caller talking to a device
///
/// The protocol has no correlation identifier, so requests are written one
/// at a time by a single worker task and each write is paired with the next
/// inbound frame. A device that sends an unsolicited frame shifts every later
/// reply by one; nothing here can detect that.
///
/// The socket is dialed on first use. A read timeout fails only the waiting
/// caller. Any other transport failure ends the worker, fails the callers
/// still queued behind it, and the next request dials a fresh socket.
pub struct RpcMultiplexer {
    url: String,
    connect_timeout: Duration,
    read_timeout: Duration,
    queue_depth: usize,
    /// Queue into the worker owning the live socket; `None` until first use
    queue: Mutex<Option<mpsc::Sender<PendingRequest>>>,
    dials: AtomicUsize,
}

impl RpcMultiplexer {
    pub fn new(
        url: impl Into<String>,
        connect_timeout: Duration,
        read_timeout: Duration,
        queue_depth: usize,
    ) -> Self {
        Self {
            url: url.into(),
            connect_timeout,
            read_timeout,
            queue_depth: queue_depth.max(1),
            queue: Mutex::new(None),
            dials: AtomicUsize::new(0),
        }
    }

    pub fn from_config(url: impl Into<String>, config: &AdapterConfig) -> Self {
        Self::new(
            url,
            config.ws_connect_timeout(),
            config.ws_read_timeout(),
            config.ws_queue_depth,
        )
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Number of sockets dialed so far
    pub fn connections_opened(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// Queue `payload` as a text frame and wait for the frame that follows it
    pub async fn request(&self, ctx: &RequestContext, payload: String) -> Result<Vec<u8>> {
        let id = Uuid::new_v4();
        let (reply_tx, reply_rx) = oneshot::channel();

        ctx.run("WebSocket request", async {
            let queue = self.worker_queue().await?;
            tracing::debug!("Queueing request {}", id);

            queue
                .send(PendingRequest {
                    id,
                    payload,
                    reply_tx,
                })
                .await
                .map_err(|_| SwitcherError::ConnectionClosed)?;

            reply_rx.await.map_err(|_| SwitcherError::ConnectionClosed)?
        })
        .await
    }

    /// Send an RPC request and decode the reply envelope
    pub async fn call(&self, ctx: &RequestContext, request: &RpcRequest) -> Result<RpcResponse> {
        let payload = serde_json::to_string(request)?;
        let bytes = self.request(ctx, payload).await?;
        tracing::debug!("Received: {}", String::from_utf8_lossy(&bytes));
        RpcResponse::from_slice(&bytes)
    }

    /// Queue of the live worker, dialing a new socket if there is none
    ///
    /// The lock is held across the dial, so concurrent first callers wait for
    /// the one dial in progress instead of racing their own.
    async fn worker_queue(&self) -> Result<mpsc::Sender<PendingRequest>> {
        let mut slot = self.queue.lock().await;

        if let Some(queue) = slot.as_ref() {
            if !queue.is_closed() {
                return Ok(queue.clone());
            }
            tracing::info!("Connection to {} was lost, reconnecting", self.url);
        }

        let socket = self.dial().await?;
        let (queue_tx, queue_rx) = mpsc::channel(self.queue_depth);
        tokio::spawn(run_worker(
            socket,
            queue_rx,
            self.read_timeout,
            self.url.clone(),
        ));

        *slot = Some(queue_tx.clone());
        Ok(queue_tx)
    }

    async fn dial(&self) -> Result<Socket> {
        tracing::info!("Connecting to {}", self.url);
        self.dials.fetch_add(1, Ordering::SeqCst);

        let (socket, _) = timeout(self.connect_timeout, connect_async(self.url.as_str()))
            .await
            .map_err(|_| SwitcherError::Timeout(self.connect_timeout).during("connect"))?
            .map_err(|e| SwitcherError::from(e).during("connect"))?;

        Ok(socket)
    }
}

/// Drain the queue, one write and one read per request
async fn run_worker(
    mut socket: Socket,
    mut queue: mpsc::Receiver<PendingRequest>,
    read_timeout: Duration,
    url: String,
) {
    while let Some(pending) = queue.recv().await {
        if pending.reply_tx.is_closed() {
            tracing::debug!("Request {} abandoned before it was sent", pending.id);
            continue;
        }

        let outcome = exchange(&mut socket, &pending.payload, read_timeout).await;
        let fatal = matches!(&outcome, Err(e) if !matches!(e, SwitcherError::Timeout(_)));

        if fatal {
            // new callers must dial afresh rather than queue behind a dead socket
            queue.close();
        }

        if let Err(e) = &outcome {
            tracing::warn!("Request {} to {} failed: {}", pending.id, url, e);
        }
        if pending.reply_tx.send(outcome).is_err() {
            tracing::debug!("Request {} abandoned while in flight", pending.id);
        }

        if fatal {
            break;
        }
    }

    // requests still buffered are dropped here and their callers see ConnectionClosed
    drop(queue);
    let _ = socket.close(None).await;
    tracing::info!("Connection to {} closed", url);
}

async fn exchange(socket: &mut Socket, payload: &str, read_timeout: Duration) -> Result<Vec<u8>> {
    tracing::debug!("Sending: {}", payload);
    socket.send(Message::Text(payload.to_string())).await?;

    let deadline = Instant::now() + read_timeout;
    loop {
        let frame = match timeout_at(deadline, socket.next()).await {
            Err(_) => return Err(SwitcherError::Timeout(read_timeout)),
            Ok(None) => return Err(SwitcherError::ConnectionClosed),
            Ok(Some(frame)) => frame?,
        };

        match frame {
            Message::Text(text) => return Ok(text.into_bytes()),
            Message::Binary(data) => return Ok(data),
            Message::Close(_) => return Err(SwitcherError::ConnectionClosed),
            Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use futures_util::future::join_all;
    use std::sync::Arc;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    const READ_TIMEOUT: Duration = Duration::from_millis(200);

    /// Answers every text frame with `reply:<frame>`, except frames starting
    /// with `silent`. Drops the first connection after `close_first_after`
    /// replies when set.
    async fn spawn_server(close_first_after: Option<usize>) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let accepted_clone = accepted.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = accepted_clone.fetch_add(1, Ordering::SeqCst);
                let limit = if index == 0 { close_first_after } else { None };

                tokio::spawn(async move {
                    let mut ws = accept_async(stream).await.unwrap();
                    let mut replies = 0;
                    while let Some(Ok(msg)) = ws.next().await {
                        if !msg.is_text() {
                            continue;
                        }
                        let text = msg.to_text().unwrap().to_string();
                        if text.starts_with("silent") {
                            continue;
                        }
                        ws.send(Message::Text(format!("reply:{}", text))).await.unwrap();
                        replies += 1;
                        if limit == Some(replies) {
                            return;
                        }
                    }
                });
            }
        });

        (format!("ws://{}", addr), accepted)
    }

    fn multiplexer(url: String) -> RpcMultiplexer {
        RpcMultiplexer::new(url, Duration::from_secs(3), READ_TIMEOUT, 32)
    }

    #[tokio::test]
    async fn concurrent_requests_get_their_own_replies() {
        let (url, _) = spawn_server(None).await;
        let mux = multiplexer(url);
        let ctx = RequestContext::background();

        let requests = (0..16).map(|i| {
            let mux = &mux;
            async move {
                let payload = format!("request-{}", i);
                let reply = mux.request(&ctx, payload.clone()).await.unwrap();
                (payload, String::from_utf8(reply).unwrap())
            }
        });

        for (payload, reply) in join_all(requests).await {
            assert_eq!(reply, format!("reply:{}", payload));
        }
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_dial() {
        let (url, accepted) = spawn_server(None).await;
        let mux = multiplexer(url);
        let ctx = RequestContext::background();

        let requests = (0..8).map(|i| mux.request(&ctx, format!("hello-{}", i)));
        for reply in join_all(requests).await {
            reply.unwrap();
        }

        assert_eq!(mux.connections_opened(), 1);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn read_timeout_fails_only_that_caller() {
        let (url, accepted) = spawn_server(None).await;
        let mux = multiplexer(url);
        let ctx = RequestContext::background();

        let err = mux.request(&ctx, "silent".to_string()).await.unwrap_err();
        assert!(matches!(err, SwitcherError::Timeout(_)));

        let reply = mux.request(&ctx, "after".to_string()).await.unwrap();
        assert_eq!(reply, b"reply:after");
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn lost_connection_is_redialed_on_next_request() {
        let (url, accepted) = spawn_server(Some(1)).await;
        let mux = multiplexer(url);
        let ctx = RequestContext::background();

        assert_eq!(mux.request(&ctx, "one".to_string()).await.unwrap(), b"reply:one");

        let err = mux.request(&ctx, "two".to_string()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);

        assert_eq!(mux.request(&ctx, "three".to_string()).await.unwrap(), b"reply:three");
        assert_eq!(mux.connections_opened(), 2);
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unreachable_device_is_a_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mux = multiplexer(format!("ws://{}", addr));
        let err = mux
            .request(&RequestContext::background(), "hello".to_string())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
    }
}
