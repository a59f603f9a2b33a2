//! Hub connection manager with heartbeats, reconnection and durable subscriptions.
//!
//! A background worker owns the socket. The desired subscription set lives
//! outside the worker and is re-sent after every successful (re)connect, so
//! callers never re-issue `subscribe` after a drop.

use crate::config::HubClientConfig;
use crate::error::{ClientError, Result};
use crate::listeners::Listeners;
use common::{ControlMessage, SharedSubscriptions, SubscriptionSet, Update, UpdateType};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::{frame::coding::CloseCode, CloseFrame, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = futures::stream::SplitSink<WsStream, Message>;

/// Connection lifecycle as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientStatus {
    /// No lifecycle running (initial state, or after `disconnect`).
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    Connected,
    /// Waiting to retry; `attempt` counts from 1.
    Reconnecting { attempt: u32 },
    /// Reconnect budget spent; the worker has stopped.
    Failed { attempts: u32 },
}

/// Commands sent from the handle to the worker.
#[derive(Debug)]
enum ClientCommand {
    Send(ControlMessage),
    Shutdown,
}

/// How a connected session ended.
enum SessionEnd {
    Shutdown,
    Closed(ClientError),
}

/// State shared between the handle and the worker.
struct Shared {
    desired: SharedSubscriptions,
    listeners: Listeners,
    status: watch::Sender<ClientStatus>,
}

struct Worker {
    command_tx: mpsc::UnboundedSender<ClientCommand>,
    handle: JoinHandle<()>,
}

/// Client for the update hub.
pub struct HubClient {
    config: HubClientConfig,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl HubClient {
    pub fn new(config: HubClientConfig) -> Self {
        let (status, _) = watch::channel(ClientStatus::Disconnected);
        Self {
            config,
            shared: Arc::new(Shared {
                desired: SharedSubscriptions::new(),
                listeners: Listeners::new(),
                status,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &HubClientConfig {
        &self.config
    }

    /// Open the connection.
    ///
    /// Resolves after the first attempt. If it fails, the error is returned
    /// and the reconnect procedure continues in the background.
    pub async fn connect(&self) -> Result<()> {
        self.config.validate()?;

        let ready_rx = {
            let mut worker = self.worker.lock().await;
            if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
                return Err(ClientError::AlreadyConnected);
            }

            let (command_tx, command_rx) = mpsc::unbounded_channel();
            let (ready_tx, ready_rx) = oneshot::channel();
            self.shared.status.send_replace(ClientStatus::Connecting);

            let handle = tokio::spawn(run_worker(
                self.config.clone(),
                self.shared.clone(),
                command_rx,
                ready_tx,
            ));
            *worker = Some(Worker { command_tx, handle });
            ready_rx
        };

        ready_rx.await.map_err(|_| ClientError::ChannelClosed)?
    }

    /// Subscribe to `types`. Requires an open connection.
    pub async fn subscribe(&self, types: &[UpdateType]) -> Result<()> {
        let worker = self.worker.lock().await;
        let worker = self.connected_worker(&worker)?;
        self.shared.desired.add(types.iter().copied());
        worker
            .command_tx
            .send(ClientCommand::Send(ControlMessage::subscribe(
                types.iter().copied(),
            )))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Unsubscribe from `types`. Requires an open connection.
    pub async fn unsubscribe(&self, types: &[UpdateType]) -> Result<()> {
        let worker = self.worker.lock().await;
        let worker = self.connected_worker(&worker)?;
        self.shared.desired.remove(types.iter().copied());
        worker
            .command_tx
            .send(ClientCommand::Send(ControlMessage::unsubscribe(
                types.iter().copied(),
            )))
            .map_err(|_| ClientError::NotConnected)
    }

    /// Close the connection and forget all subscriptions.
    ///
    /// A later [`connect`](Self::connect) starts a fresh lifecycle.
    pub async fn disconnect(&self) {
        let worker = self.worker.lock().await.take();
        self.shared.desired.take();

        if let Some(worker) = worker {
            let _ = worker.command_tx.send(ClientCommand::Shutdown);
            if let Err(e) = worker.handle.await {
                warn!("Hub client worker ended abnormally: {}", e);
            }
        }

        self.shared.status.send_replace(ClientStatus::Disconnected);
        info!("Hub client disconnected");
    }

    /// Called for every received update.
    pub fn on_update<F>(&self, listener: F)
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        self.shared.listeners.add_any(Arc::new(listener));
    }

    /// Called for every received update of `update_type`.
    pub fn on_type<F>(&self, update_type: UpdateType, listener: F)
    where
        F: Fn(&Update) + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .add_for_type(update_type, Arc::new(listener));
    }

    /// Called for unparseable frames, dropped connections and the terminal
    /// [`ClientError::ReconnectExhausted`].
    pub fn on_error<F>(&self, listener: F)
    where
        F: Fn(&ClientError) + Send + Sync + 'static,
    {
        self.shared.listeners.add_error(Arc::new(listener));
    }

    pub fn status(&self) -> ClientStatus {
        *self.shared.status.borrow()
    }

    pub fn status_watch(&self) -> watch::Receiver<ClientStatus> {
        self.shared.status.subscribe()
    }

    /// Types that will be (re)asserted on every connect.
    pub fn desired_subscriptions(&self) -> SubscriptionSet {
        self.shared.desired.snapshot()
    }

    fn connected_worker<'a>(&self, worker: &'a Option<Worker>) -> Result<&'a Worker> {
        match worker {
            Some(w) if self.status() == ClientStatus::Connected => Ok(w),
            _ => Err(ClientError::NotConnected),
        }
    }
}

/// Connect, run sessions and reconnect until shutdown or the attempt budget runs out.
async fn run_worker(
    config: HubClientConfig,
    shared: Arc<Shared>,
    mut command_rx: mpsc::UnboundedReceiver<ClientCommand>,
    ready_tx: oneshot::Sender<Result<()>>,
) {
    let mut ready_tx = Some(ready_tx);
    let mut attempts: u32 = 0;

    loop {
        let result = tokio::select! {
            res = open_socket(&config) => res,
            _ = wait_for_shutdown(&mut command_rx) => break,
        };

        let failure = match result {
            Ok(ws) => {
                gauge!("hub_client_active_connections").increment(1.0);
                let end = run_session(
                    ws,
                    &config,
                    &shared,
                    &mut command_rx,
                    &mut ready_tx,
                    &mut attempts,
                )
                .await;
                gauge!("hub_client_active_connections").decrement(1.0);
                match end {
                    SessionEnd::Shutdown => break,
                    SessionEnd::Closed(e) => e,
                }
            }
            Err(e) => e,
        };

        warn!("Hub connection lost: {}", failure);
        match ready_tx.take() {
            Some(tx) => {
                let _ = tx.send(Err(failure));
            }
            None => shared.listeners.emit_error(&failure),
        }

        if attempts >= config.max_reconnect_attempts {
            error!(
                "Giving up on {} after {} reconnect attempts",
                config.url, attempts
            );
            shared
                .status
                .send_replace(ClientStatus::Failed { attempts });
            shared
                .listeners
                .emit_error(&ClientError::ReconnectExhausted { attempts });
            break;
        }

        attempts += 1;
        shared
            .status
            .send_replace(ClientStatus::Reconnecting { attempt: attempts });
        counter!("hub_client_reconnects_total").increment(1);
        info!(
            "Reconnecting in {:?} (attempt {}/{})",
            config.reconnect_interval, attempts, config.max_reconnect_attempts
        );

        tokio::select! {
            _ = sleep(config.reconnect_interval) => {}
            _ = wait_for_shutdown(&mut command_rx) => break,
        }
    }

    debug!("Hub client worker stopped");
}

async fn open_socket(config: &HubClientConfig) -> Result<WsStream> {
    info!("Connecting to hub: {}", config.url);
    let (ws, response) = timeout(config.connect_timeout, connect_async(config.url.as_str()))
        .await
        .map_err(|_| ClientError::ConnectTimeout(config.connect_timeout))??;
    debug!("WebSocket handshake complete, status: {:?}", response.status());
    Ok(ws)
}

/// Resolve on a shutdown command or a dropped handle. Other commands are
/// discarded: the desired subscription set already records them.
async fn wait_for_shutdown(command_rx: &mut mpsc::UnboundedReceiver<ClientCommand>) {
    loop {
        match command_rx.recv().await {
            Some(ClientCommand::Shutdown) | None => return,
            Some(ClientCommand::Send(msg)) => {
                debug!("Discarding {:?} while not connected", msg);
            }
        }
    }
}

async fn send_control(write: &mut WsWrite, msg: &ControlMessage) -> Result<()> {
    write.send(Message::Text(msg.to_json()?)).await?;
    Ok(())
}

/// Drive one connected session until it closes or shutdown is requested.
async fn run_session(
    ws: WsStream,
    config: &HubClientConfig,
    shared: &Shared,
    command_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    ready_tx: &mut Option<oneshot::Sender<Result<()>>>,
    attempts: &mut u32,
) -> SessionEnd {
    let (mut write, mut read) = ws.split();

    // Re-assert the desired subscriptions before reporting the connection open.
    let desired = shared.desired.snapshot();
    if !desired.is_empty() {
        debug!("Restoring subscriptions: {:?}", desired);
        if let Err(e) = send_control(&mut write, &ControlMessage::subscribe(desired.iter())).await
        {
            return SessionEnd::Closed(e);
        }
    }

    *attempts = 0;
    shared.status.send_replace(ClientStatus::Connected);
    if let Some(tx) = ready_tx.take() {
        let _ = tx.send(Ok(()));
    }
    info!("Connected to hub: {}", config.url);

    let mut heartbeat = interval(config.heartbeat_interval);
    heartbeat.reset(); // Don't fire immediately

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => shared.listeners.dispatch_raw(&text),
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => shared.listeners.dispatch_raw(text),
                        Err(_) => debug!("Ignoring non-UTF-8 binary frame"),
                    },
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            return SessionEnd::Closed(e.into());
                        }
                    }
                    Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        info!("Hub closed connection: {:?}", frame);
                        return SessionEnd::Closed(ClientError::ConnectionClosed);
                    }
                    Some(Err(e)) => return SessionEnd::Closed(e.into()),
                    None => return SessionEnd::Closed(ClientError::ConnectionClosed),
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(ClientCommand::Send(msg)) => {
                        debug!("Sending {:?}", msg);
                        if let Err(e) = send_control(&mut write, &msg).await {
                            return SessionEnd::Closed(e);
                        }
                    }
                    Some(ClientCommand::Shutdown) | None => {
                        let close_frame = CloseFrame {
                            code: CloseCode::Normal,
                            reason: "client disconnect".into(),
                        };
                        let _ = write.send(Message::Close(Some(close_frame))).await;
                        return SessionEnd::Shutdown;
                    }
                }
            }

            _ = heartbeat.tick() => {
                if let Err(e) = send_control(&mut write, &ControlMessage::Heartbeat).await {
                    return SessionEnd::Closed(e);
                }
            }
        }
    }
}
