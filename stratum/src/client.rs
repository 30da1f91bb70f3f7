//! Upstream stratum client
//!
//! One logical connection to a pool. `connect()` starts a supervisor task that dials the pool,
//! runs the reader loop, and redials after `reconnect_delay` whenever the pool drops the
//! connection. Connection changes and server-pushed notifications are reported through an
//! unbounded channel of [`ClientEvent`]s, in arrival order.

use crate::connection::{self, MessageReader, MessageWriter};
use crate::error::{StratumError, StratumResult};
use crate::protocol::{StratumMessage, StratumRequest};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub reconnect_delay: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, reconnect_delay: Duration::from_secs(5), request_timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// First connection after `connect()`
    Connected,
    /// Connection re-established after the pool dropped it
    Reconnected,
    /// The pool dropped the connection; a redial is scheduled
    Disconnected,
    /// Server-pushed notification such as `mining.notify`
    Notification { method: String, params: Vec<Value> },
}

type PendingMap = HashMap<u64, oneshot::Sender<StratumResult<Value>>>;

struct Supervisor {
    shutdown: triggered::Trigger,
    task: JoinHandle<()>,
}

struct Shared {
    config: ClientConfig,
    events: mpsc::UnboundedSender<ClientEvent>,
    pending: Mutex<PendingMap>,
    outgoing: Mutex<Option<mpsc::UnboundedSender<StratumRequest>>>,
    connected: AtomicBool,
}

pub struct StratumClient {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    supervisor: Mutex<Option<Supervisor>>,
}

impl StratumClient {
    pub fn new(config: ClientConfig, events: mpsc::UnboundedSender<ClientEvent>) -> Self {
        let shared = Shared {
            config,
            events,
            pending: Mutex::new(HashMap::new()),
            outgoing: Mutex::new(None),
            connected: AtomicBool::new(false),
        };
        Self { shared: Arc::new(shared), next_id: AtomicU64::new(1), supervisor: Mutex::new(None) }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// Start dialing the pool. No-op while a previous `connect()` is still active.
    pub fn connect(&self) {
        let mut supervisor = self.supervisor.lock();
        if supervisor.is_some() {
            return;
        }

        let (shutdown, listener) = triggered::trigger();
        let task = tokio::spawn(supervise(self.shared.clone(), listener));
        *supervisor = Some(Supervisor { shutdown, task });
    }

    /// Close the connection and stop redialing. Pending requests fail with `Disconnected`.
    pub fn close(&self) {
        if let Some(supervisor) = self.supervisor.lock().take() {
            supervisor.shutdown.trigger();
            supervisor.task.abort();
        }
        self.shared.teardown();
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Send a request and wait for the pool's answer.
    ///
    /// An error object in the response becomes `StratumError::PoolError`.
    pub async fn request(&self, method: &str, params: Vec<Value>) -> StratumResult<Value> {
        let outgoing = self.shared.outgoing.lock().clone().ok_or(StratumError::NotConnected)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);

        if outgoing.send(StratumRequest::new(id, method, params)).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(StratumError::Disconnected);
        }

        match tokio::time::timeout(self.shared.config.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(StratumError::Disconnected),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                log::warn!("{} request {} to {}:{} timed out", method, id, self.shared.config.host, self.shared.config.port);
                Err(StratumError::Timeout)
            }
        }
    }
}

impl Drop for StratumClient {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.shutdown.trigger();
            supervisor.task.abort();
        }
    }
}

impl Shared {
    fn teardown(&self) {
        self.outgoing.lock().take();
        self.connected.store(false, Ordering::Release);
        for (_, waiter) in self.pending.lock().drain() {
            let _ = waiter.send(Err(StratumError::Disconnected));
        }
    }

    fn emit(&self, event: ClientEvent) {
        // The receiver goes away with the owning proxy; nothing left to notify then.
        let _ = self.events.send(event);
    }

    fn dispatch(&self, message: StratumMessage) {
        match message {
            StratumMessage::Response(response) => {
                let Some(id) = response.id else {
                    log::debug!("Ignoring response without id: {:?}", response);
                    return;
                };
                match self.pending.lock().remove(&id) {
                    Some(waiter) => {
                        let _ = waiter.send(response.into_result().map_err(StratumError::PoolError));
                    }
                    None => log::debug!("Response for unknown request id {}", id),
                }
            }
            StratumMessage::Request(request) if request.is_notification() => {
                self.emit(ClientEvent::Notification { method: request.method, params: request.params });
            }
            StratumMessage::Request(request) => {
                log::debug!("Ignoring server request {} (id {:?})", request.method, request.id);
            }
        }
    }
}

async fn supervise(shared: Arc<Shared>, shutdown: triggered::Listener) {
    let config = shared.config.clone();
    let mut established = false;

    loop {
        let dialed = tokio::select! {
            biased;
            _ = shutdown.clone() => break,
            dialed = connection::connect(&config.host, config.port) => dialed,
        };

        match dialed {
            Ok((reader, writer)) => {
                let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
                *shared.outgoing.lock() = Some(outgoing_tx);
                shared.connected.store(true, Ordering::Release);
                log::info!("Connected to pool {}:{}", config.host, config.port);
                shared.emit(if established { ClientEvent::Reconnected } else { ClientEvent::Connected });
                established = true;

                let writer_task = tokio::spawn(write_loop(writer, outgoing_rx));
                let closed_locally = tokio::select! {
                    biased;
                    _ = shutdown.clone() => true,
                    _ = read_loop(&shared, reader) => false,
                };
                writer_task.abort();
                shared.teardown();

                if closed_locally {
                    break;
                }
                log::warn!("Pool {}:{} closed the connection", config.host, config.port);
                shared.emit(ClientEvent::Disconnected);
            }
            Err(e) => log::warn!("Failed to connect to pool {}:{}: {}", config.host, config.port, e),
        }

        tokio::select! {
            biased;
            _ = shutdown.clone() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
    }
    log::debug!("Supervisor for {}:{} stopped", config.host, config.port);
}

async fn read_loop(shared: &Shared, mut reader: MessageReader) {
    loop {
        match reader.read_message().await {
            Ok(Some(message)) => shared.dispatch(message),
            Ok(None) => return,
            Err(e) if e.is_fatal() => {
                log::warn!("Read from pool failed: {}", e);
                return;
            }
            Err(e) => log::warn!("Dropping message from pool: {}", e),
        }
    }
}

async fn write_loop(mut writer: MessageWriter, mut outgoing: mpsc::UnboundedReceiver<StratumRequest>) {
    while let Some(request) = outgoing.recv().await {
        if let Err(e) = writer.write_request(&request).await {
            log::warn!("Write to pool failed: {}", e);
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::parse_message;
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    struct FakePool {
        lines: tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
        writer: tokio::net::tcp::OwnedWriteHalf,
    }

    impl FakePool {
        async fn accept(listener: &TcpListener) -> Self {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, writer) = socket.into_split();
            Self { lines: BufReader::new(read_half).lines(), writer }
        }

        async fn next_request(&mut self) -> StratumRequest {
            let line = self.lines.next_line().await.unwrap().unwrap();
            match parse_message(line.as_bytes()).unwrap() {
                StratumMessage::Request(request) => request,
                other => panic!("unexpected message {:?}", other),
            }
        }

        async fn send(&mut self, value: Value) {
            self.writer.write_all(format!("{}\n", value).as_bytes()).await.unwrap();
        }
    }

    fn test_client(port: u16) -> (Arc<StratumClient>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = ClientConfig {
            reconnect_delay: Duration::from_millis(20),
            request_timeout: Duration::from_millis(500),
            ..ClientConfig::new("127.0.0.1", port)
        };
        (Arc::new(StratumClient::new(config, tx)), rx)
    }

    #[tokio::test]
    async fn test_request_response_and_notification() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (client, mut events) = test_client(listener.local_addr().unwrap().port());

        assert!(matches!(client.request("mining.subscribe", vec![]).await, Err(StratumError::NotConnected)));

        client.connect();
        client.connect();
        let mut pool = FakePool::accept(&listener).await;
        assert_eq!(events.recv().await, Some(ClientEvent::Connected));
        assert!(client.is_connected());

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.request("mining.authorize", vec![json!("user"), json!("pass")]).await });
        let request = pool.next_request().await;
        assert_eq!(request.method, "mining.authorize");
        assert_eq!(request.params, vec![json!("user"), json!("pass")]);
        pool.send(json!({"id": request.id, "result": true, "error": null})).await;
        assert_eq!(call.await.unwrap().unwrap(), json!(true));

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.request("mining.submit", vec![]).await });
        let request = pool.next_request().await;
        pool.send(json!({"id": request.id, "result": null, "error": [23, "Low difficulty share", null]})).await;
        match call.await.unwrap() {
            Err(StratumError::PoolError(reason)) => assert_eq!(reason, "Low difficulty share (code 23)"),
            other => panic!("unexpected result {:?}", other),
        }

        pool.send(json!({"id": null, "method": "mining.set_difficulty", "params": [131072]})).await;
        assert_eq!(
            events.recv().await,
            Some(ClientEvent::Notification { method: "mining.set_difficulty".to_string(), params: vec![json!(131072)] })
        );

        client.close();
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_reconnects_after_pool_drop() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (client, mut events) = test_client(listener.local_addr().unwrap().port());

        client.connect();
        let mut pool = FakePool::accept(&listener).await;
        assert_eq!(events.recv().await, Some(ClientEvent::Connected));

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.request("mining.subscribe", vec![]).await });
        pool.next_request().await;
        drop(pool);

        assert_eq!(events.recv().await, Some(ClientEvent::Disconnected));
        assert!(matches!(call.await.unwrap(), Err(StratumError::Disconnected)));

        let _pool = FakePool::accept(&listener).await;
        assert_eq!(events.recv().await, Some(ClientEvent::Reconnected));
        client.close();
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let (client, mut events) = test_client(listener.local_addr().unwrap().port());

        client.connect();
        let mut pool = FakePool::accept(&listener).await;
        assert_eq!(events.recv().await, Some(ClientEvent::Connected));

        let caller = client.clone();
        let call = tokio::spawn(async move { caller.request("mining.subscribe", vec![]).await });
        pool.next_request().await;
        assert!(matches!(call.await.unwrap(), Err(StratumError::Timeout)));
        assert!(client.shared.pending.lock().is_empty());

        client.close();
    }
}
