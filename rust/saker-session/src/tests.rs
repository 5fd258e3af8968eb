use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use saker_wire::{ArgKind, ArgValue, FaultKind, Message, PeerId};
use tokio::sync::mpsc;

use super::*;

// ============================================================================
// In-memory transport
// ============================================================================

struct ChannelTransport {
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
}

fn transport_pair() -> (ChannelTransport, ChannelTransport) {
    let (a_tx, a_rx) = mpsc::unbounded_channel();
    let (b_tx, b_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport { tx: a_tx, rx: b_rx },
        ChannelTransport { tx: b_tx, rx: a_rx },
    )
}

impl MessageTransport for ChannelTransport {
    async fn send(&mut self, msg: &Message) -> io::Result<()> {
        self.tx
            .send(msg.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer transport dropped"))
    }

    async fn recv(&mut self) -> io::Result<Option<Message>> {
        Ok(self.rx.recv().await)
    }

    async fn recv_timeout(&mut self, timeout: Duration) -> io::Result<Option<Message>> {
        Ok(tokio::time::timeout(timeout, self.rx.recv())
            .await
            .unwrap_or(None))
    }
}

// ============================================================================
// Test interfaces
// ============================================================================

static ECHO: InterfaceDef = InterfaceDef {
    name: "test.Echo",
    methods: &[
        MethodDef {
            name: "ping",
            params: &[ArgKind::Str],
        },
        MethodDef {
            name: "pong",
            params: &[],
        },
    ],
};

static UNKNOWN: InterfaceDef = InterfaceDef {
    name: "test.Unknown",
    methods: &[MethodDef {
        name: "poke",
        params: &[],
    }],
};

struct EchoProxy {
    caller: Caller,
}

impl Proxy for EchoProxy {
    const INTERFACE: &'static InterfaceDef = &ECHO;

    fn bind(caller: Caller) -> Self {
        Self { caller }
    }
}

impl EchoProxy {
    fn ping(&self, text: &str) -> Result<(), CallError> {
        self.caller.call("ping", vec![ArgValue::Str(text.into())])
    }

    fn pong(&self) -> Result<(), CallError> {
        self.caller.call("pong", vec![])
    }
}

/// Echo implementation that reports every call on a channel.
struct RecordingEcho {
    instance: usize,
    calls: mpsc::UnboundedSender<(usize, String)>,
}

impl ServiceImpl for RecordingEcho {
    fn invoke(&self, call: CallArgs<'_>) -> Result<(), InvokeFault> {
        match call.method() {
            "ping" => {
                let text: String = call.arg(0)?;
                let _ = self.calls.send((self.instance, text));
                Ok(())
            }
            "pong" => {
                let _ = self.calls.send((self.instance, String::from("<pong>")));
                Ok(())
            }
            other => Err(InvokeFault::UnknownMethod {
                interface: ECHO.name.to_string(),
                method: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, PartialEq)]
enum SeenError {
    Remote(FaultKind),
    Invoke,
    Transport,
}

struct RecordingExceptions {
    tx: mpsc::UnboundedSender<(PeerId, SeenError)>,
}

impl ExceptionListener for RecordingExceptions {
    fn on_exception(&self, remote: &Remote, error: &RpcError) {
        let seen = match error {
            RpcError::Remote(fault) => SeenError::Remote(fault.kind),
            RpcError::Invoke(_) => SeenError::Invoke,
            RpcError::Transport(_) => SeenError::Transport,
        };
        let _ = self.tx.send((remote.id(), seen));
    }
}

// ============================================================================
// Session harness
// ============================================================================

struct Session {
    /// Server's handle to the connected client.
    client_remote: Remote,
    /// Client's handle to the server.
    server_remote: Remote,
    server_driver: tokio::task::JoinHandle<Result<(), ConnectionError>>,
    client_driver: tokio::task::JoinHandle<Result<(), ConnectionError>>,
}

async fn establish(server: &Arc<Endpoint>, client: &Arc<Endpoint>) -> Session {
    let (a, b) = transport_pair();
    let server_close = Arc::new(CloseSignal::new());
    let client_close = Arc::new(CloseSignal::new());

    let (accepted, initiated) = tokio::join!(
        accept_session(a, server.clone(), "mem:client".into(), server_close),
        initiate_session(
            b,
            client.clone(),
            "mem:server".into(),
            client_close,
            Duration::from_secs(5),
        ),
    );
    let (client_remote, server_driver) = accepted.expect("accept side");
    let (server_remote, client_driver) = initiated.expect("initiate side");

    Session {
        client_remote,
        server_remote,
        server_driver: tokio::spawn(server_driver.run()),
        client_driver: tokio::spawn(client_driver.run()),
    }
}

async fn recv_soon<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting")
        .expect("channel closed")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn echo_endpoint() -> (Arc<Endpoint>, mpsc::UnboundedReceiver<(usize, String)>) {
    let (calls_tx, calls_rx) = mpsc::unbounded_channel();
    let mut bindings = Bindings::new();
    bindings
        .add_shared(
            &ECHO,
            Arc::new(RecordingEcho {
                instance: 0,
                calls: calls_tx,
            }),
        )
        .unwrap();
    (
        Arc::new(Endpoint::new(bindings, Listeners::empty())),
        calls_rx,
    )
}

fn empty_endpoint() -> Arc<Endpoint> {
    Arc::new(Endpoint::new(Bindings::new(), Listeners::empty()))
}

// ============================================================================
// Registry
// ============================================================================

fn test_remote(id: u64) -> Remote {
    let (tx, _rx) = mpsc::unbounded_channel();
    Remote::new(
        PeerId::new(id),
        format!("mem:{id}"),
        tx,
        Arc::new(CloseSignal::new()),
    )
}

#[test]
fn registry_add_get_remove() {
    let registry = ClientRegistry::new();
    let remote = test_remote(7);
    registry.add(remote).unwrap();
    assert!(registry.contains(PeerId::new(7)));
    assert_eq!(registry.len(), 1);
    assert_eq!(
        registry.get(PeerId::new(7)).map(|r| r.id()),
        Some(PeerId::new(7))
    );

    let removed = registry.remove(PeerId::new(7)).unwrap();
    assert_eq!(removed.id(), PeerId::new(7));
    assert!(registry.is_empty());
    assert!(registry.remove(PeerId::new(7)).is_none());
}

#[test]
fn registry_rejects_duplicate_ids() {
    let registry = ClientRegistry::new();
    registry.add(test_remote(1)).unwrap();
    assert!(matches!(
        registry.add(test_remote(1)),
        Err(RegistryError::DuplicatePeer(_))
    ));
    assert_eq!(registry.len(), 1);
}

#[test]
fn registry_snapshot_is_stable() {
    let registry = ClientRegistry::new();
    registry.add(test_remote(1)).unwrap();
    registry.add(test_remote(2)).unwrap();
    let snapshot = registry.snapshot();
    registry.remove(PeerId::new(1));
    assert_eq!(snapshot.len(), 2);
    assert_eq!(registry.len(), 1);
}

// ============================================================================
// Bindings
// ============================================================================

#[test]
fn bindings_reject_interface_without_methods() {
    static NO_METHODS: InterfaceDef = InterfaceDef {
        name: "test.Empty",
        methods: &[],
    };
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut bindings = Bindings::new();
    let err = bindings
        .add_shared(
            &NO_METHODS,
            Arc::new(RecordingEcho {
                instance: 0,
                calls: tx,
            }),
        )
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInterface { .. }));
}

#[test]
fn bindings_reject_duplicate_method_signatures() {
    static DUPED: InterfaceDef = InterfaceDef {
        name: "test.Duped",
        methods: &[
            MethodDef {
                name: "go",
                params: &[ArgKind::I32],
            },
            MethodDef {
                name: "go",
                params: &[ArgKind::I32],
            },
        ],
    };
    let (tx, _rx) = mpsc::unbounded_channel();
    let mut bindings = Bindings::new();
    let err = bindings
        .add_shared(
            &DUPED,
            Arc::new(RecordingEcho {
                instance: 0,
                calls: tx,
            }),
        )
        .unwrap_err();
    assert!(matches!(err, RegistryError::InvalidInterface { .. }));
}

#[test]
fn bindings_allow_overloads_and_reject_duplicate_interfaces() {
    static OVERLOADED: InterfaceDef = InterfaceDef {
        name: "test.Overloaded",
        methods: &[
            MethodDef {
                name: "go",
                params: &[ArgKind::I32],
            },
            MethodDef {
                name: "go",
                params: &[ArgKind::Str],
            },
        ],
    };
    let (tx, _rx) = mpsc::unbounded_channel();
    let shared = Arc::new(RecordingEcho {
        instance: 0,
        calls: tx,
    });
    let mut bindings = Bindings::new();
    bindings.add_shared(&OVERLOADED, shared.clone()).unwrap();
    let err = bindings.add_shared(&OVERLOADED, shared).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateInterface(_)));
}

// ============================================================================
// Handshake & lifecycle
// ============================================================================

#[tokio::test]
async fn handshake_registers_peer_and_assigns_id() {
    init_tracing();
    let (server, _calls) = echo_endpoint();
    let client = empty_endpoint();

    let session = establish(&server, &client).await;

    assert_eq!(server.registry().len(), 1);
    assert!(server.registry().contains(session.client_remote.id()));
    // The identity the client carries is the one the server assigned.
    assert_eq!(session.server_remote.id(), session.client_remote.id());
}

#[tokio::test]
async fn ids_are_unique_across_connections() {
    let (server, _calls) = echo_endpoint();
    let client_a = empty_endpoint();
    let client_b = empty_endpoint();

    let session_a = establish(&server, &client_a).await;
    let session_b = establish(&server, &client_b).await;

    assert_ne!(session_a.client_remote.id(), session_b.client_remote.id());
    assert_eq!(server.registry().len(), 2);
}

#[tokio::test]
async fn close_removes_peer_from_registry() {
    let (server, _calls) = echo_endpoint();
    let client = empty_endpoint();

    let session = establish(&server, &client).await;
    assert_eq!(server.registry().len(), 1);

    session.server_remote.close();
    session.client_driver.await.unwrap().unwrap();
    session.server_driver.await.unwrap().unwrap();

    assert!(server.registry().is_empty());
    assert!(client.registry().is_empty());

    // Calls after close fail locally, fire-and-forget or not.
    let proxy: EchoProxy = session.server_remote.proxy();
    assert!(matches!(proxy.ping("late"), Err(CallError::ConnectionClosed)));
}

#[tokio::test]
async fn pre_handshake_traffic_is_dropped_leniently() {
    init_tracing();
    let (mut raw, server_side) = transport_pair();
    let (server, mut calls) = echo_endpoint();

    let accept = tokio::spawn(accept_session(
        server_side,
        server.clone(),
        "mem:raw".into(),
        Arc::new(CloseSignal::new()),
    ));

    // Traffic before the handshake: a keepalive race and a premature
    // invocation. Both must be dropped without killing the connection.
    raw.send(&Message::KeepAlive).await.unwrap();
    raw.send(&Message::InvocationRequest {
        interface: ECHO.name.to_string(),
        method: "ping".to_string(),
        params: vec![ArgKind::Str],
        args: vec![ArgValue::Str("early".into())],
    })
    .await
    .unwrap();
    raw.send(&Message::HandshakeFromClient).await.unwrap();

    let reply = raw.recv().await.unwrap().unwrap();
    assert!(matches!(reply, Message::HandshakeFromServer { .. }));

    let (_, driver) = accept.await.unwrap().unwrap();
    let driver_task = tokio::spawn(driver.run());

    // The connection is alive: a post-handshake invocation goes through.
    raw.send(&Message::InvocationRequest {
        interface: ECHO.name.to_string(),
        method: "ping".to_string(),
        params: vec![ArgKind::Str],
        args: vec![ArgValue::Str("on time".into())],
    })
    .await
    .unwrap();

    let (_, text) = recv_soon(&mut calls).await;
    assert_eq!(text, "on time");

    drop(raw);
    driver_task.await.unwrap().unwrap();
}

// ============================================================================
// Invocation
// ============================================================================

#[tokio::test]
async fn proxy_call_reaches_shared_instance_exactly_once() {
    let (server, mut calls) = echo_endpoint();
    let client = empty_endpoint();
    let session = establish(&server, &client).await;

    let proxy: EchoProxy = session.server_remote.proxy();
    proxy.ping("hi").unwrap();

    let (instance, text) = recv_soon(&mut calls).await;
    assert_eq!(instance, 0);
    assert_eq!(text, "hi");
    // Exactly one call arrived.
    assert!(calls.try_recv().is_err());
}

#[tokio::test]
async fn void_call_produces_no_reply() {
    let (server, mut calls) = echo_endpoint();

    let (client_exc_tx, mut client_exc_rx) = mpsc::unbounded_channel();
    let client = Arc::new(Endpoint::new(
        Bindings::new(),
        Listeners::new(
            Vec::new(),
            vec![Box::new(RecordingExceptions { tx: client_exc_tx })],
        ),
    ));
    let session = establish(&server, &client).await;

    let proxy: EchoProxy = session.server_remote.proxy();
    proxy.ping("quiet").unwrap();

    let _ = recv_soon(&mut calls).await;
    // Give any (wrong) reply time to arrive, then confirm silence.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(client_exc_rx.try_recv().is_err());
}

#[tokio::test]
async fn unregistered_interface_notifies_caller_and_keeps_connection() {
    let (server, mut calls) = echo_endpoint();

    let (exc_tx, mut exc_rx) = mpsc::unbounded_channel();
    let client = Arc::new(Endpoint::new(
        Bindings::new(),
        Listeners::new(
            Vec::new(),
            vec![Box::new(RecordingExceptions { tx: exc_tx })],
        ),
    ));
    let session = establish(&server, &client).await;

    let unknown = session.server_remote.caller(&UNKNOWN);
    unknown.call("poke", vec![]).unwrap();

    let (from, seen) = recv_soon(&mut exc_rx).await;
    assert_eq!(from, session.server_remote.id());
    assert_eq!(seen, SeenError::Remote(FaultKind::UnregisteredInterface));

    // Exactly one notify came back, and the connection still serves calls.
    assert!(exc_rx.try_recv().is_err());
    let proxy: EchoProxy = session.server_remote.proxy();
    proxy.ping("still alive").unwrap();
    let (_, text) = recv_soon(&mut calls).await;
    assert_eq!(text, "still alive");
}

#[tokio::test]
async fn invocation_failure_fires_local_listeners_too() {
    let (calls_tx, _calls_rx) = mpsc::unbounded_channel();
    let (server_exc_tx, mut server_exc_rx) = mpsc::unbounded_channel();

    let mut bindings = Bindings::new();
    bindings
        .add_shared(
            &ECHO,
            Arc::new(RecordingEcho {
                instance: 0,
                calls: calls_tx,
            }),
        )
        .unwrap();
    let server = Arc::new(Endpoint::new(
        bindings,
        Listeners::new(
            Vec::new(),
            vec![Box::new(RecordingExceptions { tx: server_exc_tx })],
        ),
    ));
    let client = empty_endpoint();
    let session = establish(&server, &client).await;

    // A method the interface does not declare: rejected by the caller side
    // before anything hits the wire.
    let caller = session.server_remote.caller(&ECHO);
    assert!(matches!(
        caller.call("nope", vec![]),
        Err(CallError::SignatureMismatch { .. })
    ));

    // Force a wire-level unknown method by sending the raw message.
    session
        .server_remote
        .send(Message::InvocationRequest {
            interface: ECHO.name.to_string(),
            method: "nope".to_string(),
            params: vec![],
            args: vec![],
        })
        .unwrap();

    let (_, seen) = recv_soon(&mut server_exc_rx).await;
    assert_eq!(seen, SeenError::Invoke);
}

#[tokio::test]
async fn caller_validates_argument_kinds() {
    let (server, _calls) = echo_endpoint();
    let client = empty_endpoint();
    let session = establish(&server, &client).await;

    let caller = session.server_remote.caller(&ECHO);
    let err = caller.call("ping", vec![ArgValue::I32(5)]).unwrap_err();
    assert!(matches!(err, CallError::SignatureMismatch { .. }));
}

// ============================================================================
// Providers
// ============================================================================

fn factory_endpoint(
    constructed: Arc<AtomicUsize>,
    calls_tx: mpsc::UnboundedSender<(usize, String)>,
) -> Arc<Endpoint> {
    let mut bindings = Bindings::new();
    bindings
        .add_factory(&ECHO, move |_remote| RecordingEcho {
            instance: constructed.fetch_add(1, Ordering::SeqCst),
            calls: calls_tx.clone(),
        })
        .unwrap();
    Arc::new(Endpoint::new(bindings, Listeners::empty()))
}

#[tokio::test]
async fn shared_provider_resolves_to_one_instance_across_connections() {
    let (server, mut calls) = echo_endpoint();
    let client_a = empty_endpoint();
    let client_b = empty_endpoint();
    let session_a = establish(&server, &client_a).await;
    let session_b = establish(&server, &client_b).await;

    session_a.server_remote.proxy::<EchoProxy>().ping("a").unwrap();
    session_b.server_remote.proxy::<EchoProxy>().ping("b").unwrap();

    let (instance_a, _) = recv_soon(&mut calls).await;
    let (instance_b, _) = recv_soon(&mut calls).await;
    assert_eq!(instance_a, instance_b);
}

#[tokio::test]
async fn factory_provider_constructs_once_per_connection() {
    let constructed = Arc::new(AtomicUsize::new(0));
    let (calls_tx, mut calls) = mpsc::unbounded_channel();
    let server = factory_endpoint(constructed.clone(), calls_tx);
    let client_a = empty_endpoint();
    let client_b = empty_endpoint();
    let session_a = establish(&server, &client_a).await;
    let session_b = establish(&server, &client_b).await;

    // Two different methods on the same connection: one construction.
    let proxy_a: EchoProxy = session_a.server_remote.proxy();
    proxy_a.ping("one").unwrap();
    proxy_a.pong().unwrap();

    let (first, _) = recv_soon(&mut calls).await;
    let (second, _) = recv_soon(&mut calls).await;
    assert_eq!(first, second);
    assert_eq!(constructed.load(Ordering::SeqCst), 1);

    // A second connection gets its own instance.
    session_b.server_remote.proxy::<EchoProxy>().ping("two").unwrap();
    let (third, _) = recv_soon(&mut calls).await;
    assert_ne!(third, first);
    assert_eq!(constructed.load(Ordering::SeqCst), 2);
}

/// Per-connection implementation that answers by calling back into its own
/// client.
struct CallbackEcho {
    remote: Remote,
}

impl FromRemote for CallbackEcho {
    fn from_remote(remote: Remote) -> Self {
        Self { remote }
    }
}

impl ServiceImpl for CallbackEcho {
    fn invoke(&self, call: CallArgs<'_>) -> Result<(), InvokeFault> {
        match call.method() {
            "ping" => {
                let text: String = call.arg(0)?;
                self.remote
                    .caller(&ECHO)
                    .call("ping", vec![ArgValue::Str(format!("re: {text}"))])
                    .map_err(|e| InvokeFault::failed(e.to_string()))
            }
            _ => Err(InvokeFault::UnknownMethod {
                interface: ECHO.name.to_string(),
                method: call.method().to_string(),
            }),
        }
    }
}

#[tokio::test]
async fn constructed_provider_receives_owning_remote() {
    let mut bindings = Bindings::new();
    bindings.add_constructed::<CallbackEcho>(&ECHO).unwrap();
    let server = Arc::new(Endpoint::new(bindings, Listeners::empty()));

    // The client serves Echo as well, so the server impl can call back.
    let (client, mut client_calls) = echo_endpoint();
    let session = establish(&server, &client).await;

    session.server_remote.proxy::<EchoProxy>().ping("marco").unwrap();

    let (_, text) = recv_soon(&mut client_calls).await;
    assert_eq!(text, "re: marco");
}

// ============================================================================
// Listeners
// ============================================================================

struct PanickingListener;

impl ClientListener for PanickingListener {
    fn on_connect(&self, _remote: &Remote) {
        panic!("listener exploded");
    }
}

struct RecordingClientListener {
    connects: mpsc::UnboundedSender<PeerId>,
    disconnects: mpsc::UnboundedSender<PeerId>,
}

impl ClientListener for RecordingClientListener {
    fn on_connect(&self, remote: &Remote) {
        let _ = self.connects.send(remote.id());
    }

    fn on_disconnect(&self, remote: &Remote) {
        let _ = self.disconnects.send(remote.id());
    }
}

#[tokio::test]
async fn panicking_listener_does_not_stop_later_listeners_or_connection() {
    let (connects_tx, mut connects_rx) = mpsc::unbounded_channel();
    let (disconnects_tx, mut disconnects_rx) = mpsc::unbounded_channel();

    let mut bindings = Bindings::new();
    let (calls_tx, mut calls) = mpsc::unbounded_channel();
    bindings
        .add_shared(
            &ECHO,
            Arc::new(RecordingEcho {
                instance: 0,
                calls: calls_tx,
            }),
        )
        .unwrap();
    let server = Arc::new(Endpoint::new(
        bindings,
        Listeners::new(
            vec![
                Box::new(PanickingListener),
                Box::new(RecordingClientListener {
                    connects: connects_tx,
                    disconnects: disconnects_tx,
                }),
            ],
            Vec::new(),
        ),
    ));
    let client = empty_endpoint();
    let session = establish(&server, &client).await;

    // The second listener ran despite the first panicking.
    let connected = recv_soon(&mut connects_rx).await;
    assert_eq!(connected, session.client_remote.id());

    // The connection reached Active: invocations work.
    session.server_remote.proxy::<EchoProxy>().ping("ok").unwrap();
    let (_, text) = recv_soon(&mut calls).await;
    assert_eq!(text, "ok");

    session.server_remote.close();
    session.client_driver.await.unwrap().unwrap();
    session.server_driver.await.unwrap().unwrap();
    let disconnected = recv_soon(&mut disconnects_rx).await;
    assert_eq!(disconnected, connected);
}

// ============================================================================
// Keepalive
// ============================================================================

#[tokio::test]
async fn zero_period_disables_keepalive() {
    let remote = test_remote(1);
    let monitor = KeepaliveMonitor::spawn(Duration::ZERO, move || vec![remote.clone()]);
    assert!(monitor.is_none());
}

#[tokio::test]
async fn keepalive_ticks_reach_targets() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let remote = Remote::new(
        PeerId::new(1),
        "mem:1".into(),
        tx,
        Arc::new(CloseSignal::new()),
    );
    let monitor =
        KeepaliveMonitor::spawn(Duration::from_millis(10), move || vec![remote.clone()])
            .expect("non-zero period spawns");

    let first = recv_soon(&mut rx).await;
    assert_eq!(first, Message::KeepAlive);
    let second = recv_soon(&mut rx).await;
    assert_eq!(second, Message::KeepAlive);

    monitor.shutdown().await;
}

#[tokio::test]
async fn keepalives_flow_end_to_end_and_are_ignored() {
    let (server, mut calls) = echo_endpoint();
    let client = empty_endpoint();
    let session = establish(&server, &client).await;

    let target = session.server_remote.clone();
    let monitor = KeepaliveMonitor::spawn(Duration::from_millis(10), move || vec![target.clone()])
        .expect("spawned");

    // Keepalives are absorbed server-side; normal traffic is unaffected.
    tokio::time::sleep(Duration::from_millis(40)).await;
    session.server_remote.proxy::<EchoProxy>().ping("among keepalives").unwrap();
    let (_, text) = recv_soon(&mut calls).await;
    assert_eq!(text, "among keepalives");

    monitor.shutdown().await;
}
