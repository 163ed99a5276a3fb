//! Fake relay, peer factory, and microphone for driving a session end to end.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{any, post},
};
use futures_util::{SinkExt, StreamExt};
use navtalk_realtime::{
    AudioError, Backends, IceConfiguration, IceServer, PeerEvent, PeerEventSink, PeerFactory,
    PeerLink, RealtimeSession, SessionConfig, SessionEvent, SessionStatus,
    capture::{ActiveCapture, Microphone},
    pcm::FRAME_SAMPLES,
    protocol::{IceCandidate, SessionDescription},
};
use serde_json::Value;
use std::{
    collections::HashMap,
    future::Future,
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio::{net::TcpListener, sync::mpsc, task::JoinHandle};

pub const LICENSE: &str = "lic-123";
pub const CHARACTER: &str = "navtalk.Lauren";
pub const VOICE: &str = "sage";
pub const PROMPT: &str = "Interview the candidate.";

/// Routes library logs through the test writer. Set `RUST_LOG` to see them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out waiting for the session")
}

/// Polls `condition` until it holds or five seconds pass.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    within(async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

// --- Relay ---

#[derive(Debug, Clone)]
pub enum IceReply {
    Status(u16),
    Json(Value),
}

enum Outgoing {
    Text(String),
    Close,
}

/// One accepted WebSocket on the fake relay.
pub struct RelayConn {
    pub query: HashMap<String, String>,
    incoming: mpsc::UnboundedReceiver<Value>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl RelayConn {
    pub fn send(&self, message: Value) {
        let _ = self.outgoing.send(Outgoing::Text(message.to_string()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.outgoing.send(Outgoing::Text(text.to_string()));
    }

    pub fn close(&self) {
        let _ = self.outgoing.send(Outgoing::Close);
    }

    pub async fn recv(&mut self) -> Value {
        within(self.incoming.recv())
            .await
            .expect("relay connection closed")
    }

    /// Skips messages until one of type `ty` arrives.
    pub async fn recv_type(&mut self, ty: &str) -> Value {
        loop {
            let message = self.recv().await;
            if message["type"] == ty {
                return message;
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Value> {
        self.incoming.try_recv().ok()
    }

    /// Waits for the client to hang up, skipping anything still in flight.
    pub async fn closed(&mut self) {
        within(async {
            while self.incoming.recv().await.is_some() {}
        })
        .await;
    }
}

#[derive(Clone)]
struct RelayState {
    control: mpsc::UnboundedSender<RelayConn>,
    signaling: mpsc::UnboundedSender<RelayConn>,
    ice_reply: Arc<Mutex<IceReply>>,
    ice_requests: Arc<AtomicUsize>,
}

pub struct FakeRelay {
    pub addr: SocketAddr,
    control: mpsc::UnboundedReceiver<RelayConn>,
    signaling: mpsc::UnboundedReceiver<RelayConn>,
    ice_reply: Arc<Mutex<IceReply>>,
    ice_requests: Arc<AtomicUsize>,
    server: JoinHandle<()>,
}

impl FakeRelay {
    pub async fn start(ice_reply: IceReply) -> Self {
        let (control_tx, control) = mpsc::unbounded_channel();
        let (signaling_tx, signaling) = mpsc::unbounded_channel();
        let ice_reply = Arc::new(Mutex::new(ice_reply));
        let ice_requests = Arc::new(AtomicUsize::new(0));
        let state = RelayState {
            control: control_tx,
            signaling: signaling_tx,
            ice_reply: ice_reply.clone(),
            ice_requests: ice_requests.clone(),
        };

        let app = Router::new()
            .route("/api/realtime-api", any(control_ws))
            .route("/api/webrtc", any(signaling_ws))
            .route("/api/webrtc/generate-ice-servers", post(ice_servers))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            addr,
            control,
            signaling,
            ice_reply,
            ice_requests,
            server,
        }
    }

    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    pub fn set_ice_reply(&self, reply: IceReply) {
        *self.ice_reply.lock().unwrap() = reply;
    }

    pub fn ice_requests(&self) -> usize {
        self.ice_requests.load(Ordering::SeqCst)
    }

    pub async fn next_control(&mut self) -> RelayConn {
        within(self.control.recv()).await.unwrap()
    }

    pub async fn next_signaling(&mut self) -> RelayConn {
        within(self.signaling.recv()).await.unwrap()
    }

    /// Whether a connection was accepted that no test has picked up yet.
    pub fn has_pending_connections(&self) -> bool {
        !self.control.is_empty() || !self.signaling.is_empty()
    }
}

impl Drop for FakeRelay {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn control_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<RelayState>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, query, state.control))
}

async fn signaling_ws(
    ws: WebSocketUpgrade,
    Query(query): Query<HashMap<String, String>>,
    State(state): State<RelayState>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, query, state.signaling))
}

async fn ice_servers(State(state): State<RelayState>) -> Response {
    state.ice_requests.fetch_add(1, Ordering::SeqCst);
    let reply = state.ice_reply.lock().unwrap().clone();
    match reply {
        IceReply::Status(code) => StatusCode::from_u16(code).unwrap().into_response(),
        IceReply::Json(body) => Json(body).into_response(),
    }
}

async fn serve_socket(
    socket: WebSocket,
    query: HashMap<String, String>,
    conns: mpsc::UnboundedSender<RelayConn>,
) {
    let (in_tx, incoming) = mpsc::unbounded_channel();
    let (outgoing, mut out_rx) = mpsc::unbounded_channel();
    let _ = conns.send(RelayConn {
        query,
        incoming,
        outgoing,
    });

    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            out = out_rx.recv() => match out {
                Some(Outgoing::Text(text)) => {
                    if sink.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Some(Outgoing::Close) | None => {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            },
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(value) = serde_json::from_str::<Value>(text.as_str()) {
                        let _ = in_tx.send(value);
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

// --- Peer connections ---

pub const FAKE_ANSWER_SDP: &str = "fake-answer";

pub struct FakePeer {
    pub ice: Vec<IceServer>,
    pub offers: Mutex<Vec<SessionDescription>>,
    pub candidates: Mutex<Vec<IceCandidate>>,
    pub closed: AtomicBool,
    events: PeerEventSink,
}

impl FakePeer {
    pub fn emit(&self, event: PeerEvent) {
        (self.events)(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerLink for FakePeer {
    async fn accept_offer(
        &self,
        offer: SessionDescription,
    ) -> navtalk_realtime::Result<SessionDescription> {
        self.offers.lock().unwrap().push(offer);
        Ok(SessionDescription::answer(FAKE_ANSWER_SDP))
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> navtalk_realtime::Result<()> {
        self.candidates.lock().unwrap().push(candidate);
        Ok(())
    }

    async fn close(&self) -> navtalk_realtime::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakePeerFactory {
    created: Mutex<Vec<Arc<FakePeer>>>,
}

impl FakePeerFactory {
    pub fn peers(&self) -> Vec<Arc<FakePeer>> {
        self.created.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerFactory for FakePeerFactory {
    async fn create(
        &self,
        ice: &IceConfiguration,
        events: PeerEventSink,
    ) -> navtalk_realtime::Result<Arc<dyn PeerLink>> {
        let peer = Arc::new(FakePeer {
            ice: ice.servers().to_vec(),
            offers: Mutex::default(),
            candidates: Mutex::default(),
            closed: AtomicBool::new(false),
            events,
        });
        self.created.lock().unwrap().push(peer.clone());
        Ok(peer)
    }
}

// --- Microphone ---

struct StaticCapture(u32);

impl ActiveCapture for StaticCapture {
    fn sample_rate(&self) -> u32 {
        self.0
    }

    fn stop(self: Box<Self>) -> Result<(), AudioError> {
        Ok(())
    }
}

/// Delivers exactly one full frame of a constant 0.5 signal at 24 kHz, or
/// refuses access.
#[derive(Default)]
pub struct FakeMicrophone {
    deny: bool,
    opens: AtomicUsize,
}

impl FakeMicrophone {
    pub fn denied() -> Self {
        Self {
            deny: true,
            opens: AtomicUsize::new(0),
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Microphone for FakeMicrophone {
    fn open(
        &self,
        samples: mpsc::UnboundedSender<Vec<f32>>,
    ) -> Result<Box<dyn ActiveCapture>, AudioError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if self.deny {
            return Err(AudioError::PermissionDenied("denied by user".into()));
        }
        let _ = samples.send(vec![0.5; FRAME_SAMPLES]);
        Ok(Box::new(StaticCapture(24_000)))
    }
}

// --- Session ---

pub struct Harness {
    pub relay: FakeRelay,
    pub peers: Arc<FakePeerFactory>,
    pub microphone: Arc<FakeMicrophone>,
    pub session: RealtimeSession,
    pub events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl Harness {
    pub async fn new(ice_reply: IceReply) -> Self {
        Self::with_microphone(ice_reply, FakeMicrophone::default()).await
    }

    pub async fn with_microphone(ice_reply: IceReply, microphone: FakeMicrophone) -> Self {
        init_tracing();
        let relay = FakeRelay::start(ice_reply).await;
        let peers = Arc::new(FakePeerFactory::default());
        let microphone = Arc::new(microphone);
        let config = SessionConfig::new(LICENSE, CHARACTER, VOICE, relay.host(), PROMPT)
            .with_tls(false);
        let backends = Backends {
            microphone: microphone.clone(),
            peers: peers.clone(),
            http: reqwest::Client::new(),
        };
        let (session, events) = RealtimeSession::spawn(config, backends);
        Self {
            relay,
            peers,
            microphone,
            session,
            events,
        }
    }

    pub async fn next_event(&mut self) -> SessionEvent {
        within(self.events.recv())
            .await
            .expect("session event channel closed")
    }

    /// Next event that is not a status change.
    pub async fn next_non_status(&mut self) -> SessionEvent {
        loop {
            match self.next_event().await {
                SessionEvent::StatusChanged { .. } => continue,
                other => return other,
            }
        }
    }

    pub async fn expect_status(&mut self, from: SessionStatus, to: SessionStatus) {
        assert_eq!(
            self.next_event().await,
            SessionEvent::StatusChanged { from, to }
        );
    }

    pub async fn wait_for_status(&self, status: SessionStatus) {
        let mut watch = self.session.watch_status();
        within(watch.wait_for(|current| *current == status))
            .await
            .expect("session dropped");
    }

    /// Starts the session and completes both socket handshakes.
    pub async fn start_connected(&mut self) -> (RelayConn, RelayConn) {
        self.session.start().await.unwrap();
        self.expect_status(SessionStatus::Idle, SessionStatus::Connecting)
            .await;
        let control = self.relay.next_control().await;
        let mut signaling = self.relay.next_signaling().await;
        self.expect_status(SessionStatus::Connecting, SessionStatus::Connected)
            .await;
        signaling.recv_type("create").await;
        (control, signaling)
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}
