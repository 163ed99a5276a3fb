//! The session orchestrator.
//!
//! [`RealtimeSession`] is a handle to an actor task that owns every piece of
//! session state: both sockets, the peer connection, the audio pipeline, the
//! status machine, and the open response transcripts. Caller commands and
//! internal events (socket callbacks, ICE discovery, peer callbacks, capture
//! reports) are processed one at a time, so no state is shared or locked.
//!
//! Every `start` opens a new epoch and every peer connection gets a new
//! generation; events carrying an older tag are dropped on arrival.

use crate::{
    capture::{AudioPipeline, CaptureEvent, CpalMicrophone, Microphone},
    config::SessionConfig,
    control::{ControlAction, ControlChannel, actions_for},
    error::{RealtimeError, Result},
    event::{
        CONNECTION_ERROR_MESSAGE, MEDIA_FAILED_MESSAGE, MICROPHONE_ERROR_MESSAGE,
        SIGNALING_ERROR_MESSAGE, SessionEvent,
    },
    ice::{IceConfiguration, IceServer, discover_ice_servers},
    peer::{PeerEvent, PeerEventSink, PeerFactory, PeerLink, PeerState, WebRtcPeerFactory},
    protocol::{IceCandidate, ServerEvent, SessionDescription, SignalingInbound},
    signaling::{SignalingChannel, send_answer, send_candidate},
    socket::SocketEvent,
    status::{SessionStatus, StatusMachine, Transition},
    teardown::ReleaseStack,
    transcript::ResponseAccumulator,
};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{Instrument, debug, info, info_span, trace, warn};

/// The collaborators a session drives. Swapped out in tests.
#[derive(Clone)]
pub struct Backends {
    pub microphone: Arc<dyn Microphone>,
    pub peers: Arc<dyn PeerFactory>,
    pub http: reqwest::Client,
}

impl Backends {
    /// The default input device, webrtc-rs, and a fresh HTTP client.
    pub fn system() -> Result<Self> {
        Ok(Self {
            microphone: Arc::new(CpalMicrophone),
            peers: Arc::new(WebRtcPeerFactory::new()),
            http: reqwest::Client::builder().build()?,
        })
    }
}

/// Point-in-time view of a session, mostly for diagnostics and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub control_open: bool,
    pub signaling_open: bool,
    pub peer_present: bool,
    pub audio_active: bool,
    pub open_responses: usize,
}

enum Command {
    Start(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
    RequestResponse,
    Snapshot(oneshot::Sender<SessionSnapshot>),
}

enum Internal {
    Control(SocketEvent<ServerEvent>),
    Signaling(SocketEvent<SignalingInbound>),
    IceLookup {
        offer: SessionDescription,
        target: String,
        outcome: Result<Vec<IceServer>>,
    },
    Answer {
        generation: u64,
        outcome: Result<SessionDescription>,
    },
    Peer {
        generation: u64,
        event: PeerEvent,
    },
    Capture(CaptureEvent),
}

struct Tagged {
    epoch: u64,
    event: Internal,
}

/// Handle to a running session actor. Dropping every clone of the handle
/// stops the session.
#[derive(Clone)]
pub struct RealtimeSession {
    commands: mpsc::UnboundedSender<Command>,
    status: watch::Receiver<SessionStatus>,
}

impl RealtimeSession {
    /// Spawns the actor. Must be called inside a tokio runtime. Events are
    /// delivered in emission order on the returned receiver.
    pub fn spawn(
        config: SessionConfig,
        backends: Backends,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(SessionStatus::Idle);

        let span = info_span!("realtime_session", character = %config.character_name);
        let actor = SessionActor {
            config,
            backends,
            events: events_tx,
            status_tx,
            machine: StatusMachine::new(),
            internal_tx,
            epoch: None,
            next_epoch: 0,
            generation: 0,
            control: None,
            signaling: None,
            peer: None,
            audio: None,
            ice: IceConfiguration::default(),
            responses: ResponseAccumulator::new(),
        };
        tokio::spawn(actor.run(commands_rx, internal_rx).instrument(span));

        (
            Self {
                commands: commands_tx,
                status: status_rx,
            },
            events_rx,
        )
    }

    /// Connects both sockets. If the session is not idle it is stopped first.
    pub async fn start(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Start(tx))?;
        rx.await.map_err(|_| RealtimeError::SessionGone)
    }

    /// Releases everything the session holds. Safe to call at any time and
    /// any number of times.
    pub async fn stop(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Stop(tx))?;
        rx.await.map_err(|_| RealtimeError::SessionGone)
    }

    /// Asks the assistant to respond now. Ignored while the control socket is
    /// not open.
    pub fn request_assistant_response(&self) -> Result<()> {
        self.send(Command::RequestResponse)
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.borrow()
    }

    /// A receiver that observes every accepted status change.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Snapshot(tx))?;
        rx.await.map_err(|_| RealtimeError::SessionGone)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| RealtimeError::SessionGone)
    }
}

struct PeerSlot {
    generation: u64,
    link: Arc<dyn PeerLink>,
    target: String,
}

struct SessionActor {
    config: SessionConfig,
    backends: Backends,
    events: mpsc::UnboundedSender<SessionEvent>,
    status_tx: watch::Sender<SessionStatus>,
    machine: StatusMachine,
    internal_tx: mpsc::UnboundedSender<Tagged>,
    epoch: Option<u64>,
    next_epoch: u64,
    generation: u64,
    control: Option<ControlChannel>,
    signaling: Option<SignalingChannel>,
    peer: Option<PeerSlot>,
    audio: Option<AudioPipeline>,
    ice: IceConfiguration,
    responses: ResponseAccumulator,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut internal: mpsc::UnboundedReceiver<Tagged>,
    ) {
        debug!("Session actor started");
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(tagged) = internal.recv() => {
                    if Some(tagged.epoch) == self.epoch {
                        self.handle_internal(tagged.event).await;
                    } else {
                        trace!(epoch = tagged.epoch, "Dropping event from a finished run");
                    }
                }
            }
        }
        if self.epoch.is_some() {
            self.stop_session().await;
        }
        debug!("Session actor exited");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                self.start_session().await;
                let _ = reply.send(());
            }
            Command::Stop(reply) => {
                self.stop_session().await;
                let _ = reply.send(());
            }
            Command::RequestResponse => self.request_response(),
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            status: self.machine.current(),
            control_open: self.control.as_ref().is_some_and(ControlChannel::is_open),
            signaling_open: self
                .signaling
                .as_ref()
                .is_some_and(SignalingChannel::is_open),
            peer_present: self.peer.is_some(),
            audio_active: self.audio.is_some(),
            open_responses: self.responses.len(),
        }
    }

    async fn start_session(&mut self) {
        if self.machine.current() != SessionStatus::Idle {
            self.stop_session().await;
        }

        let epoch = self.next_epoch;
        self.next_epoch += 1;
        self.epoch = Some(epoch);
        info!(epoch, host = %self.config.host, "Starting session");
        self.set_status(SessionStatus::Connecting);

        let tx = self.internal_tx.clone();
        self.control = Some(ControlChannel::connect(&self.config, move |event| {
            let _ = tx.send(Tagged {
                epoch,
                event: Internal::Control(event),
            });
        }));
        let tx = self.internal_tx.clone();
        self.signaling = Some(SignalingChannel::connect(&self.config, move |event| {
            let _ = tx.send(Tagged {
                epoch,
                event: Internal::Signaling(event),
            });
        }));
    }

    async fn stop_session(&mut self) {
        self.set_status(SessionStatus::Stopped);

        let mut release = ReleaseStack::new();
        if let Some(control) = self.control.take() {
            release.defer("control socket", move || async move { control.close() });
        }
        if let Some(signaling) = self.signaling.take() {
            release.defer("signaling socket", move || async move { signaling.close() });
        }
        if let Some(peer) = self.peer.take() {
            let sink = self.config.media_sink.clone();
            release.defer("peer connection", move || async move {
                let closed = peer.link.close().await;
                if let Some(sink) = sink {
                    sink.detach();
                }
                closed
            });
        }
        if let Some(audio) = self.audio.take() {
            release.defer("audio pipeline", move || async move {
                audio.stop().await;
                Ok(())
            });
        }
        release.release_all().await;

        self.responses.clear();
        if let Some(epoch) = self.epoch.take() {
            info!(epoch, "Session stopped");
        }
    }

    fn set_status(&mut self, to: SessionStatus) {
        match self.machine.apply(to) {
            Transition::Changed { from, to } => {
                debug!(%from, %to, "Status changed");
                self.status_tx.send_replace(to);
                self.emit(SessionEvent::StatusChanged { from, to });
            }
            Transition::Unchanged => {}
            Transition::Rejected { from, to } => {
                debug!(%from, %to, "Ignoring status write");
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            trace!("Event receiver dropped");
        }
    }

    fn request_response(&self) {
        if let Some(control) = &self.control {
            if let Err(e) = control.request_response() {
                warn!(error = %e, "Failed to request assistant response");
            }
        }
    }

    async fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Control(event) => self.on_control(event).await,
            Internal::Signaling(event) => self.on_signaling(event).await,
            Internal::IceLookup {
                offer,
                target,
                outcome,
            } => self.negotiate(offer, target, outcome).await,
            Internal::Answer {
                generation,
                outcome,
            } => self.on_answer(generation, outcome),
            Internal::Peer { generation, event } => self.on_peer(generation, event),
            Internal::Capture(event) => self.on_capture(event).await,
        }
    }

    async fn on_control(&mut self, event: SocketEvent<ServerEvent>) {
        match event {
            SocketEvent::Opened => self.set_status(SessionStatus::Connected),
            SocketEvent::Message(message) => {
                trace!(?message, "Control message");
                for action in actions_for(message, &mut self.responses) {
                    self.apply(action);
                }
            }
            SocketEvent::Error(error) => {
                warn!(%error, "Control socket error");
                self.set_status(SessionStatus::Error);
                self.emit(SessionEvent::error(CONNECTION_ERROR_MESSAGE));
            }
            SocketEvent::Closed => {
                info!("Control socket closed; stopping session");
                self.stop_session().await;
            }
        }
    }

    fn apply(&mut self, action: ControlAction) {
        match action {
            ControlAction::SendSessionUpdate => {
                if let Some(control) = &self.control {
                    match control.send_session_update(&self.config) {
                        Ok(true) => debug!("Sent session.update"),
                        Ok(false) => debug!("Control socket not open; skipping session.update"),
                        Err(e) => warn!(error = %e, "Failed to send session.update"),
                    }
                }
            }
            ControlAction::RequestResponse => self.request_response(),
            ControlAction::StartAudio => self.start_audio(),
            ControlAction::SetStatus(status) => self.set_status(status),
            ControlAction::Emit(event) => self.emit(event),
        }
    }

    fn start_audio(&mut self) {
        if self.audio.is_some() {
            trace!("Audio capture already running");
            return;
        }
        if !self.machine.current().is_active() {
            debug!(status = %self.machine.current(), "Not starting audio capture");
            return;
        }
        let (Some(epoch), Some(control)) = (self.epoch, &self.control) else {
            return;
        };
        let tx = self.internal_tx.clone();
        self.audio = Some(AudioPipeline::start(
            self.backends.microphone.clone(),
            control.outbound(),
            move |event| {
                let _ = tx.send(Tagged {
                    epoch,
                    event: Internal::Capture(event),
                });
            },
        ));
    }

    async fn on_capture(&mut self, event: CaptureEvent) {
        match event {
            CaptureEvent::Started { sample_rate } => {
                debug!(sample_rate, "Audio capture running");
            }
            CaptureEvent::Failed(error) => {
                warn!(%error, "Unable to start audio capture");
                self.emit(SessionEvent::error(MICROPHONE_ERROR_MESSAGE));
                if let Some(audio) = self.audio.take() {
                    audio.stop().await;
                }
            }
        }
    }

    async fn on_signaling(&mut self, event: SocketEvent<SignalingInbound>) {
        match event {
            SocketEvent::Opened => {
                if let Some(signaling) = &self.signaling {
                    if let Err(e) = signaling.register() {
                        warn!(error = %e, "Failed to register with signaling relay");
                    }
                }
            }
            SocketEvent::Message(SignalingInbound::Offer {
                sdp,
                target_session_id,
            }) => {
                let target = match (target_session_id, &self.signaling) {
                    (Some(target), _) => target,
                    (None, Some(signaling)) => signaling.target_session_id().to_string(),
                    (None, None) => return,
                };
                self.lookup_ice_servers(sdp.into_description(), target);
            }
            SocketEvent::Message(SignalingInbound::IceCandidate { candidate }) => {
                self.add_remote_candidate(candidate).await;
            }
            SocketEvent::Message(SignalingInbound::Other) => {}
            SocketEvent::Error(error) => {
                warn!(%error, "Signaling socket error");
                self.emit(SessionEvent::error(SIGNALING_ERROR_MESSAGE));
            }
            SocketEvent::Closed => info!("Signaling socket closed"),
        }
    }

    /// Discovery runs off the actor so other events keep flowing meanwhile.
    fn lookup_ice_servers(&self, offer: SessionDescription, target: String) {
        let Some(epoch) = self.epoch else {
            return;
        };
        let http = self.backends.http.clone();
        let url = self.config.ice_servers_url();
        let tx = self.internal_tx.clone();
        debug!(%url, "Offer received; fetching ICE servers");
        tokio::spawn(async move {
            let outcome = discover_ice_servers(&http, &url).await;
            let _ = tx.send(Tagged {
                epoch,
                event: Internal::IceLookup {
                    offer,
                    target,
                    outcome,
                },
            });
        });
    }

    async fn teardown_peer(&mut self) {
        let Some(peer) = self.peer.take() else {
            return;
        };
        debug!(generation = peer.generation, "Tearing down peer connection");
        if let Err(e) = peer.link.close().await {
            debug!(error = %e, "Peer close failed; ignoring");
        }
        if let Some(sink) = &self.config.media_sink {
            sink.detach();
        }
    }

    async fn negotiate(
        &mut self,
        offer: SessionDescription,
        target: String,
        outcome: Result<Vec<IceServer>>,
    ) {
        let Some(epoch) = self.epoch else {
            return;
        };
        self.ice.apply_discovery(outcome);
        self.teardown_peer().await;

        self.generation += 1;
        let generation = self.generation;
        let tx = self.internal_tx.clone();
        let events: PeerEventSink = Arc::new(move |event| {
            let _ = tx.send(Tagged {
                epoch,
                event: Internal::Peer { generation, event },
            });
        });
        let link = match self.backends.peers.create(&self.ice, events).await {
            Ok(link) => link,
            Err(e) => {
                warn!(error = %e, "Failed to create peer connection");
                return;
            }
        };
        info!(generation, "Peer connection created");
        self.peer = Some(PeerSlot {
            generation,
            link: link.clone(),
            target,
        });

        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let outcome = link.accept_offer(offer).await;
            let _ = tx.send(Tagged {
                epoch,
                event: Internal::Answer {
                    generation,
                    outcome,
                },
            });
        });
    }

    fn current_peer(&self, generation: u64) -> Option<&PeerSlot> {
        self.peer
            .as_ref()
            .filter(|peer| peer.generation == generation)
    }

    fn on_answer(&mut self, generation: u64, outcome: Result<SessionDescription>) {
        let Some(peer) = self.current_peer(generation) else {
            trace!(generation, "Dropping answer for a replaced peer connection");
            return;
        };
        let answer = match outcome {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "Offer negotiation failed");
                return;
            }
        };
        let Some(signaling) = &self.signaling else {
            return;
        };
        match send_answer(&signaling.outbound(), &peer.target, answer) {
            Ok(true) => debug!(generation, "Sent answer"),
            Ok(false) => debug!("Signaling socket not open; answer dropped"),
            Err(e) => warn!(error = %e, "Failed to send answer"),
        }
    }

    fn on_peer(&mut self, generation: u64, event: PeerEvent) {
        let Some(peer) = self.current_peer(generation) else {
            trace!(generation, "Dropping event from a replaced peer connection");
            return;
        };
        match event {
            PeerEvent::LocalCandidate(candidate) => {
                let Some(signaling) = &self.signaling else {
                    return;
                };
                if let Err(e) = send_candidate(&signaling.outbound(), &peer.target, candidate) {
                    warn!(error = %e, "Failed to forward local ICE candidate");
                }
            }
            PeerEvent::Track(track) => match &self.config.media_sink {
                Some(sink) => {
                    sink.attach(track);
                    if let Err(e) = sink.play() {
                        warn!(error = %e, "Failed to start remote media playback");
                    }
                }
                None => debug!("No media sink configured; ignoring remote track"),
            },
            PeerEvent::StateChanged(PeerState::Connected) => {
                self.set_status(SessionStatus::Ready);
            }
            PeerEvent::StateChanged(PeerState::Failed) => {
                self.emit(SessionEvent::error(MEDIA_FAILED_MESSAGE));
            }
            PeerEvent::StateChanged(state) => debug!(?state, "Peer state"),
        }
    }

    async fn add_remote_candidate(&mut self, candidate: Option<IceCandidate>) {
        let (Some(peer), Some(candidate)) = (&self.peer, candidate) else {
            trace!("Dropping remote ICE candidate");
            return;
        };
        if let Err(e) = peer.link.add_remote_candidate(candidate).await {
            warn!(error = %e, "Failed to add remote ICE candidate");
        }
    }
}
