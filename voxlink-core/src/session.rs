//! `LiveSession`: the listen → think → speak loop.
//!
//! Wires a `CaptureEngine`, a `Transport` and a `PlaybackScheduler` together:
//!
//! - emitted payloads are encoded and sent while connected, dropped otherwise
//! - `VAD_START` barges in: playback is cleared and `cancel_response` sent
//! - `VAD_END` moves to `thinking`; inbound audio moves to `speaking`
//! - a lost connection is re-established with backoff in the background
//!
//! The session task owns the scheduler; nothing else touches it until
//! `stop()` hands it back.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, trace, warn};

use crate::{
    engine::{CaptureEngine, CaptureSource},
    error::{Result, VoxlinkError},
    ipc::events::{AudioDataPayload, LiveState, LiveStateEvent, SpeakingChangedEvent},
    playback::{PlaybackOutput, PlaybackScheduler},
    transport::{
        ControlMessage, InboundMessage, InboundStream, OutboundMessage, PayloadEncoder,
        Reconnector, Transport,
    },
};

/// How often finished playback segments are released.
const REAP_INTERVAL: Duration = Duration::from_millis(50);

const STATE_CAP: usize = 64;

type ConnectFuture = Pin<Box<dyn Future<Output = InboundStream> + Send>>;

/// Everything a session is built from.
pub struct SessionParts<O: PlaybackOutput> {
    pub engine: Arc<CaptureEngine>,
    pub source: CaptureSource,
    pub transport: Arc<dyn Transport>,
    pub scheduler: PlaybackScheduler<O>,
    pub reconnector: Arc<Reconnector>,
    pub encoder: Box<dyn PayloadEncoder>,
}

#[derive(Clone)]
struct StateCell {
    state: Arc<Mutex<LiveState>>,
    tx: broadcast::Sender<LiveStateEvent>,
}

impl StateCell {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(STATE_CAP);
        Self {
            state: Arc::new(Mutex::new(LiveState::Idle)),
            tx,
        }
    }

    fn get(&self) -> LiveState {
        *self.state.lock()
    }

    fn set(&self, state: LiveState) {
        {
            let mut current = self.state.lock();
            if *current == state {
                return;
            }
            *current = state;
        }
        debug!(?state, "live state");
        let _ = self.tx.send(LiveStateEvent { state });
    }
}

pub struct LiveSession<O: PlaybackOutput + 'static> {
    engine: Arc<CaptureEngine>,
    transport: Arc<dyn Transport>,
    reconnector: Arc<Reconnector>,
    state: StateCell,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<PlaybackScheduler<O>>,
}

impl<O: PlaybackOutput + 'static> LiveSession<O> {
    /// Connect (retrying with backoff until it works), then start capture.
    ///
    /// # Errors
    /// Capture start failures (device, permissions); the transport is closed
    /// again before returning.
    pub async fn start(parts: SessionParts<O>) -> Result<Self> {
        let SessionParts {
            engine,
            source,
            transport,
            scheduler,
            reconnector,
            encoder,
        } = parts;

        let state = StateCell::new();
        let inbound = connect_with_backoff(&transport, &reconnector).await;

        // Subscribe first so the opening VAD_START is not missed.
        let speaking = engine.subscribe_speaking();
        let payloads = match engine.start_source(source) {
            Ok(rx) => rx,
            Err(e) => {
                warn!("capture failed to start: {e}");
                transport.disconnect().await;
                return Err(e);
            }
        };
        state.set(LiveState::Listening);
        info!("live session started");

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_loop(SessionLoop {
            engine: Arc::clone(&engine),
            transport: Arc::clone(&transport),
            reconnector: Arc::clone(&reconnector),
            scheduler,
            encoder,
            state: state.clone(),
            payloads,
            speaking,
            shutdown_rx,
            inbound: Some(inbound),
        }));

        Ok(Self {
            engine,
            transport,
            reconnector,
            state,
            shutdown_tx: Some(shutdown_tx),
            task,
        })
    }

    pub fn state(&self) -> LiveState {
        self.state.get()
    }

    pub fn subscribe_state(&self) -> broadcast::Receiver<LiveStateEvent> {
        self.state.tx.subscribe()
    }

    pub fn engine(&self) -> &Arc<CaptureEngine> {
        &self.engine
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn reconnector(&self) -> &Arc<Reconnector> {
        &self.reconnector
    }

    /// Halt capture, clear playback, disconnect, and return to `idle`.
    ///
    /// Hands back the scheduler (and with it the output).
    pub async fn stop(mut self) -> Result<PlaybackScheduler<O>> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let scheduler = self
            .task
            .await
            .map_err(|e| VoxlinkError::Other(anyhow::anyhow!("session task failed: {e}")))?;
        self.state.set(LiveState::Idle);
        info!("live session stopped");
        Ok(scheduler)
    }
}

async fn connect_with_backoff(
    transport: &Arc<dyn Transport>,
    reconnector: &Reconnector,
) -> InboundStream {
    reconnector.with_backoff(|| transport.connect()).await
}

fn reconnect(transport: &Arc<dyn Transport>, reconnector: &Arc<Reconnector>) -> ConnectFuture {
    let transport = Arc::clone(transport);
    let reconnector = Arc::clone(reconnector);
    Box::pin(async move { connect_with_backoff(&transport, &reconnector).await })
}

async fn next_inbound(inbound: &mut Option<InboundStream>) -> Option<InboundMessage> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn finish_connect(connecting: &mut Option<ConnectFuture>) -> InboundStream {
    match connecting {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

struct SessionLoop<O: PlaybackOutput> {
    engine: Arc<CaptureEngine>,
    transport: Arc<dyn Transport>,
    reconnector: Arc<Reconnector>,
    scheduler: PlaybackScheduler<O>,
    encoder: Box<dyn PayloadEncoder>,
    state: StateCell,
    payloads: mpsc::UnboundedReceiver<AudioDataPayload>,
    speaking: broadcast::Receiver<SpeakingChangedEvent>,
    shutdown_rx: oneshot::Receiver<()>,
    inbound: Option<InboundStream>,
}

impl<O: PlaybackOutput> SessionLoop<O> {
    fn forward_payload(&mut self, payload: AudioDataPayload) {
        if !self.transport.is_connected() {
            trace!(sequence = payload.sequence, "not connected; dropping payload");
            return;
        }
        let bytes = self.encoder.encode(&payload.samples);
        if let Err(e) = self.transport.send(OutboundMessage::Audio(bytes)) {
            debug!(sequence = payload.sequence, "payload not sent: {e}");
        }
    }

    fn on_speaking_changed(&mut self, speaking: bool) {
        if speaking {
            // Barge-in: the user talks over the agent.
            self.scheduler.clear();
            if self.transport.is_connected() {
                if let Err(e) = self
                    .transport
                    .send(OutboundMessage::Control(ControlMessage::CancelResponse))
                {
                    debug!("cancel_response not sent: {e}");
                }
            }
            self.state.set(LiveState::Listening);
        } else {
            self.state.set(LiveState::Thinking);
        }
    }

    fn on_agent_audio(&mut self, samples: &[i16]) {
        self.state.set(LiveState::Speaking);
        if let Err(e) = self.scheduler.add_audio(samples) {
            warn!("dropping agent audio: {e}");
        }
    }

    fn on_tick(&mut self) {
        self.scheduler.reap();
        if self.state.get() == LiveState::Speaking && self.scheduler.in_flight() == 0 {
            self.state.set(LiveState::Listening);
        }
    }
}

async fn run_loop<O: PlaybackOutput + 'static>(mut ctx: SessionLoop<O>) -> PlaybackScheduler<O> {
    let mut capture_open = true;
    let mut connecting: Option<ConnectFuture> = None;
    let mut tick = tokio::time::interval(REAP_INTERVAL);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Fires on stop() and when the session handle is dropped.
            _ = &mut ctx.shutdown_rx => break,

            payload = ctx.payloads.recv(), if capture_open => match payload {
                Some(p) => ctx.forward_payload(p),
                None => {
                    info!("capture ended");
                    capture_open = false;
                }
            },

            ev = ctx.speaking.recv() => match ev {
                Ok(ev) => ctx.on_speaking_changed(ev.speaking),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(missed = n, "speaking events lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            msg = next_inbound(&mut ctx.inbound) => match msg {
                Some(InboundMessage::Audio(samples)) => ctx.on_agent_audio(&samples),
                Some(InboundMessage::Control(ctrl)) => debug!(?ctrl, "control message from agent"),
                None => {
                    warn!("connection lost; reconnecting");
                    ctx.inbound = None;
                    ctx.reconnector.mark_disconnected();
                    connecting = Some(reconnect(&ctx.transport, &ctx.reconnector));
                }
            },

            rx = finish_connect(&mut connecting) => {
                connecting = None;
                ctx.inbound = Some(rx);
            },

            _ = tick.tick() => ctx.on_tick(),
        }
    }

    // Halt capture first so no payload races the teardown.
    if ctx.engine.is_running() {
        let engine = Arc::clone(&ctx.engine);
        match tokio::task::spawn_blocking(move || engine.stop()).await {
            Ok(Ok(())) | Ok(Err(VoxlinkError::NotRunning)) => {}
            Ok(Err(e)) => warn!("capture stop failed: {e}"),
            Err(e) => warn!("capture stop task failed: {e}"),
        }
    }
    ctx.scheduler.clear();
    drop(connecting);
    ctx.transport.disconnect().await;
    ctx.reconnector.mark_disconnected();
    ctx.state.set(LiveState::Idle);
    ctx.scheduler
}
