//! Session lifecycle controller
//!
//! Owns every resource of the current session and the audio context shared
//! across sessions. All engine events and the detection timeout arrive as
//! tagged messages in one inbox; the controller is their only consumer.
//!
//! State machine:
//!
//! ```text
//! Idle      --start()-------------------------> Listening
//! Listening --accepted detection--------------> Detected
//! Listening --timeout fires-------------------> Error
//! Listening --acquisition/construction fault--> Error
//! Listening --stop()--------------------------> Idle
//! Detected  --reset()-------------------------> Idle
//! Error     --reset()-------------------------> Idle
//! any       --stop()--------------------------> Idle
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::audio::acquire::{open_raw_capture, prepare_context};
use crate::audio::chain::{ProcessingChain, SignalPath};
use crate::audio::meter::LevelMonitor;
use crate::audio::platform::{AudioContext, AudioPlatform, ContextState};
use crate::config::SessionConfig;
use crate::detection::engine::{EngineFactory, EngineListener, TempoEngine};
use crate::detection::router::{DetectionRouter, Verdict};
use crate::error::{
    AcquisitionError, EngineError, StartError, DETECTION_TIMEOUT_MESSAGE,
};
use crate::session::cleanup::{teardown, SessionResources, TeardownMode};
use crate::session::event::{InboxReceiver, InboxSender, SessionEvent, SessionMessage};
use crate::session::handle::SessionCommand;
use crate::session::state::SessionState;

/// Cancels a running session from outside the controller
///
/// Clearing the flag is visible to a `start()` suspended at an await point;
/// it abandons the partially built session at its next check.
#[derive(Debug, Clone)]
pub struct StopSignal {
    running: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

enum StartFailure {
    /// A stop was requested while the session was being built
    Interrupted,
    Failed(StartError),
}

impl From<StartError> for StartFailure {
    fn from(err: StartError) -> Self {
        Self::Failed(err)
    }
}

impl From<AcquisitionError> for StartFailure {
    fn from(err: AcquisitionError) -> Self {
        Self::Failed(err.into())
    }
}

impl From<EngineError> for StartFailure {
    fn from(err: EngineError) -> Self {
        Self::Failed(err.into())
    }
}

fn ensure_running(running: &AtomicBool) -> Result<(), StartFailure> {
    if running.load(Ordering::Acquire) {
        Ok(())
    } else {
        Err(StartFailure::Interrupted)
    }
}

/// Drives at most one listening session at a time
pub struct SessionController<P: AudioPlatform, F: EngineFactory> {
    platform: P,
    factory: F,
    config: SessionConfig,
    router: DetectionRouter,
    context: Option<P::Context>,
    resources: SessionResources<P::Capture, F::Engine>,
    running: Arc<AtomicBool>,
    generation: u64,
    disposed: bool,
    state_tx: watch::Sender<SessionState>,
    inbox_tx: InboxSender,
    inbox_rx: InboxReceiver,
    level: LevelMonitor,
}

impl<P: AudioPlatform, F: EngineFactory> SessionController<P, F> {
    pub fn new(platform: P, factory: F, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::idle());
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            platform,
            factory,
            router: DetectionRouter::new(config.confidence_threshold),
            config,
            context: None,
            resources: SessionResources::new(),
            running: Arc::new(AtomicBool::new(false)),
            generation: 0,
            disposed: false,
            state_tx,
            inbox_tx,
            inbox_rx,
            level: LevelMonitor::new(),
        }
    }

    /// Current state snapshot
    pub fn state(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop_signal(&self) -> StopSignal {
        StopSignal {
            running: Arc::clone(&self.running),
        }
    }

    /// Diagnostic meter fed by the preprocessing chain
    pub fn level_monitor(&self) -> LevelMonitor {
        self.level.clone()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of sessions started so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// State of the shared audio context, if one exists
    pub fn context_state(&self) -> Option<ContextState> {
        self.context.as_ref().map(|c| c.state())
    }

    /// Whether any per-session resource is still held
    pub fn holds_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    /// Begin listening
    ///
    /// Ignored while a session is running or after disposal. Failures end in
    /// an `Error` state, never in a returned error.
    pub async fn start(&mut self) {
        if self.disposed {
            tracing::warn!("Start refused: controller disposed");
            return;
        }
        if self.running.swap(true, Ordering::AcqRel) {
            tracing::debug!("Start ignored: session already running");
            return;
        }
        // A stop request clears the flag before its command is applied;
        // the previous session must be gone before a new one is built
        if !self.resources.is_empty() {
            tracing::info!(
                generation = self.generation,
                "Releasing previous session before start"
            );
            teardown(&mut self.resources, &mut self.context, TeardownMode::SUSPEND).await;
        }

        self.generation += 1;
        let generation = self.generation;
        self.publish(SessionState::listening());
        tracing::info!(generation, "Listening for tempo");

        match self.build_session(generation).await {
            Ok(()) => {
                tracing::info!(
                    generation,
                    timeout_ms = self.config.detection_timeout_ms,
                    "Session started"
                );
            }
            Err(StartFailure::Interrupted) => {
                tracing::info!(generation, "Start interrupted by stop request");
                teardown(&mut self.resources, &mut self.context, TeardownMode::SUSPEND).await;
                self.publish(SessionState::idle());
            }
            Err(StartFailure::Failed(err)) => {
                tracing::error!(generation, "Failed to start session: {}", err);
                self.running.store(false, Ordering::Release);
                self.publish(SessionState::failed(err.user_message()));
                teardown(&mut self.resources, &mut self.context, TeardownMode::SUSPEND).await;
            }
        }
    }

    async fn build_session(&mut self, generation: u64) -> Result<(), StartFailure> {
        let context = prepare_context(&mut self.platform, &mut self.context).await?;
        ensure_running(&self.running)?;
        let sample_rate = context.sample_rate();

        let path = SignalPath::new();
        let capture = open_raw_capture(&mut self.platform, context, path.tap()).await?;
        self.resources.capture = Some(capture);
        self.resources.signal_path = Some(path.clone());
        ensure_running(&self.running)?;

        let (mut engine, input) = self.factory.create(sample_rate, &self.config.engine)?;
        let listener = EngineListener::new(self.inbox_tx.clone(), generation);
        engine.subscribe(listener.clone());
        self.resources.engine = Some(engine);
        self.resources.listener = Some(listener);

        let chain = ProcessingChain::build(sample_rate, self.config.preprocessing, &self.level);
        path.connect(chain, input)?;

        self.resources.timeout.arm(
            self.config.detection_timeout(),
            self.inbox_tx.clone(),
            generation,
        );
        Ok(())
    }

    /// End the session; idempotent in every state
    pub async fn stop(&mut self) {
        self.end_session(TeardownMode::SUSPEND).await;
        self.publish(SessionState::idle());
    }

    /// Stop and clear the engine's accumulated analysis
    pub async fn reset(&mut self) {
        self.end_session(TeardownMode::RESET).await;
        self.publish(SessionState::idle());
    }

    /// Stop and permanently close the audio context
    ///
    /// Afterwards `start()` is refused.
    pub async fn dispose(&mut self) {
        self.end_session(TeardownMode::CLOSE).await;
        if !self.disposed {
            self.disposed = true;
            tracing::info!("Session controller disposed");
        }
        self.publish(SessionState::idle());
    }

    async fn end_session(&mut self, mode: TeardownMode) {
        if self.running.swap(false, Ordering::AcqRel) {
            tracing::info!(generation = self.generation, "Session stopped");
        }
        self.resources.timeout.cancel();
        teardown(&mut self.resources, &mut self.context, mode).await;
    }

    /// Terminal transition from `Listening`
    async fn conclude(&mut self, state: SessionState) {
        self.running.store(false, Ordering::Release);
        self.resources.timeout.cancel();
        self.publish(state);
        teardown(&mut self.resources, &mut self.context, TeardownMode::SUSPEND).await;
    }

    /// Apply one inbox message
    pub async fn handle(&mut self, message: SessionMessage) {
        if message.generation != self.generation || !self.is_running() {
            tracing::trace!(
                generation = message.generation,
                current = self.generation,
                "Discarded message for inactive session"
            );
            return;
        }

        match message.event {
            SessionEvent::TimedOut => {
                tracing::warn!(
                    "No confident tempo within {} ms",
                    self.config.detection_timeout_ms
                );
                self.conclude(SessionState::failed(DETECTION_TIMEOUT_MESSAGE))
                    .await;
            }
            SessionEvent::Engine(event) => match self.router.route(&event) {
                Verdict::Accept { bpm, tempo, source } => {
                    tracing::info!(bpm, tempo, ?source, "Tempo detected");
                    self.conclude(SessionState::detected(bpm)).await;
                }
                Verdict::Ignore(reason) => {
                    tracing::trace!(?reason, "Engine event ignored");
                }
                Verdict::Advisory(message) => {
                    tracing::warn!("Tempo engine error: {}", message);
                }
            },
        }
    }

    /// Wait for the next inbox message and apply it
    pub async fn process_next(&mut self) -> bool {
        match self.inbox_rx.recv().await {
            Some(message) => {
                self.handle(message).await;
                true
            }
            None => false,
        }
    }

    /// Apply every message already queued; returns how many were applied
    pub async fn process_pending(&mut self) -> usize {
        let mut applied = 0;
        while let Ok(message) = self.inbox_rx.try_recv() {
            self.handle(message).await;
            applied += 1;
        }
        applied
    }

    /// Event loop: serve commands and inbox messages until the command
    /// channel closes, then dispose
    pub async fn run(mut self, mut commands: mpsc::Receiver<SessionCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.execute(command).await,
                    None => break,
                },
                Some(message) = self.inbox_rx.recv() => self.handle(message).await,
            }
        }
        self.dispose().await;
    }

    async fn execute(&mut self, command: SessionCommand) {
        let reply = match command {
            SessionCommand::Start { reply } => {
                self.start().await;
                reply
            }
            SessionCommand::Stop { reply } => {
                self.stop().await;
                reply
            }
            SessionCommand::Reset { reply } => {
                self.reset().await;
                reply
            }
            SessionCommand::Dispose { reply } => {
                self.dispose().await;
                reply
            }
        };
        let _ = reply.send(self.state());
    }

    fn publish(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        let current = self.state_tx.borrow();
        if previous.status() != current.status() {
            tracing::debug!("Session state: {} -> {}", previous.status(), current.status());
        }
    }
}
