//! Thread-hosted session controller
//!
//! cpal streams are not `Send`, so the controller lives on a dedicated
//! thread running a single-threaded runtime. Callers talk to it through a
//! cloneable [`SessionHandle`].

use tokio::sync::{mpsc, oneshot, watch};

use crate::audio::meter::{LevelMonitor, LevelReading};
use crate::audio::platform::AudioPlatform;
use crate::config::SessionConfig;
use crate::detection::engine::EngineFactory;
use crate::session::controller::{SessionController, StopSignal};
use crate::session::state::SessionState;

/// Commands sent to the session thread; each replies with the resulting state
#[derive(Debug)]
pub enum SessionCommand {
    Start {
        reply: oneshot::Sender<SessionState>,
    },
    Stop {
        reply: oneshot::Sender<SessionState>,
    },
    Reset {
        reply: oneshot::Sender<SessionState>,
    },
    Dispose {
        reply: oneshot::Sender<SessionState>,
    },
}

struct Observers {
    stop: StopSignal,
    state: watch::Receiver<SessionState>,
    level: LevelMonitor,
}

/// Handle to communicate with the session thread
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    stop: StopSignal,
    state: watch::Receiver<SessionState>,
    level: LevelMonitor,
}

impl SessionHandle {
    /// Spawn a controller on a dedicated thread
    ///
    /// `make` runs on the session thread and builds the platform and engine
    /// factory there. The thread exits (disposing the controller) once every
    /// handle is dropped.
    pub fn spawn<P, F, M>(make: M, config: SessionConfig) -> anyhow::Result<Self>
    where
        P: AudioPlatform + 'static,
        F: EngineFactory + 'static,
        M: FnOnce() -> anyhow::Result<(P, F)> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<SessionCommand>(32);
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<anyhow::Result<Observers>>(1);

        std::thread::Builder::new()
            .name("bpm-session".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                let (platform, factory) = match make() {
                    Ok(parts) => parts,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let controller = SessionController::new(platform, factory, config);
                let _ = ready_tx.send(Ok(Observers {
                    stop: controller.stop_signal(),
                    state: controller.subscribe(),
                    level: controller.level_monitor(),
                }));
                runtime.block_on(controller.run(rx));
                tracing::debug!("Session thread exiting");
            })?;

        let observers = ready_rx
            .recv()
            .map_err(|_| anyhow::anyhow!("Session thread died"))??;

        Ok(Self {
            tx,
            stop: observers.stop,
            state: observers.state,
            level: observers.level,
        })
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<SessionState>) -> SessionCommand,
    ) -> anyhow::Result<SessionState> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(command(reply))
            .await
            .map_err(|_| anyhow::anyhow!("Session thread died"))?;
        rx.await.map_err(|_| anyhow::anyhow!("Session thread died"))
    }

    /// Begin listening; returns the state once acquisition has settled
    pub async fn start(&self) -> anyhow::Result<SessionState> {
        self.request(|reply| SessionCommand::Start { reply }).await
    }

    /// Stop the session, cancelling a start that is still acquiring
    pub async fn stop(&self) -> anyhow::Result<SessionState> {
        self.stop.request_stop();
        self.request(|reply| SessionCommand::Stop { reply }).await
    }

    pub async fn reset(&self) -> anyhow::Result<SessionState> {
        self.stop.request_stop();
        self.request(|reply| SessionCommand::Reset { reply }).await
    }

    pub async fn dispose(&self) -> anyhow::Result<SessionState> {
        self.stop.request_stop();
        self.request(|reply| SessionCommand::Dispose { reply }).await
    }

    /// Current state snapshot
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.stop.is_running()
    }

    /// Latest diagnostic meter reading
    pub fn level(&self) -> Option<LevelReading> {
        self.level.latest()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::candidate::TempoCandidate;
    use crate::session::state::SessionStatus;
    use crate::testing::{FakeEngineFactory, FakePlatform, Probe};
    use std::time::Duration;

    fn spawn(probe: &Probe) -> (SessionHandle, crate::testing::EngineRemote) {
        let factory = FakeEngineFactory::new(probe.clone());
        let remote = factory.remote();
        let platform = FakePlatform::new(probe.clone());
        let handle =
            SessionHandle::spawn(move || Ok((platform, factory)), SessionConfig::default())
                .unwrap();
        (handle, remote)
    }

    #[tokio::test]
    async fn test_start_and_stop_through_handle() {
        let probe = Probe::new();
        let (handle, _remote) = spawn(&probe);

        let state = handle.start().await.unwrap();
        assert_eq!(state.status(), SessionStatus::Listening);
        assert!(handle.is_running());

        let state = handle.stop().await.unwrap();
        assert_eq!(state.status(), SessionStatus::Idle);
        assert_eq!(probe.counts().live_captures(), 0);
    }

    #[tokio::test]
    async fn test_detection_reaches_subscribers() {
        let probe = Probe::new();
        let (handle, remote) = spawn(&probe);
        let mut states = handle.subscribe();

        handle.start().await.unwrap();
        assert!(remote.emit_stable(vec![TempoCandidate::new(128.4, 12)]));

        let detected = tokio::time::timeout(
            Duration::from_secs(5),
            states.wait_for(|s| s.status() == SessionStatus::Detected),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(detected.bpm(), Some(128));
    }

    #[tokio::test]
    async fn test_dispose_refuses_later_start() {
        let probe = Probe::new();
        let (handle, _remote) = spawn(&probe);

        handle.start().await.unwrap();
        handle.dispose().await.unwrap();
        let state = handle.start().await.unwrap();

        assert_eq!(state.status(), SessionStatus::Idle);
        assert_eq!(probe.counts().closes, 1);
    }

    #[test]
    fn test_spawn_reports_factory_failure() {
        let result = SessionHandle::spawn(
            || -> anyhow::Result<(FakePlatform, FakeEngineFactory)> {
                anyhow::bail!("no audio backend")
            },
            SessionConfig::default(),
        );
        assert!(result.is_err());
    }
}
