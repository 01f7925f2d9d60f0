//! The speech session adapter: owns at most one live engine, republishes its
//! signals as [`SpeechEvent`]s, and transparently restarts the engine when it
//! pauses on a short silence while the caller still expects to be listening.

use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::SessionConfig;
use crate::engine::{
    EngineError, EngineFactory, EngineSignal, LanguageModel, ListenRequest, SpeechEngine,
};
use crate::{ErrorInfo, SpeechEvent};

/// Failures reported back to the caller of a session operation.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no active recognition engine")]
    NoActiveEngine,
    #[error("session closed")]
    Closed,
    #[error(transparent)]
    Engine(#[from] anyhow::Error),
}

enum Command {
    Start {
        locale: Option<String>,
        done: oneshot::Sender<Result<(), SessionError>>,
    },
    Stop {
        done: oneshot::Sender<Result<(), SessionError>>,
    },
    Cancel {
        done: oneshot::Sender<Result<(), SessionError>>,
    },
    Destroy {
        done: oneshot::Sender<Result<(), SessionError>>,
    },
    Available {
        done: oneshot::Sender<Result<bool, SessionError>>,
    },
}

/// Handle to one speech session. Cheap to clone; all mutable state lives on
/// the session's own serial task, so operations never race each other.
#[derive(Clone)]
pub struct SpeechSession {
    inner: Arc<InnerSession>,
}

pub struct InnerSession {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SpeechEvent>,
    recognizing: Arc<AtomicBool>,
}

impl Deref for SpeechSession {
    type Target = InnerSession;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl SpeechSession {
    pub fn new(factory: Box<dyn EngineFactory>, config: SessionConfig) -> Self {
        let (commands, command_rx) = mpsc::channel(config.channel_capacity);
        let (events, _) = broadcast::channel(config.channel_capacity);
        let recognizing = Arc::new(AtomicBool::new(false));
        let task = SessionTask {
            factory,
            config,
            engine: None,
            signals: None,
            locale: None,
            restarts: 0,
            recognizing: recognizing.clone(),
            events: events.clone(),
        };
        tokio::spawn(task.run(command_rx));
        SpeechSession {
            inner: Arc::new(InnerSession {
                commands,
                events,
                recognizing,
            }),
        }
    }

    /// Begin a fresh recognition session, discarding any prior engine.
    pub async fn start(&self, locale: Option<&str>) -> Result<(), SessionError> {
        let locale = locale.map(str::to_owned);
        self.dispatch(|done| Command::Start { locale, done }).await
    }

    /// Stop capturing audio; buffered results still arrive.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.dispatch(|done| Command::Stop { done }).await
    }

    /// Abort immediately with no further results.
    pub async fn cancel(&self) -> Result<(), SessionError> {
        self.dispatch(|done| Command::Cancel { done }).await
    }

    /// Release the engine and return to idle.
    pub async fn destroy(&self) -> Result<(), SessionError> {
        self.dispatch(|done| Command::Destroy { done }).await
    }

    /// Whether the platform offers a recognition engine at all.
    pub async fn is_available(&self) -> Result<bool, SessionError> {
        self.dispatch(|done| Command::Available { done }).await
    }

    pub fn is_recognizing(&self) -> bool {
        self.recognizing.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SpeechEvent> {
        self.events.subscribe()
    }

    async fn dispatch<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> Command,
    ) -> Result<T, SessionError> {
        let (done, wait) = oneshot::channel();
        self.commands
            .send(make(done))
            .await
            .map_err(|_| SessionError::Closed)?;
        wait.await.map_err(|_| SessionError::Closed)?
    }
}

struct SessionTask {
    factory: Box<dyn EngineFactory>,
    config: SessionConfig,
    engine: Option<Box<dyn SpeechEngine>>,
    signals: Option<broadcast::Receiver<EngineSignal>>,
    locale: Option<String>,
    restarts: u32,
    recognizing: Arc<AtomicBool>,
    events: broadcast::Sender<SpeechEvent>,
}

impl SessionTask {
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            let mut signals = match self.signals.take() {
                Some(signals) => signals,
                None => {
                    match commands.recv().await {
                        Some(command) => {
                            self.handle_command(command).await;
                            continue;
                        }
                        None => break,
                    }
                }
            };
            select! {
                command = commands.recv() => {
                    self.signals = Some(signals);
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => break,
                    }
                }
                signal = signals.recv() => {
                    match signal {
                        Ok(signal) => {
                            self.signals = Some(signals);
                            self.handle_signal(signal).await;
                        }
                        Err(RecvError::Closed) => {
                            debug!("engine signal channel closed");
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            self.signals = Some(signals);
                            warn!("engine signals lagged, skipped {skipped}");
                        }
                    }
                }
            }
        }
        debug!("speech session task finished");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { locale, done } => {
                self.locale = locale;
                self.restarts = 0;
                let result = self.begin_listening().await;
                if result.is_ok() {
                    self.recognizing.store(true, Ordering::SeqCst);
                }
                let _ = done.send(result);
            }
            Command::Stop { done } => {
                let result = match self.engine.as_mut() {
                    None => Err(SessionError::NoActiveEngine),
                    Some(engine) => match engine.stop().await {
                        Ok(()) => {
                            self.recognizing.store(false, Ordering::SeqCst);
                            Ok(())
                        }
                        Err(e) => Err(SessionError::Engine(e)),
                    },
                };
                let _ = done.send(result);
            }
            Command::Cancel { done } => {
                let result = match self.engine.as_mut() {
                    None => Err(SessionError::NoActiveEngine),
                    Some(engine) => match engine.cancel().await {
                        Ok(()) => {
                            self.recognizing.store(false, Ordering::SeqCst);
                            Ok(())
                        }
                        Err(e) => Err(SessionError::Engine(e)),
                    },
                };
                let _ = done.send(result);
            }
            Command::Destroy { done } => {
                let result = match self.engine.take() {
                    None => Err(SessionError::NoActiveEngine),
                    Some(mut engine) => {
                        let released = engine.release().await;
                        self.signals = None;
                        self.recognizing.store(false, Ordering::SeqCst);
                        released.map_err(SessionError::Engine)
                    }
                };
                let _ = done.send(result);
            }
            Command::Available { done } => {
                let _ = done.send(self.factory.available().await.map_err(SessionError::from));
            }
        }
    }

    /// Tear down any prior engine and bring up a fresh one. At most one
    /// engine exists at any time.
    async fn begin_listening(&mut self) -> Result<(), SessionError> {
        self.engine = None;
        self.signals = None;

        let request = ListenRequest {
            language_model: LanguageModel::FreeForm,
            locale: self.config.resolve_locale(self.locale.as_deref()),
            max_alternatives: self.config.max_alternatives,
            partial_results: self.config.partial_results,
        };

        let mut engine = self.factory.create().await?;
        // Subscribe before starting so no early signal is missed.
        let signals = engine.subscribe();
        engine.start(&request).await?;
        info!(locale = %request.locale, "listening started");
        self.engine = Some(engine);
        self.signals = Some(signals);
        Ok(())
    }

    async fn handle_signal(&mut self, signal: EngineSignal) {
        match signal {
            EngineSignal::ReadyForSpeech => {
                debug!("ready for speech");
                self.publish(SpeechEvent::Start { error: false });
            }
            EngineSignal::BeginningOfSpeech => {
                // Not republished; log only.
                debug!("beginning of speech");
            }
            EngineSignal::EndOfSpeech => self.handle_end_of_speech().await,
            EngineSignal::PartialResults { alternatives } => {
                self.publish(SpeechEvent::PartialResults {
                    value: alternatives,
                    breaking_sentences: self.restarts,
                });
            }
            EngineSignal::Results { alternatives } => {
                self.publish(SpeechEvent::Results {
                    value: alternatives,
                });
            }
            EngineSignal::Error { code } => {
                let fault = EngineError::from_code(code);
                debug!("engine error: {}", fault.describe());
                self.publish(SpeechEvent::Error {
                    error: ErrorInfo {
                        message: fault.describe(),
                    },
                });
            }
            EngineSignal::RmsChanged { rms_db } => {
                self.publish(SpeechEvent::VolumeChanged { value: rms_db });
            }
            EngineSignal::BufferReceived => {
                self.publish(SpeechEvent::Recognized { error: false });
            }
        }
    }

    /// The engine ended a listening period. While `recognizing` is still set
    /// this was silence detection cutting the session short, not the caller:
    /// swap in a fresh engine and count the break. After an explicit stop it
    /// is terminal instead.
    async fn handle_end_of_speech(&mut self) {
        if !self.recognizing.load(Ordering::SeqCst) {
            debug!("end of speech");
            self.publish(SpeechEvent::End { error: false });
            return;
        }

        if let Some(engine) = self.engine.as_mut() {
            if let Err(e) = engine.cancel().await {
                warn!("failed to cancel paused engine: {e:#}");
            }
        }
        match self.begin_listening().await {
            Ok(()) => {
                self.restarts += 1;
                debug!(restarts = self.restarts, "listening restarted after pause");
            }
            Err(e) => {
                warn!("failed to restart listening: {e}");
                self.recognizing.store(false, Ordering::SeqCst);
                self.publish(SpeechEvent::Error {
                    error: ErrorInfo {
                        message: e.to_string(),
                    },
                });
            }
        }
    }

    fn publish(&self, event: SpeechEvent) {
        let _ = self.events.send(event);
    }
}
