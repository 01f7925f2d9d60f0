//! Engine that plays back a canned signal timeline. Stands in for the
//! platform recognizer in tests and the demo binary.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_stream::stream;
use async_trait::async_trait;
use tokio::{pin, select};
use tokio::sync::{broadcast, oneshot};
use tokio::time::sleep;
use tokio_stream::StreamExt;
use tracing::debug;

use crate::engine::{EngineFactory, EngineSignal, ListenRequest, SpeechEngine};

const SIGNAL_BUFFER: usize = 128;

/// One step of a scripted recognizer timeline.
#[derive(Debug, Clone)]
pub enum Step {
    Emit(EngineSignal),
    Wait(Duration),
}

pub type Script = Vec<Step>;

/// Counters and captures shared between a [`ScriptedFactory`] and whoever is
/// driving it.
#[derive(Debug, Clone, Default)]
pub struct FactoryProbe {
    created: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ListenRequest>>>,
}

impl FactoryProbe {
    /// Engines created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Engines created and not yet dropped.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Every [`ListenRequest`] an engine was started with, in order.
    pub fn requests(&self) -> Vec<ListenRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

pub struct ScriptedEngine {
    script: Option<Script>,
    signal_tx: broadcast::Sender<EngineSignal>,
    abort: Option<oneshot::Sender<()>>,
    probe: FactoryProbe,
}

impl ScriptedEngine {
    fn new(script: Script, probe: FactoryProbe) -> Self {
        let (signal_tx, _) = broadcast::channel(SIGNAL_BUFFER);
        Self {
            script: Some(script),
            signal_tx,
            abort: None,
            probe,
        }
    }
}

#[async_trait]
impl SpeechEngine for ScriptedEngine {
    async fn start(&mut self, request: &ListenRequest) -> anyhow::Result<()> {
        let steps = self
            .script
            .take()
            .ok_or_else(|| anyhow::anyhow!("scripted engine already started"))?;
        self.probe
            .requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());

        let tx = self.signal_tx.clone();
        let (abort_tx, abort_rx) = oneshot::channel::<()>();
        self.abort = Some(abort_tx);
        tokio::spawn(async move {
            let timeline = stream! {
                for step in steps {
                    match step {
                        Step::Wait(pause) => sleep(pause).await,
                        Step::Emit(signal) => yield signal,
                    }
                }
            };
            pin!(timeline);
            let playback = async {
                while let Some(signal) = timeline.next().await {
                    if tx.send(signal).is_err() {
                        break;
                    }
                }
            };
            select! {
                _ = playback => {}
                _ = abort_rx => {}
            }
        });
        Ok(())
    }

    async fn stop(&mut self) -> anyhow::Result<()> {
        // Soft stop: remaining steps keep playing out, the way a recognizer
        // drains already-captured audio.
        debug!("scripted engine stop requested");
        Ok(())
    }

    async fn cancel(&mut self) -> anyhow::Result<()> {
        if let Some(abort) = self.abort.take() {
            let _ = abort.send(());
        }
        Ok(())
    }

    fn subscribe(&mut self) -> broadcast::Receiver<EngineSignal> {
        self.signal_tx.subscribe()
    }
}

impl Drop for ScriptedEngine {
    fn drop(&mut self) {
        if let Some(abort) = self.abort.take() {
            let _ = abort.send(());
        }
        self.probe.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Factory handing out scripted engines, one script per engine in FIFO
/// order. Engines created after the scripts run out stay silent.
#[derive(Default)]
pub struct ScriptedFactory {
    scripts: Mutex<VecDeque<Script>>,
    probe: FactoryProbe,
}

impl ScriptedFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(self, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push_back(script);
        self
    }

    pub fn probe(&self) -> FactoryProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn available(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn create(&self) -> anyhow::Result<Box<dyn SpeechEngine>> {
        let script = self
            .scripts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop_front()
            .unwrap_or_default();
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        self.probe.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedEngine::new(script, self.probe.clone())))
    }
}
