//! Permanently unavailable engine factory, for hosts without a recognition
//! service.

use async_trait::async_trait;

use crate::engine::{EngineFactory, SpeechEngine};

#[derive(Debug, Clone, Default)]
pub struct NoopFactory;

impl NoopFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EngineFactory for NoopFactory {
    async fn available(&self) -> anyhow::Result<bool> {
        Ok(false)
    }

    async fn create(&self) -> anyhow::Result<Box<dyn SpeechEngine>> {
        Err(anyhow::anyhow!("no recognition service present"))
    }
}
