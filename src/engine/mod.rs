pub mod noop;
pub mod scripted;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast::Receiver;

/// Callback contract of the underlying recognizer, one variant per signal it
/// can raise while a session is live.
#[derive(Debug, Clone)]
pub enum EngineSignal {
    ReadyForSpeech,
    BeginningOfSpeech,
    EndOfSpeech,
    PartialResults { alternatives: Vec<String> },
    Results { alternatives: Vec<String> },
    Error { code: i32 },
    RmsChanged { rms_db: f32 },
    BufferReceived,
}

/// Language model hint handed to the engine on start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LanguageModel {
    #[default]
    FreeForm,
    WebSearch,
}

/// Parameters a fresh engine is configured with before it begins listening.
#[derive(Debug, Clone)]
pub struct ListenRequest {
    pub language_model: LanguageModel,
    pub locale: String,
    pub max_alternatives: u32,
    pub partial_results: bool,
}

/// Fixed error-code table of the recognition service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("Network timeout")]
    NetworkTimeout,
    #[error("Network error")]
    Network,
    #[error("Audio recording error")]
    Audio,
    #[error("error from server")]
    Server,
    #[error("Client side error")]
    Client,
    #[error("No speech input")]
    SpeechTimeout,
    #[error("No match")]
    NoMatch,
    #[error("RecognitionService busy")]
    RecognizerBusy,
    #[error("Insufficient permissions")]
    InsufficientPermissions,
    #[error("Didn't understand, please try again.")]
    Unknown(i32),
}

impl EngineError {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => Self::NetworkTimeout,
            2 => Self::Network,
            3 => Self::Audio,
            4 => Self::Server,
            5 => Self::Client,
            6 => Self::SpeechTimeout,
            7 => Self::NoMatch,
            8 => Self::RecognizerBusy,
            9 => Self::InsufficientPermissions,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> i32 {
        match self {
            Self::NetworkTimeout => 1,
            Self::Network => 2,
            Self::Audio => 3,
            Self::Server => 4,
            Self::Client => 5,
            Self::SpeechTimeout => 6,
            Self::NoMatch => 7,
            Self::RecognizerBusy => 8,
            Self::InsufficientPermissions => 9,
            Self::Unknown(code) => *code,
        }
    }

    /// `"<code>/<text>"`, the shape carried in error events.
    pub fn describe(&self) -> String {
        format!("{}/{}", self.code(), self)
    }
}

/// Capability surface of one recognizer instance. An instance is created
/// fresh for every (re)start and never survives a restart.
#[async_trait]
pub trait SpeechEngine: Send {
    /// Configure the engine and begin listening.
    async fn start(&mut self, request: &ListenRequest) -> anyhow::Result<()>;

    /// Soft stop: stop capturing audio but keep delivering buffered results.
    async fn stop(&mut self) -> anyhow::Result<()>;

    /// Hard abort: no further results.
    async fn cancel(&mut self) -> anyhow::Result<()>;

    /// Release engine-held resources ahead of drop.
    async fn release(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    fn subscribe(&mut self) -> Receiver<EngineSignal>;
}

/// Builds engines and answers the platform availability query.
#[async_trait]
pub trait EngineFactory: Send {
    async fn available(&self) -> anyhow::Result<bool>;
    async fn create(&self) -> anyhow::Result<Box<dyn SpeechEngine>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_table_is_total() {
        let known = [
            (1, "Network timeout"),
            (2, "Network error"),
            (3, "Audio recording error"),
            (4, "error from server"),
            (5, "Client side error"),
            (6, "No speech input"),
            (7, "No match"),
            (8, "RecognitionService busy"),
            (9, "Insufficient permissions"),
        ];
        for (code, text) in known {
            let fault = EngineError::from_code(code);
            assert_eq!(fault.code(), code);
            assert_eq!(fault.describe(), format!("{code}/{text}"));
        }
    }

    #[test]
    fn unrecognized_codes_take_the_fallback_text() {
        let fault = EngineError::from_code(42);
        assert_eq!(fault, EngineError::Unknown(42));
        assert_eq!(fault.describe(), "42/Didn't understand, please try again.");
    }
}
