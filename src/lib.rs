pub mod config;
pub mod engine;
pub mod session;

use serde::{Deserialize, Serialize};

/// Events republished to application code, one per recognizer callback.
///
/// The serialized shape is the wire contract consumed by the host layer:
/// a `type` tag carrying the event name plus the payload fields.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum SpeechEvent {
    #[serde(rename = "onSpeechStart")]
    Start { error: bool },
    #[serde(rename = "onSpeechEnd")]
    End { error: bool },
    #[serde(rename = "onSpeechRecognized")]
    Recognized { error: bool },
    #[serde(rename = "onSpeechPartialResults")]
    PartialResults {
        value: Vec<String>,
        /// How many times the recognizer paused on silence and was restarted
        /// since the last explicit start.
        #[serde(rename = "numberOfBreakingSentence")]
        breaking_sentences: u32,
    },
    #[serde(rename = "onSpeechResults")]
    Results { value: Vec<String> },
    #[serde(rename = "onSpeechError")]
    Error { error: ErrorInfo },
    #[serde(rename = "onSpeechVolumeChanged")]
    VolumeChanged { value: f32 },
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorInfo {
    pub message: String,
}
