use std::time::Duration;

use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use voicebridge::config::SETTINGS;
use voicebridge::engine::scripted::{ScriptedFactory, Step};
use voicebridge::engine::EngineSignal;
use voicebridge::session::SpeechSession;

/// Scripted timeline for one spoken utterance: partials grow word by word,
/// then a final result, then (optionally) the recognizer gives up on silence.
fn utterance(text: &str, pause_on_silence: bool) -> Vec<Step> {
    let mut steps = vec![
        Step::Emit(EngineSignal::ReadyForSpeech),
        Step::Wait(Duration::from_millis(150)),
        Step::Emit(EngineSignal::BeginningOfSpeech),
    ];
    let mut spoken = String::new();
    for word in text.split_whitespace() {
        steps.push(Step::Wait(Duration::from_millis(250)));
        if !spoken.is_empty() {
            spoken.push(' ');
        }
        spoken.push_str(word);
        steps.push(Step::Emit(EngineSignal::RmsChanged {
            rms_db: word.len() as f32,
        }));
        steps.push(Step::Emit(EngineSignal::PartialResults {
            alternatives: vec![spoken.clone()],
        }));
    }
    steps.push(Step::Wait(Duration::from_millis(300)));
    steps.push(Step::Emit(EngineSignal::Results {
        alternatives: vec![spoken],
    }));
    if pause_on_silence {
        steps.push(Step::Wait(Duration::from_millis(200)));
        steps.push(Step::Emit(EngineSignal::EndOfSpeech));
    }
    steps
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let factory = ScriptedFactory::new()
        .with_script(utterance("the quick brown fox", true))
        .with_script(utterance("jumps over the lazy dog", true))
        .with_script(utterance("and keeps on talking", false));

    let session = SpeechSession::new(Box::new(factory), SETTINGS.session.clone());
    let mut events = session.subscribe();
    session.start(None).await?;

    loop {
        select! {
            event = events.recv() => match event {
                Ok(event) => println!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Closed) => break,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("event stream lagged, skipped {skipped}");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutting down");
                let _ = session.destroy().await;
                break;
            },
        }
    }
    Ok(())
}
