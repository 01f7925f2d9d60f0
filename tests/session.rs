use std::time::Duration;

use tokio::select;
use tokio::sync::broadcast;
use tokio::time::sleep;

use voicebridge::config::SessionConfig;
use voicebridge::engine::noop::NoopFactory;
use voicebridge::engine::scripted::{ScriptedFactory, Step};
use voicebridge::engine::{EngineSignal, LanguageModel};
use voicebridge::session::{SessionError, SpeechSession};
use voicebridge::SpeechEvent;

async fn next_event(events: &mut broadcast::Receiver<SpeechEvent>) -> SpeechEvent {
    select! {
        event = events.recv() => event.expect("event stream closed"),
        _ = sleep(Duration::from_secs(5)) => panic!("timed out waiting for event"),
    }
}

async fn assert_quiet(events: &mut broadcast::Receiver<SpeechEvent>) {
    select! {
        event = events.recv() => panic!("unexpected event: {:?}", event),
        _ = sleep(Duration::from_millis(300)) => {}
    }
}

fn partial(text: &str) -> Step {
    Step::Emit(EngineSignal::PartialResults {
        alternatives: vec![text.to_string()],
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn each_start_replaces_the_prior_engine() {
    let factory = ScriptedFactory::new();
    let probe = factory.probe();
    let session = SpeechSession::new(Box::new(factory), SessionConfig::default());

    for _ in 0..3 {
        session.start(Some("en-US")).await.unwrap();
    }

    assert_eq!(probe.created(), 3);
    assert_eq!(probe.live(), 1);
    assert!(session.is_recognizing());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn breaking_sentences_count_up_and_reset_on_start() {
    let factory = ScriptedFactory::new()
        .with_script(vec![partial("one"), Step::Emit(EngineSignal::EndOfSpeech)])
        .with_script(vec![partial("two"), Step::Emit(EngineSignal::EndOfSpeech)])
        .with_script(vec![partial("three")])
        .with_script(vec![partial("fresh")]);
    let probe = factory.probe();
    let session = SpeechSession::new(Box::new(factory), SessionConfig::default());
    let mut events = session.subscribe();

    session.start(None).await.unwrap();

    for expected in [("one", 0), ("two", 1), ("three", 2)] {
        match next_event(&mut events).await {
            SpeechEvent::PartialResults {
                value,
                breaking_sentences,
            } => {
                assert_eq!(value, vec![expected.0.to_string()]);
                assert_eq!(breaking_sentences, expected.1);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
    // Still listening after two transparent restarts.
    assert!(session.is_recognizing());

    session.start(None).await.unwrap();
    match next_event(&mut events).await {
        SpeechEvent::PartialResults {
            value,
            breaking_sentences,
        } => {
            assert_eq!(value, vec!["fresh".to_string()]);
            assert_eq!(breaking_sentences, 0);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(probe.created(), 4);
    assert_eq!(probe.live(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[tracing_test::traced_test]
async fn end_of_speech_after_stop_is_terminal() {
    let factory = ScriptedFactory::new().with_script(vec![
        Step::Emit(EngineSignal::ReadyForSpeech),
        partial("hello"),
        Step::Wait(Duration::from_millis(400)),
        Step::Emit(EngineSignal::Results {
            alternatives: vec!["hello".to_string()],
        }),
        Step::Emit(EngineSignal::EndOfSpeech),
    ]);
    let probe = factory.probe();
    let session = SpeechSession::new(Box::new(factory), SessionConfig::default());
    let mut events = session.subscribe();

    session.start(None).await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        SpeechEvent::Start { error: false }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SpeechEvent::PartialResults { .. }
    ));

    session.stop().await.unwrap();
    assert!(!session.is_recognizing());

    // The soft stop still delivers the buffered final result.
    match next_event(&mut events).await {
        SpeechEvent::Results { value } => assert_eq!(value, vec!["hello".to_string()]),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(
        next_event(&mut events).await,
        SpeechEvent::End { error: false }
    ));

    // Terminal: no restart happened and nothing else arrives.
    assert_eq!(probe.created(), 1);
    assert_quiet(&mut events).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_aborts_without_further_results() {
    let factory = ScriptedFactory::new().with_script(vec![
        partial("hello"),
        Step::Wait(Duration::from_millis(400)),
        Step::Emit(EngineSignal::Results {
            alternatives: vec!["hello".to_string()],
        }),
    ]);
    let session = SpeechSession::new(Box::new(factory), SessionConfig::default());
    let mut events = session.subscribe();

    session.start(None).await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        SpeechEvent::PartialResults { .. }
    ));

    session.cancel().await.unwrap();
    assert!(!session.is_recognizing());
    assert_quiet(&mut events).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn listen_requests_carry_locale_and_tuning() {
    let factory = ScriptedFactory::new();
    let probe = factory.probe();
    let config = SessionConfig {
        default_locale: Some("de-DE".to_string()),
        ..Default::default()
    };
    let session = SpeechSession::new(Box::new(factory), config);

    session.start(Some("fr-FR")).await.unwrap();
    session.start(Some("")).await.unwrap();
    session.start(None).await.unwrap();

    let requests = probe.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[0].locale, "fr-FR");
    assert_eq!(requests[1].locale, "de-DE");
    assert_eq!(requests[2].locale, "de-DE");
    for request in &requests {
        assert_eq!(request.language_model, LanguageModel::FreeForm);
        assert_eq!(request.max_alternatives, 5);
        assert!(request.partial_results);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_faults_surface_with_code_and_text() {
    let factory = ScriptedFactory::new().with_script(vec![
        Step::Emit(EngineSignal::Error { code: 7 }),
        Step::Emit(EngineSignal::Error { code: 42 }),
    ]);
    let session = SpeechSession::new(Box::new(factory), SessionConfig::default());
    let mut events = session.subscribe();

    session.start(None).await.unwrap();

    for expected in ["7/No match", "42/Didn't understand, please try again."] {
        match next_event(&mut events).await {
            SpeechEvent::Error { error } => assert_eq!(error.message, expected),
            other => panic!("unexpected event: {:?}", other),
        }
    }
    // Faults are surfaced, not acted on; the caller decides what to do next.
    assert!(session.is_recognizing());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn signal_mapping_covers_the_ancillary_callbacks() {
    let factory = ScriptedFactory::new().with_script(vec![
        Step::Emit(EngineSignal::ReadyForSpeech),
        Step::Emit(EngineSignal::BeginningOfSpeech),
        Step::Emit(EngineSignal::BufferReceived),
        Step::Emit(EngineSignal::RmsChanged { rms_db: 3.5 }),
        partial("hi"),
    ]);
    let session = SpeechSession::new(Box::new(factory), SessionConfig::default());
    let mut events = session.subscribe();

    session.start(None).await.unwrap();

    assert!(matches!(
        next_event(&mut events).await,
        SpeechEvent::Start { error: false }
    ));
    // BeginningOfSpeech is swallowed; the buffer notification is next.
    assert!(matches!(
        next_event(&mut events).await,
        SpeechEvent::Recognized { error: false }
    ));
    match next_event(&mut events).await {
        SpeechEvent::VolumeChanged { value } => assert_eq!(value, 3.5),
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(matches!(
        next_event(&mut events).await,
        SpeechEvent::PartialResults { .. }
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_control_calls_report_no_engine() {
    let session = SpeechSession::new(Box::new(ScriptedFactory::new()), SessionConfig::default());

    assert!(matches!(
        session.stop().await,
        Err(SessionError::NoActiveEngine)
    ));
    assert!(matches!(
        session.cancel().await,
        Err(SessionError::NoActiveEngine)
    ));
    assert!(matches!(
        session.destroy().await,
        Err(SessionError::NoActiveEngine)
    ));
    assert!(!session.is_recognizing());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn destroy_is_idempotent_at_the_session_level() {
    let factory = ScriptedFactory::new();
    let probe = factory.probe();
    let session = SpeechSession::new(Box::new(factory), SessionConfig::default());

    session.start(None).await.unwrap();
    session.destroy().await.unwrap();
    assert!(!session.is_recognizing());
    assert_eq!(probe.live(), 0);

    // A second destroy finds nothing to release but leaves the session
    // usable.
    assert!(matches!(
        session.destroy().await,
        Err(SessionError::NoActiveEngine)
    ));
    assert!(!session.is_recognizing());

    session.start(None).await.unwrap();
    assert!(session.is_recognizing());
    assert_eq!(probe.live(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn availability_reflects_the_factory() {
    let scripted = SpeechSession::new(Box::new(ScriptedFactory::new()), SessionConfig::default());
    assert!(scripted.is_available().await.unwrap());

    let noop = SpeechSession::new(Box::new(NoopFactory::new()), SessionConfig::default());
    assert!(!noop.is_available().await.unwrap());

    let err = noop.start(None).await.unwrap_err();
    assert!(err.to_string().contains("no recognition service"));
    assert!(!noop.is_recognizing());
}
