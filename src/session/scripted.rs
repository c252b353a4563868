//! # Scripted Playback Engine
//!
//! Replays a scenario script as recognition events: one event per turn,
//! paced by each turn's delay. Scripts are JSON arrays of turns stored as
//! patient documents and fetched at session start.
//!
//! Pacing polls the audio channel instead of sleeping, so a graceful finish
//! or a teardown interrupts playback within the poll interval. Inbound audio
//! chunks are drained and discarded — playback sessions accept the same
//! frames as live ones but have no use for the bytes.

use crate::session::engine::{
    AudioFrame, AudioPoll, AudioSource, EngineFactory, EventSink, RecognitionEngine,
    SessionContext, STOP_POLL_INTERVAL,
};
use crate::storage::documents::DocumentStore;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One scripted utterance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptTurn {
    /// Who speaks the line (e.g. "patient", "doctor")
    pub speaker: String,

    /// The utterance text
    pub text: String,

    /// Pause before the line is emitted
    #[serde(default)]
    pub delay_ms: u64,
}

/// Outcome of waiting out one turn's delay.
enum Pace {
    Continue,
    Finished,
    Stopped,
}

pub struct ScriptedEngine {
    patient_id: String,
    turns: Vec<ScriptTurn>,
}

impl ScriptedEngine {
    pub fn new(patient_id: String, turns: Vec<ScriptTurn>) -> Self {
        Self { patient_id, turns }
    }

    /// Parse a script document: a JSON array of turns.
    pub fn from_json(patient_id: String, text: &str) -> Result<Self> {
        let turns: Vec<ScriptTurn> = serde_json::from_str(text)
            .with_context(|| format!("Invalid script document for {}", patient_id))?;
        Ok(Self::new(patient_id, turns))
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }
}

/// Wait out `delay` while staying responsive: audio chunks are discarded,
/// a finish frame or teardown ends the wait immediately.
fn pace(audio: &AudioSource, delay: Duration) -> Pace {
    let deadline = Instant::now() + delay;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match audio.poll(remaining.min(STOP_POLL_INTERVAL)) {
            AudioPoll::Frame(AudioFrame::Finish) => return Pace::Finished,
            AudioPoll::Frame(AudioFrame::Chunk(_)) => {}
            AudioPoll::Idle => {}
            AudioPoll::Closed => return Pace::Stopped,
        }
        if Instant::now() >= deadline {
            return Pace::Continue;
        }
    }
}

impl RecognitionEngine for ScriptedEngine {
    fn run(&mut self, audio: AudioSource, events: EventSink) -> Result<()> {
        info!(
            "Script playback started for {} ({} turns)",
            self.patient_id,
            self.turns.len()
        );

        for (index, turn) in self.turns.iter().enumerate() {
            match pace(&audio, Duration::from_millis(turn.delay_ms)) {
                Pace::Continue => {}
                Pace::Finished => {
                    events.emit(json!({
                        "type": "system",
                        "message": "Script playback finished early",
                    }));
                    return Ok(());
                }
                Pace::Stopped => {
                    debug!("Script playback for {} torn down", self.patient_id);
                    return Ok(());
                }
            }

            let delivered = events.emit(json!({
                "type": "script_turn",
                "index": index,
                "speaker": turn.speaker,
                "text": turn.text,
            }));
            if !delivered {
                // Connection gone; nothing left to play to.
                return Ok(());
            }
        }

        events.emit(json!({
            "type": "system",
            "message": "Script playback complete",
        }));
        Ok(())
    }
}

/// Builds a `ScriptedEngine` per session by fetching the script document
/// from the patient's folder. A missing or malformed script fails the
/// session start.
pub struct ScriptedEngineFactory {
    documents: Arc<DocumentStore>,
    default_script: String,
}

impl ScriptedEngineFactory {
    pub fn new(documents: Arc<DocumentStore>, default_script: String) -> Self {
        Self {
            documents,
            default_script,
        }
    }
}

#[async_trait]
impl EngineFactory for ScriptedEngineFactory {
    async fn create(&self, ctx: &SessionContext) -> Result<Box<dyn RecognitionEngine>> {
        let script_file = ctx
            .script_file
            .clone()
            .unwrap_or_else(|| self.default_script.clone());

        debug!(
            "Building scripted engine for {} ({} bytes of seed context, {} pooled questions)",
            ctx.patient_id,
            ctx.seed_context.len(),
            ctx.questions.len()
        );

        let text = self
            .documents
            .fetch_text(&ctx.patient_id, &script_file)
            .await
            .with_context(|| {
                format!("Failed to load script {} for {}", script_file, ctx.patient_id)
            })?;

        let engine = ScriptedEngine::from_json(ctx.patient_id.clone(), &text)?;
        info!(
            "Loaded script {} for {} ({} turns)",
            script_file,
            ctx.patient_id,
            engine.turn_count()
        );
        Ok(Box::new(engine))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::engine::EngineEvent;
    use crate::storage::blob::MemoryBlobStore;
    use std::sync::atomic::AtomicBool;
    use std::sync::mpsc;

    const SCRIPT: &str = r#"[
        {"speaker": "patient", "text": "My chest hurts."},
        {"speaker": "doctor", "text": "When did it start?", "delay_ms": 0}
    ]"#;

    fn harness() -> (
        mpsc::Sender<AudioFrame>,
        AudioSource,
        EventSink,
        tokio::sync::mpsc::UnboundedReceiver<EngineEvent>,
    ) {
        let (audio_tx, audio_rx) = mpsc::channel();
        let source = AudioSource::new(audio_rx, Arc::new(AtomicBool::new(false)));
        let (event_tx, event_rx) = tokio::sync::mpsc::unbounded_channel();
        (audio_tx, source, EventSink::new(event_tx), event_rx)
    }

    #[test]
    fn test_script_parsing() {
        let engine = ScriptedEngine::from_json("p001".to_string(), SCRIPT).unwrap();
        assert_eq!(engine.turn_count(), 2);

        assert!(ScriptedEngine::from_json("p001".to_string(), "{\"not\":").is_err());
        assert!(ScriptedEngine::from_json("p001".to_string(), "{}").is_err());
    }

    #[test]
    fn test_playback_emits_turns_in_order() {
        let (_audio_tx, source, sink, mut events) = harness();
        let mut engine = ScriptedEngine::from_json("p001".to_string(), SCRIPT).unwrap();

        engine.run(source, sink).unwrap();

        let first = events.try_recv().unwrap().0;
        assert_eq!(first["type"], "script_turn");
        assert_eq!(first["index"], 0);
        assert_eq!(first["text"], "My chest hurts.");

        let second = events.try_recv().unwrap().0;
        assert_eq!(second["index"], 1);
        assert_eq!(second["speaker"], "doctor");

        let done = events.try_recv().unwrap().0;
        assert_eq!(done["type"], "system");
        assert_eq!(done["message"], "Script playback complete");
    }

    #[test]
    fn test_finish_interrupts_playback() {
        let (audio_tx, source, sink, mut events) = harness();
        let mut engine = ScriptedEngine::from_json("p001".to_string(), SCRIPT).unwrap();

        audio_tx.send(AudioFrame::Finish).unwrap();
        engine.run(source, sink).unwrap();

        let only = events.try_recv().unwrap().0;
        assert_eq!(only["message"], "Script playback finished early");
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_playback_discards_audio_chunks() {
        let (audio_tx, source, sink, mut events) = harness();
        let mut engine = ScriptedEngine::new(
            "p001".to_string(),
            vec![ScriptTurn {
                speaker: "patient".to_string(),
                text: "Hello.".to_string(),
                delay_ms: 10,
            }],
        );

        audio_tx.send(AudioFrame::Chunk(vec![0; 512])).unwrap();
        engine.run(source, sink).unwrap();

        let first = events.try_recv().unwrap().0;
        assert_eq!(first["type"], "script_turn");
    }

    #[tokio::test]
    async fn test_factory_requires_script_document() {
        let documents = Arc::new(DocumentStore::new(
            Arc::new(MemoryBlobStore::new()),
            "patient_profile".to_string(),
        ));
        let factory =
            ScriptedEngineFactory::new(Arc::clone(&documents), "scenario_script.json".to_string());

        let ctx = SessionContext {
            patient_id: "p001".to_string(),
            seed_context: String::new(),
            script_file: None,
            questions: Vec::new(),
        };

        // No script stored yet: session start must fail
        assert!(factory.create(&ctx).await.is_err());

        documents
            .save("p001", "scenario_script.json", SCRIPT.as_bytes().to_vec())
            .await
            .unwrap();
        let engine = factory.create(&ctx).await;
        assert!(engine.is_ok());
    }
}
