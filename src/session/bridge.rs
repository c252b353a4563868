//! # Session Bridge
//!
//! Owns the cross-context lifecycle of one recognition engine. The
//! connection side lives on the actix actor context and must never block;
//! the engine's ingestion loop blocks on its input channel, so it gets a
//! dedicated OS thread. The bridge is the only thing both sides share:
//!
//! - audio flows connection → engine over an unbounded mpsc (send never
//!   blocks the receive loop)
//! - events flow engine → connection over an unbounded tokio channel whose
//!   receiver the actor registers as a stream (order preserved, single
//!   producer, single consumer)
//! - liveness and stop are atomics; `stop()` is idempotent and joins the
//!   thread, bounded by the engine's poll interval

use crate::session::engine::{AudioFrame, AudioSource, EngineEvent, EventSink, RecognitionEngine};
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tracing::{debug, error, info, warn};

pub struct SessionBridge {
    patient_id: String,

    /// Connection-side audio sender; unbounded, so `feed` never blocks.
    audio_tx: Sender<AudioFrame>,

    /// True from thread start until the ingestion loop returns.
    live: Arc<AtomicBool>,

    /// Raised exactly once by `stop()`; the loop observes it within its poll
    /// interval.
    stop: Arc<AtomicBool>,

    /// Engine thread handle, taken on the first `stop()`.
    worker: Option<JoinHandle<()>>,
}

impl SessionBridge {
    /// Launch the engine's ingestion loop on a named thread and return the
    /// bridge plus the ordered event receiver for the connection to drain.
    ///
    /// The event sender lives only inside the engine thread, so the receiver
    /// ends exactly when the engine exits — graceful finish, failure, and
    /// stop all surface to the connection as the stream finishing.
    pub fn start(
        patient_id: String,
        mut engine: Box<dyn RecognitionEngine>,
    ) -> Result<(Self, UnboundedReceiver<EngineEvent>)> {
        let (audio_tx, audio_rx) = std::sync::mpsc::channel();
        let (event_tx, event_rx) = unbounded_channel();

        let live = Arc::new(AtomicBool::new(true));
        let stop = Arc::new(AtomicBool::new(false));

        let source = AudioSource::new(audio_rx, Arc::clone(&stop));
        let sink = EventSink::new(event_tx);
        let thread_live = Arc::clone(&live);
        let thread_pid = patient_id.clone();

        let worker = std::thread::Builder::new()
            .name(format!("engine-{}", patient_id))
            .spawn(move || {
                info!("Engine loop started for {}", thread_pid);
                if let Err(err) = engine.run(source, sink) {
                    error!("Engine for {} failed: {:#}", thread_pid, err);
                }
                thread_live.store(false, Ordering::SeqCst);
                info!("Engine loop exited for {}", thread_pid);
            })
            .with_context(|| format!("Failed to spawn engine thread for {}", patient_id))?;

        let bridge = Self {
            patient_id,
            audio_tx,
            live,
            stop,
            worker: Some(worker),
        };
        Ok((bridge, event_rx))
    }

    pub fn patient_id(&self) -> &str {
        &self.patient_id
    }

    /// Whether the engine's ingestion loop is still running.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Queue one audio chunk for the engine. Returns false (chunk dropped)
    /// if the engine is no longer live; never blocks the caller.
    pub fn feed(&self, data: &[u8]) -> bool {
        if !self.is_live() {
            return false;
        }
        self.audio_tx.send(AudioFrame::Chunk(data.to_vec())).is_ok()
    }

    /// Graceful end-of-session: ask the engine to drain queued audio, flush
    /// pending recognition, and exit on its own. The frame travels the audio
    /// channel, so everything fed before it is still processed.
    pub fn finish(&self) {
        if self.audio_tx.send(AudioFrame::Finish).is_ok() {
            debug!("Finish signalled for {}", self.patient_id);
        } else {
            warn!(
                "Finish requested for {} but the engine already exited",
                self.patient_id
            );
        }
    }

    /// Unconditional teardown. Raises the stop flag and joins the engine
    /// thread; the join is bounded by the loop's poll interval. Safe to call
    /// any number of times and after the thread has exited on its own.
    pub fn stop(&mut self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        self.live.store(false, Ordering::SeqCst);

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Engine thread for {} panicked", self.patient_id);
            }
        }
        debug!("Session bridge for {} stopped", self.patient_id);
    }
}

/// Every teardown path (explicit stop, disconnect, actor error) converges
/// here, so the engine thread can never be leaked.
impl Drop for SessionBridge {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Engine that records fed chunks and echoes markers for each frame.
    struct RecordingEngine {
        chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    }

    impl RecognitionEngine for RecordingEngine {
        fn run(&mut self, audio: AudioSource, events: EventSink) -> anyhow::Result<()> {
            while let Some(frame) = audio.next_frame() {
                match frame {
                    AudioFrame::Chunk(data) => {
                        events.emit(json!({"type": "chunk", "len": data.len()}));
                        self.chunks.lock().unwrap().push(data);
                    }
                    AudioFrame::Finish => {
                        events.emit(json!({"type": "final"}));
                        break;
                    }
                }
            }
            Ok(())
        }
    }

    /// Engine that emits a fixed sequence and exits immediately.
    struct BurstEngine;

    impl RecognitionEngine for BurstEngine {
        fn run(&mut self, _audio: AudioSource, events: EventSink) -> anyhow::Result<()> {
            for index in 1..=3 {
                events.emit(json!({"event": format!("e{}", index)}));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_events_delivered_in_production_order() {
        let (mut bridge, mut events) =
            SessionBridge::start("p001".to_string(), Box::new(BurstEngine)).unwrap();

        let mut seen = Vec::new();
        while let Some(EngineEvent(value)) = events.recv().await {
            seen.push(value["event"].as_str().unwrap().to_string());
        }

        assert_eq!(seen, vec!["e1", "e2", "e3"]);
        bridge.stop();
    }

    #[tokio::test]
    async fn test_feed_reaches_engine_and_finish_drains() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let engine = RecordingEngine {
            chunks: Arc::clone(&chunks),
        };
        let (mut bridge, mut events) =
            SessionBridge::start("p001".to_string(), Box::new(engine)).unwrap();

        assert!(bridge.feed(&[1, 2, 3]));
        assert!(bridge.feed(&[4, 5]));
        bridge.finish();

        // The stream ends when the engine exits; the final marker proves the
        // queued chunks were consumed before the finish frame.
        let mut kinds = Vec::new();
        while let Some(EngineEvent(value)) = events.recv().await {
            kinds.push(value["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, vec!["chunk", "chunk", "final"]);
        assert_eq!(
            *chunks.lock().unwrap(),
            vec![vec![1, 2, 3], vec![4, 5]]
        );

        // The live flag clears once the loop has fully returned
        while bridge.is_live() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        bridge.stop();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let engine = RecordingEngine {
            chunks: Arc::clone(&chunks),
        };
        let (mut bridge, _events) =
            SessionBridge::start("p001".to_string(), Box::new(engine)).unwrap();

        bridge.stop();
        bridge.stop();
        assert!(!bridge.is_live());
    }

    #[tokio::test]
    async fn test_stop_after_engine_exited_on_its_own() {
        let (mut bridge, mut events) =
            SessionBridge::start("p001".to_string(), Box::new(BurstEngine)).unwrap();

        // Drain until the engine is done, then wait for the flag to drop.
        while events.recv().await.is_some() {}
        while bridge.is_live() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        bridge.stop();
        bridge.stop();
    }

    #[tokio::test]
    async fn test_feed_after_stop_is_rejected() {
        let chunks = Arc::new(Mutex::new(Vec::new()));
        let engine = RecordingEngine {
            chunks: Arc::clone(&chunks),
        };
        let (mut bridge, _events) =
            SessionBridge::start("p001".to_string(), Box::new(engine)).unwrap();

        bridge.stop();
        assert!(!bridge.feed(&[9, 9]));
        assert!(chunks.lock().unwrap().is_empty());
    }
}
