//! # Recognition Engine Seam
//!
//! The engine that turns audio into events is an external collaborator. This
//! module pins down the contract the rest of the system holds it to:
//!
//! - `RecognitionEngine::run` is a *blocking* ingestion loop, executed on a
//!   dedicated thread owned by the session bridge
//! - audio arrives through an `AudioSource` (channel + stop flag; the loop
//!   polls with a bounded timeout so teardown is never stuck behind a recv)
//! - results leave through an `EventSink`; event order on the sink is the
//!   order delivered to the client
//! - an `EngineFactory` builds one engine per session from the session
//!   context (patient id, seed context, question pool, script)

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// How long the ingestion loop may block before re-checking the stop flag.
/// Bounds the join in `SessionBridge::stop`.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// One item on the audio hand-off channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioFrame {
    /// Opaque audio bytes from the client.
    Chunk(Vec<u8>),

    /// Graceful end-of-session: stop accepting audio, flush pending
    /// recognition, then exit. Sent in-band so it cannot overtake audio.
    Finish,
}

/// Result of one bounded poll on the audio channel.
#[derive(Debug)]
pub enum AudioPoll {
    Frame(AudioFrame),
    /// Timed out with nothing queued; the loop should re-check and continue.
    Idle,
    /// Stop was signalled or the feeding side is gone; the loop must exit.
    Closed,
}

/// Engine-side receiver for the audio hand-off.
pub struct AudioSource {
    receiver: Receiver<AudioFrame>,
    stop: Arc<AtomicBool>,
}

impl AudioSource {
    pub(crate) fn new(receiver: Receiver<AudioFrame>, stop: Arc<AtomicBool>) -> Self {
        Self { receiver, stop }
    }

    /// Wait up to `timeout` for the next frame, honoring the stop flag.
    pub fn poll(&self, timeout: Duration) -> AudioPoll {
        if self.stop.load(Ordering::SeqCst) {
            return AudioPoll::Closed;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(frame) => AudioPoll::Frame(frame),
            Err(RecvTimeoutError::Timeout) => {
                if self.stop.load(Ordering::SeqCst) {
                    AudioPoll::Closed
                } else {
                    AudioPoll::Idle
                }
            }
            Err(RecvTimeoutError::Disconnected) => AudioPoll::Closed,
        }
    }

    /// Block until a frame arrives or the session is torn down. `None` means
    /// the loop should exit; the stop flag is observed within
    /// `STOP_POLL_INTERVAL`.
    pub fn next_frame(&self) -> Option<AudioFrame> {
        loop {
            match self.poll(STOP_POLL_INTERVAL) {
                AudioPoll::Frame(frame) => return Some(frame),
                AudioPoll::Idle => continue,
                AudioPoll::Closed => return None,
            }
        }
    }
}

/// An event produced by an engine, opaque to the protocol layer.
#[derive(Debug, Clone)]
pub struct EngineEvent(pub Value);

/// Engine-side sender for recognition events.
///
/// Cheap to clone; emission order is delivery order.
#[derive(Clone)]
pub struct EventSink {
    sender: UnboundedSender<EngineEvent>,
}

impl EventSink {
    pub(crate) fn new(sender: UnboundedSender<EngineEvent>) -> Self {
        Self { sender }
    }

    /// Queue an event for the client. Returns false once the consuming side
    /// is gone (connection closed); engines should wind down when that
    /// happens rather than keep producing.
    pub fn emit(&self, event: Value) -> bool {
        self.sender.send(EngineEvent(event)).is_ok()
    }
}

/// A recognition engine: consumes audio frames, emits events.
///
/// `run` is the entire engine lifetime. It must return when the source
/// reports `Closed` (teardown) and should drain/flush on a `Finish` frame.
/// An `Err` return is an engine failure; the bridge logs it and tears the
/// session down the same way a disconnect would.
pub trait RecognitionEngine: Send {
    fn run(&mut self, audio: AudioSource, events: EventSink) -> anyhow::Result<()>;
}

/// Everything a factory gets to build an engine for one session.
#[derive(Debug, Clone)]
pub struct SessionContext {
    /// Opaque patient identifier from the start frame.
    pub patient_id: String,

    /// Freeform seed text fetched from the document store at session start.
    pub seed_context: String,

    /// Script document requested by the start frame, if any.
    pub script_file: Option<String>,

    /// This session's private copy of the question pool.
    pub questions: Vec<Value>,
}

/// Builds one engine per session. The factory may do async work (e.g. fetch
/// a script document); failures fail the session start, never the
/// connection.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(&self, ctx: &SessionContext) -> anyhow::Result<Box<dyn RecognitionEngine>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::mpsc;

    #[test]
    fn test_audio_source_yields_frames_in_order() {
        let (tx, rx) = mpsc::channel();
        let source = AudioSource::new(rx, Arc::new(AtomicBool::new(false)));

        tx.send(AudioFrame::Chunk(vec![1])).unwrap();
        tx.send(AudioFrame::Chunk(vec![2])).unwrap();
        tx.send(AudioFrame::Finish).unwrap();

        assert_eq!(source.next_frame(), Some(AudioFrame::Chunk(vec![1])));
        assert_eq!(source.next_frame(), Some(AudioFrame::Chunk(vec![2])));
        assert_eq!(source.next_frame(), Some(AudioFrame::Finish));
    }

    #[test]
    fn test_audio_source_closes_on_stop_flag() {
        let (_tx, rx) = mpsc::channel::<AudioFrame>();
        let stop = Arc::new(AtomicBool::new(true));
        let source = AudioSource::new(rx, stop);

        assert!(matches!(source.poll(Duration::from_millis(1)), AudioPoll::Closed));
        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_audio_source_closes_on_disconnect() {
        let (tx, rx) = mpsc::channel::<AudioFrame>();
        let source = AudioSource::new(rx, Arc::new(AtomicBool::new(false)));
        drop(tx);

        assert!(source.next_frame().is_none());
    }

    #[test]
    fn test_event_sink_reports_closed_consumer() {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = EventSink::new(tx);

        assert!(sink.emit(json!({"type": "ready"})));
        drop(rx);
        assert!(!sink.emit(json!({"type": "late"})));
    }
}
