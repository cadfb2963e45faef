//! Shared test utilities: mock collaborators and a conversation harness

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use emotive_voice::chat::{ChatTransport, Message};
use emotive_voice::voice::{
    AudioBlob, AudioSource, CapturedAudio, DEFAULT_DRAIN_TIMEOUT, RecognitionHandle, Recognizer,
    RecognizerEvent, Recording, SpeechEvent, SpeechHandle, Synthesizer, Transcriber,
    TranscriptionResult, Utterance, Voice,
};
use emotive_voice::{Collaborators, Conversation, ConversationOptions, Error, Result};
use tokio::sync::mpsc;

/// Number of samples in the canned recording (100 ms at 48 kHz)
pub const RECORDED_SAMPLES: usize = 4_800;

/// A 48 kHz mono float WAV, as a browser-ish recorder might hand back
#[must_use]
pub fn recorded_wav(samples: usize) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 48_000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
        for i in 0..samples {
            let t = i as f32 / 48_000.0;
            writer
                .write_sample((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5)
                .unwrap();
        }
        writer.finalize().unwrap();
    }
    cursor.into_inner()
}

/// Let spawned tasks run
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

// ---------------------------------------------------------------------------
// Audio capture

pub struct MockAudio {
    pub opened: AtomicUsize,
    pub finished: Arc<AtomicUsize>,
    pub deny: Mutex<Option<String>>,
    pub audio: Mutex<CapturedAudio>,
}

impl MockAudio {
    fn new() -> Self {
        Self {
            opened: AtomicUsize::new(0),
            finished: Arc::new(AtomicUsize::new(0)),
            deny: Mutex::new(None),
            audio: Mutex::new(CapturedAudio {
                chunks: vec![recorded_wav(RECORDED_SAMPLES)],
                mime: "audio/wav".to_string(),
            }),
        }
    }

    pub fn deny_permission(&self, message: Option<&str>) {
        *self.deny.lock().unwrap() = message.map(ToString::to_string);
    }
}

#[async_trait]
impl AudioSource for MockAudio {
    async fn open(&self) -> Result<Box<dyn Recording>> {
        if let Some(message) = self.deny.lock().unwrap().clone() {
            return Err(Error::Permission(message));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockRecording {
            audio: self.audio.lock().unwrap().clone(),
            finished: Arc::clone(&self.finished),
        }))
    }
}

struct MockRecording {
    audio: CapturedAudio,
    finished: Arc<AtomicUsize>,
}

#[async_trait]
impl Recording for MockRecording {
    fn level(&self) -> f32 {
        0.5
    }

    async fn finish(self: Box<Self>) -> Result<CapturedAudio> {
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(self.audio)
    }
}

// ---------------------------------------------------------------------------
// Local recognizer

#[derive(Default)]
pub struct MockRecognizer {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    script: Mutex<Vec<RecognizerEvent>>,
    active: Mutex<Option<mpsc::Sender<RecognizerEvent>>>,
    after_stop: Mutex<Option<(String, Duration)>>,
    drain: Mutex<Option<Duration>>,
}

impl MockRecognizer {
    /// Events delivered as soon as the next session starts
    pub fn script(&self, events: Vec<RecognizerEvent>) {
        *self.script.lock().unwrap() = events;
    }

    /// Deliver an event to the running session
    pub fn emit(&self, event: RecognizerEvent) {
        if let Some(tx) = self.active.lock().unwrap().as_ref() {
            tx.try_send(event).unwrap();
        }
    }

    /// Deliver `text` this long after stop, as an offline model would
    pub fn finish_after_stop(&self, text: &str, delay: Duration) {
        *self.after_stop.lock().unwrap() = Some((text.to_string(), delay));
    }

    pub fn set_drain_timeout(&self, timeout: Duration) {
        *self.drain.lock().unwrap() = Some(timeout);
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn start(&self) -> Result<RecognitionHandle> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        for event in std::mem::take(&mut *self.script.lock().unwrap()) {
            tx.try_send(event).unwrap();
        }
        *self.active.lock().unwrap() = Some(tx);
        Ok(RecognitionHandle::new(rx))
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        let tx = self.active.lock().unwrap().take();
        if let (Some(tx), Some((text, delay))) = (tx, self.after_stop.lock().unwrap().take()) {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx
                    .send(RecognizerEvent::Result {
                        text,
                        confidence: 0.7,
                    })
                    .await;
            });
        }
    }

    fn drain_timeout(&self) -> Duration {
        self.drain.lock().unwrap().unwrap_or(DEFAULT_DRAIN_TIMEOUT)
    }
}

// ---------------------------------------------------------------------------
// Cloud transcriber

pub struct MockTranscriber {
    pub calls: AtomicUsize,
    pub last_audio: Mutex<Option<AudioBlob>>,
    result: Mutex<TranscriptionResult>,
    delay: Mutex<Duration>,
}

impl MockTranscriber {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            last_audio: Mutex::new(None),
            result: Mutex::new(TranscriptionResult::empty()),
            delay: Mutex::new(Duration::ZERO),
        }
    }

    pub fn respond_with(&self, text: &str, confidence: f32) {
        *self.result.lock().unwrap() = TranscriptionResult::new(text, confidence);
    }

    pub fn delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, audio: &AudioBlob) -> TranscriptionResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_audio.lock().unwrap() = Some(audio.clone());
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.result.lock().unwrap().clone()
    }
}

// ---------------------------------------------------------------------------
// Chat transports

pub struct MockChat {
    name: &'static str,
    pub calls: AtomicUsize,
    pub seen: Mutex<Vec<Vec<String>>>,
    script: Mutex<VecDeque<Result<String>>>,
}

impl MockChat {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue the outcome of the next call
    pub fn push(&self, outcome: Result<String>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChatTransport for MockChat {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn complete(&self, messages: &[Message]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen
            .lock()
            .unwrap()
            .push(messages.iter().map(|m| m.content.clone()).collect());
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("Sure, I can hear you.".to_string()))
    }
}

// ---------------------------------------------------------------------------
// Synthesizer

/// How the mock synthesizer reports progress
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SpeechMode {
    /// Started then Ended immediately
    Instant,
    /// Started then Error immediately
    Failing,
    /// Started only; the test drives the rest through `senders`
    Manual,
}

pub struct MockSynthesizer {
    pub mode: Mutex<SpeechMode>,
    pub cancels: AtomicUsize,
    pub spoken: Mutex<Vec<Utterance>>,
    pub senders: Mutex<Vec<mpsc::Sender<SpeechEvent>>>,
    /// Raised when the orchestrator drops an utterance's handle
    pub released: Mutex<Vec<Arc<AtomicBool>>>,
    pub voices: Vec<Voice>,
}

impl MockSynthesizer {
    fn new() -> Self {
        Self {
            mode: Mutex::new(SpeechMode::Instant),
            cancels: AtomicUsize::new(0),
            spoken: Mutex::new(Vec::new()),
            senders: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            voices: vec![
                Voice::new("Fred", "en-US"),
                Voice::new("en-US-AriaNeural", "en-US"),
            ],
        }
    }

    pub fn set_mode(&self, mode: SpeechMode) {
        *self.mode.lock().unwrap() = mode;
    }

    /// Utterances whose handle is still held
    pub fn playing(&self) -> usize {
        self.released
            .lock()
            .unwrap()
            .iter()
            .filter(|flag| !flag.load(Ordering::SeqCst))
            .count()
    }

    /// Send an event to the `index`-th utterance
    ///
    /// The orchestrator may already have dropped a superseded utterance.
    pub async fn send(&self, index: usize, event: SpeechEvent) {
        let tx = self.senders.lock().unwrap()[index].clone();
        let _ = tx.send(event).await;
    }
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn voices(&self) -> Result<Vec<Voice>> {
        Ok(self.voices.clone())
    }

    async fn speak(&self, utterance: Utterance) -> Result<SpeechHandle> {
        self.spoken.lock().unwrap().push(utterance);
        let (tx, rx) = mpsc::channel(8);
        tx.try_send(SpeechEvent::Started).unwrap();
        match *self.mode.lock().unwrap() {
            SpeechMode::Instant => tx.try_send(SpeechEvent::Ended).unwrap(),
            SpeechMode::Failing => tx
                .try_send(SpeechEvent::Error("audio device lost".to_string()))
                .unwrap(),
            SpeechMode::Manual => self.senders.lock().unwrap().push(tx),
        }
        let released = Arc::new(AtomicBool::new(false));
        self.released.lock().unwrap().push(Arc::clone(&released));
        Ok(SpeechHandle::with_cancel(rx, released))
    }

    fn cancel(&self) {
        self.cancels.fetch_add(1, Ordering::SeqCst);
    }
}

// ---------------------------------------------------------------------------
// Harness

pub struct Harness {
    pub conversation: Conversation,
    pub audio: Arc<MockAudio>,
    pub recognizer: Arc<MockRecognizer>,
    pub transcriber: Arc<MockTranscriber>,
    pub primary: Arc<MockChat>,
    pub fallback: Arc<MockChat>,
    pub synthesizer: Arc<MockSynthesizer>,
}

impl Harness {
    #[must_use]
    pub fn new() -> Self {
        Self::build(Duration::from_secs(10), true)
    }

    #[must_use]
    pub fn with_timeout(listen_timeout: Duration) -> Self {
        Self::build(listen_timeout, true)
    }

    /// No local recognizer: every cycle goes to the cloud
    #[must_use]
    pub fn cloud_only() -> Self {
        Self::build(Duration::from_secs(10), false)
    }

    fn build(listen_timeout: Duration, with_recognizer: bool) -> Self {
        let audio = Arc::new(MockAudio::new());
        let recognizer = Arc::new(MockRecognizer::default());
        let transcriber = Arc::new(MockTranscriber::new());
        let primary = Arc::new(MockChat::new("primary"));
        let fallback = Arc::new(MockChat::new("fallback"));
        let synthesizer = Arc::new(MockSynthesizer::new());

        let conversation = Conversation::new(
            Collaborators {
                audio: audio.clone(),
                recognizer: with_recognizer.then(|| recognizer.clone() as Arc<dyn Recognizer>),
                transcriber: transcriber.clone(),
                primary: primary.clone(),
                fallback: fallback.clone(),
                synthesizer: synthesizer.clone(),
            },
            ConversationOptions {
                listen_timeout,
                preferred_voice: None,
            },
        );

        Self {
            conversation,
            audio,
            recognizer,
            transcriber,
            primary,
            fallback,
            synthesizer,
        }
    }
}
