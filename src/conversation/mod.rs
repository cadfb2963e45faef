//! Conversation orchestration
//!
//! Drives one listen → transcribe → reply → speak cycle at a time. All
//! collaborators are injected so the orchestrator can run against mocks.
//!
//! Transcript arbitration is a preference order: when the local recognizer
//! produced any text it is used as-is, otherwise the recorded audio goes to
//! the cloud transcriber.

mod state;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OnceCell, broadcast};
use tokio::task::JoinHandle;

pub use state::{
    ALL_CHAT_FAILED_MESSAGE, ConversationState, NO_SPEECH_MESSAGE, Phase, Transition,
};

use crate::chat::{ChatTransport, Message};
use crate::config::Config;
use crate::emotion;
use crate::voice::{
    AudioSource, CapturedAudio, RecognitionHandle, Recognizer, RecognizerEvent, Recording,
    SpeechEvent, Synthesizer, Transcriber, TranscriptionResult, Utterance, Voice, select_voice,
    to_wav,
};
use crate::{Error, Result};

/// Canned prompt used by [`Conversation::test_chat`]
pub const TEST_CHAT_PROMPT: &str = "Hello, can you hear me?";

/// Confidence assigned to local recognizer transcripts
pub const LOCAL_CONFIDENCE: f32 = 0.9;

/// Channel capacity for state snapshots
const CHANNEL_CAPACITY: usize = 64;

/// How often the input level is sampled
const LEVEL_INTERVAL: Duration = Duration::from_millis(100);

/// Everything the orchestrator talks to
pub struct Collaborators {
    pub audio: Arc<dyn AudioSource>,
    pub recognizer: Option<Arc<dyn Recognizer>>,
    pub transcriber: Arc<dyn Transcriber>,
    pub primary: Arc<dyn ChatTransport>,
    pub fallback: Arc<dyn ChatTransport>,
    pub synthesizer: Arc<dyn Synthesizer>,
}

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct ConversationOptions {
    /// Hard limit on one listening session
    pub listen_timeout: Duration,
    /// Voice name to use when the synthesizer offers it
    pub preferred_voice: Option<String>,
}

impl Default for ConversationOptions {
    fn default() -> Self {
        Self {
            listen_timeout: Duration::from_secs(10),
            preferred_voice: None,
        }
    }
}

impl ConversationOptions {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            listen_timeout: config.listen.timeout,
            preferred_voice: config.speech.voice.clone(),
        }
    }
}

/// One active listening session
struct ListenSession {
    id: u64,
    recording: Box<dyn Recording>,
    pump: Option<JoinHandle<()>>,
    timer: JoinHandle<()>,
    meter: JoinHandle<()>,
}

struct Shared {
    collaborators: Collaborators,
    options: ConversationOptions,
    state: Mutex<ConversationState>,
    session: tokio::sync::Mutex<Option<ListenSession>>,
    messages: Mutex<Vec<Message>>,
    transcript: Mutex<String>,
    next_session: AtomicU64,
    speech_generation: AtomicU64,
    preferred_voice: Mutex<Option<String>>,
    voices: OnceCell<Vec<Voice>>,
    tx: broadcast::Sender<ConversationState>,
}

/// Voice conversation orchestrator
///
/// Cheap to clone; clones share the same session and state.
#[derive(Clone)]
pub struct Conversation {
    inner: Arc<Shared>,
}

impl Conversation {
    /// Create an idle conversation
    #[must_use]
    pub fn new(collaborators: Collaborators, options: ConversationOptions) -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let preferred_voice = options.preferred_voice.clone();
        Self {
            inner: Arc::new(Shared {
                collaborators,
                options,
                state: Mutex::new(ConversationState::default()),
                session: tokio::sync::Mutex::new(None),
                messages: Mutex::new(Vec::new()),
                transcript: Mutex::new(String::new()),
                next_session: AtomicU64::new(0),
                speech_generation: AtomicU64::new(0),
                preferred_voice: Mutex::new(preferred_voice),
                voices: OnceCell::new(),
                tx,
            }),
        }
    }

    /// Current state snapshot
    #[must_use]
    pub fn state(&self) -> ConversationState {
        self.inner
            .state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }

    /// Receive every state snapshot, in transition order
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationState> {
        self.inner.tx.subscribe()
    }

    /// Conversation history
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner
            .messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    /// Voices offered by the synthesizer
    ///
    /// # Errors
    ///
    /// Returns error if the synthesizer cannot list its voices
    pub async fn voices(&self) -> Result<Vec<Voice>> {
        self.inner.collaborators.synthesizer.voices().await
    }

    /// Prefer a voice by name for subsequent replies
    pub fn select_voice(&self, name: impl Into<String>) {
        if let Ok(mut preferred) = self.inner.preferred_voice.lock() {
            *preferred = Some(name.into());
        }
    }

    /// Start a listening session
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyListening`] if a session is active
    /// - [`Error::Busy`] while a previous utterance is being processed
    /// - [`Error::Permission`] / [`Error::Environment`] if capture cannot start
    pub async fn start_listening(&self) -> Result<()> {
        let mut session = self.inner.session.lock().await;
        if session.is_some() {
            return Err(Error::AlreadyListening);
        }

        let current = self.state();
        if current.phase.is_busy() {
            return Err(Error::Busy(format!("{:?}", current.phase)));
        }

        if current.is_speaking {
            self.stop_speaking();
        }

        self.transition(Transition::ErrorCleared);
        if let Ok(mut transcript) = self.inner.transcript.lock() {
            transcript.clear();
        }

        let recording = match self.inner.collaborators.audio.open().await {
            Ok(recording) => recording,
            Err(e) => {
                tracing::warn!(error = %e, "failed to start audio capture");
                self.transition(Transition::Failed(e.to_string()));
                return Err(e);
            }
        };

        let id = self.inner.next_session.fetch_add(1, Ordering::SeqCst) + 1;

        let pump = match &self.inner.collaborators.recognizer {
            Some(recognizer) => match recognizer.start().await {
                Ok(handle) => Some(self.spawn_recognizer_pump(id, handle)),
                Err(e) => {
                    tracing::warn!(error = %e, "local recognizer unavailable, using cloud only");
                    None
                }
            },
            None => None,
        };

        let timer = {
            let conversation = self.clone();
            let timeout = self.inner.options.listen_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                tracing::debug!(session = id, "listen timeout reached");
                conversation.spawn_stop(id);
            })
        };

        let meter = self.spawn_level_meter(id);

        *session = Some(ListenSession {
            id,
            recording,
            pump,
            timer,
            meter,
        });
        self.transition(Transition::ListenStarted);

        tracing::info!(session = id, "listening");
        Ok(())
    }

    /// Stop the active session and finalize it; no-op when idle
    pub async fn stop_listening(&self) {
        self.stop_session(None).await;
    }

    /// Send a canned message through the chat chain
    ///
    /// Holds the session lock for the whole exchange, so no listen session
    /// can start until the reply has been handed to the synthesizer.
    ///
    /// # Errors
    ///
    /// - [`Error::AlreadyListening`] if a session is active
    /// - [`Error::Busy`] while a previous utterance is being processed
    /// - the chat error if both transports fail
    pub async fn test_chat(&self) -> Result<String> {
        let session = self.inner.session.lock().await;
        if session.is_some() {
            return Err(Error::AlreadyListening);
        }

        let phase = self.state().phase;
        if phase.is_busy() {
            return Err(Error::Busy(format!("{phase:?}")));
        }

        let reply = self.respond(TEST_CHAT_PROMPT.to_string()).await;
        drop(session);
        reply
    }

    /// Cancel any speech in progress
    pub fn stop_speaking(&self) {
        self.inner.speech_generation.fetch_add(1, Ordering::SeqCst);
        self.inner.collaborators.synthesizer.cancel();
        self.transition(Transition::SpeechCancelled);
    }

    /// Route one state change through the transition function
    fn transition(&self, transition: Transition) {
        let snapshot = {
            let Ok(mut state) = self.inner.state.lock() else {
                return;
            };
            state.apply(&transition);
            state.clone()
        };
        tracing::trace!(?transition, phase = ?snapshot.phase, "state transition");
        let _ = self.inner.tx.send(snapshot);
    }

    fn spawn_stop(&self, id: u64) {
        let conversation = self.clone();
        tokio::spawn(async move { conversation.stop_session(Some(id)).await });
    }

    fn spawn_recognizer_pump(&self, id: u64, mut handle: RecognitionHandle) -> JoinHandle<()> {
        let conversation = self.clone();
        tokio::spawn(async move {
            while let Some(event) = handle.next().await {
                match event {
                    RecognizerEvent::Result { text, confidence } => {
                        tracing::debug!(session = id, text = %text, confidence, "local transcript");
                        if let Ok(mut transcript) = conversation.inner.transcript.lock() {
                            if !transcript.is_empty() {
                                transcript.push(' ');
                            }
                            transcript.push_str(text.trim());
                        }
                    }
                    RecognizerEvent::Error(message) => {
                        tracing::warn!(session = id, error = %message, "local recognizer error");
                        conversation.transition(Transition::RecognizerError(message));
                    }
                    RecognizerEvent::Ended => {
                        tracing::debug!(session = id, "local recognizer ended");
                        conversation.spawn_stop(id);
                        break;
                    }
                }
            }
        })
    }

    fn spawn_level_meter(&self, id: u64) -> JoinHandle<()> {
        let conversation = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(LEVEL_INTERVAL);
            loop {
                interval.tick().await;
                let level = match conversation.inner.session.try_lock() {
                    Ok(session) => match session.as_ref() {
                        Some(s) if s.id == id => s.recording.level(),
                        _ => continue,
                    },
                    Err(_) => continue,
                };
                conversation.transition(Transition::Level(level));
            }
        })
    }

    /// Stop a session; `expected` restricts the stop to one session id
    async fn stop_session(&self, expected: Option<u64>) {
        let (audio, local_text) = {
            let mut guard = self.inner.session.lock().await;
            let Some(mut session) =
                guard.take_if(|s| expected.is_none_or(|id| s.id == id))
            else {
                return;
            };

            session.timer.abort();
            session.meter.abort();

            let grace = match &self.inner.collaborators.recognizer {
                Some(recognizer) => {
                    recognizer.stop();
                    recognizer.drain_timeout()
                }
                None => Duration::ZERO,
            };
            if let Some(mut pump) = session.pump.take()
                && tokio::time::timeout(grace, &mut pump).await.is_err()
            {
                tracing::debug!(session = session.id, "recognizer did not end, abandoning it");
                pump.abort();
            }

            let audio = match session.recording.finish().await {
                Ok(audio) => Some(audio),
                Err(e) => {
                    tracing::warn!(error = %e, "failed to finish recording");
                    None
                }
            };

            let local_text = self
                .inner
                .transcript
                .lock()
                .map(|t| t.trim().to_string())
                .unwrap_or_default();

            self.transition(Transition::ListenStopped {
                needs_cloud: local_text.is_empty(),
            });
            tracing::info!(session = session.id, "stopped listening");

            (audio, local_text)
        };

        if !local_text.is_empty() {
            self.transition(Transition::Confidence(LOCAL_CONFIDENCE));
            let _ = self.respond(local_text).await;
            return;
        }

        let result = match audio.map(CapturedAudio::into_blob) {
            Some(blob) if !blob.is_empty() => {
                let wav = to_wav(blob);
                self.inner.collaborators.transcriber.transcribe(&wav).await
            }
            _ => TranscriptionResult::empty(),
        };
        self.transition(Transition::TranscriptionFinished {
            heard: !result.is_empty(),
        });

        if result.is_empty() {
            self.transition(Transition::Failed(NO_SPEECH_MESSAGE.to_string()));
            return;
        }

        self.transition(Transition::Confidence(result.confidence));
        let _ = self.respond(result.text.trim().to_string()).await;
    }

    /// Append the user message and run the primary → fallback chain
    async fn respond(&self, text: String) -> Result<String> {
        let user = Message::user(text);
        let history = match self.inner.messages.lock() {
            Ok(mut messages) => {
                messages.push(user);
                messages.clone()
            }
            Err(_) => vec![user],
        };
        self.transition(Transition::AwaitingReply);

        let primary = &self.inner.collaborators.primary;
        let reply = match primary.complete(&history).await {
            Ok(reply) => Ok(reply),
            Err(e) if e.is_transport() => {
                let fallback = &self.inner.collaborators.fallback;
                tracing::warn!(
                    error = %e,
                    primary = primary.name(),
                    fallback = fallback.name(),
                    "primary chat failed, trying fallback"
                );
                fallback.complete(&history).await.map_err(|e| {
                    tracing::error!(error = %e, "fallback chat failed");
                    e
                })
            }
            Err(e) => Err(e),
        };

        match reply {
            Ok(reply) => {
                self.deliver(&reply).await;
                Ok(reply)
            }
            Err(e) => {
                let message = if e.is_transport() {
                    ALL_CHAT_FAILED_MESSAGE.to_string()
                } else {
                    e.to_string()
                };
                self.transition(Transition::Failed(message));
                Err(e)
            }
        }
    }

    async fn deliver(&self, reply: &str) {
        if let Ok(mut messages) = self.inner.messages.lock() {
            messages.push(Message::assistant(reply));
        }

        let emotion = emotion::classify(reply);
        tracing::info!(emotion = %emotion, "assistant replied");
        self.transition(Transition::ReplyReceived(emotion));

        self.speak(reply.to_string()).await;
    }

    async fn speak(&self, text: String) {
        let generation = self.inner.speech_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let synthesizer = Arc::clone(&self.inner.collaborators.synthesizer);
        synthesizer.cancel();

        let voice = self.voice().await;
        let conversation = self.clone();
        tokio::spawn(async move {
            let is_current =
                || conversation.inner.speech_generation.load(Ordering::SeqCst) == generation;

            // Superseded before it started: a newer cycle already cancelled
            if !is_current() {
                return;
            }

            // Returning early drops `handle`, which stops this utterance only
            let mut handle = match synthesizer.speak(Utterance::new(text).with_voice(voice)).await
            {
                Ok(handle) => handle,
                Err(e) => {
                    tracing::warn!(error = %e, "speech synthesis unavailable");
                    if is_current() {
                        conversation.transition(Transition::SpeakingFinished);
                    }
                    return;
                }
            };
            if !is_current() {
                return;
            }

            while let Some(event) = handle.next().await {
                if !is_current() {
                    return;
                }
                match event {
                    SpeechEvent::Started => conversation.transition(Transition::SpeakingStarted),
                    SpeechEvent::Ended => {
                        conversation.transition(Transition::SpeakingFinished);
                        return;
                    }
                    SpeechEvent::Error(message) => {
                        tracing::warn!(error = %message, "speech synthesis error");
                        conversation.transition(Transition::SpeakingFinished);
                        return;
                    }
                }
            }

            if is_current() {
                conversation.transition(Transition::SpeakingFinished);
            }
        });
    }

    /// Pick the reply voice; the voice list is fetched once
    async fn voice(&self) -> Option<Voice> {
        let synthesizer = &self.inner.collaborators.synthesizer;
        let voices = match self
            .inner
            .voices
            .get_or_try_init(|| synthesizer.voices())
            .await
        {
            Ok(voices) => voices,
            Err(e) => {
                tracing::warn!(error = %e, "could not list voices, using default");
                return None;
            }
        };

        let preferred = self
            .inner
            .preferred_voice
            .lock()
            .ok()
            .and_then(|p| p.clone());
        let voice = select_voice(preferred.as_deref(), voices);
        tracing::debug!(voice = ?voice.as_ref().map(|v| &v.name), "selected voice");
        voice
    }
}
