use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use emotive_voice::config::DeviceProfile;
use emotive_voice::voice::{
    AudioBlob, AudioSource, CloudSynthesizer, MicrophoneSource, Recognizer, Recording,
    SpeechToText, Synthesizer, TextOnlySynthesizer, Transcriber, to_wav,
};
use emotive_voice::{
    Collaborators, Config, Conversation, ConversationOptions, DirectChat, Phase, StreamingChat,
    emotion,
};

/// Emotive - talk to a hosted chat model and hear it answer
#[derive(Parser)]
#[command(name = "emotive", version, about)]
struct Cli {
    /// Device profile (sets the default listen timeout)
    #[arg(long, env = "EMOTIVE_PROFILE", value_parser = ["desktop", "mobile"])]
    profile: Option<String>,

    /// Voice to speak with
    #[arg(long, env = "EMOTIVE_VOICE")]
    voice: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive voice conversation (default)
    Talk,
    /// Send a canned message through the chat chain
    TestChat,
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// List synthesis voices
    Voices,
    /// Transcribe an audio file with the cloud transcriber
    Transcribe {
        /// Audio file (wav, mp3, ogg, flac, m4a)
        file: PathBuf,
    },
    /// Classify the emotion of a piece of text
    Classify {
        /// Text to classify
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,emotive_voice=info",
        1 => "info,emotive_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load();
    if let Some(profile) = cli.profile.as_deref() {
        let profile = if profile == "mobile" {
            DeviceProfile::Mobile
        } else {
            DeviceProfile::Desktop
        };
        config.listen.profile = profile;
        config.listen.timeout = profile.listen_timeout();
    }
    if cli.voice.is_some() {
        config.speech.voice = cli.voice;
    }

    match cli.command.unwrap_or(Command::Talk) {
        Command::Talk => talk(&config).await,
        Command::TestChat => test_chat(&config).await,
        Command::TestMic { duration } => test_mic(duration).await,
        Command::Voices => list_voices(&config).await,
        Command::Transcribe { file } => transcribe(&config, &file).await,
        Command::Classify { text } => {
            classify(&text);
            Ok(())
        }
    }
}

/// Wire the production collaborators
fn build_conversation(config: &Config) -> anyhow::Result<Conversation> {
    let primary = Arc::new(StreamingChat::new(config.chat.require()?));
    let fallback = Arc::new(DirectChat::new(config.chat.require()?));
    let transcriber = Arc::new(SpeechToText::from_config(config)?);

    let synthesizer: Arc<dyn Synthesizer> = match config.speech.require_tts() {
        Ok(settings) => Arc::new(CloudSynthesizer::new(settings)),
        Err(e) => {
            tracing::info!(reason = %e, "speech output disabled, replies are printed only");
            Arc::new(TextOnlySynthesizer)
        }
    };

    Ok(Conversation::new(
        Collaborators {
            audio: Arc::new(MicrophoneSource::new()),
            recognizer: local_recognizer(config),
            transcriber,
            primary,
            fallback,
            synthesizer,
        },
        ConversationOptions::from_config(config),
    ))
}

/// Offline recognizer, when a model is configured
#[cfg(feature = "local-whisper")]
fn local_recognizer(config: &Config) -> Option<Arc<dyn Recognizer>> {
    use emotive_voice::voice::{OfflineRecognizer, WhisperModel};

    let path = config.speech.local_model.as_deref()?;
    match WhisperModel::load(path, &config.speech.language) {
        Ok(model) => Some(Arc::new(OfflineRecognizer::new(
            model,
            Arc::new(MicrophoneSource::new()),
        ))),
        Err(e) => {
            tracing::warn!(error = %e, "offline recognition disabled");
            None
        }
    }
}

#[cfg(not(feature = "local-whisper"))]
fn local_recognizer(config: &Config) -> Option<Arc<dyn Recognizer>> {
    if let Some(path) = &config.speech.local_model {
        tracing::warn!(
            model = %path.display(),
            "local model configured but built without the local-whisper feature"
        );
    }
    None
}

/// Interactive loop: Enter toggles listening
async fn talk(config: &Config) -> anyhow::Result<()> {
    let conversation = build_conversation(config)?;

    let mut updates = conversation.subscribe();
    tokio::spawn(async move {
        let mut last_phase = Phase::Idle;
        let mut last_error = None;
        while let Ok(state) = updates.recv().await {
            if state.error != last_error {
                if let Some(error) = &state.error {
                    println!("! {error}");
                }
                last_error.clone_from(&state.error);
            }
            if state.phase != last_phase {
                match state.phase {
                    Phase::Processing => println!("… transcribing"),
                    Phase::AwaitingReply => println!("… thinking"),
                    Phase::Speaking => println!("[{}]", state.emotion),
                    Phase::Idle if last_phase != Phase::Idle => {
                        println!("Press Enter to talk (Ctrl-D to quit)");
                    }
                    _ => {}
                }
                last_phase = state.phase;
            }
        }
    });

    println!(
        "Press Enter to talk, Enter again to stop (auto-stops after {}s). Ctrl-D to quit.",
        config.listen.timeout.as_secs()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = 0;
    while lines.next_line().await?.is_some() {
        if conversation.state().is_listening {
            conversation.stop_listening().await;
        } else {
            match conversation.start_listening().await {
                Ok(()) => println!("● listening…"),
                Err(e) => println!("! {e}"),
            }
        }

        let messages = conversation.messages();
        for message in messages.iter().skip(printed) {
            println!("{:>9}: {}", format!("{:?}", message.role), message.content);
        }
        printed = messages.len();
    }

    conversation.stop_listening().await;
    conversation.stop_speaking();
    Ok(())
}

async fn test_chat(config: &Config) -> anyhow::Result<()> {
    let conversation = build_conversation(config)?;
    println!("Sending: \"{}\"", emotive_voice::conversation::TEST_CHAT_PROMPT);

    let reply = conversation.test_chat().await?;
    let state = conversation.state();
    println!("Reply ({}): {reply}", state.emotion);

    // Give the synthesizer a chance to finish speaking
    let mut updates = conversation.subscribe();
    while conversation.state().is_speaking {
        if tokio::time::timeout(Duration::from_secs(30), updates.recv())
            .await
            .is_err()
        {
            break;
        }
    }
    Ok(())
}

/// Test microphone input
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let recording = MicrophoneSource::new().open().await?;
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let level = recording.level();

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (level * 50.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] level: {level:.3} | [{meter}]", i + 1);
    }

    let audio = recording.finish().await?;
    let bytes: usize = audio.chunks.iter().map(Vec::len).sum();

    println!("\n---");
    println!("Captured {bytes} bytes of audio.");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If the level stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

async fn list_voices(config: &Config) -> anyhow::Result<()> {
    let synthesizer = CloudSynthesizer::new(config.speech.require_tts()?);
    let voices = synthesizer.voices().await?;

    for voice in &voices {
        let marker = if voice.is_premium { "*" } else { " " };
        println!("{marker} {:<40} {}", voice.name, voice.lang);
    }
    println!("\n{} voices (* = premium)", voices.len());
    Ok(())
}

async fn transcribe(config: &Config, file: &Path) -> anyhow::Result<()> {
    let transcriber = SpeechToText::from_config(config)?;
    let bytes = tokio::fs::read(file).await?;

    let mime = match file.extension().and_then(|e| e.to_str()) {
        Some("mp3") => "audio/mpeg",
        Some("ogg") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a" | "mp4") => "audio/mp4",
        _ => "audio/wav",
    };

    let wav = to_wav(AudioBlob::new(bytes, mime));
    println!("Encoded {} bytes ({})", wav.bytes.len(), wav.mime);

    let result = transcriber.transcribe(&wav).await;
    if result.is_empty() {
        println!("No speech detected.");
    } else {
        println!("{} (confidence {:.2})", result.text, result.confidence);
    }
    Ok(())
}

fn classify(text: &str) {
    for (emotion, score) in emotion::scores(text) {
        println!("{:>10}: {score}", emotion.as_str());
    }
    println!("=> {}", emotion::classify(text));
}
