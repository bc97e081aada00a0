use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use talkback::chat::ChatBackend;
use talkback::surface::{BOT_LABEL, USER_LABEL};
use talkback::tts::SpeechSynthesizer;
use talkback::voice::{AudioCapture, AudioSink, PLAYBACK_SAMPLE_RATE};
use talkback::{
    Config, ControlMsg, Controller, HttpChat, HttpTts, MicRecognizer, SpeakerSink,
    TerminalSurface,
};

/// Talkback - hands-free voice chat client
#[derive(Parser)]
#[command(name = "talkback", version, about)]
struct Cli {
    /// Chat backend base URL
    #[arg(short, long, env = "TALKBACK_SERVER_URL")]
    server: Option<String>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output with a tone
    TestSpeaker {
        /// Duration in seconds
        #[arg(short, long, default_value = "2")]
        duration: u64,
    },
    /// Send one message and speak the reply, without the conversation loop
    Say {
        /// Message to send
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,talkback=info",
        1 => "info,talkback=debug",
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

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env()?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }
    config.validate()?;

    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration } => test_mic(duration).await,
            Command::TestSpeaker { duration } => test_speaker(duration).await,
            Command::Say { text } => say(&config, &text).await,
        };
    }

    tracing::info!(server = %config.server_url, "starting talkback");

    let recognizer = MicRecognizer::new(&config.voice)?;
    let chat = HttpChat::new(&config.server_url)?;
    let tts = HttpTts::new(&config.server_url)?;
    let sink = SpeakerSink::new()?;
    let surface = TerminalSurface;

    let mut controller = Controller::new(&config, recognizer, chat, tts, sink, surface);

    let (tx, mut rx) = mpsc::channel::<ControlMsg>(8);

    // Typed lines act like the chat box: they barge in on the bot
    let stdin_tx = tx.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            let msg = if line == "/stop" {
                ControlMsg::Stop
            } else {
                ControlMsg::Say(line)
            };
            let stop = matches!(msg, ControlMsg::Stop);
            if stdin_tx.send(msg).await.is_err() || stop {
                break;
            }
        }
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(ControlMsg::Stop).await;
        }
    });

    println!("Talkback ready - speak, type a message, or /stop to quit.");
    controller.run(&mut rx).await?;

    Ok(())
}

/// Send one message and speak the reply
#[allow(clippy::future_not_send)]
async fn say(config: &Config, text: &str) -> anyhow::Result<()> {
    let chat = HttpChat::new(&config.server_url)?;
    let tts = HttpTts::new(&config.server_url)?;
    let token = CancellationToken::new();

    println!("{USER_LABEL}: {text}");
    let reply = chat.send(text, &token).await?;
    println!("{BOT_LABEL}: {}", reply.reply);

    match tts.synthesize(&reply.reply, &token).await {
        Ok(audio) => {
            let mut sink = SpeakerSink::new()?;
            sink.play(&audio, &token).await?;
        }
        Err(e) => tracing::warn!(error = %e, "reply could not be spoken"),
    }

    Ok(())
}

/// Test microphone input with a level meter
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds - speak into your mic.\n");

    let mut capture = AudioCapture::new()?;
    capture.start()?;

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.drain();
        let energy = rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "#".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!("[{:2}s] RMS: {energy:.4} | Peak: {peak:.4} | [{meter}]", i + 1);
    }

    capture.stop();
    println!("\nIf the meter moved, your mic is working.");
    Ok(())
}

/// Test speaker output with a tone
#[allow(clippy::future_not_send)]
async fn test_speaker(duration: u64) -> anyhow::Result<()> {
    println!("Playing a {duration}s test tone...");

    let mut sink = SpeakerSink::new()?;
    sink.play_samples(tone(duration, PLAYBACK_SAMPLE_RATE), &CancellationToken::new())
        .await?;

    println!("If you heard a tone, your speaker is working.");
    Ok(())
}

/// 440Hz sine at the given rate
#[allow(clippy::cast_precision_loss)]
fn tone(duration_secs: u64, sample_rate: u32) -> Vec<f32> {
    (0..u64::from(sample_rate) * duration_secs)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            0.2 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
        })
        .collect()
}

/// RMS energy of a sample buffer
#[allow(clippy::cast_precision_loss)]
fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_declares_hardware_checks() {
        let cmd = Cli::command();
        cmd.clone().debug_assert();
        let subcommands: Vec<_> = cmd.get_subcommands().map(clap::Command::get_name).collect();
        assert!(subcommands.contains(&"test-mic"));
        assert!(subcommands.contains(&"test-speaker"));
        assert!(subcommands.contains(&"say"));
    }

    #[test]
    fn test_tone_shape() {
        let samples = tone(1, PLAYBACK_SAMPLE_RATE);
        assert_eq!(samples.len(), PLAYBACK_SAMPLE_RATE as usize);
        assert!(samples.iter().all(|s| s.abs() <= 0.2 + f32::EPSILON));
        assert!(rms(&samples) > 0.1);
    }
}
