//! Talkback - hands-free voice chat client
//!
//! Wires microphone capture, speech-to-text, a backend chat endpoint, and
//! spoken playback of replies into a turn-taking loop:
//!
//! ```text
//! ┌────────────┐  utterance  ┌────────────┐  reply  ┌────────────┐
//! │ Listening  ├────────────▶│ Processing ├────────▶│  Speaking  │
//! └─────▲──────┘             └────────────┘         └─────┬──────┘
//!       │                                                 │
//!       └────────────── playback finished ────────────────┘
//! ```
//!
//! The [`session`] state machine arbitrates between listening, speaking,
//! and sending; at most one recognition, one playback, and one chat
//! request are ever live, and a new user utterance preempts the bot
//! (barge-in) by cancelling both. The [`controller`] drives the machine
//! over swappable recognizer/chat/TTS/playback seams.

pub mod chat;
pub mod config;
pub mod controller;
pub mod error;
pub mod lang;
pub mod session;
pub mod surface;
pub mod tts;
pub mod voice;

pub use chat::{ChatBackend, ChatReply, HttpChat};
pub use config::{Config, VoiceConfig};
pub use controller::{ControlMsg, Controller};
pub use error::{Error, Result};
pub use lang::Lang;
pub use session::{Session, Step, TurnEvent, TurnSettings, TurnState};
pub use surface::{ChatSurface, Role, TerminalSurface};
pub use tts::{HttpTts, SpeechSynthesizer};
pub use voice::{AudioSink, MicRecognizer, SpeakerSink, SpeechRecognizer};
