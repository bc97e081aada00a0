//! Voice capture, endpointing, transcription, and playback
//!
//! Concrete implementations of the recognizer and audio-sink seams the
//! controller is generic over.

mod capture;
mod endpoint;
mod listen;
mod playback;

pub use capture::{AudioCapture, SAMPLE_RATE, encode_wav};
pub use endpoint::{Endpointer, EndpointProfile};
pub use listen::{MicRecognizer, SpeechRecognizer, Transcriber};
pub use playback::{AudioSink, PLAYBACK_SAMPLE_RATE, SpeakerSink, decode_mp3};
