//! Turn-taking controller
//!
//! Drives the session state machine on the event loop: listen for an
//! utterance, submit it, speak the reply, listen again. All phases run
//! sequentially on one task; "concurrency" is the interleaving of the
//! control channel with whatever the current phase awaits. A control
//! message always preempts the phase (barge-in and shutdown paths).

use std::time::Duration;

use tokio::sync::mpsc;

use crate::chat::ChatBackend;
use crate::lang::Lang;
use crate::session::{Session, Step, TurnEvent, TurnSettings};
use crate::surface::{BOT_LABEL, ChatSurface, Role, USER_LABEL};
use crate::tts::SpeechSynthesizer;
use crate::voice::{AudioSink, SpeechRecognizer};
use crate::{Config, Result};

/// Messages that preempt the current phase
#[derive(Debug)]
pub enum ControlMsg {
    /// Process this text as a new user turn, interrupting the bot
    Say(String),
    /// Deactivate the session from any state
    Stop,
}

/// Outcome of a `select!` between the control channel and a phase future
enum Raced<T> {
    Control(Option<ControlMsg>),
    Done(T),
}

/// Drives a conversation session over the recognizer, chat, TTS, playback,
/// and rendering seams
pub struct Controller<R, C, T, A, S> {
    session: Session,
    silence_timeout: Duration,
    restart_delay: Duration,
    recognizer: R,
    chat: C,
    tts: T,
    sink: A,
    surface: S,
}

impl<R, C, T, A, S> Controller<R, C, T, A, S>
where
    R: SpeechRecognizer,
    C: ChatBackend,
    T: SpeechSynthesizer,
    A: AudioSink,
    S: ChatSurface,
{
    /// Create a controller from configuration and its collaborators
    pub fn new(config: &Config, recognizer: R, chat: C, tts: T, sink: A, surface: S) -> Self {
        Self {
            session: Session::new(TurnSettings {
                primary_lang: config.primary_lang,
                fallback_lang: config.fallback_lang,
                max_listen_retries: config.max_listen_retries,
            }),
            silence_timeout: config.silence_timeout,
            restart_delay: config.restart_delay,
            recognizer,
            chat,
            tts,
            sink,
            surface,
        }
    }

    /// The session, for state inspection
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Run the conversation loop until the session deactivates
    ///
    /// # Errors
    ///
    /// Currently infallible; kept fallible for device-level failures
    pub async fn run(&mut self, control: &mut mpsc::Receiver<ControlMsg>) -> Result<()> {
        let mut step = self.session.apply(TurnEvent::Activate);
        tracing::info!("conversation session started");

        loop {
            step = match step {
                Step::Listen(lang) => self.listen(lang, control).await,
                Step::Submit(text) => self.process(&text, control).await,
                Step::Speak(reply) => self.speak(&reply, control).await,
                Step::RenderFailure(lang) => {
                    self.surface.append(BOT_LABEL, lang.failure_reply(), Role::Bot);
                    Step::Relisten
                }
                Step::Relisten => {
                    tokio::time::sleep(self.restart_delay).await;
                    Step::Listen(self.session.listen_lang())
                }
                Step::None => {
                    if self.session.is_active() {
                        Step::Relisten
                    } else {
                        Step::Shutdown
                    }
                }
                Step::Shutdown => break,
            };
        }

        self.session.apply(TurnEvent::Deactivate);
        tracing::info!("conversation session ended");
        Ok(())
    }

    /// Listening phase: run recognition in `lang` under the silence timer,
    /// racing the control channel
    async fn listen(&mut self, lang: Lang, control: &mut mpsc::Receiver<ControlMsg>) -> Step {
        // The guard holds at every restart call site, not just the first
        if !self.session.can_listen() {
            tracing::warn!(
                active = self.session.is_active(),
                speaking = self.session.is_speaking(),
                ready = self.session.is_ready(),
                "recognition start refused"
            );
            return if self.session.is_active() {
                Step::Relisten
            } else {
                Step::Shutdown
            };
        }

        self.session.recognition_started();
        tracing::debug!(locale = lang.locale_tag(), "listening");

        let raced = {
            let recognize = tokio::time::timeout(
                self.silence_timeout,
                self.recognizer.recognize(lang.locale_tag()),
            );
            tokio::select! {
                biased;
                msg = control.recv() => Raced::Control(msg),
                result = recognize => Raced::Done(result),
            }
        };
        self.session.recognition_ended();

        match raced {
            Raced::Control(Some(ControlMsg::Say(text))) => {
                self.recognizer.stop().await;
                self.accept_transcript(text)
            }
            Raced::Control(_) => {
                self.recognizer.stop().await;
                self.session.apply(TurnEvent::Deactivate)
            }
            Raced::Done(Err(_elapsed)) => {
                // Silence window expired with no utterance
                if self.session.silence_stop_allowed() {
                    self.recognizer.stop().await;
                }
                tracing::debug!(locale = lang.locale_tag(), "silence timeout");
                self.session.apply(TurnEvent::NoSpeech)
            }
            Raced::Done(Ok(Ok(Some(text)))) => self.accept_transcript(text),
            Raced::Done(Ok(Ok(None))) => {
                tracing::debug!(locale = lang.locale_tag(), "no transcript");
                self.session.apply(TurnEvent::NoSpeech)
            }
            Raced::Done(Ok(Err(e))) => {
                tracing::warn!(error = %e, "recognizer failed, treating as no result");
                self.session.apply(TurnEvent::NoSpeech)
            }
        }
    }

    /// Render a user utterance and hand it to the state machine
    fn accept_transcript(&mut self, text: String) -> Step {
        let step = self.session.apply(TurnEvent::Transcript(text.clone()));
        if matches!(step, Step::Submit(_)) {
            self.surface.append(USER_LABEL, &text, Role::User);
        }
        step
    }

    /// Processing phase: submit the transcript, racing the control channel
    async fn process(&mut self, text: &str, control: &mut mpsc::Receiver<ControlMsg>) -> Step {
        let token = self.session.begin_request();

        let raced = {
            let request = self.chat.send(text, &token);
            tokio::select! {
                biased;
                msg = control.recv() => Raced::Control(msg),
                result = request => Raced::Done(result),
            }
        };

        match raced {
            Raced::Control(Some(ControlMsg::Say(text))) => self.accept_transcript(text),
            Raced::Control(_) => self.session.apply(TurnEvent::Deactivate),
            Raced::Done(Ok(reply)) => {
                self.surface.append(BOT_LABEL, &reply.reply, Role::Bot);
                let lang = reply.language();
                self.session.apply(TurnEvent::ReplyReceived {
                    reply: reply.reply,
                    lang,
                })
            }
            Raced::Done(Err(e)) if e.is_cancelled() => {
                // Barge-in already took the turn; nothing to render
                self.session.apply(TurnEvent::ChatCancelled)
            }
            Raced::Done(Err(e)) => {
                tracing::error!(error = %e, "chat request failed");
                self.session.apply(TurnEvent::ChatFailed)
            }
        }
    }

    /// Speaking phase: synthesize and play the reply, racing the control
    /// channel; TTS failures abort speech silently
    async fn speak(&mut self, reply: &str, control: &mut mpsc::Receiver<ControlMsg>) -> Step {
        let Some(token) = self.session.pending_token() else {
            return self.session.apply(TurnEvent::PlaybackFinished);
        };

        let raced = {
            let synthesize = self.tts.synthesize(reply, &token);
            tokio::select! {
                biased;
                msg = control.recv() => Raced::Control(msg),
                result = synthesize => Raced::Done(result),
            }
        };

        let audio = match raced {
            Raced::Control(Some(ControlMsg::Say(text))) => return self.accept_transcript(text),
            Raced::Control(_) => return self.session.apply(TurnEvent::Deactivate),
            Raced::Done(Err(e)) => {
                if !e.is_cancelled() {
                    tracing::debug!(error = %e, "TTS unavailable, skipping speech");
                }
                return self.session.apply(TurnEvent::PlaybackFinished);
            }
            Raced::Done(Ok(audio)) => audio,
        };

        let raced = {
            let playback = self.sink.play(&audio, &token);
            tokio::select! {
                biased;
                msg = control.recv() => Raced::Control(msg),
                result = playback => Raced::Done(result),
            }
        };

        match raced {
            Raced::Control(Some(ControlMsg::Say(text))) => self.accept_transcript(text),
            Raced::Control(_) => self.session.apply(TurnEvent::Deactivate),
            Raced::Done(result) => {
                if let Err(e) = result {
                    if !e.is_cancelled() {
                        tracing::debug!(error = %e, "playback failed");
                    }
                }
                self.session.apply(TurnEvent::PlaybackFinished)
            }
        }
    }
}
