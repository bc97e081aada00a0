//! Conversation session and turn-taking state machine
//!
//! One explicit object owns every flag that arbitrates between listening,
//! speaking, and sending, so the turn-taking contract is testable without a
//! microphone or a network. Transitions are a single dispatch on
//! `(state, event)`; the driver in `controller` interprets the returned step.

use tokio_util::sync::CancellationToken;

use crate::lang::{self, Lang};

/// State of the conversation turn loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    /// No turn in progress
    #[default]
    Idle,
    /// Recognition running, waiting for an utterance
    Listening,
    /// Chat request in flight
    Processing,
    /// Bot reply being synthesized or played
    Speaking,
}

/// Which locale the current listen attempt uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum LocaleAttempt {
    #[default]
    Primary,
    Fallback,
}

/// Events fed into the state machine by the driver
#[derive(Debug)]
pub enum TurnEvent {
    /// Session switched on
    Activate,
    /// Session switched off; tears everything down
    Deactivate,
    /// Recognition produced a transcript (also the barge-in path:
    /// accepted in any active state and preempts the bot)
    Transcript(String),
    /// Recognition ended with no usable transcript (no-speech, recognizer
    /// error, or forced stop after the silence timeout)
    NoSpeech,
    /// Chat backend answered
    ReplyReceived {
        /// Reply text to render and speak
        reply: String,
        /// Language reported by the backend, if any
        lang: Option<Lang>,
    },
    /// Chat request failed for a reason other than cancellation
    ChatFailed,
    /// Chat request was cancelled by an interrupt; swallowed
    ChatCancelled,
    /// Playback finished, errored, or was skipped
    PlaybackFinished,
}

/// Next step the driver should take
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Start recognition in the given language
    Listen(Lang),
    /// Submit a transcript to the chat backend
    Submit(String),
    /// Synthesize and play a reply
    Speak(String),
    /// Render the fixed failure reply in the given language, then re-listen
    RenderFailure(Lang),
    /// Re-enter listening after the restart delay
    Relisten,
    /// Session is over
    Shutdown,
    /// Nothing to do; the driver re-listens if the session is still active
    None,
}

/// Settings the state machine needs from [`crate::Config`]
#[derive(Debug, Clone, Copy)]
pub struct TurnSettings {
    /// Language attempted first on every listen
    pub primary_lang: Lang,
    /// Language attempted when the primary yields nothing
    pub fallback_lang: Lang,
    /// Cap on consecutive empty listen attempts; `None` loops forever
    pub max_listen_retries: Option<u32>,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            primary_lang: Lang::Bn,
            fallback_lang: Lang::En,
            max_listen_retries: None,
        }
    }
}

/// A conversation session: the flags of the turn-taking contract plus
/// ownership of the single pending-request cancellation token
#[derive(Debug)]
pub struct Session {
    state: TurnState,
    active: bool,
    speaking: bool,
    ready: bool,
    primary: Lang,
    fallback: Lang,
    attempt: LocaleAttempt,
    empty_attempts: u32,
    max_listen_retries: Option<u32>,
    last_user_lang: Lang,
    pending: Option<CancellationToken>,
}

impl Session {
    /// Create a new inactive session
    #[must_use]
    pub fn new(settings: TurnSettings) -> Self {
        Self {
            state: TurnState::Idle,
            active: false,
            speaking: false,
            ready: true,
            primary: settings.primary_lang,
            fallback: settings.fallback_lang,
            attempt: LocaleAttempt::Primary,
            empty_attempts: 0,
            max_listen_retries: settings.max_listen_retries,
            last_user_lang: settings.primary_lang,
            pending: None,
        }
    }

    /// Current turn state
    #[must_use]
    pub const fn state(&self) -> TurnState {
        self.state
    }

    /// Whether the session is switched on
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the bot is currently speaking
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Whether the recognizer is idle and startable
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.ready
    }

    /// Guard checked at every recognition (re)start call site
    #[must_use]
    pub const fn can_listen(&self) -> bool {
        self.active && !self.speaking && self.ready
    }

    /// Guard for the silence timeout: only force a stop while the session
    /// is active and the bot is not speaking
    #[must_use]
    pub const fn silence_stop_allowed(&self) -> bool {
        self.active && !self.speaking
    }

    /// Language for the next listen attempt
    #[must_use]
    pub const fn listen_lang(&self) -> Lang {
        match self.attempt {
            LocaleAttempt::Primary => self.primary,
            LocaleAttempt::Fallback => self.fallback,
        }
    }

    /// Mark recognition as running; clears the ready flag
    pub const fn recognition_started(&mut self) {
        self.ready = false;
    }

    /// Mark recognition as ended; the recognizer is startable again
    pub const fn recognition_ended(&mut self) {
        self.ready = true;
    }

    /// Replace the pending-request token, cancelling any prior one
    pub fn begin_request(&mut self) -> CancellationToken {
        self.cancel_pending();
        let token = CancellationToken::new();
        self.pending = Some(token.clone());
        token
    }

    /// Clone of the current pending-request token, if one is live
    #[must_use]
    pub fn pending_token(&self) -> Option<CancellationToken> {
        self.pending.clone()
    }

    /// Hard interrupt: cancel the in-flight request exactly once and drop
    /// the speaking state so a new utterance can preempt the bot
    pub fn interrupt(&mut self) {
        self.cancel_pending();
        self.speaking = false;
    }

    fn cancel_pending(&mut self) {
        if let Some(token) = self.pending.take() {
            token.cancel();
        }
    }

    /// Reset every flag to the idle baseline and clear the pending token
    fn reset(&mut self) {
        self.cancel_pending();
        self.state = TurnState::Idle;
        self.active = false;
        self.speaking = false;
        self.ready = true;
        self.attempt = LocaleAttempt::Primary;
        self.empty_attempts = 0;
    }

    /// Apply an event and return the next step for the driver
    #[allow(clippy::too_many_lines)]
    pub fn apply(&mut self, event: TurnEvent) -> Step {
        match (self.state, event) {
            (_, TurnEvent::Deactivate) => {
                self.reset();
                Step::Shutdown
            }

            (TurnState::Idle, TurnEvent::Activate) => {
                self.active = true;
                self.state = TurnState::Listening;
                self.attempt = LocaleAttempt::Primary;
                self.empty_attempts = 0;
                Step::Listen(self.listen_lang())
            }

            // A transcript always starts a new turn, preempting whatever the
            // bot was doing (barge-in): cancel the pending request, stop
            // speaking, then submit.
            (_, TurnEvent::Transcript(text)) if self.active => {
                if text.trim().is_empty() {
                    // Nothing to submit, but the interrupt still stops the bot
                    self.interrupt();
                    self.state = TurnState::Listening;
                    return self.apply(TurnEvent::NoSpeech);
                }
                self.interrupt();
                self.attempt = LocaleAttempt::Primary;
                self.empty_attempts = 0;
                self.last_user_lang = lang::detect(&text);
                self.state = TurnState::Processing;
                Step::Submit(text)
            }

            (TurnState::Listening, TurnEvent::NoSpeech) => {
                if !self.active {
                    return Step::Shutdown;
                }
                match self.attempt {
                    LocaleAttempt::Primary if self.primary != self.fallback => {
                        self.attempt = LocaleAttempt::Fallback;
                        Step::Listen(self.fallback)
                    }
                    _ => {
                        self.attempt = LocaleAttempt::Primary;
                        self.empty_attempts += 1;
                        if self
                            .max_listen_retries
                            .is_some_and(|cap| self.empty_attempts > cap)
                        {
                            tracing::warn!(
                                attempts = self.empty_attempts,
                                "listen retry cap reached, ending session"
                            );
                            self.reset();
                            Step::Shutdown
                        } else {
                            Step::Relisten
                        }
                    }
                }
            }

            (TurnState::Processing, TurnEvent::ReplyReceived { reply, lang }) => {
                // Last-detected language becomes the next primary attempt
                if let Some(lang) = lang {
                    self.primary = lang;
                }
                self.speaking = true;
                self.state = TurnState::Speaking;
                Step::Speak(reply)
            }

            (TurnState::Processing, TurnEvent::ChatFailed) => {
                // The request is over; drop the token without cancelling
                self.pending = None;
                self.state = TurnState::Listening;
                Step::RenderFailure(self.last_user_lang)
            }

            (TurnState::Processing, TurnEvent::ChatCancelled) => {
                // Expected outcome of barge-in; nothing to render or speak
                Step::None
            }

            (TurnState::Speaking, TurnEvent::PlaybackFinished) => {
                // The turn's request is over; teardown must not cancel it
                self.pending = None;
                self.speaking = false;
                if self.active {
                    self.state = TurnState::Listening;
                    Step::Relisten
                } else {
                    self.state = TurnState::Idle;
                    Step::Shutdown
                }
            }

            (state, event) => {
                tracing::debug!(?state, ?event, "event ignored in current state");
                Step::None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_session() -> Session {
        let mut session = Session::new(TurnSettings::default());
        assert_eq!(
            session.apply(TurnEvent::Activate),
            Step::Listen(Lang::Bn)
        );
        session
    }

    #[test]
    fn test_activation_starts_listening_in_primary() {
        let session = active_session();
        assert_eq!(session.state(), TurnState::Listening);
        assert!(session.is_active());
        assert!(session.can_listen());
        assert_eq!(session.listen_lang(), Lang::Bn);
    }

    #[test]
    fn test_listen_guard_refuses_while_speaking_or_inactive() {
        let mut session = Session::new(TurnSettings::default());
        assert!(!session.can_listen(), "inactive session must not listen");

        session.apply(TurnEvent::Activate);
        session.apply(TurnEvent::Transcript("hello".to_string()));
        session.apply(TurnEvent::ReplyReceived {
            reply: "hi".to_string(),
            lang: None,
        });
        assert!(session.is_speaking());
        assert!(!session.can_listen(), "must not listen while speaking");

        session.apply(TurnEvent::PlaybackFinished);
        assert!(session.can_listen());
    }

    #[test]
    fn test_listen_guard_refuses_while_recognizer_busy() {
        let mut session = active_session();
        session.recognition_started();
        assert!(!session.can_listen());
        session.recognition_ended();
        assert!(session.can_listen());
    }

    #[test]
    fn test_transcript_cancels_pending_request_exactly_once() {
        let mut session = active_session();
        session.apply(TurnEvent::Transcript("first".to_string()));
        let old = session.begin_request();
        assert!(!old.is_cancelled());

        // Barge-in with a new transcript
        let step = session.apply(TurnEvent::Transcript("second".to_string()));
        assert_eq!(step, Step::Submit("second".to_string()));
        assert!(old.is_cancelled());
        assert!(session.pending_token().is_none());

        // A fresh request gets a fresh token
        let fresh = session.begin_request();
        assert!(!fresh.is_cancelled());
    }

    #[test]
    fn test_no_speech_falls_back_then_relistens() {
        let mut session = active_session();
        assert_eq!(session.apply(TurnEvent::NoSpeech), Step::Listen(Lang::En));
        assert_eq!(session.listen_lang(), Lang::En);

        // Fallback also empty: loop back to primary
        assert_eq!(session.apply(TurnEvent::NoSpeech), Step::Relisten);
        assert_eq!(session.listen_lang(), Lang::Bn);
        assert!(session.is_active());
    }

    #[test]
    fn test_retry_cap_ends_session() {
        let mut session = Session::new(TurnSettings {
            max_listen_retries: Some(1),
            ..TurnSettings::default()
        });
        session.apply(TurnEvent::Activate);

        // First full primary+fallback miss
        session.apply(TurnEvent::NoSpeech);
        assert_eq!(session.apply(TurnEvent::NoSpeech), Step::Relisten);

        // Second miss exceeds the cap
        session.apply(TurnEvent::NoSpeech);
        assert_eq!(session.apply(TurnEvent::NoSpeech), Step::Shutdown);
        assert!(!session.is_active());
    }

    #[test]
    fn test_successful_turn_passes_through_speaking() {
        let mut session = active_session();
        assert_eq!(
            session.apply(TurnEvent::Transcript("Hello".to_string())),
            Step::Submit("Hello".to_string())
        );
        assert_eq!(session.state(), TurnState::Processing);

        let step = session.apply(TurnEvent::ReplyReceived {
            reply: "Hi there".to_string(),
            lang: Some(Lang::En),
        });
        assert_eq!(step, Step::Speak("Hi there".to_string()));
        assert_eq!(session.state(), TurnState::Speaking);
        assert!(session.is_speaking());

        assert_eq!(session.apply(TurnEvent::PlaybackFinished), Step::Relisten);
        assert_eq!(session.state(), TurnState::Listening);
        assert!(!session.is_speaking());
    }

    #[test]
    fn test_reply_language_becomes_next_primary() {
        let mut session = active_session();
        session.apply(TurnEvent::Transcript("Hello".to_string()));
        session.apply(TurnEvent::ReplyReceived {
            reply: "Hi there".to_string(),
            lang: Some(Lang::En),
        });
        session.apply(TurnEvent::PlaybackFinished);
        assert_eq!(session.listen_lang(), Lang::En);
    }

    #[test]
    fn test_chat_failure_renders_fixed_reply_in_user_language() {
        let mut session = active_session();
        session.apply(TurnEvent::Transcript(
            "\u{0986}\u{09aa}\u{09a8}\u{09bf} \u{0995}\u{09c7}?".to_string(),
        ));
        assert_eq!(
            session.apply(TurnEvent::ChatFailed),
            Step::RenderFailure(Lang::Bn)
        );
        assert_eq!(session.state(), TurnState::Listening);
    }

    #[test]
    fn test_chat_cancellation_is_swallowed() {
        let mut session = active_session();
        session.apply(TurnEvent::Transcript("hello".to_string()));
        assert_eq!(session.apply(TurnEvent::ChatCancelled), Step::None);
    }

    #[test]
    fn test_deactivate_resets_flags_from_any_state() {
        for advance in 0..4 {
            let mut session = active_session();
            if advance >= 1 {
                session.apply(TurnEvent::Transcript("hello".to_string()));
            }
            if advance >= 2 {
                session.begin_request();
            }
            if advance >= 3 {
                session.apply(TurnEvent::ReplyReceived {
                    reply: "hi".to_string(),
                    lang: None,
                });
            }

            let token = session.pending_token();
            assert_eq!(session.apply(TurnEvent::Deactivate), Step::Shutdown);
            assert_eq!(session.state(), TurnState::Idle);
            assert!(!session.is_active());
            assert!(!session.is_speaking());
            assert!(session.is_ready());
            assert!(session.pending_token().is_none());
            if let Some(token) = token {
                assert!(token.is_cancelled());
            }
        }
    }

    #[test]
    fn test_completed_turn_releases_request_token() {
        let mut session = active_session();
        session.apply(TurnEvent::Transcript("hello".to_string()));
        let token = session.begin_request();
        session.apply(TurnEvent::ReplyReceived {
            reply: "hi".to_string(),
            lang: None,
        });
        session.apply(TurnEvent::PlaybackFinished);
        assert!(session.pending_token().is_none());

        // Teardown after a finished turn must not cancel the old request
        session.apply(TurnEvent::Deactivate);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_failed_request_token_is_released() {
        let mut session = active_session();
        session.apply(TurnEvent::Transcript("hello".to_string()));
        let token = session.begin_request();
        session.apply(TurnEvent::ChatFailed);
        assert!(session.pending_token().is_none());

        session.apply(TurnEvent::Deactivate);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_empty_transcript_while_speaking_stops_the_bot() {
        let mut session = active_session();
        session.apply(TurnEvent::Transcript("hello".to_string()));
        session.apply(TurnEvent::ReplyReceived {
            reply: "hi".to_string(),
            lang: None,
        });
        assert!(session.is_speaking());

        let step = session.apply(TurnEvent::Transcript("   ".to_string()));
        assert!(!session.is_speaking());
        assert!(session.can_listen());
        assert_eq!(step, Step::Listen(Lang::En));
    }

    #[test]
    fn test_empty_transcript_treated_as_no_speech() {
        let mut session = active_session();
        assert_eq!(
            session.apply(TurnEvent::Transcript("   ".to_string())),
            Step::Listen(Lang::En)
        );
        assert_eq!(session.state(), TurnState::Listening);
    }

    #[test]
    fn test_same_primary_and_fallback_skips_fallback_attempt() {
        let mut session = Session::new(TurnSettings {
            primary_lang: Lang::En,
            fallback_lang: Lang::En,
            max_listen_retries: None,
        });
        session.apply(TurnEvent::Activate);
        assert_eq!(session.apply(TurnEvent::NoSpeech), Step::Relisten);
    }
}
