//! Chat rendering surface
//!
//! The controller treats the surface as an opaque sink for messages; the
//! shipped implementation prints to the terminal.

/// Sender label for user messages
pub const USER_LABEL: &str = "You";

/// Sender label for bot messages
pub const BOT_LABEL: &str = "Assistant";

/// Who a rendered message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Message spoken or typed by the user
    User,
    /// Reply from the assistant
    Bot,
}

/// Opaque sink that renders conversation messages
pub trait ChatSurface {
    /// Append a message to the conversation view
    fn append(&mut self, sender: &str, text: &str, role: Role);
}

/// Renders the conversation to the terminal
#[derive(Debug, Default)]
pub struct TerminalSurface;

impl ChatSurface for TerminalSurface {
    fn append(&mut self, sender: &str, text: &str, role: Role) {
        match role {
            Role::User => tracing::info!(sender, text, "user message"),
            Role::Bot => tracing::info!(sender, text, "bot message"),
        }
        println!("{sender}: {text}");
    }
}
