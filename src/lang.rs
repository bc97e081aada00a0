//! Language detection and locale handling
//!
//! The backend serves Bangla and English users; recognition is attempted in
//! Bangla first with an English fallback.

/// Languages the client can recognize and speak
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lang {
    /// Bangla (Bangladesh)
    #[default]
    Bn,
    /// English (US)
    En,
}

impl Lang {
    /// BCP 47 tag passed to the recognizer
    #[must_use]
    pub const fn locale_tag(self) -> &'static str {
        match self {
            Self::Bn => "bn-BD",
            Self::En => "en-US",
        }
    }

    /// Two-letter code used on the wire (`lang` field of chat replies)
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Bn => "bn",
            Self::En => "en",
        }
    }

    /// Parse a two-letter code from a chat reply
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "bn" => Some(Self::Bn),
            "en" => Some(Self::En),
            _ => None,
        }
    }

    /// Parse a BCP 47 tag (e.g. from configuration)
    #[must_use]
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::from_code(tag.split(['-', '_']).next().unwrap_or_default())
    }

    /// Fixed reply rendered when the chat backend fails
    #[must_use]
    pub const fn failure_reply(self) -> &'static str {
        match self {
            Self::Bn => "\u{098f}\u{0987} \u{09ae}\u{09c1}\u{09b9}\u{09c2}\u{09b0}\u{09cd}\u{09a4}\u{09c7} \u{0989}\u{09a4}\u{09cd}\u{09a4}\u{09b0} \u{09a6}\u{09bf}\u{09a4}\u{09c7} \u{09b8}\u{09ae}\u{09b8}\u{09cd}\u{09af}\u{09be} \u{09b9}\u{099a}\u{09cd}\u{099b}\u{09c7}\u{0964}",
            Self::En => "I'm having trouble answering right now.",
        }
    }
}

/// Detect the language of a message
///
/// Bangla if any character falls in the Bengali Unicode block, English
/// otherwise.
#[must_use]
pub fn detect(text: &str) -> Lang {
    if text.chars().any(|c| ('\u{0980}'..='\u{09FF}').contains(&c)) {
        Lang::Bn
    } else {
        Lang::En
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_bangla() {
        assert_eq!(detect("\u{0986}\u{09aa}\u{09a8}\u{09bf} \u{0995}\u{09c7}\u{09ae}\u{09a8} \u{0986}\u{099b}\u{09c7}\u{09a8}?"), Lang::Bn);
    }

    #[test]
    fn test_detect_english() {
        assert_eq!(detect("How are you?"), Lang::En);
        assert_eq!(detect(""), Lang::En);
    }

    #[test]
    fn test_detect_mixed_prefers_bangla() {
        assert_eq!(detect("price \u{099c}\u{09be}\u{09a8}\u{09a4}\u{09c7} \u{099a}\u{09be}\u{0987}"), Lang::Bn);
    }

    #[test]
    fn test_from_code() {
        assert_eq!(Lang::from_code("bn"), Some(Lang::Bn));
        assert_eq!(Lang::from_code(" en "), Some(Lang::En));
        assert_eq!(Lang::from_code("fr"), None);
    }

    #[test]
    fn test_from_tag() {
        assert_eq!(Lang::from_tag("bn-BD"), Some(Lang::Bn));
        assert_eq!(Lang::from_tag("en_US"), Some(Lang::En));
        assert_eq!(Lang::from_tag("de-DE"), None);
    }

    #[test]
    fn test_locale_roundtrip() {
        for lang in [Lang::Bn, Lang::En] {
            assert_eq!(Lang::from_tag(lang.locale_tag()), Some(lang));
            assert_eq!(Lang::from_code(lang.code()), Some(lang));
        }
    }
}
