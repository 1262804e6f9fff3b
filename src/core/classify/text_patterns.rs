// Text-pattern scans shared by the biolink module and the classifier-driven
// lock tags.

use regex::Regex;

/// Scans text for links, handles and the script-based lock categories.
///
/// The same link scan is applied to message text and, for the biolink
/// module, to the user's profile biography.
pub struct TextPatternClassifier {
    link_re: Regex,
    bot_link_re: Regex,
}

impl TextPatternClassifier {
    pub fn new() -> Self {
        Self {
            // http(s), bare www, platform deep links, or an @handle of at
            // least 5 word characters.
            link_re: Regex::new(r"(?i)(https?://|www\.|t\.me/|telegram\.me/|@\w{5,})")
                .expect("link pattern is valid"),
            bot_link_re: Regex::new(r"(?i)t\.me/\w*bot\b").expect("bot link pattern is valid"),
        }
    }

    pub fn has_link(&self, text: &str) -> bool {
        self.link_re.is_match(text)
    }

    pub fn has_bot_link(&self, text: &str) -> bool {
        self.bot_link_re.is_match(text)
    }

    /// Whitespace-delimited token count for the long-message check.
    pub fn token_count(text: &str) -> usize {
        text.split_whitespace().count()
    }

    pub fn exceeds_limit(text: &str, limit: u32) -> bool {
        Self::token_count(text) > limit as usize
    }
}

impl Default for TextPatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// SCRIPT PREDICATES
// ============================================================================

fn is_rtl_char(c: char) -> bool {
    matches!(c,
        '\u{0590}'..='\u{05FF}'   // Hebrew
        | '\u{0600}'..='\u{06FF}' // Arabic
        | '\u{0750}'..='\u{077F}'
        | '\u{08A0}'..='\u{08FF}')
}

fn is_cjk_char(c: char) -> bool {
    matches!(c,
        '\u{4E00}'..='\u{9FFF}'   // CJK unified
        | '\u{3040}'..='\u{30FF}' // kana
        | '\u{AC00}'..='\u{D7AF}') // hangul
}

fn is_cyrillic_char(c: char) -> bool {
    matches!(c, '\u{0400}'..='\u{04FF}')
}

fn is_combining_mark(c: char) -> bool {
    matches!(c,
        '\u{0300}'..='\u{036F}'
        | '\u{1AB0}'..='\u{1AFF}'
        | '\u{1DC0}'..='\u{1DFF}'
        | '\u{20D0}'..='\u{20FF}')
}

fn is_emoji_char(c: char) -> bool {
    matches!(c,
        '\u{1F000}'..='\u{1FAFF}' // pictographs, transport, supplemental
        | '\u{2600}'..='\u{27BF}' // misc symbols, dingbats
        | '\u{2B00}'..='\u{2BFF}'
        | '\u{FE0F}'              // variation selector
        | '\u{200D}')             // zero-width joiner
}

pub fn has_rtl(text: &str) -> bool {
    text.chars().any(is_rtl_char)
}

pub fn has_cjk(text: &str) -> bool {
    text.chars().any(is_cjk_char)
}

pub fn has_cyrillic(text: &str) -> bool {
    text.chars().any(is_cyrillic_char)
}

pub fn has_emoji(text: &str) -> bool {
    text.chars().any(is_emoji_char)
}

/// Glitched text: a quarter or more of the characters are stacked combining
/// marks, with at least three marks overall.
pub fn is_zalgo(text: &str) -> bool {
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let marks = text.chars().filter(|c| is_combining_mark(*c)).count();
    marks >= 3 && marks * 4 >= total
}

/// True when the message consists of emoji (and whitespace) only.
pub fn is_emoji_only(text: &str) -> bool {
    let mut saw_emoji = false;
    for c in text.chars() {
        if c.is_whitespace() {
            continue;
        }
        if is_emoji_char(c) {
            saw_emoji = true;
        } else {
            return false;
        }
    }
    saw_emoji
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_scan_catches_every_supported_shape() {
        let c = TextPatternClassifier::new();
        assert!(c.has_link("see http://x.com now"));
        assert!(c.has_link("HTTPS://EXAMPLE.ORG"));
        assert!(c.has_link("www.example.com"));
        assert!(c.has_link("join t.me/somegroup"));
        assert!(c.has_link("telegram.me/whatever"));
        assert!(c.has_link("dm @longhandle please"));
        // Handles shorter than five characters are not flagged.
        assert!(!c.has_link("hi @abcd"));
        assert!(!c.has_link("plain text, no links"));
    }

    #[test]
    fn bot_links_are_a_separate_category() {
        let c = TextPatternClassifier::new();
        assert!(c.has_bot_link("try t.me/SpamBot"));
        assert!(!c.has_bot_link("try t.me/somegroup"));
    }

    #[test]
    fn token_count_is_whitespace_delimited() {
        assert_eq!(TextPatternClassifier::token_count("one two  three\nfour"), 4);
        assert_eq!(TextPatternClassifier::token_count(""), 0);
        assert!(TextPatternClassifier::exceeds_limit("a b c", 2));
        assert!(!TextPatternClassifier::exceeds_limit("a b c", 3));
    }

    #[test]
    fn script_predicates() {
        assert!(has_cjk("日本語です"));
        assert!(has_cyrillic("привет"));
        assert!(has_rtl("שלום"));
        assert!(!has_cjk("hello"));
        assert!(!has_cyrillic("hello"));
    }

    #[test]
    fn zalgo_needs_stacked_marks() {
        assert!(is_zalgo("h\u{0300}\u{0301}\u{0302}e\u{0303}\u{0304}"));
        // A single accent is ordinary text.
        assert!(!is_zalgo("café résumé"));
        assert!(!is_zalgo(""));
    }

    #[test]
    fn emoji_only_ignores_whitespace() {
        assert!(is_emoji_only("😀 😀"));
        assert!(is_emoji_only("🔥"));
        assert!(!is_emoji_only("nice 😀"));
        assert!(!is_emoji_only("   "));
    }
}
