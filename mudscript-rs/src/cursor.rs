//! Forward-only character cursor shared by every tokenizer.
//!
//! The cursor never rewinds: once a character has been consumed it stays
//! consumed.  Higher-level readers are built from these primitives only.

/// A forward-only view into one line of source text.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// The next character without consuming it.
    pub fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    /// The character after the next one.
    pub fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    /// Consume and return one character.
    pub fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    /// Consume characters while `pred` holds and return the consumed slice.
    pub fn consume_while(&mut self, mut pred: impl FnMut(char) -> bool) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            self.pos += c.len_utf8();
        }
        &self.src[start..self.pos]
    }

    /// Consume `expected` if it is the next character.
    pub fn consume_expecting(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.pos += expected.len_utf8();
            true
        } else {
            false
        }
    }

    /// Consume `prefix` if the remaining text starts with it (ASCII case-insensitive).
    pub fn consume_prefix(&mut self, prefix: &str) -> bool {
        let rest = self.rest();
        if rest.len() >= prefix.len()
            && rest.is_char_boundary(prefix.len())
            && rest[..prefix.len()].eq_ignore_ascii_case(prefix)
        {
            self.pos += prefix.len();
            true
        } else {
            false
        }
    }

    pub fn consume_spaces(&mut self) {
        self.consume_while(char::is_whitespace);
    }

    /// Skip leading whitespace, then consume up to the next whitespace.
    pub fn parse_word(&mut self) -> &'a str {
        self.consume_spaces();
        self.consume_while(|c| !c.is_whitespace())
    }

    /// Consume everything that is left.
    pub fn parse_to_end(&mut self) -> &'a str {
        let rest = self.rest();
        self.pos = self.src.len();
        rest
    }

    /// The unconsumed remainder.
    pub fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.src.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_word_skips_leading_space() {
        let mut c = Cursor::new("   echo hello world");
        assert_eq!(c.parse_word(), "echo");
        assert_eq!(c.rest(), " hello world");
        assert_eq!(c.parse_word(), "hello");
    }

    #[test]
    fn consume_while_stops_at_predicate() {
        let mut c = Cursor::new("if_12 then");
        assert!(c.consume_prefix("if_"));
        assert_eq!(c.consume_while(|ch| ch.is_ascii_digit()), "12");
        assert_eq!(c.peek(), Some(' '));
    }

    #[test]
    fn consume_expecting_only_matching_char() {
        let mut c = Cursor::new("{x");
        assert!(!c.consume_expecting('}'));
        assert!(c.consume_expecting('{'));
        assert_eq!(c.rest(), "x");
    }

    #[test]
    fn consume_prefix_is_case_insensitive() {
        let mut c = Cursor::new("IF(1==1)");
        assert!(c.consume_prefix("if"));
        assert_eq!(c.peek(), Some('('));
    }

    #[test]
    fn parse_to_end_empties_cursor() {
        let mut c = Cursor::new("abc def");
        c.parse_word();
        assert_eq!(c.parse_to_end(), " def");
        assert!(c.is_empty());
        assert_eq!(c.peek(), None);
        assert_eq!(c.parse_word(), "");
    }

    #[test]
    fn multibyte_characters_advance_by_char() {
        let mut c = Cursor::new("héllo wörld");
        assert_eq!(c.bump(), Some('h'));
        assert_eq!(c.bump(), Some('é'));
        assert_eq!(c.parse_word(), "llo");
        assert_eq!(c.parse_word(), "wörld");
    }
}
