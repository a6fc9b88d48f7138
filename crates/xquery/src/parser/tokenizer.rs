//! Lookahead scanner for the hand-written parser.
//!
//! Nothing here consumes input implicitly: every `la_*` method only inspects text starting
//! at a given position and returns a [`Token`] describing what matched. The parser commits a
//! match with [`Tokenizer::consume`]. Chained lookahead (`la_*_at(token.end, ..)`) gives the
//! multi-token disambiguation the grammar needs, e.g. `for $` versus a path step named `for`.

use crate::ast::AstKind;
use crate::error::{Error, ErrorCode};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub start: usize,
    pub end: usize,
    /// Matched text; for string literals the unescaped value.
    pub text: String,
}

pub fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

pub fn is_name_char(c: char) -> bool {
    is_name_start(c) || c.is_numeric() || c == '-' || c == '.' || c == '\u{B7}'
}

/// XML 1.0 `Char` production.
pub fn is_xml_char(c: char) -> bool {
    matches!(c, '\t' | '\n' | '\r' | '\u{20}'..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

#[derive(Debug, Clone)]
pub struct Tokenizer {
    input: Vec<char>,
    pos: usize,
}

impl Tokenizer {
    pub fn new(query: &str) -> Self {
        Self { input: query.chars().collect(), pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn reset_to(&mut self, pos: usize) {
        self.pos = pos.min(self.input.len());
    }

    pub fn consume(&mut self, token: &Token) {
        self.pos = token.end;
    }

    fn peek(&self, pos: usize) -> Option<char> {
        self.input.get(pos).copied()
    }

    /// End of the (nested) comment opening at `pos`, or `None` when it never closes.
    fn comment_end(&self, mut pos: usize) -> Option<usize> {
        let mut depth = 0usize;
        while pos < self.input.len() {
            match (self.peek(pos), self.peek(pos + 1)) {
                (Some('('), Some(':')) => {
                    depth += 1;
                    pos += 2;
                }
                (Some(':'), Some(')')) => {
                    depth -= 1;
                    pos += 2;
                    if depth == 0 {
                        return Some(pos);
                    }
                }
                _ => pos += 1,
            }
        }
        None
    }

    fn opens_comment(&self, pos: usize) -> bool {
        self.peek(pos) == Some('(') && self.peek(pos + 1) == Some(':')
    }

    /// Position of the next significant character at or after `pos`, skipping whitespace and
    /// (nested) comments. An unterminated comment is not skipped, so the parser stops on it.
    pub fn skip_ws_at(&self, mut pos: usize) -> usize {
        loop {
            while self.peek(pos).is_some_and(char::is_whitespace) {
                pos += 1;
            }
            if self.opens_comment(pos)
                && let Some(end) = self.comment_end(pos)
            {
                pos = end;
                continue;
            }
            return pos;
        }
    }

    pub fn skip_ws(&mut self) {
        self.pos = self.skip_ws_at(self.pos);
    }

    /// Next significant character without consuming anything.
    pub fn peek_skip_ws(&self) -> Option<char> {
        self.peek(self.skip_ws_at(self.pos))
    }

    pub fn is_eof(&self) -> bool {
        self.skip_ws_at(self.pos) >= self.input.len()
    }

    /// Match `s` literally at `pos`. A space in `s` matches exactly one whitespace character,
    /// which is how keywords that need a trailing delimiter are expressed. A keyword ending in
    /// a letter never matches the prefix of a longer name.
    pub fn la_at(&self, pos: usize, s: &str) -> Option<Token> {
        let mut p = pos;
        for expected in s.chars() {
            let c = self.peek(p)?;
            let ok = if expected == ' ' { c.is_whitespace() } else { c == expected };
            if !ok {
                return None;
            }
            p += 1;
        }
        if s.chars().last().is_some_and(char::is_alphabetic) && self.peek(p).is_some_and(is_name_char) {
            return None;
        }
        Some(Token { start: pos, end: p, text: s.trim_end().to_string() })
    }

    pub fn la_ws_at(&self, pos: usize, s: &str) -> Option<Token> {
        self.la_at(self.skip_ws_at(pos), s)
    }

    pub fn la(&self, s: &str) -> Option<Token> {
        self.la_at(self.pos, s)
    }

    pub fn la_skip_ws(&self, s: &str) -> Option<Token> {
        self.la_ws_at(self.pos, s)
    }

    /// Lookahead for `first` followed by `second` (both whitespace-skipping).
    pub fn la2(&self, first: &str, second: &str) -> Option<(Token, Token)> {
        let a = self.la_skip_ws(first)?;
        let b = self.la_ws_at(a.end, second)?;
        Some((a, b))
    }

    pub fn attempt(&mut self, s: &str) -> bool {
        match self.la(s) {
            Some(t) => {
                self.consume(&t);
                true
            }
            None => false,
        }
    }

    pub fn attempt_skip_ws(&mut self, s: &str) -> bool {
        match self.la_skip_ws(s) {
            Some(t) => {
                self.consume(&t);
                true
            }
            None => false,
        }
    }

    /// Consume `first second` when both are present.
    pub fn attempt2(&mut self, first: &str, second: &str) -> bool {
        match self.la2(first, second) {
            Some((_, b)) => {
                self.consume(&b);
                true
            }
            None => false,
        }
    }

    pub fn consume_skip_ws(&mut self, s: &str) -> Result<Token, Error> {
        let t = self.la_skip_ws(s).ok_or_else(|| self.expected(&[s.trim_end()]))?;
        self.consume(&t);
        Ok(t)
    }

    pub fn consume_eof(&mut self) -> Result<(), Error> {
        self.skip_ws();
        if self.pos < self.input.len() {
            return Err(self.expected(&["end of input"]));
        }
        Ok(())
    }

    /// Up to 20 characters of unparsed input, for error messages.
    pub fn paraphrase(&self) -> String {
        let start = self.skip_ws_at(self.pos);
        self.input[start.min(self.input.len())..].iter().take(20).collect()
    }

    pub fn expected(&self, alternatives: &[&str]) -> Error {
        if self.opens_comment(self.skip_ws_at(self.pos)) {
            return Error::parse(&[":)"], &self.paraphrase());
        }
        Error::parse(alternatives, &self.paraphrase())
    }

    pub fn ncname_at(&self, pos: usize) -> Option<Token> {
        let first = self.peek(pos)?;
        if !is_name_start(first) {
            return None;
        }
        let mut end = pos + 1;
        while self.peek(end).is_some_and(|c| is_name_char(c) && c != ':') {
            end += 1;
        }
        Some(Token { start: pos, end, text: self.input[pos..end].iter().collect() })
    }

    pub fn qname_at(&self, pos: usize) -> Option<Token> {
        let prefix = self.ncname_at(pos)?;
        if self.peek(prefix.end) == Some(':')
            && let Some(local) = self.ncname_at(prefix.end + 1)
        {
            return Some(Token { start: pos, end: local.end, text: format!("{}:{}", prefix.text, local.text) });
        }
        Some(prefix)
    }

    /// `Q{uri}local` or a lexical QName.
    pub fn eqname_at(&self, pos: usize) -> Option<Token> {
        if self.peek(pos) == Some('Q') && self.peek(pos + 1) == Some('{') {
            let mut end = pos + 2;
            while self.peek(end).is_some_and(|c| c != '}') {
                end += 1;
            }
            let local = self.ncname_at(end + 1)?;
            return Some(Token { start: pos, end: local.end, text: self.input[pos..local.end].iter().collect() });
        }
        self.qname_at(pos)
    }

    pub fn la_ncname_skip_ws(&self) -> Option<Token> {
        self.ncname_at(self.skip_ws_at(self.pos))
    }

    pub fn la_eqname_skip_ws(&self) -> Option<Token> {
        self.eqname_at(self.skip_ws_at(self.pos))
    }

    pub fn la_eqname_ws_at(&self, pos: usize) -> Option<Token> {
        self.eqname_at(self.skip_ws_at(pos))
    }

    /// Integer, decimal or double literal; the kind tells which.
    pub fn la_numeric_skip_ws(&self) -> Option<(AstKind, Token)> {
        let start = self.skip_ws_at(self.pos);
        let mut end = start;
        let mut kind = AstKind::Int;
        while self.peek(end).is_some_and(|c| c.is_ascii_digit()) {
            end += 1;
        }
        let int_digits = end - start;
        if self.peek(end) == Some('.') && self.peek(end + 1) != Some('.') {
            let mut frac = end + 1;
            while self.peek(frac).is_some_and(|c| c.is_ascii_digit()) {
                frac += 1;
            }
            if int_digits == 0 && frac == end + 1 {
                return None;
            }
            kind = AstKind::Dec;
            end = frac;
        } else if int_digits == 0 {
            return None;
        }
        if matches!(self.peek(end), Some('e' | 'E')) {
            let mut exp = end + 1;
            if matches!(self.peek(exp), Some('+' | '-')) {
                exp += 1;
            }
            let digits_start = exp;
            while self.peek(exp).is_some_and(|c| c.is_ascii_digit()) {
                exp += 1;
            }
            if exp > digits_start {
                kind = AstKind::Dbl;
                end = exp;
            }
        }
        Some((kind, Token { start, end, text: self.input[start..end].iter().collect() }))
    }

    /// Decode `&...;` at `pos` (predefined entity or character reference).
    fn reference_at(&self, pos: usize) -> Result<Option<(char, usize)>, Error> {
        if self.peek(pos) != Some('&') {
            return Ok(None);
        }
        let mut end = pos + 1;
        while self.peek(end).is_some_and(|c| c != ';') {
            end += 1;
        }
        if self.peek(end).is_none() {
            return Err(self.error_at(pos, "unterminated entity reference"));
        }
        let body: String = self.input[pos + 1..end].iter().collect();
        let c = match body.as_str() {
            "lt" => '<',
            "gt" => '>',
            "amp" => '&',
            "quot" => '"',
            "apos" => '\'',
            other => {
                let code = if let Some(hex) = other.strip_prefix("#x") {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = other.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                let c = code.and_then(char::from_u32).ok_or_else(|| self.error_at(pos, "invalid character reference"))?;
                if !is_xml_char(c) {
                    return Err(Error::from_code(
                        ErrorCode::XQST0090,
                        format!("Character reference &{body}; does not denote an XML character"),
                    ));
                }
                c
            }
        };
        Ok(Some((c, end + 1)))
    }

    fn error_at(&self, pos: usize, what: &str) -> Error {
        let fragment: String = self.input[pos.min(self.input.len())..].iter().take(20).collect();
        Error::parse(&[what], &fragment)
    }

    pub fn la_string_skip_ws(&self) -> Result<Option<Token>, Error> {
        let start = self.skip_ws_at(self.pos);
        let quote = match self.peek(start) {
            Some(q @ ('"' | '\'')) => q,
            _ => return Ok(None),
        };
        let mut text = String::new();
        let mut p = start + 1;
        loop {
            match self.peek(p) {
                None => return Err(self.error_at(start, "terminated string literal")),
                Some(c) if c == quote => {
                    if self.peek(p + 1) == Some(quote) {
                        text.push(quote);
                        p += 2;
                    } else {
                        return Ok(Some(Token { start, end: p + 1, text }));
                    }
                }
                Some('&') => {
                    let (c, next) = self.reference_at(p)?.ok_or_else(|| self.error_at(p, "entity reference"))?;
                    text.push(c);
                    p = next;
                }
                Some(c) => {
                    text.push(c);
                    p += 1;
                }
            }
        }
    }

    /// Character data of direct element content up to the next `<`, `{` or `}`. Doubled
    /// curly braces are escapes. Returns `None` when no character was read.
    pub fn la_elem_content(&self) -> Result<Option<Token>, Error> {
        self.scan_content(self.pos, None)
    }

    /// Attribute value content up to the closing `quote` or an enclosed expression.
    pub fn la_attr_content(&self, quote: char) -> Result<Option<Token>, Error> {
        self.scan_content(self.pos, Some(quote))
    }

    fn scan_content(&self, start: usize, quote: Option<char>) -> Result<Option<Token>, Error> {
        let mut text = String::new();
        let mut p = start;
        loop {
            match self.peek(p) {
                None => break,
                Some('{') if self.peek(p + 1) == Some('{') => {
                    text.push('{');
                    p += 2;
                }
                Some('}') if self.peek(p + 1) == Some('}') => {
                    text.push('}');
                    p += 2;
                }
                Some('{' | '}' | '<') => break,
                Some(c) if Some(c) == quote => {
                    if self.peek(p + 1) == quote {
                        text.push(c);
                        p += 2;
                    } else {
                        break;
                    }
                }
                Some('&') => {
                    let (c, next) = self.reference_at(p)?.ok_or_else(|| self.error_at(p, "entity reference"))?;
                    text.push(c);
                    p = next;
                }
                Some(c) => {
                    text.push(c);
                    p += 1;
                }
            }
        }
        Ok((p > start).then_some(Token { start, end: p, text }))
    }

    /// Raw text up to (not including) `terminator`, starting at the current position.
    pub fn la_until(&self, terminator: &str) -> Option<Token> {
        let mut p = self.pos;
        while p < self.input.len() {
            if self.la_at(p, terminator).is_some() {
                return Some(Token { start: self.pos, end: p, text: self.input[self.pos..p].iter().collect() });
            }
            p += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn keyword_does_not_match_name_prefix() {
        let t = Tokenizer::new("token");
        assert!(t.la_skip_ws("to").is_none());
        let t = Tokenizer::new("  to 3");
        assert_eq!(t.la_skip_ws("to").unwrap().end, 4);
    }

    #[test]
    fn trailing_space_requires_whitespace() {
        let t = Tokenizer::new("mod(2)");
        assert!(t.la_skip_ws("mod ").is_none());
        let t = Tokenizer::new("mod\n2");
        assert!(t.la_skip_ws("mod ").is_some());
    }

    #[test]
    fn comments_nest() {
        let t = Tokenizer::new("(: a (: b :) c :) return");
        assert!(t.la_skip_ws("return").is_some());
    }

    #[test]
    fn unterminated_comment_is_a_parse_error() {
        let mut t = Tokenizer::new("1 (: open (: nested :)");
        t.reset_to(1);
        assert_eq!(t.peek_skip_ws(), Some('('));
        let err = t.consume_eof().unwrap_err();
        assert_eq!(err.code, ErrorCode::XPST0003);
        assert_eq!(err.message, "Expected one of [':)']: '(: open (: nested :)'");
    }

    #[rstest]
    #[case("42", AstKind::Int, "42")]
    #[case("4.2", AstKind::Dec, "4.2")]
    #[case(".5", AstKind::Dec, ".5")]
    #[case("1e3", AstKind::Dbl, "1e3")]
    #[case("1.5E-2", AstKind::Dbl, "1.5E-2")]
    fn numeric_literals(#[case] input: &str, #[case] kind: AstKind, #[case] text: &str) {
        let t = Tokenizer::new(input);
        let (k, tok) = t.la_numeric_skip_ws().unwrap();
        assert_eq!(k, kind);
        assert_eq!(tok.text, text);
    }

    #[test]
    fn range_dots_are_not_decimals() {
        let t = Tokenizer::new("1..");
        let (k, tok) = t.la_numeric_skip_ws().unwrap();
        assert_eq!((k, tok.end), (AstKind::Int, 1));
    }

    #[test]
    fn string_escapes() {
        let t = Tokenizer::new(r#" "a""b&lt;&#65;" "#);
        assert_eq!(t.la_string_skip_ws().unwrap().unwrap().text, "a\"b<A");
        let t = Tokenizer::new("'open");
        assert!(t.la_string_skip_ws().is_err());
    }

    #[rstest]
    #[case("'&#0;'")]
    #[case("'&#x1;'")]
    #[case("'&#xFFFE;'")]
    fn references_to_non_xml_characters(#[case] input: &str) {
        let err = Tokenizer::new(input).la_string_skip_ws().unwrap_err();
        assert_eq!(err.code, ErrorCode::XQST0090);
    }

    #[test]
    fn tab_and_astral_references_are_characters() {
        let t = Tokenizer::new("'&#9;&#x1F600;'");
        assert_eq!(t.la_string_skip_ws().unwrap().unwrap().text, "\t\u{1F600}");
    }

    #[test]
    fn qualified_names() {
        let t = Tokenizer::new("fn:count(");
        assert_eq!(t.la_eqname_skip_ws().unwrap().text, "fn:count");
        let t = Tokenizer::new("Q{urn:x}local rest");
        assert_eq!(t.la_eqname_skip_ws().unwrap().text, "Q{urn:x}local");
        let t = Tokenizer::new("a :=");
        assert_eq!(t.la_eqname_skip_ws().unwrap().text, "a");
    }
}
