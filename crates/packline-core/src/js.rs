//! Lightweight JavaScript lexer.
//!
//! The pipeline never builds a syntax tree. Import discovery, module
//! lowering, constant injection and minification all work on the two views
//! produced here:
//!
//! - [`segments`] splits source into code, string, template, comment and
//!   regex spans. Template interpolations (`${...}`) are lexed as code.
//! - [`tokenize`] turns the non-comment spans into a flat token list.
//!
//! All offsets are byte offsets into the original source. Only ASCII bytes
//! are significant, so offsets always fall on UTF-8 boundaries.

/// Kind of a lexical span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    /// Quoted string literal including its quotes.
    Str,
    /// Template literal text: from the opening backtick or closing `}` up to
    /// and including the closing backtick or `${`.
    Template,
    Comment,
    Regex,
}

/// A lexical span of source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub start: usize,
    pub end: usize,
}

impl Segment {
    #[must_use]
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// Whether `b` can appear inside an identifier or number.
#[must_use]
pub fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Keywords after which a `/` starts a regex literal.
const REGEX_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "instanceof",
    "in",
    "of",
    "new",
    "delete",
    "void",
    "throw",
    "case",
    "do",
    "else",
    "yield",
    "await",
];

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    out: Vec<Segment>,
    code_start: usize,
    /// Position of the last significant byte (code byte or literal end).
    last_sig: Option<usize>,
    /// Brace depth, and the depths at which template interpolations opened.
    depth: usize,
    templates: Vec<usize>,
}

/// Split `source` into lexical spans covering it completely, in order.
#[must_use]
pub fn segments(source: &str) -> Vec<Segment> {
    let mut lx = Lexer {
        src: source,
        bytes: source.as_bytes(),
        out: Vec::new(),
        code_start: 0,
        last_sig: None,
        depth: 0,
        templates: Vec::new(),
    };
    lx.run();
    lx.out
}

impl Lexer<'_> {
    fn run(&mut self) {
        let len = self.bytes.len();
        let mut i = 0;
        while i < len {
            let c = self.bytes[i];
            let next = self.bytes.get(i + 1).copied();
            match c {
                b'/' if next == Some(b'/') => {
                    let end = self.find(i, b'\n').unwrap_or(len);
                    self.push(i, end, SegmentKind::Comment);
                    i = end;
                }
                b'/' if next == Some(b'*') => {
                    let end = self.src[i + 2..].find("*/").map_or(len, |p| i + 2 + p + 2);
                    self.push(i, end, SegmentKind::Comment);
                    i = end;
                }
                b'/' if self.regex_allowed() => match self.scan_regex(i) {
                    Some(end) => {
                        self.push(i, end, SegmentKind::Regex);
                        self.last_sig = Some(end - 1);
                        i = end;
                    }
                    None => {
                        self.last_sig = Some(i);
                        i += 1;
                    }
                },
                b'"' | b'\'' => {
                    let end = self.scan_string(i, c);
                    self.push(i, end, SegmentKind::Str);
                    self.last_sig = Some(end - 1);
                    i = end;
                }
                b'`' => {
                    i = self.template_part(i);
                }
                b'{' => {
                    self.depth += 1;
                    self.last_sig = Some(i);
                    i += 1;
                }
                b'}' if self.templates.last() == Some(&self.depth.saturating_sub(1))
                    && self.depth > 0 =>
                {
                    self.templates.pop();
                    self.depth -= 1;
                    i = self.template_part(i);
                }
                b'}' => {
                    self.depth = self.depth.saturating_sub(1);
                    self.last_sig = Some(i);
                    i += 1;
                }
                c if c.is_ascii_whitespace() => i += 1,
                _ => {
                    self.last_sig = Some(i);
                    i += 1;
                }
            }
        }
        self.flush(len);
    }

    fn find(&self, from: usize, byte: u8) -> Option<usize> {
        self.bytes[from..]
            .iter()
            .position(|&b| b == byte)
            .map(|p| from + p)
    }

    fn flush(&mut self, upto: usize) {
        if upto > self.code_start {
            self.out.push(Segment {
                kind: SegmentKind::Code,
                start: self.code_start,
                end: upto,
            });
        }
    }

    fn push(&mut self, start: usize, end: usize, kind: SegmentKind) {
        self.flush(start);
        self.out.push(Segment { kind, start, end });
        self.code_start = end;
    }

    /// Scan template text starting at a backtick or an interpolation's
    /// closing brace. Returns the position after the span.
    fn template_part(&mut self, start: usize) -> usize {
        let len = self.bytes.len();
        let mut j = start + 1;
        while j < len {
            match self.bytes[j] {
                b'\\' => j += 2,
                b'`' => {
                    let end = j + 1;
                    self.push(start, end, SegmentKind::Template);
                    self.last_sig = Some(j);
                    return end;
                }
                b'$' if self.bytes.get(j + 1) == Some(&b'{') => {
                    let end = j + 2;
                    self.push(start, end, SegmentKind::Template);
                    self.templates.push(self.depth);
                    self.depth += 1;
                    self.last_sig = Some(j + 1);
                    return end;
                }
                _ => j += 1,
            }
        }
        self.push(start, len, SegmentKind::Template);
        len
    }

    fn scan_string(&self, start: usize, quote: u8) -> usize {
        let len = self.bytes.len();
        let mut j = start + 1;
        while j < len {
            match self.bytes[j] {
                b'\\' => j += 2,
                b'\n' => return j,
                b if b == quote => return j + 1,
                _ => j += 1,
            }
        }
        len
    }

    fn scan_regex(&self, start: usize) -> Option<usize> {
        let len = self.bytes.len();
        let mut j = start + 1;
        let mut in_class = false;
        while j < len {
            match self.bytes[j] {
                b'\\' => j += 2,
                b'\n' => return None,
                b'[' => {
                    in_class = true;
                    j += 1;
                }
                b']' => {
                    in_class = false;
                    j += 1;
                }
                b'/' if !in_class => {
                    j += 1;
                    while j < len && self.bytes[j].is_ascii_alphabetic() {
                        j += 1;
                    }
                    return Some(j);
                }
                _ => j += 1,
            }
        }
        None
    }

    fn regex_allowed(&self) -> bool {
        let Some(pos) = self.last_sig else {
            return true;
        };
        let prev = self.bytes[pos];
        if is_ident_byte(prev) {
            let mut start = pos;
            while start > 0 && is_ident_byte(self.bytes[start - 1]) {
                start -= 1;
            }
            return REGEX_KEYWORDS.contains(&&self.src[start..=pos]);
        }
        !matches!(prev, b')' | b']' | b'"' | b'\'' | b'`')
    }
}

/// Kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier, keyword or number.
    Word,
    /// Single punctuation byte.
    Punct,
    Str,
    Template,
    Regex,
}

/// A token of source with its byte span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

impl Token {
    #[must_use]
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    #[must_use]
    pub fn is_word(&self, source: &str, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text(source) == word
    }

    #[must_use]
    pub fn is_punct(&self, source: &str, punct: u8) -> bool {
        self.kind == TokenKind::Punct && source.as_bytes()[self.start] == punct
    }

    /// String or backtick template without interpolation.
    #[must_use]
    pub fn is_string_literal(&self, source: &str) -> bool {
        match self.kind {
            TokenKind::Str => true,
            TokenKind::Template => {
                let text = self.text(source);
                text.len() >= 2 && text.starts_with('`') && text.ends_with('`')
            }
            _ => false,
        }
    }
}

/// Tokenize `source`, skipping whitespace and comments.
#[must_use]
pub fn tokenize(source: &str) -> Vec<Token> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    for seg in segments(source) {
        let kind = match seg.kind {
            SegmentKind::Comment => continue,
            SegmentKind::Str => TokenKind::Str,
            SegmentKind::Template => TokenKind::Template,
            SegmentKind::Regex => TokenKind::Regex,
            SegmentKind::Code => {
                let mut i = seg.start;
                while i < seg.end {
                    let b = bytes[i];
                    if b.is_ascii_whitespace() {
                        i += 1;
                    } else if is_ident_byte(b) {
                        let start = i;
                        while i < seg.end && is_ident_byte(bytes[i]) {
                            i += 1;
                        }
                        tokens.push(Token {
                            kind: TokenKind::Word,
                            start,
                            end: i,
                        });
                    } else {
                        tokens.push(Token {
                            kind: TokenKind::Punct,
                            start: i,
                            end: i + 1,
                        });
                        i += 1;
                    }
                }
                continue;
            }
        };
        tokens.push(Token {
            kind,
            start: seg.start,
            end: seg.end,
        });
    }
    tokens
}

/// Decode a quoted string literal (or plain template) into its value.
///
/// Handles the common escapes; unknown escapes yield the escaped character.
#[must_use]
pub fn string_value(literal: &str) -> String {
    let inner = if literal.len() >= 2 {
        &literal[1..literal.len() - 1]
    } else {
        ""
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                if let Some(ch) = u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    out.push(ch);
                }
            }
            Some('\n') | None => {}
            Some(other) => out.push(other),
        }
    }
    out
}

/// Encode `value` as a double-quoted JavaScript string literal.
#[must_use]
pub fn quote(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// 1-indexed line number of byte `offset`.
#[must_use]
pub fn line_at(source: &str, offset: usize) -> u32 {
    let end = offset.min(source.len());
    let count = source.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count();
    u32::try_from(count).unwrap_or(u32::MAX).saturating_add(1)
}
