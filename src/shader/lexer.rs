//! Token scanner for the subset of GLSL the parser cares about.
//!
//! Produces identifiers/numbers, single punctuation characters and whole
//! comments. Whitespace is skipped.

/// Classification of a significant token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Other,
    /// Dropped before it reaches the history window (`in` qualifiers).
    Ignored,
    Uniform,
    Float,
    Vec2,
    Vec3,
    Vec4,
    /// `run`, the single-pass entry point.
    Run,
    /// `run_passN` with N in 1..=4.
    RunPass(u8),
    OpenParen,
    CloseParen,
}

impl TokenKind {
    /// Vector arity of a type keyword.
    pub fn arity(self) -> Option<usize> {
        match self {
            TokenKind::Float => Some(1),
            TokenKind::Vec2 => Some(2),
            TokenKind::Vec3 => Some(3),
            TokenKind::Vec4 => Some(4),
            _ => None,
        }
    }
}

static KEYWORDS: &[(&str, TokenKind)] = &[
    ("in", TokenKind::Ignored),
    ("uniform", TokenKind::Uniform),
    ("float", TokenKind::Float),
    ("vec2", TokenKind::Vec2),
    ("vec3", TokenKind::Vec3),
    ("vec4", TokenKind::Vec4),
    ("run", TokenKind::Run),
    ("run_pass1", TokenKind::RunPass(1)),
    ("run_pass2", TokenKind::RunPass(2)),
    ("run_pass3", TokenKind::RunPass(3)),
    ("run_pass4", TokenKind::RunPass(4)),
    ("(", TokenKind::OpenParen),
    (")", TokenKind::CloseParen),
];

/// Looks a token up in the keyword table.
pub fn classify(text: &str) -> TokenKind {
    KEYWORDS
        .iter()
        .find(|(kw, _)| *kw == text)
        .map(|(_, kind)| *kind)
        .unwrap_or(TokenKind::Other)
}

/// One scanned item with its byte range in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lexeme<'a> {
    Token { text: &'a str, start: usize, end: usize },
    /// Comment body without the `//`, `/*` and `*/` markers.
    Comment { body: &'a str, start: usize, end: usize },
}

/// Iterator over the lexemes of a source string.
pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn word_end(&self, start: usize) -> usize {
        let bytes = self.src.as_bytes();
        let numeric = bytes[start].is_ascii_digit() || bytes[start] == b'.';
        let mut i = start;
        while i < bytes.len() {
            let c = bytes[i];
            let exp_sign = numeric
                && (c == b'+' || c == b'-')
                && i > start
                && matches!(bytes[i - 1], b'e' | b'E');
            if c.is_ascii_alphanumeric() || c == b'_' || c == b'.' || exp_sign {
                i += 1;
            } else {
                break;
            }
        }
        i
    }
}

fn is_word_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_' || c == b'.'
}

impl<'a> Iterator for Lexer<'a> {
    type Item = Lexeme<'a>;

    fn next(&mut self) -> Option<Lexeme<'a>> {
        let bytes = self.src.as_bytes();
        while self.pos < bytes.len() && bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if self.pos >= bytes.len() {
            return None;
        }
        let start = self.pos;
        let rest = &self.src[start..];

        if let Some(body) = rest.strip_prefix("//") {
            let len = body.find('\n').unwrap_or(body.len());
            self.pos = start + 2 + len;
            return Some(Lexeme::Comment {
                body: &body[..len],
                start,
                end: self.pos,
            });
        }
        if let Some(body) = rest.strip_prefix("/*") {
            let (len, end) = match body.find("*/") {
                Some(n) => (n, start + 2 + n + 2),
                None => (body.len(), self.src.len()),
            };
            self.pos = end;
            return Some(Lexeme::Comment {
                body: &body[..len],
                start,
                end,
            });
        }

        let c = bytes[start];
        let signed_number = (c == b'-' || c == b'+')
            && bytes
                .get(start + 1)
                .is_some_and(|&n| n.is_ascii_digit() || n == b'.');
        let end = if is_word_byte(c) {
            self.word_end(start)
        } else if signed_number {
            self.word_end(start + 1)
        } else {
            // single punctuation character (may be a multi-byte char)
            start + rest.chars().next().map_or(1, char::len_utf8)
        };
        self.pos = end;
        Some(Lexeme::Token {
            text: &self.src[start..end],
            start,
            end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(src: &str) -> Vec<&str> {
        Lexer::new(src)
            .map(|l| match l {
                Lexeme::Token { text, .. } => text,
                Lexeme::Comment { body, .. } => body,
            })
            .collect()
    }

    #[test]
    fn test_uniform_statement_tokens() {
        assert_eq!(
            texts("uniform vec3 key = vec3(0.299,-0.5,1e-3);"),
            vec!["uniform", "vec3", "key", "=", "vec3", "(", "0.299", ",", "-0.5", ",", "1e-3", ")", ";"]
        );
    }

    #[test]
    fn test_comments_are_single_lexemes() {
        let lexemes: Vec<_> = Lexer::new("a // one @min=0\nb /* two\nlines */ c").collect();
        assert_eq!(lexemes.len(), 5);
        assert!(matches!(lexemes[1], Lexeme::Comment { body: " one @min=0", .. }));
        assert!(matches!(lexemes[3], Lexeme::Comment { body: " two\nlines ", .. }));
    }

    #[test]
    fn test_unterminated_block_comment_runs_to_end() {
        let lexemes: Vec<_> = Lexer::new("x /* open").collect();
        assert_eq!(lexemes.len(), 2);
        assert!(matches!(lexemes[1], Lexeme::Comment { body: " open", end: 9, .. }));
    }

    #[test]
    fn test_keyword_classification() {
        assert_eq!(classify("uniform"), TokenKind::Uniform);
        assert_eq!(classify("run_pass3"), TokenKind::RunPass(3));
        assert_eq!(classify("run_pass5"), TokenKind::Other);
        assert_eq!(classify("in"), TokenKind::Ignored);
        assert_eq!(classify("("), TokenKind::OpenParen);
        assert_eq!(TokenKind::Vec3.arity(), Some(3));
        assert_eq!(TokenKind::Uniform.arity(), None);
    }

    #[test]
    fn test_non_ascii_punctuation() {
        assert_eq!(texts("a ° b"), vec!["a", "°", "b"]);
    }
}
