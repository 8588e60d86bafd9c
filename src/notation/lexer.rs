use crate::error::{NotationError, NotationResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TokenKind {
    /// Identifier, keyword or directive.
    Word(String),
    /// Quoted string with escapes resolved.
    Str(String),
    LBrace,
    RBrace,
    Arrow,
    Equals,
    Newline,
    Eof,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Token {
    pub kind: TokenKind,
    pub line: usize,
    pub column: usize,
}

impl TokenKind {
    pub(crate) fn describe(&self) -> String {
        match self {
            TokenKind::Word(w) => format!("'{}'", w),
            TokenKind::Str(s) => format!("string \"{}\"", s),
            TokenKind::LBrace => "'{'".to_string(),
            TokenKind::RBrace => "'}'".to_string(),
            TokenKind::Arrow => "'->'".to_string(),
            TokenKind::Equals => "'='".to_string(),
            TokenKind::Newline => "end of line".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '!' | '*')
}

struct Lexer<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            chars: text.chars().peekable(),
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.chars.clone();
        ahead.next();
        ahead.next()
    }

    fn error(&self, line: usize, column: usize, message: impl Into<String>) -> NotationError {
        NotationError::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    fn push(&mut self, kind: TokenKind, line: usize, column: usize) {
        self.tokens.push(Token { kind, line, column });
    }

    fn run(mut self) -> NotationResult<Vec<Token>> {
        while let Some(&c) = self.chars.peek() {
            let (line, column) = (self.line, self.column);
            match c {
                '\n' => {
                    self.bump();
                    self.push(TokenKind::Newline, line, column);
                }
                c if c.is_whitespace() => {
                    self.bump();
                }
                '#' => self.skip_line(),
                '/' => match self.peek_second() {
                    Some('/') => self.skip_line(),
                    Some('*') => self.skip_block_comment(line, column)?,
                    _ => return Err(self.error(line, column, "unexpected character '/'")),
                },
                '{' => {
                    self.bump();
                    self.push(TokenKind::LBrace, line, column);
                }
                '}' => {
                    self.bump();
                    self.push(TokenKind::RBrace, line, column);
                }
                '=' => {
                    self.bump();
                    self.push(TokenKind::Equals, line, column);
                }
                '"' => {
                    let value = self.string(line, column)?;
                    self.push(TokenKind::Str(value), line, column);
                }
                '-' if self.peek_second() == Some('>') => {
                    self.bump();
                    self.bump();
                    self.push(TokenKind::Arrow, line, column);
                }
                c if is_word_char(c) => {
                    let word = self.word();
                    self.push(TokenKind::Word(word), line, column);
                }
                other => {
                    return Err(self.error(
                        line,
                        column,
                        format!("unexpected character '{}'", other),
                    ))
                }
            }
        }
        let (line, column) = (self.line, self.column);
        self.push(TokenKind::Eof, line, column);
        Ok(self.tokens)
    }

    fn skip_line(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    fn skip_block_comment(&mut self, line: usize, column: usize) -> NotationResult<()> {
        self.bump();
        self.bump();
        loop {
            match self.bump() {
                Some('*') if self.chars.peek() == Some(&'/') => {
                    self.bump();
                    return Ok(());
                }
                Some(_) => {}
                None => return Err(self.error(line, column, "unterminated block comment")),
            }
        }
    }

    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(&c) = self.chars.peek() {
            if !is_word_char(c) || (c == '-' && self.peek_second() == Some('>')) {
                break;
            }
            word.push(c);
            self.bump();
        }
        word
    }

    fn string(&mut self, line: usize, column: usize) -> NotationResult<String> {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(value),
                Some('\\') => match self.bump() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some(c @ ('"' | '\\')) => value.push(c),
                    Some(other) => {
                        value.push('\\');
                        value.push(other);
                    }
                    None => return Err(self.error(line, column, "unterminated string")),
                },
                Some('\n') | None => return Err(self.error(line, column, "unterminated string")),
                Some(c) => value.push(c),
            }
        }
    }
}

/// Split notation text into tokens, keeping line breaks as statement separators.
pub(crate) fn tokenize(text: &str) -> NotationResult<Vec<Token>> {
    Lexer::new(text).run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        tokenize(text).unwrap().into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_assignment_tokens() {
        assert_eq!(
            kinds("u = person \"User\""),
            vec![
                TokenKind::Word("u".to_string()),
                TokenKind::Equals,
                TokenKind::Word("person".to_string()),
                TokenKind::Str("User".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_arrow_without_spaces() {
        assert_eq!(
            kinds("a->b"),
            vec![
                TokenKind::Word("a".to_string()),
                TokenKind::Arrow,
                TokenKind::Word("b".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_hyphenated_words_stay_whole() {
        assert_eq!(
            kinds("web-app -> db--main"),
            vec![
                TokenKind::Word("web-app".to_string()),
                TokenKind::Arrow,
                TokenKind::Word("db--main".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_skipped() {
        let text = "// heading\n# note\n/* multi\nline */ x";
        assert_eq!(
            kinds(text),
            vec![
                TokenKind::Newline,
                TokenKind::Newline,
                TokenKind::Word("x".to_string()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(
            kinds(r#""say \"hi\" \\ now""#),
            vec![TokenKind::Str("say \"hi\" \\ now".to_string()), TokenKind::Eof]
        );
    }

    #[test]
    fn test_unterminated_string_reports_start() {
        let err = tokenize("x = person \"User\n").unwrap_err();
        assert_eq!(
            err,
            NotationError::Parse {
                line: 1,
                column: 12,
                message: "unterminated string".to_string(),
            }
        );
    }

    #[test]
    fn test_positions_track_lines() {
        let tokens = tokenize("a\n  b").unwrap();
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[2].line, tokens[2].column), (2, 3));
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a ; b").unwrap_err();
        assert!(err.to_string().contains("unexpected character ';'"));
    }
}
