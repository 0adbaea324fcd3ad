use crate::error::{flagrant, LexError};
use crate::token::{lookup_keyword, Span, Token, TokenKind};

pub struct Lexer {
    source: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
    pub errors: Vec<LexError>,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            source: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            errors: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.source.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == '\n' { self.line += 1; self.column = 1; } else { self.column += 1; }
        Some(ch)
    }

    fn match_char(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) { self.advance(); true } else { false }
    }

    /// Renders a caret diagnostic against this lexer's source.
    pub fn flagrant(&self, line: usize, column: usize, message: &str) -> String {
        let source: String = self.source.iter().collect();
        flagrant(&source, line, column, message)
    }

    /// Yields the next token. After the end of input this keeps returning Eof.
    pub fn next_token(&mut self) -> Token {
        loop {
            match self.peek() {
                Some(' ') | Some('\t') | Some('\r') | Some('\n') => { self.advance(); }
                Some('#') => {
                    while self.peek().is_some() && self.peek() != Some('\n') { self.advance(); }
                }
                _ => break,
            }
        }

        let start_line = self.line;
        let start_col = self.column;

        let ch = match self.advance() {
            Some(c) => c,
            None => return Token::new(TokenKind::Eof, Span::new(self.line, self.column), ""),
        };

        let kind = match ch {
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            '[' => TokenKind::LSquare,
            ']' => TokenKind::RSquare,
            '{' => TokenKind::LCurly,
            '}' => TokenKind::RCurly,
            ',' => TokenKind::Comma,
            ':' => TokenKind::Colon,
            '+' => TokenKind::Plus,
            '-' => TokenKind::Minus,
            '*' => TokenKind::Star,
            '/' => TokenKind::Slash,
            '>' => TokenKind::Greater,
            '<' => TokenKind::Less,
            '=' => if self.match_char('=') { TokenKind::EqualEqual } else { TokenKind::Equal },
            '!' => {
                if self.match_char('=') {
                    TokenKind::BangEqual
                } else {
                    // '!' esiste solo come parte di '!='
                    let err = LexError::UnexpectedChar { ch: '!', line: start_line, column: start_col };
                    let msg = err.message();
                    self.errors.push(err);
                    return Token::new(TokenKind::Error(msg), Span::new(start_line, start_col), "!");
                }
            }
            '"' => return self.lex_string(start_line, start_col),
            c if c.is_ascii_digit() => return self.lex_number(c, start_line, start_col),
            c if c.is_ascii_alphabetic() => return self.lex_identifier(c, start_line, start_col),
            other => {
                let err = LexError::UnexpectedChar { ch: other, line: start_line, column: start_col };
                let msg = err.message();
                self.errors.push(err);
                return Token::new(TokenKind::Error(msg), Span::new(start_line, start_col), other.to_string());
            }
        };

        let lexeme = match &kind {
            TokenKind::EqualEqual => "==".to_string(),
            TokenKind::BangEqual => "!=".to_string(),
            _ => ch.to_string(),
        };
        Token::new(kind, Span::new(start_line, start_col), lexeme)
    }

    fn lex_string(&mut self, line: usize, column: usize) -> Token {
        // No escape sequences: everything up to the closing quote is literal,
        // newlines included.
        let mut content = String::new();
        loop {
            match self.advance() {
                Some('"') => break,
                Some(c) => content.push(c),
                None => {
                    let err = LexError::UnterminatedString { line, column };
                    let msg = err.message();
                    self.errors.push(err);
                    return Token::new(TokenKind::Error(msg), Span::new(line, column), format!("\"{}", content));
                }
            }
        }
        let lexeme = format!("\"{}\"", content);
        Token::new(TokenKind::String(content), Span::new(line, column), lexeme)
    }

    fn lex_number(&mut self, first: char, line: usize, column: usize) -> Token {
        let mut text = String::new();
        text.push(first);
        let mut seen_dot = false;
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                text.push(c);
                self.advance();
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                text.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Token::new(TokenKind::Number(text.clone()), Span::new(line, column), text)
    }

    fn lex_identifier(&mut self, first: char, line: usize, column: usize) -> Token {
        let mut name = String::new();
        name.push(first);
        while self.peek().map_or(false, |c| c.is_ascii_alphabetic() || c == '_') {
            name.push(self.advance().unwrap());
        }
        let kind = lookup_keyword(&name).unwrap_or(TokenKind::Identifier(name.clone()));
        Token::new(kind, Span::new(line, column), name)
    }
}
