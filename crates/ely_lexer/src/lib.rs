pub mod error;
pub mod lexer;
pub mod token;

pub use error::{flagrant, LexError};
pub use lexer::Lexer;
pub use token::{lookup_keyword, Span, Token, TokenKind};

/// Drains the whole token stream at once (used by `--lex` and by tests;
/// the compiler pulls tokens lazily instead).
pub fn tokenize(source: &str) -> (Vec<Token>, Vec<LexError>) {
    let mut lexer = Lexer::new(source);
    let mut tokens = Vec::new();
    loop {
        let tok = lexer.next_token();
        let done = tok.kind == TokenKind::Eof;
        tokens.push(tok);
        if done { break; }
    }
    (tokens, std::mem::take(&mut lexer.errors))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let (tokens, errors) = tokenize(src);
        assert!(errors.is_empty(), "Unexpected errors: {:?}", errors);
        tokens.into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_empty_source() {
        let (tokens, errors) = tokenize("");
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::Eof);
    }

    #[test]
    fn test_eof_repeats() {
        let mut lexer = Lexer::new("var");
        assert_eq!(lexer.next_token().kind, TokenKind::Var);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
    }

    #[test]
    fn test_number_literals() {
        let k = kinds("42 3.14 7.");
        assert_eq!(k[0], TokenKind::Number("42".to_string()));
        assert_eq!(k[1], TokenKind::Number("3.14".to_string()));
        assert_eq!(k[2], TokenKind::Number("7.".to_string()));
    }

    #[test]
    fn test_number_single_dot() {
        // a second dot ends the literal and is not a valid character on its own
        let (tokens, errors) = tokenize("1.2.3");
        assert_eq!(tokens[0].kind, TokenKind::Number("1.2".to_string()));
        assert!(matches!(tokens[1].kind, TokenKind::Error(_)));
        assert_eq!(tokens[2].kind, TokenKind::Number("3".to_string()));
        assert!(matches!(errors[0], LexError::UnexpectedChar { ch: '.', .. }));
    }

    #[test]
    fn test_string_literal() {
        let (tokens, errors) = tokenize(r#""hello world""#);
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::String("hello world".to_string()));
    }

    #[test]
    fn test_string_no_escapes() {
        // backslashes are ordinary characters
        let (tokens, errors) = tokenize(r#""a\nb""#);
        assert!(errors.is_empty());
        assert_eq!(tokens[0].kind, TokenKind::String("a\\nb".to_string()));
    }

    #[test]
    fn test_keywords() {
        let k = kinds("var while do break if then else elseif end function return true false and or not");
        assert_eq!(k[0], TokenKind::Var);
        assert_eq!(k[1], TokenKind::While);
        assert_eq!(k[2], TokenKind::Do);
        assert_eq!(k[3], TokenKind::Break);
        assert_eq!(k[4], TokenKind::If);
        assert_eq!(k[5], TokenKind::Then);
        assert_eq!(k[6], TokenKind::Else);
        assert_eq!(k[7], TokenKind::ElseIf);
        assert_eq!(k[8], TokenKind::End);
        assert_eq!(k[9], TokenKind::Function);
        assert_eq!(k[10], TokenKind::Return);
        assert_eq!(k[11], TokenKind::True);
        assert_eq!(k[12], TokenKind::False);
        assert_eq!(k[13], TokenKind::And);
        assert_eq!(k[14], TokenKind::Or);
        assert_eq!(k[15], TokenKind::Not);
    }

    #[test]
    fn test_operators() {
        let k = kinds("= == != + - * / > < , : ( ) [ ] { }");
        assert_eq!(k[0], TokenKind::Equal);
        assert_eq!(k[1], TokenKind::EqualEqual);
        assert_eq!(k[2], TokenKind::BangEqual);
        assert_eq!(k[3], TokenKind::Plus);
        assert_eq!(k[4], TokenKind::Minus);
        assert_eq!(k[5], TokenKind::Star);
        assert_eq!(k[6], TokenKind::Slash);
        assert_eq!(k[7], TokenKind::Greater);
        assert_eq!(k[8], TokenKind::Less);
        assert_eq!(k[9], TokenKind::Comma);
        assert_eq!(k[10], TokenKind::Colon);
        assert_eq!(k[11], TokenKind::LParen);
        assert_eq!(k[12], TokenKind::RParen);
        assert_eq!(k[13], TokenKind::LSquare);
        assert_eq!(k[14], TokenKind::RSquare);
        assert_eq!(k[15], TokenKind::LCurly);
        assert_eq!(k[16], TokenKind::RCurly);
    }

    #[test]
    fn test_identifiers() {
        let k = kinds("foo bar_baz Widget");
        assert_eq!(k[0], TokenKind::Identifier("foo".to_string()));
        assert_eq!(k[1], TokenKind::Identifier("bar_baz".to_string()));
        assert_eq!(k[2], TokenKind::Identifier("Widget".to_string()));
    }

    #[test]
    fn test_identifiers_take_no_digits() {
        // digits are not identifier characters: "x1" is two tokens
        let k = kinds("x1");
        assert_eq!(k[0], TokenKind::Identifier("x".to_string()));
        assert_eq!(k[1], TokenKind::Number("1".to_string()));
    }

    #[test]
    fn test_comment_skipped() {
        let k = kinds("var x # resto della riga ignorato\nvar");
        assert_eq!(k[0], TokenKind::Var);
        assert_eq!(k[1], TokenKind::Identifier("x".to_string()));
        assert_eq!(k[2], TokenKind::Var);
    }

    #[test]
    fn test_line_tracking() {
        let (tokens, _) = tokenize("var\n\nwhile\r\ndo");
        assert_eq!(tokens[0].span.line, 1);
        assert_eq!(tokens[1].span.line, 3);
        assert_eq!(tokens[2].span.line, 4);
    }

    #[test]
    fn test_unterminated_string_error() {
        let (tokens, errors) = tokenize("\"hello");
        assert!(matches!(tokens[0].kind, TokenKind::Error(_)));
        assert!(matches!(errors[0], LexError::UnterminatedString { .. }));
    }

    #[test]
    fn test_unexpected_char_error() {
        let (tokens, errors) = tokenize("var x = 1 ; var");
        assert!(matches!(errors[0], LexError::UnexpectedChar { ch: ';', .. }));
        assert!(tokens.iter().any(|t| matches!(t.kind, TokenKind::Error(_))));
    }

    #[test]
    fn test_bang_alone_is_an_error() {
        let (_, errors) = tokenize("1 ! 2");
        assert!(matches!(errors[0], LexError::UnexpectedChar { ch: '!', .. }));
    }

    #[test]
    fn test_flagrant_format() {
        let out = flagrant("var x = @\n", 1, 9, "unexpected character '@'");
        assert_eq!(
            out,
            "flagrant error on line 1\nunexpected character '@'\n    var x = @\n            ^"
        );
    }
}
