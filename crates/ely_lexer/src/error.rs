use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum LexError {
    UnexpectedChar { ch: char, line: usize, column: usize },
    UnterminatedString { line: usize, column: usize },
}

impl LexError {
    pub fn line(&self) -> usize {
        match self {
            LexError::UnexpectedChar { line, .. } => *line,
            LexError::UnterminatedString { line, .. } => *line,
        }
    }

    pub fn column(&self) -> usize {
        match self {
            LexError::UnexpectedChar { column, .. } => *column,
            LexError::UnterminatedString { column, .. } => *column,
        }
    }

    pub fn message(&self) -> String {
        match self {
            LexError::UnexpectedChar { ch, .. } => format!("unexpected character '{}'", ch),
            LexError::UnterminatedString { .. } => "unterminated string".to_string(),
        }
    }
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[LexError] {} at line {}, column {}", self.message(), self.line(), self.column())
    }
}

impl std::error::Error for LexError {}

/// Renders the user-facing diagnostic for a source position: the header
/// line, the message, the offending source line and a caret under the
/// failing column.
pub fn flagrant(source: &str, line: usize, column: usize, message: &str) -> String {
    let mut out = format!("flagrant error on line {}\n{}", line, message);
    if let Some(text) = source.lines().nth(line.saturating_sub(1)) {
        out.push_str(&format!(
            "\n    {}\n    {}^",
            text,
            " ".repeat(column.saturating_sub(1))
        ));
    }
    out
}
