use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ElyError {
    // ── Compile-time ──────────────────────────────────────────────────────
    /// Una o più diagnostiche già renderizzate dal percorso "fatal"
    /// (riga offendente + caret).
    CompileFailed(Vec<String>),

    // ── Runtime ───────────────────────────────────────────────────────────
    UndefinedGlobal(String),
    RedefinedGlobal(String),
    TypeError(String),
    NotCallable(String),
    ArityMismatch { name: String, expected: usize, got: usize },
    StackUnderflow,
    JumpOutOfRange { target: usize, len: usize },
    UnknownOpcode(u8),
    KeyNotFound(String),
    MissingReturnValue(String),
    StackOverflow,
}

impl fmt::Display for ElyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElyError::CompileFailed(diags)    => write!(f, "{}", diags.join("\n")),
            ElyError::UndefinedGlobal(n)      => write!(f, "[RuntimeError] Undefined global '{}'", n),
            ElyError::RedefinedGlobal(n)      => write!(f, "[RuntimeError] Global '{}' is already defined", n),
            ElyError::TypeError(m)            => write!(f, "[RuntimeError] Type error: {}", m),
            ElyError::NotCallable(t)          => write!(f, "[RuntimeError] '{}' is not callable", t),
            ElyError::ArityMismatch { name, expected, got }
                => write!(f, "[RuntimeError] '{}' expects {} arg(s), got {}", name, expected, got),
            ElyError::StackUnderflow          => write!(f, "[RuntimeError] Stack underflow"),
            ElyError::JumpOutOfRange { target, len }
                => write!(f, "[RuntimeError] Jump target {} out of range (program is {} bytes)", target, len),
            ElyError::UnknownOpcode(b)        => write!(f, "[RuntimeError] Unknown opcode {}", b),
            ElyError::KeyNotFound(k)          => write!(f, "[RuntimeError] Key '{}' not found", k),
            ElyError::MissingReturnValue(n)   => write!(f, "[RuntimeError] '{}' returned without a value", n),
            ElyError::StackOverflow           => write!(f, "[RuntimeError] Stack overflow"),
        }
    }
}

impl std::error::Error for ElyError {}

pub type ElyResult<T = crate::value::Value> = Result<T, ElyError>;
