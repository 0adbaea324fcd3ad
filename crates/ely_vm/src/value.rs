use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::program::FnProto;

// ── Tipi heap-allocated (condivisi via Rc) ────────────────────────────────

pub type RcTable   = Rc<RefCell<Table>>;
pub type RcUpvalue = Rc<RefCell<Upvalue>>;

/// La hash table del linguaggio: mappa chiave-stringa → valore, con ordine
/// di inserimento preservato. Le liste sono tabelle con chiavi "0","1",…
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub entries: IndexMap<String, Value>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cella upvalue: aperta (punta a uno slot assoluto dello stack) finché il
/// frame che possiede lo slot è vivo, chiusa (possiede il valore) dopo il
/// suo Return. La cella è condivisa per identità fra tutte le closure che
/// catturano la stessa variabile.
#[derive(Debug, Clone)]
pub enum Upvalue {
    Open(usize),
    Closed(Value),
}

/// Closure = prototipo + celle upvalue risolte all'opcode `Closure`.
/// Le celle sono condivise fra tutte le invocazioni della stessa istanza.
#[derive(Clone)]
pub struct Closure {
    pub proto: Rc<FnProto>,
    pub upvalues: Vec<RcUpvalue>,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Closure({})", self.proto.name)
    }
}

/// Funzione nativa (built-in). `arity` None è la sentinella "variadica".
pub struct NativeFn {
    pub name: String,
    pub arity: Option<usize>,
    pub func: fn(&[Value]) -> Result<Value, String>,
}

// ── Value ─────────────────────────────────────────────────────────────────

/// Tipo runtime di Ely. I primitivi sono inline; stringhe, tabelle e
/// funzioni sono heap-allocated e condivise via Rc (i cicli attraverso gli
/// upvalue non vengono raccolti).
#[derive(Clone)]
pub enum Value {
    Number(f64),
    Bool(bool),
    Null,
    Str(Rc<String>),
    Table(RcTable),
    Function(Rc<Closure>),
    NativeFn(Rc<NativeFn>),
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n)   => write!(f, "Number({})", n),
            Value::Bool(b)     => write!(f, "Bool({})", b),
            Value::Null        => write!(f, "Null"),
            Value::Str(s)      => write!(f, "Str({:?})", s),
            Value::Table(t)    => write!(f, "Table({:?})", t.borrow().entries),
            Value::Function(c) => write!(f, "Function({})", c.proto.name),
            Value::NativeFn(n) => write!(f, "NativeFn({})", n.name),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(n)   => write!(f, "{}", fmt_number(*n)),
            Value::Bool(b)     => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Null        => write!(f, "null"),
            Value::Str(s)      => write!(f, "{}", s),
            Value::Table(t)    => {
                let entries: Vec<String> = t.borrow().entries.iter()
                    .map(|(k, v)| format!("{}: {}", k, v))
                    .collect();
                write!(f, "{{{}}}", entries.join(", "))
            }
            Value::Function(c) => write!(f, "<fn {}>", c.proto.name),
            Value::NativeFn(n) => write!(f, "<built-in {}>", n.name),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a),   Value::Number(b))   => a == b,
            (Value::Bool(a),     Value::Bool(b))     => a == b,
            (Value::Null,        Value::Null)        => true,
            (Value::Str(a),      Value::Str(b))      => a == b,
            // uguaglianza strutturale, indipendente dall'ordine di inserimento
            (Value::Table(a),    Value::Table(b))    => *a.borrow() == *b.borrow(),
            // le funzioni confrontano per identità
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::NativeFn(a), Value::NativeFn(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Value {
    /// Bool usa il proprio valore; Number è truthy se diverso da zero; Str
    /// se non vuota. Tutto il resto (Null, tabelle, funzioni) è falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b)   => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s)    => !s.is_empty(),
            _                => false,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_)   => "number",
            Value::Bool(_)     => "bool",
            Value::Null        => "null",
            Value::Str(_)      => "string",
            Value::Table(_)    => "hashtable",
            Value::Function(_) => "function",
            Value::NativeFn(_) => "native function",
        }
    }

    /// Costruisce un Value::Str da testo
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(Rc::new(s.into()))
    }

    /// Costruisce un Value::Table da una Table
    pub fn table(t: Table) -> Self {
        Value::Table(Rc::new(RefCell::new(t)))
    }
}

/// Forma canonica in stringa di un numero: gli interi perdono la parte
/// decimale ("3", non "3.0"), così gli indici di lista coincidono con le
/// chiavi emesse dal compilatore e `str(n)` fa round-trip.
pub fn fmt_number(n: f64) -> String {
    if n.fract() == 0.0 && n.is_finite() && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

// ── Test ──────────────────────────────────────────────────────────────────
