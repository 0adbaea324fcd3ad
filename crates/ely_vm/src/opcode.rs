/// Instruction set della Ely VM.
///
/// Ogni istruzione è codificata come 1 byte (opcode) seguito da 0-2 byte
/// di operandi. I formati usati:
///   - [u8]   → 1 byte operando
///   - [u16]  → 2 byte little-endian (indici nei pool, destinazioni di salto)
///
/// `Closure` è l'unico opcode a lunghezza variabile: dopo l'operando [u16]
/// seguono `upvalue_count` coppie di byte `(is_local, index)`.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    // ── Costanti ──────────────────────────────────────────────────────────
    /// `Const [u16]` — push constants[idx] (Number, Str o Bool)
    Const,
    /// push Null
    Null,

    // ── Stack ─────────────────────────────────────────────────────────────
    /// Scarta il top (emesso solo alla chiusura di uno scope, uno per local)
    Pop,

    // ── Variabili globali ─────────────────────────────────────────────────
    /// `DefineGlobal [u16]` — pop valore, definisce names[idx]; errore se esiste già
    DefineGlobal,
    /// `SetGlobal [u16]` — pop valore, assegna names[idx]; errore se non esiste
    SetGlobal,
    /// `GetGlobal [u16]` — push globals[names[idx]]; errore se non esiste
    GetGlobal,

    // ── Variabili locali ──────────────────────────────────────────────────
    /// `GetLocal [u8]` — push stack[base + slot]
    GetLocal,
    /// `SetLocal [u8]` — pop valore, stack[base + slot] = valore
    SetLocal,

    // ── Upvalue (closure) ─────────────────────────────────────────────────
    /// `GetUpvalue [u8]` — push il valore della cella (aperta o chiusa)
    GetUpvalue,
    /// `SetUpvalue [u8]` — pop valore, scrive nella cella
    SetUpvalue,
    /// `Closure [u16] ((u8,u8) × upvalue_count)` — crea una closure da
    /// protos[idx] catturando le celle descritte dalle coppie
    Closure,

    // ── Hash table ────────────────────────────────────────────────────────
    /// `CreateHT [u16:n]` — rimuove n coppie (chiave, valore) dallo stack e
    /// push la tabella
    CreateHT,
    /// `GetHT` — pop chiave, pop tabella, push tabella[chiave]
    GetHT,

    // ── Aritmetica ────────────────────────────────────────────────────────
    Add, Sub, Multiply, Divide,

    // ── Confronto / logica ────────────────────────────────────────────────
    Greater, Less, Equal,
    /// Negazione booleana (operando Bool obbligatorio)
    Not,
    /// And/Or stretti: nessun corto circuito a livello bytecode
    And, Or,

    // ── Funzioni ──────────────────────────────────────────────────────────
    /// `Call [u8:argc]` — chiama stack[len - argc - 1] con argc argomenti
    Call,
    /// `Return [u8:n]` — chiude gli upvalue del frame; con n=1 ritorna il top
    Return,

    // ── Salti (destinazioni assolute) ─────────────────────────────────────
    /// `Jump [u16]`
    Jump,
    /// `JumpIfFalse [u16]` — pop valore, salta se falsy
    JumpIfFalse,

    // ── Misc ──────────────────────────────────────────────────────────────
    Halt,
}

impl Op {
    /// Numero di byte di operandi fissi che seguono l'opcode.
    /// Le coppie upvalue di `Closure` sono escluse (lunghezza nota solo dal
    /// prototipo).
    pub fn operand_bytes(self) -> usize {
        match self {
            Op::Const        => 2,
            Op::DefineGlobal => 2,
            Op::SetGlobal    => 2,
            Op::GetGlobal    => 2,
            Op::GetLocal     => 1,
            Op::SetLocal     => 1,
            Op::GetUpvalue   => 1,
            Op::SetUpvalue   => 1,
            Op::Closure      => 2,
            Op::CreateHT     => 2,
            Op::Call         => 1,
            Op::Return       => 1,
            Op::Jump         => 2,
            Op::JumpIfFalse  => 2,
            _                => 0,
        }
    }

    pub fn from_u8(b: u8) -> Option<Self> {
        // SAFETY: tutti i valori 0..=Halt sono varianti valide di un enum repr(u8)
        if b <= Op::Halt as u8 {
            Some(unsafe { std::mem::transmute::<u8, Op>(b) })
        } else {
            None
        }
    }
}

impl std::fmt::Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}
