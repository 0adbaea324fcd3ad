use std::cell::RefCell;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::{ElyError, ElyResult};
use crate::opcode::Op;
use crate::program::Program;
use crate::stdlib;
use crate::value::{fmt_number, Closure, RcUpvalue, Table, Upvalue, Value};

const FRAMES_MAX: usize = 256;

// ── Call frame ────────────────────────────────────────────────────────────

/// Stato del chiamante, salvato all'ingresso di una Call e ripristinato
/// al Return.
struct CallFrame {
    /// Nome della funzione in esecuzione (per il traceback).
    name: String,
    /// Program e pc del chiamante.
    saved_program: Rc<Program>,
    saved_pc: usize,
    /// Indice nello stack dello slot del callee: i locali partono da qui.
    stack_base: usize,
    /// Closure attiva (per gli upvalue).
    closure: Rc<Closure>,
    /// Valore di ritorno in attesa di essere pushato nel chiamante.
    return_value: Option<Value>,
}

// ── VM ────────────────────────────────────────────────────────────────────

pub struct Vm {
    program: Rc<Program>,
    pc: usize,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: FxHashMap<String, Value>,
    /// Celle aperte, deduplicate per slot: più closure condividono la
    /// stessa cella per la stessa variabile.
    open_upvalues: Vec<RcUpvalue>,
    /// Con true ogni istruzione eseguita viene tracciata su stderr.
    pub trace: bool,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Vm {
            program: Rc::new(Program::new()),
            pc: 0,
            stack: Vec::with_capacity(256),
            frames: Vec::with_capacity(16),
            globals: FxHashMap::default(),
            open_upvalues: Vec::new(),
            trace: false,
        };
        stdlib::register_globals(&mut vm.globals);
        vm
    }

    // ── Esecuzione ────────────────────────────────────────────────────────

    pub fn run(&mut self, program: Program) -> ElyResult<Value> {
        self.program = Rc::new(program);
        self.pc = 0;
        loop {
            match self.step() {
                Ok(Some(v)) => return Ok(v),
                Ok(None) => continue,
                Err(e) => {
                    eprintln!("{}", self.build_trace());
                    self.frames.clear();
                    self.stack.clear();
                    self.open_upvalues.clear();
                    return Err(e);
                }
            }
        }
    }

    fn build_trace(&self) -> String {
        let mut out = String::from("traceback:\n");
        let name = self.frames.last().map_or("<script>", |f| f.name.as_str());
        out.push_str(&format!(
            "  at {} (line {})\n",
            name,
            self.program.line_at(self.pc.saturating_sub(1))
        ));
        for (i, frame) in self.frames.iter().enumerate().rev() {
            let caller = if i == 0 { "<script>" } else { self.frames[i - 1].name.as_str() };
            out.push_str(&format!(
                "  at {} (line {})\n",
                caller,
                frame.saved_program.line_at(frame.saved_pc.saturating_sub(1))
            ));
        }
        out
    }

    fn base(&self) -> usize {
        self.frames.last().map_or(0, |f| f.stack_base)
    }

    // ── Step: esegue una singola istruzione ───────────────────────────────

    fn step(&mut self) -> Result<Option<Value>, ElyError> {
        let program = Rc::clone(&self.program);
        let code = &program.code;
        if self.pc >= code.len() {
            return Err(ElyError::JumpOutOfRange { target: self.pc, len: code.len() });
        }
        let op_byte = code[self.pc];
        let op = Op::from_u8(op_byte).ok_or(ElyError::UnknownOpcode(op_byte))?;
        if self.trace {
            eprintln!("[vm] {:04}  {:14}  depth={}", self.pc, format!("{}", op), self.stack.len());
        }
        self.pc += 1;

        macro_rules! read_u8 { () => {{
            let v = code[self.pc];
            self.pc += 1;
            v
        }} }
        macro_rules! read_u16 { () => {{
            let v = crate::program::read_u16(code, self.pc);
            self.pc += 2;
            v
        }} }
        macro_rules! pop  { () => { self.stack.pop().ok_or(ElyError::StackUnderflow)? } }
        macro_rules! push { ($v:expr) => { self.stack.push($v) } }

        match op {
            // ── Costanti ──────────────────────────────────────────────────
            Op::Const => {
                let idx = read_u16!() as usize;
                let v = program.constants[idx].clone();
                push!(v);
            }
            Op::Null => push!(Value::Null),

            // ── Stack ─────────────────────────────────────────────────────
            Op::Pop => { pop!(); }

            // ── Globali ───────────────────────────────────────────────────
            Op::DefineGlobal => {
                let idx = read_u16!() as usize;
                let name = program.names[idx].clone();
                let v = pop!();
                if self.globals.contains_key(&name) {
                    return Err(ElyError::RedefinedGlobal(name));
                }
                self.globals.insert(name, v);
            }
            Op::SetGlobal => {
                let idx = read_u16!() as usize;
                let name = &program.names[idx];
                let v = pop!();
                match self.globals.get_mut(name) {
                    Some(slot) => *slot = v,
                    None => return Err(ElyError::UndefinedGlobal(name.clone())),
                }
            }
            Op::GetGlobal => {
                let idx = read_u16!() as usize;
                let name = &program.names[idx];
                let v = self.globals.get(name)
                    .cloned()
                    .ok_or_else(|| ElyError::UndefinedGlobal(name.clone()))?;
                push!(v);
            }

            // ── Locali ────────────────────────────────────────────────────
            Op::GetLocal => {
                let slot = read_u8!() as usize;
                let base = self.base();
                let v = self.stack.get(base + slot).cloned().ok_or(ElyError::StackUnderflow)?;
                push!(v);
            }
            Op::SetLocal => {
                let slot = read_u8!() as usize;
                let base = self.base();
                let v = pop!();
                match self.stack.get_mut(base + slot) {
                    Some(s) => *s = v,
                    None => return Err(ElyError::StackUnderflow),
                }
            }

            // ── Upvalue ───────────────────────────────────────────────────
            Op::GetUpvalue => {
                let idx = read_u8!() as usize;
                let cell = {
                    let frame = self.frames.last().ok_or(ElyError::StackUnderflow)?;
                    Rc::clone(&frame.closure.upvalues[idx])
                };
                let v = match &*cell.borrow() {
                    Upvalue::Open(slot) => {
                        self.stack.get(*slot).cloned().ok_or(ElyError::StackUnderflow)?
                    }
                    Upvalue::Closed(v) => v.clone(),
                };
                push!(v);
            }
            Op::SetUpvalue => {
                let idx = read_u8!() as usize;
                let v = pop!();
                let cell = {
                    let frame = self.frames.last().ok_or(ElyError::StackUnderflow)?;
                    Rc::clone(&frame.closure.upvalues[idx])
                };
                let slot = match &*cell.borrow() {
                    Upvalue::Open(slot) => Some(*slot),
                    Upvalue::Closed(_) => None,
                };
                match slot {
                    Some(slot) => match self.stack.get_mut(slot) {
                        Some(s) => *s = v,
                        None => return Err(ElyError::StackUnderflow),
                    },
                    None => *cell.borrow_mut() = Upvalue::Closed(v),
                }
            }

            Op::Closure => {
                let idx = read_u16!() as usize;
                let proto = Rc::clone(&program.protos[idx]);
                let base = self.base();
                let mut upvalues = Vec::with_capacity(proto.upvalue_count);
                for _ in 0..proto.upvalue_count {
                    let is_local = read_u8!() != 0;
                    let index = read_u8!() as usize;
                    if is_local {
                        upvalues.push(self.capture_upvalue(base + index));
                    } else {
                        let frame = self.frames.last().ok_or(ElyError::StackUnderflow)?;
                        upvalues.push(Rc::clone(&frame.closure.upvalues[index]));
                    }
                }
                push!(Value::Function(Rc::new(Closure { proto, upvalues })));
            }

            // ── Hash table ────────────────────────────────────────────────
            Op::CreateHT => {
                let n = read_u16!() as usize;
                if self.stack.len() < 2 * n {
                    return Err(ElyError::StackUnderflow);
                }
                let start = self.stack.len() - 2 * n;
                let items: Vec<Value> = self.stack.drain(start..).collect();
                let mut table = Table::new();
                for pair in items.chunks(2) {
                    let key = match &pair[0] {
                        Value::Str(s) => s.to_string(),
                        v => return Err(ElyError::TypeError(
                            format!("hashtable key must be a string, got {}", v.type_name()),
                        )),
                    };
                    table.entries.insert(key, pair[1].clone());
                }
                push!(Value::table(table));
            }

            Op::GetHT => {
                let key = pop!();
                let table = pop!();
                let t = match &table {
                    Value::Table(t) => t,
                    v => return Err(ElyError::TypeError(format!("cannot index {}", v.type_name()))),
                };
                // le chiavi numeriche coerciscono alla loro forma canonica
                let k = match &key {
                    Value::Str(s) => s.to_string(),
                    Value::Number(n) => fmt_number(*n),
                    v => return Err(ElyError::TypeError(
                        format!("hashtable key must be a string or number, got {}", v.type_name()),
                    )),
                };
                let v = t.borrow().entries.get(&k).cloned().ok_or(ElyError::KeyNotFound(k))?;
                push!(v);
            }

            // ── Aritmetica ────────────────────────────────────────────────
            Op::Add => { let r = pop!(); let l = pop!(); push!(self.op_add(l, r)?); }
            Op::Sub => { let r = pop!(); let l = pop!(); push!(self.op_numeric("-", l, r, |a, b| a - b)?); }
            Op::Multiply => { let r = pop!(); let l = pop!(); push!(self.op_numeric("*", l, r, |a, b| a * b)?); }
            Op::Divide => { let r = pop!(); let l = pop!(); push!(self.op_numeric("/", l, r, |a, b| a / b)?); }

            // ── Confronto / logica ────────────────────────────────────────
            Op::Greater => { let r = pop!(); let l = pop!(); push!(self.op_compare(">", l, r, |a, b| a > b)?); }
            Op::Less    => { let r = pop!(); let l = pop!(); push!(self.op_compare("<", l, r, |a, b| a < b)?); }
            Op::Equal => {
                let r = pop!();
                let l = pop!();
                if std::mem::discriminant(&l) != std::mem::discriminant(&r) {
                    return Err(ElyError::TypeError(
                        format!("'==' between {} and {}", l.type_name(), r.type_name()),
                    ));
                }
                push!(Value::Bool(l == r));
            }
            Op::Not => {
                let v = pop!();
                match v {
                    Value::Bool(b) => push!(Value::Bool(!b)),
                    v => return Err(ElyError::TypeError(format!("'not' on {}", v.type_name()))),
                }
            }
            Op::And => { let r = pop!(); let l = pop!(); push!(self.op_logic("and", l, r, |a, b| a && b)?); }
            Op::Or  => { let r = pop!(); let l = pop!(); push!(self.op_logic("or", l, r, |a, b| a || b)?); }

            // ── Funzioni ──────────────────────────────────────────────────
            Op::Call => {
                let argc = read_u8!() as usize;
                if self.stack.len() < argc + 1 {
                    return Err(ElyError::StackUnderflow);
                }
                let callee_idx = self.stack.len() - argc - 1;
                let callee = self.stack[callee_idx].clone();
                match callee {
                    Value::NativeFn(nf) => {
                        if let Some(expected) = nf.arity {
                            if argc != expected {
                                return Err(ElyError::ArityMismatch {
                                    name: nf.name.clone(),
                                    expected,
                                    got: argc,
                                });
                            }
                        }
                        // argomenti in ordine sorgente, poi via args e callee
                        let args: Vec<Value> = self.stack.split_off(callee_idx + 1);
                        self.stack.truncate(callee_idx);
                        let result = (nf.func)(&args).map_err(ElyError::TypeError)?;
                        // il risultato esiste solo se non è Null
                        if !matches!(result, Value::Null) {
                            push!(result);
                        }
                    }
                    Value::Function(closure) => {
                        if argc != closure.proto.arity {
                            return Err(ElyError::ArityMismatch {
                                name: closure.proto.name.clone(),
                                expected: closure.proto.arity,
                                got: argc,
                            });
                        }
                        if self.frames.len() >= FRAMES_MAX {
                            return Err(ElyError::StackOverflow);
                        }
                        let frame = CallFrame {
                            name: closure.proto.name.clone(),
                            saved_program: Rc::clone(&self.program),
                            saved_pc: self.pc,
                            stack_base: callee_idx,
                            closure: Rc::clone(&closure),
                            return_value: None,
                        };
                        self.frames.push(frame);
                        self.program = Rc::clone(&closure.proto.program);
                        self.pc = 0;
                    }
                    other => return Err(ElyError::NotCallable(other.type_name().to_string())),
                }
            }

            Op::Return => {
                let n = read_u8!();
                let mut frame = self.frames.pop().ok_or(ElyError::StackUnderflow)?;
                self.close_upvalues(frame.stack_base);
                if n == 1 {
                    let v = self.stack.pop()
                        .ok_or_else(|| ElyError::MissingReturnValue(frame.name.clone()))?;
                    frame.return_value = Some(v);
                }
                self.stack.truncate(frame.stack_base);
                self.program = frame.saved_program;
                self.pc = frame.saved_pc;
                if let Some(v) = frame.return_value {
                    push!(v);
                }
            }

            // ── Salti ─────────────────────────────────────────────────────
            Op::Jump => {
                let target = read_u16!() as usize;
                if target >= code.len() {
                    return Err(ElyError::JumpOutOfRange { target, len: code.len() });
                }
                self.pc = target;
            }
            Op::JumpIfFalse => {
                let target = read_u16!() as usize;
                let v = pop!();
                if !v.is_truthy() {
                    if target >= code.len() {
                        return Err(ElyError::JumpOutOfRange { target, len: code.len() });
                    }
                    self.pc = target;
                }
            }

            // ── Misc ──────────────────────────────────────────────────────
            Op::Halt => {
                let result = self.stack.pop().unwrap_or(Value::Null);
                self.stack.clear();
                self.frames.clear();
                self.open_upvalues.clear();
                return Ok(Some(result));
            }
        }

        Ok(None)
    }

    // ── Upvalue ───────────────────────────────────────────────────────────

    /// Restituisce la cella aperta per `slot`, creandola se non esiste.
    fn capture_upvalue(&mut self, slot: usize) -> RcUpvalue {
        for cell in &self.open_upvalues {
            if matches!(&*cell.borrow(), Upvalue::Open(s) if *s == slot) {
                return Rc::clone(cell);
            }
        }
        let cell = Rc::new(RefCell::new(Upvalue::Open(slot)));
        self.open_upvalues.push(Rc::clone(&cell));
        cell
    }

    /// Chiude ogni cella aperta con slot ≥ `from`: il valore viene copiato
    /// dallo stack nella cella, che da quel momento lo possiede.
    fn close_upvalues(&mut self, from: usize) {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            let slot = match &*self.open_upvalues[i].borrow() {
                Upvalue::Open(s) if *s >= from => Some(*s),
                _ => None,
            };
            match slot {
                Some(s) => {
                    let value = self.stack.get(s).cloned().unwrap_or(Value::Null);
                    *self.open_upvalues[i].borrow_mut() = Upvalue::Closed(value);
                    self.open_upvalues.swap_remove(i);
                }
                None => i += 1,
            }
        }
    }

    // ── Operazioni ────────────────────────────────────────────────────────

    fn op_add(&self, l: Value, r: Value) -> ElyResult {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
            (Value::Str(_), Value::Number(_)) | (Value::Number(_), Value::Str(_)) => {
                Ok(Value::str(format!("{}{}", l, r)))
            }
            _ => Err(ElyError::TypeError(
                format!("'+' between {} and {}", l.type_name(), r.type_name()),
            )),
        }
    }

    fn op_numeric(&self, op: &str, l: Value, r: Value, f: impl Fn(f64, f64) -> f64) -> ElyResult {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(f(*a, *b))),
            _ => Err(ElyError::TypeError(
                format!("'{}' between {} and {}", op, l.type_name(), r.type_name()),
            )),
        }
    }

    fn op_compare(&self, op: &str, l: Value, r: Value, f: impl Fn(f64, f64) -> bool) -> ElyResult {
        match (&l, &r) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(f(*a, *b))),
            _ => Err(ElyError::TypeError(
                format!("'{}' between {} and {}", op, l.type_name(), r.type_name()),
            )),
        }
    }

    fn op_logic(&self, op: &str, l: Value, r: Value, f: impl Fn(bool, bool) -> bool) -> ElyResult {
        match (&l, &r) {
            (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(f(*a, *b))),
            _ => Err(ElyError::TypeError(
                format!("'{}' between {} and {}", op, l.type_name(), r.type_name()),
            )),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
