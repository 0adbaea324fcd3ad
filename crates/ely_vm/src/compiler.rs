use std::rc::Rc;

use ely_lexer::{Lexer, Span, Token, TokenKind};

use crate::error::ElyError;
use crate::opcode::Op;
use crate::program::{FnProto, Program};
use crate::value::Value;

/// Risultato interno del compilatore: l'errore è la diagnostica già
/// renderizzata (riga + caret) dal percorso "fatal".
type CResult<T> = Result<T, String>;

// ── Precedenze ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prec {
    None,
    Assignment,
    Equality,
    Logical,
    Comparison,
    Sum,
    Product,
    Unary,
    Call,
}

fn infix_prec(kind: &TokenKind) -> Prec {
    match kind {
        TokenKind::Equal                                 => Prec::Assignment,
        TokenKind::EqualEqual | TokenKind::BangEqual     => Prec::Equality,
        TokenKind::And | TokenKind::Or                   => Prec::Logical,
        TokenKind::Greater | TokenKind::Less             => Prec::Comparison,
        TokenKind::Plus | TokenKind::Minus               => Prec::Sum,
        TokenKind::Star | TokenKind::Slash               => Prec::Product,
        TokenKind::LParen | TokenKind::LSquare           => Prec::Call,
        _                                                => Prec::None,
    }
}

fn has_infix(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::EqualEqual | TokenKind::BangEqual
        | TokenKind::And | TokenKind::Or
        | TokenKind::Greater | TokenKind::Less
        | TokenKind::Plus | TokenKind::Minus
        | TokenKind::Star | TokenKind::Slash
        | TokenKind::LParen | TokenKind::LSquare
    )
}

fn has_prefix(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Number(_) | TokenKind::String(_) | TokenKind::Identifier(_)
        | TokenKind::True | TokenKind::False
        | TokenKind::LSquare | TokenKind::LCurly
        | TokenKind::Not | TokenKind::Function | TokenKind::LParen
    )
}

// ── Scope tracking ────────────────────────────────────────────────────────

/// Variabile locale: l'indice nel vettore è lo slot nello stack frame.
#[derive(Debug, Clone)]
struct Local {
    name: String,
    depth: usize,
}

/// Un upvalue visto dal compilatore.
#[derive(Debug, Clone, Copy)]
struct UpvalueDef {
    index: u8,
    is_local: bool,
}

/// Contesto di compilazione di una singola funzione (o dello script
/// top-level). I contesti annidati condividono lexer e cursore dei token
/// attraverso il Compiler che li possiede.
struct FnCtx {
    program: Program,
    locals: Vec<Local>,
    upvalues: Vec<UpvalueDef>,
    scope_depth: usize,
    /// Liste di offset da patchare con l'uscita del loop corrente.
    breaks: Vec<Vec<usize>>,
}

impl FnCtx {
    fn script() -> Self {
        FnCtx {
            program: Program::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 0,
            breaks: Vec::new(),
        }
    }

    fn function(name: &str) -> Self {
        let mut ctx = FnCtx {
            program: Program::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            scope_depth: 1,
            breaks: Vec::new(),
        };
        // lo slot 0 del frame è la funzione stessa: darle il suo nome
        // permette al corpo di riferirsi a sé
        ctx.locals.push(Local { name: name.to_string(), depth: 0 });
        ctx
    }
}

/// Bersaglio risolto di un identificatore.
enum VarRef {
    Local(u8),
    Upvalue(u8),
    Global(u16),
}

// ── Compiler ──────────────────────────────────────────────────────────────

pub struct Compiler {
    lexer: Lexer,
    current: Token,
    previous: Token,
    /// Contesti funzione, dal top-level (indice 0) al più interno.
    ctxs: Vec<FnCtx>,
    /// Diagnostica raccolta durante la compilazione.
    diagnostics: Vec<String>,
}

impl Compiler {
    // ── Entry point ───────────────────────────────────────────────────────

    pub fn compile(source: &str) -> Result<Program, ElyError> {
        let mut lexer = Lexer::new(source);
        let current = lexer.next_token();
        let mut c = Compiler {
            lexer,
            previous: Token::new(TokenKind::Eof, Span::new(1, 1), ""),
            current,
            ctxs: vec![FnCtx::script()],
            diagnostics: Vec::new(),
        };

        while !matches!(c.current.kind, TokenKind::Eof) {
            if let Err(diag) = c.statement() {
                c.diagnostics.push(diag);
                c.synchronize();
            }
        }
        let line = c.current.span.line;
        c.ctx().program.emit(Op::Halt, line);

        if c.diagnostics.is_empty() {
            Ok(c.ctxs.pop().unwrap().program)
        } else {
            Err(ElyError::CompileFailed(c.diagnostics))
        }
    }

    // ── Cursore dei token ─────────────────────────────────────────────────

    fn bump(&mut self) {
        self.previous = std::mem::replace(&mut self.current, self.lexer.next_token());
    }

    fn advance(&mut self) -> CResult<()> {
        self.bump();
        if let TokenKind::Error(msg) = &self.current.kind {
            let msg = msg.clone();
            return Err(self.fatal_at_current(&msg));
        }
        Ok(())
    }

    fn check(&self, kind: &TokenKind) -> bool {
        std::mem::discriminant(&self.current.kind) == std::mem::discriminant(kind)
    }

    fn match_token(&mut self, kind: &TokenKind) -> CResult<bool> {
        if self.check(kind) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: &TokenKind, what: &str) -> CResult<()> {
        if self.check(kind) {
            self.advance()
        } else {
            Err(self.fatal_at_current(&format!("expected {} but found {}", what, describe(&self.current))))
        }
    }

    fn expect_identifier(&mut self) -> CResult<String> {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            self.advance()?;
            Ok(name)
        } else {
            Err(self.fatal_at_current(&format!("identifier expected, found {}", describe(&self.current))))
        }
    }

    /// Dopo un errore irreversibile in uno statement: scarta token fino
    /// all'inizio di uno statement, o appena oltre un do/then.
    fn synchronize(&mut self) {
        loop {
            match self.current.kind {
                TokenKind::Eof
                | TokenKind::Var | TokenKind::While | TokenKind::If
                | TokenKind::Function | TokenKind::Return | TokenKind::Break => break,
                TokenKind::Do | TokenKind::Then => { self.bump(); break; }
                _ => { self.bump(); }
            }
        }
    }

    // ── Percorso fatal ────────────────────────────────────────────────────

    fn fatal_at_current(&self, message: &str) -> String {
        self.lexer.flagrant(self.current.span.line, self.current.span.column, message)
    }

    fn fatal_at_previous(&self, message: &str) -> String {
        self.lexer.flagrant(self.previous.span.line, self.previous.span.column, message)
    }

    // ── Contesti ──────────────────────────────────────────────────────────

    fn ctx(&mut self) -> &mut FnCtx {
        self.ctxs.last_mut().unwrap()
    }

    fn ctx_ref(&self) -> &FnCtx {
        self.ctxs.last().unwrap()
    }

    // ── Statement ─────────────────────────────────────────────────────────

    fn statement(&mut self) -> CResult<()> {
        match self.current.kind {
            TokenKind::Error(ref msg) => {
                let msg = msg.clone();
                Err(self.fatal_at_current(&msg))
            }
            TokenKind::Var => self.var_statement(),
            TokenKind::While => self.while_statement(),
            TokenKind::If => {
                self.advance()?;
                self.if_statement()
            }
            TokenKind::Function => self.function_statement(),
            TokenKind::Return => self.return_statement(),
            TokenKind::Break => self.break_statement(),
            _ => self.expression(),
        }
    }

    fn var_statement(&mut self) -> CResult<()> {
        self.advance()?; // 'var'
        let line = self.previous.span.line;
        let name = self.expect_identifier()?;
        if self.match_token(&TokenKind::Equal)? {
            self.expression()?;
        } else {
            self.ctx().program.emit(Op::Null, line);
        }
        self.define_variable(&name, line)
    }

    fn define_variable(&mut self, name: &str, line: usize) -> CResult<()> {
        if self.ctx_ref().scope_depth == 0 {
            let ctx = self.ctx();
            let idx = ctx.program.add_name(name);
            ctx.program.emit(Op::DefineGlobal, line);
            ctx.program.emit_u16(idx);
        } else {
            if self.ctx_ref().locals.len() >= 256 {
                return Err(self.fatal_at_previous("too many local variables in this function"));
            }
            let depth = self.ctx_ref().scope_depth;
            // il valore è già sullo stack: lo slot è la posizione corrente
            self.ctx().locals.push(Local { name: name.to_string(), depth });
        }
        Ok(())
    }

    fn while_statement(&mut self) -> CResult<()> {
        self.advance()?; // 'while'
        let line = self.previous.span.line;
        self.ctx().breaks.push(Vec::new());

        let loop_start = self.ctx_ref().program.code.len();
        self.expression()?;
        self.expect(&TokenKind::Do, "'do'")?;
        let exit_patch = self.ctx().program.emit_jump(Op::JumpIfFalse, line);

        self.begin_scope();
        while !self.check(&TokenKind::End) && !self.check(&TokenKind::Eof) {
            self.statement()?;
        }
        let end_line = self.current.span.line;
        self.expect(&TokenKind::End, "'end'")?;
        self.end_scope(end_line)?;

        self.ctx().program.emit_jump_to(loop_start, end_line);
        self.ctx().program.patch_jump(exit_patch);

        let breaks = self.ctx().breaks.pop().unwrap();
        for patch in breaks {
            self.ctx().program.patch_jump(patch);
        }
        Ok(())
    }

    /// Compila a partire dalla condizione ('if' o 'elseif' già consumato).
    /// La ricorsione sugli elseif consuma anche l''end' finale.
    fn if_statement(&mut self) -> CResult<()> {
        let line = self.previous.span.line;
        self.expression()?;
        self.expect(&TokenKind::Then, "'then'")?;
        let then_patch = self.ctx().program.emit_jump(Op::JumpIfFalse, line);

        self.begin_scope();
        while !matches!(
            self.current.kind,
            TokenKind::End | TokenKind::Else | TokenKind::ElseIf | TokenKind::Eof
        ) {
            self.statement()?;
        }
        let branch_line = self.current.span.line;
        self.end_scope(branch_line)?;

        match self.current.kind {
            TokenKind::ElseIf => {
                let end_patch = self.ctx().program.emit_jump(Op::Jump, branch_line);
                self.ctx().program.patch_jump(then_patch);
                self.advance()?; // 'elseif'
                self.if_statement()?;
                self.ctx().program.patch_jump(end_patch);
            }
            TokenKind::Else => {
                let end_patch = self.ctx().program.emit_jump(Op::Jump, branch_line);
                self.ctx().program.patch_jump(then_patch);
                self.advance()?; // 'else'
                self.begin_scope();
                while !matches!(self.current.kind, TokenKind::End | TokenKind::Eof) {
                    self.statement()?;
                }
                let else_line = self.current.span.line;
                self.end_scope(else_line)?;
                self.expect(&TokenKind::End, "'end'")?;
                self.ctx().program.patch_jump(end_patch);
            }
            _ => {
                self.expect(&TokenKind::End, "'end'")?;
                self.ctx().program.patch_jump(then_patch);
            }
        }
        Ok(())
    }

    fn function_statement(&mut self) -> CResult<()> {
        self.advance()?; // 'function'
        let line = self.previous.span.line;
        let name = self.expect_identifier()?;
        self.function_body(&name, line)?;
        self.define_variable(&name, line)
    }

    fn return_statement(&mut self) -> CResult<()> {
        self.advance()?; // 'return'
        let line = self.previous.span.line;
        if self.ctxs.len() == 1 {
            return Err(self.fatal_at_previous("'return' outside of a function"));
        }
        // senza terminatori di statement, un return nudo si riconosce dal
        // token che segue: fine del blocco o inizio di un altro statement
        let bare = matches!(
            self.current.kind,
            TokenKind::End | TokenKind::Else | TokenKind::ElseIf | TokenKind::Eof
            | TokenKind::Var | TokenKind::While | TokenKind::If
            | TokenKind::Function | TokenKind::Return | TokenKind::Break
        );
        if !bare {
            self.expression()?;
        }
        let ctx = self.ctx();
        ctx.program.emit(Op::Return, line);
        ctx.program.emit_u8(if bare { 0 } else { 1 });
        Ok(())
    }

    fn break_statement(&mut self) -> CResult<()> {
        self.advance()?; // 'break'
        let line = self.previous.span.line;
        if self.ctx_ref().breaks.is_empty() {
            return Err(self.fatal_at_previous("'break' outside of a loop"));
        }
        let patch = self.ctx().program.emit_jump(Op::Jump, line);
        self.ctx().breaks.last_mut().unwrap().push(patch);
        Ok(())
    }

    // ── Scope ─────────────────────────────────────────────────────────────

    fn begin_scope(&mut self) {
        self.ctx().scope_depth += 1;
    }

    fn end_scope(&mut self, line: usize) -> CResult<()> {
        if self.ctx_ref().scope_depth == 0 {
            return Err(self.fatal_at_previous("ended a scope with no parent"));
        }
        let ctx = self.ctx();
        let depth = ctx.scope_depth;
        let count = ctx.locals.iter().rev().take_while(|l| l.depth == depth).count();
        // un Pop per ogni local dichiarato nello scope
        for _ in 0..count {
            ctx.locals.pop();
            ctx.program.emit(Op::Pop, line);
        }
        ctx.scope_depth -= 1;
        Ok(())
    }

    // ── Funzioni ──────────────────────────────────────────────────────────

    /// Compila `(params) … end` in un contesto annidato ed emette
    /// `Closure <proto>` seguito dalle coppie upvalue nel contesto esterno.
    fn function_body(&mut self, name: &str, line: usize) -> CResult<()> {
        self.ctxs.push(FnCtx::function(name));

        self.expect(&TokenKind::LParen, "'('")?;
        let mut arity = 0usize;
        if !self.check(&TokenKind::RParen) {
            loop {
                let param = self.expect_identifier()?;
                arity += 1;
                // i parametri occupano slot locali: stesso limite u8 di define_variable
                if self.ctx_ref().locals.len() >= 256 {
                    return Err(self.fatal_at_previous("too many parameters in this function"));
                }
                self.ctx().locals.push(Local { name: param, depth: 1 });
                if !self.match_token(&TokenKind::Comma)? { break; }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;

        while !self.check(&TokenKind::End) && !self.check(&TokenKind::Eof) {
            self.statement()?;
        }
        let end_line = self.current.span.line;
        self.expect(&TokenKind::End, "'end'")?;

        // Return implicito in coda a ogni corpo
        {
            let ctx = self.ctx();
            ctx.program.emit(Op::Return, end_line);
            ctx.program.emit_u8(0);
        }

        let ctx = self.ctxs.pop().unwrap();
        let proto = Rc::new(FnProto {
            name: name.to_string(),
            arity,
            upvalue_count: ctx.upvalues.len(),
            program: Rc::new(ctx.program),
        });

        let outer = self.ctx();
        let idx = outer.program.add_proto(proto);
        outer.program.emit(Op::Closure, line);
        outer.program.emit_u16(idx);
        for up in &ctx.upvalues {
            outer.program.emit_u8(up.is_local as u8);
            outer.program.emit_u8(up.index);
        }
        Ok(())
    }

    // ── Espressioni (Pratt) ───────────────────────────────────────────────

    fn expression(&mut self) -> CResult<()> {
        self.parse_precedence(Prec::Assignment)
    }

    fn parse_precedence(&mut self, prec: Prec) -> CResult<()> {
        let can_assign = prec <= Prec::Assignment;
        if !has_prefix(&self.current.kind) {
            return Err(self.fatal_at_current(&format!("unexpected token {}", describe(&self.current))));
        }
        self.advance()?;
        self.prefix(can_assign)?;

        while has_infix(&self.current.kind) && infix_prec(&self.current.kind) >= prec {
            self.advance()?;
            self.infix()?;
        }

        if can_assign && matches!(self.current.kind, TokenKind::Equal) {
            return Err(self.fatal_at_current("invalid assignment target"));
        }
        Ok(())
    }

    fn prefix(&mut self, can_assign: bool) -> CResult<()> {
        let line = self.previous.span.line;
        match self.previous.kind.clone() {
            TokenKind::Number(text) => self.number(&text, line),
            TokenKind::String(text) => {
                let p = &mut self.ctx().program;
                let idx = p.add_const(Value::str(text));
                p.emit(Op::Const, line);
                p.emit_u16(idx);
                Ok(())
            }
            TokenKind::True | TokenKind::False => {
                let value = matches!(self.previous.kind, TokenKind::True);
                let p = &mut self.ctx().program;
                let idx = p.add_const(Value::Bool(value));
                p.emit(Op::Const, line);
                p.emit_u16(idx);
                Ok(())
            }
            TokenKind::Identifier(name) => self.named_variable(&name, can_assign, line),
            TokenKind::LSquare => self.list_literal(line),
            TokenKind::LCurly => self.hash_literal(line),
            TokenKind::Not => {
                self.parse_precedence(Prec::Unary)?;
                self.ctx().program.emit(Op::Not, line);
                Ok(())
            }
            TokenKind::Function => self.function_body("<anonymous>", line),
            TokenKind::LParen => {
                self.expression()?;
                self.expect(&TokenKind::RParen, "')'")
            }
            _ => Err(self.fatal_at_previous(&format!("unexpected token {}", describe(&self.previous)))),
        }
    }

    fn infix(&mut self) -> CResult<()> {
        let line = self.previous.span.line;
        match self.previous.kind.clone() {
            TokenKind::LParen => self.call(line),
            TokenKind::LSquare => self.subscript(line),
            op => self.binary(op, line),
        }
    }

    fn number(&mut self, text: &str, line: usize) -> CResult<()> {
        let value: f64 = match text.parse() {
            Ok(v) => v,
            Err(_) => return Err(self.fatal_at_previous(&format!("invalid number '{}'", text))),
        };
        let p = &mut self.ctx().program;
        let idx = p.add_const(Value::Number(value));
        p.emit(Op::Const, line);
        p.emit_u16(idx);
        Ok(())
    }

    /// Accesso o assegnazione a variabile, a seconda del contesto
    /// sintattico (pattern dell'handler per Equal).
    fn named_variable(&mut self, name: &str, can_assign: bool, line: usize) -> CResult<()> {
        let target = self.resolve(name)?;
        let assign = can_assign && self.check(&TokenKind::Equal);
        if assign {
            self.advance()?; // '='
            self.parse_precedence(Prec::Assignment)?;
        }
        let p = &mut self.ctx().program;
        match (target, assign) {
            (VarRef::Local(slot), true)    => { p.emit(Op::SetLocal, line); p.emit_u8(slot); }
            (VarRef::Local(slot), false)   => { p.emit(Op::GetLocal, line); p.emit_u8(slot); }
            (VarRef::Upvalue(idx), true)   => { p.emit(Op::SetUpvalue, line); p.emit_u8(idx); }
            (VarRef::Upvalue(idx), false)  => { p.emit(Op::GetUpvalue, line); p.emit_u8(idx); }
            (VarRef::Global(idx), true)    => { p.emit(Op::SetGlobal, line); p.emit_u16(idx); }
            (VarRef::Global(idx), false)   => { p.emit(Op::GetGlobal, line); p.emit_u16(idx); }
        }
        Ok(())
    }

    // ── Risoluzione identificatori ────────────────────────────────────────

    /// Ordine: local del contesto corrente, poi catena di upvalue nei
    /// contesti racchiudenti, altrimenti globale.
    fn resolve(&mut self, name: &str) -> CResult<VarRef> {
        let top = self.ctxs.len() - 1;
        if let Some(slot) = self.resolve_local(top, name) {
            return Ok(VarRef::Local(slot));
        }
        if let Some(idx) = self.resolve_upvalue(top, name)? {
            return Ok(VarRef::Upvalue(idx));
        }
        let idx = self.ctx().program.add_name(name);
        Ok(VarRef::Global(idx))
    }

    fn resolve_local(&self, ctx: usize, name: &str) -> Option<u8> {
        self.ctxs[ctx].locals.iter().enumerate().rev()
            .find(|(_, l)| l.name == name)
            .map(|(i, _)| i as u8)
    }

    fn resolve_upvalue(&mut self, ctx: usize, name: &str) -> CResult<Option<u8>> {
        if ctx == 0 {
            return Ok(None);
        }
        let parent = ctx - 1;
        if let Some(slot) = self.resolve_local(parent, name) {
            return Ok(Some(self.add_upvalue(ctx, slot, true)?));
        }
        if let Some(idx) = self.resolve_upvalue(parent, name)? {
            return Ok(Some(self.add_upvalue(ctx, idx, false)?));
        }
        Ok(None)
    }

    fn add_upvalue(&mut self, ctx: usize, index: u8, is_local: bool) -> CResult<u8> {
        if let Some(i) = self.ctxs[ctx].upvalues.iter()
            .position(|u| u.index == index && u.is_local == is_local)
        {
            return Ok(i as u8);
        }
        if self.ctxs[ctx].upvalues.len() >= 256 {
            return Err(self.fatal_at_previous("too many captured variables in this function"));
        }
        self.ctxs[ctx].upvalues.push(UpvalueDef { index, is_local });
        Ok((self.ctxs[ctx].upvalues.len() - 1) as u8)
    }

    // ── Operatori ─────────────────────────────────────────────────────────

    fn binary(&mut self, op: TokenKind, line: usize) -> CResult<()> {
        self.parse_precedence(infix_prec(&op))?;
        let p = &mut self.ctx().program;
        match op {
            TokenKind::Plus       => { p.emit(Op::Add, line); }
            TokenKind::Minus      => { p.emit(Op::Sub, line); }
            TokenKind::Star       => { p.emit(Op::Multiply, line); }
            TokenKind::Slash      => { p.emit(Op::Divide, line); }
            TokenKind::Greater    => { p.emit(Op::Greater, line); }
            TokenKind::Less       => { p.emit(Op::Less, line); }
            TokenKind::EqualEqual => { p.emit(Op::Equal, line); }
            TokenKind::BangEqual  => { p.emit(Op::Equal, line); p.emit(Op::Not, line); }
            TokenKind::And        => { p.emit(Op::And, line); }
            TokenKind::Or         => { p.emit(Op::Or, line); }
            other => return Err(self.fatal_at_previous(&format!("invalid operator '{:?}'", other))),
        }
        Ok(())
    }

    // ── Chiamate e subscript ──────────────────────────────────────────────

    fn call(&mut self, line: usize) -> CResult<()> {
        let mut argc = 0usize;
        if !self.check(&TokenKind::RParen) {
            loop {
                self.expression()?;
                argc += 1;
                if !self.match_token(&TokenKind::Comma)? { break; }
            }
        }
        self.expect(&TokenKind::RParen, "')'")?;
        if argc > 255 {
            return Err(self.fatal_at_previous("too many arguments (max 255)"));
        }
        let p = &mut self.ctx().program;
        p.emit(Op::Call, line);
        p.emit_u8(argc as u8);
        Ok(())
    }

    fn subscript(&mut self, line: usize) -> CResult<()> {
        self.expression()?;
        self.expect(&TokenKind::RSquare, "']'")?;
        self.ctx().program.emit(Op::GetHT, line);
        Ok(())
    }

    // ── Literal composti ──────────────────────────────────────────────────

    /// `[a, b, …]` → coppie ("0", a), ("1", b), … + CreateHT
    fn list_literal(&mut self, line: usize) -> CResult<()> {
        let mut count = 0usize;
        if !self.check(&TokenKind::RSquare) {
            loop {
                {
                    let p = &mut self.ctx().program;
                    let key = p.add_const(Value::str(count.to_string()));
                    p.emit(Op::Const, line);
                    p.emit_u16(key);
                }
                self.expression()?;
                count += 1;
                if !self.match_token(&TokenKind::Comma)? { break; }
            }
        }
        self.expect(&TokenKind::RSquare, "']'")?;
        let p = &mut self.ctx().program;
        p.emit(Op::CreateHT, line);
        p.emit_u16(count as u16);
        Ok(())
    }

    /// `{"k": e, …}` → coppie (chiave, valore) + CreateHT
    fn hash_literal(&mut self, line: usize) -> CResult<()> {
        let mut count = 0usize;
        if !self.check(&TokenKind::RCurly) {
            loop {
                let key = match &self.current.kind {
                    TokenKind::String(s) => s.clone(),
                    _ => return Err(self.fatal_at_current(&format!(
                        "expected string key but found {}", describe(&self.current)
                    ))),
                };
                let key_line = self.current.span.line;
                self.advance()?;
                {
                    let p = &mut self.ctx().program;
                    let idx = p.add_const(Value::str(key));
                    p.emit(Op::Const, key_line);
                    p.emit_u16(idx);
                }
                self.expect(&TokenKind::Colon, "':'")?;
                self.expression()?;
                count += 1;
                if !self.match_token(&TokenKind::Comma)? { break; }
            }
        }
        self.expect(&TokenKind::RCurly, "'}'")?;
        let p = &mut self.ctx().program;
        p.emit(Op::CreateHT, line);
        p.emit_u16(count as u16);
        Ok(())
    }
}

fn describe(token: &Token) -> String {
    match &token.kind {
        TokenKind::Eof => "end of input".to_string(),
        _ => format!("'{}'", token.lexeme),
    }
}

// ── Test ──────────────────────────────────────────────────────────────────
