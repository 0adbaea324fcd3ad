pub mod compiler;
pub mod error;
pub mod opcode;
pub mod program;
pub mod stdlib;
pub mod value;
pub mod vm;

pub use compiler::Compiler;
pub use error::{ElyError, ElyResult};
pub use value::Value;
pub use vm::Vm;

/// Compila ed esegue sorgente Ely. Il risultato è il top dello stack
/// all'Halt (Null se lo stack è vuoto).
pub fn run(source: &str) -> ElyResult<Value> {
    let program = Compiler::compile(source)?;
    let mut vm = Vm::new();
    vm.run(program)
}

// ── Test ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn r(src: &str) -> Value {
        match run(src) {
            Ok(v)  => v,
            Err(e) => panic!("ElyError: {}", e),
        }
    }
    fn r_err(src: &str) -> ElyError {
        match run(src) {
            Err(e) => e,
            Ok(v)  => panic!("Expected error, got {:?}", v),
        }
    }
    fn num(src: &str) -> f64 {
        match r(src) {
            Value::Number(n) => n,
            v => panic!("Expected number, got {:?}", v),
        }
    }

    // ── Aritmetica ────────────────────────────────────────────────────────
    #[test] fn t_add()        { assert_eq!(num("1 + 2"), 3.0); }
    #[test] fn t_sub()        { assert_eq!(num("10 - 3"), 7.0); }
    #[test] fn t_mul()        { assert_eq!(num("4 * 5"), 20.0); }
    #[test] fn t_div()        { assert_eq!(num("10 / 4"), 2.5); }
    #[test] fn t_precedence() { assert_eq!(num("1 + 2 * 3"), 7.0); }
    #[test] fn t_grouping()   { assert_eq!(num("(1 + 2) * 3"), 9.0); }
    #[test] fn t_float()      { assert_eq!(num("1.5 + 1.25"), 2.75); }
    #[test] fn t_div_by_zero_is_infinite() { assert!(num("1 / 0").is_infinite()); }
    #[test] fn t_add_type_error() { assert!(matches!(r_err("1 + true"), ElyError::TypeError(_))); }
    #[test] fn t_sub_type_error() { assert!(matches!(r_err("\"a\" - 1"), ElyError::TypeError(_))); }

    // ── Stringhe ──────────────────────────────────────────────────────────
    #[test] fn t_concat()        { assert_eq!(r(r#""ab" + "cd""#), Value::str("abcd")); }
    #[test] fn t_concat_number() { assert_eq!(r(r#""a" + 1"#), Value::str("a1")); }
    #[test] fn t_number_concat() { assert_eq!(r(r#"2 + "b""#), Value::str("2b")); }

    // ── Confronto / logica ────────────────────────────────────────────────
    #[test] fn t_eq()        { assert_eq!(r("1 == 1"), Value::Bool(true)); }
    #[test] fn t_ne()        { assert_eq!(r("1 != 2"), Value::Bool(true)); }
    #[test] fn t_lt()        { assert_eq!(r("1 < 2"), Value::Bool(true)); }
    #[test] fn t_gt()        { assert_eq!(r("2 > 1"), Value::Bool(true)); }
    #[test] fn t_and()       { assert_eq!(r("true and false"), Value::Bool(false)); }
    #[test] fn t_or()        { assert_eq!(r("false or true"), Value::Bool(true)); }
    #[test] fn t_not()       { assert_eq!(r("not true"), Value::Bool(false)); }
    #[test] fn t_str_eq()    { assert_eq!(r(r#""a" == "a""#), Value::Bool(true)); }
    #[test] fn t_eq_mixed_tags_fail() { assert!(matches!(r_err(r#"1 == "1""#), ElyError::TypeError(_))); }
    #[test] fn t_not_strict()         { assert!(matches!(r_err("not 1"), ElyError::TypeError(_))); }
    #[test] fn t_and_strict()         { assert!(matches!(r_err("1 and true"), ElyError::TypeError(_))); }
    #[test] fn t_compare_strict()     { assert!(matches!(r_err(r#""a" < "b""#), ElyError::TypeError(_))); }

    // ── Variabili ─────────────────────────────────────────────────────────
    #[test] fn t_global()          { assert_eq!(num("var x = 42 x"), 42.0); }
    #[test] fn t_global_default()  { assert_eq!(r("var x x"), Value::Null); }
    #[test] fn t_assign()          { assert_eq!(num("var x = 1 x = 2 x"), 2.0); }
    #[test] fn t_undefined()       { assert!(matches!(r_err("foo"), ElyError::UndefinedGlobal(_))); }
    #[test] fn t_assign_undefined(){ assert!(matches!(r_err("y = 1"), ElyError::UndefinedGlobal(_))); }
    #[test] fn t_redefine()        { assert!(matches!(r_err("var x = 1 var x = 2"), ElyError::RedefinedGlobal(_))); }
    #[test] fn t_locals() {
        assert_eq!(num("function f() var a = 1 var b = 2 return a + b end f()"), 3.0);
    }
    #[test] fn t_shadowing() {
        assert_eq!(num("var x = 1 function f() var x = 2 return x end f()"), 2.0);
    }
    #[test] fn t_block_locals_are_popped() {
        assert_eq!(num("var total = 0 var i = 0 while i < 3 do var d = 2 total = total + d i = i + 1 end total"), 6.0);
    }

    // ── Controllo di flusso ───────────────────────────────────────────────
    #[test] fn t_while() {
        assert_eq!(num("var i = 0 while i < 3 do i = i + 1 end i"), 3.0);
    }
    #[test] fn t_if_then()    { assert_eq!(r(r#"if 5 > 3 then "a" end"#), Value::str("a")); }
    #[test] fn t_if_elseif() {
        assert_eq!(
            r(r#"if 5 > 3 then "a" elseif 5 > 4 then "b" else "c" end"#),
            Value::str("a")
        );
    }
    #[test] fn t_elseif_taken() {
        assert_eq!(
            r(r#"if 1 > 3 then "a" elseif 5 > 4 then "b" else "c" end"#),
            Value::str("b")
        );
    }
    #[test] fn t_else_taken() {
        assert_eq!(
            r(r#"if 1 > 3 then "a" elseif 1 > 4 then "b" else "c" end"#),
            Value::str("c")
        );
    }
    #[test] fn t_truthiness_zero()   { assert_eq!(num("if 0 then 1 else 2 end"), 2.0); }
    #[test] fn t_truthiness_string() { assert_eq!(num(r#"if "x" then 1 else 2 end"#), 1.0); }
    #[test] fn t_truthiness_empty()  { assert_eq!(num(r#"if "" then 1 else 2 end"#), 2.0); }
    #[test] fn t_truthiness_null()   { assert_eq!(num("var n if n then 1 else 2 end"), 2.0); }
    #[test] fn t_break() {
        assert_eq!(num("var i = 0 while true do i = i + 1 if i > 4 then break end end i"), 5.0);
    }

    // ── Funzioni ──────────────────────────────────────────────────────────
    #[test] fn t_fn_basic() {
        assert_eq!(num("function add(a, b) return a + b end add(add(10, 2), 2)"), 14.0);
    }
    #[test] fn t_fn_no_return_yields_nothing() {
        assert_eq!(r("function f() end f()"), Value::Null);
    }
    #[test] fn t_fn_bare_return() {
        assert_eq!(r("function f() return end f()"), Value::Null);
    }
    #[test] fn t_fn_recursion() {
        let src = "function fact(n) if n < 2 then return 1 end return n * fact(n - 1) end fact(5)";
        assert_eq!(num(src), 120.0);
    }
    #[test] fn t_fn_anonymous() {
        assert_eq!(num("var add = function(a, b) return a + b end add(2, 3)"), 5.0);
    }
    #[test] fn t_fn_arity() {
        assert!(matches!(
            r_err("function f(a) return a end f(1, 2)"),
            ElyError::ArityMismatch { expected: 1, got: 2, .. }
        ));
    }
    #[test] fn t_fn_not_callable() {
        assert!(matches!(r_err("var x = 1 x()"), ElyError::NotCallable(_)));
    }
    #[test] fn t_stackoverflow() {
        assert!(matches!(r_err("function inf() return inf() end inf()"), ElyError::StackOverflow));
    }
    #[test] fn t_fibonacci() {
        let src = "function fib(n) if n < 2 then return n end return fib(n - 1) + fib(n - 2) end fib(10)";
        assert_eq!(num(src), 55.0);
    }

    // ── Closure ───────────────────────────────────────────────────────────
    #[test] fn t_counter() {
        let src = "function makeCounter() var n = 0 function bump() n = n + 1 return n end return bump end \
                   var c = makeCounter() c() c() c()";
        assert_eq!(num(src), 3.0);
    }
    #[test] fn t_counters_are_independent() {
        let src = "function makeCounter() var n = 0 function bump() n = n + 1 return n end return bump end \
                   var a = makeCounter() var b = makeCounter() a() a() b()";
        assert_eq!(num(src), 1.0);
    }
    #[test] fn t_closures_share_cells() {
        let src = "function pair() var n = 10 function inc() n = n + 1 return n end \
                   function get() return n end return [inc, get] end \
                   var p = pair() p[0]() p[1]()";
        assert_eq!(num(src), 11.0);
    }
    #[test] fn t_upvalue_chain() {
        let src = "function outer() var x = 10 \
                   function middle() function inner() return x end return inner end \
                   return middle end \
                   outer()()()";
        assert_eq!(num(src), 10.0);
    }
    #[test] fn t_upvalue_written_before_close() {
        let src = "function f() var n = 1 function set() n = 99 return n end set() return n end f()";
        assert_eq!(num(src), 99.0);
    }

    // ── Hash table ────────────────────────────────────────────────────────
    #[test] fn t_list_index()    { assert_eq!(num("var xs = [10, 20, 30] xs[1]"), 20.0); }
    #[test] fn t_list_len()      { assert_eq!(num("len([10, 20, 30])"), 3.0); }
    #[test] fn t_list_nested()   { assert_eq!(num("[[1, 2], [3]][0][1]"), 2.0); }
    #[test] fn t_hash_get()      { assert_eq!(num(r#"{"a": 1, "b": 2}["b"]"#), 2.0); }
    #[test] fn t_hash_roundtrip(){ assert_eq!(r(r#"{"k": "v"}["k"]"#), Value::str("v")); }
    #[test] fn t_hash_of_list()  { assert_eq!(num(r#"{"k": [7]}["k"][0]"#), 7.0); }
    #[test] fn t_string_key_for_list() { assert_eq!(num(r#"var xs = [5, 6] xs["1"]"#), 6.0); }
    #[test] fn t_empty_list_len(){ assert_eq!(num("len([])"), 0.0); }
    #[test] fn t_key_not_found() { assert!(matches!(r_err(r#"{}["missing"]"#), ElyError::KeyNotFound(_))); }
    #[test] fn t_index_out_of_range() { assert!(matches!(r_err("[1, 2][5]"), ElyError::KeyNotFound(_))); }
    #[test] fn t_index_non_table()    { assert!(matches!(r_err("1[0]"), ElyError::TypeError(_))); }
    #[test] fn t_tables_compare_structurally() {
        assert_eq!(r("[1, 2] == [1, 2]"), Value::Bool(true));
        assert_eq!(r("[1, 2] == [1, 3]"), Value::Bool(false));
    }

    // ── Built-in ──────────────────────────────────────────────────────────
    #[test] fn t_str_number()   { assert_eq!(r("str(42)"), Value::str("42")); }
    #[test] fn t_str_fraction() { assert_eq!(r("str(1.5)"), Value::str("1.5")); }
    #[test] fn t_str_bool()     { assert_eq!(r("str(true)"), Value::str("true")); }
    #[test] fn t_str_null_fails(){ assert!(matches!(r_err("var n str(n)"), ElyError::TypeError(_))); }
    #[test] fn t_len_non_table(){ assert!(matches!(r_err("len(1)"), ElyError::TypeError(_))); }
    #[test] fn t_len_arity()    { assert!(matches!(r_err("len()"), ElyError::ArityMismatch { .. })); }
    #[test] fn t_print_yields_nothing() {
        // print ritorna Null: non resta niente sullo stack
        assert_eq!(r("print(1, 2)"), Value::Null);
    }
    #[test] fn t_natives_are_globals() {
        assert!(matches!(r("print"), Value::NativeFn(_)));
    }
    #[test] fn t_native_redefine_fails() {
        assert!(matches!(r_err("var print = 1"), ElyError::RedefinedGlobal(_)));
    }

    // ── Scenari ───────────────────────────────────────────────────────────
    #[test] fn t_scenario_arith() { assert_eq!(num("var x = 1 + 2 * 3 x"), 7.0); }
    #[test] fn t_scenario_while() { assert_eq!(num("var i = 0 while i < 3 do i = i + 1 end i"), 3.0); }
    #[test] fn t_scenario_comments() {
        assert_eq!(num("# intestazione\nvar x = 1 # inline\nx"), 1.0);
    }
    #[test] fn t_scenario_str_roundtrip() {
        // str(n) seguito da parsing numerico restituisce n
        for src in ["str(7)", "str(12.25)", "str(0.5)"] {
            let text = match r(src) {
                Value::Str(s) => s.to_string(),
                v => panic!("Expected string, got {:?}", v),
            };
            let n = num(&src[4..src.len() - 1]);
            assert_eq!(text.parse::<f64>().unwrap(), n);
        }
    }

    // ── Errori di compilazione ────────────────────────────────────────────
    #[test] fn t_compile_error_unexpected_token() {
        assert!(matches!(r_err("var = 1"), ElyError::CompileFailed(_)));
    }
    #[test] fn t_compile_error_missing_end() {
        assert!(matches!(r_err("while true do"), ElyError::CompileFailed(_)));
    }
    #[test] fn t_compile_error_lexical() {
        assert!(matches!(r_err("var x = @"), ElyError::CompileFailed(_)));
    }
}
