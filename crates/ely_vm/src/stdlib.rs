use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::value::{NativeFn, Value};

/// Registra i built-in come globali. `None` come arietà = variadica;
/// un risultato Null non viene pushato dalla VM.
pub fn register_globals(globals: &mut FxHashMap<String, Value>) {
    macro_rules! reg {
        ($name:expr, $arity:expr, $fn:expr) => {
            globals.insert(
                $name.to_string(),
                Value::NativeFn(Rc::new(NativeFn {
                    name: $name.to_string(),
                    arity: $arity,
                    func: $fn,
                })),
            );
        };
    }
    reg!("print",     None,    ely_print);
    reg!("read_line", Some(0), ely_read_line);
    reg!("str",       Some(1), ely_str);
    reg!("len",       Some(1), ely_len);
}

fn ely_print(args: &[Value]) -> Result<Value, String> {
    println!("{}", args.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" "));
    Ok(Value::Null)
}

fn ely_read_line(_args: &[Value]) -> Result<Value, String> {
    let mut line = String::new();
    std::io::stdin().read_line(&mut line).map_err(|e| e.to_string())?;
    Ok(Value::str(line.trim_end_matches('\n').trim_end_matches('\r')))
}

fn ely_str(args: &[Value]) -> Result<Value, String> {
    match args.first() {
        Some(Value::Null) => Err("str() on null".into()),
        Some(v) => Ok(Value::str(v.to_string())),
        None => Err("str() requires 1 argument".into()),
    }
}

fn ely_len(args: &[Value]) -> Result<Value, String> {
    match args.first() {
        Some(Value::Table(t)) => Ok(Value::Number(t.borrow().len() as f64)),
        Some(v) => Err(format!("len() not supported for {}", v.type_name())),
        None => Err("len() requires 1 argument".into()),
    }
}
