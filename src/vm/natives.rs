//! Host functions exposed to scripts through `using` imports.
//!
//! Each module installs a fixed set of natives into the global namespace;
//! `using "math";` makes `abs`, `sqrt`, and friends callable by name.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use super::value::{NativeFn, Obj, ObjNative, Value};

/// Install `module`'s natives as globals. Returns false for a module name
/// the runtime does not know; the caller turns that into a runtime error.
pub fn install(module: &str, globals: &mut HashMap<String, Value>) -> bool {
    match module {
        "fs" => {
            define(globals, "read_file", fs_read_file);
            define(globals, "write_file", fs_write_file);
            define(globals, "file_exists", fs_file_exists);
        }
        "math" => {
            define(globals, "abs", math_abs);
            define(globals, "floor", math_floor);
            define(globals, "ceil", math_ceil);
            define(globals, "sqrt", math_sqrt);
            define(globals, "pow", math_pow);
            define(globals, "min", math_min);
            define(globals, "max", math_max);
        }
        "std" => {
            define(globals, "clock", std_clock);
            define(globals, "len", std_len);
            define(globals, "str", std_str);
            define(globals, "num", std_num);
        }
        "logger" => {
            define(globals, "log_info", logger_info);
            define(globals, "log_warn", logger_warn);
            define(globals, "log_error", logger_error);
        }
        _ => return false,
    }
    true
}

fn define(globals: &mut HashMap<String, Value>, name: &'static str, function: NativeFn) {
    let native = ObjNative { name, function };
    globals.insert(name.to_string(), Value::Obj(Obj::Native(Rc::new(native))));
}

// ---- argument plumbing ------------------------------------------------------

fn check_arity(name: &str, args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!(
            "{}() expects {} argument(s) but got {}.",
            name,
            expected,
            args.len()
        ));
    }
    Ok(())
}

fn number_arg(name: &str, args: &[Value], index: usize) -> Result<f64, String> {
    args[index]
        .as_number()
        .ok_or_else(|| format!("{}() expects a number, got {}.", name, args[index].type_name()))
}

fn string_arg<'a>(name: &str, args: &'a [Value], index: usize) -> Result<&'a str, String> {
    args[index]
        .as_str()
        .ok_or_else(|| format!("{}() expects a string, got {}.", name, args[index].type_name()))
}

fn unary_math(name: &str, args: &[Value], op: fn(f64) -> f64) -> Result<Value, String> {
    check_arity(name, args, 1)?;
    Ok(Value::Number(op(number_arg(name, args, 0)?)))
}

fn binary_math(name: &str, args: &[Value], op: fn(f64, f64) -> f64) -> Result<Value, String> {
    check_arity(name, args, 2)?;
    let a = number_arg(name, args, 0)?;
    let b = number_arg(name, args, 1)?;
    Ok(Value::Number(op(a, b)))
}

// ---- fs ---------------------------------------------------------------------

fn fs_read_file(args: &[Value]) -> Result<Value, String> {
    check_arity("read_file", args, 1)?;
    let path = string_arg("read_file", args, 0)?;
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Could not read file '{}': {}.", path, e))?;
    Ok(Value::string(&contents))
}

fn fs_write_file(args: &[Value]) -> Result<Value, String> {
    check_arity("write_file", args, 2)?;
    let path = string_arg("write_file", args, 0)?;
    let contents = string_arg("write_file", args, 1)?;
    fs::write(path, contents).map_err(|e| format!("Could not write file '{}': {}.", path, e))?;
    Ok(Value::Nil)
}

fn fs_file_exists(args: &[Value]) -> Result<Value, String> {
    check_arity("file_exists", args, 1)?;
    let path = string_arg("file_exists", args, 0)?;
    Ok(Value::Bool(Path::new(path).exists()))
}

// ---- math -------------------------------------------------------------------

fn math_abs(args: &[Value]) -> Result<Value, String> {
    unary_math("abs", args, f64::abs)
}

fn math_floor(args: &[Value]) -> Result<Value, String> {
    unary_math("floor", args, f64::floor)
}

fn math_ceil(args: &[Value]) -> Result<Value, String> {
    unary_math("ceil", args, f64::ceil)
}

fn math_sqrt(args: &[Value]) -> Result<Value, String> {
    unary_math("sqrt", args, f64::sqrt)
}

fn math_pow(args: &[Value]) -> Result<Value, String> {
    binary_math("pow", args, f64::powf)
}

fn math_min(args: &[Value]) -> Result<Value, String> {
    binary_math("min", args, f64::min)
}

fn math_max(args: &[Value]) -> Result<Value, String> {
    binary_math("max", args, f64::max)
}

// ---- std --------------------------------------------------------------------

fn std_clock(args: &[Value]) -> Result<Value, String> {
    check_arity("clock", args, 0)?;
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| format!("clock() failed: {}.", e))?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}

fn std_len(args: &[Value]) -> Result<Value, String> {
    check_arity("len", args, 1)?;
    let s = string_arg("len", args, 0)?;
    Ok(Value::Number(s.chars().count() as f64))
}

fn std_str(args: &[Value]) -> Result<Value, String> {
    check_arity("str", args, 1)?;
    Ok(Value::string(&args[0].to_string()))
}

fn std_num(args: &[Value]) -> Result<Value, String> {
    check_arity("num", args, 1)?;
    let s = string_arg("num", args, 0)?;
    s.trim()
        .parse::<f64>()
        .map(Value::Number)
        .map_err(|_| format!("num() could not convert '{}' to a number.", s))
}

// ---- logger -----------------------------------------------------------------

fn logger_info(args: &[Value]) -> Result<Value, String> {
    log_with_level("log_info", "INFO", args)
}

fn logger_warn(args: &[Value]) -> Result<Value, String> {
    log_with_level("log_warn", "WARN", args)
}

fn logger_error(args: &[Value]) -> Result<Value, String> {
    log_with_level("log_error", "ERROR", args)
}

fn log_with_level(name: &str, level: &str, args: &[Value]) -> Result<Value, String> {
    check_arity(name, args, 1)?;
    eprintln!("[{}] {}", level, args[0]);
    Ok(Value::Nil)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module_names(module: &str) -> Vec<String> {
        let mut globals = HashMap::new();
        assert!(install(module, &mut globals));
        let mut names: Vec<String> = globals.into_keys().collect();
        names.sort();
        names
    }

    #[test]
    fn test_each_module_installs_its_natives() {
        assert_eq!(
            module_names("fs"),
            vec!["file_exists", "read_file", "write_file"]
        );
        assert_eq!(
            module_names("math"),
            vec!["abs", "ceil", "floor", "max", "min", "pow", "sqrt"]
        );
        assert_eq!(module_names("std"), vec!["clock", "len", "num", "str"]);
        assert_eq!(
            module_names("logger"),
            vec!["log_error", "log_info", "log_warn"]
        );
    }

    #[test]
    fn test_unknown_module_is_rejected() {
        let mut globals = HashMap::new();
        assert!(!install("net", &mut globals));
        assert!(globals.is_empty());
    }

    #[test]
    fn test_math_natives() {
        assert_eq!(math_abs(&[Value::Number(-5.0)]).unwrap(), Value::Number(5.0));
        assert_eq!(
            math_floor(&[Value::Number(2.7)]).unwrap(),
            Value::Number(2.0)
        );
        assert_eq!(math_ceil(&[Value::Number(2.1)]).unwrap(), Value::Number(3.0));
        assert_eq!(math_sqrt(&[Value::Number(9.0)]).unwrap(), Value::Number(3.0));
        assert_eq!(
            math_pow(&[Value::Number(2.0), Value::Number(8.0)]).unwrap(),
            Value::Number(256.0)
        );
        assert_eq!(
            math_min(&[Value::Number(1.0), Value::Number(2.0)]).unwrap(),
            Value::Number(1.0)
        );
        assert_eq!(
            math_max(&[Value::Number(1.0), Value::Number(2.0)]).unwrap(),
            Value::Number(2.0)
        );
    }

    #[test]
    fn test_math_argument_errors() {
        let err = math_abs(&[Value::string("x")]).unwrap_err();
        assert!(err.contains("abs() expects a number, got string."), "{}", err);

        let err = math_pow(&[Value::Number(2.0)]).unwrap_err();
        assert!(
            err.contains("pow() expects 2 argument(s) but got 1."),
            "{}",
            err
        );
    }

    #[test]
    fn test_std_len_counts_characters() {
        assert_eq!(std_len(&[Value::string("abc")]).unwrap(), Value::Number(3.0));
        assert_eq!(std_len(&[Value::string("")]).unwrap(), Value::Number(0.0));
    }

    #[test]
    fn test_std_str_uses_display() {
        assert_eq!(std_str(&[Value::Number(3.5)]).unwrap(), Value::string("3.5"));
        assert_eq!(std_str(&[Value::Nil]).unwrap(), Value::string("nil"));
        assert_eq!(
            std_str(&[Value::Bool(true)]).unwrap(),
            Value::string("true")
        );
    }

    #[test]
    fn test_std_num_parses_and_rejects() {
        assert_eq!(std_num(&[Value::string("42")]).unwrap(), Value::Number(42.0));
        assert_eq!(
            std_num(&[Value::string(" 3.5 ")]).unwrap(),
            Value::Number(3.5)
        );
        let err = std_num(&[Value::string("abc")]).unwrap_err();
        assert!(
            err.contains("num() could not convert 'abc' to a number."),
            "{}",
            err
        );
    }

    #[test]
    fn test_std_clock_returns_a_number() {
        let value = std_clock(&[]).unwrap();
        assert!(matches!(value, Value::Number(n) if n > 0.0));
    }

    #[test]
    fn test_fs_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.txt");
        let path_value = Value::string(path.to_str().unwrap());

        assert_eq!(
            fs_file_exists(std::slice::from_ref(&path_value)).unwrap(),
            Value::Bool(false)
        );

        fs_write_file(&[path_value.clone(), Value::string("hello")]).unwrap();
        assert_eq!(
            fs_file_exists(std::slice::from_ref(&path_value)).unwrap(),
            Value::Bool(true)
        );
        assert_eq!(
            fs_read_file(&[path_value]).unwrap(),
            Value::string("hello")
        );
    }

    #[test]
    fn test_fs_read_missing_file() {
        let err = fs_read_file(&[Value::string("/no/such/file.txt")]).unwrap_err();
        assert!(
            err.contains("Could not read file '/no/such/file.txt'"),
            "{}",
            err
        );
    }

    #[test]
    fn test_logger_returns_nil() {
        assert_eq!(logger_info(&[Value::string("hi")]).unwrap(), Value::Nil);
        let err = logger_warn(&[]).unwrap_err();
        assert!(
            err.contains("log_warn() expects 1 argument(s) but got 0."),
            "{}",
            err
        );
    }
}
