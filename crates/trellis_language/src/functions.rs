//! Built-in functions callable from expressions.

use trellis_foundation::{Error, ErrorKind, Result, Value};

use crate::operator::Function;

fn arity(function: Function, expected: &str, actual: usize) -> Error {
    Error::new(ErrorKind::ArityMismatch {
        function: function.name().to_string(),
        expected: expected.to_string(),
        actual,
    })
}

fn expect_args(function: Function, args: &[Value], count: usize) -> Result<()> {
    if args.len() == count {
        Ok(())
    } else {
        Err(arity(function, &count.to_string(), args.len()))
    }
}

fn string_arg<'a>(args: &'a [Value], index: usize) -> Result<&'a str> {
    args[index]
        .as_str()
        .ok_or_else(|| Error::type_mismatch("string", args[index].kind_name()))
}

fn number_arg(args: &[Value], index: usize) -> Result<f64> {
    args[index]
        .as_number()
        .ok_or_else(|| Error::type_mismatch("number", args[index].kind_name()))
}

/// Converts a number argument into a character offset, clamping negatives to
/// `None` and truncating fractions.
fn offset_arg(args: &[Value], index: usize) -> Result<Option<usize>> {
    let n = number_arg(args, index)?.trunc();
    if n < 0.0 {
        return Ok(None);
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let offset = n as usize;
    Ok(Some(offset))
}

/// Applies a built-in function to already-evaluated arguments.
///
/// # Errors
///
/// Returns [`ErrorKind::ArityMismatch`] for a wrong argument count and
/// [`ErrorKind::TypeMismatch`] for arguments of the wrong kind.
#[allow(clippy::cast_precision_loss)]
pub fn call(function: Function, args: &[Value]) -> Result<Value> {
    match function {
        Function::Length => {
            expect_args(function, args, 1)?;
            match &args[0] {
                Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
                Value::Array(items) => Ok(Value::Number(items.len() as f64)),
                other => Err(Error::type_mismatch("string or array", other.kind_name())),
            }
        }
        Function::Upper => {
            expect_args(function, args, 1)?;
            Ok(Value::from(string_arg(args, 0)?.to_uppercase()))
        }
        Function::Lower => {
            expect_args(function, args, 1)?;
            Ok(Value::from(string_arg(args, 0)?.to_lowercase()))
        }
        Function::Trim => {
            expect_args(function, args, 1)?;
            Ok(Value::from(string_arg(args, 0)?.trim()))
        }
        Function::Abs => {
            expect_args(function, args, 1)?;
            Ok(Value::Number(number_arg(args, 0)?.abs()))
        }
        Function::Round => {
            expect_args(function, args, 1)?;
            Ok(Value::Number(number_arg(args, 0)?.round()))
        }
        Function::Floor => {
            expect_args(function, args, 1)?;
            Ok(Value::Number(number_arg(args, 0)?.floor()))
        }
        Function::Ceil => {
            expect_args(function, args, 1)?;
            Ok(Value::Number(number_arg(args, 0)?.ceil()))
        }
        Function::Substring => {
            if !(2..=3).contains(&args.len()) {
                return Err(arity(function, "2 or 3", args.len()));
            }
            let s = string_arg(args, 0)?;
            let start = offset_arg(args, 1)?;
            let len = if args.len() == 3 {
                offset_arg(args, 2)?
            } else {
                Some(usize::MAX)
            };
            match (start, len) {
                (Some(start), Some(len)) => {
                    Ok(Value::from(s.chars().skip(start).take(len).collect::<String>()))
                }
                _ => Ok(Value::from("")),
            }
        }
    }
}
