use std::{
    borrow::Borrow,
    collections::HashMap,
    ffi::{OsStr, OsString},
    hash::Hash,
};

pub type Result<T> = std::result::Result<T, InterpError>;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum InterpError {
    #[error("Undefined variable '{0}' at column {1}")]
    UndefinedVar(String, usize),

    #[error("Unclosed brace (found open brace at column {0})")]
    UnclosedBrace(usize),
}

/// Expands every `#{name}` in `fmt` with the value bound to `name`.
/// `##` is a literal `#`; a `#` followed by anything else is kept as is.
/// Error columns count characters from 1.
pub fn interp<K, V>(fmt: &str, variables: &HashMap<K, V>) -> Result<OsString>
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<OsStr>,
{
    let mut res = OsString::with_capacity(fmt.len());
    let mut literal = String::with_capacity(fmt.len());
    let mut chars = fmt.chars().enumerate().peekable();

    while let Some((pos, c)) = chars.next() {
        if c != '#' {
            literal.push(c);
            continue;
        }
        match chars.peek() {
            Some((_, '#')) => {
                chars.next();
                literal.push('#');
            }
            Some((_, '{')) => {
                chars.next();
                let mut name = String::new();
                let closed = loop {
                    match chars.next() {
                        Some((_, '}')) => break true,
                        Some((_, ch)) => name.push(ch),
                        None => break false,
                    }
                };
                if !closed {
                    return Err(InterpError::UnclosedBrace(pos + 1));
                }
                let Some(value) = variables.get(name.as_str()) else {
                    return Err(InterpError::UndefinedVar(name, pos + 1));
                };
                res.push(&literal);
                literal.clear();
                res.push(value.as_ref());
            }
            _ => literal.push('#'),
        }
    }

    res.push(&literal);
    Ok(res)
}

/// Expands each argument of an argv template.
pub fn interp_args<K, V>(args: &[String], variables: &HashMap<K, V>) -> Result<Vec<OsString>>
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<OsStr>,
{
    args.iter().map(|arg| interp(arg, variables)).collect()
}
