//! Flat lock grammar
//!
//! The fully parenthesised lock form found inline in object blocks:
//!
//! ```text
//!   Expr := number                      object constant
//!         | NAME ':' value | NAME '/' value
//!         | number ':' value            attribute by number
//!         | '"' name '"' (':'|'/') '"' value '"'
//!         | '(' op Expr ')'             op one of ! @ = + $
//!         | '(' Expr ('&'|'|') Expr ')'
//!         | '-' ...                     obsolete empty key
//! ```
//!
//! Any sub-expression may be followed by one newline before the next token.
//! The whole lock ends with a newline, and one more is swallowed if present.

use std::io::Write;

use tracing::warn;

use crate::error::Result;
use crate::lock::{LockExpr, AND_TOKEN, OR_TOKEN};
use crate::world::AttrRegistry;

use super::stream::{quote, SnapshotStream};

// =============================================================================
// Reading
// =============================================================================

/// Read one inline lock. Names resolve through the registry, defining
/// unknown ones.
pub(crate) fn read_lock(stream: &mut SnapshotStream, attrs: &mut AttrRegistry) -> Result<Option<LockExpr>> {
    let expr = read_sub(stream, attrs)?;
    if stream.getc() != Some(b'\n') {
        return Err(stream.error("lock not terminated by newline"));
    }
    stream.eat(b'\n');
    Ok(expr)
}

fn read_sub(stream: &mut SnapshotStream, attrs: &mut AttrRegistry) -> Result<Option<LockExpr>> {
    let Some(c) = stream.getc() else {
        return Err(stream.error("unexpected end of snapshot in lock"));
    };

    match c {
        b'\n' => {
            stream.ungetc();
            Ok(None)
        }
        b'(' => read_group(stream, attrs).map(Some),
        b'-' => {
            // Obsolete NOTHING key: skip the rest of the line
            loop {
                match stream.getc() {
                    None => return Err(stream.error("unexpected end of snapshot in lock")),
                    Some(b'\n') => {
                        stream.ungetc();
                        return Ok(None);
                    }
                    Some(_) => {}
                }
            }
        }
        b'"' => {
            stream.ungetc();
            let name = stream.getstring(true);
            let Some(sep) = stream.getc() else {
                return Ok(None);
            };
            let attr = make_attr(stream, attrs, &name)?;
            if sep != b':' && sep != b'/' {
                return Err(stream.error("':' or '/' expected after quoted attribute name"));
            }
            let value = stream.getstring(true);
            Ok(Some(attr_test(sep, attr, value)))
        }
        c if c.is_ascii_digit() => {
            stream.ungetc();
            let number = read_digits(stream)?;
            match stream.peek() {
                Some(sep @ (b':' | b'/')) => {
                    stream.getc();
                    let value = read_value(stream)?;
                    Ok(Some(attr_test(sep, number, value)))
                }
                _ => Ok(Some(LockExpr::Const(number))),
            }
        }
        c if c.is_ascii_alphabetic() => {
            stream.ungetc();
            let mut name = Vec::new();
            let sep = loop {
                match stream.getc() {
                    None => return Err(stream.error("unexpected end of snapshot in lock")),
                    Some(b'\n') => return Err(stream.error("attribute lock without value")),
                    Some(sep @ (b':' | b'/')) => break sep,
                    Some(c) => name.push(c),
                }
            };
            let name = String::from_utf8_lossy(&name).into_owned();
            let attr = make_attr(stream, attrs, &name)?;
            let value = read_value(stream)?;
            Ok(Some(attr_test(sep, attr, value)))
        }
        other => Err(stream.error(format!("unexpected character {:?} in lock", other as char))),
    }
}

/// Everything after an opening paren, through the closing one
fn read_group(stream: &mut SnapshotStream, attrs: &mut AttrRegistry) -> Result<LockExpr> {
    let Some(c) = stream.getc() else {
        return Err(stream.error("unexpected end of snapshot in lock"));
    };

    if let Some(expr) = prefix_node(c, || read_operand(stream, attrs))? {
        close_group(stream)?;
        return Ok(expr);
    }

    stream.ungetc();
    let lhs = read_operand(stream, attrs)?;
    stream.eat(b'\n');
    let op = stream.getc();
    let rhs = read_operand(stream, attrs)?;
    close_group(stream)?;
    match op.map(char::from) {
        Some(AND_TOKEN) => Ok(LockExpr::and(lhs, rhs)),
        Some(OR_TOKEN) => Ok(LockExpr::or(lhs, rhs)),
        _ => Err(stream.error("'&' or '|' expected in lock")),
    }
}

fn prefix_node(
    token: u8,
    operand: impl FnOnce() -> Result<LockExpr>,
) -> Result<Option<LockExpr>> {
    let token = char::from(token);
    if !"!@=+$".contains(token) {
        return Ok(None);
    }
    Ok(LockExpr::from_prefix(token, operand()?))
}

fn read_operand(stream: &mut SnapshotStream, attrs: &mut AttrRegistry) -> Result<LockExpr> {
    read_sub(stream, attrs)?.ok_or_else(|| stream.error("empty operand in lock"))
}

fn close_group(stream: &mut SnapshotStream) -> Result<()> {
    stream.eat(b'\n');
    if stream.getc() != Some(b')') {
        return Err(stream.error("')' expected in lock"));
    }
    Ok(())
}

fn read_digits(stream: &mut SnapshotStream) -> Result<i32> {
    let mut number: i32 = 0;
    while let Some(c) = stream.peek().filter(u8::is_ascii_digit) {
        stream.getc();
        number = number
            .checked_mul(10)
            .and_then(|n| n.checked_add(i32::from(c - b'0')))
            .ok_or_else(|| stream.error("number out of range in lock"))?;
    }
    Ok(number)
}

/// Bare attribute-test value: up to a newline, `)`, `|` or `&`, which is
/// left unread
fn read_value(stream: &mut SnapshotStream) -> Result<String> {
    let mut value = Vec::new();
    loop {
        match stream.peek() {
            None => return Err(stream.error("unexpected end of snapshot in lock")),
            Some(b'\n' | b')' | b'|' | b'&') => break,
            Some(c) => {
                stream.getc();
                value.push(c);
            }
        }
    }
    Ok(String::from_utf8_lossy(&value).into_owned())
}

fn make_attr(stream: &SnapshotStream, attrs: &mut AttrRegistry, name: &str) -> Result<i32> {
    match attrs.make(name) {
        Ok(number) if number > 0 => Ok(number),
        Ok(_) => Err(stream.error(format!("bad attribute {:?} in lock", name))),
        Err(e) => Err(stream.error(format!("bad attribute {:?} in lock: {}", name, e))),
    }
}

fn attr_test(sep: u8, attr: i32, value: String) -> LockExpr {
    if sep == b'/' {
        LockExpr::Eval { attr, value }
    } else {
        LockExpr::Attr { attr, value }
    }
}

// =============================================================================
// Writing
// =============================================================================

/// Write one inline lock, including its terminating newline
///
/// Locks naming negative object numbers have no flat form; they are written
/// as the empty lock.
pub(crate) fn write_lock<W: Write>(w: &mut W, expr: Option<&LockExpr>, attrs: &AttrRegistry) -> Result<()> {
    if let Some(expr) = expr {
        if representable(expr) {
            let mut buf = Vec::new();
            if write_sub(&mut buf, expr, attrs) {
                // The quoted reader swallows one newline after the closing quote
                buf.push(b'\n');
            }
            w.write_all(&buf)?;
        } else {
            warn!(lock = ?expr, "lock has no flat form; written empty");
        }
    }
    w.write_all(b"\n")?;
    Ok(())
}

fn representable(expr: &LockExpr) -> bool {
    match expr {
        LockExpr::Const(dbref) => *dbref >= 0,
        LockExpr::Attr { .. } | LockExpr::Eval { .. } => true,
        LockExpr::Not(e)
        | LockExpr::Indir(e)
        | LockExpr::Is(e)
        | LockExpr::Carry(e)
        | LockExpr::Owner(e) => representable(e),
        LockExpr::And(a, b) | LockExpr::Or(a, b) => representable(a) && representable(b),
    }
}

/// Append `expr`; returns whether the output ends in a quoted string
fn write_sub(out: &mut Vec<u8>, expr: &LockExpr, attrs: &AttrRegistry) -> bool {
    match expr {
        LockExpr::Const(dbref) => {
            out.extend_from_slice(dbref.to_string().as_bytes());
            false
        }
        LockExpr::Attr { attr, value } => write_attr(out, *attr, b':', value, attrs),
        LockExpr::Eval { attr, value } => write_attr(out, *attr, b'/', value, attrs),
        LockExpr::And(a, b) | LockExpr::Or(a, b) => {
            let op = if matches!(expr, LockExpr::And(..)) { AND_TOKEN } else { OR_TOKEN };
            out.push(b'(');
            write_sub(out, a, attrs);
            out.push(op as u8);
            write_sub(out, b, attrs);
            out.push(b')');
            false
        }
        LockExpr::Not(inner)
        | LockExpr::Indir(inner)
        | LockExpr::Is(inner)
        | LockExpr::Carry(inner)
        | LockExpr::Owner(inner) => {
            out.push(b'(');
            if let Some(token) = expr.prefix_token() {
                out.push(token as u8);
            }
            write_sub(out, inner, attrs);
            out.push(b')');
            false
        }
    }
}

fn write_attr(out: &mut Vec<u8>, attr: i32, sep: u8, value: &str, attrs: &AttrRegistry) -> bool {
    let label = attrs
        .name_of(attr)
        .map_or_else(|| attr.to_string(), str::to_string);

    let bare_label = match label.as_bytes().first() {
        Some(c) if c.is_ascii_alphabetic() => !label.bytes().any(|c| matches!(c, b':' | b'/' | b'\n')),
        Some(_) => label.bytes().all(|c| c.is_ascii_digit()),
        None => false,
    };
    let bare_value = !value.bytes().any(|c| matches!(c, b'\n' | b')' | b'|' | b'&'));

    if bare_label && bare_value {
        out.extend_from_slice(label.as_bytes());
        out.push(sep);
        out.extend_from_slice(value.as_bytes());
        false
    } else {
        out.extend_from_slice(&quote(&label));
        out.push(sep);
        out.extend_from_slice(&quote(value));
        true
    }
}
