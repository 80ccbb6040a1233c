//! Attribute text form of lock expressions

use crate::error::{Result, StoreError};
use crate::world::AttrRegistry;

use super::{LockExpr, AND_TOKEN, CARRY_TOKEN, INDIR_TOKEN, IS_TOKEN, NOT_TOKEN, OR_TOKEN, OWNER_TOKEN};

// =============================================================================
// Printer
// =============================================================================

/// Print a lock in the form stored in attribute text
///
/// Object constants come out as `(#N)`; attribute tests use the attribute's
/// name when it has a live definition and its number otherwise.
pub fn unparse(expr: &LockExpr, attrs: &AttrRegistry) -> String {
    let mut out = String::new();
    unparse_into(&mut out, expr, None, attrs);
    out
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Outer {
    Not,
    And,
    Or,
    Prefix,
}

fn unparse_into(out: &mut String, expr: &LockExpr, outer: Option<Outer>, attrs: &AttrRegistry) {
    match expr {
        LockExpr::And(a, b) => {
            let wrap = outer == Some(Outer::Not);
            if wrap {
                out.push('(');
            }
            unparse_into(out, a, Some(Outer::And), attrs);
            out.push(AND_TOKEN);
            unparse_into(out, b, Some(Outer::And), attrs);
            if wrap {
                out.push(')');
            }
        }
        LockExpr::Or(a, b) => {
            let wrap = matches!(outer, Some(Outer::Not) | Some(Outer::And));
            if wrap {
                out.push('(');
            }
            unparse_into(out, a, Some(Outer::Or), attrs);
            out.push(OR_TOKEN);
            unparse_into(out, b, Some(Outer::Or), attrs);
            if wrap {
                out.push(')');
            }
        }
        LockExpr::Not(inner) => {
            out.push(NOT_TOKEN);
            unparse_into(out, inner, Some(Outer::Not), attrs);
        }
        LockExpr::Indir(inner) | LockExpr::Is(inner) | LockExpr::Carry(inner) | LockExpr::Owner(inner) => {
            if let Some(token) = expr.prefix_token() {
                out.push(token);
            }
            unparse_into(out, inner, Some(Outer::Prefix), attrs);
        }
        LockExpr::Const(dbref) => {
            out.push_str(&format!("(#{})", dbref));
        }
        LockExpr::Attr { attr, value } | LockExpr::Eval { attr, value } => {
            match attrs.name_of(*attr) {
                Some(name) => out.push_str(name),
                None => out.push_str(&attr.to_string()),
            }
            out.push(if matches!(expr, LockExpr::Eval { .. }) { '/' } else { ':' });
            out.push_str(value);
        }
    }
}

// =============================================================================
// Parser
// =============================================================================

/// Parse attribute text back into a lock
///
/// Empty or blank text is the absent lock, `Ok(None)`. Attribute names must
/// already be defined; numeric attribute references are accepted as-is.
pub fn parse(text: &str, attrs: &AttrRegistry) -> Result<Option<LockExpr>> {
    if text.trim().is_empty() {
        return Ok(None);
    }

    let mut parser = Parser {
        src: text,
        pos: 0,
        attrs,
    };
    let expr = parser.parse_e()?;
    parser.skip_whitespace();
    if parser.pos < text.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(Some(expr))
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    attrs: &'a AttrRegistry,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn error(&self, reason: &str) -> StoreError {
        StoreError::LockSyntax(format!("{} at offset {} in {:?}", reason, self.pos, self.src))
    }

    /// E -> T | T '|' E
    fn parse_e(&mut self) -> Result<LockExpr> {
        let lhs = self.parse_t()?;
        self.skip_whitespace();
        if self.peek() == Some(OR_TOKEN) {
            self.bump();
            let rhs = self.parse_e()?;
            return Ok(LockExpr::or(lhs, rhs));
        }
        Ok(lhs)
    }

    /// T -> F | F '&' T
    fn parse_t(&mut self) -> Result<LockExpr> {
        let lhs = self.parse_f()?;
        self.skip_whitespace();
        if self.peek() == Some(AND_TOKEN) {
            self.bump();
            let rhs = self.parse_t()?;
            return Ok(LockExpr::and(lhs, rhs));
        }
        Ok(lhs)
    }

    /// F -> '!' F | '@' L | '=' L | '+' L | '$' L | L
    fn parse_f(&mut self) -> Result<LockExpr> {
        self.skip_whitespace();
        let Some(token) = self.peek() else {
            return Err(self.error("expression expected"));
        };

        match token {
            NOT_TOKEN => {
                self.bump();
                Ok(LockExpr::not(self.parse_f()?))
            }
            INDIR_TOKEN | OWNER_TOKEN => {
                self.bump();
                let inner = self.parse_l()?;
                if !matches!(inner, LockExpr::Const(_)) {
                    return Err(self.error("operand must be an object"));
                }
                LockExpr::from_prefix(token, inner).ok_or_else(|| self.error("bad operator"))
            }
            IS_TOKEN | CARRY_TOKEN => {
                self.bump();
                let inner = self.parse_l()?;
                if !matches!(inner, LockExpr::Const(_) | LockExpr::Attr { .. }) {
                    return Err(self.error("operand must be an object or attribute test"));
                }
                LockExpr::from_prefix(token, inner).ok_or_else(|| self.error("bad operator"))
            }
            _ => self.parse_l(),
        }
    }

    /// L -> '(' E ')' | atom
    fn parse_l(&mut self) -> Result<LockExpr> {
        self.skip_whitespace();
        if self.peek() == Some('(') {
            self.bump();
            let inner = self.parse_e()?;
            self.skip_whitespace();
            if self.peek() != Some(')') {
                return Err(self.error("')' expected"));
            }
            self.bump();
            return Ok(inner);
        }

        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == AND_TOKEN || c == OR_TOKEN || c == ')' {
                break;
            }
            self.bump();
        }
        let atom = self.src[start..self.pos].trim_end();
        if atom.is_empty() {
            return Err(self.error("expression expected"));
        }
        self.parse_atom(atom)
    }

    fn parse_atom(&self, atom: &str) -> Result<LockExpr> {
        if let Some(split) = atom.find([':', '/']) {
            let (name, rest) = atom.split_at(split);
            let attr = self.resolve_attr(name)?;
            let value = rest[1..].to_string();
            return Ok(if rest.starts_with('/') {
                LockExpr::Eval { attr, value }
            } else {
                LockExpr::Attr { attr, value }
            });
        }

        let Some(number) = atom.strip_prefix('#') else {
            return Err(self.error("object reference expected"));
        };
        number
            .trim()
            .parse()
            .map(LockExpr::Const)
            .map_err(|_| self.error("bad object number"))
    }

    fn resolve_attr(&self, name: &str) -> Result<i32> {
        if let Some(def) = self.attrs.lookup_name(name) {
            return Ok(def.number);
        }
        match name.trim().parse::<i32>() {
            Ok(number) if number > 0 => Ok(number),
            _ => Err(self.error("unknown attribute")),
        }
    }
}
