//! Lock Expression Module
//!
//! Boolean lock expressions gating access to objects. A lock lives as the
//! text value of one attribute (for the default lock, [`A_LOCK`]); this
//! module holds the parsed tree and its attribute text form. The flatfile
//! codec has its own fully parenthesised form of the same tree.
//!
//! ## Text form
//! ```text
//!   E := T ('|' E)?
//!   T := F ('&' T)?
//!   F := '!' F | '@' L | '=' L | '+' L | '$' L | L
//!   L := '(' E ')' | '#' number | NAME ':' value | NAME '/' value
//! ```
//!
//! [`A_LOCK`]: crate::world::A_LOCK

mod text;

pub use text::{parse, unparse};

use crate::world::Dbref;

pub const NOT_TOKEN: char = '!';
pub const AND_TOKEN: char = '&';
pub const OR_TOKEN: char = '|';
pub const INDIR_TOKEN: char = '@';
pub const IS_TOKEN: char = '=';
pub const CARRY_TOKEN: char = '+';
pub const OWNER_TOKEN: char = '$';

/// Parsed lock expression
///
/// An absent lock (one that always passes) is represented by `None` at the
/// use site, never by a variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockExpr {
    /// A specific object
    Const(Dbref),
    /// `NAME:value`: attribute value matches a wildcard pattern
    Attr { attr: i32, value: String },
    /// `NAME/value`: evaluated attribute matches
    Eval { attr: i32, value: String },
    Not(Box<LockExpr>),
    /// `@obj`: pass if obj's own lock passes
    Indir(Box<LockExpr>),
    /// `=obj`: the actor is obj
    Is(Box<LockExpr>),
    /// `+obj`: the actor carries obj
    Carry(Box<LockExpr>),
    /// `$obj`: the actor has the same owner as obj
    Owner(Box<LockExpr>),
    And(Box<LockExpr>, Box<LockExpr>),
    Or(Box<LockExpr>, Box<LockExpr>),
}

impl LockExpr {
    pub fn not(inner: LockExpr) -> Self {
        LockExpr::Not(Box::new(inner))
    }

    pub fn and(lhs: LockExpr, rhs: LockExpr) -> Self {
        LockExpr::And(Box::new(lhs), Box::new(rhs))
    }

    pub fn or(lhs: LockExpr, rhs: LockExpr) -> Self {
        LockExpr::Or(Box::new(lhs), Box::new(rhs))
    }

    /// Prefix token of a unary operator node
    pub fn prefix_token(&self) -> Option<char> {
        match self {
            LockExpr::Not(_) => Some(NOT_TOKEN),
            LockExpr::Indir(_) => Some(INDIR_TOKEN),
            LockExpr::Is(_) => Some(IS_TOKEN),
            LockExpr::Carry(_) => Some(CARRY_TOKEN),
            LockExpr::Owner(_) => Some(OWNER_TOKEN),
            _ => None,
        }
    }

    /// Build the unary node for a prefix token
    pub fn from_prefix(token: char, inner: LockExpr) -> Option<Self> {
        let inner = Box::new(inner);
        match token {
            NOT_TOKEN => Some(LockExpr::Not(inner)),
            INDIR_TOKEN => Some(LockExpr::Indir(inner)),
            IS_TOKEN => Some(LockExpr::Is(inner)),
            CARRY_TOKEN => Some(LockExpr::Carry(inner)),
            OWNER_TOKEN => Some(LockExpr::Owner(inner)),
            _ => None,
        }
    }

    /// Every attribute number the expression tests
    pub fn attr_refs(&self) -> Vec<i32> {
        let mut out = Vec::new();
        self.collect_attrs(&mut out);
        out
    }

    fn collect_attrs(&self, out: &mut Vec<i32>) {
        match self {
            LockExpr::Const(_) => {}
            LockExpr::Attr { attr, .. } | LockExpr::Eval { attr, .. } => out.push(*attr),
            LockExpr::Not(e)
            | LockExpr::Indir(e)
            | LockExpr::Is(e)
            | LockExpr::Carry(e)
            | LockExpr::Owner(e) => e.collect_attrs(out),
            LockExpr::And(a, b) | LockExpr::Or(a, b) => {
                a.collect_attrs(out);
                b.collect_attrs(out);
            }
        }
    }
}
