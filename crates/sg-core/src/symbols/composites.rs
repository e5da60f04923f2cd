use orion_error::StructError;
use winnow::ascii::multispace0;
use winnow::combinator::{alt, delimited, preceded, separated};
use winnow::prelude::*;
use winnow::token::take_while;

use crate::error::{CoreReason, CoreResult};

// ---------------------------------------------------------------------------
// CompositeExpr
// ---------------------------------------------------------------------------

/// Boolean expression over inserted symbol names: `&`, `|`, `!` and
/// parentheses. Evaluated against the task's symbol results during the
/// composite phase.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositeExpr {
    Symbol(String),
    Not(Box<CompositeExpr>),
    And(Vec<CompositeExpr>),
    Or(Vec<CompositeExpr>),
}

impl CompositeExpr {
    pub fn parse(input: &str) -> CoreResult<Self> {
        expr.parse(input.trim()).map_err(|e| {
            StructError::from(CoreReason::Composite)
                .with_detail(format!("bad composite expression {input:?}: {e}"))
        })
    }

    /// Evaluate with `lookup` answering "has this symbol been inserted".
    pub fn eval(&self, lookup: &dyn Fn(&str) -> bool) -> bool {
        match self {
            Self::Symbol(name) => lookup(name),
            Self::Not(inner) => !inner.eval(lookup),
            Self::And(items) => items.iter().all(|e| e.eval(lookup)),
            Self::Or(items) => items.iter().any(|e| e.eval(lookup)),
        }
    }

    /// Every symbol name referenced by the expression.
    pub fn symbols(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_symbols(&mut out);
        out
    }

    fn collect_symbols<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Symbol(name) => out.push(name),
            Self::Not(inner) => inner.collect_symbols(out),
            Self::And(items) | Self::Or(items) => {
                for item in items {
                    item.collect_symbols(out);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Grammar: or := and ('|' and)* ; and := unary ('&' unary)* ;
//          unary := '!' unary | '(' or ')' | NAME
// ---------------------------------------------------------------------------

fn expr(input: &mut &str) -> ModalResult<CompositeExpr> {
    or_expr.parse_next(input)
}

fn or_expr(input: &mut &str) -> ModalResult<CompositeExpr> {
    let items: Vec<CompositeExpr> =
        separated(1.., and_expr, delimited(multispace0, '|', multispace0)).parse_next(input)?;
    Ok(flatten(items, true))
}

fn and_expr(input: &mut &str) -> ModalResult<CompositeExpr> {
    let items: Vec<CompositeExpr> =
        separated(1.., unary_expr, delimited(multispace0, '&', multispace0)).parse_next(input)?;
    Ok(flatten(items, false))
}

fn unary_expr(input: &mut &str) -> ModalResult<CompositeExpr> {
    delimited(multispace0, unary_inner, multispace0).parse_next(input)
}

fn unary_inner(input: &mut &str) -> ModalResult<CompositeExpr> {
    alt((
        preceded(('!', multispace0), unary_inner).map(|e| CompositeExpr::Not(Box::new(e))),
        delimited(('(', multispace0), or_expr, (multispace0, ')')),
        symbol_name,
    ))
    .parse_next(input)
}

fn symbol_name(input: &mut &str) -> ModalResult<CompositeExpr> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric() || c == '_')
        .map(|s: &str| CompositeExpr::Symbol(s.to_string()))
        .parse_next(input)
}

fn flatten(mut items: Vec<CompositeExpr>, or: bool) -> CompositeExpr {
    if items.len() == 1 {
        items.pop().expect("one item")
    } else if or {
        CompositeExpr::Or(items)
    } else {
        CompositeExpr::And(items)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(expr: &str, present: &[&str]) -> bool {
        let parsed = CompositeExpr::parse(expr).unwrap();
        parsed.eval(&|name| present.contains(&name))
    }

    #[test]
    fn single_symbol() {
        assert!(eval("A", &["A"]));
        assert!(!eval("A", &["B"]));
    }

    #[test]
    fn and_or_precedence() {
        // & binds tighter than |
        assert!(eval("A & B | C", &["C"]));
        assert!(eval("A & B | C", &["A", "B"]));
        assert!(!eval("A & B | C", &["A"]));
    }

    #[test]
    fn negation_and_parens() {
        assert!(eval("!A", &[]));
        assert!(!eval("!A", &["A"]));
        assert!(eval("!(A & B)", &["A"]));
        assert!(eval("(A | B) & !C", &["B"]));
        assert!(!eval("(A | B) & !C", &["B", "C"]));
    }

    #[test]
    fn whitespace_tolerated() {
        assert!(eval("  A   &B ", &["A", "B"]));
    }

    #[test]
    fn malformed_rejected() {
        assert!(CompositeExpr::parse("A &").is_err());
        assert!(CompositeExpr::parse("(A").is_err());
        assert!(CompositeExpr::parse("").is_err());
        assert!(CompositeExpr::parse("A B").is_err());
    }

    #[test]
    fn symbols_collected() {
        let e = CompositeExpr::parse("A & (B | !C)").unwrap();
        let mut names = e.symbols();
        names.sort_unstable();
        assert_eq!(names, vec!["A", "B", "C"]);
    }
}
