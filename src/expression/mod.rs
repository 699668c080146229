/// Embedded expression evaluator
///
/// A small arithmetic/boolean language used by `math`, `condition` and `while`
/// nodes. Expressions are tokenized, parsed into an AST and evaluated against
/// literal operands only; variables are substituted beforehand by the template
/// renderer.
///
/// - `evaluate_numeric("2 + 3 * 4")` → `14.0`
/// - `evaluate_boolean("\"abc\" < \"abd\"")` → `true`
///
/// Identifiers other than `pi` and `e` evaluate to their own name as a string,
/// so an unrendered placeholder still parses instead of crashing the node.

pub mod lexer;
pub mod parser;

use parser::{BinaryOp, Expr};
use thiserror::Error;

/// Errors raised while parsing or evaluating an expression
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExpressionError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("invalid number literal '{0}'")]
    InvalidNumber(String),

    #[error("unexpected {found} at offset {offset}")]
    UnexpectedToken { found: String, offset: usize },

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("expression nested too deeply at offset {offset}")]
    TooDeep { offset: usize },

    #[error("expression too large at offset {offset}")]
    TooLarge { offset: usize },

    #[error("non-numeric operand for {0}")]
    NonNumericOperand(&'static str),

    #[error("cannot compare {left} with {right}")]
    MixedComparison {
        left: &'static str,
        right: &'static str,
    },

    #[error("division by zero")]
    DivisionByZero,

    #[error("modulo by zero")]
    ModuloByZero,

    #[error("boolean expression provided where a numeric expression was expected")]
    ExpectedNumeric,

    #[error("numeric expression provided where a boolean expression was expected")]
    ExpectedBoolean,

    #[error("non-numeric result")]
    NonNumericResult,

    #[error("result is not a finite number")]
    NonFinite,
}

/// Intermediate value during evaluation
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Num(f64),
    Str(String),
}

impl Operand {
    fn kind(&self) -> &'static str {
        match self {
            Operand::Num(_) => "number",
            Operand::Str(_) => "string",
        }
    }
}

/// Evaluate an arithmetic expression to a number
///
/// Rejects expressions whose top-level operator is a comparison.
pub fn evaluate_numeric(expression: &str) -> Result<f64, ExpressionError> {
    let expr = parse(expression)?;

    if expr.top_level_op().is_some_and(BinaryOp::is_comparison) {
        return Err(ExpressionError::ExpectedNumeric);
    }

    match eval(&expr)? {
        Operand::Num(n) if n.is_finite() => Ok(n),
        Operand::Num(_) => Err(ExpressionError::NonFinite),
        Operand::Str(_) => Err(ExpressionError::NonNumericResult),
    }
}

/// Evaluate a comparison expression to a boolean
///
/// Rejects expressions whose top-level operator is not a comparison.
pub fn evaluate_boolean(expression: &str) -> Result<bool, ExpressionError> {
    let expr = parse(expression)?;

    if !expr.top_level_op().is_some_and(BinaryOp::is_comparison) {
        return Err(ExpressionError::ExpectedBoolean);
    }

    match eval(&expr)? {
        Operand::Num(n) => Ok(n == 1.0),
        Operand::Str(_) => Err(ExpressionError::NonNumericResult),
    }
}

fn parse(expression: &str) -> Result<Expr, ExpressionError> {
    let tokens = lexer::tokenize(expression)?;
    parser::parse(&tokens)
}

fn eval(expr: &Expr) -> Result<Operand, ExpressionError> {
    match expr {
        Expr::Number(n) => Ok(Operand::Num(*n)),
        Expr::Str(s) => Ok(Operand::Str(s.clone())),
        Expr::Ident(name) => Ok(match name.as_str() {
            "pi" => Operand::Num(std::f64::consts::PI),
            "e" => Operand::Num(std::f64::consts::E),
            _ => Operand::Str(name.clone()),
        }),
        Expr::Group(inner) => eval(inner),
        Expr::Neg(inner) => match eval(inner)? {
            Operand::Num(n) => Ok(Operand::Num(-n)),
            Operand::Str(_) => Err(ExpressionError::NonNumericOperand("unary minus")),
        },
        Expr::Binary { op, lhs, rhs } => {
            let lhs = eval(lhs)?;
            let rhs = eval(rhs)?;
            if op.is_comparison() {
                compare(*op, lhs, rhs)
            } else {
                arithmetic(*op, lhs, rhs)
            }
        }
    }
}

fn arithmetic(op: BinaryOp, lhs: Operand, rhs: Operand) -> Result<Operand, ExpressionError> {
    let (x, y) = match (lhs, rhs) {
        (Operand::Num(x), Operand::Num(y)) => (x, y),
        _ => return Err(ExpressionError::NonNumericOperand("arithmetic expression")),
    };

    let value = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div => {
            if y == 0.0 {
                return Err(ExpressionError::DivisionByZero);
            }
            x / y
        }
        BinaryOp::Rem => {
            if y == 0.0 {
                return Err(ExpressionError::ModuloByZero);
            }
            // Rust's `%` on floats is the truncated remainder (sign follows the dividend)
            x % y
        }
        _ => unreachable!("comparison operators are handled by compare()"),
    };

    Ok(Operand::Num(value))
}

fn compare(op: BinaryOp, lhs: Operand, rhs: Operand) -> Result<Operand, ExpressionError> {
    let result = match (&lhs, &rhs) {
        (Operand::Num(x), Operand::Num(y)) => apply_ordering(op, x.partial_cmp(y)),
        (Operand::Str(x), Operand::Str(y)) => apply_ordering(op, Some(x.cmp(y))),
        _ => {
            return Err(ExpressionError::MixedComparison {
                left: lhs.kind(),
                right: rhs.kind(),
            })
        }
    };

    Ok(Operand::Num(if result { 1.0 } else { 0.0 }))
}

fn apply_ordering(op: BinaryOp, ordering: Option<std::cmp::Ordering>) -> bool {
    use std::cmp::Ordering::*;

    match (op, ordering) {
        (BinaryOp::NotEq, None) => true,
        (_, None) => false,
        (BinaryOp::Eq, Some(o)) => o == Equal,
        (BinaryOp::NotEq, Some(o)) => o != Equal,
        (BinaryOp::Lt, Some(o)) => o == Less,
        (BinaryOp::Gt, Some(o)) => o == Greater,
        (BinaryOp::LtEq, Some(o)) => o != Greater,
        (BinaryOp::GtEq, Some(o)) => o != Less,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_precedence_and_grouping() {
        assert_eq!(evaluate_numeric("2 + 3 * 4"), Ok(14.0));
        assert_eq!(evaluate_numeric("(2 + 3) * 4"), Ok(20.0));
        assert_eq!(evaluate_numeric("10 - 4 - 3"), Ok(3.0));
        assert_eq!(evaluate_numeric("-3 + 5"), Ok(2.0));
        assert_eq!(evaluate_numeric("7 % 3"), Ok(1.0));
        assert_eq!(evaluate_numeric("-7 % 3"), Ok(-1.0));
        assert_eq!(evaluate_numeric("1.5e1 / 3"), Ok(5.0));
    }

    #[test]
    fn constants() {
        assert_eq!(evaluate_numeric("pi"), Ok(std::f64::consts::PI));
        assert_eq!(evaluate_numeric("2 * e"), Ok(2.0 * std::f64::consts::E));
    }

    #[test]
    fn division_and_modulo_by_zero_fail() {
        assert_eq!(evaluate_numeric("10 / 0"), Err(ExpressionError::DivisionByZero));
        assert_eq!(evaluate_numeric("10 % (2 - 2)"), Err(ExpressionError::ModuloByZero));
    }

    #[test]
    fn boolean_comparisons() {
        assert_eq!(evaluate_boolean("2 == 2"), Ok(true));
        assert_eq!(evaluate_boolean("5 > 3"), Ok(true));
        assert_eq!(evaluate_boolean("5 < 3"), Ok(false));
        assert_eq!(evaluate_boolean("1 + 1 >= 2"), Ok(true));
        assert_eq!(evaluate_boolean("2 != 2"), Ok(false));
        assert_eq!(evaluate_boolean("(4 <= 3)"), Ok(false));
    }

    #[test]
    fn string_comparisons_and_bare_identifiers() {
        assert_eq!(evaluate_boolean("\"abc\" == \"abc\""), Ok(true));
        assert_eq!(evaluate_boolean("\"abc\" < \"abd\""), Ok(true));
        // bare identifiers compare as their own names
        assert_eq!(evaluate_boolean("apple == apple"), Ok(true));
        assert_eq!(evaluate_boolean("apple == \"apple\""), Ok(true));
    }

    #[test]
    fn mixed_type_comparison_fails() {
        assert_eq!(
            evaluate_boolean("\"10\" > 5"),
            Err(ExpressionError::MixedComparison { left: "string", right: "number" })
        );
    }

    #[test]
    fn entry_points_reject_the_other_kind() {
        assert_eq!(evaluate_numeric("2 == 2"), Err(ExpressionError::ExpectedNumeric));
        assert_eq!(evaluate_boolean("2 + 2"), Err(ExpressionError::ExpectedBoolean));
        assert_eq!(evaluate_boolean("7"), Err(ExpressionError::ExpectedBoolean));
    }

    #[test]
    fn string_results_and_operands_are_not_numeric() {
        assert_eq!(evaluate_numeric("total"), Err(ExpressionError::NonNumericResult));
        assert_eq!(
            evaluate_numeric("total + 1"),
            Err(ExpressionError::NonNumericOperand("arithmetic expression"))
        );
        assert_eq!(
            evaluate_numeric("-\"x\""),
            Err(ExpressionError::NonNumericOperand("unary minus"))
        );
    }

    #[test]
    fn overflow_is_not_finite() {
        assert_eq!(evaluate_numeric("1e308 * 10"), Err(ExpressionError::NonFinite));
    }

    #[test]
    fn parse_errors_surface() {
        assert_eq!(evaluate_numeric(""), Err(ExpressionError::Empty));
        assert!(matches!(
            evaluate_boolean("{{a}} > 5"),
            Err(ExpressionError::UnexpectedChar { ch: '{', offset: 0 })
        ));
    }

    #[test]
    fn oversized_input_is_an_error_not_a_crash() {
        let parens = format!("{}1", "(".repeat(20_000));
        assert!(matches!(evaluate_numeric(&parens), Err(ExpressionError::TooDeep { .. })));

        let negations = format!("{} 1 > 0", "-".repeat(200_000));
        assert!(matches!(evaluate_boolean(&negations), Err(ExpressionError::TooDeep { .. })));

        let chain = vec!["2"; 50_000].join(" * ");
        assert!(matches!(evaluate_numeric(&chain), Err(ExpressionError::TooLarge { .. })));
    }
}
