/// Recursive-descent parser producing the expression AST
///
/// Precedence, lowest first: comparison, additive, multiplicative, unary minus.
/// All binary levels are left-associative.
///
/// Parentheses and unary minus may nest at most `MAX_NESTING` levels, and a
/// tree holds at most `MAX_NODES` nodes, which bounds the recursion of both
/// the parser and the evaluator.

use super::lexer::{Spanned, Token};
use super::ExpressionError;

pub const MAX_NESTING: usize = 256;
pub const MAX_NODES: usize = 1024;

/// Binary operators of the grammar
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::LtEq | BinaryOp::GtEq
        )
    }
}

/// Parsed expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Str(String),
    Ident(String),
    Neg(Box<Expr>),
    Group(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    /// Operator at the root of the tree, looking through parentheses
    pub fn top_level_op(&self) -> Option<BinaryOp> {
        match self {
            Expr::Group(inner) => inner.top_level_op(),
            Expr::Binary { op, .. } => Some(*op),
            _ => None,
        }
    }
}

/// Parse a full token stream into a single expression
pub fn parse(tokens: &[Spanned]) -> Result<Expr, ExpressionError> {
    if tokens.is_empty() {
        return Err(ExpressionError::Empty);
    }

    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
        nodes: 0,
    };
    let expr = parser.comparison()?;

    match parser.peek() {
        None => Ok(expr),
        Some(extra) => Err(ExpressionError::UnexpectedToken {
            found: extra.token.describe(),
            offset: extra.offset,
        }),
    }
}

struct Parser<'t> {
    tokens: &'t [Spanned],
    pos: usize,
    /// Open parentheses and negations around the current position
    depth: usize,
    nodes: usize,
}

impl<'t> Parser<'t> {
    fn peek(&self) -> Option<&'t Spanned> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'t Spanned> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Consume the next token if it maps to one of the operators of a level
    fn binary_op(&mut self, map: fn(&Token) -> Option<BinaryOp>) -> Result<Option<BinaryOp>, ExpressionError> {
        let Some(spanned) = self.peek() else {
            return Ok(None);
        };
        let Some(op) = map(&spanned.token) else {
            return Ok(None);
        };
        self.pos += 1;
        self.count_node(spanned.offset)?;
        Ok(Some(op))
    }

    fn count_node(&mut self, offset: usize) -> Result<(), ExpressionError> {
        self.nodes += 1;
        if self.nodes > MAX_NODES {
            return Err(ExpressionError::TooLarge { offset });
        }
        Ok(())
    }

    fn enter(&mut self, offset: usize) -> Result<(), ExpressionError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(ExpressionError::TooDeep { offset });
        }
        self.count_node(offset)
    }

    fn comparison(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.additive()?;
        while let Some(op) = self.binary_op(|t| match t {
            Token::Eq => Some(BinaryOp::Eq),
            Token::NotEq => Some(BinaryOp::NotEq),
            Token::Lt => Some(BinaryOp::Lt),
            Token::Gt => Some(BinaryOp::Gt),
            Token::LtEq => Some(BinaryOp::LtEq),
            Token::GtEq => Some(BinaryOp::GtEq),
            _ => None,
        })? {
            let rhs = self.additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn additive(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.term()?;
        while let Some(op) = self.binary_op(|t| match t {
            Token::Plus => Some(BinaryOp::Add),
            Token::Minus => Some(BinaryOp::Sub),
            _ => None,
        })? {
            let rhs = self.term()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ExpressionError> {
        let mut lhs = self.unary()?;
        while let Some(op) = self.binary_op(|t| match t {
            Token::Star => Some(BinaryOp::Mul),
            Token::Slash => Some(BinaryOp::Div),
            Token::Percent => Some(BinaryOp::Rem),
            _ => None,
        })? {
            let rhs = self.unary()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ExpressionError> {
        if let Some(Spanned { token: Token::Minus, offset }) = self.peek() {
            self.pos += 1;
            self.enter(*offset)?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(operand)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExpressionError> {
        let spanned = self.advance().ok_or(ExpressionError::UnexpectedEnd)?;
        if spanned.token != Token::LParen {
            self.count_node(spanned.offset)?;
        }
        match &spanned.token {
            Token::Number(n) => Ok(Expr::Number(*n)),
            Token::Str(s) => Ok(Expr::Str(s.clone())),
            Token::Ident(name) => Ok(Expr::Ident(name.clone())),
            Token::LParen => {
                self.enter(spanned.offset)?;
                let inner = self.comparison()?;
                self.depth -= 1;
                match self.advance() {
                    Some(Spanned { token: Token::RParen, .. }) => Ok(Expr::Group(Box::new(inner))),
                    Some(other) => Err(ExpressionError::UnexpectedToken {
                        found: other.token.describe(),
                        offset: other.offset,
                    }),
                    None => Err(ExpressionError::UnexpectedEnd),
                }
            }
            other => Err(ExpressionError::UnexpectedToken {
                found: other.describe(),
                offset: spanned.offset,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expression::lexer::tokenize;

    fn parse_str(input: &str) -> Result<Expr, ExpressionError> {
        parse(&tokenize(input)?)
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse_str("2 + 3 * 4").unwrap();
        match expr {
            Expr::Binary { op: BinaryOp::Add, rhs, .. } => {
                assert!(matches!(*rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            other => panic!("unexpected tree: {:?}", other),
        }
    }

    #[test]
    fn comparison_is_the_root() {
        let expr = parse_str("1 + 1 == 2").unwrap();
        assert_eq!(expr.top_level_op(), Some(BinaryOp::Eq));
        let grouped = parse_str("((3 < 4))").unwrap();
        assert_eq!(grouped.top_level_op(), Some(BinaryOp::Lt));
    }

    #[test]
    fn reports_trailing_tokens_and_missing_parens() {
        assert!(matches!(
            parse_str("1 2"),
            Err(ExpressionError::UnexpectedToken { offset: 2, .. })
        ));
        assert_eq!(parse_str("(1 + 2"), Err(ExpressionError::UnexpectedEnd));
        assert_eq!(parse_str("1 +"), Err(ExpressionError::UnexpectedEnd));
        assert_eq!(parse_str("   "), Err(ExpressionError::Empty));
    }

    #[test]
    fn nested_negation() {
        assert_eq!(
            parse_str("--2").unwrap(),
            Expr::Neg(Box::new(Expr::Neg(Box::new(Expr::Number(2.0)))))
        );
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let parens = format!("{}1", "(".repeat(10_000));
        assert_eq!(parse_str(&parens), Err(ExpressionError::TooDeep { offset: MAX_NESTING }));

        let negations = format!("{}1", "-".repeat(10_000));
        assert_eq!(parse_str(&negations), Err(ExpressionError::TooDeep { offset: MAX_NESTING }));

        let allowed = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(parse_str(&allowed).unwrap().top_level_op(), None);
    }

    #[test]
    fn long_operator_chains_are_rejected() {
        let chain = vec!["1"; 5_000].join("+");
        assert!(matches!(parse_str(&chain), Err(ExpressionError::TooLarge { .. })));
        assert!(parse_str(&vec!["1"; 100].join("+")).is_ok());
    }
}
