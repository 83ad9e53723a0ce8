//! Arithmetic evaluator for dose equations.
//!
//! Equations are tiny formulas over two symbols: `W` (patient weight in kg)
//! and `D` (a clinician-supplied secondary dose). The grammar is restricted to
//! decimal literals, `+ - * /`, parentheses and unary minus:
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/') unary)*
//! unary   := '-' unary | primary
//! primary := NUMBER | 'W' | 'D' | '(' expr ')'
//! ```
//!
//! Anything else is rejected while lexing, so evaluation never runs more than
//! arithmetic. Length and nesting are capped so parsing and evaluation stay
//! within a bounded recursion depth.

use logos::Logos;
use std::fmt;
use std::ops::Range;

/// Most tokens accepted in one equation
pub const MAX_TOKENS: usize = 1024;

/// Deepest nesting of parentheses and unary minus accepted
pub const MAX_NESTING: usize = 64;

/// Lexical tokens of an equation
#[derive(Logos, Debug, Clone, Copy, PartialEq)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    #[token("W")]
    Weight,

    #[token("D")]
    Dose,

    #[token("+")]
    Plus,

    #[token("-")]
    Minus,

    #[token("*")]
    Star,

    #[token("/")]
    Slash,

    #[token("(")]
    LParen,

    #[token(")")]
    RParen,

    #[regex(r"[0-9]+(\.[0-9]+)?|\.[0-9]+", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Weight => write!(f, "W"),
            Token::Dose => write!(f, "D"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::Number(n) => write!(f, "{}", n),
        }
    }
}

/// Equation evaluation failure
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("unexpected character '{snippet}' at position {position}")]
    UnexpectedCharacter { position: usize, snippet: String },

    #[error("unexpected '{found}' at position {position}")]
    UnexpectedToken { position: usize, found: String },

    #[error("unexpected end of equation")]
    UnexpectedEnd,

    #[error("symbol '{0}' has no value")]
    UnboundSymbol(char),

    #[error("division by zero")]
    DivisionByZero,

    #[error("equation nests deeper than {} levels at position {position}", MAX_NESTING)]
    TooDeep { position: usize },

    #[error("equation is longer than {} tokens", MAX_TOKENS)]
    TooLong,
}

/// A symbol an equation may reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbol {
    /// Patient weight in kilograms
    Weight,
    /// Secondary dose supplied by the clinician
    Dose,
}

impl Symbol {
    pub fn as_char(self) -> char {
        match self {
            Symbol::Weight => 'W',
            Symbol::Dose => 'D',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Symbol(Symbol),
    Neg(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

/// Values bound to the equation symbols for one evaluation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bindings {
    pub weight: f64,
    pub dose: Option<f64>,
}

impl Bindings {
    pub fn new(weight: f64) -> Self {
        Self { weight, dose: None }
    }

    pub fn with_dose(mut self, dose: Option<f64>) -> Self {
        self.dose = dose;
        self
    }

    fn value_of(&self, symbol: Symbol) -> Option<f64> {
        match symbol {
            Symbol::Weight => Some(self.weight),
            Symbol::Dose => self.dose,
        }
    }
}

/// A parsed equation, ready to be evaluated any number of times
#[derive(Debug, Clone, PartialEq)]
pub struct Equation {
    source: String,
    tokens: Vec<Token>,
    expr: Expr,
}

impl Equation {
    /// Parse an equation template such as `(0.6 * W) / 4`
    pub fn parse(source: &str) -> Result<Self, EvalError> {
        let spanned = tokenize(source)?;
        let mut parser = Parser {
            tokens: &spanned,
            pos: 0,
            depth: 0,
        };
        let expr = parser.expr()?;
        if let Some((token, span)) = parser.peek() {
            return Err(EvalError::UnexpectedToken {
                position: span.start,
                found: token.to_string(),
            });
        }

        Ok(Self {
            source: source.to_string(),
            tokens: spanned.into_iter().map(|(t, _)| t).collect(),
            expr,
        })
    }

    /// The equation text as written
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Whether the equation references `symbol`
    pub fn uses(&self, symbol: Symbol) -> bool {
        let wanted = match symbol {
            Symbol::Weight => Token::Weight,
            Symbol::Dose => Token::Dose,
        };
        self.tokens.contains(&wanted)
    }

    /// Evaluate with the given bindings
    pub fn eval(&self, bindings: &Bindings) -> Result<f64, EvalError> {
        eval_expr(&self.expr, bindings)
    }

    /// The equation with each bound symbol replaced by its value, e.g. `0.1 * 10`
    pub fn substituted(&self, bindings: &Bindings) -> String {
        self.source
            .chars()
            .map(|c| match c {
                'W' => bindings.weight.to_string(),
                'D' => bindings
                    .dose
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "D".to_string()),
                other => other.to_string(),
            })
            .collect()
    }
}

/// Parse and evaluate `equation` in one step
pub fn evaluate(equation: &str, bindings: &Bindings) -> Result<f64, EvalError> {
    Equation::parse(equation)?.eval(bindings)
}

/// Evaluate `equation` for a weight alone, without any clamping
///
/// Equations that need `D` fail with [`EvalError::UnboundSymbol`].
pub fn validate_equation(equation: &str, weight: f64) -> Result<f64, EvalError> {
    evaluate(equation, &Bindings::new(weight))
}

fn tokenize(source: &str) -> Result<Vec<(Token, Range<usize>)>, EvalError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);

    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => {
                if tokens.len() == MAX_TOKENS {
                    return Err(EvalError::TooLong);
                }
                tokens.push((token, lexer.span()));
            }
            Err(_) => {
                let span = lexer.span();
                return Err(EvalError::UnexpectedCharacter {
                    position: span.start,
                    snippet: source[span].to_string(),
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser<'a> {
    tokens: &'a [(Token, Range<usize>)],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&'a (Token, Range<usize>)> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&'a (Token, Range<usize>)> {
        let item = self.tokens.get(self.pos);
        if item.is_some() {
            self.pos += 1;
        }
        item
    }

    fn descend(&mut self, position: usize) -> Result<(), EvalError> {
        if self.depth == MAX_NESTING {
            return Err(EvalError::TooDeep { position });
        }
        self.depth += 1;
        Ok(())
    }

    fn expr(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.term()?;
        while let Some((token, _)) = self.peek() {
            let op = match token {
                Token::Plus => BinOp::Add,
                Token::Minus => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, EvalError> {
        let mut lhs = self.unary()?;
        while let Some((token, _)) = self.peek() {
            let op = match token {
                Token::Star => BinOp::Mul,
                Token::Slash => BinOp::Div,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, EvalError> {
        if let Some((Token::Minus, span)) = self.peek() {
            self.pos += 1;
            self.descend(span.start)?;
            let inner = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, EvalError> {
        let (token, span) = self.advance().ok_or(EvalError::UnexpectedEnd)?;
        match token {
            Token::Number(n) => Ok(Expr::Number(*n)),
            Token::Weight => Ok(Expr::Symbol(Symbol::Weight)),
            Token::Dose => Ok(Expr::Symbol(Symbol::Dose)),
            Token::LParen => {
                self.descend(span.start)?;
                let inner = self.expr()?;
                self.depth -= 1;
                match self.advance() {
                    Some((Token::RParen, _)) => Ok(inner),
                    Some((other, span)) => Err(EvalError::UnexpectedToken {
                        position: span.start,
                        found: other.to_string(),
                    }),
                    None => Err(EvalError::UnexpectedEnd),
                }
            }
            other => Err(EvalError::UnexpectedToken {
                position: span.start,
                found: other.to_string(),
            }),
        }
    }
}

fn eval_expr(expr: &Expr, bindings: &Bindings) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Symbol(symbol) => bindings
            .value_of(*symbol)
            .ok_or(EvalError::UnboundSymbol(symbol.as_char())),
        Expr::Neg(inner) => Ok(-eval_expr(inner, bindings)?),
        Expr::Binary { op, lhs, rhs } => {
            let l = eval_expr(lhs, bindings)?;
            let r = eval_expr(rhs, bindings)?;
            match op {
                BinOp::Add => Ok(l + r),
                BinOp::Sub => Ok(l - r),
                BinOp::Mul => Ok(l * r),
                BinOp::Div => {
                    if r == 0.0 {
                        Err(EvalError::DivisionByZero)
                    } else {
                        Ok(l / r)
                    }
                }
            }
        }
    }
}
