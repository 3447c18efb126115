use crate::traits::{constant, Scalar, VectorField};
use std::collections::HashMap;
use thiserror::Error;

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Scalar` values (f64 or Dual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the value of a state variable (by index) onto the stack.
    LoadVar(usize),
    /// Pushes the value of a trainable parameter (by index) onto the stack.
    LoadParam(usize),
    /// Pushes the current time.
    LoadTime,
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Neg,
    Sin,
    Cos,
    Exp,
    Tanh,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
}

impl Bytecode {
    /// Deepest stack the program reaches, used to size the VM stack up front.
    pub fn max_depth(&self) -> usize {
        let mut depth = 0usize;
        let mut max = 0usize;
        for op in &self.ops {
            match op {
                OpCode::LoadConst(_) | OpCode::LoadVar(_) | OpCode::LoadParam(_) | OpCode::LoadTime => {
                    depth += 1
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    depth = depth.saturating_sub(1)
                }
                _ => {}
            }
            max = max.max(depth);
        }
        max
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),
    #[error("invalid number literal \"{0}\"")]
    InvalidNumber(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unexpected token {0}")]
    UnexpectedToken(String),
    #[error("unknown variable or parameter: {0}")]
    UnknownName(String),
    #[error("unknown function: {0}")]
    UnknownFunction(String),
    #[error("expected {expected} equations (one per state variable), got {actual}")]
    EquationCount { expected: usize, actual: usize },
}

/// Stateless stack machine evaluating compiled equations.
pub struct VM;

impl VM {
    /// Executes the bytecode.
    ///
    /// # Type Parameters
    /// * `T`: The scalar type (e.g., `f64` or `Dual`).
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        t: T,
        vars: &[T],
        params: &[T],
        stack: &mut Vec<T>,
    ) -> T {
        stack.clear();

        for op in &bytecode.ops {
            let value = match *op {
                OpCode::LoadConst(val) => constant(val),
                OpCode::LoadVar(idx) => vars[idx],
                OpCode::LoadParam(idx) => params[idx],
                OpCode::LoadTime => t,
                OpCode::Neg => -pop(stack),
                OpCode::Sin => pop(stack).sin(),
                OpCode::Cos => pop(stack).cos(),
                OpCode::Exp => pop(stack).exp(),
                OpCode::Tanh => pop(stack).tanh(),
                binary => {
                    let b = pop(stack);
                    let a = pop(stack);
                    match binary {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    }
                }
            };
            stack.push(value);
        }

        pop(stack)
    }
}

// Compiled programs are balanced; an underflow yields NaN, which the
// integrator reports as a non-finite state.
fn pop<T: Scalar>(stack: &mut Vec<T>) -> T {
    stack.pop().unwrap_or_else(T::nan)
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>),
    Negate(Box<Expr>),
    Call(String, Box<Expr>),
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable and parameter names to indices; `t` is the time.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let index = |names: &[String]| {
            names
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), i))
                .collect::<HashMap<_, _>>()
        };
        Self {
            var_map: index(var_names),
            param_map: index(param_names),
        }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode, ParseError> {
        let mut ops = Vec::new();
        self.emit(expr, &mut ops)?;
        Ok(Bytecode { ops })
    }

    fn emit(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<(), ParseError> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                let op = if let Some(&idx) = self.var_map.get(name) {
                    OpCode::LoadVar(idx)
                } else if let Some(&idx) = self.param_map.get(name) {
                    OpCode::LoadParam(idx)
                } else if name == "t" {
                    OpCode::LoadTime
                } else {
                    return Err(ParseError::UnknownName(name.clone()));
                };
                ops.push(op);
            }
            Expr::Binary(left, op, right) => {
                self.emit(left, ops)?;
                self.emit(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    _ => OpCode::Pow,
                });
            }
            Expr::Negate(operand) => {
                self.emit(operand, ops)?;
                ops.push(OpCode::Neg);
            }
            Expr::Call(func, arg) => {
                self.emit(arg, ops)?;
                ops.push(match func.as_str() {
                    "sin" => OpCode::Sin,
                    "cos" => OpCode::Cos,
                    "exp" => OpCode::Exp,
                    "tanh" => OpCode::Tanh,
                    _ => return Err(ParseError::UnknownFunction(func.clone())),
                });
            }
        }
        Ok(())
    }
}

/// Parses a string expression into an AST.
/// Grammar: `+ -` < `* /` < unary minus < `^` (right associative).
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.additive()?;
    match parser.next() {
        None => Ok(expr),
        Some(token) => Err(ParseError::UnexpectedToken(format!("{token:?}"))),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Op(char),
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut literal = String::new();
            while let Some(&d) = chars.peek() {
                let exponent_sign = (d == '-' || d == '+') && literal.ends_with(['e', 'E']);
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    literal.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = literal
                .parse()
                .map_err(|_| ParseError::InvalidNumber(literal.clone()))?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' | '-' | '*' | '/' | '^' => Token::Op(c),
                '(' => Token::LParen,
                ')' => Token::RParen,
                other => return Err(ParseError::UnexpectedChar(other)),
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn binary_level(
        &mut self,
        ops: &[char],
        operand: fn(&mut Self) -> Result<Expr, ParseError>,
    ) -> Result<Expr, ParseError> {
        let mut left = operand(self)?;
        while let Some(&Token::Op(op)) = self.peek() {
            if !ops.contains(&op) {
                break;
            }
            self.next();
            let right = operand(self)?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn additive(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&['+', '-'], Self::multiplicative)
    }

    fn multiplicative(&mut self) -> Result<Expr, ParseError> {
        self.binary_level(&['*', '/'], Self::unary)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(Token::Op('-')) = self.peek() {
            self.next();
            return Ok(Expr::Negate(Box::new(self.unary()?)));
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.primary()?;
        if let Some(Token::Op('^')) = self.peek() {
            self.next();
            // -x^2 binds as -(x^2); the exponent may itself be negated.
            let exponent = self.unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.next();
                    let arg = self.additive()?;
                    self.expect_close()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.additive()?;
                self.expect_close()?;
                Ok(expr)
            }
            Some(token) => Err(ParseError::UnexpectedToken(format!("{token:?}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }

    fn expect_close(&mut self) -> Result<(), ParseError> {
        match self.next() {
            Some(Token::RParen) => Ok(()),
            Some(token) => Err(ParseError::UnexpectedToken(format!("{token:?}"))),
            None => Err(ParseError::UnexpectedEnd),
        }
    }
}

// --- EquationField ---

/// A vector field defined by user-written equations, one per state
/// variable, whose named parameters are the trainable parameters.
#[derive(Debug, Clone)]
pub struct EquationField {
    pub equations: Vec<Bytecode>,
    parameter_count: usize,
    stack_depth: usize,
}

impl EquationField {
    pub fn new(equations: Vec<Bytecode>, parameter_count: usize) -> Self {
        let stack_depth = equations.iter().map(Bytecode::max_depth).max().unwrap_or(0);
        Self {
            equations,
            parameter_count,
            stack_depth,
        }
    }

    /// Parses and compiles `equations[i]` as `d var_names[i] / dt`.
    pub fn compile(
        equations: &[String],
        var_names: &[String],
        param_names: &[String],
    ) -> Result<Self, ParseError> {
        if equations.len() != var_names.len() {
            return Err(ParseError::EquationCount {
                expected: var_names.len(),
                actual: equations.len(),
            });
        }
        let compiler = Compiler::new(var_names, param_names);
        let bytecodes = equations
            .iter()
            .map(|source| compiler.compile(&parse(source)?))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(bytecodes, param_names.len()))
    }
}

impl VectorField for EquationField {
    fn dimension(&self) -> usize {
        self.equations.len()
    }

    fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    fn apply<T: Scalar>(&self, t: T, x: &[T], params: &[T], out: &mut [T]) {
        // A per-call stack keeps the field Sync for concurrent group solves.
        let mut stack = Vec::with_capacity(self.stack_depth);
        for (i, eq) in self.equations.iter().enumerate() {
            out[i] = VM::execute(eq, t, x, params, &mut stack);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::Dual;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn eval(source: &str, x: f64) -> f64 {
        let field = EquationField::compile(&[source.to_string()], &names(&["x"]), &[])
            .expect("compile");
        let mut out = [0.0];
        field.apply(0.0, &[x], &[], &mut out);
        out[0]
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3", 0.0), 7.0);
        assert_eq!(eval("(1 + 2) * 3", 0.0), 9.0);
        assert_eq!(eval("2 ^ 3 ^ 2", 0.0), 512.0);
        assert_eq!(eval("-x ^ 2", 3.0), -9.0);
        assert_eq!(eval("8 / 4 / 2", 0.0), 1.0);
        assert_eq!(eval("x - 1 - 1", 5.0), 3.0);
        assert_eq!(eval("2e-1 * 10", 0.0), 2.0);
    }

    #[test]
    fn functions_evaluate() {
        assert!((eval("tanh(x)", 0.5) - 0.5f64.tanh()).abs() < 1e-15);
        assert!((eval("exp(-x) + sin(x) * cos(x)", 0.2)
            - ((-0.2f64).exp() + 0.2f64.sin() * 0.2f64.cos()))
        .abs()
            < 1e-15);
    }

    #[test]
    fn reports_parse_errors() {
        assert_eq!(parse("1 +"), Err(ParseError::UnexpectedEnd));
        assert_eq!(parse("2 $ 3"), Err(ParseError::UnexpectedChar('$')));
        assert!(matches!(parse("(1 + 2"), Err(ParseError::UnexpectedEnd)));
        assert!(matches!(parse("1 2"), Err(ParseError::UnexpectedToken(_))));

        let compiler = Compiler::new(&names(&["x"]), &[]);
        let err = compiler.compile(&parse("y + 1").unwrap()).unwrap_err();
        assert_eq!(err, ParseError::UnknownName("y".into()));
        let err = compiler.compile(&parse("sqrt(x)").unwrap()).unwrap_err();
        assert_eq!(err, ParseError::UnknownFunction("sqrt".into()));
    }

    #[test]
    fn compile_checks_equation_count() {
        let err = EquationField::compile(&names(&["x"]), &names(&["x", "y"]), &[]).unwrap_err();
        assert_eq!(
            err,
            ParseError::EquationCount {
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn lotka_volterra_field_differentiates_through_parameters() {
        let field = EquationField::compile(
            &names(&["a*x - b*x*y", "-c*y + d*x*y"]),
            &names(&["x", "y"]),
            &names(&["a", "b", "c", "d"]),
        )
        .expect("compile");
        assert_eq!(field.dimension(), 2);
        assert_eq!(field.parameter_count(), 4);

        let x = [Dual::constant(2.0), Dual::constant(3.0)];
        let params = [
            Dual::constant(1.5),
            Dual::variable(1.0),
            Dual::constant(3.0),
            Dual::constant(1.0),
        ];
        let mut out = [Dual::constant(0.0); 2];
        field.apply(Dual::constant(0.0), &x, &params, &mut out);
        assert_eq!(out[0].val, 1.5 * 2.0 - 6.0);
        assert_eq!(out[0].eps, -6.0);
        assert_eq!(out[1].eps, 0.0);
    }

    #[test]
    fn time_is_available_when_not_shadowed() {
        let field = EquationField::compile(&names(&["t * x"]), &names(&["x"]), &[]).expect("compile");
        let mut out = [0.0];
        field.apply(2.0, &[3.0], &[], &mut out);
        assert_eq!(out[0], 6.0);
    }

    #[test]
    fn max_depth_tracks_stack_usage() {
        let compiler = Compiler::new(&names(&["x"]), &[]);
        let code = compiler.compile(&parse("1 + 2 * (3 + x)").unwrap()).unwrap();
        assert_eq!(code.max_depth(), 4);
    }
}
