//! Predicate expression algebra.
//!
//! Relation predicates are two-parameter boolean lambdas over a parent and a
//! child entity. The algebra covers parameter references, member
//! access, literals, conversions, comparisons and boolean connectives.

use std::fmt;

/// Which lambda parameter an expression refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Parent,
    Child,
}

/// A literal constant.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) if x.fract() == 0.0 && x.is_finite() => write!(f, "{x:.1}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

/// Scalar target of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Int,
    Float,
    String,
    Bool,
}

impl ScalarType {
    /// Resolves a type name written after `as`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int" | "i32" | "i64" | "long" => Some(Self::Int),
            "float" | "f32" | "f64" | "double" | "decimal" => Some(Self::Float),
            "string" | "str" => Some(Self::String),
            "bool" | "boolean" => Some(Self::Bool),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::String => "string",
            Self::Bool => "bool",
        }
    }

    /// True for conversions that only widen a numeric value.
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Int | Self::Float)
    }
}

/// Conversion target, optionally nullable (`as int?`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub scalar: ScalarType,
    pub nullable: bool,
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.scalar.name())?;
        if self.nullable {
            f.write_str("?")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::And => "&&",
            Self::Or => "||",
        }
    }

    const fn precedence(self) -> u8 {
        match self {
            Self::Or => 1,
            Self::And => 2,
            _ => 3,
        }
    }
}

/// An expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Param(Side),
    Member { base: Box<Expr>, field: String },
    Literal(Literal),
    Convert { expr: Box<Expr>, to: TypeRef },
    Not(Box<Expr>),
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn member(base: Expr, field: impl Into<String>) -> Self {
        Self::Member {
            base: Box::new(base),
            field: field.into(),
        }
    }

    /// `side.a.b.c` from a dotted path.
    pub fn path(side: Side, path: &[&str]) -> Self {
        path.iter()
            .fold(Self::Param(side), |base, field| Self::member(base, *field))
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn eq(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Eq, lhs, rhs)
    }

    pub fn and(lhs: Expr, rhs: Expr) -> Self {
        Self::binary(BinaryOp::And, lhs, rhs)
    }

    pub fn convert(expr: Expr, to: TypeRef) -> Self {
        Self::Convert {
            expr: Box::new(expr),
            to,
        }
    }

    /// Splits a chain of `&&` into its operands, left to right.
    pub fn conjuncts(&self) -> Vec<&Expr> {
        let mut terms = Vec::new();
        self.collect_conjuncts(&mut terms);
        terms
    }

    fn collect_conjuncts<'a>(&'a self, out: &mut Vec<&'a Expr>) {
        match self {
            Self::Binary {
                op: BinaryOp::And,
                lhs,
                rhs,
            } => {
                lhs.collect_conjuncts(out);
                rhs.collect_conjuncts(out);
            }
            other => out.push(other),
        }
    }

    /// Returns whether the expression mentions the given parameter.
    pub fn references(&self, side: Side) -> bool {
        match self {
            Self::Param(s) => *s == side,
            Self::Literal(_) => false,
            Self::Member { base, .. } => base.references(side),
            Self::Convert { expr, .. } | Self::Not(expr) => expr.references(side),
            Self::Binary { lhs, rhs, .. } => lhs.references(side) || rhs.references(side),
        }
    }

    /// Strips any conversions wrapping the expression.
    pub fn unwrap_converts(&self) -> (&Expr, Option<TypeRef>) {
        let mut current = self;
        let mut outermost = None;
        while let Self::Convert { expr, to } = current {
            outermost.get_or_insert(*to);
            current = expr;
        }
        (current, outermost)
    }

    /// If the expression is `param.a.b...` returns the root side and path.
    pub fn as_accessor(&self) -> Option<(Side, Vec<String>)> {
        match self {
            Self::Param(side) => Some((*side, Vec::new())),
            Self::Member { base, field } => {
                let (side, mut path) = base.as_accessor()?;
                path.push(field.clone());
                Some((side, path))
            }
            _ => None,
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Self::Binary { op, .. } => op.precedence(),
            Self::Not(_) => 4,
            Self::Convert { .. } => 5,
            _ => 6,
        }
    }
}

/// A parsed two-parameter predicate, `(p, c) => body`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub parent: String,
    pub child: String,
    pub body: Expr,
}

impl Predicate {
    pub fn new(parent: impl Into<String>, child: impl Into<String>, body: Expr) -> Self {
        Self {
            parent: parent.into(),
            child: child.into(),
            body,
        }
    }

    pub fn name_of(&self, side: Side) -> &str {
        match side {
            Side::Parent => &self.parent,
            Side::Child => &self.child,
        }
    }

    /// Renders a sub-expression using this predicate's parameter names.
    pub fn display<'a>(&'a self, expr: &'a Expr) -> impl fmt::Display + 'a {
        Rendered {
            expr,
            names: (&self.parent, &self.child),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}) => {}",
            self.parent,
            self.child,
            self.display(&self.body)
        )
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Rendered {
            expr: self,
            names: ("parent", "child"),
        }
        .fmt(f)
    }
}

struct Rendered<'a> {
    expr: &'a Expr,
    names: (&'a str, &'a str),
}

impl Rendered<'_> {
    fn write(&self, f: &mut fmt::Formatter<'_>, expr: &Expr, min_prec: u8) -> fmt::Result {
        let wrap = expr.precedence() < min_prec;
        if wrap {
            f.write_str("(")?;
        }
        match expr {
            Expr::Param(Side::Parent) => f.write_str(self.names.0)?,
            Expr::Param(Side::Child) => f.write_str(self.names.1)?,
            Expr::Literal(lit) => write!(f, "{lit}")?,
            Expr::Member { base, field } => {
                self.write(f, base, 6)?;
                write!(f, ".{field}")?;
            }
            Expr::Convert { expr, to } => {
                self.write(f, expr, 5)?;
                write!(f, " as {to}")?;
            }
            Expr::Not(inner) => {
                f.write_str("!")?;
                self.write(f, inner, 4)?;
            }
            Expr::Binary { op, lhs, rhs } => {
                let prec = op.precedence();
                // Comparisons do not chain, so both operands bind tighter.
                let (left, right) = if prec == 3 {
                    (prec + 1, prec + 1)
                } else {
                    (prec, prec + 1)
                };
                self.write(f, lhs, left)?;
                write!(f, " {} ", op.symbol())?;
                self.write(f, rhs, right)?;
            }
        }
        if wrap {
            f.write_str(")")?;
        }
        Ok(())
    }
}

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, self.expr, 0)
    }
}
