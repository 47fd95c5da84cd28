use crate::token::Span;

/// A parsed expression node with its source range.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    /// A bare name: `t`, `PI`, a local, or something undefined.
    Ident(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Binary operators of one precedence level, applied left to right:
    /// `a-b+c` is a single chain `a (-b) (+c)`. `a**b` is a one-link chain
    /// whose right side holds any further `**`.
    Chain {
        head: Box<Expr>,
        links: Vec<Link>,
    },
    /// `cond ? then : otherwise`
    Conditional {
        cond: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    /// `name = value` or `name op= value`.
    Assign {
        target: String,
        target_span: Span,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    /// `name(args)`: helpers and the `plot` probe.
    Call {
        callee: String,
        callee_span: Span,
        args: Vec<Expr>,
    },
    /// `a, b, c`: evaluates all, yields the last.
    Sequence(Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
    BitNot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Shl,
    Shr,
    UShr,
    BitAnd,
    BitOr,
    BitXor,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Operator joining two operands of a chain. `&&` / `||` short-circuit and
/// yield an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOp {
    Binary(BinaryOp),
    Logical(LogicalOp),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Link {
    pub op: ChainOp,
    pub rhs: Expr,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Expr { kind, span }
    }

    /// Visit this node and all of its descendants, parents first.
    pub fn walk(&self, visit: &mut impl FnMut(&Expr)) {
        visit(self);
        match &self.kind {
            ExprKind::Number(_) | ExprKind::Ident(_) => {}
            ExprKind::Unary { operand, .. } => operand.walk(visit),
            ExprKind::Chain { head, links } => {
                head.walk(visit);
                links.iter().for_each(|l| l.rhs.walk(visit));
            }
            ExprKind::Conditional { cond, then, otherwise } => {
                cond.walk(visit);
                then.walk(visit);
                otherwise.walk(visit);
            }
            ExprKind::Assign { value, .. } => value.walk(visit),
            ExprKind::Call { args, .. } => args.iter().for_each(|a| a.walk(visit)),
            ExprKind::Sequence(items) => items.iter().for_each(|e| e.walk(visit)),
        }
    }
}
