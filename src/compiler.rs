//! Expression compiler: turns source text into an immutable, shareable
//! program and evaluates it against a caller-owned [`Frame`].
//!
//! Two flavours share one program representation:
//! - [`CompiledFunction`]: `plot(x)` is a transparent identity, used by the
//!   signal generator.
//! - [`ProbeFunction`]: `plot(x)` additionally records `Number(x) || 0` into
//!   the frame's probe buffer, used by the plotting side.

use std::sync::Arc;

use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::ast::{BinaryOp, ChainOp, Expr, ExprKind, LogicalOp, UnaryOp};
use crate::builtins::{
    self, Arity, Builtin, bool_to_f64, js_pow, number_or_zero, to_int32, to_uint32, truthy,
};
use crate::error::{CompileError, ParseError, RuntimeError};

/// Maximum number of `plot()` values recorded in one evaluation.
pub const PROBE_LIMIT: usize = 64;

const RNG_SEED: u64 = 0x5EED_B17E;

// ── Resolved program ────────────────────────────────────────

/// Where an assignment writes.
#[derive(Debug, Clone)]
enum Slot {
    Time,
    Local(usize, Arc<str>),
}

#[derive(Debug)]
enum Node {
    Const(f64),
    Time,
    Local(usize, Arc<str>),
    /// A name with no binding; reading it is a runtime error.
    Unbound(Arc<str>),
    Unary(UnaryOp, Box<Node>),
    /// Left-to-right operator run; evaluated in a loop.
    Chain(Box<Node>, Vec<(ChainOp, Node)>),
    Conditional(Box<Node>, Box<Node>, Box<Node>),
    Assign {
        slot: Slot,
        op: Option<BinaryOp>,
        value: Box<Node>,
    },
    Call(Builtin, Vec<Node>),
    Plot(Vec<Node>),
    /// Call of something that is not a helper.
    BadCall {
        name: Arc<str>,
        defined: bool,
        args: Vec<Node>,
    },
    Sequence(Vec<Node>),
}

/// An immutable compiled expression.
#[derive(Debug)]
struct Program {
    root: Node,
    locals: Vec<Arc<str>>,
    source: String,
}

// ── Compilation ─────────────────────────────────────────────

/// Compile `source` into a function where `plot(x)` is the identity.
pub fn compile(source: &str) -> Result<CompiledFunction, CompileError> {
    let expr = crate::parse(source)?;
    let program = resolve(&expr, source)?;
    Ok(CompiledFunction {
        program: Arc::new(program),
    })
}

/// Compile `source` into a function that records every `plot(x)` value.
pub fn compile_with_probe(source: &str) -> Result<ProbeFunction, CompileError> {
    Ok(ProbeFunction {
        function: compile(source)?,
    })
}

/// Bind every name in `expr`: `t`, constants, helpers, locals, or unbound.
fn resolve(expr: &Expr, source: &str) -> Result<Program, ParseError> {
    let mut locals: Vec<Arc<str>> = Vec::new();
    let mut error = None;
    expr.walk(&mut |node| {
        if let ExprKind::Assign { target, target_span, .. } = &node.kind {
            if builtins::is_reserved(target) {
                error.get_or_insert(ParseError::ReadOnlyBinding {
                    name: target.clone(),
                    span: *target_span,
                });
            } else if target != "t" && !locals.iter().any(|l| &**l == target) {
                locals.push(Arc::from(target.as_str()));
            }
        }
    });
    if let Some(e) = error {
        return Err(e);
    }

    let root = Resolver { locals: &locals }.node(expr);
    Ok(Program {
        root,
        locals,
        source: source.to_string(),
    })
}

struct Resolver<'a> {
    locals: &'a [Arc<str>],
}

impl Resolver<'_> {
    fn local(&self, name: &str) -> Option<usize> {
        self.locals.iter().position(|l| &**l == name)
    }

    fn boxed(&self, expr: &Expr) -> Box<Node> {
        Box::new(self.node(expr))
    }

    fn node(&self, expr: &Expr) -> Node {
        match &expr.kind {
            ExprKind::Number(n) => Node::Const(*n),
            ExprKind::Ident(name) => self.name(name),
            ExprKind::Unary { op, operand } => Node::Unary(*op, self.boxed(operand)),
            ExprKind::Chain { head, links } => Node::Chain(
                self.boxed(head),
                links.iter().map(|l| (l.op, self.node(&l.rhs))).collect(),
            ),
            ExprKind::Conditional { cond, then, otherwise } => {
                Node::Conditional(self.boxed(cond), self.boxed(then), self.boxed(otherwise))
            }
            ExprKind::Assign { target, op, value, .. } => {
                let slot = match self.local(target) {
                    Some(idx) => Slot::Local(idx, self.locals[idx].clone()),
                    None => Slot::Time,
                };
                Node::Assign {
                    slot,
                    op: *op,
                    value: self.boxed(value),
                }
            }
            ExprKind::Call { callee, args, .. } => {
                let args: Vec<Node> = args.iter().map(|a| self.node(a)).collect();
                if callee == builtins::PLOT {
                    Node::Plot(args)
                } else if let Some(builtin) = Builtin::lookup(callee) {
                    Node::Call(builtin, args)
                } else {
                    let defined = callee == "t"
                        || builtins::constant(callee).is_some()
                        || self.local(callee).is_some();
                    Node::BadCall {
                        name: Arc::from(callee.as_str()),
                        defined,
                        args,
                    }
                }
            }
            ExprKind::Sequence(items) => Node::Sequence(items.iter().map(|e| self.node(e)).collect()),
        }
    }

    fn name(&self, name: &str) -> Node {
        if name == "t" {
            return Node::Time;
        }
        if let Some(value) = builtins::constant(name) {
            return Node::Const(value);
        }
        if let Some(idx) = self.local(name) {
            return Node::Local(idx, self.locals[idx].clone());
        }
        if name == builtins::PLOT || Builtin::lookup(name).is_some() {
            // A function used as a number.
            return Node::Const(f64::NAN);
        }
        Node::Unbound(Arc::from(name))
    }
}

// ── Evaluation frame ────────────────────────────────────────

/// Scratch state for evaluating compiled functions.
///
/// Owned by the caller and reused across calls so the audio path does not
/// allocate; size it with [`Frame::reserve_for`] whenever a new function is
/// installed.
#[derive(Debug, Clone)]
pub struct Frame {
    t: f64,
    locals: Vec<Option<f64>>,
    probes: Vec<f64>,
    probing: bool,
    rng: SmallRng,
}

impl Default for Frame {
    fn default() -> Self {
        Frame::new()
    }
}

impl Frame {
    pub fn new() -> Self {
        Frame {
            t: 0.0,
            locals: Vec::new(),
            probes: Vec::new(),
            probing: false,
            rng: SmallRng::seed_from_u64(RNG_SEED),
        }
    }

    /// Grow the local slots so `function` can run without allocating.
    pub fn reserve_for(&mut self, function: &CompiledFunction) {
        self.reserve_for_program(&function.program);
    }

    fn begin(&mut self, program: &Program, t: f64, probing: bool) {
        self.reserve_for_program(program);
        for slot in &mut self.locals {
            *slot = None;
        }
        self.probes.clear();
        self.probing = probing;
        self.t = t;
    }

    fn reserve_for_program(&mut self, program: &Program) {
        if self.locals.len() < program.locals.len() {
            self.locals.resize(program.locals.len(), None);
        }
    }
}

// ── Public function handles ─────────────────────────────────

/// A compiled `(t) -> number` function. Cloning is a handle copy.
#[derive(Debug, Clone)]
pub struct CompiledFunction {
    program: Arc<Program>,
}

impl CompiledFunction {
    /// A function that always returns 0.
    pub fn silence() -> Self {
        CompiledFunction {
            program: Arc::new(Program {
                root: Node::Const(0.0),
                locals: Vec::new(),
                source: "0".to_string(),
            }),
        }
    }

    /// The expression text this function was compiled from.
    pub fn source(&self) -> &str {
        &self.program.source
    }

    /// Do both handles refer to the same compiled program?
    pub fn same_as(&self, other: &CompiledFunction) -> bool {
        Arc::ptr_eq(&self.program, &other.program)
    }

    /// Evaluate at `t` with a throwaway frame.
    pub fn eval(&self, t: f64) -> Result<f64, RuntimeError> {
        self.eval_in(&mut Frame::new(), t)
    }

    /// Evaluate at `t` and coerce the result with `Number(x) || 0`.
    pub fn eval_in(&self, frame: &mut Frame, t: f64) -> Result<f64, RuntimeError> {
        frame.begin(&self.program, t, false);
        eval(&self.program.root, frame).map(number_or_zero)
    }
}

/// One probing evaluation: the coerced result plus every `plot()` value,
/// in call order.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSample {
    pub sample: f64,
    pub plots: Vec<f64>,
}

/// A compiled function whose `plot(x)` calls are recorded.
#[derive(Debug, Clone)]
pub struct ProbeFunction {
    function: CompiledFunction,
}

impl ProbeFunction {
    pub fn source(&self) -> &str {
        self.function.source()
    }

    pub fn eval(&self, t: f64) -> Result<ProbeSample, RuntimeError> {
        self.eval_in(&mut Frame::new(), t)
    }

    /// Evaluate at `t`; the returned plots are a copy of the probe buffer,
    /// which is reset at the start of every call.
    pub fn eval_in(&self, frame: &mut Frame, t: f64) -> Result<ProbeSample, RuntimeError> {
        let program = &self.function.program;
        frame.begin(program, t, true);
        let sample = number_or_zero(eval(&program.root, frame)?);
        Ok(ProbeSample {
            sample,
            plots: frame.probes.clone(),
        })
    }
}

// ── Tree-walking evaluator ──────────────────────────────────

fn eval(node: &Node, frame: &mut Frame) -> Result<f64, RuntimeError> {
    match node {
        Node::Const(v) => Ok(*v),
        Node::Time => Ok(frame.t),
        Node::Local(idx, name) => read_local(frame, *idx, name),
        Node::Unbound(name) => Err(RuntimeError::NotDefined { name: name.clone() }),
        Node::Unary(op, operand) => {
            let v = eval(operand, frame)?;
            Ok(match op {
                UnaryOp::Neg => -v,
                UnaryOp::Plus => v,
                UnaryOp::Not => bool_to_f64(!truthy(v)),
                UnaryOp::BitNot => f64::from(!to_int32(v)),
            })
        }
        Node::Chain(head, links) => {
            let mut acc = eval(head, frame)?;
            for (op, rhs) in links {
                acc = match (op, truthy(acc)) {
                    (ChainOp::Binary(op), _) => apply_binary(*op, acc, eval(rhs, frame)?),
                    (ChainOp::Logical(LogicalOp::And), false)
                    | (ChainOp::Logical(LogicalOp::Or), true) => acc,
                    (ChainOp::Logical(_), _) => eval(rhs, frame)?,
                };
            }
            Ok(acc)
        }
        Node::Conditional(cond, then, otherwise) => {
            if truthy(eval(cond, frame)?) {
                eval(then, frame)
            } else {
                eval(otherwise, frame)
            }
        }
        Node::Assign { slot, op, value } => {
            // Compound assignment reads the target before the right side runs.
            let current = match (op, slot) {
                (None, _) => None,
                (Some(_), Slot::Time) => Some(frame.t),
                (Some(_), Slot::Local(idx, name)) => Some(read_local(frame, *idx, name)?),
            };
            let rhs = eval(value, frame)?;
            let result = match (op, current) {
                (Some(op), Some(current)) => apply_binary(*op, current, rhs),
                _ => rhs,
            };
            match slot {
                Slot::Time => frame.t = result,
                Slot::Local(idx, _) => frame.locals[*idx] = Some(result),
            }
            Ok(result)
        }
        Node::Call(builtin, args) => call_builtin(*builtin, args, frame),
        Node::Plot(args) => {
            let mut first = f64::NAN;
            for (i, arg) in args.iter().enumerate() {
                let v = eval(arg, frame)?;
                if i == 0 {
                    first = v;
                }
            }
            if frame.probing {
                if frame.probes.len() >= PROBE_LIMIT {
                    return Err(RuntimeError::ProbeOverflow { limit: PROBE_LIMIT });
                }
                frame.probes.push(number_or_zero(first));
            }
            Ok(first)
        }
        Node::BadCall { name, defined, args } => {
            if !defined {
                // The callee lookup fails before any argument runs.
                return Err(RuntimeError::NotDefined { name: name.clone() });
            }
            for arg in args {
                eval(arg, frame)?;
            }
            Err(RuntimeError::NotAFunction { name: name.clone() })
        }
        Node::Sequence(items) => {
            let mut last = f64::NAN;
            for item in items {
                last = eval(item, frame)?;
            }
            Ok(last)
        }
    }
}

fn read_local(frame: &Frame, idx: usize, name: &Arc<str>) -> Result<f64, RuntimeError> {
    frame.locals[idx].ok_or_else(|| RuntimeError::NotDefined { name: name.clone() })
}

fn call_builtin(builtin: Builtin, args: &[Node], frame: &mut Frame) -> Result<f64, RuntimeError> {
    // Every argument is evaluated, even ones the helper ignores.
    let arity = builtin.arity();
    let mut first = f64::NAN;
    let mut second = f64::NAN;
    let mut folded = match arity {
        Arity::Variadic { identity, .. } => identity,
        _ => f64::NAN,
    };
    for (i, arg) in args.iter().enumerate() {
        let v = eval(arg, frame)?;
        match i {
            0 => first = v,
            1 => second = v,
            _ => {}
        }
        if let Arity::Variadic { fold, .. } = arity {
            folded = fold(folded, v);
        }
    }
    Ok(match arity {
        Arity::Nullary => builtin.call_nullary(&mut frame.rng),
        Arity::Unary(f) => f(first),
        Arity::Binary(f) => f(first, second),
        Arity::Variadic { .. } => folded,
    })
}

fn apply_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    let shift = || to_uint32(b) & 31;
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        BinaryOp::Pow => js_pow(a, b),
        BinaryOp::Shl => f64::from(to_int32(a).wrapping_shl(shift())),
        BinaryOp::Shr => f64::from(to_int32(a) >> shift()),
        BinaryOp::UShr => f64::from(to_uint32(a) >> shift()),
        BinaryOp::BitAnd => f64::from(to_int32(a) & to_int32(b)),
        BinaryOp::BitOr => f64::from(to_int32(a) | to_int32(b)),
        BinaryOp::BitXor => f64::from(to_int32(a) ^ to_int32(b)),
        BinaryOp::Lt => bool_to_f64(a < b),
        BinaryOp::Le => bool_to_f64(a <= b),
        BinaryOp::Gt => bool_to_f64(a > b),
        BinaryOp::Ge => bool_to_f64(a >= b),
        BinaryOp::Eq => bool_to_f64(a == b),
        BinaryOp::Ne => bool_to_f64(a != b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, t: f64) -> f64 {
        compile(source).expect("compile failed").eval(t).expect("eval failed")
    }

    #[test]
    fn classic_bytebeat_formulas() {
        // t*(t>>5|t>>8) at t = 1000: 1000 * (31 | 3) = 31000
        assert_eq!(run("t*(t>>5|t>>8)", 1000.0), 31000.0);
        assert_eq!(run("t&t>>8", 0x1234 as f64), (0x1234 & 0x12) as f64);
        assert_eq!(run("(t*5&t>>7)|(t*3&t>>10)", 4096.0), ((4096 * 5 & 4096 >> 7) | (4096 * 3 & 4096 >> 10)) as f64);
    }

    #[test]
    fn bitwise_ops_truncate_fractional_time() {
        assert_eq!(run("t|0", 2.75), 2.0);
        assert_eq!(run("t>>1", 5.9), 2.0);
        assert_eq!(run("~t", 0.0), -1.0);
        assert_eq!(run("-1>>>28", 0.0), 15.0);
        assert_eq!(run("1<<33", 0.0), 2.0, "shift count is masked to 5 bits");
    }

    #[test]
    fn nan_and_zero_coerce_to_zero() {
        assert_eq!(run("0/0", 0.0), 0.0);
        assert_eq!(run("sqrt(-1)", 0.0), 0.0);
        assert_eq!(run("sin", 0.0), 0.0, "a helper used as a number is NaN");
        assert_eq!(run("1/0", 0.0), f64::INFINITY);
    }

    #[test]
    fn logical_operators_yield_operands() {
        assert_eq!(run("0||7", 0.0), 7.0);
        assert_eq!(run("3&&5", 0.0), 5.0);
        assert_eq!(run("0&&undefinedName", 0.0), 0.0, "right side is short-circuited");
        assert_eq!(run("!t", 0.0), 1.0);
        assert_eq!(run("t>3", 4.0), 1.0);
    }

    #[test]
    fn helpers_and_constants() {
        assert!((run("sin(PI/2)", 0.0) - 1.0).abs() < 1e-12);
        assert!((run("Math.cos(TAU)", 0.0) - 1.0).abs() < 1e-12);
        assert_eq!(run("min(3,1,2)", 0.0), 1.0);
        assert_eq!(run("max()", 0.0), f64::NEG_INFINITY);
        assert_eq!(run("pow(2,8)", 0.0), 256.0);
        assert_eq!(run("round(2.5)+floor(-1.5)+ceil(1.2)", 0.0), 3.0 - 2.0 + 2.0);
        let r = run("random()", 0.0);
        assert!((0.0..1.0).contains(&r));
    }

    #[test]
    fn locals_and_sequences() {
        assert_eq!(run("a=plot(t>>10&7),\na*t", 3072.0), 3.0 * 3072.0);
        assert_eq!(run("x=2, x<<=3, x+1", 0.0), 17.0);
        assert_eq!(run("t+=10, t", 5.0), 15.0);
        assert_eq!(run("t&1 ? 100 : 200", 3.0), 100.0);
    }

    #[test]
    fn locals_do_not_leak_between_calls() {
        let f = compile("t ? a : (a = 5)").unwrap();
        let mut frame = Frame::new();
        frame.reserve_for(&f);
        assert_eq!(f.eval_in(&mut frame, 0.0).unwrap(), 5.0);
        // Next call starts with `a` unassigned again.
        assert!(matches!(
            f.eval_in(&mut frame, 1.0),
            Err(RuntimeError::NotDefined { name }) if &*name == "a"
        ));
    }

    #[test]
    fn long_operator_runs_compile_and_evaluate() {
        // (40>>3&7) is 5
        assert_eq!(run(&vec!["(t>>3&7)"; 1000].join("+"), 40.0), 5000.0);
        assert_eq!(run(&vec!["t"; 1000].join("-"), 1.0), -998.0);

        let mut source = vec!["0"; 999].join("||");
        source.push_str("||t");
        assert_eq!(run(&source, 9.0), 9.0);
        assert_eq!(run("1&&0&&boom||3", 0.0), 3.0, "short-circuit skips boom");
    }

    #[test]
    fn runtime_errors() {
        let f = compile("t + foo").unwrap();
        assert_eq!(
            f.eval(0.0),
            Err(RuntimeError::NotDefined { name: Arc::from("foo") })
        );

        let f = compile("t(1)").unwrap();
        assert_eq!(
            f.eval(0.0),
            Err(RuntimeError::NotAFunction { name: Arc::from("t") })
        );

        let f = compile("nope(1)").unwrap();
        assert_eq!(
            f.eval(0.0),
            Err(RuntimeError::NotDefined { name: Arc::from("nope") })
        );
    }

    #[test]
    fn throws_only_for_some_t() {
        let f = compile("t < 10 ? t : boom").unwrap();
        assert_eq!(f.eval(3.0), Ok(3.0));
        assert!(f.eval(10.0).is_err());
    }

    #[test]
    fn compile_errors() {
        assert!(matches!(compile("t*(t>>5"), Err(CompileError::Parse(_))));
        assert!(matches!(compile("t @ 2"), Err(CompileError::Lex(_))));
        assert!(matches!(
            compile("sin = 3"),
            Err(CompileError::Parse(ParseError::ReadOnlyBinding { .. }))
        ));
    }

    #[test]
    fn plot_is_transparent_without_probe() {
        assert_eq!(run("plot(t)*2", 21.0), 42.0);
        assert_eq!(run("plot(plot(1)+2)+3", 0.0), 6.0);
    }

    #[test]
    fn probe_records_in_call_order() {
        let f = compile_with_probe("plot(plot(1)+2)+3").unwrap();
        let out = f.eval(0.0).unwrap();
        assert_eq!(out.sample, 6.0);
        assert_eq!(out.plots, vec![1.0, 3.0]);
    }

    #[test]
    fn probe_buffer_resets_each_call() {
        let f = compile_with_probe("plot(t), plot(t*2), 0").unwrap();
        let mut frame = Frame::new();
        let first = f.eval_in(&mut frame, 1.0).unwrap();
        let second = f.eval_in(&mut frame, 2.0).unwrap();
        assert_eq!(first.plots, vec![1.0, 2.0]);
        assert_eq!(second.plots, vec![2.0, 4.0]);
    }

    #[test]
    fn probe_coerces_nan_but_passes_value_through() {
        let f = compile_with_probe("plot(0/0)").unwrap();
        let out = f.eval(0.0).unwrap();
        assert_eq!(out.plots, vec![0.0]);
        assert_eq!(out.sample, 0.0);
    }

    #[test]
    fn probe_overflow_is_a_runtime_error() {
        let source = vec!["plot(1)"; PROBE_LIMIT + 1].join("+");
        let f = compile_with_probe(&source).unwrap();
        assert_eq!(
            f.eval(0.0),
            Err(RuntimeError::ProbeOverflow { limit: PROBE_LIMIT })
        );
    }

    #[test]
    fn compilation_is_deterministic() {
        let a = compile("(t*t>>9)^t>>3").unwrap();
        let b = compile("(t*t>>9)^t>>3").unwrap();
        assert!(!a.same_as(&b));
        for t in 0..2000 {
            let t = t as f64 * 1.7;
            assert_eq!(a.eval(t), b.eval(t));
        }
    }

    #[test]
    fn silence_is_zero() {
        let f = CompiledFunction::silence();
        assert_eq!(f.eval(123.0), Ok(0.0));
        assert!(f.same_as(&f.clone()));
    }
}
