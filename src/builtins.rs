//! Helper namespace injected into every compiled expression, plus the
//! JavaScript-style numeric conversions the operators are defined in terms of.

use std::f64::consts::{PI, TAU};

use rand::Rng;
use rand::rngs::SmallRng;

/// A callable helper from the fixed namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Abs,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Tanh,
    Floor,
    Ceil,
    Round,
    Sqrt,
    Log,
    Exp,
    Pow,
    Min,
    Max,
    Random,
}

/// How a helper consumes its arguments.
#[derive(Debug, Clone, Copy)]
pub enum Arity {
    Nullary,
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
    /// Fold over every argument starting from the identity value.
    Variadic { identity: f64, fold: fn(f64, f64) -> f64 },
}

impl Builtin {
    pub const ALL: [Builtin; 18] = [
        Builtin::Abs,
        Builtin::Sin,
        Builtin::Cos,
        Builtin::Tan,
        Builtin::Asin,
        Builtin::Acos,
        Builtin::Atan,
        Builtin::Tanh,
        Builtin::Floor,
        Builtin::Ceil,
        Builtin::Round,
        Builtin::Sqrt,
        Builtin::Log,
        Builtin::Exp,
        Builtin::Pow,
        Builtin::Min,
        Builtin::Max,
        Builtin::Random,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Abs => "abs",
            Builtin::Sin => "sin",
            Builtin::Cos => "cos",
            Builtin::Tan => "tan",
            Builtin::Asin => "asin",
            Builtin::Acos => "acos",
            Builtin::Atan => "atan",
            Builtin::Tanh => "tanh",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Round => "round",
            Builtin::Sqrt => "sqrt",
            Builtin::Log => "log",
            Builtin::Exp => "exp",
            Builtin::Pow => "pow",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Random => "random",
        }
    }

    pub fn lookup(name: &str) -> Option<Builtin> {
        Builtin::ALL.into_iter().find(|b| b.name() == name)
    }

    pub fn arity(self) -> Arity {
        match self {
            Builtin::Abs => Arity::Unary(f64::abs),
            Builtin::Sin => Arity::Unary(f64::sin),
            Builtin::Cos => Arity::Unary(f64::cos),
            Builtin::Tan => Arity::Unary(f64::tan),
            Builtin::Asin => Arity::Unary(f64::asin),
            Builtin::Acos => Arity::Unary(f64::acos),
            Builtin::Atan => Arity::Unary(f64::atan),
            Builtin::Tanh => Arity::Unary(f64::tanh),
            Builtin::Floor => Arity::Unary(f64::floor),
            Builtin::Ceil => Arity::Unary(f64::ceil),
            Builtin::Round => Arity::Unary(js_round),
            Builtin::Sqrt => Arity::Unary(f64::sqrt),
            Builtin::Log => Arity::Unary(f64::ln),
            Builtin::Exp => Arity::Unary(f64::exp),
            Builtin::Pow => Arity::Binary(js_pow),
            Builtin::Min => Arity::Variadic {
                identity: f64::INFINITY,
                fold: |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.min(b) },
            },
            Builtin::Max => Arity::Variadic {
                identity: f64::NEG_INFINITY,
                fold: |a, b| if a.is_nan() || b.is_nan() { f64::NAN } else { a.max(b) },
            },
            Builtin::Random => Arity::Nullary,
        }
    }

    /// Value of a nullary helper.
    pub fn call_nullary(self, rng: &mut SmallRng) -> f64 {
        match self {
            Builtin::Random => rng.gen_range(0.0..1.0),
            _ => f64::NAN,
        }
    }
}

/// Named numeric constants.
pub fn constant(name: &str) -> Option<f64> {
    match name {
        "PI" => Some(PI),
        "TAU" => Some(TAU),
        _ => None,
    }
}

/// Name of the probe helper.
pub const PLOT: &str = "plot";

/// Is `name` reserved by the namespace (and therefore not assignable)?
pub fn is_reserved(name: &str) -> bool {
    name == PLOT || constant(name).is_some() || Builtin::lookup(name).is_some()
}

/// `Number(x) || 0`: NaN and negative zero collapse to 0, everything else passes.
pub fn number_or_zero(x: f64) -> f64 {
    if x.is_nan() || x == 0.0 { 0.0 } else { x }
}

/// Truthiness of a number: non-zero and not NaN.
pub fn truthy(x: f64) -> bool {
    !(x.is_nan() || x == 0.0)
}

pub fn bool_to_f64(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

const TWO_32: f64 = 4_294_967_296.0;
const TWO_31: f64 = 2_147_483_648.0;

/// ECMAScript ToInt32: truncate, then wrap modulo 2^32 into the signed range.
pub fn to_int32(x: f64) -> i32 {
    if !x.is_finite() {
        return 0;
    }
    let wrapped = x.trunc().rem_euclid(TWO_32);
    if wrapped >= TWO_31 {
        (wrapped - TWO_32) as i32
    } else {
        wrapped as i32
    }
}

/// ECMAScript ToUint32.
pub fn to_uint32(x: f64) -> u32 {
    if !x.is_finite() {
        return 0;
    }
    x.trunc().rem_euclid(TWO_32) as u32
}

/// `Math.round`: nearest integer, halves towards +Infinity.
fn js_round(x: f64) -> f64 {
    // `x - trunc(x)` is exact; `f64::round` sends negative halves down.
    if x - x.trunc() == -0.5 {
        x.trunc()
    } else {
        x.round()
    }
}

pub(crate) fn js_pow(base: f64, exp: f64) -> f64 {
    // IEEE pow says 1^NaN = 1 and (±1)^±Inf = 1; JS says NaN for both.
    if exp.is_nan() || (base.abs() == 1.0 && exp.is_infinite()) {
        f64::NAN
    } else {
        base.powf(exp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn int32_wraps_like_js() {
        assert_eq!(to_int32(0.0), 0);
        assert_eq!(to_int32(3.9), 3);
        assert_eq!(to_int32(-3.9), -3);
        assert_eq!(to_int32(2_147_483_648.0), -2_147_483_648);
        assert_eq!(to_int32(4_294_967_297.0), 1);
        assert_eq!(to_int32(-1.0), -1);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_int32(f64::INFINITY), 0);
    }

    #[test]
    fn uint32_wraps_like_js() {
        assert_eq!(to_uint32(-1.0), u32::MAX);
        assert_eq!(to_uint32(4_294_967_296.0), 0);
        assert_eq!(to_uint32(5.5), 5);
    }

    #[test]
    fn or_zero_coercion() {
        assert_eq!(number_or_zero(f64::NAN), 0.0);
        assert_eq!(number_or_zero(-0.0).to_bits(), 0.0f64.to_bits());
        assert_eq!(number_or_zero(2.5), 2.5);
        assert_eq!(number_or_zero(f64::INFINITY), f64::INFINITY);
    }

    #[test]
    fn namespace_lookup() {
        for builtin in Builtin::ALL {
            assert_eq!(Builtin::lookup(builtin.name()), Some(builtin));
        }
        assert_eq!(Builtin::lookup("t"), None);
        assert!(is_reserved("plot"));
        assert!(is_reserved("PI"));
        assert!(!is_reserved("a"));
    }

    #[test]
    fn js_math_quirks() {
        assert_eq!(js_round(2.5), 3.0);
        assert_eq!(js_round(-2.5), -2.0);
        assert_eq!(js_round(0.49999999999999994), 0.0);
        assert_eq!(js_round(-0.49999999999999994).to_bits(), (-0.0f64).to_bits());
        assert_eq!(js_round(-0.5).to_bits(), (-0.0f64).to_bits());
        assert_eq!(js_round(4503599627370497.0), 4503599627370497.0);
        assert_eq!(js_round(f64::NEG_INFINITY), f64::NEG_INFINITY);
        assert!(js_round(f64::NAN).is_nan());
        assert!(js_pow(1.0, f64::INFINITY).is_nan());
        assert_eq!(js_pow(2.0, 10.0), 1024.0);
    }

    #[test]
    fn random_is_in_unit_interval() {
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..100 {
            let r = Builtin::Random.call_nullary(&mut rng);
            assert!((0.0..1.0).contains(&r));
        }
    }
}
