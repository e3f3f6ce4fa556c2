//! Sign lattice.
//!
//! Values are abstracted by their sign only. The lattice is flat below `⊤`:
//!
//! ```text
//!         ⊤
//!       / | \
//!      -  0  +
//! ```
//!
//! A fifth form, [`Value::Concrete`], carries an exact integer. It appears for
//! literal operands and for the stack/base pointers, which must stay concrete
//! for address arithmetic. Every transfer function classifies a concrete
//! operand to its sign first, unless *both* operands are concrete, in which
//! case the exact result is computed and then classified.
//!
//! No arithmetic transfer function returns [`Value::Concrete`]. A result of
//! [`Value::Top`] is a request to the caller to case-split, see
//! [`explore`][crate::explore].

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Mul, Neg, Sub};

use crate::error::Fault;

/// An abstract integer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Value {
    /// Strictly positive (`> 0`).
    Positive,
    /// Strictly negative (`< 0`).
    Negative,
    /// Exactly zero.
    Zero,
    /// Any integer, sign unknown.
    Top,
    /// An exact integer.
    Concrete(i64),
}

impl Value {
    /// The concrete sign cases a `⊤` is split into, in exploration order.
    pub const CASES: [Value; 3] = [Value::Positive, Value::Negative, Value::Zero];

    /// Abstract a concrete integer to its sign.
    pub fn classify(n: i64) -> Value {
        match n.cmp(&0) {
            Ordering::Less => Value::Negative,
            Ordering::Equal => Value::Zero,
            Ordering::Greater => Value::Positive,
        }
    }

    /// Forget the exact integer, keeping only its sign.
    pub fn widen(self) -> Value {
        match self {
            Value::Concrete(n) => Value::classify(n),
            v => v,
        }
    }

    pub fn is_top(self) -> bool {
        matches!(self, Value::Top)
    }

    /// Check whether a concrete integer is described by this value.
    pub fn contains(self, n: i64) -> bool {
        match self {
            Value::Positive => n > 0,
            Value::Negative => n < 0,
            Value::Zero => n == 0,
            Value::Top => true,
            Value::Concrete(m) => m == n,
        }
    }

    /// Stand-in displacement used by the array bounds check.
    ///
    /// `+` maps to `1`, `-` to `-1`, `0` and `⊤` to `0`. This is an
    /// approximation for the bounds check only, never a real value.
    pub fn representative(self) -> i64 {
        match self {
            Value::Positive => 1,
            Value::Negative => -1,
            Value::Zero | Value::Top => 0,
            Value::Concrete(n) => n,
        }
    }

    /// Move: the destination receives the source unchanged, concrete or not.
    pub fn mov(self) -> Value {
        self
    }

    /// Abstract integer division.
    ///
    /// A zero divisor is reported before anything else is looked at, so even
    /// `⊤ / 0` is a fault rather than a case split.
    pub fn divide(self, rhs: Value) -> Result<Value, Fault> {
        if rhs.widen() == Value::Zero {
            return Err(Fault::DivisionByZero);
        }
        if let (Value::Concrete(a), Value::Concrete(b)) = (self, rhs) {
            if let Some(q) = a.checked_div(b) {
                return Ok(Value::classify(q));
            }
        }
        let q = match (self.widen(), rhs.widen()) {
            (Value::Zero, _) => Value::Zero,
            (Value::Top, _) | (_, Value::Top) => Value::Top,
            (a, b) if a == b => Value::Positive,
            _ => Value::Negative,
        };
        Ok(q)
    }

    /// Sign of `self - rhs`, as used for the comparison flag.
    ///
    /// `+` when `self > rhs` is certain, `-` when `self < rhs` is certain, `0`
    /// when equality is certain, `⊤` otherwise. A concrete operand against an
    /// abstract one is decided by the side of zero the concrete value is on.
    pub fn compare(self, rhs: Value) -> Value {
        if let (Value::Concrete(a), Value::Concrete(b)) = (self, rhs) {
            return match a.cmp(&b) {
                Ordering::Greater => Value::Positive,
                Ordering::Less => Value::Negative,
                Ordering::Equal => Value::Zero,
            };
        }
        self.widen() - rhs.widen()
    }
}

impl Neg for Value {
    type Output = Value;

    fn neg(self) -> Self::Output {
        match self.widen() {
            Value::Positive => Value::Negative,
            Value::Negative => Value::Positive,
            v => v,
        }
    }
}

impl Add for Value {
    type Output = Value;

    fn add(self, rhs: Self) -> Self::Output {
        if let (Value::Concrete(a), Value::Concrete(b)) = (self, rhs) {
            if let Some(s) = a.checked_add(b) {
                return Value::classify(s);
            }
        }
        match (self.widen(), rhs.widen()) {
            (Value::Top, _) | (_, Value::Top) => Value::Top,
            (Value::Zero, x) | (x, Value::Zero) => x,
            (a, b) if a == b => a,
            _ => Value::Top,
        }
    }
}

impl Sub for Value {
    type Output = Value;

    fn sub(self, rhs: Self) -> Self::Output {
        if let (Value::Concrete(a), Value::Concrete(b)) = (self, rhs) {
            if let Some(d) = a.checked_sub(b) {
                return Value::classify(d);
            }
        }
        self.widen() + (-rhs)
    }
}

impl Mul for Value {
    type Output = Value;

    fn mul(self, rhs: Self) -> Self::Output {
        if let (Value::Concrete(a), Value::Concrete(b)) = (self, rhs) {
            if let Some(p) = a.checked_mul(b) {
                return Value::classify(p);
            }
        }
        match (self.widen(), rhs.widen()) {
            (Value::Zero, _) | (_, Value::Zero) => Value::Zero,
            (Value::Top, _) | (_, Value::Top) => Value::Top,
            (a, b) if a == b => Value::Positive,
            _ => Value::Negative,
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Concrete(n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Positive => write!(f, "+"),
            Value::Negative => write!(f, "-"),
            Value::Zero => write!(f, "0"),
            Value::Top => write!(f, "⊤"),
            Value::Concrete(n) => write!(f, "{}", n),
        }
    }
}
