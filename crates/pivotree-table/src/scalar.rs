//! Dynamically typed cell values.
//!
//! `Scalar` is what every column hands out and accepts. It has a total order
//! (type rank first, then value; floats via `total_cmp`) with matching `Eq` and
//! `Hash`, so scalars can key hash indexes and be sorted deterministically.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::DType;

/// A single cell value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// Missing / invalid value.
    #[default]
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
}

impl Scalar {
    pub fn str(s: &str) -> Self {
        Scalar::Str(Arc::from(s))
    }

    pub const fn is_valid(&self) -> bool {
        !matches!(self, Scalar::None)
    }

    pub const fn is_none(&self) -> bool {
        matches!(self, Scalar::None)
    }

    /// True only for a float NaN; other types are never NaN.
    pub fn is_nan(&self) -> bool {
        matches!(self, Scalar::Float(v) if v.is_nan())
    }

    pub const fn is_str(&self) -> bool {
        matches!(self, Scalar::Str(_))
    }

    /// Truthiness used by `or`/`any`/`and`: invalid, `false`, zero and the
    /// empty string are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Scalar::None => false,
            Scalar::Bool(b) => *b,
            Scalar::Int(v) => *v != 0,
            Scalar::Float(v) => *v != 0.0,
            Scalar::Str(s) => !s.is_empty(),
        }
    }

    /// Numeric view. Invalid and string values read as `0.0`.
    pub fn to_f64(&self) -> f64 {
        match self {
            Scalar::None | Scalar::Str(_) => 0.0,
            Scalar::Bool(b) => f64::from(u8::from(*b)),
            Scalar::Int(v) => *v as f64,
            Scalar::Float(v) => *v,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Bool(b) => Some(i64::from(*b)),
            Scalar::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    /// The natural column type for this value, if any.
    pub const fn dtype(&self) -> Option<DType> {
        match self {
            Scalar::None => None,
            Scalar::Bool(_) => Some(DType::Bool),
            Scalar::Int(_) => Some(DType::Int64),
            Scalar::Float(_) => Some(DType::Float64),
            Scalar::Str(_) => Some(DType::Str),
        }
    }

    /// Addition with `None` as the identity on either side.
    ///
    /// Two integers stay integral (wrapping); any float operand promotes the
    /// result. Strings do not add: the left operand wins.
    pub fn add(&self, other: &Scalar) -> Scalar {
        match (self, other) {
            (Scalar::None, o) => o.clone(),
            (s, Scalar::None) => s.clone(),
            (Scalar::Int(a), Scalar::Int(b)) => Scalar::Int(a.wrapping_add(*b)),
            (Scalar::Str(_), _) | (_, Scalar::Str(_)) => self.clone(),
            (a, b) => Scalar::Float(a.to_f64() + b.to_f64()),
        }
    }

    /// Multiplication; an invalid operand yields the other operand.
    pub fn mul(&self, other: &Scalar) -> Scalar {
        match (self, other) {
            (Scalar::None, o) => o.clone(),
            (s, Scalar::None) => s.clone(),
            (Scalar::Int(a), Scalar::Int(b)) => Scalar::Int(a.wrapping_mul(*b)),
            (Scalar::Str(_), _) | (_, Scalar::Str(_)) => self.clone(),
            (a, b) => Scalar::Float(a.to_f64() * b.to_f64()),
        }
    }

    /// Arithmetic negation; non-numeric values pass through unchanged.
    pub fn negate(&self) -> Scalar {
        match self {
            Scalar::Int(v) => Scalar::Int(v.wrapping_neg()),
            Scalar::Float(v) => Scalar::Float(-v),
            other => other.clone(),
        }
    }

    pub fn abs(&self) -> Scalar {
        match self {
            Scalar::Int(v) => Scalar::Int(v.wrapping_abs()),
            Scalar::Float(v) => Scalar::Float(v.abs()),
            other => other.clone(),
        }
    }

    /// Difference `self - prev`, used to derive row deltas.
    pub fn sub(&self, prev: &Scalar) -> Scalar {
        self.add(&prev.negate())
    }

    const fn rank(&self) -> u8 {
        match self {
            Scalar::None => 0,
            Scalar::Bool(_) => 1,
            Scalar::Int(_) => 2,
            Scalar::Float(_) => 3,
            Scalar::Str(_) => 4,
        }
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scalar {}

impl PartialOrd for Scalar {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scalar {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Scalar::None, Scalar::None) => Ordering::Equal,
            (Scalar::Bool(a), Scalar::Bool(b)) => a.cmp(b),
            (Scalar::Int(a), Scalar::Int(b)) => a.cmp(b),
            (Scalar::Float(a), Scalar::Float(b)) => a.total_cmp(b),
            (Scalar::Str(a), Scalar::Str(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl Hash for Scalar {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Scalar::None => {}
            Scalar::Bool(b) => b.hash(state),
            Scalar::Int(v) => v.hash(state),
            Scalar::Float(v) => v.to_bits().hash(state),
            Scalar::Str(s) => s.hash(state),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::None => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(i64::from(v))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::str(v)
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Str(Arc::from(v))
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map_or(Scalar::None, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_additive_identity() {
        assert_eq!(Scalar::None.add(&Scalar::Int(3)), Scalar::Int(3));
        assert_eq!(Scalar::Float(1.5).add(&Scalar::None), Scalar::Float(1.5));
        assert_eq!(Scalar::Int(2).add(&Scalar::Float(0.5)), Scalar::Float(2.5));
    }

    #[test]
    fn total_order_groups_by_type_then_value() {
        let mut values = vec![
            Scalar::str("b"),
            Scalar::Int(3),
            Scalar::None,
            Scalar::Int(-1),
            Scalar::str("a"),
        ];
        values.sort();
        assert_eq!(
            values,
            vec![
                Scalar::None,
                Scalar::Int(-1),
                Scalar::Int(3),
                Scalar::str("a"),
                Scalar::str("b"),
            ]
        );
    }

    #[test]
    fn nan_equals_itself_under_total_order() {
        let nan = Scalar::Float(f64::NAN);
        assert!(nan.is_nan());
        assert_eq!(nan, nan.clone());
        assert!(!Scalar::Int(0).is_nan());
    }

    #[test]
    fn truthiness() {
        assert!(!Scalar::None.is_truthy());
        assert!(!Scalar::str("").is_truthy());
        assert!(Scalar::str("x").is_truthy());
        assert!(!Scalar::Float(0.0).is_truthy());
        assert!(Scalar::Int(-2).is_truthy());
    }
}
