//! Binary elementwise operators applied by the compute stage.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::element::Element;
use crate::error::PipelineError;

/// A binary operator applied to each pair of operands.
///
/// The compute stage is generic over this trait, so any pure function of two
/// elements can run on the pipeline.
pub trait BinaryOp<E: Element>: Send + Sync {
    /// Combine one element of operand A with the matching element of B
    fn apply(&self, lhs: E, rhs: E) -> E;

    /// Short name for logs and reports
    fn name(&self) -> &str {
        "custom"
    }
}

/// Built-in elementwise operators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EltwiseOp {
    /// `a + b`
    #[default]
    Add,
    /// `a - b`
    Sub,
    /// `a * b`
    Mul,
}

impl EltwiseOp {
    /// Every built-in operator.
    pub const ALL: [Self; 3] = [Self::Add, Self::Sub, Self::Mul];

    /// Operator name (`add`, `sub`, `mul`)
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
        }
    }
}

impl<E: Element> BinaryOp<E> for EltwiseOp {
    fn apply(&self, lhs: E, rhs: E) -> E {
        match self {
            Self::Add => lhs.elt_add(rhs),
            Self::Sub => lhs.elt_sub(rhs),
            Self::Mul => lhs.elt_mul(rhs),
        }
    }

    fn name(&self) -> &str {
        self.as_str()
    }
}

impl std::fmt::Display for EltwiseOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EltwiseOp {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "add" | "+" => Ok(Self::Add),
            "sub" | "-" => Ok(Self::Sub),
            "mul" | "*" => Ok(Self::Mul),
            other => Err(PipelineError::configuration(format!(
                "unknown elementwise operator '{other}' (expected add, sub or mul)"
            ))),
        }
    }
}

/// Wrap a closure as a named [`BinaryOp`].
///
/// ```
/// use wormflow_driver::{BinaryOp, FnOp};
///
/// let max = FnOp::new("max", |a: u32, b: u32| a.max(b));
/// assert_eq!(max.apply(3u32, 9u32), 9);
/// assert_eq!(BinaryOp::<u32>::name(&max), "max");
/// ```
#[derive(Clone)]
pub struct FnOp<F> {
    name: &'static str,
    f: F,
}

impl<F> FnOp<F> {
    /// Create a named operator from a closure
    pub const fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }
}

impl<F> std::fmt::Debug for FnOp<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnOp").field("name", &self.name).finish_non_exhaustive()
    }
}

impl<E, F> BinaryOp<E> for FnOp<F>
where
    E: Element,
    F: Fn(E, E) -> E + Send + Sync,
{
    fn apply(&self, lhs: E, rhs: E) -> E {
        (self.f)(lhs, rhs)
    }

    fn name(&self) -> &str {
        self.name
    }
}
