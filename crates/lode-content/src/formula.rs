//! Formula nodes and their pure evaluator.
//!
//! Formulas compute costs, production rates, and prestige rewards from
//! context variables (`level`, `count`, `prestigeCount`, ...). Like the
//! condition evaluator they are side-effect-free; an unknown variable
//! evaluates to 0 so a malformed formula degrades instead of erroring.

use serde::{Deserialize, Serialize};

use crate::condition::EvalContext;

fn default_variable() -> String {
    "level".to_string()
}

/// A formula node from the content pack.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Formula {
    /// A fixed value.
    Constant {
        /// The value.
        value: f64,
    },
    /// `base + slope * x`.
    Linear {
        /// Intercept.
        base: f64,
        /// Slope per unit of the variable.
        slope: f64,
        /// Variable name (default `level`).
        #[serde(default = "default_variable")]
        variable: String,
    },
    /// `base * growth^x`, the idle-game staple.
    Exponential {
        /// Multiplier at `x = 0`.
        base: f64,
        /// Per-unit growth factor.
        growth: f64,
        /// Variable name (default `level`).
        #[serde(default = "default_variable")]
        variable: String,
    },
    /// `Σ coefficients[i] * x^i`.
    Polynomial {
        /// Coefficients, constant term first.
        coefficients: Vec<f64>,
        /// Variable name (default `level`).
        #[serde(default = "default_variable")]
        variable: String,
    },
    /// Piecewise selection over the variable.
    Piecewise {
        /// Pieces in ascending order; the first piece whose `up_to`
        /// bound exceeds the variable is selected. A piece with no
        /// bound matches everything from there on.
        pieces: Vec<Piece>,
        /// Variable name (default `level`).
        #[serde(default = "default_variable")]
        variable: String,
    },
    /// An expression tree over variables.
    Expression {
        /// Root of the expression tree.
        expression: Expr,
    },
}

/// One segment of a piecewise formula.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Piece {
    /// Exclusive upper bound on the variable; `None` = unbounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub up_to: Option<f64>,
    /// Formula evaluated when this piece is selected.
    pub value: Formula,
}

/// Expression tree node.
///
/// The serde tag matches the content DSL's `op` discriminator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Expr {
    /// A literal number.
    Num {
        /// The value.
        value: f64,
    },
    /// A context variable; unknown variables evaluate to 0.
    Var {
        /// Variable name.
        name: String,
    },
    /// Sum of all arguments.
    Add {
        /// Summands.
        args: Vec<Expr>,
    },
    /// `left - right`.
    Sub {
        /// Minuend.
        left: Box<Expr>,
        /// Subtrahend.
        right: Box<Expr>,
    },
    /// Product of all arguments.
    Mul {
        /// Factors.
        args: Vec<Expr>,
    },
    /// `left / right`.
    Div {
        /// Dividend.
        left: Box<Expr>,
        /// Divisor.
        right: Box<Expr>,
    },
    /// `base ^ exponent`.
    Pow {
        /// Base.
        base: Box<Expr>,
        /// Exponent.
        exponent: Box<Expr>,
    },
    /// Minimum of all arguments.
    Min {
        /// Candidates.
        args: Vec<Expr>,
    },
    /// Maximum of all arguments.
    Max {
        /// Candidates.
        args: Vec<Expr>,
    },
    /// Floor of the argument.
    Floor {
        /// Argument.
        arg: Box<Expr>,
    },
    /// Ceiling of the argument.
    Ceil {
        /// Argument.
        arg: Box<Expr>,
    },
}

/// Evaluate a formula against the supplied context.
pub fn evaluate_formula(formula: &Formula, ctx: &dyn EvalContext) -> f64 {
    match formula {
        Formula::Constant { value } => *value,
        Formula::Linear {
            base,
            slope,
            variable,
        } => base + slope * var(ctx, variable),
        Formula::Exponential {
            base,
            growth,
            variable,
        } => base * growth.powf(var(ctx, variable)),
        Formula::Polynomial {
            coefficients,
            variable,
        } => {
            let x = var(ctx, variable);
            // Horner evaluation, highest coefficient first.
            coefficients
                .iter()
                .rev()
                .fold(0.0, |acc, &c| acc * x + c)
        }
        Formula::Piecewise { pieces, variable } => {
            let x = var(ctx, variable);
            for piece in pieces {
                match piece.up_to {
                    Some(bound) if x < bound => return evaluate_formula(&piece.value, ctx),
                    None => return evaluate_formula(&piece.value, ctx),
                    _ => {}
                }
            }
            // Past every bounded piece: fall back to the last one.
            pieces
                .last()
                .map_or(0.0, |piece| evaluate_formula(&piece.value, ctx))
        }
        Formula::Expression { expression } => evaluate_expr(expression, ctx),
    }
}

fn var(ctx: &dyn EvalContext, name: &str) -> f64 {
    ctx.variable(name).unwrap_or(0.0)
}

fn evaluate_expr(expr: &Expr, ctx: &dyn EvalContext) -> f64 {
    match expr {
        Expr::Num { value } => *value,
        Expr::Var { name } => var(ctx, name),
        Expr::Add { args } => args.iter().map(|a| evaluate_expr(a, ctx)).sum(),
        Expr::Sub { left, right } => evaluate_expr(left, ctx) - evaluate_expr(right, ctx),
        Expr::Mul { args } => args.iter().map(|a| evaluate_expr(a, ctx)).product(),
        Expr::Div { left, right } => evaluate_expr(left, ctx) / evaluate_expr(right, ctx),
        Expr::Pow { base, exponent } => {
            evaluate_expr(base, ctx).powf(evaluate_expr(exponent, ctx))
        }
        Expr::Min { args } => args
            .iter()
            .map(|a| evaluate_expr(a, ctx))
            .fold(f64::INFINITY, f64::min),
        Expr::Max { args } => args
            .iter()
            .map(|a| evaluate_expr(a, ctx))
            .fold(f64::NEG_INFINITY, f64::max),
        Expr::Floor { arg } => evaluate_expr(arg, ctx).floor(),
        Expr::Ceil { arg } => evaluate_expr(arg, ctx).ceil(),
    }
}
