//! Series kernels for each operator.
//!
//! Windowed operators look back over the last `w` points of the series's
//! own index (positional, not calendar time). A window containing a
//! non-finite value produces NaN; the first `w - 1` points are NaN.

use super::Value;
use crate::data::Series;
use crate::error::EvaluationError;
use crate::token::{Operator, Signature};

/// Apply `op` to operands given in push order.
pub(super) fn apply(op: Operator, mut args: Vec<Value>) -> Result<Series, EvaluationError> {
    match op.signature() {
        Signature::Unary => {
            let x = take_series(&mut args, 0);
            Ok(unary(op, x))
        }
        Signature::Arithmetic => {
            let b = args.pop();
            let a = args.pop();
            match (a, b) {
                (Some(a), Some(b)) => arithmetic(op, a, b),
                _ => Err(EvaluationError::Unaligned(op.name().to_string())),
            }
        }
        Signature::Rolling => {
            let window = window_arg(op, &args, 1)?;
            let x = take_series(&mut args, 0);
            Ok(rolling(op, &x, window))
        }
        Signature::PairRolling => {
            let window = window_arg(op, &args, 2)?;
            let y = take_series(&mut args, 1);
            let x = take_series(&mut args, 0);
            pair_rolling(op, &x, &y, window)
        }
    }
}

fn take_series(args: &mut [Value], idx: usize) -> Series {
    match std::mem::replace(&mut args[idx], Value::Scalar(f64::NAN)) {
        Value::Series(series) => series,
        // Signatures are checked before dispatch; keep the kernel total anyway.
        Value::Scalar(_) => Series::undefined(&[]),
    }
}

fn window_arg(op: Operator, args: &[Value], idx: usize) -> Result<usize, EvaluationError> {
    let raw = match args.get(idx) {
        Some(Value::Scalar(value)) => *value,
        _ => f64::NAN,
    };
    let window = raw.round();
    if !window.is_finite() || window < 1.0 {
        return Err(EvaluationError::InvalidWindow {
            op: op.name().to_string(),
            window: raw,
        });
    }
    Ok(window as usize)
}

fn unary(op: Operator, x: Series) -> Series {
    let values = x
        .values()
        .iter()
        .map(|&v| match op {
            Operator::Abs => v.abs(),
            Operator::Neg => -v,
            Operator::Log => {
                if v > 0.0 {
                    v.ln()
                } else {
                    f64::NAN
                }
            }
            Operator::Sign => {
                if v.is_nan() {
                    f64::NAN
                } else if v == 0.0 {
                    0.0
                } else {
                    v.signum()
                }
            }
            _ => f64::NAN,
        })
        .collect();
    x.with_values(values)
}

fn binary_value(op: Operator, a: f64, b: f64) -> f64 {
    match op {
        Operator::Add => a + b,
        Operator::Sub => a - b,
        Operator::Mul => a * b,
        Operator::Div => {
            if b == 0.0 {
                f64::NAN
            } else {
                a / b
            }
        }
        Operator::Greater => {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.max(b)
            }
        }
        Operator::Less => {
            if a.is_nan() || b.is_nan() {
                f64::NAN
            } else {
                a.min(b)
            }
        }
        _ => f64::NAN,
    }
}

fn arithmetic(op: Operator, a: Value, b: Value) -> Result<Series, EvaluationError> {
    match (a, b) {
        (Value::Series(a), Value::Series(b)) => {
            let (index, left, right) = a.align(&b);
            if index.is_empty() {
                return Err(EvaluationError::Unaligned(op.name().to_string()));
            }
            let values = left
                .into_iter()
                .zip(right)
                .map(|(x, y)| binary_value(op, x, y))
                .collect();
            Ok(Series::from_sorted(index, values))
        }
        (Value::Series(a), Value::Scalar(b)) => {
            let values = a.values().iter().map(|&x| binary_value(op, x, b)).collect();
            Ok(a.with_values(values))
        }
        (Value::Scalar(a), Value::Series(b)) => {
            let values = b.values().iter().map(|&y| binary_value(op, a, y)).collect();
            Ok(b.with_values(values))
        }
        (Value::Scalar(_), Value::Scalar(_)) => Err(EvaluationError::Unaligned(op.name().to_string())),
    }
}

fn rolling(op: Operator, x: &Series, w: usize) -> Series {
    let v = x.values();
    let n = v.len();
    let mut out = vec![f64::NAN; n];

    match op {
        Operator::Ref | Operator::TsDelta => {
            for t in w..n {
                let past = v[t - w];
                out[t] = if op == Operator::Ref { past } else { v[t] - past };
            }
        }
        _ => {
            if w <= n {
                for t in (w - 1)..n {
                    let win = &v[t + 1 - w..=t];
                    if win.iter().any(|x| !x.is_finite()) {
                        continue;
                    }
                    out[t] = window_stat(op, win);
                }
            }
        }
    }
    x.with_values(out)
}

fn window_stat(op: Operator, win: &[f64]) -> f64 {
    let n = win.len() as f64;
    match op {
        Operator::TsSum => win.iter().sum(),
        Operator::TsMean => win.iter().sum::<f64>() / n,
        Operator::TsStd => {
            if win.len() < 2 {
                return f64::NAN;
            }
            let mean = win.iter().sum::<f64>() / n;
            let ss: f64 = win.iter().map(|x| (x - mean).powi(2)).sum();
            (ss / (n - 1.0)).sqrt()
        }
        Operator::TsMax => win.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        Operator::TsMin => win.iter().copied().fold(f64::INFINITY, f64::min),
        Operator::TsRank => {
            // Percentile of the newest point within its window, in (0, 1].
            let last = win[win.len() - 1];
            let below = win.iter().filter(|&&x| x < last).count() as f64;
            let equal = win.iter().filter(|&&x| x == last).count() as f64;
            (below + (equal + 1.0) / 2.0) / n
        }
        _ => f64::NAN,
    }
}

fn pair_rolling(op: Operator, x: &Series, y: &Series, w: usize) -> Result<Series, EvaluationError> {
    let (index, a, b) = x.align(y);
    if index.is_empty() {
        return Err(EvaluationError::Unaligned(op.name().to_string()));
    }
    let n = index.len();
    let mut out = vec![f64::NAN; n];
    if w >= 2 && w <= n {
        for t in (w - 1)..n {
            let wa = &a[t + 1 - w..=t];
            let wb = &b[t + 1 - w..=t];
            if wa.iter().chain(wb).any(|v| !v.is_finite()) {
                continue;
            }
            out[t] = window_pair_stat(op, wa, wb);
        }
    }
    Ok(Series::from_sorted(index, out))
}

fn window_pair_stat(op: Operator, a: &[f64], b: &[f64]) -> f64 {
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }
    match op {
        Operator::TsCov => cov / (n - 1.0),
        Operator::TsCorr => {
            if var_a < 1e-18 || var_b < 1e-18 {
                f64::NAN
            } else {
                cov / (var_a.sqrt() * var_b.sqrt())
            }
        }
        _ => f64::NAN,
    }
}
