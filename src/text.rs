//! Whitespace-separated text format: a count followed by that many numbers.

use std::fmt::Write;

use crate::error::ScanError;

const PRESIZE_LIMIT: usize = 1 << 16;

/// Significant digits written per value.
const PRECISION: i32 = 6;

pub fn parse_sequence(text: &str) -> Result<Vec<f32>, ScanError> {
    let mut tokens = text.split_whitespace();

    let count = tokens
        .next()
        .ok_or_else(|| ScanError::Usage("input is empty, expected an element count".into()))?;
    let count: usize = count
        .parse()
        .map_err(|_| ScanError::Usage(format!("invalid element count: {count:?}")))?;

    // `count` is untrusted; grow as values actually arrive.
    let mut values = Vec::with_capacity(count.min(PRESIZE_LIMIT));
    for index in 0..count {
        let token = tokens.next().ok_or_else(|| {
            ScanError::Usage(format!("input declares {count} values but contains {index}"))
        })?;
        let value: f32 = token
            .parse()
            .map_err(|_| ScanError::Usage(format!("invalid value at position {index}: {token:?}")))?;
        values.push(value);
    }

    let extra = tokens.count();
    if extra > 0 {
        tracing::warn!(extra, "ignoring trailing input tokens");
    }

    Ok(values)
}

/// Renders every value followed by a single space, in `%g` style with six
/// significant digits.
pub fn format_sequence(values: &[f32]) -> String {
    let mut out = String::with_capacity(values.len() * 8);
    for &value in values {
        write_general(&mut out, value);
        out.push(' ');
    }
    out
}

/// Fixed notation for decimal exponents in `-4..PRECISION`, scientific
/// otherwise. Trailing zeros are dropped in both.
fn write_general(out: &mut String, value: f32) {
    let value = f64::from(value);
    if value.is_nan() {
        out.push_str("nan");
        return;
    }
    if value.is_infinite() {
        out.push_str(if value < 0.0 { "-inf" } else { "inf" });
        return;
    }

    // Rounding to PRECISION digits first decides the exponent, as `%g` does.
    let scientific = format!("{:.*e}", (PRECISION - 1) as usize, value);
    let (mantissa, exponent) = scientific.split_once('e').unwrap_or((&scientific, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    // Writing to a String cannot fail.
    if exponent < -4 || exponent >= PRECISION {
        let sign = if exponent < 0 { '-' } else { '+' };
        let _ = write!(out, "{}e{sign}{:02}", trim_zeros(mantissa), exponent.abs());
    } else {
        let fixed = format!("{:.*}", (PRECISION - 1 - exponent) as usize, value);
        out.push_str(trim_zeros(&fixed));
    }
}

fn trim_zeros(digits: &str) -> &str {
    if digits.contains('.') {
        digits.trim_end_matches('0').trim_end_matches('.')
    } else {
        digits
    }
}
