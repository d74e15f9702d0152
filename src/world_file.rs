use std::path::Path;

use tracing::debug;

use crate::atomic::write_atomic;
use crate::error::{RegistrationError, Result};
use crate::model::AffineTransform;

/// Mantissa digits after the decimal point. 16 gives 17 significant digits,
/// enough to read every f64 back exactly.
pub const DEFAULT_PRECISION: usize = 16;

/// `printf("%e")` compatible precision.
pub const C_PRECISION: usize = 6;

/// Formats `value` like C's `%.Ne`: normalised mantissa, signed exponent of
/// at least two digits. Exact zero is written as `0`.
///
/// Rust formatting ignores the process locale, so the decimal separator is
/// always `.`.
pub fn format_coefficient(value: f64, precision: usize) -> String {
    if value == 0.0 {
        return "0".to_string();
    }

    let formatted = format!("{:.*e}", precision, value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{}e{}{:02}", mantissa, sign, exponent.abs())
        }
        None => formatted,
    }
}

pub fn render_world_file(transform: &AffineTransform, precision: usize) -> String {
    let mut out = String::new();
    for value in transform.world_file_order() {
        out.push_str(&format_coefficient(value, precision));
        out.push('\n');
    }
    out
}

pub fn write_world_file(path: &Path, transform: &AffineTransform, precision: usize) -> Result<()> {
    debug!("Writing world file: {:?}", path);
    write_atomic(path, render_world_file(transform, precision).as_bytes())
}

pub fn parse_world_file(contents: &str) -> Result<AffineTransform> {
    let values: Vec<&str> = contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if values.len() != 6 {
        return Err(RegistrationError::invalid(
            "world file",
            format!("expected 6 coefficients, found {}", values.len()),
        ));
    }

    let mut coefficients = [0.0; 6];
    for (slot, text) in coefficients.iter_mut().zip(&values) {
        *slot = text.parse().map_err(|_| {
            RegistrationError::invalid("world file", format!("'{}' is not a number", text))
        })?;
    }

    Ok(AffineTransform::from_world_file_order(coefficients))
}

pub fn read_world_file(path: &Path) -> Result<AffineTransform> {
    let contents = std::fs::read_to_string(path).map_err(|e| RegistrationError::io(path, e))?;
    parse_world_file(&contents)
}
