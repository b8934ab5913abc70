// Number <-> string conversion.
//
// Display follows C's %.14g: integer-valued doubles print without a
// decimal point (fast-pathed through itoa), everything else picks fixed
// or scientific notation by exponent and strips trailing zeros.

/// Render a number the way `tostring` and string coercion show it.
pub fn number_to_display(n: f64) -> String {
    if n.is_nan() {
        return "nan".to_string();
    }
    if n.is_infinite() {
        return if n < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if n == n.trunc() && n.abs() < 1e14 {
        let mut buf = itoa::Buffer::new();
        return buf.format(n as i64).to_string();
    }
    format_g(n, 14)
}

/// %.*g equivalent.
pub fn format_g(n: f64, prec: usize) -> String {
    let prec = prec.max(1);
    if n == 0.0 {
        return "0".to_string();
    }
    let sci = format!("{:.*e}", prec - 1, n);
    let (mant, exp) = sci
        .split_once('e')
        .expect("{:e} always produces an exponent");
    let exp: i32 = exp.parse().expect("exponent is an integer");
    if exp < -4 || exp >= prec as i32 {
        let mant = mant.trim_end_matches('0').trim_end_matches('.');
        format!("{}e{}{:02}", mant, if exp < 0 { "-" } else { "+" }, exp.abs())
    } else {
        let decimals = (prec as i32 - 1 - exp).max(0) as usize;
        let fixed = format!("{:.*}", decimals, n);
        if fixed.contains('.') {
            fixed
                .trim_end_matches('0')
                .trim_end_matches('.')
                .to_string()
        } else {
            fixed
        }
    }
}

/// Parse a string as a number the way the runtime coerces: optional
/// surrounding whitespace, hex with 0x/0X prefix, otherwise standard
/// decimal/scientific notation. Trailing junk rejects the whole string.
pub fn str_to_number(s: &str) -> Option<f64> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (neg, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    if let Some(hex) = body
        .strip_prefix("0x")
        .or_else(|| body.strip_prefix("0X"))
    {
        if hex.is_empty() {
            return None;
        }
        let v = u64::from_str_radix(hex, 16).ok()? as f64;
        return Some(if neg { -v } else { v });
    }
    // Reject forms f64::from_str accepts but the runtime should not.
    if body.eq_ignore_ascii_case("inf")
        || body.eq_ignore_ascii_case("infinity")
        || body.eq_ignore_ascii_case("nan")
    {
        return None;
    }
    s.parse::<f64>().ok()
}
