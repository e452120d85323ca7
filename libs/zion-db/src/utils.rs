/// Fixed-point (two decimal places) addition over decimal strings.
///
/// Cumulative spend is stored as text so repeated additions never pick
/// up binary floating-point drift. Malformed stored values count as zero.
pub fn add_decimal_str(current: &str, delta: &str) -> String {
    let total = parse_cents(current) + parse_cents(delta);
    format_cents(total)
}

fn parse_cents(s: &str) -> i64 {
    let s = s.trim();
    if s.is_empty() {
        return 0;
    }
    let (sign, s) = match s.strip_prefix('-') {
        Some(rest) => (-1i64, rest),
        None => (1i64, s),
    };
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    let whole: i64 = whole.parse().unwrap_or(0);
    let mut frac_val: i64 = 0;
    for (i, c) in frac.chars().take(2).enumerate() {
        let d = c.to_digit(10).unwrap_or(0) as i64;
        frac_val += d * if i == 0 { 10 } else { 1 };
    }
    sign * (whole * 100 + frac_val)
}

fn format_cents(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    let abs = cents.abs();
    if abs % 100 == 0 {
        format!("{}{}", sign, abs / 100)
    } else {
        format!("{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}
