/// Format a number with thousands separators and a fixed number of decimals.
///
/// # Examples
///
/// ```
/// use tank_core::formatting::format_number;
///
/// assert_eq!(format_number(1234.5, 1), "1,234.5");
/// assert_eq!(format_number(1234567.0, 0), "1,234,567");
/// assert_eq!(format_number(-9876.5, 1), "-9,876.5");
/// ```
pub fn format_number(value: f64, decimals: u32) -> String {
    let fixed = format!("{:.prec$}", value.abs(), prec = decimals as usize);
    let (int_part, frac_part) = match fixed.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (fixed.as_str(), None),
    };

    let mut out = String::with_capacity(fixed.len() + fixed.len() / 3 + 1);
    if value < 0.0 && fixed.chars().any(|c| c != '0' && c != '.') {
        out.push('-');
    }
    out.push_str(&group_thousands(int_part));
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

/// Format a volume in liters, e.g. `"1,250.0 L"`.
///
/// ```
/// use tank_core::formatting::format_liters;
///
/// assert_eq!(format_liters(1250.0), "1,250.0 L");
/// assert_eq!(format_liters(0.04), "0.0 L");
/// ```
pub fn format_liters(liters: f64) -> String {
    format!("{} L", format_number(liters, 1))
}

/// Format pump run time given in minutes.
///
/// * `< 60` minutes → `"45m"`
/// * whole hours → `"3h"`
/// * otherwise → `"3h 45m"`
///
/// ```
/// use tank_core::formatting::format_run_time;
///
/// assert_eq!(format_run_time(45.0), "45m");
/// assert_eq!(format_run_time(180.0), "3h");
/// assert_eq!(format_run_time(225.0), "3h 45m");
/// ```
pub fn format_run_time(minutes: f64) -> String {
    let total = minutes.max(0.0).round() as i64;
    match (total / 60, total % 60) {
        (0, m) => format!("{}m", m),
        (h, 0) => format!("{}h", h),
        (h, m) => format!("{}h {}m", h, m),
    }
}

/// Format a percentage with no decimals, e.g. `"87%"`.
pub fn format_percent(value: f64) -> String {
    format!("{}%", value.round() as i64)
}

// ── Internal helpers ──────────────────────────────────────────────────────────

/// Insert commas every three digits from the right of an integer string.
fn group_thousands(digits: &str) -> String {
    let len = digits.len();
    let mut out = String::with_capacity(len + len / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (len - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

// ── Tests ──────────────────────────────────────────────────────────────────────
