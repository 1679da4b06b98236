//! Kubernetes resource quantity parsing (`500m`, `10Gi`, `1.5`, `1e3`).

const BINARY_SUFFIXES: [(&str, f64); 6] = [
    ("Ki", 1024.0),
    ("Mi", 1_048_576.0),
    ("Gi", 1_073_741_824.0),
    ("Ti", 1_099_511_627_776.0),
    ("Pi", 1_125_899_906_842_624.0),
    ("Ei", 1_152_921_504_606_846_976.0),
];

const DECIMAL_SUFFIXES: [(&str, f64); 9] = [
    ("n", 1e-9),
    ("u", 1e-6),
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a quantity into its base-unit value. Returns `None` when malformed.
pub fn parse_quantity(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let (number, multiplier) = split_suffix(raw)?;
    if number.is_empty() || !number.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '.' || c == '+' || c == '-') {
        return None;
    }
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some(value * multiplier)
}

fn split_suffix(raw: &str) -> Option<(&str, f64)> {
    for (suffix, multiplier) in BINARY_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return Some((number, multiplier));
        }
    }
    for (suffix, multiplier) in DECIMAL_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return Some((number, multiplier));
        }
    }
    if raw.contains(['e', 'E']) || raw.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '+' || c == '-') {
        return Some((raw, 1.0));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_common_quantities() {
        assert_eq!(parse_quantity("10Gi"), Some(10.0 * 1_073_741_824.0));
        assert!((parse_quantity("500m").unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(parse_quantity("2"), Some(2.0));
        assert_eq!(parse_quantity("1.5G"), Some(1.5e9));
        assert_eq!(parse_quantity("1e3"), Some(1000.0));
    }

    #[test]
    fn test_rejects_malformed_quantities() {
        assert_eq!(parse_quantity(""), None);
        assert_eq!(parse_quantity("Gi"), None);
        assert_eq!(parse_quantity("ten"), None);
        assert_eq!(parse_quantity("10GB"), None);
        assert_eq!(parse_quantity("-1Gi"), None);
    }
}
