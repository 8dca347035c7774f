//! Resource quantity parsing.
//!
//! Capacities arrive as opaque strings (`"500m"`, `"16Gi"`, `"110"`). The
//! engine only ever compares them, so they are converted to `f64` in base
//! units: cores for cpu, bytes for memory, plain counts for pods.

use std::collections::BTreeMap;

use crate::error::{ModelError, ModelResult};

/// Named resource quantities as written by the inventory (`cpu = "4"`).
pub type ResourceList = BTreeMap<String, String>;

/// Parsed resource quantities in base units.
pub type ResourceAmounts = BTreeMap<String, f64>;

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a single quantity string into base units.
pub fn parse_quantity(raw: &str) -> ModelResult<f64> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(invalid(raw, "empty quantity"));
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    let base: f64 = number
        .parse()
        .map_err(|_| invalid(raw, "not a number"))?;

    let multiplier = if suffix.is_empty() {
        1.0
    } else if let Some((_, m)) = BINARY_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
        *m
    } else if let Some((_, m)) = DECIMAL_SUFFIXES.iter().find(|(sfx, _)| *sfx == suffix) {
        *m
    } else if let Some(exp) = suffix
        .strip_prefix(['e', 'E'])
        .and_then(|e| e.parse::<i32>().ok())
    {
        10f64.powi(exp)
    } else {
        return Err(invalid(raw, "unknown suffix"));
    };

    let value = base * multiplier;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid(raw, "quantity must be finite and non-negative"));
    }
    Ok(value)
}

/// Parse every entry of a resource list.
pub fn parse_resources(list: &ResourceList) -> ModelResult<ResourceAmounts> {
    list.iter()
        .map(|(name, qty)| Ok((name.clone(), parse_quantity(qty)?)))
        .collect()
}

fn invalid(value: &str, reason: &str) -> ModelError {
    ModelError::InvalidQuantity {
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_integers() {
        assert_eq!(parse_quantity("4").unwrap(), 4.0);
        assert_eq!(parse_quantity(" 110 ").unwrap(), 110.0);
    }

    #[test]
    fn millicores() {
        assert_eq!(parse_quantity("500m").unwrap(), 0.5);
        assert_eq!(parse_quantity("1500m").unwrap(), 1.5);
    }

    #[test]
    fn binary_suffixes() {
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024.0);
        assert_eq!(parse_quantity("2Gi").unwrap(), 2.0 * 1024.0 * 1024.0 * 1024.0);
    }

    #[test]
    fn decimal_suffixes() {
        assert_eq!(parse_quantity("1k").unwrap(), 1000.0);
        assert_eq!(parse_quantity("3G").unwrap(), 3e9);
    }

    #[test]
    fn exponent_form() {
        assert_eq!(parse_quantity("1e3").unwrap(), 1000.0);
        assert_eq!(parse_quantity("25E-1").unwrap(), 2.5);
    }

    #[test]
    fn fractional_with_suffix() {
        assert_eq!(parse_quantity("1.5Gi").unwrap(), 1.5 * 1024.0 * 1024.0 * 1024.0);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("lots").is_err());
        assert!(parse_quantity("4Xi").is_err());
        assert!(parse_quantity("-1").is_err());
    }

    #[test]
    fn parses_whole_list() {
        let mut list = ResourceList::new();
        list.insert("cpu".to_string(), "250m".to_string());
        list.insert("memory".to_string(), "1Mi".to_string());

        let parsed = parse_resources(&list).unwrap();
        assert_eq!(parsed["cpu"], 0.25);
        assert_eq!(parsed["memory"], 1024.0 * 1024.0);
    }

    #[test]
    fn list_error_names_the_value() {
        let mut list = ResourceList::new();
        list.insert("cpu".to_string(), "four".to_string());

        let err = parse_resources(&list).unwrap_err();
        assert!(err.to_string().contains("four"));
    }
}
