//! Parsing of `Name[key=value,...]` config values.

use std::collections::HashMap;

/// Splits config value string into name and options string.
/// `Fixed[priority=HIGH]` gives name `Fixed` and options `priority=HIGH`.
pub fn parse_config_value(config_str: &str) -> (String, Option<String>) {
    match config_str.trim().split_once('[') {
        Some((l, r)) => (l.trim().to_string(), Some(r.replace(']', ""))),
        None => (config_str.trim().to_string(), None),
    }
}

/// Parses options string into a map from option names to values. Malformed entries are skipped.
pub fn parse_options(options_str: &str) -> HashMap<String, String> {
    options_str
        .split(',')
        .filter_map(|option_str| option_str.split_once('='))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_value_with_options() {
        let (name, options) = parse_config_value("Fixed[priority=HIGH]");
        assert_eq!(name, "Fixed");
        assert_eq!(options.as_deref(), Some("priority=HIGH"));
    }

    #[test]
    fn test_config_value_without_options() {
        assert_eq!(parse_config_value(" HeadroomFirst "), ("HeadroomFirst".to_string(), None));
    }

    #[test]
    fn test_options() {
        let options = parse_options("option1=0.8, option2=something,broken");
        assert_eq!(options.get("option1").unwrap(), "0.8");
        assert_eq!(options.get("option2").unwrap(), "something");
        assert_eq!(options.get("broken"), None);
        assert_eq!(options.len(), 2);
    }
}
