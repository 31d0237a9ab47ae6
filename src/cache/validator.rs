//! Key Validator Module
//!
//! Checks cache keys against a configurable strictness level before they reach a shard.

use std::fmt;
use std::str::FromStr;

use crate::error::{CacheError, Result};

// == Validation Mode ==
/// Strictness applied to incoming keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidationMode {
    /// Up to 1000 characters, no control characters
    Strict,
    /// Up to 3000 characters, no control characters
    #[default]
    Normal,
    /// Up to 8000 characters, only NUL is rejected
    Relaxed,
}

impl ValidationMode {
    /// Maximum key length in characters for this mode.
    pub fn max_key_chars(self) -> usize {
        match self {
            ValidationMode::Strict => 1000,
            ValidationMode::Normal => 3000,
            ValidationMode::Relaxed => 8000,
        }
    }
}

impl FromStr for ValidationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strict" => Ok(Self::Strict),
            "normal" => Ok(Self::Normal),
            "relaxed" => Ok(Self::Relaxed),
            other => Err(format!("unknown validation mode: {other}")),
        }
    }
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValidationMode::Strict => "strict",
            ValidationMode::Normal => "normal",
            ValidationMode::Relaxed => "relaxed",
        };
        f.write_str(name)
    }
}

// == Key Validator ==
/// Stateless key validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyValidator {
    mode: ValidationMode,
}

impl KeyValidator {
    pub fn new(mode: ValidationMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> ValidationMode {
        self.mode
    }

    /// Validates a key, returning `CacheError::InvalidKey` on rejection.
    pub fn validate(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey("key cannot be empty".to_string()));
        }

        let max = self.mode.max_key_chars();
        // Cheap byte check first; chars <= bytes.
        if key.len() > max && key.chars().count() > max {
            return Err(CacheError::InvalidKey(format!(
                "key exceeds {} characters in {} mode",
                max, self.mode
            )));
        }

        let forbidden = match self.mode {
            ValidationMode::Strict | ValidationMode::Normal => key.chars().any(char::is_control),
            ValidationMode::Relaxed => key.contains('\0'),
        };
        if forbidden {
            return Err(CacheError::InvalidKey(format!(
                "key contains forbidden characters in {} mode",
                self.mode
            )));
        }

        Ok(())
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_rejects_1001_chars() {
        let key = "k".repeat(1001);
        assert!(KeyValidator::new(ValidationMode::Strict).validate(&key).is_err());
        assert!(KeyValidator::new(ValidationMode::Strict)
            .validate(&"k".repeat(1000))
            .is_ok());
    }

    #[test]
    fn test_relaxed_accepts_1001_chars() {
        let key = "k".repeat(1001);
        assert!(KeyValidator::new(ValidationMode::Relaxed).validate(&key).is_ok());
        assert!(KeyValidator::new(ValidationMode::Normal).validate(&key).is_ok());
    }

    #[test]
    fn test_all_modes_reject_nul() {
        for mode in [
            ValidationMode::Strict,
            ValidationMode::Normal,
            ValidationMode::Relaxed,
        ] {
            let result = KeyValidator::new(mode).validate("bad\0key");
            assert!(matches!(result, Err(CacheError::InvalidKey(_))), "{mode}");
        }
    }

    #[test]
    fn test_control_chars_only_allowed_when_relaxed() {
        let key = "tab\there";
        assert!(KeyValidator::new(ValidationMode::Strict).validate(key).is_err());
        assert!(KeyValidator::new(ValidationMode::Normal).validate(key).is_err());
        assert!(KeyValidator::new(ValidationMode::Relaxed).validate(key).is_ok());
    }

    #[test]
    fn test_empty_key_rejected() {
        assert!(KeyValidator::default().validate("").is_err());
    }

    #[test]
    fn test_length_counts_characters() {
        // 1000 multi-byte chars are over 1000 bytes but within the strict limit.
        let key = "é".repeat(1000);
        assert!(KeyValidator::new(ValidationMode::Strict).validate(&key).is_ok());
    }

    #[test]
    fn test_mode_parse() {
        assert_eq!("STRICT".parse::<ValidationMode>(), Ok(ValidationMode::Strict));
        assert_eq!("relaxed".parse::<ValidationMode>(), Ok(ValidationMode::Relaxed));
        assert!("lenient".parse::<ValidationMode>().is_err());
    }
}
