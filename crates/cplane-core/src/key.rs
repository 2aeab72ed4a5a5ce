//! Key format rules for verticals, sub-verticals and personas.

use crate::error::ValidationError;

/// Maximum key length in bytes.
pub const MAX_KEY_LEN: usize = 64;

/// The two key grammars: catalog keys are snake_case, persona keys are
/// slugs that also admit `-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormat {
    Snake,
    Slug,
}

impl KeyFormat {
    pub fn rule(&self) -> &'static str {
        match self {
            Self::Snake => "must be lowercase snake_case starting with a letter, at most 64 chars",
            Self::Slug => {
                "must be lowercase letters and digits separated by '_' or '-', starting with a letter, at most 64 chars"
            }
        }
    }

    pub fn hint(&self) -> &'static str {
        match self {
            Self::Snake => "Use lowercase letters, digits and underscores, starting with a letter",
            Self::Slug => {
                "Use lowercase letters and digits separated by underscores or hyphens, starting with a letter"
            }
        }
    }

    fn separators(&self) -> &'static [char] {
        match self {
            Self::Snake => &['_'],
            Self::Slug => &['_', '-'],
        }
    }
}

fn validate_key(field: &'static str, key: &str, format: KeyFormat) -> Result<(), ValidationError> {
    if is_well_formed(key, format.separators()) {
        Ok(())
    } else {
        Err(ValidationError::InvalidKey {
            field,
            value: key.to_string(),
            format,
        })
    }
}

/// Validate a snake_case key (`^[a-z][a-z0-9]*(_[a-z0-9]+)*$`).
pub fn validate_snake_key(field: &'static str, key: &str) -> Result<(), ValidationError> {
    validate_key(field, key, KeyFormat::Snake)
}

/// Validate a persona slug: snake_case that also admits `-` separators.
pub fn validate_slug_key(field: &'static str, key: &str) -> Result<(), ValidationError> {
    validate_key(field, key, KeyFormat::Slug)
}

fn is_well_formed(key: &str, separators: &[char]) -> bool {
    if key.is_empty() || key.len() > MAX_KEY_LEN {
        return false;
    }
    let mut chars = key.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_lowercase()) {
        return false;
    }
    let mut prev_sep = false;
    for c in chars {
        if separators.contains(&c) {
            if prev_sep {
                return false;
            }
            prev_sep = true;
        } else if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_sep = false;
        } else {
            return false;
        }
    }
    !prev_sep
}
