//! # Region Hierarchy
//!
//! The static registry of region codes a vertical or persona may be scoped
//! to, and the validator that checks a code against a declared scope level.
//!
//! ## Hierarchy
//!
//! ```text
//! GLOBAL (no code)
//!   ├── EMEA ── UAE, KSA, QAT, KWT, BHR, OMN, EGY, GBR, DEU, FRA, NLD, ZAF
//!   ├── APAC ── IND, SGP, AUS, JPN, HKG, IDN, MYS
//!   └── AMER ── USA, CAN, BRA, MEX
//! ```
//!
//! Codes are matched exactly: free text, lowercase variants and padded
//! strings are not registry codes.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::model::PersonaScope;

/// Granularity level of a registry code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RegionLevel {
    /// Multi-country region (e.g. EMEA).
    Regional,
    /// Single country.
    Local,
}

impl RegionLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regional => "REGIONAL",
            Self::Local => "LOCAL",
        }
    }
}

impl std::fmt::Display for RegionLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the region registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub code: &'static str,
    pub name: &'static str,
    pub level: RegionLevel,
    /// Regional parent of a local code; `None` for regional codes.
    pub parent: Option<&'static str>,
}

const fn regional(code: &'static str, name: &'static str) -> Region {
    Region {
        code,
        name,
        level: RegionLevel::Regional,
        parent: None,
    }
}

const fn local(code: &'static str, name: &'static str, parent: &'static str) -> Region {
    Region {
        code,
        name,
        level: RegionLevel::Local,
        parent: Some(parent),
    }
}

/// The region registry.
pub const REGISTRY: &[Region] = &[
    regional("EMEA", "Europe, Middle East & Africa"),
    regional("APAC", "Asia-Pacific"),
    regional("AMER", "Americas"),
    local("UAE", "United Arab Emirates", "EMEA"),
    local("KSA", "Saudi Arabia", "EMEA"),
    local("QAT", "Qatar", "EMEA"),
    local("KWT", "Kuwait", "EMEA"),
    local("BHR", "Bahrain", "EMEA"),
    local("OMN", "Oman", "EMEA"),
    local("EGY", "Egypt", "EMEA"),
    local("GBR", "United Kingdom", "EMEA"),
    local("DEU", "Germany", "EMEA"),
    local("FRA", "France", "EMEA"),
    local("NLD", "Netherlands", "EMEA"),
    local("ZAF", "South Africa", "EMEA"),
    local("IND", "India", "APAC"),
    local("SGP", "Singapore", "APAC"),
    local("AUS", "Australia", "APAC"),
    local("JPN", "Japan", "APAC"),
    local("HKG", "Hong Kong", "APAC"),
    local("IDN", "Indonesia", "APAC"),
    local("MYS", "Malaysia", "APAC"),
    local("USA", "United States", "AMER"),
    local("CAN", "Canada", "AMER"),
    local("BRA", "Brazil", "AMER"),
    local("MEX", "Mexico", "AMER"),
];

/// Look up a registry entry by exact code.
pub fn lookup(code: &str) -> Option<&'static Region> {
    REGISTRY.iter().find(|r| r.code == code)
}

/// The regional parent of a local code.
pub fn parent_of(code: &str) -> Option<&'static Region> {
    lookup(code).and_then(|r| r.parent).and_then(lookup)
}

/// Whether `local_code` sits under `regional_code` in the hierarchy.
pub fn contains(regional_code: &str, local_code: &str) -> bool {
    parent_of(local_code).is_some_and(|p| p.code == regional_code)
}

/// Why a region code was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    /// The code is not in the registry.
    #[error("unknown region code {code:?}")]
    UnknownCode { code: String },

    /// GLOBAL scope was given a region code.
    #[error("GLOBAL scope must not carry a region code, got {code:?}")]
    GlobalWithRegion { code: String },

    /// LOCAL or REGIONAL scope without a region code.
    #[error("{scope} scope requires a region code")]
    MissingRegion { scope: PersonaScope },

    /// The code exists but at the wrong hierarchy level for the scope.
    #[error("{scope} scope requires a {expected} region code, but {code:?} is {actual}")]
    LevelMismatch {
        scope: PersonaScope,
        code: String,
        expected: RegionLevel,
        actual: RegionLevel,
    },
}

impl RegionError {
    /// Stable machine code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownCode { .. } => "INVALID_REGION_CODE",
            Self::GlobalWithRegion { .. }
            | Self::MissingRegion { .. }
            | Self::LevelMismatch { .. } => "REGION_SCOPE_MISMATCH",
        }
    }
}

/// Result of a region check. Validation never fails with `Err`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionCheck {
    pub valid: bool,
    pub error: Option<RegionError>,
}

impl RegionCheck {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
        }
    }

    fn fail(error: RegionError) -> Self {
        Self {
            valid: false,
            error: Some(error),
        }
    }

    /// Convert into a `Result` for `?` propagation.
    pub fn into_result(self) -> Result<(), RegionError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Check that `code` is a registry code.
pub fn is_valid_region_code(code: &str) -> RegionCheck {
    match lookup(code) {
        Some(_) => RegionCheck::ok(),
        None => RegionCheck::fail(RegionError::UnknownCode {
            code: code.to_string(),
        }),
    }
}

/// Check `region_code` against the hierarchy level `scope` demands.
///
/// - GLOBAL: `region_code` must be `None`.
/// - REGIONAL: a regional-level registry code.
/// - LOCAL: a local-level registry code.
pub fn validate_region_for_scope(scope: PersonaScope, region_code: Option<&str>) -> RegionCheck {
    let expected = match scope {
        PersonaScope::Global => {
            return match region_code {
                None => RegionCheck::ok(),
                Some(code) => RegionCheck::fail(RegionError::GlobalWithRegion {
                    code: code.to_string(),
                }),
            };
        }
        PersonaScope::Regional => RegionLevel::Regional,
        PersonaScope::Local => RegionLevel::Local,
    };

    let Some(code) = region_code else {
        return RegionCheck::fail(RegionError::MissingRegion { scope });
    };
    let Some(region) = lookup(code) else {
        return RegionCheck::fail(RegionError::UnknownCode {
            code: code.to_string(),
        });
    };
    if region.level != expected {
        return RegionCheck::fail(RegionError::LevelMismatch {
            scope,
            code: code.to_string(),
            expected,
            actual: region.level,
        });
    }
    RegionCheck::ok()
}
