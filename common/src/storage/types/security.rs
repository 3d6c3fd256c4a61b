use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Ordered document classification. A chunk inherits its document's level at
/// write time and the level is immutable from then on; reclassification goes
/// through delete-and-re-ingest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SecurityLevel {
    #[serde(rename = "LOW")]
    Low,
    #[serde(rename = "MID")]
    Mid,
    #[serde(rename = "HIGH")]
    High,
    #[serde(rename = "VERY_HIGH")]
    VeryHigh,
}

impl SecurityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            SecurityLevel::Low => "LOW",
            SecurityLevel::Mid => "MID",
            SecurityLevel::High => "HIGH",
            SecurityLevel::VeryHigh => "VERY_HIGH",
        }
    }

    pub fn all() -> &'static [SecurityLevel] {
        &[
            SecurityLevel::Low,
            SecurityLevel::Mid,
            SecurityLevel::High,
            SecurityLevel::VeryHigh,
        ]
    }

    /// The level itself and everything below it. Access is cumulative: a user
    /// cleared for HIGH may read HIGH, MID and LOW.
    pub fn cumulative(self) -> &'static [SecurityLevel] {
        match self {
            SecurityLevel::Low => &[SecurityLevel::Low],
            SecurityLevel::Mid => &[SecurityLevel::Low, SecurityLevel::Mid],
            SecurityLevel::High => &[SecurityLevel::Low, SecurityLevel::Mid, SecurityLevel::High],
            SecurityLevel::VeryHigh => SecurityLevel::all(),
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(SecurityLevel::Low),
            "MID" => Ok(SecurityLevel::Mid),
            "HIGH" => Ok(SecurityLevel::High),
            "VERY_HIGH" => Ok(SecurityLevel::VeryHigh),
            other => Err(format!("unknown security level '{other}'")),
        }
    }
}

/// Closed role enumeration. Roles are stored on the user record as raw
/// strings so an unrecognized value survives deserialization and fails
/// closed when resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserRole {
    #[serde(rename = "GUEST")]
    Guest,
    #[serde(rename = "EMPLOYEE")]
    Employee,
    #[serde(rename = "MANAGER")]
    Manager,
    #[serde(rename = "VICE_PRESIDENT")]
    VicePresident,
    #[serde(rename = "CEO")]
    Ceo,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Guest => "GUEST",
            UserRole::Employee => "EMPLOYEE",
            UserRole::Manager => "MANAGER",
            UserRole::VicePresident => "VICE_PRESIDENT",
            UserRole::Ceo => "CEO",
        }
    }

    /// Highest classification this role may read.
    pub fn max_level(self) -> SecurityLevel {
        match self {
            UserRole::Guest => SecurityLevel::Low,
            UserRole::Employee => SecurityLevel::Mid,
            UserRole::Manager => SecurityLevel::High,
            UserRole::VicePresident | UserRole::Ceo => SecurityLevel::VeryHigh,
        }
    }

    pub fn clearance(self) -> &'static [SecurityLevel] {
        self.max_level().cumulative()
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GUEST" => Ok(UserRole::Guest),
            "EMPLOYEE" => Ok(UserRole::Employee),
            "MANAGER" => Ok(UserRole::Manager),
            "VICE_PRESIDENT" => Ok(UserRole::VicePresident),
            "CEO" => Ok(UserRole::Ceo),
            other => Err(format!("unknown role '{other}'")),
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolve the set of levels a role string may query.
///
/// Pure lookup, no I/O. Unknown or empty roles resolve to the empty set:
/// a role the table does not know gets nothing, not LOW.
pub fn resolve_clearance(role: &str) -> &'static [SecurityLevel] {
    match role.parse::<UserRole>() {
        Ok(known) => known.clearance(),
        Err(_) => &[],
    }
}

/// Highest level in a clearance set, used for tagging audit records.
pub fn effective_max(levels: &[SecurityLevel]) -> Option<SecurityLevel> {
    levels.iter().copied().max()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(SecurityLevel::Low < SecurityLevel::Mid);
        assert!(SecurityLevel::Mid < SecurityLevel::High);
        assert!(SecurityLevel::High < SecurityLevel::VeryHigh);
    }

    #[test]
    fn test_cumulative_access_is_monotonic() {
        for level in SecurityLevel::all() {
            let cumulative = level.cumulative();
            assert_eq!(cumulative.last(), Some(level));
            assert!(cumulative.iter().all(|l| l <= level));
        }
    }

    #[test]
    fn test_role_clearance_mapping() {
        assert_eq!(UserRole::Guest.clearance(), &[SecurityLevel::Low]);
        assert_eq!(
            UserRole::Employee.clearance(),
            &[SecurityLevel::Low, SecurityLevel::Mid]
        );
        assert_eq!(
            UserRole::Manager.clearance(),
            &[SecurityLevel::Low, SecurityLevel::Mid, SecurityLevel::High]
        );
        assert_eq!(UserRole::VicePresident.clearance(), SecurityLevel::all());
        assert_eq!(UserRole::Ceo.clearance(), SecurityLevel::all());
    }

    #[test]
    fn test_unknown_role_resolves_to_empty() {
        assert!(resolve_clearance("INTERN").is_empty());
        assert!(resolve_clearance("").is_empty());
        assert!(resolve_clearance("guest").is_empty());
    }

    #[test]
    fn test_known_role_round_trips_through_strings() {
        for role in [
            UserRole::Guest,
            UserRole::Employee,
            UserRole::Manager,
            UserRole::VicePresident,
            UserRole::Ceo,
        ] {
            assert_eq!(role.as_str().parse::<UserRole>(), Ok(role));
            assert_eq!(resolve_clearance(role.as_str()), role.clearance());
        }
    }

    #[test]
    fn test_effective_max() {
        assert_eq!(effective_max(&[]), None);
        assert_eq!(
            effective_max(UserRole::Manager.clearance()),
            Some(SecurityLevel::High)
        );
    }
}
