//! Shared types.
//!
//! Most types live in their respective modules (session, camera, scan). This
//! module holds the small vocabulary shared across all of them.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Kind of clocking recorded for a bus/driver pair.
///
/// The remote API receives it as a string: `"entry"`, `"exit"`, or the
/// decimal number of a site-specific category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PointageType {
    /// Bus and driver start their shift.
    #[default]
    Entry,
    /// Bus and driver end their shift.
    Exit,
    /// Numeric category defined by the back office.
    Category(u32),
}

/// Error returned when a string is not a known pointage type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown pointage type '{0}'")]
pub struct ParsePointageTypeError(pub String);

impl PointageType {
    /// Returns the value sent in the `type` field of a clocking request.
    #[must_use]
    pub fn as_wire(&self) -> String {
        match self {
            Self::Entry => "entry".to_string(),
            Self::Exit => "exit".to_string(),
            Self::Category(n) => n.to_string(),
        }
    }
}

impl fmt::Display for PointageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire())
    }
}

impl FromStr for PointageType {
    type Err = ParsePointageTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        match normalized.as_str() {
            "entry" | "entree" | "entrée" | "in" => Ok(Self::Entry),
            "exit" | "sortie" | "out" => Ok(Self::Exit),
            digits if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) => digits
                .parse()
                .map(Self::Category)
                .map_err(|_| ParsePointageTypeError(s.to_string())),
            _ => Err(ParsePointageTypeError(s.to_string())),
        }
    }
}

impl Serialize for PointageType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.as_wire())
    }
}

impl<'de> Deserialize<'de> for PointageType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which code a scan phase is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStep {
    /// The bus QR code (`matricule`).
    Bus,
    /// The driver QR code (`conducteur_matricule`).
    Driver,
}

impl fmt::Display for ScanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bus => f.write_str("bus"),
            Self::Driver => f.write_str("driver"),
        }
    }
}

/// Screens of the clocking application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    /// Credentials form.
    Login,
    /// Landing screen after login.
    Dashboard,
    /// Bus then driver scanning.
    Scan,
    /// Recent scans.
    History,
}

impl Screen {
    /// Returns `true` if the screen requires a session.
    #[must_use]
    pub const fn is_protected(self) -> bool {
        !matches!(self, Self::Login)
    }
}
