use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Speed/quality trade-off selected by the user for a scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScanProfile {
    #[default]
    Balanced,
    Speed,
}

/// Backend-side smart filter strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    Off,
    Low,
    Medium,
    High,
}

impl FilterMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterMode::Off => "off",
            FilterMode::Low => "low",
            FilterMode::Medium => "medium",
            FilterMode::High => "high",
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Query mode resolved from a profile and the collection size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanMode {
    pub approximate: bool,
    pub filter: FilterMode,
}

impl ScanProfile {
    pub fn resolve(&self, collection_size: u64) -> ScanMode {
        let (approximate, filter) = match self {
            ScanProfile::Balanced => match collection_size {
                0..=10_000 => (false, FilterMode::Off),
                10_001..=100_000 => (false, FilterMode::Low),
                100_001..=1_000_000 => (true, FilterMode::Medium),
                _ => (true, FilterMode::High),
            },
            ScanProfile::Speed => (collection_size > 100_000, FilterMode::High),
        };
        ScanMode {
            approximate,
            filter,
        }
    }
}
