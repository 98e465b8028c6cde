//! RAID policy applied when building a new logical drive.
//!
//! Every field has a default, so an empty policy file (or no policy file at
//! all) yields the stock commissioning policy: RAID 10 over 4 to 8 drives,
//! write-back, read-ahead, direct I/O and a 1 MiB stripe.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::Path,
};

use serde::{Deserialize, Serialize};
use strum_macros::Display as StrumDisplay;

use crate::{
    constants::{MAX_DRIVES_PER_ARRAY, STRIPE_SIZES_KIB},
    error::{CommissionError, InvalidInputError, ReportError},
};

/// RAID level of the logical drive to build.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub enum RaidLevel {
    Raid0,
    Raid1,
    Raid5,
    Raid6,
    #[default]
    Raid10,
}

impl RaidLevel {
    /// Numeric level as understood by MegaCli.
    pub fn number(&self) -> u8 {
        match self {
            RaidLevel::Raid0 => 0,
            RaidLevel::Raid1 => 1,
            RaidLevel::Raid5 => 5,
            RaidLevel::Raid6 => 6,
            RaidLevel::Raid10 => 10,
        }
    }

    /// Smallest number of drives the controller accepts for this level.
    pub fn minimum_drives(&self) -> usize {
        match self {
            RaidLevel::Raid0 => 1,
            RaidLevel::Raid1 => 2,
            RaidLevel::Raid5 | RaidLevel::Raid6 => 3,
            RaidLevel::Raid10 => 4,
        }
    }

    /// Whether the level is built as a span of mirrored pairs.
    pub fn is_spanned(&self) -> bool {
        matches!(self, RaidLevel::Raid10)
    }
}

impl Display for RaidLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.number())
    }
}

impl TryFrom<u8> for RaidLevel {
    type Error = InvalidPolicyError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => RaidLevel::Raid0,
            1 => RaidLevel::Raid1,
            5 => RaidLevel::Raid5,
            6 => RaidLevel::Raid6,
            10 => RaidLevel::Raid10,
            level => return Err(InvalidPolicyError::UnsupportedRaidLevel { level }),
        })
    }
}

impl From<RaidLevel> for u8 {
    fn from(level: RaidLevel) -> Self {
        level.number()
    }
}

/// Device write policy.
#[derive(
    Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, StrumDisplay,
)]
pub enum WritePolicy {
    #[serde(rename = "WT")]
    #[strum(serialize = "WT")]
    WriteThrough,
    #[default]
    #[serde(rename = "WB")]
    #[strum(serialize = "WB")]
    WriteBack,
}

/// Device read policy.
#[derive(
    Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, StrumDisplay,
)]
pub enum ReadPolicy {
    #[serde(rename = "NORA")]
    #[strum(serialize = "NORA")]
    NoReadAhead,
    #[default]
    #[serde(rename = "RA")]
    #[strum(serialize = "RA")]
    ReadAhead,
    #[serde(rename = "ADRA")]
    #[strum(serialize = "ADRA")]
    AdaptiveReadAhead,
}

/// Device cache policy.
#[derive(
    Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, StrumDisplay,
)]
pub enum CachePolicy {
    #[default]
    Direct,
    Cached,
}

/// Policy used to pick drives and build the array on each adapter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct RaidPolicy {
    /// RAID level to build.
    pub raid_level: RaidLevel,

    /// Minimum number of same-size drives required. Zero disables the check.
    pub min_drives: usize,

    /// Maximum number of drives to put in the array.
    pub max_drives: usize,

    pub write_policy: WritePolicy,

    pub read_policy: ReadPolicy,

    pub cache_policy: CachePolicy,

    /// Keep write caching enabled when the battery backup unit is bad.
    pub cached_bad_bbu: bool,

    /// Stripe size in KiB.
    pub stripe_size: u32,
}

impl Default for RaidPolicy {
    fn default() -> Self {
        Self {
            raid_level: RaidLevel::Raid10,
            min_drives: 4,
            max_drives: 8,
            write_policy: WritePolicy::WriteBack,
            read_policy: ReadPolicy::ReadAhead,
            cache_policy: CachePolicy::Direct,
            cached_bad_bbu: false,
            stripe_size: 1024,
        }
    }
}

impl RaidPolicy {
    /// Load and validate a policy from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CommissionError> {
        let path = path.as_ref();
        let contents =
            std::fs::read_to_string(path).structured(InvalidInputError::LoadPolicy {
                path: path.to_string_lossy().to_string(),
            })?;

        Self::from_yaml(&contents)
    }

    /// Parse and validate a policy from a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self, CommissionError> {
        let policy: RaidPolicy =
            serde_yaml::from_str(contents).structured(InvalidInputError::ParsePolicy)?;

        policy
            .validate()
            .map_err(|e| CommissionError::new(InvalidInputError::InvalidPolicy(e)))?;

        Ok(policy)
    }

    pub fn validate(&self) -> Result<(), InvalidPolicyError> {
        if self.max_drives == 0 {
            return Err(InvalidPolicyError::MaxDrivesZero);
        }

        if self.max_drives > MAX_DRIVES_PER_ARRAY {
            return Err(InvalidPolicyError::MaxDrivesTooLarge {
                max_drives: self.max_drives,
                limit: MAX_DRIVES_PER_ARRAY,
            });
        }

        if self.min_drives != 0 {
            if self.min_drives < self.raid_level.minimum_drives() {
                return Err(InvalidPolicyError::MinDrivesBelowLevelMinimum {
                    min_drives: self.min_drives,
                    level: self.raid_level.number(),
                    required: self.raid_level.minimum_drives(),
                });
            }

            if self.min_drives > self.max_drives {
                return Err(InvalidPolicyError::MinDrivesAboveMaxDrives {
                    min_drives: self.min_drives,
                    max_drives: self.max_drives,
                });
            }
        }

        if !STRIPE_SIZES_KIB.contains(&self.stripe_size) {
            return Err(InvalidPolicyError::InvalidStripeSize {
                stripe_size: self.stripe_size,
            });
        }

        Ok(())
    }
}

/// Errors detected while statically validating a RAID policy.
#[derive(thiserror::Error, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidPolicyError {
    #[error("RAID level {level} is not supported, must be one of 0, 1, 5, 6 or 10")]
    UnsupportedRaidLevel { level: u8 },

    #[error("Maximum number of drives must be at least 1")]
    MaxDrivesZero,

    #[error("Maximum number of drives is {max_drives}, but the controller accepts at most {limit}")]
    MaxDrivesTooLarge { max_drives: usize, limit: usize },

    #[error("Minimum number of drives is {min_drives}, but RAID {level} requires at least {required}")]
    MinDrivesBelowLevelMinimum {
        min_drives: usize,
        level: u8,
        required: usize,
    },

    #[error("Minimum number of drives ({min_drives}) is larger than the maximum ({max_drives})")]
    MinDrivesAboveMaxDrives { min_drives: usize, max_drives: usize },

    #[error("Stripe size {stripe_size} KiB is invalid, must be a power of two between 8 and 1024")]
    InvalidStripeSize { stripe_size: u32 },
}
