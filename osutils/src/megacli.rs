//! Wrapper around the LSI MegaCli64 utility.
//!
//! MegaCli only produces free-form `Key : Value` text, so every query here
//! runs the utility and parses the report into typed records. Parsers are
//! kept as free functions so they can be tested against captured output.

use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    process::Command,
};

use anyhow::{bail, Context, Error};
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use commission_api::{
    config::{CachePolicy, RaidLevel, ReadPolicy, WritePolicy},
    constants::{SECTOR_SIZE, UNCONFIGURED_GOOD_STATE},
};

use crate::exe::RunAndCheck;

static ADAPTER_HEADER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Adapter\s*#(\d+)").unwrap());
static LD_ADAPTER_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Adapter\s+(\d+)\s+--\s+Virtual Drive Information").unwrap());
static VIRTUAL_DRIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Virtual (?:Drive|Disk)\s*:\s*(\d+)\s*\(\s*Target Id\s*:\s*(\d+)\s*\)").unwrap()
});
static SECTOR_COUNT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[0x([0-9a-fA-F]+)\s+Sectors\]").unwrap());

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Adapter {
    pub id: u32,
    pub product_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware_package: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct LogicalDrive {
    pub adapter_id: u32,
    pub target_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raid_level: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_of_drives: Option<u32>,
}

/// Location of a physical drive behind an adapter, rendered as `E:S`.
///
/// Drives attached directly to the controller have no enclosure and render
/// as `:S`.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub struct DriveAddress {
    pub enclosure_id: Option<u32>,
    pub slot_number: u32,
}

impl Display for DriveAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self.enclosure_id {
            Some(enclosure) => write!(f, "{enclosure}:{}", self.slot_number),
            None => write!(f, ":{}", self.slot_number),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct PhysicalDrive {
    pub adapter_id: u32,
    pub enclosure_id: Option<u32>,
    pub slot_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<u32>,
    /// Raw capacity in bytes.
    pub raw_size: u64,
    /// Firmware state, lowercased, e.g. `unconfigured(good), spun up`.
    pub firmware_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inquiry_data: Option<String>,
}

impl PhysicalDrive {
    pub fn is_unconfigured_good(&self) -> bool {
        self.firmware_state == UNCONFIGURED_GOOD_STATE
    }

    pub fn address(&self) -> DriveAddress {
        DriveAddress {
            enclosure_id: self.enclosure_id,
            slot_number: self.slot_number,
        }
    }
}

/// Everything needed to build one logical drive.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct LogicalDriveRequest {
    pub adapter_id: u32,
    pub raid_level: RaidLevel,
    pub devices: Vec<DriveAddress>,
    pub write_policy: WritePolicy,
    pub read_policy: ReadPolicy,
    pub cache_policy: CachePolicy,
    pub cached_bad_bbu: bool,
    /// Stripe size in KiB.
    pub stripe_size: u32,
}

impl LogicalDriveRequest {
    /// MegaCli arguments that build the requested logical drive.
    ///
    /// RAID 10 is built as a span of consecutive device pairs with
    /// `-CfgSpanAdd`, every other level as a single array with `-CfgLdAdd`.
    pub fn to_args(&self) -> Result<Vec<String>, Error> {
        if self.devices.is_empty() {
            bail!("Cannot create a logical drive without devices");
        }

        let mut args = Vec::new();
        if self.raid_level.is_spanned() {
            if self.devices.len() % 2 != 0 {
                bail!(
                    "RAID {} requires an even number of drives, got {}",
                    self.raid_level,
                    self.devices.len()
                );
            }

            args.push("-CfgSpanAdd".to_string());
            args.push(format!("-r{}", self.raid_level));
            args.extend(
                self.devices
                    .chunks(2)
                    .enumerate()
                    .map(|(i, pair)| format!("-Array{i}[{}]", join_addresses(pair))),
            );
        } else {
            args.push("-CfgLdAdd".to_string());
            args.push(format!(
                "-r{}[{}]",
                self.raid_level,
                join_addresses(&self.devices)
            ));
        }

        args.push(self.write_policy.to_string());
        args.push(self.read_policy.to_string());
        args.push(self.cache_policy.to_string());
        args.push(if self.cached_bad_bbu {
            "CachedBadBBU".to_string()
        } else {
            "NoCachedBadBBU".to_string()
        });
        args.push(format!("-strpsz{}", self.stripe_size));
        args.push(format!("-a{}", self.adapter_id));

        Ok(args)
    }
}

fn join_addresses(devices: &[DriveAddress]) -> String {
    devices
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

/// Handle on an installed MegaCli64 binary.
#[derive(Debug, Clone)]
pub struct MegaCli {
    path: PathBuf,
}

impl MegaCli {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run<I, S>(&self, args: I) -> Result<String, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<std::ffi::OsStr>,
    {
        Command::new(&self.path)
            .args(args)
            .arg("-NoLog")
            .output_and_check()
    }

    pub fn adapters(&self) -> Result<Vec<Adapter>, Error> {
        debug!("Listing RAID adapters");

        let output = self
            .run(["-AdpAllInfo", "-aALL"])
            .context("Failed to run MegaCli adapter info")?;

        let parsed = parse_adapters(&output);
        if parsed.is_err() {
            warn!("MegaCli adapter info output: {}", output);
        }
        parsed
    }

    pub fn logical_drives(&self) -> Result<Vec<LogicalDrive>, Error> {
        debug!("Listing logical drives");

        let output = self
            .run(["-LDInfo", "-Lall", "-aALL"])
            .context("Failed to run MegaCli logical drive info")?;

        let parsed = parse_logical_drives(&output);
        if parsed.is_err() {
            warn!("MegaCli logical drive info output: {}", output);
        }
        parsed
    }

    pub fn physical_drives(&self) -> Result<Vec<PhysicalDrive>, Error> {
        debug!("Listing physical drives");

        let output = self
            .run(["-PDList", "-aALL"])
            .context("Failed to run MegaCli physical drive list")?;

        let parsed = parse_physical_drives(&output);
        if parsed.is_err() {
            warn!("MegaCli physical drive list output: {}", output);
        }
        parsed
    }

    pub fn create_logical_drive(&self, request: &LogicalDriveRequest) -> Result<(), Error> {
        info!(
            "Creating RAID {} logical drive on adapter #{} from {} drives",
            request.raid_level,
            request.adapter_id,
            request.devices.len()
        );

        let args = request
            .to_args()
            .context("Invalid logical drive request")?;

        self.run(&args)
            .map(|_| ())
            .context("Failed to run MegaCli logical drive creation")
    }
}

/// Split a report line into a trimmed key and value.
fn key_value(line: &str) -> Option<(&str, &str)> {
    let (key, value) = line.split_once(':')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key, value.trim()))
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, Error> {
    value
        .parse()
        .with_context(|| format!("Failed to parse '{key}' value '{value}'"))
}

/// Parse the output of `MegaCli64 -AdpAllInfo -aALL`.
fn parse_adapters(output: &str) -> Result<Vec<Adapter>, Error> {
    let mut adapters: Vec<Adapter> = Vec::new();

    for line in output.lines().map(str::trim) {
        if let Some(captures) = ADAPTER_HEADER.captures(line) {
            adapters.push(Adapter {
                id: parse_u32("Adapter", &captures[1])?,
                ..Default::default()
            });
            continue;
        }

        let (Some(adapter), Some((key, value))) = (adapters.last_mut(), key_value(line)) else {
            continue;
        };

        // Keys can repeat in later sections of the report; the first one wins
        match key.to_ascii_lowercase().as_str() {
            "product name" if adapter.product_name.is_empty() => {
                adapter.product_name = value.to_string()
            }
            "serial no" if adapter.serial_number.is_none() => {
                adapter.serial_number = non_empty(value)
            }
            "fw package build" if adapter.firmware_package.is_none() => {
                adapter.firmware_package = non_empty(value)
            }
            _ => {}
        }
    }

    Ok(adapters)
}

/// Parse the output of `MegaCli64 -LDInfo -Lall -aALL`.
fn parse_logical_drives(output: &str) -> Result<Vec<LogicalDrive>, Error> {
    let mut drives: Vec<LogicalDrive> = Vec::new();
    let mut adapter_id = None;

    for line in output.lines().map(str::trim) {
        if let Some(captures) = LD_ADAPTER_HEADER.captures(line) {
            adapter_id = Some(parse_u32("Adapter", &captures[1])?);
            continue;
        }

        if let Some(captures) = VIRTUAL_DRIVE.captures(line) {
            drives.push(LogicalDrive {
                adapter_id: adapter_id
                    .context("Found a virtual drive before any adapter header")?,
                target_id: parse_u32("Target Id", &captures[2])?,
                ..Default::default()
            });
            continue;
        }

        let (Some(drive), Some((key, value))) = (drives.last_mut(), key_value(line)) else {
            continue;
        };

        // A new adapter header closes the previous adapter's drives
        if Some(drive.adapter_id) != adapter_id {
            continue;
        }

        match key.to_ascii_lowercase().as_str() {
            "name" => drive.name = non_empty(value),
            "raid level" => drive.raid_level = non_empty(value),
            "size" => drive.size = non_empty(value),
            "state" => drive.state = non_empty(value),
            "number of drives" => drive.number_of_drives = Some(parse_u32(key, value)?),
            _ => {}
        }
    }

    Ok(drives)
}

/// Physical drive record whose mandatory fields have not all been seen yet.
#[derive(Default)]
struct PartialPhysicalDrive {
    adapter_id: u32,
    enclosure_id: Option<u32>,
    slot_number: Option<u32>,
    device_id: Option<u32>,
    raw_size: Option<u64>,
    firmware_state: Option<String>,
    inquiry_data: Option<String>,
}

impl PartialPhysicalDrive {
    fn finish(self) -> Result<PhysicalDrive, Error> {
        Ok(PhysicalDrive {
            adapter_id: self.adapter_id,
            enclosure_id: self.enclosure_id,
            slot_number: self
                .slot_number
                .context("Physical drive has no slot number")?,
            device_id: self.device_id,
            raw_size: self.raw_size.context("Physical drive has no raw size")?,
            firmware_state: self
                .firmware_state
                .context("Physical drive has no firmware state")?,
            inquiry_data: self.inquiry_data,
        })
    }
}

/// Convert a size such as `279.396 GB [0x22ecb25c Sectors]` to bytes.
fn parse_raw_size(value: &str) -> Result<u64, Error> {
    let captures = SECTOR_COUNT
        .captures(value)
        .with_context(|| format!("Failed to find sector count in '{value}'"))?;

    let sectors = u64::from_str_radix(&captures[1], 16)
        .with_context(|| format!("Failed to parse sector count in '{value}'"))?;

    sectors
        .checked_mul(SECTOR_SIZE)
        .with_context(|| format!("Sector count in '{value}' is out of range"))
}

/// Parse the output of `MegaCli64 -PDList -aALL`.
fn parse_physical_drives(output: &str) -> Result<Vec<PhysicalDrive>, Error> {
    let mut drives = Vec::new();
    let mut adapter_id = None;
    let mut current: Option<PartialPhysicalDrive> = None;

    for line in output.lines().map(str::trim) {
        if let Some(captures) = ADAPTER_HEADER.captures(line) {
            if let Some(drive) = current.take() {
                drives.push(drive.finish()?);
            }
            adapter_id = Some(parse_u32("Adapter", &captures[1])?);
            continue;
        }

        let Some((key, value)) = key_value(line) else {
            continue;
        };
        let key = key.to_ascii_lowercase();

        if key == "enclosure device id" {
            if let Some(drive) = current.take() {
                drives.push(drive.finish()?);
            }
            current = Some(PartialPhysicalDrive {
                adapter_id: adapter_id
                    .context("Found a physical drive before any adapter header")?,
                // Direct-attached drives report 'N/A'
                enclosure_id: value.parse().ok(),
                ..Default::default()
            });
            continue;
        }

        let Some(drive) = current.as_mut() else {
            continue;
        };

        match key.as_str() {
            "slot number" => drive.slot_number = Some(parse_u32(&key, value)?),
            "device id" => drive.device_id = Some(parse_u32(&key, value)?),
            "raw size" => drive.raw_size = Some(parse_raw_size(value)?),
            "firmware state" => drive.firmware_state = Some(value.to_lowercase()),
            "inquiry data" => {
                drive.inquiry_data =
                    non_empty(&value.split_whitespace().collect::<Vec<_>>().join(" "))
            }
            _ => {}
        }
    }

    if let Some(drive) = current {
        drives.push(drive.finish()?);
    }

    Ok(drives)
}
