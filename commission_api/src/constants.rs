// Vendor utility constants

/// Default location of the MegaCli64 utility once its package is installed.
pub const MEGACLI_PATH_DEFAULT: &str = "/opt/MegaRAID/MegaCli/MegaCli64";

/// Environment variable pointing at the directory where MAAS stores the
/// packages it downloaded for the commissioning script.
pub const DOWNLOAD_PATH_ENV: &str = "DOWNLOAD_PATH";

/// Pattern of the MegaCli RPM inside the download directory.
pub const MEGACLI_RPM_PATTERN: &str = "Linux/MegaCli-*.noarch.rpm";

// Controller constants

/// Firmware state of a physical drive that can be used to build a new array.
pub const UNCONFIGURED_GOOD_STATE: &str = "unconfigured(good), spun up";

/// Sector size MegaCli uses when reporting raw drive sizes.
pub const SECTOR_SIZE: u64 = 512;

/// Largest number of drives a single logical drive may be built from.
pub const MAX_DRIVES_PER_ARRAY: usize = 32;

/// Stripe sizes accepted by the controller, in KiB.
pub const STRIPE_SIZES_KIB: [u32; 8] = [8, 16, 32, 64, 128, 256, 512, 1024];

/// Number of bytes in a GiB, used when reporting drive sizes.
pub const GIB: u64 = 1024 * 1024 * 1024;
