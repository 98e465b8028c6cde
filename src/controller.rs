use anyhow::Error;

use osutils::megacli::{Adapter, LogicalDrive, LogicalDriveRequest, MegaCli, PhysicalDrive};

/// View of a RAID controller as needed to commission it.
///
/// `MegaCli` is the only production implementation; the trait exists so the
/// commissioning logic can run against a scripted controller.
pub trait Controller {
    fn adapters(&self) -> Result<Vec<Adapter>, Error>;

    fn logical_drives(&self) -> Result<Vec<LogicalDrive>, Error>;

    fn physical_drives(&self) -> Result<Vec<PhysicalDrive>, Error>;

    fn create_logical_drive(&self, request: &LogicalDriveRequest) -> Result<(), Error>;
}

impl Controller for MegaCli {
    fn adapters(&self) -> Result<Vec<Adapter>, Error> {
        MegaCli::adapters(self)
    }

    fn logical_drives(&self) -> Result<Vec<LogicalDrive>, Error> {
        MegaCli::logical_drives(self)
    }

    fn physical_drives(&self) -> Result<Vec<PhysicalDrive>, Error> {
        MegaCli::physical_drives(self)
    }

    fn create_logical_drive(&self, request: &LogicalDriveRequest) -> Result<(), Error> {
        MegaCli::create_logical_drive(self, request)
    }
}
