//! Decides, adapter by adapter, whether a new array should be built and
//! builds it.
//!
//! Adapters that already carry a logical drive are never touched, so running
//! the step twice on the same machine is harmless.

use log::info;
use serde::Serialize;

use commission_api::{
    config::RaidPolicy,
    constants::GIB,
    error::{CommissionError, ControllerError, ReportError},
};
use osutils::megacli::{Adapter, LogicalDrive, LogicalDriveRequest, PhysicalDrive};

use crate::controller::Controller;

/// What happened on each adapter during a run.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct Report {
    pub adapters: Vec<AdapterReport>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct AdapterReport {
    pub adapter_id: u32,
    pub product_name: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "kebab-case")]
pub enum Outcome {
    /// The adapter already has logical drives and was left alone.
    ExistingLogicalDrives { count: usize },

    NoUnconfiguredDrives,

    /// The largest group of same-size drives is too small for the policy.
    NotEnoughDrives { have: usize, required: usize },

    /// Dry run: the logical drive that would have been created.
    Planned { request: LogicalDriveRequest },

    Created { request: LogicalDriveRequest },
}

enum Decision {
    Skip(Outcome),
    Build(LogicalDriveRequest),
}

/// Build one logical drive on every adapter that has none, following `policy`.
///
/// Each examined adapter is appended to `report` as soon as it is handled, so
/// on failure `report` still records the arrays built earlier in the run.
/// When `dry_run` is set the controller is only queried.
pub fn commission(
    controller: &dyn Controller,
    policy: &RaidPolicy,
    dry_run: bool,
    report: &mut Report,
) -> Result<(), CommissionError> {
    let adapters = controller
        .adapters()
        .structured(ControllerError::ListAdapters)?;
    let logical_drives = controller
        .logical_drives()
        .structured(ControllerError::ListLogicalDrives)?;
    let physical_drives = controller
        .physical_drives()
        .structured(ControllerError::ListPhysicalDrives)?;

    if adapters.is_empty() {
        info!("No adapters detected");
        return Ok(());
    }

    for adapter in &adapters {
        info!(
            "Examining adapter #{} ({})",
            adapter.id, adapter.product_name
        );

        let outcome = match decide(adapter, &logical_drives, &physical_drives, policy) {
            Decision::Skip(outcome) => outcome,
            Decision::Build(request) if dry_run => {
                info!(
                    "Dry run, not building RAID {} on adapter #{}",
                    request.raid_level, adapter.id
                );
                Outcome::Planned { request }
            }
            Decision::Build(request) => {
                controller
                    .create_logical_drive(&request)
                    .structured(ControllerError::CreateLogicalDrive {
                        adapter_id: adapter.id,
                    })?;
                info!("Created RAID {}, no errors reported", request.raid_level);
                Outcome::Created { request }
            }
        };

        report.adapters.push(AdapterReport {
            adapter_id: adapter.id,
            product_name: adapter.product_name.clone(),
            outcome,
        });
    }

    info!("DONE");
    Ok(())
}

fn decide(
    adapter: &Adapter,
    logical_drives: &[LogicalDrive],
    physical_drives: &[PhysicalDrive],
    policy: &RaidPolicy,
) -> Decision {
    let existing = logical_drives
        .iter()
        .filter(|ld| ld.adapter_id == adapter.id)
        .count();
    if existing > 0 {
        info!("Found existing logical drives, skipping");
        return Decision::Skip(Outcome::ExistingLogicalDrives { count: existing });
    }

    let unconfigured = physical_drives
        .iter()
        .filter(|pd| pd.adapter_id == adapter.id && pd.is_unconfigured_good())
        .collect::<Vec<_>>();
    if unconfigured.is_empty() {
        info!("No drives to build array from, skipping");
        return Decision::Skip(Outcome::NoUnconfiguredDrives);
    }
    info!("Found {} unconfigured drives", unconfigured.len());

    let (size, mut drives) = largest_same_size_group(&unconfigured);
    info!("Found {} drives of size {} GiB", drives.len(), size / GIB);

    let level = policy.raid_level;
    let have = drives.len();
    if policy.min_drives != 0 && have < policy.min_drives {
        info!(
            "Not enough drives to build RAID {} from (have {}, required {})",
            level, have, policy.min_drives
        );
        return Decision::Skip(Outcome::NotEnoughDrives {
            have,
            required: policy.min_drives,
        });
    }

    drives.truncate(policy.max_drives);
    if level.is_spanned() {
        // Spans are built from mirrored pairs
        drives.truncate(drives.len() - drives.len() % 2);
    }

    // Pairing can drop a drive below the policy minimum
    let usable = drives.len();
    if usable == 0 || usable < policy.min_drives {
        let required = match policy.min_drives {
            0 => level.minimum_drives(),
            min => min,
        };
        info!(
            "Not enough drives to build RAID {} from (have {}, required {})",
            level, usable, required
        );
        return Decision::Skip(Outcome::NotEnoughDrives {
            have: usable,
            required,
        });
    }

    info!("Ready to build RAID {} from {} drives", level, drives.len());

    Decision::Build(LogicalDriveRequest {
        adapter_id: adapter.id,
        raid_level: level,
        devices: drives.iter().map(|pd| pd.address()).collect(),
        write_policy: policy.write_policy,
        read_policy: policy.read_policy,
        cache_policy: policy.cache_policy,
        cached_bad_bbu: policy.cached_bad_bbu,
        stripe_size: policy.stripe_size,
    })
}

/// Returns the most common raw size and the drives of that size, in their
/// original order. On a tie the size seen first wins.
fn largest_same_size_group<'a>(drives: &[&'a PhysicalDrive]) -> (u64, Vec<&'a PhysicalDrive>) {
    let mut counts: Vec<(u64, usize)> = Vec::new();
    for drive in drives {
        match counts.iter_mut().find(|(size, _)| *size == drive.raw_size) {
            Some((_, count)) => *count += 1,
            None => counts.push((drive.raw_size, 1)),
        }
    }

    let size = counts
        .iter()
        .fold(None, |best: Option<(u64, usize)>, &(size, count)| match best {
            Some((_, best_count)) if best_count >= count => best,
            _ => Some((size, count)),
        })
        .map(|(size, _)| size)
        .unwrap_or_default();

    let group = drives
        .iter()
        .copied()
        .filter(|drive| drive.raw_size == size)
        .collect();

    (size, group)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;

    use anyhow::{bail, Error};

    use commission_api::{
        config::{CachePolicy, RaidLevel, ReadPolicy, WritePolicy},
        error::ErrorKind,
    };
    use osutils::megacli::DriveAddress;

    use super::*;

    const TB: u64 = 1_000_204_886_016;
    const TB2: u64 = 2_000_398_934_016;

    #[derive(Default)]
    struct FakeController {
        adapters: Vec<Adapter>,
        logical_drives: Vec<LogicalDrive>,
        physical_drives: Vec<PhysicalDrive>,
        fail_listing: bool,
        fail_create_on: Option<u32>,
        created: RefCell<Vec<LogicalDriveRequest>>,
    }

    impl Controller for FakeController {
        fn adapters(&self) -> Result<Vec<Adapter>, Error> {
            Ok(self.adapters.clone())
        }

        fn logical_drives(&self) -> Result<Vec<LogicalDrive>, Error> {
            Ok(self.logical_drives.clone())
        }

        fn physical_drives(&self) -> Result<Vec<PhysicalDrive>, Error> {
            if self.fail_listing {
                bail!("MegaCli64 exited with status: 1");
            }
            Ok(self.physical_drives.clone())
        }

        fn create_logical_drive(&self, request: &LogicalDriveRequest) -> Result<(), Error> {
            if self.fail_create_on == Some(request.adapter_id) {
                bail!("Adapter {}: Configure Adapter Failed", request.adapter_id);
            }
            self.created.borrow_mut().push(request.clone());
            Ok(())
        }
    }

    fn adapter(id: u32) -> Adapter {
        Adapter {
            id,
            product_name: format!("PERC H710 Mini {id}"),
            ..Default::default()
        }
    }

    fn drive(adapter_id: u32, slot_number: u32, raw_size: u64, state: &str) -> PhysicalDrive {
        PhysicalDrive {
            adapter_id,
            enclosure_id: Some(32),
            slot_number,
            device_id: Some(slot_number),
            raw_size,
            firmware_state: state.into(),
            inquiry_data: None,
        }
    }

    fn unconfigured(adapter_id: u32, slot_number: u32, raw_size: u64) -> PhysicalDrive {
        drive(
            adapter_id,
            slot_number,
            raw_size,
            "unconfigured(good), spun up",
        )
    }

    fn run(
        controller: &FakeController,
        policy: &RaidPolicy,
        dry_run: bool,
    ) -> Result<Report, CommissionError> {
        let mut report = Report::default();
        commission(controller, policy, dry_run, &mut report)?;
        Ok(report)
    }

    fn addresses(slots: &[u32]) -> Vec<DriveAddress> {
        slots
            .iter()
            .map(|&slot_number| DriveAddress {
                enclosure_id: Some(32),
                slot_number,
            })
            .collect()
    }

    #[test]
    fn test_no_adapters() {
        let controller = FakeController::default();
        let report = run(&controller, &RaidPolicy::default(), false).unwrap();
        assert!(report.adapters.is_empty());
        assert!(controller.created.borrow().is_empty());
    }

    #[test]
    fn test_existing_logical_drives() {
        let controller = FakeController {
            adapters: vec![adapter(0)],
            logical_drives: vec![
                LogicalDrive {
                    adapter_id: 0,
                    target_id: 0,
                    ..Default::default()
                },
                LogicalDrive {
                    adapter_id: 0,
                    target_id: 1,
                    ..Default::default()
                },
            ],
            physical_drives: (0..8).map(|slot| unconfigured(0, slot, TB)).collect(),
            ..Default::default()
        };

        let report = run(&controller, &RaidPolicy::default(), false).unwrap();
        assert_eq!(
            report.adapters[0].outcome,
            Outcome::ExistingLogicalDrives { count: 2 }
        );
        assert!(controller.created.borrow().is_empty());
    }

    #[test]
    fn test_no_unconfigured_drives() {
        let controller = FakeController {
            adapters: vec![adapter(0)],
            physical_drives: vec![
                drive(0, 0, TB, "online, spun up"),
                drive(0, 1, TB, "unconfigured(bad)"),
                drive(0, 2, TB, "hotspare, spun up"),
                // Belongs to another adapter
                unconfigured(1, 3, TB),
            ],
            ..Default::default()
        };

        let report = run(&controller, &RaidPolicy::default(), false).unwrap();
        assert_eq!(report.adapters[0].outcome, Outcome::NoUnconfiguredDrives);
        assert!(controller.created.borrow().is_empty());
    }

    #[test]
    fn test_not_enough_drives() {
        let controller = FakeController {
            adapters: vec![adapter(0)],
            physical_drives: vec![
                unconfigured(0, 0, TB),
                unconfigured(0, 1, TB),
                unconfigured(0, 2, TB),
                unconfigured(0, 3, TB2),
                unconfigured(0, 4, TB2),
            ],
            ..Default::default()
        };

        // Five unconfigured drives, but only three of the same size
        let report = run(&controller, &RaidPolicy::default(), false).unwrap();
        assert_eq!(
            report.adapters[0].outcome,
            Outcome::NotEnoughDrives {
                have: 3,
                required: 4
            }
        );
        assert!(controller.created.borrow().is_empty());
    }

    #[test]
    fn test_build_raid10() {
        let mut physical_drives = vec![
            drive(0, 0, TB, "online, spun up"),
            unconfigured(0, 1, TB2),
            unconfigured(0, 2, TB2),
        ];
        physical_drives.extend((3..13).map(|slot| unconfigured(0, slot, TB)));

        let controller = FakeController {
            adapters: vec![adapter(0)],
            physical_drives,
            ..Default::default()
        };

        let report = run(&controller, &RaidPolicy::default(), false).unwrap();

        let expected = LogicalDriveRequest {
            adapter_id: 0,
            raid_level: RaidLevel::Raid10,
            devices: addresses(&[3, 4, 5, 6, 7, 8, 9, 10]),
            write_policy: WritePolicy::WriteBack,
            read_policy: ReadPolicy::ReadAhead,
            cache_policy: CachePolicy::Direct,
            cached_bad_bbu: false,
            stripe_size: 1024,
        };
        assert_eq!(*controller.created.borrow(), vec![expected.clone()]);
        assert_eq!(
            report,
            Report {
                adapters: vec![AdapterReport {
                    adapter_id: 0,
                    product_name: "PERC H710 Mini 0".into(),
                    outcome: Outcome::Created { request: expected },
                }]
            }
        );
    }

    #[test]
    fn test_raid10_uses_even_drive_count() {
        let controller = FakeController {
            adapters: vec![adapter(0)],
            physical_drives: (0..5).map(|slot| unconfigured(0, slot, TB)).collect(),
            ..Default::default()
        };

        run(&controller, &RaidPolicy::default(), false).unwrap();
        assert_eq!(
            controller.created.borrow()[0].devices,
            addresses(&[0, 1, 2, 3])
        );

        // Without a minimum a single drive cannot form a span
        let controller = FakeController {
            adapters: vec![adapter(0)],
            physical_drives: vec![unconfigured(0, 0, TB)],
            ..Default::default()
        };
        let policy = RaidPolicy {
            min_drives: 0,
            ..Default::default()
        };
        let report = run(&controller, &policy, false).unwrap();
        assert_eq!(
            report.adapters[0].outcome,
            Outcome::NotEnoughDrives {
                have: 0,
                required: 4
            }
        );
        assert!(controller.created.borrow().is_empty());
    }

    #[test]
    fn test_raid10_pairing_respects_min_drives() {
        let policy = RaidPolicy::from_yaml("min-drives: 5").unwrap();

        // Five drives pair down to four, below the minimum
        let controller = FakeController {
            adapters: vec![adapter(0)],
            physical_drives: (0..5).map(|slot| unconfigured(0, slot, TB)).collect(),
            ..Default::default()
        };
        let report = run(&controller, &policy, false).unwrap();
        assert_eq!(
            report.adapters[0].outcome,
            Outcome::NotEnoughDrives {
                have: 4,
                required: 5
            }
        );
        assert!(controller.created.borrow().is_empty());

        let controller = FakeController {
            adapters: vec![adapter(0)],
            physical_drives: (0..6).map(|slot| unconfigured(0, slot, TB)).collect(),
            ..Default::default()
        };
        run(&controller, &policy, false).unwrap();
        assert_eq!(
            controller.created.borrow()[0].devices,
            addresses(&[0, 1, 2, 3, 4, 5])
        );
    }

    #[test]
    fn test_build_with_custom_policy() {
        let controller = FakeController {
            adapters: vec![adapter(0)],
            physical_drives: (0..6).map(|slot| unconfigured(0, slot, TB)).collect(),
            ..Default::default()
        };
        let policy = RaidPolicy {
            raid_level: RaidLevel::Raid5,
            min_drives: 3,
            max_drives: 5,
            write_policy: WritePolicy::WriteThrough,
            read_policy: ReadPolicy::NoReadAhead,
            cache_policy: CachePolicy::Cached,
            cached_bad_bbu: true,
            stripe_size: 64,
        };

        run(&controller, &policy, false).unwrap();

        let created = controller.created.borrow();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].raid_level, RaidLevel::Raid5);
        assert_eq!(created[0].devices, addresses(&[0, 1, 2, 3, 4]));
        assert_eq!(created[0].write_policy, WritePolicy::WriteThrough);
        assert_eq!(created[0].read_policy, ReadPolicy::NoReadAhead);
        assert_eq!(created[0].cache_policy, CachePolicy::Cached);
        assert!(created[0].cached_bad_bbu);
        assert_eq!(created[0].stripe_size, 64);
    }

    #[test]
    fn test_multiple_adapters() {
        let mut physical_drives: Vec<_> = (0..4).map(|slot| unconfigured(0, slot, TB)).collect();
        physical_drives.extend((0..4).map(|slot| unconfigured(1, slot, TB2)));

        let controller = FakeController {
            adapters: vec![adapter(0), adapter(1), adapter(2)],
            logical_drives: vec![LogicalDrive {
                adapter_id: 0,
                target_id: 0,
                ..Default::default()
            }],
            physical_drives,
            ..Default::default()
        };

        let report = run(&controller, &RaidPolicy::default(), false).unwrap();
        let outcomes = report
            .adapters
            .iter()
            .map(|a| (a.adapter_id, &a.outcome))
            .collect::<Vec<_>>();
        assert!(matches!(
            outcomes[..],
            [
                (0, Outcome::ExistingLogicalDrives { count: 1 }),
                (1, Outcome::Created { .. }),
                (2, Outcome::NoUnconfiguredDrives),
            ]
        ));

        let created = controller.created.borrow();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].adapter_id, 1);
    }

    #[test]
    fn test_dry_run() {
        let controller = FakeController {
            adapters: vec![adapter(0)],
            physical_drives: (0..4).map(|slot| unconfigured(0, slot, TB)).collect(),
            ..Default::default()
        };

        let report = run(&controller, &RaidPolicy::default(), true).unwrap();
        match &report.adapters[0].outcome {
            Outcome::Planned { request } => {
                assert_eq!(request.devices, addresses(&[0, 1, 2, 3]))
            }
            outcome => panic!("unexpected outcome: {outcome:?}"),
        }
        assert!(controller.created.borrow().is_empty());
    }

    #[test]
    fn test_controller_failures() {
        let controller = FakeController {
            adapters: vec![adapter(0)],
            physical_drives: (0..4).map(|slot| unconfigured(0, slot, TB)).collect(),
            fail_create_on: Some(0),
            ..Default::default()
        };
        let err = run(&controller, &RaidPolicy::default(), false).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Controller(ControllerError::CreateLogicalDrive { adapter_id: 0 })
        );

        let controller = FakeController {
            adapters: vec![adapter(0)],
            fail_listing: true,
            ..Default::default()
        };
        let err = run(&controller, &RaidPolicy::default(), false).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Controller(ControllerError::ListPhysicalDrives)
        );
    }

    #[test]
    fn test_failure_keeps_earlier_adapters() {
        let mut physical_drives: Vec<_> = (0..4).map(|slot| unconfigured(0, slot, TB)).collect();
        physical_drives.extend((0..4).map(|slot| unconfigured(1, slot, TB)));

        let controller = FakeController {
            adapters: vec![adapter(0), adapter(1)],
            physical_drives,
            fail_create_on: Some(1),
            ..Default::default()
        };

        let mut report = Report::default();
        let err =
            commission(&controller, &RaidPolicy::default(), false, &mut report).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::Controller(ControllerError::CreateLogicalDrive { adapter_id: 1 })
        );

        assert_eq!(report.adapters.len(), 1);
        assert_eq!(report.adapters[0].adapter_id, 0);
        assert!(matches!(
            report.adapters[0].outcome,
            Outcome::Created { .. }
        ));
        assert_eq!(controller.created.borrow().len(), 1);
    }

    #[test]
    fn test_largest_same_size_group() {
        let drives = [
            unconfigured(0, 0, TB2),
            unconfigured(0, 1, TB),
            unconfigured(0, 2, TB),
            unconfigured(0, 3, TB2),
            unconfigured(0, 4, 500),
        ];
        let refs = drives.iter().collect::<Vec<_>>();

        // Tie between TB2 and TB, TB2 was seen first
        let (size, group) = largest_same_size_group(&refs);
        assert_eq!(size, TB2);
        assert_eq!(
            group.iter().map(|d| d.slot_number).collect::<Vec<_>>(),
            vec![0, 3]
        );

        let (size, group) = largest_same_size_group(&refs[1..]);
        assert_eq!(size, TB);
        assert_eq!(
            group.iter().map(|d| d.slot_number).collect::<Vec<_>>(),
            vec![1, 2]
        );

        let (size, group) = largest_same_size_group(&[]);
        assert_eq!(size, 0);
        assert!(group.is_empty());
    }

    #[test]
    fn test_report_serialization() {
        let report = Report {
            adapters: vec![
                AdapterReport {
                    adapter_id: 0,
                    product_name: "PERC H710 Mini".into(),
                    outcome: Outcome::NotEnoughDrives {
                        have: 2,
                        required: 4,
                    },
                },
                AdapterReport {
                    adapter_id: 1,
                    product_name: "LSI MegaRAID SAS 9271-8i".into(),
                    outcome: Outcome::NoUnconfiguredDrives,
                },
            ],
        };

        let yaml = serde_yaml::to_value(&report).unwrap();
        let adapters = yaml["adapters"].as_sequence().unwrap();
        assert_eq!(adapters[0]["adapter-id"], 0);
        assert_eq!(adapters[0]["outcome"], "not-enough-drives");
        assert_eq!(adapters[0]["have"], 2);
        assert_eq!(adapters[1]["outcome"], "no-unconfigured-drives");
    }
}
