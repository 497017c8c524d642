//! Read/write path: LBA-to-offset translation and zone precondition
//! checks shared by READ(10/12/16), WRITE(10/12/16), and SYNCHRONIZE CACHE.

use crate::error::{Asc, Sense, SenseKey, ZbcError, ZbcResult};
use crate::state::{self, OpenZoneBudget};
use crate::zone::{Zone, ZoneCondition, ZoneType};

/// Finds the zone containing `lba`, or `None` if `lba` is past the device.
/// Zones are stored in ascending LBA order, so this is a binary search over
/// `start_lba`, not a linear scan.
pub fn zone_containing(zones: &[Zone], lba: u64) -> Option<usize> {
    zones
        .binary_search_by(|z| {
            if lba < z.start_lba {
                std::cmp::Ordering::Greater
            } else if lba >= z.end_lba_exclusive() {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Equal
            }
        })
        .ok()
}

/// One zone-sized slice of a read/write command that spans `[lba, lba+len)`.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub idx: usize,
    pub lba: u64,
    pub len: u64,
}

/// Walks every zone touched by `[lba, lba+len)`, per §4.9/the original
/// `zbc_rdwr_check_zones`: same-type zones may be spanned in one command,
/// but a command may never cross a zone-*type* boundary, and a sequential
/// write-required zone may never be spanned past its own end even when the
/// following zone shares its type.
pub fn resolve_zone_span(zones: &[Zone], lba: u64, len: u64, is_write: bool) -> ZbcResult<Vec<Segment>> {
    let mut out = Vec::new();
    let mut cur = lba;
    let mut remaining = len;
    let mut first_type: Option<ZoneType> = None;

    while remaining > 0 {
        let idx = zone_containing(zones, cur)
            .ok_or_else(|| ZbcError::ZoneProtocol(format!("lba {cur} is out of range")))?;
        let zone = &zones[idx];

        match first_type {
            None => first_type = Some(zone.zone_type),
            Some(t) if t != zone.zone_type => return Err(boundary_violation(is_write)),
            _ => {}
        }

        let avail = zone.end_lba_exclusive() - cur;
        let take = avail.min(remaining);
        if zone.zone_type == ZoneType::SequentialWriteRequired && take < remaining {
            return Err(boundary_violation(is_write));
        }

        out.push(Segment { idx, lba: cur, len: take });
        cur += take;
        remaining -= take;
    }
    Ok(out)
}

fn boundary_violation(is_write: bool) -> ZbcError {
    if is_write {
        sense_err(
            SenseKey::IllegalRequest,
            Asc::WRITE_BOUNDARY_VIOLATION,
            "command spans a zone-type boundary, or overruns a sequential-write-required zone",
        )
    } else {
        sense_err(
            SenseKey::IllegalRequest,
            Asc::READ_BOUNDARY_VIOLATION,
            "command spans a zone-type boundary, or overruns a sequential-write-required zone",
        )
    }
}

/// `wp_check` gates whether reads past the write pointer on a sequential or
/// SOBR zone are rejected outright (URSWRZ=0 behavior) or allowed through to
/// the caller, which zero-fills everything above the pointer instead —
/// mirrors `ok_to_write`'s own `wp_check` gate. The Inactive check is itself
/// gated on `wp_check` and excluded for Conventional/SWP zones, matching
/// `zbc_zone_ok_to_read`: those types are always host-readable even while
/// formally "inactive" in a domain sense.
pub fn ok_to_read(zone: &Zone, lba: u64, len: u64, wp_check: bool) -> ZbcResult<()> {
    if zone.zone_type == ZoneType::Gap && wp_check {
        return Err(sense_err(
            SenseKey::IllegalRequest,
            Asc::ATTEMPT_TO_ACCESS_GAP_ZONE,
            "read targets a gap zone",
        ));
    }
    if zone.condition == ZoneCondition::Offline {
        return Err(sense_err(
            SenseKey::DataProtect,
            Asc::ZONE_IS_OFFLINE,
            "zone is offline",
        ));
    }
    if zone.condition == ZoneCondition::Inactive
        && wp_check
        && zone.zone_type != ZoneType::Conventional
        && zone.zone_type != ZoneType::SequentialWritePreferred
    {
        return Err(sense_err(
            SenseKey::DataProtect,
            Asc::ZONE_IS_INACTIVE,
            "zone is inactive",
        ));
    }
    if !wp_check {
        return Ok(());
    }
    if zone.zone_type.is_seq_or_sobr() && lba + len > zone.write_pointer {
        return Err(sense_err(
            SenseKey::IllegalRequest,
            Asc::ATTEMPT_TO_READ_INVALID_DATA,
            "read beyond write pointer",
        ));
    }
    Ok(())
}

/// Per `zbc_zone_ok_to_write`: the Gap and Inactive checks apply
/// unconditionally (not gated on `wp_check`, unlike the read path). A write
/// to an already-Full sequential-write-required zone is its own distinct
/// `INVALID_FIELD_IN_CDB` case, separate from the general boundary/type
/// violations `resolve_zone_span` raises.
pub fn ok_to_write(zone: &Zone, lba: u64, len: u64, wp_check: bool) -> ZbcResult<()> {
    let _ = len;
    if zone.zone_type == ZoneType::Gap {
        return Err(sense_err(
            SenseKey::IllegalRequest,
            Asc::ATTEMPT_TO_ACCESS_GAP_ZONE,
            "write targets a gap zone",
        ));
    }
    if zone.condition == ZoneCondition::Offline {
        return Err(sense_err(
            SenseKey::DataProtect,
            Asc::ZONE_IS_OFFLINE,
            "zone is offline",
        ));
    }
    if zone.condition == ZoneCondition::Inactive {
        return Err(sense_err(
            SenseKey::DataProtect,
            Asc::ZONE_IS_INACTIVE,
            "zone is inactive",
        ));
    }
    if zone.condition == ZoneCondition::ReadOnly {
        return Err(sense_err(
            SenseKey::DataProtect,
            Asc::ZONE_IS_READ_ONLY,
            "zone is read-only",
        ));
    }
    if zone.condition == ZoneCondition::Full && zone.zone_type == ZoneType::SequentialWriteRequired {
        return Err(sense_err(
            SenseKey::IllegalRequest,
            Asc::INVALID_FIELD_IN_CDB,
            "write to a full sequential-write-required zone",
        ));
    }
    if !wp_check {
        return Ok(());
    }
    match zone.zone_type {
        ZoneType::SequentialWriteRequired => {
            if lba != zone.write_pointer {
                return Err(sense_err(
                    SenseKey::IllegalRequest,
                    Asc::UNALIGNED_WRITE_COMMAND,
                    "write not at write pointer",
                ));
            }
        }
        ZoneType::SequentialOrBeforeRequired => {
            if zone.condition != ZoneCondition::Full && lba > zone.write_pointer {
                return Err(sense_err(
                    SenseKey::IllegalRequest,
                    Asc::UNALIGNED_WRITE_COMMAND,
                    "write past the write pointer",
                ));
            }
        }
        _ => {}
    }
    Ok(())
}

fn sense_err(key: SenseKey, asc: Asc, msg: &str) -> ZbcError {
    ZbcError::ZoneProtocolSense {
        message: msg.to_string(),
        sense: Sense::new(key, asc),
    }
}

/// Performs the precondition checks and write-pointer bookkeeping for one
/// WRITE command, walking every zone the span touches; the caller is
/// responsible for the actual byte copy into the backing store once this
/// returns `Ok`.
pub fn perform_write(
    zones: &mut [Zone],
    budget: &mut OpenZoneBudget,
    lba: u64,
    len: u64,
    wp_check: bool,
) -> ZbcResult<Vec<Segment>> {
    let segments = match resolve_zone_span(zones, lba, len, true) {
        Ok(s) => s,
        Err(e) => {
            budget.write_rule_violations += 1;
            return Err(e);
        }
    };
    for seg in &segments {
        if let Err(e) = ok_to_write(&zones[seg.idx], seg.lba, seg.len, wp_check) {
            budget.write_rule_violations += 1;
            return Err(e);
        }
    }
    for seg in &segments {
        state::adjust_write_pointer(zones, budget, seg.idx as u32, seg.lba, seg.len, wp_check)?;
    }
    Ok(segments)
}

pub fn perform_read(
    zones: &[Zone],
    budget: &mut OpenZoneBudget,
    lba: u64,
    len: u64,
    wp_check: bool,
) -> ZbcResult<Vec<Segment>> {
    let segments = match resolve_zone_span(zones, lba, len, false) {
        Ok(s) => s,
        Err(e) => {
            budget.read_rule_violations += 1;
            return Err(e);
        }
    };
    for seg in &segments {
        if let Err(e) = ok_to_read(&zones[seg.idx], seg.lba, seg.len, wp_check) {
            budget.read_rule_violations += 1;
            return Err(e);
        }
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::{Zone, ZoneType};

    fn sample_zones() -> Vec<Zone> {
        vec![
            Zone::new_conventional(0, 16, 0),
            Zone::new_sequential(ZoneType::SequentialWriteRequired, 16, 16, 1),
        ]
    }

    #[test]
    fn zone_containing_finds_the_right_zone() {
        let zones = sample_zones();
        assert_eq!(zone_containing(&zones, 0), Some(0));
        assert_eq!(zone_containing(&zones, 15), Some(0));
        assert_eq!(zone_containing(&zones, 16), Some(1));
        assert_eq!(zone_containing(&zones, 31), Some(1));
        assert_eq!(zone_containing(&zones, 32), None);
    }

    #[test]
    fn write_past_zone_boundary_rejected() {
        let zones = sample_zones();
        assert!(resolve_zone_span(&zones, 16, 32, true).is_err());
    }

    #[test]
    fn same_type_multi_zone_span_is_allowed() {
        let zones = vec![
            Zone::new_conventional(0, 16, 0),
            Zone::new_conventional(16, 16, 0),
        ];
        let segs = resolve_zone_span(&zones, 8, 16, true).unwrap();
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].idx, 0);
        assert_eq!(segs[1].idx, 1);
    }

    #[test]
    fn crossing_a_type_boundary_is_rejected_even_within_device_bounds() {
        let zones = sample_zones();
        assert!(resolve_zone_span(&zones, 8, 16, true).is_err());
    }

    #[test]
    fn gap_zone_rejects_reads_and_writes() {
        let mut gap = Zone::new_conventional(0, 16, 0);
        gap.zone_type = ZoneType::Gap;
        assert!(ok_to_read(&gap, 0, 4, true).is_err());
        assert!(ok_to_write(&gap, 0, 4, true).is_err());
    }

    #[test]
    fn read_beyond_write_pointer_rejected_on_sequential_zone() {
        let zones = sample_zones();
        assert!(ok_to_read(&zones[1], 16, 4, true).is_err());
    }

    #[test]
    fn read_beyond_write_pointer_allowed_when_wp_check_disabled() {
        let zones = sample_zones();
        assert!(ok_to_read(&zones[1], 16, 4, false).is_ok());
    }

    #[test]
    fn inactive_conventional_zone_is_still_readable() {
        let mut zone = Zone::new_conventional(0, 16, 0);
        zone.condition = ZoneCondition::Inactive;
        assert!(ok_to_read(&zone, 0, 4, true).is_ok());
    }

    #[test]
    fn full_swr_write_is_invalid_field_not_boundary_violation() {
        let mut zone = Zone::new_sequential(ZoneType::SequentialWriteRequired, 0, 16, 0);
        zone.condition = ZoneCondition::Full;
        zone.write_pointer = 16;
        let err = ok_to_write(&zone, 0, 4, true).unwrap_err();
        assert_eq!(err.sense(), Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB));
    }

    #[test]
    fn sobr_allows_rewriting_below_the_write_pointer_but_not_past_it() {
        let mut zone = Zone::new_sequential(ZoneType::SequentialOrBeforeRequired, 0, 16, 0);
        zone.write_pointer = 8;
        assert!(ok_to_write(&zone, 0, 4, true).is_ok());
        assert!(ok_to_write(&zone, 12, 4, true).is_err());
    }

    #[test]
    fn perform_write_advances_pointer_and_succeeds_on_sequential_zone() {
        let mut zones = sample_zones();
        let mut budget = OpenZoneBudget::new(0);
        perform_write(&mut zones, &mut budget, 16, 4, true).unwrap();
        assert_eq!(zones[1].write_pointer, 20);
    }

    #[test]
    fn conventional_write_never_checks_write_pointer_alignment() {
        let mut zones = sample_zones();
        let mut budget = OpenZoneBudget::new(0);
        perform_write(&mut zones, &mut budget, 8, 4, true).unwrap();
    }

    #[test]
    fn failed_write_increments_the_write_rule_violation_counter() {
        let zones = sample_zones();
        let mut budget = OpenZoneBudget::new(0);
        let mut zones = zones;
        assert!(perform_write(&mut zones, &mut budget, 16, 4, true).is_ok());
        // a write that lands past the write pointer is rejected and counted.
        assert!(perform_write(&mut zones, &mut budget, 16, 4, true).is_err());
        assert_eq!(budget.write_rule_violations, 1);
    }

    #[test]
    fn sense_err_preserves_the_specific_key_and_asc() {
        let zones = sample_zones();
        let mut offline = zones[1].clone();
        offline.condition = ZoneCondition::Offline;
        let err = ok_to_read(&offline, 16, 4, true).unwrap_err();
        assert_eq!(err.sense(), Sense::new(SenseKey::DataProtect, Asc::ZONE_IS_OFFLINE));

        let err = ok_to_read(&zones[1], 16, 4, true).unwrap_err();
        assert_eq!(
            err.sense(),
            Sense::new(SenseKey::IllegalRequest, Asc::ATTEMPT_TO_READ_INVALID_DATA)
        );
    }
}
