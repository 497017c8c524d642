//! On-disk layout of the zone array that follows the metadata header.
//! Kept separate from [`crate::meta`] (which only knows about the header)
//! so the header format and the zone-record format can evolve
//! independently, the way the original handler keeps `struct zbc_meta`
//! distinct from the `struct zbc_zone[]` that follows it.

use crate::codec::{cpbe32, cpbe64, rdbe32, rdbe64};
use crate::error::{ZbcError, ZbcResult};
use crate::zone::{Zone, ZoneCondition, ZoneType, NIL};

pub const ZONE_RECORD_LEN: usize = 64;

pub fn encode_zones(buf: &mut [u8], zones: &[Zone]) {
    for (i, z) in zones.iter().enumerate() {
        let off = i * ZONE_RECORD_LEN;
        let rec = &mut buf[off..off + ZONE_RECORD_LEN];
        rec[0] = z.zone_type.as_wire();
        rec[1] = z.condition.as_wire();
        rec[2] = z.non_seq as u8;
        rec[3] = z.reset_recommended as u8;
        cpbe64(&mut rec[8..16], z.start_lba);
        cpbe64(&mut rec[16..24], z.length_lba);
        cpbe64(&mut rec[24..32], z.write_pointer);
        cpbe32(&mut rec[32..36], z.domain_id);
        cpbe32(&mut rec[36..40], z.realm_item);
        cpbe32(&mut rec[40..44], z.list_next);
        cpbe32(&mut rec[44..48], z.list_prev);
        cpbe64(&mut rec[48..56], z.data_offset);
    }
}

pub fn decode_zones(buf: &[u8], count: usize) -> ZbcResult<Vec<Zone>> {
    if buf.len() < count * ZONE_RECORD_LEN {
        return Err(ZbcError::Internal("zone array truncated in metadata image".into()));
    }
    let mut out = Vec::with_capacity(count);
    for i in 0..count {
        let off = i * ZONE_RECORD_LEN;
        let rec = &buf[off..off + ZONE_RECORD_LEN];
        let zone_type = ZoneType::from_wire(rec[0])
            .ok_or_else(|| ZbcError::Internal(format!("bad zone type byte at zone {i}")))?;
        let condition = condition_from_wire(rec[1])
            .ok_or_else(|| ZbcError::Internal(format!("bad zone condition byte at zone {i}")))?;
        out.push(Zone {
            zone_type,
            condition,
            non_seq: rec[2] != 0,
            reset_recommended: rec[3] != 0,
            start_lba: rdbe64(&rec[8..16]),
            length_lba: rdbe64(&rec[16..24]),
            write_pointer: rdbe64(&rec[24..32]),
            domain_id: rdbe32(&rec[32..36]),
            realm_item: rdbe32(&rec[36..40]),
            list_next: rdbe32(&rec[40..44]).then_nil(),
            list_prev: rdbe32(&rec[44..48]).then_nil(),
            data_offset: rdbe64(&rec[48..56]),
        });
    }
    Ok(out)
}

fn condition_from_wire(v: u8) -> Option<ZoneCondition> {
    match v {
        0x0 => Some(ZoneCondition::NotWritePointer),
        0x1 => Some(ZoneCondition::Empty),
        0x2 => Some(ZoneCondition::ImplicitlyOpen),
        0x3 => Some(ZoneCondition::ExplicitlyOpen),
        0x4 => Some(ZoneCondition::Closed),
        0x5 => Some(ZoneCondition::Inactive),
        0xD => Some(ZoneCondition::ReadOnly),
        0xE => Some(ZoneCondition::Full),
        0xF => Some(ZoneCondition::Offline),
        _ => None,
    }
}

trait NilSentinel {
    fn then_nil(self) -> u32;
}

impl NilSentinel for u32 {
    fn then_nil(self) -> u32 {
        if self == u32::MAX {
            NIL
        } else {
            self
        }
    }
}
