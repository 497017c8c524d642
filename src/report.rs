//! REPORT ZONES / REPORT ZONE DOMAINS / REPORT REALMS / REPORT MUTATIONS
//! wire serializers. Byte offsets follow the ZBC-2 / Zone Domains wire
//! layouts; see `SPEC_FULL.md`'s wire format reference for the recovered
//! field table.

use crate::codec::{cpbe16, cpbe32, cpbe64};
use crate::domain::{DomainValid, ZoneDomain};
use crate::features::{DeviceType, FeatureProfile};
use crate::realm::ZoneRealm;
use crate::zone::{Zone, ZoneCondition};

pub const ZONE_RECORD_LEN: usize = 64;
pub const DOMAIN_RECORD_LEN: usize = 96;
pub const REALM_HEADER_LEN: usize = 64;
pub const ACTIVATION_RESULT_HEADER_LEN: usize = 64;
pub const ACTIVATION_DESCRIPTOR_LEN: usize = 24;
pub const MUTATION_HEADER_LEN: usize = 32;
pub const MUTATION_RECORD_LEN: usize = 8;

/// REPORT ZONES reporting-options filter (CDB byte 14, low 6 bits). Mirrors
/// the ZBC-2 reporting-options table plus the Zone Domains additions
/// (Inactive, Gap).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneFilter {
    All,
    Condition(ZoneCondition),
    ResetRecommended,
    NonSeq,
    Gap,
    NotWp,
}

impl ZoneFilter {
    pub fn from_option(opt: u8) -> Self {
        match opt {
            0x01 => ZoneFilter::Condition(ZoneCondition::Empty),
            0x02 => ZoneFilter::Condition(ZoneCondition::ImplicitlyOpen),
            0x03 => ZoneFilter::Condition(ZoneCondition::ExplicitlyOpen),
            0x04 => ZoneFilter::Condition(ZoneCondition::Closed),
            0x05 => ZoneFilter::Condition(ZoneCondition::Full),
            0x06 => ZoneFilter::Condition(ZoneCondition::ReadOnly),
            0x07 => ZoneFilter::Condition(ZoneCondition::Offline),
            0x08 => ZoneFilter::Condition(ZoneCondition::Inactive),
            0x10 => ZoneFilter::ResetRecommended,
            0x11 => ZoneFilter::NonSeq,
            0x12 => ZoneFilter::Gap,
            0x3F => ZoneFilter::NotWp,
            _ => ZoneFilter::All,
        }
    }

    pub fn matches(self, zone: &Zone) -> bool {
        match self {
            ZoneFilter::All => true,
            ZoneFilter::Condition(c) => zone.condition == c,
            ZoneFilter::ResetRecommended => zone.reset_recommended,
            ZoneFilter::NonSeq => zone.non_seq,
            ZoneFilter::Gap => zone.zone_type == crate::zone::ZoneType::Gap,
            ZoneFilter::NotWp => zone.condition == ZoneCondition::NotWritePointer,
        }
    }
}

/// REPORT ZONES: one 64-byte header, then one 64-byte record per matching
/// zone starting at `start_index`, capped to what `alloc_len` bytes can
/// hold. Per §4.7/§8: the header's reported length is the *full* matching
/// length when `partial` is false (even if truncated by `alloc_len`), and
/// the actually-emitted length when `partial` is true.
pub fn report_zones(
    zones: &[Zone],
    start_index: usize,
    max_lba: u64,
    filter: ZoneFilter,
    partial: bool,
    alloc_len: usize,
) -> Vec<u8> {
    let matching: Vec<&Zone> = zones
        .iter()
        .skip(start_index)
        .filter(|z| filter.matches(z))
        .collect();
    let full_len = matching.len() * ZONE_RECORD_LEN;

    let max_records = alloc_len.saturating_sub(ZONE_RECORD_LEN) / ZONE_RECORD_LEN;
    let emitted = matching.len().min(max_records);
    let emitted_len = emitted * ZONE_RECORD_LEN;

    let mut out = vec![0u8; ZONE_RECORD_LEN + emitted_len];
    let reported_len = if partial { emitted_len } else { full_len };
    cpbe32(&mut out[0..4], reported_len as u32);
    cpbe64(&mut out[8..16], max_lba);

    for (i, zone) in matching.iter().take(emitted).enumerate() {
        let off = ZONE_RECORD_LEN + i * ZONE_RECORD_LEN;
        out[off] = zone.zone_type.as_wire() & 0x0F;
        out[off + 1] = (zone.condition.as_wire() << 4) & 0xF0
            | (zone.reset_recommended as u8)
            | ((zone.non_seq as u8) << 1);
        cpbe64(&mut out[off + 8..off + 16], zone.length_lba);
        cpbe64(&mut out[off + 16..off + 24], zone.start_lba);
        cpbe64(&mut out[off + 24..off + 32], zone.write_pointer);
    }
    out
}

/// REPORT ZONE DOMAINS: one 64-byte header, then one 96-byte record per
/// domain.
pub fn report_domains(domains: &[ZoneDomain]) -> Vec<u8> {
    let mut out = vec![0u8; REALM_HEADER_LEN + domains.len() * DOMAIN_RECORD_LEN];
    let ret_len = (domains.len() * DOMAIN_RECORD_LEN) as u32;
    cpbe32(&mut out[0..4], ret_len);
    cpbe32(&mut out[4..8], ret_len);
    out[8] = domains.len() as u8;
    out[9] = domains.len() as u8;

    for (i, d) in domains.iter().enumerate() {
        let off = REALM_HEADER_LEN + i * DOMAIN_RECORD_LEN;
        cpbe32(&mut out[off..off + 4], d.id);
        cpbe64(&mut out[off + 16..off + 24], d.zone_count);
        cpbe64(&mut out[off + 24..off + 32], d.start_lba);
        cpbe64(&mut out[off + 32..off + 40], d.end_lba_exclusive);
        out[off + 40] = d.zone_type.as_wire();
        out[off + 41] = if d.valid == DomainValid::Valid { 0x02 } else { 0x00 };
    }
    out
}

/// REPORT REALMS (new layout): 64-byte header, then per realm a
/// `16 + 32 * nr_domains` byte record.
pub fn report_realms(realms: &[ZoneRealm], nr_domains: usize) -> Vec<u8> {
    let desc_len = (16 + 32 * nr_domains) as u32;
    let mut out = vec![0u8; REALM_HEADER_LEN + realms.len() * desc_len as usize];
    cpbe32(&mut out[0..4], realms.len() as u32);
    cpbe32(&mut out[4..8], desc_len);

    for (i, realm) in realms.iter().enumerate() {
        let off = REALM_HEADER_LEN + i * desc_len as usize;
        cpbe32(&mut out[off..off + 4], realm.number);
        cpbe16(&mut out[off + 4..off + 6], realm.restrictions);
        out[off + 7] = realm.active_domain_id as u8;
        for (d, item) in realm.items.iter().enumerate() {
            let item_off = off + 16 + d * 32;
            if item.valid_target {
                cpbe64(&mut out[item_off..item_off + 8], item.start_lba);
                cpbe64(&mut out[item_off + 8..item_off + 16], item.end_lba_exclusive);
            }
        }
    }
    out
}

/// REPORT MUTATIONS: the static (device-type, model) catalog, not the
/// current device's state — this is why it takes the static catalog slice
/// rather than anything from the in-memory device handle.
pub fn report_mutations(catalog: &[FeatureProfile]) -> Vec<u8> {
    let mut out = vec![0u8; MUTATION_HEADER_LEN + catalog.len() * MUTATION_RECORD_LEN];
    cpbe32(&mut out[0..4], catalog.len() as u32);
    for (i, p) in catalog.iter().enumerate() {
        let off = MUTATION_HEADER_LEN + i * MUTATION_RECORD_LEN;
        out[off] = device_type_wire(p.device_type);
    }
    out
}

fn device_type_wire(dt: DeviceType) -> u8 {
    match dt {
        DeviceType::NonZoned => 0,
        DeviceType::HmZoned => 1,
        DeviceType::HaZoned => 2,
        DeviceType::ZoneDomains => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::zone::{ZoneCondition, ZoneType};

    #[test]
    fn report_zones_header_carries_length_and_max_lba() {
        let zones = vec![Zone::new_sequential(ZoneType::SequentialWriteRequired, 0, 16, 0)];
        let buf = report_zones(&zones, 0, 9999, ZoneFilter::All, false, 4096);
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), ZONE_RECORD_LEN as u32);
        assert_eq!(u64::from_be_bytes(buf[8..16].try_into().unwrap()), 9999);
    }

    #[test]
    fn report_zones_record_encodes_type_and_condition_nibbles() {
        let mut z = Zone::new_sequential(ZoneType::SequentialWriteRequired, 0, 16, 0);
        z.condition = ZoneCondition::Full;
        let buf = report_zones(&[z], 0, 0, ZoneFilter::All, false, 4096);
        let rec = &buf[ZONE_RECORD_LEN..];
        assert_eq!(rec[0] & 0x0F, ZoneType::SequentialWriteRequired.as_wire());
        assert_eq!(rec[1] >> 4, ZoneCondition::Full.as_wire());
    }

    #[test]
    fn report_zones_filters_by_condition() {
        let mut empty = Zone::new_sequential(ZoneType::SequentialWriteRequired, 0, 16, 0);
        empty.condition = ZoneCondition::Empty;
        let mut full = Zone::new_sequential(ZoneType::SequentialWriteRequired, 16, 16, 0);
        full.condition = ZoneCondition::Full;
        let zones = vec![empty, full];

        let buf = report_zones(&zones, 0, 0, ZoneFilter::Condition(ZoneCondition::Full), false, 4096);
        assert_eq!(buf.len(), ZONE_RECORD_LEN * 2);
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), ZONE_RECORD_LEN as u32);
    }

    #[test]
    fn report_zones_partial_reports_only_emitted_length() {
        let zones: Vec<Zone> = (0..4)
            .map(|i| Zone::new_sequential(ZoneType::SequentialWriteRequired, i * 16, 16, 0))
            .collect();
        // Room for the header plus exactly one record.
        let buf = report_zones(&zones, 0, 0, ZoneFilter::All, true, ZONE_RECORD_LEN * 2);
        assert_eq!(buf.len(), ZONE_RECORD_LEN * 2);
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), ZONE_RECORD_LEN as u32);
    }

    #[test]
    fn report_zones_non_partial_reports_full_length_even_when_truncated() {
        let zones: Vec<Zone> = (0..4)
            .map(|i| Zone::new_sequential(ZoneType::SequentialWriteRequired, i * 16, 16, 0))
            .collect();
        let buf = report_zones(&zones, 0, 0, ZoneFilter::All, false, ZONE_RECORD_LEN * 2);
        assert_eq!(buf.len(), ZONE_RECORD_LEN * 2);
        assert_eq!(u32::from_be_bytes(buf[0..4].try_into().unwrap()), (ZONE_RECORD_LEN * 4) as u32);
    }

    #[test]
    fn report_domains_record_len_matches_count() {
        let domains = vec![ZoneDomain {
            id: 0,
            zone_type: ZoneType::Conventional,
            zone_count: 4,
            start_lba: 0,
            end_lba_exclusive: 4096,
            valid: DomainValid::Valid,
        }];
        let buf = report_domains(&domains);
        assert_eq!(buf.len(), REALM_HEADER_LEN + DOMAIN_RECORD_LEN);
    }
}
