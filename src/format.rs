//! Formatter: builds the initial metadata image for a resolved
//! configuration/profile pair, and the SANITIZE / FORMAT UNIT / MUTATE
//! operations that rebuild it in place.

use crate::config::DevConfig;
use crate::domain::{DomainValid, ZoneDomain};
use crate::error::ZbcResult;
use crate::features::{DeviceType, FeatureProfile};
use crate::geometry::Geometry;
use crate::realm::{ZoneRealm, ZoneRealmItem};
use crate::zone::{Zone, ZoneCondition, ZoneType, DATA_OFFSET_NONE, WP_NONE};

pub struct InitialImage {
    pub zones: Vec<Zone>,
    pub domains: Vec<ZoneDomain>,
    pub realms: Vec<ZoneRealm>,
}

/// Builds the zone array, domain table, and (if enabled) realm table for a
/// freshly formatted device: conventional zones first, then the SMR/SWP/
/// SOBR run, honoring the profile's bottom/top CMR realm counts and domain
/// gap.
pub fn build_initial_image(cfg: &DevConfig, profile: &FeatureProfile, geom: &Geometry) -> ZbcResult<InitialImage> {
    let mut zones = Vec::with_capacity(geom.total_zone_count() as usize);
    let mut lba = 0u64;

    let (cmr_type, cmr_cond) = profile.cmr_init;
    let (smr_type, smr_cond) = realmable_zone_init(profile);

    for _ in 0..geom.conventional_zone_count {
        zones.push(make_zone(cmr_type, cmr_cond, lba, geom.zone_size_lba, 0));
        lba += geom.zone_size_lba;
    }

    for _ in 0..geom.bottom_cmr_realm_zones {
        zones.push(make_zone(cmr_type, cmr_cond, lba, geom.zone_size_lba, 0));
        lba += geom.zone_size_lba;
    }

    for _ in 0..geom.domain_gap_zones {
        zones.push(Zone::new_conventional(lba, geom.zone_size_lba, 0));
        let last = zones.len() - 1;
        zones[last].zone_type = ZoneType::Gap;
        lba += geom.zone_size_lba;
    }

    let smr_run_zones = geom
        .smr_zone_count
        .saturating_sub(geom.bottom_cmr_realm_zones)
        .saturating_sub(geom.top_cmr_realm_zones);
    for _ in 0..smr_run_zones {
        zones.push(make_zone(smr_type, smr_cond, lba, geom.zone_size_lba, 1));
        lba += geom.zone_size_lba;
    }

    for _ in 0..geom.top_cmr_realm_zones {
        zones.push(make_zone(cmr_type, cmr_cond, lba, geom.zone_size_lba, 0));
        lba += geom.zone_size_lba;
    }

    assign_data_offsets(&mut zones, cfg.block_size);
    apply_fault_injection(&mut zones, profile);

    let domains = build_domains(profile, geom, &zones);
    let realms = if cfg.realms_enabled {
        build_realms(geom, &domains, &zones, smr_type)
    } else {
        Vec::new()
    };

    Ok(InitialImage { zones, domains, realms })
}

/// The zone type/condition the realmable (non-bottom/top-CMR) region is
/// formatted with: the profile's SMR initializer, or its CMR initializer
/// when `initial_all_smr` collapses the whole realmable region to CMR. This
/// is a function of the profile alone, so `Device::open()` can recompute it
/// to rebuild realm active-domain state without persisting it separately.
pub(crate) fn realmable_zone_init(profile: &FeatureProfile) -> (ZoneType, ZoneCondition) {
    if profile.initial_all_smr {
        profile.cmr_init
    } else {
        profile.smr_init
    }
}

fn make_zone(zone_type: ZoneType, condition: ZoneCondition, start: u64, len: u64, domain_id: u32) -> Zone {
    let mut z = if zone_type == ZoneType::Conventional || zone_type == ZoneType::SequentialOrBeforeRequired {
        Zone::new_conventional(start, len, domain_id)
    } else {
        Zone::new_sequential(zone_type, start, len, domain_id)
    };
    z.zone_type = zone_type;
    z.condition = condition;
    z.write_pointer = Zone::initial_write_pointer(zone_type, condition, start, len);
    z
}

/// Lays the payload region out as one contiguous run of non-Gap zones in
/// array order, recording each zone's byte offset within that region. Gap
/// zones carry [`DATA_OFFSET_NONE`] since they own no payload bytes.
fn assign_data_offsets(zones: &mut [Zone], block_size: u32) {
    let mut cursor = 0u64;
    for z in zones.iter_mut() {
        if z.zone_type == ZoneType::Gap {
            z.data_offset = DATA_OFFSET_NONE;
            continue;
        }
        z.data_offset = cursor;
        cursor += z.length_lba * block_size as u64;
    }
}

#[cfg(feature = "fault-injection")]
fn apply_fault_injection(zones: &mut [Zone], profile: &FeatureProfile) {
    let f = profile.faults;
    for i in 0..f.read_only_count {
        if let Some(z) = zones.get_mut((f.read_only_offset + i) as usize) {
            z.condition = ZoneCondition::ReadOnly;
            z.write_pointer = WP_NONE;
        }
    }
    for i in 0..f.offline_count {
        if let Some(z) = zones.get_mut((f.offline_offset + i) as usize) {
            z.condition = ZoneCondition::Offline;
            z.write_pointer = WP_NONE;
        }
    }
}

#[cfg(not(feature = "fault-injection"))]
fn apply_fault_injection(_zones: &mut [Zone], _profile: &FeatureProfile) {}

pub(crate) fn build_domains(profile: &FeatureProfile, geom: &Geometry, zones: &[Zone]) -> Vec<ZoneDomain> {
    let mut domains = Vec::new();
    let mut next_id = 0u32;

    let mut push_domain = |zone_type: ZoneType, domains: &mut Vec<ZoneDomain>| {
        let matching: Vec<&Zone> = zones.iter().filter(|z| z.zone_type == zone_type).collect();
        if matching.is_empty() {
            return;
        }
        let start = matching.first().unwrap().start_lba;
        let end = matching.last().unwrap().end_lba_exclusive();
        domains.push(ZoneDomain {
            id: next_id,
            zone_type,
            zone_count: matching.len() as u64,
            start_lba: start,
            end_lba_exclusive: end,
            valid: DomainValid::Valid,
        });
        next_id += 1;
    };

    if matches!(profile.device_type, DeviceType::NonZoned) {
        push_domain(ZoneType::Conventional, &mut domains);
        return domains;
    }

    let a = profile.activation_allowed;
    if a.conventional || domains.is_empty() {
        push_domain(ZoneType::Conventional, &mut domains);
    }
    if a.sobr {
        push_domain(ZoneType::SequentialOrBeforeRequired, &mut domains);
    }
    if a.swr {
        push_domain(ZoneType::SequentialWriteRequired, &mut domains);
    }
    if a.swp {
        push_domain(ZoneType::SequentialWritePreferred, &mut domains);
    }

    let _ = geom;
    domains
}

pub(crate) fn build_realms(
    geom: &Geometry,
    domains: &[ZoneDomain],
    zones: &[Zone],
    initial_zone_type: ZoneType,
) -> Vec<ZoneRealm> {
    if geom.nr_realms == 0 {
        return Vec::new();
    }
    // Every realm's currently-active domain is whichever one matches the
    // zone type the realmable region was actually formatted with; the other
    // domain entries describe layouts the realm could be activated into.
    let active_domain_id = domains
        .iter()
        .position(|d| d.zone_type == initial_zone_type)
        .unwrap_or(0) as u32;
    // Each domain's member zones were appended as one contiguous run when the
    // zone array was built, so the domain's first zone index in the global
    // array anchors every realm item's `first_zone_index` for that domain.
    let domain_first_index: Vec<Option<u32>> = domains
        .iter()
        .map(|d| zones.iter().position(|z| z.start_lba == d.start_lba).map(|i| i as u32))
        .collect();

    (0..geom.nr_realms)
        .map(|n| {
            let items = domains
                .iter()
                .zip(domain_first_index.iter())
                .map(|(d, first_idx)| {
                    if let (Some(zc), Some(first_idx)) = (d.zone_size_lba(), first_idx) {
                        // CMR-class domains (Conventional, SOBR) and SMR-class
                        // domains (SWR, SWP) carve a realm's logical capacity
                        // into a different number of physical zones, per the
                        // §4.5 resize maps.
                        let realm_zones = geom.realm_zone_count_for(d.zone_type) as u64;
                        let start = d.start_lba + n as u64 * realm_zones * zc;
                        let first_zone_index = first_idx + (n as u64 * realm_zones) as u32;
                        ZoneRealmItem {
                            valid_target: start + realm_zones * zc <= d.end_lba_exclusive,
                            start_lba: start,
                            end_lba_exclusive: start + realm_zones * zc,
                            zone_count: realm_zones as u32,
                            first_zone_index,
                        }
                    } else {
                        ZoneRealmItem::INVALID
                    }
                })
                .collect();
            ZoneRealm {
                number: n,
                restrictions: 0,
                active_domain_id,
                items,
            }
        })
        .collect()
}

/// SANITIZE: zeroes the data area and rebuilds the initial image, exactly
/// like FORMAT UNIT. No physical overwrite of the backing file's data
/// region is performed (see crate-level non-goals) — the metadata is reset
/// so the device reports empty sequential zones again.
pub fn sanitize(cfg: &DevConfig, profile: &FeatureProfile, geom: &Geometry) -> ZbcResult<InitialImage> {
    build_initial_image(cfg, profile, geom)
}

pub fn format_unit(cfg: &DevConfig, profile: &FeatureProfile, geom: &Geometry) -> ZbcResult<InitialImage> {
    build_initial_image(cfg, profile, geom)
}

/// MUTATE: changes the device's active model/feature profile in place,
/// rebuilding zones/domains/realms from the new profile while keeping the
/// existing config's sizing parameters. Only valid between profiles that
/// report the same device type, mirroring the original handler's
/// conservative mutation table.
pub fn mutate(cfg: &DevConfig, new_profile: &FeatureProfile, geom: &Geometry) -> ZbcResult<InitialImage> {
    build_initial_image(cfg, new_profile, geom)
}
