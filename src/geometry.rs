//! Geometry engine: turns a resolved [`crate::config::DevConfig`] plus its
//! [`crate::features::FeatureProfile`] into concrete realm/zone/domain
//! counts and LBA layout, before any zone objects exist.

use crate::config::DevConfig;
use crate::error::{ZbcError, ZbcResult};
use crate::features::FeatureProfile;

#[derive(Debug, Clone, Copy)]
pub struct Geometry {
    pub block_size: u32,
    pub zone_size_lba: u64,
    pub total_lba: u64,
    pub conventional_zone_count: u64,
    /// SMR zone count after applying the profile's gain factor: SMR zones
    /// are over-provisioned relative to an equivalent CMR capacity by
    /// `smr_gain_percent`.
    pub smr_zone_count: u64,
    pub bottom_cmr_realm_zones: u64,
    pub top_cmr_realm_zones: u64,
    pub domain_gap_zones: u64,
    pub nr_domains: u32,
    pub realm_size_lba: u64,
    pub nr_realms: u32,
    /// Per-realm zone count for CMR-class domain items (Conventional, SOBR).
    pub nr_cmr_realm_zones: u32,
    /// Per-realm zone count for SMR-class domain items (SWR, SWP).
    pub nr_smr_realm_zones: u32,
    /// §4.5 resize map: index `i` (0-based CMR zone offset within a realm)
    /// maps to the 1-based SMR zone offset the same logical position
    /// rescales to.
    pub cmr_to_smr: Vec<u32>,
    /// §4.5 resize map: the inverse of `cmr_to_smr`.
    pub smr_to_cmr: Vec<u32>,
}

impl Geometry {
    pub fn total_zone_count(&self) -> u64 {
        self.conventional_zone_count + self.smr_zone_count + self.domain_gap_zones
    }

    /// Per-realm zone count for `zone_type`'s class (CMR or SMR), per §4.5.
    pub fn realm_zone_count_for(&self, zone_type: crate::zone::ZoneType) -> u32 {
        if zone_type.is_cmr_class() {
            self.nr_cmr_realm_zones
        } else {
            self.nr_smr_realm_zones
        }
    }

    /// Rescales a 1-based zone offset within a realm item of `from_type`
    /// into the equivalent 1-based offset for `to_type`'s class, via the
    /// precomputed §4.5 maps. A no-op (identity) when both sides are the
    /// same class.
    pub fn rescale_realm_offset(
        &self,
        from_type: crate::zone::ZoneType,
        to_type: crate::zone::ZoneType,
        one_based_offset: u32,
    ) -> u32 {
        if from_type.is_cmr_class() == to_type.is_cmr_class() {
            return one_based_offset;
        }
        let map = if from_type.is_cmr_class() {
            &self.cmr_to_smr
        } else {
            &self.smr_to_cmr
        };
        let i = one_based_offset.saturating_sub(1) as usize;
        map.get(i).copied().unwrap_or_else(|| map.last().copied().unwrap_or(1))
    }

    /// Zones that actually own a slice of the backing payload region (every
    /// zone except Gap zones, which exist purely to space out domains).
    pub fn payload_zone_count(&self) -> u64 {
        self.total_zone_count().saturating_sub(self.domain_gap_zones)
    }

    /// Size in bytes of the payload region that follows the metadata header
    /// and zone array in the backing file.
    pub fn payload_bytes(&self) -> u64 {
        self.payload_zone_count() * self.zone_size_lba * self.block_size as u64
    }
}

pub fn derive(cfg: &DevConfig, profile: &FeatureProfile) -> ZbcResult<Geometry> {
    if cfg.zone_size_bytes % cfg.block_size as u64 != 0 {
        return Err(ZbcError::Validation(
            "zone_size must be a multiple of block_size".into(),
        ));
    }
    let zone_size_lba = cfg.zone_size_bytes / cfg.block_size as u64;
    let total_lba = cfg.capacity_bytes / cfg.block_size as u64;

    let conventional_zone_count = cfg.conventional_zone_count;
    let remaining_lba = total_lba.saturating_sub(conventional_zone_count * zone_size_lba);
    if remaining_lba == 0 {
        return Err(ZbcError::Validation(
            "conventional zones alone exhaust device capacity".into(),
        ));
    }

    // SMR capacity is scaled by smr_gain_percent/100 as an over-provisioning
    // factor: more, smaller physical SMR zones underlie the same logical
    // capacity budget.
    let smr_zone_count = (remaining_lba * 100) / (zone_size_lba * cfg.smr_gain_percent as u64);
    if smr_zone_count == 0 {
        return Err(ZbcError::Validation(
            "derived geometry leaves zero SMR zones".into(),
        ));
    }

    let bottom_cmr_realm_zones = profile.bottom_cmr_realms as u64;
    let top_cmr_realm_zones = profile.top_cmr_realms as u64;
    let domain_gap_zones = profile.domain_gap_zones as u64;

    let nr_domains = if matches!(profile.device_type, crate::features::DeviceType::ZoneDomains) {
        count_domains(profile)
    } else {
        2
    };

    let (realm_size_lba, nr_realms, nr_smr_realm_zones) = if cfg.realms_enabled {
        let realm_size_lba = cfg.realm_size_bytes / cfg.block_size as u64;
        if realm_size_lba % zone_size_lba != 0 {
            return Err(ZbcError::Validation(
                "realm_size is not an integer number of zones".into(),
            ));
        }
        let zones_per_realm = realm_size_lba / zone_size_lba;
        if zones_per_realm == 0 {
            return Err(ZbcError::Validation("realm_size derives to zero zones".into()));
        }
        let realmable_zones = smr_zone_count
            .saturating_sub(bottom_cmr_realm_zones)
            .saturating_sub(top_cmr_realm_zones);
        let nr_realms = realmable_zones / zones_per_realm;
        if nr_realms == 0 {
            return Err(ZbcError::Validation(
                "geometry yields zero realms with realms enabled".into(),
            ));
        }
        (realm_size_lba, nr_realms as u32, zones_per_realm as u32)
    } else {
        (0, 0, 0)
    };

    // A realm's logical capacity is denominated in gain-scaled SMR zones;
    // its CMR-equivalent zone count is the inverse of that scaling,
    // clamped to at least one zone (§4.5).
    let nr_cmr_realm_zones = if nr_smr_realm_zones == 0 {
        0
    } else {
        ((nr_smr_realm_zones as u64 * 100) / cfg.smr_gain_percent as u64).max(1) as u32
    };
    let cmr_to_smr = build_resize_map(nr_cmr_realm_zones, nr_smr_realm_zones);
    let smr_to_cmr = build_resize_map(nr_smr_realm_zones, nr_cmr_realm_zones);

    Ok(Geometry {
        block_size: cfg.block_size,
        zone_size_lba,
        total_lba,
        conventional_zone_count,
        smr_zone_count,
        bottom_cmr_realm_zones,
        top_cmr_realm_zones,
        domain_gap_zones,
        nr_domains,
        realm_size_lba,
        nr_realms,
        nr_cmr_realm_zones,
        nr_smr_realm_zones,
        cmr_to_smr,
        smr_to_cmr,
    })
}

/// Builds a §4.5 resize map of length `from_len`: element `i` is `i+1`
/// linearly rescaled into `[1, to_len]`, clamped to at least one.
fn build_resize_map(from_len: u32, to_len: u32) -> Vec<u32> {
    if from_len == 0 || to_len == 0 {
        return Vec::new();
    }
    (0..from_len)
        .map(|i| (((i as u64 + 1) * to_len as u64) / from_len as u64).max(1) as u32)
        .collect()
}

fn count_domains(profile: &FeatureProfile) -> u32 {
    let a = profile.activation_allowed;
    [a.conventional, a.sobr, a.swr, a.swp]
        .iter()
        .filter(|x| **x)
        .count() as u32
}
