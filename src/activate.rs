//! ZONE ACTIVATE / ZONE QUERY engine.
//!
//! `evaluate` is a pure function shared by both commands: ZONE QUERY calls
//! it and discards any mutation, ZONE ACTIVATE calls it and then applies the
//! returned zone rewrites. This keeps the precondition logic in one place
//! and makes the dry-run guarantee structural rather than a second
//! hand-maintained code path.

use crate::domain::ZoneDomain;
use crate::error::{ZbcError, ZbcResult};
use crate::realm::ZoneRealm;
use crate::zone::{Zone, ZoneCondition, ZoneType};

/// Unmet-precondition bits, written into the activation results header.
/// A plain bitmask rather than a `bitflags` type: the field is a one-shot
/// write into a wire buffer, never combined or matched on by callers beyond
/// equality checks, so the derive machinery would add nothing.
pub mod error_bits {
    pub const NOT_INACTIVE: u8 = 0x01;
    pub const NOT_EMPTY: u8 = 0x02;
    pub const REALM_ALIGN: u8 = 0x04;
    pub const MULTI_TYPES: u8 = 0x08;
    pub const UNSUPP: u8 = 0x10;
    pub const MULTI_DOMAINS: u8 = 0x20;
}
use error_bits::*;

#[derive(Debug, Clone)]
pub struct ActivateRequest {
    pub all: bool,
    pub nozsrc: bool,
    pub target_domain_id: u32,
    pub realm_numbers: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct RealmRewrite {
    pub realm_index: usize,
    pub new_zone_type: ZoneType,
    pub zone_indices: Vec<u32>,
    /// Zones of the realm's previously-active domain; these deactivate to
    /// `Inactive` when the rewrite is applied (spec: activation changes
    /// "every affected zone's condition (Inactive on the deactivate side,
    /// Empty / NotWP on the activate side)").
    pub old_zone_indices: Vec<u32>,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub activated: bool,
    pub error_bits: u8,
    pub nzp: Option<u32>,
    pub ziwup: Option<u64>,
    pub rewrites: Vec<RealmRewrite>,
}

impl Outcome {
    pub fn rejected(bits: u8) -> Self {
        Self {
            activated: false,
            error_bits: bits,
            nzp: None,
            ziwup: None,
            rewrites: Vec::new(),
        }
    }

    pub fn rejected_at(bits: u8, ziwup: u64) -> Self {
        Self {
            activated: false,
            error_bits: bits,
            nzp: None,
            ziwup: Some(ziwup),
            rewrites: Vec::new(),
        }
    }
}

/// Locates the realm containing `lba` by finding the physical zone first,
/// then binary-searching the realms for the one whose item in that zone's
/// domain covers `lba` — items are laid out at evenly spaced, ascending
/// offsets within a domain by realm number (§4.8 step 2). Returns the
/// realm's index and whether `lba` lands exactly on that item's start (a
/// realm-aligned request).
pub fn locate_realm_containing(
    realms: &[ZoneRealm],
    domains: &[ZoneDomain],
    zones: &[Zone],
    lba: u64,
) -> Option<(usize, bool)> {
    let zone_idx = crate::rdwr::zone_containing(zones, lba)?;
    let zone = zones[zone_idx];
    let domain_id = domains.iter().find(|d| d.zone_type == zone.zone_type)?.id as usize;

    let idx = realms
        .binary_search_by(|r| {
            let item = match r.items.get(domain_id) {
                Some(i) => i,
                None => return std::cmp::Ordering::Less,
            };
            if lba < item.start_lba {
                std::cmp::Ordering::Greater
            } else if lba >= item.end_lba_exclusive {
                std::cmp::Ordering::Less
            } else {
                std::cmp::Ordering::Equal
            }
        })
        .ok()?;
    let aligned = realms[idx].items[domain_id].start_lba == lba;
    Some((idx, aligned))
}

/// Whether a direct activation between these two zone types is allowed by
/// policy: every pair is fine except the two specific cross-family
/// crossings spec §4.8 calls out (Conventional/NotWP to-or-from SOBR, and
/// SWR to-or-from SWP).
fn cross_family_allowed(old_type: ZoneType, new_type: ZoneType) -> bool {
    let forbidden = |a: ZoneType, b: ZoneType| {
        matches!(
            (a, b),
            (ZoneType::Conventional, ZoneType::SequentialOrBeforeRequired)
                | (ZoneType::SequentialOrBeforeRequired, ZoneType::Conventional)
                | (ZoneType::SequentialWriteRequired, ZoneType::SequentialWritePreferred)
                | (ZoneType::SequentialWritePreferred, ZoneType::SequentialWriteRequired)
        )
    };
    !forbidden(old_type, new_type)
}

/// Evaluates (without mutating) whether the requested realms can activate
/// as `target_domain_id`. `max_activate` of `0` means unlimited, per the
/// feature catalog's `max_activate` field.
pub fn evaluate(
    realms: &[ZoneRealm],
    zones: &[Zone],
    domain_types: &[ZoneType],
    req: &ActivateRequest,
    max_activate: u32,
    no_za_control: bool,
) -> ZbcResult<Outcome> {
    if no_za_control {
        return Ok(Outcome::rejected(UNSUPP));
    }

    let targets: Vec<usize> = if req.all {
        (0..realms.len()).collect()
    } else {
        req.realm_numbers
            .iter()
            .map(|n| {
                realms
                    .iter()
                    .position(|r| r.number == *n)
                    .ok_or_else(|| ZbcError::ZoneProtocol(format!("no such realm: {n}")))
            })
            .collect::<ZbcResult<_>>()?
    };

    if targets.is_empty() {
        return Err(ZbcError::ZoneProtocol("activation request names no realms".into()));
    }

    if max_activate != 0 && targets.len() as u32 > max_activate {
        return Ok(Outcome::rejected(UNSUPP));
    }

    let mut total_zones = 0u32;
    let mut rewrites = Vec::with_capacity(targets.len());
    let mut seen_domain: Option<u32> = None;

    for &ri in &targets {
        let realm = &realms[ri];

        if !realm.can_activate_as(req.target_domain_id) {
            return Ok(Outcome::rejected(UNSUPP));
        }

        if realm.active_domain_id == req.target_domain_id {
            continue;
        }

        let active_item = realm.active_item();
        let old_zone_type = domain_types
            .get(realm.active_domain_id as usize)
            .copied()
            .unwrap_or(ZoneType::Conventional);
        let new_zone_type = domain_types
            .get(req.target_domain_id as usize)
            .copied()
            .unwrap_or(ZoneType::Conventional);

        if !cross_family_allowed(old_zone_type, new_zone_type) {
            return Ok(Outcome::rejected_at(UNSUPP, active_item.start_lba));
        }

        if !req.nozsrc {
            for zi in zone_range(active_item.first_zone_index, active_item.zone_count) {
                if let Some(z) = zones.get(zi as usize) {
                    if z.condition != ZoneCondition::Empty && z.condition != ZoneCondition::Inactive {
                        return Ok(Outcome::rejected_at(NOT_EMPTY, active_item.start_lba));
                    }
                }
            }
        }

        if let Some(d) = seen_domain {
            if d != req.target_domain_id {
                return Ok(Outcome::rejected(MULTI_DOMAINS));
            }
        }
        seen_domain = Some(req.target_domain_id);

        let new_item = &realm.items[req.target_domain_id as usize];
        for zi in zone_range(new_item.first_zone_index, new_item.zone_count) {
            if let Some(z) = zones.get(zi as usize) {
                if z.condition != ZoneCondition::Inactive && z.condition != ZoneCondition::Empty {
                    return Ok(Outcome::rejected_at(NOT_INACTIVE, new_item.start_lba));
                }
            }
        }

        total_zones += new_item.zone_count;

        rewrites.push(RealmRewrite {
            realm_index: ri,
            new_zone_type,
            zone_indices: zone_range(new_item.first_zone_index, new_item.zone_count).collect(),
            old_zone_indices: zone_range(active_item.first_zone_index, active_item.zone_count)
                .collect(),
        });
    }

    Ok(Outcome {
        activated: true,
        error_bits: 0,
        nzp: Some(total_zones),
        ziwup: None,
        rewrites,
    })
}

/// Realm items address a contiguous run of the global zone array starting
/// at `first_zone_index`; `u32::MAX` marks an item with no backing zones
/// (never activatable, filtered out before this is called).
fn zone_range(first: u32, count: u32) -> std::ops::Range<u32> {
    if first == u32::MAX {
        0..0
    } else {
        first..first + count
    }
}

/// Applies a set of rewrites produced by a prior `evaluate` call with
/// `activated: true`. Only ZONE ACTIVATE calls this; ZONE QUERY never does.
pub fn apply(
    zones: &mut [Zone],
    realms: &mut [ZoneRealm],
    outcome: &Outcome,
    target_domain_id: u32,
    budget: &mut crate::state::OpenZoneBudget,
) {
    for rewrite in &outcome.rewrites {
        for &zi in &rewrite.old_zone_indices {
            if (zi as usize) < zones.len() {
                crate::state::deactivate(zones, budget, zi);
            }
        }
        for &zi in &rewrite.zone_indices {
            if (zi as usize) < zones.len() {
                crate::state::activate_as(zones, budget, zi, rewrite.new_zone_type);
            }
        }
        realms[rewrite.realm_index].active_domain_id = target_domain_id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realm::ZoneRealmItem;

    fn realm_with_domains(can_swr: bool) -> ZoneRealm {
        ZoneRealm {
            number: 0,
            restrictions: 0,
            active_domain_id: 0,
            items: vec![
                ZoneRealmItem {
                    valid_target: true,
                    ..ZoneRealmItem::INVALID
                },
                ZoneRealmItem {
                    valid_target: can_swr,
                    ..ZoneRealmItem::INVALID
                },
            ],
        }
    }

    #[test]
    fn rejects_unsupported_target_domain() {
        let realms = vec![realm_with_domains(false)];
        let req = ActivateRequest {
            all: true,
            nozsrc: true,
            target_domain_id: 1,
            realm_numbers: vec![],
        };
        let out = evaluate(&realms, &[], &[], &req, 0, false).unwrap();
        assert!(!out.activated);
        assert_eq!(out.error_bits, UNSUPP);
    }

    #[test]
    fn no_za_control_rejects_everything() {
        let realms = vec![realm_with_domains(true)];
        let req = ActivateRequest {
            all: true,
            nozsrc: true,
            target_domain_id: 1,
            realm_numbers: vec![],
        };
        let out = evaluate(&realms, &[], &[], &req, 0, true).unwrap();
        assert_eq!(out.error_bits, UNSUPP);
    }

    #[test]
    fn activating_already_active_domain_is_a_no_op_success() {
        let realms = vec![realm_with_domains(true)];
        let req = ActivateRequest {
            all: true,
            nozsrc: true,
            target_domain_id: 0,
            realm_numbers: vec![],
        };
        let out = evaluate(&realms, &[], &[], &req, 0, false).unwrap();
        assert!(out.activated);
        assert!(out.rewrites.is_empty());
    }

    /// Realm starts active in its SWR domain; activates into the
    /// Conventional domain, which already has its own backing zones in the
    /// `ZD_1CMR_BOT` profile so the activation is a real type change, not a
    /// same-type no-op — spec's "activate into a different domain" scenario.
    #[test]
    fn realm_activates_into_a_genuinely_different_existing_domain() {
        use crate::config::DevConfig;
        use crate::{features, format, geometry};

        let mut c = DevConfig {
            capacity_bytes: 10u64 << 30,
            block_size: 512,
            zone_size_bytes: 256 << 20,
            conventional_zone_count: 0,
            smr_gain_percent: 110,
            model: "Zd1CmrBottom".into(),
            ..DevConfig::default()
        };
        c.realms_enabled = true;
        c.realm_size_bytes = 2 * c.zone_size_bytes;
        let profile = features::find("ZD_1CMR_BOT").unwrap();
        let geom = geometry::derive(&c, profile).unwrap();
        let img = format::build_initial_image(&c, profile, &geom).unwrap();

        let mut domain_types = vec![ZoneType::Conventional; img.domains.len()];
        for d in &img.domains {
            domain_types[d.id as usize] = d.zone_type;
        }
        let conv_domain_id = img
            .domains
            .iter()
            .position(|d| d.zone_type == ZoneType::Conventional)
            .unwrap() as u32;

        let realm = &img.realms[0];
        assert_ne!(realm.active_domain_id, conv_domain_id);
        assert!(realm.can_activate_as(conv_domain_id));

        let req = ActivateRequest {
            all: false,
            nozsrc: false,
            target_domain_id: conv_domain_id,
            realm_numbers: vec![realm.number],
        };
        let out = evaluate(&img.realms, &img.zones, &domain_types, &req, 0, false).unwrap();
        assert!(out.activated, "expected activation to succeed: bits={:#x}", out.error_bits);
        assert_eq!(out.rewrites.len(), 1);
        assert_eq!(out.rewrites[0].new_zone_type, ZoneType::Conventional);
        assert!(!out.rewrites[0].old_zone_indices.is_empty());
        assert!(!out.rewrites[0].zone_indices.is_empty());

        let locate = locate_realm_containing(
            &img.realms,
            &img.domains,
            &img.zones,
            img.realms[0].items[conv_domain_id as usize].start_lba,
        );
        assert_eq!(locate.map(|(idx, aligned)| (idx, aligned)), Some((0, true)));
    }
}
