//! Static feature catalog: the (device-type, model) profiles the cfgstring
//! parser resolves against, and the initial-geometry parameters each one
//! carries.

use crate::zone::{ZoneCondition, ZoneType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    NonZoned,
    HmZoned,
    HaZoned,
    ZoneDomains,
}

impl DeviceType {
    /// Accepts the canonical `TYPE_LIKE_THIS` spelling or a hyphenated
    /// variant, case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().replace('-', "_").as_str() {
            "NON_ZONED" | "NONZONED" => Some(DeviceType::NonZoned),
            "HM_ZONED" | "HMZONED" => Some(DeviceType::HmZoned),
            "HA_ZONED" | "HAZONED" => Some(DeviceType::HaZoned),
            "ZONE_DOMAINS" | "ZONEDOMAINS" | "ZD" => Some(DeviceType::ZoneDomains),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::NonZoned => "NON_ZONED",
            DeviceType::HmZoned => "HM_ZONED",
            DeviceType::HaZoned => "HA_ZONED",
            DeviceType::ZoneDomains => "ZONE_DOMAINS",
        }
    }
}

/// Fault-injection parameters for the `*_FAULTY` profiles: a count of SMR
/// zones forced read-only/offline starting at a given zone offset, applied
/// by the formatter when the `fault-injection` feature is enabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct FaultInjection {
    pub read_only_count: u32,
    pub read_only_offset: u32,
    pub offline_count: u32,
    pub offline_offset: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct ActivationAllowed {
    pub conventional: bool,
    pub sobr: bool,
    pub swr: bool,
    pub swp: bool,
}

impl ActivationAllowed {
    const NONE: ActivationAllowed = ActivationAllowed {
        conventional: false,
        sobr: false,
        swr: false,
        swp: false,
    };
}

#[derive(Debug, Clone, Copy)]
pub struct FeatureProfile {
    pub name: &'static str,
    pub device_type: DeviceType,
    pub model: &'static str,
    pub cmr_init: (ZoneType, ZoneCondition),
    pub smr_init: (ZoneType, ZoneCondition),
    pub initial_all_smr: bool,
    pub activation_allowed: ActivationAllowed,
    pub no_za_control: bool,
    pub no_urswrz_control: bool,
    pub no_nozsrc: bool,
    pub no_report_realms: bool,
    pub max_activate_control: bool,
    pub initial_wp_check: bool,
    pub bottom_cmr_realms: u32,
    pub top_cmr_realms: u32,
    pub domain_gap_zones: u32,
    pub faults: FaultInjection,
}

const CONV_NOTWP: (ZoneType, ZoneCondition) = (ZoneType::Conventional, ZoneCondition::NotWritePointer);
const SOBR_FULL: (ZoneType, ZoneCondition) = (ZoneType::SequentialOrBeforeRequired, ZoneCondition::Full);
const SOBR_EMPTY: (ZoneType, ZoneCondition) = (ZoneType::SequentialOrBeforeRequired, ZoneCondition::Empty);
const SWR_EMPTY: (ZoneType, ZoneCondition) = (ZoneType::SequentialWriteRequired, ZoneCondition::Empty);
const SWP_EMPTY: (ZoneType, ZoneCondition) = (ZoneType::SequentialWritePreferred, ZoneCondition::Empty);

const ZD_BASE: ActivationAllowed = ActivationAllowed {
    conventional: true,
    sobr: false,
    swr: true,
    swp: false,
};
const ZD_ALL: ActivationAllowed = ActivationAllowed {
    conventional: true,
    sobr: false,
    swr: true,
    swp: true,
};
const ZD_SWP_ONLY: ActivationAllowed = ActivationAllowed {
    conventional: true,
    sobr: false,
    swr: false,
    swp: true,
};
const ZD_SOBR_SWR: ActivationAllowed = ActivationAllowed {
    conventional: false,
    sobr: true,
    swr: true,
    swp: false,
};
const ZD_SOBR_SWP: ActivationAllowed = ActivationAllowed {
    conventional: false,
    sobr: true,
    swr: false,
    swp: true,
};
const ZD_SOBR_ALL: ActivationAllowed = ActivationAllowed {
    conventional: false,
    sobr: true,
    swr: true,
    swp: true,
};

const NO_FAULT: FaultInjection = FaultInjection {
    read_only_count: 0,
    read_only_offset: 0,
    offline_count: 0,
    offline_offset: 0,
};
const STD_FAULT: FaultInjection = FaultInjection {
    read_only_count: 2,
    read_only_offset: 7,
    offline_count: 2,
    offline_offset: 11,
};

macro_rules! profile {
    ($name:literal, $dt:expr, $model:literal, $cmr:expr, $smr:expr, $all_smr:expr,
     $actv:expr, $no_za:expr, $no_ur:expr, $no_noz:expr, $no_rr:expr,
     $max_act:expr, $wp_chk:expr, $bot:expr, $top:expr, $gap:expr, $fault:expr) => {
        FeatureProfile {
            name: $name,
            device_type: $dt,
            model: $model,
            cmr_init: $cmr,
            smr_init: $smr,
            initial_all_smr: $all_smr,
            activation_allowed: $actv,
            no_za_control: $no_za,
            no_urswrz_control: $no_ur,
            no_nozsrc: $no_noz,
            no_report_realms: $no_rr,
            max_activate_control: $max_act,
            initial_wp_check: $wp_chk,
            bottom_cmr_realms: $bot,
            top_cmr_realms: $top,
            domain_gap_zones: $gap,
            faults: $fault,
        }
    };
}

pub static CATALOG: &[FeatureProfile] = &[
    profile!("NON_ZONED", DeviceType::NonZoned, "Generic", CONV_NOTWP, CONV_NOTWP, false, ActivationAllowed::NONE, true, true, true, true, false, true, 0, 0, 0, NO_FAULT),
    profile!("HM_ZONED", DeviceType::HmZoned, "SmrNoCmr", CONV_NOTWP, SWR_EMPTY, false, ActivationAllowed::NONE, true, true, true, true, false, true, 0, 0, 0, NO_FAULT),
    profile!("HM_ZONED_1PCNT_B", DeviceType::HmZoned, "Smr1PctBottom", CONV_NOTWP, SWR_EMPTY, false, ActivationAllowed::NONE, true, true, true, true, false, true, 1, 0, 0, NO_FAULT),
    profile!("HM_ZONED_2PCNT_BT", DeviceType::HmZoned, "Smr2PctBottomTop", CONV_NOTWP, SWR_EMPTY, false, ActivationAllowed::NONE, true, true, true, true, false, true, 2, 1, 0, NO_FAULT),
    profile!("HM_ZONED_FAULTY", DeviceType::HmZoned, "SmrFaulty", CONV_NOTWP, SWR_EMPTY, false, ActivationAllowed::NONE, true, true, true, true, false, true, 0, 0, 0, STD_FAULT),
    profile!("HA_ZONED", DeviceType::HaZoned, "SmrNoCmr", CONV_NOTWP, SWP_EMPTY, false, ActivationAllowed::NONE, true, true, true, true, false, true, 0, 0, 0, NO_FAULT),
    profile!("HA_ZONED_1PCNT_B", DeviceType::HaZoned, "Smr1PctBottom", CONV_NOTWP, SWP_EMPTY, false, ActivationAllowed::NONE, true, true, true, true, false, true, 1, 0, 0, NO_FAULT),
    profile!("HA_ZONED_2PCNT_BT", DeviceType::HaZoned, "Smr2PctBottomTop", CONV_NOTWP, SWP_EMPTY, false, ActivationAllowed::NONE, true, true, true, true, false, true, 2, 1, 0, NO_FAULT),
    profile!("ZONE_DOM", DeviceType::ZoneDomains, "ZdNoCmr", CONV_NOTWP, SWR_EMPTY, false, ZD_BASE, false, false, false, false, true, true, 0, 0, 3, NO_FAULT),
    profile!("ZD_1CMR_BOT", DeviceType::ZoneDomains, "Zd1CmrBottom", CONV_NOTWP, SWR_EMPTY, false, ZD_ALL, false, false, false, false, true, true, 1, 0, 0, NO_FAULT),
    profile!("ZD_1CMR_BOT_SWP", DeviceType::ZoneDomains, "ZdSwp", CONV_NOTWP, SWP_EMPTY, false, ZD_SWP_ONLY, false, false, false, false, true, true, 1, 0, 0, NO_FAULT),
    profile!("ZD_1CMR_BOT_TOP", DeviceType::ZoneDomains, "Zd1CmrBottomTop", CONV_NOTWP, SWR_EMPTY, false, ZD_ALL, false, false, false, false, true, true, 1, 1, 0, NO_FAULT),
    profile!("ZD_1CMR_BT_SMR", DeviceType::ZoneDomains, "Zd1CmrBottomTopSwr", CONV_NOTWP, SWR_EMPTY, true, ZD_ALL, false, false, false, false, true, true, 1, 2, 0, NO_FAULT),
    profile!("ZD_SOBR", DeviceType::ZoneDomains, "ZdSobrNoCmr", SOBR_FULL, SWR_EMPTY, false, ZD_SOBR_SWR, false, false, false, false, true, true, 0, 0, 0, NO_FAULT),
    profile!("ZD_SOBR_SWP", DeviceType::ZoneDomains, "ZdSobrSwp", SOBR_FULL, SWP_EMPTY, false, ZD_SOBR_SWP, false, false, false, false, true, true, 0, 0, 0, NO_FAULT),
    profile!("ZD_SOBR_EMPTY", DeviceType::ZoneDomains, "ZdSobrEmpty", SOBR_EMPTY, SWR_EMPTY, false, ZD_SOBR_SWR, false, false, false, false, true, true, 0, 0, 0, NO_FAULT),
    profile!("ZD_1SOBR_BT_TOP", DeviceType::ZoneDomains, "Zd1SobrBottomTop", SOBR_EMPTY, SWR_EMPTY, false, ZD_SOBR_ALL, false, false, false, false, true, true, 1, 1, 0, NO_FAULT),
    profile!("ZD_BARE_BONE", DeviceType::ZoneDomains, "ZdBareBone", CONV_NOTWP, SWR_EMPTY, false, ZD_BASE, true, true, false, false, false, true, 0, 0, 0, NO_FAULT),
    profile!("ZD_FAULTY", DeviceType::ZoneDomains, "ZdFaulty", CONV_NOTWP, SWR_EMPTY, false, ZD_BASE, false, false, false, false, true, true, 0, 0, 0, STD_FAULT),
    profile!("ZD_SOBR_FAULTY", DeviceType::ZoneDomains, "ZdSobrFaulty", SOBR_EMPTY, SWR_EMPTY, false, ZD_SOBR_SWR, false, false, false, false, false, true, 1, 1, 0, STD_FAULT),
];

pub fn find(name: &str) -> Option<&'static FeatureProfile> {
    CATALOG.iter().find(|p| p.name.eq_ignore_ascii_case(name))
}

/// Resolves a catalog row by the pair that actually selects one: device
/// type plus model, per §3.1 ("device-model ... selecting a row of the
/// feature catalog"). `find` alone can't do this — catalog names and
/// model strings are different fields.
pub fn find_profile(device_type: DeviceType, model: &str) -> Option<&'static FeatureProfile> {
    CATALOG
        .iter()
        .find(|p| p.device_type == device_type && p.model.eq_ignore_ascii_case(model))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_names_are_unique() {
        let mut names: Vec<_> = CATALOG.iter().map(|p| p.name).collect();
        names.sort_unstable();
        let mut dedup = names.clone();
        dedup.dedup();
        assert_eq!(names.len(), dedup.len());
    }

    #[test]
    fn find_is_case_insensitive() {
        assert!(find("zone_dom").is_some());
        assert!(find("ZONE_DOM").is_some());
        assert!(find("not-a-profile").is_none());
    }

    #[test]
    fn bare_bone_disables_activation_control() {
        let p = find("ZD_BARE_BONE").unwrap();
        assert!(p.no_za_control);
        assert!(p.no_urswrz_control);
        assert!(!p.max_activate_control);
    }

    #[test]
    fn find_profile_selects_by_device_type_and_model() {
        let p = find_profile(DeviceType::ZoneDomains, "ZdSobrNoCmr").unwrap();
        assert_eq!(p.name, "ZD_SOBR");
    }

    #[test]
    fn find_profile_rejects_model_under_the_wrong_device_type() {
        assert!(find_profile(DeviceType::HmZoned, "ZdSobrNoCmr").is_none());
        assert!(find_profile(DeviceType::ZoneDomains, "NotAModel").is_none());
    }

    #[test]
    fn device_type_parse_is_case_and_hyphen_insensitive() {
        assert_eq!(DeviceType::parse("zone-domains"), Some(DeviceType::ZoneDomains));
        assert_eq!(DeviceType::parse("ZONE_DOMAINS"), Some(DeviceType::ZoneDomains));
        assert_eq!(DeviceType::parse("bogus"), None);
    }
}
