//! Zone realms: the unit of activation. A realm groups one zone from each
//! domain it can be activated as; exactly one of those zones is "active"
//! (owns the realm's LBA range) at a time.

use crate::zone::ZoneType;

/// Per-domain membership record inside a realm: the LBA range this realm
/// would occupy if activated as that domain's type, or a zeroed/invalid
/// entry if the realm cannot be activated as that type at all.
#[derive(Debug, Clone, Copy)]
pub struct ZoneRealmItem {
    pub valid_target: bool,
    pub start_lba: u64,
    pub end_lba_exclusive: u64,
    pub zone_count: u32,
    /// Index of the first zone (in the global zone array) this item would
    /// claim if activated.
    pub first_zone_index: u32,
}

impl ZoneRealmItem {
    pub const INVALID: ZoneRealmItem = ZoneRealmItem {
        valid_target: false,
        start_lba: 0,
        end_lba_exclusive: 0,
        zone_count: 0,
        first_zone_index: u32::MAX,
    };
}

/// Restriction bits reported in REPORT REALMS (ZBC-2 realm restrictions
/// field); kept as a bare `u16` rather than a bitflags type because only
/// two bits are defined and the field is otherwise opaque passthrough.
pub const REALM_RESTR_KEEP_OUT: u16 = 0x0001;
pub const REALM_RESTR_NO_REPORT: u16 = 0x0002;

#[derive(Debug, Clone)]
pub struct ZoneRealm {
    pub number: u32,
    pub restrictions: u16,
    /// Domain id the realm is currently activated as.
    pub active_domain_id: u32,
    /// One item per domain the device defines, indexed by domain id.
    pub items: Vec<ZoneRealmItem>,
}

impl ZoneRealm {
    pub fn active_item(&self) -> &ZoneRealmItem {
        &self.items[self.active_domain_id as usize]
    }

    pub fn active_zone_type(&self, domain_types: &[ZoneType]) -> ZoneType {
        domain_types[self.active_domain_id as usize]
    }

    pub fn can_activate_as(&self, domain_id: u32) -> bool {
        self.items
            .get(domain_id as usize)
            .map(|i| i.valid_target)
            .unwrap_or(false)
    }

    pub fn zone_count_for(&self, domain_id: u32) -> u32 {
        self.items
            .get(domain_id as usize)
            .map(|i| i.zone_count)
            .unwrap_or(0)
    }
}
