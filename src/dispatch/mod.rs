//! Command dispatcher: opcode/service-action routing for the subset of the
//! SCSI command set this handler implements. The host framework owns CDB
//! dequeue and iovec plumbing; this module only ever sees a CDB byte slice
//! plus an already-gathered data-out buffer, and returns a status plus a
//! data-in buffer.

pub mod mode_pages;

use crate::activate::ActivateRequest;
use crate::codec::{rdbe16, rdbe32, rdbe64};
use crate::device::Device;
use crate::error::{Asc, Sense, SenseKey, ZbcError};
use crate::report;

pub const OP_FORMAT_UNIT: u8 = 0x04;
pub const OP_REQUEST_SENSE: u8 = 0x03;
pub const OP_INQUIRY: u8 = 0x12;
pub const OP_MODE_SELECT_6: u8 = 0x15;
pub const OP_MODE_SENSE_6: u8 = 0x1A;
pub const OP_RECEIVE_DIAGNOSTIC_RESULTS: u8 = 0x1C;
pub const OP_READ_CAPACITY_10: u8 = 0x25;
pub const OP_READ_10: u8 = 0x28;
pub const OP_WRITE_10: u8 = 0x2A;
pub const OP_SYNCHRONIZE_CACHE_10: u8 = 0x35;
pub const OP_MODE_SELECT_10: u8 = 0x55;
pub const OP_MODE_SENSE_10: u8 = 0x5A;
pub const OP_SANITIZE: u8 = 0x48;
pub const OP_SERVICE_ACTION_IN_16: u8 = 0x9E;
pub const OP_READ_16: u8 = 0x88;
pub const OP_WRITE_16: u8 = 0x8A;
pub const OP_ZBC_OUT: u8 = 0x94;
pub const OP_ZBC_IN: u8 = 0x95;
pub const OP_ZONE_ACTIVATE_32: u8 = 0x7F;

pub const SA_READ_CAPACITY_16: u8 = 0x10;

pub const SA_REPORT_ZONES: u8 = 0x00;
pub const SA_CLOSE_ZONE: u8 = 0x01;
pub const SA_FINISH_ZONE: u8 = 0x02;
pub const SA_OPEN_ZONE: u8 = 0x03;
pub const SA_RESET_WP: u8 = 0x04;
pub const SA_REPORT_MUTATIONS: u8 = 0x05;
pub const SA_REPORT_REALMS: u8 = 0x06;
pub const SA_REPORT_ZONE_DOMAINS: u8 = 0x07;
pub const SA_ZONE_ACTIVATE_16: u8 = 0x08;
pub const SA_ZONE_QUERY_16: u8 = 0x09;

pub const SA_SEQUENTIALIZE: u8 = 0x05;
pub const SA_MUTATE: u8 = 0x06;

/// Service actions for the 32-byte variable-length CDB carried under
/// [`OP_ZONE_ACTIVATE_32`] (bytes 8-9, big-endian).
pub const SA32_ZONE_ACTIVATE: u16 = 0xF800;
pub const SA32_ZONE_QUERY: u16 = 0xF801;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandStatus {
    Good,
    CheckCondition(Sense),
}

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub status: CommandStatus,
    pub data_in: Vec<u8>,
}

impl CommandResult {
    fn good(data_in: Vec<u8>) -> Self {
        Self {
            status: CommandStatus::Good,
            data_in,
        }
    }

    fn check(sense: Sense) -> Self {
        Self {
            status: CommandStatus::CheckCondition(sense),
            data_in: Vec::new(),
        }
    }

    fn from_err(err: ZbcError) -> Self {
        tracing::warn!(error = %err, "command rejected");
        Self::check(err.sense())
    }
}

/// Entry point the host framework calls with one already-dequeued CDB.
pub fn dispatch(dev: &mut Device, cdb: &[u8], data_out: &[u8]) -> CommandResult {
    if cdb.is_empty() {
        return CommandResult::check(Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB));
    }
    let opcode = cdb[0];
    tracing::debug!(opcode = format!("0x{opcode:02X}"), "dispatching command");

    match opcode {
        OP_INQUIRY => handle_inquiry(dev, cdb),
        OP_MODE_SENSE_6 | OP_MODE_SENSE_10 => handle_mode_sense(dev, cdb),
        OP_MODE_SELECT_6 | OP_MODE_SELECT_10 => handle_mode_select(dev, data_out),
        OP_READ_CAPACITY_10 => handle_read_capacity_10(dev),
        OP_SERVICE_ACTION_IN_16 if cdb.get(1).map(|b| b & 0x1F) == Some(SA_READ_CAPACITY_16) => {
            handle_read_capacity_16(dev)
        }
        OP_REQUEST_SENSE => CommandResult::good(vec![0u8; 18]),
        OP_READ_10 => handle_read(dev, rdbe32(&cdb[2..6]) as u64, rdbe16(&cdb[7..9]) as u64),
        OP_WRITE_10 => handle_write(dev, rdbe32(&cdb[2..6]) as u64, rdbe16(&cdb[7..9]) as u64, data_out),
        OP_READ_16 => handle_read(dev, rdbe64(&cdb[2..10]), rdbe32(&cdb[10..14]) as u64),
        OP_WRITE_16 => handle_write(dev, rdbe64(&cdb[2..10]), rdbe32(&cdb[10..14]) as u64, data_out),
        OP_SYNCHRONIZE_CACHE_10 => handle_sync_cache(dev),
        OP_RECEIVE_DIAGNOSTIC_RESULTS => {
            CommandResult::good(crate::stats::Stats::from_device(dev).to_log_page())
        }
        OP_SANITIZE => handle_sanitize(dev),
        OP_FORMAT_UNIT => handle_format_unit(dev),
        OP_ZBC_IN => handle_zbc_in(dev, cdb),
        OP_ZBC_OUT => handle_zbc_out(dev, cdb, data_out),
        OP_ZONE_ACTIVATE_32 => handle_zone_activate_32(dev, cdb),
        _ => CommandResult::check(Sense::new(
            SenseKey::IllegalRequest,
            Asc::INVALID_COMMAND_OPERATION_CODE,
        )),
    }
}

fn handle_inquiry(dev: &Device, cdb: &[u8]) -> CommandResult {
    let evpd = cdb.get(1).map(|b| b & 0x01 == 0x01).unwrap_or(false);
    let mut data = vec![0u8; 36];
    data[0] = 0x00; // direct-access block device
    data[2] = 0x06; // SPC version
    data[4] = 31; // additional length
    data[8..16].copy_from_slice(b"ZBCZDR  ");
    let model = format!("{:<16}", dev.profile.name);
    data[16..32].copy_from_slice(&model.as_bytes()[..16]);
    if evpd {
        // No VPD pages implemented beyond the standard inquiry data; the
        // host framework is expected to synthesize VPD 0x83 (device
        // identification) at a layer above this handler.
        return CommandResult::good(vec![0u8; 4]);
    }
    CommandResult::good(data)
}

fn handle_mode_sense(dev: &Device, cdb: &[u8]) -> CommandResult {
    let page_code = cdb.get(2).map(|b| b & 0x3F).unwrap_or(0);
    let body = match page_code {
        p if p == mode_pages::PAGE_READ_WRITE_ERROR_RECOVERY => mode_pages::read_write_error_recovery(),
        p if p == mode_pages::PAGE_CACHING => mode_pages::caching(),
        p if p == mode_pages::PAGE_CONTROL => mode_pages::control(),
        p if p == mode_pages::PAGE_ZONE_DOMAINS => {
            mode_pages::zone_domains(&dev.cfg, dev.domains.len() as u32)
        }
        _ => {
            return CommandResult::check(Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB));
        }
    };
    let mut data = vec![0u8; 4 + body.len()];
    data[0] = body.len() as u8;
    data[4..].copy_from_slice(&body);
    CommandResult::good(data)
}

/// MODE SELECT over the Zone Domains page (§4.11): parses the same 16-byte
/// body [`mode_pages::zone_domains`] reports, validates the requested
/// changes against feature-profile gating, and applies them to both the
/// in-memory config and the mmapped header. Any other recognized page
/// (R/W Recovery, Cache, Control) is get-only and rejects any write that
/// actually changes a field; an unrecognized page is INVALID_FIELD.
fn handle_mode_select(dev: &mut Device, data_out: &[u8]) -> CommandResult {
    if data_out.len() < 4 {
        return CommandResult::check(crate::codec::parameter_list_length_error());
    }
    let page_code = data_out[0] & 0x3F;
    let spf = data_out[0] & 0x40 != 0;

    if page_code != mode_pages::PAGE_ZONE_DOMAINS {
        // The other pages this device reports are entirely static; nothing
        // in their body is settable.
        return CommandResult::good(Vec::new());
    }
    if !spf || data_out.get(1).copied() != Some(mode_pages::SUBPAGE_ZONE_DOMAINS) {
        return CommandResult::check(Sense::new(
            SenseKey::IllegalRequest,
            Asc::INVALID_FIELD_IN_PARAMETER_LIST,
        ));
    }
    if data_out.len() < mode_pages::OFF_MAX_ACTIVATE + 2 {
        return CommandResult::check(crate::codec::parameter_list_length_error());
    }

    let flags = data_out[mode_pages::OFF_FLAGS];
    let requested_wp_check = flags & mode_pages::FLAG_URSWRZ == 0;
    let requested_fsnoz = rdbe16(&data_out[mode_pages::OFF_FSNOZ..mode_pages::OFF_FSNOZ + 2]) as u32;
    let requested_max_activate =
        rdbe16(&data_out[mode_pages::OFF_MAX_ACTIVATE..mode_pages::OFF_MAX_ACTIVATE + 2]) as u32;

    if requested_wp_check != dev.cfg.wp_check && dev.profile.no_urswrz_control {
        return CommandResult::check(Sense::new(
            SenseKey::IllegalRequest,
            Asc::INVALID_FIELD_IN_PARAMETER_LIST,
        ));
    }
    if requested_max_activate != dev.cfg.max_activate && !dev.profile.max_activate_control {
        return CommandResult::check(Sense::new(
            SenseKey::IllegalRequest,
            Asc::INVALID_FIELD_IN_PARAMETER_LIST,
        ));
    }

    dev.cfg.wp_check = requested_wp_check;
    dev.cfg.fsnoz = requested_fsnoz;
    dev.cfg.max_activate = requested_max_activate;

    match dev.persist_config() {
        Ok(()) => CommandResult::good(Vec::new()),
        Err(e) => CommandResult::from_err(e),
    }
}

fn handle_read_capacity_10(dev: &Device) -> CommandResult {
    let mut data = vec![0u8; 8];
    let last_lba = dev.geometry.total_lba.saturating_sub(1).min(u32::MAX as u64) as u32;
    crate::codec::cpbe32(&mut data[0..4], last_lba);
    crate::codec::cpbe32(&mut data[4..8], dev.cfg.block_size);
    CommandResult::good(data)
}

fn handle_read_capacity_16(dev: &Device) -> CommandResult {
    let mut data = vec![0u8; 32];
    crate::codec::cpbe64(&mut data[0..8], dev.geometry.total_lba.saturating_sub(1));
    crate::codec::cpbe32(&mut data[8..12], dev.cfg.block_size);
    data[12] = 0x01; // P_TYPE/PROT_EN and RC_BASIS for zoned devices
    CommandResult::good(data)
}

fn handle_read(dev: &mut Device, lba: u64, len: u64) -> CommandResult {
    match dev.read(lba, len) {
        Ok(data) => CommandResult::good(data),
        Err(e) => CommandResult::from_err(e),
    }
}

fn handle_write(dev: &mut Device, lba: u64, len: u64, data_out: &[u8]) -> CommandResult {
    let want = (len * dev.cfg.block_size as u64) as usize;
    if data_out.len() < want {
        return CommandResult::check(crate::codec::parameter_list_length_error());
    }
    match dev.write(lba, len, &data_out[..want]) {
        Ok(()) => CommandResult::good(Vec::new()),
        Err(e) => CommandResult::from_err(e),
    }
}

fn handle_sync_cache(dev: &mut Device) -> CommandResult {
    match dev.persist() {
        Ok(()) => CommandResult::good(Vec::new()),
        Err(e) => CommandResult::from_err(e),
    }
}

fn handle_sanitize(dev: &mut Device) -> CommandResult {
    match crate::format::sanitize(&dev.cfg, dev.profile, &dev.geometry) {
        Ok(initial) => {
            dev.zones = initial.zones;
            dev.domains = initial.domains;
            dev.realms = initial.realms;
            match dev.persist() {
                Ok(()) => CommandResult::good(Vec::new()),
                Err(e) => CommandResult::from_err(e),
            }
        }
        Err(e) => CommandResult::from_err(e),
    }
}

fn handle_format_unit(dev: &mut Device) -> CommandResult {
    match crate::format::format_unit(&dev.cfg, dev.profile, &dev.geometry) {
        Ok(initial) => {
            dev.zones = initial.zones;
            dev.domains = initial.domains;
            dev.realms = initial.realms;
            match dev.persist() {
                Ok(()) => CommandResult::good(Vec::new()),
                Err(e) => CommandResult::from_err(e),
            }
        }
        Err(e) => CommandResult::from_err(e),
    }
}

fn handle_zbc_in(dev: &mut Device, cdb: &[u8]) -> CommandResult {
    let service_action = cdb.get(1).map(|b| b & 0x1F).unwrap_or(0);
    match service_action {
        SA_REPORT_ZONES => {
            let start_lba = rdbe64(&cdb[2..10]);
            let idx = crate::rdwr::zone_containing(&dev.zones, start_lba).unwrap_or(0);
            let alloc_len = cdb.get(10..14).map(rdbe32).unwrap_or(0) as usize;
            let options_byte = cdb.get(14).copied().unwrap_or(0);
            let partial = options_byte & 0x80 != 0;
            let filter = report::ZoneFilter::from_option(options_byte & 0x3F);
            CommandResult::good(report::report_zones(
                &dev.zones,
                idx,
                dev.geometry.total_lba.saturating_sub(1),
                filter,
                partial,
                alloc_len,
            ))
        }
        SA_REPORT_ZONE_DOMAINS => CommandResult::good(report::report_domains(&dev.domains)),
        SA_REPORT_REALMS => CommandResult::good(report::report_realms(&dev.realms, dev.domains.len())),
        SA_REPORT_MUTATIONS => CommandResult::good(report::report_mutations(crate::features::CATALOG)),
        SA_ZONE_QUERY_16 => match build_activate_request(dev, cdb) {
            Ok(req) => match dev.query_activate(&req) {
                Ok(outcome) => CommandResult::good(encode_activation_results(&outcome, &dev.zones)),
                Err(e) => CommandResult::from_err(e),
            },
            Err(result) => result,
        },
        _ => CommandResult::check(Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB)),
    }
}

fn handle_zbc_out(dev: &mut Device, cdb: &[u8], data_out: &[u8]) -> CommandResult {
    let service_action = cdb.get(1).map(|b| b & 0x1F).unwrap_or(0);
    let zone_id = if cdb.len() >= 10 { rdbe64(&cdb[2..10]) } else { 0 };
    let all = cdb.get(14).map(|b| b & 0x01 == 0x01).unwrap_or(false);

    let result = match service_action {
        SA_CLOSE_ZONE => with_zone(dev, zone_id, all, |zones, budget, idx| {
            crate::state::close(zones, budget, idx)
        }),
        SA_FINISH_ZONE => with_zone(dev, zone_id, all, |zones, budget, idx| {
            crate::state::finish(zones, budget, idx)
        }),
        SA_OPEN_ZONE => with_zone(dev, zone_id, all, |zones, budget, idx| {
            crate::state::explicit_open(zones, budget, idx)
        }),
        SA_RESET_WP => with_zone(dev, zone_id, all, |zones, budget, idx| {
            crate::state::reset(zones, budget, idx)
        }),
        SA_SEQUENTIALIZE => with_zone(dev, zone_id, all, |zones, _budget, idx| {
            crate::state::sequentialize(zones, idx)
        }),
        SA_ZONE_ACTIVATE_16 => {
            return match build_activate_request(dev, cdb) {
                Ok(req) => match dev.activate(&req) {
                    Ok(outcome) => CommandResult::good(encode_activation_results(&outcome, &dev.zones)),
                    Err(e) => CommandResult::from_err(e),
                },
                Err(result) => result,
            };
        }
        SA_MUTATE => handle_mutate(dev, data_out),
        _ => return CommandResult::check(Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB)),
    };

    match result {
        Ok(()) => CommandResult::good(Vec::new()),
        Err(e) => CommandResult::from_err(e),
    }
}

/// MUTATE (ZBC OUT, vendor SA 0x06): switches the device's active feature
/// profile to the one named in the parameter list, provided both profiles
/// report the same device type. The parameter list is a single NUL- or
/// space-padded ASCII catalog name (e.g. `ZD_1CMR_BOT`), the same name
/// `features::find` and REPORT MUTATIONS key off of.
fn handle_mutate(dev: &mut Device, data_out: &[u8]) -> crate::error::ZbcResult<()> {
    if data_out.is_empty() {
        return Err(ZbcError::ZoneProtocol("MUTATE parameter list is empty".into()));
    }
    let name = std::str::from_utf8(data_out)
        .map_err(|_| ZbcError::ZoneProtocol("MUTATE parameter list is not valid ASCII".into()))?
        .trim_matches(|c: char| c == '\0' || c.is_whitespace());
    let new_profile = crate::features::find(name)
        .ok_or_else(|| ZbcError::ZoneProtocol(format!("MUTATE names an unknown profile: {name}")))?;
    if new_profile.device_type != dev.profile.device_type {
        return Err(ZbcError::ZoneProtocol(format!(
            "MUTATE cannot change device type (from {:?} to {:?})",
            dev.profile.device_type, new_profile.device_type
        )));
    }
    let initial = crate::format::mutate(&dev.cfg, new_profile, &dev.geometry)?;
    dev.profile = new_profile;
    dev.cfg.model = new_profile.model.to_string();
    dev.zones = initial.zones;
    dev.domains = initial.domains;
    dev.realms = initial.realms;
    dev.persist()
}

fn with_zone(
    dev: &mut Device,
    zone_id: u64,
    all: bool,
    op: impl Fn(&mut [crate::zone::Zone], &mut crate::state::OpenZoneBudget, u32) -> crate::error::ZbcResult<()>,
) -> crate::error::ZbcResult<()> {
    if all {
        for idx in 0..dev.zones.len() as u32 {
            op(&mut dev.zones, &mut dev.budget, idx)?;
        }
        return Ok(());
    }
    let idx = crate::rdwr::zone_containing(&dev.zones, zone_id)
        .ok_or_else(|| ZbcError::ZoneProtocol(format!("no zone at lba {zone_id}")))?;
    op(&mut dev.zones, &mut dev.budget, idx as u32)
}

/// ZONE ACTIVATE/QUERY-32 (opcode 0x7F, a variable-length CDB): the service
/// action distinguishes ACTIVATE from QUERY the same way the -16 REPORT
/// variant's service action does, just carried in a BE16 at bytes 8-9
/// instead of the low 5 bits of byte 1. Field layout (byte positions not
/// given verbatim by the ZBC-2 draft this was distilled from, so this is a
/// deliberate, documented choice — see DESIGN.md):
///   byte 0: opcode (0x7F)
///   byte 1: control
///   bytes 2-6: reserved
///   byte 7: additional CDB length
///   bytes 8-9: service action (BE16)
///   bytes 10-17: zone ID / starting LBA (BE64)
///   byte 22: target domain ID
///   byte 23: bit0 = ALL, bit1 = NOZSRC
fn handle_zone_activate_32(dev: &mut Device, cdb: &[u8]) -> CommandResult {
    if cdb.len() < 24 {
        return CommandResult::check(Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB));
    }
    let service_action = rdbe16(&cdb[8..10]);
    let req = match build_activate_request_32(dev, cdb) {
        Ok(req) => req,
        Err(result) => return result,
    };

    match service_action {
        SA32_ZONE_QUERY => match dev.query_activate(&req) {
            Ok(outcome) => CommandResult::good(encode_activation_results(&outcome, &dev.zones)),
            Err(e) => CommandResult::from_err(e),
        },
        SA32_ZONE_ACTIVATE => match dev.activate(&req) {
            Ok(outcome) => CommandResult::good(encode_activation_results(&outcome, &dev.zones)),
            Err(e) => CommandResult::from_err(e),
        },
        _ => CommandResult::check(Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB)),
    }
}

/// Resolves a CDB's start LBA to the realm number it names, per §4.8 step
/// 2: locate the zone at that LBA, then binary-search the realm whose item
/// in that zone's domain covers it. `ALL` requests name no single realm
/// (the caller covers every realm instead), so this is skipped for them.
/// When the realms feature is enabled, a start LBA that doesn't land
/// exactly on a realm boundary is rejected with REALM_ALIGN rather than
/// silently rounding.
fn resolve_realm_numbers(dev: &Device, lba: u64, all: bool) -> Result<Vec<u32>, CommandResult> {
    if all {
        return Ok(Vec::new());
    }
    match crate::activate::locate_realm_containing(&dev.realms, &dev.domains, &dev.zones, lba) {
        Some((idx, aligned)) => {
            if dev.cfg.realms_enabled && !aligned {
                let rejected = crate::activate::Outcome::rejected_at(
                    crate::activate::error_bits::REALM_ALIGN,
                    lba,
                );
                return Err(CommandResult::good(encode_activation_results(&rejected, &dev.zones)));
            }
            Ok(vec![dev.realms[idx].number])
        }
        None => Err(CommandResult::check(Sense::new(
            SenseKey::IllegalRequest,
            Asc::INVALID_FIELD_IN_CDB,
        ))),
    }
}

fn build_activate_request_32(dev: &Device, cdb: &[u8]) -> Result<ActivateRequest, CommandResult> {
    if cdb.len() < 24 {
        return Err(CommandResult::check(Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB)));
    }
    let zone_id = rdbe64(&cdb[10..18]);
    let target_domain_id = cdb[22] as u32;
    let all = cdb[23] & 0x01 == 0x01;
    let nozsrc = cdb[23] & 0x02 == 0x02;
    let realm_numbers = resolve_realm_numbers(dev, zone_id, all)?;
    Ok(ActivateRequest {
        all,
        nozsrc,
        target_domain_id,
        realm_numbers,
    })
}

fn build_activate_request(dev: &Device, cdb: &[u8]) -> Result<ActivateRequest, CommandResult> {
    if cdb.len() < 16 {
        return Err(CommandResult::check(Sense::new(SenseKey::IllegalRequest, Asc::INVALID_FIELD_IN_CDB)));
    }
    let target_domain_id = cdb[13] as u32;
    let all = cdb[14] & 0x01 == 0x01;
    let nozsrc = cdb[14] & 0x02 == 0x02;
    let zone_id = rdbe64(&cdb[2..10]);
    let realm_numbers = resolve_realm_numbers(dev, zone_id, all)?;
    Ok(ActivateRequest {
        all,
        nozsrc,
        target_domain_id,
        realm_numbers,
    })
}

/// One activation-result descriptor (24 B): `type`@0, `cond`@1 (high
/// nibble), `domain_id`@2, `zone_count`@8 (u64), `start_lba`@16 (u64).
fn encode_descriptor(
    zone_type: crate::zone::ZoneType,
    cond: crate::zone::ZoneCondition,
    domain_id: u32,
    zone_count: u64,
    start_lba: u64,
) -> [u8; report::ACTIVATION_DESCRIPTOR_LEN] {
    let mut d = [0u8; report::ACTIVATION_DESCRIPTOR_LEN];
    d[0] = zone_type.as_wire();
    d[1] = cond.as_wire() << 4;
    d[2] = domain_id as u8;
    crate::codec::cpbe64(&mut d[8..16], zone_count);
    crate::codec::cpbe64(&mut d[16..24], start_lba);
    d
}

/// Activation results: one header, then two 24-byte descriptors per realm
/// rewrite (deactivate, then activate), for both ACTIVATE and QUERY (they
/// differ only in whether the zone rewrites were actually applied before
/// this is built). Per §4.8 step 5, descriptors are ordered by ascending
/// zone ID within each half: every deactivate descriptor precedes every
/// activate descriptor, rather than interleaving pairs per realm.
fn encode_activation_results(outcome: &crate::activate::Outcome, zones: &[crate::zone::Zone]) -> Vec<u8> {
    use crate::zone::{ZoneCondition, ZoneType};

    let deactivates: Vec<[u8; report::ACTIVATION_DESCRIPTOR_LEN]> = outcome
        .rewrites
        .iter()
        .filter_map(|r| {
            let zi = *r.old_zone_indices.first()?;
            let z = zones.get(zi as usize)?;
            Some(encode_descriptor(
                z.zone_type,
                ZoneCondition::Inactive,
                z.domain_id,
                r.old_zone_indices.len() as u64,
                z.start_lba,
            ))
        })
        .collect();
    let activates: Vec<[u8; report::ACTIVATION_DESCRIPTOR_LEN]> = outcome
        .rewrites
        .iter()
        .filter_map(|r| {
            let zi = *r.zone_indices.first()?;
            let z = zones.get(zi as usize)?;
            let cond = if r.new_zone_type == ZoneType::Conventional {
                ZoneCondition::NotWritePointer
            } else {
                ZoneCondition::Empty
            };
            Some(encode_descriptor(
                r.new_zone_type,
                cond,
                z.domain_id,
                r.zone_indices.len() as u64,
                z.start_lba,
            ))
        })
        .collect();

    let total_descriptors = deactivates.len() + activates.len();
    let mut buf = vec![0u8; report::ACTIVATION_RESULT_HEADER_LEN + total_descriptors * report::ACTIVATION_DESCRIPTOR_LEN];
    buf[8] = (outcome.activated as u8)
        | if outcome.ziwup.is_some() { 0x40 } else { 0 }
        | if outcome.nzp.is_some() { 0x80 } else { 0 };
    buf[9] = outcome.error_bits;
    if let Some(nzp) = outcome.nzp {
        crate::codec::cpbe32(&mut buf[16..20], nzp);
    }
    if let Some(ziwup) = outcome.ziwup {
        crate::codec::cpbe64(&mut buf[24..32], ziwup);
    }

    let mut off = report::ACTIVATION_RESULT_HEADER_LEN;
    for d in deactivates.iter().chain(activates.iter()) {
        buf[off..off + report::ACTIVATION_DESCRIPTOR_LEN].copy_from_slice(d);
        off += report::ACTIVATION_DESCRIPTOR_LEN;
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev() -> Device {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backing.img");
        std::mem::forget(dir);
        let cfgstring = format!(
            "dhsmr/type-HM_ZONED/model-SmrNoCmr/size-64M/zsize-1M/conv-1@{}",
            path.display()
        );
        Device::format(&cfgstring).unwrap()
    }

    #[test]
    fn unknown_opcode_rejected() {
        let mut d = dev();
        let res = dispatch(&mut d, &[0xFF], &[]);
        assert!(matches!(res.status, CommandStatus::CheckCondition(_)));
    }

    #[test]
    fn inquiry_reports_standard_data() {
        let mut d = dev();
        let cdb = [OP_INQUIRY, 0, 0, 0, 36, 0];
        let res = dispatch(&mut d, &cdb, &[]);
        assert_eq!(res.status, CommandStatus::Good);
        assert_eq!(res.data_in.len(), 36);
    }

    #[test]
    fn read_capacity_10_reports_block_size() {
        let mut d = dev();
        let cdb = [OP_READ_CAPACITY_10, 0, 0, 0, 0, 0, 0, 0, 0, 0];
        let res = dispatch(&mut d, &cdb, &[]);
        assert_eq!(u32::from_be_bytes(res.data_in[4..8].try_into().unwrap()), 512);
    }

    #[test]
    fn report_zones_service_action_returns_records() {
        let mut d = dev();
        let mut cdb = vec![OP_ZBC_IN, SA_REPORT_ZONES];
        cdb.extend_from_slice(&[0u8; 14]);
        let res = dispatch(&mut d, &cdb, &[]);
        assert_eq!(res.status, CommandStatus::Good);
        assert!(res.data_in.len() >= report::ZONE_RECORD_LEN);
    }

    #[test]
    fn report_zones_honors_alloc_len_and_options_byte() {
        let mut d = dev();
        let mut cdb = vec![OP_ZBC_IN, SA_REPORT_ZONES];
        cdb.extend_from_slice(&[0u8; 8]); // start LBA (BE64)
        cdb.extend_from_slice(&(report::ZONE_RECORD_LEN as u32).to_be_bytes()); // alloc_len: header only
        cdb.push(0x00); // reporting options: all zones
        cdb.push(0x00);
        let res = dispatch(&mut d, &cdb, &[]);
        assert_eq!(res.status, CommandStatus::Good);
        // alloc_len only has room for the header, so no records are emitted.
        assert_eq!(res.data_in.len(), report::ZONE_RECORD_LEN);
    }

    #[test]
    fn sequentialize_rejects_a_zone_that_is_not_sequential_write_preferred() {
        let mut d = dev();
        let zone_id = d.zones[0].start_lba;
        let mut cdb = vec![OP_ZBC_OUT, SA_SEQUENTIALIZE];
        cdb.extend_from_slice(&zone_id.to_be_bytes());
        cdb.extend_from_slice(&[0u8; 5]); // pad out to the ALL flag byte at index 14
        let res = dispatch(&mut d, &cdb, &[]);
        assert!(matches!(res.status, CommandStatus::CheckCondition(_)));
    }

    #[test]
    fn zone_activate_32_rejects_a_too_short_cdb() {
        let mut d = dev();
        let cdb = vec![OP_ZONE_ACTIVATE_32; 10];
        let res = dispatch(&mut d, &cdb, &[]);
        assert!(matches!(res.status, CommandStatus::CheckCondition(_)));
    }

    #[test]
    fn zone_activate_32_rejects_an_unknown_service_action() {
        let mut d = dev();
        let mut cdb = vec![0u8; 24];
        cdb[0] = OP_ZONE_ACTIVATE_32;
        cdb[8..10].copy_from_slice(&0x1234u16.to_be_bytes());
        let res = dispatch(&mut d, &cdb, &[]);
        assert!(matches!(res.status, CommandStatus::CheckCondition(_)));
    }

    #[test]
    fn zone_activate_32_query_reports_no_realms_when_none_requested() {
        let mut d = dev();
        let mut cdb = vec![0u8; 24];
        cdb[0] = OP_ZONE_ACTIVATE_32;
        cdb[8..10].copy_from_slice(&SA32_ZONE_QUERY.to_be_bytes());
        cdb[23] = 0x01; // ALL
        let res = dispatch(&mut d, &cdb, &[]);
        // This profile carries no realms, so even an ALL query has nothing
        // to target and the request is rejected rather than silently no-op.
        assert!(matches!(res.status, CommandStatus::CheckCondition(_)));
    }

    #[test]
    fn encode_activation_results_emits_a_deactivate_and_activate_descriptor_per_rewrite() {
        use crate::activate::{Outcome, RealmRewrite};
        use crate::zone::{Zone, ZoneType};

        let mut zones = vec![
            Zone::new_sequential(ZoneType::SequentialWriteRequired, 0, 256, 1),
            Zone::new_sequential(ZoneType::SequentialWriteRequired, 256, 256, 1),
            Zone::new_conventional(512, 256, 0),
        ];
        zones[0].domain_id = 1;
        zones[1].domain_id = 1;
        zones[2].domain_id = 0;

        let outcome = Outcome {
            activated: true,
            error_bits: 0,
            nzp: Some(7),
            ziwup: Some(42),
            rewrites: vec![RealmRewrite {
                realm_index: 0,
                new_zone_type: ZoneType::Conventional,
                zone_indices: vec![2],
                old_zone_indices: vec![0, 1],
            }],
        };
        let buf = encode_activation_results(&outcome, &zones);
        assert_eq!(
            buf.len(),
            report::ACTIVATION_RESULT_HEADER_LEN + 2 * report::ACTIVATION_DESCRIPTOR_LEN
        );
        assert_eq!(buf[8] & 0x40, 0x40, "ZIWUP_VALID bit should be set");
        assert_eq!(buf[8] & 0x80, 0x80, "NZP_VALID bit should be set");
        assert_eq!(u32::from_be_bytes(buf[16..20].try_into().unwrap()), 7);
        assert_eq!(u64::from_be_bytes(buf[24..32].try_into().unwrap()), 42);

        let deactivate = &buf[report::ACTIVATION_RESULT_HEADER_LEN..];
        assert_eq!(deactivate[0], ZoneType::SequentialWriteRequired.as_wire());
        assert_eq!(deactivate[1] >> 4, crate::zone::ZoneCondition::Inactive.as_wire());
        assert_eq!(deactivate[2], 1);
        assert_eq!(u64::from_be_bytes(deactivate[8..16].try_into().unwrap()), 2);
        assert_eq!(u64::from_be_bytes(deactivate[16..24].try_into().unwrap()), 0);

        let activate = &buf[report::ACTIVATION_RESULT_HEADER_LEN + report::ACTIVATION_DESCRIPTOR_LEN..];
        assert_eq!(activate[0], ZoneType::Conventional.as_wire());
        assert_eq!(activate[1] >> 4, crate::zone::ZoneCondition::NotWritePointer.as_wire());
        assert_eq!(activate[2], 0);
        assert_eq!(u64::from_be_bytes(activate[8..16].try_into().unwrap()), 1);
        assert_eq!(u64::from_be_bytes(activate[16..24].try_into().unwrap()), 512);
    }

    fn zd_dev() -> Device {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backing.img");
        std::mem::forget(dir);
        let cfgstring = format!(
            "dhsmr/type-ZONE_DOMAINS/model-ZdNoCmr/size-64M/zsize-1M/conv-1@{}",
            path.display()
        );
        Device::format(&cfgstring).unwrap()
    }

    fn zd_page(urswrz: bool, realms_enabled: bool, fsnoz: u32, max_activate: u32) -> Vec<u8> {
        let mut page = vec![0u8; 16];
        page[0] = mode_pages::PAGE_ZONE_DOMAINS | 0x40;
        page[1] = mode_pages::SUBPAGE_ZONE_DOMAINS;
        page[mode_pages::OFF_FLAGS] = (urswrz as u8) * mode_pages::FLAG_URSWRZ
            | (realms_enabled as u8) * mode_pages::FLAG_REALMS_ENABLED;
        crate::codec::cpbe16(&mut page[mode_pages::OFF_FSNOZ..mode_pages::OFF_FSNOZ + 2], fsnoz as u16);
        crate::codec::cpbe16(
            &mut page[mode_pages::OFF_MAX_ACTIVATE..mode_pages::OFF_MAX_ACTIVATE + 2],
            max_activate as u16,
        );
        page
    }

    #[test]
    fn mode_select_on_zd_page_applies_urswrz_fsnoz_and_max_activate() {
        let mut d = zd_dev();
        assert!(d.cfg.wp_check);
        let page = zd_page(true, true, 4, 9);
        let res = dispatch(&mut d, &[OP_MODE_SELECT_10], &page);
        assert_eq!(res.status, CommandStatus::Good);
        assert!(!d.cfg.wp_check, "URSWRZ set should clear wp_check");
        assert_eq!(d.cfg.fsnoz, 4);
        assert_eq!(d.cfg.max_activate, 9);
    }

    #[test]
    fn mode_select_rejects_urswrz_change_when_profile_has_no_ur_control() {
        let mut d = dev(); // HM_ZONED/SmrNoCmr: no_urswrz_control
        let page = zd_page(true, true, 1, 0);
        let res = dispatch(&mut d, &[OP_MODE_SELECT_10], &page);
        assert!(matches!(res.status, CommandStatus::CheckCondition(_)));
        assert!(d.cfg.wp_check, "rejected change must not mutate config");
    }

    #[test]
    fn mode_select_rejects_max_activate_change_when_profile_lacks_the_control() {
        let mut d = dev(); // HM_ZONED/SmrNoCmr: max_activate_control = false
        let page = zd_page(false, true, 1, 5);
        let res = dispatch(&mut d, &[OP_MODE_SELECT_10], &page);
        assert!(matches!(res.status, CommandStatus::CheckCondition(_)));
        assert_eq!(d.cfg.max_activate, 0);
    }

    #[test]
    fn mode_select_rejects_unrecognized_subpage() {
        let mut d = zd_dev();
        let mut page = zd_page(false, true, 1, 0);
        page[1] = 0xFF;
        let res = dispatch(&mut d, &[OP_MODE_SELECT_10], &page);
        assert!(matches!(res.status, CommandStatus::CheckCondition(_)));
    }
}
