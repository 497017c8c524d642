/// RECEIVE DIAGNOSTIC RESULTS (statistics log page) and the SANITIZE /
/// FORMAT UNIT reset path, both driven through the dispatcher.
#[path = "common/mod.rs"]
mod common;

use zbc_zdr_emu::dispatch::{self, CommandStatus};
use zbc_zdr_emu::stats;
use zbc_zdr_emu::zone::ZoneCondition;
use zbc_zdr_emu::Device;

#[test]
fn receive_diagnostic_results_reports_open_and_empty_zone_counts() {
    let scratch = common::scratch();
    let cfgstring = common::smr_no_cmr_cfgstring(&scratch, "64M", "1M");
    let mut dev = Device::format(&cfgstring).unwrap();
    let max_open = dev.budget.max_open_zones;
    let empty_before = dev.zones.iter().filter(|z| z.condition == ZoneCondition::Empty).count();

    let target = dev.zones[1].start_lba;
    dispatch::dispatch(&mut dev, &common::cdb::write_16(target, 4), &vec![0u8; 4 * 512]);

    let res = dispatch::dispatch(&mut dev, &common::cdb::receive_diagnostic_results(), &[]);
    assert_eq!(res.status, CommandStatus::Good);
    assert_eq!(res.data_in[0], stats::LOG_PAGE_CODE);
    assert_eq!(res.data_in[1], stats::LOG_SUBPAGE_CODE);

    let max_open_value = u32::from_be_bytes(res.data_in[12..16].try_into().unwrap());
    assert_eq!(max_open_value, max_open);

    let min_empty_off = 4 + 5 * stats::PARAMETER_LEN + 8;
    let min_empty_value = u32::from_be_bytes(res.data_in[min_empty_off..min_empty_off + 4].try_into().unwrap());
    assert_eq!(min_empty_value as usize, empty_before - 1);
}

#[test]
fn sanitize_and_format_unit_reset_zones_to_the_formatted_state() {
    let scratch = common::scratch();
    let cfgstring = common::smr_no_cmr_cfgstring(&scratch, "64M", "1M");
    let mut dev = Device::format(&cfgstring).unwrap();
    let target = dev.zones[1].start_lba;

    dispatch::dispatch(&mut dev, &common::cdb::write_16(target, 4), &vec![0u8; 4 * 512]);
    assert_ne!(dev.zones[1].condition, ZoneCondition::Empty);

    let res = dispatch::dispatch(&mut dev, &common::cdb::sanitize(), &[]);
    assert_eq!(res.status, CommandStatus::Good);
    assert_eq!(dev.zones[1].condition, ZoneCondition::Empty);
    assert_eq!(dev.zones[1].write_pointer, target);

    dispatch::dispatch(&mut dev, &common::cdb::write_16(target, 4), &vec![0u8; 4 * 512]);
    assert_ne!(dev.zones[1].condition, ZoneCondition::Empty);

    let res = dispatch::dispatch(&mut dev, &common::cdb::format_unit(), &[]);
    assert_eq!(res.status, CommandStatus::Good);
    assert_eq!(dev.zones[1].condition, ZoneCondition::Empty);
}
