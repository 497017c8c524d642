/// Exercises the basic device lifecycle end to end: FORMAT UNIT, a WRITE
/// that advances a zone's write pointer, SYNCHRONIZE CACHE to flush the
/// metadata image to the backing file, then a fresh `Device::open` of the
/// same path to confirm the zone state round trips through the mmap image.
#[path = "common/mod.rs"]
mod common;

use zbc_zdr_emu::dispatch::{self, CommandStatus};
use zbc_zdr_emu::zone::ZoneCondition;
use zbc_zdr_emu::Device;

#[test]
fn write_then_reopen_preserves_zone_state() {
    let scratch = common::scratch();
    let cfgstring = common::smr_no_cmr_cfgstring(&scratch, "64M", "1M");

    let mut dev = Device::format(&cfgstring).unwrap();
    let target = dev.zones[1].start_lba;

    let res = dispatch::dispatch(&mut dev, &common::cdb::write_16(target, 8), &vec![0u8; 8 * 512]);
    assert_eq!(res.status, CommandStatus::Good);
    assert_eq!(dev.zones[1].condition, ZoneCondition::ImplicitlyOpen);
    assert_eq!(dev.zones[1].write_pointer, target + 8);

    let res = dispatch::dispatch(&mut dev, &[dispatch::OP_SYNCHRONIZE_CACHE_10, 0, 0, 0, 0, 0, 0, 0, 0, 0], &[]);
    assert_eq!(res.status, CommandStatus::Good);
    drop(dev);

    let reopened = Device::open(&cfgstring).unwrap();
    assert_eq!(reopened.zones[1].condition, ZoneCondition::ImplicitlyOpen);
    assert_eq!(reopened.zones[1].write_pointer, target + 8);
    assert_eq!(reopened.zones.len(), reopened.geometry.total_zone_count() as usize);
}
