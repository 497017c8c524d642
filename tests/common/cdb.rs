/// CDB builders mirroring the byte layouts `dispatch::dispatch` parses, so
/// the scenario tests drive the handler the same way the host framework's
/// CDB dequeue would.
use zbc_zdr_emu::dispatch;

pub fn read_16(lba: u64, len: u32) -> Vec<u8> {
    let mut cdb = vec![0u8; 16];
    cdb[0] = dispatch::OP_READ_16;
    cdb[2..10].copy_from_slice(&lba.to_be_bytes());
    cdb[10..14].copy_from_slice(&len.to_be_bytes());
    cdb
}

pub fn write_16(lba: u64, len: u32) -> Vec<u8> {
    let mut cdb = vec![0u8; 16];
    cdb[0] = dispatch::OP_WRITE_16;
    cdb[2..10].copy_from_slice(&lba.to_be_bytes());
    cdb[10..14].copy_from_slice(&len.to_be_bytes());
    cdb
}

pub fn zbc_in(service_action: u8, zone_id: u64, target_domain_id: u8, all: bool) -> Vec<u8> {
    let mut cdb = vec![0u8; 16];
    cdb[0] = dispatch::OP_ZBC_IN;
    cdb[1] = service_action & 0x1F;
    cdb[2..10].copy_from_slice(&zone_id.to_be_bytes());
    cdb[13] = target_domain_id;
    if all {
        cdb[14] |= 0x01;
    }
    cdb
}

pub fn zbc_out(service_action: u8, zone_id: u64, target_domain_id: u8, all: bool) -> Vec<u8> {
    let mut cdb = vec![0u8; 16];
    cdb[0] = dispatch::OP_ZBC_OUT;
    cdb[1] = service_action & 0x1F;
    cdb[2..10].copy_from_slice(&zone_id.to_be_bytes());
    cdb[13] = target_domain_id;
    if all {
        cdb[14] |= 0x01;
    }
    cdb
}

pub fn sanitize() -> Vec<u8> {
    vec![dispatch::OP_SANITIZE, 0, 0, 0, 0, 0, 0, 0, 0, 0]
}

pub fn format_unit() -> Vec<u8> {
    vec![dispatch::OP_FORMAT_UNIT, 0, 0, 0, 0, 0]
}

pub fn receive_diagnostic_results() -> Vec<u8> {
    vec![dispatch::OP_RECEIVE_DIAGNOSTIC_RESULTS, 0, 0, 0, 0, 0, 0, 0, 0, 0]
}
