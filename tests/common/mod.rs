/// Shared scaffolding for the integration tests: a scratch backing file plus
/// the cfgstring builders used to exercise each device shape.
use tempfile::TempDir;

pub mod cdb;

/// Owns the temp directory so it isn't dropped (and the backing file
/// deleted) before the test is done with it.
pub struct Scratch {
    _dir: TempDir,
    pub path: std::path::PathBuf,
}

pub fn scratch() -> Scratch {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("backing.img");
    Scratch { _dir: dir, path }
}

pub fn smr_no_cmr_cfgstring(scratch: &Scratch, dev_size: &str, zone_size: &str) -> String {
    format!(
        "dhsmr/type-HM_ZONED/model-SmrNoCmr/size-{dev_size}/zsize-{zone_size}/conv-1@{}",
        scratch.path.display()
    )
}

pub fn realm_cfgstring(scratch: &Scratch) -> String {
    format!(
        "dhsmr/type-ZONE_DOMAINS/model-Zd1CmrBottom/size-64M/zsize-1M/conv-0/realms-1/rsize-2M@{}",
        scratch.path.display()
    )
}

pub fn zone_domains_cfgstring(scratch: &Scratch) -> String {
    format!(
        "dhsmr/type-ZONE_DOMAINS/model-ZdNoCmr/size-64M/zsize-1M@{}",
        scratch.path.display()
    )
}
