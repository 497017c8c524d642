//! Cfgstring parser: turns a `dhsmr/option/.../option@path` option string
//! into a resolved [`DevConfig`]. A hand-written recursive-descent parser,
//! not a serde format — the grammar is the tcmu-runner cfgstring
//! convention, not a structured encoding.

use crate::error::{ZbcError, ZbcResult};
use crate::features::{self, FeatureProfile};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DevConfig {
    pub path: String,
    pub device_type: String,
    pub model: String,
    pub capacity_bytes: u64,
    pub block_size: u32,
    pub zone_size_bytes: u64,
    pub realm_size_bytes: u64,
    pub conventional_zone_count: u64,
    pub max_open_zones: u32,
    pub smr_gain_percent: u32,
    pub max_activate: u32,
    /// FSNOZ, the default realm count an activate/query request without
    /// NOZSRC uses. Not part of the cfgstring grammar — only MODE SELECT
    /// (§4.11) changes it after format.
    pub fsnoz: u32,
    pub wp_check: bool,
    pub realms_enabled: bool,
}

impl Default for DevConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            device_type: features::DeviceType::ZoneDomains.as_str().to_string(),
            model: "ZdSobrNoCmr".to_string(),
            capacity_bytes: 10u64 << 30,
            block_size: 512,
            zone_size_bytes: 256 << 20,
            realm_size_bytes: 2560 << 20,
            conventional_zone_count: 0,
            max_open_zones: 128,
            smr_gain_percent: 125,
            max_activate: 0,
            fsnoz: 1,
            wp_check: true,
            realms_enabled: true,
        }
    }
}

/// Parses `dhsmr/` followed by zero or more `/`-delimited, name-prefixed
/// options, then `@/backing/path`, applying each recognized option over
/// the defaults and requiring the final result to name a profile in
/// [`features::CATALOG`].
///
/// Grammar: `"dhsmr/" (option "/")* "@" path`.
pub fn parse(cfgstring: &str) -> ZbcResult<DevConfig> {
    let rest = cfgstring
        .strip_prefix("dhsmr/")
        .ok_or_else(|| ZbcError::Validation("cfgstring must start with 'dhsmr/'".into()))?;

    let (opts, path) = rest
        .rsplit_once('@')
        .ok_or_else(|| ZbcError::Validation("cfgstring missing '@path' suffix".into()))?;

    if path.is_empty() {
        return Err(ZbcError::Validation("cfgstring path is empty".into()));
    }

    let mut cfg = DevConfig {
        path: path.to_string(),
        ..DevConfig::default()
    };

    for token in opts.split('/') {
        if token.is_empty() {
            continue;
        }
        apply_option(&mut cfg, token)?;
    }

    let profile = resolve_profile(&cfg)?;
    validate(&cfg, profile)?;
    Ok(cfg)
}

/// Each branch is one of the grammar's name-prefixed options; the prefix
/// names and semantics are fixed by §4.2 of the spec. `size-` is a
/// pragmatic extension beyond the named option set — see DESIGN.md.
fn apply_option(cfg: &mut DevConfig, token: &str) -> ZbcResult<()> {
    if let Some(v) = token.strip_prefix("type-") {
        cfg.device_type = v.to_string();
    } else if let Some(v) = token.strip_prefix("model-") {
        cfg.model = v.to_string();
    } else if let Some(v) = token.strip_prefix("lba-") {
        cfg.block_size = v
            .parse()
            .map_err(|_| ZbcError::Validation(format!("bad lba- value: {v}")))?;
    } else if let Some(v) = token.strip_prefix("zsize-") {
        cfg.zone_size_bytes = parse_size(v)?;
    } else if let Some(v) = token.strip_prefix("conv-") {
        cfg.conventional_zone_count = v
            .parse()
            .map_err(|_| ZbcError::Validation(format!("bad conv- value: {v}")))?;
    } else if let Some(v) = token.strip_prefix("open-") {
        cfg.max_open_zones = v
            .parse()
            .map_err(|_| ZbcError::Validation(format!("bad open- value: {v}")))?;
    } else if let Some(v) = token.strip_prefix("rsize-") {
        cfg.realm_size_bytes = parse_size(v)?;
    } else if let Some(v) = token.strip_prefix("sgain-") {
        cfg.smr_gain_percent = v
            .parse()
            .map_err(|_| ZbcError::Validation(format!("bad sgain- value: {v}")))?;
    } else if let Some(v) = token.strip_prefix("maxact-") {
        cfg.max_activate = v
            .parse()
            .map_err(|_| ZbcError::Validation(format!("bad maxact- value: {v}")))?;
    } else if let Some(v) = token.strip_prefix("wpcheck-") {
        cfg.wp_check = parse_bool(v)?;
    } else if let Some(v) = token.strip_prefix("realms-") {
        cfg.realms_enabled = parse_bool(v)?;
    } else if let Some(v) = token.strip_prefix("size-") {
        cfg.capacity_bytes = parse_size(v)?;
    } else {
        return Err(ZbcError::Validation(format!("unrecognized cfgstring option: {token}")));
    }
    Ok(())
}

fn parse_bool(val: &str) -> ZbcResult<bool> {
    match val {
        "1" | "true" | "yes" => Ok(true),
        "0" | "false" | "no" => Ok(false),
        _ => Err(ZbcError::Validation(format!("bad boolean option: {val}"))),
    }
}

/// Accepts a bare byte count or a `<num><K|M|G|T>` suffix (binary units).
fn parse_size(val: &str) -> ZbcResult<u64> {
    let val = val.trim();
    let (num, mult) = match val.chars().last() {
        Some('K') | Some('k') => (&val[..val.len() - 1], 1u64 << 10),
        Some('M') | Some('m') => (&val[..val.len() - 1], 1u64 << 20),
        Some('G') | Some('g') => (&val[..val.len() - 1], 1u64 << 30),
        Some('T') | Some('t') => (&val[..val.len() - 1], 1u64 << 40),
        _ => (val, 1),
    };
    let n: u64 = num
        .parse()
        .map_err(|_| ZbcError::Validation(format!("bad size value: {val}")))?;
    Ok(n * mult)
}

/// Resolves the catalog row the config names: device-type plus model
/// select a row, not either field alone (§3.1).
pub fn resolve_profile(cfg: &DevConfig) -> ZbcResult<&'static FeatureProfile> {
    let device_type = features::DeviceType::parse(&cfg.device_type)
        .ok_or_else(|| ZbcError::Validation(format!("unknown device type: {}", cfg.device_type)))?;
    features::find_profile(device_type, &cfg.model)
        .ok_or_else(|| {
            ZbcError::Validation(format!(
                "unknown device profile: type={} model={}",
                cfg.device_type, cfg.model
            ))
        })
}

fn validate(cfg: &DevConfig, _profile: &FeatureProfile) -> ZbcResult<()> {
    if !cfg.zone_size_bytes.is_power_of_two() {
        return Err(ZbcError::Validation("zone_size must be a power of two".into()));
    }
    if cfg.block_size != 512 && cfg.block_size != 4096 {
        return Err(ZbcError::Validation("block_size must be 512 or 4096".into()));
    }
    if cfg.realms_enabled {
        if cfg.realm_size_bytes == 0 {
            return Err(ZbcError::Validation("realms enabled but realm_size is unset".into()));
        }
        if cfg.realm_size_bytes % cfg.zone_size_bytes != 0 {
            return Err(ZbcError::Validation("realm_size must be a multiple of zone_size".into()));
        }
        if cfg.realm_size_bytes < 2 * cfg.zone_size_bytes {
            return Err(ZbcError::Validation("realm_size must span at least two zones".into()));
        }
        if cfg.realm_size_bytes > cfg.capacity_bytes / 2 {
            return Err(ZbcError::Validation("realm_size exceeds half of device capacity".into()));
        }
    }
    if cfg.smr_gain_percent <= 100 {
        return Err(ZbcError::Validation("smr_gain must be greater than 100 percent".into()));
    }
    Ok(())
}
