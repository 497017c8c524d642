//! Persistent on-disk metadata image: header layout, mmap lifecycle, and
//! the integrity checks run on every open.
//!
//! Generalizes the teacher's `io::mmap_engine` (a read-only/read-write mmap
//! pair keyed off `memmap2`) into a single mutable mapping the rest of the
//! engine mutates in place and periodically syncs to disk.

use std::fs::{File, OpenOptions};
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::{ZbcError, ZbcResult};

pub const MAGIC: u64 = 0x5A42_4344_5A44_5231; // "ZBCDZDR1"
pub const HEADER_LEN: usize = 4096;

/// Longest cfgstring the header can store verbatim. The fixed-field header
/// content is 88 bytes; this plus its 2-byte length prefix leaves ample
/// headroom before the zone array at `HEADER_LEN`.
pub const CFGSTRING_MAX_LEN: usize = 512;

/// The fixed-size header at offset 0 of the backing file. The zone/domain/
/// realm arrays follow immediately after, sized per [`crate::geometry`].
#[derive(Debug, Clone, Copy)]
pub struct MetaHeader {
    pub magic: u64,
    pub version: u32,
    pub capacity_bytes: u64,
    pub block_size: u32,
    pub zone_size_bytes: u64,
    pub realm_size_bytes: u64,
    pub nr_zones: u32,
    pub nr_domains: u32,
    pub nr_realms: u32,
    pub conventional_zone_count: u32,
    pub max_open_zones: u32,
    pub smr_gain_percent: u32,
    pub max_activate: u32,
    /// FSNOZ: the default "subsequent number of zones" activated when a
    /// ZONE ACTIVATE/QUERY request doesn't set NOZSRC. MODE SELECT-settable
    /// via the Zone Domains mode page (§4.11).
    pub fsnoz: u32,
    pub wp_check: bool,
    pub realms_enabled: bool,
    pub time_create: DateTime<Utc>,
    pub time_checked: DateTime<Utc>,
    /// The cfgstring this device was last formatted with, stored verbatim
    /// so `Device::open` can detect a changed cfgstring and trigger a
    /// reformat instead of trusting a stale image. Truncated to
    /// [`CFGSTRING_MAX_LEN`] bytes if longer (format-time cfgstrings are
    /// never anywhere near that long in practice).
    pub cfgstring: String,
}

impl MetaHeader {
    /// Serializes the header into the first `HEADER_LEN` bytes of the image.
    pub fn write_to(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_LEN);
        let mut off = 0;
        crate::codec::cpbe64(&mut buf[off..off + 8], self.magic);
        off += 8;
        crate::codec::cpbe32(&mut buf[off..off + 4], self.version);
        off += 4;
        crate::codec::cpbe64(&mut buf[off..off + 8], self.capacity_bytes);
        off += 8;
        crate::codec::cpbe32(&mut buf[off..off + 4], self.block_size);
        off += 4;
        crate::codec::cpbe64(&mut buf[off..off + 8], self.zone_size_bytes);
        off += 8;
        crate::codec::cpbe64(&mut buf[off..off + 8], self.realm_size_bytes);
        off += 8;
        crate::codec::cpbe32(&mut buf[off..off + 4], self.nr_zones);
        off += 4;
        crate::codec::cpbe32(&mut buf[off..off + 4], self.nr_domains);
        off += 4;
        crate::codec::cpbe32(&mut buf[off..off + 4], self.nr_realms);
        off += 4;
        crate::codec::cpbe32(&mut buf[off..off + 4], self.conventional_zone_count);
        off += 4;
        crate::codec::cpbe32(&mut buf[off..off + 4], self.max_open_zones);
        off += 4;
        crate::codec::cpbe32(&mut buf[off..off + 4], self.smr_gain_percent);
        off += 4;
        crate::codec::cpbe32(&mut buf[off..off + 4], self.max_activate);
        off += 4;
        crate::codec::cpbe32(&mut buf[off..off + 4], self.fsnoz);
        off += 4;
        buf[off] = self.wp_check as u8;
        off += 1;
        buf[off] = self.realms_enabled as u8;
        off += 1;
        off += 2; // reserved/alignment
        crate::codec::cpbe64(&mut buf[off..off + 8], self.time_create.timestamp() as u64);
        off += 8;
        crate::codec::cpbe64(&mut buf[off..off + 8], self.time_checked.timestamp() as u64);
        off += 8;

        let bytes = self.cfgstring.as_bytes();
        let len = bytes.len().min(CFGSTRING_MAX_LEN);
        crate::codec::cpbe16(&mut buf[off..off + 2], len as u16);
        off += 2;
        buf[off..off + len].copy_from_slice(&bytes[..len]);
    }

    pub fn read_from(buf: &[u8]) -> ZbcResult<Self> {
        if buf.len() < HEADER_LEN {
            return Err(ZbcError::Internal("metadata image shorter than header".into()));
        }
        let mut off = 0;
        let magic = crate::codec::rdbe64(&buf[off..off + 8]);
        off += 8;
        if magic != MAGIC {
            return Err(ZbcError::Validation("metadata image magic mismatch".into()));
        }
        let version = crate::codec::rdbe32(&buf[off..off + 4]);
        off += 4;
        let capacity_bytes = crate::codec::rdbe64(&buf[off..off + 8]);
        off += 8;
        let block_size = crate::codec::rdbe32(&buf[off..off + 4]);
        off += 4;
        let zone_size_bytes = crate::codec::rdbe64(&buf[off..off + 8]);
        off += 8;
        let realm_size_bytes = crate::codec::rdbe64(&buf[off..off + 8]);
        off += 8;
        let nr_zones = crate::codec::rdbe32(&buf[off..off + 4]);
        off += 4;
        let nr_domains = crate::codec::rdbe32(&buf[off..off + 4]);
        off += 4;
        let nr_realms = crate::codec::rdbe32(&buf[off..off + 4]);
        off += 4;
        let conventional_zone_count = crate::codec::rdbe32(&buf[off..off + 4]);
        off += 4;
        let max_open_zones = crate::codec::rdbe32(&buf[off..off + 4]);
        off += 4;
        let smr_gain_percent = crate::codec::rdbe32(&buf[off..off + 4]);
        off += 4;
        let max_activate = crate::codec::rdbe32(&buf[off..off + 4]);
        off += 4;
        let fsnoz = crate::codec::rdbe32(&buf[off..off + 4]);
        off += 4;
        let wp_check = buf[off] != 0;
        off += 1;
        let realms_enabled = buf[off] != 0;
        off += 1;
        off += 2;
        let time_create = DateTime::from_timestamp(crate::codec::rdbe64(&buf[off..off + 8]) as i64, 0)
            .ok_or_else(|| ZbcError::Internal("bad time_create in metadata image".into()))?;
        off += 8;
        let time_checked = DateTime::from_timestamp(crate::codec::rdbe64(&buf[off..off + 8]) as i64, 0)
            .ok_or_else(|| ZbcError::Internal("bad time_checked in metadata image".into()))?;
        off += 8;

        let cfg_len = (crate::codec::rdbe16(&buf[off..off + 2]) as usize).min(CFGSTRING_MAX_LEN);
        off += 2;
        let cfgstring = std::str::from_utf8(&buf[off..off + cfg_len])
            .map_err(|_| ZbcError::Internal("cfgstring in metadata image is not valid UTF-8".into()))?
            .to_string();

        Ok(Self {
            magic,
            version,
            capacity_bytes,
            block_size,
            zone_size_bytes,
            realm_size_bytes,
            nr_zones,
            nr_domains,
            nr_realms,
            conventional_zone_count,
            max_open_zones,
            smr_gain_percent,
            max_activate,
            fsnoz,
            wp_check,
            realms_enabled,
            time_create,
            time_checked,
            cfgstring,
        })
    }

    /// Cross-field sanity check run after every load, independent of the
    /// per-field decode above (mirrors the original handler's "meta OK?"
    /// pass that runs before trusting a reopened image). Numbered to match
    /// the validator steps this implements:
    /// 1. header sanity (magic/version/nonzero counts)
    /// 2. geometry sanity (block size, capacity is a multiple of it)
    /// 3. zone-count/domain-count/realm-count cross-consistency
    /// 4. realms-enabled implies a nonzero realm count
    pub fn validate(&self) -> ZbcResult<()> {
        if self.magic != MAGIC {
            return Err(ZbcError::Validation("metadata magic mismatch".into()));
        }
        if self.version == 0 {
            return Err(ZbcError::Validation("metadata version is zero".into()));
        }
        if self.nr_zones == 0 {
            return Err(ZbcError::Validation("metadata reports zero zones".into()));
        }
        if self.block_size != 512 && self.block_size != 4096 {
            return Err(ZbcError::Validation("metadata block_size out of range".into()));
        }
        if self.capacity_bytes % self.block_size as u64 != 0 {
            return Err(ZbcError::Validation(
                "metadata capacity_bytes is not a multiple of block_size".into(),
            ));
        }
        if self.conventional_zone_count as u32 > self.nr_zones {
            return Err(ZbcError::Validation(
                "metadata conventional_zone_count exceeds nr_zones".into(),
            ));
        }
        if self.nr_domains == 0 {
            return Err(ZbcError::Validation("metadata reports zero domains".into()));
        }
        if self.realms_enabled && self.nr_realms == 0 {
            return Err(ZbcError::Validation("realms enabled but nr_realms is zero".into()));
        }
        if !self.realms_enabled && self.nr_realms != 0 {
            return Err(ZbcError::Validation(
                "realms disabled but nr_realms is nonzero".into(),
            ));
        }
        Ok(())
    }

    /// §3.7/§4.4: a stored cfgstring that no longer matches the one the
    /// caller is opening with means the device's shape requirements have
    /// changed since the last format; the caller must reformat rather than
    /// trust this image.
    pub fn cfgstring_matches(&self, current: &str) -> bool {
        self.cfgstring == current
    }
}

/// §4.4's per-domain and per-realm validator passes, run in addition to
/// [`MetaHeader::validate`]'s header/geometry-level checks whenever the
/// domain/realm/zone tables are rebuilt from a reopened image.
///
/// 5. per-domain: valid domains don't overlap and span an integer number of
///    their own zones.
/// 6. per-realm: every realm has at least one valid activation target, each
///    valid target's zone range is backed by real zones in bounds, and the
///    realm's recorded `active_domain_id` is itself a valid target.
pub fn validate_domains_and_realms(
    domains: &[crate::domain::ZoneDomain],
    realms: &[crate::realm::ZoneRealm],
    zones: &[crate::zone::Zone],
) -> ZbcResult<()> {
    use crate::domain::DomainValid;

    for d in domains {
        if d.valid != DomainValid::Valid {
            continue;
        }
        if d.end_lba_exclusive < d.start_lba {
            return Err(ZbcError::Validation(format!(
                "domain {} has end_lba_exclusive before start_lba",
                d.id
            )));
        }
        match d.zone_size_lba() {
            Some(zc) if zc > 0 && (d.end_lba_exclusive - d.start_lba) % zc == 0 => {}
            _ => {
                return Err(ZbcError::Validation(format!(
                    "domain {} span is not an integer number of its own zones",
                    d.id
                )));
            }
        }
    }
    for (i, a) in domains.iter().enumerate() {
        if a.valid != DomainValid::Valid {
            continue;
        }
        for b in &domains[i + 1..] {
            if b.valid != DomainValid::Valid {
                continue;
            }
            if a.start_lba < b.end_lba_exclusive && b.start_lba < a.end_lba_exclusive {
                return Err(ZbcError::Validation(format!(
                    "domains {} and {} overlap",
                    a.id, b.id
                )));
            }
        }
    }

    for r in realms {
        let mut any_valid = false;
        for (domain_id, item) in r.items.iter().enumerate() {
            if !item.valid_target {
                continue;
            }
            any_valid = true;
            if item.first_zone_index == u32::MAX {
                return Err(ZbcError::Validation(format!(
                    "realm {} domain {domain_id} is a valid target with no backing zone",
                    r.number
                )));
            }
            let end = item.first_zone_index as usize + item.zone_count as usize;
            if end > zones.len() {
                return Err(ZbcError::Validation(format!(
                    "realm {} domain {domain_id} zone range exceeds the zone array",
                    r.number
                )));
            }
        }
        if !any_valid {
            return Err(ZbcError::Validation(format!(
                "realm {} has no valid activation targets",
                r.number
            )));
        }
        if !r
            .items
            .get(r.active_domain_id as usize)
            .map(|i| i.valid_target)
            .unwrap_or(false)
        {
            return Err(ZbcError::Validation(format!(
                "realm {} active_domain_id does not name a valid target",
                r.number
            )));
        }
    }
    Ok(())
}

/// Owns the backing file and its mutable mapping. `msync(MS_SYNC |
/// MS_INVALIDATE)` is the only durability primitive used; there is no
/// write-ahead log, matching the engine's stated non-goals.
pub struct MetaImage {
    file: File,
    map: memmap2::MmapMut,
}

impl MetaImage {
    /// Opens (creating if absent) the backing file and truncates/extends it
    /// to `total_len` bytes, then maps it read-write.
    pub fn open_or_create(path: &Path, total_len: u64) -> ZbcResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        ftruncate(&file, total_len)?;
        let map = unsafe { memmap2::MmapMut::map_mut(&file)? };
        Ok(Self { file, map })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map[..]
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map[..]
    }

    pub fn header(&self) -> ZbcResult<MetaHeader> {
        MetaHeader::read_from(&self.map[..HEADER_LEN])
    }

    pub fn write_header(&mut self, header: &MetaHeader) {
        header.write_to(&mut self.map[..HEADER_LEN]);
    }

    /// Flushes the mapping to disk and asks the kernel to drop cached pages
    /// so a subsequent read observes the synced copy, per `msync(MS_SYNC |
    /// MS_INVALIDATE)`.
    pub fn sync(&self) -> ZbcResult<()> {
        sync_invalidate(&self.map)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(target_os = "linux")]
fn sync_invalidate(map: &memmap2::MmapMut) -> ZbcResult<()> {
    let rc = unsafe {
        libc::msync(
            map.as_ptr() as *mut libc::c_void,
            map.len(),
            libc::MS_SYNC | libc::MS_INVALIDATE,
        )
    };
    if rc != 0 {
        return Err(ZbcError::Internal(format!(
            "msync failed: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn sync_invalidate(map: &memmap2::MmapMut) -> ZbcResult<()> {
    map.flush().map_err(ZbcError::from)
}

#[cfg(unix)]
fn ftruncate(file: &File, len: u64) -> ZbcResult<()> {
    use std::os::unix::io::AsFd;
    nix::unistd::ftruncate(file.as_fd(), len as i64)
        .map_err(|e| ZbcError::Internal(format!("ftruncate failed: {e}")))
}

#[cfg(not(unix))]
fn ftruncate(file: &File, len: u64) -> ZbcResult<()> {
    file.set_len(len).map_err(ZbcError::from)
}
