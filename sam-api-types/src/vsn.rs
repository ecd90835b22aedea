//! VSN pools, VSN maps and pool utilization

use std::fmt;

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use crate::{FileSize, MEDIA_TYPE_SCHEMA, VSN_NAME_SCHEMA, VSN_POOL_NAME_SCHEMA};

/// A named group of volumes of one media type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VsnPool {
    name: String,
    media_type: String,
    vsns: Vec<String>,
}

impl VsnPool {
    pub fn new(name: &str, media_type: &str, vsns: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            media_type: media_type.to_string(),
            vsns,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn vsns(&self) -> &[String] {
        &self.vsns
    }

    pub fn set_vsns(&mut self, vsns: Vec<String>) {
        self.vsns = vsns;
    }

    pub fn is_empty(&self) -> bool {
        self.vsns.is_empty()
    }

    pub fn validate(&self) -> Result<(), Error> {
        VSN_POOL_NAME_SCHEMA
            .parse_simple_value(&self.name)
            .map_err(|err| format_err!("invalid pool name '{}' - {}", self.name, err))?;
        MEDIA_TYPE_SCHEMA.parse_simple_value(&self.media_type)?;
        for vsn in self.vsns.iter() {
            VSN_NAME_SCHEMA
                .parse_simple_value(vsn)
                .map_err(|err| format_err!("pool '{}': invalid VSN '{}' - {}", self.name, vsn, err))?;
        }
        Ok(())
    }
}

impl fmt::Display for VsnPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name={} media={} vsns=[{}]",
            self.name,
            self.media_type,
            self.vsns.join(" ")
        )
    }
}

/// Where the volumes of a copy come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapSource<'a> {
    Vsns(&'a [String]),
    Pools(&'a [String]),
    Empty,
}

/// Media binding of one archive copy.
///
/// Lists both volumes and pools. When a map carries both, the explicit
/// VSN list wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VsnMap {
    copy_name: String,
    media_type: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    vsn_names: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pool_names: Option<Vec<String>>,
}

impl VsnMap {
    pub fn new(copy_name: &str, media_type: &str) -> Self {
        Self {
            copy_name: copy_name.to_string(),
            media_type: media_type.to_string(),
            vsn_names: None,
            pool_names: None,
        }
    }

    pub fn copy_name(&self) -> &str {
        &self.copy_name
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn set_media_type(&mut self, media_type: &str) {
        self.media_type = media_type.to_string();
    }

    pub fn vsn_names(&self) -> &[String] {
        self.vsn_names.as_deref().unwrap_or(&[])
    }

    pub fn set_vsn_names(&mut self, names: Option<Vec<String>>) {
        self.vsn_names = names;
    }

    pub fn pool_names(&self) -> &[String] {
        self.pool_names.as_deref().unwrap_or(&[])
    }

    pub fn set_pool_names(&mut self, names: Option<Vec<String>>) {
        self.pool_names = names;
    }

    /// True if neither volumes nor pools are listed.
    pub fn is_empty(&self) -> bool {
        self.vsn_names().is_empty() && self.pool_names().is_empty()
    }

    pub fn uses_pool(&self, pool: &str) -> bool {
        self.pool_names().iter().any(|p| p == pool)
    }

    pub fn source(&self) -> MapSource<'_> {
        if !self.vsn_names().is_empty() {
            MapSource::Vsns(self.vsn_names())
        } else if !self.pool_names().is_empty() {
            MapSource::Pools(self.pool_names())
        } else {
            MapSource::Empty
        }
    }

    /// Expands the map to volume names.
    pub fn resolve(&self, pools: &[VsnPool]) -> Result<Vec<String>, Error> {
        match self.source() {
            MapSource::Vsns(vsns) => Ok(vsns.to_vec()),
            MapSource::Pools(names) => {
                let mut list = Vec::new();
                for name in names {
                    let pool = pools
                        .iter()
                        .find(|p| p.name() == name)
                        .ok_or_else(|| format_err!("copy '{}': no such pool '{}'", self.copy_name, name))?;
                    list.extend(pool.vsns().iter().cloned());
                }
                Ok(list)
            }
            MapSource::Empty => Ok(Vec::new()),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.copy_name.parse::<crate::CopyName>()?;
        MEDIA_TYPE_SCHEMA.parse_simple_value(&self.media_type)?;
        for pool in self.pool_names() {
            VSN_POOL_NAME_SCHEMA
                .parse_simple_value(pool)
                .map_err(|err| format_err!("invalid pool name '{}' - {}", pool, err))?;
        }
        Ok(())
    }
}

impl fmt::Display for VsnMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "copy={} media={} vsns=[{}] pools=[{}]",
            self.copy_name,
            self.media_type,
            self.vsn_names().join(" "),
            self.pool_names().join(" ")
        )
    }
}

/// Capacity summary shared by all pool snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BaseVsnPoolProps {
    pub name: String,
    pub media_type: String,
    pub capacity: FileSize,
    pub free_space: FileSize,
    pub vsn_count: usize,
}

impl BaseVsnPoolProps {
    /// Used space in percent, 0 for pools without capacity.
    pub fn usage_percent(&self) -> u8 {
        let capacity = self.capacity.as_u64();
        if capacity == 0 {
            return 0;
        }
        let used = capacity.saturating_sub(self.free_space.as_u64());
        ((used as u128 * 100) / capacity as u128) as u8
    }
}

/// One tape volume as recorded in a library catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CatalogEntry {
    pub vsn: String,
    pub media_type: String,
    pub lib_name: String,
    pub slot: u32,
    pub capacity: FileSize,
    pub free_space: FileSize,
}

/// A disk archiving volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DiskVolume {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub host: Option<String>,
    pub path: String,
    pub capacity: FileSize,
    pub free_space: FileSize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", tag = "kind", content = "members")]
pub enum PoolMembers {
    Tape(Vec<CatalogEntry>),
    Disk(Vec<DiskVolume>),
}

/// Utilization snapshot of a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct VsnPoolProps {
    #[serde(flatten)]
    pub base: BaseVsnPoolProps,
    pub members: PoolMembers,
}

impl VsnPoolProps {
    /// Summarizes the catalog entries of the pool's volumes. VSNs missing
    /// in the catalog do not count.
    pub fn from_catalog(pool: &VsnPool, catalog: &[CatalogEntry]) -> Self {
        let entries: Vec<CatalogEntry> = catalog
            .iter()
            .filter(|e| pool.vsns().contains(&e.vsn))
            .cloned()
            .collect();

        let (capacity, free) = entries.iter().fold((0u64, 0u64), |(cap, free), e| {
            (
                cap.saturating_add(e.capacity.as_u64()),
                free.saturating_add(e.free_space.as_u64()),
            )
        });

        Self {
            base: BaseVsnPoolProps {
                name: pool.name().to_string(),
                media_type: pool.media_type().to_string(),
                capacity: FileSize::new(capacity),
                free_space: FileSize::new(free),
                vsn_count: entries.len(),
            },
            members: PoolMembers::Tape(entries),
        }
    }

    pub fn from_disk_volumes(pool: &VsnPool, volumes: &[DiskVolume]) -> Self {
        let members: Vec<DiskVolume> = volumes
            .iter()
            .filter(|v| pool.vsns().contains(&v.name))
            .cloned()
            .collect();

        let (capacity, free) = members.iter().fold((0u64, 0u64), |(cap, free), v| {
            (
                cap.saturating_add(v.capacity.as_u64()),
                free.saturating_add(v.free_space.as_u64()),
            )
        });

        Self {
            base: BaseVsnPoolProps {
                name: pool.name().to_string(),
                media_type: pool.media_type().to_string(),
                capacity: FileSize::new(capacity),
                free_space: FileSize::new(free),
                vsn_count: members.len(),
            },
            members: PoolMembers::Disk(members),
        }
    }

    pub fn is_disk(&self) -> bool {
        matches!(self.members, PoolMembers::Disk(_))
    }
}

impl fmt::Display for VsnPoolProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pool={} media={} capacity={} free={} vsns={} usage={}%",
            self.base.name,
            self.base.media_type,
            self.base.capacity.human(),
            self.base.free_space.human(),
            self.base.vsn_count,
            self.base.usage_percent()
        )
    }
}

/// Media usage of one archive copy as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CopyUtilization {
    pub name: String,
    pub media_type: String,
    pub capacity: FileSize,
    pub free: FileSize,
    pub usage: u8,
}

impl std::str::FromStr for CopyUtilization {
    type Err = Error;

    /// Parses `name=..,type=..,capacity=..,free=..,usage=..`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut name = None;
        let mut media_type = None;
        let mut capacity = None;
        let mut free = None;
        let mut usage = None;

        for part in s.split(',') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| format_err!("invalid utilization entry '{}'", part))?;
            let value = value.trim();
            match key.trim() {
                "name" => name = Some(value.to_string()),
                "type" => media_type = Some(value.to_string()),
                "capacity" => capacity = Some(value.parse::<FileSize>()?),
                "free" => free = Some(value.parse::<FileSize>()?),
                "usage" => {
                    let percent: u8 = value
                        .parse()
                        .map_err(|err| format_err!("invalid usage '{}' - {}", value, err))?;
                    if percent > 100 {
                        bail!("usage {} out of range", percent);
                    }
                    usage = Some(percent);
                }
                _ => log::debug!("ignoring unknown utilization key '{}'", key),
            }
        }

        match (name, media_type, capacity, free, usage) {
            (Some(name), Some(media_type), Some(capacity), Some(free), Some(usage)) => Ok(Self {
                name,
                media_type,
                capacity,
                free,
                usage,
            }),
            _ => bail!("incomplete utilization record '{}'", s),
        }
    }
}

/// Parses a list of utilization records, most used copy first.
pub fn parse_copy_utilization<S: AsRef<str>>(records: &[S]) -> Result<Vec<CopyUtilization>, Error> {
    let mut list = records
        .iter()
        .map(|r| r.as_ref().parse())
        .collect::<Result<Vec<CopyUtilization>, Error>>()?;
    list.sort_by(|a, b| b.usage.cmp(&a.usage).then_with(|| a.name.cmp(&b.name)));
    Ok(list)
}
