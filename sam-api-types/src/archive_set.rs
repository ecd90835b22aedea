//! Archive sets and copy names

use std::fmt;

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use crate::{CopyParams, Criterion, Tracked, VsnMap, MAX_COPIES};

wire_enum! {
    /// Kind of an archive set, numbered as in the daemon header.
    pub enum ArSetType {
        /// Per file system default set.
        Default = 0,
        General = 1,
        NoArchive = 2,
        /// The `allsets` view; carries parameters only.
        AllSetsPseudo = 3,
        /// No criteria route to this set.
        Unassigned = 4,
        /// Fallback set used when no other criterion matches.
        ExplicitDefault = 5,
    }
}

/// Name of one archive copy: `<set>.<n>` or `<set>.<n>R` for the
/// rearchive pass.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CopyName {
    pub set: String,
    /// 1 based copy number.
    pub copy: u8,
    pub rearchive: bool,
}

impl CopyName {
    pub fn new(set: &str, copy: u8, rearchive: bool) -> Self {
        Self {
            set: set.to_string(),
            copy,
            rearchive,
        }
    }

    fn slot(&self) -> usize {
        self.copy as usize - 1
    }
}

impl fmt::Display for CopyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.set, self.copy)?;
        if self.rearchive {
            write!(f, "R")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for CopyName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (set, suffix) = s
            .rsplit_once('.')
            .ok_or_else(|| format_err!("invalid copy name '{}' - expected 'set.N'", s))?;

        if set.is_empty() {
            bail!("invalid copy name '{}' - empty set name", s);
        }

        let (number, rearchive) = match suffix.strip_suffix('R') {
            Some(number) => (number, true),
            None => (suffix, false),
        };

        let copy: u8 = match number.parse() {
            Ok(n) if n >= 1 && n as usize <= MAX_COPIES => n,
            _ => bail!("invalid copy number in '{}' - must be between 1 and {}", s, MAX_COPIES),
        };

        Ok(Self::new(set, copy, rearchive))
    }
}

proxmox_serde::forward_deserialize_to_from_str!(CopyName);
proxmox_serde::forward_serialize_to_display!(CopyName);

/// A named archive set with its criteria, copy parameters and VSN maps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArchiveSet {
    name: String,
    set_type: ArSetType,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    criteria: Option<Vec<Criterion>>,
    copy_params: [Option<CopyParams>; MAX_COPIES],
    rearch_params: [Option<CopyParams>; MAX_COPIES],
    vsn_maps: [Option<VsnMap>; MAX_COPIES],
    rearch_maps: [Option<VsnMap>; MAX_COPIES],
}

impl ArchiveSet {
    pub fn new(name: &str, set_type: ArSetType) -> Self {
        Self {
            name: name.to_string(),
            set_type,
            criteria: None,
            copy_params: Default::default(),
            rearch_params: Default::default(),
            vsn_maps: Default::default(),
            rearch_maps: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_type(&self) -> ArSetType {
        self.set_type
    }

    pub fn set_set_type(&mut self, set_type: ArSetType) {
        self.set_type = set_type;
    }

    /// `None` for sets without a criteria list (the `allsets` view).
    pub fn criteria(&self) -> Option<&[Criterion]> {
        self.criteria.as_deref()
    }

    pub fn set_criteria(&mut self, criteria: Option<Vec<Criterion>>) {
        self.criteria = criteria;
    }

    pub fn criteria_mut(&mut self) -> &mut Vec<Criterion> {
        self.criteria.get_or_insert_with(Vec::new)
    }

    fn own_copy(&self, name: &str) -> Result<CopyName, Error> {
        let copy: CopyName = name.parse()?;
        if copy.set != self.name {
            bail!("copy '{}' does not belong to archive set '{}'", name, self.name);
        }
        Ok(copy)
    }

    /// Copy parameters of copy `copy` (1 based).
    pub fn copy_params(&self, copy: u8, rearchive: bool) -> Option<&CopyParams> {
        let list = if rearchive { &self.rearch_params } else { &self.copy_params };
        list.get((copy as usize).wrapping_sub(1))?.as_ref()
    }

    pub fn copy_params_mut(&mut self, copy: u8, rearchive: bool) -> Option<&mut CopyParams> {
        let list = if rearchive { &mut self.rearch_params } else { &mut self.copy_params };
        list.get_mut((copy as usize).wrapping_sub(1))?.as_mut()
    }

    /// Stores `params` in the slot named by its copy name.
    pub fn set_copy_params(&mut self, params: CopyParams) -> Result<(), Error> {
        let copy = self.own_copy(params.name())?;
        let list = if copy.rearchive { &mut self.rearch_params } else { &mut self.copy_params };
        list[copy.slot()] = Some(params);
        Ok(())
    }

    pub fn all_copy_params(&self) -> impl Iterator<Item = &CopyParams> {
        self.copy_params
            .iter()
            .chain(self.rearch_params.iter())
            .flatten()
    }

    pub fn vsn_map(&self, copy: u8, rearchive: bool) -> Option<&VsnMap> {
        let list = if rearchive { &self.rearch_maps } else { &self.vsn_maps };
        list.get((copy as usize).wrapping_sub(1))?.as_ref()
    }

    pub fn set_vsn_map(&mut self, map: VsnMap) -> Result<(), Error> {
        let copy = self.own_copy(map.copy_name())?;
        let list = if copy.rearchive { &mut self.rearch_maps } else { &mut self.vsn_maps };
        list[copy.slot()] = Some(map);
        Ok(())
    }

    pub fn all_vsn_maps(&self) -> impl Iterator<Item = &VsnMap> {
        self.vsn_maps.iter().chain(self.rearch_maps.iter()).flatten()
    }

    /// Copy numbers in use by the set's criteria.
    pub fn copy_numbers(&self) -> Vec<u8> {
        let mut list: Vec<u8> = self
            .criteria()
            .unwrap_or(&[])
            .iter()
            .flat_map(|crit| crit.copies().map(|c| c.copy_seq()))
            .collect();
        list.sort_unstable();
        list.dedup();
        list
    }
}

impl fmt::Display for ArchiveSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "name={} type={} criteria=", self.name, self.set_type)?;
        match &self.criteria {
            Some(criteria) => write!(f, "{}", criteria.len())?,
            None => write!(f, "-")?,
        }
        write!(f, " params=[")?;
        for (i, params) in self.all_copy_params().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} change={}", params.name(), params.change_mask())?;
        }
        write!(f, "] maps=[")?;
        for (i, map) in self.all_vsn_maps().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", map)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unassigned_set_with_empty_criteria() -> Result<(), Error> {
        let mut set = ArchiveSet::new("spare", ArSetType::Unassigned);
        set.set_criteria(Some(Vec::new()));

        assert_eq!(set.criteria().map(|c| c.len()), Some(0));
        assert_eq!(set.set_type(), ArSetType::Unassigned);
        assert_eq!(ArSetType::try_from(set.set_type().code())?, ArSetType::Unassigned);
        assert_eq!(set.set_type().code(), 4);
        Ok(())
    }

    #[test]
    fn set_type_numbering() {
        let all = [
            ArSetType::Default,
            ArSetType::General,
            ArSetType::NoArchive,
            ArSetType::AllSetsPseudo,
            ArSetType::Unassigned,
            ArSetType::ExplicitDefault,
        ];
        for (code, set_type) in all.iter().enumerate() {
            assert_eq!(set_type.code(), code as i32);
        }
        assert!(ArSetType::try_from(6).is_err());
    }

    #[test]
    fn copy_names() -> Result<(), Error> {
        let name: CopyName = "images.2R".parse()?;
        assert_eq!(name, CopyName::new("images", 2, true));
        assert_eq!(name.to_string(), "images.2R");

        let name: CopyName = "my.set.1".parse()?;
        assert_eq!(name.set, "my.set");

        assert!("images.0".parse::<CopyName>().is_err());
        assert!("images.5".parse::<CopyName>().is_err());
        assert!("images".parse::<CopyName>().is_err());
        assert!(".1".parse::<CopyName>().is_err());
        Ok(())
    }

    #[test]
    fn copy_name_as_json_string() -> Result<(), Error> {
        let name: CopyName = serde_json::from_str("\"images.3R\"")?;
        assert_eq!(name, CopyName::new("images", 3, true));
        assert_eq!(serde_json::to_string(&name)?, "\"images.3R\"");
        assert!(serde_json::from_str::<CopyName>("\"images.9\"").is_err());
        Ok(())
    }

    #[test]
    fn params_land_in_named_slot() -> Result<(), Error> {
        let mut set = ArchiveSet::new("images", ArSetType::General);
        set.set_copy_params(CopyParams::new("images.2"))?;
        set.set_copy_params(CopyParams::new("images.1R"))?;

        assert!(set.copy_params(2, false).is_some());
        assert!(set.copy_params(1, false).is_none());
        assert!(set.copy_params(1, true).is_some());
        assert!(set.copy_params(0, false).is_none());
        assert!(set.set_copy_params(CopyParams::new("other.1")).is_err());

        if let Some(params) = set.copy_params_mut(2, false) {
            params.set_drives(2);
        }
        assert!(set.copy_params(2, false).map(|p| p.is_dirty()).unwrap_or(false));
        Ok(())
    }
}
