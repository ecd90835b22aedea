use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

use sam_api_types::{
    CopyName, CopyParams, CriteriaKey, Criterion, FsDirective, GlobalDirective, Patch, Tracked,
    VsnMap, VsnPool, ALL_SETS, GLOBAL, NO_ARCHIVE,
};

use crate::ConfigError;

/// Complete archiver configuration of one daemon.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArchiverConfig {
    #[serde(default)]
    pub global: GlobalDirective,
    #[serde(default)]
    pub filesystems: Vec<FsDirective>,
    #[serde(default)]
    pub copy_params: Vec<CopyParams>,
    #[serde(default)]
    pub vsn_maps: Vec<VsnMap>,
    #[serde(default)]
    pub pools: Vec<VsnPool>,
}

impl ArchiverConfig {
    pub fn fs(&self, name: &str) -> Option<&FsDirective> {
        self.filesystems.iter().find(|fs| fs.fs_name() == name)
    }

    pub fn fs_mut(&mut self, name: &str) -> Option<&mut FsDirective> {
        self.filesystems.iter_mut().find(|fs| fs.fs_name() == name)
    }

    // copy parameters

    pub fn copy_params(&self, name: &str) -> Option<&CopyParams> {
        self.copy_params.iter().find(|p| p.name() == name)
    }

    pub fn copy_params_mut(&mut self, name: &str) -> Option<&mut CopyParams> {
        self.copy_params.iter_mut().find(|p| p.name() == name)
    }

    /// Adds `params`, replacing an entry of the same copy name.
    pub fn upsert_copy_params(&mut self, params: CopyParams) {
        match self.copy_params_mut(params.name()) {
            Some(existing) => *existing = params,
            None => self.copy_params.push(params),
        }
    }

    /// Set names that can carry copy parameters: archiving file systems,
    /// criteria sets and `allsets`.
    pub fn copy_param_names(&self) -> Vec<String> {
        let mut list: Vec<String> = vec![ALL_SETS.to_string()];
        list.extend(
            self.filesystems
                .iter()
                .filter(|fs| !fs.is_no_archive())
                .map(|fs| fs.fs_name().to_string()),
        );
        list.extend(
            self.criteria_names()
                .into_iter()
                .filter(|name| name != NO_ARCHIVE),
        );
        list.sort();
        list.dedup();
        list
    }

    // VSN maps

    pub fn vsn_map(&self, copy_name: &str) -> Option<&VsnMap> {
        self.vsn_maps.iter().find(|m| m.copy_name() == copy_name)
    }

    pub fn upsert_vsn_map(&mut self, map: VsnMap) -> Result<(), Error> {
        map.validate()?;
        match self.vsn_maps.iter_mut().find(|m| m.copy_name() == map.copy_name()) {
            Some(existing) => *existing = map,
            None => self.vsn_maps.push(map),
        }
        Ok(())
    }

    pub fn remove_vsn_map(&mut self, copy_name: &str) -> Result<(), Error> {
        let before = self.vsn_maps.len();
        self.vsn_maps.retain(|m| m.copy_name() != copy_name);
        if self.vsn_maps.len() == before {
            return Err(ConfigError::NotFound(format!("VSN map '{}'", copy_name)).into());
        }
        Ok(())
    }

    // pools

    pub fn pool(&self, name: &str) -> Option<&VsnPool> {
        self.pools.iter().find(|p| p.name() == name)
    }

    pub fn add_pool(&mut self, pool: VsnPool) -> Result<(), Error> {
        pool.validate()?;
        if self.pool(pool.name()).is_some() {
            return Err(ConfigError::AlreadyExists(format!("pool '{}'", pool.name())).into());
        }
        self.pools.push(pool);
        Ok(())
    }

    pub fn modify_pool(&mut self, pool: VsnPool) -> Result<(), Error> {
        pool.validate()?;
        match self.pools.iter_mut().find(|p| p.name() == pool.name()) {
            Some(existing) => *existing = pool,
            None => return Err(ConfigError::NotFound(format!("pool '{}'", pool.name())).into()),
        }
        Ok(())
    }

    /// The first copy whose VSN map references `pool`.
    pub fn pool_in_use(&self, pool: &str) -> Option<String> {
        self.vsn_maps
            .iter()
            .find(|m| m.uses_pool(pool))
            .map(|m| m.copy_name().to_string())
    }

    pub fn remove_pool(&mut self, name: &str) -> Result<(), Error> {
        if let Some(copy) = self.pool_in_use(name) {
            return Err(ConfigError::PoolInUse {
                pool: name.to_string(),
                copy,
            }
            .into());
        }
        let before = self.pools.len();
        self.pools.retain(|p| p.name() != name);
        if self.pools.len() == before {
            return Err(ConfigError::NotFound(format!("pool '{}'", name)).into());
        }
        Ok(())
    }

    // criteria

    /// All criteria, global ones first.
    pub fn all_criteria(&self) -> impl Iterator<Item = &Criterion> {
        self.global
            .criteria()
            .unwrap_or(&[])
            .iter()
            .chain(self.filesystems.iter().flat_map(|fs| fs.criteria().iter()))
    }

    /// The criteria list `fs_name` refers to; [`GLOBAL`] is the global
    /// directive.
    pub fn criteria_list_mut(&mut self, fs_name: &str) -> Result<&mut Vec<Criterion>, Error> {
        if fs_name == GLOBAL {
            return Ok(self.global.criteria_mut());
        }
        match self.fs_mut(fs_name) {
            Some(fs) => Ok(fs.criteria_mut()),
            None => Err(ConfigError::NotFound(format!("file system '{}'", fs_name)).into()),
        }
    }

    /// Distinct set names referenced by criteria, in order of appearance.
    pub fn criteria_names(&self) -> Vec<String> {
        let mut list: Vec<String> = Vec::new();
        for crit in self.all_criteria() {
            if !list.iter().any(|name| name == crit.ar_set_name()) {
                list.push(crit.ar_set_name().to_string());
            }
        }
        list
    }

    pub fn find_criterion(&self, fs_name: &str, set_name: &str, key: &CriteriaKey) -> Option<&Criterion> {
        self.all_criteria().find(|c| {
            c.fs_name() == fs_name && c.ar_set_name() == set_name && c.key() == Some(key)
        })
    }

    fn criterion_mut(
        &mut self,
        fs_name: &str,
        set_name: &str,
        key: &CriteriaKey,
    ) -> Result<&mut Criterion, Error> {
        let list = self.criteria_list_mut(fs_name)?;
        list.iter_mut()
            .find(|c| c.ar_set_name() == set_name && c.key() == Some(key))
            .ok_or_else(|| {
                ConfigError::NotFound(format!(
                    "criterion {} of set '{}' in '{}'",
                    key, set_name, fs_name
                ))
                .into()
            })
    }

    /// Applies the flagged fields of a criterion patch to the criterion
    /// with the same identity.
    pub fn modify_criterion(&mut self, patch: &Patch<Criterion>) -> Result<(), Error> {
        let crit = patch.record();
        let key = match crit.key() {
            Some(key) => key.clone(),
            None => bail!("criterion of set '{}' has no key", crit.ar_set_name()),
        };
        let target = self.criterion_mut(crit.fs_name(), crit.ar_set_name(), &key)?;
        patch.apply(target)
    }

    pub fn remove_criterion(&mut self, fs_name: &str, set_name: &str, key: &CriteriaKey) -> Result<(), Error> {
        let list = self.criteria_list_mut(fs_name)?;
        let before = list.len();
        list.retain(|c| !(c.ar_set_name() == set_name && c.key() == Some(key)));
        if list.len() == before {
            return Err(ConfigError::NotFound(format!(
                "criterion {} of set '{}' in '{}'",
                key, set_name, fs_name
            ))
            .into());
        }
        Ok(())
    }

    /// A key not used by any criterion yet.
    pub fn allocate_key(&self) -> Result<CriteriaKey, Error> {
        let last = self
            .all_criteria()
            .filter_map(|c| c.key())
            .filter_map(|k| <[u8; 8]>::try_from(k.as_bytes()).ok())
            .map(u64::from_be_bytes)
            .max()
            .unwrap_or(0);
        match last.checked_add(1) {
            Some(next) => Ok(CriteriaKey::new(&next.to_be_bytes())),
            None => bail!("criteria key space exhausted"),
        }
    }

    /// Adds `crit` to the list of its file system. The criterion keeps its
    /// key unless another criterion already uses it.
    pub fn add_criterion(&mut self, mut crit: Criterion) -> Result<CriteriaKey, Error> {
        let key = match crit.key() {
            Some(key) if self.all_criteria().all(|c| c.key() != Some(key)) => key.clone(),
            _ => self.allocate_key()?,
        };
        crit.assign_key(key.clone());
        crit.clear_changes();
        self.criteria_list_mut(crit.fs_name())?.push(crit);
        Ok(key)
    }

    /// Drops criteria, copy parameters and VSN maps of set `name`.
    /// Returns whether anything was removed.
    pub(crate) fn purge_set(&mut self, name: &str) -> bool {
        let mut removed = false;

        let mut lists: Vec<&mut Vec<Criterion>> = Vec::new();
        if self.global.criteria().is_some() {
            lists.push(self.global.criteria_mut());
        }
        lists.extend(self.filesystems.iter_mut().map(|fs| fs.criteria_mut()));
        for list in lists {
            let before = list.len();
            list.retain(|c| c.ar_set_name() != name);
            removed |= list.len() != before;
        }

        let belongs = |copy_name: &str| match copy_name.parse::<CopyName>() {
            Ok(copy) => copy.set == name,
            Err(_) => false,
        };

        let before = self.copy_params.len() + self.vsn_maps.len();
        self.copy_params.retain(|p| !belongs(p.name()));
        self.vsn_maps.retain(|m| !belongs(m.copy_name()));
        removed |= self.copy_params.len() + self.vsn_maps.len() != before;

        removed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sam_api_types::Interval;

    fn sample() -> Result<ArchiverConfig, Error> {
        let mut config = ArchiverConfig::default();
        config.filesystems.push(FsDirective::new("samfs1"));
        config.add_pool(VsnPool::new("tapes", "lt", vec!["VSN001".into()]))?;

        let mut map = VsnMap::new("images.1", "lt");
        map.set_pool_names(Some(vec!["tapes".into()]));
        config.upsert_vsn_map(map)?;

        config.add_criterion(Criterion::new("samfs1", "images"))?;
        config.add_criterion(Criterion::new(GLOBAL, "logs"))?;
        config.add_criterion(Criterion::new("samfs1", NO_ARCHIVE))?;
        Ok(config)
    }

    #[test]
    fn keys_are_unique() -> Result<(), Error> {
        let config = sample()?;
        let keys: Vec<_> = config.all_criteria().filter_map(|c| c.key()).collect();
        assert_eq!(keys.len(), 3);
        assert_ne!(keys[0], keys[1]);
        assert_ne!(keys[1], keys[2]);
        Ok(())
    }

    #[test]
    fn exhausted_key_space_is_an_error() -> Result<(), Error> {
        let mut config = ArchiverConfig::default();
        let mut crit = Criterion::new(GLOBAL, "images");
        crit.assign_key(CriteriaKey::new(&u64::MAX.to_be_bytes()));
        let key = config.add_criterion(crit)?;
        assert_eq!(key.as_bytes(), &[0xff; 8]);

        assert!(config.allocate_key().is_err());
        assert!(config.add_criterion(Criterion::new(GLOBAL, "logs")).is_err());
        assert_eq!(config.all_criteria().count(), 1);
        Ok(())
    }

    #[test]
    fn names() -> Result<(), Error> {
        let config = sample()?;
        assert_eq!(config.criteria_names(), vec!["logs", "images", NO_ARCHIVE]);
        assert_eq!(
            config.copy_param_names(),
            vec!["allsets", "images", "logs", "samfs1"]
        );
        Ok(())
    }

    #[test]
    fn pool_in_use_cannot_be_removed() -> Result<(), Error> {
        let mut config = sample()?;
        assert_eq!(config.pool_in_use("tapes").as_deref(), Some("images.1"));

        let err = config.remove_pool("tapes").unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigError>(),
            Some(&ConfigError::PoolInUse {
                pool: "tapes".into(),
                copy: "images.1".into()
            })
        );

        config.remove_vsn_map("images.1")?;
        config.remove_pool("tapes")?;
        assert!(config.pool("tapes").is_none());
        assert!(config.add_pool(VsnPool::new("this_name_is_too_long", "lt", Vec::new())).is_err());
        Ok(())
    }

    #[test]
    fn modify_criterion_by_identity() -> Result<(), Error> {
        let mut config = sample()?;
        let mut edit = config
            .all_criteria()
            .find(|c| c.ar_set_name() == "images")
            .cloned()
            .unwrap();
        edit.set_access(Interval::from_secs(86400));

        config.modify_criterion(&Patch::new(&edit))?;
        let key = edit.key().cloned().unwrap();
        let stored = config.find_criterion("samfs1", "images", &key).unwrap();
        assert_eq!(stored.access().as_secs(), 86400);
        assert!(!stored.is_dirty());

        config.remove_criterion("samfs1", "images", &key)?;
        assert!(config.find_criterion("samfs1", "images", &key).is_none());
        assert!(config.remove_criterion("samfs1", "images", &key).is_err());
        Ok(())
    }
}
