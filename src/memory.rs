//! In-process archiver daemon

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Error;

use sam_api_types::{
    parse_copy_utilization, ArchiveOptions, ArchiveSet, CatalogEntry, CopyParams, CopyUtilization,
    CriteriaKey, Criterion, DiskVolume, FileSize, FsDirective, GlobalDirective, Patch,
    ProtocolVersion, Tracked, VsnMap, VsnPool, VsnPoolProps,
};
use sam_config::{archive_sets, check_config, ArchiverConfig, ConfigError};

use crate::{ArchiverDaemon, ArchiverError};

/// Media type of disk archive volumes.
const DISK_MEDIA: &str = "dk";

struct State {
    config: ArchiverConfig,
    active: Option<ArchiverConfig>,
    next_job: u64,
}

/// A daemon that keeps its configuration in memory.
///
/// Every write runs on a scratch copy of the configuration which replaces
/// the current one only when the whole request succeeded. No archiving
/// takes place; archive requests just get a job id.
pub struct MemoryArchiver {
    version: ProtocolVersion,
    catalog: Vec<CatalogEntry>,
    disk_volumes: Vec<DiskVolume>,
    state: Mutex<State>,
}

impl MemoryArchiver {
    pub fn new(config: ArchiverConfig) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            catalog: Vec::new(),
            disk_volumes: Vec::new(),
            state: Mutex::new(State {
                config,
                active: None,
                next_job: 1,
            }),
        }
    }

    /// Loads the configuration from `path`, see [`sam_config::load_config`].
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let (config, _digest) = sam_config::load_config(path)?;
        Ok(Self::new(config))
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), Error> {
        let config = self.snapshot()?;
        sam_config::store_config(path, &config)
    }

    /// Pretends to be a daemon speaking `version`.
    pub fn with_protocol(mut self, version: ProtocolVersion) -> Self {
        self.version = version;
        self
    }

    pub fn with_catalog(mut self, catalog: Vec<CatalogEntry>) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_disk_volumes(mut self, volumes: Vec<DiskVolume>) -> Self {
        self.disk_volumes = volumes;
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, ArchiverError> {
        self.state.lock().map_err(|_| ArchiverError::Remote {
            code: -1,
            message: "archiver state lock poisoned".to_string(),
        })
    }

    /// Current configuration.
    pub fn snapshot(&self) -> Result<ArchiverConfig, ArchiverError> {
        Ok(self.state()?.config.clone())
    }

    /// Configuration of the last successful activation.
    pub fn active_config(&self) -> Result<Option<ArchiverConfig>, ArchiverError> {
        Ok(self.state()?.active.clone())
    }

    fn read<T, F>(&self, f: F) -> Result<T, ArchiverError>
    where
        F: FnOnce(&ArchiverConfig) -> Result<T, Error>,
    {
        let state = self.state()?;
        Ok(f(&state.config)?)
    }

    fn transact<T, F>(&self, f: F) -> Result<T, ArchiverError>
    where
        F: FnOnce(&mut ArchiverConfig) -> Result<T, Error>,
    {
        let mut state = self.state()?;
        let mut scratch = state.config.clone();
        let result = f(&mut scratch)?;
        state.config = scratch;
        Ok(result)
    }

    fn check_patch<R: Tracked>(&self, patch: &Patch<R>) -> Result<(), ArchiverError> {
        let fields = patch.unsupported_fields(self.version);
        if !fields.is_empty() {
            return Err(ArchiverError::ProtocolMismatch {
                version: self.version,
                fields,
            });
        }
        patch
            .validate()
            .map_err(|err| ArchiverError::Validation(format!("{:#}", err)))
    }

    fn check_set(&self, set: &ArchiveSet) -> Result<(), ArchiverError> {
        for crit in set.criteria().unwrap_or(&[]) {
            self.check_patch(&Patch::new(crit))?;
        }
        for params in set.all_copy_params() {
            self.check_patch(&Patch::new(params))?;
        }
        Ok(())
    }

    fn utilization_records(&self, config: &ArchiverConfig) -> Vec<String> {
        let mut list = Vec::new();
        for map in config.vsn_maps.iter() {
            let vsns = match map.resolve(&config.pools) {
                Ok(vsns) => vsns,
                Err(err) => {
                    log::warn!("{}", err);
                    continue;
                }
            };

            let (capacity, free) = if map.media_type() == DISK_MEDIA {
                self.disk_volumes
                    .iter()
                    .filter(|v| vsns.contains(&v.name))
                    .fold((0u64, 0u64), |(cap, free), v| {
                        (cap + v.capacity.as_u64(), free + v.free_space.as_u64())
                    })
            } else {
                self.catalog
                    .iter()
                    .filter(|e| e.media_type == map.media_type() && vsns.contains(&e.vsn))
                    .fold((0u64, 0u64), |(cap, free), e| {
                        (cap + e.capacity.as_u64(), free + e.free_space.as_u64())
                    })
            };
            let usage = if capacity == 0 {
                0
            } else {
                (capacity.saturating_sub(free) as u128 * 100 / capacity as u128) as u64
            };

            list.push(format!(
                "name={},type={},capacity={},free={},usage={}",
                map.copy_name(),
                map.media_type(),
                FileSize::new(capacity),
                FileSize::new(free),
                usage
            ));
        }
        list
    }
}

impl ArchiverDaemon for MemoryArchiver {
    fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    fn global_directive(&self) -> Result<GlobalDirective, ArchiverError> {
        self.read(|config| Ok(config.global.clone()))
    }

    fn set_global_directive(&self, patch: &Patch<GlobalDirective>) -> Result<(), ArchiverError> {
        self.check_patch(patch)?;
        self.transact(|config| patch.apply(&mut config.global))?;
        log::info!("updated global directive");
        Ok(())
    }

    fn fs_directives(&self) -> Result<Vec<FsDirective>, ArchiverError> {
        self.read(|config| Ok(config.filesystems.clone()))
    }

    fn fs_directive(&self, fs_name: &str) -> Result<FsDirective, ArchiverError> {
        self.read(|config| match config.fs(fs_name) {
            Some(fs) => Ok(fs.clone()),
            None => Err(ConfigError::NotFound(format!("file system '{}'", fs_name)).into()),
        })
    }

    fn set_fs_directive(&self, patch: &Patch<FsDirective>) -> Result<(), ArchiverError> {
        self.check_patch(patch)?;
        let fs_name = patch.record().fs_name();
        self.transact(|config| match config.fs_mut(fs_name) {
            Some(fs) => patch.apply(fs),
            None => Err(ConfigError::NotFound(format!("file system '{}'", fs_name)).into()),
        })?;
        log::info!("updated directive of file system '{}'", fs_name);
        Ok(())
    }

    fn archive_sets(&self) -> Result<Vec<ArchiveSet>, ArchiverError> {
        self.read(|config| Ok(archive_sets::archive_sets(config)))
    }

    fn archive_set(&self, name: &str) -> Result<ArchiveSet, ArchiverError> {
        self.read(|config| archive_sets::archive_set(config, name))
    }

    fn create_archive_set(&self, set: &ArchiveSet) -> Result<(), ArchiverError> {
        self.check_set(set)?;
        self.transact(|config| archive_sets::create_archive_set(config, set))
    }

    fn modify_archive_set(&self, set: &ArchiveSet) -> Result<(), ArchiverError> {
        self.check_set(set)?;
        self.transact(|config| archive_sets::modify_archive_set(config, set))
    }

    fn delete_archive_set(&self, name: &str) -> Result<(), ArchiverError> {
        self.transact(|config| archive_sets::delete_archive_set(config, name))
    }

    fn criteria_names(&self) -> Result<Vec<String>, ArchiverError> {
        self.read(|config| Ok(config.criteria_names()))
    }

    fn modify_criterion(&self, patch: &Patch<Criterion>) -> Result<(), ArchiverError> {
        self.check_patch(patch)?;
        self.transact(|config| config.modify_criterion(patch))
    }

    fn remove_criterion(
        &self,
        fs_name: &str,
        set_name: &str,
        key: &CriteriaKey,
    ) -> Result<(), ArchiverError> {
        self.transact(|config| config.remove_criterion(fs_name, set_name, key))
    }

    fn copy_params(&self) -> Result<Vec<CopyParams>, ArchiverError> {
        self.read(|config| Ok(config.copy_params.clone()))
    }

    fn copy_params_for(&self, copy_name: &str) -> Result<CopyParams, ArchiverError> {
        self.read(|config| match config.copy_params(copy_name) {
            Some(params) => Ok(params.clone()),
            None => Err(ConfigError::NotFound(format!("copy parameters '{}'", copy_name)).into()),
        })
    }

    fn set_copy_params(&self, patch: &Patch<CopyParams>) -> Result<(), ArchiverError> {
        self.check_patch(patch)?;
        let name = patch.record().name();
        self.transact(|config| {
            match config.copy_params_mut(name) {
                Some(params) => patch.apply(params)?,
                None => {
                    let mut params = CopyParams::new(name);
                    patch.apply(&mut params)?;
                    config.copy_params.push(params);
                }
            }
            Ok(())
        })?;
        log::info!("updated copy parameters '{}'", name);
        Ok(())
    }

    fn reset_copy_params(&self, copy_name: &str) -> Result<(), ArchiverError> {
        self.transact(|config| {
            let before = config.copy_params.len();
            config.copy_params.retain(|p| p.name() != copy_name);
            if config.copy_params.len() == before {
                return Err(
                    ConfigError::NotFound(format!("copy parameters '{}'", copy_name)).into(),
                );
            }
            Ok(())
        })
    }

    fn copy_param_names(&self) -> Result<Vec<String>, ArchiverError> {
        self.read(|config| Ok(config.copy_param_names()))
    }

    fn vsn_maps(&self) -> Result<Vec<VsnMap>, ArchiverError> {
        self.read(|config| Ok(config.vsn_maps.clone()))
    }

    fn set_vsn_map(&self, map: &VsnMap) -> Result<(), ArchiverError> {
        self.transact(|config| config.upsert_vsn_map(map.clone()))
    }

    fn remove_vsn_map(&self, copy_name: &str) -> Result<(), ArchiverError> {
        self.transact(|config| config.remove_vsn_map(copy_name))
    }

    fn vsn_pools(&self) -> Result<Vec<VsnPool>, ArchiverError> {
        self.read(|config| Ok(config.pools.clone()))
    }

    fn vsn_pool(&self, name: &str) -> Result<VsnPool, ArchiverError> {
        self.read(|config| match config.pool(name) {
            Some(pool) => Ok(pool.clone()),
            None => Err(ConfigError::NotFound(format!("pool '{}'", name)).into()),
        })
    }

    fn add_vsn_pool(&self, pool: &VsnPool) -> Result<(), ArchiverError> {
        self.transact(|config| config.add_pool(pool.clone()))
    }

    fn modify_vsn_pool(&self, pool: &VsnPool) -> Result<(), ArchiverError> {
        self.transact(|config| config.modify_pool(pool.clone()))
    }

    fn remove_vsn_pool(&self, name: &str) -> Result<(), ArchiverError> {
        self.transact(|config| config.remove_pool(name))
    }

    fn pool_in_use(&self, name: &str) -> Result<Option<String>, ArchiverError> {
        self.read(|config| Ok(config.pool_in_use(name)))
    }

    fn vsn_pool_props(&self, name: &str) -> Result<VsnPoolProps, ArchiverError> {
        let pool = self.vsn_pool(name)?;
        if pool.media_type() == DISK_MEDIA {
            Ok(VsnPoolProps::from_disk_volumes(&pool, &self.disk_volumes))
        } else {
            Ok(VsnPoolProps::from_catalog(&pool, &self.catalog))
        }
    }

    fn activate(&self) -> Result<(), ArchiverError> {
        let mut state = self.state()?;
        let report = check_config(&state.config);
        if !report.is_ok() {
            return Err(ArchiverError::InvalidConfig(report.errors));
        }

        state.active = Some(state.config.clone());
        log::info!("archiver configuration activated");

        if !report.warnings.is_empty() {
            return Err(ArchiverError::ConfigWarnings(report.warnings));
        }
        Ok(())
    }

    fn archive_files(
        &self,
        files: &[String],
        options: ArchiveOptions,
    ) -> Result<Option<String>, ArchiverError> {
        if files.is_empty() {
            return Err(ArchiverError::Validation("no files to archive".to_string()));
        }
        if options.contains(ArchiveOptions::DEFAULTS | ArchiveOptions::NEVER) {
            return Err(ArchiverError::Validation(
                "archive options 'defaults' and 'never' exclude each other".to_string(),
            ));
        }

        if !options.schedules_archiving() {
            log::info!("set archive options {:?} on {} file(s)", options, files.len());
            return Ok(None);
        }

        let mut state = self.state()?;
        let job_id = format!("archive.{}", state.next_job);
        state.next_job += 1;

        log::info!("job {}: archive {} file(s), copies {:?}", job_id, files.len(), options.copies());
        Ok(Some(job_id))
    }

    fn copy_utilization(&self, count: usize) -> Result<Vec<CopyUtilization>, ArchiverError> {
        let records = self.read(|config| Ok(self.utilization_records(config)))?;
        let mut list = parse_copy_utilization(&records)?;
        list.truncate(count);
        Ok(list)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sam_api_types::Interval;

    #[test]
    fn failed_transaction_leaves_config_alone() -> Result<(), Error> {
        let daemon = MemoryArchiver::new(ArchiverConfig::default());
        daemon.add_vsn_pool(&VsnPool::new("tapes", "lt", vec!["VSN001".into()]))?;

        let before = daemon.snapshot()?;
        let err = daemon
            .transact(|config| -> Result<(), Error> {
                config.pools.clear();
                anyhow::bail!("boom")
            })
            .unwrap_err();

        assert_eq!(err, ArchiverError::Validation("boom".into()));
        assert_eq!(daemon.snapshot()?, before);
        Ok(())
    }

    #[test]
    fn unknown_fs_is_not_found() {
        let daemon = MemoryArchiver::new(ArchiverConfig::default());
        let mut fs = FsDirective::new("samfs9");
        fs.set_fs_interval(Interval::from_secs(600));

        let err = daemon.set_fs_directive(&Patch::new(&fs)).unwrap_err();
        assert_eq!(err, ArchiverError::NotFound("file system 'samfs9'".into()));
    }
}
