//! The remote configuration boundary
//!
//! Everything an archiver daemon offers to a management client. Reads
//! return point-in-time snapshots; writes take a [`Patch`] whose flagged
//! fields are applied as one unit, or not at all.

use sam_api_types::{
    ArchiveOptions, ArchiveSet, CopyParams, CopyUtilization, CriteriaKey, Criterion, FsDirective,
    GlobalDirective, Patch, ProtocolVersion, VsnMap, VsnPool, VsnPoolProps,
};

use crate::ArchiverError;

pub trait ArchiverDaemon {
    /// Protocol version spoken by the daemon.
    fn protocol_version(&self) -> ProtocolVersion;

    // directives

    fn global_directive(&self) -> Result<GlobalDirective, ArchiverError>;

    fn set_global_directive(&self, patch: &Patch<GlobalDirective>) -> Result<(), ArchiverError>;

    fn fs_directives(&self) -> Result<Vec<FsDirective>, ArchiverError>;

    fn fs_directive(&self, fs_name: &str) -> Result<FsDirective, ArchiverError>;

    fn set_fs_directive(&self, patch: &Patch<FsDirective>) -> Result<(), ArchiverError>;

    // archive sets and criteria

    fn archive_sets(&self) -> Result<Vec<ArchiveSet>, ArchiverError>;

    fn archive_set(&self, name: &str) -> Result<ArchiveSet, ArchiverError>;

    fn create_archive_set(&self, set: &ArchiveSet) -> Result<(), ArchiverError>;

    fn modify_archive_set(&self, set: &ArchiveSet) -> Result<(), ArchiverError>;

    fn delete_archive_set(&self, name: &str) -> Result<(), ArchiverError>;

    /// Distinct set names used by criteria, `no_archive` included.
    fn criteria_names(&self) -> Result<Vec<String>, ArchiverError>;

    /// Applies the flagged fields to the criterion with the same file
    /// system, set name and key.
    fn modify_criterion(&self, patch: &Patch<Criterion>) -> Result<(), ArchiverError>;

    fn remove_criterion(
        &self,
        fs_name: &str,
        set_name: &str,
        key: &CriteriaKey,
    ) -> Result<(), ArchiverError>;

    // copy parameters and VSN maps

    fn copy_params(&self) -> Result<Vec<CopyParams>, ArchiverError>;

    fn copy_params_for(&self, copy_name: &str) -> Result<CopyParams, ArchiverError>;

    /// Applies the flagged fields. Parameters for a copy without any yet
    /// start out empty.
    fn set_copy_params(&self, patch: &Patch<CopyParams>) -> Result<(), ArchiverError>;

    fn reset_copy_params(&self, copy_name: &str) -> Result<(), ArchiverError>;

    /// Set names that may carry copy parameters.
    fn copy_param_names(&self) -> Result<Vec<String>, ArchiverError>;

    fn vsn_maps(&self) -> Result<Vec<VsnMap>, ArchiverError>;

    fn set_vsn_map(&self, map: &VsnMap) -> Result<(), ArchiverError>;

    fn remove_vsn_map(&self, copy_name: &str) -> Result<(), ArchiverError>;

    // pools

    fn vsn_pools(&self) -> Result<Vec<VsnPool>, ArchiverError>;

    fn vsn_pool(&self, name: &str) -> Result<VsnPool, ArchiverError>;

    fn add_vsn_pool(&self, pool: &VsnPool) -> Result<(), ArchiverError>;

    fn modify_vsn_pool(&self, pool: &VsnPool) -> Result<(), ArchiverError>;

    fn remove_vsn_pool(&self, name: &str) -> Result<(), ArchiverError>;

    /// Copy name of the first VSN map referencing `name`.
    fn pool_in_use(&self, name: &str) -> Result<Option<String>, ArchiverError>;

    fn vsn_pool_props(&self, name: &str) -> Result<VsnPoolProps, ArchiverError>;

    // operations

    /// Checks and activates the configuration.
    ///
    /// Fails with [`ArchiverError::InvalidConfig`] without activating, or
    /// with [`ArchiverError::ConfigWarnings`] after activating.
    fn activate(&self) -> Result<(), ArchiverError>;

    /// Archives `files` or only sets their archive options. Returns the
    /// job id when archiving was scheduled.
    fn archive_files(
        &self,
        files: &[String],
        options: ArchiveOptions,
    ) -> Result<Option<String>, ArchiverError>;

    /// Media usage of the `count` most used copies.
    fn copy_utilization(&self, count: usize) -> Result<Vec<CopyUtilization>, ArchiverError>;
}
