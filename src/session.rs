//! Read, edit, submit

use sam_api_types::{
    ArchiveSet, CopyParams, Criterion, FsDirective, GlobalDirective, Patch, ProtocolVersion,
    Tracked,
};

use crate::{ArchiverDaemon, ArchiverError};

/// Gate between locally edited records and a daemon.
///
/// Every submission is checked against the daemon's protocol version
/// and validated before it is sent. Local change masks are cleared only
/// after the daemon accepted the patch, so a failed submit can be
/// corrected and retried as is.
pub struct EditSession<'a, D: ArchiverDaemon + ?Sized> {
    daemon: &'a D,
    version: ProtocolVersion,
}

impl<'a, D: ArchiverDaemon + ?Sized> EditSession<'a, D> {
    pub fn new(daemon: &'a D) -> Self {
        let version = daemon.protocol_version();
        log::debug!("edit session for archiver protocol {}", version);
        Self { daemon, version }
    }

    pub fn daemon(&self) -> &D {
        self.daemon
    }

    pub fn protocol_version(&self) -> ProtocolVersion {
        self.version
    }

    /// Builds the patch for `record` and checks that the daemon can take
    /// it.
    pub fn prepare<R: Tracked>(&self, record: &R) -> Result<Patch<R>, ArchiverError> {
        let patch = Patch::new(record);

        let fields = patch.unsupported_fields(self.version);
        if !fields.is_empty() {
            return Err(ArchiverError::ProtocolMismatch {
                version: self.version,
                fields,
            });
        }

        patch
            .validate()
            .map_err(|err| ArchiverError::Validation(format!("{:#}", err)))?;

        Ok(patch)
    }

    fn submit<R, F>(&self, record: &mut R, send: F) -> Result<bool, ArchiverError>
    where
        R: Tracked,
        F: FnOnce(&D, &Patch<R>) -> Result<(), ArchiverError>,
    {
        let patch = self.prepare(record)?;
        if patch.is_empty() {
            log::debug!("nothing to submit");
            return Ok(false);
        }

        log::debug!("submitting {}", patch);
        send(self.daemon, &patch)?;
        record.clear_changes();
        Ok(true)
    }

    /// Returns whether anything was sent.
    pub fn submit_global_directive(&self, record: &mut GlobalDirective) -> Result<bool, ArchiverError> {
        self.submit(record, |daemon, patch| daemon.set_global_directive(patch))
    }

    pub fn submit_fs_directive(&self, record: &mut FsDirective) -> Result<bool, ArchiverError> {
        self.submit(record, |daemon, patch| daemon.set_fs_directive(patch))
    }

    pub fn submit_criterion(&self, record: &mut Criterion) -> Result<bool, ArchiverError> {
        self.submit(record, |daemon, patch| daemon.modify_criterion(patch))
    }

    pub fn submit_copy_params(&self, record: &mut CopyParams) -> Result<bool, ArchiverError> {
        self.submit(record, |daemon, patch| daemon.set_copy_params(patch))
    }

    fn prepare_set(&self, set: &ArchiveSet) -> Result<(), ArchiverError> {
        for crit in set.criteria().unwrap_or(&[]) {
            self.prepare(crit)?;
        }
        for params in set.all_copy_params() {
            self.prepare(params)?;
        }
        for map in set.all_vsn_maps() {
            map.validate()
                .map_err(|err| ArchiverError::Validation(format!("{:#}", err)))?;
        }
        Ok(())
    }

    fn clear_set(set: &mut ArchiveSet) {
        if set.criteria().is_some() {
            for crit in set.criteria_mut().iter_mut() {
                crit.clear_changes();
            }
        }
        for copy in 1..=sam_api_types::MAX_COPIES as u8 {
            for rearchive in [false, true] {
                if let Some(params) = set.copy_params_mut(copy, rearchive) {
                    params.clear_changes();
                }
            }
        }
    }

    pub fn create_archive_set(&self, set: &mut ArchiveSet) -> Result<(), ArchiverError> {
        self.prepare_set(set)?;
        self.daemon.create_archive_set(set)?;
        Self::clear_set(set);
        Ok(())
    }

    pub fn modify_archive_set(&self, set: &mut ArchiveSet) -> Result<(), ArchiverError> {
        self.prepare_set(set)?;
        self.daemon.modify_archive_set(set)?;
        Self::clear_set(set);
        Ok(())
    }
}
