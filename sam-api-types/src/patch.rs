//! Dirty sets ready for submission

use std::fmt;

use anyhow::Error;

use crate::{ChangeFlags, ChangeMask, ProtocolVersion};

/// A record with per-field change tracking.
pub trait Tracked: Clone + fmt::Display {
    type Flags: ChangeFlags;

    fn change_mask(&self) -> &ChangeMask<Self::Flags>;

    fn change_mask_mut(&mut self) -> &mut ChangeMask<Self::Flags>;

    /// Copies every flagged field of `self` (and of nested records) into
    /// `target`. Unflagged fields of `target` keep their values.
    fn apply_changes(&self, target: &mut Self);

    /// Whether this record or any nested record has pending changes.
    fn is_dirty(&self) -> bool {
        self.change_mask().is_dirty()
    }

    /// Drops pending changes of this record and all nested records.
    fn clear_changes(&mut self) {
        self.change_mask_mut().clear();
    }

    /// Appends `prefix` + field name for every pending flag that a daemon
    /// speaking `version` does not know.
    fn collect_unsupported(&self, version: ProtocolVersion, prefix: &str, out: &mut Vec<String>) {
        for name in self.change_mask().unsupported_by(version) {
            out.push(format!("{}{}", prefix, name));
        }
    }

    /// Checks the values of the flagged fields.
    fn validate(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Fails with [`MissingEntry`] when a dirty nested entry has no
    /// counterpart in `target` that its changes could be applied to.
    fn check_target(&self, _target: &Self) -> Result<(), Error> {
        Ok(())
    }
}

/// A dirty nested entry of a patch has no counterpart in the target.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0} not found")]
pub struct MissingEntry(pub String);

/// Point-in-time copy of a record and its dirty set.
///
/// This is exactly what gets submitted: the daemon applies all flagged
/// fields of the patch as one unit, or none of them.
#[derive(Debug, Clone)]
pub struct Patch<R: Tracked> {
    record: R,
}

impl<R: Tracked> Patch<R> {
    pub fn new(record: &R) -> Self {
        Self {
            record: record.clone(),
        }
    }

    pub fn record(&self) -> &R {
        &self.record
    }

    pub fn changes(&self) -> &ChangeMask<R::Flags> {
        self.record.change_mask()
    }

    /// Names of the dirty top-level fields.
    pub fn changed_fields(&self) -> Vec<&'static str> {
        self.record.change_mask().names()
    }

    pub fn is_empty(&self) -> bool {
        !self.record.is_dirty()
    }

    /// Pending fields (nested ones included) a daemon speaking `version`
    /// cannot apply.
    pub fn unsupported_fields(&self, version: ProtocolVersion) -> Vec<String> {
        let mut list = Vec::new();
        self.record.collect_unsupported(version, "", &mut list);
        list
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.record.validate()
    }

    /// Applies the patch to `target`, or leaves `target` untouched if
    /// some dirty nested entry has nowhere to go.
    pub fn apply(&self, target: &mut R) -> Result<(), Error> {
        self.record.check_target(target)?;
        self.record.apply_changes(target);
        Ok(())
    }
}

impl<R: Tracked> fmt::Display for Patch<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "patch {} [{}]", self.record, self.record.change_mask())
    }
}

/// Copies the listed fields from `$src` to `$dst` when their flag is set.
macro_rules! apply_flagged {
    ($src:expr, $dst:expr, $flags:ty, { $($flag:ident => $field:ident),* $(,)? }) => {{
        let mask = $src.change_mask();
        $(
            if mask.is_set(<$flags>::$flag) {
                $dst.$field = $src.$field.clone();
            }
        )*
    }};
}

/// Applies dirty entries of a keyed list. Entries missing in `target`
/// are appended with their changes cleared.
pub(crate) fn apply_keyed<R, K, F>(src: &[R], target: &mut Vec<R>, key: F)
where
    R: Tracked,
    K: PartialEq,
    F: Fn(&R) -> K,
{
    for entry in src.iter().filter(|e| e.is_dirty()) {
        let wanted = key(entry);
        match target.iter_mut().find(|t| key(t) == wanted) {
            Some(existing) => entry.apply_changes(existing),
            None => {
                let mut added = entry.clone();
                added.clear_changes();
                target.push(added);
            }
        }
    }
}
