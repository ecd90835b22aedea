//! Record types of the SAM-QFS archiver configuration.
//!
//! Every record that can be modified remotely carries a [`ChangeMask`].
//! Setters flag their field, `reset_*` withdraws the flag, and only the
//! flagged fields of a [`Patch`] are applied by the daemon.

use proxmox_schema::{const_regex, ApiStringFormat, Schema, StringSchema};

#[macro_use]
mod change_mask;
pub use change_mask::{ChangeFlags, ChangeMask, FlagInfo};

#[macro_use]
mod patch;
pub use patch::{MissingEntry, Patch, Tracked};

#[macro_use]
mod wire_enum;

mod protocol;
pub use protocol::ProtocolVersion;

mod human_byte;
pub use human_byte::FileSize;

mod interval;
pub use interval::Interval;

pub mod attr;
pub use attr::{AttrFlags, LegacyAttr, ReleaseAttr, StageAttr};

mod archive_copy;
pub use archive_copy::{ArchiveCopy, ArchiveCopyFlags};

mod copy_params;
pub use copy_params::*;

mod criteria;
pub use criteria::{CriteriaFlags, CriteriaKey, Criterion};

mod directive;
pub use directive::*;

mod archive_set;
pub use archive_set::{ArSetType, ArchiveSet, CopyName};

mod vsn;
pub use vsn::*;

mod archive_options;
pub use archive_options::ArchiveOptions;

/// Number of archive copies per file.
pub const MAX_COPIES: usize = 4;

/// File system name of criteria that belong to the global directive.
pub const GLOBAL: &str = "global properties";

/// Name of the pseudo set holding parameters for all sets.
pub const ALL_SETS: &str = "allsets";

/// Set name of criteria excluding files from archiving.
pub const NO_ARCHIVE: &str = "no_archive";

/// Longest pool name the daemon accepts.
pub const MAX_POOL_NAME_LEN: usize = 16;

const_regex! {
    pub SAM_NAME_REGEX = r"^[A-Za-z0-9_][A-Za-z0-9._\-]*$";
    pub VSN_NAME_REGEX = r"^[A-Za-z0-9!#$%&'()*+,\-./:;<=>?@\[\]^_]+$";
    pub MEDIA_TYPE_REGEX = r"^[a-z][a-z0-9]$";
}

pub const SAM_NAME_FORMAT: ApiStringFormat = ApiStringFormat::Pattern(&SAM_NAME_REGEX);
pub const VSN_NAME_FORMAT: ApiStringFormat = ApiStringFormat::Pattern(&VSN_NAME_REGEX);
pub const MEDIA_TYPE_FORMAT: ApiStringFormat = ApiStringFormat::Pattern(&MEDIA_TYPE_REGEX);

pub const VSN_POOL_NAME_SCHEMA: Schema = StringSchema::new("VSN pool name.")
    .format(&SAM_NAME_FORMAT)
    .min_length(1)
    .max_length(MAX_POOL_NAME_LEN)
    .schema();

pub const VSN_NAME_SCHEMA: Schema = StringSchema::new("Volume serial number.")
    .format(&VSN_NAME_FORMAT)
    .min_length(1)
    .max_length(31)
    .schema();

pub const MEDIA_TYPE_SCHEMA: Schema = StringSchema::new("Two letter media type (e.g. 'lt', 'dk').")
    .format(&MEDIA_TYPE_FORMAT)
    .schema();

pub const ARCHIVE_SET_NAME_SCHEMA: Schema = StringSchema::new("Archive set name.")
    .format(&SAM_NAME_FORMAT)
    .min_length(1)
    .max_length(29)
    .schema();

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn name_schemas() {
        assert!(VSN_POOL_NAME_SCHEMA.parse_simple_value("tapes_1").is_ok());
        assert!(VSN_POOL_NAME_SCHEMA.parse_simple_value("bad name").is_err());
        assert!(VSN_POOL_NAME_SCHEMA
            .parse_simple_value("abcdefghijklmnopq")
            .is_err());

        assert!(MEDIA_TYPE_SCHEMA.parse_simple_value("lt").is_ok());
        assert!(MEDIA_TYPE_SCHEMA.parse_simple_value("LTO").is_err());

        assert!(VSN_NAME_SCHEMA.parse_simple_value("VSN001").is_ok());
        assert!(ARCHIVE_SET_NAME_SCHEMA.parse_simple_value(ALL_SETS).is_ok());
    }
}
