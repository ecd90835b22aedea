//! File selection criteria (`ar_set_criteria_t`)
//!
//! A criterion binds a file pattern of one file system to an archive set
//! and to up to four archive copies.
//!
//! Identity is the opaque key handed out by the daemon. Setters do not
//! touch the key, so after a local edit the key still describes the rule
//! as it was read. Compare edited criteria with [`Criterion::same_as`]
//! only after they have been submitted and read back.

use std::fmt;

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use crate::archive_copy::{apply_copy_slots, check_copy_slots, fill_copy_slots};
use crate::attr::{
    AttrFlags, LegacyAttr, ReleaseAttr, StageAttr, AMBIGUOUS_ATTR, RELEASE_NOT_DEFINED,
    STAGE_NOT_DEFINED,
};
use crate::human_byte::opt_size;
use crate::{ArchiveCopy, ChangeMask, FileSize, Interval, ProtocolVersion, Tracked, MAX_COPIES};

change_flags! {
    /// Change flags of [`Criterion`].
    pub struct CriteriaFlags: u64 = "ar_set_criteria" {
        const PATH = 0x0000_0001, "path", V4_2;
        const MINSIZE = 0x0000_0002, "minsize", V4_2;
        const MAXSIZE = 0x0000_0004, "maxsize", V4_2;
        const NAME = 0x0000_0008, "name", V4_2;
        const USER = 0x0000_0010, "user", V4_2;
        const GROUP = 0x0000_0020, "group", V4_2;
        const RELEASE = 0x0000_0040, "release", V4_2;
        const STAGE = 0x0000_0080, "stage", V4_2;
        const ACCESS = 0x0000_0100, "access", V4_2;
        const NFTV = 0x0000_0200, "nftv", V4_2;
        const AFTER = 0x0000_0400, "after", V4_5;
    }
    status {
        /// Set by the daemon on criteria that form an explicit default set.
        const DEFAULT_CRITERIA = 0x0000_4000, "default_criteria";
    }
}

/// Opaque criterion identity as produced by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CriteriaKey(Vec<u8>);

impl CriteriaKey {
    pub fn new(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for CriteriaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl std::str::FromStr for CriteriaKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|err| format_err!("invalid criteria key - {}", err))?;
        if bytes.is_empty() {
            bail!("empty criteria key");
        }
        Ok(Self(bytes))
    }
}

proxmox_serde::forward_deserialize_to_from_str!(CriteriaKey);
proxmox_serde::forward_serialize_to_display!(CriteriaKey);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Criterion {
    fs_name: String,
    set_name: String,
    path: String,
    minsize: Option<FileSize>,
    maxsize: Option<FileSize>,
    name: String,
    user: String,
    group: String,
    release: char,
    stage: char,
    access: Interval,
    nftv: bool,
    after: String,
    attr_flags: i32,
    partial_size: i32,
    copies: [Option<ArchiveCopy>; MAX_COPIES],
    #[serde(skip_serializing_if = "Option::is_none", default)]
    key: Option<CriteriaKey>,
    change_flag: ChangeMask<CriteriaFlags>,
}

impl Criterion {
    /// An empty rule of file system `fs_name` routing to `set_name`.
    pub fn new(fs_name: &str, set_name: &str) -> Self {
        Self {
            fs_name: fs_name.to_string(),
            set_name: set_name.to_string(),
            path: String::new(),
            minsize: None,
            maxsize: None,
            name: String::new(),
            user: String::new(),
            group: String::new(),
            release: RELEASE_NOT_DEFINED,
            stage: STAGE_NOT_DEFINED,
            access: Interval::default(),
            nftv: false,
            after: String::new(),
            attr_flags: 0,
            partial_size: 0,
            copies: Default::default(),
            key: None,
            change_flag: ChangeMask::new(),
        }
    }

    /// Like [`Criterion::new`], with copies filled in order.
    pub fn with_copies(fs_name: &str, set_name: &str, copies: Vec<ArchiveCopy>) -> Result<Self, Error> {
        let mut crit = Self::new(fs_name, set_name);
        crit.set_copies(copies)?;
        Ok(crit)
    }

    pub fn fs_name(&self) -> &str {
        &self.fs_name
    }

    /// Moves the rule to another file system. The key is kept.
    pub fn set_fs_name(&mut self, fs_name: &str) {
        self.fs_name = fs_name.to_string();
    }

    pub fn ar_set_name(&self) -> &str {
        &self.set_name
    }

    pub fn set_ar_set_name(&mut self, set_name: &str) {
        self.set_name = set_name.to_string();
    }

    pub fn key(&self) -> Option<&CriteriaKey> {
        self.key.as_ref()
    }

    /// Installs the identity handed out by the daemon.
    pub fn assign_key(&mut self, key: CriteriaKey) {
        self.key = Some(key);
    }

    /// Same rule as `other`, judged by key only.
    ///
    /// The file system name does not take part. A criterion without a key
    /// is never the same as anything.
    pub fn same_as(&self, other: &Criterion) -> bool {
        match (&self.key, &other.key) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn is_default_criteria(&self) -> bool {
        self.change_flag.is_set(CriteriaFlags::DEFAULT_CRITERIA)
    }

    pub fn mark_default_criteria(&mut self, on: bool) {
        self.change_flag.assign(CriteriaFlags::DEFAULT_CRITERIA, on);
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path(&mut self, path: &str) {
        self.path = path.to_string();
        self.change_flag.set(CriteriaFlags::PATH);
    }

    pub fn reset_path(&mut self) {
        self.change_flag.reset(CriteriaFlags::PATH);
    }

    pub fn minsize(&self) -> Option<FileSize> {
        self.minsize
    }

    pub fn set_minsize(&mut self, size: Option<FileSize>) {
        self.minsize = size;
        self.change_flag.set(CriteriaFlags::MINSIZE);
    }

    pub fn reset_minsize(&mut self) {
        self.change_flag.reset(CriteriaFlags::MINSIZE);
    }

    pub fn maxsize(&self) -> Option<FileSize> {
        self.maxsize
    }

    pub fn set_maxsize(&mut self, size: Option<FileSize>) {
        self.maxsize = size;
        self.change_flag.set(CriteriaFlags::MAXSIZE);
    }

    pub fn reset_maxsize(&mut self) {
        self.change_flag.reset(CriteriaFlags::MAXSIZE);
    }

    /// File name regular expression.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name_pattern(&mut self, pattern: &str) {
        self.name = pattern.to_string();
        self.change_flag.set(CriteriaFlags::NAME);
    }

    pub fn reset_name_pattern(&mut self) {
        self.change_flag.reset(CriteriaFlags::NAME);
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn set_user(&mut self, user: &str) {
        self.user = user.to_string();
        self.change_flag.set(CriteriaFlags::USER);
    }

    pub fn reset_user(&mut self) {
        self.change_flag.reset(CriteriaFlags::USER);
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn set_group(&mut self, group: &str) {
        self.group = group.to_string();
        self.change_flag.set(CriteriaFlags::GROUP);
    }

    pub fn reset_group(&mut self) {
        self.change_flag.reset(CriteriaFlags::GROUP);
    }

    pub fn access(&self) -> Interval {
        self.access
    }

    pub fn set_access(&mut self, age: Interval) {
        self.access = age;
        self.change_flag.set(CriteriaFlags::ACCESS);
    }

    pub fn reset_access(&mut self) {
        self.change_flag.reset(CriteriaFlags::ACCESS);
    }

    /// Skip the access time test for files in the file system's
    /// non-file-time-volatile area.
    pub fn nftv(&self) -> bool {
        self.nftv
    }

    pub fn set_nftv(&mut self, nftv: bool) {
        self.nftv = nftv;
        self.change_flag.set(CriteriaFlags::NFTV);
    }

    pub fn reset_nftv(&mut self) {
        self.change_flag.reset(CriteriaFlags::NFTV);
    }

    /// Only files modified after this RFC 3339 time stamp match.
    pub fn after(&self) -> &str {
        &self.after
    }

    pub fn set_after(&mut self, after: &str) {
        self.after = after.to_string();
        self.change_flag.set(CriteriaFlags::AFTER);
    }

    pub fn reset_after(&mut self) {
        self.change_flag.reset(CriteriaFlags::AFTER);
    }

    pub fn num_copies(&self) -> usize {
        self.copies.iter().filter(|c| c.is_some()).count()
    }

    pub fn copies(&self) -> impl Iterator<Item = &ArchiveCopy> {
        self.copies.iter().flatten()
    }

    /// The copy with number `copy_seq`.
    pub fn copy(&self, copy_seq: u8) -> Option<&ArchiveCopy> {
        self.copies().find(|c| c.copy_seq() == copy_seq)
    }

    pub fn copy_mut(&mut self, copy_seq: u8) -> Option<&mut ArchiveCopy> {
        self.copies
            .iter_mut()
            .flatten()
            .find(|c| c.copy_seq() == copy_seq)
    }

    /// Replaces all copies. At most [`MAX_COPIES`] are accepted.
    pub fn set_copies(&mut self, copies: Vec<ArchiveCopy>) -> Result<(), Error> {
        fill_copy_slots(&mut self.copies, copies)
    }

    pub fn attr_flags(&self) -> AttrFlags {
        AttrFlags::from_bits_truncate(self.attr_flags)
    }

    /// The release bits of the attribute set.
    pub fn release_attrs(&self) -> AttrFlags {
        self.attr_flags() & AttrFlags::RELEASE_ATTR_SET
    }

    /// Replaces the release attribute bits with `flags`.
    ///
    /// Stage bits are kept. The legacy release character follows the
    /// new bits: one bit gives its character, several give `'Z'`. With
    /// no bit at all the character goes back to "not defined" and the
    /// release flag is left alone.
    pub fn set_release_attrs(&mut self, flags: AttrFlags, partial_size: i32) {
        let new = flags & AttrFlags::RELEASE_ATTR_SET;
        self.attr_flags = ((self.attr_flags() - AttrFlags::RELEASE_ATTR_SET) | new).bits();

        if new.contains(AttrFlags::PARTIAL_SIZE) {
            self.partial_size = partial_size;
        }

        match LegacyAttr::release(new) {
            LegacyAttr::NotDefined => self.release = RELEASE_NOT_DEFINED,
            legacy => {
                self.release = legacy.as_char(RELEASE_NOT_DEFINED);
                self.change_flag.set(CriteriaFlags::RELEASE);
            }
        }
    }

    pub fn release_list(&self) -> Vec<ReleaseAttr> {
        ReleaseAttr::decode(self.attr_flags(), self.partial_size)
    }

    pub fn set_release_list(&mut self, attrs: &[ReleaseAttr]) {
        let (flags, partial_size) = ReleaseAttr::encode(attrs);
        self.set_release_attrs(flags, partial_size);
    }

    /// Legacy single character release attribute.
    pub fn release_attr(&self) -> char {
        self.release
    }

    /// Legacy entry point; cannot carry a partial size.
    pub fn set_release_attr(&mut self, c: char) -> Result<(), Error> {
        let flags = match ReleaseAttr::from_legacy(c)? {
            Some(attr) => attr.flag(),
            None => AttrFlags::empty(),
        };
        self.set_release_attrs(flags, 0);
        Ok(())
    }

    pub fn reset_release_attr(&mut self) {
        self.change_flag.reset(CriteriaFlags::RELEASE);
    }

    /// Kilobytes kept online on partial release.
    pub fn partial_size(&self) -> i32 {
        self.partial_size
    }

    /// Travels with the release flag. Only meaningful together with
    /// [`AttrFlags::PARTIAL_SIZE`].
    pub fn set_partial_size(&mut self, size: i32) {
        self.partial_size = size;
        self.change_flag.set(CriteriaFlags::RELEASE);
    }

    pub fn stage_attrs(&self) -> AttrFlags {
        self.attr_flags() & AttrFlags::STAGE_ATTR_SET
    }

    /// Stage counterpart of [`Criterion::set_release_attrs`].
    pub fn set_stage_attrs(&mut self, flags: AttrFlags) {
        let new = flags & AttrFlags::STAGE_ATTR_SET;
        self.attr_flags = ((self.attr_flags() - AttrFlags::STAGE_ATTR_SET) | new).bits();

        match LegacyAttr::stage(new) {
            LegacyAttr::NotDefined => self.stage = STAGE_NOT_DEFINED,
            legacy => {
                self.stage = legacy.as_char(STAGE_NOT_DEFINED);
                self.change_flag.set(CriteriaFlags::STAGE);
            }
        }
    }

    pub fn stage_list(&self) -> Vec<StageAttr> {
        StageAttr::decode(self.attr_flags())
    }

    pub fn set_stage_list(&mut self, attrs: &[StageAttr]) {
        let flags = attrs
            .iter()
            .fold(AttrFlags::empty(), |acc, attr| acc | attr.flag());
        self.set_stage_attrs(flags);
    }

    pub fn stage_attr(&self) -> char {
        self.stage
    }

    pub fn set_stage_attr(&mut self, c: char) -> Result<(), Error> {
        let flags = match StageAttr::from_legacy(c)? {
            Some(attr) => attr.flag(),
            None => AttrFlags::empty(),
        };
        self.set_stage_attrs(flags);
        Ok(())
    }

    pub fn reset_stage_attr(&mut self) {
        self.change_flag.reset(CriteriaFlags::STAGE);
    }

    fn check_release_char(&self) -> Result<(), Error> {
        if self.release != AMBIGUOUS_ATTR {
            ReleaseAttr::from_legacy(self.release)?;
        }
        if self.stage != AMBIGUOUS_ATTR {
            StageAttr::from_legacy(self.stage)?;
        }
        Ok(())
    }
}

impl Tracked for Criterion {
    type Flags = CriteriaFlags;

    fn change_mask(&self) -> &ChangeMask<CriteriaFlags> {
        &self.change_flag
    }

    fn change_mask_mut(&mut self) -> &mut ChangeMask<CriteriaFlags> {
        &mut self.change_flag
    }

    fn apply_changes(&self, target: &mut Self) {
        apply_flagged!(self, target, CriteriaFlags, {
            PATH => path,
            MINSIZE => minsize,
            MAXSIZE => maxsize,
            NAME => name,
            USER => user,
            GROUP => group,
            ACCESS => access,
            NFTV => nftv,
            AFTER => after,
            RELEASE => release,
            RELEASE => partial_size,
            STAGE => stage,
        });

        let mask = self.change_mask();
        if mask.is_set(CriteriaFlags::RELEASE) {
            target.attr_flags = ((target.attr_flags() - AttrFlags::RELEASE_ATTR_SET)
                | self.release_attrs())
            .bits();
        }
        if mask.is_set(CriteriaFlags::STAGE) {
            target.attr_flags =
                ((target.attr_flags() - AttrFlags::STAGE_ATTR_SET) | self.stage_attrs()).bits();
        }

        apply_copy_slots(&self.copies, &mut target.copies);
    }

    fn is_dirty(&self) -> bool {
        self.change_flag.is_dirty() || self.copies().any(|c| c.is_dirty())
    }

    fn clear_changes(&mut self) {
        self.change_flag.clear();
        for copy in self.copies.iter_mut().flatten() {
            copy.clear_changes();
        }
    }

    fn collect_unsupported(&self, version: ProtocolVersion, prefix: &str, out: &mut Vec<String>) {
        for name in self.change_flag.unsupported_by(version) {
            out.push(format!("{}{}", prefix, name));
        }
        for copy in self.copies() {
            let prefix = format!("{}copy.{}.", prefix, copy.copy_seq());
            copy.collect_unsupported(version, &prefix, out);
        }
    }

    fn validate(&self) -> Result<(), Error> {
        let mask = &self.change_flag;

        if self.set_name.is_empty() {
            bail!("criterion of '{}' has no archive set name", self.fs_name);
        }
        if let (Some(min), Some(max)) = (self.minsize, self.maxsize) {
            if (mask.is_set(CriteriaFlags::MINSIZE) || mask.is_set(CriteriaFlags::MAXSIZE)) && min > max {
                bail!("minsize {} is larger than maxsize {}", min, max);
            }
        }
        if mask.is_set(CriteriaFlags::NAME) && !self.name.is_empty() {
            regex::Regex::new(&self.name)
                .map_err(|err| format_err!("invalid name pattern '{}' - {}", self.name, err))?;
        }
        if mask.is_set(CriteriaFlags::AFTER) && !self.after.is_empty() {
            proxmox_time::parse_rfc3339(&self.after)
                .map_err(|err| format_err!("invalid 'after' time '{}' - {}", self.after, err))?;
        }
        if mask.is_set(CriteriaFlags::RELEASE) || mask.is_set(CriteriaFlags::STAGE) {
            self.check_release_char()?;
        }
        if mask.is_set(CriteriaFlags::RELEASE) && self.partial_size < 0 {
            bail!("negative partial release size {}", self.partial_size);
        }
        for copy in self.copies() {
            copy.validate()?;
        }
        Ok(())
    }

    fn check_target(&self, target: &Self) -> Result<(), Error> {
        check_copy_slots(&self.copies, &target.copies)
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fs={} set={} path={} minsize={} maxsize={} name={} user={} group={} release={} \
             stage={} access={} nftv={} after={} attr_flags={:#x} partial_size={} num_copies={} key={} copies=[",
            self.fs_name,
            self.set_name,
            self.path,
            opt_size(&self.minsize),
            opt_size(&self.maxsize),
            self.name,
            self.user,
            self.group,
            self.release,
            self.stage,
            self.access,
            self.nftv,
            self.after,
            self.attr_flags,
            self.partial_size,
            self.num_copies(),
            self.key.as_ref().map(|k| k.to_string()).unwrap_or_else(|| "-".to_string()),
        )?;
        for (i, copy) in self.copies().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", copy)?;
        }
        write!(f, "] change={}", self.change_flag)
    }
}
