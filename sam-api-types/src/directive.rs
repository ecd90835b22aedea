//! Global and per file system archiver directives

use std::fmt;

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use crate::archive_copy::{apply_copy_slots, check_copy_slots, fill_copy_slots};
use crate::patch::apply_keyed;
use crate::{
    ArchiveCopy, ChangeMask, Criterion, FileSize, Interval, MissingEntry, ProtocolVersion, Tracked,
    MAX_COPIES,
};

change_flags! {
    /// Change flags of [`BufDirective`] (`buffer_directive_t`).
    pub struct BufFlags: u32 = "buffer_directive" {
        const SIZE = 0x0000_0001, "size", V4_2;
        const LOCK = 0x0000_0002, "lock", V4_2;
    }
}

change_flags! {
    /// Change flags of [`DriveDirective`] (`drive_directive_t`).
    pub struct DriveFlags: u32 = "drive_directive" {
        const COUNT = 0x0000_0001, "count", V4_2;
    }
}

change_flags! {
    /// Change flags of [`FsDirective`] (`ar_fs_directive_t`).
    pub struct FsDirectiveFlags: u64 = "ar_fs_directive" {
        const LOG_PATH = 0x0000_0001, "log_path", V4_2;
        const FS_INTERVAL = 0x0000_0002, "fs_interval", V4_2;
        const WAIT = 0x0000_0004, "wait", V4_2;
        const SCAN_METHOD = 0x0000_0008, "scan_method", V4_2;
        const ARCHIVEMETA = 0x0000_0010, "archivemeta", V4_2;
        const SCAN_SQUASH = 0x0000_0040, "scan_squash", V4_4;
        const SETARCHDONE = 0x0000_0080, "setarchdone", V4_4;
        const BG_INTERVAL = 0x0000_0100, "bg_interval", V4_6;
        const BG_TIME = 0x0000_0200, "bg_time", V4_6;
    }
    status {
        const SHARED_FS = 0x1000_0000, "shared_fs";
        const NO_ARCHIVE = 0x2000_0000, "no_archive";
    }
}

change_flags! {
    /// Change flags of [`GlobalDirective`] (`ar_global_directive_t`).
    pub struct GlobalDirectiveFlags: u64 = "ar_global_directive" {
        const LOG_PATH = 0x0000_0001, "log_path", V4_2;
        const AR_INTERVAL = 0x0000_0002, "ar_interval", V4_2;
        const WAIT = 0x0000_0004, "wait", V4_2;
        const SCAN_METHOD = 0x0000_0008, "scan_method", V4_2;
        const ARCHIVEMETA = 0x0000_0010, "archivemeta", V4_2;
        const NOTIFY_SCRIPT = 0x0000_0020, "notify_script", V4_2;
        const SCAN_SQUASH = 0x0000_0040, "scan_squash", V4_4;
        const SETARCHDONE = 0x0000_0080, "setarchdone", V4_4;
        const BG_INTERVAL = 0x0000_0100, "bg_interval", V4_6;
        const BG_TIME = 0x0000_0200, "bg_time", V4_6;
    }
}

bitflags::bitflags! {
    /// The `options` word of a directive.
    pub struct DirectiveOptions: u32 {
        const SCAN_SQUASH_ON = 0x0000_0001;
        const SETARCHDONE_ON = 0x0000_0002;
        /// The file system is not a SAM file system.
        const FS_NOSAM = 0x0000_0004;
        /// Some criteria of the file system form an explicit default set.
        const FS_HAS_EXPLICIT_DEFAULT = 0x0000_0008;
    }
}

wire_enum! {
    /// How the archiver examines a file system for work.
    pub enum ExamMethod {
        NotSet = 0,
        Scan = 1,
        ScanDirs = 2,
        ScanInodes = 3,
        NoScan = 4,
    }
}

/// Buffer settings for one media type. Used for buffer sizes, archmax
/// and overflow limits alike.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BufDirective {
    media_type: String,
    size: FileSize,
    lock: bool,
    change_flag: ChangeMask<BufFlags>,
}

impl BufDirective {
    pub fn new(media_type: &str) -> Self {
        Self {
            media_type: media_type.to_string(),
            size: FileSize::default(),
            lock: false,
            change_flag: ChangeMask::new(),
        }
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn size(&self) -> FileSize {
        self.size
    }

    pub fn set_size(&mut self, size: FileSize) {
        self.size = size;
        self.change_flag.set(BufFlags::SIZE);
    }

    pub fn reset_size(&mut self) {
        self.change_flag.reset(BufFlags::SIZE);
    }

    pub fn lock(&self) -> bool {
        self.lock
    }

    pub fn set_lock(&mut self, lock: bool) {
        self.lock = lock;
        self.change_flag.set(BufFlags::LOCK);
    }

    pub fn reset_lock(&mut self) {
        self.change_flag.reset(BufFlags::LOCK);
    }
}

impl Tracked for BufDirective {
    type Flags = BufFlags;

    fn change_mask(&self) -> &ChangeMask<BufFlags> {
        &self.change_flag
    }

    fn change_mask_mut(&mut self) -> &mut ChangeMask<BufFlags> {
        &mut self.change_flag
    }

    fn apply_changes(&self, target: &mut Self) {
        apply_flagged!(self, target, BufFlags, { SIZE => size, LOCK => lock });
    }

    fn validate(&self) -> Result<(), Error> {
        crate::MEDIA_TYPE_SCHEMA.parse_simple_value(&self.media_type)?;
        Ok(())
    }
}

impl fmt::Display for BufDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "media={} size={} lock={} change={}",
            self.media_type, self.size, self.lock, self.change_flag
        )
    }
}

/// Number of drives the archiver may use in one library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DriveDirective {
    lib_name: String,
    count: i32,
    change_flag: ChangeMask<DriveFlags>,
}

impl DriveDirective {
    pub fn new(lib_name: &str, count: i32) -> Self {
        Self {
            lib_name: lib_name.to_string(),
            count,
            change_flag: ChangeMask::new(),
        }
    }

    pub fn lib_name(&self) -> &str {
        &self.lib_name
    }

    pub fn count(&self) -> i32 {
        self.count
    }

    pub fn set_count(&mut self, count: i32) {
        self.count = count;
        self.change_flag.set(DriveFlags::COUNT);
    }

    pub fn reset_count(&mut self) {
        self.change_flag.reset(DriveFlags::COUNT);
    }
}

impl Tracked for DriveDirective {
    type Flags = DriveFlags;

    fn change_mask(&self) -> &ChangeMask<DriveFlags> {
        &self.change_flag
    }

    fn change_mask_mut(&mut self) -> &mut ChangeMask<DriveFlags> {
        &mut self.change_flag
    }

    fn apply_changes(&self, target: &mut Self) {
        apply_flagged!(self, target, DriveFlags, { COUNT => count });
    }

    fn validate(&self) -> Result<(), Error> {
        if self.change_flag.is_set(DriveFlags::COUNT) && self.count < 0 {
            bail!("library '{}': negative drive count", self.lib_name);
        }
        Ok(())
    }
}

impl fmt::Display for DriveDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lib={} count={} change={}",
            self.lib_name, self.count, self.change_flag
        )
    }
}

// Background scan time of day, "HHMM".
fn check_bg_time(bg_time: &str) -> Result<(), Error> {
    if bg_time.is_empty() {
        return Ok(());
    }
    let valid = bg_time.len() == 4
        && bg_time.bytes().all(|b| b.is_ascii_digit())
        && &bg_time[..2] < "24"
        && &bg_time[2..] < "60";
    if !valid {
        bail!("invalid background scan time '{}' - expected HHMM", bg_time);
    }
    Ok(())
}

fn check_log_path(log_path: &str) -> Result<(), Error> {
    if !log_path.is_empty() && !log_path.starts_with('/') {
        bail!("log path '{}' is not absolute", log_path);
    }
    Ok(())
}

fn options_of(bits: u32) -> DirectiveOptions {
    DirectiveOptions::from_bits_truncate(bits)
}

fn with_option(bits: u32, option: DirectiveOptions, on: bool) -> u32 {
    let mut options = options_of(bits);
    options.set(option, on);
    options.bits()
}

/// Archiver settings of one file system.
///
/// A directive with scan method [`ExamMethod::NotSet`] stands for a file
/// system without own settings; it inherits the global directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FsDirective {
    fs_name: String,
    log_path: String,
    fs_interval: Interval,
    wait: bool,
    scan_method: ExamMethod,
    archivemeta: bool,
    options: u32,
    bg_interval: Interval,
    bg_time: String,
    criteria: Vec<Criterion>,
    metadata_copies: [Option<ArchiveCopy>; MAX_COPIES],
    change_flag: ChangeMask<FsDirectiveFlags>,
}

impl FsDirective {
    pub fn new(fs_name: &str) -> Self {
        Self {
            fs_name: fs_name.to_string(),
            log_path: String::new(),
            fs_interval: Interval::default(),
            wait: false,
            scan_method: ExamMethod::NotSet,
            archivemeta: false,
            options: 0,
            bg_interval: Interval::default(),
            bg_time: String::new(),
            criteria: Vec::new(),
            metadata_copies: Default::default(),
            change_flag: ChangeMask::new(),
        }
    }

    pub fn fs_name(&self) -> &str {
        &self.fs_name
    }

    pub fn is_unset(&self) -> bool {
        self.scan_method == ExamMethod::NotSet
    }

    pub fn is_shared_fs(&self) -> bool {
        self.change_flag.is_set(FsDirectiveFlags::SHARED_FS)
    }

    pub fn mark_shared_fs(&mut self, on: bool) {
        self.change_flag.assign(FsDirectiveFlags::SHARED_FS, on);
    }

    /// The file system is configured with `archive = off`.
    pub fn is_no_archive(&self) -> bool {
        self.change_flag.is_set(FsDirectiveFlags::NO_ARCHIVE)
    }

    pub fn mark_no_archive(&mut self, on: bool) {
        self.change_flag.assign(FsDirectiveFlags::NO_ARCHIVE, on);
    }

    pub fn options(&self) -> DirectiveOptions {
        options_of(self.options)
    }

    pub fn has_explicit_default(&self) -> bool {
        self.options().contains(DirectiveOptions::FS_HAS_EXPLICIT_DEFAULT)
    }

    /// Reported state, not a tracked field.
    pub fn mark_explicit_default(&mut self, on: bool) {
        self.options = with_option(self.options, DirectiveOptions::FS_HAS_EXPLICIT_DEFAULT, on);
    }

    pub fn log_path(&self) -> &str {
        &self.log_path
    }

    pub fn set_log_path(&mut self, path: &str) {
        self.log_path = path.to_string();
        self.change_flag.set(FsDirectiveFlags::LOG_PATH);
    }

    pub fn reset_log_path(&mut self) {
        self.change_flag.reset(FsDirectiveFlags::LOG_PATH);
    }

    pub fn fs_interval(&self) -> Interval {
        self.fs_interval
    }

    pub fn set_fs_interval(&mut self, interval: Interval) {
        self.fs_interval = interval;
        self.change_flag.set(FsDirectiveFlags::FS_INTERVAL);
    }

    pub fn reset_fs_interval(&mut self) {
        self.change_flag.reset(FsDirectiveFlags::FS_INTERVAL);
    }

    pub fn wait(&self) -> bool {
        self.wait
    }

    pub fn set_wait(&mut self, wait: bool) {
        self.wait = wait;
        self.change_flag.set(FsDirectiveFlags::WAIT);
    }

    pub fn reset_wait(&mut self) {
        self.change_flag.reset(FsDirectiveFlags::WAIT);
    }

    pub fn scan_method(&self) -> ExamMethod {
        self.scan_method
    }

    pub fn set_scan_method(&mut self, method: ExamMethod) {
        self.scan_method = method;
        self.change_flag.set(FsDirectiveFlags::SCAN_METHOD);
    }

    pub fn reset_scan_method(&mut self) {
        self.change_flag.reset(FsDirectiveFlags::SCAN_METHOD);
    }

    pub fn archivemeta(&self) -> bool {
        self.archivemeta
    }

    pub fn set_archivemeta(&mut self, archivemeta: bool) {
        self.archivemeta = archivemeta;
        self.change_flag.set(FsDirectiveFlags::ARCHIVEMETA);
    }

    pub fn reset_archivemeta(&mut self) {
        self.change_flag.reset(FsDirectiveFlags::ARCHIVEMETA);
    }

    pub fn scan_squash(&self) -> bool {
        self.options().contains(DirectiveOptions::SCAN_SQUASH_ON)
    }

    pub fn set_scan_squash(&mut self, on: bool) {
        self.options = with_option(self.options, DirectiveOptions::SCAN_SQUASH_ON, on);
        self.change_flag.set(FsDirectiveFlags::SCAN_SQUASH);
    }

    pub fn reset_scan_squash(&mut self) {
        self.change_flag.reset(FsDirectiveFlags::SCAN_SQUASH);
    }

    pub fn setarchdone(&self) -> bool {
        self.options().contains(DirectiveOptions::SETARCHDONE_ON)
    }

    pub fn set_setarchdone(&mut self, on: bool) {
        self.options = with_option(self.options, DirectiveOptions::SETARCHDONE_ON, on);
        self.change_flag.set(FsDirectiveFlags::SETARCHDONE);
    }

    pub fn reset_setarchdone(&mut self) {
        self.change_flag.reset(FsDirectiveFlags::SETARCHDONE);
    }

    pub fn bg_interval(&self) -> Interval {
        self.bg_interval
    }

    pub fn set_bg_interval(&mut self, interval: Interval) {
        self.bg_interval = interval;
        self.change_flag.set(FsDirectiveFlags::BG_INTERVAL);
    }

    pub fn reset_bg_interval(&mut self) {
        self.change_flag.reset(FsDirectiveFlags::BG_INTERVAL);
    }

    pub fn bg_time(&self) -> &str {
        &self.bg_time
    }

    pub fn set_bg_time(&mut self, time: &str) {
        self.bg_time = time.to_string();
        self.change_flag.set(FsDirectiveFlags::BG_TIME);
    }

    pub fn reset_bg_time(&mut self) {
        self.change_flag.reset(FsDirectiveFlags::BG_TIME);
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    /// Criteria are addressed by key when a directive patch is applied.
    /// Adding or dropping criteria goes through the archive-set calls.
    pub fn criteria_mut(&mut self) -> &mut Vec<Criterion> {
        &mut self.criteria
    }

    pub fn metadata_copies(&self) -> impl Iterator<Item = &ArchiveCopy> {
        self.metadata_copies.iter().flatten()
    }

    pub fn metadata_copy_mut(&mut self, copy_seq: u8) -> Option<&mut ArchiveCopy> {
        self.metadata_copies
            .iter_mut()
            .flatten()
            .find(|c| c.copy_seq() == copy_seq)
    }

    pub fn set_metadata_copies(&mut self, copies: Vec<ArchiveCopy>) -> Result<(), Error> {
        fill_copy_slots(&mut self.metadata_copies, copies)
    }
}

fn apply_criteria(src: &[Criterion], target: &mut [Criterion]) {
    for crit in src.iter().filter(|c| c.is_dirty()) {
        if let Some(existing) = target.iter_mut().find(|t| t.same_as(crit)) {
            crit.apply_changes(existing);
        }
    }
}

/// Every dirty criterion must name an existing target criterion by key.
fn check_criteria(src: &[Criterion], target: &[Criterion]) -> Result<(), Error> {
    for crit in src.iter().filter(|c| c.is_dirty()) {
        let key = match crit.key() {
            Some(key) => key,
            None => {
                let what = format!("criterion of set '{}' without key", crit.ar_set_name());
                return Err(MissingEntry(what).into());
            }
        };
        match target.iter().find(|t| t.same_as(crit)) {
            Some(existing) => crit.check_target(existing)?,
            None => {
                let what = format!("criterion {} of set '{}'", key, crit.ar_set_name());
                return Err(MissingEntry(what).into());
            }
        }
    }
    Ok(())
}

fn validate_criteria(criteria: &[Criterion]) -> Result<(), Error> {
    for crit in criteria.iter().filter(|c| c.is_dirty()) {
        crit.validate().map_err(|err| {
            format_err!("criterion of set '{}': {}", crit.ar_set_name(), err)
        })?;
    }
    Ok(())
}

impl Tracked for FsDirective {
    type Flags = FsDirectiveFlags;

    fn change_mask(&self) -> &ChangeMask<FsDirectiveFlags> {
        &self.change_flag
    }

    fn change_mask_mut(&mut self) -> &mut ChangeMask<FsDirectiveFlags> {
        &mut self.change_flag
    }

    fn apply_changes(&self, target: &mut Self) {
        apply_flagged!(self, target, FsDirectiveFlags, {
            LOG_PATH => log_path,
            FS_INTERVAL => fs_interval,
            WAIT => wait,
            SCAN_METHOD => scan_method,
            ARCHIVEMETA => archivemeta,
            BG_INTERVAL => bg_interval,
            BG_TIME => bg_time,
        });

        let mask = self.change_mask();
        if mask.is_set(FsDirectiveFlags::SCAN_SQUASH) {
            target.options =
                with_option(target.options, DirectiveOptions::SCAN_SQUASH_ON, self.scan_squash());
        }
        if mask.is_set(FsDirectiveFlags::SETARCHDONE) {
            target.options =
                with_option(target.options, DirectiveOptions::SETARCHDONE_ON, self.setarchdone());
        }

        apply_criteria(&self.criteria, &mut target.criteria);
        apply_copy_slots(&self.metadata_copies, &mut target.metadata_copies);
    }

    fn is_dirty(&self) -> bool {
        self.change_flag.is_dirty()
            || self.criteria.iter().any(|c| c.is_dirty())
            || self.metadata_copies().any(|c| c.is_dirty())
    }

    fn clear_changes(&mut self) {
        self.change_flag.clear();
        for crit in self.criteria.iter_mut() {
            crit.clear_changes();
        }
        for copy in self.metadata_copies.iter_mut().flatten() {
            copy.clear_changes();
        }
    }

    fn collect_unsupported(&self, version: ProtocolVersion, prefix: &str, out: &mut Vec<String>) {
        for name in self.change_flag.unsupported_by(version) {
            out.push(format!("{}{}", prefix, name));
        }
        for crit in self.criteria.iter() {
            let prefix = format!("{}criteria.{}.", prefix, crit.ar_set_name());
            crit.collect_unsupported(version, &prefix, out);
        }
        for copy in self.metadata_copies() {
            let prefix = format!("{}metadata_copy.{}.", prefix, copy.copy_seq());
            copy.collect_unsupported(version, &prefix, out);
        }
    }

    fn validate(&self) -> Result<(), Error> {
        let mask = &self.change_flag;
        if mask.is_set(FsDirectiveFlags::SCAN_METHOD) && self.scan_method == ExamMethod::NotSet {
            bail!(
                "file system '{}': scan method cannot be submitted as NOT_SET - reset the field instead",
                self.fs_name
            );
        }
        if mask.is_set(FsDirectiveFlags::LOG_PATH) {
            check_log_path(&self.log_path)?;
        }
        if mask.is_set(FsDirectiveFlags::BG_TIME) {
            check_bg_time(&self.bg_time)?;
        }
        validate_criteria(&self.criteria)?;
        for copy in self.metadata_copies() {
            copy.validate()?;
        }
        Ok(())
    }

    fn check_target(&self, target: &Self) -> Result<(), Error> {
        check_criteria(&self.criteria, &target.criteria)?;
        check_copy_slots(&self.metadata_copies, &target.metadata_copies)
    }
}

impl fmt::Display for FsDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fs={} log_path={} interval={} wait={} scan_method={} archivemeta={} options={:#x} \
             bg_interval={} bg_time={} criteria={} metadata_copies={} change={}",
            self.fs_name,
            self.log_path,
            self.fs_interval,
            self.wait,
            self.scan_method,
            self.archivemeta,
            self.options,
            self.bg_interval,
            self.bg_time,
            self.criteria.len(),
            self.metadata_copies().count(),
            self.change_flag,
        )
    }
}

/// Archiver settings that apply to all file systems.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct GlobalDirective {
    log_path: String,
    ar_interval: Interval,
    wait: bool,
    scan_method: ExamMethod,
    archivemeta: bool,
    notify_script: String,
    options: u32,
    bg_interval: Interval,
    bg_time: String,
    ar_bufs: Vec<BufDirective>,
    ar_max: Vec<BufDirective>,
    ar_overflow: Vec<BufDirective>,
    dr_directives: Vec<DriveDirective>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    criteria: Option<Vec<Criterion>>,
    change_flag: ChangeMask<GlobalDirectiveFlags>,
}

impl Default for GlobalDirective {
    fn default() -> Self {
        Self {
            log_path: String::new(),
            ar_interval: Interval::default(),
            wait: false,
            scan_method: ExamMethod::NotSet,
            archivemeta: false,
            notify_script: String::new(),
            options: 0,
            bg_interval: Interval::default(),
            bg_time: String::new(),
            ar_bufs: Vec::new(),
            ar_max: Vec::new(),
            ar_overflow: Vec::new(),
            dr_directives: Vec::new(),
            criteria: None,
            change_flag: ChangeMask::new(),
        }
    }
}

impl GlobalDirective {
    pub fn log_path(&self) -> &str {
        &self.log_path
    }

    pub fn set_log_path(&mut self, path: &str) {
        self.log_path = path.to_string();
        self.change_flag.set(GlobalDirectiveFlags::LOG_PATH);
    }

    pub fn reset_log_path(&mut self) {
        self.change_flag.reset(GlobalDirectiveFlags::LOG_PATH);
    }

    pub fn ar_interval(&self) -> Interval {
        self.ar_interval
    }

    pub fn set_ar_interval(&mut self, interval: Interval) {
        self.ar_interval = interval;
        self.change_flag.set(GlobalDirectiveFlags::AR_INTERVAL);
    }

    pub fn reset_ar_interval(&mut self) {
        self.change_flag.reset(GlobalDirectiveFlags::AR_INTERVAL);
    }

    pub fn wait(&self) -> bool {
        self.wait
    }

    pub fn set_wait(&mut self, wait: bool) {
        self.wait = wait;
        self.change_flag.set(GlobalDirectiveFlags::WAIT);
    }

    pub fn reset_wait(&mut self) {
        self.change_flag.reset(GlobalDirectiveFlags::WAIT);
    }

    pub fn scan_method(&self) -> ExamMethod {
        self.scan_method
    }

    pub fn set_scan_method(&mut self, method: ExamMethod) {
        self.scan_method = method;
        self.change_flag.set(GlobalDirectiveFlags::SCAN_METHOD);
    }

    pub fn reset_scan_method(&mut self) {
        self.change_flag.reset(GlobalDirectiveFlags::SCAN_METHOD);
    }

    pub fn archivemeta(&self) -> bool {
        self.archivemeta
    }

    pub fn set_archivemeta(&mut self, archivemeta: bool) {
        self.archivemeta = archivemeta;
        self.change_flag.set(GlobalDirectiveFlags::ARCHIVEMETA);
    }

    pub fn reset_archivemeta(&mut self) {
        self.change_flag.reset(GlobalDirectiveFlags::ARCHIVEMETA);
    }

    pub fn notify_script(&self) -> &str {
        &self.notify_script
    }

    pub fn set_notify_script(&mut self, script: &str) {
        self.notify_script = script.to_string();
        self.change_flag.set(GlobalDirectiveFlags::NOTIFY_SCRIPT);
    }

    pub fn reset_notify_script(&mut self) {
        self.change_flag.reset(GlobalDirectiveFlags::NOTIFY_SCRIPT);
    }

    pub fn options(&self) -> DirectiveOptions {
        options_of(self.options)
    }

    pub fn scan_squash(&self) -> bool {
        self.options().contains(DirectiveOptions::SCAN_SQUASH_ON)
    }

    pub fn set_scan_squash(&mut self, on: bool) {
        self.options = with_option(self.options, DirectiveOptions::SCAN_SQUASH_ON, on);
        self.change_flag.set(GlobalDirectiveFlags::SCAN_SQUASH);
    }

    pub fn reset_scan_squash(&mut self) {
        self.change_flag.reset(GlobalDirectiveFlags::SCAN_SQUASH);
    }

    pub fn setarchdone(&self) -> bool {
        self.options().contains(DirectiveOptions::SETARCHDONE_ON)
    }

    pub fn set_setarchdone(&mut self, on: bool) {
        self.options = with_option(self.options, DirectiveOptions::SETARCHDONE_ON, on);
        self.change_flag.set(GlobalDirectiveFlags::SETARCHDONE);
    }

    pub fn reset_setarchdone(&mut self) {
        self.change_flag.reset(GlobalDirectiveFlags::SETARCHDONE);
    }

    pub fn bg_interval(&self) -> Interval {
        self.bg_interval
    }

    pub fn set_bg_interval(&mut self, interval: Interval) {
        self.bg_interval = interval;
        self.change_flag.set(GlobalDirectiveFlags::BG_INTERVAL);
    }

    pub fn reset_bg_interval(&mut self) {
        self.change_flag.reset(GlobalDirectiveFlags::BG_INTERVAL);
    }

    pub fn bg_time(&self) -> &str {
        &self.bg_time
    }

    pub fn set_bg_time(&mut self, time: &str) {
        self.bg_time = time.to_string();
        self.change_flag.set(GlobalDirectiveFlags::BG_TIME);
    }

    pub fn reset_bg_time(&mut self) {
        self.change_flag.reset(GlobalDirectiveFlags::BG_TIME);
    }

    pub fn buffers(&self) -> &[BufDirective] {
        &self.ar_bufs
    }

    pub fn buffers_mut(&mut self) -> &mut Vec<BufDirective> {
        &mut self.ar_bufs
    }

    pub fn archmax(&self) -> &[BufDirective] {
        &self.ar_max
    }

    pub fn archmax_mut(&mut self) -> &mut Vec<BufDirective> {
        &mut self.ar_max
    }

    pub fn overflow(&self) -> &[BufDirective] {
        &self.ar_overflow
    }

    pub fn overflow_mut(&mut self) -> &mut Vec<BufDirective> {
        &mut self.ar_overflow
    }

    pub fn drives(&self) -> &[DriveDirective] {
        &self.dr_directives
    }

    pub fn drives_mut(&mut self) -> &mut Vec<DriveDirective> {
        &mut self.dr_directives
    }

    /// Global criteria, `None` when the daemon reported no list at all.
    pub fn criteria(&self) -> Option<&[Criterion]> {
        self.criteria.as_deref()
    }

    pub fn criteria_mut(&mut self) -> &mut Vec<Criterion> {
        self.criteria.get_or_insert_with(Vec::new)
    }
}

impl Tracked for GlobalDirective {
    type Flags = GlobalDirectiveFlags;

    fn change_mask(&self) -> &ChangeMask<GlobalDirectiveFlags> {
        &self.change_flag
    }

    fn change_mask_mut(&mut self) -> &mut ChangeMask<GlobalDirectiveFlags> {
        &mut self.change_flag
    }

    fn apply_changes(&self, target: &mut Self) {
        apply_flagged!(self, target, GlobalDirectiveFlags, {
            LOG_PATH => log_path,
            AR_INTERVAL => ar_interval,
            WAIT => wait,
            SCAN_METHOD => scan_method,
            ARCHIVEMETA => archivemeta,
            NOTIFY_SCRIPT => notify_script,
            BG_INTERVAL => bg_interval,
            BG_TIME => bg_time,
        });

        let mask = self.change_mask();
        if mask.is_set(GlobalDirectiveFlags::SCAN_SQUASH) {
            target.options =
                with_option(target.options, DirectiveOptions::SCAN_SQUASH_ON, self.scan_squash());
        }
        if mask.is_set(GlobalDirectiveFlags::SETARCHDONE) {
            target.options =
                with_option(target.options, DirectiveOptions::SETARCHDONE_ON, self.setarchdone());
        }

        apply_keyed(&self.ar_bufs, &mut target.ar_bufs, |b| b.media_type.clone());
        apply_keyed(&self.ar_max, &mut target.ar_max, |b| b.media_type.clone());
        apply_keyed(&self.ar_overflow, &mut target.ar_overflow, |b| b.media_type.clone());
        apply_keyed(&self.dr_directives, &mut target.dr_directives, |d| d.lib_name.clone());

        if let (Some(src), Some(dst)) = (&self.criteria, &mut target.criteria) {
            apply_criteria(src, dst);
        }
    }

    fn is_dirty(&self) -> bool {
        self.change_flag.is_dirty()
            || self.ar_bufs.iter().any(|b| b.is_dirty())
            || self.ar_max.iter().any(|b| b.is_dirty())
            || self.ar_overflow.iter().any(|b| b.is_dirty())
            || self.dr_directives.iter().any(|d| d.is_dirty())
            || self.criteria().unwrap_or(&[]).iter().any(|c| c.is_dirty())
    }

    fn clear_changes(&mut self) {
        self.change_flag.clear();
        for buf in self
            .ar_bufs
            .iter_mut()
            .chain(self.ar_max.iter_mut())
            .chain(self.ar_overflow.iter_mut())
        {
            buf.clear_changes();
        }
        for drive in self.dr_directives.iter_mut() {
            drive.clear_changes();
        }
        if let Some(criteria) = self.criteria.as_mut() {
            for crit in criteria.iter_mut() {
                crit.clear_changes();
            }
        }
    }

    fn collect_unsupported(&self, version: ProtocolVersion, prefix: &str, out: &mut Vec<String>) {
        for name in self.change_flag.unsupported_by(version) {
            out.push(format!("{}{}", prefix, name));
        }
        for crit in self.criteria().unwrap_or(&[]) {
            let prefix = format!("{}criteria.{}.", prefix, crit.ar_set_name());
            crit.collect_unsupported(version, &prefix, out);
        }
    }

    fn validate(&self) -> Result<(), Error> {
        let mask = &self.change_flag;
        if mask.is_set(GlobalDirectiveFlags::SCAN_METHOD) && self.scan_method == ExamMethod::NotSet {
            bail!("global scan method cannot be submitted as NOT_SET - reset the field instead");
        }
        if mask.is_set(GlobalDirectiveFlags::LOG_PATH) {
            check_log_path(&self.log_path)?;
        }
        if mask.is_set(GlobalDirectiveFlags::NOTIFY_SCRIPT) {
            check_log_path(&self.notify_script)
                .map_err(|_| format_err!("notify script '{}' is not absolute", self.notify_script))?;
        }
        if mask.is_set(GlobalDirectiveFlags::BG_TIME) {
            check_bg_time(&self.bg_time)?;
        }
        for buf in self
            .ar_bufs
            .iter()
            .chain(self.ar_max.iter())
            .chain(self.ar_overflow.iter())
            .filter(|b| b.is_dirty())
        {
            buf.validate()?;
        }
        for drive in self.dr_directives.iter().filter(|d| d.is_dirty()) {
            drive.validate()?;
        }
        validate_criteria(self.criteria().unwrap_or(&[]))
    }

    fn check_target(&self, target: &Self) -> Result<(), Error> {
        check_criteria(self.criteria().unwrap_or(&[]), target.criteria().unwrap_or(&[]))
    }
}

impl fmt::Display for GlobalDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "log_path={} interval={} wait={} scan_method={} archivemeta={} notify_script={} \
             options={:#x} bg_interval={} bg_time={}",
            self.log_path,
            self.ar_interval,
            self.wait,
            self.scan_method,
            self.archivemeta,
            self.notify_script,
            self.options,
            self.bg_interval,
            self.bg_time,
        )?;
        for (label, list) in [
            ("bufsize", &self.ar_bufs),
            ("archmax", &self.ar_max),
            ("ovflmin", &self.ar_overflow),
        ] {
            write!(f, " {}=[", label)?;
            for (i, buf) in list.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", buf)?;
            }
            write!(f, "]")?;
        }
        write!(f, " drives=[")?;
        for (i, drive) in self.dr_directives.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", drive)?;
        }
        match &self.criteria {
            Some(criteria) => write!(f, "] criteria={}", criteria.len())?,
            None => write!(f, "] criteria=-")?,
        }
        write!(f, " change={}", self.change_flag)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{CriteriaKey, Patch};

    #[test]
    fn status_bits_survive_clear() {
        let mut fs = FsDirective::new("samfs1");
        fs.mark_no_archive(true);
        fs.set_wait(true);
        assert!(fs.is_dirty());

        fs.clear_changes();
        assert!(!fs.is_dirty());
        assert!(fs.is_no_archive());
        assert_eq!(fs.change_mask().bits(), 0x2000_0000);
    }

    #[test]
    fn option_setters_flip_bits_and_flags() {
        let mut fs = FsDirective::new("samfs1");
        fs.set_scan_squash(true);
        fs.set_setarchdone(true);
        fs.set_setarchdone(false);

        assert!(fs.scan_squash());
        assert!(!fs.setarchdone());
        assert_eq!(fs.change_mask().names(), vec!["scan_squash", "setarchdone"]);
        assert_eq!(
            fs.change_mask().unsupported_by(ProtocolVersion::V4_2),
            vec!["scan_squash", "setarchdone"]
        );
    }

    #[test]
    fn scan_method_not_set_is_rejected() {
        let mut fs = FsDirective::new("samfs1");
        assert!(fs.is_unset());
        fs.set_scan_method(ExamMethod::NotSet);
        assert!(fs.validate().is_err());
        fs.set_scan_method(ExamMethod::ScanInodes);
        assert!(fs.validate().is_ok());
        assert_eq!(fs.scan_method().code(), 3);
    }

    #[test]
    fn bg_time_format() {
        assert!(check_bg_time("").is_ok());
        assert!(check_bg_time("0230").is_ok());
        assert!(check_bg_time("2400").is_err());
        assert!(check_bg_time("1260").is_err());
        assert!(check_bg_time("12:00").is_err());
    }

    #[test]
    fn fs_patch_reaches_keyed_criteria() -> Result<(), Error> {
        let mut base = FsDirective::new("samfs1");
        let mut crit = Criterion::with_copies("samfs1", "images", vec![ArchiveCopy::new(1)])?;
        crit.assign_key(CriteriaKey::new(&[7]));
        base.criteria_mut().push(crit);
        base.clear_changes();

        let mut edit = base.clone();
        edit.criteria_mut()[0].set_path("photos");
        edit.set_fs_interval(Interval::from_secs(600));

        let mut target = base.clone();
        edit.apply_changes(&mut target);

        assert_eq!(target.criteria()[0].path(), "photos");
        assert_eq!(target.fs_interval().as_secs(), 600);
        Ok(())
    }

    #[test]
    fn unmatched_criteria_refuse_the_patch() -> Result<(), Error> {
        let mut base = FsDirective::new("samfs1");
        let mut crit = Criterion::new("samfs1", "images");
        crit.assign_key(CriteriaKey::new(&[7]));
        base.criteria_mut().push(crit);
        base.clear_changes();

        let mut edit = base.clone();
        edit.set_wait(true);
        edit.criteria_mut().push(Criterion::new("samfs1", "logs"));
        edit.criteria_mut()[1].set_path("logs");

        let mut target = base.clone();
        let err = Patch::new(&edit).apply(&mut target).unwrap_err();
        assert_eq!(
            err.downcast_ref::<MissingEntry>(),
            Some(&MissingEntry("criterion of set 'logs' without key".into()))
        );
        assert_eq!(target, base);

        edit.criteria_mut()[1].assign_key(CriteriaKey::new(&[8]));
        assert!(Patch::new(&edit).apply(&mut target).is_err());

        let mut global = GlobalDirective::default();
        let mut crit = Criterion::new(crate::GLOBAL, "images");
        crit.assign_key(CriteriaKey::new(&[7]));
        crit.set_path("data");
        global.criteria_mut().push(crit);
        let mut target = GlobalDirective::default();
        let err = Patch::new(&global).apply(&mut target).unwrap_err();
        assert!(err.downcast_ref::<MissingEntry>().is_some());
        assert!(target.criteria().is_none());

        edit.criteria_mut().truncate(1);
        edit.criteria_mut()[0].set_path("photos");
        let mut target = base.clone();
        Patch::new(&edit).apply(&mut target)?;
        assert_eq!(target.criteria()[0].path(), "photos");
        assert!(target.wait());
        Ok(())
    }

    #[test]
    fn global_buffers_keyed_by_media() {
        let mut base = GlobalDirective::default();
        base.buffers_mut().push(BufDirective::new("lt"));
        base.clear_changes();

        let mut edit = base.clone();
        edit.buffers_mut()[0].set_lock(true);
        let mut added = BufDirective::new("dk");
        added.set_size(FileSize::new(8));
        edit.buffers_mut().push(added);
        edit.drives_mut().push(DriveDirective::new("lib50", 1));

        let mut target = base.clone();
        edit.apply_changes(&mut target);

        assert_eq!(target.buffers().len(), 2);
        assert!(target.buffers()[0].lock());
        assert_eq!(target.buffers()[1].size().as_u64(), 8);
        // untouched drive directives are not carried over
        assert!(target.drives().is_empty());
        assert!(!target.is_dirty());
    }

    #[test]
    fn global_criteria_absent_versus_empty() {
        let mut global = GlobalDirective::default();
        assert!(global.criteria().is_none());
        global.criteria_mut();
        assert_eq!(global.criteria().map(|c| c.len()), Some(0));
    }
}
