//! Copy parameters (`ar_set_copy_params_t`)
//!
//! Operational tuning for one archive copy, identified by its copy name
//! (`images.1`, `images.2R`, ...).
//!
//! Several enums below use `-1` as "not set". That value means the
//! directive is absent from the configuration and the daemon default
//! applies; it is distinct from `0`, which is a real setting for all of
//! them.

use std::fmt;

use anyhow::{bail, format_err, Error};
use serde::{Deserialize, Serialize};

use crate::human_byte::opt_size;
use crate::patch::apply_keyed;
use crate::{ChangeMask, CopyName, FileSize, Interval, ProtocolVersion, Tracked, MAX_COPIES};

change_flags! {
    /// Change flags of [`CopyParams`].
    pub struct CopyParamsFlags: u64 = "ar_set_copy_params" {
        const ARCHMAX = 0x0000_0100, "archmax", V4_2;
        const BUFSIZE = 0x0000_0200, "bufsize", V4_2;
        const DISK_VOLUME = 0x0000_0400, "disk_volume", V4_2;
        const DRIVEMIN = 0x0000_0800, "drivemin", V4_2;
        const DRIVES = 0x0000_1000, "drives", V4_2;
        const FILLVSNS = 0x0000_2000, "fillvsns", V4_2;
        const JOIN = 0x0000_4000, "join", V4_2;
        const BUFLOCK = 0x0000_8000, "buflock", V4_2;
        const OFFLINE_COPY = 0x0001_0000, "offline_copy", V4_2;
        const OVFLMIN = 0x0002_0000, "ovflmin", V4_2;
        const RESERVE = 0x0004_0000, "reserve", V4_2;
        const SIMDELAY = 0x0008_0000, "simdelay", V4_2;
        const SORT = 0x0010_0000, "sort", V4_2;
        const RSORT = 0x0020_0000, "rsort", V4_2;
        const STARTAGE = 0x0040_0000, "startage", V4_2;
        const STARTCOUNT = 0x0080_0000, "startcount", V4_2;
        const STARTSIZE = 0x0100_0000, "startsize", V4_2;
        const TAPENONSTOP = 0x0200_0000, "tapenonstop", V4_2;
        const TSTOVFL = 0x0400_0000, "tstovfl", V4_2;
        const DRIVEMAX = 0x0800_0000, "drivemax", V4_2;
        const UNARCHAGE = 0x1000_0000, "unarchage", V4_2;
        const DIRECTIO = 0x2000_0000, "directio", V4_2;
        const REARCH_STAGE_COPY = 0x4000_0000, "rearch_stage_copy", V4_5;
        const QUEUE_TIME_LIMIT = 0x8000_0000, "queue_time_limit", V4_6;
    }
}

change_flags! {
    /// Change flags of [`Priority`].
    pub struct PriorityFlags: u32 = "priority" {
        const VALUE = 0x0000_0001, "value", V4_2;
    }
}

change_flags! {
    /// Change flags of [`RecyclerParams`] (`rc_param_t`).
    pub struct RecyclerFlags: u32 = "rc_param" {
        const HWM = 0x0000_0001, "hwm", V4_2;
        const DATA_QUANTITY = 0x0000_0002, "data_quantity", V4_2;
        const IGNORE = 0x0000_0004, "ignore", V4_2;
        const EMAIL_ADDR = 0x0000_0008, "email_addr", V4_2;
        const MINGAIN = 0x0000_0010, "mingain", V4_2;
        const VSNCOUNT = 0x0000_0020, "vsncount", V4_2;
        const MAIL = 0x0000_0040, "mail", V4_2;
        const MINOBS = 0x0000_0080, "minobs", V4_2;
    }
}

bitflags::bitflags! {
    /// Volume reservation method of a copy.
    pub struct ReserveMethod: u16 {
        const SET = 0x0001;
        const FS = 0x0002;
        const DIR = 0x0004;
        const USER = 0x0008;
        const GROUP = 0x0010;
    }
}

/// Valid names of archive priorities.
pub const PRIORITY_NAMES: &[&str] = &[
    "age",
    "ar_immediate",
    "ar_overflow",
    "ar_loaded",
    "copy1",
    "copy2",
    "copy3",
    "copy4",
    "copies",
    "offline",
    "queuewait",
    "rearchive",
    "reqrelease",
    "size",
    "stage_loaded",
    "stage_overflow",
];

wire_enum! {
    /// Join method (unused by daemons since 5.0).
    pub enum JoinMethod {
        NotSet = -1,
        NoJoin = 0,
        Path = 1,
    }
}

wire_enum! {
    /// Offline copy method.
    pub enum OfflineCopyMethod {
        NotSet = -1,
        None = 0,
        Direct = 1,
        StageAhead = 2,
        StageAll = 3,
    }
}

wire_enum! {
    /// Sort method, used for both forward and reverse sort.
    pub enum SortMethod {
        NotSet = -1,
        None = 0,
        Age = 1,
        Path = 2,
        Priority = 3,
        Size = 4,
    }
}

/// A weighted archive priority.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Priority {
    name: String,
    value: f32,
    change_flag: ChangeMask<PriorityFlags>,
}

impl Priority {
    pub fn new(name: &str, value: f32) -> Self {
        Self {
            name: name.to_string(),
            value,
            change_flag: ChangeMask::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn set_value(&mut self, value: f32) {
        self.value = value;
        self.change_flag.set(PriorityFlags::VALUE);
    }

    pub fn reset_value(&mut self) {
        self.change_flag.reset(PriorityFlags::VALUE);
    }
}

impl Tracked for Priority {
    type Flags = PriorityFlags;

    fn change_mask(&self) -> &ChangeMask<PriorityFlags> {
        &self.change_flag
    }

    fn change_mask_mut(&mut self) -> &mut ChangeMask<PriorityFlags> {
        &mut self.change_flag
    }

    fn apply_changes(&self, target: &mut Self) {
        apply_flagged!(self, target, PriorityFlags, { VALUE => value });
    }

    fn validate(&self) -> Result<(), Error> {
        if !PRIORITY_NAMES.contains(&self.name.as_str()) {
            bail!("unknown archive priority '{}'", self.name);
        }
        Ok(())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={} change={}", self.name, self.value, self.change_flag)
    }
}

/// Recycler settings attached to a copy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RecyclerParams {
    hwm: i32,
    data_quantity: Option<FileSize>,
    ignore: bool,
    email_addr: String,
    mingain: i32,
    vsncount: i32,
    mail: bool,
    minobs: i32,
    change_flag: ChangeMask<RecyclerFlags>,
}

impl RecyclerParams {
    pub fn hwm(&self) -> i32 {
        self.hwm
    }

    pub fn set_hwm(&mut self, hwm: i32) {
        self.hwm = hwm;
        self.change_flag.set(RecyclerFlags::HWM);
    }

    pub fn data_quantity(&self) -> Option<FileSize> {
        self.data_quantity
    }

    pub fn set_data_quantity(&mut self, quantity: Option<FileSize>) {
        self.data_quantity = quantity;
        self.change_flag.set(RecyclerFlags::DATA_QUANTITY);
    }

    pub fn ignore(&self) -> bool {
        self.ignore
    }

    pub fn set_ignore(&mut self, ignore: bool) {
        self.ignore = ignore;
        self.change_flag.set(RecyclerFlags::IGNORE);
    }

    pub fn email_addr(&self) -> &str {
        &self.email_addr
    }

    pub fn set_email_addr(&mut self, addr: &str) {
        self.email_addr = addr.to_string();
        self.change_flag.set(RecyclerFlags::EMAIL_ADDR);
    }

    pub fn mingain(&self) -> i32 {
        self.mingain
    }

    pub fn set_mingain(&mut self, mingain: i32) {
        self.mingain = mingain;
        self.change_flag.set(RecyclerFlags::MINGAIN);
    }

    pub fn vsncount(&self) -> i32 {
        self.vsncount
    }

    pub fn set_vsncount(&mut self, count: i32) {
        self.vsncount = count;
        self.change_flag.set(RecyclerFlags::VSNCOUNT);
    }

    pub fn mail(&self) -> bool {
        self.mail
    }

    pub fn set_mail(&mut self, mail: bool) {
        self.mail = mail;
        self.change_flag.set(RecyclerFlags::MAIL);
    }

    pub fn minobs(&self) -> i32 {
        self.minobs
    }

    pub fn set_minobs(&mut self, minobs: i32) {
        self.minobs = minobs;
        self.change_flag.set(RecyclerFlags::MINOBS);
    }
}

impl Tracked for RecyclerParams {
    type Flags = RecyclerFlags;

    fn change_mask(&self) -> &ChangeMask<RecyclerFlags> {
        &self.change_flag
    }

    fn change_mask_mut(&mut self) -> &mut ChangeMask<RecyclerFlags> {
        &mut self.change_flag
    }

    fn apply_changes(&self, target: &mut Self) {
        apply_flagged!(self, target, RecyclerFlags, {
            HWM => hwm,
            DATA_QUANTITY => data_quantity,
            IGNORE => ignore,
            EMAIL_ADDR => email_addr,
            MINGAIN => mingain,
            VSNCOUNT => vsncount,
            MAIL => mail,
            MINOBS => minobs,
        });
    }

    fn validate(&self) -> Result<(), Error> {
        let mask = &self.change_flag;
        if mask.is_set(RecyclerFlags::HWM) && !(0..=100).contains(&self.hwm) {
            bail!("recycler high water mark {} out of range 0..100", self.hwm);
        }
        if mask.is_set(RecyclerFlags::MINGAIN) && !(0..=100).contains(&self.mingain) {
            bail!("recycler minimum gain {} out of range 0..100", self.mingain);
        }
        if mask.is_set(RecyclerFlags::MINOBS) && !(0..=100).contains(&self.minobs) {
            bail!("recycler minimum obsolete {} out of range 0..100", self.minobs);
        }
        Ok(())
    }
}

impl fmt::Display for RecyclerParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "hwm={} data_quantity={} ignore={} email_addr={} mingain={} vsncount={} mail={} minobs={} change={}",
            self.hwm,
            opt_size(&self.data_quantity),
            self.ignore,
            self.email_addr,
            self.mingain,
            self.vsncount,
            self.mail,
            self.minobs,
            self.change_flag,
        )
    }
}

/// Copy parameters of one archive copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CopyParams {
    name: String,
    archmax: Option<FileSize>,
    bufsize: i32,
    buflock: bool,
    drives: i32,
    drivemax: Option<FileSize>,
    drivemin: Option<FileSize>,
    ovflmin: Option<FileSize>,
    disk_volume: String,
    fillvsns: bool,
    fillvsns_min: Option<FileSize>,
    tapenonstop: bool,
    reserve: u16,
    priorities: Vec<Priority>,
    unarchage: bool,
    join: JoinMethod,
    rsort: SortMethod,
    sort: SortMethod,
    offline_copy: OfflineCopyMethod,
    startage: Interval,
    startcount: i32,
    startsize: Option<FileSize>,
    recycle: RecyclerParams,
    simdelay: i32,
    tstovfl: bool,
    directio: bool,
    rearch_stage_copy: i16,
    queue_time_limit: Interval,
    change_flag: ChangeMask<CopyParamsFlags>,
}

impl CopyParams {
    /// Parameters for `name` with every field at its "not set" value.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            archmax: None,
            bufsize: 0,
            buflock: false,
            drives: 0,
            drivemax: None,
            drivemin: None,
            ovflmin: None,
            disk_volume: String::new(),
            fillvsns: false,
            fillvsns_min: None,
            tapenonstop: false,
            reserve: 0,
            priorities: Vec::new(),
            unarchage: false,
            join: JoinMethod::NotSet,
            rsort: SortMethod::NotSet,
            sort: SortMethod::NotSet,
            offline_copy: OfflineCopyMethod::NotSet,
            startage: Interval::default(),
            startcount: 0,
            startsize: None,
            recycle: RecyclerParams::default(),
            simdelay: 0,
            tstovfl: false,
            directio: false,
            rearch_stage_copy: 0,
            queue_time_limit: Interval::default(),
            change_flag: ChangeMask::new(),
        }
    }

    /// Copy name, e.g. `images.1` or `images.1R`.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn copy_name(&self) -> Result<CopyName, Error> {
        self.name.parse()
    }

    pub fn archmax(&self) -> Option<FileSize> {
        self.archmax
    }

    pub fn set_archmax(&mut self, size: Option<FileSize>) {
        self.archmax = size;
        self.change_flag.set(CopyParamsFlags::ARCHMAX);
    }

    pub fn reset_archmax(&mut self) {
        self.change_flag.reset(CopyParamsFlags::ARCHMAX);
    }

    pub fn bufsize(&self) -> i32 {
        self.bufsize
    }

    pub fn set_bufsize(&mut self, bufsize: i32) {
        self.bufsize = bufsize;
        self.change_flag.set(CopyParamsFlags::BUFSIZE);
    }

    pub fn reset_bufsize(&mut self) {
        self.change_flag.reset(CopyParamsFlags::BUFSIZE);
    }

    pub fn buflock(&self) -> bool {
        self.buflock
    }

    pub fn set_buflock(&mut self, lock: bool) {
        self.buflock = lock;
        self.change_flag.set(CopyParamsFlags::BUFLOCK);
    }

    pub fn reset_buflock(&mut self) {
        self.change_flag.reset(CopyParamsFlags::BUFLOCK);
    }

    pub fn drives(&self) -> i32 {
        self.drives
    }

    pub fn set_drives(&mut self, drives: i32) {
        self.drives = drives;
        self.change_flag.set(CopyParamsFlags::DRIVES);
    }

    pub fn reset_drives(&mut self) {
        self.change_flag.reset(CopyParamsFlags::DRIVES);
    }

    pub fn drivemax(&self) -> Option<FileSize> {
        self.drivemax
    }

    pub fn set_drivemax(&mut self, size: Option<FileSize>) {
        self.drivemax = size;
        self.change_flag.set(CopyParamsFlags::DRIVEMAX);
    }

    pub fn reset_drivemax(&mut self) {
        self.change_flag.reset(CopyParamsFlags::DRIVEMAX);
    }

    pub fn drivemin(&self) -> Option<FileSize> {
        self.drivemin
    }

    pub fn set_drivemin(&mut self, size: Option<FileSize>) {
        self.drivemin = size;
        self.change_flag.set(CopyParamsFlags::DRIVEMIN);
    }

    pub fn reset_drivemin(&mut self) {
        self.change_flag.reset(CopyParamsFlags::DRIVEMIN);
    }

    pub fn ovflmin(&self) -> Option<FileSize> {
        self.ovflmin
    }

    pub fn set_ovflmin(&mut self, size: Option<FileSize>) {
        self.ovflmin = size;
        self.change_flag.set(CopyParamsFlags::OVFLMIN);
    }

    pub fn reset_ovflmin(&mut self) {
        self.change_flag.reset(CopyParamsFlags::OVFLMIN);
    }

    pub fn disk_volume(&self) -> &str {
        &self.disk_volume
    }

    pub fn set_disk_volume(&mut self, volume: &str) {
        self.disk_volume = volume.to_string();
        self.change_flag.set(CopyParamsFlags::DISK_VOLUME);
    }

    pub fn reset_disk_volume(&mut self) {
        self.change_flag.reset(CopyParamsFlags::DISK_VOLUME);
    }

    pub fn fillvsns(&self) -> bool {
        self.fillvsns
    }

    pub fn fillvsns_min(&self) -> Option<FileSize> {
        self.fillvsns_min
    }

    /// `fillvsns_min` travels with the `fillvsns` flag.
    pub fn set_fillvsns(&mut self, fill: bool, min: Option<FileSize>) {
        self.fillvsns = fill;
        self.fillvsns_min = min;
        self.change_flag.set(CopyParamsFlags::FILLVSNS);
    }

    pub fn reset_fillvsns(&mut self) {
        self.change_flag.reset(CopyParamsFlags::FILLVSNS);
    }

    pub fn tapenonstop(&self) -> bool {
        self.tapenonstop
    }

    pub fn set_tapenonstop(&mut self, nonstop: bool) {
        self.tapenonstop = nonstop;
        self.change_flag.set(CopyParamsFlags::TAPENONSTOP);
    }

    pub fn reset_tapenonstop(&mut self) {
        self.change_flag.reset(CopyParamsFlags::TAPENONSTOP);
    }

    pub fn reserve(&self) -> ReserveMethod {
        ReserveMethod::from_bits_truncate(self.reserve)
    }

    pub fn set_reserve(&mut self, method: ReserveMethod) {
        self.reserve = method.bits();
        self.change_flag.set(CopyParamsFlags::RESERVE);
    }

    pub fn reset_reserve(&mut self) {
        self.change_flag.reset(CopyParamsFlags::RESERVE);
    }

    pub fn priorities(&self) -> &[Priority] {
        &self.priorities
    }

    pub fn priority(&self, name: &str) -> Option<&Priority> {
        self.priorities.iter().find(|p| p.name == name)
    }

    /// Sets (or adds) the priority `name`.
    pub fn set_priority(&mut self, name: &str, value: f32) -> Result<(), Error> {
        if !PRIORITY_NAMES.contains(&name) {
            bail!("unknown archive priority '{}'", name);
        }
        match self.priorities.iter_mut().find(|p| p.name == name) {
            Some(priority) => priority.set_value(value),
            None => {
                let mut priority = Priority::new(name, value);
                priority.set_value(value);
                self.priorities.push(priority);
            }
        }
        Ok(())
    }

    pub fn reset_priority(&mut self, name: &str) {
        if let Some(priority) = self.priorities.iter_mut().find(|p| p.name == name) {
            priority.reset_value();
        }
    }

    pub fn unarchage(&self) -> bool {
        self.unarchage
    }

    pub fn set_unarchage(&mut self, use_modify_age: bool) {
        self.unarchage = use_modify_age;
        self.change_flag.set(CopyParamsFlags::UNARCHAGE);
    }

    pub fn reset_unarchage(&mut self) {
        self.change_flag.reset(CopyParamsFlags::UNARCHAGE);
    }

    pub fn join_method(&self) -> JoinMethod {
        self.join
    }

    pub fn set_join_method(&mut self, join: JoinMethod) {
        self.join = join;
        self.change_flag.set(CopyParamsFlags::JOIN);
    }

    pub fn reset_join_method(&mut self) {
        self.change_flag.reset(CopyParamsFlags::JOIN);
    }

    pub fn sort_method(&self) -> SortMethod {
        self.sort
    }

    pub fn set_sort_method(&mut self, sort: SortMethod) {
        self.sort = sort;
        self.change_flag.set(CopyParamsFlags::SORT);
    }

    pub fn reset_sort_method(&mut self) {
        self.change_flag.reset(CopyParamsFlags::SORT);
    }

    pub fn reverse_sort_method(&self) -> SortMethod {
        self.rsort
    }

    /// Sets the reverse sort method.
    ///
    /// Note: this marks the *forward* sort flag, not `rsort`. Existing
    /// clients depend on that bit, keep it until the daemon header says
    /// otherwise.
    pub fn set_reverse_sort_method(&mut self, rsort: SortMethod) {
        self.rsort = rsort;
        self.change_flag.set(CopyParamsFlags::SORT);
    }

    pub fn reset_reverse_sort_method(&mut self) {
        self.change_flag.reset(CopyParamsFlags::RSORT);
    }

    pub fn offline_copy_method(&self) -> OfflineCopyMethod {
        self.offline_copy
    }

    pub fn set_offline_copy_method(&mut self, method: OfflineCopyMethod) {
        self.offline_copy = method;
        self.change_flag.set(CopyParamsFlags::OFFLINE_COPY);
    }

    pub fn reset_offline_copy_method(&mut self) {
        self.change_flag.reset(CopyParamsFlags::OFFLINE_COPY);
    }

    pub fn start_age(&self) -> Interval {
        self.startage
    }

    pub fn set_start_age(&mut self, age: Interval) {
        self.startage = age;
        self.change_flag.set(CopyParamsFlags::STARTAGE);
    }

    pub fn reset_start_age(&mut self) {
        self.change_flag.reset(CopyParamsFlags::STARTAGE);
    }

    pub fn start_count(&self) -> i32 {
        self.startcount
    }

    pub fn set_start_count(&mut self, count: i32) {
        self.startcount = count;
        self.change_flag.set(CopyParamsFlags::STARTCOUNT);
    }

    pub fn reset_start_count(&mut self) {
        self.change_flag.reset(CopyParamsFlags::STARTCOUNT);
    }

    pub fn start_size(&self) -> Option<FileSize> {
        self.startsize
    }

    pub fn set_start_size(&mut self, size: Option<FileSize>) {
        self.startsize = size;
        self.change_flag.set(CopyParamsFlags::STARTSIZE);
    }

    pub fn reset_start_size(&mut self) {
        self.change_flag.reset(CopyParamsFlags::STARTSIZE);
    }

    pub fn recycler(&self) -> &RecyclerParams {
        &self.recycle
    }

    /// The recycler record tracks its own changes.
    pub fn recycler_mut(&mut self) -> &mut RecyclerParams {
        &mut self.recycle
    }

    pub fn simdelay(&self) -> i32 {
        self.simdelay
    }

    pub fn set_simdelay(&mut self, delay: i32) {
        self.simdelay = delay;
        self.change_flag.set(CopyParamsFlags::SIMDELAY);
    }

    pub fn reset_simdelay(&mut self) {
        self.change_flag.reset(CopyParamsFlags::SIMDELAY);
    }

    pub fn tstovfl(&self) -> bool {
        self.tstovfl
    }

    pub fn set_tstovfl(&mut self, test: bool) {
        self.tstovfl = test;
        self.change_flag.set(CopyParamsFlags::TSTOVFL);
    }

    pub fn reset_tstovfl(&mut self) {
        self.change_flag.reset(CopyParamsFlags::TSTOVFL);
    }

    pub fn directio(&self) -> bool {
        self.directio
    }

    pub fn set_directio(&mut self, directio: bool) {
        self.directio = directio;
        self.change_flag.set(CopyParamsFlags::DIRECTIO);
    }

    pub fn reset_directio(&mut self) {
        self.change_flag.reset(CopyParamsFlags::DIRECTIO);
    }

    /// Copy to stage from when rearchiving, 0 if not specified.
    pub fn rearch_stage_copy(&self) -> i16 {
        self.rearch_stage_copy
    }

    pub fn set_rearch_stage_copy(&mut self, copy: i16) {
        self.rearch_stage_copy = copy;
        self.change_flag.set(CopyParamsFlags::REARCH_STAGE_COPY);
    }

    pub fn reset_rearch_stage_copy(&mut self) {
        self.change_flag.reset(CopyParamsFlags::REARCH_STAGE_COPY);
    }

    pub fn queue_time_limit(&self) -> Interval {
        self.queue_time_limit
    }

    pub fn set_queue_time_limit(&mut self, limit: Interval) {
        self.queue_time_limit = limit;
        self.change_flag.set(CopyParamsFlags::QUEUE_TIME_LIMIT);
    }

    pub fn reset_queue_time_limit(&mut self) {
        self.change_flag.reset(CopyParamsFlags::QUEUE_TIME_LIMIT);
    }

    fn check_not_set(&self) -> Result<(), Error> {
        let mask = &self.change_flag;
        let requested = [
            (CopyParamsFlags::JOIN, self.join == JoinMethod::NotSet, "join"),
            (CopyParamsFlags::SORT, self.sort == SortMethod::NotSet && self.rsort == SortMethod::NotSet, "sort"),
            (CopyParamsFlags::RSORT, self.rsort == SortMethod::NotSet, "rsort"),
            (
                CopyParamsFlags::OFFLINE_COPY,
                self.offline_copy == OfflineCopyMethod::NotSet,
                "offline_copy",
            ),
        ];
        for (flag, not_set, name) in requested {
            if mask.is_set(flag) && not_set {
                bail!(
                    "copy '{}': '{}' cannot be submitted as NOT_SET - reset the field instead",
                    self.name,
                    name
                );
            }
        }
        Ok(())
    }
}

impl Tracked for CopyParams {
    type Flags = CopyParamsFlags;

    fn change_mask(&self) -> &ChangeMask<CopyParamsFlags> {
        &self.change_flag
    }

    fn change_mask_mut(&mut self) -> &mut ChangeMask<CopyParamsFlags> {
        &mut self.change_flag
    }

    fn apply_changes(&self, target: &mut Self) {
        apply_flagged!(self, target, CopyParamsFlags, {
            ARCHMAX => archmax,
            BUFSIZE => bufsize,
            BUFLOCK => buflock,
            DRIVES => drives,
            DRIVEMAX => drivemax,
            DRIVEMIN => drivemin,
            OVFLMIN => ovflmin,
            DISK_VOLUME => disk_volume,
            FILLVSNS => fillvsns,
            FILLVSNS => fillvsns_min,
            TAPENONSTOP => tapenonstop,
            RESERVE => reserve,
            UNARCHAGE => unarchage,
            JOIN => join,
            SORT => sort,
            RSORT => rsort,
            OFFLINE_COPY => offline_copy,
            STARTAGE => startage,
            STARTCOUNT => startcount,
            STARTSIZE => startsize,
            SIMDELAY => simdelay,
            TSTOVFL => tstovfl,
            DIRECTIO => directio,
            REARCH_STAGE_COPY => rearch_stage_copy,
            QUEUE_TIME_LIMIT => queue_time_limit,
        });

        apply_keyed(&self.priorities, &mut target.priorities, |p| p.name.clone());

        self.recycle.apply_changes(&mut target.recycle);
    }

    fn is_dirty(&self) -> bool {
        self.change_flag.is_dirty()
            || self.recycle.is_dirty()
            || self.priorities.iter().any(|p| p.is_dirty())
    }

    fn clear_changes(&mut self) {
        self.change_flag.clear();
        self.recycle.clear_changes();
        for priority in self.priorities.iter_mut() {
            priority.clear_changes();
        }
    }

    fn collect_unsupported(&self, version: ProtocolVersion, prefix: &str, out: &mut Vec<String>) {
        for name in self.change_flag.unsupported_by(version) {
            out.push(format!("{}{}", prefix, name));
        }
        self.recycle
            .collect_unsupported(version, &format!("{}recycle.", prefix), out);
        for priority in self.priorities.iter() {
            let prefix = format!("{}priority.{}.", prefix, priority.name);
            priority.collect_unsupported(version, &prefix, out);
        }
    }

    fn validate(&self) -> Result<(), Error> {
        let copy_name = self.copy_name()?;
        let mask = &self.change_flag;

        self.check_not_set()?;

        if mask.is_set(CopyParamsFlags::BUFSIZE) && self.bufsize <= 0 {
            bail!("copy '{}': invalid buffer size {}", self.name, self.bufsize);
        }
        if mask.is_set(CopyParamsFlags::DRIVES) && self.drives <= 0 {
            bail!("copy '{}': invalid drive count {}", self.name, self.drives);
        }
        if mask.is_set(CopyParamsFlags::STARTCOUNT) && self.startcount < 0 {
            bail!("copy '{}': negative start count", self.name);
        }
        let drive_sizes = mask.is_set(CopyParamsFlags::DRIVEMIN) || mask.is_set(CopyParamsFlags::DRIVEMAX);
        if let (true, Some(min), Some(max)) = (drive_sizes, self.drivemin, self.drivemax) {
            if min > max {
                bail!(
                    "copy '{}': drivemin {} is larger than drivemax {}",
                    self.name,
                    min,
                    max
                );
            }
        }
        if mask.is_set(CopyParamsFlags::REARCH_STAGE_COPY) {
            if !copy_name.rearchive {
                bail!(
                    "copy '{}': rearch_stage_copy only applies to rearchive copies",
                    self.name
                );
            }
            if self.rearch_stage_copy < 0 || self.rearch_stage_copy as usize > MAX_COPIES {
                bail!(
                    "copy '{}': invalid stage copy {}",
                    self.name,
                    self.rearch_stage_copy
                );
            }
        }

        for priority in self.priorities.iter().filter(|p| p.is_dirty()) {
            priority
                .validate()
                .map_err(|err| format_err!("copy '{}': {}", self.name, err))?;
        }

        self.recycle
            .validate()
            .map_err(|err| format_err!("copy '{}': {}", self.name, err))
    }
}

impl fmt::Display for CopyParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "name={} archmax={} bufsize={} buflock={} drives={} drivemax={} drivemin={} \
             ovflmin={} disk_volume={} fillvsns={} fillvsns_min={} tapenonstop={} reserve={:#x} \
             unarchage={} join={} sort={} rsort={} offline_copy={} startage={} startcount={} \
             startsize={} simdelay={} tstovfl={} directio={} rearch_stage_copy={} \
             queue_time_limit={} priorities=[",
            self.name,
            opt_size(&self.archmax),
            self.bufsize,
            self.buflock,
            self.drives,
            opt_size(&self.drivemax),
            opt_size(&self.drivemin),
            opt_size(&self.ovflmin),
            self.disk_volume,
            self.fillvsns,
            opt_size(&self.fillvsns_min),
            self.tapenonstop,
            self.reserve,
            self.unarchage,
            self.join,
            self.sort,
            self.rsort,
            self.offline_copy,
            self.startage,
            self.startcount,
            opt_size(&self.startsize),
            self.simdelay,
            self.tstovfl,
            self.directio,
            self.rearch_stage_copy,
            self.queue_time_limit,
        )?;
        for (i, priority) in self.priorities.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", priority)?;
        }
        write!(f, "] recycle=[{}] change={}", self.recycle, self.change_flag)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn join_method_set_and_reset() {
        let mut params = CopyParams::new("images.1");
        assert_eq!(params.join_method(), JoinMethod::NotSet);

        params.set_join_method(JoinMethod::Path);
        assert_eq!(params.join_method().code(), 1);
        assert!(params.change_mask().is_set(CopyParamsFlags::JOIN));

        params.reset_join_method();
        assert!(!params.change_mask().is_set(CopyParamsFlags::JOIN));
        assert_eq!(params.join_method(), JoinMethod::Path);
    }

    #[test]
    fn reverse_sort_marks_forward_sort_flag() {
        let mut params = CopyParams::new("images.1");
        params.set_reverse_sort_method(SortMethod::Size);

        assert_eq!(params.reverse_sort_method(), SortMethod::Size);
        assert!(params.change_mask().is_set(CopyParamsFlags::SORT));
        assert!(!params.change_mask().is_set(CopyParamsFlags::RSORT));
        assert_eq!(params.change_mask().bits(), 0x0010_0000);
    }

    #[test]
    fn setting_twice_sets_bit_once() {
        let mut params = CopyParams::new("images.2");
        params.set_drives(2);
        params.set_drives(2);
        assert_eq!(params.change_mask().bits(), CopyParamsFlags::DRIVES.bits());
        assert_eq!(params.change_mask().names(), vec!["drives"]);
    }

    #[test]
    fn wire_enum_codes() -> Result<(), Error> {
        assert_eq!(SortMethod::try_from(-1)?, SortMethod::NotSet);
        assert_eq!(SortMethod::try_from(4)?, SortMethod::Size);
        assert!(SortMethod::try_from(5).is_err());
        assert_eq!(OfflineCopyMethod::StageAll.code(), 3);
        assert_eq!(JoinMethod::NoJoin.code(), 0);
        assert_eq!(OfflineCopyMethod::StageAhead.to_string(), "stage-ahead");
        assert_eq!("path".parse::<JoinMethod>()?, JoinMethod::Path);
        Ok(())
    }

    #[test]
    fn not_set_cannot_be_submitted() {
        let mut params = CopyParams::new("images.1");
        params.set_offline_copy_method(OfflineCopyMethod::NotSet);
        assert!(params.validate().is_err());

        params.reset_offline_copy_method();
        assert!(params.validate().is_ok());
    }

    #[test]
    fn apply_only_flagged_fields() {
        let mut base = CopyParams::new("images.1");
        base.set_bufsize(4);
        base.set_drives(1);
        base.clear_changes();

        let mut edit = base.clone();
        edit.set_drives(3);
        edit.set_bufsize(8);
        edit.reset_bufsize();
        edit.set_priority("age", 2.5).unwrap();

        let mut target = base.clone();
        edit.apply_changes(&mut target);

        assert_eq!(target.drives(), 3);
        assert_eq!(target.bufsize(), 4);
        assert_eq!(target.priority("age").map(|p| p.value()), Some(2.5));
        assert!(!target.is_dirty());
    }

    #[test]
    fn rearch_stage_copy_needs_rearchive_copy() {
        let mut params = CopyParams::new("images.1");
        params.set_rearch_stage_copy(2);
        assert!(params.validate().is_err());

        let mut params = CopyParams::new("images.1R");
        params.set_rearch_stage_copy(2);
        assert!(params.validate().is_ok());
        assert_eq!(
            params.change_mask().unsupported_by(ProtocolVersion::V4_4),
            vec!["rearch_stage_copy"]
        );
    }

    #[test]
    fn drive_sizes_checked_only_when_flagged() {
        let mut params = CopyParams::new("images.1");
        params.set_drivemin(Some(FileSize::new(1 << 30)));
        params.set_drivemax(Some(FileSize::new(1 << 20)));
        assert!(params.validate().is_err());

        params.clear_changes();
        params.set_drives(2);
        assert!(params.validate().is_ok());

        params.set_drivemax(Some(FileSize::new(1 << 20)));
        assert!(params.validate().is_err());
    }

    #[test]
    fn display_contains_hex_mask() {
        let mut params = CopyParams::new("images.1");
        params.set_archmax(Some(FileSize::new(1 << 30)));
        let text = params.to_string();
        assert!(text.starts_with("name=images.1 archmax=1G "));
        assert!(text.ends_with("change=0x0000000000000100"));
    }
}
