//! Per-copy retention settings

use std::fmt;

use anyhow::{bail, Error};
use serde::{Deserialize, Serialize};

use crate::{ChangeMask, Interval, MissingEntry, Tracked, MAX_COPIES};

change_flags! {
    /// Change flags of [`ArchiveCopy`] (`ar_set_copy_cfg_t`).
    pub struct ArchiveCopyFlags: u32 = "ar_set_copy_cfg" {
        const AR_AGE = 0x0000_0001, "ar_age", V4_2;
        const RELEASE = 0x0000_0002, "release", V4_2;
        const NORELEASE = 0x0000_0004, "norelease", V4_2;
        const UN_AR_AGE = 0x0000_0008, "un_ar_age", V4_2;
    }
}

/// Retention settings of one archive copy (copy 1 to 4).
///
/// `release` and `norelease` are independent switches, both can be set
/// or cleared at the same time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArchiveCopy {
    copy_seq: u8,
    ar_age: Interval,
    release: bool,
    norelease: bool,
    un_ar_age: Interval,
    change_flag: ChangeMask<ArchiveCopyFlags>,
}

impl ArchiveCopy {
    pub fn new(copy_seq: u8) -> Self {
        Self {
            copy_seq,
            ar_age: Interval::default(),
            release: false,
            norelease: false,
            un_ar_age: Interval::default(),
            change_flag: ChangeMask::new(),
        }
    }

    /// Copy number, 1 based.
    pub fn copy_seq(&self) -> u8 {
        self.copy_seq
    }

    pub fn ar_age(&self) -> Interval {
        self.ar_age
    }

    pub fn set_ar_age(&mut self, age: Interval) {
        self.ar_age = age;
        self.change_flag.set(ArchiveCopyFlags::AR_AGE);
    }

    pub fn reset_ar_age(&mut self) {
        self.change_flag.reset(ArchiveCopyFlags::AR_AGE);
    }

    pub fn release(&self) -> bool {
        self.release
    }

    pub fn set_release(&mut self, release: bool) {
        self.release = release;
        self.change_flag.set(ArchiveCopyFlags::RELEASE);
    }

    pub fn reset_release(&mut self) {
        self.change_flag.reset(ArchiveCopyFlags::RELEASE);
    }

    pub fn norelease(&self) -> bool {
        self.norelease
    }

    pub fn set_norelease(&mut self, norelease: bool) {
        self.norelease = norelease;
        self.change_flag.set(ArchiveCopyFlags::NORELEASE);
    }

    pub fn reset_norelease(&mut self) {
        self.change_flag.reset(ArchiveCopyFlags::NORELEASE);
    }

    pub fn un_ar_age(&self) -> Interval {
        self.un_ar_age
    }

    pub fn set_un_ar_age(&mut self, age: Interval) {
        self.un_ar_age = age;
        self.change_flag.set(ArchiveCopyFlags::UN_AR_AGE);
    }

    pub fn reset_un_ar_age(&mut self) {
        self.change_flag.reset(ArchiveCopyFlags::UN_AR_AGE);
    }
}

impl Tracked for ArchiveCopy {
    type Flags = ArchiveCopyFlags;

    fn change_mask(&self) -> &ChangeMask<ArchiveCopyFlags> {
        &self.change_flag
    }

    fn change_mask_mut(&mut self) -> &mut ChangeMask<ArchiveCopyFlags> {
        &mut self.change_flag
    }

    fn apply_changes(&self, target: &mut Self) {
        apply_flagged!(self, target, ArchiveCopyFlags, {
            AR_AGE => ar_age,
            RELEASE => release,
            NORELEASE => norelease,
            UN_AR_AGE => un_ar_age,
        });
    }

    fn validate(&self) -> Result<(), Error> {
        if self.copy_seq == 0 || self.copy_seq as usize > MAX_COPIES {
            bail!(
                "invalid copy number {} - must be between 1 and {}",
                self.copy_seq,
                MAX_COPIES
            );
        }
        Ok(())
    }
}

impl fmt::Display for ArchiveCopy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "copy={} ar_age={} release={} norelease={} un_ar_age={} change={}",
            self.copy_seq, self.ar_age, self.release, self.norelease, self.un_ar_age, self.change_flag,
        )
    }
}

/// Copies `src` into the slots of `copies`, first free slot first.
pub(crate) fn fill_copy_slots(
    copies: &mut [Option<ArchiveCopy>; MAX_COPIES],
    src: Vec<ArchiveCopy>,
) -> Result<(), Error> {
    if src.len() > MAX_COPIES {
        bail!("too many archive copies ({} > {})", src.len(), MAX_COPIES);
    }
    for (i, copy) in src.iter().enumerate() {
        if src[..i].iter().any(|c| c.copy_seq == copy.copy_seq) {
            bail!("duplicate archive copy {}", copy.copy_seq);
        }
    }
    *copies = Default::default();
    for (slot, copy) in copies.iter_mut().zip(src) {
        *slot = Some(copy);
    }
    Ok(())
}

fn find_copy<'a>(
    copies: &'a mut [Option<ArchiveCopy>; MAX_COPIES],
    copy_seq: u8,
) -> Option<&'a mut ArchiveCopy> {
    copies
        .iter_mut()
        .flatten()
        .find(|copy| copy.copy_seq == copy_seq)
}

/// Fails if the copies of `src` that `target` lacks do not fit into its
/// free slots.
pub(crate) fn check_copy_slots(
    src: &[Option<ArchiveCopy>; MAX_COPIES],
    target: &[Option<ArchiveCopy>; MAX_COPIES],
) -> Result<(), Error> {
    let missing: Vec<u8> = src
        .iter()
        .flatten()
        .map(|copy| copy.copy_seq)
        .filter(|seq| !target.iter().flatten().any(|copy| copy.copy_seq == *seq))
        .collect();
    let free = target.iter().filter(|slot| slot.is_none()).count();
    if missing.len() > free {
        return Err(MissingEntry(format!("free slot for archive copies {:?}", missing)).into());
    }
    Ok(())
}

/// Applies the flagged fields of each copy to the target copy with the
/// same copy number. Copies missing in `target` are added as a whole in
/// the first free slot.
pub(crate) fn apply_copy_slots(
    src: &[Option<ArchiveCopy>; MAX_COPIES],
    target: &mut [Option<ArchiveCopy>; MAX_COPIES],
) {
    for from in src.iter().flatten() {
        if let Some(to) = find_copy(target, from.copy_seq) {
            from.apply_changes(to);
            continue;
        }
        if let Some(slot) = target.iter_mut().find(|slot| slot.is_none()) {
            let mut copy = from.clone();
            copy.clear_changes();
            *slot = Some(copy);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn set_and_reset_keep_value() {
        let mut copy = ArchiveCopy::new(1);
        copy.set_ar_age(Interval::from_secs(240));
        assert!(copy.change_mask().is_set(ArchiveCopyFlags::AR_AGE));
        assert_eq!(copy.ar_age().as_secs(), 240);

        copy.reset_ar_age();
        assert!(!copy.change_mask().is_set(ArchiveCopyFlags::AR_AGE));
        assert_eq!(copy.ar_age().as_secs(), 240);
    }

    #[test]
    fn release_and_norelease_are_independent() {
        let mut copy = ArchiveCopy::new(2);
        copy.set_release(true);
        copy.set_norelease(true);
        assert!(copy.release() && copy.norelease());
        assert_eq!(copy.change_mask().bits(), 0x6);
        assert_eq!(copy.to_string(), "copy=2 ar_age=0s release=true norelease=true un_ar_age=0s change=0x00000006");
    }

    #[test]
    fn copy_number_range() {
        assert!(ArchiveCopy::new(0).validate().is_err());
        assert!(ArchiveCopy::new(4).validate().is_ok());
        assert!(ArchiveCopy::new(5).validate().is_err());
    }

    #[test]
    fn copies_are_matched_by_number() -> Result<(), Error> {
        let mut target: [Option<ArchiveCopy>; MAX_COPIES] = Default::default();
        fill_copy_slots(&mut target, vec![ArchiveCopy::new(1), ArchiveCopy::new(3)])?;

        let mut edit = ArchiveCopy::new(3);
        edit.set_ar_age(Interval::from_secs(600));
        let mut src: [Option<ArchiveCopy>; MAX_COPIES] = Default::default();
        fill_copy_slots(&mut src, vec![edit, ArchiveCopy::new(2)])?;

        check_copy_slots(&src, &target)?;
        apply_copy_slots(&src, &mut target);

        let ages: Vec<(u8, u32)> = target
            .iter()
            .flatten()
            .map(|c| (c.copy_seq(), c.ar_age().as_secs()))
            .collect();
        assert_eq!(ages, vec![(1, 0), (3, 600), (2, 0)]);
        assert!(target.iter().flatten().all(|c| !c.is_dirty()));
        Ok(())
    }

    #[test]
    fn copies_without_room_are_rejected() -> Result<(), Error> {
        let mut src: [Option<ArchiveCopy>; MAX_COPIES] = Default::default();
        fill_copy_slots(&mut src, vec![ArchiveCopy::new(4)])?;

        let mut target: [Option<ArchiveCopy>; MAX_COPIES] = Default::default();
        fill_copy_slots(&mut target, (1..=4).map(ArchiveCopy::new).collect())?;
        check_copy_slots(&src, &target)?;

        fill_copy_slots(&mut target, vec![1, 2, 3, 5].into_iter().map(ArchiveCopy::new).collect())?;
        let err = check_copy_slots(&src, &target).unwrap_err();
        assert!(err.downcast_ref::<MissingEntry>().is_some());

        let dup = fill_copy_slots(&mut src, vec![ArchiveCopy::new(2), ArchiveCopy::new(2)]);
        assert!(dup.is_err());
        Ok(())
    }
}
