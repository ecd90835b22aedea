//! Release and stage attributes of a criterion
//!
//! Since 5.0 a criterion carries a set of attribute bits, so several
//! release (or stage) attributes can be requested at once. Older daemons
//! only know a single character per kind. [`LegacyAttr`] is the
//! projection from the bit set onto that character: when more than one
//! bit of a kind is set there is no legacy spelling, and the projection
//! yields [`LegacyAttr::Ambiguous`] (sent as `'Z'`) instead of picking
//! one of them.

use anyhow::{bail, Error};

bitflags::bitflags! {
    /// Release/stage attribute bits (`attr_flags` on the wire).
    ///
    /// There is no change flag per bit: a bit that is present was set.
    pub struct AttrFlags: i32 {
        const RELEASE_DEFAULT = 0x0000_0001;
        const RELEASE_NEVER = 0x0000_0002;
        const RELEASE_PARTIAL = 0x0000_0004;
        const PARTIAL_SIZE = 0x0000_0008;
        const RELEASE_ALWAYS = 0x0000_0010;
        const RELEASE_ATTR_SET = 0x0000_001f;

        const STAGE_DEFAULT = 0x0000_0020;
        const STAGE_NEVER = 0x0000_0040;
        const STAGE_ASSOCIATIVE = 0x0000_0080;
        const STAGE_ATTR_SET = 0x0000_00e0;
    }
}

impl Default for AttrFlags {
    fn default() -> Self {
        Self::empty()
    }
}

pub const SET_DEFAULT_RELEASE: char = 'd';
pub const NEVER_RELEASE: char = 'n';
pub const PARTIAL_RELEASE: char = 'p';
pub const PARTIAL_SIZE: char = 's';
pub const ALWAYS_RELEASE: char = 'a';
pub const RELEASE_NOT_DEFINED: char = '0';

pub const SET_DEFAULT_STAGE: char = 'd';
pub const NEVER_STAGE: char = 'n';
pub const ASSOCIATIVE_STAGE: char = 'a';
pub const STAGE_NOT_DEFINED: char = '0';

/// Legacy value sent when several attributes of one kind are set.
pub const AMBIGUOUS_ATTR: char = 'Z';

// Scan order of the projection, highest priority first.
const RELEASE_ORDER: [(AttrFlags, char); 5] = [
    (AttrFlags::RELEASE_DEFAULT, SET_DEFAULT_RELEASE),
    (AttrFlags::RELEASE_NEVER, NEVER_RELEASE),
    (AttrFlags::RELEASE_PARTIAL, PARTIAL_RELEASE),
    (AttrFlags::PARTIAL_SIZE, PARTIAL_SIZE),
    (AttrFlags::RELEASE_ALWAYS, ALWAYS_RELEASE),
];

const STAGE_ORDER: [(AttrFlags, char); 3] = [
    (AttrFlags::STAGE_DEFAULT, SET_DEFAULT_STAGE),
    (AttrFlags::STAGE_NEVER, NEVER_STAGE),
    (AttrFlags::STAGE_ASSOCIATIVE, ASSOCIATIVE_STAGE),
];

/// Single character form of an attribute set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegacyAttr {
    /// No attribute of this kind is set.
    NotDefined,
    /// Exactly one attribute is set.
    Single(char),
    /// More than one attribute is set; not expressible as one character.
    Ambiguous,
}

impl LegacyAttr {
    pub fn release(flags: AttrFlags) -> Self {
        project(flags, &RELEASE_ORDER)
    }

    pub fn stage(flags: AttrFlags) -> Self {
        project(flags, &STAGE_ORDER)
    }

    /// The character for the wire. `not_defined` is the kind's "unset" value.
    pub fn as_char(&self, not_defined: char) -> char {
        match self {
            LegacyAttr::NotDefined => not_defined,
            LegacyAttr::Single(c) => *c,
            LegacyAttr::Ambiguous => AMBIGUOUS_ATTR,
        }
    }
}

fn project(flags: AttrFlags, order: &[(AttrFlags, char)]) -> LegacyAttr {
    let mut found = None;
    let mut count = 0;

    for (flag, c) in order {
        if flags.contains(*flag) {
            count += 1;
            if found.is_none() {
                found = Some(*c);
            }
        }
    }

    match (count, found) {
        (1, Some(c)) => LegacyAttr::Single(c),
        (0, _) => LegacyAttr::NotDefined,
        _ => LegacyAttr::Ambiguous,
    }
}

/// A release attribute of the modern API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseAttr {
    /// Drop explicit settings and use the file system default.
    ResetToDefault,
    Never,
    Partial,
    /// Partial release keeping the given size in kilobytes online.
    PartialSize(i32),
    Always,
}

impl ReleaseAttr {
    pub fn flag(&self) -> AttrFlags {
        match self {
            ReleaseAttr::ResetToDefault => AttrFlags::RELEASE_DEFAULT,
            ReleaseAttr::Never => AttrFlags::RELEASE_NEVER,
            ReleaseAttr::Partial => AttrFlags::RELEASE_PARTIAL,
            ReleaseAttr::PartialSize(_) => AttrFlags::PARTIAL_SIZE,
            ReleaseAttr::Always => AttrFlags::RELEASE_ALWAYS,
        }
    }

    pub fn legacy_char(&self) -> char {
        match self {
            ReleaseAttr::ResetToDefault => SET_DEFAULT_RELEASE,
            ReleaseAttr::Never => NEVER_RELEASE,
            ReleaseAttr::Partial => PARTIAL_RELEASE,
            ReleaseAttr::PartialSize(_) => PARTIAL_SIZE,
            ReleaseAttr::Always => ALWAYS_RELEASE,
        }
    }

    /// Translates a legacy character. The legacy form carries no size, so
    /// `'s'` decodes to a partial size of 0.
    pub fn from_legacy(c: char) -> Result<Option<Self>, Error> {
        Ok(Some(match c {
            SET_DEFAULT_RELEASE => ReleaseAttr::ResetToDefault,
            NEVER_RELEASE => ReleaseAttr::Never,
            PARTIAL_RELEASE => ReleaseAttr::Partial,
            PARTIAL_SIZE => ReleaseAttr::PartialSize(0),
            ALWAYS_RELEASE => ReleaseAttr::Always,
            RELEASE_NOT_DEFINED => return Ok(None),
            _ => bail!("invalid release attribute '{}'", c),
        }))
    }

    /// Decodes the release bits of `flags` in projection order.
    pub fn decode(flags: AttrFlags, partial_size: i32) -> Vec<Self> {
        RELEASE_ORDER
            .iter()
            .filter(|(flag, _)| flags.contains(*flag))
            .map(|(flag, _)| match *flag {
                AttrFlags::RELEASE_DEFAULT => ReleaseAttr::ResetToDefault,
                AttrFlags::RELEASE_NEVER => ReleaseAttr::Never,
                AttrFlags::RELEASE_PARTIAL => ReleaseAttr::Partial,
                AttrFlags::PARTIAL_SIZE => ReleaseAttr::PartialSize(partial_size),
                _ => ReleaseAttr::Always,
            })
            .collect()
    }

    /// Encodes a list of attributes into bits plus the partial size.
    pub fn encode(attrs: &[ReleaseAttr]) -> (AttrFlags, i32) {
        let mut flags = AttrFlags::empty();
        let mut partial_size = 0;
        for attr in attrs {
            flags |= attr.flag();
            if let ReleaseAttr::PartialSize(size) = attr {
                partial_size = *size;
            }
        }
        (flags, partial_size)
    }
}

/// A stage attribute of the modern API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageAttr {
    ResetToDefault,
    Never,
    Associative,
}

impl StageAttr {
    pub fn flag(&self) -> AttrFlags {
        match self {
            StageAttr::ResetToDefault => AttrFlags::STAGE_DEFAULT,
            StageAttr::Never => AttrFlags::STAGE_NEVER,
            StageAttr::Associative => AttrFlags::STAGE_ASSOCIATIVE,
        }
    }

    pub fn legacy_char(&self) -> char {
        match self {
            StageAttr::ResetToDefault => SET_DEFAULT_STAGE,
            StageAttr::Never => NEVER_STAGE,
            StageAttr::Associative => ASSOCIATIVE_STAGE,
        }
    }

    pub fn from_legacy(c: char) -> Result<Option<Self>, Error> {
        Ok(Some(match c {
            SET_DEFAULT_STAGE => StageAttr::ResetToDefault,
            NEVER_STAGE => StageAttr::Never,
            ASSOCIATIVE_STAGE => StageAttr::Associative,
            STAGE_NOT_DEFINED => return Ok(None),
            _ => bail!("invalid stage attribute '{}'", c),
        }))
    }

    pub fn decode(flags: AttrFlags) -> Vec<Self> {
        let mut list = Vec::new();
        if flags.contains(AttrFlags::STAGE_DEFAULT) {
            list.push(StageAttr::ResetToDefault);
        }
        if flags.contains(AttrFlags::STAGE_NEVER) {
            list.push(StageAttr::Never);
        }
        if flags.contains(AttrFlags::STAGE_ASSOCIATIVE) {
            list.push(StageAttr::Associative);
        }
        list
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn single_release_bit_projects_to_its_char() {
        for attr in [
            ReleaseAttr::ResetToDefault,
            ReleaseAttr::Never,
            ReleaseAttr::Partial,
            ReleaseAttr::PartialSize(64),
            ReleaseAttr::Always,
        ] {
            assert_eq!(
                LegacyAttr::release(attr.flag()),
                LegacyAttr::Single(attr.legacy_char())
            );
        }
    }

    #[test]
    fn several_bits_are_ambiguous() {
        let flags = AttrFlags::RELEASE_NEVER | AttrFlags::RELEASE_ALWAYS;
        assert_eq!(LegacyAttr::release(flags), LegacyAttr::Ambiguous);
        assert_eq!(LegacyAttr::release(flags).as_char(RELEASE_NOT_DEFINED), 'Z');

        let flags = AttrFlags::STAGE_NEVER | AttrFlags::STAGE_ASSOCIATIVE;
        assert_eq!(LegacyAttr::stage(flags), LegacyAttr::Ambiguous);
    }

    #[test]
    fn kinds_do_not_interfere() {
        let flags = AttrFlags::RELEASE_PARTIAL | AttrFlags::STAGE_NEVER;
        assert_eq!(LegacyAttr::release(flags), LegacyAttr::Single('p'));
        assert_eq!(LegacyAttr::stage(flags), LegacyAttr::Single('n'));

        assert_eq!(
            LegacyAttr::stage(AttrFlags::RELEASE_ATTR_SET),
            LegacyAttr::NotDefined
        );
        assert_eq!(
            LegacyAttr::NotDefined.as_char(STAGE_NOT_DEFINED),
            STAGE_NOT_DEFINED
        );
    }

    #[test]
    fn legacy_chars_round_trip() -> Result<(), Error> {
        assert_eq!(ReleaseAttr::from_legacy('p')?, Some(ReleaseAttr::Partial));
        assert_eq!(ReleaseAttr::from_legacy('s')?, Some(ReleaseAttr::PartialSize(0)));
        assert_eq!(ReleaseAttr::from_legacy('0')?, None);
        assert!(ReleaseAttr::from_legacy('Z').is_err());

        assert_eq!(StageAttr::from_legacy('a')?, Some(StageAttr::Associative));
        assert!(StageAttr::from_legacy('p').is_err());
        Ok(())
    }

    #[test]
    fn encode_decode_release_list() {
        let (flags, size) = ReleaseAttr::encode(&[ReleaseAttr::Never, ReleaseAttr::PartialSize(128)]);
        assert_eq!(flags, AttrFlags::RELEASE_NEVER | AttrFlags::PARTIAL_SIZE);
        assert_eq!(size, 128);
        assert_eq!(
            ReleaseAttr::decode(flags, size),
            vec![ReleaseAttr::Never, ReleaseAttr::PartialSize(128)]
        );
    }
}
