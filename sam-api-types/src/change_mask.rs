//! Change tracking for archiver configuration records
//!
//! Every record that can be modified through the management protocol
//! carries a change mask. A bit in that mask is set by the setter of the
//! corresponding field and tells the daemon to apply the field on the
//! next submit. Unflagged fields are ignored by the daemon, no matter
//! what value they carry.
//!
//! Bit positions are dictated by the daemon's protocol header. They are
//! part of the wire format and never change. New fields take unused bits
//! and record the protocol version that introduced them, so a session
//! can refuse to send a flag that an older daemon does not know.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ProtocolVersion;

/// One entry of a change-flag table.
#[derive(Debug)]
pub struct FlagInfo<F: 'static> {
    pub flag: F,
    /// Field name as used by the daemon.
    pub name: &'static str,
    /// First protocol version that understands this flag.
    pub since: ProtocolVersion,
}

/// A bit table describing the tracked fields of one record type.
///
/// Implemented through [`change_flags!`] on top of `bitflags`.
pub trait ChangeFlags: Copy + Eq + fmt::Debug + 'static {
    /// Name of the record in the daemon's header.
    const RECORD: &'static str;
    /// Width of the mask on the wire, in bits.
    const WIDTH: u32;
    /// All known flags, including status bits.
    const TABLE: &'static [FlagInfo<Self>];
    /// Bits reported by the daemon that describe the record rather than
    /// a pending change. They are never part of a dirty set.
    const STATUS: u64;

    fn raw(self) -> u64;

    fn from_raw(bits: u64) -> Self;

    /// The flags a daemon speaking `version` understands.
    fn supported_by(version: ProtocolVersion) -> u64 {
        Self::TABLE
            .iter()
            .filter(|info| info.since <= version)
            .fold(0, |acc, info| acc | info.flag.raw())
    }

    fn info(flag: Self) -> Option<&'static FlagInfo<Self>> {
        Self::TABLE.iter().find(|info| info.flag == flag)
    }
}

/// Declares a `bitflags` type together with its versioned field table.
macro_rules! change_flags {
    (
        $(#[$outer:meta])*
        pub struct $name:ident: $ty:ty = $record:literal {
            $(
                $(#[$inner:ident $($iargs:tt)*])*
                const $flag:ident = $value:expr, $field:literal, $since:ident;
            )*
        }
        $(
            status {
                $(
                    $(#[$sinner:ident $($sargs:tt)*])*
                    const $sflag:ident = $svalue:expr, $sfield:literal;
                )*
            }
        )?
    ) => {
        bitflags::bitflags! {
            $(#[$outer])*
            pub struct $name: $ty {
                $(
                    $(#[$inner $($iargs)*])*
                    const $flag = $value;
                )*
                $($(
                    $(#[$sinner $($sargs)*])*
                    const $sflag = $svalue;
                )*)?
            }
        }

        impl $crate::ChangeFlags for $name {
            const RECORD: &'static str = $record;
            const WIDTH: u32 = <$ty>::BITS;
            const TABLE: &'static [$crate::FlagInfo<Self>] = &[
                $(
                    $crate::FlagInfo {
                        flag: Self::$flag,
                        name: $field,
                        since: $crate::ProtocolVersion::$since,
                    },
                )*
                $($(
                    $crate::FlagInfo {
                        flag: Self::$sflag,
                        name: $sfield,
                        since: $crate::ProtocolVersion::V4_2,
                    },
                )*)?
            ];
            const STATUS: u64 = 0 $($( | Self::$sflag.bits() as u64 )*)?;

            fn raw(self) -> u64 {
                self.bits() as u64
            }

            fn from_raw(bits: u64) -> Self {
                Self::from_bits_truncate(bits as $ty)
            }
        }
    };
}

/// The set of dirty fields of one record.
///
/// Setting a flag twice is the same as setting it once. Resetting a flag
/// only withdraws the field from the next submit; the stored value stays
/// as it is.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ChangeMask<F: ChangeFlags>(F);

impl<F: ChangeFlags> ChangeMask<F> {
    pub fn new() -> Self {
        Self(F::from_raw(0))
    }

    /// Builds a mask from the raw wire value. Unknown bits are dropped.
    pub fn from_bits(bits: u64) -> Self {
        Self(F::from_raw(bits))
    }

    pub fn set(&mut self, flag: F) {
        self.0 = F::from_raw(self.0.raw() | flag.raw());
    }

    pub fn reset(&mut self, flag: F) {
        self.0 = F::from_raw(self.0.raw() & !flag.raw());
    }

    pub fn is_set(&self, flag: F) -> bool {
        let bits = flag.raw();
        bits != 0 && (self.0.raw() & bits) == bits
    }

    /// Sets or clears `flag` depending on `on`. Used for status bits.
    pub fn assign(&mut self, flag: F, on: bool) {
        if on {
            self.set(flag)
        } else {
            self.reset(flag)
        }
    }

    pub fn flags(&self) -> F {
        self.0
    }

    /// Raw value including status bits, as sent over the wire.
    pub fn bits(&self) -> u64 {
        self.0.raw()
    }

    /// The dirty part of the mask.
    pub fn pending(&self) -> u64 {
        self.0.raw() & !F::STATUS
    }

    pub fn is_dirty(&self) -> bool {
        self.pending() != 0
    }

    /// Drops all pending changes, keeps status bits.
    pub fn clear(&mut self) {
        self.0 = F::from_raw(self.0.raw() & F::STATUS);
    }

    /// Names of all dirty fields, in table order.
    pub fn names(&self) -> Vec<&'static str> {
        let pending = self.pending();
        F::TABLE
            .iter()
            .filter(|info| info.flag.raw() & pending != 0)
            .map(|info| info.name)
            .collect()
    }

    /// Names of dirty fields that a daemon speaking `version` does not know.
    pub fn unsupported_by(&self, version: ProtocolVersion) -> Vec<&'static str> {
        let unknown = self.pending() & !F::supported_by(version);
        F::TABLE
            .iter()
            .filter(|info| info.flag.raw() & unknown != 0)
            .map(|info| info.name)
            .collect()
    }
}

impl<F: ChangeFlags> Default for ChangeMask<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: ChangeFlags> From<F> for ChangeMask<F> {
    fn from(flags: F) -> Self {
        Self(flags)
    }
}

impl<F: ChangeFlags> fmt::Display for ChangeMask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = (F::WIDTH / 4) as usize;
        write!(f, "0x{:0width$x}", self.bits(), width = width)
    }
}

impl<F: ChangeFlags> fmt::Debug for ChangeMask<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChangeMask({}, {:?})", self, self.names())
    }
}

impl<F: ChangeFlags> Serialize for ChangeMask<F> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.bits())
    }
}

impl<'de, F: ChangeFlags> Deserialize<'de> for ChangeMask<F> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u64::deserialize(deserializer)?;
        Ok(Self::from_bits(bits))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    change_flags! {
        /// Flags of a record used only by these tests.
        pub struct TestFlags: u32 = "test_record" {
            const ALPHA = 0x0000_0001, "alpha", V4_2;
            const BETA = 0x0000_0002, "beta", V4_6;
            const GAMMA = 0x0000_0100, "gamma", V5_0;
        }
        status {
            const LOCKED = 0x1000_0000, "locked";
        }
    }

    #[test]
    fn set_reset_is_set() {
        let mut mask: ChangeMask<TestFlags> = ChangeMask::new();
        assert!(!mask.is_dirty());

        mask.set(TestFlags::ALPHA);
        mask.set(TestFlags::ALPHA);
        assert!(mask.is_set(TestFlags::ALPHA));
        assert_eq!(mask.bits(), 0x1);

        mask.set(TestFlags::GAMMA);
        mask.reset(TestFlags::ALPHA);
        assert!(!mask.is_set(TestFlags::ALPHA));
        assert!(mask.is_set(TestFlags::GAMMA));
        assert_eq!(mask.names(), vec!["gamma"]);
    }

    #[test]
    fn status_bits_are_not_pending() {
        let mut mask: ChangeMask<TestFlags> = ChangeMask::from_bits(0x1000_0000);
        assert!(mask.is_set(TestFlags::LOCKED));
        assert!(!mask.is_dirty());

        mask.set(TestFlags::BETA);
        assert!(mask.is_dirty());
        mask.clear();
        assert_eq!(mask.bits(), 0x1000_0000);
    }

    #[test]
    fn versioned_support() {
        let mut mask: ChangeMask<TestFlags> = ChangeMask::new();
        mask.set(TestFlags::ALPHA);
        mask.set(TestFlags::BETA);
        mask.set(TestFlags::GAMMA);

        assert!(mask.unsupported_by(ProtocolVersion::V5_0).is_empty());
        assert_eq!(mask.unsupported_by(ProtocolVersion::V4_6), vec!["gamma"]);
        assert_eq!(
            mask.unsupported_by(ProtocolVersion::V4_2),
            vec!["beta", "gamma"]
        );
    }

    #[test]
    fn hex_rendering_uses_wire_width() {
        let mut mask: ChangeMask<TestFlags> = ChangeMask::new();
        mask.set(TestFlags::GAMMA);
        assert_eq!(mask.to_string(), "0x00000100");
    }

    #[test]
    fn unknown_bits_are_dropped() {
        let mask: ChangeMask<TestFlags> = ChangeMask::from_bits(0xffff_ffff);
        assert_eq!(mask.bits(), 0x1000_0103);
    }
}
