use std::fmt;

use anyhow::{bail, format_err, Error};

/// Version of the archiver management protocol spoken by a daemon.
///
/// Change flags are append-only: a flag introduced in version `X` is
/// unknown to every daemon older than `X` and must never be sent there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const V4_2: Self = Self::new(4, 2);
    /// 4.4 patch 02 added the directive option flags.
    pub const V4_4: Self = Self::new(4, 4);
    pub const V4_5: Self = Self::new(4, 5);
    pub const V4_6: Self = Self::new(4, 6);
    pub const V5_0: Self = Self::new(5, 0);

    /// The version this crate speaks natively.
    pub const CURRENT: Self = Self::V5_0;

    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// Daemons older than 5.0 only understand the single character
    /// release/stage fields of a criterion.
    pub fn has_attr_flags(&self) -> bool {
        *self >= Self::V5_0
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl std::str::FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (major, minor) = match s.split_once('.') {
            Some(parts) => parts,
            None => bail!("invalid protocol version '{}' - expected 'major.minor'", s),
        };

        let major = major
            .parse()
            .map_err(|err| format_err!("invalid protocol major version '{}' - {}", major, err))?;
        let minor = minor
            .parse()
            .map_err(|err| format_err!("invalid protocol minor version '{}' - {}", minor, err))?;

        Ok(Self::new(major, minor))
    }
}

proxmox_serde::forward_deserialize_to_from_str!(ProtocolVersion);
proxmox_serde::forward_serialize_to_display!(ProtocolVersion);

#[cfg(test)]
mod test {
    use super::ProtocolVersion;

    #[test]
    fn parse_and_order() {
        let v: ProtocolVersion = "4.6".parse().unwrap();
        assert_eq!(v, ProtocolVersion::V4_6);
        assert_eq!(v.to_string(), "4.6");
        assert!(ProtocolVersion::V4_5 < ProtocolVersion::V4_6);
        assert!(ProtocolVersion::V4_6 < ProtocolVersion::V5_0);

        assert!("4".parse::<ProtocolVersion>().is_err());
        assert!("4.x".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn attr_flag_support() {
        assert!(!ProtocolVersion::V4_6.has_attr_flags());
        assert!(ProtocolVersion::CURRENT.has_attr_flags());
    }
}
