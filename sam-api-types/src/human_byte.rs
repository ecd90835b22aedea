use std::fmt;

use anyhow::{bail, format_err, Error};

const SIZE_UNITS: [(char, u32); 6] = [
    ('E', 60),
    ('P', 50),
    ('T', 40),
    ('G', 30),
    ('M', 20),
    ('k', 10),
];

/// A byte count as written in the archiver configuration.
///
/// Accepts a decimal number with an optional binary unit suffix (`k`,
/// `M`, `G`, `T`, `P`, `E`, case insensitive). Displays with the largest
/// unit that represents the value exactly, so the text parses back to
/// the same number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct FileSize(u64);

impl FileSize {
    pub const fn new(bytes: u64) -> Self {
        Self(bytes)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Rounded rendering for diagnostics, e.g. `1.50 GiB`.
    pub fn human(&self) -> String {
        let b = self.0;
        if b < 1024 {
            return format!("{} B", b);
        }
        let mut value = b as f64 / 1024.0;
        for unit in ["KiB", "MiB", "GiB", "TiB", "PiB"] {
            if value < 1024.0 {
                return format!("{:.2} {}", value, unit);
            }
            value /= 1024.0;
        }
        format!("{:.2} EiB", value)
    }
}

impl From<u64> for FileSize {
    fn from(v: u64) -> Self {
        FileSize(v)
    }
}

impl fmt::Display for FileSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 != 0 {
            for (suffix, shift) in SIZE_UNITS {
                let unit = 1u64 << shift;
                if self.0 % unit == 0 {
                    return write!(f, "{}{}", self.0 / unit, suffix);
                }
            }
        }
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for FileSize {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (number, shift) = match text.chars().last() {
            Some(c) if c.is_ascii_alphabetic() => {
                let shift = SIZE_UNITS
                    .iter()
                    .find(|(suffix, _)| suffix.eq_ignore_ascii_case(&c))
                    .map(|(_, shift)| *shift)
                    .ok_or_else(|| format_err!("invalid size unit '{}' in '{}'", c, s))?;
                (&text[..text.len() - 1], shift)
            }
            _ => (text, 0),
        };

        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            bail!("invalid size '{}'", s);
        }

        let value: u64 = number
            .parse()
            .map_err(|err| format_err!("invalid size '{}' - {}", s, err))?;

        match value.checked_mul(1u64 << shift) {
            Some(bytes) => Ok(FileSize(bytes)),
            None => bail!("size '{}' is too large", s),
        }
    }
}

proxmox_serde::forward_deserialize_to_from_str!(FileSize);
proxmox_serde::forward_serialize_to_display!(FileSize);

/// Renders an optional size the way the daemon prints unset values.
pub(crate) fn opt_size(size: &Option<FileSize>) -> String {
    match size {
        Some(size) => size.to_string(),
        None => String::from("-"),
    }
}

#[test]
fn correct_byte_convert() {
    fn convert(b: u64) -> String {
        FileSize::from(b).human()
    }
    assert_eq!(convert(1023), "1023 B");
    assert_eq!(convert(1 << 10), "1.00 KiB");
    assert_eq!(convert(1 << 20), "1.00 MiB");
    assert_eq!(convert((1 << 30) + 103 * (1 << 20)), "1.10 GiB");
    assert_eq!(convert((2 << 50) + 500 * (1 << 40)), "2.49 PiB");
}

#[test]
fn parse_and_display_sizes() -> Result<(), Error> {
    assert_eq!("4096".parse::<FileSize>()?, FileSize::new(4096));
    assert_eq!("4k".parse::<FileSize>()?, FileSize::new(4096));
    assert_eq!("4K".parse::<FileSize>()?, FileSize::new(4096));
    assert_eq!("10G".parse::<FileSize>()?, FileSize::new(10 << 30));

    assert_eq!(FileSize::new(10 << 30).to_string(), "10G");
    assert_eq!(FileSize::new(1536).to_string(), "1536");
    assert_eq!(FileSize::new(0).to_string(), "0");

    assert!("".parse::<FileSize>().is_err());
    assert!("G".parse::<FileSize>().is_err());
    assert!("12x".parse::<FileSize>().is_err());
    assert!("-1".parse::<FileSize>().is_err());
    assert!("99999999E".parse::<FileSize>().is_err());

    assert_eq!(opt_size(&None), "-");

    Ok(())
}
