use std::fmt;

use anyhow::{bail, format_err, Error};

const INTERVAL_UNITS: [(char, u64); 6] = [
    ('y', 365 * 24 * 3600),
    ('w', 7 * 24 * 3600),
    ('d', 24 * 3600),
    ('h', 3600),
    ('m', 60),
    ('s', 1),
];

/// A time span in seconds (archive age, scan interval, access age, ...).
///
/// Written as a number with an optional unit `s`, `m`, `h`, `d`, `w`
/// or `y` (365 days). A bare number means seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Interval(u32);

impl Interval {
    pub const fn from_secs(secs: u32) -> Self {
        Self(secs)
    }

    pub fn as_secs(&self) -> u32 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0 as u64;
        if secs != 0 {
            for (unit, factor) in INTERVAL_UNITS {
                if secs % factor == 0 {
                    return write!(f, "{}{}", secs / factor, unit);
                }
            }
        }
        write!(f, "{}s", secs)
    }
}

impl std::str::FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        let (number, factor) = match text.chars().last() {
            Some(c) if c.is_ascii_alphabetic() => {
                let factor = INTERVAL_UNITS
                    .iter()
                    .find(|(unit, _)| *unit == c)
                    .map(|(_, factor)| *factor)
                    .ok_or_else(|| format_err!("invalid time unit '{}' in '{}'", c, s))?;
                (&text[..text.len() - 1], factor)
            }
            _ => (text, 1),
        };

        if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
            bail!("invalid interval '{}'", s);
        }

        let value: u64 = number
            .parse()
            .map_err(|err| format_err!("invalid interval '{}' - {}", s, err))?;

        match value.checked_mul(factor).map(u32::try_from) {
            Some(Ok(secs)) => Ok(Interval(secs)),
            _ => bail!("interval '{}' is too large", s),
        }
    }
}

proxmox_serde::forward_deserialize_to_from_str!(Interval);
proxmox_serde::forward_serialize_to_display!(Interval);

#[cfg(test)]
mod test {
    use super::Interval;

    #[test]
    fn parse_intervals() {
        assert_eq!("90".parse::<Interval>().unwrap().as_secs(), 90);
        assert_eq!("10m".parse::<Interval>().unwrap().as_secs(), 600);
        assert_eq!("2d".parse::<Interval>().unwrap().as_secs(), 2 * 86400);
        assert_eq!("1y".parse::<Interval>().unwrap().as_secs(), 365 * 86400);

        assert!("1x".parse::<Interval>().is_err());
        assert!("m".parse::<Interval>().is_err());
        assert!("200y".parse::<Interval>().is_err());
    }

    #[test]
    fn display_uses_largest_exact_unit() {
        assert_eq!(Interval::from_secs(600).to_string(), "10m");
        assert_eq!(Interval::from_secs(90).to_string(), "90s");
        assert_eq!(Interval::from_secs(14 * 86400).to_string(), "2w");
        assert_eq!(Interval::from_secs(0).to_string(), "0s");
    }
}
