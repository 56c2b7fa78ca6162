use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

const UNITS: [(char, u64); 4] = [('d', 86_400), ('h', 3_600), ('m', 60), ('s', 1)];

/// A positive span of time written as counts with unit suffixes, such as
/// `90s`, `30m`, `1h30m` or `1d`. A bare number is seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Interval(Duration);

impl Interval {
    pub const fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }
}

impl FromStr for Interval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let secs = match s.parse::<u64>() {
            Ok(secs) => secs,
            Err(_) => {
                let mut total: u64 = 0;
                let mut start = 0;
                for (i, c) in s.char_indices() {
                    if c.is_ascii_digit() {
                        continue;
                    }
                    let size = UNITS
                        .iter()
                        .find(|(unit, _)| *unit == c.to_ascii_lowercase())
                        .map(|(_, size)| *size)
                        .ok_or_else(|| format!("unknown unit '{}' in interval '{}'", c, s))?;
                    let count: u64 = s[start..i]
                        .parse()
                        .map_err(|_| format!("expected a number before '{}' in interval '{}'", c, s))?;
                    total = count
                        .checked_mul(size)
                        .and_then(|span| total.checked_add(span))
                        .ok_or_else(|| format!("interval '{}' is too long", s))?;
                    start = i + c.len_utf8();
                }
                if start != s.len() {
                    return Err(format!("interval '{}' ends without a unit", s));
                }
                total
            }
        };

        if secs == 0 {
            return Err(format!("interval '{}' must be positive", s));
        }
        Ok(Self::from_secs(secs))
    }
}

impl TryFrom<String> for Interval {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rest = self.0.as_secs();
        if rest == 0 {
            return write!(f, "0s");
        }
        for (unit, size) in UNITS {
            if rest >= size {
                write!(f, "{}{}", rest / size, unit)?;
                rest %= size;
            }
        }
        Ok(())
    }
}
