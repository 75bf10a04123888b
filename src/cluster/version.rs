use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Loose dotted version (`2.1`, `3.0.4`, `2.2.0-rc1`).
///
/// Only the leading numeric components take part in comparisons; missing
/// components count as zero, so `2.1 == 2.1.0`.
#[derive(Debug, Clone, Eq)]
pub struct Version {
    raw: String,
    components: Vec<u64>,
}

impl Version {
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let components = raw
            .split(|c: char| c == '.' || c == '-')
            .map_while(|part| {
                let digits: String = part.chars().take_while(char::is_ascii_digit).collect();
                digits.parse::<u64>().ok()
            })
            .collect();
        Self {
            raw: raw.to_string(),
            components,
        }
    }

    /// `self >= other`
    pub fn at_least(
        &self,
        other: &str,
    ) -> bool {
        *self >= Version::parse(other)
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    fn component(
        &self,
        i: usize,
    ) -> u64 {
        self.components.get(i).copied().unwrap_or(0)
    }
}

impl FromStr for Version {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Version::parse(s))
    }
}

impl From<&str> for Version {
    fn from(s: &str) -> Self {
        Version::parse(s)
    }
}

impl PartialEq for Version {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(
        &self,
        other: &Self,
    ) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(
        &self,
        other: &Self,
    ) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for Version {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
