use std::fmt;
use std::str::FromStr;

/// `major.minor.patch` version reported by the configuration store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("invalid version: {0:?}")]
pub struct InvalidVersion(String);

impl FromStr for Version {
    type Err = InvalidVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Pre-release and build suffixes such as "-SNAPSHOT" are ignored.
        let core = s.trim().split(['-', '+']).next().unwrap_or_default();

        let mut parts = core.split('.').map(str::parse::<u64>);
        let major = match parts.next() {
            Some(Ok(major)) => major,
            _ => return Err(InvalidVersion(s.to_string())),
        };
        let minor = parts.next().transpose().map_err(|_| InvalidVersion(s.to_string()))?;
        let patch = parts.next().transpose().map_err(|_| InvalidVersion(s.to_string()))?;
        if parts.next().is_some() {
            return Err(InvalidVersion(s.to_string()));
        }

        Ok(Version::new(major, minor.unwrap_or(0), patch.unwrap_or(0)))
    }
}
