use std::{fmt, str::FromStr};

#[derive(Debug, thiserror::Error)]
#[error("No targets given")]
pub struct EmptyTargetList;

/// Ordered list of VM or host names given as one comma separated argument.
///
/// Order is kept as given, it decides the processing order; duplicates are
/// kept as well.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetList(Vec<String>);

impl TargetList {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromStr for TargetList {
    type Err = EmptyTargetList;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let targets: Vec<String> = s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
        if targets.is_empty() {
            return Err(EmptyTargetList);
        }
        Ok(Self(targets))
    }
}

impl fmt::Display for TargetList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}
