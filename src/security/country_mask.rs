//! Country allow-list over IPv4 ranges.
//!
//! Loaded once at startup from a line-delimited file of CIDR ranges
//! (`1.0.1.0/24`) or single addresses, then immutable. Ranges are sorted by
//! start address and overlapping or adjacent ranges are merged, so a lookup
//! is one binary search.
//!
//! An index that was never loaded answers `false` for every address. The
//! visit guard does not depend on the answer unless enforcement is enabled,
//! and never enforces an index without ranges.

use super::address::{self, octets_to_u32};
use crate::error::CountryMaskError;
use ipnet::Ipv4Net;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{info, warn};

/// Sorted, merged, inclusive IPv4 ranges.
#[derive(Debug, Clone, Default)]
pub struct CountryMaskIndex {
    ranges: Vec<(u32, u32)>,
    loaded: bool,
}

impl CountryMaskIndex {
    /// An index that was never loaded.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from parsed networks.
    pub fn from_networks<I>(networks: I) -> Self
    where
        I: IntoIterator<Item = Ipv4Net>,
    {
        let mut ranges: Vec<(u32, u32)> = networks
            .into_iter()
            .map(|net| (u32::from(net.network()), u32::from(net.broadcast())))
            .collect();
        ranges.sort_unstable();

        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(ranges.len());
        for (start, end) in ranges {
            match merged.last_mut() {
                Some(last) if start <= last.1.saturating_add(1) => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }

        Self {
            ranges: merged,
            loaded: true,
        }
    }

    /// Parse range-notation text, one range per line.
    ///
    /// Blank lines and `#` comments are skipped; any other unparsable line
    /// fails the whole load.
    pub fn parse(text: &str) -> Result<Self, CountryMaskError> {
        let mut networks = Vec::new();
        for (idx, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let net = line
                .parse::<Ipv4Net>()
                .or_else(|_| line.parse::<Ipv4Addr>().map(Ipv4Net::from))
                .map_err(|_| CountryMaskError::Parse {
                    line: idx + 1,
                    content: line.to_string(),
                })?;
            networks.push(net);
        }
        Ok(Self::from_networks(networks))
    }

    /// Load from a file. A missing file yields an unloaded index.
    pub fn load(path: &Path) -> Result<Self, CountryMaskError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(path = %path.display(), "country mask file not found, lookups disabled");
                return Ok(Self::empty());
            }
            Err(e) => return Err(e.into()),
        };

        let index = Self::parse(&text)?;
        if index.is_empty() {
            warn!(path = %path.display(), "country mask file has no ranges");
        } else {
            info!(path = %path.display(), ranges = index.len(), "country mask loaded");
        }
        Ok(index)
    }

    /// Whether any loaded range contains the address.
    #[inline]
    pub fn contains(&self, octets: [u8; 4]) -> bool {
        let ip = octets_to_u32(octets);
        let idx = self.ranges.partition_point(|&(start, _)| start <= ip);
        idx > 0 && self.ranges[idx - 1].1 >= ip
    }

    /// Textual lookup. Malformed input is never contained.
    pub fn lookup(&self, addr: &str) -> bool {
        address::parse_octets(addr).is_some_and(|octets| self.contains(octets))
    }

    /// Number of merged ranges.
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Whether a range file was actually read.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}
