//! IPAM (component C). Bitmap allocator grounded on the original
//! `network/ipam.go`: one byte per address (`'0'` free, `'1'` allocated),
//! persisted as JSON keyed by CIDR string. The `+1` in `allocate` skips the
//! network address, matching the original's `ip[3] += 1` step.

use std::collections::HashMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cidr {
    pub base: Ipv4Addr,
    pub prefix: u8,
}

impl Cidr {
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::InvalidCidr(s.to_string()))?;
        let addr: Ipv4Addr = addr
            .parse()
            .map_err(|_| Error::InvalidCidr(s.to_string()))?;
        let prefix: u8 = prefix
            .parse()
            .map_err(|_| Error::InvalidCidr(s.to_string()))?;
        if prefix > 32 {
            return Err(Error::InvalidCidr(s.to_string()).into());
        }
        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        };
        let base = u32::from(addr) & mask;
        Ok(Self {
            base: Ipv4Addr::from(base),
            prefix,
        })
    }

    pub fn host_bits(&self) -> u32 {
        32 - self.prefix as u32
    }

    pub fn size(&self) -> usize {
        1usize << self.host_bits()
    }
}

impl std::fmt::Display for Cidr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.prefix)
    }
}

/// A `'0'`/`'1'` ASCII bitmap, one byte per address. Serialized as a plain
/// JSON string (not base64) for human-debuggability — see SPEC_FULL.md §4.C.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct Bitmap(String);

impl Bitmap {
    fn filled(len: usize) -> Self {
        Self("0".repeat(len))
    }

    fn bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    fn set(&mut self, index: usize, value: u8) {
        let replacement = if value == b'1' { "1" } else { "0" };
        self.0.replace_range(index..index + 1, replacement);
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
struct Subnets(HashMap<String, Bitmap>);

pub struct Ipam {
    path: PathBuf,
}

impl Ipam {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn load(&self) -> Subnets {
        fs::read(&self.path)
            .ok()
            .and_then(|data| serde_json::from_slice(&data).ok())
            .unwrap_or_default()
    }

    fn dump(&self, subnets: &Subnets) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("creating ipam dir")?;
        }
        let data = serde_json::to_vec_pretty(subnets)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, &self.path).context("persisting ipam state")
    }

    /// Allocate the first free address in `cidr`. Returns the allocated
    /// address (the network's first host address on first call).
    pub fn allocate(&self, cidr: &Cidr) -> Result<Ipv4Addr> {
        let mut subnets = self.load();
        let key = cidr.to_string();
        let bitmap = subnets
            .0
            .entry(key.clone())
            .or_insert_with(|| Bitmap::filled(cidr.size()));
        let index = bitmap
            .bytes()
            .iter()
            .position(|&b| b == b'0')
            .ok_or_else(|| Error::PoolExhausted(key.clone()))?;
        bitmap.set(index, b'1');
        let ip = Ipv4Addr::from(u32::from(cidr.base) + index as u32 + 1);
        self.dump(&subnets)?;
        Ok(ip)
    }

    /// Release a previously allocated address back to the pool.
    pub fn release(&self, cidr: &Cidr, ip: Ipv4Addr) -> Result<()> {
        let mut subnets = self.load();
        let key = cidr.to_string();
        if let Some(bitmap) = subnets.0.get_mut(&key) {
            let index = (u32::from(ip) - u32::from(cidr.base)).wrapping_sub(1) as usize;
            if index < bitmap.bytes().len() {
                bitmap.set(index, b'0');
            }
        }
        self.dump(&subnets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_release_round_trips() {
        let dir = tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        let cidr = Cidr::parse("192.168.10.0/24").unwrap();

        let before = ipam.load();
        let a = ipam.allocate(&cidr).unwrap();
        assert_eq!(a, Ipv4Addr::new(192, 168, 10, 1));
        let b = ipam.allocate(&cidr).unwrap();
        assert_eq!(b, Ipv4Addr::new(192, 168, 10, 2));

        ipam.release(&cidr, b).unwrap();
        ipam.release(&cidr, a).unwrap();
        let after = ipam.load();
        assert_eq!(
            before.0.get(&cidr.to_string()).map(|b| b.0.clone()),
            after.0.get(&cidr.to_string()).map(|b| b.0.clone())
        );
    }

    #[test]
    fn allocations_are_distinct_and_in_range() {
        let dir = tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        let cidr = Cidr::parse("10.0.0.0/29").unwrap();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..6 {
            let ip = ipam.allocate(&cidr).unwrap();
            assert!(seen.insert(ip));
            assert!(u32::from(ip) >= u32::from(cidr.base));
            assert!(u32::from(ip) < u32::from(cidr.base) + cidr.size() as u32);
        }
    }

    #[test]
    fn exhausted_pool_errors() {
        let dir = tempdir().unwrap();
        let ipam = Ipam::new(dir.path().join("subnet.json"));
        let cidr = Cidr::parse("10.0.0.0/30").unwrap();
        for _ in 0..4 {
            let _ = ipam.allocate(&cidr);
        }
        assert!(ipam.allocate(&cidr).is_err());
    }

    #[test]
    fn parses_cidr() {
        let cidr = Cidr::parse("192.168.10.5/24").unwrap();
        assert_eq!(cidr.base, Ipv4Addr::new(192, 168, 10, 0));
        assert_eq!(cidr.prefix, 24);
        assert!(Cidr::parse("not-a-cidr").is_err());
        assert!(Cidr::parse("1.2.3.4/33").is_err());
    }
}
