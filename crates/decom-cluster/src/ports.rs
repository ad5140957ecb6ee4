//! Port allocation for clusters sharing one host.
//!
//! Every node of a cluster binds its transport port from the same range so
//! unicast discovery on one host finds all peers. Ranges handed out by one
//! allocator never overlap, so clusters provisioned concurrently from the same
//! allocator cannot collide.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, TcpListener};
use std::sync::Mutex;

/// An inclusive, contiguous range of ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub first: u16,
    pub last: u16,
}

impl PortRange {
    /// Range of `len` ports starting at `first`. `len` must be >= 1.
    pub fn new(first: u16, len: u16) -> Self {
        debug_assert!(len >= 1);
        Self {
            first,
            last: first + (len - 1),
        }
    }

    pub fn len(&self) -> usize {
        usize::from(self.last - self.first) + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn contains(&self, port: u16) -> bool {
        (self.first..=self.last).contains(&port)
    }

    pub fn overlaps(&self, other: &PortRange) -> bool {
        self.first <= other.last && other.first <= self.last
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> + use<> {
        self.first..=self.last
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

/// Hands out non-overlapping port ranges from `[start, end)`.
///
/// Shared by reference between concurrently provisioned clusters; the cursor
/// is guarded by a mutex.
#[derive(Debug)]
pub struct PortAllocator {
    next: Mutex<u32>,
    end: u16,
    probe: bool,
}

impl PortAllocator {
    /// Allocator that skips ports some other process already listens on.
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            next: Mutex::new(u32::from(start)),
            end,
            probe: true,
        }
    }

    /// Allocator that hands out ports without checking the host.
    pub fn unprobed(start: u16, end: u16) -> Self {
        Self {
            probe: false,
            ..Self::new(start, end)
        }
    }

    /// Reserves a single port.
    pub fn next_port(&self) -> Result<u16> {
        Ok(self.reserve_range(1)?.first)
    }

    /// Reserves `size` contiguous ports.
    pub fn reserve_range(&self, size: usize) -> Result<PortRange> {
        if size == 0 {
            return Err(Error::InvalidNodeCount(0));
        }
        let mut next = self.next.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

        loop {
            let first = *next;
            let past = first + size as u32;
            if past > u32::from(self.end) {
                return Err(Error::PortsExhausted {
                    wanted: size,
                    next: first,
                    end: self.end,
                });
            }

            let range = PortRange::new(first as u16, size as u16);
            match self.first_busy(&range) {
                Some(busy) => {
                    *next = u32::from(busy) + 1;
                }
                None => {
                    *next = past;
                    return Ok(range);
                }
            }
        }
    }

    fn first_busy(&self, range: &PortRange) -> Option<u16> {
        if !self.probe {
            return None;
        }
        range
            .ports()
            .find(|&port| TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_err())
    }
}
