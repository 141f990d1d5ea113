//! Paired IPv4/IPv6 address pool for tunnel peers.
//!
//! Each peer receives one IPv4 and one IPv6 host address drawn together.
//! The assignable range starts at the address written in the configured
//! CIDR (e.g. `10.8.0.2/24` hands out `.2` onwards) and stops before the
//! broadcast / last address of the network.

use crate::error::{NodeError, NodeResult};
use ipnet::{Ipv4Net, Ipv6Net};
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use tokio::sync::Mutex;

/// Length of the packed address pair returned to clients (4 + 16).
pub const ADDRESS_PAIR_LEN: usize = 4 + 16;

/// One IPv4 + one IPv6 address owned by a single peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressPair {
    pub v4: Ipv4Addr,
    pub v6: Ipv6Addr,
}

impl AddressPair {
    pub fn new(v4: Ipv4Addr, v6: Ipv6Addr) -> Self {
        Self { v4, v6 }
    }

    /// Packed wire form: 4 bytes IPv4 followed by 16 bytes IPv6.
    pub fn to_bytes(&self) -> [u8; ADDRESS_PAIR_LEN] {
        let mut out = [0u8; ADDRESS_PAIR_LEN];
        out[..4].copy_from_slice(&self.v4.octets());
        out[4..].copy_from_slice(&self.v6.octets());
        out
    }
}

impl fmt::Display for AddressPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/32,{}/128", self.v4, self.v6)
    }
}

/// A contiguous host range of one address family, kept as integers.
#[derive(Debug)]
struct AddressRange {
    /// First assignable address.
    first: u128,
    /// Next never-assigned address.
    next: u128,
    /// Last assignable address (inclusive).
    max: u128,
    /// Number of assignable addresses.
    size: u128,
    /// Addresses currently held by peers.
    in_use: HashSet<u128>,
    /// Released addresses available for reuse.
    released: Vec<u128>,
}

impl AddressRange {
    fn new(first: u128, max: u128) -> Self {
        let size = if max >= first { max - first + 1 } else { 0 };
        Self {
            first,
            next: first,
            max,
            size,
            in_use: HashSet::new(),
            released: Vec::new(),
        }
    }

    fn allocate(&mut self) -> Option<u128> {
        // Try to reuse a released address first
        if let Some(addr) = self.released.pop() {
            self.in_use.insert(addr);
            return Some(addr);
        }

        if self.size > 0 && self.next <= self.max {
            let addr = self.next;
            self.next += 1;
            self.in_use.insert(addr);
            Some(addr)
        } else {
            None
        }
    }

    fn release(&mut self, addr: u128) {
        if self.in_use.remove(&addr) {
            self.released.push(addr);
        }
    }

    fn contains(&self, addr: u128) -> bool {
        self.in_use.contains(&addr)
    }

    fn covers(&self, addr: u128) -> bool {
        self.size > 0 && (self.first..=self.max).contains(&addr)
    }
}

#[derive(Debug)]
struct PoolState {
    v4: AddressRange,
    v6: AddressRange,
}

/// Address pool shared by the tunnel service and anything that inspects it.
///
/// `get` and `release` serialise on one lock, so a pair is never handed out
/// twice and a failed allocation never leaves half a pair behind.
#[derive(Debug)]
pub struct AddressPool {
    v4_net: Ipv4Net,
    v6_net: Ipv6Net,
    capacity: usize,
    state: Mutex<PoolState>,
}

impl AddressPool {
    /// Create a pool from the configured IPv4 and IPv6 ranges.
    ///
    /// Fails if either range has no assignable host address.
    pub fn new(v4_net: Ipv4Net, v6_net: Ipv6Net) -> NodeResult<Self> {
        let v4 = v4_range(v4_net);
        let v6 = v6_range(v6_net);

        if v4.size == 0 {
            return Err(NodeError::config(format!(
                "IPv4 range {} has no assignable addresses",
                v4_net
            )));
        }
        if v6.size == 0 {
            return Err(NodeError::config(format!(
                "IPv6 range {} has no assignable addresses",
                v6_net
            )));
        }

        // Pairs are limited by the smaller family.
        let capacity = usize::try_from(v4.size.min(v6.size)).unwrap_or(usize::MAX);

        Ok(Self {
            v4_net,
            v6_net,
            capacity,
            state: Mutex::new(PoolState { v4, v6 }),
        })
    }

    /// Whether `addr` lies in the range this pool hands out, allocated or not.
    pub fn covers(&self, addr: IpAddr) -> bool {
        match addr {
            IpAddr::V4(v4) => v4_range(self.v4_net).covers(u128::from(u32::from(v4))),
            IpAddr::V6(v6) => v6_range(self.v6_net).covers(u128::from(v6)),
        }
    }

    /// Total number of address pairs this pool can hand out.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of pairs currently held by peers.
    pub async fn in_use(&self) -> usize {
        self.state.lock().await.v4.in_use.len()
    }

    /// Number of pairs still available.
    pub async fn available(&self) -> usize {
        self.capacity - self.in_use().await
    }

    /// Allocate one free address pair.
    pub async fn get(&self) -> NodeResult<AddressPair> {
        let mut state = self.state.lock().await;
        if state.v4.in_use.len() >= self.capacity {
            return Err(NodeError::PoolExhausted);
        }

        let v4 = state.v4.allocate().ok_or(NodeError::PoolExhausted)?;
        let v6 = match state.v6.allocate() {
            Some(v6) => v6,
            None => {
                state.v4.release(v4);
                return Err(NodeError::PoolExhausted);
            }
        };

        Ok(AddressPair::new(
            Ipv4Addr::from(v4 as u32),
            Ipv6Addr::from(v6),
        ))
    }

    /// Return a previously allocated pair to the free set.
    ///
    /// Releasing a pair that is not currently allocated is a caller error;
    /// the pool is left untouched in that case.
    pub async fn release(&self, pair: AddressPair) -> NodeResult<()> {
        let v4 = u128::from(u32::from(pair.v4));
        let v6 = u128::from(pair.v6);

        let mut state = self.state.lock().await;
        if !state.v4.contains(v4) || !state.v6.contains(v6) {
            return Err(NodeError::AddressNotAllocated(pair.to_string()));
        }
        state.v4.release(v4);
        state.v6.release(v6);
        Ok(())
    }
}

fn v4_range(net: Ipv4Net) -> AddressRange {
    let network = u32::from(net.network());
    let broadcast = u32::from(net.broadcast());
    let mut first = u32::from(net.addr());
    let mut last = broadcast;

    // /31 and /32 have no network or broadcast address to skip
    if net.prefix_len() < 31 {
        first = first.max(network + 1);
        last = broadcast - 1;
    }

    AddressRange::new(u128::from(first), u128::from(last))
}

fn v6_range(net: Ipv6Net) -> AddressRange {
    let network = u128::from(net.network());
    let last_addr = u128::from(net.broadcast());
    let mut first = u128::from(net.addr());
    let mut last = last_addr;

    if net.prefix_len() < 127 {
        first = first.max(network + 1);
        last = last_addr - 1;
    }

    AddressRange::new(first, last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn pool(v4: &str, v6: &str) -> AddressPool {
        AddressPool::new(v4.parse().unwrap(), v6.parse().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_pool_allocation_starts_at_configured_address() {
        let pool = pool("10.8.0.2/24", "fd86:ea04:1115::2/120");

        let first = pool.get().await.unwrap();
        assert_eq!(first.v4, Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(first.v6, "fd86:ea04:1115::2".parse::<Ipv6Addr>().unwrap());

        let second = pool.get().await.unwrap();
        assert_eq!(second.v4, Ipv4Addr::new(10, 8, 0, 3));
        assert_eq!(second.v6, "fd86:ea04:1115::3".parse::<Ipv6Addr>().unwrap());
    }

    #[tokio::test]
    async fn test_pool_capacity_is_smaller_family() {
        // 253 usable v4 hosts from .2, 253 usable v6 hosts from ::2 in a /120
        let pool = pool("10.8.0.2/24", "fd00::2/120");
        assert_eq!(pool.capacity(), 253);

        // v6 /126 from ::1 has ::1 and ::2
        let pool = pool_small();
        assert_eq!(pool.capacity(), 2);
    }

    fn pool_small() -> AddressPool {
        pool("10.0.0.0/24", "fd00::/126")
    }

    #[tokio::test]
    async fn test_pool_exhaustion_and_reuse() {
        let pool = pool("10.0.0.1/32", "fd00::1/128");
        assert_eq!(pool.capacity(), 1);

        let pair = pool.get().await.unwrap();
        assert_eq!(pair.v4, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(pair.v6, "fd00::1".parse::<Ipv6Addr>().unwrap());

        assert!(matches!(pool.get().await, Err(NodeError::PoolExhausted)));

        pool.release(pair).await.unwrap();
        let again = pool.get().await.unwrap();
        assert_eq!(again, pair); // Should reuse released pair
    }

    #[tokio::test]
    async fn test_release_of_unallocated_pair_is_rejected() {
        let pool = pool_small();
        let held = pool.get().await.unwrap();

        let stranger = AddressPair::new(Ipv4Addr::new(10, 0, 0, 200), held.v6);
        assert!(matches!(
            pool.release(stranger).await,
            Err(NodeError::AddressNotAllocated(_))
        ));
        // The genuine holder is unaffected
        assert_eq!(pool.in_use().await, 1);

        pool.release(held).await.unwrap();
        assert!(matches!(
            pool.release(held).await,
            Err(NodeError::AddressNotAllocated(_))
        ));
        assert_eq!(pool.in_use().await, 0);
    }

    #[tokio::test]
    async fn test_pool_exclusivity_under_concurrency() {
        let pool = Arc::new(pool("10.0.0.0/28", "fd00::/124"));
        let capacity = pool.capacity();

        let mut handles = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.get().await.ok() }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            if let Some(pair) = handle.await.unwrap() {
                assert!(seen.insert(pair.v4), "v4 handed out twice");
            }
        }

        assert_eq!(seen.len(), capacity);
        assert_eq!(pool.in_use().await + pool.available().await, capacity);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_pool_exclusivity_with_interleaved_release() {
        let pool = Arc::new(pool("10.0.0.0/28", "fd00::/124"));
        let capacity = pool.capacity();
        let held = Arc::new(std::sync::Mutex::new((HashSet::new(), HashSet::new())));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            let held = held.clone();
            handles.push(tokio::spawn(async move {
                for round in 0..50 {
                    let pair = match pool.get().await {
                        Ok(pair) => pair,
                        Err(NodeError::PoolExhausted) => {
                            tokio::task::yield_now().await;
                            continue;
                        }
                        Err(e) => panic!("unexpected error: {}", e),
                    };
                    {
                        let mut held = held.lock().unwrap();
                        assert!(held.0.insert(pair.v4), "v4 {} handed out twice", pair.v4);
                        assert!(held.1.insert(pair.v6), "v6 {} handed out twice", pair.v6);
                    }
                    assert!(pool.in_use().await <= capacity);
                    if round % 3 != 0 {
                        tokio::task::yield_now().await;
                    }
                    {
                        let mut held = held.lock().unwrap();
                        held.0.remove(&pair.v4);
                        held.1.remove(&pair.v6);
                    }
                    pool.release(pair).await.unwrap();
                }
            }));
        }

        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(pool.in_use().await, 0);
        assert_eq!(pool.in_use().await + pool.available().await, capacity);
        assert_eq!(pool.available().await, capacity);
    }

    #[test]
    fn test_pool_covers_assignable_range_only() {
        let pool = pool("10.8.0.2/24", "fd86:ea04:1115::2/120");
        assert!(pool.covers("10.8.0.2".parse().unwrap()));
        assert!(pool.covers("10.8.0.254".parse().unwrap()));
        assert!(!pool.covers("10.8.0.1".parse().unwrap()));
        assert!(!pool.covers("10.8.0.255".parse().unwrap()));
        assert!(pool.covers("fd86:ea04:1115::2".parse().unwrap()));
        assert!(!pool.covers("fd86:ea04:1115::1".parse().unwrap()));
    }

    #[test]
    fn test_address_pair_bytes_layout() {
        let pair = AddressPair::new(
            Ipv4Addr::new(10, 0, 0, 1),
            "fd00::1".parse().unwrap(),
        );
        let bytes = pair.to_bytes();
        assert_eq!(&bytes[..4], &[10, 0, 0, 1]);
        assert_eq!(bytes[4], 0xfd);
        assert_eq!(bytes[19], 1);
    }

    #[test]
    fn test_empty_range_is_config_error() {
        let err = AddressPool::new("10.0.0.255/24".parse().unwrap(), "fd00::2/120".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }
}
