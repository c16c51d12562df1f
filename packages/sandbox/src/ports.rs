// ABOUTME: Host port pool for locally published sandbox dev servers
// ABOUTME: Hands out the lowest free port in a fixed range, reconciled against live containers

use std::collections::HashSet;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, SandboxError};

/// Exclusive allocator over an inclusive port range
#[derive(Debug)]
pub struct PortPool {
    start: u16,
    end: u16,
    host_probe: bool,
    reserved: Mutex<HashSet<u16>>,
}

impl PortPool {
    pub fn new(start: u16, end: u16) -> Self {
        Self {
            start,
            end,
            host_probe: true,
            reserved: Mutex::new(HashSet::new()),
        }
    }

    /// Also require that the port can be bound on the host loopback before handing it out
    pub fn with_host_probe(mut self, enabled: bool) -> Self {
        self.host_probe = enabled;
        self
    }

    pub fn range(&self) -> (u16, u16) {
        (self.start, self.end)
    }

    pub fn capacity(&self) -> usize {
        if self.end < self.start {
            0
        } else {
            (self.end - self.start) as usize + 1
        }
    }

    /// Reserve the lowest port that is neither reserved here nor held by a live unit
    ///
    /// `live` is the set of ports the container runtime reports as published,
    /// which covers units this process did not create.
    pub async fn allocate(&self, live: &HashSet<u16>) -> Result<u16> {
        let mut reserved = self.reserved.lock().await;

        for port in self.start..=self.end {
            if reserved.contains(&port) || live.contains(&port) {
                continue;
            }
            if self.host_probe && !is_port_bindable(port) {
                debug!(port, "Port in use on host, skipping");
                continue;
            }
            reserved.insert(port);
            debug!(port, "Reserved sandbox port");
            return Ok(port);
        }

        warn!(
            start = self.start,
            end = self.end,
            reserved = reserved.len(),
            "Sandbox port range exhausted"
        );
        Err(SandboxError::PortsExhausted {
            start: self.start,
            end: self.end,
        })
    }

    /// Mark a port recovered from an existing unit as reserved
    pub async fn claim(&self, port: u16) -> bool {
        if port < self.start || port > self.end {
            return false;
        }
        self.reserved.lock().await.insert(port)
    }

    pub async fn release(&self, port: u16) {
        if self.reserved.lock().await.remove(&port) {
            debug!(port, "Released sandbox port");
        }
    }

    pub async fn is_reserved(&self, port: u16) -> bool {
        self.reserved.lock().await.contains(&port)
    }

    pub async fn reserved_count(&self) -> usize {
        self.reserved.lock().await.len()
    }
}

fn is_port_bindable(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(start: u16, end: u16) -> PortPool {
        PortPool::new(start, end).with_host_probe(false)
    }

    #[tokio::test]
    async fn test_allocates_lowest_free_port() {
        let pool = pool(4100, 4102);
        let none = HashSet::new();

        assert_eq!(pool.allocate(&none).await.unwrap(), 4100);
        assert_eq!(pool.allocate(&none).await.unwrap(), 4101);

        pool.release(4100).await;
        assert_eq!(pool.allocate(&none).await.unwrap(), 4100);
    }

    #[tokio::test]
    async fn test_skips_live_ports() {
        let pool = pool(4100, 4102);
        let live: HashSet<u16> = [4100, 4101].into_iter().collect();

        assert_eq!(pool.allocate(&live).await.unwrap(), 4102);
        assert!(!pool.is_reserved(4100).await);
    }

    #[tokio::test]
    async fn test_exhaustion() {
        let pool = pool(4100, 4101);
        let none = HashSet::new();
        pool.allocate(&none).await.unwrap();
        pool.allocate(&none).await.unwrap();

        let err = pool.allocate(&none).await.unwrap_err();
        assert!(matches!(
            err,
            SandboxError::PortsExhausted {
                start: 4100,
                end: 4101
            }
        ));
        assert_eq!(pool.reserved_count().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_distinct() {
        let pool = std::sync::Arc::new(pool(4100, 4149));
        let mut handles = Vec::new();
        for _ in 0..50 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.allocate(&HashSet::new()).await.unwrap()
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            assert!(seen.insert(handle.await.unwrap()));
        }
        assert_eq!(seen.len(), pool.capacity());
    }

    #[tokio::test]
    async fn test_claim_respects_range() {
        let pool = pool(4100, 4110);
        assert!(pool.claim(4105).await);
        assert!(!pool.claim(4105).await);
        assert!(!pool.claim(5000).await);
        assert_eq!(pool.allocate(&HashSet::new()).await.unwrap(), 4100);
    }

    #[test]
    fn test_capacity() {
        assert_eq!(pool(4100, 4199).capacity(), 100);
        assert_eq!(pool(10, 9).capacity(), 0);
    }
}
