use crate::error::{CorralError, Result};
use std::collections::{BTreeMap, HashSet};

/// Sequential port allocator that honours persisted assignments
#[derive(Debug, Clone, Copy)]
pub struct PortAllocator {
    base: u16,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self { base }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    /// Assign a port to every name, in discovery order.
    ///
    /// Ports in `reserved` belong to live processes and are never handed to
    /// anyone else; a reserved name keeps its port. A persisted port is kept
    /// next, as long as it is not below the base and not already claimed.
    /// Everything else gets the next free port counting up from the base.
    ///
    /// # Arguments
    /// * `names` - Service names in discovery order
    /// * `persisted` - Assignments loaded from the PID table
    /// * `reserved` - Ports held by live processes, including services whose
    ///   directory has vanished
    ///
    /// # Returns
    /// Name to port map covering every entry of `names`
    pub fn assign(
        &self,
        names: &[String],
        persisted: &BTreeMap<String, u16>,
        reserved: &BTreeMap<String, u16>,
    ) -> Result<BTreeMap<String, u16>> {
        let mut assigned = BTreeMap::new();
        let mut taken: HashSet<u16> = reserved.values().copied().collect();

        for name in names {
            if let Some(&port) = reserved.get(name) {
                assigned.insert(name.clone(), port);
            }
        }

        // Persisted assignments are placed before fresh ones so recomputed ports route around them
        for name in names {
            if assigned.contains_key(name) {
                continue;
            }
            if let Some(&port) = persisted.get(name) {
                if port >= self.base && taken.insert(port) {
                    assigned.insert(name.clone(), port);
                } else {
                    tracing::warn!(
                        "Discarding persisted port {} for {} (below base or in use)",
                        port,
                        name
                    );
                }
            }
        }

        let mut next = Some(self.base);
        for name in names {
            if assigned.contains_key(name) {
                continue;
            }

            let port = loop {
                let candidate = next.ok_or_else(|| {
                    CorralError::PortExhausted(format!("no free port left for {}", name))
                })?;
                next = candidate.checked_add(1);
                if !taken.contains(&candidate) {
                    break candidate;
                }
            };

            taken.insert(port);
            assigned.insert(name.clone(), port);
        }

        Ok(assigned)
    }
}
