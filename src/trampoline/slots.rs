//! Identity assignment for virtual methods

use super::{VirtualId, TRAMPOLINE_COUNT};
use crate::error::{BridgeError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Hands out trampoline identities, one per (class, method) pair.
///
/// An identity never changes once assigned. Running out is a registration
/// error; identities never wrap around.
pub struct VirtualSlots {
    limit: usize,
    assigned: Mutex<Assigned>,
}

#[derive(Default)]
struct Assigned {
    by_name: HashMap<(String, String), VirtualId>,
    next: u32,
}

impl VirtualSlots {
    pub fn new(limit: usize) -> Self {
        Self { limit: limit.min(TRAMPOLINE_COUNT), assigned: Mutex::new(Assigned::default()) }
    }

    pub fn assign(&self, class: &str, method: &str) -> Result<VirtualId> {
        let mut assigned = self.assigned.lock();
        let key = (class.to_string(), method.to_string());
        if let Some(&id) = assigned.by_name.get(&key) {
            return Ok(id);
        }
        let raw = assigned.next + 1;
        let id = VirtualId::new(raw)
            .filter(|_| raw as usize <= self.limit)
            .ok_or(BridgeError::TrampolinesExhausted { limit: self.limit })?;
        assigned.next = raw;
        assigned.by_name.insert(key, id);
        tracing::debug!(target: "trampoline", class, method, identity = id.get(), "virtual identity assigned");
        Ok(id)
    }

    pub fn get(&self, class: &str, method: &str) -> Option<VirtualId> {
        self.assigned
            .lock()
            .by_name
            .get(&(class.to_string(), method.to_string()))
            .copied()
    }

    #[inline]
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.assigned.lock().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
