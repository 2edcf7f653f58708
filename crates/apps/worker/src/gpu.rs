use std::sync::Mutex;
use uuid::Uuid;

/// Replica-local accounting of GPU slots.
///
/// One slot maps to one visible device. The registry is the ground truth for
/// this replica's capacity; the rest of the system only ever sees snapshots
/// of it through the replicas table.
#[derive(Debug)]
pub struct GpuRegistry {
    slots: Mutex<Vec<Slot>>,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    device_id: u32,
    job_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct GpuSnapshot {
    pub total: u32,
    pub available: u32,
    pub allocations: Vec<(u32, Uuid)>,
}

impl GpuRegistry {
    #[must_use]
    pub fn new(device_count: u32) -> Self {
        let slots = (0..device_count)
            .map(|device_id| Slot {
                device_id,
                job_id: None,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
        }
    }

    /// Picks a free device for the job, or returns the one it already holds.
    /// A job never occupies more than one slot.
    pub fn acquire(&self, job_id: Uuid) -> Option<u32> {
        let mut slots = self.slots.lock().unwrap();

        if let Some(slot) = slots.iter().find(|s| s.job_id == Some(job_id)) {
            return Some(slot.device_id);
        }

        let free = slots.iter_mut().find(|s| s.job_id.is_none())?;
        free.job_id = Some(job_id);
        Some(free.device_id)
    }

    /// Frees whatever slot the job holds. A no-op when it holds none.
    pub fn release(&self, job_id: Uuid) {
        let mut slots = self.slots.lock().unwrap();
        for slot in slots.iter_mut() {
            if slot.job_id == Some(job_id) {
                slot.job_id = None;
            }
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> GpuSnapshot {
        let slots = self.slots.lock().unwrap();
        let total = u32::try_from(slots.len()).unwrap_or(u32::MAX);
        let allocations: Vec<(u32, Uuid)> = slots
            .iter()
            .filter_map(|s| s.job_id.map(|job| (s.device_id, job)))
            .collect();
        let available = total - u32::try_from(allocations.len()).unwrap_or(0);
        GpuSnapshot {
            total,
            available,
            allocations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_distinct_devices() {
        let registry = GpuRegistry::new(2);
        let a = registry.acquire(Uuid::new_v4()).unwrap();
        let b = registry.acquire(Uuid::new_v4()).unwrap();
        assert_ne!(a, b);
        assert_eq!(registry.acquire(Uuid::new_v4()), None);
    }

    #[test]
    fn a_job_holds_at_most_one_slot() {
        let registry = GpuRegistry::new(2);
        let job = Uuid::new_v4();
        let first = registry.acquire(job).unwrap();
        let second = registry.acquire(job).unwrap();
        assert_eq!(first, second);
        assert_eq!(registry.snapshot().available, 1);
    }

    #[test]
    fn release_is_idempotent() {
        let registry = GpuRegistry::new(1);
        let job = Uuid::new_v4();
        registry.acquire(job).unwrap();
        registry.release(job);
        registry.release(job);
        registry.release(Uuid::new_v4());
        assert_eq!(registry.snapshot().available, 1);
    }

    #[test]
    fn snapshot_reflects_allocations() {
        let registry = GpuRegistry::new(3);
        let job = Uuid::new_v4();
        let device = registry.acquire(job).unwrap();

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.available, 2);
        assert_eq!(snapshot.allocations, vec![(device, job)]);
    }

    #[test]
    fn released_slot_is_reusable() {
        let registry = GpuRegistry::new(1);
        let first = Uuid::new_v4();
        registry.acquire(first).unwrap();
        assert_eq!(registry.acquire(Uuid::new_v4()), None);
        registry.release(first);
        assert!(registry.acquire(Uuid::new_v4()).is_some());
    }
}
