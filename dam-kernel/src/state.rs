use crate::models::{DeviceId, DeviceStatus};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Table des états modules : un enregistrement par identifiant vu.
/// Sans `max_devices`, rien n'est jamais supprimé.
#[derive(Debug, Default)]
pub struct DeviceTable {
    records: HashMap<DeviceId, DeviceStatus>,
    max_devices: Option<usize>,
}

impl DeviceTable {
    pub fn new(max_devices: Option<usize>) -> Self {
        Self {
            records: HashMap::new(),
            max_devices: max_devices.filter(|n| *n > 0),
        }
    }

    pub fn get(&self, device_id: DeviceId) -> Option<&DeviceStatus> {
        self.records.get(&device_id)
    }

    /// Copie de l'état connu, ou un état UNKNOWN tout neuf.
    pub fn current_or_new(&self, device_id: DeviceId) -> DeviceStatus {
        self.records
            .get(&device_id)
            .cloned()
            .unwrap_or_else(|| DeviceStatus::new(device_id))
    }

    /// Range l'état ; renvoie l'identifiant évincé si la table était pleine.
    pub fn upsert(&mut self, status: DeviceStatus) -> Option<DeviceId> {
        let mut evicted = None;
        if !self.records.contains_key(&status.device_id) {
            if let Some(max) = self.max_devices {
                if self.records.len() >= max {
                    evicted = self.oldest();
                    if let Some(id) = evicted {
                        self.records.remove(&id);
                    }
                }
            }
        }
        self.records.insert(status.device_id, status);
        evicted
    }

    /// Module entendu le moins récemment (jamais entendu = plus ancien).
    fn oldest(&self) -> Option<DeviceId> {
        self.records
            .values()
            .min_by_key(|s| (s.last_heartbeat, s.device_id))
            .map(|s| s.device_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut DeviceStatus> {
        self.records.values_mut()
    }

    pub fn snapshot(&self) -> BTreeMap<DeviceId, DeviceStatus> {
        self.records
            .iter()
            .map(|(id, status)| (*id, status.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn heard_at(device_id: DeviceId, hour: u8) -> DeviceStatus {
        let mut status = DeviceStatus::new(device_id);
        status.last_heartbeat = Some(datetime!(2025-03-01 00:00 UTC).replace_hour(hour).unwrap());
        status
    }

    #[test]
    fn test_unbounded_table_keeps_everything() {
        let mut table = DeviceTable::new(None);
        for id in 1..=50 {
            assert_eq!(table.upsert(DeviceStatus::new(id)), None);
        }
        assert_eq!(table.len(), 50);
    }

    #[test]
    fn test_bounded_table_evicts_least_recently_heard() {
        let mut table = DeviceTable::new(Some(2));
        table.upsert(heard_at(1, 10));
        table.upsert(heard_at(2, 8));

        assert_eq!(table.upsert(heard_at(3, 11)), Some(2));
        assert!(table.get(2).is_none());
        assert_eq!(table.len(), 2);

        // mise à jour d'un module connu : pas d'éviction
        assert_eq!(table.upsert(heard_at(1, 12)), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_never_heard_devices_are_evicted_first() {
        let mut table = DeviceTable::new(Some(2));
        table.upsert(heard_at(5, 1));
        table.upsert(DeviceStatus::new(9));
        assert_eq!(table.upsert(heard_at(6, 2)), Some(9));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut table = DeviceTable::new(None);
        table.upsert(DeviceStatus::new(1));
        let mut snap = table.snapshot();
        snap.get_mut(&1).unwrap().details = Some("changed".into());
        assert_eq!(table.get(1).unwrap().details, None);
    }

    #[test]
    fn test_current_or_new() {
        let mut table = DeviceTable::new(None);
        assert_eq!(table.current_or_new(4), DeviceStatus::new(4));
        table.upsert(heard_at(4, 3));
        assert!(table.current_or_new(4).last_heartbeat.is_some());
    }
}
