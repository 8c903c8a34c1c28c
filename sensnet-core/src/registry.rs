//! Bounded, ordered registry of connected sensor clients.
//!
//! Records stay in registration order; removal shifts later records down so
//! `0..len()` are always the live entries. Ids are unique.

/// One connected sensor. `C` is whatever the host uses as the connection handle.
#[derive(Debug)]
pub struct ClientRecord<C> {
    pub id: i32,
    pub datum: i32,
    pub conn: C,
}

#[derive(Debug)]
pub struct Registry<C> {
    records: Vec<ClientRecord<C>>,
    capacity: usize,
}

impl<C> Registry<C> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// Append a client. On rejection the handle is given back so the host can close it.
    pub fn admit(&mut self, id: i32, datum: i32, conn: C) -> Result<&ClientRecord<C>, (RegistryError, C)> {
        if self.is_full() {
            return Err((RegistryError::Full(self.capacity), conn));
        }
        if self.contains(id) {
            return Err((RegistryError::Duplicate(id), conn));
        }
        self.records.push(ClientRecord { id, datum, conn });
        Ok(&self.records[self.records.len() - 1])
    }

    /// Remove by id, keeping the relative order of the rest.
    pub fn remove(&mut self, id: i32) -> Option<ClientRecord<C>> {
        let idx = self.position(id)?;
        Some(self.records.remove(idx))
    }

    pub fn contains(&self, id: i32) -> bool {
        self.position(id).is_some()
    }

    pub fn position(&self, id: i32) -> Option<usize> {
        self.records.iter().position(|r| r.id == id)
    }

    pub fn find(&self, id: i32) -> Option<&ClientRecord<C>> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn find_mut(&mut self, id: i32) -> Option<&mut ClientRecord<C>> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    /// Ids whose datum equals `datum`, in registration order.
    pub fn ids_with_datum(&self, datum: i32) -> Vec<i32> {
        self.records
            .iter()
            .filter(|r| r.datum == datum)
            .map(|r| r.id)
            .collect()
    }

    pub fn ids(&self) -> Vec<i32> {
        self.records.iter().map(|r| r.id).collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ClientRecord<C>> {
        self.records.iter_mut()
    }

    /// Empty the registry, handing back every record in order.
    pub fn drain(&mut self) -> Vec<ClientRecord<C>> {
        std::mem::take(&mut self.records)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("registry full ({0} clients)")]
    Full(usize),
    #[error("client {0} already registered")]
    Duplicate(i32),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry_with(ids: &[i32]) -> Registry<()> {
        let mut reg = Registry::with_capacity(4);
        for &id in ids {
            reg.admit(id, id % 10, ()).unwrap();
        }
        reg
    }

    #[test]
    fn admit_then_remove_restores_state() {
        let mut reg = registry_with(&[3, 7, 11]);
        let before = reg.ids();
        reg.admit(99, 5, ()).unwrap();
        assert_eq!(reg.len(), 4);
        reg.remove(99).unwrap();
        assert_eq!(reg.ids(), before);
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn removal_compacts_in_order() {
        let mut reg = registry_with(&[1, 2, 3, 4]);
        let removed = reg.remove(2).unwrap();
        assert_eq!(removed.id, 2);
        assert_eq!(reg.ids(), vec![1, 3, 4]);
        assert_eq!(reg.position(3), Some(1));
        assert_eq!(reg.position(4), Some(2));
    }

    #[test]
    fn overflow_rejected_and_existing_untouched() {
        let mut reg = registry_with(&[1, 2, 3, 4]);
        let err = reg.admit(5, 1, ()).unwrap_err();
        assert_eq!(err.0, RegistryError::Full(4));
        assert_eq!(reg.ids(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn duplicate_rejected() {
        let mut reg = registry_with(&[1, 2]);
        let err = reg.admit(2, 9, ()).unwrap_err();
        assert_eq!(err.0, RegistryError::Duplicate(2));
        assert_eq!(reg.find(2).map(|r| r.datum), Some(2));
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn rejected_handle_is_returned() {
        let mut reg: Registry<String> = Registry::with_capacity(0);
        let (_, conn) = reg.admit(1, 1, "socket".to_string()).unwrap_err();
        assert_eq!(conn, "socket");
    }

    #[test]
    fn remove_missing_is_none() {
        let mut reg = registry_with(&[1]);
        assert!(reg.remove(42).is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn ids_with_datum_keeps_registration_order() {
        let mut reg: Registry<()> = Registry::with_capacity(8);
        reg.admit(7, 5, ()).unwrap();
        reg.admit(1, 2, ()).unwrap();
        reg.admit(3, 5, ()).unwrap();
        assert_eq!(reg.ids_with_datum(5), vec![7, 3]);
        assert!(reg.ids_with_datum(9).is_empty());
    }

    #[test]
    fn random_admit_remove_sequences_keep_invariants() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(3);
        let mut reg: Registry<()> = Registry::with_capacity(6);
        let mut model: Vec<i32> = Vec::new();
        for _ in 0..500 {
            let id = rng.gen_range(1..12);
            if rng.gen_bool(0.5) {
                let ok = reg.admit(id, 0, ()).is_ok();
                assert_eq!(ok, model.len() < 6 && !model.contains(&id));
                if ok {
                    model.push(id);
                }
            } else {
                let removed = reg.remove(id).is_some();
                assert_eq!(removed, model.contains(&id));
                model.retain(|&x| x != id);
            }
            assert_eq!(reg.ids(), model);
            assert!(reg.len() <= 6);
        }
    }
}
