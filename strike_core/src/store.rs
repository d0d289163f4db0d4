use thiserror::Error;

/// Optimistic-concurrency slot: every balance-bearing entity lives behind a
/// version counter and is mutated only through compare-and-set, mirroring
/// the conditional writes the persistent store contract expects. A raw
/// overwrite is deliberately not offered.
#[derive(Debug, Clone)]
pub struct Versioned<T> {
    value: T,
    version: u64,
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("conditional write lost a race (expected version {expected}, found {actual})")]
pub struct VersionConflict {
    pub expected: u64,
    pub actual: u64,
}

impl<T: Default> Default for Versioned<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> Versioned<T> {
    pub fn new(value: T) -> Self {
        Self { value, version: 0 }
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Snapshot for a read-validate-write cycle.
    pub fn read(&self) -> (&T, u64) {
        (&self.value, self.version)
    }

    pub fn compare_and_set(&mut self, expected: u64, value: T) -> Result<u64, VersionConflict> {
        if self.version != expected {
            return Err(VersionConflict {
                expected,
                actual: self.version,
            });
        }
        self.value = value;
        self.version += 1;
        Ok(self.version)
    }
}

impl<T: Clone> Versioned<T> {
    /// Read-modify-CAS with one internal retry against fresh state.
    ///
    /// `mutate` must re-check its preconditions each attempt: on a lost race
    /// it runs again with the current value, and a second conflict is
    /// surfaced to the caller as transient.
    pub fn update<E, F>(&mut self, mut mutate: F) -> Result<u64, UpdateError<E>>
    where
        F: FnMut(&T) -> Result<T, E>,
    {
        for _ in 0..2 {
            let (current, version) = self.read();
            let next = mutate(current).map_err(UpdateError::Rejected)?;
            match self.compare_and_set(version, next) {
                Ok(new_version) => return Ok(new_version),
                Err(_) => continue,
            }
        }
        let actual = self.version;
        Err(UpdateError::Conflict(VersionConflict {
            expected: actual,
            actual,
        }))
    }
}

#[derive(Debug, Error)]
pub enum UpdateError<E> {
    #[error("precondition failed: {0}")]
    Rejected(E),
    #[error(transparent)]
    Conflict(VersionConflict),
}
