use crate::types::{Identity, Vehicle};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Restoration has not resolved yet; gate as unauthenticated.
    Unknown,
    Unauthenticated,
    Authenticated,
}

/// Immutable view of the session published to consumers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSnapshot {
    pub resolved: bool,
    pub user: Option<Identity>,
    pub vehicles: Vec<Vehicle>,
    pub current_vehicle: Option<Vehicle>,
}

impl SessionSnapshot {
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub fn status(&self) -> AuthStatus {
        match (self.resolved, self.user.is_some()) {
            (_, true) => AuthStatus::Authenticated,
            (false, false) => AuthStatus::Unknown,
            (true, false) => AuthStatus::Unauthenticated,
        }
    }
}

/// What applying an auth result did to the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// A new identity became current; its vehicles must be loaded.
    Entered { epoch: u64 },
    /// Identity cleared (vehicles and current vehicle dropped).
    Cleared,
    /// Applied, but nothing observable changed.
    Unchanged,
    /// Older than what is already applied; ignored.
    Stale,
}

/// Single-owner session state.
///
/// `last_generation` orders identity-service results; `epoch` increases on
/// every identity change so late vehicle results can be told apart.
#[derive(Debug, Default)]
pub struct SessionState {
    snapshot: SessionSnapshot,
    last_generation: u64,
    epoch: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn user(&self) -> Option<&Identity> {
        self.snapshot.user.as_ref()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Apply a sign-in result or a pushed change stamped `generation`.
    pub fn apply(&mut self, identity: Option<Identity>, generation: u64) -> Transition {
        if generation <= self.last_generation {
            debug!(
                generation,
                last = self.last_generation,
                "dropping stale auth result"
            );
            return Transition::Stale;
        }
        self.last_generation = generation;
        self.set_identity(identity)
    }

    /// Apply the startup session lookup. Wins only if nothing has been
    /// applied yet or it is newer than what has.
    pub fn restore(&mut self, identity: Option<Identity>, generation: u64) -> Transition {
        if self.snapshot.resolved && generation <= self.last_generation {
            debug!(generation, "restoration superseded");
            return Transition::Stale;
        }
        self.last_generation = self.last_generation.max(generation);
        self.set_identity(identity)
    }

    /// Local sign-out: always clears, and ignores anything stamped at or
    /// before `floor`.
    pub fn sign_out(&mut self, floor: u64) -> Transition {
        self.last_generation = self.last_generation.max(floor);
        self.set_identity(None)
    }

    /// Fetch-then-replace. Picks the first vehicle when none is current.
    /// Returns false when `epoch` no longer matches the current identity.
    pub fn replace_vehicles(&mut self, epoch: u64, vehicles: Vec<Vehicle>) -> bool {
        if epoch != self.epoch || self.snapshot.user.is_none() {
            debug!(epoch, current = self.epoch, "dropping vehicles for old identity");
            return false;
        }
        if self.snapshot.current_vehicle.is_none() {
            self.snapshot.current_vehicle = vehicles.first().cloned();
        }
        self.snapshot.vehicles = vehicles;
        true
    }

    pub fn set_current_vehicle(&mut self, vehicle: Option<Vehicle>) {
        self.snapshot.current_vehicle = vehicle;
    }

    fn set_identity(&mut self, identity: Option<Identity>) -> Transition {
        self.snapshot.resolved = true;
        match identity {
            Some(identity) => {
                if self.snapshot.user.as_ref() == Some(&identity) {
                    return Transition::Unchanged;
                }
                let switched = self.snapshot.user.is_some();
                self.snapshot.user = Some(identity);
                if switched {
                    self.snapshot.vehicles.clear();
                    self.snapshot.current_vehicle = None;
                }
                self.epoch += 1;
                Transition::Entered { epoch: self.epoch }
            }
            None => {
                let had_user = self.snapshot.user.is_some();
                self.snapshot.user = None;
                self.snapshot.vehicles.clear();
                self.snapshot.current_vehicle = None;
                if had_user {
                    self.epoch += 1;
                    Transition::Cleared
                } else {
                    Transition::Unchanged
                }
            }
        }
    }
}
