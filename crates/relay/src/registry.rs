//! Slot table pairing server-side and viewer-side connections by token
//!
//! One coarse mutex guards the whole table and is held only for the duration
//! of a call. `register` is the only place a slot moves from pending to
//! paired, so of two racing second-side registrations exactly one wins.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::net::TcpStream;
use tracing::{debug, error, info, warn};

use vncrepeater_core::{RepeaterError, Result, Side, Token};

/// Default slot capacity
pub const DEFAULT_MAX_SLOTS: usize = 20;

/// Result of a non-blocking liveness check
#[derive(Debug)]
pub enum Liveness {
    /// Nothing to report, or data is waiting to be read
    Alive,
    /// The peer closed the connection in an orderly way
    Closed,
    /// The connection was reset or otherwise failed
    Failed(io::Error),
}

/// A connection that can wait in the slot table.
///
/// The check must never block: the reaper calls it while holding the
/// registry lock.
pub trait Endpoint: Send + 'static {
    fn liveness(&self) -> Liveness;
}

impl Endpoint for TcpStream {
    fn liveness(&self) -> Liveness {
        let mut buf = [0u8; 1];
        match self.peek(&mut buf).now_or_never() {
            None => Liveness::Alive,
            Some(Ok(0)) => Liveness::Closed,
            Some(Ok(_)) => Liveness::Alive,
            Some(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => Liveness::Alive,
            Some(Err(e)) => Liveness::Failed(e),
        }
    }
}

/// Outcome of [`SlotTable::register`]
pub enum Registration<C> {
    /// First side of a new slot; the table now owns the connection
    Pending,
    /// Both sides present; the caller owns both connections and must run
    /// the relay, then release the token
    Paired { server: C, viewer: C },
    /// Not admitted; the connection is handed back to be closed
    Rejected { error: RepeaterError, conn: C },
}

impl<C> fmt::Debug for Registration<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("Pending"),
            Self::Paired { .. } => f.write_str("Paired"),
            Self::Rejected { error, .. } => write!(f, "Rejected({})", error),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Pending,
    Paired,
}

struct Slot<C> {
    state: SlotState,
    server: Option<C>,
    viewer: Option<C>,
    created_at: Instant,
}

impl<C> Slot<C> {
    fn new(side: Side, conn: C) -> Self {
        let (server, viewer) = match side {
            Side::Server => (Some(conn), None),
            Side::Viewer => (None, Some(conn)),
        };
        Self {
            state: SlotState::Pending,
            server,
            viewer,
            created_at: Instant::now(),
        }
    }

    fn side_mut(&mut self, side: Side) -> &mut Option<C> {
        match side {
            Side::Server => &mut self.server,
            Side::Viewer => &mut self.viewer,
        }
    }

    /// The single connection of a pending slot
    fn occupant(&self) -> Option<(Side, &C)> {
        match (&self.server, &self.viewer) {
            (Some(conn), None) => Some((Side::Server, conn)),
            (None, Some(conn)) => Some((Side::Viewer, conn)),
            _ => None,
        }
    }
}

/// Snapshot of the table for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotStats {
    pub pending: usize,
    pub paired: usize,
    pub capacity: usize,
}

/// Keyed pairing registry with bounded capacity
pub struct SlotTable<C> {
    slots: Mutex<HashMap<Token, Slot<C>>>,
    max_slots: usize,
}

impl<C: Endpoint> SlotTable<C> {
    pub fn new(max_slots: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            max_slots,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Token, Slot<C>>>> {
        self.slots.lock().map_err(|_| {
            error!("Slot registry lock poisoned; registry integrity is lost");
            RepeaterError::RegistryPoisoned
        })
    }

    /// Register one side of a pairing under `token`
    pub fn register(&self, token: Token, side: Side, conn: C) -> Result<Registration<C>> {
        let mut slots = self.lock()?;
        let capacity = self.max_slots;
        let in_use = slots.len();

        let slot = match slots.entry(token) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                if in_use >= capacity {
                    warn!(
                        "Rejecting {} for token {}: all {} slots in use",
                        side,
                        token.short(),
                        capacity
                    );
                    return Ok(Registration::Rejected {
                        error: RepeaterError::RegistryFull { capacity },
                        conn,
                    });
                }

                entry.insert(Slot::new(side, conn));
                debug!(
                    "{} waiting on token {} ({}/{} slots)",
                    side,
                    token.short(),
                    in_use + 1,
                    capacity
                );
                return Ok(Registration::Pending);
            }
        };

        if slot.state == SlotState::Paired || slot.side_mut(side).is_some() {
            warn!(
                "Rejecting duplicate {} for token {}",
                side,
                token.short()
            );
            return Ok(Registration::Rejected {
                error: RepeaterError::DuplicateSide { side },
                conn,
            });
        }

        let Some(waiting) = slot.side_mut(side.opposite()).take() else {
            // A pending slot always holds exactly one side
            return Err(RepeaterError::Protocol(format!(
                "slot {} has no occupant",
                token.short()
            )));
        };
        slot.state = SlotState::Paired;

        let waited = slot.created_at.elapsed();
        info!(
            "Token {} paired after {:.1}s",
            token.short(),
            waited.as_secs_f64()
        );

        let (server, viewer) = match side {
            Side::Server => (conn, waiting),
            Side::Viewer => (waiting, conn),
        };
        Ok(Registration::Paired { server, viewer })
    }

    /// Remove the slot for `token`, closing any connection it still holds.
    ///
    /// Returns whether a slot was removed.
    pub fn release(&self, token: &Token) -> Result<bool> {
        let mut slots = self.lock()?;
        let removed = slots.remove(token).is_some();
        if removed {
            debug!("Released slot {} ({} in use)", token.short(), slots.len());
        }
        Ok(removed)
    }

    /// Reclaim pending slots whose only connection has gone away.
    ///
    /// Paired slots belong to their relay and are never touched.
    pub fn sweep_stale(&self) -> Result<usize> {
        let mut slots = self.lock()?;
        let before = slots.len();

        slots.retain(|token, slot| {
            if slot.state == SlotState::Paired {
                return true;
            }
            let Some((side, conn)) = slot.occupant() else {
                return false;
            };
            match conn.liveness() {
                Liveness::Alive => true,
                Liveness::Closed => {
                    debug!("Connection closed by {} on token {}", side, token.short());
                    false
                }
                Liveness::Failed(e) => {
                    debug!(
                        "Dropping {} on token {} after socket error: {}",
                        side,
                        token.short(),
                        e
                    );
                    false
                }
            }
        });

        Ok(before - slots.len())
    }

    /// Drop every slot and every connection still waiting in the table
    pub fn drain(&self) -> Result<usize> {
        let mut slots = self.lock()?;
        let count = slots.len();
        slots.clear();
        Ok(count)
    }

    pub fn contains(&self, token: &Token) -> Result<bool> {
        Ok(self.lock()?.contains_key(token))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.lock()?.is_empty())
    }

    pub fn capacity(&self) -> usize {
        self.max_slots
    }

    pub fn stats(&self) -> Result<SlotStats> {
        let slots = self.lock()?;
        let paired = slots
            .values()
            .filter(|slot| slot.state == SlotState::Paired)
            .count();
        Ok(SlotStats {
            pending: slots.len() - paired,
            paired,
            capacity: self.max_slots,
        })
    }

    /// Age of the oldest pending slot
    pub fn oldest_pending(&self) -> Result<Option<Duration>> {
        let slots = self.lock()?;
        Ok(slots
            .values()
            .filter(|slot| slot.state == SlotState::Pending)
            .map(|slot| slot.created_at.elapsed())
            .max())
    }

    /// Poison the registry lock the way a panicking holder would
    #[cfg(any(test, feature = "test-util"))]
    pub fn poison(&self) {
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = self.slots.lock();
            panic!("slot registry poisoned for testing");
        }));
    }
}

impl<C: Endpoint> Default for SlotTable<C> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SLOTS)
    }
}
