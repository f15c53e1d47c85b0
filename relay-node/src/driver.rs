//! Relay board access.
//!
//! [`RelayDriver`] is the seam to the physical boards: single-relay get/set
//! plus whole-board bitmaps (bit `relay - 1`). [`RelayBank`] puts range and
//! value validation in front of any driver and isolates per-board failures
//! for the whole-node operations.

use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("Invalid board. Must be 0-{max}")]
    InvalidBoard { board: u32, max: u32 },
    #[error("Invalid relay. Must be 1-{capacity}")]
    InvalidRelay { relay: u32, capacity: u32 },
    #[error("State must be 0 (OFF) or 1 (ON)")]
    InvalidState,
    #[error("Invalid bitmap {0}. Must be 0-255")]
    InvalidBitmap(u32),
    #[error("Board {0} not initialized or hardware unavailable")]
    Unavailable(u32),
    #[error("hardware error on board {board}: {message}")]
    Hardware { board: u32, message: String },
}

impl DriverError {
    /// Bad input from the caller, as opposed to a board fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            DriverError::InvalidBoard { .. }
                | DriverError::InvalidRelay { .. }
                | DriverError::InvalidState
                | DriverError::InvalidBitmap(_)
        )
    }
}

/// Raw board primitives. Callers pass already validated coordinates.
pub trait RelayDriver: Send + Sync {
    fn get(&self, board: u32, relay: u32) -> Result<u8, DriverError>;
    fn set(&self, board: u32, relay: u32, state: u8) -> Result<(), DriverError>;
    fn get_all(&self, board: u32) -> Result<u8, DriverError>;
    fn set_all(&self, board: u32, bitmap: u8) -> Result<(), DriverError>;
}

/// In-memory boards, all relays off at start.
#[derive(Debug, Default)]
pub struct SimulatedDriver {
    boards: Mutex<Vec<u8>>,
    failed: BTreeSet<u32>,
}

impl SimulatedDriver {
    pub fn new(num_boards: u32) -> Self {
        Self {
            boards: Mutex::new(vec![0; num_boards as usize]),
            failed: BTreeSet::new(),
        }
    }

    /// Marks a board as missing from the bus.
    pub fn with_failed_board(mut self, board: u32) -> Self {
        self.failed.insert(board);
        self
    }

    fn with_board<T>(&self, board: u32, f: impl FnOnce(&mut u8) -> T) -> Result<T, DriverError> {
        if self.failed.contains(&board) {
            return Err(DriverError::Unavailable(board));
        }
        let mut boards = self.boards.lock();
        let bits = boards
            .get_mut(board as usize)
            .ok_or(DriverError::Unavailable(board))?;
        Ok(f(bits))
    }
}

impl RelayDriver for SimulatedDriver {
    fn get(&self, board: u32, relay: u32) -> Result<u8, DriverError> {
        self.with_board(board, |bits| (*bits >> (relay - 1)) & 1)
    }

    fn set(&self, board: u32, relay: u32, state: u8) -> Result<(), DriverError> {
        self.with_board(board, |bits| {
            let mask = 1u8 << (relay - 1);
            if state == 1 {
                *bits |= mask;
            } else {
                *bits &= !mask;
            }
        })
    }

    fn get_all(&self, board: u32) -> Result<u8, DriverError> {
        self.with_board(board, |bits| *bits)
    }

    fn set_all(&self, board: u32, bitmap: u8) -> Result<(), DriverError> {
        self.with_board(board, |bits| *bits = bitmap)
    }
}

fn board_key(board: u32) -> String {
    format!("board_{board}")
}

/// Validated access to the node's boards.
#[derive(Clone)]
pub struct RelayBank {
    driver: Arc<dyn RelayDriver>,
    num_boards: u32,
    capacity: u32,
}

impl RelayBank {
    pub fn new(driver: Arc<dyn RelayDriver>, num_boards: u32, capacity: u32) -> Self {
        Self {
            driver,
            num_boards,
            capacity,
        }
    }

    pub fn num_boards(&self) -> u32 {
        self.num_boards
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    fn check(&self, board: u32, relay: Option<u32>) -> Result<(), DriverError> {
        if board >= self.num_boards {
            return Err(DriverError::InvalidBoard {
                board,
                max: self.num_boards.saturating_sub(1),
            });
        }
        if let Some(relay) = relay {
            if !(1..=self.capacity).contains(&relay) {
                return Err(DriverError::InvalidRelay {
                    relay,
                    capacity: self.capacity,
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, board: u32, relay: u32) -> Result<u8, DriverError> {
        self.check(board, Some(relay))?;
        self.driver.get(board, relay)
    }

    pub fn set(&self, board: u32, relay: u32, state: u8) -> Result<(), DriverError> {
        self.check(board, Some(relay))?;
        if state > 1 {
            return Err(DriverError::InvalidState);
        }
        debug!(board, relay, state, "set relay");
        self.driver.set(board, relay, state)
    }

    /// Relay states of one board, index 0 = relay 1.
    pub fn board_states(&self, board: u32) -> Result<Vec<u8>, DriverError> {
        self.check(board, None)?;
        let bitmap = self.driver.get_all(board)?;
        Ok((0..self.capacity).map(|i| (bitmap >> i) & 1).collect())
    }

    pub fn set_board(&self, board: u32, bitmap: u32) -> Result<(), DriverError> {
        self.check(board, None)?;
        let bitmap = u8::try_from(bitmap).map_err(|_| DriverError::InvalidBitmap(bitmap))?;
        self.driver.set_all(board, bitmap)
    }

    /// Every board's states; a failing board reports `{"error": ..}` in its slot.
    pub fn all_states(&self) -> Map<String, Value> {
        (0..self.num_boards)
            .map(|board| {
                let entry = match self.board_states(board) {
                    Ok(states) => json!(states),
                    Err(e) => json!({ "error": e.to_string() }),
                };
                (board_key(board), entry)
            })
            .collect()
    }

    /// Turns every relay off, board by board.
    pub fn reset(&self) -> Map<String, Value> {
        (0..self.num_boards)
            .map(|board| {
                let outcome = match self.set_board(board, 0) {
                    Ok(()) => "All relays OFF".to_string(),
                    Err(e) => {
                        warn!(board, "reset failed: {e}");
                        format!("Error: {e}")
                    }
                };
                (board_key(board), Value::String(outcome))
            })
            .collect()
    }

    /// `connected` per board that answers a bitmap read.
    pub fn health(&self) -> Map<String, Value> {
        (0..self.num_boards)
            .map(|board| {
                let state = if self.driver.get_all(board).is_ok() {
                    "connected"
                } else {
                    "unavailable"
                };
                (board_key(board), json!(state))
            })
            .collect()
    }
}
