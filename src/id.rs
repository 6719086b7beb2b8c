//! Event identifiers and sequence numbers
//!
//! `UuidV7Generator` produces time-ordered RFC 9562 version 7 UUIDs:
//!
//! ```text
//! unix_ts_ms (48) | ver=7 (4) | counter (12) | var=10 (2) | random (62)
//! ```
//!
//! The 12-bit counter keeps ids strictly increasing for bursts inside one
//! millisecond. When it overflows, the generator borrows the next
//! millisecond, so ordering holds across the rollover as well.

use rand::rngs::OsRng;
use rand::RngCore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

const COUNTER_MAX: u16 = 0x0FFF;

/// Source of unique event identifiers
pub trait IdGenerator: Send + Sync {
    /// Generate a unique event id
    fn generate(&self) -> String;
}

#[derive(Debug, Default)]
struct V7State {
    last_ms: u64,
    counter: u16,
}

/// Monotonic UUIDv7 generator
#[derive(Debug, Default)]
pub struct UuidV7Generator {
    state: Mutex<V7State>,
}

impl UuidV7Generator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate an id as if the wall clock read `now_ms`
    fn generate_at(&self, now_ms: u64) -> String {
        let (ms, counter) = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if now_ms > state.last_ms {
                state.last_ms = now_ms;
                state.counter = 0;
            } else if state.counter < COUNTER_MAX {
                // Same millisecond, or the clock stepped backwards
                state.counter += 1;
            } else {
                state.last_ms += 1;
                state.counter = 0;
            }
            (state.last_ms, state.counter)
        };

        let mut random = [0u8; 8];
        OsRng.fill_bytes(&mut random);

        let mut bytes = [0u8; 16];
        bytes[..6].copy_from_slice(&ms.to_be_bytes()[2..]);
        bytes[6] = 0x70 | ((counter >> 8) as u8 & 0x0F);
        bytes[7] = (counter & 0xFF) as u8;
        bytes[8] = 0x80 | (random[0] & 0x3F);
        bytes[9..].copy_from_slice(&random[1..]);

        uuid::Uuid::from_bytes(bytes).to_string()
    }
}

impl IdGenerator for UuidV7Generator {
    fn generate(&self) -> String {
        self.generate_at(now_millis())
    }
}

/// Next id from the process-wide UUIDv7 generator
pub fn next_event_id() -> String {
    static GENERATOR: OnceLock<UuidV7Generator> = OnceLock::new();
    GENERATOR.get_or_init(UuidV7Generator::new).generate()
}

/// Thread-safe monotonic sequence counter
///
/// Each application instance keeps its own sequence; `reset` reattaches
/// it to a persisted high-water mark after recovery.
#[derive(Debug, Default)]
pub struct SequenceGenerator {
    sequence: AtomicU64,
}

impl SequenceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting after `value`
    pub fn starting_at(value: u64) -> Self {
        Self {
            sequence: AtomicU64::new(value),
        }
    }

    /// Next sequence number (the first call returns 1)
    pub fn next(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Current value without incrementing
    pub fn current(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn reset(&self, value: u64) {
        self.sequence.store(value, Ordering::SeqCst);
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
