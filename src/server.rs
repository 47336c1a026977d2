// # Host Services
//
// The engine is a pluggable backend; the clock, expiration-time conversion
// and the seeded key hash are provided by the host server. `ServerApi` is
// that seam, and `SystemServer` is the stock implementation used when the
// engine runs standalone (benchmarks, examples). Tests substitute a manually
// advanced clock.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Engine time domain: seconds since process start.
pub type RelTime = u32;

/// Expiration values above this are absolute unix timestamps; at or below it
/// they are offsets from the current time.
pub const REALTIME_MAXDELTA: i64 = 60 * 60 * 24 * 30;

/// Services the host server provides to the engine.
pub trait ServerApi: Send + Sync {
    /// Current time in the engine's relative domain.
    fn current_time(&self) -> RelTime;

    /// Convert a client-supplied expiration value into the relative domain.
    ///
    /// Zero stays zero (never expires). Values larger than thirty days are
    /// treated as absolute unix timestamps; anything else is an offset from
    /// now. Offsets that land at or before process start collapse to 1, which
    /// is already in the past for any running cache.
    fn realtime(&self, exptime: i64) -> RelTime;

    /// Seeded 32-bit hash over `data`.
    fn hash(&self, data: &[u8], seed: u32) -> u32;
}

/// Stock host implementation backed by the system clock and a CRC32 hash.
#[derive(Debug)]
pub struct SystemServer {
    started: Instant,
    started_epoch: u64,
}

impl SystemServer {
    pub fn new() -> Self {
        let started_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            started: Instant::now(),
            started_epoch,
        }
    }
}

impl Default for SystemServer {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerApi for SystemServer {
    fn current_time(&self) -> RelTime {
        self.started.elapsed().as_secs() as RelTime
    }

    fn realtime(&self, exptime: i64) -> RelTime {
        if exptime == 0 {
            return 0;
        }
        if exptime > REALTIME_MAXDELTA {
            let abs = exptime as u64;
            if abs <= self.started_epoch {
                return 1;
            }
            return (abs - self.started_epoch) as RelTime;
        }
        let t = self.current_time() as i64 + exptime;
        if t <= 0 {
            1
        } else {
            t as RelTime
        }
    }

    fn hash(&self, data: &[u8], seed: u32) -> u32 {
        let mut hasher = crc32fast::Hasher::new_with_initial(seed);
        hasher.update(data);
        hasher.finalize()
    }
}
