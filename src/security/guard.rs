//! Per-IPv4 visit counting and banning.
//!
//! `VisitGuard` is the hot-path classifier called once per inbound request.
//! All state lives in one [`AddressTrie`] behind a single mutex: lazy path
//! allocation makes finer locking unsafe without extra coordination, and a
//! leaf update holds the lock for a handful of instructions. Sweeps and
//! enumerations hold the same lock for their whole walk, so they must stay
//! free of I/O.
//!
//! # Hot Path
//!
//! 1. Parse the address (malformed input never reaches the trie)
//! 2. Lock, resolve or allocate the leaf, update one byte, unlock
//! 3. Log and count the outcome outside the lock

use super::address::{self, octets_to_addr, octets_to_u32};
use super::cell::{self, BanDuration, CellState, MAX_TEMPORARY_MINUTES, PERMANENT_BAN};
use super::sweeper::decay_cell;
use super::trie::{AddressTrie, SweepStats};
use crate::config::{ConfigError, GuardConfig};
use crate::metrics;
use parking_lot::{Mutex, MutexGuard};
use serde::Serialize;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Validated guard parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardSettings {
    limit: i8,
    cycle: Duration,
    ban_minutes: u8,
    per_cycle_allowance: u8,
}

impl GuardSettings {
    /// Visits restored per sweep when no allowance is configured.
    pub const DEFAULT_ALLOWANCE: u8 = 50;

    /// Validate and build settings.
    ///
    /// `limit` in `[0, 127]`, `cycle_seconds` in `[1, 3600]`,
    /// `ban_minutes` in `[1, 127]`.
    pub fn new(limit: i64, cycle_seconds: i64, ban_minutes: i64) -> Result<Self, ConfigError> {
        Self::from_config(&GuardConfig {
            limit,
            cycle_seconds,
            ban_minutes,
            per_cycle_allowance: i64::from(Self::DEFAULT_ALLOWANCE),
        })
    }

    /// Build settings from the `[guard]` config section.
    pub fn from_config(config: &GuardConfig) -> Result<Self, ConfigError> {
        if let Some(err) = config.range_errors().into_iter().next() {
            return Err(ConfigError::OutOfRange(err));
        }
        // Ranges checked above; every value fits its target type.
        Ok(Self {
            limit: config.limit as i8,
            cycle: Duration::from_secs(config.cycle_seconds as u64),
            ban_minutes: config.ban_minutes as u8,
            per_cycle_allowance: config.per_cycle_allowance as u8,
        })
    }

    /// Override the per-cycle allowance, `[1, 127]`.
    pub fn with_allowance(self, allowance: u8) -> Result<Self, ConfigError> {
        match crate::config::check_range(
            "guard.per_cycle_allowance",
            i64::from(allowance),
            1,
            127,
        ) {
            Some(err) => Err(ConfigError::OutOfRange(err)),
            None => Ok(Self {
                per_cycle_allowance: allowance,
                ..self
            }),
        }
    }

    pub fn limit(&self) -> i8 {
        self.limit
    }

    pub fn cycle(&self) -> Duration {
        self.cycle
    }

    pub fn ban_minutes(&self) -> u8 {
        self.ban_minutes
    }

    pub fn per_cycle_allowance(&self) -> u8 {
        self.per_cycle_allowance
    }
}

/// Result of recording one visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitOutcome {
    /// The address could not be parsed. Nothing was recorded.
    InvalidAddress,
    /// Visit counted; the value is the count so far in this cycle.
    Allowed(u8),
    /// This visit reached the limit; the address is now banned for the
    /// given minutes.
    JustBanned(u8),
    /// Already banned; the value is the remaining minutes after this visit
    /// extended the ban.
    TemporarilyBanned(u8),
    /// Sticky ban.
    PermanentlyBanned,
}

impl VisitOutcome {
    /// Whether the request must be turned away.
    #[inline]
    pub fn is_rejected(&self) -> bool {
        !matches!(self, VisitOutcome::Allowed(_) | VisitOutcome::JustBanned(_))
    }

    /// Metric label.
    pub fn label(&self) -> &'static str {
        match self {
            VisitOutcome::InvalidAddress => "invalid_address",
            VisitOutcome::Allowed(_) => "allowed",
            VisitOutcome::JustBanned(_) => "just_banned",
            VisitOutcome::TemporarilyBanned(_) => "temporarily_banned",
            VisitOutcome::PermanentlyBanned => "permanently_banned",
        }
    }
}

/// Result of deleting one address's record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    InvalidAddress,
}

impl fmt::Display for DeleteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeleteOutcome::Deleted => "deleted",
            DeleteOutcome::NotFound => "not found",
            DeleteOutcome::InvalidAddress => "invalid address",
        })
    }
}

/// What an enumeration yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationMode {
    /// Every address with a non-zero cell.
    Recorded,
    /// Only addresses in permanent-ban state.
    PermanentBans,
}

/// Thread-safe visit classifier.
pub struct VisitGuard {
    trie: Mutex<AddressTrie>,
    settings: GuardSettings,
}

impl fmt::Debug for VisitGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisitGuard")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl VisitGuard {
    /// Create an empty guard.
    pub fn new(settings: GuardSettings) -> Self {
        Self {
            trie: Mutex::new(AddressTrie::new()),
            settings,
        }
    }

    pub fn settings(&self) -> &GuardSettings {
        &self.settings
    }

    /// **HOT PATH**: record one visit from a textual address.
    pub fn record(&self, addr: &str) -> VisitOutcome {
        match address::parse_octets(addr) {
            Some(octets) => self.record_octets(octets),
            None => {
                debug!(ip = %addr, "rejecting malformed client address");
                metrics::record_visit(VisitOutcome::InvalidAddress);
                VisitOutcome::InvalidAddress
            }
        }
    }

    /// Record one visit from a socket peer address.
    pub fn record_ip(&self, ip: IpAddr) -> VisitOutcome {
        match address::ip_octets(ip) {
            Some(octets) => self.record_octets(octets),
            None => {
                metrics::record_visit(VisitOutcome::InvalidAddress);
                VisitOutcome::InvalidAddress
            }
        }
    }

    /// Record one visit from raw octets.
    pub fn record_octets(&self, octets: [u8; 4]) -> VisitOutcome {
        let outcome = {
            let mut trie = self.trie.lock();
            let cell = trie.cell_or_insert(octets);
            let (next, outcome) = self.classify(*cell);
            *cell = next;
            outcome
        };

        metrics::record_visit(outcome);
        match outcome {
            VisitOutcome::JustBanned(minutes) => {
                info!(ip = %octets_to_addr(octets), minutes, "visit limit reached, address banned");
                metrics::record_ban("automatic");
            }
            VisitOutcome::TemporarilyBanned(MAX_TEMPORARY_MINUTES) => {
                warn!(ip = %octets_to_addr(octets), "banned address still hammering, ban at maximum");
            }
            _ => {}
        }
        outcome
    }

    /// Cell transition for one visit.
    #[inline]
    fn classify(&self, cell: i8) -> (i8, VisitOutcome) {
        match cell {
            PERMANENT_BAN => (cell, VisitOutcome::PermanentlyBanned),
            c if c < 0 => {
                // Extend by a unit, but never escalate into the permanent sentinel.
                let next = if c > -(MAX_TEMPORARY_MINUTES as i8) { c - 1 } else { c };
                (next, VisitOutcome::TemporarilyBanned(next.unsigned_abs()))
            }
            c => {
                let next = i16::from(c) + 1;
                if next >= i16::from(self.settings.limit) {
                    let minutes = self.settings.ban_minutes;
                    (-(minutes as i8), VisitOutcome::JustBanned(minutes))
                } else {
                    (next as i8, VisitOutcome::Allowed(next as u8))
                }
            }
        }
    }

    /// Give one visit back after a response was served from cache.
    ///
    /// Only visit counters are touched: bans are never shortened, and an
    /// unrecorded address is not allocated. Returns the cell afterwards, or
    /// `None` for a malformed address.
    pub fn reduce_on_cache_hit(&self, addr: &str) -> Option<i8> {
        address::parse_octets(addr).map(|octets| self.reduce_on_cache_hit_octets(octets))
    }

    /// Octet form of [`reduce_on_cache_hit`](Self::reduce_on_cache_hit).
    pub fn reduce_on_cache_hit_octets(&self, octets: [u8; 4]) -> i8 {
        let mut trie = self.trie.lock();
        match trie.cell_mut(octets) {
            Some(cell) => {
                if *cell > 0 {
                    *cell -= 1;
                }
                *cell
            }
            None => 0,
        }
    }

    /// Ban an address or extend its ban.
    ///
    /// Returns the new cell value, or `None` for a malformed address.
    pub fn apply_ban(&self, addr: &str, duration: BanDuration) -> Option<i8> {
        address::parse_octets(addr).map(|octets| self.apply_ban_octets(octets, duration))
    }

    /// Octet form of [`apply_ban`](Self::apply_ban).
    ///
    /// A zero-minute duration is ignored and returns the current cell
    /// without allocating.
    pub fn apply_ban_octets(&self, octets: [u8; 4], duration: BanDuration) -> i8 {
        if duration.cell_value() == 0 {
            debug!(ip = %octets_to_addr(octets), "ignoring zero-minute ban");
            return self.cell(octets);
        }

        let next = {
            let mut trie = self.trie.lock();
            let slot = trie.cell_or_insert(octets);
            *slot = cell::extend_ban(*slot, duration);
            *slot
        };

        debug!(ip = %octets_to_addr(octets), %duration, cell = next, "ban applied");
        metrics::record_ban(match duration {
            BanDuration::Permanent => "permanent",
            BanDuration::Minutes(_) => "temporary",
        });
        next
    }

    /// Read-only lookup of the raw cell. `None` means malformed input;
    /// `Some(0)` means no record.
    pub fn is_banned(&self, addr: &str) -> Option<i8> {
        address::parse_octets(addr).map(|octets| self.cell(octets))
    }

    /// Raw cell for octets.
    pub fn cell(&self, octets: [u8; 4]) -> i8 {
        self.trie.lock().get(octets)
    }

    /// Decoded state for a textual address.
    pub fn state(&self, addr: &str) -> Option<CellState> {
        self.is_banned(addr).map(CellState::decode)
    }

    /// Zero one address's cell. Empty arrays are left for the sweeper.
    pub fn delete_record(&self, addr: &str) -> DeleteOutcome {
        let Some(octets) = address::parse_octets(addr) else {
            return DeleteOutcome::InvalidAddress;
        };

        let mut trie = self.trie.lock();
        match trie.cell_mut(octets) {
            Some(cell) if *cell != 0 => {
                *cell = 0;
                DeleteOutcome::Deleted
            }
            _ => DeleteOutcome::NotFound,
        }
    }

    /// Lazily enumerate recorded addresses in ascending order.
    ///
    /// The enumeration holds the guard lock until dropped: it sees a
    /// consistent view and every `record` call waits for it. Drain it
    /// promptly and never hold it across an `.await`.
    pub fn enumerate(&self, mode: EnumerationMode) -> Enumeration<'_> {
        Enumeration {
            trie: self.trie.lock(),
            mode,
            cursor: Some(0),
        }
    }

    /// Number of recorded addresses (count-only enumeration).
    pub fn recorded_count(&self) -> usize {
        let trie = self.trie.lock();
        let mut count = 0;
        trie.for_each_recorded(|_, _| count += 1);
        count
    }

    /// Snapshot of permanently banned addresses, ascending.
    pub fn permanent_bans(&self) -> Vec<Ipv4Addr> {
        let trie = self.trie.lock();
        let mut bans = Vec::new();
        trie.for_each_recorded(|octets, cell| {
            if cell == PERMANENT_BAN {
                bans.push(octets_to_addr(octets));
            }
        });
        bans
    }

    /// Permanently banned addresses in dotted form.
    pub fn permanent_ban_strings(&self) -> Vec<String> {
        self.permanent_bans()
            .into_iter()
            .map(|ip| ip.to_string())
            .collect()
    }

    /// Re-apply permanent bans, e.g. from the persisted list.
    pub fn restore_permanent_bans<I>(&self, addrs: I) -> usize
    where
        I: IntoIterator<Item = Ipv4Addr>,
    {
        let mut trie = self.trie.lock();
        let mut restored = 0;
        for addr in addrs {
            let cell = trie.cell_or_insert(addr.octets());
            *cell = PERMANENT_BAN;
            restored += 1;
        }
        restored
    }

    /// Estimated bytes held by allocated trie arrays.
    pub fn memory_footprint(&self) -> usize {
        self.trie.lock().memory_footprint()
    }

    /// One decay pass over every recorded address.
    ///
    /// Counters drop by the per-cycle allowance (floored at zero), temporary
    /// bans lose one minute, permanent bans are untouched. Arrays left empty
    /// are unlinked.
    pub fn sweep(&self) -> SweepStats {
        let allowance = self.settings.per_cycle_allowance;
        let started = Instant::now();
        let (stats, bytes) = {
            let mut trie = self.trie.lock();
            let stats = trie.sweep(|cell| decay_cell(cell, allowance));
            (stats, trie.memory_footprint())
        };

        metrics::record_sweep(started.elapsed().as_secs_f64(), stats.arrays_reclaimed, bytes);
        debug!(
            decayed = stats.cells_decayed,
            reclaimed = stats.arrays_reclaimed,
            bytes,
            "sweep pass completed"
        );
        stats
    }
}

/// Lazy walk over recorded addresses. Holds the guard lock.
pub struct Enumeration<'a> {
    trie: MutexGuard<'a, AddressTrie>,
    mode: EnumerationMode,
    cursor: Option<u32>,
}

impl Iterator for Enumeration<'_> {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        loop {
            let from = self.cursor?;
            let Some((octets, cell)) = self.trie.next_recorded(from) else {
                self.cursor = None;
                return None;
            };
            self.cursor = octets_to_u32(octets).checked_add(1);

            let wanted = match self.mode {
                EnumerationMode::Recorded => true,
                EnumerationMode::PermanentBans => cell == PERMANENT_BAN,
            };
            if wanted {
                return Some(octets_to_addr(octets));
            }
        }
    }
}
