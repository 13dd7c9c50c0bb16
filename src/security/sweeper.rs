//! Periodic decay of visit counters and temporary bans.
//!
//! One sweep pass per cycle: counters give back a fixed allowance (so bursts
//! straddling a cycle boundary are smoothed rather than forgiven outright),
//! temporary bans lose a minute, permanent bans are left alone, and arrays
//! that drain to zero are unlinked from the trie.
//!
//! The loop selects over its interval and the shared shutdown signal. On
//! shutdown it exits between passes; a pass is never interrupted midway and
//! no final pass is run.

use super::cell::PERMANENT_BAN;
use super::guard::VisitGuard;
use crate::lifecycle::ShutdownSignal;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Decay rule applied to one non-zero cell per pass.
#[inline]
pub fn decay_cell(cell: i8, allowance: u8) -> i8 {
    match cell {
        PERMANENT_BAN => cell,
        c if c > 0 => (i16::from(c) - i16::from(allowance)).max(0) as i8,
        c if c < 0 => c + 1,
        c => c,
    }
}

/// Run sweep passes every `period` until shutdown.
///
/// The first pass happens one full period after start.
pub async fn run_sweeper(guard: Arc<VisitGuard>, period: Duration, mut shutdown: ShutdownSignal) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(period_secs = period.as_secs_f64(), "sweeper started");

    let mut passes: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let stats = guard.sweep();
                passes += 1;
                debug!(
                    pass = passes,
                    decayed = stats.cells_decayed,
                    reclaimed = stats.arrays_reclaimed,
                    "sweep tick"
                );
            }
            _ = shutdown.recv() => {
                info!(passes, "sweeper stopping");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Lifecycle;
    use crate::security::cell::BanDuration;
    use crate::security::guard::GuardSettings;

    #[test]
    fn decay_rules() {
        assert_eq!(decay_cell(PERMANENT_BAN, 50), PERMANENT_BAN);
        assert_eq!(decay_cell(-127, 50), -126);
        assert_eq!(decay_cell(-1, 50), 0);
        assert_eq!(decay_cell(127, 50), 77);
        assert_eq!(decay_cell(50, 50), 0);
        assert_eq!(decay_cell(3, 50), 0);
        assert_eq!(decay_cell(3, 1), 2);
        assert_eq!(decay_cell(0, 50), 0);
    }

    #[test]
    fn counter_decays_by_allowance_not_reset() {
        let settings = GuardSettings::new(127, 60, 5)
            .unwrap()
            .with_allowance(50)
            .unwrap();
        let guard = VisitGuard::new(settings);
        for _ in 0..120 {
            guard.record("11.0.0.1");
        }
        guard.sweep();
        assert_eq!(guard.is_banned("11.0.0.1"), Some(70));
        guard.sweep();
        assert_eq!(guard.is_banned("11.0.0.1"), Some(20));
        guard.sweep();
        assert_eq!(guard.is_banned("11.0.0.1"), Some(0));
    }

    #[test]
    fn temporary_ban_of_n_clears_after_n_passes() {
        let guard = VisitGuard::new(GuardSettings::new(10, 60, 5).unwrap());
        for n in [1u8, 2, 17, 127] {
            let addr = format!("12.0.0.{n}");
            guard.apply_ban(&addr, BanDuration::Minutes(n));
        }
        for pass in 1..=127u8 {
            guard.sweep();
            for n in [1u8, 2, 17, 127] {
                let addr = format!("12.0.0.{n}");
                let expected = if pass >= n { 0 } else { -((n - pass) as i8) };
                assert_eq!(guard.is_banned(&addr), Some(expected), "ban {n} after {pass} passes");
            }
        }
    }

    #[test]
    fn permanent_bans_survive_sweeps() {
        let guard = VisitGuard::new(GuardSettings::new(10, 60, 5).unwrap());
        guard.apply_ban("13.0.0.1", BanDuration::Permanent);
        for _ in 0..200 {
            guard.sweep();
        }
        assert_eq!(guard.is_banned("13.0.0.1"), Some(PERMANENT_BAN));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_on_interval_and_stops_on_signal() {
        let guard = Arc::new(VisitGuard::new(GuardSettings::new(10, 60, 3).unwrap()));
        guard.apply_ban("14.0.0.1", BanDuration::Minutes(3));

        let mut lifecycle = Lifecycle::new();
        let period = guard.settings().cycle();
        {
            let guard = Arc::clone(&guard);
            lifecycle.spawn("sweeper", move |signal| run_sweeper(guard, period, signal));
        }

        // Nothing happens before the first full period.
        tokio::time::sleep(period / 2).await;
        assert_eq!(guard.is_banned("14.0.0.1"), Some(-3));

        tokio::time::sleep(period).await;
        assert_eq!(guard.is_banned("14.0.0.1"), Some(-2));

        tokio::time::sleep(period * 2).await;
        assert_eq!(guard.is_banned("14.0.0.1"), Some(0));

        let report = lifecycle.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.completed, 1);
        assert_eq!(report.aborted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_exits_without_final_pass() {
        let guard = Arc::new(VisitGuard::new(GuardSettings::new(10, 60, 3).unwrap()));
        guard.apply_ban("15.0.0.1", BanDuration::Minutes(3));

        let mut lifecycle = Lifecycle::new();
        {
            let guard = Arc::clone(&guard);
            lifecycle.spawn("sweeper", move |signal| {
                run_sweeper(guard, Duration::from_secs(60), signal)
            });
        }

        let report = lifecycle.shutdown(Duration::from_secs(1)).await;
        assert_eq!(report.completed, 1);
        assert_eq!(guard.is_banned("15.0.0.1"), Some(-3));
    }
}
