//! Pacing clock: converts elapsed T-states into wall-clock delay.

use std::thread;
use std::time::{Duration, Instant};

use tracing::warn;

use emu80_core::MachineError;

/// Resolutions below this are honoured but will effectively spin the host.
const SPIN_THRESHOLD_NS: i64 = 1_000_000;

/// Upper bound on a requested resolution: ten seconds.
pub(crate) const MAX_RESOLUTION_NS: i64 = 10_000_000_000;

/// Converts simulated T-states into wall-clock time at a nominal CPU
/// frequency, sleeping at tick boundaries so the emulated machine keeps
/// pace with real time.
#[derive(Debug)]
pub struct CpuClock {
    /// Nominal CPU frequency in Hz (2 MHz for the 8080).
    frequency_hz: u64,
    /// Adopted tick resolution in nanoseconds; -1 disables pacing.
    resolution_ns: i64,
    /// T-states accumulated since the last reset.
    total_tstates: u64,
    /// Simulated time at the last wall-clock synchronisation.
    last_sync_ns: u64,
    /// Wall-clock baseline.
    epoch: Instant,
}

impl CpuClock {
    #[must_use]
    pub fn new(frequency_hz: u64) -> Self {
        Self {
            frequency_hz,
            resolution_ns: -1,
            total_tstates: 0,
            last_sync_ns: 0,
            epoch: Instant::now(),
        }
    }

    /// Zero the accumulator and baseline wall-clock to now.
    pub fn reset(&mut self) {
        self.total_tstates = 0;
        self.last_sync_ns = 0;
        self.epoch = Instant::now();
    }

    /// Duration of one T-state in nanoseconds.
    fn tstate_ns(&self) -> f64 {
        1_000_000_000.0 / self.frequency_hz as f64
    }

    /// Simulated time elapsed since the last reset.
    #[must_use]
    pub fn simulated_ns(&self) -> u64 {
        (u128::from(self.total_tstates) * 1_000_000_000 / u128::from(self.frequency_hz)) as u64
    }

    /// Request a new tick granularity.
    ///
    /// `-1` disables pacing, `0` requests the host's finest granularity,
    /// positive values request that interval. Returns the adopted
    /// resolution expressed in T-states (at least 1, so the interrupt
    /// cadence always spans whole instructions). When the host cannot
    /// honour the request the clock adopts the host's granularity and
    /// reports `ClockResolution`; execution may proceed with reduced
    /// pacing fidelity.
    pub fn set_tick_resolution(&mut self, ns: i64) -> Result<i64, MachineError> {
        if !(-1..=MAX_RESOLUTION_NS).contains(&ns) {
            return Err(MachineError::ClockResolution);
        }

        if ns < 0 {
            self.resolution_ns = -1;
            return Ok(1);
        }

        let host = host_resolution_ns();
        let adopted = if ns == 0 { host } else { ns };

        if ns > 0 && ns < SPIN_THRESHOLD_NS {
            warn!(requested_ns = ns, "sub-millisecond clock resolution is likely to spin the host cpu");
        }

        self.resolution_ns = adopted.max(host);

        let in_tstates = ((self.resolution_ns as f64 / self.tstate_ns()).round() as i64).max(1);

        if ns > 0 && ns < host {
            warn!(requested_ns = ns, adopted_ns = self.resolution_ns, "host timer cannot honour the requested resolution");
            return Err(MachineError::ClockResolution);
        }

        Ok(in_tstates)
    }

    /// The adopted resolution expressed in T-states (1 when pacing is
    /// disabled, so interrupt cadences count whole instructions).
    #[must_use]
    pub fn resolution_in_tstates(&self) -> i64 {
        if self.resolution_ns < 0 {
            1
        } else {
            ((self.resolution_ns as f64 / self.tstate_ns()).round() as i64).max(1)
        }
    }

    /// Account for retired T-states and pace against the wall clock.
    ///
    /// Sleeps when the accumulated simulated time has crossed a tick
    /// boundary and wall-clock time is behind. Returns the total
    /// simulated time in nanoseconds.
    pub fn tick(&mut self, tstates: u64) -> u64 {
        self.total_tstates += tstates;
        let simulated = self.simulated_ns();

        if self.resolution_ns >= 0
            && simulated - self.last_sync_ns >= self.resolution_ns as u64
        {
            let target = self.epoch + Duration::from_nanos(simulated);
            let now = Instant::now();
            if target > now {
                thread::sleep(target - now);
            }
            self.last_sync_ns = simulated;
        }

        simulated
    }
}

/// Smallest sleep interval the host honours, measured once per call.
fn host_resolution_ns() -> i64 {
    let mut best = i64::MAX;
    for _ in 0..3 {
        let start = Instant::now();
        thread::sleep(Duration::from_nanos(1));
        best = best.min(start.elapsed().as_nanos() as i64);
    }
    best.max(1)
}

#[cfg(test)]
mod tests {
    use super::CpuClock;
    use emu80_core::MachineError;

    #[test]
    fn unpaced_clock_reports_simulated_time() {
        let mut clock = CpuClock::new(2_000_000);
        assert_eq!(clock.set_tick_resolution(-1).unwrap(), 1);
        assert_eq!(clock.tick(4), 2_000);
        assert_eq!(clock.tick(4), 4_000);
    }

    #[test]
    fn out_of_range_resolution_rejected() {
        let mut clock = CpuClock::new(2_000_000);
        assert_eq!(
            clock.set_tick_resolution(-2),
            Err(MachineError::ClockResolution)
        );
        assert_eq!(
            clock.set_tick_resolution(10_000_000_001),
            Err(MachineError::ClockResolution)
        );
    }

    #[test]
    fn resolution_in_tstates() {
        let mut clock = CpuClock::new(2_000_000);
        // 25 ms at 500 ns per T-state.
        assert_eq!(clock.set_tick_resolution(25_000_000).unwrap(), 50_000);
    }

    #[test]
    fn reset_rebaselines() {
        let mut clock = CpuClock::new(2_000_000);
        clock.tick(1_000);
        clock.reset();
        assert_eq!(clock.simulated_ns(), 0);
    }
}
