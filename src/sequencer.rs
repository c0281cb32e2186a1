//! Actuation sequencer.
//!
//! Decides when to halt the drive and when to dispatch the pick coordinate.
//!
//! ```text
//!   arm()            in zone, auto-stop,      settle delay        coordinate
//!  Idle ──> Armed ──> !stop_sent ──> StopPending ──> CoordinatePending ──> Idle
//!                     (emit D#)                     (park until a coordinate
//!                                                    is saved, emit G..#)
//! ```
//!
//! Every transmission is behind a single-shot guard, so evaluating the same
//! frame condition any number of times emits each command at most once per
//! arming cycle. An emergency stop returns to `Idle` from any phase.
//!
//! The sequencer does no I/O. It returns the commands a tick produced and the
//! caller transmits them in order.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::transport::HarvestCommand;

/// Minimum wait between the stop command and the pick coordinate.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Drive not running under sequencer control.
    Idle,
    /// Continuous forward drive active; eligible to stop.
    Armed,
    /// Stop sent; settle delay running.
    StopPending { stopped_at: Instant },
    /// Settle delay over; waiting for a saved coordinate.
    CoordinatePending { stopped_at: Instant },
}

/// Pick coordinate entered by the operator, independent of the live frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SavedCoordinate {
    pub z_cm: f64,
    pub y_cm: f64,
}

/// Flat view of the sequencer for status displays.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SequencerState {
    pub armed: bool,
    pub stop_sent: bool,
    pub coordinate_pending: bool,
    pub stop_timestamp: Option<Instant>,
    pub saved_coordinate: Option<SavedCoordinate>,
}

pub struct ActuationSequencer {
    phase: Phase,
    stop_sent: bool,
    auto_stop: bool,
    saved: Option<SavedCoordinate>,
    settle_delay: Duration,
}

impl ActuationSequencer {
    pub fn new(auto_stop: bool) -> Self {
        Self {
            phase: Phase::Idle,
            stop_sent: false,
            auto_stop,
            saved: None,
            settle_delay: SETTLE_DELAY,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> SequencerState {
        let stop_timestamp = match self.phase {
            Phase::StopPending { stopped_at } | Phase::CoordinatePending { stopped_at } => {
                Some(stopped_at)
            }
            Phase::Idle | Phase::Armed => None,
        };
        SequencerState {
            armed: self.phase == Phase::Armed,
            stop_sent: self.stop_sent,
            coordinate_pending: stop_timestamp.is_some(),
            stop_timestamp,
            saved_coordinate: self.saved,
        }
    }

    pub fn auto_stop(&self) -> bool {
        self.auto_stop
    }

    pub fn set_auto_stop(&mut self, enabled: bool) {
        self.auto_stop = enabled;
    }

    pub fn saved_coordinate(&self) -> Option<SavedCoordinate> {
        self.saved
    }

    /// Remember the coordinate to dispatch after the next automatic stop.
    pub fn save_coordinate(&mut self, coordinate: SavedCoordinate) {
        self.saved = Some(coordinate);
    }

    pub fn clear_coordinate(&mut self) {
        self.saved = None;
    }

    /// Continuous forward drive was started (`T#` went out).
    ///
    /// Opens a fresh arming cycle. A coordinate still pending from the
    /// previous cycle is superseded.
    pub fn arm(&mut self) {
        if self.state().coordinate_pending {
            log::info!("sequencer: re-armed, pending coordinate superseded");
        }
        self.phase = Phase::Armed;
        self.stop_sent = false;
    }

    /// Operator stop or lost link. Leaves the guard as it is; the next
    /// `arm` resets it.
    pub fn halt(&mut self) {
        if self.state().coordinate_pending {
            log::info!("sequencer: halted, pending coordinate dropped");
        }
        self.phase = Phase::Idle;
    }

    /// Controller-side emergency stop. Preempts every other transition.
    pub fn emergency_stop(&mut self) {
        self.phase = Phase::Idle;
        self.stop_sent = false;
    }

    /// Evaluate one frame tick.
    ///
    /// The stop check runs before the settle-delay check, so a stop issued
    /// on this tick can never release its coordinate on the same tick.
    pub fn on_frame(&mut self, target_in_zone: bool, now: Instant) -> Vec<HarvestCommand> {
        let mut commands = Vec::new();
        if let Some(cmd) = self.check_stop(target_in_zone, now) {
            commands.push(cmd);
        }
        if let Some(cmd) = self.check_coordinate(now) {
            commands.push(cmd);
        }
        commands
    }

    fn check_stop(&mut self, target_in_zone: bool, now: Instant) -> Option<HarvestCommand> {
        let eligible =
            self.auto_stop && target_in_zone && self.phase == Phase::Armed && !self.stop_sent;
        if !eligible {
            return None;
        }
        self.stop_sent = true;
        self.phase = Phase::StopPending { stopped_at: now };
        Some(HarvestCommand::Stop)
    }

    fn check_coordinate(&mut self, now: Instant) -> Option<HarvestCommand> {
        let stopped_at = match self.phase {
            Phase::StopPending { stopped_at } | Phase::CoordinatePending { stopped_at } => {
                stopped_at
            }
            Phase::Idle | Phase::Armed => return None,
        };
        if now.saturating_duration_since(stopped_at) < self.settle_delay {
            return None;
        }
        match self.saved {
            Some(coordinate) => {
                self.phase = Phase::Idle;
                Some(HarvestCommand::Pick {
                    z_cm: coordinate.z_cm,
                    y_cm: coordinate.y_cm,
                })
            }
            None => {
                if let Phase::StopPending { .. } = self.phase {
                    log::warn!("sequencer: no saved coordinate, parked until one is saved");
                }
                self.phase = Phase::CoordinatePending { stopped_at };
                None
            }
        }
    }
}

impl Default for ActuationSequencer {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn armed() -> ActuationSequencer {
        let mut seq = ActuationSequencer::new(true);
        seq.arm();
        seq
    }

    fn coordinate() -> SavedCoordinate {
        SavedCoordinate {
            z_cm: 55.0,
            y_cm: 12.3,
        }
    }

    #[test]
    fn idle_sequencer_never_stops() {
        let mut seq = ActuationSequencer::new(true);
        let t0 = Instant::now();
        assert!(seq.on_frame(true, t0).is_empty());
        assert_eq!(seq.phase(), Phase::Idle);
    }

    #[test]
    fn auto_stop_disabled_never_stops() {
        let mut seq = ActuationSequencer::new(false);
        seq.arm();
        assert!(seq.on_frame(true, Instant::now()).is_empty());
        assert_eq!(seq.phase(), Phase::Armed);
    }

    #[test]
    fn stop_fires_once_for_repeated_in_zone_frames() {
        let mut seq = armed();
        let t0 = Instant::now();
        assert_eq!(seq.on_frame(true, t0), vec![HarvestCommand::Stop]);
        assert!(seq.on_frame(true, t0).is_empty());
        assert!(seq.on_frame(true, t0 + ms(10)).is_empty());

        let state = seq.state();
        assert!(!state.armed);
        assert!(state.stop_sent);
        assert!(state.coordinate_pending);
        assert_eq!(state.stop_timestamp, Some(t0));
    }

    #[test]
    fn out_of_zone_frames_keep_drive_armed() {
        let mut seq = armed();
        let t0 = Instant::now();
        for i in 0..5 {
            assert!(seq.on_frame(false, t0 + ms(i * 30)).is_empty());
        }
        assert_eq!(seq.phase(), Phase::Armed);
    }

    #[test]
    fn coordinate_waits_for_settle_delay() {
        let mut seq = armed();
        seq.save_coordinate(coordinate());
        let t0 = Instant::now();
        assert_eq!(seq.on_frame(true, t0), vec![HarvestCommand::Stop]);
        assert!(seq.on_frame(true, t0 + ms(500)).is_empty());
        assert!(seq.on_frame(false, t0 + ms(999)).is_empty());

        let sent = seq.on_frame(false, t0 + ms(1000));
        assert_eq!(
            sent,
            vec![HarvestCommand::Pick {
                z_cm: 55.0,
                y_cm: 12.3
            }]
        );
        assert_eq!(seq.phase(), Phase::Idle);
        assert!(!seq.state().coordinate_pending);

        for i in 1..10 {
            assert!(seq.on_frame(true, t0 + ms(1000 + i * 100)).is_empty());
        }
    }

    #[test]
    fn parks_without_saved_coordinate() {
        let mut seq = armed();
        let t0 = Instant::now();
        assert_eq!(seq.on_frame(true, t0), vec![HarvestCommand::Stop]);
        for secs in 1..30 {
            let now = t0 + Duration::from_secs(secs);
            assert!(seq.on_frame(true, now).is_empty());
            assert!(matches!(seq.phase(), Phase::CoordinatePending { .. }));
        }
        assert!(seq.state().coordinate_pending);
    }

    #[test]
    fn coordinate_saved_while_parked_goes_out_next_tick() {
        let mut seq = armed();
        let t0 = Instant::now();
        seq.on_frame(true, t0);
        assert!(seq.on_frame(false, t0 + ms(1500)).is_empty());

        seq.save_coordinate(coordinate());
        let sent = seq.on_frame(false, t0 + ms(1600));
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0], HarvestCommand::Pick { .. }));
        assert_eq!(seq.phase(), Phase::Idle);
    }

    #[test]
    fn emergency_stop_preempts_pending_coordinate() {
        let mut seq = armed();
        seq.save_coordinate(coordinate());
        let t0 = Instant::now();
        seq.on_frame(true, t0);

        seq.emergency_stop();
        let state = seq.state();
        assert_eq!(seq.phase(), Phase::Idle);
        assert!(!state.stop_sent);
        assert!(!state.coordinate_pending);
        assert!(state.stop_timestamp.is_none());
        assert!(seq.on_frame(true, t0 + ms(2000)).is_empty());

        // a fresh start re-arms cleanly
        seq.arm();
        assert_eq!(
            seq.on_frame(true, t0 + ms(2100)),
            vec![HarvestCommand::Stop]
        );
    }

    #[test]
    fn emergency_stop_disarms_armed_drive() {
        let mut seq = armed();
        seq.emergency_stop();
        assert!(seq.on_frame(true, Instant::now()).is_empty());
        assert_eq!(seq.phase(), Phase::Idle);
    }

    #[test]
    fn rearm_supersedes_pending_coordinate() {
        let mut seq = armed();
        seq.save_coordinate(coordinate());
        let t0 = Instant::now();
        seq.on_frame(true, t0);
        seq.arm();
        assert_eq!(seq.phase(), Phase::Armed);
        assert!(!seq.state().stop_sent);
        assert!(seq.on_frame(false, t0 + ms(1500)).is_empty());
    }

    #[test]
    fn halt_drops_pending_coordinate_but_keeps_guard() {
        let mut seq = armed();
        seq.save_coordinate(coordinate());
        let t0 = Instant::now();
        seq.on_frame(true, t0);
        seq.halt();
        assert!(seq.on_frame(false, t0 + ms(1500)).is_empty());
        assert!(seq.state().stop_sent);
    }

    #[test]
    fn saved_coordinate_survives_cycles() {
        let mut seq = armed();
        seq.save_coordinate(coordinate());
        let t0 = Instant::now();
        seq.on_frame(true, t0);
        assert_eq!(seq.on_frame(true, t0 + ms(1000)).len(), 1);

        seq.arm();
        let t1 = t0 + ms(5000);
        assert_eq!(seq.on_frame(true, t1), vec![HarvestCommand::Stop]);
        assert_eq!(seq.on_frame(true, t1 + ms(1200)).len(), 1);
        assert_eq!(seq.saved_coordinate(), Some(coordinate()));
    }
}
