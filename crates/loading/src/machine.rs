//! Pure busy-indicator state machine.
//!
//! The machine never sleeps or renders anything itself. Every transition
//! returns the [`Effect`]s the host must carry out: arm or cancel a timer,
//! show or hide the indicator. Timers are identified by [`TimerId`]; firing an
//! id the machine no longer tracks is a no-op, so hosts don't need to win any
//! race between cancelling a timer and it going off.

use std::time::{Duration, Instant};

/// Indicator timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Work shorter than this never shows the indicator.
    pub show_delay: Duration,
    /// Quiet period after the last exit, absorbing chained follow-up work.
    pub hide_quiet: Duration,
    /// Once shown, the indicator stays up at least this long.
    pub min_visible: Duration,
}
impl Default for Timings {
    fn default() -> Self {
        Self {
            show_delay: Duration::from_millis(250),
            hide_quiet: Duration::from_millis(150),
            min_visible: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Show,
    Hide,
    MinVisible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    Arm { id: TimerId, kind: TimerKind, after: Duration },
    Cancel(TimerId),
    Show,
    Hide,
}

#[derive(Debug)]
pub struct LoadingMachine {
    timings: Timings,
    active: usize,
    shown_at: Option<Instant>,
    show_timer: Option<TimerId>,
    hide_timer: Option<TimerId>,
    min_visible_timer: Option<TimerId>,
    next_timer: u64,
}

impl LoadingMachine {
    pub fn new(timings: Timings) -> Self {
        Self {
            timings,
            active: 0,
            shown_at: None,
            show_timer: None,
            hide_timer: None,
            min_visible_timer: None,
            next_timer: 0,
        }
    }

    /// Number of outstanding operations.
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn is_shown(&self) -> bool {
        self.shown_at.is_some()
    }

    fn arm(&mut self, kind: TimerKind, after: Duration) -> (TimerId, Effect) {
        self.next_timer += 1;
        let id = TimerId(self.next_timer);
        (id, Effect::Arm { id, kind, after })
    }

    /// An operation started.
    pub fn enter(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.active += 1;
        // New work arrived before the indicator went away; keep it up.
        effects.extend(self.hide_timer.take().map(Effect::Cancel));
        effects.extend(self.min_visible_timer.take().map(Effect::Cancel));
        if self.active == 1 && !self.is_shown() {
            effects.extend(self.show_timer.take().map(Effect::Cancel));
            let (id, arm) = self.arm(TimerKind::Show, self.timings.show_delay);
            self.show_timer = Some(id);
            effects.push(arm);
        }
        effects
    }

    /// An operation finished. Unbalanced exits are ignored.
    pub fn exit(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.active == 0 {
            return effects;
        }
        self.active -= 1;
        if self.active > 0 {
            return effects;
        }
        if let Some(id) = self.show_timer.take() {
            // Never became visible, so there is nothing to hide.
            effects.push(Effect::Cancel(id));
            return effects;
        }
        if !self.is_shown() {
            return effects;
        }
        effects.extend(self.hide_timer.take().map(Effect::Cancel));
        let (id, arm) = self.arm(TimerKind::Hide, self.timings.hide_quiet);
        self.hide_timer = Some(id);
        effects.push(arm);
        effects
    }

    /// A previously armed timer went off at `now`.
    pub fn fire(&mut self, id: TimerId, now: Instant) -> Vec<Effect> {
        if self.show_timer == Some(id) {
            self.show_timer = None;
            if self.active > 0 && !self.is_shown() {
                self.shown_at = Some(now);
                return vec![Effect::Show];
            }
        } else if self.hide_timer == Some(id) {
            self.hide_timer = None;
            if let Some(shown_at) = self.shown_at
                && self.active == 0
            {
                let remaining = self.timings.min_visible.saturating_sub(now.saturating_duration_since(shown_at));
                if remaining.is_zero() {
                    self.shown_at = None;
                    return vec![Effect::Hide];
                }
                let (timer, arm) = self.arm(TimerKind::MinVisible, remaining);
                self.min_visible_timer = Some(timer);
                return vec![arm];
            }
        } else if self.min_visible_timer == Some(id) {
            self.min_visible_timer = None;
            if self.active == 0 && self.is_shown() {
                self.shown_at = None;
                return vec![Effect::Hide];
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    fn armed(effects: &[Effect], want: TimerKind) -> (TimerId, Duration) {
        effects
            .iter()
            .find_map(|effect| match effect {
                Effect::Arm { id, kind, after } if *kind == want => Some((*id, *after)),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_fast_operation_never_shows() {
        let mut machine = LoadingMachine::new(Timings::default());
        let (show, after) = armed(&machine.enter(), TimerKind::Show);
        assert_eq!(after, 250 * MS);
        assert_eq!(machine.exit(), vec![Effect::Cancel(show)]);
        // The cancelled timer might still go off; it must do nothing.
        assert!(machine.fire(show, Instant::now()).is_empty());
        assert!(!machine.is_shown());
    }

    #[test]
    fn test_slow_operation_respects_min_visible() {
        let start = Instant::now();
        let mut machine = LoadingMachine::new(Timings::default());
        let (show, _) = armed(&machine.enter(), TimerKind::Show);
        assert_eq!(machine.fire(show, start + 250 * MS), vec![Effect::Show]);

        let (hide, after) = armed(&machine.exit(), TimerKind::Hide);
        assert_eq!(after, 150 * MS);
        // Shown at 250ms, quiet period ends at 410ms: 140ms short of the minimum.
        let (min, remaining) = armed(&machine.fire(hide, start + 410 * MS), TimerKind::MinVisible);
        assert_eq!(remaining, 140 * MS);
        assert_eq!(machine.fire(min, start + 550 * MS), vec![Effect::Hide]);
        assert!(!machine.is_shown());
    }

    #[test]
    fn test_hide_without_min_visible_wait() {
        let start = Instant::now();
        let mut machine = LoadingMachine::new(Timings::default());
        let (show, _) = armed(&machine.enter(), TimerKind::Show);
        machine.fire(show, start + 250 * MS);
        let (hide, _) = armed(&machine.exit(), TimerKind::Hide);
        assert_eq!(machine.fire(hide, start + 1000 * MS), vec![Effect::Hide]);
    }

    #[test]
    fn test_chained_operation_cancels_hide() {
        let start = Instant::now();
        let mut machine = LoadingMachine::new(Timings::default());
        let (show, _) = armed(&machine.enter(), TimerKind::Show);
        machine.fire(show, start + 250 * MS);
        let (hide, _) = armed(&machine.exit(), TimerKind::Hide);

        // Follow-up request within the quiet period: no new show timer, the
        // indicator is already up.
        assert_eq!(machine.enter(), vec![Effect::Cancel(hide)]);
        assert!(machine.fire(hide, start + 500 * MS).is_empty());
        assert!(machine.is_shown());
    }

    #[test]
    fn test_overlapping_operations() {
        let mut machine = LoadingMachine::new(Timings::default());
        let effects = machine.enter();
        assert_eq!(effects.len(), 1);
        // Second operation doesn't re-arm
        assert!(machine.enter().is_empty());
        assert!(machine.exit().is_empty());
        assert_eq!(machine.active(), 1);
        assert_eq!(machine.exit().len(), 1);
        assert_eq!(machine.active(), 0);
    }

    #[test]
    fn test_unbalanced_exit_is_ignored() {
        let mut machine = LoadingMachine::new(Timings::default());
        assert!(machine.exit().is_empty());
        assert_eq!(machine.active(), 0);
    }

    #[test]
    fn test_enter_cancels_pending_min_visible() {
        let start = Instant::now();
        let mut machine = LoadingMachine::new(Timings::default());
        let (show, _) = armed(&machine.enter(), TimerKind::Show);
        machine.fire(show, start + 250 * MS);
        let (hide, _) = armed(&machine.exit(), TimerKind::Hide);
        let (min, _) = armed(&machine.fire(hide, start + 400 * MS), TimerKind::MinVisible);
        assert_eq!(machine.enter(), vec![Effect::Cancel(min)]);
        assert!(machine.fire(min, start + 550 * MS).is_empty());
        assert!(machine.is_shown());
    }
}
