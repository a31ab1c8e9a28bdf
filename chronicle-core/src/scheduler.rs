//! Periodic maintenance scheduler.
//!
//! Three activities — decay, propagation, analysis — each cycle through
//! `Idle → Due → Running → Idle`. An activity becomes due when its
//! interval has elapsed since its last completed run; within one engine
//! tick the activities always execute in that fixed order, so propagation
//! and analysis see post-decay aggregates.
//!
//! The `Running` state is a reentrancy guard: an activity never starts
//! while an earlier run of the same activity is still on the stack (which
//! can happen if a notification listener calls back into the engine).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::SchedulerConfig;
use crate::types::GameTime;

/// The maintenance activities, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activity {
    /// Aggregate decay sweep over all subjects.
    Decay,
    /// Propagation selection sweep over public records.
    Propagation,
    /// Higher-level analysis (narrative tone scoring).
    Analysis,
}

impl Activity {
    /// All activities in execution order.
    pub const ORDER: [Self; 3] = [Self::Decay, Self::Propagation, Self::Analysis];

    /// Display label for logs.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Decay => "decay",
            Self::Propagation => "propagation",
            Self::Analysis => "analysis",
        }
    }
}

/// Lifecycle state of one activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    /// Waiting for its interval to elapse.
    Idle,
    /// Interval elapsed; will run on the next tick.
    Due,
    /// Currently executing.
    Running,
}

#[derive(Debug, Clone)]
struct ActivitySlot {
    state: ActivityState,
    interval_secs: u64,
    last_run: Option<GameTime>,
}

/// Tracks due-ness and run state for all maintenance activities.
#[derive(Debug, Clone)]
pub struct Scheduler {
    slots: BTreeMap<Activity, ActivitySlot>,
}

impl Scheduler {
    /// Create a scheduler from configured intervals. No activity is due
    /// until one full interval after construction (or after restore).
    #[must_use]
    pub fn new(config: &SchedulerConfig) -> Self {
        let mut slots = BTreeMap::new();
        slots.insert(
            Activity::Decay,
            ActivitySlot {
                state: ActivityState::Idle,
                interval_secs: config.decay_interval_secs,
                last_run: None,
            },
        );
        slots.insert(
            Activity::Propagation,
            ActivitySlot {
                state: ActivityState::Idle,
                interval_secs: config.propagation_interval_secs,
                last_run: None,
            },
        );
        slots.insert(
            Activity::Analysis,
            ActivitySlot {
                state: ActivityState::Idle,
                interval_secs: config.analysis_interval_secs,
                last_run: None,
            },
        );
        Self { slots }
    }

    /// Mark overdue activities `Due` and return them in execution order.
    /// Activities still `Running` are left alone.
    pub fn poll(&mut self, now: &GameTime) -> Vec<Activity> {
        let mut due = Vec::new();
        for activity in Activity::ORDER {
            let Some(slot) = self.slots.get_mut(&activity) else {
                continue;
            };
            match slot.state {
                ActivityState::Running => {}
                ActivityState::Due => due.push(activity),
                ActivityState::Idle => {
                    let elapsed = slot
                        .last_run
                        .map_or(f64::INFINITY, |last| now.seconds_since(&last));
                    if elapsed >= slot.interval_secs as f64 {
                        slot.state = ActivityState::Due;
                        due.push(activity);
                    }
                }
            }
        }
        due
    }

    /// Transition `Due → Running`. Returns `false` (and changes nothing)
    /// unless the activity was due — in particular while it is already
    /// running.
    pub fn begin(&mut self, activity: Activity) -> bool {
        match self.slots.get_mut(&activity) {
            Some(slot) if slot.state == ActivityState::Due => {
                slot.state = ActivityState::Running;
                true
            }
            _ => false,
        }
    }

    /// Transition back to `Idle`, recording the completion time. Called on
    /// success *and* failure so no activity can get stuck in `Running`.
    pub fn complete(&mut self, activity: Activity, now: GameTime) {
        if let Some(slot) = self.slots.get_mut(&activity) {
            slot.state = ActivityState::Idle;
            slot.last_run = Some(now);
        }
    }

    /// Current state of one activity.
    #[must_use]
    pub fn state(&self, activity: Activity) -> ActivityState {
        self.slots
            .get(&activity)
            .map_or(ActivityState::Idle, |slot| slot.state)
    }

    /// Last completed run of one activity.
    #[must_use]
    pub fn last_run(&self, activity: Activity) -> Option<GameTime> {
        self.slots.get(&activity).and_then(|slot| slot.last_run)
    }

    /// Export `(activity, last_run)` pairs for snapshots.
    #[must_use]
    pub fn export(&self) -> Vec<(Activity, Option<GameTime>)> {
        self.slots
            .iter()
            .map(|(activity, slot)| (*activity, slot.last_run))
            .collect()
    }

    /// Restore `last_run` stamps from a snapshot.
    pub fn restore(&mut self, exported: &[(Activity, Option<GameTime>)]) {
        for (activity, last_run) in exported {
            if let Some(slot) = self.slots.get_mut(activity) {
                slot.last_run = *last_run;
                slot.state = ActivityState::Idle;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(tick: u64) -> GameTime {
        GameTime::now(tick)
    }

    fn config() -> SchedulerConfig {
        SchedulerConfig {
            decay_interval_secs: 600,
            propagation_interval_secs: 120,
            analysis_interval_secs: 900,
        }
    }

    #[test]
    fn everything_due_on_first_poll() {
        let mut scheduler = Scheduler::new(&config());
        let due = scheduler.poll(&ts(0));
        assert_eq!(
            due,
            vec![Activity::Decay, Activity::Propagation, Activity::Analysis]
        );
    }

    #[test]
    fn due_follows_interval() {
        let mut scheduler = Scheduler::new(&config());
        for activity in Activity::ORDER {
            scheduler.poll(&ts(0));
            assert!(scheduler.begin(activity));
            scheduler.complete(activity, ts(0));
        }

        // 60s later: nothing is due yet.
        assert!(scheduler.poll(&ts(60)).is_empty());

        // 120s later: only propagation.
        assert_eq!(scheduler.poll(&ts(120)), vec![Activity::Propagation]);

        // 900s later: everything, in fixed order.
        scheduler.begin(Activity::Propagation);
        scheduler.complete(Activity::Propagation, ts(120));
        assert_eq!(
            scheduler.poll(&ts(900)),
            vec![Activity::Decay, Activity::Propagation, Activity::Analysis]
        );
    }

    #[test]
    fn begin_guards_against_reentry() {
        let mut scheduler = Scheduler::new(&config());
        scheduler.poll(&ts(0));
        assert!(scheduler.begin(Activity::Decay));
        assert_eq!(scheduler.state(Activity::Decay), ActivityState::Running);

        // A nested attempt is refused while the first run is live.
        assert!(!scheduler.begin(Activity::Decay));
        assert!(!scheduler.poll(&ts(10_000)).contains(&Activity::Decay));

        scheduler.complete(Activity::Decay, ts(0));
        assert_eq!(scheduler.state(Activity::Decay), ActivityState::Idle);
    }

    #[test]
    fn complete_always_returns_to_idle() {
        let mut scheduler = Scheduler::new(&config());
        scheduler.poll(&ts(0));
        scheduler.begin(Activity::Analysis);
        // The pass failed; completion still lands back in Idle with a stamp.
        scheduler.complete(Activity::Analysis, ts(5));
        assert_eq!(scheduler.state(Activity::Analysis), ActivityState::Idle);
        assert_eq!(
            scheduler.last_run(Activity::Analysis).map(|t| t.tick),
            Some(5)
        );
    }

    #[test]
    fn export_restore_round_trip() {
        let mut scheduler = Scheduler::new(&config());
        scheduler.poll(&ts(0));
        scheduler.begin(Activity::Decay);
        scheduler.complete(Activity::Decay, ts(50));

        let exported = scheduler.export();
        let mut restored = Scheduler::new(&config());
        restored.restore(&exported);
        assert_eq!(
            restored.last_run(Activity::Decay).map(|t| t.tick),
            Some(50)
        );
        // 600s after the restored stamp, decay is due again.
        assert!(restored.poll(&ts(650)).contains(&Activity::Decay));
    }
}
