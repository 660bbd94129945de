//! Per-gesture state machines.
//!
//! A gesture is an ordered sequence of steps recognized from one signal
//! stream. Threshold steps complete on a strict crossing; range steps
//! complete after the signal has held inside a band for a minimum duration.
//! Steps may carry a reset rule that rolls progress back to the first step.

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng as _, RngCore, SeedableRng as _};

/// Where a gesture listens for its observations. Exactly one addressing
/// scheme per gesture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalSelector {
    /// Fixed slot number assigned by the face extractor.
    Index(usize),
    /// Named scalar, e.g. a blendshape name.
    Key(String),
}

/// Address of one observation routed through the catalogue.
#[derive(Debug, Clone, Copy)]
pub enum SignalRef<'a> {
    Index(usize),
    Key(&'a str),
}

impl SignalSelector {
    fn matches(&self, signal: SignalRef<'_>) -> bool {
        match (self, signal) {
            (Self::Index(own), SignalRef::Index(seen)) => *own == seen,
            (Self::Key(own), SignalRef::Key(seen)) => own == seen,
            _ => false,
        }
    }
}

/// Which way a threshold step must be crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Higher,
    Lower,
}

/// Rolls gesture progress back to the first step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ResetRule {
    /// Fires when the live value drops below this threshold.
    Lower(f64),
    /// Fires when the live value rises above this threshold.
    Higher(f64),
    /// Fires once the gesture has been in progress for longer than this,
    /// counted from the completion of the first step.
    TimeoutAfter(Duration),
}

/// The check a single step performs on the subscribed signal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepKind {
    /// Completes the first time the value strictly crosses the threshold.
    Threshold { direction: Direction, value: f64 },
    /// Completes once the value has stayed inside `[min, max]` (inclusive)
    /// for at least `hold`. Leaving the band restarts the clock.
    Range { min: f64, max: f64, hold: Duration },
}

/// The atomic progress unit within a gesture.
#[derive(Debug, Clone)]
pub struct Step {
    kind: StepKind,
    reset: Option<ResetRule>,
    take_picture_at_end: bool,
    entered_band_at: Option<Instant>,
}

impl Step {
    pub fn threshold(direction: Direction, value: f64) -> Self {
        Self {
            kind: StepKind::Threshold { direction, value },
            reset: None,
            take_picture_at_end: false,
            entered_band_at: None,
        }
    }

    pub fn range(min: f64, max: f64, hold: Duration) -> Self {
        Self {
            kind: StepKind::Range { min, max, hold },
            reset: None,
            take_picture_at_end: false,
            entered_band_at: None,
        }
    }

    #[must_use]
    pub fn with_reset(mut self, rule: ResetRule) -> Self {
        self.reset = Some(rule);
        self
    }

    #[must_use]
    pub fn with_picture(mut self) -> Self {
        self.take_picture_at_end = true;
        self
    }

    pub fn kind(&self) -> &StepKind {
        &self.kind
    }

    pub fn takes_picture(&self) -> bool {
        self.take_picture_at_end
    }
}

/// A request to capture the current camera frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PictureTrigger {
    /// The step at this index completed.
    Step(usize),
    /// The whole gesture completed.
    GestureEnd,
}

/// What a single observation did to the gesture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// This observation completed the gesture's last step.
    pub completed: bool,
    /// Picture-capture requests emitted by this observation.
    pub pictures: Vec<PictureTrigger>,
}

/// An ordered sequence of steps recognized from one signal stream.
pub struct Gesture {
    id: String,
    label: String,
    budget: Duration,
    selector: SignalSelector,
    sequence: Vec<Step>,
    take_picture_at_end: bool,
    randomize_step_picture: bool,
    working: bool,
    current_index: usize,
    start_time: Instant,
    chosen_picture_step: Option<usize>,
    rng: Box<dyn RngCore + Send>,
}

impl Gesture {
    /// Creates an idle gesture. `sequence` must not be empty.
    pub fn new(
        id: impl Into<String>,
        label: impl Into<String>,
        budget: Duration,
        selector: SignalSelector,
        sequence: Vec<Step>,
    ) -> Self {
        assert!(!sequence.is_empty(), "gesture needs at least one step");
        Self {
            id: id.into(),
            label: label.into(),
            budget,
            selector,
            sequence,
            take_picture_at_end: false,
            randomize_step_picture: false,
            working: false,
            current_index: 0,
            start_time: Instant::now(),
            chosen_picture_step: None,
            rng: Box::new(StdRng::from_entropy()),
        }
    }

    /// Requests a picture when the last step completes the gesture.
    #[must_use]
    pub fn with_end_picture(mut self) -> Self {
        self.take_picture_at_end = true;
        self
    }

    /// Restricts per-step pictures to one step, chosen uniformly among the
    /// flagged steps at every start/reset.
    #[must_use]
    pub fn with_randomized_step_picture(mut self) -> Self {
        self.randomize_step_picture = true;
        self.select_picture_step();
        self
    }

    /// Replaces the picture-selection RNG; used by tests to make the random
    /// step choice deterministic.
    #[must_use]
    pub fn with_rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
        self.rng = rng;
        self.select_picture_step();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn selector(&self) -> &SignalSelector {
        &self.selector
    }

    pub fn sequence(&self) -> &[Step] {
        &self.sequence
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn start_time(&self) -> Instant {
        self.start_time
    }

    pub fn is_working(&self) -> bool {
        self.working
    }

    pub fn takes_picture_at_end(&self) -> bool {
        self.take_picture_at_end
    }

    /// Arms the gesture and clears any previous progress.
    pub fn start(&mut self, now: Instant) {
        self.reset(now);
        self.working = true;
    }

    /// Disarms the gesture; subsequent observations are ignored.
    pub fn stop(&mut self) {
        self.working = false;
    }

    /// Rolls progress back to the first step without changing the armed
    /// state. Range timers are cleared and the picture step is re-chosen.
    pub fn reset(&mut self, now: Instant) {
        self.current_index = 0;
        self.start_time = now;
        for step in &mut self.sequence {
            step.entered_band_at = None;
        }
        self.select_picture_step();
    }

    /// Feeds one observation. Observations not addressed to this gesture
    /// leave it untouched.
    pub fn update(&mut self, value: f64, signal: SignalRef<'_>, now: Instant) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();
        if !self.working
            || self.current_index >= self.sequence.len()
            || !self.selector.matches(signal)
        {
            return outcome;
        }

        let index = self.current_index;
        if self.check_step(index, value, now) {
            let step_wants_picture = if self.randomize_step_picture {
                self.chosen_picture_step == Some(index)
            } else {
                self.sequence[index].take_picture_at_end
            };
            if step_wants_picture {
                outcome.pictures.push(PictureTrigger::Step(index));
            }
            self.sequence[index].entered_band_at = None;
            if index == 0 {
                self.start_time = now;
            }
            self.current_index += 1;
            if self.current_index == self.sequence.len() {
                if self.take_picture_at_end {
                    outcome.pictures.push(PictureTrigger::GestureEnd);
                }
                outcome.completed = true;
            }
        } else if self.should_reset(value, now) {
            self.reset(now);
        }
        outcome
    }

    fn check_step(&mut self, index: usize, value: f64, now: Instant) -> bool {
        let step = &mut self.sequence[index];
        match step.kind {
            StepKind::Threshold {
                direction,
                value: threshold,
            } => match direction {
                Direction::Higher => value > threshold,
                Direction::Lower => value < threshold,
            },
            StepKind::Range { min, max, hold } => {
                if value >= min && value <= max {
                    match step.entered_band_at {
                        None => {
                            step.entered_band_at = Some(now);
                            false
                        }
                        Some(entered) => {
                            if now.duration_since(entered) >= hold {
                                step.entered_band_at = None;
                                true
                            } else {
                                false
                            }
                        }
                    }
                } else {
                    step.entered_band_at = None;
                    false
                }
            }
        }
    }

    fn should_reset(&self, value: f64, now: Instant) -> bool {
        let Some(rule) = self.sequence[self.current_index].reset else {
            return false;
        };
        match rule {
            ResetRule::Lower(threshold) => value < threshold,
            ResetRule::Higher(threshold) => value > threshold,
            ResetRule::TimeoutAfter(limit) => now.duration_since(self.start_time) > limit,
        }
    }

    fn select_picture_step(&mut self) {
        self.chosen_picture_step = None;
        if !self.randomize_step_picture {
            return;
        }
        let candidates: Vec<usize> = self
            .sequence
            .iter()
            .enumerate()
            .filter(|(_, step)| step.take_picture_at_end)
            .map(|(index, _)| index)
            .collect();
        if !candidates.is_empty() {
            let pick = self.rng.gen_range(0..candidates.len());
            self.chosen_picture_step = Some(candidates[pick]);
        }
    }
}

impl std::fmt::Debug for Gesture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gesture")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("selector", &self.selector)
            .field("working", &self.working)
            .field("current_index", &self.current_index)
            .finish_non_exhaustive()
    }
}
