//! Challenge sequencing and the liveness verdict.
//!
//! A run asks the subject for a randomized series of gestures framed by
//! banner requests: `notAlive` (terminal failure), `starting`
//! (introduction) and `youarealive` (terminal success). Each request has a
//! time budget; a driving gesture that exhausts its budget fails the whole
//! run.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use rand::RngCore;
use tracing::{debug, info};

use crate::detector::{GestureDetector, LoadedGesture};
use crate::translation::Translator;

/// Budget given to the framing banners around the real challenges.
const BANNER_BUDGET: Duration = Duration::from_millis(5000);

/// Overall progress of one verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Processing,
    Done,
    Failure,
}

/// Something the remote client must be told about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientEvent {
    /// Capture the current camera frame.
    TakePicture,
    /// The liveness verdict.
    ReportAlive(bool),
}

/// One element of the challenge plan: a framing banner, or a driving
/// gesture bound to the catalogue.
#[derive(Debug, Clone, PartialEq)]
pub struct ChallengeRequest {
    pub id: String,
    pub label: String,
    pub budget: Duration,
    pub drives_gesture: bool,
    pub take_picture_at_end: bool,
    pub icon: Option<PathBuf>,
}

impl ChallengeRequest {
    fn banner(id: &str, label: &str) -> Self {
        Self {
            id: id.to_owned(),
            label: label.to_owned(),
            budget: BANNER_BUDGET,
            drives_gesture: false,
            take_picture_at_end: false,
            icon: None,
        }
    }
}

/// What the subject should currently read on screen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    pub text: String,
    pub icon: Option<PathBuf>,
}

/// Drives one verification run through its challenge plan.
pub struct ChallengeRunner {
    requests: Vec<ChallengeRequest>,
    current_index: usize,
    current_started_at: Instant,
    start_latch: bool,
    status: RunStatus,
    overwrite_text: String,
    overwrite_log: Vec<String>,
}

impl ChallengeRunner {
    /// Builds the plan: `num_gestures` sampled from `gestures` without
    /// replacement, in catalogue order, wrapped in the framing banners.
    pub fn new(
        gestures: &[LoadedGesture],
        num_gestures: usize,
        rng: &mut (dyn RngCore + Send),
    ) -> Self {
        let mut requests = vec![
            ChallengeRequest::banner("notAlive", "Not Alive"),
            ChallengeRequest::banner("starting", "Starting"),
        ];
        let amount = num_gestures.min(gestures.len());
        let mut picked = rand::seq::index::sample(rng, gestures.len(), amount).into_vec();
        picked.sort_unstable();
        for index in picked {
            let loaded = &gestures[index];
            debug!(id = %loaded.gesture_id, "challenge plan entry");
            requests.push(ChallengeRequest {
                id: loaded.gesture_id.clone(),
                label: loaded.label.clone(),
                budget: loaded.budget,
                drives_gesture: true,
                take_picture_at_end: loaded.take_picture_at_end,
                icon: loaded.icon_path.clone(),
            });
        }
        requests.push(ChallengeRequest::banner("youarealive", "You Are Alive"));

        Self {
            requests,
            current_index: 1,
            current_started_at: Instant::now(),
            start_latch: true,
            status: RunStatus::Idle,
            overwrite_text: String::new(),
            overwrite_log: Vec::new(),
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn requests(&self) -> &[ChallengeRequest] {
        &self.requests
    }

    pub fn current_request(&self) -> &ChallengeRequest {
        &self.requests[self.current_index]
    }

    /// Every text ever pushed through [`Self::set_overwrite_text`].
    pub fn overwrite_log(&self) -> &[String] {
        &self.overwrite_log
    }

    /// Replaces the prompt text with an externally driven message. An empty
    /// text restores the plan's own prompt.
    pub fn set_overwrite_text(&mut self, text: impl Into<String>, failure: bool) {
        let text = text.into();
        self.overwrite_log.push(text.clone());
        self.overwrite_text = text;
        if failure {
            self.status = RunStatus::Failure;
        }
    }

    /// The catalogue detected a completed gesture. Advances the plan when
    /// the label matches the current driving request.
    pub fn on_gesture_detected(
        &mut self,
        label: &str,
        now: Instant,
        detector: &mut GestureDetector,
    ) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        let current = &self.requests[self.current_index];
        if self.current_index > 0 && current.drives_gesture && current.label == label {
            info!(label, "gesture detected");
            self.advance(now, detector, &mut events);
        }
        events
    }

    /// Per-frame budget bookkeeping. Must run on every image request.
    pub fn tick(&mut self, now: Instant, detector: &mut GestureDetector) -> Vec<ClientEvent> {
        let mut events = Vec::new();
        if self.start_latch {
            self.current_started_at = now;
            self.start_latch = false;
            if self.status == RunStatus::Idle {
                self.status = RunStatus::Processing;
            }
        }
        if self.current_index == 0 || self.status == RunStatus::Done {
            return events;
        }
        let request = &self.requests[self.current_index];
        if now.duration_since(self.current_started_at) >= request.budget {
            if request.drives_gesture {
                info!(id = %request.id, "challenge budget exhausted");
                self.current_index = 0;
                self.status = RunStatus::Failure;
                events.push(ClientEvent::ReportAlive(false));
            } else {
                self.advance(now, detector, &mut events);
            }
        }
        events
    }

    fn advance(&mut self, now: Instant, detector: &mut GestureDetector, events: &mut Vec<ClientEvent>) {
        if self.current_index == 0 {
            return;
        }
        let current = &self.requests[self.current_index];
        if current.take_picture_at_end {
            events.push(ClientEvent::TakePicture);
        }
        // The verdict goes out before the index moves, while the overlay
        // still reads the completed challenge.
        if self.current_index + 2 == self.requests.len() {
            events.push(ClientEvent::ReportAlive(true));
        }
        if self.current_index + 1 < self.requests.len() {
            self.current_index += 1;
            self.current_started_at = now;
            let next = &self.requests[self.current_index];
            if next.drives_gesture {
                detector.start_by_label(&next.label, now);
            }
        } else {
            self.status = RunStatus::Done;
        }
    }

    /// Current overlay content. The overwrite text wins when set; the icon
    /// always follows the plan.
    pub fn prompt(&self, translator: &Translator) -> Prompt {
        let request = &self.requests[self.current_index];
        let mut prompt = Prompt {
            text: translator.translate(&format!("gestures.{}.label", request.id)),
            icon: request.icon.clone(),
        };
        if !self.overwrite_text.is_empty() {
            prompt.text = self.overwrite_text.clone();
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng as _;

    use crate::gesture::{Direction, Gesture, SignalSelector, Step};

    fn loaded(id: &str, label: &str, budget_ms: u64) -> LoadedGesture {
        LoadedGesture {
            gesture_id: id.to_owned(),
            label: label.to_owned(),
            icon_path: None,
            budget: Duration::from_millis(budget_ms),
            take_picture_at_end: false,
        }
    }

    fn detector_with(label: &str) -> GestureDetector {
        let mut detector = GestureDetector::new();
        detector.add(Gesture::new(
            label.to_lowercase(),
            label,
            Duration::from_secs(3),
            SignalSelector::Index(1),
            vec![Step::threshold(Direction::Higher, 10.0)],
        ));
        detector
    }

    fn runner_with_one_gesture() -> (ChallengeRunner, GestureDetector) {
        let gestures = [loaded("turn", "Turn Left", 3000)];
        let mut rng = StdRng::seed_from_u64(7);
        let runner = ChallengeRunner::new(&gestures, 1, &mut rng);
        (runner, detector_with("Turn Left"))
    }

    #[test]
    fn plan_is_framed_by_banners() {
        let gestures = [
            loaded("a", "A", 1000),
            loaded("b", "B", 1000),
            loaded("c", "C", 1000),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let runner = ChallengeRunner::new(&gestures, 2, &mut rng);

        let requests = runner.requests();
        assert_eq!(requests.len(), 4);
        assert_eq!(requests[0].id, "notAlive");
        assert_eq!(requests[1].id, "starting");
        assert!(requests[2].drives_gesture);
        assert_eq!(requests[3].id, "youarealive");
        assert_eq!(runner.current_index(), 1);
        assert_eq!(runner.status(), RunStatus::Idle);
    }

    #[test]
    fn sampling_is_without_replacement() {
        let gestures = [
            loaded("a", "A", 1000),
            loaded("b", "B", 1000),
            loaded("c", "C", 1000),
        ];
        for seed in 0..32 {
            let mut rng = StdRng::seed_from_u64(seed);
            let runner = ChallengeRunner::new(&gestures, 3, &mut rng);
            let mut ids: Vec<_> = runner
                .requests()
                .iter()
                .filter(|request| request.drives_gesture)
                .map(|request| request.id.clone())
                .collect();
            ids.sort();
            assert_eq!(ids, ["a", "b", "c"], "seed {seed}");
        }
    }

    #[test]
    fn budget_exhaustion_fails_the_run() {
        let (mut runner, mut detector) = runner_with_one_gesture();
        let t0 = Instant::now();

        // First tick latches the start time and moves to Processing.
        assert!(runner.tick(t0, &mut detector).is_empty());
        assert_eq!(runner.status(), RunStatus::Processing);

        // `starting` elapses after 5 s and auto-advances to the gesture.
        let t1 = t0 + Duration::from_millis(5001);
        assert!(runner.tick(t1, &mut detector).is_empty());
        assert_eq!(runner.current_index(), 2);
        assert!(detector.gestures()[0].is_working());

        // The gesture budget (3 s) elapses without a detection.
        let t2 = t1 + Duration::from_millis(3001);
        let events = runner.tick(t2, &mut detector);
        assert_eq!(events, [ClientEvent::ReportAlive(false)]);
        assert_eq!(runner.current_index(), 0);
        assert_eq!(runner.status(), RunStatus::Failure);

        // The failure frame has no budget of its own.
        let t3 = t2 + Duration::from_secs(60);
        assert!(runner.tick(t3, &mut detector).is_empty());
        assert_eq!(runner.current_index(), 0);
    }

    #[test]
    fn detection_completes_the_run() {
        let (mut runner, mut detector) = runner_with_one_gesture();
        let t0 = Instant::now();

        runner.tick(t0, &mut detector);
        let t1 = t0 + Duration::from_millis(5001);
        runner.tick(t1, &mut detector);
        assert_eq!(runner.current_index(), 2);

        // Detection inside the budget reports alive and moves to the
        // success banner.
        let t2 = t1 + Duration::from_millis(2500);
        let events = runner.on_gesture_detected("Turn Left", t2, &mut detector);
        assert_eq!(events, [ClientEvent::ReportAlive(true)]);
        assert_eq!(runner.current_index(), 3);
        assert_eq!(runner.status(), RunStatus::Processing);

        // Once the success banner elapses the run is done for good.
        let t3 = t2 + Duration::from_millis(5001);
        assert!(runner.tick(t3, &mut detector).is_empty());
        assert_eq!(runner.status(), RunStatus::Done);
        assert_eq!(runner.current_index(), 3);
        let t4 = t3 + Duration::from_secs(60);
        assert!(runner.tick(t4, &mut detector).is_empty());
        assert_eq!(runner.status(), RunStatus::Done);
    }

    #[test]
    fn detection_with_wrong_label_is_ignored() {
        let (mut runner, mut detector) = runner_with_one_gesture();
        let t0 = Instant::now();
        runner.tick(t0, &mut detector);
        let t1 = t0 + Duration::from_millis(5001);
        runner.tick(t1, &mut detector);

        let events = runner.on_gesture_detected("Smile", t1, &mut detector);
        assert!(events.is_empty());
        assert_eq!(runner.current_index(), 2);
    }

    #[test]
    fn departing_request_can_ask_for_a_picture() {
        let gestures = [LoadedGesture {
            gesture_id: "turn".to_owned(),
            label: "Turn Left".to_owned(),
            icon_path: None,
            budget: Duration::from_millis(3000),
            take_picture_at_end: true,
        }];
        let mut rng = StdRng::seed_from_u64(7);
        let mut runner = ChallengeRunner::new(&gestures, 1, &mut rng);
        let mut detector = detector_with("Turn Left");

        let t0 = Instant::now();
        runner.tick(t0, &mut detector);
        let t1 = t0 + Duration::from_millis(5001);
        runner.tick(t1, &mut detector);

        let events = runner.on_gesture_detected("Turn Left", t1, &mut detector);
        assert_eq!(
            events,
            [ClientEvent::TakePicture, ClientEvent::ReportAlive(true)]
        );
    }

    #[test]
    fn overwrite_text_wins_over_the_plan_prompt() {
        let (mut runner, mut detector) = runner_with_one_gesture();
        let translator = Translator::identity();
        let t0 = Instant::now();
        runner.tick(t0, &mut detector);

        assert_eq!(runner.prompt(&translator).text, "gestures.starting.label");

        runner.set_overwrite_text("hold still", false);
        assert_eq!(runner.prompt(&translator).text, "hold still");
        assert_eq!(runner.status(), RunStatus::Processing);
        assert_eq!(runner.overwrite_log(), ["hold still"]);

        runner.set_overwrite_text("verification failed", true);
        assert_eq!(runner.status(), RunStatus::Failure);

        runner.set_overwrite_text("", false);
        assert_eq!(runner.prompt(&translator).text, "gestures.starting.label");
    }
}
