//! Gesture catalogue: descriptor loading and signal routing.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::gesture::{
    Direction, Gesture, PictureTrigger, ResetRule, SignalRef, SignalSelector, Step,
};
use crate::signal::SignalBatch;

/// Why a gesture descriptor could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid gesture descriptor {}: {}", .path.display(), .reason)]
    Invalid { path: PathBuf, reason: &'static str },
}

/// On-disk gesture descriptor, one JSON object per file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GestureSpec {
    #[serde(rename = "gestureId")]
    pub gesture_id: String,
    pub label: String,
    /// Challenge time budget in milliseconds.
    pub total_recommended_max_time: f64,
    pub take_picture_at_the_end: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_index: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub randomize_step_picture: bool,
    pub instructions: Vec<InstructionSpec>,
}

/// One instruction within a descriptor. Threshold and range fields are both
/// optional at the serde level; `instruction_type` selects which set applies
/// and defaults to `threshold` so older descriptors keep loading.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InstructionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_to_next_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<ResetSpec>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub take_picture_at_the_end: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ResetSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: f64,
}

/// Summary of a loaded descriptor, consumed by the challenge sequencer.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedGesture {
    pub gesture_id: String,
    pub label: String,
    pub icon_path: Option<PathBuf>,
    pub budget: Duration,
    pub take_picture_at_end: bool,
}

impl GestureSpec {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let raw = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_owned(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| LoadError::Json {
            path: path.to_owned(),
            source,
        })
    }

    pub fn budget(&self) -> Duration {
        Duration::from_secs_f64(self.total_recommended_max_time.max(0.0) / 1000.0)
    }

    pub fn summary(&self) -> LoadedGesture {
        LoadedGesture {
            gesture_id: self.gesture_id.clone(),
            label: self.label.clone(),
            icon_path: self.icon_path.clone(),
            budget: self.budget(),
            take_picture_at_end: self.take_picture_at_the_end,
        }
    }

    /// Builds the runtime state machine described by this descriptor.
    pub fn build(&self) -> Result<Gesture, &'static str> {
        let selector = match (self.signal_index, self.signal_key.as_ref()) {
            (Some(index), None) => SignalSelector::Index(index),
            (None, Some(key)) => SignalSelector::Key(key.clone()),
            _ => return Err("exactly one of signal_index and signal_key must be set"),
        };
        let mut steps = Vec::with_capacity(self.instructions.len());
        for instruction in &self.instructions {
            if let Some(step) = instruction.build()? {
                steps.push(step);
            }
        }
        if steps.is_empty() {
            return Err("no usable instructions");
        }
        let mut gesture = Gesture::new(
            self.gesture_id.clone(),
            self.label.clone(),
            self.budget(),
            selector,
            steps,
        );
        if self.take_picture_at_the_end {
            gesture = gesture.with_end_picture();
        }
        if self.randomize_step_picture {
            gesture = gesture.with_randomized_step_picture();
        }
        Ok(gesture)
    }
}

impl InstructionSpec {
    /// Converts one instruction, or `Ok(None)` when the instruction must be
    /// skipped (unknown reset type).
    fn build(&self) -> Result<Option<Step>, &'static str> {
        let reset = match &self.reset {
            None => None,
            Some(spec) => match spec.kind.as_str() {
                "lower" => Some(ResetRule::Lower(spec.value)),
                "higher" => Some(ResetRule::Higher(spec.value)),
                "timeout_after_ms" => Some(ResetRule::TimeoutAfter(Duration::from_secs_f64(
                    spec.value.max(0.0) / 1000.0,
                ))),
                other => {
                    warn!(kind = other, "skipping instruction with unknown reset type");
                    return Ok(None);
                }
            },
        };

        let mut step = match self.instruction_type.as_deref().unwrap_or("threshold") {
            "threshold" => {
                let direction = match self.move_to_next_type.as_deref() {
                    Some("higher") => Direction::Higher,
                    Some("lower") => Direction::Lower,
                    _ => return Err("threshold instruction needs move_to_next_type"),
                };
                let value = self.value.ok_or("threshold instruction needs value")?;
                Step::threshold(direction, value)
            }
            "range" => {
                let min = self.min_value.ok_or("range instruction needs min_value")?;
                let max = self.max_value.ok_or("range instruction needs max_value")?;
                let hold = self
                    .min_duration_ms
                    .ok_or("range instruction needs min_duration_ms")?;
                Step::range(min, max, Duration::from_millis(hold))
            }
            _ => return Err("unknown instruction type"),
        };
        if let Some(rule) = reset {
            step = step.with_reset(rule);
        }
        if self.take_picture_at_the_end {
            step = step.with_picture();
        }
        Ok(Some(step))
    }
}

/// Labels and picture requests produced by one signal delivery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatch {
    /// Labels of gestures completed by this delivery, in catalogue order.
    pub detected: Vec<String>,
    /// Picture-capture requests emitted while advancing.
    pub pictures: Vec<PictureTrigger>,
}

impl Dispatch {
    fn absorb(&mut self, label: &str, outcome: crate::gesture::UpdateOutcome) {
        self.pictures.extend(outcome.pictures);
        if outcome.completed {
            self.detected.push(label.to_owned());
        }
    }
}

/// Ordered collection of gesture state machines sharing one signal stream.
#[derive(Debug, Default)]
pub struct GestureDetector {
    gestures: Vec<Gesture>,
}

impl GestureDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a gesture; dispatch order is insertion order.
    pub fn add(&mut self, gesture: Gesture) {
        self.gestures.push(gesture);
    }

    /// Parses one descriptor file and appends the resulting gesture.
    pub fn load_file(&mut self, path: &Path) -> Result<LoadedGesture, LoadError> {
        let spec = GestureSpec::load(path)?;
        let gesture = spec.build().map_err(|reason| LoadError::Invalid {
            path: path.to_owned(),
            reason,
        })?;
        self.gestures.push(gesture);
        Ok(spec.summary())
    }

    pub fn len(&self) -> usize {
        self.gestures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gestures.is_empty()
    }

    pub fn gestures(&self) -> &[Gesture] {
        &self.gestures
    }

    pub fn gesture_by_label(&self, label: &str) -> Option<&Gesture> {
        self.gestures.iter().find(|gesture| gesture.label() == label)
    }

    pub fn start_all(&mut self, now: Instant) -> bool {
        for gesture in &mut self.gestures {
            gesture.start(now);
        }
        !self.gestures.is_empty()
    }

    pub fn stop_all(&mut self) -> bool {
        for gesture in &mut self.gestures {
            gesture.stop();
        }
        !self.gestures.is_empty()
    }

    pub fn reset_all(&mut self, now: Instant) -> bool {
        for gesture in &mut self.gestures {
            gesture.reset(now);
        }
        !self.gestures.is_empty()
    }

    pub fn start_by_label(&mut self, label: &str, now: Instant) -> bool {
        self.by_label(label).map(|gesture| gesture.start(now)).is_some()
    }

    pub fn stop_by_label(&mut self, label: &str) -> bool {
        self.by_label(label).map(Gesture::stop).is_some()
    }

    pub fn reset_by_label(&mut self, label: &str, now: Instant) -> bool {
        self.by_label(label).map(|gesture| gesture.reset(now)).is_some()
    }

    pub fn start_by_index(&mut self, index: usize, now: Instant) -> bool {
        self.gestures
            .get_mut(index)
            .map(|gesture| gesture.start(now))
            .is_some()
    }

    pub fn stop_by_index(&mut self, index: usize) -> bool {
        self.gestures.get_mut(index).map(Gesture::stop).is_some()
    }

    pub fn reset_by_index(&mut self, index: usize, now: Instant) -> bool {
        self.gestures
            .get_mut(index)
            .map(|gesture| gesture.reset(now))
            .is_some()
    }

    fn by_label(&mut self, label: &str) -> Option<&mut Gesture> {
        self.gestures
            .iter_mut()
            .find(|gesture| gesture.label() == label)
    }

    /// Routes one observation to every armed gesture subscribed to this slot
    /// number.
    pub fn process_signal(&mut self, value: f64, index: usize, now: Instant) -> Dispatch {
        let mut dispatch = Dispatch::default();
        for gesture in &mut self.gestures {
            let outcome = gesture.update(value, SignalRef::Index(index), now);
            let label = gesture.label().to_owned();
            dispatch.absorb(&label, outcome);
        }
        dispatch
    }

    /// Routes a keyed batch: every armed gesture subscribed by name receives
    /// at most one observation, looked up under its own key.
    pub fn process_signals(&mut self, batch: &SignalBatch) -> Dispatch {
        let mut dispatch = Dispatch::default();
        for gesture in &mut self.gestures {
            let key = match gesture.selector() {
                SignalSelector::Key(key) => key.clone(),
                SignalSelector::Index(_) => continue,
            };
            let Some(&value) = batch.values.get(&key) else {
                continue;
            };
            let outcome = gesture.update(value, SignalRef::Key(&key), batch.at);
            let label = gesture.label().to_owned();
            dispatch.absorb(&label, outcome);
        }
        dispatch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn threshold_gesture(label: &str, index: usize) -> Gesture {
        Gesture::new(
            label.to_lowercase(),
            label,
            Duration::from_secs(5),
            SignalSelector::Index(index),
            vec![
                Step::threshold(Direction::Higher, 10.0),
                Step::threshold(Direction::Lower, 8.0),
            ],
        )
    }

    #[test]
    fn indexed_dispatch_reaches_only_subscribed_gestures() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new();
        detector.add(threshold_gesture("First", 1));
        detector.add(threshold_gesture("Second", 2));
        detector.start_all(t0);

        detector.process_signal(11.0, 1, t0);
        assert_eq!(detector.gestures()[0].current_index(), 1);
        assert_eq!(detector.gestures()[1].current_index(), 0);

        // An unsubscribed slot leaves every gesture unchanged.
        let dispatch = detector.process_signal(11.0, 9, t0);
        assert_eq!(dispatch, Dispatch::default());
        assert_eq!(detector.gestures()[0].current_index(), 1);
        assert_eq!(detector.gestures()[1].current_index(), 0);
    }

    #[test]
    fn completion_reports_the_gesture_label() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new();
        detector.add(threshold_gesture("Blink", 1));
        detector.start_all(t0);

        detector.process_signal(11.0, 1, t0);
        let dispatch = detector.process_signal(7.0, 1, t0 + Duration::from_millis(100));
        assert_eq!(dispatch.detected, ["Blink"]);
    }

    #[test]
    fn keyed_batch_feeds_each_gesture_its_own_key() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new();
        detector.add(Gesture::new(
            "smile",
            "Smile",
            Duration::from_secs(5),
            SignalSelector::Key("mouthSmileRight".to_owned()),
            vec![Step::threshold(Direction::Higher, 0.5)],
        ));
        detector.add(Gesture::new(
            "jaw",
            "Open Mouth",
            Duration::from_secs(5),
            SignalSelector::Key("jawOpen".to_owned()),
            vec![Step::threshold(Direction::Higher, 0.5)],
        ));
        detector.start_all(t0);

        let batch = SignalBatch::new(t0)
            .with_value("mouthSmileRight", 0.9)
            .with_value("jawOpen", 0.1);
        let dispatch = detector.process_signals(&batch);
        assert_eq!(dispatch.detected, ["Smile"]);

        let batch = SignalBatch::new(t0 + Duration::from_millis(50)).with_value("jawOpen", 0.8);
        let dispatch = detector.process_signals(&batch);
        assert_eq!(dispatch.detected, ["Open Mouth"]);
    }

    #[test]
    fn start_stop_reset_by_label_report_matches() {
        let t0 = Instant::now();
        let mut detector = GestureDetector::new();
        detector.add(threshold_gesture("Blink", 1));

        assert!(detector.start_by_label("Blink", t0));
        assert!(detector.gestures()[0].is_working());
        assert!(detector.stop_by_label("Blink"));
        assert!(!detector.gestures()[0].is_working());
        assert!(detector.reset_by_label("Blink", t0));
        assert!(!detector.start_by_label("Missing", t0));
        assert!(!detector.stop_by_index(5));
    }

    const BLINK_DESCRIPTOR: &str = r#"{
        "gestureId": "blink",
        "label": "Blink",
        "total_recommended_max_time": 4000,
        "take_picture_at_the_end": true,
        "signal_key": "eyeBlinkRight",
        "icon_path": "icons/blink.png",
        "instructions": [
            {
                "move_to_next_type": "higher",
                "value": 0.4,
                "reset": { "type": "timeout_after_ms", "value": 3000 }
            },
            {
                "instruction_type": "range",
                "min_value": 0.0,
                "max_value": 0.1,
                "min_duration_ms": 200,
                "take_picture_at_the_end": true
            }
        ]
    }"#;

    #[test]
    fn descriptor_parses_with_defaulted_instruction_type() {
        let spec: GestureSpec = serde_json::from_str(BLINK_DESCRIPTOR).unwrap();
        assert_eq!(spec.gesture_id, "blink");
        assert_eq!(spec.budget(), Duration::from_secs(4));

        let gesture = spec.build().unwrap();
        assert_eq!(gesture.sequence().len(), 2);
        assert_eq!(
            *gesture.sequence()[0].kind(),
            crate::gesture::StepKind::Threshold {
                direction: Direction::Higher,
                value: 0.4
            }
        );
        assert_eq!(
            *gesture.sequence()[1].kind(),
            crate::gesture::StepKind::Range {
                min: 0.0,
                max: 0.1,
                hold: Duration::from_millis(200)
            }
        );
        assert!(gesture.sequence()[1].takes_picture());
        assert!(gesture.takes_picture_at_end());
    }

    #[test]
    fn descriptor_reserializes_to_the_same_content() {
        let spec: GestureSpec = serde_json::from_str(BLINK_DESCRIPTOR).unwrap();
        let reparsed: GestureSpec =
            serde_json::from_str(&serde_json::to_string(&spec).unwrap()).unwrap();

        let original: serde_json::Value = serde_json::from_str(BLINK_DESCRIPTOR).unwrap();
        let round_tripped = serde_json::to_value(&reparsed).unwrap();
        assert_eq!(round_tripped, original);
    }

    #[test]
    fn unknown_reset_type_skips_only_that_instruction() {
        let raw = r#"{
            "gestureId": "nod",
            "label": "Nod",
            "total_recommended_max_time": 4000,
            "take_picture_at_the_end": false,
            "signal_index": 4,
            "instructions": [
                { "move_to_next_type": "higher", "value": 0.2,
                  "reset": { "type": "sideways", "value": 1.0 } },
                { "move_to_next_type": "lower", "value": -0.2 }
            ]
        }"#;
        let spec: GestureSpec = serde_json::from_str(raw).unwrap();
        let gesture = spec.build().unwrap();
        assert_eq!(gesture.sequence().len(), 1);
    }

    #[test]
    fn descriptor_requires_exactly_one_subscription() {
        let raw = r#"{
            "gestureId": "x",
            "label": "X",
            "total_recommended_max_time": 1000,
            "take_picture_at_the_end": false,
            "instructions": [ { "move_to_next_type": "higher", "value": 1.0 } ]
        }"#;
        let spec: GestureSpec = serde_json::from_str(raw).unwrap();
        assert!(spec.build().is_err());
    }

    #[test]
    fn load_file_reports_malformed_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        let mut detector = GestureDetector::new();
        assert!(matches!(
            detector.load_file(&path),
            Err(LoadError::Json { .. })
        ));
        assert!(detector.is_empty());

        let good = dir.path().join("blink.json");
        std::fs::write(&good, BLINK_DESCRIPTOR).unwrap();
        let loaded = detector.load_file(&good).unwrap();
        assert_eq!(loaded.gesture_id, "blink");
        assert_eq!(loaded.icon_path, Some(PathBuf::from("icons/blink.png")));
        assert_eq!(detector.len(), 1);
    }
}
