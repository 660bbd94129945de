//! Session socket server.
//!
//! One liveness session spans one accept/disconnect cycle: the per-session
//! object graph (catalogue, challenge runner, event accumulator) is built
//! when a client connects and dropped when it goes away. The server handles
//! a single client at a time.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng as _;
use serde::Deserialize;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use crate::challenge::{ChallengeRunner, ClientEvent};
use crate::detector::{Dispatch, GestureDetector, GestureSpec, LoadedGesture};
use crate::face::FaceExtractor;
use crate::guidance::{self, FaceBox, FaceGeometry};
use crate::overlay::{Overlay, OverlayRenderer, ShowFace};
use crate::protocol::{self, Frame, ProtocolError, Request};
use crate::signal::{signal_bus, SignalReceiver, SignalSender};
use crate::translation::Translator;

/// Client-visible events accumulated between image replies. Serialized as
/// `{"takeAPicture":true,"reportAlive":bool}` and cleared on every send.
#[derive(Debug, Default)]
struct EventAccumulator {
    take_picture: bool,
    report_alive: Option<bool>,
}

impl EventAccumulator {
    fn push(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::TakePicture => self.take_picture = true,
            ClientEvent::ReportAlive(alive) => self.report_alive = Some(alive),
        }
    }

    fn drain_json(&mut self) -> Option<String> {
        let mut object = serde_json::Map::new();
        if self.take_picture {
            object.insert("takeAPicture".to_owned(), serde_json::Value::Bool(true));
        }
        if let Some(alive) = self.report_alive {
            object.insert("reportAlive".to_owned(), serde_json::Value::Bool(alive));
        }
        self.take_picture = false;
        self.report_alive = None;
        (!object.is_empty()).then(|| serde_json::Value::Object(object).to_string())
    }
}

/// Out-of-band command carried by a `0x02` request.
#[derive(Debug, Deserialize)]
struct ConfigCommand {
    action: String,
    variable: String,
    #[serde(default)]
    value: String,
}

/// Everything needed to spin up the object graph of a new session.
pub struct SessionBlueprint {
    /// Validated gesture descriptors; each session gets fresh state
    /// machines built from them.
    pub gestures: Vec<GestureSpec>,
    /// How many gestures one verification run challenges the subject with.
    pub num_gestures: usize,
    pub geometry: FaceGeometry,
    pub show_face: ShowFace,
}

impl SessionBlueprint {
    fn build_session(&self, translator: Arc<Translator>) -> Session {
        let mut detector = GestureDetector::new();
        let mut loaded: Vec<LoadedGesture> = Vec::with_capacity(self.gestures.len());
        for spec in &self.gestures {
            match spec.build() {
                Ok(gesture) => {
                    detector.add(gesture);
                    loaded.push(spec.summary());
                }
                Err(reason) => {
                    warn!(id = %spec.gesture_id, reason, "skipping gesture descriptor")
                }
            }
        }
        let mut rng = StdRng::from_entropy();
        let runner = ChallengeRunner::new(&loaded, self.num_gestures, &mut rng);
        let (signal_tx, signal_rx) = signal_bus();
        Session {
            detector,
            runner,
            translator,
            geometry: self.geometry,
            show_face: self.show_face,
            events: EventAccumulator::default(),
            face_box: None,
            warning_message: None,
            signal_tx,
            signal_rx,
        }
    }
}

/// State of one accept/disconnect cycle.
struct Session {
    detector: GestureDetector,
    runner: ChallengeRunner,
    translator: Arc<Translator>,
    geometry: FaceGeometry,
    show_face: ShowFace,
    events: EventAccumulator,
    face_box: Option<FaceBox>,
    warning_message: Option<String>,
    signal_tx: SignalSender,
    signal_rx: SignalReceiver,
}

impl Session {
    /// The per-frame pipeline: extractor, signal drain, budget tick,
    /// overlay. Returns the annotated frame and the accumulated event JSON.
    fn handle_frame(
        &mut self,
        frame: &Frame,
        extractor: &mut dyn FaceExtractor,
        renderer: &mut dyn OverlayRenderer,
        now: Instant,
    ) -> (Frame, Option<String>) {
        extractor.process_frame(frame, &self.signal_tx);

        // Apply whatever the extractor has delivered so far, in order.
        while let Ok(batch) = self.signal_rx.try_recv() {
            if guidance::face_reported(&batch.values) {
                self.face_box = FaceBox::from_signals(&batch.values);
            }
            for &(index, value) in &batch.indexed {
                let dispatch = self.detector.process_signal(value, index, batch.at);
                self.apply_dispatch(dispatch, batch.at);
            }
            let dispatch = self.detector.process_signals(&batch);
            self.apply_dispatch(dispatch, batch.at);
        }

        for event in self.runner.tick(now, &mut self.detector) {
            self.events.push(event);
        }

        let prompt = self.runner.prompt(&self.translator);
        let warning = self.warning_message.clone().or_else(|| {
            self.geometry
                .check(self.face_box.as_ref())
                .map(|key| self.translator.translate(key))
        });
        let overlay = Overlay {
            text: prompt.text,
            icon: prompt.icon,
            warning,
            face_box: self.face_box,
            show_face: self.show_face,
        };
        let annotated = renderer.render(frame.clone(), &overlay);
        (annotated, self.events.drain_json())
    }

    fn apply_dispatch(&mut self, dispatch: Dispatch, now: Instant) {
        for _ in &dispatch.pictures {
            self.events.push(ClientEvent::TakePicture);
        }
        for label in dispatch.detected {
            for event in self
                .runner
                .on_gesture_detected(&label, now, &mut self.detector)
            {
                self.events.push(event);
            }
        }
    }

    /// `{"action":"set","variable":...,"value":...}`; anything else is
    /// logged and ignored.
    fn handle_data(&mut self, payload: &str) {
        let command: ConfigCommand = match serde_json::from_str(payload) {
            Ok(command) => command,
            Err(err) => {
                warn!(%err, "ignoring malformed config message");
                return;
            }
        };
        if command.action != "set" {
            debug!(action = %command.action, "ignoring unknown config action");
            return;
        }
        match command.variable.as_str() {
            "warning_message" => {
                self.warning_message = (!command.value.is_empty()).then(|| command.value);
            }
            "overwrite_text" => self.runner.set_overwrite_text(command.value, false),
            other => debug!(variable = other, "ignoring unknown config variable"),
        }
    }
}

/// Accepts one client at a time and owns the collaborator seams.
pub struct Server {
    socket_path: PathBuf,
    blueprint: SessionBlueprint,
    translator: Arc<Translator>,
    extractor: Box<dyn FaceExtractor>,
    renderer: Box<dyn OverlayRenderer>,
}

impl Server {
    pub fn new(
        socket_path: PathBuf,
        blueprint: SessionBlueprint,
        translator: Translator,
        extractor: Box<dyn FaceExtractor>,
        renderer: Box<dyn OverlayRenderer>,
    ) -> Self {
        Self {
            socket_path,
            blueprint,
            translator: Arc::new(translator),
            extractor,
            renderer,
        }
    }

    /// Binds the socket and serves clients until the task is dropped.
    pub async fn run(mut self) -> std::io::Result<()> {
        // A stale socket file from a previous run would fail the bind.
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err),
        }
        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "listening for connections");

        loop {
            let (stream, _addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(%err, "accept failed");
                    continue;
                }
            };
            info!("client connected");
            let mut session = self.blueprint.build_session(Arc::clone(&self.translator));
            match serve_client(
                stream,
                &mut session,
                self.extractor.as_mut(),
                self.renderer.as_mut(),
            )
            .await
            {
                Ok(()) => info!("client disconnected"),
                Err(err) => warn!(%err, "client connection terminated"),
            }
        }
    }
}

async fn serve_client(
    stream: UnixStream,
    session: &mut Session,
    extractor: &mut dyn FaceExtractor,
    renderer: &mut dyn OverlayRenderer,
) -> Result<(), ProtocolError> {
    let (mut reader, mut writer) = stream.into_split();
    while let Some(request) = protocol::read_request(&mut reader).await? {
        match request {
            Request::Image(frame) => {
                let now = Instant::now();
                let (annotated, events) =
                    session.handle_frame(&frame, extractor, renderer, now);
                protocol::write_image_response(&mut writer, events.as_deref(), &annotated)
                    .await?;
            }
            Request::Data(payload) => session.handle_data(&payload),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::face;
    use crate::overlay::Passthrough;
    use crate::signal::SignalBatch;

    fn blueprint() -> SessionBlueprint {
        let spec: GestureSpec = serde_json::from_str(
            r#"{
                "gestureId": "smile",
                "label": "Smile",
                "total_recommended_max_time": 3000,
                "take_picture_at_the_end": false,
                "signal_key": "mouthSmileRight",
                "instructions": [ { "move_to_next_type": "higher", "value": 0.5 } ]
            }"#,
        )
        .unwrap();
        SessionBlueprint {
            gestures: vec![spec],
            num_gestures: 1,
            geometry: FaceGeometry::default(),
            show_face: ShowFace::Hidden,
        }
    }

    fn frame() -> Frame {
        Frame::new(1, 1, vec![0, 0, 0]).unwrap()
    }

    /// Extractor that replays canned signal batches, one per frame.
    struct Scripted {
        batches: std::vec::IntoIter<SignalBatch>,
    }

    impl FaceExtractor for Scripted {
        fn process_frame(&mut self, _frame: &Frame, signals: &SignalSender) {
            if let Some(batch) = self.batches.next() {
                signals.send(batch).unwrap();
            }
        }
    }

    #[test]
    fn full_run_reports_alive_through_the_event_accumulator() {
        let t0 = Instant::now();
        let blueprint = blueprint();
        let mut session = blueprint.build_session(Arc::new(Translator::identity()));
        let mut renderer = Passthrough;

        // Frame 1 latches `starting`; no events yet.
        let mut extractor = Scripted {
            batches: vec![
                SignalBatch::new(t0 + Duration::from_millis(5100))
                    .with_value("mouthSmileRight", 0.9),
            ]
            .into_iter(),
        };
        let mut silent = face::Disabled::new(std::path::Path::new("model.task"));
        let (_, events) = session.handle_frame(&frame(), &mut silent, &mut renderer, t0);
        assert_eq!(events, None);

        // Frame 2 auto-advances `starting` past its 5 s budget and arms the
        // gesture.
        let t1 = t0 + Duration::from_millis(5050);
        let (_, events) = session.handle_frame(&frame(), &mut silent, &mut renderer, t1);
        assert_eq!(events, None);
        assert_eq!(session.runner.current_index(), 2);

        // Frame 3 delivers the smile; the verdict rides this reply.
        let t2 = t0 + Duration::from_millis(5200);
        let (_, events) = session.handle_frame(&frame(), &mut extractor, &mut renderer, t2);
        assert_eq!(events.as_deref(), Some(r#"{"reportAlive":true}"#));

        // Frame 4: the accumulator was cleared by the send.
        let t3 = t0 + Duration::from_millis(5300);
        let (_, events) = session.handle_frame(&frame(), &mut silent, &mut renderer, t3);
        assert_eq!(events, None);
    }

    #[test]
    fn config_messages_set_warning_and_overwrite_text() {
        let blueprint = blueprint();
        let mut session = blueprint.build_session(Arc::new(Translator::identity()));

        session.handle_data(r#"{"action":"set","variable":"overwrite_text","value":"hold on"}"#);
        assert_eq!(
            session.runner.prompt(&Translator::identity()).text,
            "hold on"
        );

        session
            .handle_data(r#"{"action":"set","variable":"warning_message","value":"too dark"}"#);
        assert_eq!(session.warning_message.as_deref(), Some("too dark"));

        // Unknown commands and broken JSON are ignored.
        session.handle_data(r#"{"action":"get","variable":"warning_message"}"#);
        session.handle_data("not json at all");
        session.handle_data(r#"{"action":"set","variable":"nope","value":"x"}"#);
        assert_eq!(session.warning_message.as_deref(), Some("too dark"));

        // An empty value clears the warning again.
        session.handle_data(r#"{"action":"set","variable":"warning_message","value":""}"#);
        assert_eq!(session.warning_message, None);
    }

    #[test]
    fn event_accumulator_merges_and_clears() {
        let mut events = EventAccumulator::default();
        assert_eq!(events.drain_json(), None);

        events.push(ClientEvent::TakePicture);
        events.push(ClientEvent::ReportAlive(false));
        let json: serde_json::Value =
            serde_json::from_str(&events.drain_json().unwrap()).unwrap();
        assert_eq!(json["takeAPicture"], serde_json::Value::Bool(true));
        assert_eq!(json["reportAlive"], serde_json::Value::Bool(false));

        assert_eq!(events.drain_json(), None);
    }
}
