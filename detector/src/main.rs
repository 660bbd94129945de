//! Liveness verification session server.

use std::path::PathBuf;

use clap::Parser;
use eyre::{ensure, Result, WrapErr as _};
use rand::seq::SliceRandom as _;
use tracing::{info, warn};

use liveness_detector::detector::GestureSpec;
use liveness_detector::face;
use liveness_detector::guidance::FaceGeometry;
use liveness_detector::overlay;
use liveness_detector::overlay::ShowFace;
use liveness_detector::server::{Server, SessionBlueprint};
use liveness_detector::translation::Translator;

const SYSLOG_IDENTIFIER: &str = "liveness-detector";

/// Gesture-challenge liveness verification over a local socket.
#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Liveness verification session server",
    long_about = "Serves a frame-in/annotated-frame-out liveness protocol on a \
                  unix socket, challenging the subject with a randomized gesture \
                  sequence extracted from the configured gesture descriptors."
)]
struct Args {
    /// Face-landmark model handed to the extraction backend.
    #[clap(long, alias = "model_path")]
    model_path: PathBuf,

    /// Colon-separated list of directories holding gesture descriptors.
    #[clap(long, alias = "gestures_folder_path")]
    gestures_folder_path: String,

    /// Locale of the on-screen prompts, e.g. `en` or `pt_BR`.
    #[clap(long)]
    language: String,

    /// Path of the unix socket to listen on.
    #[clap(long, alias = "socket_path")]
    socket_path: PathBuf,

    /// How many gestures each verification run challenges the subject with.
    #[clap(long, alias = "num_gestures")]
    num_gestures: usize,

    /// Font used by the overlay rendering backend.
    #[clap(long, alias = "font_path")]
    font_path: PathBuf,

    /// Colon-separated list of locale directories. Defaults to the
    /// `locales` directory inside the first gestures folder.
    #[clap(long, alias = "locales_paths")]
    locales_paths: Option<String>,

    /// Colon-separated whitelist of gesture file stems to load.
    #[clap(long, alias = "gestures_list")]
    gestures_list: Option<String>,
}

fn split_paths(raw: &str) -> Vec<PathBuf> {
    raw.split(':')
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}

fn discover_gesture_files(
    folders: &[PathBuf],
    whitelist: Option<&[String]>,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for folder in folders {
        let entries = std::fs::read_dir(folder)
            .wrap_err_with(|| format!("cannot access gestures folder {}", folder.display()))?;
        for entry in entries {
            let path = entry
                .wrap_err_with(|| format!("cannot list gestures folder {}", folder.display()))?
                .path();
            if !path.extension().is_some_and(|extension| extension == "json") {
                continue;
            }
            if let Some(whitelist) = whitelist {
                let stem = path.file_stem().and_then(|stem| stem.to_str());
                if !stem.is_some_and(|stem| whitelist.iter().any(|want| want == stem)) {
                    continue;
                }
            }
            files.push(path);
        }
    }
    Ok(files)
}

async fn main_inner(args: Args) -> Result<()> {
    let gesture_folders = split_paths(&args.gestures_folder_path);
    ensure!(!gesture_folders.is_empty(), "no gestures folder given");

    let whitelist: Option<Vec<String>> = args.gestures_list.as_deref().map(|raw| {
        raw.split(':')
            .filter(|part| !part.is_empty())
            .map(str::to_owned)
            .collect()
    });
    let mut files = discover_gesture_files(&gesture_folders, whitelist.as_deref())?;
    ensure!(
        !files.is_empty(),
        "no gesture descriptors found under {}",
        args.gestures_folder_path
    );
    // Present the catalogue in a fresh order on every start.
    files.shuffle(&mut rand::thread_rng());

    let mut gestures = Vec::new();
    for path in &files {
        match GestureSpec::load(path) {
            Ok(spec) => match spec.build() {
                Ok(_) => {
                    info!(id = %spec.gesture_id, path = %path.display(), "loaded gesture");
                    gestures.push(spec);
                }
                Err(reason) => {
                    warn!(path = %path.display(), reason, "skipping invalid gesture descriptor")
                }
            },
            Err(err) => {
                warn!(path = %path.display(), %err, "skipping unreadable gesture descriptor")
            }
        }
    }
    ensure!(!gestures.is_empty(), "no gesture descriptors could be loaded");
    ensure!(
        args.num_gestures <= gestures.len(),
        "requested {} gestures but only {} loaded",
        args.num_gestures,
        gestures.len()
    );

    let locales_dirs = match args.locales_paths.as_deref() {
        Some(raw) => split_paths(raw),
        None => vec![gesture_folders[0].join("locales")],
    };
    let translator = Translator::new(&args.language, &locales_dirs);

    // Landmark extraction and overlay drawing are out-of-process
    // collaborators; their resource paths are forwarded, not opened here.
    info!(font = %args.font_path.display(), "overlay font");
    let extractor = face::Disabled::new(&args.model_path);

    let blueprint = SessionBlueprint {
        gestures,
        num_gestures: args.num_gestures,
        geometry: FaceGeometry::default(),
        show_face: ShowFace::Hidden,
    };
    let server = Server::new(
        args.socket_path,
        blueprint,
        translator,
        Box::new(extractor),
        Box::new(overlay::Passthrough),
    );
    server.run().await.wrap_err("session server failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let telemetry = liveness_telemetry::TelemetryConfig::new()
        .with_journald(SYSLOG_IDENTIFIER)
        .init();

    let args = Args::parse();
    let result = main_inner(args).await;
    telemetry.flush_blocking();
    result
}
