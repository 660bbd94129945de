//! Drives a running liveness-detector server with synthetic frames.
//!
//! Connects to the session socket, streams flat BGR frames at a fixed rate
//! and prints every event payload the server reports. Useful for exercising
//! the protocol without a camera or a landmark backend.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use eyre::{Result, WrapErr as _};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::UnixStream;
use tokio::time::sleep;
use tracing::{info, warn};

/// Utility args
#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about = "Liveness client replay tool",
    long_about = "Streams synthetic camera frames to a liveness-detector socket \
                  and prints the events coming back"
)]
struct Args {
    /// Socket the server listens on.
    #[clap(short, long)]
    socket_path: PathBuf,

    /// Number of frames to send.
    #[clap(short, long, default_value_t = 100)]
    frames: u32,

    /// Frame rate to send at.
    #[clap(long, default_value_t = 10)]
    fps: u32,

    /// Frame height in pixels.
    #[clap(long, default_value_t = 480)]
    rows: u32,

    /// Frame width in pixels.
    #[clap(long, default_value_t = 640)]
    cols: u32,
}

async fn send_frame(stream: &mut UnixStream, rows: u32, cols: u32, pixels: &[u8]) -> Result<()> {
    stream.write_u8(0x01).await?;
    stream.write_u32(pixels.len() as u32).await?;
    stream.write_u32(rows).await?;
    stream.write_u32(cols).await?;
    stream.write_all(pixels).await?;
    Ok(())
}

/// Reads one reply; returns the event payload when the server sent one.
async fn read_reply(stream: &mut UnixStream) -> Result<Option<String>> {
    let mut function_id = stream.read_u8().await?;
    let mut events = None;
    if function_id == 0x02 {
        let len = stream.read_u32().await? as usize;
        let mut payload = vec![0; len];
        stream.read_exact(&mut payload).await?;
        events = Some(String::from_utf8(payload).wrap_err("event payload is not utf-8")?);
        function_id = stream.read_u8().await?;
    }
    eyre::ensure!(function_id == 0x01, "expected an image reply, got {function_id:#04x}");
    let size = stream.read_u32().await? as usize;
    let _rows = stream.read_u32().await?;
    let _cols = stream.read_u32().await?;
    let mut pixels = vec![0; size];
    stream.read_exact(&mut pixels).await?;
    Ok(events)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let _telemetry = liveness_telemetry::TelemetryConfig::new().init();
    let args = Args::parse();

    let mut stream = UnixStream::connect(&args.socket_path)
        .await
        .wrap_err_with(|| format!("cannot connect to {}", args.socket_path.display()))?;
    info!(path = %args.socket_path.display(), "connected");

    let pixels = vec![0u8; (args.rows * args.cols * 3) as usize];
    let interval = Duration::from_secs_f64(1.0 / f64::from(args.fps.max(1)));

    for frame in 0..args.frames {
        send_frame(&mut stream, args.rows, args.cols, &pixels).await?;
        match read_reply(&mut stream).await {
            Ok(Some(events)) => info!(frame, %events, "server reported events"),
            Ok(None) => {}
            Err(err) => {
                warn!(frame, %err, "connection lost");
                break;
            }
        }
        sleep(interval).await;
    }

    Ok(())
}
