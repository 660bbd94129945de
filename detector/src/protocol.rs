//! Wire protocol for the session socket.
//!
//! Every client request starts with a one-byte function id: `0x01` carries
//! a raw BGR frame, `0x02` a JSON payload. All lengths are big-endian. The
//! reply to an image request is an optional event payload (`0x02`, only
//! when non-empty) followed by the annotated frame (`0x01`).

use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};

pub const FUNCTION_IMAGE: u8 = 0x01;
pub const FUNCTION_DATA: u8 = 0x02;

/// Upper bound on a declared frame payload; anything larger is treated as a
/// corrupt header rather than an allocation request.
const MAX_FRAME_BYTES: u32 = 64 * 1024 * 1024;
const MAX_DATA_BYTES: u32 = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("socket i/o error")]
    Io(#[from] std::io::Error),
    #[error("unknown function id {0:#04x}")]
    UnknownFunction(u8),
    #[error("inconsistent frame header: {size} bytes for {rows}x{cols}x3")]
    BadFrameHeader { size: u32, rows: u32, cols: u32 },
    #[error("declared payload of {0} bytes exceeds the protocol limit")]
    Oversized(u32),
    #[error("data payload is not valid utf-8")]
    BadEncoding,
}

/// A rows × cols, 3-channel, 8-bit BGR interleaved image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    rows: u32,
    cols: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wraps raw pixel data; `data` must hold exactly `rows * cols * 3`
    /// bytes.
    pub fn new(rows: u32, cols: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() as u64 == u64::from(rows) * u64::from(cols) * 3)
            .then_some(Self { rows, cols, data })
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn cols(&self) -> u32 {
        self.cols
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// One decoded client request.
#[derive(Debug)]
pub enum Request {
    /// A camera frame to verify.
    Image(Frame),
    /// An out-of-band JSON command.
    Data(String),
}

/// Reads the next request. `Ok(None)` means the client closed the
/// connection cleanly between requests; any malformed header is an error
/// and terminates the connection.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let function_id = match reader.read_u8().await {
        Ok(id) => id,
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    match function_id {
        FUNCTION_IMAGE => {
            let size = reader.read_u32().await?;
            let rows = reader.read_u32().await?;
            let cols = reader.read_u32().await?;
            if size > MAX_FRAME_BYTES {
                return Err(ProtocolError::Oversized(size));
            }
            if u64::from(size) != u64::from(rows) * u64::from(cols) * 3 {
                return Err(ProtocolError::BadFrameHeader { size, rows, cols });
            }
            let mut data = vec![0; size as usize];
            reader.read_exact(&mut data).await?;
            // Length was validated against the header above.
            Ok(Some(Request::Image(Frame { rows, cols, data })))
        }
        FUNCTION_DATA => {
            let len = reader.read_u32().await?;
            if len > MAX_DATA_BYTES {
                return Err(ProtocolError::Oversized(len));
            }
            let mut data = vec![0; len as usize];
            reader.read_exact(&mut data).await?;
            let text = String::from_utf8(data).map_err(|_| ProtocolError::BadEncoding)?;
            Ok(Some(Request::Data(text)))
        }
        other => Err(ProtocolError::UnknownFunction(other)),
    }
}

/// Writes one image reply: the optional event payload, then the frame.
pub async fn write_image_response<W>(
    writer: &mut W,
    events: Option<&str>,
    frame: &Frame,
) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if let Some(events) = events {
        writer.write_u8(FUNCTION_DATA).await?;
        writer.write_u32(events.len() as u32).await?;
        writer.write_all(events.as_bytes()).await?;
    }
    writer.write_u8(FUNCTION_IMAGE).await?;
    writer.write_u32(frame.data.len() as u32).await?;
    writer.write_u32(frame.rows).await?;
    writer.write_u32(frame.cols).await?;
    writer.write_all(&frame.data).await?;
    writer.flush().await?;
    Ok(())
}
