//! Binary protocol for peer-to-peer sync traffic
//!
//! Wire format (all integers are big-endian; strings are u32 length + bytes):
//!
//! Message frame:
//! ```text
//! kind: u8                      0x01 Sync | 0x02 Delete | 0x03 Ping
//! origin_id: string
//! vclock_len: u32
//!   vclock_len x (node: string, counter: u64)
//! path: string                  forward-slash separators
//! if kind == Sync:
//!   mod_time: i64               Unix nanoseconds
//!   checksum: [u8; 32]          SHA-256 of data
//!   data_len: u64
//!   data: [u8; data_len]
//! ```
//!
//! Response frame:
//! ```text
//! code: u8                      0x00 Ok | 0x01 Err | 0x02 Skip
//! msg: string
//! vclock_len: u32
//!   vclock_len x (node: string, counter: u64)
//! ```

use std::collections::HashMap;
use std::path::Path;

use bytes::Bytes;
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Message type identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageKind {
    Sync = 0x01,
    Delete = 0x02,
    Ping = 0x03,
}

impl TryFrom<u8> for MessageKind {
    type Error = color_eyre::Report;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(Self::Sync),
            0x02 => Ok(Self::Delete),
            0x03 => Ok(Self::Ping),
            other => Err(eyre!("unknown message type: {other:#04x}")),
        }
    }
}

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    Ok = 0x00,
    Err = 0x01,
    Skip = 0x02,
}

impl TryFrom<u8> for ResponseCode {
    type Error = color_eyre::Report;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x00 => Ok(Self::Ok),
            0x01 => Ok(Self::Err),
            0x02 => Ok(Self::Skip),
            other => Err(eyre!("unknown response code: {other:#04x}")),
        }
    }
}

/// One request over the wire.
///
/// `mod_time_nanos`, `checksum`, and `data` are transmitted only for `Sync`;
/// they stay at their defaults for other kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub origin_id: String,
    pub vclock: HashMap<String, u64>,
    pub path: String,
    pub mod_time_nanos: i64,
    pub checksum: [u8; 32],
    pub data: Bytes,
}

impl Message {
    #[must_use]
    pub fn sync(
        origin_id: impl Into<String>,
        vclock: HashMap<String, u64>,
        path: impl Into<String>,
        mod_time_nanos: i64,
        checksum: [u8; 32],
        data: Bytes,
    ) -> Self {
        Self {
            kind: MessageKind::Sync,
            origin_id: origin_id.into(),
            vclock,
            path: path.into(),
            mod_time_nanos,
            checksum,
            data,
        }
    }

    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Delete,
            path: path.into(),
            ..Self::ping()
        }
    }

    #[must_use]
    pub fn ping() -> Self {
        Self {
            kind: MessageKind::Ping,
            origin_id: String::new(),
            vclock: HashMap::new(),
            path: String::new(),
            mod_time_nanos: 0,
            checksum: [0u8; 32],
            data: Bytes::new(),
        }
    }
}

/// One reply over the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub code: ResponseCode,
    pub msg: String,
    pub vclock: HashMap<String, u64>,
}

impl Response {
    #[must_use]
    pub fn ok(vclock: HashMap<String, u64>) -> Self {
        Self {
            code: ResponseCode::Ok,
            msg: String::new(),
            vclock,
        }
    }

    #[must_use]
    pub fn skip(msg: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Skip,
            msg: msg.into(),
            vclock: HashMap::new(),
        }
    }

    #[must_use]
    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            code: ResponseCode::Err,
            msg: msg.into(),
            vclock: HashMap::new(),
        }
    }
}

async fn write_string<W: AsyncWrite + Unpin>(w: &mut W, s: &str) -> Result<()> {
    w.write_all(&(s.len() as u32).to_be_bytes()).await?;
    w.write_all(s.as_bytes()).await?;
    Ok(())
}

async fn read_string<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let len = r.read_u32().await? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await?;
    Ok(String::from_utf8(buf)?)
}

async fn write_vclock<W: AsyncWrite + Unpin>(
    w: &mut W,
    vclock: &HashMap<String, u64>,
) -> Result<()> {
    w.write_all(&(vclock.len() as u32).to_be_bytes()).await?;
    for (node, counter) in vclock {
        write_string(w, node).await?;
        w.write_all(&counter.to_be_bytes()).await?;
    }
    Ok(())
}

async fn read_vclock<R: AsyncRead + Unpin>(r: &mut R) -> Result<HashMap<String, u64>> {
    let len = r.read_u32().await?;
    let mut vclock = HashMap::with_capacity(len as usize);
    for _ in 0..len {
        let node = read_string(r).await?;
        let counter = r.read_u64().await?;
        vclock.insert(node, counter);
    }
    Ok(vclock)
}

/// Write one message frame and flush
pub async fn write_message<W: AsyncWrite + Unpin>(w: &mut W, msg: &Message) -> Result<()> {
    w.write_all(&[msg.kind as u8]).await?;
    write_string(w, &msg.origin_id).await?;
    write_vclock(w, &msg.vclock).await?;
    write_string(w, &msg.path).await?;

    if msg.kind == MessageKind::Sync {
        w.write_all(&msg.mod_time_nanos.to_be_bytes()).await?;
        w.write_all(&msg.checksum).await?;
        w.write_all(&(msg.data.len() as u64).to_be_bytes()).await?;
        w.write_all(&msg.data).await?;
    }

    w.flush().await?;
    Ok(())
}

/// Read one message frame
pub async fn read_message<R: AsyncRead + Unpin>(r: &mut R) -> Result<Message> {
    let kind = MessageKind::try_from(r.read_u8().await?)?;
    let origin_id = read_string(r).await?;
    let vclock = read_vclock(r).await?;
    let path = read_string(r).await?;

    let mut msg = Message {
        kind,
        origin_id,
        vclock,
        path,
        mod_time_nanos: 0,
        checksum: [0u8; 32],
        data: Bytes::new(),
    };

    if kind == MessageKind::Sync {
        msg.mod_time_nanos = r.read_i64().await?;
        r.read_exact(&mut msg.checksum).await?;

        let data_len = r.read_u64().await? as usize;
        let mut data = vec![0u8; data_len];
        r.read_exact(&mut data).await?;
        msg.data = Bytes::from(data);
    }

    Ok(msg)
}

/// Write one response frame and flush
pub async fn write_response<W: AsyncWrite + Unpin>(w: &mut W, resp: &Response) -> Result<()> {
    w.write_all(&[resp.code as u8]).await?;
    write_string(w, &resp.msg).await?;
    write_vclock(w, &resp.vclock).await?;
    w.flush().await?;
    Ok(())
}

/// Read one response frame
pub async fn read_response<R: AsyncRead + Unpin>(r: &mut R) -> Result<Response> {
    let code = ResponseCode::try_from(r.read_u8().await?)?;
    let msg = read_string(r).await?;
    let vclock = read_vclock(r).await?;
    Ok(Response { code, msg, vclock })
}

/// Normalize a filesystem path to the forward-slash wire form
#[must_use]
pub fn to_wire_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

/// Translate a wire path into the platform's path form
#[must_use]
pub fn from_wire_path(path: &str) -> std::path::PathBuf {
    path.split('/').collect()
}

/// SHA-256 of a byte slice
#[must_use]
pub fn checksum_bytes(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Streaming SHA-256 of a file's contents
///
/// # Errors
/// Returns an error if the file cannot be opened or read
pub async fn file_checksum(path: &Path) -> Result<[u8; 32]> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize().into())
}

/// Verify that `data` hashes to `expected`
///
/// # Errors
/// Returns an error on mismatch
pub fn validate_checksum(data: &[u8], expected: &[u8; 32]) -> Result<()> {
    if checksum_bytes(data) != *expected {
        bail!("checksum mismatch");
    }
    Ok(())
}
