//! Wire protocol between the remote executor and the workspace agent
//!
//! Each message is a JSON document preceded by its length as a 4-byte big
//! endian integer. The executor sends a [`RequestFrame`] and waits for the
//! [`ResponseFrame`] carrying the same id before sending the next one.

use std::collections::BTreeSet;
use std::io;
use std::path::PathBuf;

use apksmith_core::{MatchedInput, WorkspaceError};
use apksmith_signing::KeySigningMaterial;
use apksmith_tools::{ToolLocation, ZipalignOverrides};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use crate::launcher::LaunchOutcome;

/// Largest accepted frame; archived APKs travel in `read_file` responses
pub const MAX_FRAME_LEN: usize = 512 * 1024 * 1024;

/// An operation to run on the workspace host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum WorkspaceRequest {
    WorkspaceRoot,
    MatchInputs {
        patterns: String,
        excludes: Vec<String>,
    },
    LocateZipalign {
        overrides: ZipalignOverrides,
    },
    PrepareDir {
        path: PathBuf,
    },
    Exists {
        path: PathBuf,
    },
    Delete {
        path: PathBuf,
    },
    Align {
        tool: ToolLocation,
        input: PathBuf,
        output: PathBuf,
    },
    SignApk {
        input: PathBuf,
        output: PathBuf,
        material: KeySigningMaterial,
    },
    ReadFile {
        path: PathBuf,
    },
}

impl WorkspaceRequest {
    /// Operation name for logs
    pub fn op(&self) -> &'static str {
        match self {
            Self::WorkspaceRoot => "workspace_root",
            Self::MatchInputs { .. } => "match_inputs",
            Self::LocateZipalign { .. } => "locate_zipalign",
            Self::PrepareDir { .. } => "prepare_dir",
            Self::Exists { .. } => "exists",
            Self::Delete { .. } => "delete",
            Self::Align { .. } => "align",
            Self::SignApk { .. } => "sign_apk",
            Self::ReadFile { .. } => "read_file",
        }
    }
}

/// Result of a [`WorkspaceRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum WorkspaceResponse {
    Root {
        path: PathBuf,
    },
    Inputs {
        inputs: BTreeSet<MatchedInput>,
    },
    Tool {
        location: ToolLocation,
    },
    Done,
    Exists {
        exists: bool,
    },
    Deleted {
        deleted: bool,
    },
    Aligned {
        outcome: LaunchOutcome,
    },
    File {
        #[serde(with = "base64_content")]
        content: Vec<u8>,
    },
    Error {
        error: WorkspaceError,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: Uuid,
    pub request: WorkspaceRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: Uuid,
    pub response: WorkspaceResponse,
}

/// Write one length-prefixed JSON frame
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let payload = serde_json::to_vec(message)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {} bytes exceeds the limit", payload.len()),
        ));
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}

/// Read one frame, `None` if the peer closed the stream between frames
pub async fn read_frame<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("frame of {len} bytes exceeds the limit"),
        ));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    let message = serde_json::from_slice(&payload)?;
    Ok(Some(message))
}

mod base64_content {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
