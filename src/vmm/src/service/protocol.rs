// Copyright 2023 aztecher, or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Control-plane wire format.
//!
//! Every message is one frame: a little-endian `u32` body length followed by a JSON body.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Largest accepted frame body.
pub const MAX_FRAME_LEN: usize = 16 << 20;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame body is larger than `MAX_FRAME_LEN`.
    #[error("Frame of {0} bytes exceeds the {} byte limit", MAX_FRAME_LEN)]
    FrameTooLarge(usize),
    /// Reading or writing the stream failed.
    #[error("Frame I/O error: {0}")]
    Io(#[source] std::io::Error),
    /// The frame body is not a valid message.
    #[error("Malformed message: {0}")]
    Json(#[source] serde_json::Error),
}

impl ProtocolError {
    /// Whether the peer closed the stream between two frames.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, ProtocolError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// An operation on the server-owned VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Init,
    SetMemRegion { guest_addr: u64, size: usize },
    LoadRaw { code: Vec<u8> },
    Run,
    /// Stop serving after answering this request.
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Error { message: String },
}

pub fn write_frame<W: Write>(writer: &mut W, body: &[u8]) -> Result<(), ProtocolError> {
    if body.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(body.len()));
    }
    writer
        .write_u32::<LittleEndian>(body.len() as u32)
        .map_err(ProtocolError::Io)?;
    writer.write_all(body).map_err(ProtocolError::Io)?;
    writer.flush().map_err(ProtocolError::Io)
}

pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, ProtocolError> {
    let len = reader
        .read_u32::<LittleEndian>()
        .map_err(ProtocolError::Io)? as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).map_err(ProtocolError::Io)?;
    Ok(body)
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(message).map_err(ProtocolError::Json)
}

pub fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(body).map_err(ProtocolError::Json)
}
