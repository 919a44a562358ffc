//! Binary RPC protocol for the Periderm scanner.
//!
//! Wire format for Collector <-> Orchestrator and Orchestrator <-> Analyzer
//! traffic: a fixed 16-byte header followed by a JSON payload.
//!
//! # Frame layout
//!
//! Header (16 bytes, Network Byte Order / Big Endian):
//! ```text
//! [VER:1][OP:1][DEADLINE_SECS:2][REQUEST_ID:8][LEN:4]
//! ```
//!
//! - VER (u8): Protocol version (0x01)
//! - OP (u8): OpCode
//! - DEADLINE_SECS (u16): caller deadline in seconds, 0 = callee default
//! - REQUEST_ID (u64): correlates a response with its request
//! - LEN (u32): payload length in bytes
//!
//! Payloads are JSON-encoded request/response structs from [`types`].
//! A response reuses the request's REQUEST_ID with [`OpCode::Reply`] or
//! [`OpCode::Err`].

pub mod defaults;
pub mod error;
pub mod transport;
pub mod types;

pub use error::{ProtocolError, Result};
pub use transport::{read_message, write_message};
pub use types::{
    Advisory,
    AnalyzeFilesRequest,
    AnalyzeFilesResponse,
    AssembledFile,
    ChunkedFile,
    CreateScanResponse,
    DataChunk,
    DataKind,
    ErrorKind,
    ErrorPayload,
    FileMetadata,
    Finding,
    FindingAccuracy,
    FindingSeverity,
    FindingSource,
    Interest,
    ListInitialInterestsResponse,
    ListInterestsRequest,
    ListInterestsResponse,
    Resource,
    ScanFilesRequest,
    ScanFilesResponse,
};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

/// Protocol version
pub const PROTOCOL_VERSION: u8 = 0x01;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Maximum accepted payload size. Chunked file batches dominate frame
/// sizes; anything above this is rejected before allocation.
pub const MAX_PAYLOAD_SIZE: usize = 256 * 1024 * 1024;

/// RPC opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    Unknown = 0,

    // Collector -> Orchestrator
    CreateScan = 1,    // "Open a scan, give me the initial interests."
    ListInterests = 2, // "What does this scan currently want?"
    ScanFiles = 3,     // "Here are matching files, possibly chunked."

    // Orchestrator -> Analyzer
    ListInitialInterests = 4, // "What do you want to see?"
    AnalyzeFiles = 5,         // "Inspect these assembled files."

    // Responses
    Reply = 6, // Payload is the op-specific response struct.
    Err = 7,   // Payload is an ErrorPayload.
}

impl OpCode {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(OpCode::Unknown),
            1 => Ok(OpCode::CreateScan),
            2 => Ok(OpCode::ListInterests),
            3 => Ok(OpCode::ScanFiles),
            4 => Ok(OpCode::ListInitialInterests),
            5 => Ok(OpCode::AnalyzeFiles),
            6 => Ok(OpCode::Reply),
            7 => Ok(OpCode::Err),
            _ => Err(ProtocolError::InvalidOpCode(value)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Frame header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    pub opcode: OpCode,
    /// Caller deadline in whole seconds; 0 means the callee applies its
    /// configured default.
    pub deadline_secs: u16,
    pub request_id: u64,
    pub payload_len: u32,
}

impl Header {
    pub fn new(opcode: OpCode, request_id: u64, payload_len: u32) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            opcode,
            deadline_secs: 0,
            request_id,
            payload_len,
        }
    }

    /// Pack header into a 16-byte buffer, big endian.
    pub fn pack(&self) -> Result<[u8; HEADER_SIZE]> {
        let mut buf = [0u8; HEADER_SIZE];
        let mut cursor = Cursor::new(&mut buf[..]);

        cursor.write_u8(self.version)?;
        cursor.write_u8(self.opcode.as_u8())?;
        cursor.write_u16::<BigEndian>(self.deadline_secs)?;
        cursor.write_u64::<BigEndian>(self.request_id)?;
        cursor.write_u32::<BigEndian>(self.payload_len)?;

        Ok(buf)
    }

    /// Unpack header from a 16-byte buffer.
    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(ProtocolError::HeaderTooShort {
                expected: HEADER_SIZE,
                got: data.len(),
            });
        }

        let mut cursor = Cursor::new(&data[..HEADER_SIZE]);

        let version = cursor.read_u8()?;
        let op_raw = cursor.read_u8()?;
        let deadline_secs = cursor.read_u16::<BigEndian>()?;
        let request_id = cursor.read_u64::<BigEndian>()?;
        let payload_len = cursor.read_u32::<BigEndian>()?;

        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                got: version,
            });
        }

        let opcode = OpCode::from_u8(op_raw)?;

        Ok(Self {
            version,
            opcode,
            deadline_secs,
            request_id,
            payload_len,
        })
    }
}

/// A full frame: header plus JSON payload bytes.
#[derive(Debug, Clone)]
pub struct Message {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Message {
    /// Build a message from a serializable payload.
    pub fn new<T: serde::Serialize>(opcode: OpCode, request_id: u64, payload: &T) -> Result<Self> {
        let payload = serde_json::to_vec(payload)?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = Header::new(opcode, request_id, payload.len() as u32);
        Ok(Self { header, payload })
    }

    /// Same as [`Message::new`] with an explicit caller deadline.
    pub fn with_deadline<T: serde::Serialize>(
        opcode: OpCode,
        request_id: u64,
        deadline_secs: u16,
        payload: &T,
    ) -> Result<Self> {
        let mut msg = Self::new(opcode, request_id, payload)?;
        msg.header.deadline_secs = deadline_secs;
        Ok(msg)
    }

    /// Decode the JSON payload.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }
}
