//! Length-delimited bincode frame codec

use bytes::{Bytes, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

use crate::{Request, Response, DEFAULT_MAX_FRAME_LENGTH};

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed frame payload: {0}")]
    Payload(#[from] bincode::Error),

    #[error("Frame of {length} bytes exceeds the {max} byte limit")]
    FrameTooLarge { length: usize, max: usize },
}

/// Codec decoding `In` messages and encoding `Out` messages.
///
/// Frames carry a 4-byte big-endian length prefix followed by the bincode
/// payload. Frames longer than the configured maximum are rejected in both
/// directions.
pub struct ScanCodec<In, Out> {
    frames: LengthDelimitedCodec,
    _marker: PhantomData<fn(Out) -> In>,
}

/// Codec used by clients: sends requests, receives responses
pub type ClientCodec = ScanCodec<Response, Request>;

/// Codec used by services: receives requests, sends responses
pub type ServerCodec = ScanCodec<Request, Response>;

impl<In, Out> ScanCodec<In, Out> {
    pub fn new(max_frame_length: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_length(4)
            .max_frame_length(max_frame_length)
            .new_codec();

        Self {
            frames,
            _marker: PhantomData,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.frames.max_frame_length()
    }
}

impl<In, Out> Default for ScanCodec<In, Out> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl<In: DeserializeOwned, Out> Decoder for ScanCodec<In, Out> {
    type Item = In;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<In>, CodecError> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(bincode::deserialize(&frame[..])?)),
            None => Ok(None),
        }
    }
}

impl<In, Out: Serialize> Encoder<Out> for ScanCodec<In, Out> {
    type Error = CodecError;

    fn encode(&mut self, item: Out, dst: &mut BytesMut) -> Result<(), CodecError> {
        let payload = bincode::serialize(&item)?;
        let max = self.frames.max_frame_length();
        if payload.len() > max {
            return Err(CodecError::FrameTooLarge {
                length: payload.len(),
                max,
            });
        }
        self.frames.encode(Bytes::from(payload), dst)?;
        Ok(())
    }
}
