use crate::error::CodecError;

use std::fmt;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::value::RawValue;

/// Arenas beyond this many are dropped instead of pooled.
const MAX_POOLED_BUFFERS: usize = 64;

/// Size of a fresh arena. Frames longer than this are not pooled afterwards.
const ARENA_CAPACITY: usize = 4096;

/// Arenas with less room left than this are dropped.
const MIN_ARENA_REMAINDER: usize = 64;

/// The identifier of an inbound message, borrowed verbatim from its payload.
#[derive(Clone, Copy, Debug)]
pub struct MessageId<'a>(&'a RawValue);

impl MessageId<'_> {
    /// The identifier as raw JSON text.
    #[must_use]
    pub fn as_json(&self) -> &str {
        self.0.get()
    }
}

impl fmt::Display for MessageId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.get())
    }
}

/// The top-level fields of an inbound message. The first `id` wins.
struct Inbound<'a> {
    id: Option<&'a RawValue>,
}

#[derive(Deserialize)]
#[serde(field_identifier, rename_all = "lowercase")]
enum Field {
    Id,
    #[serde(other)]
    Other,
}

impl<'de> Deserialize<'de> for Inbound<'de> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct InboundVisitor;

        impl<'de> Visitor<'de> for InboundVisitor {
            type Value = Inbound<'de>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON object")
            }

            fn visit_map<M>(self, mut map: M) -> Result<Self::Value, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut id = None;
                while let Some(field) = map.next_key::<Field>()? {
                    match field {
                        Field::Id if id.is_none() => id = Some(map.next_value::<&RawValue>()?),
                        Field::Id | Field::Other => {
                            map.next_value::<IgnoredAny>()?;
                        }
                    }
                }

                Ok(Inbound { id })
            }
        }

        deserializer.deserialize_map(InboundVisitor)
    }
}

#[derive(Serialize)]
struct Ack<'a> {
    id: &'a RawValue,
}

/// Extracts message identifiers and encodes acknowledgment envelopes.
///
/// Clones share one pool of arenas. Each ack is written into a checked out
/// arena and split off as a frame that shares the arena's allocation, and the
/// remaining room goes back to the pool.
#[derive(Clone, Debug, Default)]
pub struct AckCodec {
    pool: Arc<BufferPool>,
}

impl AckCodec {
    /// Creates a codec with an empty buffer pool.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the top-level `id` of a JSON object.
    ///
    /// # Errors
    ///
    /// Fails if the payload is not a JSON object or has no non-null `id`.
    pub fn extract_id<'a>(&self, payload: &'a [u8]) -> Result<MessageId<'a>, CodecError> {
        if payload.trim_ascii_start().first() != Some(&b'{') {
            return Err(CodecError::NotAnObject);
        }

        let inbound: Inbound<'a> =
            serde_json::from_slice(payload).map_err(CodecError::Malformed)?;

        match inbound.id {
            Some(id) if id.get() != "null" => Ok(MessageId(id)),
            _ => Err(CodecError::MissingId),
        }
    }

    /// Encodes `{"id": <id>}` with the identifier copied byte for byte.
    ///
    /// # Errors
    ///
    /// Fails only if serialization into the arena fails.
    pub fn build_ack(&self, id: &MessageId<'_>) -> Result<Bytes, CodecError> {
        let mut buffer = self.pool.checkout();

        serde_json::to_writer((&mut *buffer).writer(), &Ack { id: id.0 })
            .map_err(CodecError::Encode)?;

        Ok(buffer.split_frame())
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.pool.buffers.lock().len()
    }
}

#[derive(Debug, Default)]
struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
}

impl BufferPool {
    fn checkout(&self) -> PooledBuffer<'_> {
        let buffer = self
            .buffers
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(ARENA_CAPACITY));

        PooledBuffer { pool: self, buffer }
    }
}

struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buffer: BytesMut,
}

impl PooledBuffer<'_> {
    /// Splits the written bytes off as a frame, keeping the unused room.
    fn split_frame(&mut self) -> Bytes {
        let frame = self.buffer.split().freeze();
        if frame.len() > ARENA_CAPACITY {
            // Grown arenas are not worth keeping.
            self.buffer = BytesMut::new();
        }

        frame
    }
}

impl Deref for PooledBuffer<'_> {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buffer
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        let mut buffer = mem::take(&mut self.buffer);
        buffer.clear();
        if buffer.capacity() < MIN_ARENA_REMAINDER {
            return;
        }

        let mut buffers = self.pool.buffers.lock();
        if buffers.len() < MAX_POOLED_BUFFERS {
            buffers.push(buffer);
        }
    }
}
