use bytes::BytesMut;
use std::ops::{Deref, DerefMut};
use crate::error::{D2dError, D2dResult};

/// A raw frame buffer as it is handed to / filled by the link layer.
///
/// Allocation is fallible: running out of memory while receiving is a frame-local error that
///  must not take the dispatcher down. Memory is released when the buffer is dropped.
pub struct PBuf {
    buf: BytesMut,
}

impl PBuf {
    /// allocates an empty buffer with capacity for at least `size` bytes
    pub fn alloc(size: usize) -> D2dResult<PBuf> {
        // BytesMut has no fallible allocation, so the allocation is tried with a Vec first
        let mut reservation: Vec<u8> = Vec::new();
        reservation.try_reserve_exact(size)
            .map_err(|_| D2dError::OutOfMemory(size))?;
        drop(reservation);

        Ok(PBuf { buf: BytesMut::with_capacity(size) })
    }

    pub fn from_slice(data: &[u8]) -> D2dResult<PBuf> {
        let mut result = Self::alloc(data.len())?;
        result.buf.extend_from_slice(data);
        Ok(result)
    }

    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    pub fn into_inner(self) -> BytesMut {
        self.buf
    }
}

impl Deref for PBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.buf.as_ref()
    }
}

impl DerefMut for PBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.buf.as_mut()
    }
}
