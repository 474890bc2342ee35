use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

/// Batches upstream audio before it is written to the client.
///
/// Chunks are appended until the accumulated length reaches the flush
/// threshold, at which point the whole accumulation is handed out as one
/// frame. An interruption discards the accumulation without sending it. At
/// teardown the remainder is drained once and the buffer is sealed so that
/// late chunks cannot produce another frame.
#[derive(Debug)]
pub struct OutboundAudioBuffer {
    min_flush_bytes: usize,
    state: Mutex<BufferState>,
}

#[derive(Debug, Default)]
struct BufferState {
    pending: BytesMut,
    sealed: bool,
}

impl OutboundAudioBuffer {
    pub fn new(min_flush_bytes: usize) -> Self {
        Self {
            min_flush_bytes: min_flush_bytes.max(1),
            state: Mutex::new(BufferState {
                pending: BytesMut::with_capacity(min_flush_bytes * 2),
                sealed: false,
            }),
        }
    }

    pub fn min_flush_bytes(&self) -> usize {
        self.min_flush_bytes
    }

    /// Append a chunk; returns a frame to send when the threshold is crossed.
    pub fn push(&self, chunk: &[u8]) -> Option<Bytes> {
        let mut state = self.state.lock();
        if state.sealed {
            return None;
        }
        state.pending.extend_from_slice(chunk);
        if state.pending.len() >= self.min_flush_bytes {
            Some(state.pending.split().freeze())
        } else {
            None
        }
    }

    /// Drop everything buffered. Returns the number of bytes discarded.
    pub fn discard(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.pending.len();
        state.pending.clear();
        discarded
    }

    /// Take whatever remains (even below threshold) and seal the buffer.
    ///
    /// Only the first call can return data.
    pub fn drain_final(&self) -> Option<Bytes> {
        let mut state = self.state.lock();
        state.sealed = true;
        if state.pending.is_empty() {
            None
        } else {
            Some(state.pending.split().freeze())
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
