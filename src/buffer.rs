//! Buffer headers: the single-owner descriptor handed between ports.
//!
//! A [`BufferHeader`] is never cloned. Whoever holds the value holds write
//! access; handing it to a component (`empty_this_buffer`,
//! `fill_this_buffer`) or back to the client (the done callbacks) moves it.
//! Only the supplier that created a header may destroy it, which the public
//! API enforces by making `free_buffer` the sole consuming entry point.

use crate::error::{Error, Result};
use crate::metadata::{BufferFlags, BufferId, ComponentId, Mark};
use std::time::Duration;

/// Where the payload memory came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOrigin {
    /// Allocated by the supplying component (`allocate_buffer` or a tunnel supplier).
    Allocated,
    /// Supplied by the client through `use_buffer`; handed back on free.
    External,
}

/// Descriptor of one payload chunk.
pub struct BufferHeader {
    id: BufferId,
    data: Vec<u8>,
    origin: MemoryOrigin,
    offset: usize,
    filled_len: usize,
    timestamp: Duration,
    flags: BufferFlags,
    mark: Option<Mark>,
    input_port: Option<usize>,
    output_port: Option<usize>,
    supplier: ComponentId,
    app_private: u64,
}

impl BufferHeader {
    /// Allocate a zeroed payload of `size` bytes owned by `supplier`.
    pub(crate) fn allocate(size: usize, supplier: ComponentId, app_private: u64) -> Result<Self> {
        if size == 0 {
            return Err(Error::InsufficientResources(
                "cannot allocate a zero-sized buffer".into(),
            ));
        }
        Ok(Self::with_memory(
            vec![0; size],
            MemoryOrigin::Allocated,
            supplier,
            app_private,
        ))
    }

    /// Wrap client-supplied memory.
    pub(crate) fn wrap(memory: Vec<u8>, supplier: ComponentId, app_private: u64) -> Result<Self> {
        if memory.is_empty() {
            return Err(Error::BadParameter("use_buffer memory is empty".into()));
        }
        Ok(Self::with_memory(
            memory,
            MemoryOrigin::External,
            supplier,
            app_private,
        ))
    }

    fn with_memory(
        data: Vec<u8>,
        origin: MemoryOrigin,
        supplier: ComponentId,
        app_private: u64,
    ) -> Self {
        Self {
            id: BufferId::next(),
            data,
            origin,
            offset: 0,
            filled_len: 0,
            timestamp: Duration::ZERO,
            flags: BufferFlags::default(),
            mark: None,
            input_port: None,
            output_port: None,
            supplier,
            app_private,
        }
    }

    /// Destroy the header, returning client-supplied memory if any.
    pub(crate) fn release(self) -> Option<Vec<u8>> {
        match self.origin {
            MemoryOrigin::External => Some(self.data),
            MemoryOrigin::Allocated => None,
        }
    }

    /// Unique identity of this header.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Component allowed to free this header.
    pub fn supplier(&self) -> ComponentId {
        self.supplier
    }

    /// Where the payload memory came from.
    pub fn origin(&self) -> MemoryOrigin {
        self.origin
    }

    /// Opaque client value given at allocation time.
    pub fn app_private(&self) -> u64 {
        self.app_private
    }

    /// Total payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Offset of the valid region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the valid region.
    pub fn filled_len(&self) -> usize {
        self.filled_len
    }

    /// Check if no valid data is present.
    pub fn is_empty(&self) -> bool {
        self.filled_len == 0
    }

    /// The valid region of the payload.
    pub fn filled(&self) -> &[u8] {
        &self.data[self.offset..self.offset + self.filled_len]
    }

    /// The whole payload, for producers writing in place.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Set the valid region after writing through [`data_mut`](Self::data_mut).
    pub fn set_filled(&mut self, offset: usize, len: usize) -> Result<()> {
        if offset.checked_add(len).is_none_or(|end| end > self.data.len()) {
            return Err(Error::BadParameter(format!(
                "region {}+{} exceeds capacity {}",
                offset,
                len,
                self.data.len()
            )));
        }
        self.offset = offset;
        self.filled_len = len;
        Ok(())
    }

    /// Copy `bytes` to the start of the payload and mark them valid.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.data.len() {
            return Err(Error::BadParameter(format!(
                "{} bytes do not fit a {} byte buffer",
                bytes.len(),
                self.data.len()
            )));
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.offset = 0;
        self.filled_len = bytes.len();
        Ok(())
    }

    /// Forget the payload contents, flags and mark.
    ///
    /// Used when a flushed buffer goes back to its owner unprocessed.
    pub fn reset(&mut self) {
        self.offset = 0;
        self.filled_len = 0;
        self.flags = BufferFlags::default();
        self.mark = None;
    }

    /// Presentation timestamp.
    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    /// Set the presentation timestamp.
    pub fn set_timestamp(&mut self, timestamp: Duration) {
        self.timestamp = timestamp;
    }

    /// Buffer flags.
    pub fn flags(&self) -> BufferFlags {
        self.flags
    }

    /// Mutable buffer flags.
    pub fn flags_mut(&mut self) -> &mut BufferFlags {
        &mut self.flags
    }

    /// The latency mark, if any.
    pub fn mark(&self) -> Option<Mark> {
        self.mark
    }

    /// Attach a latency mark.
    pub fn set_mark(&mut self, mark: Mark) {
        self.mark = Some(mark);
    }

    /// Detach the latency mark.
    pub fn take_mark(&mut self) -> Option<Mark> {
        self.mark.take()
    }

    /// Input port this header is currently bound to.
    pub fn input_port(&self) -> Option<usize> {
        self.input_port
    }

    /// Output port this header is currently bound to.
    pub fn output_port(&self) -> Option<usize> {
        self.output_port
    }

    pub(crate) fn set_input_port(&mut self, port: Option<usize>) {
        self.input_port = port;
    }

    pub(crate) fn set_output_port(&mut self, port: Option<usize>) {
        self.output_port = port;
    }
}

impl std::fmt::Debug for BufferHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferHeader")
            .field("id", &self.id)
            .field("capacity", &self.data.len())
            .field("offset", &self.offset)
            .field("filled_len", &self.filled_len)
            .field("timestamp", &self.timestamp)
            .field("flags", &self.flags)
            .field("mark", &self.mark)
            .field("input_port", &self.input_port)
            .field("output_port", &self.output_port)
            .field("supplier", &self.supplier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_header(size: usize) -> BufferHeader {
        BufferHeader::allocate(size, ComponentId::next(), 0).unwrap()
    }

    #[test]
    fn test_allocate() {
        let header = make_header(64);
        assert_eq!(header.capacity(), 64);
        assert!(header.is_empty());
        assert_eq!(header.origin(), MemoryOrigin::Allocated);
        assert!(header.mark().is_none());
    }

    #[test]
    fn test_zero_sized_allocation_fails() {
        let err = BufferHeader::allocate(0, ComponentId::next(), 0).unwrap_err();
        assert!(matches!(err, Error::InsufficientResources(_)));
    }

    #[test]
    fn test_write_and_filled() {
        let mut header = make_header(8);
        header.write(b"abc").unwrap();
        assert_eq!(header.filled(), b"abc");
        assert_eq!(header.filled_len(), 3);

        assert!(header.write(&[0; 9]).is_err());
        // Failed write leaves previous contents alone.
        assert_eq!(header.filled(), b"abc");
    }

    #[test]
    fn test_set_filled_bounds() {
        let mut header = make_header(8);
        header.data_mut()[2..4].copy_from_slice(b"hi");
        header.set_filled(2, 2).unwrap();
        assert_eq!(header.filled(), b"hi");
        assert!(header.set_filled(6, 3).is_err());
        assert!(header.set_filled(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_reset_clears_flags_and_mark() {
        let mut header = make_header(8);
        header.write(b"data").unwrap();
        header.flags_mut().set_eos(true);
        header.set_mark(Mark::new(ComponentId::next(), 1));

        header.reset();
        assert!(header.is_empty());
        assert!(header.flags().is_empty());
        assert!(header.mark().is_none());
    }

    #[test]
    fn test_release_returns_external_memory() {
        let owner = ComponentId::next();
        let header = BufferHeader::wrap(vec![1, 2, 3], owner, 9).unwrap();
        assert_eq!(header.origin(), MemoryOrigin::External);
        assert_eq!(header.app_private(), 9);
        assert_eq!(header.release(), Some(vec![1, 2, 3]));

        let allocated = make_header(4);
        assert_eq!(allocated.release(), None);
    }
}
