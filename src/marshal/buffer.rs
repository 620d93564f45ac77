use crate::error::SqlRuntimeError;

/// Fixed-length message buffer. Every access is bounds-checked against the
/// buffer length; descriptors that point outside it produce `BufferOverrun`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowBuffer {
    bytes: Vec<u8>,
}

impl RowBuffer {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            bytes: vec![0; len],
        }
    }

    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Zero the whole buffer.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }

    fn overrun(&self, offset: usize, len: usize) -> SqlRuntimeError {
        SqlRuntimeError::BufferOverrun {
            offset,
            len,
            buffer_len: self.bytes.len(),
        }
    }

    /// # Errors
    /// Returns `SqlRuntimeError::BufferOverrun` when the range leaves the buffer.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&[u8], SqlRuntimeError> {
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| self.overrun(offset, len))
    }

    /// # Errors
    /// Returns `SqlRuntimeError::BufferOverrun` when the range leaves the buffer.
    pub fn slice_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8], SqlRuntimeError> {
        let err = self.overrun(offset, len);
        offset
            .checked_add(len)
            .and_then(|end| self.bytes.get_mut(offset..end))
            .ok_or(err)
    }

    pub(crate) fn read<const N: usize>(&self, offset: usize) -> Result<[u8; N], SqlRuntimeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.slice(offset, N)?);
        Ok(out)
    }

    pub(crate) fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), SqlRuntimeError> {
        self.slice_mut(offset, data.len())?.copy_from_slice(data);
        Ok(())
    }

    pub(crate) fn read_i16(&self, offset: usize) -> Result<i16, SqlRuntimeError> {
        self.read(offset).map(i16::from_le_bytes)
    }

    pub(crate) fn read_u16(&self, offset: usize) -> Result<u16, SqlRuntimeError> {
        self.read(offset).map(u16::from_le_bytes)
    }

    pub(crate) fn read_i32(&self, offset: usize) -> Result<i32, SqlRuntimeError> {
        self.read(offset).map(i32::from_le_bytes)
    }

    pub(crate) fn read_u32(&self, offset: usize) -> Result<u32, SqlRuntimeError> {
        self.read(offset).map(u32::from_le_bytes)
    }

    pub(crate) fn read_i64(&self, offset: usize) -> Result<i64, SqlRuntimeError> {
        self.read(offset).map(i64::from_le_bytes)
    }

    pub(crate) fn read_f32(&self, offset: usize) -> Result<f32, SqlRuntimeError> {
        self.read(offset).map(f32::from_le_bytes)
    }

    pub(crate) fn read_f64(&self, offset: usize) -> Result<f64, SqlRuntimeError> {
        self.read(offset).map(f64::from_le_bytes)
    }
}
