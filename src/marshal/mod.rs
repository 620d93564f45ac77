//! Row-buffer marshaling.
//!
//! Offsets, lengths and nullability all come from [`FieldDescriptor`]s, so encoding
//! and decoding are pure functions of `(descriptor, buffer)` in each direction.

mod buffer;
mod codec;
mod descriptor;

pub use buffer::RowBuffer;
pub use codec::{BlobWriter, decode, decode_row, encode, encode_row, encode_value};
pub use descriptor::{FieldDescriptor, MessageLayout, SqlType, normalize};
