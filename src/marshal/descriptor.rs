use crate::client::RawField;
use crate::error::SqlRuntimeError;

/// SQL types the marshaling engine understands. Raw library codes are only
/// interpreted by [`SqlType::from_code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlType {
    /// Length-prefixed text.
    Varying,
    /// Blank-padded fixed-length text.
    Text,
    Short,
    Long,
    Int64,
    Float,
    Double,
    Time,
    Date,
    Timestamp,
    Boolean,
    Blob,
    /// Known to the library, not supported by the engine.
    Array,
    /// Column of a bare NULL literal.
    Null,
}

impl SqlType {
    /// Decode a raw type code. The low bit (nullable flag) is ignored.
    ///
    /// # Errors
    /// Returns `SqlRuntimeError::UnrecognizedType` for codes outside the table.
    pub fn from_code(code: i32) -> Result<Self, SqlRuntimeError> {
        Ok(match code & !1 {
            448 => SqlType::Varying,
            452 => SqlType::Text,
            480 | 530 => SqlType::Double,
            482 => SqlType::Float,
            496 => SqlType::Long,
            500 => SqlType::Short,
            510 => SqlType::Timestamp,
            520 => SqlType::Blob,
            540 => SqlType::Array,
            560 => SqlType::Time,
            570 => SqlType::Date,
            580 => SqlType::Int64,
            32764 => SqlType::Boolean,
            32766 => SqlType::Null,
            _ => return Err(SqlRuntimeError::UnrecognizedType(code)),
        })
    }

    /// Canonical (non-nullable) code for this type.
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            SqlType::Varying => 448,
            SqlType::Text => 452,
            SqlType::Double => 480,
            SqlType::Float => 482,
            SqlType::Long => 496,
            SqlType::Short => 500,
            SqlType::Timestamp => 510,
            SqlType::Blob => 520,
            SqlType::Array => 540,
            SqlType::Time => 560,
            SqlType::Date => 570,
            SqlType::Int64 => 580,
            SqlType::Boolean => 32764,
            SqlType::Null => 32766,
        }
    }

    /// Storage size for fixed-width types; `None` for text types, whose size comes
    /// from the descriptor.
    #[must_use]
    pub fn fixed_size(self) -> Option<usize> {
        match self {
            SqlType::Varying | SqlType::Text => None,
            SqlType::Boolean => Some(1),
            SqlType::Short => Some(2),
            SqlType::Long | SqlType::Float | SqlType::Time | SqlType::Date => Some(4),
            SqlType::Int64 | SqlType::Double | SqlType::Timestamp | SqlType::Blob => Some(8),
            SqlType::Array => Some(8),
            SqlType::Null => Some(0),
        }
    }

    fn alignment(self) -> usize {
        match self {
            SqlType::Text | SqlType::Boolean | SqlType::Null => 1,
            SqlType::Varying | SqlType::Short => 2,
            SqlType::Long
            | SqlType::Float
            | SqlType::Time
            | SqlType::Date
            | SqlType::Timestamp
            | SqlType::Blob
            | SqlType::Array => 4,
            SqlType::Int64 | SqlType::Double => 8,
        }
    }
}

/// Where one column or parameter lives inside a row buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub alias: String,
    pub field_name: String,
    pub relation_name: String,
    pub sql_type: SqlType,
    pub sub_type: i32,
    /// Declared length. For varying text this excludes the 2-byte length prefix.
    pub byte_length: usize,
    pub scale: i32,
    pub data_offset: usize,
    pub null_offset: usize,
    pub nullable: bool,
}

impl FieldDescriptor {
    /// Descriptor with no names and offsets at zero; lay it out with
    /// [`MessageLayout::assign`] before use.
    #[must_use]
    pub fn new(sql_type: SqlType, byte_length: usize) -> Self {
        Self {
            alias: String::new(),
            field_name: String::new(),
            relation_name: String::new(),
            sql_type,
            sub_type: 0,
            byte_length: sql_type.fixed_size().unwrap_or(byte_length),
            scale: 0,
            data_offset: 0,
            null_offset: 0,
            nullable: true,
        }
    }

    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.alias.clone_from(&name);
        self.field_name = name;
        self
    }

    #[must_use]
    pub fn with_scale(mut self, scale: i32) -> Self {
        self.scale = scale;
        self
    }

    /// Build a descriptor from library metadata.
    ///
    /// # Errors
    /// Returns `SqlRuntimeError::UnrecognizedType` if the raw type code is unknown.
    pub fn from_raw(raw: &RawField) -> Result<Self, SqlRuntimeError> {
        Ok(Self {
            alias: raw.alias.clone(),
            field_name: raw.field_name.clone(),
            relation_name: raw.relation_name.clone(),
            sql_type: SqlType::from_code(raw.type_code)?,
            sub_type: raw.sub_type,
            byte_length: raw.length as usize,
            scale: raw.scale,
            data_offset: raw.data_offset as usize,
            null_offset: raw.null_offset as usize,
            nullable: raw.type_code & 1 == 1,
        })
    }

    /// Inverse of [`FieldDescriptor::from_raw`].
    #[must_use]
    pub fn to_raw(&self) -> RawField {
        RawField {
            alias: self.alias.clone(),
            field_name: self.field_name.clone(),
            relation_name: self.relation_name.clone(),
            type_code: self.sql_type.code() | i32::from(self.nullable),
            sub_type: self.sub_type,
            length: u32::try_from(self.byte_length).unwrap_or(u32::MAX),
            scale: self.scale,
            data_offset: u32::try_from(self.data_offset).unwrap_or(u32::MAX),
            null_offset: u32::try_from(self.null_offset).unwrap_or(u32::MAX),
        }
    }

    /// Bytes occupied at `data_offset`, including the varying-text length prefix.
    #[must_use]
    pub fn data_size(&self) -> usize {
        match self.sql_type {
            SqlType::Varying => self.byte_length + 2,
            _ => self.byte_length,
        }
    }

    /// Name used in diagnostics.
    #[must_use]
    pub fn display_name(&self) -> &str {
        if !self.alias.is_empty() {
            &self.alias
        } else if !self.field_name.is_empty() {
            &self.field_name
        } else {
            "?"
        }
    }
}

/// Computes aligned offsets for a descriptor list the same way the library lays
/// out a message.
pub struct MessageLayout;

impl MessageLayout {
    /// Assign `data_offset` / `null_offset` to every field and return the message
    /// length.
    pub fn assign(fields: &mut [FieldDescriptor]) -> usize {
        let mut offset = 0usize;
        let mut max_align = 1usize;
        for field in fields.iter_mut() {
            let align = field.sql_type.alignment();
            max_align = max_align.max(align);
            offset = offset.next_multiple_of(align);
            field.data_offset = offset;
            offset += field.data_size();
            offset = offset.next_multiple_of(2);
            field.null_offset = offset;
            offset += 2;
        }
        offset.next_multiple_of(max_align)
    }
}

/// Widen narrow numeric columns to double and fixed text to varying text, then
/// lay the message out again. Returns the new descriptors and message length.
#[must_use]
pub fn normalize(fields: &[FieldDescriptor]) -> (Vec<FieldDescriptor>, usize) {
    let mut normalized: Vec<FieldDescriptor> = fields
        .iter()
        .map(|field| {
            let mut field = field.clone();
            match field.sql_type {
                SqlType::Short | SqlType::Long | SqlType::Int64 | SqlType::Float => {
                    field.sql_type = SqlType::Double;
                    field.byte_length = 8;
                    field.scale = 0;
                }
                SqlType::Text => field.sql_type = SqlType::Varying,
                _ => {}
            }
            field
        })
        .collect();
    let length = MessageLayout::assign(&mut normalized);
    (normalized, length)
}
