//! Records stored in a symbol database.
//!
//! Every record is encoded with a leading flag byte that selects the width of
//! the fields that follow, so small offsets and ids take one or two bytes.

use std::fmt::Write as _;
use std::io::{Read, Write};

use super::codec::{Reader, Writer};
use crate::error::Result;

fn write_optional_string<W: Write>(writer: &mut Writer<W>, value: Option<&str>) -> Result<()>
{
    match value {
        Some(text) => writer.string(text),
        None => Ok(()),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str>
{
    value.as_deref().filter(|text| !text.is_empty())
}

/// A function of the target binary.
///
/// Offsets are relative to the module base. Functions never overlap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo
{
    /// Version independent id (0 if none)
    pub vid: u64,
    /// First byte of the function
    pub begin: u64,
    /// One past the last byte of the function
    pub end: u64,
    /// Short name, e.g. `Actor::Update`
    pub short_name: Option<String>,
    /// Full (undecorated) signature
    pub full_name: Option<String>,
}

impl FunctionInfo
{
    /// Whether `offset` lies inside `[begin, end)`.
    pub fn contains(&self, offset: u64) -> bool
    {
        self.begin <= offset && offset < self.end
    }

    /// Name used in crash reports.
    ///
    /// Falls back to `unk` when the short name is unknown; with
    /// `include_offset` the begin offset is appended in upper-case hex.
    ///
    /// ```
    /// use vidlib_core::database::FunctionInfo;
    ///
    /// let func = FunctionInfo { vid: 7, begin: 0x1a0, end: 0x1c0, short_name: None, full_name: None };
    /// assert_eq!(func.display_name(true), "unk_1A0");
    /// ```
    pub fn display_name(&self, include_offset: bool) -> String
    {
        let mut name = non_empty(&self.short_name).unwrap_or("unk").to_string();
        if include_offset {
            let _ = write!(name, "_{:X}", self.begin);
        }
        name
    }

    pub(crate) fn read<R: Read>(reader: &mut Reader<R>) -> Result<Self>
    {
        let flags = reader.u8()?;
        let begin = if flags & 0x01 != 0 {
            reader.u64()?
        } else {
            u64::from(reader.u32()?)
        };
        let end = if flags & 0x02 != 0 {
            if flags & 0x04 != 0 {
                reader.u64()?
            } else {
                u64::from(reader.u32()?)
            }
        } else {
            begin.wrapping_add(u64::from(reader.u16()?))
        };
        let short_name = if flags & 0x08 != 0 { Some(reader.string()?) } else { None };
        let full_name = if flags & 0x10 != 0 { Some(reader.string()?) } else { None };
        let vid = if flags & 0x20 != 0 {
            reader.u64()?
        } else {
            u64::from(reader.u32()?)
        };

        Ok(Self {
            vid,
            begin,
            end,
            short_name,
            full_name,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut Writer<W>) -> Result<()>
    {
        let short_name = non_empty(&self.short_name);
        let full_name = non_empty(&self.full_name);
        let length = self.end.checked_sub(self.begin).and_then(|len| u16::try_from(len).ok());

        let mut flags = 0u8;
        if self.begin > u64::from(u32::MAX) {
            flags |= 0x01;
        }
        if length.is_none() {
            flags |= 0x02;
            if self.end > u64::from(u32::MAX) {
                flags |= 0x04;
            }
        }
        if short_name.is_some() {
            flags |= 0x08;
        }
        if full_name.is_some() {
            flags |= 0x10;
        }
        if self.vid > u64::from(u32::MAX) {
            flags |= 0x20;
        }

        writer.u8(flags)?;
        if flags & 0x01 != 0 {
            writer.u64(self.begin)?;
        } else {
            writer.u32(self.begin as u32)?;
        }
        match length {
            Some(len) => writer.u16(len)?,
            None if flags & 0x04 != 0 => writer.u64(self.end)?,
            None => writer.u32(self.end as u32)?,
        }
        write_optional_string(writer, short_name)?;
        write_optional_string(writer, full_name)?;
        if flags & 0x20 != 0 {
            writer.u64(self.vid)
        } else {
            writer.u32(self.vid as u32)
        }
    }
}

/// A global variable of the target binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalInfo
{
    /// Version independent id (0 if none)
    pub vid: u64,
    /// Offset of the variable from the module base
    pub begin: u64,
    /// Variable name
    pub short_name: Option<String>,
    /// Declared type name
    pub type_name: Option<String>,
}

impl GlobalInfo
{
    pub(crate) fn read<R: Read>(reader: &mut Reader<R>) -> Result<Self>
    {
        let flags = reader.u8()?;
        let begin = if flags & 0x01 != 0 {
            reader.u64()?
        } else {
            u64::from(reader.u32()?)
        };
        let short_name = if flags & 0x02 != 0 { Some(reader.string()?) } else { None };
        let type_name = if flags & 0x04 != 0 { Some(reader.string()?) } else { None };
        let vid = if flags & 0x08 != 0 {
            reader.u64()?
        } else {
            u64::from(reader.u32()?)
        };

        Ok(Self {
            vid,
            begin,
            short_name,
            type_name,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut Writer<W>) -> Result<()>
    {
        let short_name = non_empty(&self.short_name);
        let type_name = non_empty(&self.type_name);

        let mut flags = 0u8;
        if self.begin > u64::from(u32::MAX) {
            flags |= 0x01;
        }
        if short_name.is_some() {
            flags |= 0x02;
        }
        if type_name.is_some() {
            flags |= 0x04;
        }
        if self.vid > u64::from(u32::MAX) {
            flags |= 0x08;
        }

        writer.u8(flags)?;
        if flags & 0x01 != 0 {
            writer.u64(self.begin)?;
        } else {
            writer.u32(self.begin as u32)?;
        }
        write_optional_string(writer, short_name)?;
        write_optional_string(writer, type_name)?;
        if flags & 0x08 != 0 {
            writer.u64(self.vid)
        } else {
            writer.u32(self.vid as u32)
        }
    }
}

/// A field of a [`TypeInfo`].
///
/// Field ids are only unique inside the owning type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo
{
    /// Identifier of the field within its type
    pub field_id: u32,
    /// Offset of the field from the start of the type, if known
    pub begin: Option<i32>,
    /// Field name
    pub short_name: Option<String>,
    /// Declared type name
    pub type_name: Option<String>,
}

impl FieldInfo
{
    pub(crate) fn read<R: Read>(reader: &mut Reader<R>) -> Result<Self>
    {
        let flags = reader.u8()?;
        let begin = if flags & 0x01 != 0 {
            if flags & 0x02 != 0 {
                Some(reader.i32()?)
            } else {
                Some(i32::from(reader.u16()?))
            }
        } else {
            None
        };
        let short_name = if flags & 0x04 != 0 { Some(reader.string()?) } else { None };
        let type_name = if flags & 0x08 != 0 { Some(reader.string()?) } else { None };
        let field_id = match (flags & 0x10 != 0, flags & 0x20 != 0) {
            (true, true) => u32::from(reader.u8()?),
            (true, false) => u32::from(reader.u16()?),
            (false, _) => reader.u32()?,
        };

        Ok(Self {
            field_id,
            begin,
            short_name,
            type_name,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut Writer<W>) -> Result<()>
    {
        let short_name = non_empty(&self.short_name);
        let type_name = non_empty(&self.type_name);
        let narrow_begin = self.begin.and_then(|begin| u16::try_from(begin).ok());

        let mut flags = 0u8;
        if self.begin.is_some() {
            flags |= 0x01;
            if narrow_begin.is_none() {
                flags |= 0x02;
            }
        }
        if short_name.is_some() {
            flags |= 0x04;
        }
        if type_name.is_some() {
            flags |= 0x08;
        }
        if self.field_id <= u32::from(u8::MAX) {
            flags |= 0x30;
        } else if self.field_id <= u32::from(u16::MAX) {
            flags |= 0x10;
        }

        writer.u8(flags)?;
        match (self.begin, narrow_begin) {
            (Some(_), Some(narrow)) => writer.u16(narrow)?,
            (Some(begin), None) => writer.i32(begin)?,
            (None, _) => {}
        }
        write_optional_string(writer, short_name)?;
        write_optional_string(writer, type_name)?;
        match flags & 0x30 {
            0x30 => writer.u8(self.field_id as u8),
            0x10 => writer.u16(self.field_id as u16),
            _ => writer.u32(self.field_id),
        }
    }
}

/// A type of the target binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo
{
    /// Version independent id (0 if none)
    pub vid: u64,
    /// Offset of the type's primary vtable from the module base, 0 if none
    pub vtable: u64,
    /// Display name, e.g. `class Actor`
    pub name: String,
    /// Size of one instance in bytes, if known
    pub size: Option<i32>,
    /// Known fields in declaration order; empty when unknown
    pub fields: Vec<FieldInfo>,
}

impl TypeInfo
{
    /// Look up a field by id.
    ///
    /// Fields are usually stored so that id `n` sits at index `n - 1`; that
    /// slot is checked first and the list is scanned only on a miss.
    pub fn field(&self, field_id: u32) -> Option<&FieldInfo>
    {
        let guess = usize::try_from(field_id).ok().and_then(|id| id.checked_sub(1));
        if let Some(field) = guess.and_then(|index| self.fields.get(index)) {
            if field.field_id == field_id {
                return Some(field);
            }
        }
        self.fields.iter().find(|field| field.field_id == field_id)
    }

    pub(crate) fn read<R: Read>(reader: &mut Reader<R>) -> Result<Self>
    {
        let flags = reader.u8()?;
        let vtable = if flags & 0x01 != 0 {
            if flags & 0x02 != 0 {
                reader.u64()?
            } else {
                u64::from(reader.u32()?)
            }
        } else {
            0
        };
        let name = reader.string()?;
        let size = if flags & 0x04 != 0 { Some(reader.i32()?) } else { None };
        let vid = if flags & 0x08 != 0 {
            reader.u64()?
        } else {
            u64::from(reader.u32()?)
        };
        let mut fields = Vec::new();
        if flags & 0x10 != 0 {
            let count = reader.count("field")?;
            fields.reserve(count.min(256));
            for _ in 0..count {
                fields.push(FieldInfo::read(reader)?);
            }
        }

        Ok(Self {
            vid,
            vtable,
            name,
            size,
            fields,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut Writer<W>) -> Result<()>
    {
        let mut flags = 0u8;
        if self.vtable != 0 {
            flags |= 0x01;
            if self.vtable > u64::from(u32::MAX) {
                flags |= 0x02;
            }
        }
        if self.size.is_some() {
            flags |= 0x04;
        }
        if self.vid > u64::from(u32::MAX) {
            flags |= 0x08;
        }
        if !self.fields.is_empty() {
            flags |= 0x10;
        }

        writer.u8(flags)?;
        if flags & 0x02 != 0 {
            writer.u64(self.vtable)?;
        } else if flags & 0x01 != 0 {
            writer.u32(self.vtable as u32)?;
        }
        writer.string(&self.name)?;
        if let Some(size) = self.size {
            writer.i32(size)?;
        }
        if flags & 0x08 != 0 {
            writer.u64(self.vid)?;
        } else {
            writer.u32(self.vid as u32)?;
        }
        if !self.fields.is_empty() {
            writer.count(self.fields.len(), "field")?;
            for field in &self.fields {
                field.write(writer)?;
            }
        }
        Ok(())
    }
}

/// One known instance of a type, e.g. an entry of a static table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInstanceInfo
{
    /// Start offset, if known
    pub begin: Option<i32>,
    /// End offset, if known
    pub end: Option<i32>,
    /// VID of the instance's type; `None` when the type is unknown
    pub type_vid: Option<u64>,
}

impl TypeInstanceInfo
{
    fn read_offset<R: Read>(reader: &mut Reader<R>, present: bool, as_u8: bool, as_u16: bool) -> Result<Option<i32>>
    {
        if !present {
            return Ok(None);
        }
        let value = if as_u8 {
            i32::from(reader.u8()?)
        } else if as_u16 {
            i32::from(reader.u16()?)
        } else {
            reader.i32()?
        };
        Ok(Some(value))
    }

    /// Read one entry; `type_vid` is `Some` only if `known_type` accepts it.
    pub(crate) fn read<R: Read>(reader: &mut Reader<R>, known_type: impl Fn(u64) -> bool) -> Result<Self>
    {
        let flags = reader.u8()?;
        let begin = Self::read_offset(reader, flags & 0x01 != 0, flags & 0x02 != 0, flags & 0x04 != 0)?;
        let end = Self::read_offset(reader, flags & 0x08 != 0, flags & 0x10 != 0, flags & 0x20 != 0)?;
        let vid = if flags & 0x40 != 0 {
            u64::from(reader.u16()?)
        } else if flags & 0x80 != 0 {
            u64::from(reader.u32()?)
        } else {
            reader.u64()?
        };

        Ok(Self {
            begin,
            end,
            type_vid: (vid != 0 && known_type(vid)).then_some(vid),
        })
    }

    fn offset_flags(value: Option<i32>, present: u8, as_u8: u8, as_u16: u8) -> u8
    {
        match value {
            None => 0,
            Some(v) if u8::try_from(v).is_ok() => present | as_u8,
            Some(v) if u16::try_from(v).is_ok() => present | as_u16,
            Some(_) => present,
        }
    }

    fn write_offset<W: Write>(writer: &mut Writer<W>, value: Option<i32>) -> Result<()>
    {
        match value {
            None => Ok(()),
            Some(v) => {
                if let Ok(narrow) = u8::try_from(v) {
                    writer.u8(narrow)
                } else if let Ok(narrow) = u16::try_from(v) {
                    writer.u16(narrow)
                } else {
                    writer.i32(v)
                }
            }
        }
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut Writer<W>) -> Result<()>
    {
        let vid = self.type_vid.unwrap_or(0);
        let mut flags = Self::offset_flags(self.begin, 0x01, 0x02, 0x04) | Self::offset_flags(self.end, 0x08, 0x10, 0x20);
        if vid <= u64::from(u16::MAX) {
            flags |= 0x40;
        } else if vid <= u64::from(u32::MAX) {
            flags |= 0x80;
        }

        writer.u8(flags)?;
        Self::write_offset(writer, self.begin)?;
        Self::write_offset(writer, self.end)?;
        if flags & 0x40 != 0 {
            writer.u16(vid as u16)
        } else if flags & 0x80 != 0 {
            writer.u32(vid as u32)
        } else {
            writer.u64(vid)
        }
    }
}

/// A (contract, concrete) pair discovered by the database generator.
///
/// Consumed by the second registration phase when a context is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypeRegistration
{
    /// Fixed id of the contract (interface)
    pub contract_id: u32,
    /// Fixed id of the concrete implementation
    pub concrete_id: u32,
    /// Vtable offset from the module base; `None` for types without a vtable
    pub vtable_offset: Option<i32>,
    /// Offset of that vtable inside the complete object
    pub offset_in_type: i32,
}

impl TypeRegistration
{
    pub(crate) fn read<R: Read>(reader: &mut Reader<R>) -> Result<Self>
    {
        let flags = reader.u8()?;
        let contract_id = if flags & 0x01 != 0 {
            u32::from(reader.u16()?)
        } else {
            reader.u32()?
        };
        let concrete_id = if flags & 0x02 != 0 {
            u32::from(reader.u16()?)
        } else {
            reader.u32()?
        };
        let vtable_offset = if flags & 0x04 != 0 { Some(reader.i32()?) } else { None };
        let offset_in_type = if flags & 0x08 != 0 {
            if flags & 0x10 != 0 {
                i32::from(reader.u8()?)
            } else if flags & 0x20 != 0 {
                i32::from(reader.u16()?)
            } else {
                reader.i32()?
            }
        } else {
            0
        };

        Ok(Self {
            contract_id,
            concrete_id,
            vtable_offset: vtable_offset.filter(|offset| *offset >= 0),
            offset_in_type,
        })
    }

    pub(crate) fn write<W: Write>(&self, writer: &mut Writer<W>) -> Result<()>
    {
        let vtable_offset = self.vtable_offset.filter(|offset| *offset >= 0);

        let mut flags = 0u8;
        if self.contract_id <= u32::from(u16::MAX) {
            flags |= 0x01;
        }
        if self.concrete_id <= u32::from(u16::MAX) {
            flags |= 0x02;
        }
        if vtable_offset.is_some() {
            flags |= 0x04;
        }
        if self.offset_in_type != 0 {
            flags |= 0x08;
            if u8::try_from(self.offset_in_type).is_ok() {
                flags |= 0x10;
            } else if u16::try_from(self.offset_in_type).is_ok() {
                flags |= 0x20;
            }
        }

        writer.u8(flags)?;
        if flags & 0x01 != 0 {
            writer.u16(self.contract_id as u16)?;
        } else {
            writer.u32(self.contract_id)?;
        }
        if flags & 0x02 != 0 {
            writer.u16(self.concrete_id as u16)?;
        } else {
            writer.u32(self.concrete_id)?;
        }
        if let Some(offset) = vtable_offset {
            writer.i32(offset)?;
        }
        if flags & 0x08 != 0 {
            if flags & 0x10 != 0 {
                writer.u8(self.offset_in_type as u8)?;
            } else if flags & 0x20 != 0 {
                writer.u16(self.offset_in_type as u16)?;
            } else {
                writer.i32(self.offset_in_type)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    fn encode(write: impl FnOnce(&mut Writer<Vec<u8>>) -> Result<()>) -> Vec<u8>
    {
        let mut writer = Writer::new(Vec::new());
        write(&mut writer).unwrap();
        writer.into_inner()
    }

    #[test]
    fn test_short_function_uses_length()
    {
        let func = FunctionInfo {
            vid: 12,
            begin: 0x1000,
            end: 0x1040,
            short_name: Some("Actor::Update".to_string()),
            full_name: None,
        };
        let bytes = encode(|w| func.write(w));

        assert_eq!(bytes[0], 0x08);
        // begin u32, then u16 length
        assert_eq!(&bytes[1..5], &0x1000u32.to_le_bytes());
        assert_eq!(&bytes[5..7], &0x40u16.to_le_bytes());

        let decoded = FunctionInfo::read(&mut Reader::new(bytes.as_slice())).unwrap();
        assert_eq!(decoded, func);
    }

    #[test]
    fn test_long_function_uses_explicit_end()
    {
        let func = FunctionInfo {
            vid: u64::from(u32::MAX) + 1,
            begin: 0x1_0000_0000,
            end: 0x1_0002_0000,
            short_name: None,
            full_name: Some("void __cdecl Main(void)".to_string()),
        };
        let bytes = encode(|w| func.write(w));
        assert_eq!(bytes[0], 0x01 | 0x02 | 0x04 | 0x10 | 0x20);
        assert_eq!(FunctionInfo::read(&mut Reader::new(bytes.as_slice())).unwrap(), func);
    }

    #[test]
    fn test_empty_names_are_not_written()
    {
        let global = GlobalInfo {
            vid: 3,
            begin: 0x20,
            short_name: Some(String::new()),
            type_name: None,
        };
        let bytes = encode(|w| global.write(w));
        assert_eq!(bytes, vec![0, 0x20, 0, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn test_field_id_width_flags()
    {
        let narrow = FieldInfo {
            field_id: 7,
            begin: Some(0x18),
            short_name: None,
            type_name: None,
        };
        let bytes = encode(|w| narrow.write(w));
        assert_eq!(bytes, vec![0x31, 0x18, 0x00, 7]);

        let wide = FieldInfo {
            field_id: 70_000,
            begin: Some(-8),
            short_name: Some("next".into()),
            type_name: Some("Node *".into()),
        };
        let bytes = encode(|w| wide.write(w));
        assert_eq!(bytes[0], 0x01 | 0x02 | 0x04 | 0x08);
        assert_eq!(FieldInfo::read(&mut Reader::new(bytes.as_slice())).unwrap(), wide);
    }

    #[test]
    fn test_field_lookup_prefers_index()
    {
        let field = |field_id, begin| FieldInfo {
            field_id,
            begin: Some(begin),
            short_name: None,
            type_name: None,
        };
        let info = TypeInfo {
            vid: 1,
            vtable: 0,
            name: "struct Node".into(),
            size: Some(16),
            fields: vec![field(1, 0), field(2, 8), field(9, 12)],
        };

        assert_eq!(info.field(2).unwrap().begin, Some(8));
        assert_eq!(info.field(9).unwrap().begin, Some(12));
        assert!(info.field(0).is_none());
        assert!(info.field(3).is_none());
    }

    #[test]
    fn test_registration_without_vtable()
    {
        let registration = TypeRegistration {
            contract_id: 70_000,
            concrete_id: 4,
            vtable_offset: None,
            offset_in_type: 0x110,
        };
        let bytes = encode(|w| registration.write(w));
        assert_eq!(bytes[0], 0x02 | 0x08 | 0x20);
        assert_eq!(TypeRegistration::read(&mut Reader::new(bytes.as_slice())).unwrap(), registration);
    }

    #[test]
    fn test_instance_drops_unknown_type()
    {
        let entry = TypeInstanceInfo {
            begin: Some(300),
            end: None,
            type_vid: Some(99),
        };
        let bytes = encode(|w| entry.write(w));
        assert_eq!(bytes[0], 0x01 | 0x04 | 0x40);

        let known = TypeInstanceInfo::read(&mut Reader::new(bytes.as_slice()), |vid| vid == 99).unwrap();
        assert_eq!(known, entry);
        let unknown = TypeInstanceInfo::read(&mut Reader::new(bytes.as_slice()), |_| false).unwrap();
        assert_eq!(unknown.type_vid, None);
    }
}
