//! Constant pool decoding, lookup and append
//!
//! Entries are kept in their decoded-but-raw form (UTF-8 constants as the
//! original modified UTF-8 bytes, numbers as bit patterns) so an untouched
//! pool re-encodes byte for byte. New entries are only ever appended, which
//! keeps every existing index valid.

use super::bytes::{ByteReader, ByteWriter};
use super::mutf8;
use crate::domain::{ClassFormatError, TransformError};

/// Highest index a constant pool can hold (`constant_pool_count` is a `u16`)
const MAX_INDEX: usize = u16::MAX as usize - 1;

/// One constant pool entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Utf8(Vec<u8>),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class(u16),
    String(u16),
    Fieldref(u16, u16),
    Methodref(u16, u16),
    InterfaceMethodref(u16, u16),
    NameAndType(u16, u16),
    MethodHandle(u8, u16),
    MethodType(u16),
    Dynamic(u16, u16),
    InvokeDynamic(u16, u16),
    Module(u16),
    Package(u16),
    /// Index 0 and the slot after a `Long`/`Double`
    Unusable,
}

impl Constant {
    fn tag(&self) -> u8 {
        match self {
            Self::Utf8(_) => 1,
            Self::Integer(_) => 3,
            Self::Float(_) => 4,
            Self::Long(_) => 5,
            Self::Double(_) => 6,
            Self::Class(_) => 7,
            Self::String(_) => 8,
            Self::Fieldref(..) => 9,
            Self::Methodref(..) => 10,
            Self::InterfaceMethodref(..) => 11,
            Self::NameAndType(..) => 12,
            Self::MethodHandle(..) => 15,
            Self::MethodType(_) => 16,
            Self::Dynamic(..) => 17,
            Self::InvokeDynamic(..) => 18,
            Self::Module(_) => 19,
            Self::Package(_) => 20,
            Self::Unusable => 0,
        }
    }

    fn is_wide(&self) -> bool {
        matches!(self, Self::Long(_) | Self::Double(_))
    }

    fn read(reader: &mut ByteReader<'_>, index: u16) -> Result<Self, ClassFormatError> {
        let tag = reader.u8()?;
        Ok(match tag {
            1 => {
                let len = reader.u16()?;
                Self::Utf8(reader.bytes(usize::from(len))?.to_vec())
            }
            3 => Self::Integer(reader.u32()?),
            4 => Self::Float(reader.u32()?),
            5 => Self::Long(reader.u64()?),
            6 => Self::Double(reader.u64()?),
            7 => Self::Class(reader.u16()?),
            8 => Self::String(reader.u16()?),
            9 => Self::Fieldref(reader.u16()?, reader.u16()?),
            10 => Self::Methodref(reader.u16()?, reader.u16()?),
            11 => Self::InterfaceMethodref(reader.u16()?, reader.u16()?),
            12 => Self::NameAndType(reader.u16()?, reader.u16()?),
            15 => Self::MethodHandle(reader.u8()?, reader.u16()?),
            16 => Self::MethodType(reader.u16()?),
            17 => Self::Dynamic(reader.u16()?, reader.u16()?),
            18 => Self::InvokeDynamic(reader.u16()?, reader.u16()?),
            19 => Self::Module(reader.u16()?),
            20 => Self::Package(reader.u16()?),
            _ => return Err(ClassFormatError::UnknownConstantTag { tag, index }),
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        if matches!(self, Self::Unusable) {
            return;
        }
        out.put_u8(self.tag());
        match self {
            Self::Utf8(bytes) => {
                // Length was validated on the way in (decode or `add_utf8`)
                out.put_u16(bytes.len() as u16);
                out.put_bytes(bytes);
            }
            Self::Integer(v) | Self::Float(v) => out.put_u32(*v),
            Self::Long(v) | Self::Double(v) => out.put_u64(*v),
            Self::Class(i)
            | Self::String(i)
            | Self::MethodType(i)
            | Self::Module(i)
            | Self::Package(i) => out.put_u16(*i),
            Self::Fieldref(a, b)
            | Self::Methodref(a, b)
            | Self::InterfaceMethodref(a, b)
            | Self::NameAndType(a, b)
            | Self::Dynamic(a, b)
            | Self::InvokeDynamic(a, b) => {
                out.put_u16(*a);
                out.put_u16(*b);
            }
            Self::MethodHandle(kind, i) => {
                out.put_u8(*kind);
                out.put_u16(*i);
            }
            Self::Unusable => {}
        }
    }
}

/// The constant pool of one class, indexed from 1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    #[must_use]
    pub fn new() -> Self {
        Self { entries: vec![Constant::Unusable] }
    }

    /// # Errors
    /// Returns an error on truncated input or an unknown tag
    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        let count = reader.u16()?;
        let mut entries = Vec::with_capacity(usize::from(count));
        entries.push(Constant::Unusable);

        let mut index = 1u16;
        while index < count {
            let constant = Constant::read(reader, index)?;
            let slots = if constant.is_wide() { 2 } else { 1 };
            let next = index
                .checked_add(slots)
                .filter(|&next| next <= count)
                .ok_or(ClassFormatError::ConstantPoolOverrun { index })?;
            entries.push(constant);
            if slots == 2 {
                entries.push(Constant::Unusable);
            }
            index = next;
        }
        Ok(Self { entries })
    }

    pub fn write(&self, out: &mut Vec<u8>) {
        // Bounded by MAX_INDEX in `push`
        out.put_u16(self.entries.len() as u16);
        for entry in &self.entries[1..] {
            entry.write(out);
        }
    }

    /// Number of slots including index 0 (the `constant_pool_count` field)
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(usize::from(index)).filter(|c| !matches!(c, Constant::Unusable))
    }

    /// Raw modified UTF-8 bytes of a `Utf8` constant
    ///
    /// # Errors
    /// Returns [`ClassFormatError::BadConstantIndex`] if `index` is not a `Utf8`
    pub fn utf8_bytes(&self, index: u16) -> Result<&[u8], ClassFormatError> {
        match self.get(index) {
            Some(Constant::Utf8(bytes)) => Ok(bytes),
            _ => Err(ClassFormatError::BadConstantIndex { index, expected: "Utf8" }),
        }
    }

    /// Decoded text of a `Utf8` constant
    ///
    /// # Errors
    /// Returns an error if `index` is not a well-formed `Utf8` constant
    pub fn utf8(&self, index: u16) -> Result<String, ClassFormatError> {
        mutf8::decode(self.utf8_bytes(index)?).ok_or(ClassFormatError::InvalidUtf8 { index })
    }

    /// Binary name of the class referenced by a `Class` constant
    ///
    /// # Errors
    /// Returns an error if `index` is not a `Class` constant naming a `Utf8`
    pub fn class_name(&self, index: u16) -> Result<String, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Class(name)) => self.utf8(*name),
            _ => Err(ClassFormatError::BadConstantIndex { index, expected: "Class" }),
        }
    }

    /// Index of an existing entry equal to `constant`
    #[must_use]
    pub fn find(&self, constant: &Constant) -> Option<u16> {
        self.entries
            .iter()
            .position(|c| c == constant)
            .filter(|&i| i > 0)
            .and_then(|i| u16::try_from(i).ok())
    }

    fn push(&mut self, constant: Constant) -> Result<u16, TransformError> {
        let slots = if constant.is_wide() { 2 } else { 1 };
        if self.entries.len() - 1 + slots > MAX_INDEX {
            return Err(TransformError::ConstantPoolOverflow);
        }
        let index = u16::try_from(self.entries.len()).map_err(|_| TransformError::ConstantPoolOverflow)?;
        let wide = constant.is_wide();
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    fn find_or_push(&mut self, constant: Constant) -> Result<u16, TransformError> {
        match self.find(&constant) {
            Some(index) => Ok(index),
            None => self.push(constant),
        }
    }

    /// # Errors
    /// Fails if the pool is full or the encoded text exceeds 65535 bytes
    pub fn add_utf8(&mut self, text: &str) -> Result<u16, TransformError> {
        let bytes = mutf8::encode(text);
        if bytes.len() > usize::from(u16::MAX) {
            return Err(TransformError::AttributeTooLarge("CONSTANT_Utf8"));
        }
        self.find_or_push(Constant::Utf8(bytes))
    }

    /// # Errors
    /// Fails if the pool is full
    pub fn add_class(&mut self, name: &str) -> Result<u16, TransformError> {
        let name = self.add_utf8(name)?;
        self.find_or_push(Constant::Class(name))
    }

    /// # Errors
    /// Fails if the pool is full
    pub fn add_string(&mut self, text: &str) -> Result<u16, TransformError> {
        let text = self.add_utf8(text)?;
        self.find_or_push(Constant::String(text))
    }

    /// # Errors
    /// Fails if the pool is full
    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, TransformError> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(descriptor)?;
        self.find_or_push(Constant::NameAndType(name, descriptor))
    }

    /// # Errors
    /// Fails if the pool is full
    pub fn add_methodref(
        &mut self,
        class: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, TransformError> {
        let class = self.add_class(class)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.find_or_push(Constant::Methodref(class, name_and_type))
    }

    /// Index of an existing `String` constant for `text`, without appending
    #[must_use]
    pub fn find_string(&self, text: &str) -> Option<u16> {
        let utf8 = self.find(&Constant::Utf8(mutf8::encode(text)))?;
        self.find(&Constant::String(utf8))
    }

    /// Index of an existing `Methodref`, without appending
    #[must_use]
    pub fn find_methodref(&self, class: &str, name: &str, descriptor: &str) -> Option<u16> {
        let class_name = self.find(&Constant::Utf8(mutf8::encode(class)))?;
        let class = self.find(&Constant::Class(class_name))?;
        let name = self.find(&Constant::Utf8(mutf8::encode(name)))?;
        let descriptor = self.find(&Constant::Utf8(mutf8::encode(descriptor)))?;
        let name_and_type = self.find(&Constant::NameAndType(name, descriptor))?;
        self.find(&Constant::Methodref(class, name_and_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_reuses_existing_entries() {
        let mut pool = ConstantPool::new();
        let a = pool.add_string("com/acme/Widget").unwrap();
        let b = pool.add_string("com/acme/Widget").unwrap();
        assert_eq!(a, b);
        // Utf8 + String
        assert_eq!(pool.count(), 3);
    }

    #[test]
    fn test_wide_constants_take_two_slots() {
        let mut bytes = Vec::new();
        bytes.put_u16(4); // count: Long occupies 1-2, Utf8 at 3
        bytes.put_u8(5);
        bytes.put_u64(42);
        bytes.put_u8(1);
        bytes.put_u16(3);
        bytes.put_bytes(b"abc");

        let pool = ConstantPool::read(&mut ByteReader::new(&bytes)).unwrap();
        assert_eq!(pool.get(1), Some(&Constant::Long(42)));
        assert_eq!(pool.get(2), None);
        assert_eq!(pool.utf8(3).unwrap(), "abc");

        let mut out = Vec::new();
        pool.write(&mut out);
        assert_eq!(out, bytes);
    }

    #[test]
    fn test_wide_constant_past_pool_end() {
        let mut bytes = Vec::new();
        bytes.put_u16(3); // slots 1-2, but the Long at 2 would need 2-3
        bytes.put_u8(3);
        bytes.put_u32(7);
        bytes.put_u8(5);
        bytes.put_u64(42);

        let err = ConstantPool::read(&mut ByteReader::new(&bytes)).unwrap_err();
        assert_eq!(err, ClassFormatError::ConstantPoolOverrun { index: 2 });
    }

    #[test]
    fn test_wide_constant_in_last_slot_does_not_wrap() {
        let mut bytes = Vec::new();
        bytes.put_u16(u16::MAX);
        for _ in 1..u16::MAX - 1 {
            bytes.put_u8(3);
            bytes.put_u32(0);
        }
        // Long at index 65534, the last usable slot
        bytes.put_u8(5);
        bytes.put_u64(1);

        let err = ConstantPool::read(&mut ByteReader::new(&bytes)).unwrap_err();
        assert_eq!(err, ClassFormatError::ConstantPoolOverrun { index: u16::MAX - 1 });
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let bytes = [0x00, 0x02, 0x02, 0x00];
        let err = ConstantPool::read(&mut ByteReader::new(&bytes)).unwrap_err();
        assert_eq!(err, ClassFormatError::UnknownConstantTag { tag: 2, index: 1 });
    }

    #[test]
    fn test_methodref_lookup() {
        let mut pool = ConstantPool::new();
        assert_eq!(pool.find_methodref("a/B", "m", "()V"), None);
        let index = pool.add_methodref("a/B", "m", "()V").unwrap();
        assert_eq!(pool.find_methodref("a/B", "m", "()V"), Some(index));
        let class_idx = pool.add_class("a/B").unwrap();
        assert_eq!(pool.class_name(class_idx).unwrap(), "a/B");
    }

    #[test]
    fn test_wrong_kind_lookup() {
        let mut pool = ConstantPool::new();
        let utf8 = pool.add_utf8("x").unwrap();
        assert!(matches!(
            pool.class_name(utf8),
            Err(ClassFormatError::BadConstantIndex { expected: "Class", .. })
        ));
        assert!(pool.utf8(0).is_err());
    }

    #[test]
    fn test_pool_overflow() {
        let mut pool = ConstantPool::new();
        for i in 0..MAX_INDEX {
            pool.push(Constant::Integer(i as u32)).unwrap();
        }
        assert!(matches!(pool.push(Constant::Integer(0)), Err(TransformError::ConstantPoolOverflow)));
    }
}
