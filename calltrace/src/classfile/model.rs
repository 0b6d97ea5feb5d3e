//! Structural model of a class file (JVMS §4.1)
//!
//! Only what the rewriter needs is decoded: the constant pool, the member
//! tables and the attribute envelopes. Attribute bodies stay raw until
//! something asks for them, and anything that is not modified re-encodes to
//! the exact input bytes.

use super::bytes::{u16_len, ByteReader, ByteWriter};
use super::code::CodeAttribute;
use super::constant_pool::ConstantPool;
use crate::domain::{ClassFormatError, TransformError};

const MAGIC: u32 = 0xCAFE_BABE;

/// Attribute with an undecoded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// `Utf8` constant holding the attribute name
    pub name_index: u16,
    pub info: Vec<u8>,
}

impl Attribute {
    pub(crate) fn read_all(reader: &mut ByteReader<'_>) -> Result<Vec<Self>, ClassFormatError> {
        let count = reader.u16()?;
        let mut attributes = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let name_index = reader.u16()?;
            let len = reader.u32()? as usize;
            attributes.push(Self { name_index, info: reader.bytes(len)?.to_vec() });
        }
        Ok(attributes)
    }

    pub(crate) fn write_all(attributes: &[Self], out: &mut Vec<u8>) -> Result<(), TransformError> {
        out.put_u16(u16_len(attributes.len(), "attributes")?);
        for attribute in attributes {
            out.put_u16(attribute.name_index);
            out.put_u32(
                u32::try_from(attribute.info.len())
                    .map_err(|_| TransformError::AttributeTooLarge("attribute_info"))?,
            );
            out.put_bytes(&attribute.info);
        }
        Ok(())
    }
}

/// A field or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    fn read_all(reader: &mut ByteReader<'_>) -> Result<Vec<Self>, ClassFormatError> {
        let count = reader.u16()?;
        let mut members = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            members.push(Self {
                access_flags: reader.u16()?,
                name_index: reader.u16()?,
                descriptor_index: reader.u16()?,
                attributes: Attribute::read_all(reader)?,
            });
        }
        Ok(members)
    }

    fn write_all(members: &[Self], out: &mut Vec<u8>) -> Result<(), TransformError> {
        out.put_u16(u16_len(members.len(), "members")?);
        for member in members {
            out.put_u16(member.access_flags);
            out.put_u16(member.name_index);
            out.put_u16(member.descriptor_index);
            Attribute::write_all(&member.attributes, out)?;
        }
        Ok(())
    }

    #[must_use]
    pub fn has_flag(&self, flag: u16) -> bool {
        self.access_flags & flag != 0
    }

    /// Position of the `Code` attribute, if the member has one
    #[must_use]
    pub fn code_index(&self, pool: &ConstantPool) -> Option<usize> {
        self.attributes
            .iter()
            .position(|a| pool.utf8_bytes(a.name_index).is_ok_and(|name| name == b"Code"))
    }

    /// Decode this member's `Code` attribute
    ///
    /// # Errors
    /// Returns an error if the attribute is malformed
    pub fn code(&self, pool: &ConstantPool) -> Result<Option<CodeAttribute>, ClassFormatError> {
        self.code_index(pool)
            .map(|i| CodeAttribute::parse(&self.attributes[i].info))
            .transpose()
    }
}

/// A decoded class file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// # Errors
    /// Returns a [`ClassFormatError`] for anything that is not a complete,
    /// structurally valid class file
    pub fn parse(data: &[u8]) -> Result<Self, ClassFormatError> {
        let mut reader = ByteReader::new(data);

        let magic = reader.u32()?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = reader.u16()?;
        let major_version = reader.u16()?;
        let constant_pool = ConstantPool::read(&mut reader)?;
        let access_flags = reader.u16()?;
        let this_class = reader.u16()?;
        let super_class = reader.u16()?;

        let interface_count = reader.u16()?;
        let interfaces = (0..interface_count).map(|_| reader.u16()).collect::<Result<_, _>>()?;

        let fields = MemberInfo::read_all(&mut reader)?;
        let methods = MemberInfo::read_all(&mut reader)?;
        let attributes = Attribute::read_all(&mut reader)?;
        reader.finish("class file")?;

        Ok(Self {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    /// # Errors
    /// Fails if a table outgrew its length field
    pub fn encode(&self) -> Result<Vec<u8>, TransformError> {
        let mut out = Vec::new();
        out.put_u32(MAGIC);
        out.put_u16(self.minor_version);
        out.put_u16(self.major_version);
        self.constant_pool.write(&mut out);
        out.put_u16(self.access_flags);
        out.put_u16(self.this_class);
        out.put_u16(self.super_class);
        out.put_u16(u16_len(self.interfaces.len(), "interfaces")?);
        for interface in &self.interfaces {
            out.put_u16(*interface);
        }
        MemberInfo::write_all(&self.fields, &mut out)?;
        MemberInfo::write_all(&self.methods, &mut out)?;
        Attribute::write_all(&self.attributes, &mut out)?;
        Ok(out)
    }

    /// Binary name of this class
    ///
    /// # Errors
    /// Returns an error if `this_class` does not name a class
    pub fn name(&self) -> Result<String, ClassFormatError> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Decoded name of a method
    ///
    /// # Errors
    /// Returns an error if the name index is not a valid `Utf8` constant
    pub fn method_name(&self, method: &MemberInfo) -> Result<String, ClassFormatError> {
        self.constant_pool.utf8(method.name_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classfile::ACC_PUBLIC;

    fn minimal_class() -> ClassFile {
        let mut pool = ConstantPool::new();
        let this_class = pool.add_class("com/acme/Empty").unwrap();
        let super_class = pool.add_class("java/lang/Object").unwrap();
        ClassFile {
            minor_version: 0,
            major_version: 52,
            constant_pool: pool,
            access_flags: ACC_PUBLIC,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        }
    }

    #[test]
    fn test_encode_parse_identity() {
        let class = minimal_class();
        let bytes = class.encode().unwrap();
        assert_eq!(&bytes[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);

        let parsed = ClassFile::parse(&bytes).unwrap();
        assert_eq!(parsed, class);
        assert_eq!(parsed.name().unwrap(), "com/acme/Empty");
        assert_eq!(parsed.encode().unwrap(), bytes);
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(ClassFile::parse(&[0, 0, 0, 0, 0, 0]), Err(ClassFormatError::BadMagic(0)));
    }

    #[test]
    fn test_truncated_class() {
        let bytes = minimal_class().encode().unwrap();
        for len in [3, 10, bytes.len() - 1] {
            assert!(ClassFile::parse(&bytes[..len]).is_err(), "prefix of {len} bytes parsed");
        }
    }

    #[test]
    fn test_trailing_garbage() {
        let mut bytes = minimal_class().encode().unwrap();
        bytes.push(0);
        assert_eq!(ClassFile::parse(&bytes), Err(ClassFormatError::TrailingBytes(1, "class file")));
    }
}
