//! `Code` attribute model and bytecode offset relocation

use log::debug;

use super::bytes::{u16_len, ByteReader, ByteWriter};
use super::constant_pool::ConstantPool;
use super::model::Attribute;
use super::stackmap::StackMapTable;
use crate::domain::{ClassFormatError, TransformError};

/// JVM limit on `code_length`
pub const MAX_CODE_LENGTH: usize = 65_535;

/// Sub-attributes of `Code` whose entries start with a `u16` bytecode offset,
/// followed by `tail` bytes that stay as they are
const PC_TABLES: &[(&str, usize)] = &[
    // start_pc, line_number
    ("LineNumberTable", 2),
    // start_pc, length, name_index, descriptor_index, index
    ("LocalVariableTable", 8),
    // start_pc, length, name_index, signature_index, index
    ("LocalVariableTypeTable", 8),
];

/// Sub-attributes that embed bytecode offsets in a layout not worth
/// relocating. They only serve tooling and are dropped on relocation.
const DROPPED_ON_RELOCATION: &[&str] =
    &["RuntimeVisibleTypeAnnotations", "RuntimeInvisibleTypeAnnotations"];

/// One `exception_table` entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionHandler {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Class constant index, 0 for `finally`
    pub catch_type: u16,
}

/// Decoded `Code` attribute body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionHandler>,
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    /// # Errors
    /// Returns an error on truncated data or trailing bytes
    pub fn parse(info: &[u8]) -> Result<Self, ClassFormatError> {
        let mut reader = ByteReader::new(info);
        let max_stack = reader.u16()?;
        let max_locals = reader.u16()?;
        let code_length = reader.u32()? as usize;
        let code = reader.bytes(code_length)?.to_vec();

        let handler_count = reader.u16()?;
        let mut exception_table = Vec::with_capacity(usize::from(handler_count));
        for _ in 0..handler_count {
            exception_table.push(ExceptionHandler {
                start_pc: reader.u16()?,
                end_pc: reader.u16()?,
                handler_pc: reader.u16()?,
                catch_type: reader.u16()?,
            });
        }

        let attributes = Attribute::read_all(&mut reader)?;
        reader.finish("Code")?;

        Ok(Self { max_stack, max_locals, code, exception_table, attributes })
    }

    /// # Errors
    /// Fails if the code or a table no longer fits its length field
    pub fn encode(&self) -> Result<Vec<u8>, TransformError> {
        let mut out = Vec::with_capacity(self.code.len() + 32);
        out.put_u16(self.max_stack);
        out.put_u16(self.max_locals);
        out.put_u32(u32::try_from(self.code.len()).map_err(|_| TransformError::AttributeTooLarge("Code"))?);
        out.put_bytes(&self.code);

        out.put_u16(u16_len(self.exception_table.len(), "exception_table")?);
        for handler in &self.exception_table {
            out.put_u16(handler.start_pc);
            out.put_u16(handler.end_pc);
            out.put_u16(handler.handler_pc);
            out.put_u16(handler.catch_type);
        }

        Attribute::write_all(&self.attributes, &mut out)?;
        Ok(out)
    }

    /// Move every code-relative offset `shift` bytes later
    ///
    /// Call before inserting `shift` bytes at the start of `code`. Relative
    /// branch offsets inside `code` are unaffected by a uniform shift and are
    /// not touched.
    ///
    /// # Errors
    /// Fails if a sub-attribute is malformed or an offset overflows
    pub fn relocate(&mut self, shift: u16, pool: &ConstantPool) -> Result<(), TransformError> {
        let bump = |pc: u16| pc.checked_add(shift).ok_or(TransformError::AttributeTooLarge("Code"));

        for handler in &mut self.exception_table {
            handler.start_pc = bump(handler.start_pc)?;
            handler.end_pc = bump(handler.end_pc)?;
            handler.handler_pc = bump(handler.handler_pc)?;
        }

        let mut relocated = Vec::with_capacity(self.attributes.len());
        for attribute in self.attributes.drain(..) {
            // Unnamed or non-UTF-8 names are left alone like any unknown attribute
            let name = pool.utf8(attribute.name_index).unwrap_or_default();

            if DROPPED_ON_RELOCATION.contains(&name.as_str()) {
                debug!("Dropping {name} ({} bytes) from relocated Code attribute", attribute.info.len());
                continue;
            }
            if name == "StackMapTable" {
                let table = StackMapTable::parse(&attribute.info)?
                    .shifted(shift)
                    .ok_or(TransformError::AttributeTooLarge("StackMapTable"))?;
                relocated.push(Attribute { name_index: attribute.name_index, info: table.encode() });
                continue;
            }
            if let Some((_, tail)) = PC_TABLES.iter().find(|(table, _)| *table == name) {
                let info = shift_pc_table(&attribute.info, *tail, shift)?;
                relocated.push(Attribute { name_index: attribute.name_index, info });
                continue;
            }
            relocated.push(attribute);
        }
        self.attributes = relocated;
        Ok(())
    }
}

/// Rewrite a `u16 count` + `[u16 pc, tail...]` table with every pc shifted
fn shift_pc_table(info: &[u8], tail: usize, shift: u16) -> Result<Vec<u8>, TransformError> {
    let mut reader = ByteReader::new(info);
    let count = reader.u16()?;
    let mut out = Vec::with_capacity(info.len());
    out.put_u16(count);
    for _ in 0..count {
        let pc = reader.u16()?;
        out.put_u16(pc.checked_add(shift).ok_or(TransformError::AttributeTooLarge("pc table"))?);
        out.put_bytes(reader.bytes(tail)?);
    }
    reader.finish("offset table")?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_numbers(entries: &[(u16, u16)]) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16(entries.len() as u16);
        for (pc, line) in entries {
            out.put_u16(*pc);
            out.put_u16(*line);
        }
        out
    }

    #[test]
    fn test_parse_encode_identity() {
        let mut pool = ConstantPool::new();
        let lnt = pool.add_utf8("LineNumberTable").unwrap();
        let code = CodeAttribute {
            max_stack: 1,
            max_locals: 2,
            code: vec![0x03, 0xAC],
            exception_table: vec![ExceptionHandler { start_pc: 0, end_pc: 1, handler_pc: 1, catch_type: 0 }],
            attributes: vec![Attribute { name_index: lnt, info: line_numbers(&[(0, 10)]) }],
        };
        let bytes = code.encode().unwrap();
        assert_eq!(CodeAttribute::parse(&bytes).unwrap(), code);
    }

    #[test]
    fn test_relocate_shifts_tables() {
        let mut pool = ConstantPool::new();
        let lnt = pool.add_utf8("LineNumberTable").unwrap();
        let vta = pool.add_utf8("RuntimeVisibleTypeAnnotations").unwrap();
        let custom = pool.add_utf8("com.acme.Custom").unwrap();

        let mut code = CodeAttribute {
            max_stack: 1,
            max_locals: 1,
            code: vec![0x00; 6],
            exception_table: vec![ExceptionHandler { start_pc: 0, end_pc: 4, handler_pc: 4, catch_type: 3 }],
            attributes: vec![
                Attribute { name_index: lnt, info: line_numbers(&[(0, 7), (4, 9)]) },
                Attribute { name_index: vta, info: vec![0, 0] },
                Attribute { name_index: custom, info: vec![1, 2, 3] },
            ],
        };
        code.relocate(8, &pool).unwrap();

        assert_eq!(
            code.exception_table[0],
            ExceptionHandler { start_pc: 8, end_pc: 12, handler_pc: 12, catch_type: 3 }
        );
        assert_eq!(code.attributes.len(), 2);
        assert_eq!(code.attributes[0].info, line_numbers(&[(8, 7), (12, 9)]));
        assert_eq!(code.attributes[1].info, vec![1, 2, 3]);
    }

    #[test]
    fn test_truncated_code_attribute() {
        let err = CodeAttribute::parse(&[0, 1, 0, 1, 0, 0, 0, 9, 0xB1]).unwrap_err();
        assert!(matches!(err, ClassFormatError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_malformed_line_table_fails_relocation() {
        let mut pool = ConstantPool::new();
        let lnt = pool.add_utf8("LineNumberTable").unwrap();
        let mut code = CodeAttribute {
            max_stack: 0,
            max_locals: 0,
            code: vec![0xB1],
            exception_table: Vec::new(),
            attributes: vec![Attribute { name_index: lnt, info: vec![0, 2, 0, 0] }],
        };
        assert!(matches!(code.relocate(4, &pool), Err(TransformError::Decode(_))));
    }
}
