//! `StackMapTable` model (JVMS §4.7.4)
//!
//! The verifier needs a type-state frame at every branch target. Frames are
//! delta-encoded: the first frame applies at `offset_delta`, every later one
//! at `previous + offset_delta + 1`. Two things in the table are absolute
//! bytecode offsets and must move when code is inserted in front of a method
//! body: the first frame's delta and the `new` instruction offset carried by
//! every `Uninitialized` verification type.

use super::bytes::{ByteReader, ByteWriter};
use crate::domain::ClassFormatError;

/// Type of one local or stack slot in a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    /// Class constant pool index
    Object(u16),
    /// Offset of the `new` instruction that created the value
    Uninitialized(u16),
}

impl VerificationType {
    fn read(reader: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        Ok(match reader.u8()? {
            0 => Self::Top,
            1 => Self::Integer,
            2 => Self::Float,
            3 => Self::Double,
            4 => Self::Long,
            5 => Self::Null,
            6 => Self::UninitializedThis,
            7 => Self::Object(reader.u16()?),
            8 => Self::Uninitialized(reader.u16()?),
            tag => return Err(ClassFormatError::UnknownVerificationType(tag)),
        })
    }

    fn write(self, out: &mut Vec<u8>) {
        match self {
            Self::Top => out.put_u8(0),
            Self::Integer => out.put_u8(1),
            Self::Float => out.put_u8(2),
            Self::Double => out.put_u8(3),
            Self::Long => out.put_u8(4),
            Self::Null => out.put_u8(5),
            Self::UninitializedThis => out.put_u8(6),
            Self::Object(index) => {
                out.put_u8(7);
                out.put_u16(index);
            }
            Self::Uninitialized(offset) => {
                out.put_u8(8);
                out.put_u16(offset);
            }
        }
    }

    fn shifted(self, shift: u16) -> Option<Self> {
        match self {
            Self::Uninitialized(offset) => offset.checked_add(shift).map(Self::Uninitialized),
            other => Some(other),
        }
    }
}

/// One entry of a `StackMapTable`
///
/// Compact and extended encodings of the same frame are distinct variants so
/// an untouched table re-encodes to identical bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackMapFrame {
    /// Tags 0-63
    Same { offset_delta: u16 },
    /// Tags 64-127
    SameLocals1StackItem { offset_delta: u16, stack: VerificationType },
    /// Tag 247
    SameLocals1StackItemExtended { offset_delta: u16, stack: VerificationType },
    /// Tags 248-250, `chopped` locals removed
    Chop { chopped: u8, offset_delta: u16 },
    /// Tag 251
    SameExtended { offset_delta: u16 },
    /// Tags 252-254
    Append { offset_delta: u16, locals: Vec<VerificationType> },
    /// Tag 255
    Full { offset_delta: u16, locals: Vec<VerificationType>, stack: Vec<VerificationType> },
}

impl StackMapFrame {
    #[must_use]
    pub fn offset_delta(&self) -> u16 {
        match self {
            Self::Same { offset_delta }
            | Self::SameLocals1StackItem { offset_delta, .. }
            | Self::SameLocals1StackItemExtended { offset_delta, .. }
            | Self::Chop { offset_delta, .. }
            | Self::SameExtended { offset_delta }
            | Self::Append { offset_delta, .. }
            | Self::Full { offset_delta, .. } => *offset_delta,
        }
    }

    fn read(reader: &mut ByteReader<'_>) -> Result<Self, ClassFormatError> {
        let tag = reader.u8()?;
        Ok(match tag {
            0..=63 => Self::Same { offset_delta: u16::from(tag) },
            64..=127 => Self::SameLocals1StackItem {
                offset_delta: u16::from(tag - 64),
                stack: VerificationType::read(reader)?,
            },
            247 => Self::SameLocals1StackItemExtended {
                offset_delta: reader.u16()?,
                stack: VerificationType::read(reader)?,
            },
            248..=250 => Self::Chop { chopped: 251 - tag, offset_delta: reader.u16()? },
            251 => Self::SameExtended { offset_delta: reader.u16()? },
            252..=254 => {
                let offset_delta = reader.u16()?;
                let locals = (0..tag - 251)
                    .map(|_| VerificationType::read(reader))
                    .collect::<Result<_, _>>()?;
                Self::Append { offset_delta, locals }
            }
            255 => {
                let offset_delta = reader.u16()?;
                let locals = read_types(reader)?;
                let stack = read_types(reader)?;
                Self::Full { offset_delta, locals, stack }
            }
            _ => return Err(ClassFormatError::UnknownFrameType(tag)),
        })
    }

    fn write(&self, out: &mut Vec<u8>) {
        match self {
            Self::Same { offset_delta } => out.put_u8(*offset_delta as u8),
            Self::SameLocals1StackItem { offset_delta, stack } => {
                out.put_u8(64 + *offset_delta as u8);
                stack.write(out);
            }
            Self::SameLocals1StackItemExtended { offset_delta, stack } => {
                out.put_u8(247);
                out.put_u16(*offset_delta);
                stack.write(out);
            }
            Self::Chop { chopped, offset_delta } => {
                out.put_u8(251 - chopped);
                out.put_u16(*offset_delta);
            }
            Self::SameExtended { offset_delta } => {
                out.put_u8(251);
                out.put_u16(*offset_delta);
            }
            Self::Append { offset_delta, locals } => {
                out.put_u8(251 + locals.len() as u8);
                out.put_u16(*offset_delta);
                for local in locals {
                    local.write(out);
                }
            }
            Self::Full { offset_delta, locals, stack } => {
                out.put_u8(255);
                out.put_u16(*offset_delta);
                write_types(locals, out);
                write_types(stack, out);
            }
        }
    }

    /// Same frame with its delta moved by `shift`, promoting compact forms
    /// whose delta no longer fits in the tag byte
    fn with_delta_shifted(self, shift: u16) -> Option<Self> {
        let delta = self.offset_delta().checked_add(shift)?;
        Some(match self {
            Self::Same { .. } if delta <= 63 => Self::Same { offset_delta: delta },
            Self::Same { .. } | Self::SameExtended { .. } => Self::SameExtended { offset_delta: delta },
            Self::SameLocals1StackItem { stack, .. } if delta <= 63 => {
                Self::SameLocals1StackItem { offset_delta: delta, stack }
            }
            Self::SameLocals1StackItem { stack, .. }
            | Self::SameLocals1StackItemExtended { stack, .. } => {
                Self::SameLocals1StackItemExtended { offset_delta: delta, stack }
            }
            Self::Chop { chopped, .. } => Self::Chop { chopped, offset_delta: delta },
            Self::Append { locals, .. } => Self::Append { offset_delta: delta, locals },
            Self::Full { locals, stack, .. } => Self::Full { offset_delta: delta, locals, stack },
        })
    }

    fn map_types(self, f: impl Fn(VerificationType) -> Option<VerificationType>) -> Option<Self> {
        let map_all = |types: Vec<VerificationType>| types.into_iter().map(&f).collect::<Option<Vec<_>>>();
        Some(match self {
            Self::SameLocals1StackItem { offset_delta, stack } => {
                Self::SameLocals1StackItem { offset_delta, stack: f(stack)? }
            }
            Self::SameLocals1StackItemExtended { offset_delta, stack } => {
                Self::SameLocals1StackItemExtended { offset_delta, stack: f(stack)? }
            }
            Self::Append { offset_delta, locals } => Self::Append { offset_delta, locals: map_all(locals)? },
            Self::Full { offset_delta, locals, stack } => {
                Self::Full { offset_delta, locals: map_all(locals)?, stack: map_all(stack)? }
            }
            other => other,
        })
    }
}

fn read_types(reader: &mut ByteReader<'_>) -> Result<Vec<VerificationType>, ClassFormatError> {
    let count = reader.u16()?;
    (0..count).map(|_| VerificationType::read(reader)).collect()
}

fn write_types(types: &[VerificationType], out: &mut Vec<u8>) {
    // Counts come from decoded u16 fields and are never grown
    out.put_u16(types.len() as u16);
    for t in types {
        t.write(out);
    }
}

/// Decoded `StackMapTable` attribute body
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StackMapTable {
    pub frames: Vec<StackMapFrame>,
}

impl StackMapTable {
    /// # Errors
    /// Returns an error on truncated data, unknown tags or trailing bytes
    pub fn parse(info: &[u8]) -> Result<Self, ClassFormatError> {
        let mut reader = ByteReader::new(info);
        let count = reader.u16()?;
        let frames = (0..count)
            .map(|_| StackMapFrame::read(&mut reader))
            .collect::<Result<_, _>>()?;
        reader.finish("StackMapTable")?;
        Ok(Self { frames })
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.put_u16(self.frames.len() as u16);
        for frame in &self.frames {
            frame.write(&mut out);
        }
        out
    }

    /// Move every frame `shift` bytes later in the code array
    ///
    /// Returns `None` if an offset would overflow.
    #[must_use]
    pub fn shifted(self, shift: u16) -> Option<Self> {
        let frames = self
            .frames
            .into_iter()
            .enumerate()
            .map(|(i, frame)| {
                let frame = frame.map_types(|t| t.shifted(shift))?;
                if i == 0 {
                    frame.with_delta_shifted(shift)
                } else {
                    Some(frame)
                }
            })
            .collect::<Option<_>>()?;
        Some(Self { frames })
    }

    /// Absolute bytecode offsets of every frame, in order
    #[must_use]
    pub fn offsets(&self) -> Vec<u32> {
        let mut offsets = Vec::with_capacity(self.frames.len());
        let mut previous: Option<u32> = None;
        for frame in &self.frames {
            let delta = u32::from(frame.offset_delta());
            let offset = previous.map_or(delta, |p| p + delta + 1);
            offsets.push(offset);
            previous = Some(offset);
        }
        offsets
    }
}
