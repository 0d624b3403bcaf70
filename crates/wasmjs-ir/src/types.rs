//! IR Type System
//!
//! Value types carried by expressions, locals and signatures, and the
//! element types of linear-memory accesses.

use crate::error::IrError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Value type of an expression, local, parameter or return slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Type {
    /// No value (function returns only)
    Void,
    /// 8-bit signed integer, emulated on i32
    I8,
    /// 16-bit signed integer, emulated on i32
    I16,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
    /// 32-bit float
    F32,
    /// 64-bit float
    F64,
}

impl Type {
    pub fn as_str(&self) -> &'static str {
        match self {
            Type::Void => "void",
            Type::I8 => "i8",
            Type::I16 => "i16",
            Type::I32 => "i32",
            Type::I64 => "i64",
            Type::F32 => "f32",
            Type::F64 => "f64",
        }
    }

    /// Replaces narrow integer types by the 32-bit type they run on.
    pub fn simplify(self) -> Type {
        match self {
            Type::I8 | Type::I16 => Type::I32,
            other => other,
        }
    }

    /// Sub-32-bit integer types
    pub fn is_narrow(&self) -> bool {
        matches!(self, Type::I8 | Type::I16)
    }

    /// Types that survive desugaring
    pub fn is_machine(&self) -> bool {
        matches!(self, Type::I32 | Type::I64 | Type::F32 | Type::F64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Type::F32 | Type::F64)
    }

    /// Width in bits of narrow integers; `None` for every other type.
    pub fn narrow_bits(&self) -> Option<u32> {
        match self {
            Type::I8 => Some(8),
            Type::I16 => Some(16),
            _ => None,
        }
    }
}

impl FromStr for Type {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "void" => Ok(Type::Void),
            "i8" => Ok(Type::I8),
            "i16" => Ok(Type::I16),
            "i32" => Ok(Type::I32),
            "i64" => Ok(Type::I64),
            "f32" => Ok(Type::F32),
            "f64" => Ok(Type::F64),
            other => Err(IrError::UnknownType(other.to_string())),
        }
    }
}

impl TryFrom<String> for Type {
    type Error = IrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Type> for String {
    fn from(ty: Type) -> Self {
        ty.as_str().to_string()
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Element type of a load or store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MemType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl MemType {
    /// Every supported element type, in view declaration order
    pub const ALL: [MemType; 8] = [
        MemType::U8,
        MemType::I8,
        MemType::U16,
        MemType::I16,
        MemType::U32,
        MemType::I32,
        MemType::F32,
        MemType::F64,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MemType::U8 => "u8",
            MemType::I8 => "i8",
            MemType::U16 => "u16",
            MemType::I16 => "i16",
            MemType::U32 => "u32",
            MemType::I32 => "i32",
            MemType::F32 => "f32",
            MemType::F64 => "f64",
        }
    }

    /// Size in bytes of one element
    pub fn size_of(&self) -> u32 {
        match self {
            MemType::U8 | MemType::I8 => 1,
            MemType::U16 | MemType::I16 => 2,
            MemType::U32 | MemType::I32 | MemType::F32 => 4,
            MemType::F64 => 8,
        }
    }

    /// log2 of the element size, the shift turning a byte address into an
    /// element index.
    pub fn shift(&self) -> u32 {
        self.size_of().trailing_zeros()
    }

    /// Value type produced by loading this element type
    pub fn value_type(&self) -> Type {
        match self {
            MemType::F32 => Type::F32,
            MemType::F64 => Type::F64,
            _ => Type::I32,
        }
    }
}

impl FromStr for MemType {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MemType::ALL
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| IrError::UnknownMemType(s.to_string()))
    }
}

impl TryFrom<String> for MemType {
    type Error = IrError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MemType> for String {
    fn from(ty: MemType) -> Self {
        ty.as_str().to_string()
    }
}

impl fmt::Display for MemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
