use std::fmt::{self, Display, Formatter};

use itertools::Itertools;

/// The IR type grammar. First-class aggregates are structs and fixed-length
/// arrays; vectors exist so callers can express SIMD-shaped values even
/// though most transformations decline them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    Ptr(Box<Ty>),
    Array(Box<Ty>, u64),
    Struct {
        fields: Vec<Ty>,
        packed: bool,
        name: Option<String>,
    },
    Vector(Box<Ty>, u32),
    Void,
}

impl Ty {
    pub fn is_integer(&self) -> bool {
        matches!(self, Ty::I1 | Ty::I8 | Ty::I16 | Ty::I32 | Ty::I64)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, Ty::F32 | Ty::F64)
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Ty::Ptr(_))
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self, Ty::Struct { .. } | Ty::Array(..))
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Ty::Void)
    }

    pub fn ptr_to(self) -> Ty {
        Ty::Ptr(Box::new(self))
    }

    pub fn pointee(&self) -> Option<&Ty> {
        match self {
            Ty::Ptr(inner) => Some(inner),
            _ => None,
        }
    }

    pub fn array(element: Ty, len: u64) -> Ty {
        Ty::Array(Box::new(element), len)
    }

    pub fn anon_struct(fields: Vec<Ty>) -> Ty {
        Ty::Struct {
            fields,
            packed: false,
            name: None,
        }
    }

    /// Bit width of an integer type.
    pub fn int_bits(&self) -> Option<u32> {
        match self {
            Ty::I1 => Some(1),
            Ty::I8 => Some(8),
            Ty::I16 => Some(16),
            Ty::I32 => Some(32),
            Ty::I64 => Some(64),
            _ => None,
        }
    }
}

impl Display for Ty {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Ty::I1 => write!(f, "i1"),
            Ty::I8 => write!(f, "i8"),
            Ty::I16 => write!(f, "i16"),
            Ty::I32 => write!(f, "i32"),
            Ty::I64 => write!(f, "i64"),
            Ty::F32 => write!(f, "f32"),
            Ty::F64 => write!(f, "f64"),
            Ty::Ptr(inner) => write!(f, "ptr<{}>", inner),
            Ty::Array(element, len) => write!(f, "[{} x {}]", len, element),
            Ty::Struct { fields, name, .. } => {
                if let Some(name) = name {
                    write!(f, "%{}", name)
                } else {
                    write!(f, "{{{}}}", fields.iter().map(|t| t.to_string()).join(", "))
                }
            }
            Ty::Vector(element, len) => write!(f, "<{} x {}>", len, element),
            Ty::Void => write!(f, "void"),
        }
    }
}
