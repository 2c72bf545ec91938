use core::fmt;

/// A WebAssembly value type as it appears in signatures, locals, and
/// globals.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ValType {
    I32,
    I64,
    F32,
    F64,
    V128,
    FuncRef,
    ExternRef,
}

impl ValType {
    /// Returns `true` if this is one of the reference types
    /// (`funcref`/`externref`).
    pub fn is_ref(&self) -> bool {
        matches!(self, Self::FuncRef | Self::ExternRef)
    }

    /// Decodes a value type from its single-byte Wasm encoding.
    pub fn from_byte(byte: u8) -> Option<Self> {
        Some(match byte {
            0x7F => Self::I32,
            0x7E => Self::I64,
            0x7D => Self::F32,
            0x7C => Self::F64,
            0x7B => Self::V128,
            0x70 => Self::FuncRef,
            0x6F => Self::ExternRef,
            _ => return None,
        })
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::V128 => "v128",
            Self::FuncRef => "funcref",
            Self::ExternRef => "externref",
        };
        write!(f, "{name}")
    }
}

/// An untyped 64-bit value slot.
///
/// Every operand-stack slot, local, global, and invocation argument is
/// stored in this representation. Narrower types (`i32`, `f32`) occupy
/// the low 32 bits; the upper bits must be ignored on read and are
/// zeroed on write by the producer, per §6 of the invocation interface.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct UntypedVal(u64);

impl UntypedVal {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }

    pub fn i32(self) -> i32 {
        self.0 as u32 as i32
    }

    pub fn u32(self) -> u32 {
        self.0 as u32
    }

    pub fn i64(self) -> i64 {
        self.0 as i64
    }

    pub fn u64(self) -> u64 {
        self.0
    }

    pub fn f32(self) -> f32 {
        f32::from_bits(self.0 as u32)
    }

    pub fn f64(self) -> f64 {
        f64::from_bits(self.0)
    }
}

macro_rules! impl_from_for_untyped {
    ($($ty:ty => $conv:expr),* $(,)?) => {
        $(
            impl From<$ty> for UntypedVal {
                fn from(value: $ty) -> Self {
                    #[allow(clippy::redundant_closure_call)]
                    Self(($conv)(value))
                }
            }
        )*
    };
}

impl_from_for_untyped! {
    i32 => |v: i32| v as u32 as u64,
    u32 => |v: u32| v as u64,
    i64 => |v: i64| v as u64,
    u64 => |v: u64| v,
    f32 => |v: f32| v.to_bits() as u64,
    f64 => |v: f64| v.to_bits(),
    bool => |v: bool| v as u64,
}

/// A function signature: an ordered sequence of parameter and result
/// value types.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FuncType {
    params: Box<[ValType]>,
    results: Box<[ValType]>,
}

impl FuncType {
    pub fn new(params: impl Into<Box<[ValType]>>, results: impl Into<Box<[ValType]>>) -> Self {
        Self {
            params: params.into(),
            results: results.into(),
        }
    }

    pub fn params(&self) -> &[ValType] {
        &self.params
    }

    pub fn results(&self) -> &[ValType] {
        &self.results
    }
}

/// Limits on a table or memory: a minimum and an optional maximum,
/// plus the flags that were encoded alongside them.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Limits {
    pub min: u64,
    pub max: Option<u64>,
    /// `true` when the limits flags selected 64-bit (`memory64`)
    /// addressing (flag bit 2).
    pub memory64: bool,
    /// `true` when the limits flags set the shared bit. Accepted and
    /// ignored by the core per §4.1.
    pub shared: bool,
}

impl Limits {
    /// Validates `min <= max` when a maximum is present.
    pub fn is_valid(&self) -> bool {
        match self.max {
            Some(max) => self.min <= max,
            None => true,
        }
    }

    /// Subtyping rule used when matching an import's declared limits
    /// against the limits the host actually supplies (§4.8): the
    /// supplied minimum must be at least as large, and if the import
    /// declares a maximum, the supplied type must also declare one no
    /// larger than it.
    pub fn subsumes(&self, imported: &Limits) -> bool {
        if imported.min < self.min {
            return false;
        }
        match (self.max, imported.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(self_max), Some(imported_max)) => imported_max <= self_max,
        }
    }
}
