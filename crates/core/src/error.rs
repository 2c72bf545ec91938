use core::fmt::{self, Display};

/// An invalid [`WasmError`] ordinal was encountered while decoding a
/// JIT or trampoline return value.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct InvalidErrorOrdinal;

macro_rules! generate_wasm_error {
    (
        $( $(#[$attr:meta])* $ident:ident = $discr:literal ),* $(,)?
    ) => {
        /// The flat set of error kinds a wrun module or instance can produce.
        ///
        /// Every variant is leaf-level: there is no nesting, and every
        /// variant carries its own ordinal so the JIT tier (§4.6) and the
        /// trampoline can encode/decode it as a plain `u64` return value.
        /// Ordinal `0` is reserved for "no error" and is never assigned to
        /// a variant here.
        #[derive(Debug, Copy, Clone, PartialEq, Eq)]
        #[repr(u8)]
        pub enum WasmError {
            $(
                $( #[$attr] )*
                $ident = $discr
            ),*
        }

        impl WasmError {
            /// Returns the stable ordinal used by the JIT and trampoline to
            /// report this error across a native call boundary.
            pub fn ordinal(self) -> u64 {
                self as u8 as u64
            }

            /// Recovers a [`WasmError`] from a JIT/trampoline ordinal.
            ///
            /// Ordinal `0` is not a valid error and is rejected.
            pub fn from_ordinal(ordinal: u64) -> Result<Self, InvalidErrorOrdinal> {
                match ordinal {
                    $( $discr => Ok(Self::$ident), )*
                    _ => Err(InvalidErrorOrdinal),
                }
            }

            /// Returns the human-readable trap/error message as specified
            /// by this crate's error model.
            pub fn message(&self) -> &'static str {
                match self {
                    $( Self::$ident => generate_wasm_error!(@msg $ident), )*
                }
            }
        }
    };
    (@msg InvalidModule) => { "the bytes do not form a legal WebAssembly module" };
    (@msg ImportNotFound) => { "instantiation could not bind an import" };
    (@msg Trap) => { "wasm `unreachable` instruction executed or unspecified runtime failure" };
    (@msg OutOfBoundsMemoryAccess) => { "out of bounds memory access" };
    (@msg IntegerOverflow) => { "integer overflow" };
    (@msg DivisionByZero) => { "integer divide by zero" };
    (@msg StackOverflow) => { "call stack exhausted" };
    (@msg OutOfMemory) => { "host allocation failed" };
    (@msg Unreachable) => { "wasm `unreachable` instruction executed" };
}

generate_wasm_error! {
    /// Bytes do not form a legal module (magic, version, section length,
    /// function/code mismatch, unknown form).
    InvalidModule = 1,
    /// Instantiation could not bind an import of matching signature.
    ImportNotFound = 2,
    /// A generic Wasm trap, or `unreachable`.
    Trap = 3,
    /// A load or store landed outside of linear memory.
    OutOfBoundsMemoryAccess = 4,
    /// A truncation or division caused an integer overflow.
    IntegerOverflow = 5,
    /// An integer `div`/`rem` was attempted with a zero divisor.
    DivisionByZero = 6,
    /// The call-depth limit was exceeded.
    StackOverflow = 7,
    /// A host allocation failed (e.g. `memory.grow` could not reserve
    /// backing storage even though the declared maximum allows it).
    OutOfMemory = 8,
    /// Execution reached the `unreachable` opcode.
    Unreachable = 9,
}

impl Display for WasmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl Display for InvalidErrorOrdinal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid WasmError ordinal")
    }
}

#[cfg(feature = "std")]
impl std::error::Error for WasmError {}

#[cfg(feature = "std")]
impl std::error::Error for InvalidErrorOrdinal {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinals_round_trip() {
        let all = [
            WasmError::InvalidModule,
            WasmError::ImportNotFound,
            WasmError::Trap,
            WasmError::OutOfBoundsMemoryAccess,
            WasmError::IntegerOverflow,
            WasmError::DivisionByZero,
            WasmError::StackOverflow,
            WasmError::OutOfMemory,
            WasmError::Unreachable,
        ];
        for err in all {
            assert_eq!(WasmError::from_ordinal(err.ordinal()).unwrap(), err);
        }
        assert!(WasmError::from_ordinal(0).is_err());
        assert!(WasmError::from_ordinal(200).is_err());
    }
}
