//! Frame-address symbolization
//!
//! Turns the raw instruction pointers held by the stack store into display
//! names for the report. Resolution goes through [`SymbolResolver`] so the
//! report renderer never depends on DWARF machinery; the production
//! implementation is [`symbolizer::Symbolizer`].

pub mod memory_maps;
pub mod symbolizer;

pub use memory_maps::{object_range, MemoryRange};
pub use symbolizer::Symbolizer;

/// Resolve one frame address to a display string.
///
/// Implementations must always return something printable; addresses with no
/// known symbol render as `0x{addr:x}`.
pub trait SymbolResolver {
    fn resolve(&self, addr: u64) -> String;
}

/// Resolver of last resort: every address renders as bare hex. Used when the
/// traced object cannot be opened for symbolization.
#[derive(Debug, Default, Clone, Copy)]
pub struct HexResolver;

impl SymbolResolver for HexResolver {
    fn resolve(&self, addr: u64) -> String {
        format!("0x{addr:x}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_resolver_formats_lowercase_hex() {
        assert_eq!(HexResolver.resolve(0xdead_beef), "0xdeadbeef");
        assert_eq!(HexResolver.resolve(0), "0x0");
    }
}
