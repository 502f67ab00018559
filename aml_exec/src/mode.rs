use crate::AmlError;
use byteorder::{ByteOrder, LittleEndian};

/// How the decode loop is evaluating the term it is currently parsing. The mode decides what happens to names
/// and operators that appear in the term, and whether its result is kept.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum EvalMode {
    /// Constant data, such as the elements of a package literal. Names are left unresolved, and operators are
    /// not allowed.
    Data,
    /// Names are resolved, and operators and method calls are executed. The result is kept.
    Object,
    /// Like `Object`, but the result is discarded.
    Exec,
    /// Names produce a reference to the named object, instead of its value.
    Reference,
    /// Only a fixed-width 16-bit immediate may be decoded.
    ImmediateWord,
}

impl EvalMode {
    pub fn resolves_names(self) -> bool {
        matches!(self, EvalMode::Object | EvalMode::Exec)
    }

    pub fn keeps_result(self) -> bool {
        !matches!(self, EvalMode::Exec)
    }

    /// Check that an operator, or a name that needs executing (such as a method call), is allowed in this mode.
    pub fn check_execution(self) -> Result<(), AmlError> {
        match self {
            EvalMode::Object | EvalMode::Exec | EvalMode::Reference => Ok(()),
            EvalMode::Data | EvalMode::ImmediateWord => Err(AmlError::NotAllowedInMode(self)),
        }
    }
}

/// Decode a little-endian 16-bit immediate from the start of `bytes`.
pub fn decode_immediate_word(bytes: &[u8]) -> Result<(u16, usize), AmlError> {
    let word = bytes.get(0..2).ok_or(AmlError::UnexpectedEndOfStream)?;
    Ok((LittleEndian::read_u16(word), 2))
}
