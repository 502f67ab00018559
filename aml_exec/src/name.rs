use crate::AmlError;
use alloc::{string::String, vec::Vec};
use core::{fmt, str, str::FromStr};

pub const NULL_NAME: u8 = 0x00;
pub const DUAL_NAME_PREFIX: u8 = 0x2e;
pub const MULTI_NAME_PREFIX: u8 = 0x2f;
pub const ROOT_CHAR: u8 = b'\\';
pub const PREFIX_CHAR: u8 = b'^';

/// A name path as it is encoded in an AML stream. This doesn't own anything - the segments are a view into the
/// buffer the path was parsed from, and are consumed by iterating over the path.
///
/// ```text
/// NameString := <RootChar NamePath> | <PrefixPath NamePath>
/// PrefixPath := Nothing | <'^' PrefixPath>
/// NamePath := NameSeg | DualNamePath | MultiNamePath | NullName
/// ```
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct AmlNamePath<'a> {
    is_absolute: bool,
    height: usize,
    search_scopes: bool,
    /// The segments that have not yet been consumed. Always a multiple of 4 bytes long, and every chunk is a
    /// valid `NameSeg`.
    segments: &'a [u8],
}

impl<'a> AmlNamePath<'a> {
    /// Decode a `NameString` from the start of `bytes`. Returns the path and the number of bytes it occupies.
    pub fn parse(bytes: &'a [u8]) -> Result<(AmlNamePath<'a>, usize), AmlError> {
        let byte_at = |offset: usize| bytes.get(offset).copied().ok_or(AmlError::UnexpectedEndOfStream);

        let mut offset = 0;
        let mut is_absolute = false;
        let mut height = 0;

        if byte_at(0)? == ROOT_CHAR {
            is_absolute = true;
            offset += 1;
        } else {
            // Relative paths can be prefixed by any number of parent prefixes
            while byte_at(offset)? == PREFIX_CHAR {
                height += 1;
                offset += 1;
            }
        }

        let num_segs = match byte_at(offset)? {
            NULL_NAME => {
                offset += 1;
                0
            }
            DUAL_NAME_PREFIX => {
                offset += 1;
                2
            }
            MULTI_NAME_PREFIX => {
                let count = byte_at(offset + 1)?;
                if count == 0 {
                    return Err(AmlError::EmptyNamesAreInvalid);
                }
                offset += 2;
                count as usize
            }
            lead if is_lead_name_char(lead) => 1,
            other => return Err(AmlError::UnexpectedByte(other)),
        };

        let end = offset + 4 * num_segs;
        let segments = bytes.get(offset..end).ok_or(AmlError::UnexpectedEndOfStream)?;
        for chunk in segments.chunks_exact(4) {
            NameSeg::from_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])?;
        }

        let search_scopes = !is_absolute && height == 0 && num_segs == 1;
        Ok((AmlNamePath { is_absolute, height, search_scopes, segments }, end))
    }

    pub fn is_absolute(&self) -> bool {
        self.is_absolute
    }

    /// The number of scopes to exit before resolving the rest of the path (the number of `^` prefixes).
    pub fn height(&self) -> usize {
        self.height
    }

    /// Whether the search rules described in §5.3 of the ACPI specification apply to this path. This is only
    /// the case for a single segment without any prefixes.
    pub fn search_scopes(&self) -> bool {
        self.search_scopes
    }

    pub fn has_more(&self) -> bool {
        !self.segments.is_empty()
    }

    /// The number of segments still to be consumed.
    pub fn remaining(&self) -> usize {
        self.segments.len() / 4
    }

    pub fn next_segment(&mut self) -> Option<NameSeg> {
        let (segment, rest) = self.segments.split_first_chunk::<4>()?;
        self.segments = rest;
        // Segments are validated when the path is parsed
        Some(NameSeg(*segment))
    }

    /// Render the path in ASL notation (e.g. `\_SB_.PCI0` or `^^FOO_`). The string is owned by the caller.
    pub fn stringify(&self) -> String {
        use alloc::string::ToString;
        self.to_string()
    }

    /// Copy the path out of the stream, so it can be kept after the stream has gone away.
    pub fn to_name(&self) -> AmlName {
        AmlName {
            is_absolute: self.is_absolute,
            height: self.height,
            search_scopes: self.search_scopes,
            segments: self.segments.to_vec(),
        }
    }
}

impl Iterator for AmlNamePath<'_> {
    type Item = NameSeg;

    fn next(&mut self) -> Option<NameSeg> {
        self.next_segment()
    }
}

impl fmt::Display for AmlNamePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absolute {
            write!(f, "\\")?;
        }
        for _ in 0..self.height {
            write!(f, "^")?;
        }
        for (i, segment) in (*self).enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", segment.as_str())?;
        }
        Ok(())
    }
}

impl fmt::Debug for AmlNamePath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AmlNamePath({})", self)
    }
}

/// An owned AML name. This is used where a name has to outlive the stream it was decoded from, such as an
/// unresolved name stored in a package, and in diagnostics.
#[derive(Clone, PartialEq, Eq)]
pub struct AmlName {
    is_absolute: bool,
    height: usize,
    search_scopes: bool,
    segments: Vec<u8>,
}

impl AmlName {
    pub fn root() -> AmlName {
        AmlName { is_absolute: true, height: 0, search_scopes: false, segments: Vec::new() }
    }

    pub fn from_name_seg(seg: NameSeg) -> AmlName {
        AmlName { is_absolute: false, height: 0, search_scopes: true, segments: seg.0.to_vec() }
    }

    /// Borrow this name as a path, so it can be resolved in the same way as a name straight from a stream.
    pub fn as_path(&self) -> AmlNamePath<'_> {
        AmlNamePath {
            is_absolute: self.is_absolute,
            height: self.height,
            search_scopes: self.search_scopes,
            segments: &self.segments,
        }
    }

    pub fn is_absolute(&self) -> bool {
        self.is_absolute
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn search_rules_apply(&self) -> bool {
        self.search_scopes
    }

    /// Append a segment to the end of this name.
    pub fn push(&mut self, seg: NameSeg) {
        self.segments.extend_from_slice(&seg.0);
        self.search_scopes = !self.is_absolute && self.height == 0 && self.segments.len() == 4;
    }

    pub fn segments(&self) -> impl Iterator<Item = NameSeg> + '_ {
        self.as_path()
    }
}

impl FromStr for AmlName {
    type Err = AmlError;

    fn from_str(mut string: &str) -> Result<Self, Self::Err> {
        if string.is_empty() {
            return Err(AmlError::EmptyNamesAreInvalid);
        }

        let mut name = AmlName { is_absolute: false, height: 0, search_scopes: false, segments: Vec::new() };

        // If it starts with a \, make it an absolute name
        if let Some(rest) = string.strip_prefix('\\') {
            name.is_absolute = true;
            string = rest;
        } else {
            while let Some(rest) = string.strip_prefix('^') {
                name.height += 1;
                string = rest;
            }
        }

        if !string.is_empty() {
            for part in string.split('.') {
                name.segments.extend_from_slice(&NameSeg::from_str(part)?.0);
            }
        } else if !name.is_absolute {
            return Err(AmlError::EmptyNamesAreInvalid);
        }

        name.search_scopes = !name.is_absolute && name.height == 0 && name.segments.len() == 4;
        Ok(name)
    }
}

impl fmt::Display for AmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_path())
    }
}

impl fmt::Debug for AmlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AmlName({})", self.as_path())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NameSeg(pub(crate) [u8; 4]);

impl NameSeg {
    pub fn from_str(string: &str) -> Result<NameSeg, AmlError> {
        // Each NameSeg can only have four chars, and must have at least one
        if string.is_empty() || string.len() > 4 {
            return Err(AmlError::InvalidNameSeg([0xff, 0xff, 0xff, 0xff]));
        }

        // We pre-fill the array with '_', so it will already be correct if the length is < 4
        let mut seg = [b'_'; 4];
        seg[..string.len()].copy_from_slice(string.as_bytes());
        NameSeg::from_bytes(seg)
    }

    pub fn from_bytes(bytes: [u8; 4]) -> Result<NameSeg, AmlError> {
        if !is_lead_name_char(bytes[0]) || !bytes[1..].iter().all(|&c| is_name_char(c)) {
            return Err(AmlError::InvalidNameSeg(bytes));
        }
        Ok(NameSeg(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // Segments are only ever constructed from validated ASCII (or the root marker)
        str::from_utf8(&self.0).unwrap_or("????")
    }
}

// A list of ASCII codes is pretty much never useful, so we always just show it as a string
impl fmt::Debug for NameSeg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for NameSeg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub fn is_lead_name_char(c: u8) -> bool {
    c.is_ascii_uppercase() || c == b'_'
}

pub fn is_name_char(c: u8) -> bool {
    is_lead_name_char(c) || c.is_ascii_digit()
}
