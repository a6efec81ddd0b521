//! Wide-string and IPv4 address conversions at the wire boundary.
//!
//! Text crosses the boundary as NUL-terminated UTF-16, addresses as host
//! order `u32` values.

use std::net::Ipv4Addr;

use crate::error::{Error, Result};

/// Longest string the server may hand back, in UTF-16 units.
///
/// Reading stops here even if no terminator was seen.
pub const MAX_WIDE_LEN: usize = 32_767;

/// An owned, NUL-terminated UTF-16 buffer sized to fit exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WideString(Box<[u16]>);

impl WideString {
    /// Encodes `text`, appending the terminator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Encoding`] if `text` contains a NUL, which would
    /// silently truncate it on the other side.
    pub fn new(text: &str) -> Result<Self> {
        if text.contains('\0') {
            return Err(Error::Encoding(format!(
                "String contains an embedded NUL: {:?}",
                text
            )));
        }
        let units: Vec<u16> = text.encode_utf16().chain(std::iter::once(0)).collect();
        Ok(Self(units.into_boxed_slice()))
    }

    /// The buffer including its terminator.
    pub fn as_units(&self) -> &[u16] {
        &self.0
    }

    /// Length in UTF-16 units, excluding the terminator.
    pub fn len(&self) -> usize {
        self.0.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pointer for `LPWSTR` fields. The remote side only reads through it.
    pub fn as_wire_ptr(&self) -> *mut u16 {
        self.0.as_ptr().cast_mut()
    }

    pub fn to_string_lossy(&self) -> String {
        from_wide_units(&self.0)
    }
}

/// Decodes UTF-16 up to the first NUL or the end of `units`, whichever comes first.
pub fn from_wide_units(units: &[u16]) -> String {
    let end = units.iter().position(|&unit| unit == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..end])
}

/// Reads a NUL-terminated UTF-16 string owned by the remote side.
///
/// A null pointer reads as the empty string.
///
/// # Errors
///
/// Returns [`Error::InvalidResponse`] if no terminator appears within
/// [`MAX_WIDE_LEN`] units.
///
/// # Safety
///
/// `ptr` must be null or point to readable memory that extends at least to
/// its terminator or to `MAX_WIDE_LEN` units, whichever is shorter.
pub unsafe fn read_wide_ptr(ptr: *const u16) -> Result<String> {
    if ptr.is_null() {
        return Ok(String::new());
    }

    let mut len = 0;
    // SAFETY: the caller guarantees every unit up to the terminator is readable.
    while unsafe { *ptr.add(len) } != 0 {
        len += 1;
        if len == MAX_WIDE_LEN {
            return Err(Error::InvalidResponse(format!(
                "Wide string exceeds {} units without a terminator",
                MAX_WIDE_LEN
            )));
        }
    }

    // SAFETY: `len` units before the terminator were just read.
    let units = unsafe { std::slice::from_raw_parts(ptr, len) };
    Ok(String::from_utf16_lossy(units))
}

pub fn ip_to_uint32(ip: Ipv4Addr) -> u32 {
    u32::from(ip)
}

pub fn uint32_to_ip(value: u32) -> Ipv4Addr {
    Ipv4Addr::from(value)
}

/// Parses dotted-quad text into an address.
pub fn parse_ipv4(text: &str) -> Result<Ipv4Addr> {
    text.trim()
        .parse()
        .map_err(|_| Error::Encoding(format!("Invalid IPv4 address: {:?}", text)))
}
