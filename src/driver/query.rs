//! Two-phase info queries
//!
//! Every `clGet*Info` accessor goes through [`query_info`]: ask for the
//! byte length with a null buffer, allocate exactly that many bytes, ask
//! again, decode. Drivers reject over- and under-sized buffers, so the
//! scratch buffer is never reused or padded.

use std::ffi::c_void;
use std::ptr;

use super::sys::{cl_uint, InfoFn};
use crate::error::{check, ClError, Result};

/// Run the two-phase protocol through `call(size, buffer, size_ret)`
///
/// # Arguments
///
/// * `what` - Object kind, used in error messages
/// * `param` - Info parameter, used in error messages
/// * `call` - Issues one driver call with the given buffer
///
/// # Errors
///
/// Returns `Err(ClError::Query)` if either phase reports a failure, and
/// `Err(ClError::InfoSize)` if the value phase writes a different byte count
/// than the size phase reported.
pub fn query_info<F>(what: &'static str, param: cl_uint, mut call: F) -> Result<Vec<u8>>
where
    F: FnMut(usize, *mut c_void, *mut usize) -> i32,
{
    let query_err = |code| ClError::Query { what, param, code };

    let mut size = 0usize;
    check(call(0, ptr::null_mut(), &mut size), query_err)?;

    let mut scratch = vec![0u8; size];
    if size == 0 {
        return Ok(scratch);
    }

    let mut written = 0usize;
    check(
        call(size, scratch.as_mut_ptr().cast::<c_void>(), &mut written),
        query_err,
    )?;
    if written != size {
        return Err(ClError::InfoSize {
            what,
            expected: size,
            actual: written,
        });
    }
    Ok(scratch)
}

/// Two-phase query against a standard `clGet*Info(handle, param, ...)` entry point
pub(crate) fn get_info<H: Copy>(
    info: InfoFn<H>,
    handle: H,
    what: &'static str,
    param: cl_uint,
) -> Result<Vec<u8>> {
    query_info(what, param, |size, value, size_ret| {
        // SAFETY: query_info passes either (0, null) or a buffer of exactly `size` bytes
        unsafe { info(handle, param, size, value, size_ret) }
    })
}

// ============================================================================
// Decoders
// ============================================================================

fn fixed<const N: usize>(what: &'static str, bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| ClError::InfoSize {
        what,
        expected: N,
        actual: bytes.len(),
    })
}

/// Decode a `cl_uint`
pub fn decode_u32(what: &'static str, bytes: &[u8]) -> Result<u32> {
    fixed::<4>(what, bytes).map(u32::from_ne_bytes)
}

/// Decode a `cl_int`
pub fn decode_i32(what: &'static str, bytes: &[u8]) -> Result<i32> {
    fixed::<4>(what, bytes).map(i32::from_ne_bytes)
}

/// Decode a `cl_ulong` or bitfield
pub fn decode_u64(what: &'static str, bytes: &[u8]) -> Result<u64> {
    fixed::<8>(what, bytes).map(u64::from_ne_bytes)
}

/// Decode a `size_t` or pointer-sized handle
pub fn decode_usize(what: &'static str, bytes: &[u8]) -> Result<usize> {
    const N: usize = std::mem::size_of::<usize>();
    fixed::<N>(what, bytes).map(usize::from_ne_bytes)
}

/// Decode a `cl_bool`
pub fn decode_bool(what: &'static str, bytes: &[u8]) -> Result<bool> {
    decode_u32(what, bytes).map(|v| v != 0)
}

/// Decode an array of `size_t` (or handles)
pub fn decode_usize_list(what: &'static str, bytes: &[u8]) -> Result<Vec<usize>> {
    const N: usize = std::mem::size_of::<usize>();
    if bytes.len() % N != 0 {
        return Err(ClError::InfoSize {
            what,
            expected: bytes.len() / N * N,
            actual: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(N)
        .map(|chunk| {
            let mut raw = [0u8; N];
            raw.copy_from_slice(chunk);
            usize::from_ne_bytes(raw)
        })
        .collect())
}

/// Decode a NUL-terminated string; trailing NULs are stripped
#[must_use]
pub fn decode_string(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Split a space-separated list, dropping empty entries
#[must_use]
pub fn split_list(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// Split a `;`-separated list (kernel names), dropping empty entries
#[must_use]
pub fn split_semicolons(s: &str) -> Vec<String> {
    s.split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Typed accessors
// ============================================================================

pub(crate) fn info_u32<H: Copy>(
    info: InfoFn<H>,
    handle: H,
    what: &'static str,
    param: cl_uint,
) -> Result<u32> {
    decode_u32(what, &get_info(info, handle, what, param)?)
}

pub(crate) fn info_u64<H: Copy>(
    info: InfoFn<H>,
    handle: H,
    what: &'static str,
    param: cl_uint,
) -> Result<u64> {
    decode_u64(what, &get_info(info, handle, what, param)?)
}

pub(crate) fn info_usize<H: Copy>(
    info: InfoFn<H>,
    handle: H,
    what: &'static str,
    param: cl_uint,
) -> Result<usize> {
    decode_usize(what, &get_info(info, handle, what, param)?)
}

pub(crate) fn info_string<H: Copy>(
    info: InfoFn<H>,
    handle: H,
    what: &'static str,
    param: cl_uint,
) -> Result<String> {
    Ok(decode_string(&get_info(info, handle, what, param)?))
}

pub(crate) fn info_ptr<H: Copy>(
    info: InfoFn<H>,
    handle: H,
    what: &'static str,
    param: cl_uint,
) -> Result<*mut c_void> {
    info_usize(info, handle, what, param).map(|addr| addr as *mut c_void)
}

pub(crate) fn info_ptr_list<H: Copy>(
    info: InfoFn<H>,
    handle: H,
    what: &'static str,
    param: cl_uint,
) -> Result<Vec<*mut c_void>> {
    let bytes = get_info(info, handle, what, param)?;
    Ok(decode_usize_list(what, &bytes)?
        .into_iter()
        .map(|addr| addr as *mut c_void)
        .collect())
}
