//! # Virtual Dispatch
//!
//! Calling a foreign virtual method is two steps kept apart on purpose:
//!
//! 1. [`vtable_slot`] reads the vtable pointer of the object and the function
//!    pointer in slot `index`. This is plain memory access and works on any
//!    [`ReadMemory`], live or not.
//! 2. [`function_pointer`] or [`invoke_this_call`] turns that address into a
//!    typed call. This only makes sense when the target code is mapped into
//!    the current process.
//!
//! The caller is responsible for the calling convention: `this` is passed
//! as the first integer argument, which is what both the System V and the
//! Microsoft x64 conventions do for member functions.

use std::mem;

use crate::error::{Result, VidlibError};
use crate::memory::ReadMemory;
use crate::types::Address;

/// Most arguments [`invoke_this_call`] passes besides `this`.
pub const MAX_CALL_ARGS: usize = 4;

/// Address stored in slot `index` of the vtable of the object at `object`.
///
/// ## Errors
///
/// `MemoryRead` if either pointer cannot be read; `InvalidArgument` for a
/// null object.
pub fn vtable_slot<M: ReadMemory + ?Sized>(memory: &M, object: Address, index: usize) -> Result<Address>
{
    if object.is_null() {
        return Err(VidlibError::InvalidArgument("virtual call on a null object".to_string()));
    }
    let vtable = memory.read_pointer(object)?;
    let slot = (index as u64).wrapping_mul(memory.pointer_width().size() as u64);
    memory.read_pointer(vtable + slot)
}

fn code_address(function: Address) -> Result<usize>
{
    if function.is_null() {
        return Err(VidlibError::InvalidArgument("null function pointer".to_string()));
    }
    usize::try_from(function.value())
        .map_err(|_| VidlibError::InvalidArgument(format!("function address {function} does not fit this process")))
}

/// Reinterpret `function` as a function pointer of type `F`.
///
/// ## Errors
///
/// `InvalidArgument` for a null address, an address that does not fit a
/// pointer of this process, or an `F` that is not pointer-sized.
///
/// ## Safety
///
/// `F` must be an `extern` function pointer type whose signature and ABI
/// match the code at `function`, and that code must be mapped in the current
/// process for as long as the pointer is used.
pub unsafe fn function_pointer<F: Copy>(function: Address) -> Result<F>
{
    if mem::size_of::<F>() != mem::size_of::<usize>() {
        return Err(VidlibError::InvalidArgument(format!(
            "`{}` is not a function pointer type",
            std::any::type_name::<F>()
        )));
    }
    let raw = code_address(function)?;
    // SAFETY: sizes checked above; validity of the pointer is the caller's contract.
    Ok(unsafe { mem::transmute_copy::<usize, F>(&raw) })
}

/// Call the member function at `function` with `this` and up to
/// [`MAX_CALL_ARGS`] integer-sized arguments, returning the integer result.
///
/// ## Errors
///
/// `InvalidArgument` for a null function or too many arguments.
///
/// ## Safety
///
/// `function` must be code in the current process that takes `this` plus
/// exactly `args.len()` integer-sized arguments in the C calling convention
/// and returns an integer-sized value (or nothing). `this` must be an object
/// the function accepts.
pub unsafe fn invoke_this_call(function: Address, this: Address, args: &[usize]) -> Result<usize>
{
    type Call0 = unsafe extern "C" fn(usize) -> usize;
    type Call1 = unsafe extern "C" fn(usize, usize) -> usize;
    type Call2 = unsafe extern "C" fn(usize, usize, usize) -> usize;
    type Call3 = unsafe extern "C" fn(usize, usize, usize, usize) -> usize;
    type Call4 = unsafe extern "C" fn(usize, usize, usize, usize, usize) -> usize;

    let this = usize::try_from(this.value())
        .map_err(|_| VidlibError::InvalidArgument(format!("object address {this} does not fit this process")))?;

    // SAFETY: forwarded to the caller's contract.
    unsafe {
        match *args {
            [] => Ok(function_pointer::<Call0>(function)?(this)),
            [a] => Ok(function_pointer::<Call1>(function)?(this, a)),
            [a, b] => Ok(function_pointer::<Call2>(function)?(this, a, b)),
            [a, b, c] => Ok(function_pointer::<Call3>(function)?(this, a, b, c)),
            [a, b, c, d] => Ok(function_pointer::<Call4>(function)?(this, a, b, c, d)),
            _ => Err(VidlibError::InvalidArgument(format!(
                "virtual calls take at most {MAX_CALL_ARGS} arguments, got {}",
                args.len()
            ))),
        }
    }
}
