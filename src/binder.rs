//! Parameter binding with scoped buffer ownership.
//!
//! cdb2api keeps bound names and values by address until the bindings are
//! cleared, so [`BoundParams`] owns every buffer it hands out and clears the
//! handle's bindings before any of them is freed.
#![allow(unsafe_code)]

use std::ffi::CString;

use crate::conversion::{EncodedValue, encode};
use crate::error::{Cdb2Error, translate};
use crate::native::{CDB2_OK, NativeHandle};
use crate::params::{Params, for_parameter};

/// Bindings live on a handle for as long as this value does.
///
/// Run the statement through [`handle`](Self::handle); dropping the value
/// clears the bindings on every exit path.
pub struct BoundParams<'h, H: NativeHandle> {
    handle: &'h mut H,
    names: Vec<CString>,
    values: Vec<EncodedValue>,
}

impl<'h, H: NativeHandle> BoundParams<'h, H> {
    /// Encode and bind every parameter.
    ///
    /// # Errors
    ///
    /// `InterfaceError` for a name containing a NUL byte, the conversion error
    /// (naming the parameter) for an unencodable value, or the translated
    /// native error when `cdb2_bind_param` fails. Anything bound before the
    /// failure is cleared.
    pub fn bind(handle: &'h mut H, params: &Params) -> Result<Self, Cdb2Error> {
        let mut bound = Self {
            handle,
            names: Vec::with_capacity(params.len()),
            values: Vec::with_capacity(params.len()),
        };
        for (name, value) in params {
            let c_name = CString::new(name).map_err(|_| {
                Cdb2Error::interface(format!("Parameter name {name:?} contains a NUL byte"))
            })?;
            let encoded =
                encode(value).map_err(|err| for_parameter(err, value.type_name(), name))?;
            tracing::trace!(
                parameter = name,
                type_code = encoded.type_code,
                length = encoded.len(),
                "binding parameter"
            );
            bound.names.push(c_name);
            bound.values.push(encoded);
            bound.bind_last()?;
        }
        Ok(bound)
    }

    fn bind_last(&mut self) -> Result<(), Cdb2Error> {
        let (Some(name), Some(value)) = (self.names.last(), self.values.last()) else {
            return Ok(());
        };
        // SAFETY: `name` and the heap buffer behind `value` are owned by
        // `self` and never mutated; `Drop` clears the bindings before either
        // vector is freed. Moving the owning `CString`/`Box` does not move the
        // heap allocation the pointers refer to.
        let rc = unsafe {
            self.handle
                .bind_param(name, value.type_code, value.as_ptr(), value.len())
        };
        if rc == CDB2_OK {
            Ok(())
        } else {
            Err(translate(rc, self.handle.errstr()))
        }
    }

    /// The handle, with the bindings in place.
    pub fn handle(&mut self) -> &mut H {
        self.handle
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<H: NativeHandle> Drop for BoundParams<'_, H> {
    fn drop(&mut self) {
        let rc = self.handle.clear_bindings();
        if rc != CDB2_OK {
            tracing::warn!(rc, "cdb2_clearbindings failed");
        }
    }
}
