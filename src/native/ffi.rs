//! [`Driver`] backed by the real cdb2api client library, loaded at runtime.
//!
//! The library is found through the `CDB2API_LIB` environment variable, or by
//! its default name on the loader's search path.

use std::env;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::ptr::{self, NonNull};
use std::sync::Arc;

use libloading::{Library, Symbol};

use super::{CDB2_OK, Driver, NativeHandle, codes};
use crate::error::Cdb2Error;
use crate::types::{ConnectionFlags, Effects};

/// Library name used when `CDB2API_LIB` is unset.
pub const DEFAULT_LIBRARY: &str = "libcdb2api.so";

#[repr(C)]
struct Cdb2Hndl {
    _private: [u8; 0],
}

#[repr(C)]
#[derive(Default)]
struct Cdb2Effects {
    num_affected: c_int,
    num_selected: c_int,
    num_updated: c_int,
    num_deleted: c_int,
    num_inserted: c_int,
}

struct Api {
    open: unsafe extern "C" fn(*mut *mut Cdb2Hndl, *const c_char, *const c_char, c_int) -> c_int,
    close: unsafe extern "C" fn(*mut Cdb2Hndl) -> c_int,
    run_statement: unsafe extern "C" fn(*mut Cdb2Hndl, *const c_char) -> c_int,
    run_statement_typed:
        unsafe extern "C" fn(*mut Cdb2Hndl, *const c_char, c_int, *mut c_int) -> c_int,
    next_record: unsafe extern "C" fn(*mut Cdb2Hndl) -> c_int,
    get_effects: unsafe extern "C" fn(*mut Cdb2Hndl, *mut Cdb2Effects) -> c_int,
    bind_param:
        unsafe extern "C" fn(*mut Cdb2Hndl, *const c_char, c_int, *const c_void, c_int) -> c_int,
    clearbindings: unsafe extern "C" fn(*mut Cdb2Hndl) -> c_int,
    clear_ack: unsafe extern "C" fn(*mut Cdb2Hndl) -> c_int,
    numcolumns: unsafe extern "C" fn(*mut Cdb2Hndl) -> c_int,
    column_name: unsafe extern "C" fn(*mut Cdb2Hndl, c_int) -> *const c_char,
    column_type: unsafe extern "C" fn(*mut Cdb2Hndl, c_int) -> c_int,
    column_size: unsafe extern "C" fn(*mut Cdb2Hndl, c_int) -> c_int,
    column_value: unsafe extern "C" fn(*mut Cdb2Hndl, c_int) -> *mut c_void,
    errstr: unsafe extern "C" fn(*mut Cdb2Hndl) -> *const c_char,
}

impl Api {
    /// # Safety
    ///
    /// `lib` must be a cdb2api build whose exported symbols have the
    /// signatures declared above.
    unsafe fn load(lib: &Library) -> Result<Self, libloading::Error> {
        unsafe fn get<T: Copy>(lib: &Library, name: &[u8]) -> Result<T, libloading::Error> {
            let sym: Symbol<T> = unsafe { lib.get::<T>(name)? };
            Ok(*sym)
        }
        unsafe {
            Ok(Self {
                open: get(lib, b"cdb2_open\0")?,
                close: get(lib, b"cdb2_close\0")?,
                run_statement: get(lib, b"cdb2_run_statement\0")?,
                run_statement_typed: get(lib, b"cdb2_run_statement_typed\0")?,
                next_record: get(lib, b"cdb2_next_record\0")?,
                get_effects: get(lib, b"cdb2_get_effects\0")?,
                bind_param: get(lib, b"cdb2_bind_param\0")?,
                clearbindings: get(lib, b"cdb2_clearbindings\0")?,
                clear_ack: get(lib, b"cdb2_clear_ack\0")?,
                numcolumns: get(lib, b"cdb2_numcolumns\0")?,
                column_name: get(lib, b"cdb2_column_name\0")?,
                column_type: get(lib, b"cdb2_column_type\0")?,
                column_size: get(lib, b"cdb2_column_size\0")?,
                column_value: get(lib, b"cdb2_column_value\0")?,
                errstr: get(lib, b"cdb2_errstr\0")?,
            })
        }
    }
}

struct Loaded {
    api: Api,
    // Keeps the symbols in `api` valid.
    _lib: Library,
}

/// Opens handles through a dynamically loaded cdb2api.
#[derive(Clone)]
pub struct FfiDriver {
    loaded: Arc<Loaded>,
}

impl std::fmt::Debug for FfiDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FfiDriver").finish_non_exhaustive()
    }
}

impl FfiDriver {
    /// Load the library named by `CDB2API_LIB`, or [`DEFAULT_LIBRARY`].
    ///
    /// # Errors
    ///
    /// `InterfaceError` when the library cannot be loaded or lacks a symbol.
    pub fn load() -> Result<Self, Cdb2Error> {
        let path = env::var("CDB2API_LIB").unwrap_or_else(|_| DEFAULT_LIBRARY.to_string());
        Self::load_from(&path)
    }

    /// # Errors
    ///
    /// `InterfaceError` when the library cannot be loaded or lacks a symbol.
    pub fn load_from(path: &str) -> Result<Self, Cdb2Error> {
        tracing::debug!(path, "loading cdb2api");
        // SAFETY: loading runs the library's initialisers; cdb2api has no
        // requirements on the loading thread.
        let lib = unsafe { Library::new(path) }.map_err(|e| {
            Cdb2Error::interface(format!("Failed to load cdb2api from '{path}': {e}"))
        })?;
        // SAFETY: the symbol signatures match cdb2api.h.
        let api = unsafe { Api::load(&lib) }.map_err(|e| {
            Cdb2Error::interface(format!("Failed to resolve cdb2api symbols in '{path}': {e}"))
        })?;
        Ok(Self {
            loaded: Arc::new(Loaded { api, _lib: lib }),
        })
    }
}

impl Driver for FfiDriver {
    type Handle = FfiHandle;

    fn open(&self, dbname: &str, tier: &str, flags: ConnectionFlags) -> (i32, FfiHandle) {
        let mut handle = FfiHandle {
            loaded: Arc::clone(&self.loaded),
            raw: None,
            local_error: Vec::new(),
            column_names: Vec::new(),
        };
        let (Ok(dbname), Ok(tier)) = (CString::new(dbname), CString::new(tier)) else {
            handle.local_error = b"database name or tier contains a NUL byte".to_vec();
            return (codes::BADREQ, handle);
        };
        let mut raw: *mut Cdb2Hndl = ptr::null_mut();
        // SAFETY: both strings are NUL-terminated and outlive the call.
        let rc = unsafe {
            (self.loaded.api.open)(&mut raw, dbname.as_ptr(), tier.as_ptr(), flags.bits())
        };
        handle.raw = NonNull::new(raw);
        if handle.raw.is_none() && rc == CDB2_OK {
            handle.local_error = b"cdb2_open returned no handle".to_vec();
            return (codes::INTERNAL, handle);
        }
        (rc, handle)
    }
}

/// One `cdb2_hndl_tp`, closed on drop if [`NativeHandle::close`] was not
/// called.
pub struct FfiHandle {
    loaded: Arc<Loaded>,
    raw: Option<NonNull<Cdb2Hndl>>,
    local_error: Vec<u8>,
    column_names: Vec<Vec<u8>>,
}

impl FfiHandle {
    fn raw(&self) -> Option<*mut Cdb2Hndl> {
        self.raw.map(NonNull::as_ptr)
    }

    /// The raw handle, with any locally raised error cleared.
    fn live(&mut self) -> Result<*mut Cdb2Hndl, i32> {
        self.local_error.clear();
        self.raw().ok_or_else(|| {
            self.local_error = b"handle is not open".to_vec();
            codes::NOTCONNECTED
        })
    }

    fn sql(&mut self, sql: &str) -> Result<CString, i32> {
        CString::new(sql).map_err(|_| {
            self.local_error = b"SQL statement contains a NUL byte".to_vec();
            codes::BADREQ
        })
    }

    /// Cache the names of the current result set's columns.
    fn load_column_names(&mut self) {
        self.column_names.clear();
        let Some(raw) = self.raw() else { return };
        let api = &self.loaded.api;
        // SAFETY: `raw` is a live handle; the returned names are copied
        // before the next call on it.
        let count = unsafe { (api.numcolumns)(raw) }.max(0);
        for col in 0..count {
            let name = unsafe { (api.column_name)(raw, col) };
            let bytes = if name.is_null() {
                Vec::new()
            } else {
                unsafe { CStr::from_ptr(name) }.to_bytes().to_vec()
            };
            self.column_names.push(bytes);
        }
    }

    fn finish_run(&mut self, rc: i32) -> i32 {
        self.load_column_names();
        rc
    }
}

impl NativeHandle for FfiHandle {
    fn close(mut self) -> i32 {
        match self.raw.take() {
            // SAFETY: the handle is live and is not used again.
            Some(raw) => unsafe { (self.loaded.api.close)(raw.as_ptr()) },
            None => CDB2_OK,
        }
    }

    fn run_statement(&mut self, sql: &str) -> i32 {
        let raw = match self.live() {
            Ok(raw) => raw,
            Err(rc) => return rc,
        };
        let sql = match self.sql(sql) {
            Ok(sql) => sql,
            Err(rc) => return rc,
        };
        // SAFETY: live handle, NUL-terminated statement.
        let rc = unsafe { (self.loaded.api.run_statement)(raw, sql.as_ptr()) };
        self.finish_run(rc)
    }

    fn run_statement_typed(&mut self, sql: &str, types: &[i32]) -> i32 {
        let raw = match self.live() {
            Ok(raw) => raw,
            Err(rc) => return rc,
        };
        let sql = match self.sql(sql) {
            Ok(sql) => sql,
            Err(rc) => return rc,
        };
        let Ok(ntypes) = c_int::try_from(types.len()) else {
            self.local_error = b"too many column types".to_vec();
            return codes::BADREQ;
        };
        let mut types = types.to_vec();
        // SAFETY: live handle; `types` holds `ntypes` entries for the call.
        let rc = unsafe {
            (self.loaded.api.run_statement_typed)(raw, sql.as_ptr(), ntypes, types.as_mut_ptr())
        };
        self.finish_run(rc)
    }

    fn next_record(&mut self) -> i32 {
        let raw = match self.live() {
            Ok(raw) => raw,
            Err(rc) => return rc,
        };
        // SAFETY: live handle.
        unsafe { (self.loaded.api.next_record)(raw) }
    }

    fn get_effects(&mut self, effects: &mut Effects) -> i32 {
        let raw = match self.live() {
            Ok(raw) => raw,
            Err(rc) => return rc,
        };
        let mut native = Cdb2Effects::default();
        // SAFETY: live handle; `native` matches `cdb2_effects_tp`.
        let rc = unsafe { (self.loaded.api.get_effects)(raw, &mut native) };
        *effects = Effects {
            num_affected: native.num_affected,
            num_selected: native.num_selected,
            num_updated: native.num_updated,
            num_deleted: native.num_deleted,
            num_inserted: native.num_inserted,
        };
        rc
    }

    unsafe fn bind_param(
        &mut self,
        name: &CStr,
        type_code: i32,
        value: *const u8,
        length: usize,
    ) -> i32 {
        let raw = match self.live() {
            Ok(raw) => raw,
            Err(rc) => return rc,
        };
        let Ok(length) = c_int::try_from(length) else {
            self.local_error = b"parameter value is too large".to_vec();
            return codes::BADREQ;
        };
        // SAFETY: the caller keeps `name` and `value` alive until
        // `clear_bindings`.
        unsafe {
            (self.loaded.api.bind_param)(raw, name.as_ptr(), type_code, value.cast(), length)
        }
    }

    fn clear_bindings(&mut self) -> i32 {
        let raw = match self.live() {
            Ok(raw) => raw,
            Err(rc) => return rc,
        };
        // SAFETY: live handle.
        unsafe { (self.loaded.api.clearbindings)(raw) }
    }

    fn clear_ack(&mut self) -> i32 {
        let raw = match self.live() {
            Ok(raw) => raw,
            Err(rc) => return rc,
        };
        // SAFETY: live handle.
        unsafe { (self.loaded.api.clear_ack)(raw) }
    }

    fn num_columns(&self) -> usize {
        self.column_names.len()
    }

    fn column_name(&self, col: usize) -> &[u8] {
        self.column_names.get(col).map_or(&[], Vec::as_slice)
    }

    fn column_type(&self, col: usize) -> i32 {
        let (Some(raw), Ok(col)) = (self.raw(), c_int::try_from(col)) else {
            return 0;
        };
        // SAFETY: live handle.
        unsafe { (self.loaded.api.column_type)(raw, col) }
    }

    fn column_value(&self, col: usize) -> Option<&[u8]> {
        let raw = self.raw()?;
        let col = c_int::try_from(col).ok()?;
        let api = &self.loaded.api;
        // SAFETY: live handle; the value buffer belongs to the handle and
        // stays put until the next `next_record`, which needs `&mut self`.
        unsafe {
            let value = (api.column_value)(raw, col);
            if value.is_null() {
                return None;
            }
            let size = usize::try_from((api.column_size)(raw, col)).unwrap_or(0);
            Some(std::slice::from_raw_parts(value.cast::<u8>(), size))
        }
    }

    fn errstr(&self) -> &[u8] {
        match self.raw() {
            Some(raw) if self.local_error.is_empty() => {
                // SAFETY: live handle; the message lives as long as the
                // handle's current state, which `&self` pins.
                let message = unsafe { (self.loaded.api.errstr)(raw) };
                if message.is_null() {
                    &[]
                } else {
                    unsafe { CStr::from_ptr(message) }.to_bytes()
                }
            }
            _ => &self.local_error,
        }
    }
}

impl Drop for FfiHandle {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            // SAFETY: the handle is live and is not used again.
            let rc = unsafe { (self.loaded.api.close)(raw.as_ptr()) };
            if rc != CDB2_OK {
                tracing::warn!(rc, "cdb2_close failed while dropping handle");
            }
        }
    }
}
