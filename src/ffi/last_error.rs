//! Per-thread last-error message for the C boundary.

use std::cell::RefCell;
use std::ffi::{c_char, CString};

use crate::error::{ErrorKind, TtsError};

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

pub(crate) fn clear() {
    LAST_ERROR.with(|e| *e.borrow_mut() = CString::default());
}

/// Store `"<Kind>: <message>"` for the calling thread.
pub(crate) fn set(kind: ErrorKind, message: &str) {
    let text = format!("{kind}: {message}").replace('\0', " ");
    log::debug!("{text}");
    let text = CString::new(text).unwrap_or_default();
    LAST_ERROR.with(|e| *e.borrow_mut() = text);
}

pub(crate) fn record(err: &TtsError) {
    set(err.kind(), &err.to_string());
}

/// Pointer to the current message; valid until the thread's next boundary call.
pub(crate) fn as_ptr() -> *const c_char {
    LAST_ERROR.with(|e| e.borrow().as_ptr())
}

#[cfg(test)]
pub(crate) fn message() -> String {
    LAST_ERROR.with(|e| e.borrow().to_string_lossy().into_owned())
}
