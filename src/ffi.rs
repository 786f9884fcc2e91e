//! C FFI interface for native hosts.
//!
//! Exposes the synchronous session reconciler so a host that owns its own
//! networking can feed fetch results and pushed chunks directly.
//! Naming convention: ptysync_<module>_<action>

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use crate::error::FetchError;
use crate::packet;
use crate::sync::{PtyContent, SessionKey, TermSession, UpdateOutcome};
use crate::terminal::VtEmulator;

// ═══════════════════════════════════════════════════════════
// Session FFI
// ═══════════════════════════════════════════════════════════

/// Opaque pointer to a terminal session.
pub type PtySyncSessionHandle = *mut TermSession<VtEmulator>;

pub const PTYSYNC_APPLIED: i32 = 0;
pub const PTYSYNC_TRIMMED: i32 = 1;
pub const PTYSYNC_DUPLICATE: i32 = 2;
pub const PTYSYNC_GAP: i32 = 3;
pub const PTYSYNC_QUEUED: i32 = 4;
pub const PTYSYNC_SUPPRESSED: i32 = 5;

fn outcome_code(outcome: UpdateOutcome) -> i32 {
    match outcome {
        UpdateOutcome::Applied => PTYSYNC_APPLIED,
        UpdateOutcome::Trimmed { .. } => PTYSYNC_TRIMMED,
        UpdateOutcome::Duplicate => PTYSYNC_DUPLICATE,
        UpdateOutcome::GapAccepted { .. } => PTYSYNC_GAP,
        UpdateOutcome::Queued => PTYSYNC_QUEUED,
        UpdateOutcome::Suppressed => PTYSYNC_SUPPRESSED,
    }
}

fn c_str(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr).to_str().ok().map(str::to_owned) }
}

fn bytes<'a>(data: *const u8, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        unsafe { std::slice::from_raw_parts(data, len) }
    }
}

fn into_c_string(s: String) -> *mut c_char {
    CString::new(s).unwrap_or_default().into_raw()
}

/// Create a session for a command's output (`line_id` non-null) or a
/// remote's pty (`line_id` null, `id` is the remote id).
/// Returns null on failure.
#[no_mangle]
pub extern "C" fn ptysync_session_create(
    id: *const c_char,
    line_id: *const c_char,
    cols: u16,
    rows: u16,
) -> PtySyncSessionHandle {
    let Some(id) = c_str(id) else {
        return std::ptr::null_mut();
    };
    let key = match c_str(line_id) {
        Some(line_id) => SessionKey::command(id, line_id),
        None => SessionKey::remote(id),
    };
    let emulator = VtEmulator::new(cols as usize, rows as usize);
    let session = TermSession::new(key, emulator, crate::buffer::DEFAULT_INITIAL_CAPACITY);
    Box::into_raw(Box::new(session))
}

/// Destroy a session.
#[no_mangle]
pub extern "C" fn ptysync_session_destroy(handle: PtySyncSessionHandle) {
    if !handle.is_null() {
        unsafe {
            drop(Box::from_raw(handle));
        }
    }
}

/// Start a full reload. Returns 1 when the host should fetch, 0 when a
/// reload is already in flight, -1 on a bad handle.
#[no_mangle]
pub extern "C" fn ptysync_session_begin_reload(handle: PtySyncSessionHandle) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let session = unsafe { &mut *handle };
    i32::from(session.begin_reload())
}

/// Finish the in-flight reload with the fetched bytes and their offset.
#[no_mangle]
pub extern "C" fn ptysync_session_complete_reload(
    handle: PtySyncSessionHandle,
    offset: u64,
    data: *const u8,
    len: usize,
) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let session = unsafe { &mut *handle };
    let content = PtyContent {
        offset,
        data: bytes(data, len).to_vec(),
    };
    session.complete_reload(Ok(content));
    0
}

/// Fail the in-flight reload. `message` may be null.
#[no_mangle]
pub extern "C" fn ptysync_session_fail_reload(
    handle: PtySyncSessionHandle,
    message: *const c_char,
) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let session = unsafe { &mut *handle };
    let reason = c_str(message).unwrap_or_else(|| "unknown error".to_string());
    session.complete_reload(Err(FetchError::Host(reason)));
    0
}

/// Deliver a chunk starting at stream offset `position`.
/// Returns one of the `PTYSYNC_*` outcome codes, -1 on a bad handle.
#[no_mangle]
pub extern "C" fn ptysync_session_receive(
    handle: PtySyncSessionHandle,
    position: u64,
    data: *const u8,
    len: usize,
) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let session = unsafe { &mut *handle };
    outcome_code(session.receive_update(position, bytes(data, len)))
}

#[no_mangle]
pub extern "C" fn ptysync_session_resize(
    handle: PtySyncSessionHandle,
    cols: u16,
    rows: u16,
) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let session = unsafe { &mut *handle };
    session.resize(cols as usize, rows as usize);
    0
}

#[no_mangle]
pub extern "C" fn ptysync_session_set_running(handle: PtySyncSessionHandle, running: bool) -> i32 {
    if handle.is_null() {
        return -1;
    }
    let session = unsafe { &mut *handle };
    session.set_running(running);
    0
}

/// Rows a flex-height view should show.
#[no_mangle]
pub extern "C" fn ptysync_session_used_rows(handle: PtySyncSessionHandle) -> i64 {
    if handle.is_null() {
        return -1;
    }
    let session = unsafe { &mut *handle };
    session.used_rows() as i64
}

#[no_mangle]
pub extern "C" fn ptysync_session_offset(handle: PtySyncSessionHandle) -> u64 {
    if handle.is_null() {
        return 0;
    }
    unsafe { (*handle).offset() }
}

#[no_mangle]
pub extern "C" fn ptysync_session_version(handle: PtySyncSessionHandle) -> u64 {
    if handle.is_null() {
        return 0;
    }
    unsafe { (*handle).version() }
}

/// Session status as JSON.
/// Caller must free with ptysync_string_free.
#[no_mangle]
pub extern "C" fn ptysync_session_status(handle: PtySyncSessionHandle) -> *mut c_char {
    if handle.is_null() {
        return std::ptr::null_mut();
    }
    let session = unsafe { &mut *handle };
    match serde_json::to_string(&session.status()) {
        Ok(json) => into_c_string(json),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Text of one visible row.
/// Caller must free with ptysync_string_free.
#[no_mangle]
pub extern "C" fn ptysync_session_line_text(handle: PtySyncSessionHandle, row: u32) -> *mut c_char {
    if handle.is_null() {
        return std::ptr::null_mut();
    }
    let session = unsafe { &*handle };
    into_c_string(session.model().get_line_text(row as usize))
}

// ═══════════════════════════════════════════════════════════
// Packet FFI
// ═══════════════════════════════════════════════════════════

/// Parse one framed line (without its newline) and return the packet body
/// as JSON, or null if the line is not a packet.
/// Caller must free with ptysync_string_free.
#[no_mangle]
pub extern "C" fn ptysync_packet_parse(line: *const u8, len: usize) -> *mut c_char {
    match packet::parse_line(bytes(line, len)) {
        Ok(pk) => into_c_string(pk.body.to_string()),
        Err(e) => {
            log::debug!("not a packet: {}", e);
            std::ptr::null_mut()
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Utility FFI
// ═══════════════════════════════════════════════════════════

/// Free a string allocated by Rust.
#[no_mangle]
pub extern "C" fn ptysync_string_free(s: *mut c_char) {
    if !s.is_null() {
        unsafe {
            drop(CString::from_raw(s));
        }
    }
}

/// Initialize the Rust logger.
#[no_mangle]
pub extern "C" fn ptysync_init() {
    crate::logging::init();
    log::info!("ptysync core initialized");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        ptysync_string_free(ptr);
        s
    }

    #[test]
    fn test_session_lifecycle() {
        let screen = CString::new("s1").unwrap();
        let line = CString::new("l1").unwrap();
        let handle = ptysync_session_create(screen.as_ptr(), line.as_ptr(), 20, 4);
        assert!(!handle.is_null());

        assert_eq!(ptysync_session_begin_reload(handle), 1);
        assert_eq!(ptysync_session_begin_reload(handle), 0);
        let queued = b"def";
        assert_eq!(ptysync_session_receive(handle, 3, queued.as_ptr(), queued.len()), PTYSYNC_QUEUED);

        let loaded = b"abc";
        assert_eq!(ptysync_session_complete_reload(handle, 0, loaded.as_ptr(), loaded.len()), 0);
        assert_eq!(ptysync_session_offset(handle), 6);
        assert_eq!(take_string(ptysync_session_line_text(handle, 0)).trim_end(), "abcdef");

        let overlap = b"efg";
        assert_eq!(ptysync_session_receive(handle, 4, overlap.as_ptr(), overlap.len()), PTYSYNC_TRIMMED);
        assert_eq!(ptysync_session_offset(handle), 7);
        assert_eq!(ptysync_session_used_rows(handle), 1);

        let status = take_string(ptysync_session_status(handle));
        assert!(status.contains("\"offset\":7"));

        ptysync_session_destroy(handle);
    }

    #[test]
    fn test_failed_reload_suppresses_updates() {
        let remote = CString::new("r1").unwrap();
        let handle = ptysync_session_create(remote.as_ptr(), std::ptr::null(), 20, 4);
        assert_eq!(ptysync_session_begin_reload(handle), 1);
        let reason = CString::new("boom").unwrap();
        assert_eq!(ptysync_session_fail_reload(handle, reason.as_ptr()), 0);
        let data = b"x";
        assert_eq!(ptysync_session_receive(handle, 0, data.as_ptr(), 1), PTYSYNC_SUPPRESSED);
        ptysync_session_destroy(handle);
    }

    #[test]
    fn test_null_handles() {
        assert!(ptysync_session_create(std::ptr::null(), std::ptr::null(), 80, 25).is_null());
        assert_eq!(ptysync_session_begin_reload(std::ptr::null_mut()), -1);
        assert_eq!(ptysync_session_used_rows(std::ptr::null_mut()), -1);
        assert!(ptysync_session_status(std::ptr::null_mut()).is_null());
        ptysync_session_destroy(std::ptr::null_mut());
        ptysync_string_free(std::ptr::null_mut());
    }

    #[test]
    fn test_packet_parse() {
        let line = br#"##9{"a":"b"}"#;
        assert_eq!(take_string(ptysync_packet_parse(line.as_ptr(), line.len())), r#"{"a":"b"}"#);
        let junk = b"plain text";
        assert!(ptysync_packet_parse(junk.as_ptr(), junk.len()).is_null());
    }
}
