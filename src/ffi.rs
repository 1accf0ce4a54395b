//! FFI bindings for Synheart Pulse
//!
//! C-compatible entry points for the mobile host. Strings are null-terminated
//! UTF-8; returned strings are allocated here and must be released with
//! `pulse_free_string`. Packet bytes are passed as pointer + length.
//!
//! A hub handle may be shared across the host's BLE callback threads. A
//! workout handle must only be driven from one thread at a time; the host
//! calls `pulse_workout_check_signal` from its own timer.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::slice;
use std::sync::Arc;

use chrono::Utc;

use crate::config::PulseConfig;
use crate::decoder::PacketDecoder;
use crate::encoder::SummaryEncoder;
use crate::error::PulseError;
use crate::pipeline::PulseHub;
use crate::session::WorkoutSession;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// View a host buffer; NULL is only accepted for an empty buffer
unsafe fn bytes_from_raw<'a>(data: *const u8, len: usize) -> Option<&'a [u8]> {
    if data.is_null() {
        return if len == 0 { Some(&[][..]) } else { None };
    }
    Some(slice::from_raw_parts(data, len))
}

fn json_or_error<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&PulseError::from(e).to_string());
            ptr::null_mut()
        }
    }
}

fn status(result: Result<(), PulseError>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(e) => {
            set_last_error(&e.to_string());
            -1
        }
    }
}

// ============================================================================
// Stateless API
// ============================================================================

/// Decode one Heart Rate Measurement packet to a JSON sample.
///
/// # Safety
/// - `data` must point to `len` readable bytes (or be NULL with `len == 0`).
/// - `device_id` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`.
/// - Returns NULL on error; call `pulse_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pulse_decode_packet(
    data: *const u8,
    len: usize,
    device_id: *const c_char,
) -> *mut c_char {
    clear_last_error();

    let Some(bytes) = bytes_from_raw(data, len) else {
        set_last_error("Null packet pointer");
        return ptr::null_mut();
    };

    let device = match cstr_to_string(device_id) {
        Some(s) => s,
        None => {
            set_last_error("Invalid device_id string pointer");
            return ptr::null_mut();
        }
    };

    match PacketDecoder::decode(bytes, &device, None, Utc::now()) {
        Ok(sample) => json_or_error(&sample),
        Err(e) => {
            set_last_error(&PulseError::from(e).to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Hub API
// ============================================================================

/// Opaque handle to a PulseHub
pub struct PulseHubHandle {
    hub: Arc<PulseHub>,
}

/// Create a hub.
///
/// # Safety
/// - `config_json` must be NULL (defaults) or a valid null-terminated C
///   string holding a `PulseConfig` JSON object.
/// - Must be freed with `pulse_hub_free`.
/// - Returns NULL on error.
#[no_mangle]
pub unsafe extern "C" fn pulse_hub_new(config_json: *const c_char) -> *mut PulseHubHandle {
    clear_last_error();

    let config = if config_json.is_null() {
        PulseConfig::default()
    } else {
        let json = match cstr_to_string(config_json) {
            Some(s) => s,
            None => {
                set_last_error("Invalid config string pointer");
                return ptr::null_mut();
            }
        };
        match PulseConfig::from_json(&json) {
            Ok(config) => config,
            Err(e) => {
                set_last_error(&e.to_string());
                return ptr::null_mut();
            }
        }
    };

    match PulseHub::with_config(config) {
        Ok(hub) => Box::into_raw(Box::new(PulseHubHandle { hub: Arc::new(hub) })),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Free a hub. Workouts created from it stay valid.
///
/// # Safety
/// - `hub` must be a valid pointer returned by `pulse_hub_new`, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn pulse_hub_free(hub: *mut PulseHubHandle) {
    if !hub.is_null() {
        drop(Box::from_raw(hub));
    }
}

/// Register a connected device.
///
/// # Safety
/// - `hub` must be a valid pointer returned by `pulse_hub_new`.
/// - `device_id` must be a valid null-terminated C string; `display_name`
///   may be NULL.
/// - Returns 1 if newly registered, 0 if already known, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn pulse_hub_register(
    hub: *const PulseHubHandle,
    device_id: *const c_char,
    display_name: *const c_char,
) -> i32 {
    clear_last_error();

    if hub.is_null() {
        set_last_error("Null hub pointer");
        return -1;
    }
    let handle = &*hub;

    let device = match cstr_to_string(device_id) {
        Some(s) => s,
        None => {
            set_last_error("Invalid device_id string pointer");
            return -1;
        }
    };
    let name = cstr_to_string(display_name);

    i32::from(handle.hub.connect(&device, name.as_deref()))
}

/// Remove a disconnected device.
///
/// # Safety
/// - `hub` must be a valid pointer returned by `pulse_hub_new`.
/// - `device_id` must be a valid null-terminated C string.
/// - Returns 1 if the device was removed, 0 if unknown, -1 on error.
#[no_mangle]
pub unsafe extern "C" fn pulse_hub_unregister(
    hub: *const PulseHubHandle,
    device_id: *const c_char,
) -> i32 {
    clear_last_error();

    if hub.is_null() {
        set_last_error("Null hub pointer");
        return -1;
    }
    let handle = &*hub;

    match cstr_to_string(device_id) {
        Some(device) => i32::from(handle.hub.disconnect(&device)),
        None => {
            set_last_error("Invalid device_id string pointer");
            -1
        }
    }
}

/// Feed one raw notification.
///
/// # Safety
/// - `hub` must be a valid pointer returned by `pulse_hub_new`.
/// - `device_id` must be a valid null-terminated C string; `display_name`
///   may be NULL.
/// - `data` must point to `len` readable bytes (or be NULL with `len == 0`).
/// - Returns 0 when the sample was accepted, -1 when it was dropped; the
///   reason is available from `pulse_last_error`.
#[no_mangle]
pub unsafe extern "C" fn pulse_hub_on_raw_packet(
    hub: *const PulseHubHandle,
    device_id: *const c_char,
    display_name: *const c_char,
    data: *const u8,
    len: usize,
) -> i32 {
    clear_last_error();

    if hub.is_null() {
        set_last_error("Null hub pointer");
        return -1;
    }
    let handle = &*hub;

    let device = match cstr_to_string(device_id) {
        Some(s) => s,
        None => {
            set_last_error("Invalid device_id string pointer");
            return -1;
        }
    };
    let Some(bytes) = bytes_from_raw(data, len) else {
        set_last_error("Null packet pointer");
        return -1;
    };

    let name = cstr_to_string(display_name);

    status(
        handle
            .hub
            .process_packet(&device, name.as_deref(), bytes)
            .map(|_| ()),
    )
}

/// Per-device views as a JSON array.
///
/// # Safety
/// - `hub` must be a valid pointer returned by `pulse_hub_new`.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`.
#[no_mangle]
pub unsafe extern "C" fn pulse_hub_devices(hub: *const PulseHubHandle) -> *mut c_char {
    clear_last_error();

    if hub.is_null() {
        set_last_error("Null hub pointer");
        return ptr::null_mut();
    }
    json_or_error(&(*hub).hub.devices())
}

// ============================================================================
// Workout API
// ============================================================================

/// Opaque handle to a WorkoutSession
pub struct PulseWorkoutHandle {
    session: WorkoutSession,
}

/// Create an idle workout over the hub's devices.
///
/// # Safety
/// - `hub` must be a valid pointer returned by `pulse_hub_new`.
/// - Must be freed with `pulse_workout_free`.
#[no_mangle]
pub unsafe extern "C" fn pulse_workout_new(hub: *const PulseHubHandle) -> *mut PulseWorkoutHandle {
    clear_last_error();

    if hub.is_null() {
        set_last_error("Null hub pointer");
        return ptr::null_mut();
    }
    let session = (*hub).hub.new_workout();
    Box::into_raw(Box::new(PulseWorkoutHandle { session }))
}

/// Free a workout.
///
/// # Safety
/// - `workout` must be a valid pointer returned by `pulse_workout_new`, or NULL.
#[no_mangle]
pub unsafe extern "C" fn pulse_workout_free(workout: *mut PulseWorkoutHandle) {
    if !workout.is_null() {
        drop(Box::from_raw(workout));
    }
}

unsafe fn with_workout(
    workout: *mut PulseWorkoutHandle,
    action: impl FnOnce(&mut WorkoutSession) -> Result<(), PulseError>,
) -> i32 {
    clear_last_error();

    if workout.is_null() {
        set_last_error("Null workout pointer");
        return -1;
    }
    status(action(&mut (*workout).session))
}

/// Start the workout. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `workout` must be a valid pointer returned by `pulse_workout_new`.
#[no_mangle]
pub unsafe extern "C" fn pulse_workout_start(workout: *mut PulseWorkoutHandle) -> i32 {
    with_workout(workout, WorkoutSession::start)
}

/// Pause the workout. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `workout` must be a valid pointer returned by `pulse_workout_new`.
#[no_mangle]
pub unsafe extern "C" fn pulse_workout_pause(workout: *mut PulseWorkoutHandle) -> i32 {
    with_workout(workout, WorkoutSession::pause)
}

/// Resume the workout. Returns 0 on success, -1 on error.
///
/// # Safety
/// - `workout` must be a valid pointer returned by `pulse_workout_new`.
#[no_mangle]
pub unsafe extern "C" fn pulse_workout_resume(workout: *mut PulseWorkoutHandle) -> i32 {
    with_workout(workout, WorkoutSession::resume)
}

/// One watchdog tick.
///
/// # Safety
/// - `workout` must be a valid pointer returned by `pulse_workout_new`.
/// - Returns 1 if the workout was paused for signal loss, 0 otherwise,
///   -1 on error.
#[no_mangle]
pub unsafe extern "C" fn pulse_workout_check_signal(workout: *mut PulseWorkoutHandle) -> i32 {
    clear_last_error();

    if workout.is_null() {
        set_last_error("Null workout pointer");
        return -1;
    }
    i32::from((*workout).session.check_signal())
}

/// End the workout and return the final metrics as JSON (`null` when no
/// valid reading arrived).
///
/// # Safety
/// - `workout` must be a valid pointer returned by `pulse_workout_new`.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`.
/// - Returns NULL on error; call `pulse_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn pulse_workout_end(workout: *mut PulseWorkoutHandle) -> *mut c_char {
    clear_last_error();

    if workout.is_null() {
        set_last_error("Null workout pointer");
        return ptr::null_mut();
    }

    match (*workout).session.end() {
        Ok(metrics) => json_or_error(&metrics),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

/// Live metrics as JSON (`null` until a valid reading arrived).
///
/// # Safety
/// - `workout` must be a valid pointer returned by `pulse_workout_new`.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`.
#[no_mangle]
pub unsafe extern "C" fn pulse_workout_metrics(workout: *const PulseWorkoutHandle) -> *mut c_char {
    clear_last_error();

    if workout.is_null() {
        set_last_error("Null workout pointer");
        return ptr::null_mut();
    }
    json_or_error(&(*workout).session.metrics())
}

/// Workout summary as JSON, including live metrics while in progress.
///
/// # Safety
/// - `workout` must be a valid pointer returned by `pulse_workout_new`.
/// - Returns a newly allocated string that must be freed with `pulse_free_string`.
#[no_mangle]
pub unsafe extern "C" fn pulse_workout_summary(workout: *const PulseWorkoutHandle) -> *mut c_char {
    clear_last_error();

    if workout.is_null() {
        set_last_error("Null workout pointer");
        return ptr::null_mut();
    }
    let session = &(*workout).session;
    json_or_error(&SummaryEncoder::new().encode(session, session.metrics()))
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Pulse functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Pulse function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn pulse_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Pulse function call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn pulse_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

/// Get the Pulse library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn pulse_version() -> *const c_char {
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null());
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        pulse_free_string(ptr);
        s
    }

    unsafe fn last_error() -> String {
        let error = pulse_last_error();
        assert!(!error.is_null());
        CStr::from_ptr(error).to_str().unwrap().to_string()
    }

    #[test]
    fn test_ffi_decode_packet() {
        let device = CString::new("strap").unwrap();
        let packet = [0x10u8, 0x48, 0x00, 0x04];

        unsafe {
            let json = take_string(pulse_decode_packet(packet.as_ptr(), packet.len(), device.as_ptr()));
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value["heart_rate"], 72);
            assert_eq!(value["rr_intervals"][0], 1000.0);

            let result = pulse_decode_packet(ptr::null(), 0, device.as_ptr());
            assert!(result.is_null());
            assert!(last_error().to_lowercase().contains("empty"));
        }
    }

    #[test]
    fn test_ffi_hub_and_workout_lifecycle() {
        let a = CString::new("a").unwrap();
        let name = CString::new("Chest strap").unwrap();

        unsafe {
            let hub = pulse_hub_new(ptr::null());
            assert!(!hub.is_null());
            assert_eq!(pulse_hub_register(hub, a.as_ptr(), name.as_ptr()), 1);
            assert_eq!(pulse_hub_register(hub, a.as_ptr(), ptr::null()), 0);

            let workout = pulse_workout_new(hub);
            assert_eq!(pulse_workout_start(workout), 0);
            assert_eq!(take_string(pulse_workout_metrics(workout)), "null");

            let packet = [0x00u8, 0x96];
            assert_eq!(
                pulse_hub_on_raw_packet(hub, a.as_ptr(), name.as_ptr(), packet.as_ptr(), packet.len()),
                0
            );
            let history = (*hub).hub.registry().histories();
            assert_eq!(history[0][0].device_name.as_deref(), Some("Chest strap"));
            assert_eq!(pulse_workout_check_signal(workout), 0);

            let live: serde_json::Value =
                serde_json::from_str(&take_string(pulse_workout_metrics(workout))).unwrap();
            assert_eq!(live["average_heart_rate"], 150);

            let summary: serde_json::Value =
                serde_json::from_str(&take_string(pulse_workout_summary(workout))).unwrap();
            assert_eq!(summary["state"]["state"], "active");
            assert_eq!(summary["devices"][0]["display_name"], "Chest strap");

            assert_eq!(pulse_workout_pause(workout), 0);
            assert_eq!(pulse_workout_resume(workout), 0);

            let metrics: serde_json::Value =
                serde_json::from_str(&take_string(pulse_workout_end(workout))).unwrap();
            assert_eq!(metrics["max_heart_rate"], 150);

            assert!(pulse_workout_end(workout).is_null());
            assert!(last_error().contains("end"));

            assert_eq!(pulse_hub_unregister(hub, a.as_ptr()), 1);
            pulse_workout_free(workout);
            pulse_hub_free(hub);
        }
    }

    #[test]
    fn test_ffi_dropped_packets_report_reason() {
        let ghost = CString::new("ghost").unwrap();

        unsafe {
            let hub = pulse_hub_new(ptr::null());
            let packet = [0x00u8, 0x50];
            assert_eq!(
                pulse_hub_on_raw_packet(hub, ghost.as_ptr(), ptr::null(), packet.as_ptr(), packet.len()),
                -1
            );
            assert!(last_error().contains("ghost"));

            let devices = take_string(pulse_hub_devices(hub));
            assert_eq!(devices, "[]");
            pulse_hub_free(hub);
        }
    }

    #[test]
    fn test_ffi_config_and_start_errors() {
        unsafe {
            let bad = CString::new(r#"{"assumed_max_heart_rate": 0}"#).unwrap();
            assert!(pulse_hub_new(bad.as_ptr()).is_null());
            assert!(!last_error().is_empty());

            let custom = CString::new(r#"{"signal_loss_threshold_seconds": 10}"#).unwrap();
            let hub = pulse_hub_new(custom.as_ptr());
            assert!(!hub.is_null());

            let workout = pulse_workout_new(hub);
            assert_eq!(pulse_workout_start(workout), -1);
            assert!(last_error().contains("device"));
            assert_eq!(pulse_workout_check_signal(ptr::null_mut()), -1);

            pulse_workout_free(workout);
            pulse_hub_free(hub);
        }
    }

    #[test]
    fn test_ffi_version() {
        unsafe {
            let version = pulse_version();
            assert!(!version.is_null());
            let version_str = CStr::from_ptr(version).to_str().unwrap();
            assert!(!version_str.is_empty());
        }
    }
}
