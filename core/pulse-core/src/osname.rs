//! Operating-system name for the User-Agent header.
//!
//! Best effort: a failed lookup yields an empty string and is never fatal.

#[cfg(unix)]
pub fn os_name() -> String {
    use std::ffi::CStr;

    // SAFETY: utsname is plain old data, so zeroed is a valid initial value,
    // and uname() only writes NUL-terminated strings into its fixed buffers.
    #[allow(unsafe_code)]
    let sysname = unsafe {
        let mut buf: libc::utsname = std::mem::zeroed();
        if libc::uname(&mut buf) != 0 {
            tracing::debug!(error = %std::io::Error::last_os_error(), "uname failed");
            return String::new();
        }
        CStr::from_ptr(buf.sysname.as_ptr())
            .to_string_lossy()
            .into_owned()
    };

    sysname
}

#[cfg(not(unix))]
pub fn os_name() -> String {
    match std::env::consts::OS {
        "windows" => "Windows".to_string(),
        other => other.to_string(),
    }
}
