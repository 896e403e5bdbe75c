//! Small OS abstraction for peer credential lookup on a connected local
//! socket (spec.md §9 design note). On platforms that only expose one of
//! uid/pid, the other authority implementation is simply never reached
//! because `from_unix_stream` still returns both fields together here —
//! there is no partial-credentials case on the platforms this crate
//! targets (Linux/BSD/macOS via `SO_PEERCRED`/`getpeereid`/`LOCAL_PEERCRED`).

use crate::device::PeerCredentials;

#[cfg(target_os = "linux")]
pub fn from_unix_stream(stream: &tokio::net::UnixStream) -> Option<PeerCredentials> {
    let cred = stream.peer_cred().ok()?;
    Some(PeerCredentials {
        uid: cred.uid(),
        pid: cred.pid().unwrap_or(0).try_into().unwrap_or(0),
    })
}

#[cfg(all(unix, not(target_os = "linux")))]
pub fn from_unix_stream(stream: &tokio::net::UnixStream) -> Option<PeerCredentials> {
    // tokio's UnixStream::peer_cred is implemented for most unix targets;
    // pid is not available on non-Linux BSDs, so it is reported as 0 and
    // PeerPidAuthority (which needs a real pid) is simply unusable there.
    let cred = stream.peer_cred().ok()?;
    Some(PeerCredentials { uid: cred.uid(), pid: 0 })
}

#[cfg(not(unix))]
pub fn from_unix_stream(_stream: &tokio::net::UnixStream) -> Option<PeerCredentials> {
    None
}

/// `/etc/passwd` name for `uid`, or `None` if there is no entry (spec.md
/// §4.J: "identifier = `/etc/passwd` name if known else decimal uid").
#[cfg(unix)]
pub fn passwd_name(uid: u32) -> Option<String> {
    use std::ffi::CStr;

    let mut buf: Vec<libc::c_char> = vec![0; 1024];
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();

    loop {
        // SAFETY: `pwd`/`buf`/`result` are all valid for the duration of the
        // call; on ERANGE we grow the buffer and retry, per getpwuid_r(3).
        let ret = unsafe { libc::getpwuid_r(uid, &mut pwd, buf.as_mut_ptr(), buf.len(), &mut result) };
        if ret == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if ret != 0 || result.is_null() {
            return None;
        }
        break;
    }

    // SAFETY: `result` is non-null, so `pwd.pw_name` was filled in by the
    // call above and points into `buf`, which outlives this read.
    let name = unsafe { CStr::from_ptr(pwd.pw_name) };
    name.to_str().ok().map(str::to_owned)
}

#[cfg(not(unix))]
pub fn passwd_name(_uid: u32) -> Option<String> {
    None
}
