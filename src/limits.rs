//! Open-file limit adjustment.

use std::io;

/// Result of matching the descriptor limit to the socket ceiling.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NofileLimit {
    /// The soft limit now equals the requested ceiling.
    Raised(u64),
    /// The hard limit is below the ceiling; the soft limit was set to it.
    Capped(u64),
}

/// Sets the soft `RLIMIT_NOFILE` to `max_sockets`, or to the hard limit
/// when that is lower.
#[cfg(unix)]
pub fn match_nofile(max_sockets: usize) -> io::Result<NofileLimit> {
    let wanted = max_sockets as libc::rlim_t;
    let mut rl = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `rl` is a valid, writable rlimit for the duration of the call.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut rl) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let outcome = if rl.rlim_max > wanted {
        rl.rlim_cur = wanted;
        NofileLimit::Raised(wanted as u64)
    } else {
        rl.rlim_cur = rl.rlim_max;
        NofileLimit::Capped(rl.rlim_max as u64)
    };
    // SAFETY: `rl` holds a soft limit no greater than the current hard limit.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &rl) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(outcome)
}

#[cfg(not(unix))]
pub fn match_nofile(max_sockets: usize) -> io::Result<NofileLimit> {
    Ok(NofileLimit::Raised(max_sockets as u64))
}
