//! Background detach. Runs before the async runtime is built so the fork
//! never crosses live threads.

use std::io;
use std::path::Path;
use std::{fs, process};

use anyhow::{Context, Result};

/// Detaches from the controlling terminal and records the daemon PID when
/// a pidfile is configured.
pub fn daemonize(pidfile: Option<&Path>) -> Result<()> {
    detach().context("failed to detach from the controlling terminal")?;
    if let Some(path) = pidfile {
        fs::write(path, format!("{}\n", process::id()))
            .with_context(|| format!("failed to write pidfile {}", path.display()))?;
    }
    Ok(())
}

fn detach() -> io::Result<()> {
    fork_exit_parent()?;
    if unsafe { libc::setsid() } < 0 {
        return Err(io::Error::last_os_error());
    }
    fork_exit_parent()?;
    if unsafe { libc::chdir(c"/".as_ptr()) } < 0 {
        return Err(io::Error::last_os_error());
    }
    redirect_stdio()
}

fn fork_exit_parent() -> io::Result<()> {
    match unsafe { libc::fork() } {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(()),
        _ => process::exit(0),
    }
}

fn redirect_stdio() -> io::Result<()> {
    let null = unsafe { libc::open(c"/dev/null".as_ptr(), libc::O_RDWR) };
    if null < 0 {
        return Err(io::Error::last_os_error());
    }
    for fd in [libc::STDIN_FILENO, libc::STDOUT_FILENO, libc::STDERR_FILENO] {
        if unsafe { libc::dup2(null, fd) } < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    if null > libc::STDERR_FILENO {
        unsafe { libc::close(null) };
    }
    Ok(())
}
