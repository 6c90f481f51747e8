use crate::settings::Settings;
use crate::worker;
use anyhow::{bail, Result};
use log::{error, info, warn};
use std::io;
use std::mem;
use std::os::unix::io::FromRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

const LISTEN_BACKLOG: i32 = 5;

/// Installs the `SIGCHLD` handler and runs the accept loop forever.
///
/// One isolated worker process is forked per accepted client; the parent never touches
/// codec state and only accepts and reaps. Fork failure is treated as fatal, matching the
/// original supervisor: there is no retry or backoff policy for a resource exhaustion that
/// severe.
pub fn run(settings: &Settings) -> Result<()> {
    install_sigchld_handler()?;

    let listener = bind_unix_listener(&settings.socket_path)?;
    info!("listening on {}", settings.socket_path);

    loop {
        let stream = match accept_retrying(&listener) {
            Ok(s) => s,
            Err(e) => {
                error!("accept failed: {e}");
                continue;
            }
        };

        match unsafe { libc::fork() } {
            -1 => bail!(io::Error::last_os_error()),
            0 => {
                drop(listener);
                worker::handle_client(stream);
                std::process::exit(0);
            }
            _pid => {
                drop(stream);
            }
        }
    }
}

/// Creates the listening socket directly with `libc` so the backlog can be set explicitly;
/// `std::os::unix::net::UnixListener::bind` doesn't expose a backlog parameter. Unlinks a
/// stale path left over from a prior run before binding.
fn bind_unix_listener(path: &str) -> Result<UnixListener> {
    if Path::new(path).exists() {
        std::fs::remove_file(path)?;
    }

    unsafe {
        let fd = libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0);
        if fd < 0 {
            bail!(io::Error::last_os_error());
        }

        let mut addr: libc::sockaddr_un = mem::zeroed();
        addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
        if path.len() >= addr.sun_path.len() {
            libc::close(fd);
            bail!("socket path too long: {path}");
        }
        for (dst, src) in addr.sun_path.iter_mut().zip(path.as_bytes()) {
            *dst = *src as libc::c_char;
        }

        let addr_len = mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;
        if libc::bind(fd, &addr as *const _ as *const libc::sockaddr, addr_len) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            bail!(err);
        }
        if libc::listen(fd, LISTEN_BACKLOG) < 0 {
            let err = io::Error::last_os_error();
            libc::close(fd);
            bail!(err);
        }

        Ok(UnixListener::from_raw_fd(fd))
    }
}

fn accept_retrying(listener: &UnixListener) -> Result<UnixStream> {
    loop {
        match listener.accept() {
            Ok((stream, _addr)) => return Ok(stream),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Reaps every terminated child non-blockingly, logging its exit status or terminating
/// signal, mirroring `sigchld_handler`.
extern "C" fn reap_children(_signo: libc::c_int) {
    loop {
        let mut status: libc::c_int = 0;
        let pid = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        if pid <= 0 {
            break;
        }
        if libc::WIFEXITED(status) {
            info!("worker {pid} exited with status {}", libc::WEXITSTATUS(status));
        } else if libc::WIFSIGNALED(status) {
            warn!("worker {pid} terminated by signal {}", libc::WTERMSIG(status));
        }
    }
}

fn install_sigchld_handler() -> Result<()> {
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        sa.sa_sigaction = reap_children as usize;
        libc::sigemptyset(&mut sa.sa_mask);
        sa.sa_flags = libc::SA_RESTART | libc::SA_NOCLDSTOP;
        if libc::sigaction(libc::SIGCHLD, &sa, std::ptr::null_mut()) < 0 {
            bail!(io::Error::last_os_error());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream as ClientStream;

    fn socket_path() -> (tempfile::TempDir, String) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.socket").to_str().unwrap().to_string();
        (dir, path)
    }

    #[test]
    fn bind_accepts_a_client() {
        let (_dir, path) = socket_path();
        let listener = bind_unix_listener(&path).unwrap();
        let _client = ClientStream::connect(&path).unwrap();
        let accepted = accept_retrying(&listener);
        assert!(accepted.is_ok());
    }

    #[test]
    fn bind_removes_stale_socket_file() {
        let (_dir, path) = socket_path();
        std::fs::write(&path, b"stale").unwrap();
        assert!(bind_unix_listener(&path).is_ok());
    }
}
