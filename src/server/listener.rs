//! Listening socket bootstrap.
//!
//! Binding a Unix-domain socket fails when the path already exists, which is
//! also what a crashed server leaves behind. Before giving up, the path is
//! checked: only a socket file whose test connection is refused counts as
//! stale and is removed before one more bind attempt. Anything else at the
//! path (a regular file, a directory, a socket we may not connect to) is
//! left alone and the bind fails.

use super::ServerError;
use crate::config::ServerConfig;
use nix::unistd::{chown, Gid, Group, Uid, User};
use std::fs;
use std::io::{self, ErrorKind};
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The bound, non-blocking listening socket and the file it lives at.
///
/// The socket file is removed when the listener is dropped.
#[derive(Debug)]
pub struct Listener {
    inner: UnixListener,
    path: PathBuf,
    removed: bool,
}

impl Listener {
    /// Binds the configured path, applies its mode and ownership, and
    /// switches the listener to non-blocking accepts.
    pub fn bind(config: &ServerConfig) -> Result<Self, ServerError> {
        let path = config.socket_path.clone();
        let inner = bind_with_recovery(&path)?;

        let listener = Self {
            inner,
            path,
            removed: false,
        };

        fs::set_permissions(&listener.path, fs::Permissions::from_mode(config.socket_mode))
            .map_err(|source| ServerError::Permissions {
                path: listener.path.clone(),
                source,
            })?;
        set_owner(&listener.path, config.user.as_deref(), config.group.as_deref())?;

        listener
            .inner
            .set_nonblocking(true)
            .map_err(|source| ServerError::Bind {
                path: listener.path.clone(),
                source,
            })?;

        info!(path = %listener.path.display(), "Listening");
        Ok(listener)
    }

    /// Accepts one pending connection, or `None` when there is none.
    pub fn accept(&self) -> io::Result<Option<UnixStream>> {
        loop {
            match self.inner.accept() {
                Ok((stream, _)) => return Ok(Some(stream)),
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the socket file. Only the first call has any effect.
    pub fn remove(&mut self) {
        if self.removed {
            return;
        }
        self.removed = true;

        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Removed socket file"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to remove socket file")
            }
        }
    }
}

impl AsFd for Listener {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.inner.as_fd()
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.remove();
    }
}

fn bind_with_recovery(path: &Path) -> Result<UnixListener, ServerError> {
    let bind_error = |source| ServerError::Bind {
        path: path.to_path_buf(),
        source,
    };

    match UnixListener::bind(path) {
        Ok(listener) => Ok(listener),
        Err(e) if e.kind() == ErrorKind::AddrInUse => {
            let is_socket = fs::symlink_metadata(path)
                .map_err(bind_error)?
                .file_type()
                .is_socket();
            if !is_socket {
                return Err(bind_error(e));
            }

            match UnixStream::connect(path) {
                Err(refused) if is_stale(&refused) => {
                    warn!(path = %path.display(), "Removing stale socket file");
                    fs::remove_file(path).map_err(bind_error)?;
                    UnixListener::bind(path).map_err(bind_error)
                }
                Err(other) => {
                    debug!(path = %path.display(), error = %other, "Cannot tell if socket is live");
                    Err(ServerError::AlreadyRunning(path.to_path_buf()))
                }
                Ok(_) => Err(ServerError::AlreadyRunning(path.to_path_buf())),
            }
        }
        Err(e) => Err(bind_error(e)),
    }
}

/// Only a refused connection proves nobody is listening on a socket file.
fn is_stale(connect_error: &io::Error) -> bool {
    connect_error.kind() == ErrorKind::ConnectionRefused
}

fn set_owner(path: &Path, user: Option<&str>, group: Option<&str>) -> Result<(), ServerError> {
    if user.is_none() && group.is_none() {
        return Ok(());
    }

    let uid = user.map(lookup_user).transpose()?;
    let gid = group.map(lookup_group).transpose()?;

    chown(path, uid, gid).map_err(|source| ServerError::Ownership {
        path: path.to_path_buf(),
        source,
    })?;

    debug!(path = %path.display(), ?user, ?group, "Changed socket ownership");
    Ok(())
}

fn lookup_user(name: &str) -> Result<Uid, ServerError> {
    User::from_name(name)
        .map_err(ServerError::Lookup)?
        .map(|u| u.uid)
        .ok_or_else(|| ServerError::UnknownUser(name.to_string()))
}

fn lookup_group(name: &str) -> Result<Gid, ServerError> {
    Group::from_name(name)
        .map_err(ServerError::Lookup)?
        .map(|g| g.gid)
        .ok_or_else(|| ServerError::UnknownGroup(name.to_string()))
}
