//! Peer identity resolution.
//!
//! A Unix-domain socket carries the credentials of the process on the other
//! end. The server trusts those instead of asking clients who they are: the
//! peer's uid is looked up in the passwd database and its login name becomes
//! the chat username.

use super::handler::{ConnectionError, ConnectionId};
use nix::unistd::{Uid, User};
use std::os::fd::AsFd;

/// Maps an accepted socket to the username it belongs to.
pub trait IdentityResolver<S> {
    fn resolve(&self, id: ConnectionId, socket: &S) -> Result<String, ConnectionError>;
}

impl<S, F> IdentityResolver<S> for F
where
    F: Fn(ConnectionId, &S) -> Result<String, ConnectionError>,
{
    fn resolve(&self, id: ConnectionId, socket: &S) -> Result<String, ConnectionError> {
        self(id, socket)
    }
}

/// Resolves usernames from the socket's peer credentials.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerCredentials;

impl<S: AsFd> IdentityResolver<S> for PeerCredentials {
    fn resolve(&self, _id: ConnectionId, socket: &S) -> Result<String, ConnectionError> {
        let uid = peer_uid(socket)?;
        let user = User::from_uid(uid)
            .map_err(ConnectionError::UserLookup)?
            .ok_or(ConnectionError::UnknownUser(uid.as_raw()))?;
        Ok(user.name)
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn peer_uid<S: AsFd>(socket: &S) -> Result<Uid, ConnectionError> {
    use nix::sys::socket::{getsockopt, sockopt};

    let creds =
        getsockopt(socket, sockopt::PeerCredentials).map_err(ConnectionError::PeerCredentials)?;
    Ok(Uid::from_raw(creds.uid()))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn peer_uid<S: AsFd>(socket: &S) -> Result<Uid, ConnectionError> {
    let (uid, _gid) = nix::unistd::getpeereid(socket).map_err(ConnectionError::PeerCredentials)?;
    Ok(uid)
}
