use crate::bluetooth::BtError;
use crate::client::{Connector, ServiceDescriptor};
use crate::socket::BtSocket;
use std::io::{self, Write};
use std::os::unix::net::UnixStream;
use tracing::{debug, info};

/// A byte stream a `Session` can own.
pub trait Transport: Write {
    /// Called once when the session closes, before the transport is dropped.
    fn shutdown(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for BtSocket {
    fn shutdown(&mut self) -> io::Result<()> {
        BtSocket::shutdown(self)
    }
}

impl Transport for UnixStream {
    fn shutdown(&mut self) -> io::Result<()> {
        UnixStream::shutdown(self, std::net::Shutdown::Both)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unconnected,
    Connected,
    Closed,
}

/// One stream connection to a service, closed on drop.
#[derive(Debug)]
pub struct Session<T: Transport> {
    stream: Option<T>,
    peer: Option<ServiceDescriptor>,
    state: SessionState,
}

impl<T: Transport> Default for Session<T> {
    fn default() -> Self {
        Session {
            stream: None,
            peer: None,
            state: SessionState::Unconnected,
        }
    }
}

impl<T: Transport> Session<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The service this session is (or was last) connected to.
    pub fn peer(&self) -> Option<&ServiceDescriptor> {
        self.peer.as_ref()
    }

    /// Opens the connection. A failed attempt leaves the session `Unconnected`.
    pub fn connect<C>(&mut self, connector: &C, target: &ServiceDescriptor) -> Result<(), BtError>
    where
        C: Connector<Stream = T> + ?Sized,
    {
        if self.state != SessionState::Unconnected {
            return Err(BtError::NotConnected);
        }
        let stream = connector
            .open(target)
            .map_err(|source| BtError::Connection {
                target: target.endpoint(),
                source: Box::new(source),
            })?;
        info!(service = %target.name, endpoint = %target.endpoint(), "connected");
        self.stream = Some(stream);
        self.peer = Some(target.clone());
        self.state = SessionState::Connected;
        Ok(())
    }

    /// Writes all of `payload` as UTF-8, without framing.
    pub fn send(&mut self, payload: &str) -> Result<(), BtError> {
        let stream = match (self.state, self.stream.as_mut()) {
            (SessionState::Connected, Some(stream)) => stream,
            _ => return Err(BtError::NotConnected),
        };
        stream
            .write_all(payload.as_bytes())
            .and_then(|()| stream.flush())
            .map_err(|source| BtError::Send { source })?;
        debug!(bytes = payload.len(), "payload sent");
        Ok(())
    }

    /// Releases the connection. Safe to call in any state, any number of times.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown() {
                debug!(error = %e, "shutdown before close failed");
            }
            debug!("session closed");
        }
        self.state = SessionState::Closed;
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        self.close();
    }
}
