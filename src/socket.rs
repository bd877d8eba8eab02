use crate::bluetooth::{BtAddr, BtAsync, BtError, BtProtocol};
use crate::ffi::{self, sockaddr_rc, BtProtocolBlueZ, AF_BLUETOOTH};
use mio::{unix::SourceFd, Events, Interest, Poll, Token};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use tracing::{debug, trace};

/// Linux (Bluez) socket, created with AF_BLUETOOTH
#[derive(Debug)]
pub struct BtSocket {
    stream: StdUnixStream,
}

impl BtSocket {
    /// Create an (still) unconnected, non-blocking socket.
    pub fn new(proto: BtProtocol) -> Result<BtSocket, BtError> {
        match proto {
            BtProtocol::RFCOMM => {
                let fd = ffi::bluetooth_socket(libc::SOCK_STREAM, BtProtocolBlueZ::RFCOMM, true)?;
                Ok(BtSocket {
                    stream: unsafe { StdUnixStream::from_raw_fd(fd) },
                })
            }
        }
    }

    /// Connect to RFCOMM `channel` on the remote device with address `addr`.
    ///
    /// Blocks until the connection is established or has failed. The socket is in
    /// blocking mode afterwards.
    pub fn connect(&mut self, addr: BtAddr, channel: u8) -> Result<(), BtError> {
        debug!(%addr, channel, "connecting RFCOMM socket");
        let mut connect = self.connect_async(addr, channel);
        drive(|| connect.advance())?;
        self.set_blocking(true)
    }

    /// Start connecting to RFCOMM `channel` on the remote device with address `addr`.
    ///
    /// This function will return immediately and can therefor not indicate most kinds of failures.
    /// Drive the returned `BtSocketConnect` with `advance` until it reports `BtAsync::Done`.
    pub fn connect_async(&mut self, addr: BtAddr, channel: u8) -> BtSocketConnect<'_> {
        BtSocketConnect::new(self, addr.convert_host_byteorder(), channel)
    }

    pub fn set_blocking(&self, blocking: bool) -> Result<(), BtError> {
        let fd = self.get_fd();
        let mut flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        flags.set(OFlag::O_NONBLOCK, !blocking);
        fcntl(fd, FcntlArg::F_SETFL(flags))?;
        Ok(())
    }

    /// Shut down both directions of the connection.
    pub fn shutdown(&self) -> io::Result<()> {
        self.stream.shutdown(std::net::Shutdown::Both)
    }

    pub fn get_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}

impl Read for BtSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for BtSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

#[derive(Debug)]
enum BtSocketConnectState {
    Start,
    Connect,
    Done,
}

/// Manages the bluetooth connection process when used from an asynchronous client.
#[derive(Debug)]
pub struct BtSocketConnect<'a> {
    addr: BtAddr,
    channel: u8,
    state: BtSocketConnectState,
    socket: &'a mut BtSocket,
}

impl<'a> BtSocketConnect<'a> {
    fn new(socket: &'a mut BtSocket, addr: BtAddr, channel: u8) -> Self {
        BtSocketConnect {
            addr,
            channel,
            socket,
            state: BtSocketConnectState::Start,
        }
    }

    /// Advance the connection process to the next state
    ///
    /// Usage: call this function to get the connection process started, then wait for the
    /// condition requested in `BtAsync` to apply. Once the condition is met, invoke this
    /// function again. Repeat until you reach `BtAsync::Done`.
    pub fn advance(&mut self) -> Result<BtAsync<()>, BtError> {
        let fd = self.socket.get_fd();
        match self.state {
            BtSocketConnectState::Start => {
                let full_address = sockaddr_rc {
                    rc_family: AF_BLUETOOTH as libc::sa_family_t,
                    rc_bdaddr: self.addr,
                    rc_channel: self.channel,
                };
                if ffi::start_connect(fd, &full_address, "Failed to connect() to target device")? {
                    self.state = BtSocketConnectState::Done;
                    Ok(BtAsync::Done(()))
                } else {
                    self.state = BtSocketConnectState::Connect;
                    Ok(BtAsync::WaitFor(fd, Interest::WRITABLE))
                }
            }

            BtSocketConnectState::Connect => {
                // First check if socket is actually connected using `getpeername()`
                let mut full_address = sockaddr_rc {
                    rc_family: AF_BLUETOOTH as libc::sa_family_t,
                    rc_bdaddr: BtAddr::any(),
                    rc_channel: 0,
                };
                let mut socklen = size_of::<sockaddr_rc>() as libc::socklen_t;
                if unsafe {
                    libc::getpeername(
                        fd,
                        &mut full_address as *mut sockaddr_rc as *mut libc::sockaddr,
                        &mut socklen,
                    )
                } < 0
                {
                    let errno = nix::errno::Errno::last();
                    if errno == nix::errno::Errno::ENOTCONN {
                        // Connection has failed, the actual reason is pending on the socket
                        let cause = ffi::take_socket_error(fd)?.unwrap_or(errno);
                        Err(ffi::create_error_from_errno(
                            "Failed to connect() to target device",
                            cause,
                        ))
                    } else {
                        Err(ffi::create_error_from_errno("getpeername() failed", errno))
                    }
                } else {
                    self.state = BtSocketConnectState::Done;
                    Ok(BtAsync::Done(()))
                }
            }

            BtSocketConnectState::Done => Err(BtError::Desc(
                "Trying advance `BtSocketConnect` from `Done` state".to_owned(),
            )),
        }
    }
}

/// Runs an asynchronous process to completion on a temporary `mio` event loop.
pub(crate) fn drive<T, F>(mut advance: F) -> Result<T, BtError>
where
    F: FnMut() -> Result<BtAsync<T>, BtError>,
{
    let mut evtloop = Poll::new()?;
    let token = Token(0);
    let mut events = Events::with_capacity(2);

    loop {
        match advance()? {
            BtAsync::WaitFor(fd, interest) => {
                trace!(fd, ?interest, "waiting for readiness");
                let mut source = SourceFd(&fd);
                evtloop.registry().register(&mut source, token, interest)?;
                let mut event_received = false;
                while !event_received {
                    match evtloop.poll(&mut events, None) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => return Err(e.into()),
                    }
                    event_received = events.iter().any(|event| event.token() == token);
                }
                evtloop.registry().deregister(&mut source)?;
            }

            BtAsync::Done(value) => return Ok(value),
        }
    }
}
