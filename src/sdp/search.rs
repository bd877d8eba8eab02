use super::pdu;
use super::record::{parse_attribute_lists, ServiceRecord};
use crate::bluetooth::{BtAddr, BtAsync, BtError};
use crate::ffi::{self, sockaddr_l2, BtProtocolBlueZ, AF_BLUETOOTH};
use mio::Interest;
use nix::errno::Errno;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use tracing::{debug, trace};
use uuid::Uuid;

const SDP_PSM: u16 = 0x0001;
/// Large enough for any L2CAP SDU the server may send.
const RECV_BUFFER_LEN: usize = 0x10000;
/// Most attribute list bytes accepted across all continuation fragments.
const MAX_ATTRIBUTE_LISTS_LEN: usize = 1 << 20;

#[derive(Debug)]
enum ServiceSearchState {
    Start,
    Connect,
    Request,
    Response,
    Done,
}

/// Queries the SDP server of one device for all records that mention a UUID.
///
/// Drive it like `BtSocketConnect`: call `advance` until it yields `BtAsync::Done`.
#[derive(Debug)]
pub struct ServiceSearch {
    addr: BtAddr,
    uuid: Uuid,
    socket: Option<OwnedFd>,
    state: ServiceSearchState,
    transaction: u16,
    continuation: Vec<u8>,
    attribute_lists: Vec<u8>,
}

impl ServiceSearch {
    pub fn new(addr: BtAddr, uuid: Uuid) -> Self {
        ServiceSearch {
            addr,
            uuid,
            socket: None,
            state: ServiceSearchState::Start,
            transaction: 0,
            continuation: Vec::new(),
            attribute_lists: Vec::new(),
        }
    }

    fn fd(&self) -> Result<RawFd, BtError> {
        self.socket
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or_else(|| BtError::Desc("SDP socket is not open".to_owned()))
    }

    /// Advance the search to the next state
    pub fn advance(&mut self) -> Result<BtAsync<Vec<ServiceRecord>>, BtError> {
        match self.state {
            ServiceSearchState::Start => {
                let fd = ffi::bluetooth_socket(libc::SOCK_SEQPACKET, BtProtocolBlueZ::L2CAP, true)?;
                self.socket = Some(unsafe { OwnedFd::from_raw_fd(fd) });

                let full_address = sockaddr_l2 {
                    l2_family: AF_BLUETOOTH as libc::sa_family_t,
                    l2_psm: SDP_PSM.to_le(),
                    l2_bdaddr: self.addr.convert_host_byteorder(),
                    l2_cid: 0,
                    l2_bdaddr_type: 0,
                };
                debug!(addr = %self.addr, uuid = %self.uuid, "connecting to SDP server");
                if ffi::start_connect(fd, &full_address, "Failed to connect() to SDP server")? {
                    self.state = ServiceSearchState::Request;
                    self.advance()
                } else {
                    self.state = ServiceSearchState::Connect;
                    Ok(BtAsync::WaitFor(fd, Interest::WRITABLE))
                }
            }

            ServiceSearchState::Connect => {
                let fd = self.fd()?;
                if let Some(errno) = ffi::take_socket_error(fd)? {
                    return Err(ffi::create_error_from_errno(
                        "Failed to connect() to SDP server",
                        errno,
                    ));
                }
                self.state = ServiceSearchState::Request;
                self.advance()
            }

            ServiceSearchState::Request => {
                let fd = self.fd()?;
                self.transaction = self.transaction.wrapping_add(1);
                let request =
                    pdu::search_attribute_request(self.transaction, &self.uuid, &self.continuation);
                trace!(transaction = self.transaction, len = request.len(), "sending SDP request");
                match nix::unistd::write(fd, &request) {
                    Ok(n) if n == request.len() => {
                        self.state = ServiceSearchState::Response;
                        Ok(BtAsync::WaitFor(fd, Interest::READABLE))
                    }
                    Ok(n) => Err(BtError::Sdp(format!(
                        "short write of SDP request: {} of {} bytes",
                        n,
                        request.len()
                    ))),
                    Err(Errno::EAGAIN) => {
                        // Retry the same transaction once writable
                        self.transaction = self.transaction.wrapping_sub(1);
                        Ok(BtAsync::WaitFor(fd, Interest::WRITABLE))
                    }
                    Err(errno) => Err(ffi::create_error_from_errno(
                        "Failed to send SDP request",
                        errno,
                    )),
                }
            }

            ServiceSearchState::Response => {
                let fd = self.fd()?;
                let mut buf = vec![0u8; RECV_BUFFER_LEN];
                let len = match nix::unistd::read(fd, &mut buf) {
                    Ok(0) => return Err(BtError::Sdp("server closed the connection".to_owned())),
                    Ok(len) => len,
                    Err(Errno::EAGAIN) => return Ok(BtAsync::WaitFor(fd, Interest::READABLE)),
                    Err(errno) => {
                        return Err(ffi::create_error_from_errno(
                            "Failed to receive SDP response",
                            errno,
                        ))
                    }
                };

                let fragment = pdu::parse_search_attribute_response(self.transaction, &buf[..len])?;
                trace!(
                    transaction = self.transaction,
                    bytes = fragment.attribute_lists.len(),
                    more = !fragment.continuation.is_empty(),
                    "received SDP response"
                );
                if self.attribute_lists.len() + fragment.attribute_lists.len()
                    > MAX_ATTRIBUTE_LISTS_LEN
                {
                    self.state = ServiceSearchState::Done;
                    self.socket = None;
                    return Err(BtError::Sdp(format!(
                        "response exceeds {} bytes of attribute lists",
                        MAX_ATTRIBUTE_LISTS_LEN
                    )));
                }
                self.attribute_lists
                    .extend_from_slice(&fragment.attribute_lists);

                if fragment.continuation.is_empty() {
                    self.state = ServiceSearchState::Done;
                    self.socket = None;
                    let records = parse_attribute_lists(&self.attribute_lists)?;
                    debug!(addr = %self.addr, records = records.len(), "SDP search complete");
                    Ok(BtAsync::Done(records))
                } else {
                    self.continuation = fragment.continuation;
                    self.state = ServiceSearchState::Request;
                    self.advance()
                }
            }

            ServiceSearchState::Done => Err(BtError::Desc(
                "Trying advance `ServiceSearch` from `Done` state".to_owned(),
            )),
        }
    }
}

/// Returns every record on the device at `addr` that mentions `uuid`.
///
/// This function can block for some seconds.
pub fn search_services(addr: BtAddr, uuid: &Uuid) -> Result<Vec<ServiceRecord>, BtError> {
    let mut search = ServiceSearch::new(addr, *uuid);
    crate::socket::drive(|| search.advance())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_a_finished_search_fails() {
        let mut search = ServiceSearch::new(BtAddr::any(), Uuid::nil());
        search.state = ServiceSearchState::Done;
        assert!(matches!(search.advance(), Err(BtError::Desc(_))));
    }

    #[test]
    fn reassembles_continued_responses() {
        use super::super::element::DataElement;
        use super::super::record::tests::{turret_record, TURRET_UUID};
        use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

        let (client, server) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_NONBLOCK,
        )
        .unwrap();
        let server = unsafe { OwnedFd::from_raw_fd(server) };
        let uuid: Uuid = TURRET_UUID.parse().unwrap();
        let mut search = ServiceSearch::new(BtAddr::any(), uuid);
        search.socket = Some(unsafe { OwnedFd::from_raw_fd(client) });
        search.state = ServiceSearchState::Request;

        let lists = DataElement::Sequence(vec![turret_record(11, "DMG Turret Control")]).to_bytes();
        let (first, second) = lists.split_at(lists.len() / 2);
        let mut buf = [0u8; 512];

        assert!(matches!(search.advance().unwrap(), BtAsync::WaitFor(_, _)));
        let len = nix::unistd::read(server.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(buf[..len], pdu::search_attribute_request(1, &uuid, &[])[..]);
        nix::unistd::write(
            server.as_raw_fd(),
            &pdu::search_attribute_response(1, first, &[0x42]),
        )
        .unwrap();

        assert!(matches!(search.advance().unwrap(), BtAsync::WaitFor(_, _)));
        let len = nix::unistd::read(server.as_raw_fd(), &mut buf).unwrap();
        assert_eq!(buf[..len], pdu::search_attribute_request(2, &uuid, &[0x42])[..]);
        nix::unistd::write(
            server.as_raw_fd(),
            &pdu::search_attribute_response(2, second, &[]),
        )
        .unwrap();

        match search.advance().unwrap() {
            BtAsync::Done(records) => {
                assert_eq!(records.len(), 1);
                assert_eq!(records[0].name.as_deref(), Some("DMG Turret Control"));
                assert_eq!(records[0].rfcomm_channel(), Some(11));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(search.socket.is_none());
    }

    #[test]
    fn endless_continuation_is_cut_off() {
        use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockType};

        let (client, server) = socketpair(
            AddressFamily::Unix,
            SockType::SeqPacket,
            None,
            SockFlag::SOCK_NONBLOCK,
        )
        .unwrap();
        let server = unsafe { OwnedFd::from_raw_fd(server) };
        let mut search = ServiceSearch::new(BtAddr::any(), Uuid::nil());
        search.socket = Some(unsafe { OwnedFd::from_raw_fd(client) });
        search.state = ServiceSearchState::Request;

        // Each fragment carries the most a response can and always asks for more.
        let chunk = vec![0u8; usize::from(u16::MAX) - 0x20];
        let mut request = [0u8; 512];
        let mut fragments = 0;
        let error = loop {
            match search.advance() {
                Ok(BtAsync::WaitFor(_, _)) => {}
                Ok(BtAsync::Done(_)) => panic!("search finished on an endless response"),
                Err(e) => break e,
            }
            nix::unistd::read(server.as_raw_fd(), &mut request).unwrap();
            fragments += 1;
            nix::unistd::write(
                server.as_raw_fd(),
                &pdu::search_attribute_response(search.transaction, &chunk, &[0x01]),
            )
            .unwrap();
        };

        assert!(matches!(error, BtError::Sdp(ref message) if message.contains("exceeds")));
        assert_eq!(fragments, MAX_ATTRIBUTE_LISTS_LEN / chunk.len() + 1);
        assert!(search.socket.is_none());
        assert!(search.attribute_lists.len() <= MAX_ATTRIBUTE_LISTS_LEN);
    }

    #[test]
    fn response_state_without_socket_fails() {
        let mut search = ServiceSearch::new(BtAddr::any(), Uuid::nil());
        search.state = ServiceSearchState::Response;
        assert!(search.advance().is_err());
    }

    #[cfg(feature = "hardware_tests")]
    #[test]
    fn searches_local_sdp_server() {
        // 00:00:00:FF:FF:FF is BDADDR_LOCAL, served by bluetoothd
        let local = BtAddr([0, 0, 0, 0xff, 0xff, 0xff]);
        search_services(local, &super::super::element::uuid_from_short(0x0100)).unwrap();
    }
}
