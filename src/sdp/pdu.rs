use super::element::DataElement;
use crate::bluetooth::BtError;
use enum_primitive::FromPrimitive;
use uuid::Uuid;

const HEADER_LEN: usize = 5;
const MAX_CONTINUATION_LEN: usize = 16;

/// Largest attribute byte count a response may carry per fragment.
pub const MAX_ATTRIBUTE_BYTES: u16 = 0xffff;

enum_from_primitive! {
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PduId {
    ErrorResponse = 0x01,
    ServiceSearchRequest = 0x02,
    ServiceSearchResponse = 0x03,
    ServiceAttributeRequest = 0x04,
    ServiceAttributeResponse = 0x05,
    ServiceSearchAttributeRequest = 0x06,
    ServiceSearchAttributeResponse = 0x07
}
}

fn error_name(code: u16) -> &'static str {
    match code {
        0x0001 => "invalid SDP version",
        0x0002 => "invalid service record handle",
        0x0003 => "invalid request syntax",
        0x0004 => "invalid PDU size",
        0x0005 => "invalid continuation state",
        0x0006 => "insufficient resources",
        _ => "reserved error code",
    }
}

/// Builds a ServiceSearchAttributeRequest for every attribute of the records matching `uuid`.
pub fn search_attribute_request(transaction: u16, uuid: &Uuid, continuation: &[u8]) -> Vec<u8> {
    let mut params = Vec::new();
    DataElement::Sequence(vec![DataElement::Uuid(*uuid)]).encode(&mut params);
    params.extend_from_slice(&MAX_ATTRIBUTE_BYTES.to_be_bytes());
    DataElement::Sequence(vec![DataElement::U32(0x0000_ffff)]).encode(&mut params);
    params.push(continuation.len() as u8);
    params.extend_from_slice(continuation);

    let mut pdu = Vec::with_capacity(HEADER_LEN + params.len());
    pdu.push(PduId::ServiceSearchAttributeRequest as u8);
    pdu.extend_from_slice(&transaction.to_be_bytes());
    pdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
    pdu.extend_from_slice(&params);
    pdu
}

/// One fragment of a ServiceSearchAttributeResponse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchAttributeResponse {
    pub attribute_lists: Vec<u8>,
    /// Empty once the server has sent everything.
    pub continuation: Vec<u8>,
}

fn be16(bytes: &[u8]) -> u16 {
    u16::from_be_bytes([bytes[0], bytes[1]])
}

/// Parses a response PDU to the request sent with `transaction`.
pub fn parse_search_attribute_response(
    transaction: u16,
    pdu: &[u8],
) -> Result<SearchAttributeResponse, BtError> {
    if pdu.len() < HEADER_LEN {
        return Err(BtError::Sdp(format!("short PDU of {} bytes", pdu.len())));
    }
    let tid = be16(&pdu[1..3]);
    if tid != transaction {
        return Err(BtError::Sdp(format!(
            "transaction id mismatch: sent {}, got {}",
            transaction, tid
        )));
    }
    let params_len = be16(&pdu[3..5]) as usize;
    let params = &pdu[HEADER_LEN..];
    if params.len() < params_len {
        return Err(BtError::Sdp(format!(
            "PDU announces {} parameter bytes, carries {}",
            params_len,
            params.len()
        )));
    }
    let params = &params[..params_len];

    match PduId::from_u8(pdu[0]) {
        Some(PduId::ServiceSearchAttributeResponse) => {}
        Some(PduId::ErrorResponse) if params.len() >= 2 => {
            let code = be16(params);
            return Err(BtError::Sdp(format!(
                "server error 0x{:04x}: {}",
                code,
                error_name(code)
            )));
        }
        _ => {
            return Err(BtError::Sdp(format!("unexpected PDU id 0x{:02x}", pdu[0])));
        }
    }

    if params.len() < 2 {
        return Err(BtError::Sdp("missing attribute list byte count".to_owned()));
    }
    let count = be16(params) as usize;
    let rest = &params[2..];
    if rest.len() < count + 1 {
        return Err(BtError::Sdp("attribute lists truncated".to_owned()));
    }
    let (attribute_lists, rest) = rest.split_at(count);
    let continuation_len = rest[0] as usize;
    if continuation_len > MAX_CONTINUATION_LEN || rest.len() != 1 + continuation_len {
        return Err(BtError::Sdp(format!(
            "malformed continuation state of {} bytes",
            continuation_len
        )));
    }

    Ok(SearchAttributeResponse {
        attribute_lists: attribute_lists.to_vec(),
        continuation: rest[1..].to_vec(),
    })
}

#[cfg(test)]
pub(crate) fn search_attribute_response(
    transaction: u16,
    attribute_lists: &[u8],
    continuation: &[u8],
) -> Vec<u8> {
    let mut params = Vec::new();
    params.extend_from_slice(&(attribute_lists.len() as u16).to_be_bytes());
    params.extend_from_slice(attribute_lists);
    params.push(continuation.len() as u8);
    params.extend_from_slice(continuation);

    let mut pdu = vec![PduId::ServiceSearchAttributeResponse as u8];
    pdu.extend_from_slice(&transaction.to_be_bytes());
    pdu.extend_from_slice(&(params.len() as u16).to_be_bytes());
    pdu.extend_from_slice(&params);
    pdu
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_matches_wire_layout() {
        let uuid: Uuid = "ce025ea4-00d6-44f3-ae1c-a5cba97381fd".parse().unwrap();
        let pdu = search_attribute_request(7, &uuid, &[]);

        let mut expected = vec![0x06, 0x00, 0x07, 0x00, 0x1d, 0x35, 0x11, 0x1c];
        expected.extend_from_slice(uuid.as_bytes());
        expected.extend_from_slice(&[0xff, 0xff, 0x35, 0x05, 0x0a, 0x00, 0x00, 0xff, 0xff, 0x00]);
        assert_eq!(pdu, expected);
    }

    #[test]
    fn request_carries_continuation_state() {
        let uuid = Uuid::from_u128(1);
        let pdu = search_attribute_request(1, &uuid, &[0xaa, 0xbb]);
        assert_eq!(&pdu[pdu.len() - 3..], &[0x02, 0xaa, 0xbb]);
        assert_eq!(be16(&pdu[3..5]) as usize, pdu.len() - HEADER_LEN);
    }

    #[test]
    fn parses_fragment_with_continuation() {
        let pdu = search_attribute_response(3, &[0x35, 0x00], &[1, 2, 3]);
        let response = parse_search_attribute_response(3, &pdu).unwrap();
        assert_eq!(response.attribute_lists, vec![0x35, 0x00]);
        assert_eq!(response.continuation, vec![1, 2, 3]);
    }

    #[test]
    fn error_response_reports_code() {
        let pdu = [0x01, 0x00, 0x02, 0x00, 0x02, 0x00, 0x03];
        match parse_search_attribute_response(2, &pdu) {
            Err(BtError::Sdp(message)) => assert!(message.contains("invalid request syntax")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn rejects_foreign_or_broken_responses() {
        let good = search_attribute_response(9, &[0x35, 0x00], &[]);
        assert!(parse_search_attribute_response(8, &good).is_err());

        let mut wrong_id = good.clone();
        wrong_id[0] = 0x05;
        assert!(parse_search_attribute_response(9, &wrong_id).is_err());

        assert!(parse_search_attribute_response(9, &good[..good.len() - 1]).is_err());
        assert!(parse_search_attribute_response(9, &good[..4]).is_err());

        let oversized = search_attribute_response(9, &[], &[0u8; 17]);
        assert!(parse_search_attribute_response(9, &oversized).is_err());
    }
}
