//! Ethernet framing: pack/unpack the 14-byte header used on every frame
//! crossing the driver boundary. Pure functions — drivers call these around
//! their raw read/write, rather than the registries calling them directly.

pub const HEADER_LEN: usize = 14;
pub const MAC_LEN: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst: [u8; MAC_LEN],
    pub src: [u8; MAC_LEN],
    pub ethertype: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum EthernetError {
    #[error("frame of {0} bytes shorter than the {HEADER_LEN}-byte header")]
    Truncated(usize),
}

/// Pack `dst`/`src`/`ethertype` followed by `payload` into one frame.
#[must_use]
pub fn encode(header: EthernetHeader, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_LEN + payload.len());
    frame.extend_from_slice(&header.dst);
    frame.extend_from_slice(&header.src);
    frame.extend_from_slice(&header.ethertype.to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Reject frames shorter than the header; otherwise split header/payload.
pub fn decode(frame: &[u8]) -> Result<(EthernetHeader, &[u8]), EthernetError> {
    if frame.len() < HEADER_LEN {
        return Err(EthernetError::Truncated(frame.len()));
    }
    let mut dst = [0u8; MAC_LEN];
    let mut src = [0u8; MAC_LEN];
    dst.copy_from_slice(&frame[0..6]);
    src.copy_from_slice(&frame[6..12]);
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    Ok((EthernetHeader { dst, src, ethertype }, &frame[HEADER_LEN..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_payload() {
        let header = EthernetHeader { dst: [1; 6], src: [2; 6], ethertype: 0x0806 };
        let frame = encode(header, &[9, 9, 9]);
        let (decoded, payload) = decode(&frame).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, &[9, 9, 9]);
    }

    #[test]
    fn rejects_short_frame() {
        assert!(matches!(decode(&[0u8; 10]), Err(EthernetError::Truncated(10))));
    }
}
