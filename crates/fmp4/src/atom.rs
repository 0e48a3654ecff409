use bytes::{BufMut, Bytes, BytesMut};

/// Size of the fixed atom header: 4-byte big-endian length + 4-byte type tag.
pub const HEADER_SIZE: usize = 8;

/// A single self-describing structural unit of a fragmented MP4 stream.
///
/// The header encodes the length of the whole box (payload + 8) as a
/// big-endian u32 at offset 0 and the four-character type tag at offset 4.
/// Atoms are immutable once produced; the `Bytes` payload makes handing
/// one off to a buffer or a socket writer a cheap refcount bump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Atom {
    /// The raw 8-byte header exactly as it appeared on the wire.
    pub header: Bytes,
    /// The four-character type tag (bytes 4..8 of the header).
    pub fourcc: [u8; 4],
    /// The payload, excluding the header.
    pub data: Bytes,
}

impl Atom {
    /// Construct an atom from a type tag and payload, synthesizing the header.
    pub fn build(fourcc: [u8; 4], payload: impl Into<Bytes>) -> Self {
        let data = payload.into();
        let mut header = BytesMut::with_capacity(HEADER_SIZE);
        header.put_u32((data.len() + HEADER_SIZE) as u32);
        header.put_slice(&fourcc);
        Self {
            header: header.freeze(),
            fourcc,
            data,
        }
    }

    /// Payload length in bytes (header length field minus 8).
    pub fn payload_len(&self) -> usize {
        self.data.len()
    }

    pub fn is_fourcc(&self, fourcc: &[u8; 4]) -> bool {
        &self.fourcc == fourcc
    }

    /// The type tag as a lossy string, for diagnostics.
    pub fn fourcc_str(&self) -> String {
        String::from_utf8_lossy(&self.fourcc).into_owned()
    }

    /// Reassemble the exact byte run this atom was decoded from.
    pub fn total_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(HEADER_SIZE + self.data.len());
        out.put_slice(&self.header);
        out.put_slice(&self.data);
        out.freeze()
    }

    pub fn size(&self) -> usize {
        HEADER_SIZE + self.data.len()
    }
}

impl std::fmt::Display for Atom {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({} bytes)", self.fourcc_str(), self.data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_encodes_header() {
        let atom = Atom::build(*b"moof", vec![1u8, 2, 3, 4]);
        assert_eq!(atom.header.len(), HEADER_SIZE);
        assert_eq!(&atom.header[..4], &12u32.to_be_bytes());
        assert_eq!(&atom.header[4..], b"moof");
        assert_eq!(atom.payload_len(), 4);
    }

    #[test]
    fn test_total_bytes_round_trip() {
        let atom = Atom::build(*b"mdat", vec![0xAB; 32]);
        let raw = atom.total_bytes();
        assert_eq!(raw.len(), atom.size());
        assert_eq!(&raw[..HEADER_SIZE], &atom.header[..]);
        assert_eq!(&raw[HEADER_SIZE..], &atom.data[..]);
    }

    #[test]
    fn test_fourcc_helpers() {
        let atom = Atom::build(*b"ftyp", Bytes::new());
        assert!(atom.is_fourcc(b"ftyp"));
        assert!(!atom.is_fourcc(b"moov"));
        assert_eq!(atom.fourcc_str(), "ftyp");
    }
}
