use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::trace;

use crate::atom::{Atom, HEADER_SIZE};
use crate::error::Fmp4Error;

/// Sanity ceiling for a single atom payload. A length above this means the
/// box boundary is corrupted, not that the box is merely large.
pub const MAX_PAYLOAD_LEN: usize = 32 * 1024 * 1024;

/// Lazy decoder turning a byte source into an in-order sequence of [`Atom`]s.
///
/// Each call to [`read_atom`](AtomReader::read_atom) reads exactly one atom:
/// 8 header bytes, then exactly the payload the header announces. The
/// sequence is unbounded and not restartable; a new consumer needs a new
/// reader over a fresh source.
pub struct AtomReader<R> {
    source: R,
}

impl<R: AsyncRead + Unpin> AtomReader<R> {
    pub fn new(source: R) -> Self {
        Self { source }
    }

    /// Read the next atom from the source.
    ///
    /// Returns `Ok(None)` when the source ends cleanly on an atom boundary.
    /// A source that ends mid-header or mid-payload yields
    /// [`Fmp4Error::TruncatedStream`]; a header announcing a negative or
    /// oversized payload yields [`Fmp4Error::MalformedBox`]. Both are
    /// terminal for this reader.
    pub async fn read_atom(&mut self) -> Result<Option<Atom>, Fmp4Error> {
        let mut header = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            let n = self.source.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(Fmp4Error::TruncatedStream {
                    expected: HEADER_SIZE,
                    got: filled,
                });
            }
            filled += n;
        }

        let box_len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as i64;
        let fourcc: [u8; 4] = [header[4], header[5], header[6], header[7]];
        let payload_len = box_len - HEADER_SIZE as i64;

        if payload_len < 0 || payload_len as usize > MAX_PAYLOAD_LEN {
            return Err(Fmp4Error::MalformedBox {
                fourcc: String::from_utf8_lossy(&fourcc).into_owned(),
                len: payload_len,
            });
        }

        let payload_len = payload_len as usize;
        let mut data = BytesMut::with_capacity(payload_len);
        data.resize(payload_len, 0);
        if payload_len > 0 {
            self.source.read_exact(&mut data).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    Fmp4Error::TruncatedStream {
                        expected: payload_len,
                        got: 0,
                    }
                } else {
                    Fmp4Error::Io(e)
                }
            })?;
        }

        trace!(fourcc = %String::from_utf8_lossy(&fourcc), len = payload_len, "decoded atom");

        Ok(Some(Atom {
            header: Bytes::copy_from_slice(&header),
            fourcc,
            data: data.freeze(),
        }))
    }
}
