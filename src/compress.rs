//! DEFLATE stages for `COMPRESS=DEFLATE` (RFC 4978).
//!
//! Both directions use raw deflate streams (no zlib wrapper) that live for
//! the rest of the connection. The session owns one [`DeflateState`] and
//! feeds it buffers: outbound frames are compressed with a sync flush so
//! the server can decode each command immediately; inbound bytes are
//! inflated ahead of the response framer.

use bytes::BytesMut;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use thiserror::Error;

const CHUNK: usize = 8 * 1024;

#[derive(Debug, Error)]
pub enum DeflateError {
    #[error("deflate failed: {0}")]
    Compress(#[from] flate2::CompressError),
    #[error("inflate failed: {0}")]
    Decompress(#[from] flate2::DecompressError),
    #[error("deflate stream ended mid-connection")]
    UnexpectedStreamEnd,
}

#[derive(Debug)]
pub(crate) struct DeflateState {
    compress: Compress,
    decompress: Decompress,
}

impl DeflateState {
    pub(crate) fn new() -> Self {
        Self {
            compress: Compress::new(Compression::default(), false),
            decompress: Decompress::new(false),
        }
    }

    /// Compresses one outbound frame, sync-flushed so it arrives whole.
    pub(crate) fn compress_frame(&mut self, input: &[u8]) -> Result<Vec<u8>, DeflateError> {
        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        let mut chunk = [0u8; CHUNK];
        let mut offset = 0usize;

        loop {
            let consumed_before = self.compress.total_in();
            let produced_before = self.compress.total_out();
            self.compress
                .compress(&input[offset..], &mut chunk, FlushCompress::Sync)?;
            offset += (self.compress.total_in() - consumed_before) as usize;
            let produced = (self.compress.total_out() - produced_before) as usize;
            out.extend_from_slice(&chunk[..produced]);

            // A sync flush is complete once all input is consumed and the
            // compressor had spare output room left.
            if offset >= input.len() && produced < chunk.len() {
                return Ok(out);
            }
        }
    }

    /// Inflates inbound bytes into the framer's buffer.
    pub(crate) fn decompress_into(
        &mut self,
        input: &[u8],
        out: &mut BytesMut,
    ) -> Result<(), DeflateError> {
        let mut chunk = [0u8; CHUNK];
        let mut offset = 0usize;

        loop {
            let consumed_before = self.decompress.total_in();
            let produced_before = self.decompress.total_out();
            let status =
                self.decompress
                    .decompress(&input[offset..], &mut chunk, FlushDecompress::None)?;
            offset += (self.decompress.total_in() - consumed_before) as usize;
            let produced = (self.decompress.total_out() - produced_before) as usize;
            out.extend_from_slice(&chunk[..produced]);

            match status {
                // RFC 4978 streams never end while the connection lives.
                Status::StreamEnd => return Err(DeflateError::UnexpectedStreamEnd),
                Status::Ok | Status::BufError => {
                    if offset >= input.len() && produced < chunk.len() {
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let mut client = DeflateState::new();
        let mut server = DeflateState::new();

        let frame = b"A000001 NOOP\r\n";
        let compressed = client.compress_frame(frame).unwrap();
        assert!(!compressed.is_empty());

        let mut inflated = BytesMut::new();
        server.decompress_into(&compressed, &mut inflated).unwrap();
        assert_eq!(&inflated[..], frame);
    }

    #[test]
    fn test_streaming_across_frames() {
        let mut sender = DeflateState::new();
        let mut receiver = DeflateState::new();
        let mut inflated = BytesMut::new();

        for frame in [
            b"* 1 EXISTS\r\n".as_ref(),
            b"* 2 EXISTS\r\n",
            b"A000002 OK IDLE terminated\r\n",
        ] {
            let compressed = sender.compress_frame(frame).unwrap();
            receiver
                .decompress_into(&compressed, &mut inflated)
                .unwrap();
        }

        assert_eq!(
            &inflated[..],
            b"* 1 EXISTS\r\n* 2 EXISTS\r\nA000002 OK IDLE terminated\r\n".as_ref()
        );
    }

    #[test]
    fn test_split_compressed_input() {
        let mut sender = DeflateState::new();
        let mut receiver = DeflateState::new();

        let frame = b"* OK a somewhat longer line to give the compressor something to chew on\r\n";
        let compressed = sender.compress_frame(frame).unwrap();

        // Feed the compressed bytes one at a time; the inflater keeps state
        // across arbitrarily fragmented input.
        let mut inflated = BytesMut::new();
        for byte in compressed {
            receiver.decompress_into(&[byte], &mut inflated).unwrap();
        }
        assert_eq!(&inflated[..], frame.as_ref());
    }
}
