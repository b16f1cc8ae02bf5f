// raprs - KISS Framing Module
// KISS byte stuffing for the host <-> TNC link and a streaming deframer

use log::debug;

use crate::error::KissError;

pub const KISS_FEND: u8 = 0xC0;
pub const KISS_FESC: u8 = 0xDB;
pub const KISS_TFEND: u8 = 0xDC;
pub const KISS_TFESC: u8 = 0xDD;

/// Command byte for a data frame on TNC port 0
pub const KISS_CMD_DATA: u8 = 0x00;

/// An unterminated segment longer than this is line noise, not a frame
pub const MAX_PENDING: usize = 4096;

/// Escapes FEND and FESC bytes inside a frame body
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut output = Vec::with_capacity(data.len() + data.len() / 8);
    for &byte in data {
        match byte {
            KISS_FEND => {
                output.push(KISS_FESC);
                output.push(KISS_TFEND);
            }
            KISS_FESC => {
                output.push(KISS_FESC);
                output.push(KISS_TFESC);
            }
            _ => output.push(byte),
        }
    }
    output
}

/// Reverses `escape`. A FESC that is not followed by TFEND or TFESC is a
/// sync error for the whole frame.
pub fn unescape(data: &[u8]) -> Result<Vec<u8>, KissError> {
    let mut output = Vec::with_capacity(data.len());
    let mut bytes = data.iter();
    while let Some(&byte) = bytes.next() {
        if byte != KISS_FESC {
            output.push(byte);
            continue;
        }
        match bytes.next() {
            Some(&KISS_TFEND) => output.push(KISS_FEND),
            Some(&KISS_TFESC) => output.push(KISS_FESC),
            Some(&other) => {
                return Err(KissError::FrameSync(format!(
                    "FESC followed by 0x{:02x}",
                    other
                )))
            }
            None => return Err(KissError::FrameSync("dangling FESC at end of frame".into())),
        }
    }
    Ok(output)
}

/// Wraps a raw AX.25 frame as a KISS data frame: FEND, 0x00, escaped
/// payload, FEND
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let escaped = escape(payload);
    let mut output = Vec::with_capacity(escaped.len() + 3);
    output.push(KISS_FEND);
    output.push(KISS_CMD_DATA);
    output.extend_from_slice(&escaped);
    output.push(KISS_FEND);
    output
}

/// Accumulates bytes from the link and hands out complete data frames.
///
/// Bytes that arrive before the first FEND are noise and are dropped. A
/// frame that has not seen its closing FEND stays buffered, so the
/// deframer can be fed in arbitrary chunks and polled again later.
#[derive(Debug, Default)]
pub struct KissDeframer {
    buffer: Vec<u8>,
}

impl KissDeframer {
    pub fn new() -> Self {
        KissDeframer { buffer: Vec::new() }
    }

    /// Add bytes read from the link
    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Number of bytes waiting for a closing FEND
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Pull the next data frame out of the buffer.
    ///
    /// Returns `None` when no complete frame is buffered. Empty segments
    /// and non-data KISS commands are consumed silently; a segment with a
    /// bad escape yields `Some(Err(_))` and the next call carries on with
    /// the following frame.
    pub fn next_frame(&mut self) -> Option<Result<Vec<u8>, KissError>> {
        loop {
            let start = match self.buffer.iter().position(|&b| b == KISS_FEND) {
                Some(pos) => pos,
                None => {
                    self.buffer.clear();
                    return None;
                }
            };
            if start > 0 {
                debug!("Discarding {} bytes outside of a KISS frame", start);
                self.buffer.drain(..start);
            }

            let Some(end) = self.buffer.iter().skip(1).position(|&b| b == KISS_FEND) else {
                if self.pending() > MAX_PENDING {
                    debug!("Discarding {} bytes with no closing FEND", self.pending());
                    self.buffer.clear();
                }
                return None;
            };
            let end = end + 1;

            // The closing FEND stays in the buffer; it may open the next frame.
            let segment: Vec<u8> = self.buffer.drain(..end).skip(1).collect();
            let Some((&command, body)) = segment.split_first() else {
                continue;
            };
            if command != KISS_CMD_DATA {
                debug!("Ignoring KISS command frame 0x{:02x} ({} bytes)", command, body.len());
                continue;
            }
            return Some(unescape(body));
        }
    }

    /// Iterator over the decodable data frames currently buffered; sync
    /// errors are logged and skipped
    pub fn frames(&mut self) -> Frames<'_> {
        Frames { deframer: self }
    }

    /// Clear the buffer (e.g., on error or disconnect)
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

pub struct Frames<'a> {
    deframer: &'a mut KissDeframer,
}

impl Iterator for Frames<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.deframer.next_frame()? {
                Ok(payload) => return Some(payload),
                Err(e) => debug!("Dropping KISS frame: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn deframe_all(data: &[u8]) -> Vec<Vec<u8>> {
        let mut deframer = KissDeframer::new();
        deframer.push(data);
        deframer.frames().collect()
    }

    #[test]
    fn test_frame_escapes_special_bytes() {
        let framed = frame(&[0xC0, 0xDB, 0x41]);
        assert_eq!(
            framed,
            vec![KISS_FEND, 0x00, KISS_FESC, KISS_TFEND, KISS_FESC, KISS_TFESC, 0x41, KISS_FEND]
        );
        let inner = &framed[1..framed.len() - 1];
        assert!(!inner.contains(&KISS_FEND));
        assert_eq!(inner.iter().filter(|&&b| b == KISS_FESC).count(), 2);
    }

    #[test]
    fn test_empty_payload() {
        assert_eq!(frame(&[]), vec![KISS_FEND, 0x00, KISS_FEND]);
        assert_eq!(deframe_all(&frame(&[])), vec![Vec::<u8>::new()]);
    }

    #[test]
    fn test_roundtrip() {
        let payloads: Vec<Vec<u8>> = vec![
            b"hello".to_vec(),
            vec![0xC0],
            vec![0xDB],
            vec![0xDB, 0xDC, 0xC0, 0xDD],
            (0u8..=255).collect(),
        ];
        for payload in payloads {
            assert_eq!(deframe_all(&frame(&payload)), vec![payload]);
        }
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut stream = frame(b"one");
        stream.extend(frame(b"two"));
        stream.extend([KISS_FEND, KISS_FEND, KISS_FEND]);
        stream.extend(frame(b"three"));
        assert_eq!(
            deframe_all(&stream),
            vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]
        );
    }

    #[test]
    fn test_partial_frame_is_restartable() {
        let framed = frame(b"split across reads");
        let mut deframer = KissDeframer::new();
        deframer.push(&framed[..6]);
        assert!(deframer.next_frame().is_none());
        assert_eq!(deframer.pending(), 6);
        deframer.push(&framed[6..]);
        assert_eq!(deframer.next_frame(), Some(Ok(b"split across reads".to_vec())));
        assert!(deframer.next_frame().is_none());
    }

    #[test]
    fn test_noise_before_first_fend() {
        let mut stream = vec![0x01, 0x02, 0x03];
        stream.extend(frame(b"data"));
        assert_eq!(deframe_all(&stream), vec![b"data".to_vec()]);
    }

    #[test]
    fn test_non_data_commands_are_dropped() {
        // TXDELAY, then SetHardware, then a data frame
        let mut stream = vec![KISS_FEND, 0x01, 0x32, KISS_FEND];
        stream.extend([KISS_FEND, 0x06, 0x10, 0x20, KISS_FEND]);
        stream.extend(frame(b"ok"));
        assert_eq!(deframe_all(&stream), vec![b"ok".to_vec()]);
    }

    #[test]
    fn test_malformed_stream_yields_nothing() {
        assert!(deframe_all(&[0xC0, 0xDB, 0xAA, 0xC0]).is_empty());
    }

    #[test]
    fn test_bad_escape_resyncs() {
        let mut stream = vec![KISS_FEND, 0x00, 0x41, KISS_FESC, 0x42, KISS_FEND];
        stream.extend(frame(b"next"));
        let mut deframer = KissDeframer::new();
        deframer.push(&stream);
        assert!(matches!(deframer.next_frame(), Some(Err(KissError::FrameSync(_)))));
        assert_eq!(deframer.next_frame(), Some(Ok(b"next".to_vec())));
        assert!(deframer.next_frame().is_none());
    }

    #[test]
    fn test_dangling_escape() {
        assert!(unescape(&[0x41, KISS_FESC]).is_err());
        assert_eq!(unescape(&[KISS_FESC, KISS_TFESC]), Ok(vec![KISS_FESC]));
    }

    #[test]
    fn test_unterminated_segment_is_capped() {
        let mut deframer = KissDeframer::new();
        deframer.push(&[KISS_FEND, 0x00]);
        deframer.push(&vec![0x41; MAX_PENDING]);
        assert!(deframer.next_frame().is_none());
        assert_eq!(deframer.pending(), 0);
        deframer.push(&frame(b"ok"));
        assert_eq!(deframer.next_frame(), Some(Ok(b"ok".to_vec())));
    }

    proptest! {
        #[test]
        fn test_frame_deframe_prop(payload in any::<Vec<u8>>()) {
            prop_assert_eq!(deframe_all(&frame(&payload)), vec![payload]);
        }

        #[test]
        fn test_split_reads_prop(payloads in prop::collection::vec(any::<Vec<u8>>(), 1..5), cut in any::<prop::sample::Index>()) {
            let stream: Vec<u8> = payloads.iter().flat_map(|p| frame(p)).collect();
            let cut = cut.index(stream.len());
            let mut deframer = KissDeframer::new();
            deframer.push(&stream[..cut]);
            let mut decoded: Vec<Vec<u8>> = deframer.frames().collect();
            deframer.push(&stream[cut..]);
            decoded.extend(deframer.frames());
            prop_assert_eq!(decoded, payloads);
        }
    }

    #[test]
    fn test_clear() {
        let mut deframer = KissDeframer::new();
        deframer.push(&[KISS_FEND, 0x00, 0x41]);
        deframer.clear();
        deframer.push(&[0x42, KISS_FEND]);
        assert!(deframer.next_frame().is_none());
    }
}
