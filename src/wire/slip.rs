//! SLIP (RFC 1055) framing with an explicit reset escape.
//!
//! The device and the adapter speak a byte stream; SLIP carves it into
//! frames delimited by `END`. A `CLEAR` escape is prefixed to every encoded
//! frame so a receiver that is mid-frame (e.g. after the adapter process
//! restarted) discards its partial buffer instead of corrupting the next
//! frame with stale bytes.

/// Frame delimiter.
pub const END: u8 = 0xC0;
/// Escape prefix.
pub const ESC: u8 = 0xDB;
/// Escaped `END`.
pub const ESC_END: u8 = 0xDC;
/// Escaped `ESC`.
pub const ESC_ESC: u8 = 0xDD;
/// Reset escape, sent as `ESC CLEAR` ahead of every frame.
pub const CLEAR: u8 = 0xDE;

/// Maximum buffered frame length before the decoder gives up and resyncs.
const MAX_FRAME_LEN: usize = 256;

/// Appends the SLIP encoding of `payload` to `out`: a reset-escape prefix,
/// the frame itself, and the closing delimiter.
pub fn encode(payload: &[u8], out: &mut Vec<u8>) {
    out.reserve(payload.len() + 4);
    out.push(ESC);
    out.push(CLEAR);
    out.push(END);
    for &b in payload {
        match b {
            END => {
                out.push(ESC);
                out.push(ESC_END);
            }
            ESC => {
                out.push(ESC);
                out.push(ESC_ESC);
            }
            other => out.push(other),
        }
    }
    out.push(END);
}

/// Convenience wrapper around [`encode`] that allocates its own buffer.
pub fn encode_to_vec(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 4);
    encode(payload, &mut out);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum DecoderState {
    #[default]
    Idle,
    Receiving,
    Escaped,
}

/// Streaming SLIP decoder. Feed it bytes one at a time as they arrive off
/// the wire; it invokes a callback with each complete frame it emits.
///
/// The decoder never errors out to its caller. Malformed input (buffer
/// overrun, a stray escape byte, debug trace characters the firmware emits
/// between frames) is silently absorbed by resetting to `Idle`.
#[derive(Debug, Default)]
pub struct Decoder {
    state: DecoderState,
    buffer: Vec<u8>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, exposed for tests.
    #[cfg(test)]
    fn state(&self) -> DecoderState {
        self.state
    }

    /// Drops any partially-received frame and returns to `Idle`.
    pub fn reset(&mut self) {
        self.state = DecoderState::Idle;
        self.buffer.clear();
    }

    /// Feeds one byte into the state machine, invoking `on_frame` with the
    /// decoded payload each time a complete, non-empty frame is recognized.
    pub fn feed_byte(&mut self, byte: u8, mut on_frame: impl FnMut(&[u8])) {
        match (self.state, byte) {
            (DecoderState::Idle, END) => {
                self.buffer.clear();
                self.state = DecoderState::Receiving;
            }
            (DecoderState::Idle, _) => {}
            (DecoderState::Receiving, END) => {
                if !self.buffer.is_empty() {
                    on_frame(&self.buffer);
                }
                self.buffer.clear();
                self.state = DecoderState::Idle;
            }
            (DecoderState::Receiving, ESC) => {
                self.state = DecoderState::Escaped;
            }
            (DecoderState::Receiving, b) => {
                if self.buffer.len() >= MAX_FRAME_LEN {
                    self.buffer.clear();
                    self.state = DecoderState::Idle;
                } else {
                    self.buffer.push(b);
                }
            }
            (DecoderState::Escaped, ESC_END) => {
                self.buffer.push(END);
                self.state = DecoderState::Receiving;
            }
            (DecoderState::Escaped, ESC_ESC) => {
                self.buffer.push(ESC);
                self.state = DecoderState::Receiving;
            }
            (DecoderState::Escaped, _) => {
                // Includes a literal CLEAR byte mid-stream: treat it as the
                // reset signal it is and resync rather than emit garbage.
                self.buffer.clear();
                self.state = DecoderState::Idle;
            }
        }
    }

    /// Feeds a whole byte slice, invoking `on_frame` for each frame emitted.
    pub fn feed(&mut self, bytes: &[u8], mut on_frame: impl FnMut(&[u8])) {
        for &b in bytes {
            self.feed_byte(b, &mut on_frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(encoded: &[u8]) -> Vec<Vec<u8>> {
        let mut dec = Decoder::new();
        let mut frames = Vec::new();
        dec.feed(encoded, |f| frames.push(f.to_vec()));
        frames
    }

    #[test]
    fn round_trip_empty_and_typical() {
        for payload in [&b""[..], b"hello", &[0u8, 1, 2, 255]] {
            let encoded = encode_to_vec(payload);
            let frames = decode_all(&encoded);
            assert_eq!(frames, vec![payload.to_vec()]);
        }
    }

    #[test]
    fn escapes_end_and_esc_bytes() {
        let payload = [END, ESC, 0x41];
        let encoded = encode_to_vec(&payload);
        // The literal END byte must never appear unescaped inside the frame body.
        let body = &encoded[3..encoded.len() - 1];
        assert!(!body.contains(&END));
        let frames = decode_all(&encoded);
        assert_eq!(frames, vec![payload.to_vec()]);
    }

    #[test]
    fn reset_prefix_resyncs_a_stale_receiver() {
        let mut dec = Decoder::new();
        let mut frames = Vec::new();
        // Begin a frame but never close it.
        dec.feed(&[END, 0xAA, 0xBB], |f| frames.push(f.to_vec()));
        assert_eq!(dec.state(), DecoderState::Receiving);
        // A subsequent well-formed encode (with its reset prefix) must win
        // cleanly even though the receiver was mid-frame.
        let encoded = encode_to_vec(b"ok");
        dec.feed(&encoded, |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![b"ok".to_vec()]);
    }

    #[test]
    fn double_end_emits_once_and_reopens_receiving() {
        let mut dec = Decoder::new();
        let mut frames: Vec<Vec<u8>> = Vec::new();
        dec.feed(&[END, 0x01, 0x02], |f| frames.push(f.to_vec()));
        dec.feed(&[END, END], |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![vec![0x01, 0x02]]);
        // The first END closes the frame; the second is itself a delimiter
        // that opens the next one, so the decoder ends up back in
        // `Receiving`, not `Idle`.
        assert_eq!(dec.state(), DecoderState::Receiving);
    }

    #[test]
    fn stray_escape_byte_drops_buffer_and_resyncs() {
        let mut dec = Decoder::new();
        let mut frames = Vec::new();
        dec.feed(&[END, 0x01, ESC, 0x99], |f| frames.push(f.to_vec()));
        assert_eq!(dec.state(), DecoderState::Idle);
        dec.feed(&encode_to_vec(b"next"), |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![b"next".to_vec()]);
    }

    #[test]
    fn debug_trace_bytes_between_frames_are_absorbed() {
        let mut dec = Decoder::new();
        let mut frames = Vec::new();
        let mut stream = b"D\n".to_vec();
        stream.extend(encode_to_vec(b"frame"));
        dec.feed(&stream, |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![b"frame".to_vec()]);
    }

    #[test]
    fn oversized_frame_is_dropped_and_resyncs() {
        let mut dec = Decoder::new();
        let mut frames: Vec<Vec<u8>> = Vec::new();
        dec.feed_byte(END, |_| {});
        for _ in 0..300 {
            dec.feed_byte(0x41, |f| frames.push(f.to_vec()));
        }
        assert!(frames.is_empty());
        dec.feed(&encode_to_vec(b"ok"), |f| frames.push(f.to_vec()));
        assert_eq!(frames, vec![b"ok".to_vec()]);
    }

}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn decode_of_encode_is_identity(payload in proptest::collection::vec(any::<u8>(), 0..=254)) {
            let encoded = encode_to_vec(&payload);
            let mut dec = Decoder::new();
            let mut frames = Vec::new();
            dec.feed(&encoded, |f| frames.push(f.to_vec()));
            prop_assert_eq!(frames, vec![payload]);
        }

        #[test]
        fn byte_by_byte_feed_emits_exactly_one_frame(payload in proptest::collection::vec(any::<u8>(), 0..=254)) {
            let encoded = encode_to_vec(&payload);
            let mut dec = Decoder::new();
            let mut frames = Vec::new();
            for b in encoded {
                dec.feed_byte(b, |f| frames.push(f.to_vec()));
            }
            prop_assert_eq!(frames.len(), 1);
        }
    }
}
