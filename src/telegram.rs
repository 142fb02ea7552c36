//! ==============================================================================
//! telegram.rs - tolerant decoder for scale weight telegrams
//! ==============================================================================
//!
//! purpose:
//!     the scale streams loosely structured ascii over tcp. typical shapes:
//!
//!         ST,GS,+0070,00kg      (status, gross, signed weight, decimal comma)
//!         +123                  (bare signed number)
//!         70                    (plain integer)
//!
//!     there is no formal grammar, so this is a best-effort pattern match and
//!     not a strict protocol implementation. anything without a number is a
//!     "no reading", never an error.
//!
//! relationships:
//!     - used by: device.rs (incremental stream from the scale socket)
//!     - used by: probe.rs (free-form text from the legacy /peso endpoint)
//!
//! ==============================================================================

use regex::Regex;
use std::sync::LazyLock;

/// signed number with a decimal part, `.` or `,` as the separator
static DECIMAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]?[0-9]+[.,][0-9]+").expect("valid decimal pattern"));

/// signed integer
static INTEGER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]?[0-9]+").expect("valid integer pattern"));

/// longest partial line kept between chunks
const MAX_PENDING: usize = 1024;

/// decode one telegram into kilograms
pub fn decode(raw: &[u8]) -> Option<f64> {
    decode_text(&String::from_utf8_lossy(raw))
}

/// decode one telegram already held as text
///
/// a decimal-bearing token wins over an integer-only one.
pub fn decode_text(raw: &str) -> Option<f64> {
    let token = DECIMAL.find(raw).or_else(|| INTEGER.find(raw))?;
    let value: f64 = token.as_str().replace(',', ".").parse().ok()?;
    // digit runs too long for f64 overflow to inf, which json cannot carry
    value.is_finite().then_some(value)
}

// ==============================================================================
// framing
// ==============================================================================
// tcp hands us arbitrary chunks. devices that terminate telegrams with cr/lf
// get proper line framing (a telegram split across two reads is reassembled).
// devices that never send a terminator get each chunk decoded as one
// telegram. until the first terminator shows up we cannot tell the two apart,
// so an unterminated chunk is held back: a terminator in the next chunk makes
// it the head of a framed line, another unterminated chunk or a quiet period
// (see `flush`) confirms it was a whole telegram.

/// incremental telegram framer over the device byte stream
#[derive(Debug, Default)]
pub struct TelegramStream {
    pending: Vec<u8>,
    framed: bool,
}

impl TelegramStream {
    pub fn new() -> Self {
        Self::default()
    }

    /// feed one chunk, get back every weight it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<f64> {
        if !self.framed {
            if !chunk.iter().any(|b| is_terminator(*b)) {
                let held = self.flush();
                self.pending.extend_from_slice(chunk);
                return held;
            }
            self.framed = true;
        }
        self.pending.extend_from_slice(chunk);

        let mut values = Vec::new();
        let mut start = 0;
        for (i, byte) in self.pending.iter().enumerate() {
            if is_terminator(*byte) {
                let line = &self.pending[start..i];
                if !line.is_empty() {
                    values.extend(decode(line));
                }
                start = i + 1;
            }
        }
        self.pending.drain(..start);

        if self.pending.len() > MAX_PENDING {
            tracing::debug!(
                "[SCALE] dropping {} bytes of unterminated telegram",
                self.pending.len()
            );
            self.pending.clear();
        }
        values
    }

    /// decode a held-back unterminated chunk
    ///
    /// call when the device went quiet after sending it. framed streams keep
    /// their partial line, it is not a telegram yet.
    pub fn flush(&mut self) -> Vec<f64> {
        if self.framed || self.pending.is_empty() {
            return Vec::new();
        }
        let held = std::mem::take(&mut self.pending);
        decode(&held).into_iter().collect()
    }

    /// whether an unterminated chunk is waiting for `flush`
    pub fn has_held_chunk(&self) -> bool {
        !self.framed && !self.pending.is_empty()
    }

    /// whether a line terminator has been seen on this stream
    pub fn is_framed(&self) -> bool {
        self.framed
    }
}

fn is_terminator(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_status_gross_telegram_with_decimal_comma() {
        assert_eq!(decode(b"ST,GS,+0070,00kg"), Some(70.0));
        assert_eq!(decode(b"ST,GS,+0123,45kg"), Some(123.45));
    }

    #[test]
    fn decodes_bare_and_signed_numbers() {
        assert_eq!(decode_text("+123"), Some(123.0));
        assert_eq!(decode_text("70"), Some(70.0));
        assert_eq!(decode_text("ST,GS,-0012.5kg"), Some(-12.5));
        assert_eq!(decode_text("ST,GS, 0070.00kg"), Some(70.0));
    }

    #[test]
    fn prefers_decimal_token_over_earlier_integer() {
        assert_eq!(decode_text("ID 7 weight 12,75"), Some(12.75));
    }

    #[test]
    fn text_without_digits_is_no_reading() {
        assert_eq!(decode_text("garbage"), None);
        assert_eq!(decode_text(""), None);
        assert_eq!(decode_text("ST,GS,kg"), None);
        assert_eq!(decode(&[0xff, 0xfe, b'k', b'g']), None);
    }

    #[test]
    fn overflowing_digit_run_is_no_reading() {
        let nines = "9".repeat(400);
        assert_eq!(decode_text(&nines), None);
        assert_eq!(decode_text(&format!("{},5", nines)), None);
    }

    #[test]
    fn unframed_chunks_decode_individually() {
        let mut stream = TelegramStream::new();
        assert_eq!(stream.push(b"ST,GS,+0070,00kg"), Vec::<f64>::new());
        assert!(stream.has_held_chunk());
        assert_eq!(stream.push(b"ST,GS,+0071,00kg"), vec![70.0]);
        assert_eq!(stream.push(b"noise"), vec![71.0]);
        assert_eq!(stream.flush(), Vec::<f64>::new());
        assert!(!stream.has_held_chunk());
        assert!(!stream.is_framed());
    }

    #[test]
    fn quiet_period_releases_held_chunk() {
        let mut stream = TelegramStream::new();
        assert!(stream.push(b"+0042").is_empty());
        assert_eq!(stream.flush(), vec![42.0]);
        assert_eq!(stream.flush(), Vec::<f64>::new());
    }

    #[test]
    fn first_telegram_split_before_any_terminator_is_reassembled() {
        let mut stream = TelegramStream::new();
        assert_eq!(stream.push(b"ST,GS,+01"), Vec::<f64>::new());
        assert_eq!(stream.push(b"23,45kg\r\n"), vec![123.45]);
        assert!(stream.is_framed());
        assert!(!stream.has_held_chunk());
    }

    #[test]
    fn framed_stream_never_flushes_partial_line() {
        let mut stream = TelegramStream::new();
        assert_eq!(stream.push(b"+0001\n+00"), vec![1.0]);
        assert_eq!(stream.flush(), Vec::<f64>::new());
        assert_eq!(stream.push(b"02\n"), vec![2.0]);
    }

    #[test]
    fn framed_telegram_split_across_chunks_is_reassembled() {
        let mut stream = TelegramStream::new();
        assert_eq!(stream.push(b"ST,GS,+0070,00kg\r\nST,GS,+01"), vec![70.0]);
        assert_eq!(stream.push(b"23,45kg\r\n"), vec![123.45]);
        assert!(stream.is_framed());
    }

    #[test]
    fn framed_stream_skips_garbled_lines() {
        let mut stream = TelegramStream::new();
        let values = stream.push(b"ST,GS,+0001,00kg\n\n??\nST,GS,+0002,00kg\n");
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn oversized_partial_line_is_discarded() {
        let mut stream = TelegramStream::new();
        stream.push(b"\n");
        stream.push(&[b'x'; MAX_PENDING + 1]);
        assert_eq!(stream.push(b"5\n"), vec![5.0]);
    }
}
