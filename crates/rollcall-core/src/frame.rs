//! Frame type and binary PGM (P5) codec.
//!
//! External capture commands hand frames to the daemon as 8-bit binary PGM,
//! and the external embedding provider receives them in the same format.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("not a binary PGM (P5) image")]
    BadMagic,
    #[error("malformed PGM header: {0}")]
    BadHeader(String),
    #[error("unsupported max value {0} (only 8-bit frames)")]
    UnsupportedMaxVal(u32),
    #[error("pixel data too short: expected {expected} bytes, got {actual}")]
    TruncatedData { expected: usize, actual: usize },
}

/// A captured grayscale camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: std::time::Instant,
}

impl Frame {
    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Parse a binary PGM (P5, 8-bit) image.
    ///
    /// Header comments (`#` to end of line) are skipped, matching the format
    /// produced by common capture tools.
    pub fn from_pgm(bytes: &[u8]) -> Result<Frame, FrameError> {
        if bytes.len() < 2 || &bytes[0..2] != b"P5" {
            return Err(FrameError::BadMagic);
        }

        let mut pos = 2;
        let mut fields = [0u32; 3]; // width, height, maxval

        for field in fields.iter_mut() {
            pos = skip_whitespace_and_comments(bytes, pos)?;
            let start = pos;
            while pos < bytes.len() && bytes[pos].is_ascii_digit() {
                pos += 1;
            }
            if pos == start {
                return Err(FrameError::BadHeader("expected integer field".into()));
            }
            let text = std::str::from_utf8(&bytes[start..pos])
                .map_err(|_| FrameError::BadHeader("non-ASCII header".into()))?;
            *field = text
                .parse()
                .map_err(|_| FrameError::BadHeader(format!("invalid integer: {text}")))?;
        }

        let [width, height, maxval] = fields;
        if maxval == 0 || maxval > 255 {
            return Err(FrameError::UnsupportedMaxVal(maxval));
        }

        // Exactly one whitespace byte separates the header from pixel data.
        if pos >= bytes.len() || !bytes[pos].is_ascii_whitespace() {
            return Err(FrameError::BadHeader("missing header terminator".into()));
        }
        pos += 1;

        let expected = (width as usize) * (height as usize);
        let data = &bytes[pos..];
        if data.len() < expected {
            return Err(FrameError::TruncatedData {
                expected,
                actual: data.len(),
            });
        }

        Ok(Frame {
            data: data[..expected].to_vec(),
            width,
            height,
            captured_at: std::time::Instant::now(),
        })
    }

    /// Serialize as binary PGM (P5, 8-bit).
    pub fn to_pgm(&self) -> Vec<u8> {
        let header = format!("P5\n{} {}\n255\n", self.width, self.height);
        let mut out = Vec::with_capacity(header.len() + self.data.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.data);
        out
    }
}

fn skip_whitespace_and_comments(bytes: &[u8], mut pos: usize) -> Result<usize, FrameError> {
    loop {
        while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        if pos < bytes.len() && bytes[pos] == b'#' {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        break;
    }
    if pos >= bytes.len() {
        return Err(FrameError::BadHeader("truncated header".into()));
    }
    Ok(pos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pgm_round_trip() {
        let frame = Frame {
            data: vec![0, 64, 128, 255],
            width: 2,
            height: 2,
            captured_at: std::time::Instant::now(),
        };

        let parsed = Frame::from_pgm(&frame.to_pgm()).unwrap();
        assert_eq!(parsed.width, 2);
        assert_eq!(parsed.height, 2);
        assert_eq!(parsed.data, vec![0, 64, 128, 255]);
    }

    #[test]
    fn test_pgm_with_comment() {
        let mut bytes = b"P5\n# capture-tool v1\n3 1\n255\n".to_vec();
        bytes.extend_from_slice(&[10, 20, 30]);

        let frame = Frame::from_pgm(&bytes).unwrap();
        assert_eq!(frame.width, 3);
        assert_eq!(frame.height, 1);
        assert_eq!(frame.data, vec![10, 20, 30]);
    }

    #[test]
    fn test_pgm_bad_magic() {
        assert!(matches!(
            Frame::from_pgm(b"P6\n1 1\n255\n\0"),
            Err(FrameError::BadMagic)
        ));
    }

    #[test]
    fn test_pgm_truncated_data() {
        let bytes = b"P5\n4 4\n255\n\0\0".to_vec();
        assert!(matches!(
            Frame::from_pgm(&bytes),
            Err(FrameError::TruncatedData { expected: 16, .. })
        ));
    }

    #[test]
    fn test_pgm_16_bit_rejected() {
        assert!(matches!(
            Frame::from_pgm(b"P5\n1 1\n65535\n\0\0"),
            Err(FrameError::UnsupportedMaxVal(65535))
        ));
    }

    #[test]
    fn test_avg_brightness() {
        let frame = Frame {
            data: vec![0, 255],
            width: 2,
            height: 1,
            captured_at: std::time::Instant::now(),
        };
        assert!((frame.avg_brightness() - 127.5).abs() < 1e-3);
    }
}
