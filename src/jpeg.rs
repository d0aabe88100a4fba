//! JPEG frame demarcation over a DMA byte stream.
//!
//! The sensor compresses in hardware; the stream between VSYNC edges carries
//! padding, then `FF D8 ... FF D9`, then trailing zeros. [`JpegFramer`] keeps
//! enough state to find markers split across receive windows.

pub const MARKER: u8 = 0xFF;
/// Start of image.
pub const SOI: u8 = 0xD8;
/// End of image.
pub const EOI: u8 = 0xD9;

#[derive(Default, Debug)]
pub struct JpegFramer {
    in_frame: bool,
    last_ff: bool,
}

impl JpegFramer {
    pub const fn new() -> Self {
        Self {
            in_frame: false,
            last_ff: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    /// SOI seen, EOI not yet.
    pub fn in_frame(&self) -> bool {
        self.in_frame
    }

    /// Scan one receive window. Bytes from SOI through EOI inclusive are passed
    /// to `sink`, possibly in several pieces. Returns `true` once EOI has been
    /// emitted; the rest of `chunk` is ignored.
    pub fn feed<E>(
        &mut self,
        chunk: &[u8],
        mut sink: impl FnMut(&[u8]) -> Result<(), E>,
    ) -> Result<bool, E> {
        let mut start = 0;
        for (i, &b) in chunk.iter().enumerate() {
            if !self.in_frame {
                if self.last_ff && b == SOI {
                    self.in_frame = true;
                    self.last_ff = false;
                    if i == 0 {
                        // the FF closed the previous window
                        sink(&[MARKER])?;
                        start = 0;
                    } else {
                        start = i - 1;
                    }
                    continue;
                }
            } else if self.last_ff && b == EOI {
                sink(&chunk[start..=i])?;
                self.reset();
                return Ok(true);
            }
            self.last_ff = b == MARKER;
        }
        if self.in_frame && start < chunk.len() {
            sink(&chunk[start..])?;
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;

    fn run(windows: &[&[u8]]) -> (Vec<u8>, Option<usize>) {
        let mut framer = JpegFramer::new();
        let mut out = Vec::new();
        for (n, w) in windows.iter().enumerate() {
            let done = framer
                .feed::<Infallible>(w, |bytes| {
                    out.extend_from_slice(bytes);
                    Ok(())
                })
                .unwrap();
            if done {
                return (out, Some(n));
            }
        }
        (out, None)
    }

    #[test]
    fn frame_inside_one_window() {
        let (out, done) = run(&[&[0x00, 0x00, 0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9, 0x00]]);
        assert_eq!(out, [0xFF, 0xD8, 0x01, 0x02, 0xFF, 0xD9]);
        assert_eq!(done, Some(0));
    }

    #[test]
    fn soi_split_across_windows() {
        let (out, done) = run(&[&[0x00, 0xFF], &[0xD8, 0x11], &[0xFF, 0xD9]]);
        assert_eq!(out, [0xFF, 0xD8, 0x11, 0xFF, 0xD9]);
        assert_eq!(done, Some(2));
    }

    #[test]
    fn eoi_split_across_windows() {
        let (out, done) = run(&[&[0xFF, 0xD8, 0x22, 0xFF], &[0xD9, 0x00, 0x00]]);
        assert_eq!(out, [0xFF, 0xD8, 0x22, 0xFF, 0xD9]);
        assert_eq!(done, Some(1));
    }

    #[test]
    fn stuffed_and_fill_bytes_are_not_markers() {
        let (out, done) = run(&[&[0xFF, 0xD8, 0xFF, 0x00, 0xD9, 0xFF, 0xFF, 0xD9]]);
        assert_eq!(out, [0xFF, 0xD8, 0xFF, 0x00, 0xD9, 0xFF, 0xFF, 0xD9]);
        assert_eq!(done, Some(0));
    }

    #[test]
    fn eoi_before_soi_is_ignored() {
        let (out, done) = run(&[&[0xFF, 0xD9, 0x00], &[0xFF, 0xD8, 0xFF, 0xD9]]);
        assert_eq!(out, [0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(done, Some(1));
    }

    #[test]
    fn missing_eoi_never_completes() {
        let mut framer = JpegFramer::new();
        let mut n = 0;
        for _ in 0..4 {
            let done = framer
                .feed::<Infallible>(&[0xFF, 0xD8, 0x10, 0x20], |b| {
                    n += b.len();
                    Ok(())
                })
                .unwrap();
            assert!(!done);
        }
        assert!(framer.in_frame());
        assert_eq!(n, 16);
    }

    #[test]
    fn sink_error_stops_the_scan() {
        let mut framer = JpegFramer::new();
        let res = framer.feed(&[0xFF, 0xD8, 0x00], |_| Err("full"));
        assert_eq!(res, Err("full"));
    }
}
