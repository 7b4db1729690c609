//! Batch extraction over a source that can be read once, front to back

use log::info;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::extract::FrameAssembler;
use crate::types::{Frame, Result};

/// Iterator of frames over a buffered line source
pub struct FrameIter<R: BufRead> {
    lines: std::io::Lines<R>,
    assembler: FrameAssembler,
    done: bool,
}

impl<R: BufRead> FrameIter<R> {
    pub fn new(reader: R, frame_head_pattern: &str) -> Result<Self> {
        Ok(Self {
            lines: reader.lines(),
            assembler: FrameAssembler::new(frame_head_pattern)?,
            done: false,
        })
    }
}

impl<R: BufRead> Iterator for FrameIter<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.lines.next() {
                Some(Ok(line)) => {
                    if let Some(frame) = self.assembler.push_line(&line) {
                        return Some(Ok(frame));
                    }
                }
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e.into()));
                }
                None => {
                    self.done = true;
                    return self.assembler.finish().map(Ok);
                }
            }
        }
    }
}

/// Extract every frame from a buffered reader
pub fn extract_from_reader<R: BufRead>(reader: R, frame_head_pattern: &str) -> Result<Vec<Frame>> {
    FrameIter::new(reader, frame_head_pattern)?.collect()
}

/// Extract every frame from a log file on disk
pub fn extract_from_file<P: AsRef<Path>>(path: P, frame_head_pattern: &str) -> Result<Vec<Frame>> {
    let path = path.as_ref();
    let file = File::open(path)?;
    let frames = extract_from_reader(BufReader::new(file), frame_head_pattern)?;
    info!("extracted {} frames from {}", frames.len(), path.display());
    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const LOG: &str = "\
2024-05-23 13:32:09.123 [1] ccucom: Send
AA 55 00 01
2C 01

2024-05-23 13:32:10.456 [1] ccucom: status line with no payload
charging session active

2024-05-23 13:32:11.789 [2] ccucom: Recv
noise AA 55 00 02 01
";

    #[test]
    fn test_three_blocks_two_markers() {
        let frames = extract_from_reader(Cursor::new(LOG), "AA 55").unwrap();
        assert_eq!(frames.len(), 2);

        assert_eq!(frames[0].timestamp, "2024-05-23 13:32:09.123");
        assert_eq!(frames[0].hex_text, "AA 55 00 01 2C 01");
        assert_eq!(frames[0].terminal_id, Some(1));

        // Prefix before the marker is gone
        assert_eq!(frames[1].hex_text, "AA 55 00 02 01");
        assert_eq!(frames[1].terminal_id, Some(2));
    }

    #[test]
    fn test_iterator_matches_collect() {
        let mut iter = FrameIter::new(Cursor::new(LOG), "AA 55").unwrap();
        assert_eq!(iter.next().unwrap().unwrap().timestamp, "2024-05-23 13:32:09.123");
        assert_eq!(iter.next().unwrap().unwrap().timestamp, "2024-05-23 13:32:11.789");
        assert!(iter.next().is_none());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_trailing_open_frame_is_flushed() {
        let log = "2024-05-23 13:32:09.123 Send\nAA 55 01";
        let frames = extract_from_reader(Cursor::new(log), "AA 55").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].hex_text, "AA 55 01");
    }

    #[test]
    fn test_file_roundtrip() {
        use std::io::Write;
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(LOG.as_bytes()).unwrap();

        let frames = extract_from_file(file.path(), "AA 55").unwrap();
        assert_eq!(frames.len(), 2);
    }
}
