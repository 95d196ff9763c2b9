use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use super::ChannelError;
use crate::protocol::MAX_EVENT_LINE;

/// Bounded, cancel-safe line splitter over any buffered async reader.
///
/// Lines longer than `MAX_EVENT_LINE` are discarded up to their newline and
/// reported once as `TooLarge`, so a runaway writer cannot grow the buffer.
pub struct LineReader<R> {
    reader: R,
    pending: Vec<u8>,
    overflow: usize,
}

impl<R> LineReader<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: Vec::with_capacity(256),
            overflow: 0,
        }
    }

    /// Read the next line without its trailing newline.
    pub async fn next_line(&mut self) -> Result<Option<String>, ChannelError> {
        loop {
            let available = self.reader.fill_buf().await?;

            if available.is_empty() {
                // EOF: flush whatever partial line is left
                if self.overflow > 0 {
                    let size = std::mem::take(&mut self.overflow);
                    return Err(ChannelError::TooLarge {
                        size,
                        limit: MAX_EVENT_LINE,
                    });
                }
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return self.take_line().map(Some);
            }

            let newline = available.iter().position(|&b| b == b'\n');
            let chunk_len = newline.map_or(available.len(), |i| i + 1);
            let body_len = newline.unwrap_or(available.len());

            if self.overflow > 0 || self.pending.len() + body_len >= MAX_EVENT_LINE {
                self.overflow += self.pending.len() + body_len;
                self.pending.clear();
            } else {
                self.pending.extend_from_slice(&available[..body_len]);
            }
            self.reader.consume(chunk_len);

            if newline.is_some() {
                if self.overflow > 0 {
                    // +1 for the newline itself
                    let size = std::mem::take(&mut self.overflow) + 1;
                    return Err(ChannelError::TooLarge {
                        size,
                        limit: MAX_EVENT_LINE,
                    });
                }
                return self.take_line().map(Some);
            }
        }
    }

    fn take_line(&mut self) -> Result<String, ChannelError> {
        let bytes = std::mem::take(&mut self.pending);
        let len = bytes.len();
        String::from_utf8(bytes).map_err(|_| ChannelError::InvalidUtf8 { len })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    fn reader(data: &[u8]) -> LineReader<BufReader<&[u8]>> {
        LineReader::new(BufReader::with_capacity(16, data))
    }

    #[tokio::test]
    async fn test_splits_lines() {
        let mut lines = reader(b"first\nsecond line\nthird");

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("first"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("second line"));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("third"));
        assert!(lines.next_line().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_line_local() {
        let mut lines = reader(b"ok\n\xff\xfe\nafter\n");

        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("ok"));
        let err = lines.next_line().await.unwrap_err();
        assert!(matches!(err, ChannelError::InvalidUtf8 { len: 2 }));
        assert!(err.is_line_local());
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("after"));
    }

    #[tokio::test]
    async fn test_oversized_line_is_discarded() {
        let mut data = vec![b'x'; MAX_EVENT_LINE + 10];
        data.extend_from_slice(b"\nnext\n");
        let mut lines = reader(&data);

        let err = lines.next_line().await.unwrap_err();
        assert!(matches!(err, ChannelError::TooLarge { size, .. } if size == MAX_EVENT_LINE + 11));
        assert_eq!(lines.next_line().await.unwrap().as_deref(), Some("next"));
        assert!(lines.next_line().await.unwrap().is_none());
    }
}
