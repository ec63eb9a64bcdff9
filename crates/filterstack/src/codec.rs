//! Line-oriented, big-endian-text wire framing spoken with filter workers.
//!
//! Primitives (spec):
//! - **Item**: decimal length on its own line, then that many bytes, then a
//!   newline terminator that is consumed and discarded. A "null" item is a
//!   single blank line.
//! - **Array**: zero or more items followed by one null item as terminator.
//! - **Dict**: an array of keys followed by an array of values.
//! - **Boolean**: the item `"true"` or `"false"`.
//! - **Tag**: a newline-terminated ASCII token.
//!
//! Any I/O error while reading an item or tag — including a short read —
//! collapses to [`std::io::Error`] and is treated as end-of-stream by
//! callers.

use std::io::{BufRead, Write};

/// Reads codec primitives from a buffered byte stream.
pub struct ItemReader<R> {
    inner: R,
}

impl<R: BufRead> ItemReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads and returns one newline-terminated tag, with the newline
    /// stripped. An empty string means end-of-stream was observed where a
    /// tag was expected.
    pub fn read_tag(&mut self) -> std::io::Result<String> {
        let mut line = String::new();
        let n = self.inner.read_line(&mut line)?;
        if n == 0 {
            return Ok(String::new());
        }
        Ok(line.trim_end_matches(['\n', '\r']).to_string())
    }

    /// Reads one item: `None` for a blank-line null item, `Some(bytes)`
    /// otherwise.
    pub fn read_item(&mut self) -> std::io::Result<Option<Vec<u8>>> {
        let mut sizebuf = String::new();
        let n = self.inner.read_line(&mut sizebuf)?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "end of input stream",
            ));
        }
        let trimmed = sizebuf.trim_end_matches(['\n', '\r']);
        if trimmed.is_empty() {
            return Ok(None);
        }
        let size: usize = trimmed.parse().map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, "bad item length")
        })?;
        let mut buf = vec![0u8; size];
        self.inner.read_exact(&mut buf).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read from stream")
        })?;
        // Swallow the trailing newline terminator.
        let mut nl = [0u8; 1];
        self.inner.read_exact(&mut nl)?;
        Ok(Some(buf))
    }

    /// Reads items until a null item terminates the array.
    pub fn read_array(&mut self) -> std::io::Result<Vec<Vec<u8>>> {
        let mut out = Vec::new();
        loop {
            match self.read_item()? {
                Some(item) => out.push(item),
                None => return Ok(out),
            }
        }
    }

    /// Reads a dict as a key array followed by a value array of equal
    /// length.
    pub fn read_dict(&mut self) -> std::io::Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let keys = self.read_array()?;
        let values = self.read_array()?;
        if keys.len() != values.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "dict key/value array length mismatch",
            ));
        }
        Ok(keys.into_iter().zip(values).collect())
    }

    pub fn read_bool(&mut self) -> std::io::Result<bool> {
        match self.read_item()? {
            Some(item) if item == b"true" => Ok(true),
            Some(item) if item == b"false" => Ok(false),
            _ => Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "expected boolean item",
            )),
        }
    }
}

/// Writes codec primitives to a byte stream. Callers serialize sends from
/// multiple threads by locking the stream externally (see
/// [`crate::worker`]); this type does no locking of its own.
pub struct ItemWriter<W> {
    inner: W,
}

impl<W: Write> ItemWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_tag(&mut self, tag: &str) -> std::io::Result<()> {
        writeln!(self.inner, "{tag}")
    }

    /// Writes `Some(bytes)` as a length-prefixed item, or `None` as a null
    /// item (a blank line).
    pub fn write_item(&mut self, value: Option<&[u8]>) -> std::io::Result<()> {
        match value {
            Some(bytes) => {
                writeln!(self.inner, "{}", bytes.len())?;
                self.inner.write_all(bytes)?;
                writeln!(self.inner)?;
            }
            None => writeln!(self.inner)?,
        }
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> std::io::Result<()> {
        self.write_item(Some(if value { b"true" } else { b"false" }))
    }

    /// Writes an array: each item, then a null terminator.
    pub fn write_array<I, T>(&mut self, items: I) -> std::io::Result<()>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<[u8]>,
    {
        for item in items {
            self.write_item(Some(item.as_ref()))?;
        }
        self.write_item(None)
    }

    /// Writes a dict as a key array followed by a value array.
    pub fn write_dict<'a, I>(&mut self, entries: I) -> std::io::Result<()>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])> + Clone,
    {
        self.write_array(entries.clone().into_iter().map(|(k, _)| k))?;
        self.write_array(entries.into_iter().map(|(_, v)| v))
    }

    pub fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufReader;

    fn round_trip(write: impl FnOnce(&mut ItemWriter<&mut Vec<u8>>) -> std::io::Result<()>) -> Vec<u8> {
        let mut buf = Vec::new();
        write(&mut ItemWriter::new(&mut buf)).unwrap();
        buf
    }

    #[test]
    fn test_item_round_trip() {
        let buf = round_trip(|w| w.write_item(Some(b"hello")));
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert_eq!(r.read_item().unwrap(), Some(b"hello".to_vec()));
    }

    #[test]
    fn test_null_item_round_trip() {
        let buf = round_trip(|w| w.write_item(None));
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert_eq!(r.read_item().unwrap(), None);
    }

    #[test]
    fn test_empty_item_vs_null_item() {
        // An empty (zero-length) item is distinct from a null item.
        let buf = round_trip(|w| w.write_item(Some(b"")));
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert_eq!(r.read_item().unwrap(), Some(Vec::new()));
    }

    #[test]
    fn test_array_round_trip() {
        let buf = round_trip(|w| w.write_array([b"a".as_slice(), b"bb".as_slice(), b"ccc".as_slice()]));
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert_eq!(
            r.read_array().unwrap(),
            vec![b"a".to_vec(), b"bb".to_vec(), b"ccc".to_vec()]
        );
    }

    #[test]
    fn test_empty_array_round_trip() {
        let buf = round_trip(|w| w.write_array(Vec::<&[u8]>::new()));
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert_eq!(r.read_array().unwrap(), Vec::<Vec<u8>>::new());
    }

    #[test]
    fn test_dict_round_trip() {
        let entries: Vec<(&[u8], &[u8])> = vec![(b"k1", b"v1"), (b"k2", b"v2")];
        let buf = round_trip(|w| w.write_dict(entries));
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert_eq!(
            r.read_dict().unwrap(),
            vec![(b"k1".to_vec(), b"v1".to_vec()), (b"k2".to_vec(), b"v2".to_vec())]
        );
    }

    #[test]
    fn test_bool_round_trip() {
        let buf = round_trip(|w| w.write_bool(true).and_then(|_| w.write_bool(false)));
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert!(r.read_bool().unwrap());
        assert!(!r.read_bool().unwrap());
    }

    #[test]
    fn test_tag_round_trip() {
        let mut buf = Vec::new();
        ItemWriter::new(&mut buf).write_tag("init-success").unwrap();
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert_eq!(r.read_tag().unwrap(), "init-success");
    }

    #[test]
    fn test_short_read_is_fatal() {
        // Declares a 10-byte item but only supplies 3 bytes and no newline.
        let buf = b"10\nabc".to_vec();
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert!(r.read_item().is_err());
    }

    #[test]
    fn test_empty_tag_on_eof() {
        let buf: Vec<u8> = Vec::new();
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert_eq!(r.read_tag().unwrap(), "");
    }

    #[test]
    fn test_eof_mid_item_is_error() {
        let buf: Vec<u8> = Vec::new();
        let mut r = ItemReader::new(BufReader::new(buf.as_slice()));
        assert!(r.read_item().is_err());
    }
}
