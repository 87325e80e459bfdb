//! Data row decoding.
use bytes::Bytes;

use crate::{Result, postgres::ProtocolError, transport::V2Transport};

/// One row of a result batch.
///
/// Column payloads are opaque bytes; their meaning depends on the matching
/// field's format flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Vec<Option<Bytes>>,
}

impl Row {
    /// Read a V2 tuple: a null bitmap (one bit per column, set when the
    /// value is present), then a 4-byte length and payload per non-null
    /// column. Text-mode lengths include the length field itself,
    /// binary-mode lengths do not.
    pub(crate) async fn read<T: V2Transport>(
        io: &mut T,
        columns: usize,
        binary: bool,
    ) -> Result<Self> {
        let bitmap = io.recv_bytes(columns.div_ceil(8)).await?;
        let mut values = Vec::with_capacity(columns);

        for i in 0..columns {
            if bitmap[i / 8] & (0x80 >> (i % 8)) == 0 {
                values.push(None);
                continue;
            }
            let len = io.recv_i32().await?;
            let len = if binary { len } else { len - 4 };
            let len = usize::try_from(len)
                .map_err(|_| ProtocolError::malformed("negative tuple value length"))?;
            values.push(Some(io.recv_bytes(len).await?));
        }

        Ok(Self { columns: values })
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// The payload of one column, `None` when NULL or out of range.
    pub fn get(&self, index: usize) -> Option<&Bytes> {
        self.columns.get(index).and_then(Option::as_ref)
    }

    pub fn columns(&self) -> &[Option<Bytes>] {
        &self.columns
    }
}

#[cfg(test)]
mod test {
    use bytes::BufMut;

    use super::*;
    use crate::transport::testing::{MemTransport, block_on};

    fn tuple(values: &[Option<&str>], binary: bool) -> MemTransport {
        let mut buf = Vec::new();
        let mut bitmap = vec![0u8; values.len().div_ceil(8)];
        for (i, value) in values.iter().enumerate() {
            if value.is_some() {
                bitmap[i / 8] |= 0x80 >> (i % 8);
            }
        }
        buf.put(&bitmap[..]);
        for value in values.iter().flatten() {
            buf.put_i32(value.len() as i32 + if binary { 0 } else { 4 });
            buf.put(value.as_bytes());
        }
        MemTransport::new(buf)
    }

    #[test]
    fn text_tuple_with_nulls() {
        let mut io = tuple(&[Some("a"), None, Some("bc")], false);
        let row = block_on(Row::read(&mut io, 3, false)).unwrap();
        assert_eq!(row.len(), 3);
        assert_eq!(row.get(0).unwrap(), &&b"a"[..]);
        assert_eq!(row.get(1), None);
        assert_eq!(row.get(2).unwrap(), &&b"bc"[..]);
        assert!(io.input.is_empty());
    }

    #[test]
    fn binary_tuple_lengths_exclude_the_prefix() {
        let mut io = tuple(&[Some("abcd")], true);
        let row = block_on(Row::read(&mut io, 1, true)).unwrap();
        assert_eq!(row.get(0).unwrap(), &&b"abcd"[..]);
        assert!(io.input.is_empty());
    }

    #[test]
    fn wide_tuple_spans_bitmap_bytes() {
        let values: Vec<Option<&str>> = (0..10).map(|i| (i % 2 == 0).then_some("x")).collect();
        let mut io = tuple(&values, false);
        let row = block_on(Row::read(&mut io, 10, false)).unwrap();
        assert_eq!(row.len(), 10);
        assert_eq!(row.get(8).unwrap(), &&b"x"[..]);
        assert_eq!(row.get(9), None);
    }
}
