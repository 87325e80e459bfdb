//! V2 frontend messages.
use crate::{
    common::debug,
    ext::UsizeExt,
    query::{FastpathParams, ParameterList, Query},
    transport::V2Transport,
};

/// Simple query message: the SQL text with bound parameter values spliced
/// in between the fragments, NUL terminated.
///
/// The optional literal prefix is how an implicit `BEGIN;` is attached to
/// a unit of work without touching the user's SQL.
pub struct QueryMessage<'a> {
    pub prefix: Option<&'a str>,
    pub query: &'a Query,
    pub params: &'a ParameterList,
}

impl QueryMessage<'_> {
    pub const MSGTYPE: u8 = b'Q';

    /// Buffer the whole message. The caller flushes it as one unit.
    pub fn write<T: V2Transport>(self, io: &mut T) {
        debug!(
            "FE=> Query(\"{}{}\")",
            self.prefix.unwrap_or(""),
            self.query.render(self.params),
        );

        io.send_u8(Self::MSGTYPE);
        if let Some(prefix) = self.prefix {
            io.send_str(prefix);
        }

        let fragments = self.query.fragments();
        for (i, fragment) in fragments.iter().enumerate() {
            io.send_str(fragment);
            if i < self.params.len() {
                self.params.write(i + 1, io);
            }
        }

        io.send_u8(b'\0');
    }
}

/// Fastpath function call message: invoke a backend function directly by
/// its numeric id, bypassing SQL text.
pub struct FastpathCall<'a> {
    pub fnid: i32,
    pub params: &'a FastpathParams,
}

impl FastpathCall<'_> {
    pub const MSGTYPE: u8 = b'F';

    pub fn write<T: V2Transport>(self, io: &mut T) {
        debug!(
            "FE=> FastpathCall(fnid={},paramCount={})",
            self.fnid,
            self.params.len(),
        );

        io.send_u8(Self::MSGTYPE);
        io.send_u8(0);
        io.send_i32(self.fnid);
        io.send_i32(self.params.len().to_i32());

        for i in 1..=self.params.len() {
            self.params.write(i, io);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::transport::testing::MemTransport;

    #[test]
    fn query_message_interleaves_params() {
        let query = Query::parse("select ? + ?");
        let mut params = query.parameters();
        params.bind(1, "1").unwrap();
        params.bind(2, "2").unwrap();

        let mut io = MemTransport::new(b"");
        QueryMessage { prefix: None, query: &query, params: &params }.write(&mut io);
        assert_eq!(&io.output[..], b"Qselect 1 + 2\0");
    }

    #[test]
    fn query_message_prefix_is_spliced_first() {
        let query = Query::simple("update t set a = 1");
        let params = query.parameters();

        let mut io = MemTransport::new(b"");
        QueryMessage { prefix: Some("BEGIN;"), query: &query, params: &params }.write(&mut io);
        assert_eq!(&io.output[..], b"QBEGIN;update t set a = 1\0");
    }

    #[test]
    fn fastpath_call_layout() {
        let mut params = FastpathParams::new(2);
        params.bind_int(1, 7).unwrap();
        params.bind_bytes(2, &b"ab"[..]).unwrap();

        let mut io = MemTransport::new(b"");
        FastpathCall { fnid: 1042, params: &params }.write(&mut io);

        let mut expect = Vec::new();
        expect.extend_from_slice(b"F\0");
        expect.extend_from_slice(&1042i32.to_be_bytes());
        expect.extend_from_slice(&2i32.to_be_bytes());
        expect.extend_from_slice(&4i32.to_be_bytes());
        expect.extend_from_slice(&7i32.to_be_bytes());
        expect.extend_from_slice(&2i32.to_be_bytes());
        expect.extend_from_slice(b"ab");
        assert_eq!(&io.output[..], &expect[..]);
    }
}
