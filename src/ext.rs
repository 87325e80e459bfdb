//! Extension traits for wire primitives.
use bytes::BufMut;

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// length is usize in rust, while the V2 wire wants i32,
    /// this will panic when overflow instead of wrapping
    fn to_i32(self) -> i32;
}

impl UsizeExt for usize {
    fn to_i32(self) -> i32 {
        self.try_into().expect("message size too large for protocol")
    }
}

pub trait BufMutExt {
    /// postgres String must be nul terminated
    fn put_nul_string(&mut self, string: &str);
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}
