//! Fixed-width record capability.

/// A value with a fixed serialized width that can be stored in a run file.
///
/// Records are written back to back without any framing, so a file holding
/// `n` records is exactly `n * WIDTH` bytes long.
pub trait Record: Copy + Send + Sync + 'static {
    /// Serialized width in bytes. Must be non-zero.
    const WIDTH: usize;

    /// Writes the record into `buf`, which is exactly `WIDTH` bytes long.
    fn encode(&self, buf: &mut [u8]);

    /// Reads a record from `buf`, which is exactly `WIDTH` bytes long.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_int_record {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Record for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_le_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(buf);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

// integers are stored little-endian
impl_int_record!(i8, i16, i32, i64, i128, u8, u16, u32, u64, u128);

/// Opaque byte keys compared lexicographically.
impl<const N: usize> Record for [u8; N] {
    const WIDTH: usize = N;

    fn encode(&self, buf: &mut [u8]) {
        buf.copy_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut raw = [0u8; N];
        raw.copy_from_slice(buf);
        raw
    }
}

/// Encodes `records` back to back into `out`, replacing its contents.
pub(crate) fn encode_all<T: Record>(records: &[T], out: &mut Vec<u8>) {
    out.clear();
    out.resize(records.len() * T::WIDTH, 0);
    for (record, slot) in records.iter().zip(out.chunks_exact_mut(T::WIDTH)) {
        record.encode(slot);
    }
}
