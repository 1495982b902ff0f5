//! Fixed-width key and value encoding.

/// A plain-copy value with a fixed on-page width.
///
/// Keys and values are stored inline in node pages, so every type used with
/// the tree must encode to exactly `WIDTH` bytes. Keys additionally need
/// `Ord`; its ordering is the comparator the tree is sorted under.
pub trait Datum: Copy + Send + Sync + 'static {
    /// Encoded size in bytes.
    const WIDTH: usize;

    /// Writes the encoding into `buf[..WIDTH]`.
    fn encode(&self, buf: &mut [u8]);

    /// Reads a value back from `buf[..WIDTH]`.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_int_datum {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Datum for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn encode(&self, buf: &mut [u8]) {
                    buf[..Self::WIDTH].copy_from_slice(&self.to_le_bytes());
                }

                #[inline]
                fn decode(buf: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(&buf[..Self::WIDTH]);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_int_datum!(i32, u32, i64, u64);
