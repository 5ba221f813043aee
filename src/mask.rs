/// Masks or unmasks a payload in place.
///
/// Client frames arrive XOR-masked with a 4 byte key: every payload byte is
/// XORed with the key byte at its position modulo 4. Applying the same key
/// twice restores the original bytes, so a single routine serves both
/// directions.
#[inline]
pub fn apply_mask(buf: &mut [u8], mask: [u8; 4]) {
    for (i, byte) in buf.iter_mut().enumerate() {
        *byte ^= mask[i & 3];
    }
}
