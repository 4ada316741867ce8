//! Host crypto primitives shared by the AES engine, the NAND crypto layer and
//! modcrypt: an AES-128 context exposing ECB block encryption and a CTR
//! keystream whose counter stays reachable (the engine rewrites counter bytes
//! mid-stream during MAC finalization), plus the console key-derivation
//! function.

use crate::utils::Savestate;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

/// Scrambler constant for the keyX/keyY to normal-key derivation.
const KEY_CONST: [u8; 16] = [
    0xFF, 0xFE, 0xFB, 0x4E, 0x29, 0x59, 0x02, 0x58, 0x2A, 0x68, 0x0F, 0x5F, 0x1A, 0x4F, 0x3E, 0x79,
];

/// Reverses a 16-byte block. All engine-visible key/IV/data words are
/// big-endian on the wire; this converts to and from the byte order the block
/// cipher operates in.
#[inline]
pub fn swap_128(value: [u8; 16]) -> [u8; 16] {
    let mut result = [0; 16];
    for i in 0..16 {
        result[i] = value[15 - i];
    }
    result
}

pub fn rol_128(value: &mut [u8; 16], n: u32) {
    let n_coarse = (n >> 3) as usize;
    let n_fine = n & 7;
    let mut tmp = [0; 16];
    for i in 0..16 {
        tmp[i] = value[(i.wrapping_sub(n_coarse)) & 0xF];
    }
    if n_fine == 0 {
        *value = tmp;
        return;
    }
    for i in 0..16 {
        value[i] = (tmp[i] << n_fine) | (tmp[(i.wrapping_sub(1)) & 0xF] >> (8 - n_fine));
    }
}

/// F(X, Y) = ROL((X ^ Y) + C, 42), with the constant added as a 128-bit
/// little-endian integer against the byte-reversed constant table.
pub fn derive_normal_key(key_x: &[u8; 16], key_y: &[u8; 16]) -> [u8; 16] {
    let mut tmp = [0; 16];
    for i in 0..16 {
        tmp[i] = key_x[i] ^ key_y[i];
    }
    let mut carry = 0u32;
    for i in 0..16 {
        let res = tmp[i] as u32 + KEY_CONST[15 - i] as u32 + carry;
        tmp[i] = res as u8;
        carry = res >> 8;
    }
    rol_128(&mut tmp, 42);
    tmp
}

/// AES-128 context with an in-band CTR counter.
pub struct AesCtx {
    cipher: Aes128,
    key: [u8; 16],
    pub iv: [u8; 16],
}

impl AesCtx {
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        AesCtx {
            cipher: Aes128::new(GenericArray::from_slice(key)),
            key: *key,
            iv: *iv,
        }
    }

    pub fn zeroed() -> Self {
        Self::new(&[0; 16], &[0; 16])
    }

    pub fn rekey(&mut self, key: &[u8; 16], iv: &[u8; 16]) {
        self.cipher = Aes128::new(GenericArray::from_slice(key));
        self.key = *key;
        self.iv = *iv;
    }

    #[inline]
    pub fn set_iv(&mut self, iv: &[u8; 16]) {
        self.iv = *iv;
    }

    pub fn ecb_encrypt(&self, block: &mut [u8; 16]) {
        let mut data = GenericArray::clone_from_slice(block);
        self.cipher.encrypt_block(&mut data);
        block.copy_from_slice(&data);
    }

    fn increment_counter(&mut self) {
        for i in (0..16).rev() {
            self.iv[i] = self.iv[i].wrapping_add(1);
            if self.iv[i] != 0 {
                break;
            }
        }
    }

    /// En/decrypts `buf` in place with the CTR keystream. The length must be
    /// a multiple of 16; the counter advances once per block.
    pub fn ctr_xcrypt(&mut self, buf: &mut [u8]) {
        debug_assert!(buf.len() % 16 == 0);
        for block in buf.chunks_exact_mut(16) {
            let mut keystream = self.iv;
            self.ecb_encrypt(&mut keystream);
            for (b, k) in block.iter_mut().zip(keystream.iter()) {
                *b ^= k;
            }
            self.increment_counter();
        }
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        let mut key = self.key;
        file.bytes(&mut key);
        file.bytes(&mut self.iv);
        if !file.saving() {
            let iv = self.iv;
            self.rekey(&key, &iv);
        }
    }
}

pub fn sha1(data: &[u8]) -> [u8; 20] {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ecb_matches_fips_197_vector() {
        let key = [
            0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D,
            0x0E, 0x0F,
        ];
        let ctx = AesCtx::new(&key, &[0; 16]);
        let mut block = [
            0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD,
            0xEE, 0xFF,
        ];
        ctx.ecb_encrypt(&mut block);
        assert_eq!(
            block,
            [
                0x69, 0xC4, 0xE0, 0xD8, 0x6A, 0x7B, 0x04, 0x30, 0xD8, 0xCD, 0xB7, 0x80, 0x70,
                0xB4, 0xC5, 0x5A
            ]
        );
    }

    #[test]
    fn ctr_is_self_inverse() {
        let key = [0x5A; 16];
        let iv = [0x13; 16];
        let mut data = [0u8; 64];
        for (i, b) in data.iter_mut().enumerate() {
            *b = i as u8;
        }
        let original = data;
        AesCtx::new(&key, &iv).ctr_xcrypt(&mut data);
        assert_ne!(data, original);
        AesCtx::new(&key, &iv).ctr_xcrypt(&mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn ctr_counter_carries_across_byte_boundaries() {
        let key = [1; 16];
        let mut iv = [0; 16];
        iv[15] = 0xFF;
        let mut ctx = AesCtx::new(&key, &iv);
        let mut data = [0; 32];
        ctx.ctr_xcrypt(&mut data);
        assert_eq!(ctx.iv[14], 1);
        assert_eq!(ctx.iv[15], 1);
    }

    #[test]
    fn rol_128_by_whole_and_partial_bytes() {
        let mut value = [0; 16];
        value[0] = 0x80;
        rol_128(&mut value, 1);
        assert_eq!(value[1], 0x01);
        // 42 = 5 bytes + 2 bits
        let mut value = [0; 16];
        value[0] = 0x01;
        rol_128(&mut value, 42);
        assert_eq!(value[5], 0x04);
    }
}
