//! Cartridge image container and header access.
//!
//! The cartridge protocol engine lives in the base console; the DSi overlay
//! only needs the parsed image for direct boot: entry points, load regions,
//! the MBK mapping blob, and the modcrypt key material.

use crate::crypto;

pub const HEADER_SIZE: usize = 0x1000;

bitflags::bitflags! {
    /// DSi crypto flag byte of the cart header.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct CryptoFlags: u8 {
        const HAS_DSI_REGIONS = 1 << 0;
        const MODCRYPTED = 1 << 1;
        const MODCRYPT_DEV_KEY = 1 << 4;
    }
}

bitflags::bitflags! {
    /// DSi application flag byte of the cart header.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct AppFlags: u8 {
        const TSC_DSI_MODE = 1 << 0;
        const BANNER_SAV = 1 << 2;
        const DEV_KEY = 1 << 7;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    TooSmall,
}

pub struct Cart {
    rom: Box<[u8]>,
    chip_id: u32,
}

impl Cart {
    pub fn new(rom: Box<[u8]>) -> Result<Self, Error> {
        if rom.len() < HEADER_SIZE {
            return Err(Error::TooSmall);
        }
        let size_field = ((rom.len() as u32) >> 20).max(1) - 1;
        let chip_id = 0xC2 | (size_field << 8);
        Ok(Cart { rom, chip_id })
    }

    #[inline]
    pub fn rom(&self) -> &[u8] {
        &self.rom
    }

    #[inline]
    pub fn rom_mut(&mut self) -> &mut [u8] {
        &mut self.rom
    }

    #[inline]
    pub fn chip_id(&self) -> u32 {
        self.chip_id
    }

    fn read_u16(&self, addr: usize) -> u16 {
        u16::from_le_bytes(self.rom[addr..addr + 2].try_into().unwrap())
    }

    fn read_u32(&self, addr: usize) -> u32 {
        u32::from_le_bytes(self.rom[addr..addr + 4].try_into().unwrap())
    }

    pub fn game_code(&self) -> [u8; 4] {
        self.rom[0x00C..0x010].try_into().unwrap()
    }

    #[inline]
    pub fn unit_code(&self) -> u8 {
        self.rom[0x015]
    }

    #[inline]
    pub fn is_dsi(&self) -> bool {
        self.unit_code() & 0x02 != 0
    }

    pub fn arm9_rom_offset(&self) -> u32 {
        self.read_u32(0x020)
    }

    pub fn arm9_entry_addr(&self) -> u32 {
        self.read_u32(0x024)
    }

    pub fn arm9_ram_addr(&self) -> u32 {
        self.read_u32(0x028)
    }

    pub fn arm9_size(&self) -> u32 {
        self.read_u32(0x02C)
    }

    pub fn arm7_rom_offset(&self) -> u32 {
        self.read_u32(0x030)
    }

    pub fn arm7_entry_addr(&self) -> u32 {
        self.read_u32(0x034)
    }

    pub fn arm7_ram_addr(&self) -> u32 {
        self.read_u32(0x038)
    }

    pub fn arm7_size(&self) -> u32 {
        self.read_u32(0x03C)
    }

    pub fn secure_area_crc(&self) -> u16 {
        self.read_u16(0x06C)
    }

    pub fn header_crc(&self) -> u16 {
        self.read_u16(0x15E)
    }

    pub fn mbk_blob(&self) -> [u32; 12] {
        let mut result = [0; 12];
        for (i, value) in result.iter_mut().enumerate() {
            *value = self.read_u32(0x180 + i * 4);
        }
        result
    }

    pub fn arm9i_hash(&self) -> [u8; 16] {
        self.rom[0x1C0..0x1D0].try_into().unwrap()
    }

    pub fn arm7i_hash(&self) -> [u8; 16] {
        self.rom[0x1D0..0x1E0].try_into().unwrap()
    }

    pub fn crypto_flags(&self) -> CryptoFlags {
        CryptoFlags::from_bits_truncate(self.rom[0x1E0])
    }

    pub fn app_flags(&self) -> AppFlags {
        AppFlags::from_bits_truncate(self.rom[0x1EF])
    }

    pub fn arm9i_rom_offset(&self) -> u32 {
        self.read_u32(0x1F0)
    }

    pub fn arm9i_ram_addr(&self) -> u32 {
        self.read_u32(0x1F4)
    }

    pub fn arm9i_size(&self) -> u32 {
        self.read_u32(0x1F8)
    }

    pub fn arm7i_rom_offset(&self) -> u32 {
        self.read_u32(0x1FC)
    }

    pub fn arm7i_ram_addr(&self) -> u32 {
        self.read_u32(0x200)
    }

    pub fn arm7i_size(&self) -> u32 {
        self.read_u32(0x204)
    }

    pub fn modcrypt_offset(&self, area: usize) -> u32 {
        self.read_u32(0x208 + area * 8)
    }

    pub fn modcrypt_size(&self, area: usize) -> u32 {
        self.read_u32(0x20C + area * 8)
    }

    /// The per-title modcrypt key: either the first 16 header bytes (dev
    /// titles) or a normal key derived from the game code and the ARM9i hash.
    pub fn modcrypt_key(&self) -> [u8; 16] {
        if self
            .crypto_flags()
            .contains(CryptoFlags::MODCRYPT_DEV_KEY)
            || self.app_flags().contains(AppFlags::DEV_KEY)
        {
            self.rom[0..16].try_into().unwrap()
        } else {
            let game_code = self.game_code();
            let mut key_x = [0; 16];
            key_x[0..4].copy_from_slice(&0x746E_694E_u32.to_le_bytes());
            key_x[4..8].copy_from_slice(&0x6F64_6E65_u32.to_le_bytes());
            key_x[8] = game_code[0];
            key_x[9] = game_code[1];
            key_x[10] = game_code[2];
            key_x[11] = game_code[3];
            key_x[12] = game_code[3];
            key_x[13] = game_code[2];
            key_x[14] = game_code[1];
            key_x[15] = game_code[0];
            crypto::derive_normal_key(&key_x, &self.arm9i_hash())
        }
    }

    /// Whether the secure area (if any) has already been decrypted in the
    /// image. The base console's KEY1 engine handles encrypted secure areas;
    /// this core only loads images whose secure area is plaintext.
    pub fn secure_area_decrypted(&self) -> bool {
        let arm9_offset = self.arm9_rom_offset() as usize;
        if !(0x4000..0x8000).contains(&arm9_offset) || self.rom.len() < arm9_offset + 8 {
            return true;
        }
        &self.rom[arm9_offset..arm9_offset + 8] == b"encryObj"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cart_with(edit: impl FnOnce(&mut [u8])) -> Cart {
        let mut rom = vec![0; 0x10000].into_boxed_slice();
        edit(&mut rom);
        Cart::new(rom).unwrap()
    }

    #[test]
    fn header_fields_decode_little_endian() {
        let cart = cart_with(|rom| {
            rom[0x020..0x024].copy_from_slice(&0x0000_4000_u32.to_le_bytes());
            rom[0x024..0x028].copy_from_slice(&0x0200_0800_u32.to_le_bytes());
            rom[0x015] = 0x03;
        });
        assert_eq!(cart.arm9_rom_offset(), 0x4000);
        assert_eq!(cart.arm9_entry_addr(), 0x0200_0800);
        assert!(cart.is_dsi());
    }

    #[test]
    fn modcrypt_key_uses_game_code_by_default() {
        let cart = cart_with(|rom| {
            rom[0x00C..0x010].copy_from_slice(b"ABCD");
            rom[0x1C0..0x1D0].copy_from_slice(&[0x11; 16]);
        });
        let mut key_x = [0; 16];
        key_x[0..4].copy_from_slice(&0x746E_694E_u32.to_le_bytes());
        key_x[4..8].copy_from_slice(&0x6F64_6E65_u32.to_le_bytes());
        key_x[8..12].copy_from_slice(b"ABCD");
        key_x[12..16].copy_from_slice(b"DCBA");
        assert_eq!(
            cart.modcrypt_key(),
            crypto::derive_normal_key(&key_x, &[0x11; 16])
        );
    }

    #[test]
    fn modcrypt_key_uses_header_bytes_for_dev_titles() {
        let cart = cart_with(|rom| {
            rom[0..16].copy_from_slice(&[0xAB; 16]);
            rom[0x1E0] = CryptoFlags::MODCRYPT_DEV_KEY.bits();
        });
        assert_eq!(cart.modcrypt_key(), [0xAB; 16]);
    }
}
