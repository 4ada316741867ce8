//! The DSi AES engine: a block pipeline fed and drained through I/O-mapped
//! FIFOs, supporting AES-CCM encrypt/decrypt (with inline CBC-MAC) and
//! AES-CTR, with NDMA coupling on both sides and the console key-slot file.

use crate::{
    crypto::{self, AesCtx},
    emu::{irqs::irq2, Emu},
    ndma,
    utils::{Fifo, Savestate},
};

fn read_u32(bytes: &[u8; 16], offset: usize) -> u32 {
    u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
}

fn write_u32(bytes: &mut [u8; 16], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_masked(bytes: &mut [u8; 16], offset: usize, value: u32, mask: u32) {
    let old = read_u32(bytes, offset);
    write_u32(bytes, offset, (old & !mask) | (value & mask));
}

pub struct Aes {
    pub cnt: u32,
    blk_cnt: u32,
    rem_extra: u32,
    rem_blocks: u32,

    output_flush: bool,

    input_dma_size: u32,
    output_dma_size: u32,
    mode: u32,

    input_fifo: Fifo<u32, 16>,
    output_fifo: Fifo<u32, 16>,

    iv: [u8; 16],
    mac: [u8; 16],

    key_normal: [[u8; 16]; 4],
    key_x: [[u8; 16]; 4],
    key_y: [[u8; 16]; 4],

    cur_key: [u8; 16],
    cur_mac: [u8; 16],

    // pending MAC words for CCM-encrypt when the output FIFO was full
    output_mac: [u8; 16],
    output_mac_due: bool,

    ctx: AesCtx,
}

impl Aes {
    pub(crate) fn new() -> Self {
        Aes {
            cnt: 0,
            blk_cnt: 0,
            rem_extra: 0,
            rem_blocks: 0,
            output_flush: false,
            input_dma_size: 0,
            output_dma_size: 0,
            mode: 0,
            input_fifo: Fifo::new(),
            output_fifo: Fifo::new(),
            iv: [0; 16],
            mac: [0; 16],
            key_normal: [[0; 16]; 4],
            key_x: [[0; 16]; 4],
            key_y: [[0; 16]; 4],
            cur_key: [0; 16],
            cur_mac: [0; 16],
            output_mac: [0; 16],
            output_mac_due: false,
            ctx: AesCtx::zeroed(),
        }
    }

    pub(crate) fn reset(&mut self, console_id: u64) {
        self.cnt = 0;
        self.blk_cnt = 0;
        self.rem_extra = 0;
        self.rem_blocks = 0;
        self.output_flush = false;
        self.input_dma_size = 0;
        self.output_dma_size = 0;
        self.mode = 0;
        self.input_fifo.clear();
        self.output_fifo.clear();
        self.iv = [0; 16];
        self.mac = [0; 16];
        self.key_normal = [[0; 16]; 4];
        self.key_x = [[0; 16]; 4];
        self.key_y = [[0; 16]; 4];
        self.cur_key = [0; 16];
        self.cur_mac = [0; 16];
        self.output_mac = [0; 16];
        self.output_mac_due = false;
        self.ctx = AesCtx::zeroed();

        // slot 0: modcrypt ("Nintendo")
        write_u32(&mut self.key_x[0], 0x0, 0x746E_694E);
        write_u32(&mut self.key_x[0], 0x4, 0x6F64_6E65);

        // slot 1: 'Tad'/dev.kp
        write_u32(&mut self.key_x[1], 0x0, 0x4E00_004A);
        write_u32(&mut self.key_x[1], 0x4, 0x4A00_004E);
        write_u32(&mut self.key_x[1], 0x8, (console_id >> 32) as u32 ^ 0xC80C_4B72);
        write_u32(&mut self.key_x[1], 0xC, console_id as u32);

        // slot 3: console-unique eMMC crypto
        write_u32(&mut self.key_x[3], 0x0, console_id as u32);
        write_u32(&mut self.key_x[3], 0x4, console_id as u32 ^ 0x24EE_6906);
        write_u32(&mut self.key_x[3], 0x8, (console_id >> 32) as u32 ^ 0xE65B_601D);
        write_u32(&mut self.key_x[3], 0xC, (console_id >> 32) as u32);
        write_u32(&mut self.key_y[3], 0x0, 0x0AB9_DC76);
        write_u32(&mut self.key_y[3], 0x4, 0xBD4D_C4D3);
        write_u32(&mut self.key_y[3], 0x8, 0x202D_DD1D);
    }

    pub fn read_cnt(&self) -> u32 {
        self.cnt | self.input_fifo.level() as u32 | ((self.output_fifo.level() as u32) << 5)
    }

    #[inline]
    pub fn busy(&self) -> bool {
        self.cnt & (1 << 31) != 0
    }

    fn read_input_block(&mut self) -> [u8; 16] {
        let mut data = [0; 16];
        for i in 0..4 {
            write_u32(&mut data, i * 4, self.input_fifo.read().unwrap_or(0));
        }
        data
    }

    fn write_output_block(&mut self, data: &[u8; 16]) {
        for i in 0..4 {
            self.output_fifo.write(read_u32(data, i * 4));
        }
    }

    fn process_block_ccm_extra(&mut self) {
        let data_rev = crypto::swap_128(self.read_input_block());
        for i in 0..16 {
            self.cur_mac[i] ^= data_rev[i];
        }
        let mut mac = self.cur_mac;
        self.ctx.ecb_encrypt(&mut mac);
        self.cur_mac = mac;
    }

    fn process_block_ccm_decrypt(&mut self) {
        let mut data_rev = crypto::swap_128(self.read_input_block());
        self.ctx.ctr_xcrypt(&mut data_rev);
        for i in 0..16 {
            self.cur_mac[i] ^= data_rev[i];
        }
        let mut mac = self.cur_mac;
        self.ctx.ecb_encrypt(&mut mac);
        self.cur_mac = mac;
        self.write_output_block(&crypto::swap_128(data_rev));
    }

    fn process_block_ccm_encrypt(&mut self) {
        let mut data_rev = crypto::swap_128(self.read_input_block());
        for i in 0..16 {
            self.cur_mac[i] ^= data_rev[i];
        }
        self.ctx.ctr_xcrypt(&mut data_rev);
        let mut mac = self.cur_mac;
        self.ctx.ecb_encrypt(&mut mac);
        self.cur_mac = mac;
        self.write_output_block(&crypto::swap_128(data_rev));
    }

    fn process_block_ctr(&mut self) {
        let mut data_rev = crypto::swap_128(self.read_input_block());
        self.ctx.ctr_xcrypt(&mut data_rev);
        self.write_output_block(&crypto::swap_128(data_rev));
    }

    pub fn write_key_normal(&mut self, slot: usize, offset: usize, value: u32, mask: u32) {
        write_masked(&mut self.key_normal[slot], offset, value, mask);
    }

    pub fn write_key_x(&mut self, slot: usize, offset: usize, value: u32, mask: u32) {
        write_masked(&mut self.key_x[slot], offset, value, mask);
    }

    /// Completing a slot's keyY (a write touching its last word) latches the
    /// derived normal key for that slot.
    pub fn write_key_y(&mut self, slot: usize, offset: usize, value: u32, mask: u32) {
        write_masked(&mut self.key_y[slot], offset, value, mask);
        if offset >= 0xC {
            self.key_normal[slot] =
                crypto::derive_normal_key(&self.key_x[slot], &self.key_y[slot]);
        }
    }

    pub fn write_iv(&mut self, offset: usize, value: u32, mask: u32) {
        write_masked(&mut self.iv, offset, value, mask);
    }

    pub fn write_mac(&mut self, offset: usize, value: u32, mask: u32) {
        write_masked(&mut self.mac, offset, value, mask);
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        file.section(*b"AESi");

        file.var_u32(&mut self.cnt);
        file.var_u32(&mut self.blk_cnt);
        file.var_u32(&mut self.rem_extra);
        file.var_u32(&mut self.rem_blocks);
        file.var_bool32(&mut self.output_flush);
        file.var_u32(&mut self.input_dma_size);
        file.var_u32(&mut self.output_dma_size);
        file.var_u32(&mut self.mode);

        self.input_fifo.do_savestate(file);
        self.output_fifo.do_savestate(file);

        file.bytes(&mut self.iv);
        file.bytes(&mut self.mac);
        for slot in 0..4 {
            file.bytes(&mut self.key_normal[slot]);
        }
        for slot in 0..4 {
            file.bytes(&mut self.key_x[slot]);
        }
        for slot in 0..4 {
            file.bytes(&mut self.key_y[slot]);
        }
        file.bytes(&mut self.cur_key);
        file.bytes(&mut self.cur_mac);
        file.bytes(&mut self.output_mac);
        file.var_bool32(&mut self.output_mac_due);

        self.ctx.do_savestate(file);
    }
}

pub fn write_blk_cnt(emu: &mut Emu, value: u32) {
    emu.aes.blk_cnt = value;
}

pub fn write_cnt(emu: &mut Emu, value: u32) {
    let started;
    {
        let aes = &mut emu.aes;
        let old_cnt = aes.cnt;
        aes.cnt = value & 0xFC1F_F000;

        const DMA_SIZE_IN: [u32; 4] = [0, 4, 8, 12];
        const DMA_SIZE_OUT: [u32; 4] = [4, 8, 12, 16];
        aes.input_dma_size = DMA_SIZE_IN[(value >> 12) as usize & 0x3];
        aes.output_dma_size = DMA_SIZE_OUT[(value >> 14) as usize & 0x3];

        aes.mode = (value >> 28) & 0x3;

        if value & (1 << 24) != 0 {
            let slot = (value >> 26) as usize & 0x3;
            aes.cur_key = aes.key_normal[slot];
        }

        started = old_cnt & (1 << 31) == 0 && value & (1 << 31) != 0;
        if started {
            aes.rem_extra = if aes.mode < 2 { aes.blk_cnt & 0xFFFF } else { 0 };
            aes.rem_blocks = aes.blk_cnt >> 16;

            aes.output_mac_due = false;

            #[cfg(feature = "log")]
            if aes.mode == 0 && value & (1 << 20) == 0 {
                slog::debug!(emu.logger, "AES: CCM-decrypt MAC from write FIFO, treated as externally loaded");
            }

            if aes.rem_blocks > 0 || aes.rem_extra > 0 {
                let key = crypto::swap_128(aes.cur_key);
                let mut iv = crypto::swap_128(aes.iv);

                if aes.mode < 2 {
                    let mac_len = ((value >> 16) & 0x7).max(1);

                    // counter block: flags 0x02, the 12-byte nonce, counter 1
                    iv[0] = 0x02;
                    for i in 0..12 {
                        iv[1 + i] = iv[4 + i];
                    }
                    iv[13] = 0x00;
                    iv[14] = 0x00;
                    iv[15] = 0x01;

                    aes.ctx.rekey(&key, &iv);

                    // B0 block: flags gain the MAC length and header-present
                    // bit, counter bytes hold the payload length
                    iv[0] |= (mac_len << 3) as u8
                        | if aes.blk_cnt & 0xFFFF != 0 { 1 << 6 } else { 0 };
                    iv[13] = (aes.rem_blocks >> 12) as u8;
                    iv[14] = (aes.rem_blocks >> 4) as u8;
                    iv[15] = (aes.rem_blocks << 4) as u8;

                    aes.cur_mac = iv;
                    let mut mac = aes.cur_mac;
                    aes.ctx.ecb_encrypt(&mut mac);
                    aes.cur_mac = mac;
                } else {
                    aes.ctx.rekey(&key, &iv);
                }
            } else {
                // no blocks to process, mark the job finished right away
                aes.cnt &= !(1 << 31);
            }
        }
    }

    if started && (emu.aes.rem_blocks > 0 || emu.aes.rem_extra > 0) {
        emu.ndma.check(1, ndma::MODE_AES_IN);
    }
}

pub fn read_output_fifo(emu: &mut Emu) -> u32 {
    #[cfg(feature = "log")]
    if emu.aes.output_fifo.is_empty() {
        slog::warn!(emu.logger, "AES: output FIFO read while empty");
    }

    let result = emu.aes.output_fifo.read().unwrap_or(0);

    if emu.aes.busy() {
        check_input_dma(emu);
        check_output_dma(emu);
    } else {
        if emu.aes.output_fifo.level() > 0 {
            emu.ndma.check(1, ndma::MODE_AES_OUT);
        } else {
            emu.ndma.stop(1, ndma::MODE_AES_OUT);
        }

        if emu.aes.output_mac_due && emu.aes.output_fifo.level() <= 12 {
            let aes = &mut emu.aes;
            let mac = aes.output_mac;
            aes.write_output_block(&mac);
            aes.output_mac_due = false;
        }
    }

    result
}

pub fn write_input_fifo(emu: &mut Emu, value: u32) {
    #[cfg(feature = "log")]
    if emu.aes.input_fifo.is_full() {
        slog::warn!(emu.logger, "AES: input FIFO write while full");
    }

    emu.aes.input_fifo.write(value);

    if !emu.aes.busy() {
        return;
    }

    update(emu);
}

pub fn check_input_dma(emu: &mut Emu) {
    if emu.aes.rem_blocks == 0 && emu.aes.rem_extra == 0 {
        return;
    }

    if emu.aes.input_fifo.level() as u32 <= emu.aes.input_dma_size {
        emu.ndma.check(1, ndma::MODE_AES_IN);
    }

    update(emu);
}

pub fn check_output_dma(emu: &mut Emu) {
    if emu.aes.output_fifo.level() as u32 >= emu.aes.output_dma_size {
        emu.ndma.check(1, ndma::MODE_AES_OUT);
    }
}

pub(crate) fn update(emu: &mut Emu) {
    {
        let aes = &mut emu.aes;

        while aes.rem_extra > 0 && aes.input_fifo.level() >= 4 {
            aes.process_block_ccm_extra();
            aes.rem_extra -= 1;
        }

        if aes.rem_extra == 0 {
            while aes.rem_blocks > 0
                && aes.input_fifo.level() >= 4
                && aes.output_fifo.level() <= 12
            {
                match aes.mode {
                    0 => aes.process_block_ccm_decrypt(),
                    1 => aes.process_block_ccm_encrypt(),
                    _ => aes.process_block_ctr(),
                }
                aes.rem_blocks -= 1;
            }
        }
    }

    check_output_dma(emu);

    if emu.aes.rem_blocks != 0 || emu.aes.rem_extra != 0 {
        return;
    }
    if !emu.aes.busy() {
        return;
    }

    let fire_irq;
    {
        let aes = &mut emu.aes;
        match aes.mode {
            0 => {
                // final MAC: redo the last counter block with a zero counter
                aes.ctx.iv[13] = 0x00;
                aes.ctx.iv[14] = 0x00;
                aes.ctx.iv[15] = 0x00;
                let mut mac = aes.cur_mac;
                aes.ctx.ctr_xcrypt(&mut mac);
                aes.cur_mac = mac;

                aes.cnt |= 1 << 21;
                for i in 0..16 {
                    if aes.cur_mac[15 - i] != aes.mac[i] {
                        aes.cnt &= !(1 << 21);
                    }
                }
            }
            1 => {
                aes.ctx.iv[13] = 0x00;
                aes.ctx.iv[14] = 0x00;
                aes.ctx.iv[15] = 0x00;
                let mut mac = aes.cur_mac;
                aes.ctx.ctr_xcrypt(&mut mac);
                aes.cur_mac = mac;

                aes.output_mac = crypto::swap_128(aes.cur_mac);
                if aes.output_fifo.level() <= 12 {
                    let mac = aes.output_mac;
                    aes.write_output_block(&mac);
                } else {
                    aes.output_mac_due = true;
                }

                aes.cnt &= !(1 << 21);
            }
            _ => {
                aes.cnt &= !(1 << 21);
            }
        }

        aes.cnt &= !(1 << 31);
        fire_irq = aes.cnt & (1 << 30) != 0;
        aes.output_flush = false;
    }

    if fire_irq {
        emu.arm7_irqs.set_irq2(irq2::AES);
    }
    emu.ndma.stop(1, ndma::MODE_AES_IN);

    if !emu.aes.output_fifo.is_empty() {
        emu.ndma.check(1, ndma::MODE_AES_OUT);
    } else {
        emu.ndma.stop(1, ndma::MODE_AES_OUT);
    }
}
