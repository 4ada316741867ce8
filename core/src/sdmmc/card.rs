//! MMC/SD storage device model: the CSR card state machine and the
//! command/ACMD subset the DSi boot and NAND code exercises. The backing
//! store is either the internal eMMC image or a raw SD-card image.

use super::{HostCx, SdHost};
use crate::{nand::NandImage, utils::Savestate};

const SD_CARD_CID: [u8; 16] = [
    0xBD, 0x12, 0x34, 0x56, 0x78, 0x03, 0x4D, 0x30, 0x30, 0x46, 0x50, 0x41, 0x00, 0x00, 0x15, 0x00,
];

const CSD_TEMPLATE: [u8; 16] = [
    0x40, 0x40, 0x96, 0xE9, 0x7F, 0xDB, 0xF6, 0xDF, 0x01, 0x59, 0x0F, 0x2A, 0x01, 0x26, 0x90, 0x00,
];

pub enum Storage {
    Sd {
        contents: Box<[u8]>,
        read_only: bool,
        dirty: bool,
    },
    Nand(NandImage),
}

pub struct MmcCard {
    #[cfg(feature = "log")]
    logger: slog::Logger,
    storage: Storage,

    cid: [u8; 16],
    csd: [u8; 16],

    csr: u32,
    ocr: u32,
    rca: u32,
    scr: [u8; 8],
    ssr: [u8; 64],

    block_size: u32,
    rw_address: u64,
    rw_command: u32,
}

impl MmcCard {
    pub(crate) fn new(storage: Storage, #[cfg(feature = "log")] logger: slog::Logger) -> Self {
        let cid = match &storage {
            Storage::Sd { .. } => SD_CARD_CID,
            Storage::Nand(nand) => *nand.emmc_cid(),
        };
        MmcCard {
            #[cfg(feature = "log")]
            logger,
            storage,
            cid,
            csd: [0; 16],
            csr: 0,
            ocr: 0,
            rca: 0,
            scr: [0; 8],
            ssr: [0; 64],
            block_size: 0,
            rw_address: 0,
            rw_command: 0,
        }
    }

    #[inline]
    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    #[inline]
    pub fn nand(&self) -> Option<&NandImage> {
        match &self.storage {
            Storage::Nand(nand) => Some(nand),
            Storage::Sd { .. } => None,
        }
    }

    #[inline]
    pub fn nand_mut(&mut self) -> Option<&mut NandImage> {
        match &mut self.storage {
            Storage::Nand(nand) => Some(nand),
            Storage::Sd { .. } => None,
        }
    }

    #[inline]
    fn is_nand(&self) -> bool {
        matches!(self.storage, Storage::Nand(_))
    }

    pub(super) fn read_only(&self) -> bool {
        match &self.storage {
            Storage::Sd { read_only, .. } => *read_only,
            Storage::Nand(_) => false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.csr = 0x0000_0100;

        self.ocr = 0x80FF_8000;

        self.csd = CSD_TEMPLATE;

        self.scr = [0; 8];
        self.scr[0..4].copy_from_slice(&0x012A_0000_u32.to_le_bytes());

        self.ssr = [0; 64];

        self.block_size = 0;
        self.rw_address = 0;
        self.rw_command = 0;
    }

    fn set_state(&mut self, state: u32) {
        self.csr = (self.csr & !(0xF << 9)) | (state << 9);
    }

    fn cid_response(&self, host: &mut SdHost, irqs: &mut crate::emu::irqs::Irqs) {
        for offset in [12, 8, 4, 0] {
            let word = u32::from_le_bytes(self.cid[offset..offset + 4].try_into().unwrap());
            host.send_response(word, offset == 0, irqs);
        }
    }

    pub(crate) fn send_cmd(&mut self, host: &mut SdHost, cx: &mut HostCx, cmd: u8, param: u32) {
        if self.csr & (1 << 5) != 0 {
            self.csr &= !(1 << 5);
            return self.send_acmd(host, cx, cmd, param);
        }

        match cmd {
            0 => {
                // GO_IDLE_STATE
                host.send_response(self.csr, true, cx.irqs);
            }

            1 => {
                // SEND_OP_COND, eMMC only
                if self.is_nand() {
                    let param = param & !(1 << 30);
                    self.ocr &= 0xBF00_0000;
                    self.ocr |= param & 0x40FF_FFFF;
                    host.send_response(self.ocr, true, cx.irqs);
                    self.set_state(0x01);
                } else {
                    #[cfg(feature = "log")]
                    slog::debug!(self.logger, "CMD1 on SD card");
                }
            }

            2 | 10 => {
                self.cid_response(host, cx.irqs);
                if cmd == 2 {
                    self.set_state(0x02);
                }
            }

            3 => {
                if self.is_nand() {
                    self.rca = param >> 16;
                    host.send_response(self.csr | 0x10000, true, cx.irqs);
                } else {
                    host.send_response(
                        (self.csr & 0x1FFF)
                            | ((self.csr >> 6) & 0x2000)
                            | ((self.csr >> 8) & 0xC000)
                            | (1 << 16),
                        true,
                        cx.irqs,
                    );
                }
            }

            6 => {
                // MMC SWITCH, accepted as a no-op
                host.send_response(self.csr, true, cx.irqs);
            }

            7 => {
                // SELECT_CARD
                host.send_response(self.csr, true, cx.irqs);
            }

            8 => {
                // SEND_IF_COND
                host.send_response(param, true, cx.irqs);
            }

            9 => {
                for offset in [12, 8, 4, 0] {
                    let word =
                        u32::from_le_bytes(self.csd[offset..offset + 4].try_into().unwrap());
                    host.send_response(word, offset == 0, cx.irqs);
                }
            }

            12 => {
                // STOP_TRANSMISSION
                self.set_state(0x04);
                self.rw_command = 0;
                host.send_response(self.csr, true, cx.irqs);
            }

            13 => {
                host.send_response(self.csr, true, cx.irqs);
            }

            16 => {
                self.block_size = param;
                if self.block_size > 0x200 {
                    #[cfg(feature = "log")]
                    slog::warn!(self.logger, "Bad block length {}", self.block_size);
                    self.block_size = 0x200;
                }
                self.set_state(0x04);
                host.send_response(self.csr, true, cx.irqs);
            }

            17 | 18 => {
                self.rw_address = param as u64;
                if self.ocr & (1 << 30) != 0 {
                    // high-capacity: sector addressing
                    self.rw_address <<= 9;
                    self.block_size = 512;
                }
                if cmd == 18 {
                    self.rw_command = 18;
                }
                host.send_response(self.csr, true, cx.irqs);
                let len = self.read_block(host, cx, self.rw_address);
                self.rw_address += len as u64;
                self.set_state(0x05);
            }

            24 | 25 => {
                self.rw_address = param as u64;
                if self.ocr & (1 << 30) != 0 {
                    self.rw_address <<= 9;
                    self.block_size = 512;
                }
                if cmd == 25 {
                    self.rw_command = 25;
                }
                host.send_response(self.csr, true, cx.irqs);
                let len = self.write_block(host, cx, self.rw_address);
                self.rw_address += len as u64;
                self.set_state(0x04);
            }

            55 => {
                // APP_CMD: the next command is an ACMD
                self.csr |= 1 << 5;
                host.send_response(self.csr, true, cx.irqs);
            }

            _ => {
                #[cfg(feature = "log")]
                slog::warn!(self.logger, "Unknown CMD{} {:#010X}", cmd, param);
            }
        }
    }

    fn send_acmd(&mut self, host: &mut SdHost, cx: &mut HostCx, cmd: u8, param: u32) {
        match cmd {
            6 => {
                // SET_BUS_WIDTH
                host.send_response(self.csr, true, cx.irqs);
            }

            13 => {
                host.send_response(self.csr, true, cx.irqs);
                let ssr = self.ssr;
                host.data_rx(&ssr, cx);
            }

            41 => {
                // SD_SEND_OP_COND; the high-capacity bit is not settable on
                // the eMMC
                let param = if self.is_nand() {
                    param & !(1 << 30)
                } else {
                    param
                };
                self.ocr &= 0xBF00_0000;
                self.ocr |= param & 0x40FF_FFFF;
                host.send_response(self.ocr, true, cx.irqs);
                self.set_state(0x01);
            }

            42 => {
                host.send_response(self.csr, true, cx.irqs);
            }

            51 => {
                host.send_response(self.csr, true, cx.irqs);
                let scr = self.scr;
                host.data_rx(&scr, cx);
            }

            _ => {
                #[cfg(feature = "log")]
                slog::warn!(self.logger, "Unknown ACMD{} {:#010X}", cmd, param);
            }
        }
    }

    pub(crate) fn continue_transfer(&mut self, host: &mut SdHost, cx: &mut HostCx) {
        let len = match self.rw_command {
            18 => self.read_block(host, cx, self.rw_address),
            25 => self.write_block(host, cx, self.rw_address),
            _ => return,
        };
        self.rw_address += len as u64;
    }

    fn read_block(&mut self, host: &mut SdHost, cx: &mut HostCx, addr: u64) -> u32 {
        let len = host.get_transferrable_len(self.block_size);

        let mut data = [0; 0x200];
        let offset = (addr & 0x1FF) as usize;
        match &self.storage {
            Storage::Sd { contents, .. } => {
                let sector = (addr >> 9 << 9) as usize;
                let end = (sector + 0x200).min(contents.len());
                if sector < end {
                    data[..end - sector].copy_from_slice(&contents[sector..end]);
                }
            }
            Storage::Nand(nand) => {
                let mut chunk = vec![0; len as usize];
                nand.read_raw(addr, &mut chunk);
                data[offset..offset + len as usize].copy_from_slice(&chunk);
            }
        }

        host.data_rx(&data[offset..offset + len as usize], cx)
    }

    fn write_block(&mut self, host: &mut SdHost, cx: &mut HostCx, addr: u64) -> u32 {
        let len = host.get_transferrable_len(self.block_size);

        let mut data = [0; 0x200];
        let offset = (addr & 0x1FF) as usize;
        if len < 0x200 {
            // partial block: merge into the existing sector contents
            if let Storage::Sd { contents, .. } = &self.storage {
                let sector = (addr >> 9 << 9) as usize;
                let end = (sector + 0x200).min(contents.len());
                if sector < end {
                    data[..end - sector].copy_from_slice(&contents[sector..end]);
                }
            }
        }

        let len = host.data_tx(&mut data[offset..], len as usize, cx);
        if len != 0 && !self.read_only() {
            match &mut self.storage {
                Storage::Sd {
                    contents, dirty, ..
                } => {
                    let sector = (addr >> 9 << 9) as usize;
                    let end = (sector + 0x200).min(contents.len());
                    if sector < end {
                        contents[sector..end].copy_from_slice(&data[..end - sector]);
                        *dirty = true;
                    }
                }
                Storage::Nand(nand) => {
                    nand.write_raw(addr, &data[offset..offset + len as usize]);
                }
            }
        }

        len
    }

    pub(crate) fn do_savestate(&mut self, file: &mut Savestate) {
        file.section(if self.is_nand() { *b"NAND" } else { *b"SDCR" });

        if let Storage::Nand(nand) = &mut self.storage {
            nand.do_savestate(file);
        }

        file.bytes(&mut self.cid);
        file.bytes(&mut self.csd);

        file.var_u32(&mut self.csr);
        file.var_u32(&mut self.ocr);
        file.var_u32(&mut self.rca);
        file.bytes(&mut self.scr);
        file.bytes(&mut self.ssr);

        file.var_u32(&mut self.block_size);
        file.var_u64(&mut self.rw_address);
        file.var_u32(&mut self.rw_command);
    }
}
