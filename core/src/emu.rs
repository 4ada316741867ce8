pub mod irqs;
pub mod jit;
pub mod nwram;
pub mod scfg;
pub mod schedule;

use crate::{
    aes::Aes,
    bus, camera,
    camera::CamModule,
    crypto::{self, AesCtx},
    ds_slot::{self, AppFlags, Cart, CryptoFlags},
    gpio::Gpio,
    i2c::{self, I2c},
    nand::{self, NandImage, NandMount},
    ndma::{self, Ndma},
    sdmmc::{self, card, Port, SdHost},
    spi,
    utils::{zeroed_box, Bytes, Savestate},
    wifi::{self, LanBackend, NWifi, WifiBoard},
};
use irqs::Irqs;
use nwram::Nwram;
use scfg::Scfg;
use schedule::{Event, Schedule};

pub const MAIN_MEM_SIZE: usize = 0x100_0000;
pub const BIOS_SIZE: usize = 0x1_0000;

/// ARM7 cycles per frame.
pub const FRAME_CYCLES: u64 = 560_190;

const BOOT2_KEY: [u8; 16] = [
    0xAD, 0x34, 0xEC, 0xF9, 0x62, 0x6E, 0xC2, 0x3A, 0xF6, 0xB4, 0x6C, 0x00, 0x80, 0x80, 0xEE, 0x98,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    External,
    PowerOff,
    GbaModeNotSupported,
    BadExceptionRegion,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutput {
    FrameFinished,
    Shutdown(StopReason),
}

#[derive(Debug)]
pub enum BuildError {
    MissingNand,
    Nand(nand::Error),
    Cart(ds_slot::Error),
}

pub struct Emu {
    #[cfg(feature = "log")]
    pub(crate) logger: slog::Logger,

    pub main_mem: Box<Bytes<MAIN_MEM_SIZE>>,
    pub main_mem_mask: u32,
    pub swram: Box<Bytes<0x8000>>,
    pub arm7_wram: Box<Bytes<0x1_0000>>,
    pub arm9i_bios: Box<Bytes<BIOS_SIZE>>,
    pub arm7i_bios: Box<Bytes<BIOS_SIZE>>,

    pub schedule: Schedule,
    pub arm9_irqs: Irqs,
    pub arm7_irqs: Irqs,
    pub(crate) arm9_timestamp: u64,
    pub(crate) arm9_target: u64,
    pub(crate) arm7_timestamp: u64,
    pub(crate) arm7_target: u64,
    pub(crate) arm9_clock_shift: u32,

    pub key_input: u32,
    pub ex_mem_cnt: u16,

    pub scfg: Scfg,
    pub nwram: Nwram,
    pub ndma: Ndma,
    pub aes: Aes,
    pub sdmmc: SdHost,
    pub sdio: SdHost,
    pub i2c: I2c,
    pub cam_module: CamModule,
    pub spi: spi::Controller,
    pub gpio: Gpio,
    pub ds_slot: Option<Cart>,
    pub jit: Box<dyn jit::Hooks>,

    pub(crate) pending_stop: Option<StopReason>,
    running: bool,
    full_bios_boot: bool,
}

pub struct Builder {
    #[cfg(feature = "log")]
    pub logger: slog::Logger,

    pub nand_contents: Option<Box<[u8]>>,
    /// KeyY for the ES key slot, normally extracted from the launcher.
    pub es_key_y: [u8; 16],
    pub sd_card_contents: Option<Box<[u8]>>,
    pub sd_card_read_only: bool,
    pub cart_rom: Option<Box<[u8]>>,

    pub arm9i_bios: Option<Box<Bytes<BIOS_SIZE>>>,
    pub arm7i_bios: Option<Box<Bytes<BIOS_SIZE>>>,
    /// Boot through the BIOS reset vectors instead of the stage-2 loader.
    pub full_bios_boot: bool,
    pub direct_boot: bool,

    pub mac_address: [u8; 6],
    pub wifi_board: WifiBoard,

    pub lan: Box<dyn LanBackend>,
    pub camera: Box<dyn i2c::camera::Backend>,
    pub jit: Box<dyn jit::Hooks>,
}

impl Builder {
    pub fn new(#[cfg(feature = "log")] logger: slog::Logger) -> Self {
        Builder {
            #[cfg(feature = "log")]
            logger,
            nand_contents: None,
            es_key_y: [0; 16],
            sd_card_contents: None,
            sd_card_read_only: false,
            cart_rom: None,
            arm9i_bios: None,
            arm7i_bios: None,
            full_bios_boot: false,
            direct_boot: true,
            mac_address: [0x00, 0x09, 0xBF, 0x0E, 0x49, 0x16],
            wifi_board: WifiBoard::W015,
            lan: Box::new(wifi::NullLan),
            camera: Box::new(i2c::camera::NullBackend),
            jit: Box::new(jit::NullHooks),
        }
    }

    pub fn build(self) -> Result<Emu, BuildError> {
        let nand = NandImage::new(
            self.nand_contents.ok_or(BuildError::MissingNand)?,
            self.es_key_y,
        )
        .map_err(BuildError::Nand)?;

        let cart = match self.cart_rom {
            Some(rom) => Some(Cart::new(rom).map_err(BuildError::Cart)?),
            None => None,
        };

        #[cfg(feature = "log")]
        let logger = self.logger;

        let mut sdmmc = SdHost::new(
            0,
            #[cfg(feature = "log")]
            logger.new(slog::o!("sd" => "mmc")),
        );
        sdmmc.ports[0] = self.sd_card_contents.map(|contents| {
            Port::Mmc(card::MmcCard::new(
                card::Storage::Sd {
                    contents,
                    read_only: self.sd_card_read_only,
                    dirty: false,
                },
                #[cfg(feature = "log")]
                logger.new(slog::o!("sd" => "card")),
            ))
        });
        sdmmc.ports[1] = Some(Port::Mmc(card::MmcCard::new(
            card::Storage::Nand(nand),
            #[cfg(feature = "log")]
            logger.new(slog::o!("sd" => "nand")),
        )));

        let mut sdio = SdHost::new(
            1,
            #[cfg(feature = "log")]
            logger.new(slog::o!("sd" => "io")),
        );
        sdio.ports[0] = Some(Port::Wifi(Box::new(NWifi::new(
            self.mac_address,
            self.wifi_board,
            self.lan,
            #[cfg(feature = "log")]
            logger.new(slog::o!("wifi" => "")),
        ))));

        let mut emu = Emu {
            main_mem: zeroed_box(),
            main_mem_mask: (MAIN_MEM_SIZE - 1) as u32,
            swram: zeroed_box(),
            arm7_wram: zeroed_box(),
            arm9i_bios: self.arm9i_bios.unwrap_or_else(zeroed_box),
            arm7i_bios: self.arm7i_bios.unwrap_or_else(zeroed_box),

            schedule: Schedule::new(),
            arm9_irqs: Irqs::new(),
            arm7_irqs: Irqs::new(),
            arm9_timestamp: 0,
            arm9_target: 0,
            arm7_timestamp: 0,
            arm7_target: 0,
            arm9_clock_shift: 2,

            key_input: 0x007F_03FF,
            ex_mem_cnt: 0x6000,

            scfg: Scfg::new(),
            nwram: Nwram::new(
                #[cfg(feature = "log")]
                logger.new(slog::o!("nwram" => "")),
            ),
            ndma: Ndma::new(),
            aes: Aes::new(),
            sdmmc,
            sdio,
            i2c: I2c::new(
                self.camera,
                #[cfg(feature = "log")]
                logger.new(slog::o!("i2c" => "")),
            ),
            cam_module: CamModule::new(),
            spi: spi::Controller::new(
                #[cfg(feature = "log")]
                logger.new(slog::o!("spi" => "")),
            ),
            gpio: Gpio::new(),
            ds_slot: cart,
            jit: self.jit,

            pending_stop: None,
            running: true,
            full_bios_boot: self.full_bios_boot,

            #[cfg(feature = "log")]
            logger,
        };

        emu.reset();

        if self.direct_boot && emu.ds_slot.is_some() {
            emu.setup_direct_boot();
        }

        Ok(emu)
    }
}

impl Emu {
    pub fn nand(&self) -> Option<&NandImage> {
        match &self.sdmmc.ports[1] {
            Some(Port::Mmc(card)) => card.nand(),
            _ => None,
        }
    }

    pub fn nand_mut(&mut self) -> Option<&mut NandImage> {
        match &mut self.sdmmc.ports[1] {
            Some(Port::Mmc(card)) => card.nand_mut(),
            _ => None,
        }
    }

    #[inline]
    pub fn console_id(&self) -> u64 {
        self.nand().map_or(0, NandImage::console_id)
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn reset(&mut self) {
        // the pen-up bit lives with the TSC; everything else reads released
        self.key_input = 0x007F_03FF & !spi::tsc::KEY_INPUT_PEN_UP;
        self.ex_mem_cnt = 0x6000;
        self.main_mem_mask = (MAIN_MEM_SIZE - 1) as u32;
        self.main_mem.0.fill(0);
        self.swram.0.fill(0);
        self.arm7_wram.0.fill(0);

        self.schedule = Schedule::new();
        self.arm9_irqs.reset();
        self.arm7_irqs.reset();
        self.arm9_timestamp = 0;
        self.arm9_target = 0;
        self.arm7_timestamp = 0;
        self.arm7_target = 0;
        self.arm9_clock_shift = 2;

        self.ndma.reset();
        self.i2c.reset();
        self.cam_module.reset(&mut self.schedule);
        self.spi.reset();

        self.load_nand();

        let Emu {
            sdmmc,
            sdio,
            schedule,
            ..
        } = self;
        sdmmc.reset(schedule);
        sdio.reset(schedule);

        let console_id = self.console_id();
        self.aes.reset(console_id);

        self.scfg
            .reset(self.full_bios_boot, self.ds_slot.is_some());
        self.gpio.reset();

        self.pending_stop = None;
        self.running = true;
    }

    /// The BPTWL-triggered warm reset: main RAM, the BPTWL register file
    /// (including the warmboot flag) and the cartridge state survive.
    pub fn soft_reset(&mut self) {
        self.load_nand();

        let Emu {
            sdmmc,
            sdio,
            schedule,
            ..
        } = self;
        sdmmc.reset(schedule);
        sdio.reset(schedule);

        let console_id = self.console_id();
        self.aes.reset(console_id);

        self.scfg
            .reset(self.full_bios_boot, self.ds_slot.is_some());
        // the slot-power transition from the cart reset is not re-run here
        self.scfg.mc = 0x0010;
    }

    /// Boot-time NAND staging: re-enables NWRAM access, clears the banks,
    /// applies the MBK blob stored in the NAND boot sector, and loads and
    /// decrypts the two boot2 binaries.
    pub fn load_nand(&mut self) -> bool {
        if self.nand().is_none() {
            #[cfg(feature = "log")]
            slog::error!(self.logger, "No NAND image loaded");
            return false;
        }

        // the previous run may have left the NWRAM enable bits cleared
        self.scfg.ext[0] |= 1 << 25;
        self.scfg.ext[1] |= 1 << 25;

        self.nwram.reset();

        if !self.full_bios_boot {
            let (boot_params, mbk) = {
                let nand = self.nand().unwrap();
                let mut boot_params = [0u32; 8];
                let mut raw = [0; 32];
                nand.read_raw(0x220, &mut raw);
                for (i, param) in boot_params.iter_mut().enumerate() {
                    *param = u32::from_le_bytes(raw[i * 4..i * 4 + 4].try_into().unwrap());
                }

                let mut mbk = [0u32; 12];
                let mut raw = [0; 48];
                nand.read_raw(0x380, &mut raw);
                for (i, value) in mbk.iter_mut().enumerate() {
                    *value = u32::from_le_bytes(raw[i * 4..i * 4 + 4].try_into().unwrap());
                }
                (boot_params, mbk)
            };

            self.apply_mbk_blob(&mbk);

            // load and decrypt the boot2 binaries
            for cpu in 0..2 {
                let offset = boot_params[cpu * 4] as u64;
                let dst = boot_params[cpu * 4 + 2];
                let size_aligned = boot_params[cpu * 4 + 3].min(0x40_0000);

                let mut iv = [0; 16];
                iv[0..4].copy_from_slice(&size_aligned.to_le_bytes());
                iv[4..8].copy_from_slice(&size_aligned.wrapping_neg().to_le_bytes());
                iv[8..12].copy_from_slice(&(!size_aligned).to_le_bytes());
                let iv = crypto::swap_128(iv);

                let mut ctx = AesCtx::new(&BOOT2_KEY, &iv);

                let mut data = vec![0; size_aligned as usize];
                self.nand().unwrap().read_raw(offset, &mut data);

                let mut addr = dst;
                for chunk in data.chunks_exact_mut(16) {
                    let mut tmp = crypto::swap_128(chunk.try_into().unwrap());
                    ctx.ctr_xcrypt(&mut tmp);
                    let plain = crypto::swap_128(tmp);

                    for word in plain.chunks_exact(4) {
                        let value = u32::from_le_bytes(word.try_into().unwrap());
                        if cpu == 0 {
                            bus::arm9::write_32(self, addr, value);
                        } else {
                            bus::arm7::write_32(self, addr, value);
                        }
                        addr = addr.wrapping_add(4);
                    }
                }
            }

            // pre-boot state the stage-2 loader expects in ARM7 WRAM
            let emmc_cid = *self.nand().unwrap().emmc_cid();
            let base = 0x03FF_E6E4;
            for i in 0..4 {
                let value = u32::from_le_bytes(emmc_cid[i * 4..i * 4 + 4].try_into().unwrap());
                bus::arm7::write_32(self, base + (i as u32) * 4, value);
            }
            bus::arm7::write_16(self, base + 0x2C, 0x0001);
            bus::arm7::write_16(self, base + 0x2E, 0x0001);
            bus::arm7::write_16(self, base + 0x3C, 0x0100);
            bus::arm7::write_16(self, base + 0x3E, 0x40E0);
            bus::arm7::write_16(self, base + 0x42, 0x0001);
        }

        true
    }

    fn apply_mbk_blob(&mut self, mbk: &[u32; 12]) {
        self.nwram.set_write_protect_raw(0);

        for i in 0..4 {
            self.nwram
                .map_a(i, (mbk[0] >> (i * 8)) as u8, &mut *self.jit);
        }
        for i in 0..8 {
            self.nwram
                .map_b(i, (mbk[1 + (i >> 2)] >> ((i & 3) * 8)) as u8, &mut *self.jit);
        }
        for i in 0..8 {
            self.nwram
                .map_c(i, (mbk[3 + (i >> 2)] >> ((i & 3) * 8)) as u8, &mut *self.jit);
        }

        for num in 0..3 {
            self.nwram.map_range(0, num, mbk[5 + num], &mut *self.jit);
            self.nwram.map_range(1, num, mbk[8 + num], &mut *self.jit);
        }

        self.nwram.set_write_protect_raw(mbk[11]);
    }

    fn decrypt_modcrypt_area(&mut self, offset: u32, size: u32, iv: &[u8; 16]) {
        if offset == 0 || size == 0 {
            return;
        }

        let Some(cart) = &self.ds_slot else {
            return;
        };

        let key = cart.modcrypt_key();

        // the modcrypt window must cover one of the four loaded binaries;
        // decryption happens in place in memory
        let rounded_size = (size + 0xF) & !0xF;
        let candidates = [
            (cart.arm9_rom_offset(), cart.arm9_size(), cart.arm9_ram_addr()),
            (cart.arm7_rom_offset(), cart.arm7_size(), cart.arm7_ram_addr()),
            (
                cart.arm9i_rom_offset(),
                cart.arm9i_size(),
                cart.arm9i_ram_addr(),
            ),
            (
                cart.arm7i_rom_offset(),
                cart.arm7i_size(),
                cart.arm7i_ram_addr(),
            ),
        ];

        let Some(&(_, _, binary_addr)) = candidates.iter().find(|&&(rom_offset, rom_size, _)| {
            offset >= rom_offset && offset + rounded_size <= rom_offset + ((rom_size + 0xF) & !0xF)
        }) else {
            #[cfg(feature = "log")]
            slog::warn!(
                self.logger,
                "Modcrypt area {:#010X}+{:#X} matches no binary",
                offset,
                size
            );
            return;
        };

        let key = crypto::swap_128(key);
        let iv = crypto::swap_128(*iv);
        let mut ctx = AesCtx::new(&key, &iv);

        for i in (0..size).step_by(16) {
            let mut data = [0; 16];
            for j in 0..4 {
                let value = bus::arm9::read_32(self, binary_addr + i + j * 4);
                data[j as usize * 4..j as usize * 4 + 4].copy_from_slice(&value.to_le_bytes());
            }

            let mut tmp = crypto::swap_128(data);
            ctx.ctr_xcrypt(&mut tmp);
            let data = crypto::swap_128(tmp);

            for j in 0..4 {
                let value = u32::from_le_bytes(data[j as usize * 4..j as usize * 4 + 4].try_into().unwrap());
                bus::arm9::write_32(self, binary_addr + i + j * 4, value);
            }
        }
    }

    /// Bootstraps the inserted cartridge without running the BIOS, mimicking
    /// its RAM, NWRAM and register state. NDS-only carts get the DS-compat
    /// environment instead.
    pub fn setup_direct_boot(&mut self) {
        let Some(cart) = &self.ds_slot else {
            return;
        };

        let ds_mode = !cart.is_dsi();
        let cart_id = cart.chip_id();
        let header_crc = cart.header_crc();
        let secure_area_crc = cart.secure_area_crc();
        let mbk = cart.mbk_blob();
        let app_flags = cart.app_flags();
        let crypto_flags = cart.crypto_flags();

        let header: Vec<u8> = cart.rom()[..cart.rom().len().min(0x170)].to_vec();
        let first_4k: Vec<u8> = cart.rom()[..cart.rom().len().min(0x1000)].to_vec();

        let read_region = |rom: &[u8], offset: u32, size: u32| -> Vec<u8> {
            let start = (offset as usize).min(rom.len());
            let end = (offset as usize + size as usize).min(rom.len());
            rom[start..end].to_vec()
        };
        let arm9_binary = read_region(cart.rom(), cart.arm9_rom_offset(), cart.arm9_size());
        let arm9_ram_addr = cart.arm9_ram_addr();
        let arm7_binary = read_region(cart.rom(), cart.arm7_rom_offset(), cart.arm7_size());
        let arm7_ram_addr = cart.arm7_ram_addr();

        #[cfg(feature = "log")]
        if !cart.secure_area_decrypted() {
            // decrypting it requires the base console's KEY1 engine
            slog::warn!(self.logger, "Cart secure area is still encrypted");
        }

        if ds_mode {
            self.scfg.bios = 0x0303;

            // no NWRAM mapping or windows in DS mode
            self.apply_mbk_blob(&[0; 12]);

            self.spi.tsc.set_mode(0x00);
            self.set_scfg_clock9(0x0000);
        } else {
            self.scfg.bios = 0x0101;
            self.apply_mbk_blob(&mbk);

            if !app_flags.contains(AppFlags::TSC_DSI_MODE) {
                self.spi.tsc.set_mode(0x00);
            }
        }

        if ds_mode {
            for (i, chunk) in header.chunks(4).enumerate() {
                let mut word = [0; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                bus::arm9::write_32(self, 0x027F_FE00 + (i as u32) * 4, u32::from_le_bytes(word));
            }

            bus::arm9::write_32(self, 0x027F_F800, cart_id);
            bus::arm9::write_32(self, 0x027F_F804, cart_id);
            bus::arm9::write_16(self, 0x027F_F808, header_crc);
            bus::arm9::write_16(self, 0x027F_F80A, secure_area_crc);

            bus::arm9::write_16(self, 0x027F_F850, 0x5835);

            bus::arm9::write_32(self, 0x027F_FC00, cart_id);
            bus::arm9::write_32(self, 0x027F_FC04, cart_id);
            bus::arm9::write_16(self, 0x027F_FC08, header_crc);
            bus::arm9::write_16(self, 0x027F_FC0A, secure_area_crc);

            bus::arm9::write_16(self, 0x027F_FC10, 0x5835);
            bus::arm9::write_16(self, 0x027F_FC30, 0xFFFF);
            bus::arm9::write_16(self, 0x027F_FC40, 0x0001);
        } else {
            for (i, chunk) in header[..header.len().min(0x160)].chunks(4).enumerate() {
                let mut word = [0; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                let value = u32::from_le_bytes(word);
                bus::arm9::write_32(self, 0x02FF_FA80 + (i as u32) * 4, value);
                bus::arm9::write_32(self, 0x02FF_FE00 + (i as u32) * 4, value);
            }

            for (i, chunk) in first_4k.chunks(4).enumerate() {
                let mut word = [0; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                let value = u32::from_le_bytes(word);
                bus::arm9::write_32(self, 0x02FF_C000 + (i as u32) * 4, value);
                bus::arm9::write_32(self, 0x02FF_E000 + (i as u32) * 4, value);
            }

            // user data and hardware info from the NAND system partition
            let (user_data, hwinfo_s, hwinfo_n) = match self.nand_mut() {
                Some(nand) => match NandMount::new(nand) {
                    Ok(mount) => {
                        let user_data = mount.read_user_data();
                        let (hwinfo_s, hwinfo_n) = mount.read_hardware_info();
                        (user_data, hwinfo_s, hwinfo_n)
                    }
                    Err(_) => (None, None, None),
                },
                None => (None, None, None),
            };

            if let Some(user_data) = user_data {
                for i in (0..0x128).step_by(4) {
                    let value =
                        u32::from_le_bytes(user_data[0x88 + i..0x88 + i + 4].try_into().unwrap());
                    bus::arm9::write_32(self, 0x0200_0400 + i as u32, value);
                }
            }
            if let Some(hwinfo_n) = hwinfo_n {
                for i in (0..0x14).step_by(4) {
                    let value =
                        u32::from_le_bytes(hwinfo_n[0x88 + i..0x88 + i + 4].try_into().unwrap());
                    bus::arm9::write_32(self, 0x0200_0600 + i as u32, value);
                }
            }
            if let Some(hwinfo_s) = hwinfo_s {
                for i in (0..0x18).step_by(4) {
                    let value =
                        u32::from_le_bytes(hwinfo_s[0x88 + i..0x88 + i + 4].try_into().unwrap());
                    bus::arm9::write_32(self, 0x02FF_FD68 + i as u32, value);
                }
            }

            // Wi-Fi board info; on hardware this comes from the wifi
            // firmware stored in the NAND
            bus::arm9::write_8(self, 0x0200_05E0, 1);
            bus::arm9::write_16(self, 0x0200_05E2, 0xB57E);
            bus::arm9::write_32(self, 0x0200_05E4, 0x0050_0400);
            bus::arm9::write_32(self, 0x0200_05E8, 0x0050_0000);
            bus::arm9::write_32(self, 0x0200_05EC, 0x0002_E000);

            bus::arm9::write_32(self, 0x02FF_FC00, cart_id);
            // boot indicator: cart
            bus::arm9::write_16(self, 0x02FF_FC40, 0x0001);

            let boot_flag = self.i2c.bptwl.boot_flag();
            bus::arm9::write_8(self, 0x02FF_FDFA, boot_flag | 0x80);
            bus::arm9::write_8(self, 0x02FF_FDFB, 0x01);
        }

        for (i, chunk) in arm9_binary.chunks(4).enumerate() {
            let mut word = [0; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            bus::arm9::write_32(self, arm9_ram_addr + (i as u32) * 4, u32::from_le_bytes(word));
        }
        for (i, chunk) in arm7_binary.chunks(4).enumerate() {
            let mut word = [0; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            bus::arm7::write_32(self, arm7_ram_addr + (i as u32) * 4, u32::from_le_bytes(word));
        }

        if !ds_mode && crypto_flags.contains(CryptoFlags::HAS_DSI_REGIONS) {
            let cart = self.ds_slot.as_ref().unwrap();
            let arm9i_binary =
                read_region(cart.rom(), cart.arm9i_rom_offset(), cart.arm9i_size());
            let arm9i_ram_addr = cart.arm9i_ram_addr();
            let arm7i_binary =
                read_region(cart.rom(), cart.arm7i_rom_offset(), cart.arm7i_size());
            let arm7i_ram_addr = cart.arm7i_ram_addr();
            let modcrypt = [
                (
                    cart.modcrypt_offset(0),
                    cart.modcrypt_size(0),
                    cart.arm9i_hash(),
                ),
                (
                    cart.modcrypt_offset(1),
                    cart.modcrypt_size(1),
                    cart.arm7i_hash(),
                ),
            ];
            let modcrypted = crypto_flags.contains(CryptoFlags::MODCRYPTED);

            for (i, chunk) in arm9i_binary.chunks(4).enumerate() {
                let mut word = [0; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                bus::arm9::write_32(
                    self,
                    arm9i_ram_addr + (i as u32) * 4,
                    u32::from_le_bytes(word),
                );
            }
            for (i, chunk) in arm7i_binary.chunks(4).enumerate() {
                let mut word = [0; 4];
                word[..chunk.len()].copy_from_slice(chunk);
                bus::arm7::write_32(
                    self,
                    arm7i_ram_addr + (i as u32) * 4,
                    u32::from_le_bytes(word),
                );
            }

            if modcrypted {
                for (offset, size, iv) in modcrypt {
                    self.decrypt_modcrypt_area(offset, size, &iv);
                }
            }
        }
    }

    /// Replaces the eMMC image. Takes effect fully on the next reset.
    pub fn set_nand(
        &mut self,
        contents: Box<[u8]>,
        es_key_y: [u8; 16],
    ) -> Result<(), nand::Error> {
        let nand = NandImage::new(contents, es_key_y)?;
        self.sdmmc.ports[1] = Some(Port::Mmc(card::MmcCard::new(
            card::Storage::Nand(nand),
            #[cfg(feature = "log")]
            self.logger.new(slog::o!("sd" => "nand")),
        )));
        Ok(())
    }

    /// Inserts or removes the external SD card.
    pub fn set_sd_card(&mut self, contents: Option<(Box<[u8]>, bool)>) {
        self.sdmmc.ports[0] = contents.map(|(contents, read_only)| {
            Port::Mmc(card::MmcCard::new(
                card::Storage::Sd {
                    contents,
                    read_only,
                    dirty: false,
                },
                #[cfg(feature = "log")]
                self.logger.new(slog::o!("sd" => "card")),
            ))
        });
    }

    pub fn load_cart(&mut self, rom: Box<[u8]>) -> Result<(), ds_slot::Error> {
        self.ds_slot = Some(Cart::new(rom)?);
        self.scfg.set_cart_inserted(true);
        Ok(())
    }

    pub fn eject_cart(&mut self) {
        self.ds_slot = None;
        self.scfg.set_cart_inserted(false);
    }

    pub(crate) fn set_scfg_clock9(&mut self, value: u16) {
        self.arm9_timestamp >>= self.arm9_clock_shift;
        self.arm9_target >>= self.arm9_clock_shift;

        self.scfg.clock9 = value & 0x0187;
        self.arm9_clock_shift = if self.scfg.clock9 & 1 != 0 { 2 } else { 1 };

        self.arm9_timestamp <<= self.arm9_clock_shift;
        self.arm9_target <<= self.arm9_clock_shift;
    }

    pub(crate) fn set_scfg_mc(&mut self, value: u32) {
        let old_slot_status = self.scfg.mc & 0xC;

        let mut value = value & 0xFFFF_800C;
        if value & 0xC == 0xC {
            value &= !0xC;
        }
        #[cfg(feature = "log")]
        if value & 0x8000 != 0 {
            slog::warn!(self.logger, "SCFG_MC: unexpected NDS slot swap");
        }
        self.scfg.mc = (self.scfg.mc & !0xFFFF_800C) | value;

        if old_slot_status == 0x0 && self.scfg.mc & 0xC == 0x4 {
            // slot power-up; the cart protocol engine lives in the base
            // console, so there is no cart state to re-arm here
        }
    }

    pub(crate) fn spi_write_data(&mut self, value: u8) {
        let Emu {
            spi,
            schedule,
            key_input,
            ..
        } = self;
        spi.write_data(value, schedule, key_input);
    }

    pub fn request_stop(&mut self, reason: StopReason) {
        self.pending_stop = Some(reason);
    }

    fn do_stop(&mut self, reason: StopReason) -> RunOutput {
        self.running = false;
        let Emu { i2c, .. } = self;
        i2c.camera0.stop(&mut *i2c.camera_backend);
        i2c.camera1.stop(&mut *i2c.camera_backend);
        RunOutput::Shutdown(reason)
    }

    fn dispatch_event(&mut self, event: Event, param: u32) {
        match event {
            Event::CamIrq => camera::irq_event(self),
            Event::CamTransfer => camera::transfer_event(self, param),
            Event::SdmmcTransfer => sdmmc::transfer_event(self, false, param),
            Event::SdioTransfer => sdmmc::transfer_event(self, true, param),
            Event::NWifiTimer => wifi::ms_timer_event(self),
            Event::SpiDataReady => {
                let Emu { spi, arm7_irqs, .. } = self;
                spi.handle_data_ready(arm7_irqs);
            }
            Event::SoftReset => self.soft_reset(),
        }
    }

    /// Advances the console by one frame: both CPU timelines are stepped to
    /// each event boundary (driving pending NDMA bursts on the way), then the
    /// due events run to completion.
    pub fn run_frame(&mut self) -> RunOutput {
        if !self.running {
            return RunOutput::Shutdown(StopReason::External);
        }

        let frame_end = self.schedule.cur_time() + FRAME_CYCLES;

        loop {
            if let Some(reason) = self.pending_stop.take() {
                return self.do_stop(reason);
            }

            let target = self.schedule.next_event_time().min(frame_end);

            self.arm9_target = target << self.arm9_clock_shift;
            if self.arm9_timestamp < self.arm9_target {
                ndma::run(self, 0);
            }
            self.arm9_timestamp = self.arm9_timestamp.max(self.arm9_target);

            self.arm7_target = target;
            if self.arm7_timestamp < self.arm7_target {
                ndma::run(self, 1);
            }
            self.arm7_timestamp = self.arm7_timestamp.max(self.arm7_target);

            self.schedule.set_cur_time(target);
            while let Some((event, param)) = self.schedule.pop_due() {
                self.dispatch_event(event, param);
            }

            if let Some(reason) = self.pending_stop.take() {
                return self.do_stop(reason);
            }

            if target >= frame_end {
                return RunOutput::FrameFinished;
            }
        }
    }

    // ---- frontend input ----

    /// Raw KEYINPUT/EXTKEYIN bits (0 = pressed); the pen-up bit is managed by
    /// the TSC.
    pub fn set_key_input(&mut self, value: u32) {
        self.key_input = (self.key_input & spi::tsc::KEY_INPUT_PEN_UP)
            | (value & !spi::tsc::KEY_INPUT_PEN_UP);
    }

    /// Touch input in 12-bit ADC coordinates.
    pub fn set_touch_coords(&mut self, x: u16, y: u16) {
        let Emu { spi, key_input, .. } = self;
        spi.tsc.set_touch_coords(x, y, key_input);
    }

    pub fn release_touch(&mut self) {
        let Emu { spi, key_input, .. } = self;
        spi.tsc.set_touch_coords(0, 0xFFF, key_input);
    }

    fn bptwl_cx(&mut self) -> (&mut i2c::bptwl::Bptwl, i2c::bptwl::Cx<'_>) {
        let Emu {
            i2c,
            schedule,
            arm7_irqs,
            pending_stop,
            ..
        } = self;
        (
            &mut i2c.bptwl,
            i2c::bptwl::Cx {
                schedule,
                irqs: arm7_irqs,
                stop: pending_stop,
            },
        )
    }

    pub fn set_power_button_held(&mut self, time: f64) {
        let (bptwl, mut cx) = self.bptwl_cx();
        bptwl.set_power_button_held(time, &mut cx);
    }

    pub fn set_power_button_released(&mut self, time: f64) {
        let (bptwl, mut cx) = self.bptwl_cx();
        bptwl.set_power_button_released(time, &mut cx);
    }

    pub fn set_volume_switch_held(&mut self, key: i2c::bptwl::VolumeKey) {
        self.i2c.bptwl.set_volume_switch_held(key);
    }

    pub fn set_volume_switch_released(&mut self, key: i2c::bptwl::VolumeKey) {
        self.i2c.bptwl.set_volume_switch_released(key);
    }

    pub fn process_volume_switch_input(&mut self, time: f64) -> Option<i2c::bptwl::VolumeKey> {
        let (bptwl, mut cx) = self.bptwl_cx();
        bptwl.process_volume_switch_input(time, &mut cx)
    }

    /// Pushes a camera frame from the frontend into a sensor's staging
    /// buffer.
    pub fn camera_input_frame(
        &mut self,
        camera: usize,
        data: &[u32],
        width: usize,
        height: usize,
        rgb: bool,
    ) {
        match camera {
            0 => self.i2c.camera0.input_frame(data, width, height, rgb),
            _ => self.i2c.camera1.input_frame(data, width, height, rgb),
        }
    }

    // ---- savestates ----

    fn do_savestate(&mut self, file: &mut Savestate) {
        file.section(*b"DSIG");

        self.scfg.do_savestate(file);

        file.var_u32(&mut self.main_mem_mask);
        file.var_u32(&mut self.key_input);
        file.var_u16(&mut self.ex_mem_cnt);
        file.var_u64(&mut self.arm9_timestamp);
        file.var_u64(&mut self.arm9_target);
        file.var_u64(&mut self.arm7_timestamp);
        file.var_u64(&mut self.arm7_target);
        file.var_u32(&mut self.arm9_clock_shift);

        self.schedule.do_savestate(file);
        self.arm9_irqs.do_savestate(file);
        self.arm7_irqs.do_savestate(file);

        self.nwram.do_savestate(file);

        file.bytes(&mut self.main_mem.0);
        file.bytes(&mut self.swram.0);
        file.bytes(&mut self.arm7_wram.0);

        self.gpio.do_savestate(file);

        self.ndma.do_savestate(file);
        self.aes.do_savestate(file);
        self.cam_module.do_savestate(file);
        self.i2c.do_savestate(file);
        self.sdmmc.do_savestate(file);
        self.sdio.do_savestate(file);
        self.spi.do_savestate(file);
    }

    pub fn save_state(&mut self) -> Vec<u8> {
        let mut file = Savestate::new_save();
        self.do_savestate(&mut file);
        file.finish()
    }

    pub fn load_state(&mut self, data: Vec<u8>) -> Result<(), crate::utils::savestate::Error> {
        let mut file = Savestate::new_load(data)?;
        self.do_savestate(&mut file);
        if !file.is_good() {
            return Err(crate::utils::savestate::Error::Truncated);
        }
        Ok(())
    }
}
