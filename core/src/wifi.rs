//! The SDIO-attached Atheros-style Wi-Fi module: SDIO function 0 (CIS) and
//! function 1 (mailboxes, IRQ banks, window registers), plus the layered
//! BMI → HTC → WMI boot protocol and the LAN packet tunnel.

use crate::{
    emu::{
        irqs::Irqs,
        schedule::{Event, Schedule},
        Emu,
    },
    sdmmc::{HostCx, Port, SdHost},
    utils::{DynFifo, Savestate},
};

/// MAC address of the built-in access point packets are tunnelled through.
pub const AP_MAC: [u8; 6] = [0x00, 0xF0, 0x77, 0x77, 0x77, 0x77];

const AP_SSID: &[u8] = b"twlAP";

/// Non-blocking host network hooks; both calls return immediately whether or
/// not data moved.
pub trait LanBackend {
    fn send_packet(&mut self, data: &[u8]);
    /// Receives one frame into `buf`, returning its length, or 0 when
    /// nothing is pending.
    fn recv_packet(&mut self, buf: &mut [u8]) -> usize;
}

pub struct NullLan;

impl LanBackend for NullLan {
    fn send_packet(&mut self, _data: &[u8]) {}
    fn recv_packet(&mut self, _buf: &mut [u8]) -> usize {
        0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WifiBoard {
    /// AR6002
    W015,
    /// AR6013
    W024,
    /// AR6014 (3DS)
    W028,
}

const CIS0: [u8; 256] = [
    0x01, 0x03, 0xD9, 0x01, 0xFF, 0x20, 0x04, 0x71, 0x02, 0x00, 0x02, 0x21, 0x02, 0x0C, 0x00,
    0x22, 0x04, 0x00, 0x00, 0x08, 0x32, 0x1A, 0x05, 0x01, 0x01, 0x00, 0x02, 0x07, 0x1B, 0x08,
    0xC1, 0x41, 0x30, 0x30, 0xFF, 0xFF, 0x32, 0x00, 0x14, 0x00, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF,
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

const CIS1: [u8; 256] = [
    0x20, 0x04, 0x71, 0x02, 0x00, 0x02, 0x21, 0x02, 0x0C, 0x00, 0x22, 0x2A, 0x01, 0x01, 0x11,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00, 0xFF, 0x80,
    0x00, 0x00, 0x00, 0x00, 0x01, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x00, 0x01, 0x80, 0x01, 0x06, 0x81, 0x01, 0x07,
    0x82, 0x01, 0xDF, 0xFF, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00,
];

const PHASE_BMI: u32 = 0;
const PHASE_HTC: u32 = 1;
const PHASE_WMI: u32 = 2;

/// ~1 ms of bus cycles.
const MS_CYCLES: u64 = 33611;

pub struct NWifi {
    #[cfg(feature = "log")]
    logger: slog::Logger,

    pub irq: bool,

    transfer_cmd: u32,
    transfer_addr: u32,
    rem_size: u32,

    // mailbox 8 is an oversized internal staging buffer events and packets
    // are queued in before being chunked into the visible RX mailbox
    mailbox: [DynFifo<u8>; 9],

    f0_irq_enable: u8,
    f0_irq_status: u8,

    f1_irq_enable: u8,
    f1_irq_enable_cpu: u8,
    f1_irq_enable_error: u8,
    f1_irq_enable_counter: u8,
    f1_irq_status: u8,
    f1_irq_status_cpu: u8,
    f1_irq_status_error: u8,
    f1_irq_status_counter: u8,

    window_data: u32,
    window_read_addr: u32,
    window_write_addr: u32,

    rom_id: u32,
    chip_id: u32,
    host_int_addr: u32,

    mac: [u8; 6],
    eeprom: [u8; 0x400],
    eeprom_ready: u32,

    boot_phase: u32,

    error_mask: u32,
    scan_timer: u32,

    beacon_timer: u64,
    connection_status: u32,

    lan_buffer: [u8; 2048],
    lan: Box<dyn LanBackend>,
}

impl NWifi {
    pub(crate) fn new(
        mac: [u8; 6],
        board: WifiBoard,
        lan: Box<dyn LanBackend>,
        #[cfg(feature = "log")] logger: slog::Logger,
    ) -> Self {
        NWifi {
            #[cfg(feature = "log")]
            logger,
            irq: false,
            transfer_cmd: 0xFFFF_FFFF,
            transfer_addr: 0,
            rem_size: 0,
            mailbox: [
                DynFifo::new(0x600),
                DynFifo::new(0x600),
                DynFifo::new(0x600),
                DynFifo::new(0x600),
                DynFifo::new(0x600),
                DynFifo::new(0x600),
                DynFifo::new(0x600),
                DynFifo::new(0x600),
                DynFifo::new(0x8000),
            ],
            f0_irq_enable: 0,
            f0_irq_status: 0,
            f1_irq_enable: 0,
            f1_irq_enable_cpu: 0,
            f1_irq_enable_error: 0,
            f1_irq_enable_counter: 0,
            f1_irq_status: 0,
            f1_irq_status_cpu: 0,
            f1_irq_status_error: 0,
            f1_irq_status_counter: 0,
            window_data: 0,
            window_read_addr: 0,
            window_write_addr: 0,
            rom_id: 0,
            chip_id: 0,
            host_int_addr: 0,
            mac,
            eeprom: [0; 0x400],
            eeprom_ready: 0,
            boot_phase: PHASE_BMI,
            error_mask: 0,
            scan_timer: 0,
            beacon_timer: 0,
            connection_status: 0,
            lan_buffer: [0; 2048],
            lan,
        }
        .with_board(board)
    }

    fn with_board(mut self, board: WifiBoard) -> Self {
        let (rom_id, chip_id, host_int_addr) = match board {
            WifiBoard::W015 => (0x2000_0188, 0x0200_0001, 0x0050_0400),
            WifiBoard::W024 => (0x2300_0024, 0x0D00_0000, 0x0052_0000),
            WifiBoard::W028 => (0x2300_006F, 0x0D00_0001, 0x0052_0000),
        };
        self.rom_id = rom_id;
        self.chip_id = chip_id;
        self.host_int_addr = host_int_addr;
        self
    }

    pub(crate) fn reset(&mut self, schedule: &mut Schedule) {
        self.irq = false;
        self.transfer_cmd = 0xFFFF_FFFF;
        self.rem_size = 0;

        self.f0_irq_enable = 0;
        self.f0_irq_status = 0;

        self.f1_irq_enable = 0;
        self.f1_irq_enable_cpu = 0;
        self.f1_irq_enable_error = 0;
        self.f1_irq_enable_counter = 0;
        self.f1_irq_status = 0;
        self.f1_irq_status_cpu = 0;
        self.f1_irq_status_error = 0;
        self.f1_irq_status_counter = 0;

        self.window_data = 0;
        self.window_read_addr = 0;
        self.window_write_addr = 0;

        for mailbox in &mut self.mailbox {
            mailbox.clear();
        }

        self.eeprom = [0; 0x400];
        self.eeprom[0x000..0x004].copy_from_slice(&0x300_u32.to_le_bytes());
        self.eeprom[0x008..0x00A].copy_from_slice(&0x8348_u16.to_le_bytes());
        self.eeprom[0x00A..0x010].copy_from_slice(&self.mac);
        self.eeprom[0x010..0x014].copy_from_slice(&0x6000_0000_u32.to_le_bytes());
        self.eeprom[0x03C..0xAC].fill(0xFF);
        self.eeprom[0x140..0x148].fill(0xFF);

        let mut checksum = 0xFFFF_u16;
        for i in (0..0x300).step_by(2) {
            checksum ^= u16::from_le_bytes([self.eeprom[i], self.eeprom[i + 1]]);
        }
        self.eeprom[0x004..0x006].copy_from_slice(&checksum.to_le_bytes());

        // TODO: only the internal reset register should reset the boot phase
        // and firmware-upload flag, not an SDIO reset
        self.boot_phase = PHASE_BMI;
        self.eeprom_ready = 0;

        self.error_mask = 0;
        self.scan_timer = 0;

        self.beacon_timer = 0x10A_2220;
        self.connection_status = 0;

        schedule.cancel(Event::NWifiTimer);
    }

    fn mb_read16(&mut self, n: usize) -> u16 {
        let low = self.mailbox[n].read().unwrap_or(0) as u16;
        low | ((self.mailbox[n].read().unwrap_or(0) as u16) << 8)
    }

    fn mb_read32(&mut self, n: usize) -> u32 {
        let mut result = 0;
        for shift in [0, 8, 16, 24] {
            result |= (self.mailbox[n].read().unwrap_or(0) as u32) << shift;
        }
        result
    }

    fn mb_write16(&mut self, n: usize, value: u16) {
        self.mailbox[n].write(value as u8);
        self.mailbox[n].write((value >> 8) as u8);
    }

    fn mb_write32(&mut self, n: usize, value: u32) {
        for shift in [0, 8, 16, 24] {
            self.mailbox[n].write((value >> shift) as u8);
        }
    }

    fn mb_drain(&mut self, n: usize) {
        while self.mailbox[n].read().is_some() {}
    }

    fn update_irq(&mut self, host: &mut SdHost, irqs: &mut Irqs) {
        self.f0_irq_status = 0;
        self.irq = false;

        if self.f1_irq_status & self.f1_irq_enable != 0 {
            self.f0_irq_status |= 1 << 1;
        }

        if self.f0_irq_enable & (1 << 0) != 0 && self.f0_irq_status & self.f0_irq_enable != 0 {
            self.irq = true;
        }

        host.set_card_irq_from_dev(self.irq, irqs);
    }

    fn update_irq_f1(&mut self, host: &mut SdHost, irqs: &mut Irqs) {
        self.f1_irq_status = 0;

        if !self.mailbox[4].is_empty() {
            self.f1_irq_status |= 1 << 0;
        }
        if !self.mailbox[5].is_empty() {
            self.f1_irq_status |= 1 << 1;
        }
        if !self.mailbox[6].is_empty() {
            self.f1_irq_status |= 1 << 2;
        }
        if !self.mailbox[7].is_empty() {
            self.f1_irq_status |= 1 << 3;
        }
        if self.f1_irq_status_counter & self.f1_irq_enable_counter != 0 {
            self.f1_irq_status |= 1 << 4;
        }
        if self.f1_irq_status_cpu & self.f1_irq_enable_cpu != 0 {
            self.f1_irq_status |= 1 << 6;
        }
        if self.f1_irq_status_error & self.f1_irq_enable_error != 0 {
            self.f1_irq_status |= 1 << 7;
        }

        self.update_irq(host, irqs);
    }

    fn clear_irq_f1_counter(&mut self, n: u32, host: &mut SdHost, irqs: &mut Irqs) {
        self.f1_irq_status_counter &= !(1 << n);
        self.update_irq_f1(host, irqs);
    }

    fn f0_read(&mut self, addr: u32) -> u8 {
        match addr {
            0x00000 => 0x11,
            0x00001 => 0x00,

            0x00002 => 0x02,
            0x00003 => 0x02,

            0x00004 => self.f0_irq_enable,
            0x00005 => self.f0_irq_status,

            0x00008 => 0x17,

            0x00009 => 0x00,
            0x0000A => 0x10,
            0x0000B => 0x00,

            0x00012 => 0x03,

            0x00109 => 0x00,
            0x0010A => 0x11,
            0x0010B => 0x00,

            0x01000..=0x010FF => CIS0[addr as usize & 0xFF],
            0x01100..=0x011FF => CIS1[addr as usize & 0xFF],

            _ => {
                #[cfg(feature = "log")]
                slog::debug!(self.logger, "Unknown func0 read {:#07X}", addr);
                0
            }
        }
    }

    fn f0_write(&mut self, addr: u32, value: u8, host: &mut SdHost, irqs: &mut Irqs) {
        match addr {
            0x00004 => {
                self.f0_irq_enable = value;
                self.update_irq(host, irqs);
            }
            _ => {
                #[cfg(feature = "log")]
                slog::debug!(self.logger, "Unknown func0 write {:#07X} {:#04X}", addr, value);
            }
        }
    }

    fn f1_read(&mut self, addr: u32, host: &mut SdHost, irqs: &mut Irqs) -> u8 {
        match addr {
            0x0000..=0x00FF | 0x0800..=0x0FFF | 0x2800..=0x1FFFF => {
                let result = self.mailbox[4].read().unwrap_or(0);
                if addr == 0xFF || addr == 0xFFF || addr == 0x3FFF {
                    self.drain_rx_buffer(host, irqs);
                }
                self.update_irq_f1(host, irqs);
                result
            }
            0x0100..=0x01FF | 0x1000..=0x17FF => {
                let result = self.mailbox[5].read().unwrap_or(0);
                self.update_irq_f1(host, irqs);
                result
            }
            0x0200..=0x02FF | 0x1800..=0x1FFF => {
                let result = self.mailbox[6].read().unwrap_or(0);
                self.update_irq_f1(host, irqs);
                result
            }
            0x0300..=0x03FF | 0x2000..=0x27FF => {
                let result = self.mailbox[7].read().unwrap_or(0);
                self.update_irq_f1(host, irqs);
                result
            }

            0x00400 => self.f1_irq_status,
            0x00401 => self.f1_irq_status_cpu,
            0x00402 => self.f1_irq_status_error,
            0x00403 => self.f1_irq_status_counter,

            0x00405 => {
                let mut result = 0;
                for (bit, n) in (4..8).enumerate() {
                    if self.mailbox[n].level() >= 4 {
                        result |= 1 << bit;
                    }
                }
                result
            }

            0x00408 => self.mailbox[4].peek(0).unwrap_or(0),
            0x00409 => self.mailbox[4].peek(1).unwrap_or(0),
            0x0040A => self.mailbox[4].peek(2).unwrap_or(0),
            0x0040B => self.mailbox[4].peek(3).unwrap_or(0),

            0x00418 => self.f1_irq_enable,
            0x00419 => self.f1_irq_enable_cpu,
            0x0041A => self.f1_irq_enable_error,
            0x0041B => self.f1_irq_enable_counter,

            // reading the counter-decrement register acks counter IRQ 0
            0x00440 => {
                self.clear_irq_f1_counter(0, host, irqs);
                0
            }
            0x00450 => 1,

            0x00474 => self.window_data as u8,
            0x00475 => (self.window_data >> 8) as u8,
            0x00476 => (self.window_data >> 16) as u8,
            0x00477 => (self.window_data >> 24) as u8,

            _ => 0,
        }
    }

    fn f1_write(&mut self, addr: u32, value: u8, host: &mut SdHost, cx: &mut HostCx) {
        match addr {
            0x0000..=0x00FF | 0x0800..=0x0FFF | 0x2800..=0x1FFFF => {
                #[cfg(feature = "log")]
                if self.mailbox[0].is_full() {
                    slog::debug!(self.logger, "Mailbox 0 full");
                }
                self.mailbox[0].write(value);
                if addr == 0xFF || addr == 0xFFF || addr == 0x3FFF {
                    self.handle_command(host, cx);
                }
                self.update_irq_f1(host, cx.irqs);
            }
            0x0100..=0x01FF | 0x1000..=0x17FF => {
                self.mailbox[1].write(value);
                self.update_irq_f1(host, cx.irqs);
            }
            0x0200..=0x02FF | 0x1800..=0x1FFF => {
                self.mailbox[2].write(value);
                self.update_irq_f1(host, cx.irqs);
            }
            0x0300..=0x03FF | 0x2000..=0x27FF => {
                self.mailbox[3].write(value);
                self.update_irq_f1(host, cx.irqs);
            }

            0x00418 => {
                self.f1_irq_enable = value;
                self.update_irq_f1(host, cx.irqs);
            }
            0x00419 => {
                self.f1_irq_enable_cpu = value;
                self.update_irq_f1(host, cx.irqs);
            }
            0x0041A => {
                self.f1_irq_enable_error = value;
                self.update_irq_f1(host, cx.irqs);
            }
            0x0041B => {
                self.f1_irq_enable_counter = value;
                self.update_irq_f1(host, cx.irqs);
            }

            0x00440 => self.clear_irq_f1_counter(0, host, cx.irqs),

            0x00474 => self.window_data = (self.window_data & 0xFFFF_FF00) | value as u32,
            0x00475 => {
                self.window_data = (self.window_data & 0xFFFF_00FF) | ((value as u32) << 8);
            }
            0x00476 => {
                self.window_data = (self.window_data & 0xFF00_FFFF) | ((value as u32) << 16);
            }
            0x00477 => {
                self.window_data = (self.window_data & 0x00FF_FFFF) | ((value as u32) << 24);
            }

            0x00478 => {
                self.window_write_addr = (self.window_write_addr & 0xFFFF_FF00) | value as u32;
                self.window_write(self.window_write_addr, self.window_data);
            }
            0x00479 => {
                self.window_write_addr =
                    (self.window_write_addr & 0xFFFF_00FF) | ((value as u32) << 8);
            }
            0x0047A => {
                self.window_write_addr =
                    (self.window_write_addr & 0xFF00_FFFF) | ((value as u32) << 16);
            }
            0x0047B => {
                self.window_write_addr =
                    (self.window_write_addr & 0x00FF_FFFF) | ((value as u32) << 24);
            }

            0x0047C => {
                self.window_read_addr = (self.window_read_addr & 0xFFFF_FF00) | value as u32;
                self.window_data = self.window_read(self.window_read_addr);
            }
            0x0047D => {
                self.window_read_addr =
                    (self.window_read_addr & 0xFFFF_00FF) | ((value as u32) << 8);
            }
            0x0047E => {
                self.window_read_addr =
                    (self.window_read_addr & 0xFF00_FFFF) | ((value as u32) << 16);
            }
            0x0047F => {
                self.window_read_addr =
                    (self.window_read_addr & 0x00FF_FFFF) | ((value as u32) << 24);
            }

            _ => {
                #[cfg(feature = "log")]
                slog::debug!(self.logger, "Unknown func1 write {:#07X} {:#04X}", addr, value);
            }
        }
    }

    fn sdio_read(&mut self, func: u32, addr: u32, host: &mut SdHost, irqs: &mut Irqs) -> u8 {
        match func {
            0 => self.f0_read(addr),
            1 => self.f1_read(addr, host, irqs),
            _ => {
                #[cfg(feature = "log")]
                slog::debug!(self.logger, "Unknown SDIO read {} {:#07X}", func, addr);
                0
            }
        }
    }

    fn sdio_write(&mut self, func: u32, addr: u32, value: u8, host: &mut SdHost, cx: &mut HostCx) {
        match func {
            0 => self.f0_write(addr, value, host, cx.irqs),
            1 => self.f1_write(addr, value, host, cx),
            _ => {
                #[cfg(feature = "log")]
                slog::debug!(
                    self.logger,
                    "Unknown SDIO write {} {:#07X} {:#04X}",
                    func,
                    addr,
                    value
                );
            }
        }
    }

    pub(crate) fn send_cmd(&mut self, host: &mut SdHost, cx: &mut HostCx, cmd: u8, param: u32) {
        match cmd {
            12 => {}

            52 => {
                // IO_RW_DIRECT
                let func = (param >> 28) & 0x7;
                let addr = (param >> 9) & 0x1_FFFF;

                if param & (1 << 31) != 0 {
                    let mut value = param as u8;
                    self.sdio_write(func, addr, value, host, cx);
                    if param & (1 << 27) != 0 {
                        value = self.sdio_read(func, addr, host, cx.irqs);
                    }
                    host.send_response(value as u32 | 0x1000, true, cx.irqs);
                } else {
                    let value = self.sdio_read(func, addr, host, cx.irqs);
                    host.send_response(value as u32 | 0x1000, true, cx.irqs);
                }
            }

            53 => {
                // IO_RW_EXTENDED
                let addr = (param >> 9) & 0x1_FFFF;

                self.transfer_cmd = param;
                self.transfer_addr = addr;
                if param & (1 << 27) != 0 {
                    // block mode
                    self.rem_size = (param & 0x1FF) << 9;
                } else {
                    self.rem_size = param & 0x1FF;
                    if self.rem_size == 0 {
                        self.rem_size = 0x200;
                    }
                }

                if param & (1 << 31) != 0 {
                    self.write_block(host, cx);
                } else {
                    self.read_block(host, cx);
                }
                host.send_response(0x1000, true, cx.irqs);
            }

            _ => {
                #[cfg(feature = "log")]
                slog::warn!(self.logger, "Unknown CMD{} {:#010X}", cmd, param);
            }
        }
    }

    pub(crate) fn continue_transfer(&mut self, host: &mut SdHost, cx: &mut HostCx) {
        if self.transfer_cmd & (1 << 31) != 0 {
            self.write_block(host, cx);
        } else {
            self.read_block(host, cx);
        }
    }

    fn read_block(&mut self, host: &mut SdHost, cx: &mut HostCx) {
        let func = (self.transfer_cmd >> 28) & 0x7;
        let len = if self.transfer_cmd & (1 << 27) != 0 {
            0x200
        } else {
            self.rem_size
        };
        let len = host.get_transferrable_len(len) as usize;

        let mut data = [0; 0x200];
        for entry in data[..len].iter_mut() {
            *entry = self.sdio_read(func, self.transfer_addr, host, cx.irqs);
            if self.transfer_cmd & (1 << 26) != 0 {
                self.transfer_addr = (self.transfer_addr + 1) & 0x1_FFFF;
            }
        }
        let len = host.data_rx(&data[..len], cx);

        self.rem_size = self.rem_size.saturating_sub(len);
    }

    fn write_block(&mut self, host: &mut SdHost, cx: &mut HostCx) {
        let func = (self.transfer_cmd >> 28) & 0x7;
        let len = if self.transfer_cmd & (1 << 27) != 0 {
            0x200
        } else {
            self.rem_size
        };
        let len = host.get_transferrable_len(len) as usize;

        let mut data = [0; 0x200];
        let len = host.data_tx(&mut data[..len], len, cx) as usize;
        if len != 0 {
            for &value in &data[..len] {
                self.sdio_write(func, self.transfer_addr, value, host, cx);
                if self.transfer_cmd & (1 << 26) != 0 {
                    self.transfer_addr = (self.transfer_addr + 1) & 0x1_FFFF;
                }
            }

            self.rem_size = self.rem_size.saturating_sub(len as u32);
        }
    }

    fn handle_command(&mut self, host: &mut SdHost, cx: &mut HostCx) {
        match self.boot_phase {
            PHASE_BMI => self.bmi_command(host, cx.irqs),
            PHASE_HTC => self.htc_command(host, cx),
            _ => self.wmi_command(host, cx.irqs),
        }
    }

    fn bmi_command(&mut self, host: &mut SdHost, irqs: &mut Irqs) {
        let cmd = self.mb_read32(0);

        match cmd {
            0x01 => {
                // BMI_DONE
                #[cfg(feature = "log")]
                slog::debug!(self.logger, "BMI_DONE");
                self.eeprom_ready = 1;
                let ready_msg = [0x0A, 0x00, 0x08, 0x06, 0x16, 0x00];
                self.send_wmi_event(0, 0x0001, &ready_msg, host, irqs);
                self.boot_phase = PHASE_HTC;
            }

            0x03 => {
                // BMI_WRITE_MEMORY; the uploaded firmware is not executed
                let _addr = self.mb_read32(0);
                let len = self.mb_read32(0);
                for _ in 0..len {
                    self.mailbox[0].read();
                }
            }

            0x04 => {
                // BMI_EXECUTE
                let entry = self.mb_read32(0);
                let arg = self.mb_read32(0);
                #[cfg(feature = "log")]
                slog::debug!(self.logger, "BMI_EXECUTE {:#010X} {:#010X}", entry, arg);
                let _ = (entry, arg);
            }

            0x06 => {
                // BMI_READ_SOC_REGISTER
                let addr = self.mb_read32(0);
                let value = self.window_read(addr);
                self.mb_write32(4, value);
            }

            0x07 => {
                // BMI_WRITE_SOC_REGISTER
                let addr = self.mb_read32(0);
                let value = self.mb_read32(0);
                self.window_write(addr, value);
            }

            0x08 => {
                // BMI_GET_TARGET_ID
                self.mb_write32(4, 0xFFFF_FFFF);
                self.mb_write32(4, 0x0000_000C);
                self.mb_write32(4, self.rom_id);
                self.mb_write32(4, 0x0000_0002);
            }

            0x0D => {
                // BMI_LZ_STREAM_START
                let _addr = self.mb_read32(0);
            }

            0x0E => {
                // BMI_LZ_DATA, drained like the plain upload
                let len = self.mb_read32(0);
                for _ in 0..len {
                    self.mailbox[0].read();
                }
            }

            _ => {
                #[cfg(feature = "log")]
                slog::warn!(self.logger, "Unknown BMI command {:#010X}", cmd);
            }
        }
    }

    fn htc_command(&mut self, host: &mut SdHost, cx: &mut HostCx) {
        let _h0 = self.mb_read16(0);
        let _len = self.mb_read16(0);
        let _h2 = self.mb_read16(0);

        let cmd = self.mb_read16(0);

        match cmd {
            0x0002 => {
                // service connect
                let svc_id = self.mb_read16(0);
                let _conn_flags = self.mb_read16(0);

                let mut resp = [0; 8];
                resp[0..2].copy_from_slice(&svc_id.to_le_bytes());
                resp[2] = 0;
                resp[3] = (svc_id as u8).wrapping_add(1);
                let max_msg_size: u16 = if svc_id == 0x0100 { 0x0602 } else { 0x0600 };
                resp[4..6].copy_from_slice(&max_msg_size.to_le_bytes());
                resp[6..8].copy_from_slice(&0u16.to_le_bytes());
                self.send_wmi_event(0, 0x0003, &resp, host, cx.irqs);
            }

            0x0004 => {
                // setup complete: announce readiness and the regulatory
                // domain, then enter the WMI phase
                let mut ready_evt = [0; 12];
                ready_evt[0..6].copy_from_slice(&self.eeprom[0xA..0x10]);
                ready_evt[6] = 0x02;
                ready_evt[7] = 0;
                ready_evt[8..12].copy_from_slice(&0x2300_006C_u32.to_le_bytes());
                self.send_wmi_event(1, 0x1001, &ready_evt, host, cx.irqs);

                let country_code = u16::from_le_bytes([self.eeprom[0x008], self.eeprom[0x009]]);
                let regdomain_evt =
                    (0x8000_0000_u32 | (country_code as u32 & 0x0FFF)).to_le_bytes();
                self.send_wmi_event(1, 0x1006, &regdomain_evt, host, cx.irqs);

                self.boot_phase = PHASE_WMI;
                cx.schedule.schedule(Event::NWifiTimer, false, MS_CYCLES, 0);
            }

            _ => {
                #[cfg(feature = "log")]
                slog::warn!(self.logger, "Unknown HTC command {:#06X}", cmd);
            }
        }

        self.mb_drain(0);
    }

    fn wmi_command(&mut self, host: &mut SdHost, irqs: &mut Irqs) {
        let h0 = self.mb_read16(0);
        let len = self.mb_read16(0);
        let _h2 = self.mb_read16(0);

        let ep = h0 as u8;
        if ep > 0x01 {
            // data endpoints carry ethernet frames
            self.wmi_send_packet(len);
        } else {
            let cmd = self.mb_read16(0);

            match cmd {
                0x0001 => self.wmi_connect_to_network(host, irqs),

                0x0003 => {
                    // disconnect
                    #[cfg(feature = "log")]
                    if self.connection_status != 1 {
                        slog::warn!(self.logger, "WMI: disconnect while not connected");
                    }
                    self.connection_status = 0;

                    let mut reply = [0; 11];
                    reply[0..2].copy_from_slice(&3u16.to_le_bytes());
                    reply[2..8].copy_from_slice(&AP_MAC);
                    // disconnect reason: by command
                    reply[8] = 3;
                    reply[9] = 0;
                    reply[10] = 0;
                    self.send_wmi_event(1, 0x1003, &reply, host, irqs);
                }

                0x0004 => {
                    // synchronize
                    self.mailbox[0].read();
                }

                0x0005 => {
                    // create priority stream: accepted silently
                }

                0x0007 => {
                    // start scan
                    let _force_fg = self.mb_read32(0);
                    let _legacy = self.mb_read32(0);
                    let scan_time = self.mb_read32(0);
                    let _force_interval = self.mb_read32(0);
                    let _scan_type = self.mailbox[0].read();
                    let _n_channels = self.mailbox[0].read();

                    self.scan_timer = scan_time * 5;
                }

                0x0008 => {
                    // set scan params
                }

                0x0009 => {
                    // set BSS filter
                    let _filter = self.mailbox[0].read();
                    for _ in 0..3 {
                        self.mailbox[0].read();
                    }
                    let _ie_mask = self.mb_read32(0);
                }

                0x000A => {
                    // set probed SSID
                    let _id = self.mailbox[0].read();
                    let _flags = self.mailbox[0].read();
                    let len = self.mailbox[0].read().unwrap_or(0);
                    for _ in 0..len.min(32) {
                        self.mailbox[0].read();
                    }
                }

                0x000D => {
                    // set disconnect timeout
                    self.mailbox[0].read();
                }

                0x000E => {
                    // get channel list: 11 channels starting at 2412 MHz
                    const N_CHANNELS: usize = 11;
                    let mut reply = [0; 4 + N_CHANNELS * 2];
                    reply[0] = 0;
                    reply[1] = N_CHANNELS as u8;
                    for i in 0..N_CHANNELS {
                        reply[2 + i * 2..4 + i * 2]
                            .copy_from_slice(&(2412 + (i as u16) * 5).to_le_bytes());
                    }
                    self.send_wmi_event(1, 0x000E, &reply, host, irqs);
                }

                0x0011 => {
                    // set channel params
                    self.mailbox[0].read();
                    let _scan = self.mailbox[0].read();
                    let _phy_mode = self.mailbox[0].read();
                    let len = self.mailbox[0].read().unwrap_or(0);
                    for _ in 0..len.min(32) {
                        self.mb_read16(0);
                    }
                }

                0x0012 => {
                    // set power mode
                    self.mailbox[0].read();
                }

                0x0017 => {
                    self.mailbox[0].read();
                }

                0x0022 => {
                    self.error_mask = self.mb_read32(0);
                }

                0x002E => {
                    // extension commands
                    let ext_cmd = self.mb_read32(0);
                    match ext_cmd {
                        0x2008 => {
                            // heartbeat challenge
                            let cookie = self.mb_read32(0);
                            let source = self.mb_read32(0);

                            let mut reply = [0; 12];
                            reply[0..4].copy_from_slice(&0x3007_u32.to_le_bytes());
                            reply[4..8].copy_from_slice(&cookie.to_le_bytes());
                            reply[8..12].copy_from_slice(&source.to_le_bytes());
                            self.send_wmi_event(1, 0x1010, &reply, host, irqs);
                        }
                        _ => {
                            #[cfg(feature = "log")]
                            slog::warn!(self.logger, "WMI: unknown ext command {:#06X}", ext_cmd);
                        }
                    }
                }

                0x003D => {
                    // set keepalive interval
                    self.mailbox[0].read();
                }

                0x0041 => {
                    // set WSC status
                    self.mailbox[0].read();
                }

                0x0047 => {}

                0x0048 => {
                    self.mb_read32(0);
                    self.mb_read32(0);
                    self.mailbox[0].read();
                    self.mailbox[0].read();
                }

                0x0049 => {
                    // host exit notify
                }

                0xF000 => {
                    // set bitrate
                    for _ in 0..3 {
                        self.mailbox[0].read();
                    }
                }

                _ => {
                    #[cfg(feature = "log")]
                    slog::warn!(
                        self.logger,
                        "Unknown WMI command {:#06X} (header {:#06X}:{:#06X})",
                        cmd,
                        h0,
                        len
                    );
                }
            }
        }

        if h0 & (1 << 8) != 0 {
            self.send_wmi_ack(ep, host, irqs);
        }

        self.mb_drain(0);
    }

    fn wmi_connect_to_network(&mut self, host: &mut SdHost, irqs: &mut Irqs) {
        let network_type = self.mailbox[0].read().unwrap_or(0);
        let auth_11 = self.mailbox[0].read().unwrap_or(0);
        let auth = self.mailbox[0].read().unwrap_or(0);
        let pairwise_crypto = self.mailbox[0].read().unwrap_or(0);
        let _pairwise_len = self.mailbox[0].read();
        let group_crypto = self.mailbox[0].read().unwrap_or(0);
        let _group_len = self.mailbox[0].read();
        let _ssid_len = self.mailbox[0].read();

        let mut ssid = [0; 32];
        for entry in &mut ssid {
            *entry = self.mailbox[0].read().unwrap_or(0);
        }

        let _channel = self.mb_read16(0);

        let mut bssid = [0; 6];
        bssid[0..4].copy_from_slice(&self.mb_read32(0).to_le_bytes());
        bssid[4..6].copy_from_slice(&self.mb_read16(0).to_le_bytes());

        let _flags = self.mb_read32(0);

        // only an open connection to the built-in AP is supported
        if network_type != 0x01
            || auth_11 != 0x01
            || auth != 0x01
            || pairwise_crypto != 0x01
            || group_crypto != 0x01
            || bssid != AP_MAC
        {
            #[cfg(feature = "log")]
            slog::warn!(self.logger, "WMI connect: rejected parameters");
            return;
        }

        let mut reply = [0; 20];
        reply[0..2].copy_from_slice(&2437u16.to_le_bytes());
        reply[2..8].copy_from_slice(&AP_MAC);
        // listen and beacon intervals
        reply[8..10].copy_from_slice(&128u16.to_le_bytes());
        reply[10..12].copy_from_slice(&128u16.to_le_bytes());
        // network type: infrastructure
        reply[12..16].copy_from_slice(&0x01u32.to_le_bytes());
        reply[16] = 0x16;
        reply[17] = 0x2F;
        reply[18] = 0x16;
        reply[19] = 0;
        self.send_wmi_event(1, 0x1002, &reply, host, irqs);

        self.connection_status = 1;
    }

    fn wmi_send_packet(&mut self, len: u16) {
        if self.connection_status != 1 {
            #[cfg(feature = "log")]
            slog::warn!(self.logger, "WMI: data frame while not connected");
            return;
        }

        let hdr = self.mb_read16(0).swap_bytes();
        let frame_type = hdr & 0x0003;

        if frame_type == 2 {
            // data sync marker
            return;
        }
        if frame_type != 0 {
            #[cfg(feature = "log")]
            slog::debug!(self.logger, "WMI: special frame {:#06X} len={}", hdr, len);
            for _ in 0..len.saturating_sub(2) {
                self.mailbox[0].read();
            }
            return;
        }

        let mut dst_mac = [0; 6];
        dst_mac[0..4].copy_from_slice(&self.mb_read32(0).to_le_bytes());
        dst_mac[4..6].copy_from_slice(&self.mb_read16(0).to_le_bytes());
        let mut src_mac = [0; 6];
        src_mac[0..4].copy_from_slice(&self.mb_read32(0).to_le_bytes());
        src_mac[4..6].copy_from_slice(&self.mb_read16(0).to_le_bytes());
        let payload_len = self.mb_read16(0).swap_bytes();

        if payload_len > len.saturating_sub(16) {
            #[cfg(feature = "log")]
            slog::warn!(
                self.logger,
                "WMI: bad packet length {} > {}",
                payload_len,
                len.saturating_sub(16)
            );
            return;
        }

        let llc_0 = self.mb_read32(0);
        let llc_1 = self.mb_read16(0);
        if llc_0 != 0x0003_AAAA || llc_1 != 0x0000 {
            #[cfg(feature = "log")]
            slog::warn!(self.logger, "WMI: bad LLC/SNAP header");
            return;
        }

        let ethertype = self.mb_read16(0);

        let lan_len = (payload_len as usize).saturating_sub(8) + 14;
        if lan_len > self.lan_buffer.len() {
            return;
        }

        self.lan_buffer[0..6].copy_from_slice(&dst_mac);
        self.lan_buffer[6..12].copy_from_slice(&src_mac);
        self.lan_buffer[12..14].copy_from_slice(&ethertype.to_le_bytes());
        for i in 0..lan_len - 14 {
            self.lan_buffer[14 + i] = self.mailbox[0].read().unwrap_or(0);
        }

        let buffer = self.lan_buffer;
        self.lan.send_packet(&buffer[..lan_len]);
    }

    fn send_wmi_event(
        &mut self,
        ep: u8,
        id: u16,
        data: &[u8],
        host: &mut SdHost,
        irqs: &mut Irqs,
    ) {
        if !self.mailbox[8].can_fit(6 + data.len() + 2 + 8) {
            #[cfg(feature = "log")]
            slog::warn!(self.logger, "No space in RX buffer for WMI event {:#06X}", id);
            return;
        }

        self.mailbox[8].write(ep);
        // flags: trailer present
        self.mailbox[8].write(0x02);
        self.mb_write16(8, (data.len() + 2 + 8) as u16);
        self.mailbox[8].write(8);
        self.mailbox[8].write(0);
        self.mb_write16(8, id);

        for &byte in data {
            self.mailbox[8].write(byte);
        }

        // lookahead trailer
        for byte in [0x02, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00] {
            self.mailbox[8].write(byte);
        }

        self.drain_rx_buffer(host, irqs);
    }

    fn send_wmi_ack(&mut self, ep: u8, host: &mut SdHost, irqs: &mut Irqs) {
        if !self.mailbox[8].can_fit(6 + 12) {
            #[cfg(feature = "log")]
            slog::warn!(self.logger, "No space in RX buffer for WMI ack (ep {})", ep);
            return;
        }

        self.mailbox[8].write(0);
        self.mailbox[8].write(0x02);
        self.mb_write16(8, 0xC);
        self.mailbox[8].write(0xC);
        self.mailbox[8].write(0);

        // credit report
        self.mailbox[8].write(0x01);
        self.mailbox[8].write(0x02);
        self.mailbox[8].write(ep);
        self.mailbox[8].write(0x01);

        // lookahead
        for byte in [0x02, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00] {
            self.mailbox[8].write(byte);
        }

        self.drain_rx_buffer(host, irqs);
    }

    fn send_wmi_bss_info(&mut self, frame_type: u8, data: &[u8], host: &mut SdHost, irqs: &mut Irqs) {
        if !self.mailbox[8].can_fit(6 + data.len() + 2 + 16) {
            #[cfg(feature = "log")]
            slog::warn!(self.logger, "No space in RX buffer for BSSINFO event");
            return;
        }

        self.mailbox[8].write(1);
        self.mailbox[8].write(0x00);
        self.mb_write16(8, (data.len() + 2 + 16) as u16);
        self.mailbox[8].write(0xFF);
        self.mailbox[8].write(0xFF);
        self.mb_write16(8, 0x1004);

        // channel 6
        self.mb_write16(8, 2437);
        self.mailbox[8].write(frame_type);
        // SNR and RSSI
        self.mailbox[8].write(0x1B);
        self.mb_write16(8, 0xFFBC);
        self.mb_write32(8, u32::from_le_bytes(AP_MAC[0..4].try_into().unwrap()));
        self.mb_write16(8, u16::from_le_bytes(AP_MAC[4..6].try_into().unwrap()));
        self.mb_write32(8, 0);

        for &byte in data {
            self.mailbox[8].write(byte);
        }

        self.drain_rx_buffer(host, irqs);
    }

    fn check_rx(&mut self, host: &mut SdHost, irqs: &mut Irqs) {
        if !self.mailbox[8].can_fit(2048) {
            return;
        }

        let mut buffer = self.lan_buffer;
        let rx_len = self.lan.recv_packet(&mut buffer);
        self.lan_buffer = buffer;
        if rx_len < 14 {
            return;
        }

        // only broadcast frames and frames addressed to us are delivered
        if self.lan_buffer[0..6] != [0xFF; 6] && self.lan_buffer[0..6] != self.eeprom[0xA..0x10] {
            return;
        }
        // drop reflections of our own transmissions
        if self.lan_buffer[6..12] == self.eeprom[0xA..0x10] {
            return;
        }

        let data_len = rx_len - 14;

        // TODO: derive the endpoint ID from the connected service instead of
        // hardcoding the data endpoint
        let ep = 2;
        let hdr: u16 = 0x80;

        self.mailbox[8].write(ep);
        self.mailbox[8].write(0x00);
        self.mb_write16(8, (16 + 8 + data_len) as u16);
        self.mailbox[8].write(0);
        self.mailbox[8].write(0);

        self.mb_write16(8, hdr);
        for i in 0..12 {
            let byte = self.lan_buffer[i];
            self.mailbox[8].write(byte);
        }
        let payload_len = ((data_len + 8) as u16).swap_bytes();
        self.mb_write16(8, payload_len);

        self.mb_write16(8, 0xAAAA);
        self.mb_write16(8, 0x0003);
        self.mb_write16(8, 0x0000);
        let ethertype = u16::from_le_bytes([self.lan_buffer[12], self.lan_buffer[13]]);
        self.mb_write16(8, ethertype);

        for i in 0..data_len {
            let byte = self.lan_buffer[14 + i];
            self.mailbox[8].write(byte);
        }

        self.drain_rx_buffer(host, irqs);
    }

    fn window_read(&mut self, addr: u32) -> u32 {
        if addr & 0xFF_FF00 == self.host_int_addr {
            // RAM host-interest area
            return match addr & 0xFF {
                // base address of the EEPROM data; a synthetic pointer, not
                // the real chip-RAM location
                0x54 => 0x1F_FC00,
                0x58 => self.eeprom_ready,
                _ => 0,
            };
        }

        if addr & 0x1F_FC00 == 0x1F_FC00 {
            let offset = (addr & 0x3FF) as usize;
            return u32::from_le_bytes(self.eeprom[offset..offset + 4].try_into().unwrap());
        }

        match addr {
            // chip ID
            0x40EC => self.chip_id,
            // SOC_RESET_CAUSE
            0x40C0 => 2,
            _ => 0,
        }
    }

    fn window_write(&mut self, addr: u32, value: u32) {
        #[cfg(feature = "log")]
        slog::debug!(self.logger, "Window write {:#010X} {:#010X}", addr, value);
        let _ = (addr, value);
    }

    /// Moves complete frames from the staging buffer to the visible RX
    /// mailbox, each padded with zeroes up to a 128-byte boundary.
    fn drain_rx_buffer(&mut self, host: &mut SdHost, irqs: &mut Irqs) {
        while self.mailbox[8].level() >= 6 {
            let len = self.mailbox[8].peek(2).unwrap_or(0) as usize
                | ((self.mailbox[8].peek(3).unwrap_or(0) as usize) << 8);
            let total_len = len + 6;
            let required = (total_len + 0x7F) & !0x7F;

            if !self.mailbox[4].can_fit(required) {
                break;
            }

            for _ in 0..total_len {
                let byte = self.mailbox[8].read().unwrap_or(0);
                self.mailbox[4].write(byte);
            }
            for _ in total_len..required {
                self.mailbox[4].write(0);
            }
        }

        self.update_irq_f1(host, irqs);
    }

    pub(crate) fn ms_timer(&mut self, host: &mut SdHost, cx: &mut HostCx) {
        self.beacon_timer += 1;

        if self.scan_timer > 0 {
            self.scan_timer -= 1;

            if self.beacon_timer & 0x7F == 0 {
                let beacon = [
                    // timestamp
                    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
                    // beacon interval
                    0x80, 0x00,
                    // capability
                    0x21, 0x00,
                    // supported rates
                    0x01, 0x08, 0x82, 0x84, 0x8B, 0x96, 0x0C, 0x12, 0x18, 0x24,
                    // channel
                    0x03, 0x01, 0x06,
                    // TIM
                    0x05, 0x04, 0x00, 0x00, 0x00, 0x00,
                    // SSID
                    0x00, AP_SSID.len() as u8, AP_SSID[0], AP_SSID[1], AP_SSID[2], AP_SSID[3],
                    AP_SSID[4],
                ];
                self.send_wmi_bss_info(0x01, &beacon, host, cx.irqs);
            }

            if self.scan_timer == 0 {
                let status = 0u32.to_le_bytes();
                self.send_wmi_event(1, 0x100A, &status, host, cx.irqs);
            }
        }

        if self.connection_status == 1 {
            self.check_rx(host, cx.irqs);
        }

        cx.schedule.schedule(Event::NWifiTimer, true, MS_CYCLES, 0);
    }

    pub(crate) fn do_savestate(&mut self, file: &mut Savestate) {
        file.section(*b"NWFi");

        for mailbox in &mut self.mailbox {
            mailbox.do_savestate(file);
        }

        file.var_u8(&mut self.f0_irq_enable);
        file.var_u8(&mut self.f0_irq_status);

        file.var_u8(&mut self.f1_irq_enable);
        file.var_u8(&mut self.f1_irq_enable_cpu);
        file.var_u8(&mut self.f1_irq_enable_error);
        file.var_u8(&mut self.f1_irq_enable_counter);
        file.var_u8(&mut self.f1_irq_status);
        file.var_u8(&mut self.f1_irq_status_cpu);
        file.var_u8(&mut self.f1_irq_status_error);
        file.var_u8(&mut self.f1_irq_status_counter);

        file.var_u32(&mut self.window_data);
        file.var_u32(&mut self.window_read_addr);
        file.var_u32(&mut self.window_write_addr);

        file.var_u32(&mut self.rom_id);
        file.var_u32(&mut self.chip_id);
        file.var_u32(&mut self.host_int_addr);

        file.bytes(&mut self.eeprom);
        file.var_u32(&mut self.eeprom_ready);

        file.var_u32(&mut self.boot_phase);

        file.var_u32(&mut self.error_mask);
        file.var_u32(&mut self.scan_timer);

        file.var_u64(&mut self.beacon_timer);
        file.var_u32(&mut self.connection_status);
    }
}

pub(crate) fn ms_timer_event(emu: &mut Emu) {
    let Some(mut port) = emu.sdio.ports[0].take() else {
        return;
    };
    if let Port::Wifi(wifi) = &mut port {
        let Emu {
            sdio,
            schedule,
            arm7_irqs,
            ndma,
            ..
        } = emu;
        let mut cx = HostCx {
            schedule,
            irqs: arm7_irqs,
            ndma,
        };
        wifi.ms_timer(sdio, &mut cx);
    }
    emu.sdio.ports[0] = Some(port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::irqs::Irqs;
    use crate::emu::schedule::Schedule;
    use crate::ndma::Ndma;
    use crate::sdmmc::SdHost;

    struct TestLan {
        incoming: Vec<u8>,
        sent: Vec<Vec<u8>>,
    }

    impl LanBackend for TestLan {
        fn send_packet(&mut self, data: &[u8]) {
            self.sent.push(data.to_vec());
        }

        fn recv_packet(&mut self, buf: &mut [u8]) -> usize {
            if self.incoming.is_empty() {
                return 0;
            }
            let len = self.incoming.len();
            buf[..len].copy_from_slice(&self.incoming);
            self.incoming.clear();
            len
        }
    }

    const MAC: [u8; 6] = [0x00, 0x09, 0xBF, 0x0E, 0x49, 0x16];

    fn fixture(incoming: Vec<u8>) -> (NWifi, SdHost, Schedule, Irqs, Ndma) {
        let mut schedule = Schedule::new();
        let mut wifi = NWifi::new(
            MAC,
            WifiBoard::W015,
            Box::new(TestLan {
                incoming,
                sent: Vec::new(),
            }),
            #[cfg(feature = "log")]
            slog::Logger::root(slog::Discard, slog::o!()),
        );
        wifi.reset(&mut schedule);
        let host = SdHost::new(
            1,
            #[cfg(feature = "log")]
            slog::Logger::root(slog::Discard, slog::o!()),
        );
        (wifi, host, schedule, Irqs::new(), Ndma::new())
    }

    #[test]
    fn own_transmissions_are_dropped_on_receive() {
        let mut frame = vec![0xFF; 6];
        frame.extend_from_slice(&MAC);
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&[0x11; 32]);

        let (mut wifi, mut host, _schedule, mut irqs, _ndma) = fixture(frame);
        wifi.connection_status = 1;
        wifi.check_rx(&mut host, &mut irqs);
        assert!(wifi.mailbox[4].is_empty());
    }

    #[test]
    fn broadcast_frames_reach_the_rx_mailbox() {
        let mut frame = vec![0xFF; 6];
        frame.extend_from_slice(&[0x02, 0x22, 0x33, 0x44, 0x55, 0x66]);
        frame.extend_from_slice(&[0x08, 0x00]);
        frame.extend_from_slice(&[0x11; 32]);

        let (mut wifi, mut host, _schedule, mut irqs, _ndma) = fixture(frame);
        wifi.connection_status = 1;
        wifi.check_rx(&mut host, &mut irqs);
        // one frame, padded to a 128-byte boundary
        assert_eq!(wifi.mailbox[4].level(), 128);
    }

    #[test]
    fn bmi_done_advances_to_the_htc_phase() {
        let (mut wifi, mut host, mut schedule, mut irqs, mut ndma) = fixture(Vec::new());
        let mut cx = HostCx {
            schedule: &mut schedule,
            irqs: &mut irqs,
            ndma: &mut ndma,
        };

        for byte in 0x01_u32.to_le_bytes() {
            wifi.mailbox[0].write(byte);
        }
        wifi.handle_command(&mut host, &mut cx);

        assert_eq!(wifi.boot_phase, PHASE_HTC);
        // the ready event is staged for the host
        assert!(!wifi.mailbox[4].is_empty());
    }

    #[test]
    fn htc_setup_complete_enters_wmi_and_starts_the_timer() {
        let (mut wifi, mut host, mut schedule, mut irqs, mut ndma) = fixture(Vec::new());
        let mut cx = HostCx {
            schedule: &mut schedule,
            irqs: &mut irqs,
            ndma: &mut ndma,
        };

        wifi.boot_phase = PHASE_HTC;
        // header, length, flags, then the setup-complete command
        for value in [0x0000_u16, 2, 0, 0x0004] {
            wifi.mb_write16(0, value);
        }
        wifi.handle_command(&mut host, &mut cx);

        assert_eq!(wifi.boot_phase, PHASE_WMI);
        assert!(cx.schedule.is_scheduled(Event::NWifiTimer));
    }

    #[test]
    fn scan_produces_beacons_and_a_completion_event() {
        let (mut wifi, mut host, mut schedule, mut irqs, mut ndma) = fixture(Vec::new());
        let mut cx = HostCx {
            schedule: &mut schedule,
            irqs: &mut irqs,
            ndma: &mut ndma,
        };

        wifi.boot_phase = PHASE_WMI;
        wifi.scan_timer = 2;
        wifi.beacon_timer = 0x7F;

        wifi.ms_timer(&mut host, &mut cx);
        // beacon_timer hit a 128 ms boundary: a BSSINFO event was staged
        assert!(!wifi.mailbox[4].is_empty());

        while !wifi.mailbox[4].is_empty() {
            wifi.mailbox[4].read();
        }
        wifi.ms_timer(&mut host, &mut cx);
        // scan timer expired: the scan-complete event follows
        assert!(!wifi.mailbox[4].is_empty());
    }
}
