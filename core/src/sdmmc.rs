//! The two SD host controllers: one carrying the internal eMMC and the
//! external SD card, one carrying the SDIO Wi-Fi module. Each host owns its
//! command pipeline, the ping-ponged 16-bit data FIFOs plus the 32-bit FIFO,
//! IRQ and card-IRQ routing, and the transfer-completion events.

pub mod card;

use crate::{
    emu::{
        irqs::{irq2, Irqs},
        schedule::{Event, Schedule},
        Emu,
    },
    ndma::{self, Ndma},
    utils::{Fifo, Savestate},
    wifi::NWifi,
};
use card::MmcCard;

pub const TRANSFER_TX: u32 = 0;
pub const TRANSFER_RX: u32 = 1;

/// External state every host/device operation may touch: the scheduler for
/// completion delays, the ARM7 IRQ latches, and the NDMA engine for the
/// FIFO-threshold triggers.
pub struct HostCx<'a> {
    pub schedule: &'a mut Schedule,
    pub irqs: &'a mut Irqs,
    pub ndma: &'a mut Ndma,
}

pub enum Port {
    Mmc(MmcCard),
    Wifi(Box<NWifi>),
}

impl Port {
    fn reset(&mut self, schedule: &mut Schedule) {
        match self {
            Port::Mmc(card) => card.reset(),
            Port::Wifi(wifi) => wifi.reset(schedule),
        }
    }

    fn send_cmd(&mut self, host: &mut SdHost, cx: &mut HostCx, cmd: u8, param: u32) {
        match self {
            Port::Mmc(card) => card.send_cmd(host, cx, cmd, param),
            Port::Wifi(wifi) => wifi.send_cmd(host, cx, cmd, param),
        }
    }

    fn continue_transfer(&mut self, host: &mut SdHost, cx: &mut HostCx) {
        match self {
            Port::Mmc(card) => card.continue_transfer(host, cx),
            Port::Wifi(wifi) => wifi.continue_transfer(host, cx),
        }
    }

    fn irq(&self) -> bool {
        match self {
            Port::Mmc(_) => false,
            Port::Wifi(wifi) => wifi.irq,
        }
    }

    fn read_only(&self) -> bool {
        match self {
            Port::Mmc(card) => card.read_only(),
            Port::Wifi(_) => false,
        }
    }

    fn do_savestate(&mut self, file: &mut Savestate) {
        match self {
            Port::Mmc(card) => card.do_savestate(file),
            Port::Wifi(wifi) => wifi.do_savestate(file),
        }
    }
}

pub struct SdHost {
    #[cfg(feature = "log")]
    logger: slog::Logger,
    num: u8,

    port_select: u16,
    soft_reset: u16,
    sd_clock: u16,
    sd_option: u16,

    irq_status: u32,
    irq_mask: u32,

    card_irq_status: u16,
    card_irq_mask: u16,
    card_irq_ctl: u16,

    data_ctl: u16,
    data32_irq: u16,
    data_mode32: bool,
    block_count16: u16,
    block_count32: u16,
    block_count_internal: u16,
    block_len16: u16,
    block_len32: u16,
    stop_action: u16,

    command: u16,
    param: u32,
    response: [u16; 8],

    cur_fifo: usize,
    data_fifo: [Fifo<u16, 0x100>; 2],
    data_fifo32: Fifo<u32, 0x80>,
    pub tx_req: bool,

    pub ports: [Option<Port>; 2],
}

impl SdHost {
    pub(crate) fn new(num: u8, #[cfg(feature = "log")] logger: slog::Logger) -> Self {
        SdHost {
            #[cfg(feature = "log")]
            logger,
            num,
            port_select: 0,
            soft_reset: 0,
            sd_clock: 0,
            sd_option: 0,
            irq_status: 0,
            irq_mask: 0,
            card_irq_status: 0,
            card_irq_mask: 0,
            card_irq_ctl: 0,
            data_ctl: 0,
            data32_irq: 0,
            data_mode32: false,
            block_count16: 0,
            block_count32: 0,
            block_count_internal: 0,
            block_len16: 0,
            block_len32: 0,
            stop_action: 0,
            command: 0,
            param: 0,
            response: [0; 8],
            cur_fifo: 0,
            data_fifo: [Fifo::new(), Fifo::new()],
            data_fifo32: Fifo::new(),
            tx_req: false,
            ports: [None, None],
        }
    }

    #[inline]
    pub fn is_sdio(&self) -> bool {
        self.num != 0
    }

    fn transfer_event(&self) -> Event {
        if self.is_sdio() {
            Event::SdioTransfer
        } else {
            Event::SdmmcTransfer
        }
    }

    fn irq2_line(&self) -> u32 {
        if self.is_sdio() {
            irq2::SDIO
        } else {
            irq2::SDMMC
        }
    }

    fn irq2_data1_line(&self) -> u32 {
        if self.is_sdio() {
            irq2::SDIO_DATA1
        } else {
            irq2::SD_DATA1
        }
    }

    fn dma_mode(&self) -> u32 {
        if self.is_sdio() {
            ndma::MODE_SDIO
        } else {
            ndma::MODE_SDMMC
        }
    }

    pub(crate) fn reset(&mut self, schedule: &mut Schedule) {
        self.port_select = if self.num == 0 { 0x0200 } else { 0x0100 };

        self.soft_reset = 0x0007;
        self.sd_clock = 0;
        self.sd_option = 0;

        self.command = 0;
        self.param = 0;
        self.response = [0; 8];

        self.data_fifo[0].clear();
        self.data_fifo[1].clear();
        self.cur_fifo = 0;
        self.data_fifo32.clear();

        self.irq_status = 0;
        self.irq_mask = 0x8B7F_031D;

        self.card_irq_status = 0;
        self.card_irq_mask = 0xC007;
        self.card_irq_ctl = 0;

        self.data_ctl = 0;
        self.data32_irq = 0;
        self.data_mode32 = false;
        self.block_count16 = 0;
        self.block_count32 = 0;
        self.block_count_internal = 0;
        self.block_len16 = 0;
        self.block_len32 = 0;
        self.stop_action = 0;

        self.tx_req = false;

        for port in self.ports.iter_mut().flatten() {
            port.reset(schedule);
        }
    }

    fn update_data32_irq(&mut self, irqs: &mut Irqs) {
        if !self.data_mode32 {
            return;
        }

        let old_flags = (((self.data32_irq >> 8) & 0x1) | ((!self.data32_irq >> 8) & 0x2))
            & (self.data32_irq >> 11);

        self.data32_irq &= !0x0300;
        if self.data_fifo32.level() >= (self.block_len32 >> 2) as usize {
            self.data32_irq |= 1 << 8;
        }
        if !self.data_fifo32.is_empty() {
            self.data32_irq |= 1 << 9;
        }

        let new_flags = (((self.data32_irq >> 8) & 0x1) | ((!self.data32_irq >> 8) & 0x2))
            & (self.data32_irq >> 11);

        if old_flags == 0 && new_flags != 0 {
            irqs.set_irq2(self.irq2_line());
        }
    }

    fn set_irq(&mut self, line: u32, irqs: &mut Irqs) {
        let old_flags = self.irq_status & !self.irq_mask;
        self.irq_status |= 1 << line;
        let new_flags = self.irq_status & !self.irq_mask;

        if old_flags == 0 && new_flags != 0 {
            irqs.set_irq2(self.irq2_line());
        }
    }

    fn update_irq(&mut self, old_mask: u32, irqs: &mut Irqs) {
        let old_flags = self.irq_status & !old_mask;
        let new_flags = self.irq_status & !self.irq_mask;

        if old_flags == 0 && new_flags != 0 {
            irqs.set_irq2(self.irq2_line());
        }
    }

    pub(crate) fn set_card_irq(&mut self, irqs: &mut Irqs) {
        let dev_irq = self.ports[(self.port_select & 0x1) as usize]
            .as_ref()
            .map_or(false, Port::irq);
        self.set_card_irq_from_dev(dev_irq, irqs);
    }

    /// Card-IRQ update when the active device is detached from the port table
    /// (mid-callback); the device passes its own IRQ line state.
    pub(crate) fn set_card_irq_from_dev(&mut self, dev_irq: bool, irqs: &mut Irqs) {
        if self.card_irq_ctl & (1 << 0) == 0 {
            return;
        }

        let old_flags = self.card_irq_status & !self.card_irq_mask;

        if dev_irq {
            self.card_irq_status |= 1 << 0;
        } else {
            self.card_irq_status &= !(1 << 0);
        }

        let new_flags = self.card_irq_status & !self.card_irq_mask;

        if old_flags == 0 && new_flags != 0 {
            irqs.set_irq2(self.irq2_line());
            irqs.set_irq2(self.irq2_data1_line());
        }
    }

    fn update_card_irq(&mut self, old_mask: u16, irqs: &mut Irqs) {
        let old_flags = self.card_irq_status & !old_mask;
        let new_flags = self.card_irq_status & !self.card_irq_mask;

        if old_flags == 0 && new_flags != 0 {
            irqs.set_irq2(self.irq2_line());
            irqs.set_irq2(self.irq2_data1_line());
        }
    }

    /// Pushes one response long; responses accumulate newest-first across the
    /// eight 16-bit response registers. The final long raises the
    /// command-response IRQ.
    pub(crate) fn send_response(&mut self, value: u32, last: bool, irqs: &mut Irqs) {
        self.response.copy_within(4..6, 6);
        self.response.copy_within(2..4, 4);
        self.response.copy_within(0..2, 2);
        self.response[0] = value as u16;
        self.response[1] = (value >> 16) as u16;

        if last {
            self.set_irq(0, irqs);
        }
    }

    /// Card-to-host data: fills the inactive 16-bit FIFO and schedules the
    /// receive-completion edge. The delay matters: boot code sends a command
    /// and polls IRQ0 before the data IRQ may fire.
    pub(crate) fn data_rx(&mut self, data: &[u8], cx: &mut HostCx) -> u32 {
        let mut len = data.len();
        if len != self.block_len16 as usize {
            #[cfg(feature = "log")]
            slog::warn!(self.logger, "Bad block length {} (expected {})", len, self.block_len16);
            len = (self.block_len16 as usize).min(data.len());
        }

        let fifo = self.cur_fifo ^ 1;
        for i in (0..len).step_by(2) {
            let halfword = u16::from_le_bytes([data[i], *data.get(i + 1).unwrap_or(&0)]);
            self.data_fifo[fifo].write(halfword);
        }

        cx.schedule
            .schedule(self.transfer_event(), false, 512, TRANSFER_RX);

        len as u32
    }

    /// Host-to-card data: drains one block out of the FIFOs into `data`.
    /// Returns 0 when a full block is not buffered yet (the device retries on
    /// the next FIFO write).
    pub(crate) fn data_tx(&mut self, data: &mut [u8], len: usize, cx: &mut HostCx) -> u32 {
        self.tx_req = true;

        let fifo = self.cur_fifo;

        if self.data_mode32 {
            if self.data_fifo32.level() << 2 < len {
                if self.data_fifo32.is_empty() {
                    self.set_irq(25, cx.irqs);
                    cx.ndma.check(1, self.dma_mode());
                }
                return 0;
            }

            #[cfg(feature = "log")]
            if !self.data_fifo[fifo].is_empty() {
                slog::warn!(self.logger, "Draining FIFO32 into a non-empty 16-bit FIFO");
            }
            loop {
                if self.data_fifo[self.cur_fifo].level() << 1 >= self.block_len16 as usize {
                    break;
                }
                let Some(value) = self.data_fifo32.read() else {
                    break;
                };
                self.data_fifo[self.cur_fifo].write(value as u16);
                self.data_fifo[self.cur_fifo].write((value >> 16) as u16);
            }

            self.update_data32_irq(cx.irqs);

            if self.block_count32 > 1 {
                self.block_count32 -= 1;
            }
        } else if self.data_fifo[fifo].level() << 1 < len {
            if self.data_fifo[fifo].is_empty() {
                self.set_irq(25, cx.irqs);
            }
            return 0;
        }

        for i in (0..len).step_by(2) {
            let halfword = self.data_fifo[fifo].read().unwrap_or(0);
            data[i] = halfword as u8;
            if i + 1 < len {
                data[i + 1] = (halfword >> 8) as u8;
            }
        }

        self.cur_fifo ^= 1;
        self.block_count_internal = self.block_count_internal.wrapping_sub(1);

        cx.schedule
            .schedule(self.transfer_event(), false, 512, TRANSFER_TX);

        len as u32
    }

    #[inline]
    pub(crate) fn get_transferrable_len(&self, len: u32) -> u32 {
        len.min(self.block_len16 as u32)
    }

    fn with_active_port(
        &mut self,
        cx: &mut HostCx,
        f: impl FnOnce(&mut Port, &mut SdHost, &mut HostCx),
    ) {
        let index = (self.port_select & 0x1) as usize;
        if let Some(mut port) = self.ports[index].take() {
            f(&mut port, self, cx);
            self.ports[index] = Some(port);
        }
    }

    pub(crate) fn finish_rx(&mut self, cx: &mut HostCx) {
        self.check_swap_fifo();

        if self.data_mode32 {
            self.update_fifo32(cx);
        } else {
            self.set_irq(24, cx.irqs);
        }
    }

    pub(crate) fn finish_tx(&mut self, cx: &mut HostCx) {
        if self.block_count_internal == 0 {
            if self.stop_action & (1 << 8) != 0 {
                self.with_active_port(cx, |port, host, cx| port.send_cmd(host, cx, 12, 0));
            }

            self.set_irq(2, cx.irqs);
            self.tx_req = false;
        } else {
            self.with_active_port(cx, |port, host, cx| port.continue_transfer(host, cx));
        }
    }

    fn check_rx(&mut self, cx: &mut HostCx) {
        self.check_swap_fifo();

        if self.block_count_internal <= 1 {
            if self.stop_action & (1 << 8) != 0 {
                self.with_active_port(cx, |port, host, cx| port.send_cmd(host, cx, 12, 0));
            }

            self.set_irq(2, cx.irqs);
        } else {
            self.block_count_internal -= 1;
            self.with_active_port(cx, |port, host, cx| port.continue_transfer(host, cx));
        }
    }

    fn check_tx(&mut self, cx: &mut HostCx) {
        if !self.tx_req {
            return;
        }

        if self.data_mode32 {
            if self.data_fifo32.level() << 2 < self.block_len32 as usize {
                return;
            }
        } else if self.data_fifo[self.cur_fifo].level() << 1 < self.block_len16 as usize {
            return;
        }

        self.with_active_port(cx, |port, host, cx| port.continue_transfer(host, cx));
    }

    pub fn read16(&mut self, addr: u32, cx: &mut HostCx) -> u16 {
        match addr & 0x1FF {
            0x000 => self.command,
            0x002 => self.port_select & 0x030F,
            0x004 => self.param as u16,
            0x006 => (self.param >> 16) as u16,

            0x008 => self.stop_action,
            0x00A => self.block_count16,

            0x00C => self.response[0],
            0x00E => self.response[1],
            0x010 => self.response[2],
            0x012 => self.response[3],
            0x014 => self.response[4],
            0x016 => self.response[5],
            0x018 => self.response[6],
            0x01A => self.response[7],

            0x01C => {
                let mut result = (self.irq_status & 0x031D) as u16;
                if self.num == 0 {
                    // SD card inserted / not write-protected
                    if let Some(port) = &self.ports[0] {
                        result |= 0x0020;
                        if !port.read_only() {
                            result |= 0x0080;
                        }
                    }
                } else {
                    // the SDIO module is soldered in
                    result |= 0x00A0;
                }
                result
            }
            0x01E => ((self.irq_status >> 16) & 0x8B7F) as u16,
            0x020 => (self.irq_mask & 0x031D) as u16,
            0x022 => ((self.irq_mask >> 16) & 0x8B7F) as u16,

            0x024 => self.sd_clock,
            0x026 => self.block_len16,
            0x028 => self.sd_option,

            0x02C => 0,

            0x030 => self.read_fifo16(cx),

            0x034 => self.card_irq_ctl,
            0x036 => self.card_irq_status,
            0x038 => self.card_irq_mask,

            0x0D8 => self.data_ctl,

            0x0E0 => self.soft_reset,

            // MMC write protect
            0x0F6 => 0,

            0x100 => self.data32_irq,
            0x102 => 0,
            0x104 => self.block_len32,
            0x108 => self.block_count32,

            0x106 | 0x10A => 0,

            _ => {
                #[cfg(feature = "log")]
                slog::warn!(self.logger, "Unknown read @ {:#05X}", addr & 0x1FF);
                0
            }
        }
    }

    pub fn write16(&mut self, addr: u32, value: u16, cx: &mut HostCx) {
        match addr & 0x1FF {
            0x000 => {
                self.command = value;
                let cmd = (value & 0x3F) as u8;
                let param = self.param;

                match (value >> 6) & 0x3 {
                    0 | 1 => {
                        // command type 1 is an ACMD; boot code sends the
                        // CMD55 prefix manually as well, so the device's
                        // app-command latch does the disambiguation
                        self.with_active_port(cx, |port, host, cx| {
                            port.send_cmd(host, cx, cmd, param);
                        });
                    }
                    _ => {
                        #[cfg(feature = "log")]
                        slog::warn!(
                            self.logger,
                            "Unknown command type {}, {:#04X} {:#010X}",
                            (value >> 6) & 0x3,
                            cmd,
                            param
                        );
                    }
                }
            }

            0x002 => self.port_select = (value & 0x040F) | (self.port_select & 0x0300),
            0x004 => self.param = (self.param & 0xFFFF_0000) | value as u32,
            0x006 => self.param = (self.param & 0x0000_FFFF) | ((value as u32) << 16),

            0x008 => self.stop_action = value & 0x0101,
            0x00A => {
                self.block_count16 = value;
                self.block_count_internal = value;
            }

            0x01C => self.irq_status &= value as u32 | 0xFFFF_0000,
            0x01E => self.irq_status &= ((value as u32) << 16) | 0xFFFF,
            0x020 => {
                let old_mask = self.irq_mask;
                self.irq_mask = (self.irq_mask & 0x8B7F_0000) | (value & 0x031D) as u32;
                self.update_irq(old_mask, cx.irqs);
            }
            0x022 => {
                let old_mask = self.irq_mask;
                self.irq_mask = (self.irq_mask & 0x0000_031D) | (((value & 0x8B7F) as u32) << 16);
                self.update_irq(old_mask, cx.irqs);
            }

            0x024 => self.sd_clock = value & 0x03FF,
            0x026 => self.block_len16 = (value & 0x03FF).min(0x200),
            0x028 => self.sd_option = value & 0xC1FF,

            0x030 => self.write_fifo16(value, cx),

            0x034 => {
                self.card_irq_ctl = value & 0x0305;
                self.set_card_irq(cx.irqs);
            }
            0x036 => self.card_irq_status &= value,
            0x038 => {
                let old_mask = self.card_irq_mask;
                self.card_irq_mask = value & 0xC007;
                self.update_card_irq(old_mask, cx.irqs);
            }

            0x0D8 => {
                self.data_ctl = value & 0x0022;
                self.data_mode32 = self.data_ctl & 0x2 != 0 && self.data32_irq & 0x2 != 0;
            }

            0x0E0 => {
                if self.soft_reset & 0x0001 != 0 && value & 0x0001 == 0 {
                    #[cfg(feature = "log")]
                    slog::debug!(self.logger, "Soft reset");
                    self.stop_action = 0;
                    self.response = [0; 8];
                    self.irq_status = 0;
                    self.sd_clock &= !0x0500;
                    self.sd_option = 0x40EE;

                    let mut ports = core::mem::take(&mut self.ports);
                    for port in ports.iter_mut().flatten() {
                        port.reset(cx.schedule);
                    }
                    self.ports = ports;
                }
                self.soft_reset = 0x0006 | (value & 0x0001);
            }

            0x100 => {
                self.data32_irq = (value & 0x1802) | (self.data32_irq & 0x0300);
                if value & (1 << 10) != 0 {
                    self.data_fifo32.clear();
                }
                self.data_mode32 = self.data_ctl & 0x2 != 0 && self.data32_irq & 0x2 != 0;
            }
            0x102 => {}
            0x104 => self.block_len32 = value & 0x03FF,
            0x108 => self.block_count32 = value,

            0x106 | 0x10A => {}

            _ => {
                #[cfg(feature = "log")]
                slog::warn!(
                    self.logger,
                    "Unknown write @ {:#05X}: {:#06X}",
                    addr & 0x1FF,
                    value
                );
            }
        }
    }

    pub fn read_fifo16(&mut self, cx: &mut HostCx) -> u16 {
        // reads from an empty FIFO return 0; hardware wraps around instead
        let Some(result) = self.data_fifo[self.cur_fifo].read() else {
            return 0;
        };

        if self.data_fifo[self.cur_fifo].is_empty() {
            self.check_rx(cx);
        }

        result
    }

    pub fn write_fifo16(&mut self, value: u16, cx: &mut HostCx) {
        if self.data_fifo[self.cur_fifo].is_full() {
            #[cfg(feature = "log")]
            slog::warn!(self.logger, "16-bit FIFO full");
            return;
        }

        self.data_fifo[self.cur_fifo].write(value);

        self.check_tx(cx);
    }

    pub fn read_fifo32(&mut self, cx: &mut HostCx) -> u32 {
        if !self.data_mode32 {
            return 0;
        }

        let Some(result) = self.data_fifo32.read() else {
            return 0;
        };

        if self.data_fifo32.is_empty() {
            self.check_rx(cx);
        }

        self.update_data32_irq(cx.irqs);

        result
    }

    pub fn write_fifo32(&mut self, value: u32, cx: &mut HostCx) {
        if !self.data_mode32 {
            return;
        }

        if self.data_fifo32.is_full() {
            #[cfg(feature = "log")]
            slog::warn!(self.logger, "32-bit FIFO full");
            return;
        }

        self.data_fifo32.write(value);

        self.check_tx(cx);

        self.update_data32_irq(cx.irqs);
    }

    /// Drains a completed 16-bit FIFO block into the 32-bit FIFO, kicking the
    /// SD-host NDMA source once a full block is buffered.
    fn update_fifo32(&mut self, cx: &mut HostCx) {
        if !self.data_mode32 {
            return;
        }

        #[cfg(feature = "log")]
        if !self.data_fifo32.is_empty() {
            slog::warn!(self.logger, "Draining FIFO16 into a non-empty FIFO32");
        }
        loop {
            if self.data_fifo32.level() << 2 >= self.block_len32 as usize {
                break;
            }
            let fifo = self.cur_fifo;
            let Some(low) = self.data_fifo[fifo].read() else {
                break;
            };
            let high = self.data_fifo[fifo].read().unwrap_or(0);
            self.data_fifo32.write(low as u32 | ((high as u32) << 16));
        }

        self.update_data32_irq(cx.irqs);

        if self.data_fifo32.level() << 2 >= self.block_len32 as usize {
            cx.ndma.check(1, self.dma_mode());
        }
    }

    fn check_swap_fifo(&mut self) {
        let fifo = self.cur_fifo;
        let cur_empty = if self.data_mode32 {
            self.data_fifo32.is_empty()
        } else {
            self.data_fifo[fifo].is_empty()
        };
        if cur_empty && self.data_fifo[fifo ^ 1].level() << 1 >= self.block_len16 as usize {
            self.cur_fifo ^= 1;
        }
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        file.section(if self.is_sdio() { *b"SDIO" } else { *b"SDMM" });

        file.var_u16(&mut self.port_select);
        file.var_u16(&mut self.soft_reset);
        file.var_u16(&mut self.sd_clock);
        file.var_u16(&mut self.sd_option);

        file.var_u32(&mut self.irq_status);
        file.var_u32(&mut self.irq_mask);

        file.var_u16(&mut self.card_irq_status);
        file.var_u16(&mut self.card_irq_mask);
        file.var_u16(&mut self.card_irq_ctl);

        file.var_u16(&mut self.data_ctl);
        file.var_u16(&mut self.data32_irq);
        file.var_bool32(&mut self.data_mode32);
        file.var_u16(&mut self.block_count16);
        file.var_u16(&mut self.block_count32);
        file.var_u16(&mut self.block_count_internal);
        file.var_u16(&mut self.block_len16);
        file.var_u16(&mut self.block_len32);
        file.var_u16(&mut self.stop_action);

        file.var_u16(&mut self.command);
        file.var_u32(&mut self.param);
        for i in 0..8 {
            file.var_u16(&mut self.response[i]);
        }

        let mut cur_fifo = self.cur_fifo as u32;
        file.var_u32(&mut cur_fifo);
        self.cur_fifo = (cur_fifo & 1) as usize;
        self.data_fifo[0].do_savestate(file);
        self.data_fifo[1].do_savestate(file);
        self.data_fifo32.do_savestate(file);

        for port in self.ports.iter_mut().flatten() {
            port.do_savestate(file);
        }
    }
}

fn host_parts(emu: &mut Emu, sdio: bool) -> (&mut SdHost, HostCx<'_>) {
    let Emu {
        sdmmc,
        sdio: sdio_host,
        schedule,
        arm7_irqs,
        ndma,
        ..
    } = emu;
    (
        if sdio { sdio_host } else { sdmmc },
        HostCx {
            schedule,
            irqs: arm7_irqs,
            ndma,
        },
    )
}

pub fn read16(emu: &mut Emu, sdio: bool, addr: u32) -> u16 {
    let (host, mut cx) = host_parts(emu, sdio);
    host.read16(addr, &mut cx)
}

pub fn write16(emu: &mut Emu, sdio: bool, addr: u32, value: u16) {
    let (host, mut cx) = host_parts(emu, sdio);
    host.write16(addr, value, &mut cx);
}

pub fn read_fifo32(emu: &mut Emu, sdio: bool) -> u32 {
    let (host, mut cx) = host_parts(emu, sdio);
    host.read_fifo32(&mut cx)
}

pub fn write_fifo32(emu: &mut Emu, sdio: bool, value: u32) {
    let (host, mut cx) = host_parts(emu, sdio);
    host.write_fifo32(value, &mut cx);
}

pub(crate) fn transfer_event(emu: &mut Emu, sdio: bool, param: u32) {
    let (host, mut cx) = host_parts(emu, sdio);
    if param == TRANSFER_RX {
        host.finish_rx(&mut cx);
    } else {
        host.finish_tx(&mut cx);
    }
}
