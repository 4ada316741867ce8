//! The DSi's second DMA engine: eight channels (four per CPU) with
//! block/subblock semantics and fill mode, triggered by start modes that
//! cover the DSi-only peripherals (AES FIFOs, camera, SD hosts) as well as
//! the classic NDS sources.

use crate::{
    aes, bus,
    emu::{irqs::irq, Emu},
    utils::Savestate,
};

pub const MODE_IMMEDIATE: u32 = 0x10;
pub const MODE_CAMERA: u32 = 0x0B;
pub const MODE_SDMMC: u32 = 0x28;
pub const MODE_SDIO: u32 = 0x29;
pub const MODE_AES_IN: u32 = 0x2A;
pub const MODE_AES_OUT: u32 = 0x2B;

#[derive(Clone)]
pub struct Channel {
    pub src_addr: u32,
    pub dst_addr: u32,
    pub total_length: u32,
    pub block_length: u32,
    pub subblock_timer: u32,
    pub fill_data: u32,
    pub cnt: u32,

    start_mode: u32,
    cur_src_addr: u32,
    cur_dst_addr: u32,
    rem_count: u32,
    iter_count: u32,
    total_rem_count: u32,
    src_addr_inc: i32,
    dst_addr_inc: i32,

    running: u32,
    in_progress: bool,
    executing: bool,
    stall: bool,
}

impl Channel {
    fn new() -> Self {
        Channel {
            src_addr: 0,
            dst_addr: 0,
            total_length: 0,
            block_length: 0,
            subblock_timer: 0,
            fill_data: 0,
            cnt: 0,
            start_mode: 0,
            cur_src_addr: 0,
            cur_dst_addr: 0,
            rem_count: 0,
            iter_count: 0,
            total_rem_count: 0,
            src_addr_inc: 0,
            dst_addr_inc: 0,
            running: 0,
            in_progress: false,
            executing: false,
            stall: false,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    #[inline]
    pub fn is_in_mode(&self, mode: u32) -> bool {
        mode == self.start_mode && self.cnt & 0x8000_0000 != 0
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.running != 0
    }

    fn start(&mut self) {
        if self.running != 0 {
            return;
        }

        if !self.in_progress {
            self.rem_count = self.block_length;
            if self.rem_count == 0 {
                self.rem_count = 0x100_0000;
            }
        }

        // the GX FIFO source only accepts bursts of up to 112 words
        if self.start_mode == 0x0A && self.rem_count > 112 {
            self.iter_count = 112;
        } else {
            self.iter_count = self.rem_count;
        }

        if (self.start_mode & 0x1F) != MODE_IMMEDIATE && self.cnt & (1 << 29) == 0 {
            if self.iter_count > self.total_rem_count {
                self.iter_count = self.total_rem_count;
                self.rem_count = self.iter_count;
            }
        }

        if self.cnt & (1 << 12) != 0 {
            self.cur_dst_addr = self.dst_addr;
        }
        if self.cnt & (1 << 15) != 0 {
            self.cur_src_addr = self.src_addr;
        }

        self.running = 2;
        self.in_progress = true;
    }

    pub fn stall_if_executing(&mut self) {
        if self.executing {
            self.stall = true;
        }
    }

    fn start_if_needed(&mut self, mode: u32) {
        if mode == self.start_mode && self.cnt & 0x8000_0000 != 0 {
            self.start();
        }
    }

    fn stop_if_needed(&mut self, mode: u32) {
        if mode == self.start_mode {
            self.cnt &= !0x8000_0000;
        }
    }

    fn do_savestate(&mut self, file: &mut Savestate) {
        file.var_u32(&mut self.src_addr);
        file.var_u32(&mut self.dst_addr);
        file.var_u32(&mut self.total_length);
        file.var_u32(&mut self.block_length);
        file.var_u32(&mut self.subblock_timer);
        file.var_u32(&mut self.fill_data);
        file.var_u32(&mut self.cnt);

        file.var_u32(&mut self.start_mode);
        file.var_u32(&mut self.cur_src_addr);
        file.var_u32(&mut self.cur_dst_addr);
        file.var_u32(&mut self.rem_count);
        file.var_u32(&mut self.iter_count);
        file.var_u32(&mut self.total_rem_count);
        let mut src_inc = self.src_addr_inc as u32;
        let mut dst_inc = self.dst_addr_inc as u32;
        file.var_u32(&mut src_inc);
        file.var_u32(&mut dst_inc);
        self.src_addr_inc = src_inc as i32;
        self.dst_addr_inc = dst_inc as i32;

        file.var_u32(&mut self.running);
        file.var_bool32(&mut self.in_progress);
    }
}

pub struct Ndma {
    pub global_cnt: [u32; 2],
    pub channels: [Channel; 8],
}

impl Ndma {
    pub(crate) fn new() -> Self {
        Ndma {
            global_cnt: [0; 2],
            channels: [
                Channel::new(),
                Channel::new(),
                Channel::new(),
                Channel::new(),
                Channel::new(),
                Channel::new(),
                Channel::new(),
                Channel::new(),
            ],
        }
    }

    pub(crate) fn reset(&mut self) {
        self.global_cnt = [0; 2];
        for channel in &mut self.channels {
            channel.reset();
        }
    }

    pub fn check(&mut self, cpu: usize, mode: u32) {
        let base = cpu << 2;
        for channel in &mut self.channels[base..base + 4] {
            channel.start_if_needed(mode);
        }
    }

    pub fn stop(&mut self, cpu: usize, mode: u32) {
        let base = cpu << 2;
        for channel in &mut self.channels[base..base + 4] {
            channel.stop_if_needed(mode);
        }
    }

    pub fn any_in_mode(&self, cpu: usize, mode: u32) -> bool {
        let base = cpu << 2;
        self.channels[base..base + 4]
            .iter()
            .any(|channel| channel.is_in_mode(mode))
    }

    pub fn any_running(&self, cpu: usize) -> bool {
        let base = cpu << 2;
        self.channels[base..base + 4]
            .iter()
            .any(Channel::is_running)
    }

    /// Raised by a bus stall (the GX FIFO filling up); executing channels
    /// break out after the current word.
    pub fn stall_all(&mut self) {
        for channel in &mut self.channels {
            channel.stall_if_executing();
        }
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        for (i, channel) in self.channels.iter_mut().enumerate() {
            file.section([b'N', b'D', b'M', b'0' + i as u8]);
            channel.do_savestate(file);
        }
    }
}

pub fn write_cnt(emu: &mut Emu, index: usize, value: u32) {
    let channel = &mut emu.ndma.channels[index];
    let old = channel.cnt;
    channel.cnt = value;

    if old & 0x8000_0000 != 0 || value & 0x8000_0000 == 0 {
        return;
    }

    channel.cur_src_addr = channel.src_addr;
    channel.cur_dst_addr = channel.dst_addr;
    channel.total_rem_count = channel.total_length;

    channel.dst_addr_inc = match (channel.cnt >> 10) & 0x3 {
        0 => 1,
        1 => -1,
        2 => 0,
        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "NDMA{}: reserved destination increment mode", index);
            1
        }
    };
    channel.src_addr_inc = match (channel.cnt >> 13) & 0x3 {
        0 => 1,
        1 => -1,
        // 2 is fixed-address, 3 is fill mode
        _ => 0,
    };

    let cpu = index >> 2;
    let mut start_mode = (channel.cnt >> 24) & 0x1F;
    if start_mode > MODE_IMMEDIATE {
        start_mode = MODE_IMMEDIATE;
    }
    if cpu == 1 {
        start_mode |= 0x20;
    }
    channel.start_mode = start_mode;

    if start_mode & 0x1F == MODE_IMMEDIATE {
        channel.start();
    }

    #[cfg(feature = "log")]
    if start_mode <= 0x03
        || start_mode == 0x05
        || (0x0C..=0x0F).contains(&start_mode)
        || (0x20..=0x23).contains(&start_mode)
        || start_mode == 0x25
        || start_mode == 0x27
        || (0x2C..=0x2F).contains(&start_mode)
    {
        let channel = &emu.ndma.channels[index];
        slog::warn!(
            emu.logger,
            "Unimplemented ARM{} NDMA{} start mode {:#04X}, {:#010X}->{:#010X} len={} blk={}",
            if cpu == 1 { 7 } else { 9 },
            index & 3,
            start_mode,
            channel.src_addr,
            channel.dst_addr,
            channel.total_length,
            channel.block_length
        );
    }
}

/// Coarse 32-bit access costs: (main-RAM burst, cross-region) cycle pairs.
fn word_timing(addr: u32) -> (u64, u64) {
    match addr >> 24 {
        0x02 | 0x0C => (2, 10),
        0x04 => (4, 4),
        _ => (1, 1),
    }
}

fn unit_cycles(src: u32, dst: u32) -> u64 {
    if src >> 24 == 0x02 && dst >> 24 == 0x02 {
        word_timing(src).0 + word_timing(dst).0
    } else {
        let mut cycles = word_timing(src).1 + word_timing(dst).1;
        if src >> 24 == dst >> 24 {
            cycles += 1;
        } else if src >> 24 == 0x02 {
            cycles -= 1;
        }
        cycles
    }
}

pub(crate) fn run(emu: &mut Emu, cpu: usize) {
    if cpu == 0 {
        if emu.arm9_timestamp >= emu.arm9_target {
            return;
        }
        for i in 0..4 {
            run_channel(emu, i);
        }
    } else {
        if emu.arm7_timestamp >= emu.arm7_target {
            return;
        }
        for i in 4..8 {
            run_channel(emu, i);
        }
    }
}

fn run_channel(emu: &mut Emu, index: usize) {
    if emu.ndma.channels[index].running == 0 {
        return;
    }

    let cpu = index >> 2;
    if cpu == 0 {
        if emu.arm9_timestamp >= emu.arm9_target {
            return;
        }
    } else if emu.arm7_timestamp >= emu.arm7_target {
        return;
    }

    let (do_fill, fill_data, src_inc, dst_inc, unit) = {
        let channel = &mut emu.ndma.channels[index];
        channel.executing = true;
        channel.running = 1;
        (
            (channel.cnt >> 13) & 0x3 == 3,
            channel.fill_data,
            channel.src_addr_inc,
            channel.dst_addr_inc,
            unit_cycles(channel.cur_src_addr, channel.cur_dst_addr),
        )
    };

    loop {
        {
            let channel = &emu.ndma.channels[index];
            if channel.iter_count == 0 || channel.stall {
                break;
            }
        }

        if cpu == 0 {
            emu.arm9_timestamp += unit << emu.arm9_clock_shift;
        } else {
            emu.arm7_timestamp += unit;
        }

        let (src, dst) = {
            let channel = &emu.ndma.channels[index];
            (channel.cur_src_addr, channel.cur_dst_addr)
        };

        let word = if do_fill {
            fill_data
        } else if cpu == 0 {
            bus::arm9::read_32(emu, src)
        } else {
            bus::arm7::read_32(emu, src)
        };
        if cpu == 0 {
            bus::arm9::write_32(emu, dst, word);
        } else {
            bus::arm7::write_32(emu, dst, word);
        }

        {
            let channel = &mut emu.ndma.channels[index];
            channel.cur_src_addr = channel.cur_src_addr.wrapping_add((src_inc << 2) as u32);
            channel.cur_dst_addr = channel.cur_dst_addr.wrapping_add((dst_inc << 2) as u32);
            channel.iter_count -= 1;
            channel.rem_count -= 1;
            channel.total_rem_count = channel.total_rem_count.wrapping_sub(1);
        }

        if cpu == 0 {
            if emu.arm9_timestamp >= emu.arm9_target {
                break;
            }
        } else if emu.arm7_timestamp >= emu.arm7_target {
            break;
        }
    }

    let (yielded, fire_irq) = {
        let channel = &mut emu.ndma.channels[index];
        channel.executing = false;
        channel.stall = false;

        if channel.rem_count != 0 {
            if channel.iter_count == 0 {
                // subblock boundary: yield and wait for the next trigger
                channel.running = 0;
                (true, false)
            } else {
                return;
            }
        } else {
            let mut fire_irq = false;
            if channel.start_mode & 0x1F == MODE_IMMEDIATE
                || (channel.cnt & (1 << 29) == 0 && channel.total_rem_count == 0)
            {
                channel.cnt &= !0x8000_0000;
                fire_irq = channel.cnt & (1 << 30) != 0;
            }
            channel.running = 0;
            channel.in_progress = false;
            (true, fire_irq)
        }
    };

    if fire_irq {
        let line = irq::DSI_NDMA0 + (index & 3) as u32;
        if cpu == 0 {
            emu.arm9_irqs.set_irq(line);
        } else {
            emu.arm7_irqs.set_irq(line);
        }
    }

    if yielded && cpu == 1 {
        aes::check_input_dma(emu);
        aes::check_output_dma(emu);
    }
}
