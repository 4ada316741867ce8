use crate::{
    emu::{irqs::CpuId, Emu},
    ndma,
};

pub fn read_8(emu: &mut Emu, addr: u32) -> u8 {
    if addr >= 0xFFFF_0000 && emu.scfg.bios & (1 << 1) == 0 {
        if addr >= 0xFFFF_8000 && emu.scfg.bios & (1 << 0) != 0 {
            return 0xFF;
        }
        return emu.arm9i_bios.read_le(addr as usize & 0xFFFF);
    }

    match addr & 0xFF00_0000 {
        0x0200_0000 => emu.main_mem.read_le((addr & emu.main_mem_mask) as usize),

        0x0300_0000 => {
            if emu.scfg.nwram_enabled(0) {
                if let Some(value) = emu.nwram.read(0, addr) {
                    return value;
                }
            }
            // shared WRAM is routed entirely to the ARM7 here
            0
        }

        0x0400_0000 => io_read_8(emu, addr),

        0x0800_0000 | 0x0900_0000 | 0x0A00_0000 => {
            if emu.ex_mem_cnt & (1 << 7) != 0 {
                0
            } else {
                0xFF
            }
        }

        0x0C00_0000 => emu.main_mem.read_le((addr & emu.main_mem_mask) as usize),

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM9 read8 @ {:#010X}", addr);
            0
        }
    }
}

pub fn read_16(emu: &mut Emu, addr: u32) -> u16 {
    let addr = addr & !1;

    if addr >= 0xFFFF_0000 && emu.scfg.bios & (1 << 1) == 0 {
        if addr >= 0xFFFF_8000 && emu.scfg.bios & (1 << 0) != 0 {
            return 0xFFFF;
        }
        return emu.arm9i_bios.read_le(addr as usize & 0xFFFF);
    }

    match addr & 0xFF00_0000 {
        0x0200_0000 => emu.main_mem.read_le((addr & emu.main_mem_mask) as usize),

        0x0300_0000 => {
            if emu.scfg.nwram_enabled(0) {
                if let Some(value) = emu.nwram.read(0, addr) {
                    return value;
                }
            }
            0
        }

        0x0400_0000 => io_read_16(emu, addr),

        0x0800_0000 | 0x0900_0000 | 0x0A00_0000 => {
            if emu.ex_mem_cnt & (1 << 7) != 0 {
                0
            } else {
                0xFFFF
            }
        }

        0x0C00_0000 => emu.main_mem.read_le((addr & emu.main_mem_mask) as usize),

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM9 read16 @ {:#010X}", addr);
            0
        }
    }
}

pub fn read_32(emu: &mut Emu, addr: u32) -> u32 {
    let addr = addr & !3;

    if addr >= 0xFFFF_0000 && emu.scfg.bios & (1 << 1) == 0 {
        if addr >= 0xFFFF_8000 && emu.scfg.bios & (1 << 0) != 0 {
            return 0xFFFF_FFFF;
        }
        return emu.arm9i_bios.read_le(addr as usize & 0xFFFF);
    }

    match addr & 0xFF00_0000 {
        0x0200_0000 => emu.main_mem.read_le((addr & emu.main_mem_mask) as usize),

        0x0300_0000 => {
            if emu.scfg.nwram_enabled(0) {
                if let Some(value) = emu.nwram.read(0, addr) {
                    return value;
                }
            }
            0
        }

        0x0400_0000 => io_read_32(emu, addr),

        0x0800_0000 | 0x0900_0000 | 0x0A00_0000 => {
            if emu.ex_mem_cnt & (1 << 7) != 0 {
                0
            } else {
                0xFFFF_FFFF
            }
        }

        0x0C00_0000 => emu.main_mem.read_le((addr & emu.main_mem_mask) as usize),

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM9 read32 @ {:#010X}", addr);
            0
        }
    }
}

pub fn write_8(emu: &mut Emu, addr: u32, value: u8) {
    match addr & 0xFF00_0000 {
        0x0200_0000 | 0x0C00_0000 => {
            emu.jit.invalidate(CpuId::Arm9, addr);
            emu.main_mem
                .write_le((addr & emu.main_mem_mask) as usize, value);
        }

        0x0300_0000 => {
            if emu.scfg.nwram_enabled(0) && emu.nwram.write(0, addr, value, &mut *emu.jit) {
                return;
            }
        }

        0x0400_0000 => io_write_8(emu, addr, value),

        0x0800_0000 | 0x0900_0000 | 0x0A00_0000 => {}

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM9 write8 @ {:#010X}: {:#04X}", addr, value);
        }
    }
}

pub fn write_16(emu: &mut Emu, addr: u32, value: u16) {
    let addr = addr & !1;
    match addr & 0xFF00_0000 {
        0x0200_0000 | 0x0C00_0000 => {
            emu.jit.invalidate(CpuId::Arm9, addr);
            emu.main_mem
                .write_le((addr & emu.main_mem_mask) as usize, value);
        }

        0x0300_0000 => {
            if emu.scfg.nwram_enabled(0) && emu.nwram.write(0, addr, value, &mut *emu.jit) {
                return;
            }
        }

        0x0400_0000 => io_write_16(emu, addr, value),

        0x0800_0000 | 0x0900_0000 | 0x0A00_0000 => {}

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM9 write16 @ {:#010X}: {:#06X}", addr, value);
        }
    }
}

pub fn write_32(emu: &mut Emu, addr: u32, value: u32) {
    let addr = addr & !3;
    match addr & 0xFF00_0000 {
        0x0200_0000 | 0x0C00_0000 => {
            emu.jit.invalidate(CpuId::Arm9, addr);
            emu.main_mem
                .write_le((addr & emu.main_mem_mask) as usize, value);
        }

        0x0300_0000 => {
            if emu.scfg.nwram_enabled(0) && emu.nwram.write(0, addr, value, &mut *emu.jit) {
                return;
            }
        }

        0x0400_0000 => io_write_32(emu, addr, value),

        0x0800_0000 | 0x0900_0000 | 0x0A00_0000 => {}

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM9 write32 @ {:#010X}: {:#010X}", addr, value);
        }
    }
}

fn io_read_8(emu: &mut Emu, addr: u32) -> u8 {
    match addr {
        0x0400_0130 => emu.key_input as u8,
        0x0400_0131 => (emu.key_input >> 8) as u8,
        0x0400_0208 => emu.arm9_irqs.master_enable as u8,

        0x0400_4000 => emu.scfg.bios as u8,
        0x0400_4006 => emu.scfg.rst as u8,

        0x0400_4040..=0x0400_4063 => {
            let reg = ((addr - 0x0400_4040) >> 2) as usize;
            let shift = (addr & 3) * 8;
            (emu.nwram.mbk[0][reg] >> shift) as u8
        }

        0x0400_4200..=0x0400_42FF => {
            if !emu.scfg.camera_enabled() {
                return 0;
            }
            #[cfg(feature = "log")]
            slog::debug!(emu.logger, "Unknown camera read8 @ {:#010X}", addr);
            0
        }

        0x0400_4300..=0x0400_43FF => {
            if !emu.scfg.dsp_enabled() {
                return 0;
            }
            #[cfg(feature = "log")]
            slog::debug!(emu.logger, "DSP read8 @ {:#010X}", addr);
            0
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM9 IO read8 @ {:#010X}", addr);
            0
        }
    }
}

fn io_read_16(emu: &mut Emu, addr: u32) -> u16 {
    match addr {
        0x0400_0130 => emu.key_input as u16,
        0x0400_0204 => emu.ex_mem_cnt,
        0x0400_0208 => emu.arm9_irqs.master_enable as u16,

        0x0400_4000 => emu.scfg.bios & 0xFF,
        0x0400_4004 => emu.scfg.clock9,
        0x0400_4006 => emu.scfg.rst,
        0x0400_4010 => emu.scfg.mc as u16,

        0x0400_4040..=0x0400_4063 => {
            let reg = ((addr - 0x0400_4040) >> 2) as usize;
            let shift = (addr & 2) * 8;
            (emu.nwram.mbk[0][reg] >> shift) as u16
        }

        0x0400_4200..=0x0400_42FF => {
            if !emu.scfg.camera_enabled() {
                return 0;
            }
            emu.cam_module.read16(addr)
        }

        0x0400_4300..=0x0400_43FF => {
            if !emu.scfg.dsp_enabled() {
                return 0;
            }
            #[cfg(feature = "log")]
            slog::debug!(emu.logger, "DSP read16 @ {:#010X}", addr);
            0
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM9 IO read16 @ {:#010X}", addr);
            0
        }
    }
}

fn io_read_32(emu: &mut Emu, addr: u32) -> u32 {
    match addr {
        0x0400_0130 => emu.key_input & 0xFFFF,
        0x0400_0208 => emu.arm9_irqs.master_enable as u32,
        0x0400_0210 => emu.arm9_irqs.enabled,
        0x0400_0214 => emu.arm9_irqs.requested,

        0x0400_4000 => (emu.scfg.bios & 0xFF) as u32,
        0x0400_4004 => emu.scfg.clock9 as u32 | ((emu.scfg.rst as u32) << 16),
        0x0400_4008 => emu.scfg.ext[0],
        0x0400_4010 => emu.scfg.mc & 0xFFFF,

        0x0400_4040..=0x0400_4063 => {
            let reg = ((addr - 0x0400_4040) >> 2) as usize;
            emu.nwram.mbk[0][reg]
        }

        0x0400_4100 => emu.ndma.global_cnt[0],
        0x0400_4104..=0x0400_4173 => ndma_read(emu, 0, addr),

        0x0400_4200..=0x0400_42FF => {
            if !emu.scfg.camera_enabled() {
                return 0;
            }
            emu.cam_module.read32(addr)
        }

        0x0400_4300..=0x0400_43FF => {
            if !emu.scfg.dsp_enabled() {
                return 0;
            }
            #[cfg(feature = "log")]
            slog::debug!(emu.logger, "DSP read32 @ {:#010X}", addr);
            0
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM9 IO read32 @ {:#010X}", addr);
            0
        }
    }
}

pub(super) fn ndma_read(emu: &Emu, cpu: usize, addr: u32) -> u32 {
    let offset = addr - 0x0400_4104;
    let index = (cpu << 2) + (offset / 0x1C) as usize;
    let channel = &emu.ndma.channels[index];
    match offset % 0x1C {
        0x00 => channel.src_addr,
        0x04 => channel.dst_addr,
        0x08 => channel.total_length,
        0x0C => channel.block_length,
        0x10 => channel.subblock_timer,
        0x14 => channel.fill_data,
        _ => channel.cnt,
    }
}

pub(super) fn ndma_write(emu: &mut Emu, cpu: usize, addr: u32, value: u32) {
    let offset = addr - 0x0400_4104;
    let index = (cpu << 2) + (offset / 0x1C) as usize;
    match offset % 0x1C {
        0x00 => emu.ndma.channels[index].src_addr = value & 0xFFFF_FFFC,
        0x04 => emu.ndma.channels[index].dst_addr = value & 0xFFFF_FFFC,
        0x08 => emu.ndma.channels[index].total_length = value & 0x0FFF_FFFF,
        0x0C => emu.ndma.channels[index].block_length = value & 0x00FF_FFFF,
        0x10 => emu.ndma.channels[index].subblock_timer = value & 0x0003_FFFF,
        0x14 => emu.ndma.channels[index].fill_data = value,
        _ => ndma::write_cnt(emu, index, value),
    }
}

fn io_write_8(emu: &mut Emu, addr: u32, value: u8) {
    match addr {
        // the ARM9 HALTCNT mirror does nothing useful
        0x0400_0301 => {}

        0x0400_0208 => emu.arm9_irqs.master_enable = value & 1 != 0,

        0x0400_4006 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            emu.scfg.rst = (emu.scfg.rst & 0xFF00) | value as u16;
        }

        0x0400_4040..=0x0400_4043 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            emu.nwram.map_a((addr & 3) as usize, value, &mut *emu.jit);
        }
        0x0400_4044..=0x0400_404B => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            emu.nwram
                .map_b(((addr - 0x04) & 7) as usize, value, &mut *emu.jit);
        }
        0x0400_404C..=0x0400_4053 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            emu.nwram
                .map_c(((addr - 0x0C) & 7) as usize, value, &mut *emu.jit);
        }

        0x0400_4200..=0x0400_42FF => {
            if !emu.scfg.camera_enabled() {
                return;
            }
            #[cfg(feature = "log")]
            slog::debug!(emu.logger, "Unknown camera write8 @ {:#010X}: {:#04X}", addr, value);
        }

        0x0400_4300..=0x0400_43FF => {
            if !emu.scfg.dsp_enabled() {
                return;
            }
            #[cfg(feature = "log")]
            slog::debug!(emu.logger, "DSP write8 @ {:#010X}: {:#04X}", addr, value);
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(
                emu.logger,
                "Unknown ARM9 IO write8 @ {:#010X}: {:#04X}",
                addr,
                value
            );
        }
    }
}

fn io_write_16(emu: &mut Emu, addr: u32, value: u16) {
    match addr {
        0x0400_0204 => emu.ex_mem_cnt = value,
        0x0400_0208 => emu.arm9_irqs.master_enable = value & 1 != 0,

        0x0400_4004 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            emu.set_scfg_clock9(value);
        }

        0x0400_4006 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            emu.scfg.rst = value;
        }

        0x0400_4040 | 0x0400_4042 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            let base = (addr & 2) as usize;
            emu.nwram.map_a(base, value as u8, &mut *emu.jit);
            emu.nwram.map_a(base + 1, (value >> 8) as u8, &mut *emu.jit);
        }
        0x0400_4044 | 0x0400_4046 | 0x0400_4048 | 0x0400_404A => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            let base = ((addr - 0x04) & 6) as usize;
            emu.nwram.map_b(base, value as u8, &mut *emu.jit);
            emu.nwram.map_b(base + 1, (value >> 8) as u8, &mut *emu.jit);
        }
        0x0400_404C | 0x0400_404E | 0x0400_4050 | 0x0400_4052 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            let base = ((addr - 0x0C) & 6) as usize;
            emu.nwram.map_c(base, value as u8, &mut *emu.jit);
            emu.nwram.map_c(base + 1, (value >> 8) as u8, &mut *emu.jit);
        }

        0x0400_4200..=0x0400_42FF => {
            if !emu.scfg.camera_enabled() {
                return;
            }
            emu.cam_module.write16(addr, value);
        }

        0x0400_4300..=0x0400_43FF => {
            if !emu.scfg.dsp_enabled() {
                return;
            }
            #[cfg(feature = "log")]
            slog::debug!(emu.logger, "DSP write16 @ {:#010X}: {:#06X}", addr, value);
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(
                emu.logger,
                "Unknown ARM9 IO write16 @ {:#010X}: {:#06X}",
                addr,
                value
            );
        }
    }
}

fn io_write_32(emu: &mut Emu, addr: u32, value: u32) {
    match addr {
        0x0400_0208 => emu.arm9_irqs.master_enable = value & 1 != 0,
        0x0400_0210 => emu.arm9_irqs.write_enabled(value),
        0x0400_0214 => emu.arm9_irqs.ack(value),

        0x0400_4004 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            emu.set_scfg_clock9(value as u16);
            emu.scfg.rst = (value >> 16) as u16;
        }

        0x0400_4008 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            // the main-RAM size field is stored but deliberately never
            // applied; an immediate change breaks DS-mode startup
            emu.scfg.write_ext_from_arm9(value);
        }

        0x0400_4040 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            for i in 0..4 {
                emu.nwram.map_a(i, (value >> (i * 8)) as u8, &mut *emu.jit);
            }
        }
        0x0400_4044 | 0x0400_4048 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            let base = if addr == 0x0400_4044 { 0 } else { 4 };
            for i in 0..4 {
                emu.nwram
                    .map_b(base + i, (value >> (i * 8)) as u8, &mut *emu.jit);
            }
        }
        0x0400_404C | 0x0400_4050 => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            let base = if addr == 0x0400_404C { 0 } else { 4 };
            for i in 0..4 {
                emu.nwram
                    .map_c(base + i, (value >> (i * 8)) as u8, &mut *emu.jit);
            }
        }
        0x0400_4054 | 0x0400_4058 | 0x0400_405C => {
            if !emu.scfg.ext_enabled(0) {
                return;
            }
            emu.nwram
                .map_range(0, ((addr - 0x0400_4054) >> 2) as usize, value, &mut *emu.jit);
        }

        0x0400_4100 => emu.ndma.global_cnt[0] = value & 0x800F_0000,
        0x0400_4104..=0x0400_4173 => ndma_write(emu, 0, addr, value),

        0x0400_4200..=0x0400_42FF => {
            if !emu.scfg.camera_enabled() {
                return;
            }
            emu.cam_module.write32(addr, value);
        }

        0x0400_4300..=0x0400_43FF => {
            if !emu.scfg.dsp_enabled() {
                return;
            }
            #[cfg(feature = "log")]
            slog::debug!(emu.logger, "DSP write32 @ {:#010X}: {:#010X}", addr, value);
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(
                emu.logger,
                "Unknown ARM9 IO write32 @ {:#010X}: {:#010X}",
                addr,
                value
            );
        }
    }
}
