use super::arm9::{ndma_read, ndma_write};
use crate::{
    aes,
    emu::{irqs::CpuId, Emu, StopReason},
    i2c, sdmmc,
};

pub fn read_8(emu: &mut Emu, addr: u32) -> u8 {
    if addr < 0x0001_0000 && emu.scfg.bios & (1 << 9) == 0 {
        if addr >= 0x0000_8000 && emu.scfg.bios & (1 << 8) != 0 {
            return 0xFF;
        }
        return emu.arm7i_bios.read_le(addr as usize & 0xFFFF);
    }

    match addr & 0xFF80_0000 {
        0x0300_0000 => {
            if emu.scfg.nwram_enabled(1) {
                if let Some(value) = emu.nwram.read(1, addr) {
                    return value;
                }
            }
            emu.swram.read_le(addr as usize & 0x7FFF)
        }
        0x0380_0000 => emu.arm7_wram.read_le(addr as usize & 0xFFFF),

        0x0400_0000 => io_read_8(emu, addr),

        0x0800_0000 | 0x0880_0000 | 0x0900_0000 | 0x0980_0000 | 0x0A00_0000 | 0x0A80_0000 => {
            if emu.ex_mem_cnt & (1 << 7) != 0 {
                0xFF
            } else {
                0
            }
        }

        0x0C00_0000 | 0x0C80_0000 => emu.main_mem.read_le((addr & emu.main_mem_mask) as usize),

        0x0200_0000 | 0x0280_0000 => emu.main_mem.read_le((addr & emu.main_mem_mask) as usize),

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM7 read8 @ {:#010X}", addr);
            0
        }
    }
}

pub fn read_16(emu: &mut Emu, addr: u32) -> u16 {
    let addr = addr & !1;

    if addr < 0x0001_0000 && emu.scfg.bios & (1 << 9) == 0 {
        if addr >= 0x0000_8000 && emu.scfg.bios & (1 << 8) != 0 {
            return 0xFFFF;
        }
        return emu.arm7i_bios.read_le(addr as usize & 0xFFFF);
    }

    match addr & 0xFF80_0000 {
        0x0300_0000 => {
            if emu.scfg.nwram_enabled(1) {
                if let Some(value) = emu.nwram.read(1, addr) {
                    return value;
                }
            }
            emu.swram.read_le(addr as usize & 0x7FFF)
        }
        0x0380_0000 => emu.arm7_wram.read_le(addr as usize & 0xFFFF),

        0x0400_0000 => io_read_16(emu, addr),

        0x0800_0000 | 0x0880_0000 | 0x0900_0000 | 0x0980_0000 | 0x0A00_0000 | 0x0A80_0000 => {
            if emu.ex_mem_cnt & (1 << 7) != 0 {
                0xFFFF
            } else {
                0
            }
        }

        0x0200_0000 | 0x0280_0000 | 0x0C00_0000 | 0x0C80_0000 => {
            emu.main_mem.read_le((addr & emu.main_mem_mask) as usize)
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM7 read16 @ {:#010X}", addr);
            0
        }
    }
}

pub fn read_32(emu: &mut Emu, addr: u32) -> u32 {
    let addr = addr & !3;

    if addr < 0x0001_0000 && emu.scfg.bios & (1 << 9) == 0 {
        if addr >= 0x0000_8000 && emu.scfg.bios & (1 << 8) != 0 {
            return 0xFFFF_FFFF;
        }
        return emu.arm7i_bios.read_le(addr as usize & 0xFFFF);
    }

    match addr & 0xFF80_0000 {
        0x0300_0000 => {
            if emu.scfg.nwram_enabled(1) {
                if let Some(value) = emu.nwram.read(1, addr) {
                    return value;
                }
            }
            emu.swram.read_le(addr as usize & 0x7FFF)
        }
        0x0380_0000 => emu.arm7_wram.read_le(addr as usize & 0xFFFF),

        0x0400_0000 => io_read_32(emu, addr),

        0x0800_0000 | 0x0880_0000 | 0x0900_0000 | 0x0980_0000 | 0x0A00_0000 | 0x0A80_0000 => {
            if emu.ex_mem_cnt & (1 << 7) != 0 {
                0xFFFF_FFFF
            } else {
                0
            }
        }

        0x0200_0000 | 0x0280_0000 | 0x0C00_0000 | 0x0C80_0000 => {
            emu.main_mem.read_le((addr & emu.main_mem_mask) as usize)
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM7 read32 @ {:#010X}", addr);
            0
        }
    }
}

pub fn write_8(emu: &mut Emu, addr: u32, value: u8) {
    match addr & 0xFF80_0000 {
        0x0200_0000 | 0x0280_0000 | 0x0C00_0000 | 0x0C80_0000 => {
            emu.jit.invalidate(CpuId::Arm7, addr);
            emu.main_mem
                .write_le((addr & emu.main_mem_mask) as usize, value);
        }

        0x0300_0000 => {
            if emu.scfg.nwram_enabled(1) && emu.nwram.write(1, addr, value, &mut *emu.jit) {
                return;
            }
            emu.jit.invalidate(CpuId::Arm7, addr);
            emu.swram.write_le(addr as usize & 0x7FFF, value);
        }
        0x0380_0000 => {
            emu.jit.invalidate(CpuId::Arm7, addr);
            emu.arm7_wram.write_le(addr as usize & 0xFFFF, value);
        }

        0x0400_0000 => io_write_8(emu, addr, value),

        0x0800_0000 | 0x0880_0000 | 0x0900_0000 | 0x0980_0000 | 0x0A00_0000 | 0x0A80_0000 => {}

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM7 write8 @ {:#010X}: {:#04X}", addr, value);
        }
    }
}

pub fn write_16(emu: &mut Emu, addr: u32, value: u16) {
    let addr = addr & !1;
    match addr & 0xFF80_0000 {
        0x0200_0000 | 0x0280_0000 | 0x0C00_0000 | 0x0C80_0000 => {
            emu.jit.invalidate(CpuId::Arm7, addr);
            emu.main_mem
                .write_le((addr & emu.main_mem_mask) as usize, value);
        }

        0x0300_0000 => {
            if emu.scfg.nwram_enabled(1) && emu.nwram.write(1, addr, value, &mut *emu.jit) {
                return;
            }
            emu.jit.invalidate(CpuId::Arm7, addr);
            emu.swram.write_le(addr as usize & 0x7FFF, value);
        }
        0x0380_0000 => {
            emu.jit.invalidate(CpuId::Arm7, addr);
            emu.arm7_wram.write_le(addr as usize & 0xFFFF, value);
        }

        0x0400_0000 => io_write_16(emu, addr, value),

        0x0800_0000 | 0x0880_0000 | 0x0900_0000 | 0x0980_0000 | 0x0A00_0000 | 0x0A80_0000 => {}

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM7 write16 @ {:#010X}: {:#06X}", addr, value);
        }
    }
}

pub fn write_32(emu: &mut Emu, addr: u32, value: u32) {
    let addr = addr & !3;
    match addr & 0xFF80_0000 {
        0x0200_0000 | 0x0280_0000 | 0x0C00_0000 | 0x0C80_0000 => {
            emu.jit.invalidate(CpuId::Arm7, addr);
            emu.main_mem
                .write_le((addr & emu.main_mem_mask) as usize, value);
        }

        0x0300_0000 => {
            if emu.scfg.nwram_enabled(1) && emu.nwram.write(1, addr, value, &mut *emu.jit) {
                return;
            }
            emu.jit.invalidate(CpuId::Arm7, addr);
            emu.swram.write_le(addr as usize & 0x7FFF, value);
        }
        0x0380_0000 => {
            emu.jit.invalidate(CpuId::Arm7, addr);
            emu.arm7_wram.write_le(addr as usize & 0xFFFF, value);
        }

        0x0400_0000 => io_write_32(emu, addr, value),

        0x0800_0000 | 0x0880_0000 | 0x0900_0000 | 0x0980_0000 | 0x0A00_0000 | 0x0A80_0000 => {}

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM7 write32 @ {:#010X}: {:#010X}", addr, value);
        }
    }
}

fn console_id_byte(emu: &Emu, index: u32) -> u8 {
    if emu.scfg.bios & (1 << 10) != 0 {
        return 0;
    }
    (emu.console_id() >> (index * 8)) as u8
}

fn io_read_8(emu: &mut Emu, addr: u32) -> u8 {
    match addr {
        0x0400_0130 => emu.key_input as u8,
        0x0400_0131 => (emu.key_input >> 8) as u8,
        0x0400_0136 => (emu.key_input >> 16) as u8,
        0x0400_0137 => (emu.key_input >> 24) as u8,
        0x0400_0208 => emu.arm7_irqs.master_enable as u8,

        0x0400_01C2 => emu.spi.read_data(),

        0x0400_4000 => emu.scfg.bios as u8,
        0x0400_4001 => (emu.scfg.bios >> 8) as u8,
        // SCFG_ROMWE, always 0
        0x0400_4002 => 0,

        0x0400_4040..=0x0400_4063 => {
            let reg = ((addr - 0x0400_4040) >> 2) as usize;
            let shift = (addr & 3) * 8;
            (emu.nwram.mbk[1][reg] >> shift) as u8
        }

        0x0400_4500 => emu.i2c.read_data(),
        0x0400_4501 => emu.i2c.read_cnt(),

        0x0400_4D00..=0x0400_4D07 => console_id_byte(emu, addr & 7),
        0x0400_4D08 => 0,

        // SNDEXCNT, DSP concern
        0x0400_4700 | 0x0400_4701 => 0,

        0x0400_4C00 => emu.gpio.data,
        0x0400_4C01 => emu.gpio.dir,
        0x0400_4C02 => emu.gpio.edge_sel,
        0x0400_4C03 => emu.gpio.irq_enable,
        0x0400_4C04 => emu.gpio.wifi as u8,
        0x0400_4C05 => (emu.gpio.wifi >> 8) as u8,

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM7 IO read8 @ {:#010X}", addr);
            0
        }
    }
}

fn io_read_16(emu: &mut Emu, addr: u32) -> u16 {
    match addr {
        0x0400_0130 => emu.key_input as u16,
        0x0400_0136 => (emu.key_input >> 16) as u16,
        0x0400_0204 => emu.ex_mem_cnt,
        0x0400_0208 => emu.arm7_irqs.master_enable as u16,
        0x0400_0218 => emu.arm7_irqs.enabled2,
        0x0400_021C => emu.arm7_irqs.requested2,

        0x0400_01C0 => emu.spi.control().0,
        0x0400_01C2 => emu.spi.read_data() as u16,

        0x0400_4000 => emu.scfg.bios,
        0x0400_4002 => 0,
        0x0400_4004 => emu.scfg.clock7,
        // JTAG register
        0x0400_4006 => 0,
        0x0400_4010 => emu.scfg.mc as u16,

        0x0400_4040..=0x0400_4063 => {
            let reg = ((addr - 0x0400_4040) >> 2) as usize;
            let shift = (addr & 2) * 8;
            (emu.nwram.mbk[1][reg] >> shift) as u16
        }

        0x0400_4D00 => console_id_byte(emu, 0) as u16 | ((console_id_byte(emu, 1) as u16) << 8),
        0x0400_4D02 => console_id_byte(emu, 2) as u16 | ((console_id_byte(emu, 3) as u16) << 8),
        0x0400_4D04 => console_id_byte(emu, 4) as u16 | ((console_id_byte(emu, 5) as u16) << 8),
        0x0400_4D06 => console_id_byte(emu, 6) as u16 | ((console_id_byte(emu, 7) as u16) << 8),
        0x0400_4D08 => 0,

        0x0400_4700 => 0,

        0x0400_4C00 => emu.gpio.data as u16 | ((emu.gpio.dir as u16) << 8),
        0x0400_4C02 => emu.gpio.edge_sel as u16 | ((emu.gpio.irq_enable as u16) << 8),
        0x0400_4C04 => emu.gpio.wifi,

        0x0400_4800..=0x0400_49FF => sdmmc::read16(emu, false, addr),
        0x0400_4A00..=0x0400_4BFF => sdmmc::read16(emu, true, addr),

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM7 IO read16 @ {:#010X}", addr);
            0
        }
    }
}

fn io_read_32(emu: &mut Emu, addr: u32) -> u32 {
    match addr {
        0x0400_0130 => emu.key_input & 0xFFFF,
        0x0400_0208 => emu.arm7_irqs.master_enable as u32,
        0x0400_0210 => emu.arm7_irqs.enabled,
        0x0400_0214 => emu.arm7_irqs.requested,
        0x0400_0218 => emu.arm7_irqs.enabled2 as u32,
        0x0400_021C => emu.arm7_irqs.requested2 as u32,

        0x0400_4000 => emu.scfg.bios as u32,
        0x0400_4008 => emu.scfg.ext[1],
        0x0400_4010 => emu.scfg.mc,

        0x0400_4040..=0x0400_4063 => {
            let reg = ((addr - 0x0400_4040) >> 2) as usize;
            emu.nwram.mbk[1][reg]
        }

        0x0400_4100 => emu.ndma.global_cnt[1],
        0x0400_4104..=0x0400_4173 => ndma_read(emu, 1, addr),

        0x0400_4400 => emu.aes.read_cnt(),
        0x0400_440C => aes::read_output_fifo(emu),

        0x0400_4D00 => {
            if emu.scfg.bios & (1 << 10) != 0 {
                0
            } else {
                emu.console_id() as u32
            }
        }
        0x0400_4D04 => {
            if emu.scfg.bios & (1 << 10) != 0 {
                0
            } else {
                (emu.console_id() >> 32) as u32
            }
        }
        0x0400_4D08 => 0,

        0x0400_4700 => 0,

        0x0400_490C => sdmmc::read_fifo32(emu, false),
        0x0400_4800..=0x0400_49FF => {
            sdmmc::read16(emu, false, addr) as u32 | ((sdmmc::read16(emu, false, addr + 2) as u32) << 16)
        }
        0x0400_4B0C => sdmmc::read_fifo32(emu, true),
        0x0400_4A00..=0x0400_4BFF => {
            sdmmc::read16(emu, true, addr) as u32 | ((sdmmc::read16(emu, true, addr + 2) as u32) << 16)
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(emu.logger, "Unknown ARM7 IO read32 @ {:#010X}", addr);
            0
        }
    }
}

fn io_write_8(emu: &mut Emu, addr: u32, value: u8) {
    match addr {
        0x0400_0208 => emu.arm7_irqs.master_enable = value & 1 != 0,

        0x0400_0301 => {
            // HALTCNT; the GBA-mode request cannot be honoured
            if value == 0x40 {
                emu.request_stop(StopReason::GbaModeNotSupported);
            }
        }

        0x0400_01C2 => emu.spi_write_data(value),

        0x0400_4000 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            emu.scfg.bios |= (value & 0x03) as u16;
        }
        0x0400_4001 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            emu.scfg.bios |= ((value & 0x07) as u16) << 8;
        }
        0x0400_4002 => {}

        0x0400_4060..=0x0400_4063 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            let shift = (addr & 3) * 8;
            let old = emu.nwram.mbk[0][8];
            emu.nwram
                .write_protect((old & !(0xFF << shift)) | ((value as u32) << shift));
        }

        0x0400_4500 => emu.i2c.write_data(value),
        0x0400_4501 => i2c_write_cnt(emu, value),

        0x0400_4700 | 0x0400_4701 => {}

        0x0400_4C00 => emu.gpio.data = value,
        0x0400_4C01 => emu.gpio.dir = value,
        0x0400_4C02 => emu.gpio.edge_sel = value,
        0x0400_4C03 => emu.gpio.irq_enable = value,
        0x0400_4C04 => emu.gpio.wifi = (emu.gpio.wifi & 0xFF00) | value as u16,

        0x0400_4420..=0x0400_442F => {
            let shift = (addr & 3) * 8;
            let offset = ((addr - 0x0400_4420) & !3) as usize;
            emu.aes
                .write_iv(offset, (value as u32) << shift, 0xFF << shift);
        }
        0x0400_4430..=0x0400_443F => {
            let shift = (addr & 3) * 8;
            let offset = ((addr - 0x0400_4430) & !3) as usize;
            emu.aes
                .write_mac(offset, (value as u32) << shift, 0xFF << shift);
        }
        0x0400_4440..=0x0400_44FF => {
            let shift = (addr & 3) * 8;
            aes_key_write(emu, addr & !3, (value as u32) << shift, 0xFF << shift);
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(
                emu.logger,
                "Unknown ARM7 IO write8 @ {:#010X}: {:#04X}",
                addr,
                value
            );
        }
    }
}

fn io_write_16(emu: &mut Emu, addr: u32, value: u16) {
    match addr {
        0x0400_0204 => emu.ex_mem_cnt = value,
        0x0400_0208 => emu.arm7_irqs.master_enable = value & 1 != 0,
        0x0400_0218 => emu.arm7_irqs.write_enabled2(value),
        0x0400_021C => emu.arm7_irqs.ack2(value),

        0x0400_01C0 => emu.spi.set_control(crate::spi::Control(value)),
        0x0400_01C2 => emu.spi_write_data(value as u8),

        0x0400_4000 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            emu.scfg.write_bios_from_arm7(value);
        }
        0x0400_4002 => {}
        0x0400_4004 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            emu.scfg.clock7 = value & 0x0187;
        }
        0x0400_4010 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            let new_mc = (emu.scfg.mc & 0xFFFF_0000) | value as u32;
            emu.set_scfg_mc(new_mc);
        }

        0x0400_4060 | 0x0400_4062 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            let shift = (addr & 2) * 8;
            let old = emu.nwram.mbk[0][8];
            emu.nwram
                .write_protect((old & !(0xFFFF << shift)) | ((value as u32) << shift));
        }

        0x0400_4406 => aes::write_blk_cnt(emu, (value as u32) << 16),

        0x0400_4700 => {}

        0x0400_4C00 => {
            emu.gpio.data = value as u8;
            emu.gpio.dir = (value >> 8) as u8;
        }
        0x0400_4C02 => {
            emu.gpio.edge_sel = value as u8;
            emu.gpio.irq_enable = (value >> 8) as u8;
        }
        0x0400_4C04 => emu.gpio.wifi = value,

        0x0400_4420..=0x0400_442F => {
            let shift = (addr & 1) * 16;
            let offset = ((addr - 0x0400_4420) & !1) as usize;
            emu.aes
                .write_iv(offset, (value as u32) << shift, 0xFFFF << shift);
        }
        0x0400_4430..=0x0400_443F => {
            let shift = (addr & 1) * 16;
            let offset = ((addr - 0x0400_4430) & !1) as usize;
            emu.aes
                .write_mac(offset, (value as u32) << shift, 0xFFFF << shift);
        }
        0x0400_4440..=0x0400_44FF => {
            let shift = (addr & 1) * 16;
            aes_key_write(emu, addr & !1, (value as u32) << shift, 0xFFFF << shift);
        }

        0x0400_4800..=0x0400_49FF => sdmmc::write16(emu, false, addr, value),
        0x0400_4A00..=0x0400_4BFF => sdmmc::write16(emu, true, addr, value),

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(
                emu.logger,
                "Unknown ARM7 IO write16 @ {:#010X}: {:#06X}",
                addr,
                value
            );
        }
    }
}

fn io_write_32(emu: &mut Emu, addr: u32, value: u32) {
    match addr {
        0x0400_0208 => emu.arm7_irqs.master_enable = value & 1 != 0,
        0x0400_0210 => emu.arm7_irqs.write_enabled(value),
        0x0400_0214 => emu.arm7_irqs.ack(value),
        0x0400_0218 => emu.arm7_irqs.write_enabled2(value as u16),
        0x0400_021C => emu.arm7_irqs.ack2(value as u16),

        0x0400_4000 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            emu.scfg.write_bios_from_arm7(value as u16);
        }
        0x0400_4008 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            emu.scfg.write_ext_from_arm7(value);
        }
        0x0400_4010 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            emu.set_scfg_mc(value);
        }

        0x0400_4054 | 0x0400_4058 | 0x0400_405C => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            emu.nwram
                .map_range(1, ((addr - 0x0400_4054) >> 2) as usize, value, &mut *emu.jit);
        }
        0x0400_4060 => {
            if !emu.scfg.ext_enabled(1) {
                return;
            }
            emu.nwram.write_protect(value);
        }

        0x0400_4100 => emu.ndma.global_cnt[1] = value & 0x800F_0000,
        0x0400_4104..=0x0400_4173 => ndma_write(emu, 1, addr, value),

        0x0400_4400 => aes::write_cnt(emu, value),
        0x0400_4404 => aes::write_blk_cnt(emu, value),
        0x0400_4408 => aes::write_input_fifo(emu, value),

        0x0400_4420..=0x0400_442F => {
            emu.aes
                .write_iv((addr - 0x0400_4420) as usize, value, 0xFFFF_FFFF);
        }
        0x0400_4430..=0x0400_443F => {
            emu.aes
                .write_mac((addr - 0x0400_4430) as usize, value, 0xFFFF_FFFF);
        }
        0x0400_4440..=0x0400_44FF => aes_key_write(emu, addr, value, 0xFFFF_FFFF),

        0x0400_4700 => {}

        0x0400_490C => sdmmc::write_fifo32(emu, false, value),
        0x0400_4800..=0x0400_49FF => {
            sdmmc::write16(emu, false, addr, value as u16);
            sdmmc::write16(emu, false, addr + 2, (value >> 16) as u16);
        }
        0x0400_4B0C => sdmmc::write_fifo32(emu, true, value),
        0x0400_4A00..=0x0400_4BFF => {
            sdmmc::write16(emu, true, addr, value as u16);
            sdmmc::write16(emu, true, addr + 2, (value >> 16) as u16);
        }

        0x0400_4300..=0x0400_43FF => {
            #[cfg(feature = "log")]
            slog::debug!(emu.logger, "DSP write32 @ {:#010X}: {:#010X}", addr, value);
        }

        _ => {
            #[cfg(feature = "log")]
            slog::warn!(
                emu.logger,
                "Unknown ARM7 IO write32 @ {:#010X}: {:#010X}",
                addr,
                value
            );
        }
    }
}

fn aes_key_write(emu: &mut Emu, addr: u32, value: u32, mask: u32) {
    let mut offset = addr - 0x0400_4440;
    let mut slot = 0;
    while offset >= 0x30 {
        offset -= 0x30;
        slot += 1;
    }

    match offset >> 4 {
        0 => emu
            .aes
            .write_key_normal(slot, (offset & 0xF) as usize, value, mask),
        1 => emu
            .aes
            .write_key_x(slot, (offset & 0xF) as usize, value, mask),
        _ => emu
            .aes
            .write_key_y(slot, (offset & 0xF) as usize, value, mask),
    }
}

fn i2c_write_cnt(emu: &mut Emu, value: u8) {
    let Emu {
        i2c,
        schedule,
        arm7_irqs,
        pending_stop,
        ..
    } = emu;
    let mut cx = i2c::bptwl::Cx {
        schedule,
        irqs: arm7_irqs,
        stop: pending_stop,
    };
    i2c.write_cnt(value, &mut cx);
}
