use super::jit;
use crate::utils::{zeroed_box, Bytes, MemValue, Savestate};

pub const BANK_SIZE: usize = 0x4_0000;

/// The three re-routable SRAM banks and the MBK register file controlling
/// them.
///
/// Each bank is split into physical slots (4×64 KiB for A, 8×32 KiB for B and
/// C) that MBK1..MBK5 route to a master (ARM9, ARM7, or DSP for B/C) and a
/// window slot. MBK6..MBK8 define each CPU's address window. The resolved
/// lookup tables store physical slot numbers into the owned bank arenas
/// rather than raw pointers.
///
/// MBK1..MBK5 are mirrored between the two CPUs' register copies; only the
/// window registers are per-CPU. Slot tables are rebuilt from the full MBK
/// state in a fixed slot order, so the resolved mapping is independent of the
/// MBK write order: reads resolve to the highest-numbered matching slot,
/// while writes go to every matching slot.
pub struct Nwram {
    #[cfg(feature = "log")]
    logger: slog::Logger,
    pub bank_a: Box<Bytes<BANK_SIZE>>,
    pub bank_b: Box<Bytes<BANK_SIZE>>,
    pub bank_c: Box<Bytes<BANK_SIZE>>,
    pub mbk: [[u32; 9]; 2],
    map_a: [[Option<u8>; 4]; 2],
    map_b: [[Option<u8>; 8]; 3],
    map_c: [[Option<u8>; 8]; 3],
    start: [[u32; 3]; 2],
    end: [[u32; 3]; 2],
    mask: [[u32; 3]; 2],
}

impl Nwram {
    pub(super) fn new(#[cfg(feature = "log")] logger: slog::Logger) -> Self {
        Nwram {
            #[cfg(feature = "log")]
            logger,
            bank_a: zeroed_box(),
            bank_b: zeroed_box(),
            bank_c: zeroed_box(),
            mbk: [[0; 9]; 2],
            map_a: [[None; 4]; 2],
            map_b: [[None; 8]; 3],
            map_c: [[None; 8]; 3],
            start: [[0; 3]; 2],
            end: [[0; 3]; 2],
            mask: [[0; 3]; 2],
        }
    }

    pub fn reset(&mut self) {
        self.bank_a.0.fill(0);
        self.bank_b.0.fill(0);
        self.bank_c.0.fill(0);
        self.mbk = [[0; 9]; 2];
        self.map_a = [[None; 4]; 2];
        self.map_b = [[None; 8]; 3];
        self.map_c = [[None; 8]; 3];
        self.start = [[0; 3]; 2];
        self.end = [[0; 3]; 2];
        self.mask = [[0; 3]; 2];
    }

    pub fn map_a(&mut self, num: usize, value: u8, jit: &mut dyn jit::Hooks) {
        // not all routing bits exist on bank A
        let value = value & !0x72;

        if self.mbk[0][8] & (1 << num) != 0 {
            #[cfg(feature = "log")]
            slog::warn!(
                self.logger,
                "Tried to map bank A slot {} to {:#04X}, but it is write-protected ({:#010X})",
                num,
                value,
                self.mbk[0][8]
            );
            return;
        }

        let shift = 8 * num;
        if (self.mbk[0][0] >> shift) as u8 == value {
            return;
        }

        jit.remap_nwram(0);

        self.mbk[0][0] = (self.mbk[0][0] & !(0xFF << shift)) | ((value as u32) << shift);
        self.mbk[1][0] = self.mbk[0][0];
        self.rebuild_map_a();
    }

    pub fn map_b(&mut self, num: usize, value: u8, jit: &mut dyn jit::Hooks) {
        let value = value & !0x60;

        if self.mbk[0][8] & (1 << (8 + num)) != 0 {
            #[cfg(feature = "log")]
            slog::warn!(
                self.logger,
                "Tried to map bank B slot {} to {:#04X}, but it is write-protected ({:#010X})",
                num,
                value,
                self.mbk[0][8]
            );
            return;
        }

        let reg = 1 + (num >> 2);
        let shift = 8 * (num & 3);
        if (self.mbk[0][reg] >> shift) as u8 == value {
            return;
        }

        jit.remap_nwram(1);

        self.mbk[0][reg] = (self.mbk[0][reg] & !(0xFF << shift)) | ((value as u32) << shift);
        self.mbk[1][reg] = self.mbk[0][reg];
        self.rebuild_map_b();
    }

    pub fn map_c(&mut self, num: usize, value: u8, jit: &mut dyn jit::Hooks) {
        let value = value & !0x60;

        if self.mbk[0][8] & (1 << (16 + num)) != 0 {
            #[cfg(feature = "log")]
            slog::warn!(
                self.logger,
                "Tried to map bank C slot {} to {:#04X}, but it is write-protected ({:#010X})",
                num,
                value,
                self.mbk[0][8]
            );
            return;
        }

        let reg = 3 + (num >> 2);
        let shift = 8 * (num & 3);
        if (self.mbk[0][reg] >> shift) as u8 == value {
            return;
        }

        jit.remap_nwram(2);

        self.mbk[0][reg] = (self.mbk[0][reg] & !(0xFF << shift)) | ((value as u32) << shift);
        self.mbk[1][reg] = self.mbk[0][reg];
        self.rebuild_map_c();
    }

    fn rebuild_map_a(&mut self) {
        self.map_a = [[None; 4]; 2];
        for slot in 0..4 {
            let value = ((self.mbk[0][0] >> (slot * 8)) & 0xFD) as u8;
            if value & 0x80 != 0 {
                self.map_a[(value & 0x03) as usize][((value >> 2) & 0x3) as usize] =
                    Some(slot as u8);
            }
        }
    }

    fn rebuild_map_b(&mut self) {
        self.map_b = [[None; 8]; 3];
        for slot in 0..8 {
            let mut value = ((self.mbk[0][1 + (slot >> 2)] >> ((slot & 3) * 8)) & 0xFF) as u8;
            if value & 0x80 != 0 {
                if value & 0x02 != 0 {
                    value &= 0xFE;
                }
                self.map_b[(value & 0x03) as usize][((value >> 2) & 0x7) as usize] =
                    Some(slot as u8);
            }
        }
    }

    fn rebuild_map_c(&mut self) {
        self.map_c = [[None; 8]; 3];
        for slot in 0..8 {
            let mut value = ((self.mbk[0][3 + (slot >> 2)] >> ((slot & 3) * 8)) & 0xFF) as u8;
            if value & 0x80 != 0 {
                if value & 0x02 != 0 {
                    value &= 0xFE;
                }
                self.map_c[(value & 0x03) as usize][((value >> 2) & 0x7) as usize] =
                    Some(slot as u8);
            }
        }
    }

    pub fn map_range(&mut self, cpu: usize, num: usize, value: u32, jit: &mut dyn jit::Hooks) {
        let value = match num {
            0 => value & !0xE00F_C00F,
            _ => value & !0xE007_C007,
        };

        if self.mbk[cpu][5 + num] == value {
            return;
        }

        jit.remap_nwram(num);
        self.mbk[cpu][5 + num] = value;
        self.update_range(cpu, num);
    }

    fn update_range(&mut self, cpu: usize, num: usize) {
        let value = self.mbk[cpu][5 + num];
        // The window can only cover 0x03000000..0x04000000; end indices
        // beyond that are cut by the bus decode.
        if num == 0 {
            self.start[cpu][0] = 0x0300_0000 + (((value >> 4) & 0xFF) << 16);
            self.end[cpu][0] = 0x0300_0000 + (((value >> 20) & 0x1FF) << 16);
            self.mask[cpu][0] = match (value >> 12) & 0x3 {
                0 | 1 => 0x0,
                2 => 0x1,
                _ => 0x3,
            };
        } else {
            self.start[cpu][num] = 0x0300_0000 + (((value >> 3) & 0x1FF) << 15);
            self.end[cpu][num] = 0x0300_0000 + (((value >> 19) & 0x3FF) << 15);
            self.mask[cpu][num] = match (value >> 12) & 0x3 {
                0 => 0x0,
                1 => 0x1,
                2 => 0x3,
                _ => 0x7,
            };
        }
    }

    /// MBK8 write path. Set protection bits stick: clearing them again
    /// requires a reset.
    pub fn write_protect(&mut self, value: u32) {
        let value = (value | self.mbk[0][8]) & 0x00FF_FF0F;
        self.mbk[0][8] = value;
        self.mbk[1][8] = value;
    }

    /// Used by the boot paths, which load MBK8 from the NAND or cart blob
    /// before any guest write happened.
    pub(super) fn set_write_protect_raw(&mut self, value: u32) {
        self.mbk[0][8] = value & 0x00FF_FF0F;
        self.mbk[1][8] = self.mbk[0][8];
    }

    #[inline]
    fn in_range(&self, cpu: usize, bank: usize, addr: u32) -> bool {
        addr >= self.start[cpu][bank] && addr < self.end[cpu][bank]
    }

    /// Resolves a read. `Some(0)` is an address inside a window whose slot is
    /// unmapped; `None` falls through to the shared-WRAM region below.
    pub fn read<T: MemValue>(&self, cpu: usize, addr: u32) -> Option<T> {
        if self.in_range(cpu, 0, addr) {
            return Some(match self.map_a[cpu][((addr >> 16) & self.mask[cpu][0]) as usize] {
                Some(slot) => self
                    .bank_a
                    .read_le(((slot as usize) << 16) | (addr as usize & 0xFFFF)),
                None => T::default(),
            });
        }
        if self.in_range(cpu, 1, addr) {
            return Some(match self.map_b[cpu][((addr >> 15) & self.mask[cpu][1]) as usize] {
                Some(slot) => self
                    .bank_b
                    .read_le(((slot as usize) << 15) | (addr as usize & 0x7FFF)),
                None => T::default(),
            });
        }
        if self.in_range(cpu, 2, addr) {
            return Some(match self.map_c[cpu][((addr >> 15) & self.mask[cpu][2]) as usize] {
                Some(slot) => self
                    .bank_c
                    .read_le(((slot as usize) << 15) | (addr as usize & 0x7FFF)),
                None => T::default(),
            });
        }
        None
    }

    /// Resolves a write, returning whether any window claimed the address. A
    /// write lands in *every* physical slot whose MBK routing matches the
    /// targeted (master, window-slot) pair, not just the one reads resolve
    /// to.
    pub fn write<T: MemValue>(
        &mut self,
        cpu: usize,
        addr: u32,
        value: T,
        jit: &mut dyn jit::Hooks,
    ) -> bool {
        let cpu_id = if cpu == 0 {
            super::irqs::CpuId::Arm9
        } else {
            super::irqs::CpuId::Arm7
        };
        if self.in_range(cpu, 0, addr) {
            let target = ((addr >> 14) & (self.mask[cpu][0] << 2)) | 0x80 | cpu as u32;
            for slot in 0..4 {
                let routing = (self.mbk[cpu][0] >> (slot * 8)) & 0xFF;
                if routing != target {
                    continue;
                }
                self.bank_a
                    .write_le((slot as usize) << 16 | (addr as usize & 0xFFFF), value);
                jit.invalidate(cpu_id, addr);
            }
            return true;
        }
        if self.in_range(cpu, 1, addr) {
            let target = ((addr >> 13) & (self.mask[cpu][1] << 2)) | 0x80 | cpu as u32;
            for slot in 0..8 {
                let routing = (self.mbk[cpu][1 + (slot >> 2)] >> ((slot & 3) * 8)) & 0xFF;
                if routing != target {
                    continue;
                }
                self.bank_b
                    .write_le((slot as usize) << 15 | (addr as usize & 0x7FFF), value);
                jit.invalidate(cpu_id, addr);
            }
            return true;
        }
        if self.in_range(cpu, 2, addr) {
            let target = ((addr >> 13) & (self.mask[cpu][2] << 2)) | 0x80 | cpu as u32;
            for slot in 0..8 {
                let routing = (self.mbk[cpu][3 + (slot >> 2)] >> ((slot & 3) * 8)) & 0xFF;
                if routing != target {
                    continue;
                }
                self.bank_c
                    .write_le((slot as usize) << 15 | (addr as usize & 0x7FFF), value);
                jit.invalidate(cpu_id, addr);
            }
            return true;
        }
        false
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        for cpu in 0..2 {
            for reg in 0..9 {
                file.var_u32(&mut self.mbk[cpu][reg]);
            }
        }
        file.bytes(&mut self.bank_a.0);
        file.bytes(&mut self.bank_b.0);
        file.bytes(&mut self.bank_c.0);
        if !file.saving() {
            self.rebuild_map_a();
            self.rebuild_map_b();
            self.rebuild_map_c();
            for cpu in 0..2 {
                for num in 0..3 {
                    self.update_range(cpu, num);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::jit::NullHooks;

    fn nwram() -> Nwram {
        Nwram::new(
            #[cfg(feature = "log")]
            slog::Logger::root(slog::Discard, slog::o!()),
        )
    }

    #[test]
    fn read_resolves_to_highest_matching_slot() {
        let mut nwram = nwram();
        let mut jit = NullHooks;
        // Slots 0 and 1 both routed to ARM9 window slot 0.
        nwram.map_a(0, 0x80, &mut jit);
        nwram.map_a(1, 0x80, &mut jit);
        // ARM9 window A: 0x03000000.., 4 slots.
        nwram.map_range(0, 0, 0x0930_3000, &mut jit);
        nwram.bank_a.0[0x0_0000] = 0x11;
        nwram.bank_a.0[0x1_0000] = 0x22;
        assert_eq!(nwram.read::<u8>(0, 0x0300_0000), Some(0x22));
    }

    #[test]
    fn write_lands_in_every_matching_slot() {
        let mut nwram = nwram();
        let mut jit = NullHooks;
        nwram.map_a(0, 0x80, &mut jit);
        nwram.map_a(1, 0x80, &mut jit);
        nwram.map_range(0, 0, 0x0930_3000, &mut jit);
        assert!(nwram.write::<u8>(0, 0x0300_1234, 0x5A, &mut jit));
        assert_eq!(nwram.bank_a.0[0x0_1234], 0x5A);
        assert_eq!(nwram.bank_a.0[0x1_1234], 0x5A);
    }

    #[test]
    fn unmapped_window_reads_zero_and_drops_writes() {
        let mut nwram = nwram();
        let mut jit = NullHooks;
        nwram.map_range(0, 1, 0x0940_3000, &mut jit);
        let addr = nwram.start[0][1];
        assert_eq!(nwram.read::<u32>(0, addr), Some(0));
        assert!(nwram.write::<u32>(0, addr, 0xDEAD_BEEF, &mut jit));
        assert!(nwram.bank_b.0.iter().all(|&b| b == 0));
    }

    #[test]
    fn write_protect_bits_stick() {
        let mut nwram = nwram();
        let mut jit = NullHooks;
        nwram.map_a(0, 0x80, &mut jit);
        nwram.write_protect(0x0000_0001);
        let before = nwram.mbk[0][0];
        nwram.map_a(0, 0x84, &mut jit);
        assert_eq!(nwram.mbk[0][0], before);
        // Attempting to clear the protection bit leaves it set.
        nwram.write_protect(0);
        assert_eq!(nwram.mbk[0][8] & 1, 1);
    }

    #[test]
    fn cross_cpu_visibility_follows_windows() {
        let mut nwram = nwram();
        let mut jit = NullHooks;
        // Slot A0 routed to ARM7 window slot 0; ARM9 window also active.
        nwram.map_a(0, 0x81, &mut jit);
        nwram.map_range(0, 0, 0x0930_3000, &mut jit);
        nwram.map_range(1, 0, 0x0930_3000, &mut jit);
        assert!(nwram.write::<u8>(1, 0x0300_0042, 0x99, &mut jit));
        assert_eq!(nwram.read::<u8>(1, 0x0300_0042), Some(0x99));
        // The ARM9 window is active but no slot is routed to the ARM9.
        assert_eq!(nwram.read::<u8>(0, 0x0300_0042), Some(0));
    }
}
