//! One of the two camera sensors, an Aptina-style part on the I²C bus: the
//! directly-addressed PLL/clock/standby registers, the MCU-shadow register
//! window with its indexed auto-increment access, and the YUYV frame staging
//! buffer the capture module pulls scanlines from.

use crate::utils::Savestate;

pub const FRAME_BUFFER_LEN: usize = 640 * 480 / 2;

/// Host camera hooks. `capture_frame` fills the staging buffer with the most
/// recent frame and must not block.
pub trait Backend {
    fn start(&mut self, index: u8);
    fn stop(&mut self, index: u8);
    fn capture_frame(&mut self, index: u8, buffer: &mut [u32], width: usize, height: usize, yuv: bool);
}

pub struct NullBackend;

impl Backend for NullBackend {
    fn start(&mut self, _index: u8) {}
    fn stop(&mut self, _index: u8) {}
    fn capture_frame(
        &mut self,
        _index: u8,
        _buffer: &mut [u32],
        _width: usize,
        _height: usize,
        _yuv: bool,
    ) {
    }
}

pub struct Camera {
    #[cfg(feature = "log")]
    logger: slog::Logger,
    num: u8,

    data_pos: u32,
    reg_addr: u16,
    reg_data: u16,

    pll_div: u16,
    pll_p_div: u16,
    pll_cnt: u16,
    clocks_cnt: u16,
    standby_cnt: u16,
    misc_cnt: u16,

    mcu_addr: u16,
    mcu_regs: Box<[u8]>,

    frame_width: u16,
    frame_height: u16,
    frame_read_mode: u16,
    frame_format: u16,
    transfer_y: u16,
    frame_buffer: Box<[u32]>,
}

impl Camera {
    pub(super) fn new(num: u8, #[cfg(feature = "log")] logger: slog::Logger) -> Self {
        Camera {
            #[cfg(feature = "log")]
            logger,
            num,
            data_pos: 0,
            reg_addr: 0,
            reg_data: 0,
            pll_div: 0x0366,
            pll_p_div: 0x00F5,
            pll_cnt: 0x21F9,
            clocks_cnt: 0,
            standby_cnt: 0x4029,
            misc_cnt: 0,
            mcu_addr: 0,
            mcu_regs: vec![0; 0x8000].into_boxed_slice(),
            frame_width: 0,
            frame_height: 0,
            frame_read_mode: 0,
            frame_format: 0,
            transfer_y: 0,
            frame_buffer: vec![0; FRAME_BUFFER_LEN].into_boxed_slice(),
        }
    }

    pub(crate) fn reset(&mut self, backend: &mut dyn Backend) {
        backend.stop(self.num);

        self.data_pos = 0;
        self.reg_addr = 0;
        self.reg_data = 0;

        self.pll_div = 0x0366;
        self.pll_p_div = 0x00F5;
        self.pll_cnt = 0x21F9;
        self.clocks_cnt = 0;
        self.standby_cnt = 0x4029;
        self.misc_cnt = 0;

        self.mcu_addr = 0;
        self.mcu_regs.fill(0);

        // the sequencer powers up in preview mode
        self.mcu_regs[0x2104] = 3;

        self.transfer_y = 0;
        self.frame_buffer.fill(0);
    }

    pub(crate) fn stop(&mut self, backend: &mut dyn Backend) {
        backend.stop(self.num);
    }

    /// A camera produces data while it is out of standby and its data
    /// transfer is enabled.
    pub fn is_activated(&self) -> bool {
        self.standby_cnt & (1 << 14) == 0 && self.misc_cnt & (1 << 9) != 0
    }

    /// Latches the frame geometry for the coming transfer from the MCU
    /// registers of the active sequencer mode and requests a fresh frame from
    /// the host.
    pub(crate) fn start_transfer(&mut self, backend: &mut dyn Backend) {
        self.transfer_y = 0;

        let mcu_u16 =
            |addr: usize| u16::from_le_bytes([self.mcu_regs[addr], self.mcu_regs[addr + 1]]);

        match self.mcu_regs[0x2104] {
            3 => {
                // preview mode
                self.frame_width = mcu_u16(0x2703);
                self.frame_height = mcu_u16(0x2705);
                self.frame_read_mode = mcu_u16(0x2717);
                self.frame_format = mcu_u16(0x2755);
            }
            7 => {
                // capture mode
                self.frame_width = mcu_u16(0x2707);
                self.frame_height = mcu_u16(0x2709);
                self.frame_read_mode = mcu_u16(0x272D);
                self.frame_format = mcu_u16(0x2757);
            }
            _ => {
                self.frame_width = 0;
                self.frame_height = 0;
                self.frame_read_mode = 0;
                self.frame_format = 0;
            }
        }

        backend.capture_frame(self.num, &mut self.frame_buffer, 640, 480, true);
    }

    #[inline]
    pub fn transfer_done(&self) -> bool {
        self.transfer_y >= self.frame_height
    }

    /// Produces one scanline (up to `max_len` YUYV words), rescaling and
    /// mirroring the 640×480 staging frame per the latched read mode.
    pub(crate) fn transfer_scanline(&mut self, buffer: &mut [u32], max_len: usize) -> usize {
        if self.transfer_y >= self.frame_height {
            return 0;
        }

        if self.frame_width > 640
            || self.frame_height > 480
            || self.frame_width < 2
            || self.frame_height < 2
            || self.frame_width & 1 != 0
        {
            #[cfg(feature = "log")]
            slog::warn!(
                self.logger,
                "Invalid resolution {}x{}",
                self.frame_width,
                self.frame_height
            );
            return 0;
        }

        // TODO: non-YUV pixel formats

        let ret_len = (self.frame_width >> 1) as usize;
        let mut sy = (self.transfer_y as usize * 480) / self.frame_height as usize;
        if self.frame_read_mode & (1 << 1) != 0 {
            sy = 479 - sy;
        }

        if self.frame_read_mode & (1 << 0) != 0 {
            for dx in 0..ret_len.min(max_len) {
                let sx = (dx * 640) / self.frame_width as usize;
                buffer[dx] = self.frame_buffer[sy * 320 + sx];
            }
        } else {
            for dx in 0..ret_len.min(max_len) {
                let sx = 319 - (dx * 640) / self.frame_width as usize;
                let value = self.frame_buffer[sy * 320 + sx];
                // horizontally mirrored: swap the two luma samples
                buffer[dx] = (value & 0xFF00_FF00) | ((value >> 16) & 0xFF) | ((value & 0xFF) << 16);
            }
        }

        self.transfer_y += 1;

        ret_len
    }

    pub(super) fn acquire(&mut self) {
        self.data_pos = 0;
    }

    pub(super) fn read(&mut self, last: bool) -> u8 {
        let result = if self.data_pos & 1 != 0 {
            let result = self.reg_data as u8;
            self.reg_addr = self.reg_addr.wrapping_add(2);
            result
        } else {
            self.reg_data = self.reg_read(self.reg_addr);
            (self.reg_data >> 8) as u8
        };

        if last {
            self.data_pos = 0;
        } else {
            self.data_pos += 1;
        }

        result
    }

    pub(super) fn write(&mut self, value: u8, last: bool, backend: &mut dyn Backend) {
        if self.data_pos < 2 {
            if self.data_pos == 0 {
                self.reg_addr = (value as u16) << 8;
            } else {
                self.reg_addr |= value as u16;
            }

            // unaligned register addresses still advance by two afterwards;
            // hardware behaviour unverified
            #[cfg(feature = "log")]
            if self.reg_addr & 1 != 0 && self.data_pos == 1 {
                slog::warn!(self.logger, "Unaligned register address {:#06X}", self.reg_addr);
            }
        } else if self.data_pos & 1 != 0 {
            self.reg_data |= value as u16;
            let (addr, data) = (self.reg_addr, self.reg_data);
            self.reg_write(addr, data, backend);
            self.reg_addr = self.reg_addr.wrapping_add(2);
        } else {
            self.reg_data = (value as u16) << 8;
        }

        if last {
            self.data_pos = 0;
        } else {
            self.data_pos += 1;
        }
    }

    fn reg_read(&self, addr: u16) -> u16 {
        match addr {
            // chip ID
            0x0000 => 0x2280,
            0x0010 => self.pll_div,
            0x0012 => self.pll_p_div,
            0x0014 => self.pll_cnt,
            0x0016 => self.clocks_cnt,
            0x0018 => self.standby_cnt,
            0x001A => self.misc_cnt,

            0x098C => self.mcu_addr,
            0x0990 | 0x0992 | 0x0994 | 0x0996 | 0x0998 | 0x099A | 0x099C | 0x099E => {
                let offset = addr - 0x0990;
                let base = (self.mcu_addr & 0x7FFF).wrapping_add(offset);
                let mut result = self.mcu_read(base) as u16;
                if self.mcu_addr & (1 << 15) == 0 {
                    result |= (self.mcu_read(base.wrapping_add(1)) as u16) << 8;
                }
                result
            }

            0x301A => (!self.standby_cnt & 0x4000) >> 12,

            _ => {
                #[cfg(feature = "log")]
                slog::debug!(self.logger, "Unknown read {:#06X}", addr);
                0
            }
        }
    }

    fn reg_write(&mut self, addr: u16, value: u16, backend: &mut dyn Backend) {
        match addr {
            0x0010 => self.pll_div = value & 0x3FFF,
            0x0012 => self.pll_p_div = value & 0xBFFF,
            0x0014 => {
                // the lock flag follows the enable bit; not modelled as a
                // settling delay
                let value = value & 0x7FFF;
                self.pll_cnt = value | ((value & 0x0002) << 14);
            }
            0x0016 => self.clocks_cnt = value,
            0x0018 => {
                let was_active = self.is_activated();
                let value = value & 0x003F;
                self.standby_cnt = value | ((value & 0x0001) << 14);
                self.update_activation(was_active, backend);
            }
            0x001A => {
                let was_active = self.is_activated();
                self.misc_cnt = value & 0x0B7B;
                self.update_activation(was_active, backend);
            }

            0x098C => self.mcu_addr = value,
            0x0990 | 0x0992 | 0x0994 | 0x0996 | 0x0998 | 0x099A | 0x099C | 0x099E => {
                let offset = addr - 0x0990;
                let base = (self.mcu_addr & 0x7FFF).wrapping_add(offset);
                self.mcu_write(base, value as u8);
                if self.mcu_addr & (1 << 15) == 0 {
                    self.mcu_write(base.wrapping_add(1), (value >> 8) as u8);
                }
            }

            _ => {
                #[cfg(feature = "log")]
                slog::debug!(self.logger, "Unknown write {:#06X} {:#06X}", addr, value);
            }
        }
    }

    fn update_activation(&mut self, was_active: bool, backend: &mut dyn Backend) {
        let is_active = self.is_activated();
        if is_active && !was_active {
            backend.start(self.num);
        } else if was_active && !is_active {
            backend.stop(self.num);
        }
    }

    fn mcu_read(&self, addr: u16) -> u8 {
        self.mcu_regs[(addr & 0x7FFF) as usize]
    }

    fn mcu_write(&mut self, addr: u16, value: u8) {
        let addr = (addr & 0x7FFF) as usize;

        match addr {
            // SEQ_CMD
            0x2103 => {
                self.mcu_regs[addr] = 0;
                match value {
                    // capture mode
                    2 => self.mcu_regs[0x2104] = 7,
                    // preview mode
                    1 => self.mcu_regs[0x2104] = 3,
                    5 | 6 => {}
                    _ => {
                        #[cfg(feature = "log")]
                        slog::debug!(self.logger, "Atypical SEQ_CMD {:#04X}", value);
                    }
                }
            }

            // SEQ_STATE, read-only
            0x2104 => {}

            _ => self.mcu_regs[addr] = value,
        }
    }

    /// Accepts a frame pushed by the frontend, rescaling it to the 640×480
    /// YUYV staging format.
    pub fn input_frame(&mut self, data: &[u32], width: usize, height: usize, rgb: bool) {
        if width == 640 && height == 480 && !rgb {
            self.frame_buffer.copy_from_slice(&data[..FRAME_BUFFER_LEN]);
            return;
        }

        if rgb {
            for dy in 0..480 {
                let sy = (dy * height) / 480;

                for dx in (0..640).step_by(2) {
                    let sx0 = (dx * width) / 640;
                    let pixel1 = data[sy * width + sx0];
                    let sx1 = ((dx + 1) * width) / 640;
                    let pixel2 = data[sy * width + sx1];

                    let r1 = ((pixel1 >> 16) & 0xFF) as i32;
                    let g1 = ((pixel1 >> 8) & 0xFF) as i32;
                    let b1 = (pixel1 & 0xFF) as i32;

                    let r2 = ((pixel2 >> 16) & 0xFF) as i32;
                    let g2 = ((pixel2 >> 8) & 0xFF) as i32;
                    let b2 = (pixel2 & 0xFF) as i32;

                    let y1 = ((r1 * 19595) + (g1 * 38470) + (b1 * 7471)) >> 16;
                    let u1 = ((b1 - y1) * 32244) >> 16;
                    let v1 = ((r1 - y1) * 57475) >> 16;

                    let y2 = ((r2 * 19595) + (g2 * 38470) + (b2 * 7471)) >> 16;
                    let u2 = ((b2 - y2) * 32244) >> 16;
                    let v2 = ((r2 - y2) * 57475) >> 16;

                    let y1 = y1.clamp(0, 255);
                    let u1 = (u1 + 128).clamp(0, 255);
                    let v1 = (v1 + 128).clamp(0, 255);
                    let y2 = y2.clamp(0, 255);
                    let u2 = (u2 + 128).clamp(0, 255);
                    let v2 = (v2 + 128).clamp(0, 255);

                    // chroma is shared between the pixel pair
                    let u = (u1 + u2) >> 1;
                    let v = (v1 + v2) >> 1;

                    self.frame_buffer[(dy * 640 + dx) / 2] =
                        y1 as u32 | ((u as u32) << 8) | ((y2 as u32) << 16) | ((v as u32) << 24);
                }
            }
        } else {
            for dy in 0..480 {
                let sy = (dy * height) / 480;

                for dx in (0..640).step_by(2) {
                    let sx = (dx * width) / 640;
                    self.frame_buffer[(dy * 640 + dx) / 2] = data[(sy * width + sx) / 2];
                }
            }
        }
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        file.section([b'C', b'A', b'M', b'0' + self.num]);

        file.var_u32(&mut self.data_pos);
        let mut reg_addr = self.reg_addr as u32;
        file.var_u32(&mut reg_addr);
        self.reg_addr = reg_addr as u16;
        file.var_u16(&mut self.reg_data);

        file.var_u16(&mut self.pll_div);
        file.var_u16(&mut self.pll_p_div);
        file.var_u16(&mut self.pll_cnt);
        file.var_u16(&mut self.clocks_cnt);
        file.var_u16(&mut self.standby_cnt);
        file.var_u16(&mut self.misc_cnt);

        file.var_u16(&mut self.mcu_addr);
        file.bytes(&mut self.mcu_regs);
    }
}
