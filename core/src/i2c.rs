//! The I²C host at `0x04004500`: a bit-serial transfer engine whose CNT write
//! performs one byte transfer towards the selected device (BPTWL power
//! management or one of the two camera sensors).

pub mod bptwl;
pub mod camera;

use crate::utils::Savestate;
use bptwl::Bptwl;
use camera::Camera;

pub struct I2c {
    #[cfg(feature = "log")]
    logger: slog::Logger,
    pub cnt: u8,
    data: u8,
    cur_device_id: u8,

    pub bptwl: Bptwl,
    pub camera0: Camera,
    pub camera1: Camera,
    pub camera_backend: Box<dyn camera::Backend>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Device {
    None,
    Bptwl,
    Camera0,
    Camera1,
}

impl I2c {
    pub(crate) fn new(
        camera_backend: Box<dyn camera::Backend>,
        #[cfg(feature = "log")] logger: slog::Logger,
    ) -> Self {
        I2c {
            bptwl: Bptwl::new(),
            camera0: Camera::new(
                0,
                #[cfg(feature = "log")]
                logger.new(slog::o!("cam" => 0_usize)),
            ),
            camera1: Camera::new(
                1,
                #[cfg(feature = "log")]
                logger.new(slog::o!("cam" => 1_usize)),
            ),
            camera_backend,
            #[cfg(feature = "log")]
            logger,
            cnt: 0,
            data: 0,
            cur_device_id: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.cnt = 0;
        self.data = 0;
        self.cur_device_id = 0;

        self.bptwl.reset();
        self.camera0.reset(&mut *self.camera_backend);
        self.camera1.reset(&mut *self.camera_backend);
    }

    fn cur_device(&mut self) -> Device {
        match self.cur_device_id {
            0x4A => Device::Bptwl,
            0x78 => Device::Camera0,
            0x7A => Device::Camera1,
            0xA0 | 0xE0 => Device::None,
            _ => {
                #[cfg(feature = "log")]
                slog::warn!(self.logger, "Unknown device {:#04X}", self.cur_device_id);
                Device::None
            }
        }
    }

    #[inline]
    pub fn read_data(&self) -> u8 {
        self.data
    }

    #[inline]
    pub fn write_data(&mut self, value: u8) {
        self.data = value;
    }

    #[inline]
    pub fn read_cnt(&self) -> u8 {
        self.cnt
    }

    /// CNT bit 7 starts one byte transfer: bit 5 selects the direction,
    /// bit 1 a start condition (the data register carries the device ID),
    /// bit 0 marks the final byte of the transfer. Bit 4 reports the ACK.
    pub fn write_cnt(&mut self, value: u8, cx: &mut bptwl::Cx) {
        let mut value = value;

        if value & (1 << 7) != 0 {
            let is_last = value & (1 << 0) != 0;

            if value & (1 << 5) != 0 {
                // read
                value &= 0xF7;

                self.data = match self.cur_device() {
                    Device::Bptwl => self.bptwl.read(is_last),
                    Device::Camera0 => self.camera0.read(is_last),
                    Device::Camera1 => self.camera1.read(is_last),
                    Device::None => 0xFF,
                };
            } else {
                // write
                value &= 0xE7;
                let mut ack = true;

                if value & (1 << 1) != 0 {
                    self.cur_device_id = self.data & 0xFE;

                    match self.cur_device() {
                        Device::Bptwl => self.bptwl.acquire(),
                        Device::Camera0 => self.camera0.acquire(),
                        Device::Camera1 => self.camera1.acquire(),
                        Device::None => ack = false,
                    }
                } else {
                    let data = self.data;
                    match self.cur_device() {
                        Device::Bptwl => self.bptwl.write(data, is_last, cx),
                        Device::Camera0 => {
                            self.camera0.write(data, is_last, &mut *self.camera_backend);
                        }
                        Device::Camera1 => {
                            self.camera1.write(data, is_last, &mut *self.camera_backend);
                        }
                        Device::None => ack = false,
                    }
                }

                if ack {
                    value |= 1 << 4;
                }
            }

            value &= 0x7F;
        }

        self.cnt = value;
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        file.section(*b"I2Ci");

        file.var_u8(&mut self.cnt);
        file.var_u8(&mut self.data);
        file.var_u8(&mut self.cur_device_id);

        self.bptwl.do_savestate(file);
        self.camera0.do_savestate(file);
        self.camera1.do_savestate(file);
    }
}
