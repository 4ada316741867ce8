//! A minimal SPI controller carrying the touchscreen controller. The other
//! SPI devices (firmware flash, DS power manager) belong to the base console
//! and are not modelled; accesses to them are logged.

pub mod tsc;

use crate::emu::{
    irqs::{irq, Irqs},
    schedule::{Event, Schedule},
};
use crate::utils::Savestate;
use tsc::Tsc;

proc_bitfield::bitfield! {
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Control(pub u16): Debug {
        pub baud_rate: u8 @ 0..=1,
        pub busy: bool @ 7,
        pub device: u8 @ 8..=9,
        pub transfer_size: bool @ 10,
        pub hold: bool @ 11,
        pub irq_enabled: bool @ 14,
        pub enabled: bool @ 15,
    }
}

pub struct Controller {
    #[cfg(feature = "log")]
    logger: slog::Logger,
    control: Control,
    data_out: u8,
    tsc_hold: bool,
    pub tsc: Tsc,
}

impl Controller {
    pub(crate) fn new(#[cfg(feature = "log")] logger: slog::Logger) -> Self {
        Controller {
            tsc: Tsc::new(
                #[cfg(feature = "log")]
                logger.new(slog::o!("tsc" => "")),
            ),
            #[cfg(feature = "log")]
            logger,
            control: Control(0),
            data_out: 0,
            tsc_hold: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.control = Control(0);
        self.data_out = 0;
        self.tsc_hold = false;
        self.tsc.reset();
    }

    #[inline]
    pub fn control(&self) -> Control {
        self.control
    }

    pub fn set_control(&mut self, value: Control) {
        if !value.enabled() && self.control.enabled() {
            // disabling the controller releases every chip select
            self.tsc_hold = false;
            self.tsc.release();
        }
        self.control.0 = (self.control.0 & 0x0080) | (value.0 & 0xCF03);
    }

    #[inline]
    pub fn read_data(&self) -> u8 {
        self.data_out
    }

    pub(crate) fn handle_data_ready(&mut self, irqs: &mut Irqs) {
        self.control.set_busy(false);
        if self.control.irq_enabled() {
            irqs.set_irq(irq::SPI);
        }
    }

    pub fn write_data(&mut self, value: u8, schedule: &mut Schedule, key_input: &mut u32) {
        if self.control.busy() || !self.control.enabled() {
            return;
        }
        self.control.set_busy(true);

        self.data_out = match self.control.device() {
            2 => {
                self.tsc_hold = self.control.hold();
                let result = self.tsc.write(value, key_input);
                if !self.tsc_hold {
                    self.tsc.release();
                }
                result
            }
            _device => {
                #[cfg(feature = "log")]
                slog::warn!(
                    self.logger,
                    "Accessing unhandled device {}: {:#04X}",
                    _device,
                    value
                );
                0
            }
        };

        // 8 bits at (8 << baud rate) cycles per bit
        schedule.schedule(
            Event::SpiDataReady,
            false,
            64_u64 << self.control.baud_rate(),
            0,
        );
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        file.section(*b"SPIC");

        file.var_u16(&mut self.control.0);
        file.var_u8(&mut self.data_out);
        file.var_bool32(&mut self.tsc_hold);

        self.tsc.do_savestate(file);
    }
}
