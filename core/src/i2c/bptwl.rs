//! The BPTWL power-management device at I²C address `0x4A`: power/volume/
//! backlight registers, latched IRQ flags, and the power-button and
//! volume-switch timing state machines.

use crate::emu::{
    irqs::{irq2, Irqs},
    schedule::{Event, Schedule},
    StopReason,
};
use crate::utils::Savestate;

// approximations; the real controller's thresholds are not documented
const POWER_BUTTON_SHUTDOWN_TIME: f64 = 0.5;
const POWER_BUTTON_FORCED_SHUTDOWN_TIME: f64 = 5.0;
const VOLUME_SWITCH_REPEAT_START: f64 = 0.5;
const VOLUME_SWITCH_REPEAT_RATE: f64 = 1.0 / 6.0;

// no clean formula reproduces these curves, so they stay tables
const VOLUME_DOWN_TABLE: [u8; 32] = [
    0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x02, 0x03, 0x04, 0x05, 0x06, 0x06, 0x07, 0x08, 0x09,
    0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18,
    0x19, 0x1A,
];

const VOLUME_UP_TABLE: [u8; 32] = [
    0x02, 0x03, 0x06, 0x07, 0x08, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x12, 0x13,
    0x14, 0x15, 0x16, 0x17, 0x18, 0x19, 0x1A, 0x1B, 0x1C, 0x1D, 0x1E, 0x1F, 0x1F, 0x1F, 0x1F,
    0x1F, 0x1F,
];

bitflags::bitflags! {
    /// Event bits latched into register 0x10.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct IrqFlags: u8 {
        const POWER_BUTTON_RESET = 1 << 0;
        const POWER_BUTTON_SHUTDOWN = 1 << 1;
        const POWER_BUTTON_PRESSED = 1 << 3;
        const BATTERY_EMPTY = 1 << 4;
        const BATTERY_LOW = 1 << 5;
        const VOLUME_SWITCH_PRESSED = 1 << 6;
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VolumeKey {
    Up = 0,
    Down = 1,
}

/// Console-side effects of a BPTWL action: a raised IRQ2, a scheduled soft
/// reset, or a shutdown request.
pub struct Cx<'a> {
    pub schedule: &'a mut Schedule,
    pub irqs: &'a mut Irqs,
    pub stop: &'a mut Option<StopReason>,
}

pub struct Bptwl {
    registers: [u8; 0x100],
    cur_pos: i32,

    power_button_time: f64,
    power_button_down: bool,
    power_button_shutdown: bool,

    volume_switch_keys_down: u32,
    volume_switch_down: bool,
    volume_switch_time: f64,
    volume_switch_repeat_time: f64,
}

impl Bptwl {
    pub(super) fn new() -> Self {
        let mut bptwl = Bptwl {
            registers: [0; 0x100],
            cur_pos: -1,
            power_button_time: 0.0,
            power_button_down: false,
            power_button_shutdown: false,
            volume_switch_keys_down: 0,
            volume_switch_down: false,
            volume_switch_time: 0.0,
            volume_switch_repeat_time: 0.0,
        };
        bptwl.reset();
        bptwl
    }

    pub(super) fn reset(&mut self) {
        self.cur_pos = -1;
        self.registers = [0x5A; 0x100];

        self.registers[0x00] = 0x33;
        self.registers[0x01] = 0x00;
        self.registers[0x02] = 0x50;
        // irq flag / reset / irq mode
        self.registers[0x10] = 0x00;
        self.registers[0x11] = 0x00;
        self.registers[0x12] = 0x00;
        // battery
        self.registers[0x20] = 0x8F;
        self.registers[0x21] = 0x07;
        self.registers[0x30] = 0x13;
        // camera power
        self.registers[0x31] = 0x00;
        // volume
        self.registers[0x40] = 0x1F;
        // backlight
        self.registers[0x41] = 0x04;
        self.registers[0x60] = 0x00;
        self.registers[0x61] = 0x01;
        self.registers[0x62] = 0x50;
        self.registers[0x63] = 0x00;
        // boot flag
        self.registers[0x70] = 0x00;
        for reg in 0x71..=0x77 {
            self.registers[reg] = 0x00;
        }
        self.registers[0x80] = 0x10;
        self.registers[0x81] = 0x64;

        self.power_button_time = 0.0;
        self.power_button_down = false;
        self.power_button_shutdown = false;
        self.volume_switch_keys_down = 0;
        self.volume_switch_down = false;
        self.volume_switch_time = 0.0;
        self.volume_switch_repeat_time = 0.0;
    }

    #[inline]
    fn irq_mode(&self) -> bool {
        self.registers[0x12] & 0x01 != 0
    }

    #[inline]
    pub fn boot_flag(&self) -> u8 {
        self.registers[0x70]
    }

    #[inline]
    pub fn volume_level(&self) -> u8 {
        self.registers[0x40]
    }

    pub fn set_volume_level(&mut self, volume: u8) {
        self.registers[0x40] = volume & 0x1F;
    }

    #[inline]
    pub fn backlight_level(&self) -> u8 {
        self.registers[0x41]
    }

    pub fn set_backlight_level(&mut self, backlight: u8) {
        self.registers[0x41] = backlight.min(4);
    }

    #[inline]
    pub fn battery_charging(&self) -> bool {
        self.registers[0x20] >> 7 != 0
    }

    pub fn set_battery_charging(&mut self, charging: bool) {
        self.registers[0x20] = (self.registers[0x20] & 0x0F) | if charging { 0x80 } else { 0x00 };
    }

    #[inline]
    pub fn battery_level(&self) -> u8 {
        self.registers[0x20] & 0xF
    }

    pub fn set_battery_level(&mut self, level: u8, cx: &mut Cx) {
        self.registers[0x20] = (self.registers[0x20] & 0xF0) | (level & 0x0F);

        if level <= 1 {
            self.set_irq(
                if level != 0 {
                    IrqFlags::BATTERY_LOW
                } else {
                    IrqFlags::BATTERY_EMPTY
                },
                cx,
            );
        }
    }

    fn set_irq(&mut self, flags: IrqFlags, cx: &mut Cx) {
        self.registers[0x10] |= flags.bits();

        if self.irq_mode() {
            cx.irqs.set_irq2(irq2::BPTWL);
        }
    }

    fn reset_button_state(&mut self) {
        self.power_button_time = 0.0;
        self.power_button_down = false;
        self.power_button_shutdown = false;

        self.volume_switch_keys_down = 0;
        self.volume_switch_down = false;
        self.volume_switch_time = 0.0;
        self.volume_switch_repeat_time = 0.0;
    }

    fn do_hardware_reset(&mut self, cx: &mut Cx) {
        self.reset_button_state();
        // the reset proper runs at the next event boundary, outside any
        // in-flight bus access
        cx.schedule.schedule(Event::SoftReset, false, 0, 0);
    }

    fn do_shutdown(&mut self, cx: &mut Cx) {
        self.reset_button_state();
        *cx.stop = Some(StopReason::PowerOff);
    }

    /// Called by the frontend with a wall-clock timestamp while the power
    /// button is held. Crossing 0.5 s raises the shutdown IRQ (or shuts down
    /// in hardware mode); 5 s forces shutdown regardless of mode.
    pub fn set_power_button_held(&mut self, time: f64, cx: &mut Cx) {
        if !self.power_button_down {
            self.power_button_down = true;
            self.power_button_time = time;
            self.set_irq(IrqFlags::POWER_BUTTON_PRESSED, cx);
            return;
        }

        let elapsed = time - self.power_button_time;
        if elapsed < 0.0 {
            return;
        }

        if elapsed >= POWER_BUTTON_FORCED_SHUTDOWN_TIME {
            self.do_shutdown(cx);
            return;
        }

        if elapsed >= POWER_BUTTON_SHUTDOWN_TIME {
            // the IRQ fires once, but the hardware shutdown keeps
            // triggering, so toggling the IRQ mode while holding the button
            // still powers the console off
            if !self.power_button_shutdown {
                self.set_irq(IrqFlags::POWER_BUTTON_SHUTDOWN, cx);
            }
            self.power_button_shutdown = true;

            if !self.irq_mode() {
                self.do_shutdown(cx);
            }
        }
    }

    pub fn set_power_button_released(&mut self, time: f64, cx: &mut Cx) {
        let elapsed = time - self.power_button_time;
        if (0.0..POWER_BUTTON_SHUTDOWN_TIME).contains(&elapsed) {
            self.set_irq(IrqFlags::POWER_BUTTON_RESET, cx);
            if !self.irq_mode() {
                self.do_hardware_reset(cx);
            }
        }

        self.power_button_time = 0.0;
        self.power_button_down = false;
        self.power_button_shutdown = false;
    }

    pub fn set_volume_switch_held(&mut self, key: VolumeKey) {
        self.volume_switch_keys_down |= 1 << key as u32;
    }

    pub fn set_volume_switch_released(&mut self, key: VolumeKey) {
        self.volume_switch_keys_down &= !(1 << key as u32);
        self.volume_switch_down = false;
        self.volume_switch_time = 0.0;
        self.volume_switch_repeat_time = 0.0;
    }

    fn volume_switch_key(&self) -> Option<VolumeKey> {
        let up = self.volume_switch_keys_down & (1 << VolumeKey::Up as u32) != 0;
        let down = self.volume_switch_keys_down & (1 << VolumeKey::Down as u32) != 0;
        match (up, down) {
            (true, false) => Some(VolumeKey::Up),
            (false, true) => Some(VolumeKey::Down),
            _ => None,
        }
    }

    /// Auto-repeat: the first press applies immediately, repeats start after
    /// 0.5 s and then fire six times per second. Returns the applied key.
    pub fn process_volume_switch_input(&mut self, time: f64, cx: &mut Cx) -> Option<VolumeKey> {
        let key = self.volume_switch_key()?;

        if !self.volume_switch_down {
            self.volume_switch_down = true;
            self.volume_switch_time = time;
            self.do_volume_switch_press(key, cx);
            return Some(key);
        }

        if self.volume_switch_repeat_time == 0.0 {
            let elapsed = time - self.volume_switch_time;
            if elapsed < VOLUME_SWITCH_REPEAT_START {
                return None;
            }

            self.volume_switch_repeat_time = time;
            self.do_volume_switch_press(key, cx);
            return Some(key);
        }

        let elapsed = time - self.volume_switch_repeat_time;
        if elapsed < VOLUME_SWITCH_REPEAT_RATE {
            return None;
        }

        let rem = elapsed % VOLUME_SWITCH_REPEAT_RATE;
        self.volume_switch_repeat_time = time - rem;
        self.do_volume_switch_press(key, cx);
        Some(key)
    }

    fn do_volume_switch_press(&mut self, key: VolumeKey, cx: &mut Cx) {
        let volume = self.registers[0x40] as usize & 0x1F;
        self.registers[0x40] = match key {
            VolumeKey::Up => VOLUME_UP_TABLE[volume],
            VolumeKey::Down => VOLUME_DOWN_TABLE[volume],
        };

        self.set_irq(IrqFlags::VOLUME_SWITCH_PRESSED, cx);
    }

    pub(super) fn acquire(&mut self) {}

    pub(super) fn read(&mut self, last: bool) -> u8 {
        let pos = self.cur_pos as usize & 0xFF;
        let result = self.registers[pos];

        // the IRQ flags clear on read
        if pos == 0x10 {
            self.registers[0x10] = 0;
        }

        self.cur_pos += 1;

        if last {
            self.cur_pos = -1;
        }

        result
    }

    pub(super) fn write(&mut self, value: u8, last: bool, cx: &mut Cx) {
        if last {
            self.cur_pos = -1;
            return;
        }

        if self.cur_pos < 0 {
            self.cur_pos = value as i32;
            return;
        }
        let pos = self.cur_pos as usize & 0xFF;

        if pos == 0x11 && value == 0x01 {
            self.do_hardware_reset(cx);
            self.cur_pos = -1;
            return;
        }

        let mut value = value;
        if pos == 0x40 {
            value &= 0x1F;
        }
        if pos == 0x41 {
            value = value.min(4);
        }

        if matches!(
            pos,
            0x11 | 0x12 | 0x21 | 0x30 | 0x31 | 0x40 | 0x41 | 0x60 | 0x63 | 0x70..=0x77 | 0x80
                | 0x81
        ) {
            self.registers[pos] = value;
        }

        self.cur_pos += 1;
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        file.section(*b"I2BP");

        file.bytes(&mut self.registers);
        let mut cur_pos = self.cur_pos as u32;
        file.var_u32(&mut cur_pos);
        self.cur_pos = cur_pos as i32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emu::irqs::Irqs;
    use crate::emu::schedule::Schedule;
    use crate::emu::StopReason;

    fn with_cx<R>(f: impl FnOnce(&mut Bptwl, &mut Cx) -> R) -> (R, Option<StopReason>) {
        let mut bptwl = Bptwl::new();
        let mut schedule = Schedule::new();
        let mut irqs = Irqs::new();
        let mut stop = None;
        let result = {
            let mut cx = Cx {
                schedule: &mut schedule,
                irqs: &mut irqs,
                stop: &mut stop,
            };
            f(&mut bptwl, &mut cx)
        };
        (result, stop)
    }

    #[test]
    fn volume_tables_are_monotone() {
        for i in 0..32 {
            assert!(VOLUME_UP_TABLE[i] as usize >= i);
            assert!(VOLUME_DOWN_TABLE[i] as usize <= i);
            if i > 0 {
                assert!(VOLUME_UP_TABLE[i] >= VOLUME_UP_TABLE[i - 1]);
                assert!(VOLUME_DOWN_TABLE[i] >= VOLUME_DOWN_TABLE[i - 1]);
            }
        }
    }

    #[test]
    fn volume_switch_repeats_after_half_a_second() {
        with_cx(|bptwl, cx| {
            bptwl.set_volume_level(0x10);
            bptwl.set_volume_switch_held(VolumeKey::Up);

            assert_eq!(bptwl.process_volume_switch_input(0.0, cx), Some(VolumeKey::Up));
            assert_eq!(bptwl.volume_level(), VOLUME_UP_TABLE[0x10]);

            // held, but repeat delay not yet elapsed
            assert_eq!(bptwl.process_volume_switch_input(0.3, cx), None);
            let level = bptwl.volume_level();

            // one repeat fires at 0.7 s
            assert_eq!(bptwl.process_volume_switch_input(0.7, cx), Some(VolumeKey::Up));
            assert_eq!(bptwl.volume_level(), VOLUME_UP_TABLE[level as usize]);

            // further presses inside the repeat rate are debounced
            assert_eq!(bptwl.process_volume_switch_input(0.75, cx), None);
            assert!(bptwl.process_volume_switch_input(0.88, cx).is_some());
        });
    }

    #[test]
    fn short_power_button_press_requests_reset_irq() {
        let (_, stop) = with_cx(|bptwl, cx| {
            // IRQ mode: the reset is reported, not performed
            bptwl.write(0x12, false, cx);
            bptwl.write(0x01, false, cx);
            bptwl.cur_pos = -1;

            bptwl.set_power_button_held(0.0, cx);
            bptwl.set_power_button_released(0.2, cx);
            assert!(IrqFlags::from_bits_truncate(bptwl.registers[0x10])
                .contains(IrqFlags::POWER_BUTTON_RESET));
        });
        assert_eq!(stop, None);
    }

    #[test]
    fn long_power_button_hold_forces_shutdown() {
        let (_, stop) = with_cx(|bptwl, cx| {
            bptwl.set_power_button_held(0.0, cx);
            bptwl.set_power_button_held(5.5, cx);
        });
        assert_eq!(stop, Some(StopReason::PowerOff));
    }

    #[test]
    fn irq_flags_clear_on_read() {
        with_cx(|bptwl, cx| {
            bptwl.set_power_button_held(0.0, cx);
            bptwl.cur_pos = 0x10;
            assert_ne!(bptwl.read(true), 0);
            bptwl.cur_pos = 0x10;
            assert_eq!(bptwl.read(true), 0);
        });
    }
}
