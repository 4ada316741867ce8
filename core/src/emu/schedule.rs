use crate::utils::Savestate;

pub type RawTimestamp = u64;

#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(pub RawTimestamp);

/// One slot per event source; at most one pending occurrence each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Event {
    CamIrq,
    CamTransfer,
    SdmmcTransfer,
    SdioTransfer,
    NWifiTimer,
    SpiDataReady,
    SoftReset,
}

pub const EVENT_SLOTS: [Event; 7] = [
    Event::CamIrq,
    Event::CamTransfer,
    Event::SdmmcTransfer,
    Event::SdioTransfer,
    Event::NWifiTimer,
    Event::SpiDataReady,
    Event::SoftReset,
];

#[derive(Clone, Copy)]
struct Slot {
    time: RawTimestamp,
    param: u32,
    armed: bool,
}

pub struct Schedule {
    cur_time: RawTimestamp,
    slots: [Slot; EVENT_SLOTS.len()],
}

impl Schedule {
    pub(crate) fn new() -> Self {
        Schedule {
            cur_time: 0,
            slots: [Slot {
                time: 0,
                param: 0,
                armed: false,
            }; EVENT_SLOTS.len()],
        }
    }

    #[inline]
    pub fn cur_time(&self) -> RawTimestamp {
        self.cur_time
    }

    #[inline]
    pub(crate) fn set_cur_time(&mut self, value: RawTimestamp) {
        self.cur_time = value;
    }

    /// Arms `event` to fire `delay` cycles from now, or, for a `periodic`
    /// reschedule, `delay` cycles after the slot's previous fire time so the
    /// cadence stays drift-free.
    pub fn schedule(&mut self, event: Event, periodic: bool, delay: RawTimestamp, param: u32) {
        let slot = &mut self.slots[event as usize];
        let base = if periodic { slot.time } else { self.cur_time };
        slot.time = base + delay;
        slot.param = param;
        slot.armed = true;
    }

    pub fn cancel(&mut self, event: Event) {
        self.slots[event as usize].armed = false;
    }

    #[inline]
    pub fn is_scheduled(&self, event: Event) -> bool {
        self.slots[event as usize].armed
    }

    pub fn next_event_time(&self) -> RawTimestamp {
        self.slots
            .iter()
            .filter(|slot| slot.armed)
            .map(|slot| slot.time)
            .min()
            .unwrap_or(RawTimestamp::MAX)
    }

    /// Pops the earliest event with a fire time at or before the current
    /// time, if any.
    pub(crate) fn pop_due(&mut self) -> Option<(Event, u32)> {
        let mut best: Option<usize> = None;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.armed && slot.time <= self.cur_time {
                match best {
                    Some(b) if self.slots[b].time <= slot.time => {}
                    _ => best = Some(i),
                }
            }
        }
        let i = best?;
        self.slots[i].armed = false;
        Some((EVENT_SLOTS[i], self.slots[i].param))
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        file.var_u64(&mut self.cur_time);
        for slot in &mut self.slots {
            file.var_u64(&mut slot.time);
            file.var_u32(&mut slot.param);
            file.var_bool32(&mut slot.armed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_fire_in_timestamp_order() {
        let mut schedule = Schedule::new();
        schedule.schedule(Event::CamIrq, false, 100, 0);
        schedule.schedule(Event::NWifiTimer, false, 50, 7);
        schedule.set_cur_time(100);
        assert_eq!(schedule.pop_due(), Some((Event::NWifiTimer, 7)));
        assert_eq!(schedule.pop_due(), Some((Event::CamIrq, 0)));
        assert_eq!(schedule.pop_due(), None);
    }

    #[test]
    fn periodic_reschedule_is_drift_free() {
        let mut schedule = Schedule::new();
        schedule.schedule(Event::NWifiTimer, false, 100, 0);
        schedule.set_cur_time(130);
        assert!(schedule.pop_due().is_some());
        schedule.schedule(Event::NWifiTimer, true, 100, 0);
        assert_eq!(schedule.next_event_time(), 200);
    }

    #[test]
    fn no_pending_event_precedes_cur_time() {
        let mut schedule = Schedule::new();
        schedule.schedule(Event::CamIrq, false, 10, 0);
        schedule.schedule(Event::SdmmcTransfer, false, 25, 1);
        schedule.set_cur_time(40);
        while schedule.pop_due().is_some() {}
        assert!(schedule.next_event_time() >= schedule.cur_time());
    }
}
