use crate::utils::Savestate;

/// DSi GPIO register file at `0x04004C00`. The pins have no modelled
/// hardware behind them; the registers are stored so guest read-back works.
pub struct Gpio {
    pub data: u8,
    pub dir: u8,
    pub edge_sel: u8,
    pub irq_enable: u8,
    pub wifi: u16,
}

impl Gpio {
    pub(crate) fn new() -> Self {
        Gpio {
            data: 0,
            dir: 0,
            edge_sel: 0,
            irq_enable: 0,
            wifi: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        // the data pins float high after reset; sound-out is the only output
        self.data = 0xFF;
        self.dir = 0x80;
        self.edge_sel = 0;
        self.irq_enable = 0;
        self.wifi = 0;
    }

    pub fn do_savestate(&mut self, file: &mut Savestate) {
        file.var_u8(&mut self.data);
        file.var_u8(&mut self.dir);
        file.var_u8(&mut self.edge_sel);
        file.var_u8(&mut self.irq_enable);
        file.var_u16(&mut self.wifi);
    }
}
