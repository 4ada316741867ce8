//! End-to-end scenarios driven through the bus, the way the guest software
//! reaches the hardware.

use twl_core::{
    aes, bus,
    emu::{Builder, Emu},
    nand::FAT_BASE,
};

const FOOTER_TAG: &[u8; 16] = b"DSi eMMC CID/CPU";

fn nand_image() -> Box<[u8]> {
    let mut contents = vec![0; FAT_BASE as usize + 0x10_0000 + 0x40].into_boxed_slice();
    let footer = contents.len() - 0x40;
    contents[footer..footer + 16].copy_from_slice(FOOTER_TAG);
    contents[footer + 0x10..footer + 0x20].copy_from_slice(&[
        0xA0, 0xA1, 0xA2, 0xA3, 0xA4, 0xA5, 0xA6, 0xA7, 0xA8, 0xA9, 0xAA, 0xAB, 0xAC, 0xAD, 0xAE,
        0xAF,
    ]);
    contents[footer + 0x20..footer + 0x28].copy_from_slice(&0x0123_4567_89AB_CDEF_u64.to_le_bytes());
    for (i, byte) in contents[0x400..0x600].iter_mut().enumerate() {
        *byte = (i * 3) as u8;
    }
    contents
}

fn emu() -> Emu {
    let mut builder = Builder::new(
        #[cfg(feature = "log")]
        slog::Logger::root(slog::Discard, slog::o!()),
    );
    builder.nand_contents = Some(nand_image());
    builder.direct_boot = false;
    builder.build().unwrap()
}

#[test]
fn nwram_byte_is_visible_per_cpu_window() {
    let mut emu = emu();

    // slot A0 to the ARM9, window slot 0; ARM9 window A at 0x03000000
    bus::arm9::write_32(&mut emu, 0x0400_4040, 0x0000_0080);
    bus::arm9::write_32(&mut emu, 0x0400_4054, 0x0930_3000);

    bus::arm9::write_8(&mut emu, 0x0300_1234, 0x5A);
    assert_eq!(bus::arm9::read_8(&mut emu, 0x0300_1234), 0x5A);

    // the ARM7 has no window over the slot and falls through to shared WRAM
    assert_eq!(bus::arm7::read_8(&mut emu, 0x0300_1234), 0x00);

    // reroute the slot to the ARM7 (slot routing is ARM9-controlled) and
    // give the ARM7 a window; the same physical slot shows through
    bus::arm9::write_32(&mut emu, 0x0400_4040, 0x0000_0081);
    bus::arm7::write_32(&mut emu, 0x0400_4054, 0x0930_3000);
    bus::arm7::write_8(&mut emu, 0x0300_1234, 0xA7);
    assert_eq!(bus::arm7::read_8(&mut emu, 0x0300_1234), 0xA7);
}

#[test]
fn mbk_writes_are_gated_by_scfg_access_enable() {
    let mut emu = emu();

    let scfg_ext0 = emu.scfg.ext[0] & !(1 << 31);
    bus::arm9::write_32(&mut emu, 0x0400_4008, scfg_ext0);
    assert_eq!(emu.scfg.ext[0] & (1 << 31), 0);

    let before = emu.nwram.mbk[0][0];
    bus::arm9::write_32(&mut emu, 0x0400_4040, 0x0000_0080);
    assert_eq!(emu.nwram.mbk[0][0], before);
}

#[test]
fn ndma_immediate_copy_raises_irq() {
    let mut emu = emu();

    for i in 0..0x100u32 {
        bus::arm9::write_8(&mut emu, 0x0200_0000 + i, i as u8);
    }

    bus::arm9::write_32(&mut emu, 0x0400_4104, 0x0200_0000);
    bus::arm9::write_32(&mut emu, 0x0400_4108, 0x0200_1000);
    bus::arm9::write_32(&mut emu, 0x0400_410C, 0x40);
    bus::arm9::write_32(&mut emu, 0x0400_4110, 0x40);
    // start, IRQ enable, immediate mode
    bus::arm9::write_32(&mut emu, 0x0400_411C, 0xD000_0010);

    emu.run_frame();

    for i in 0..0x100u32 {
        assert_eq!(bus::arm9::read_8(&mut emu, 0x0200_1000 + i), i as u8);
    }
    // IRQ_DSi_NDMA0
    assert_ne!(emu.arm9_irqs.requested & (1 << 28), 0);
    // channel no longer armed
    assert_eq!(bus::arm9::read_32(&mut emu, 0x0400_411C) & 0x8000_0000, 0);
}

#[test]
fn aes_ctr_one_block_matches_the_zero_key_vector() {
    let mut emu = emu();

    bus::arm7::write_32(&mut emu, 0x0400_4404, 1 << 16);
    // start, load key slot 0 (all zeroes), CTR mode
    bus::arm7::write_32(&mut emu, 0x0400_4400, 0xA100_0000);
    for _ in 0..4 {
        bus::arm7::write_32(&mut emu, 0x0400_4408, 0);
    }

    let output: Vec<u32> = (0..4)
        .map(|_| bus::arm7::read_32(&mut emu, 0x0400_440C))
        .collect();
    // E(0) under the zero key, byte-reversed on the way out
    assert_eq!(output, [0xCA34_2B2E, 0x884C_FA59, 0xEF8A_2C3B, 0x66E9_4BD4]);

    // the engine is idle again
    assert_eq!(bus::arm7::read_32(&mut emu, 0x0400_4400) & 0x8000_0000, 0);
}

#[test]
fn aes_ccm_round_trip_verifies_mac() {
    let mut emu = emu();

    let plaintext: [u32; 8] = [
        0x0011_2233,
        0x4455_6677,
        0x8899_AABB,
        0xCCDD_EEFF,
        0x0F1E_2D3C,
        0x4B5A_6978,
        0x8796_A5B4,
        0xC3D2_E1F0,
    ];

    // encrypt: 2 payload blocks, no header blocks
    bus::arm7::write_32(&mut emu, 0x0400_4404, 2 << 16);
    bus::arm7::write_32(&mut emu, 0x0400_4400, 0x9104_0000);
    for word in plaintext {
        bus::arm7::write_32(&mut emu, 0x0400_4408, word);
    }
    assert_eq!(bus::arm7::read_32(&mut emu, 0x0400_4400) & 0x8000_0000, 0);

    let ciphertext: Vec<u32> = (0..8)
        .map(|_| bus::arm7::read_32(&mut emu, 0x0400_440C))
        .collect();
    let mac: Vec<u32> = (0..4)
        .map(|_| bus::arm7::read_32(&mut emu, 0x0400_440C))
        .collect();
    assert_ne!(&ciphertext[..], &plaintext[..]);

    // decrypt with the produced MAC loaded into the MAC registers
    for (i, word) in mac.iter().enumerate() {
        bus::arm7::write_32(&mut emu, 0x0400_4430 + (i as u32) * 4, *word);
    }
    bus::arm7::write_32(&mut emu, 0x0400_4404, 2 << 16);
    bus::arm7::write_32(&mut emu, 0x0400_4400, 0x8114_0000);
    for word in &ciphertext {
        bus::arm7::write_32(&mut emu, 0x0400_4408, *word);
    }

    let decrypted: Vec<u32> = (0..8)
        .map(|_| bus::arm7::read_32(&mut emu, 0x0400_440C))
        .collect();
    assert_eq!(&decrypted[..], &plaintext[..]);
    // MAC verified
    assert_ne!(bus::arm7::read_32(&mut emu, 0x0400_4400) & (1 << 21), 0);
}

#[test]
fn aes_ccm_decrypt_flags_wrong_mac() {
    let mut emu = emu();

    for i in 0..4 {
        bus::arm7::write_32(&mut emu, 0x0400_4430 + i * 4, 0xFFFF_FFFF);
    }
    bus::arm7::write_32(&mut emu, 0x0400_4404, 1 << 16);
    bus::arm7::write_32(&mut emu, 0x0400_4400, 0x8114_0000);
    for _ in 0..4 {
        bus::arm7::write_32(&mut emu, 0x0400_4408, 0x1234_5678);
    }

    assert_eq!(bus::arm7::read_32(&mut emu, 0x0400_4400) & 0x8000_0000, 0);
    assert_eq!(bus::arm7::read_32(&mut emu, 0x0400_4400) & (1 << 21), 0);
}

#[test]
fn aes_output_fifo_threshold_kicks_output_ndma() {
    let mut emu = emu();

    // channel 4 (ARM7) armed on the AES-output start mode
    bus::arm7::write_32(&mut emu, 0x0400_4104, 0x0400_440C);
    bus::arm7::write_32(&mut emu, 0x0400_4108, 0x0200_2000);
    bus::arm7::write_32(&mut emu, 0x0400_410C, 4);
    bus::arm7::write_32(&mut emu, 0x0400_4110, 4);
    // armed, AES-output mode (0x0B | 0x20 on the ARM7 side)
    bus::arm7::write_32(&mut emu, 0x0400_411C, 0x8B00_0000);

    bus::arm7::write_32(&mut emu, 0x0400_4404, 1 << 16);
    bus::arm7::write_32(&mut emu, 0x0400_4400, 0xA100_4000);
    for _ in 0..4 {
        bus::arm7::write_32(&mut emu, 0x0400_4408, 0);
    }

    emu.run_frame();

    assert_eq!(
        bus::arm7::read_32(&mut emu, 0x0200_2000),
        0xCA34_2B2E
    );
}

#[test]
fn sdmmc_reads_a_nand_sector_through_the_fifo() {
    let mut emu = emu();

    let sector_addr = 0x400u32;
    let expected: Vec<u8> = {
        let nand = emu.nand().unwrap();
        let mut buf = vec![0; 0x200];
        nand.read_raw(sector_addr as u64, &mut buf);
        buf
    };

    // select the eMMC port, one 512-byte block
    bus::arm7::write_16(&mut emu, 0x0400_4802, 0x0001);
    bus::arm7::write_16(&mut emu, 0x0400_4826, 0x200);
    bus::arm7::write_16(&mut emu, 0x0400_480A, 1);

    // CMD16: set the card's block length
    bus::arm7::write_16(&mut emu, 0x0400_4804, 0x200);
    bus::arm7::write_16(&mut emu, 0x0400_4806, 0);
    bus::arm7::write_16(&mut emu, 0x0400_4800, 16);

    bus::arm7::write_16(&mut emu, 0x0400_4804, sector_addr as u16);
    bus::arm7::write_16(&mut emu, 0x0400_4806, (sector_addr >> 16) as u16);
    // CMD17: read single block
    bus::arm7::write_16(&mut emu, 0x0400_4800, 17);

    // the command response is immediate
    assert_ne!(bus::arm7::read_16(&mut emu, 0x0400_481C) & 0x0001, 0);

    // the receive edge fires 512 cycles later
    emu.run_frame();

    let mut data = vec![0; 0x200];
    for half in data.chunks_exact_mut(2) {
        let value = bus::arm7::read_16(&mut emu, 0x0400_4830);
        half.copy_from_slice(&value.to_le_bytes());
    }
    assert_eq!(data, expected);
}

fn sdio_cmd52_write(emu: &mut Emu, func: u32, addr: u32, value: u8) {
    let param = (1 << 31) | (func << 28) | (addr << 9) | value as u32;
    bus::arm7::write_16(emu, 0x0400_4A04, param as u16);
    bus::arm7::write_16(emu, 0x0400_4A06, (param >> 16) as u16);
    bus::arm7::write_16(emu, 0x0400_4A00, 52);
}

fn sdio_cmd52_read(emu: &mut Emu, func: u32, addr: u32) -> u8 {
    let param = (func << 28) | (addr << 9);
    bus::arm7::write_16(emu, 0x0400_4A04, param as u16);
    bus::arm7::write_16(emu, 0x0400_4A06, (param >> 16) as u16);
    bus::arm7::write_16(emu, 0x0400_4A00, 52);
    bus::arm7::read_16(emu, 0x0400_4A0C) as u8
}

#[test]
fn wifi_bmi_reports_the_target_id() {
    let mut emu = emu();

    // CIS block 0 is visible through function 0
    assert_eq!(sdio_cmd52_read(&mut emu, 0, 0x1000), 0x01);
    assert_eq!(sdio_cmd52_read(&mut emu, 0, 0x1002), 0xD9);

    // BMI_GET_TARGET_ID into mailbox 0; the final byte lands on the
    // end-of-mailbox address and triggers command handling
    for (i, byte) in 0x08u32.to_le_bytes().iter().enumerate() {
        sdio_cmd52_write(&mut emu, 1, 0xFC + i as u32, *byte);
    }

    let mut response = [0; 16];
    for byte in &mut response {
        *byte = sdio_cmd52_read(&mut emu, 1, 0x00);
    }
    assert_eq!(&response[0..4], &[0xFF, 0xFF, 0xFF, 0xFF]);
    // AR6002 ROM ID
    assert_eq!(&response[8..12], &0x2000_0188u32.to_le_bytes());
}

fn i2c_start(emu: &mut Emu, device: u8) {
    bus::arm7::write_8(emu, 0x0400_4500, device);
    bus::arm7::write_8(emu, 0x0400_4501, 0x82);
}

fn i2c_write(emu: &mut Emu, value: u8, last: bool) {
    bus::arm7::write_8(emu, 0x0400_4500, value);
    bus::arm7::write_8(emu, 0x0400_4501, 0x80 | last as u8);
}

fn camera_reg_write(emu: &mut Emu, addr: u16, value: u16) {
    i2c_start(emu, 0x78);
    i2c_write(emu, (addr >> 8) as u8, false);
    i2c_write(emu, addr as u8, false);
    i2c_write(emu, (value >> 8) as u8, false);
    i2c_write(emu, value as u8, true);
}

#[test]
fn soft_reset_preserves_main_ram() {
    let mut emu = emu();

    bus::arm9::write_32(&mut emu, 0x0200_1234, 0xDEAD_BEEF);

    // BPTWL register 0x11 <- 0x01 requests a warm reset
    i2c_start(&mut emu, 0x4A);
    i2c_write(&mut emu, 0x11, false);
    i2c_write(&mut emu, 0x01, false);

    emu.run_frame();

    assert_eq!(bus::arm9::read_32(&mut emu, 0x0200_1234), 0xDEAD_BEEF);
    assert_eq!(emu.scfg.bios, 0x0101);
}

#[test]
fn camera_crop_bounds_the_buffered_words() {
    let mut emu = emu();

    // wake the sensor and enable its data transfer
    camera_reg_write(&mut emu, 0x0018, 0x0000);
    camera_reg_write(&mut emu, 0x001A, 0x0200);

    // preview geometry: 64x4 frame, no mirroring
    for (mcu_reg, value) in [(0x2703u16, 64u16), (0x2705, 4), (0x2717, 1)] {
        camera_reg_write(&mut emu, 0x098C, mcu_reg);
        camera_reg_write(&mut emu, 0x0990, value);
    }

    // crop lines 1..=2, words 2..=5; capture enabled, high scan threshold
    bus::arm9::write_32(&mut emu, 0x0400_4210, (1 << 16) | (2 << 1));
    bus::arm9::write_32(&mut emu, 0x0400_4214, (2 << 16) | (5 << 1));
    bus::arm9::write_16(&mut emu, 0x0400_4202, 0xC00F);

    // the capture tick fires every other frame; stop before the next tick
    // resets the buffer positions
    for _ in 0..3 {
        emu.run_frame();
    }

    assert_eq!(emu.cam_module.buffer_level(), 2 * 4);
}

#[test]
fn console_id_is_exposed_until_bios_locks_it() {
    let mut emu = emu();

    assert_eq!(
        bus::arm7::read_32(&mut emu, 0x0400_4D00),
        0x89AB_CDEF
    );
    assert_eq!(
        bus::arm7::read_32(&mut emu, 0x0400_4D04),
        0x0123_4567
    );

    emu.scfg.bios |= 1 << 10;
    assert_eq!(bus::arm7::read_32(&mut emu, 0x0400_4D00), 0);
}

#[test]
fn no_event_is_left_behind_the_scheduler_clock() {
    let mut emu = emu();
    for _ in 0..3 {
        emu.run_frame();
        assert!(emu.schedule.next_event_time() >= emu.schedule.cur_time());
    }
}

#[test]
fn savestate_round_trips_register_state() {
    let mut emu = emu();

    bus::arm9::write_32(&mut emu, 0x0200_0040, 0x1122_3344);
    bus::arm7::write_16(&mut emu, 0x0400_4C04, 0x00AA);
    let state = emu.save_state();

    bus::arm9::write_32(&mut emu, 0x0200_0040, 0);
    bus::arm7::write_16(&mut emu, 0x0400_4C04, 0);

    emu.load_state(state).unwrap();
    assert_eq!(bus::arm9::read_32(&mut emu, 0x0200_0040), 0x1122_3344);
    assert_eq!(bus::arm7::read_16(&mut emu, 0x0400_4C04), 0x00AA);
}

#[test]
fn gba_mode_request_stops_the_console() {
    let mut emu = emu();
    bus::arm7::write_8(&mut emu, 0x0400_0301, 0x40);
    assert_eq!(
        emu.run_frame(),
        twl_core::emu::RunOutput::Shutdown(twl_core::emu::StopReason::GbaModeNotSupported)
    );
    assert!(!emu.is_running());
}

#[test]
fn direct_aes_api_handles_header_blocks() {
    // CCM with extra (header) blocks exercises the MAC-only path
    let mut emu = emu();

    bus::arm7::write_32(&mut emu, 0x0400_4404, (1 << 16) | 1);
    bus::arm7::write_32(&mut emu, 0x0400_4400, 0x9104_0000);

    // header block, absorbed without producing output
    for _ in 0..4 {
        bus::arm7::write_32(&mut emu, 0x0400_4408, 0x5A5A_5A5A);
    }
    assert_eq!(aes::read_output_fifo(&mut emu), 0);
    // reading the empty FIFO does not disturb the running job
    assert_ne!(bus::arm7::read_32(&mut emu, 0x0400_4400) & 0x8000_0000, 0);

    // payload block
    for _ in 0..4 {
        bus::arm7::write_32(&mut emu, 0x0400_4408, 0x0F0F_0F0F);
    }
    assert_eq!(bus::arm7::read_32(&mut emu, 0x0400_4400) & 0x8000_0000, 0);
}
