#![warn(clippy::pedantic)]
#![allow(
    clippy::cast_lossless,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_possible_truncation,
    clippy::struct_excessive_bools,
    clippy::too_many_lines,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::verbose_bit_mask,
    clippy::wildcard_imports,
    clippy::must_use_candidate,
    clippy::unused_self,
    clippy::missing_errors_doc,
    clippy::inline_always,
    clippy::match_same_arms
)]

pub mod utils;

pub mod aes;
pub mod bus;
pub mod camera;
pub mod crypto;
pub mod ds_slot;
pub mod emu;
pub mod gpio;
pub mod i2c;
pub mod nand;
pub mod ndma;
pub mod sdmmc;
pub mod spi;
pub mod wifi;
