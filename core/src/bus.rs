//! Full bus decode for both CPUs: BIOS overlay windows, NWRAM, the 16 MiB
//! main-RAM mirror, the DSi-only I/O blocks, and the base-console registers
//! the overlay depends on. Unknown accesses log and read zero.

pub mod arm7;
pub mod arm9;
