mod bytes;
pub use bytes::{zeroed_box, Bytes, MemValue};
mod fifo;
pub use fifo::{DynFifo, Fifo};
pub mod savestate;
pub use savestate::Savestate;

pub fn zeroed_byte_slice(len: usize) -> Box<[u8]> {
    vec![0; len].into_boxed_slice()
}
