use core::ops::{Deref, DerefMut};
use std::alloc::{alloc_zeroed, Layout};

/// Primitive values that can be read from and written to byte memory in
/// little-endian order.
pub trait MemValue: Copy + Default {
    const SIZE: usize;
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_mem_value {
    ($($ty: ty),*) => {
        $(
            impl MemValue for $ty {
                const SIZE: usize = core::mem::size_of::<$ty>();

                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    <$ty>::from_le_bytes(bytes[..Self::SIZE].try_into().unwrap())
                }

                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes[..Self::SIZE].copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_mem_value!(u8, u16, u32, u64);

/// A fixed-size byte buffer with little-endian typed accessors.
#[derive(Clone)]
#[repr(transparent)]
pub struct Bytes<const N: usize>(pub [u8; N]);

impl<const N: usize> Bytes<N> {
    #[inline]
    pub fn new(bytes: [u8; N]) -> Self {
        Bytes(bytes)
    }

    #[inline]
    pub fn read_le<T: MemValue>(&self, addr: usize) -> T {
        T::read_le(&self.0[addr..])
    }

    #[inline]
    pub fn write_le<T: MemValue>(&mut self, addr: usize, value: T) {
        value.write_le(&mut self.0[addr..]);
    }
}

impl<const N: usize> Deref for Bytes<N> {
    type Target = [u8; N];
    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const N: usize> DerefMut for Bytes<N> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Allocates a zero-filled `Bytes<N>` directly on the heap, avoiding a stack
/// copy for the multi-megabyte memory regions.
pub fn zeroed_box<const N: usize>() -> Box<Bytes<N>> {
    unsafe {
        let ptr = alloc_zeroed(Layout::new::<Bytes<N>>());
        assert!(!ptr.is_null());
        Box::from_raw(ptr.cast())
    }
}
