//! Helpers to assert invariants of our code.

/// Macro that asserts two types are equal in size.
macro_rules! assert_eq_size {
    ($x:ty, $y:ty) => {
        const _: fn() = || {
            let _ = core::mem::transmute::<$x, $y>;
        };
    };
}

pub(crate) use assert_eq_size;

#[inline(always)]
#[cold]
fn cold_path() {}

/// "Annotation" to hint that a branch of an if-statement is likely to occur.
#[inline(always)]
pub(crate) fn likely(b: bool) -> bool {
    if b {
        true
    } else {
        cold_path();
        false
    }
}

/// "Annotation" to hint that a branch of an if-statement is _not likely_ to occur.
#[inline(always)]
pub(crate) fn unlikely(b: bool) -> bool {
    if b {
        cold_path();
        true
    } else {
        false
    }
}

/// Lossless widening conversion, used where `From` is not implemented for
/// `usize` because of portability concerns.
pub(crate) trait CastFrom<T> {
    fn cast_from(from: T) -> Self;
}

// We only support 32 and 64 bit targets.
#[cfg(not(any(target_pointer_width = "32", target_pointer_width = "64")))]
compile_error!("protomodel requires a 32 or 64 bit target");

#[allow(clippy::as_conversions)]
mod casts {
    use super::CastFrom;

    impl CastFrom<u8> for usize {
        #[inline(always)]
        fn cast_from(from: u8) -> usize {
            from as usize
        }
    }

    impl CastFrom<u32> for usize {
        #[inline(always)]
        fn cast_from(from: u32) -> usize {
            from as usize
        }
    }

    impl CastFrom<usize> for u64 {
        #[inline(always)]
        fn cast_from(from: usize) -> u64 {
            from as u64
        }
    }

    impl CastFrom<u8> for u32 {
        #[inline(always)]
        fn cast_from(from: u8) -> u32 {
            u32::from(from)
        }
    }
}
