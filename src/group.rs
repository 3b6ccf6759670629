//! 16-lane byte comparisons over one probe block.
//!
//! Every search and placement decision in the table is phrased as "compare
//! the 16 contiguous bytes starting at a block base against one scalar and
//! hand back a lane bitmask". Bit `j` of the returned `u16` is set iff lane
//! `j` satisfies the comparison. The SSE2 and scalar paths produce identical
//! masks; only latency differs.

/// Number of slots scanned by a single vector comparison. Block bases are
/// always multiples of this, and table capacities are multiples of it too.
pub(crate) const BLOCK_SIZE: usize = 16;

/// Lanes equal to `needle`.
///
/// # Safety
///
/// The caller must ensure `base + BLOCK_SIZE` does not exceed `bytes.len()`.
#[inline(always)]
pub(crate) unsafe fn eq_mask(bytes: &[u8], base: usize, needle: u8) -> u16 {
    debug_assert!(base + BLOCK_SIZE <= bytes.len());

    #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
    {
        // SAFETY: Caller guarantees BLOCK_SIZE readable bytes at `base`.
        return unsafe { eq_mask_sse2(bytes, base, needle) };
    }

    #[allow(unreachable_code)]
    {
        let mut mask = 0u16;
        for lane in 0..BLOCK_SIZE {
            // SAFETY: Caller guarantees `base + BLOCK_SIZE <= bytes.len()`
            // and `lane < BLOCK_SIZE`.
            if unsafe { *bytes.get_unchecked(base + lane) } == needle {
                mask |= 1 << lane;
            }
        }
        mask
    }
}

/// Lanes strictly less than `needle`, comparing as unsigned bytes.
///
/// # Safety
///
/// The caller must ensure `base + BLOCK_SIZE` does not exceed `bytes.len()`.
#[inline(always)]
pub(crate) unsafe fn lt_mask(bytes: &[u8], base: usize, needle: u8) -> u16 {
    debug_assert!(base + BLOCK_SIZE <= bytes.len());

    #[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
    {
        // SAFETY: Caller guarantees BLOCK_SIZE readable bytes at `base`.
        return unsafe { lt_mask_sse2(bytes, base, needle) };
    }

    #[allow(unreachable_code)]
    {
        let mut mask = 0u16;
        for lane in 0..BLOCK_SIZE {
            // SAFETY: Caller guarantees `base + BLOCK_SIZE <= bytes.len()`
            // and `lane < BLOCK_SIZE`.
            if unsafe { *bytes.get_unchecked(base + lane) } < needle {
                mask |= 1 << lane;
            }
        }
        mask
    }
}

/// Lanes greater than or equal to `needle`, comparing as unsigned bytes.
///
/// A lane is `>=` exactly when it is not `<`, so this is the lane complement
/// of [`lt_mask`] on both implementation paths.
///
/// # Safety
///
/// The caller must ensure `base + BLOCK_SIZE` does not exceed `bytes.len()`.
#[inline(always)]
pub(crate) unsafe fn ge_mask(bytes: &[u8], base: usize, needle: u8) -> u16 {
    // SAFETY: Forwarded directly to the caller's guarantee.
    0xFFFF ^ unsafe { lt_mask(bytes, base, needle) }
}

/// SSE2 version of [`eq_mask`].
///
/// # Safety
///
/// The caller must ensure `base + BLOCK_SIZE` does not exceed `bytes.len()`.
#[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
#[inline(always)]
unsafe fn eq_mask_sse2(bytes: &[u8], base: usize, needle: u8) -> u16 {
    use core::arch::x86_64::*;
    // SAFETY: Caller guarantees 16 readable bytes at `base`; `loadu` has no
    // alignment requirement.
    unsafe {
        let data = _mm_loadu_si128(bytes.as_ptr().add(base) as *const __m128i);
        let cmp = _mm_cmpeq_epi8(data, _mm_set1_epi8(needle as i8));
        _mm_movemask_epi8(cmp) as u16
    }
}

/// SSE2 version of [`lt_mask`].
///
/// SSE2 only compares signed bytes; flipping the sign bit of both sides maps
/// the unsigned ordering onto the signed one.
///
/// # Safety
///
/// The caller must ensure `base + BLOCK_SIZE` does not exceed `bytes.len()`.
#[cfg(all(target_arch = "x86_64", target_feature = "sse2"))]
#[inline(always)]
unsafe fn lt_mask_sse2(bytes: &[u8], base: usize, needle: u8) -> u16 {
    use core::arch::x86_64::*;
    // SAFETY: Caller guarantees 16 readable bytes at `base`; `loadu` has no
    // alignment requirement.
    unsafe {
        let bias = _mm_set1_epi8(i8::MIN);
        let data = _mm_loadu_si128(bytes.as_ptr().add(base) as *const __m128i);
        let data = _mm_xor_si128(data, bias);
        let pivot = _mm_set1_epi8((needle ^ 0x80) as i8);
        let cmp = _mm_cmplt_epi8(data, pivot);
        _mm_movemask_epi8(cmp) as u16
    }
}
