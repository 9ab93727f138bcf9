use crate::search::bitmap::Bitmap;
use crate::search::db::Database;
use crate::search::kmerindex::KmerIndex;
use crate::search::minheap::{MinHeap, TopScore};

/// Candidates with fewer shared k-mers than this are never sampled.
pub const MIN_MATCH_SAMPLE_COUNT: u16 = 6;
/// ... nor candidates sharing less than this fraction of the query's
/// unique k-mers.
pub const MIN_MATCH_SAMPLE_FREQ: f64 = 1.0 / 16.0;

/// Vector kernel for the bitmap count scan, chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanKernel {
    Scalar,
    Sse2,
    Ssse3,
}

/// Pick the best bitmap-scan kernel for this machine.
pub fn detect_kernel() -> ScanKernel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("ssse3") {
            ScanKernel::Ssse3
        } else {
            ScanKernel::Sse2
        }
    }
    #[cfg(not(target_arch = "x86_64"))]
    {
        ScanKernel::Scalar
    }
}

/// Add one to `counts[j]` for every record j present in the bitmap.
///
/// `counts` must provide at least `8 * ceil(n/8)` writable slots; the
/// caller allocates slack so whole bytes can be processed.
pub fn increment_counters_from_bitmap(
    kernel: ScanKernel,
    counts: &mut [u16],
    bitmap: &Bitmap,
    n: usize,
) {
    let bytes = (n + 7) / 8;
    let data = bitmap.as_bytes();
    match kernel {
        ScanKernel::Scalar => increment_scalar(counts, &data[..bytes]),
        #[cfg(target_arch = "x86_64")]
        ScanKernel::Sse2 => unsafe { increment_sse2(counts, &data[..bytes]) },
        #[cfg(target_arch = "x86_64")]
        ScanKernel::Ssse3 => unsafe { increment_ssse3(counts, &data[..bytes]) },
        #[cfg(not(target_arch = "x86_64"))]
        _ => increment_scalar(counts, &data[..bytes]),
    }
}

fn increment_scalar(counts: &mut [u16], data: &[u8]) {
    for (j, &byte) in data.iter().enumerate() {
        if byte == 0 {
            continue;
        }
        let base = 8 * j;
        let mut bits = byte;
        while bits != 0 {
            let bit = bits.trailing_zeros() as usize;
            counts[base + bit] += 1;
            bits &= bits - 1;
        }
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "sse2")]
unsafe fn increment_sse2(counts: &mut [u16], data: &[u8]) {
    use core::arch::x86_64::*;
    // lane i selects bit i of the byte, so counts[8j+i] follows bit i of
    // bitmap byte j
    let sel = _mm_set_epi16(0x80, 0x40, 0x20, 0x10, 0x08, 0x04, 0x02, 0x01);
    for (j, &byte) in data.iter().enumerate() {
        let ptr = counts.as_mut_ptr().add(8 * j) as *mut __m128i;
        let v = _mm_set1_epi16(byte as i16);
        let hit = _mm_cmpeq_epi16(_mm_and_si128(v, sel), sel);
        let ones = _mm_srli_epi16(hit, 15);
        _mm_storeu_si128(ptr, _mm_add_epi16(_mm_loadu_si128(ptr), ones));
    }
}

#[cfg(target_arch = "x86_64")]
#[target_feature(enable = "ssse3")]
unsafe fn increment_ssse3(counts: &mut [u16], data: &[u8]) {
    use core::arch::x86_64::*;
    let sel = _mm_set_epi16(0x80, 0x40, 0x20, 0x10, 0x08, 0x04, 0x02, 0x01);
    let chunks = data.len() / 16;
    for c in 0..chunks {
        // one load covers 128 records; pshufb broadcasts each byte
        let block = _mm_loadu_si128(data.as_ptr().add(16 * c) as *const __m128i);
        for bi in 0..16 {
            let vb = _mm_shuffle_epi8(block, _mm_set1_epi8(bi as i8));
            let hit = _mm_cmpeq_epi16(_mm_and_si128(vb, sel), sel);
            let ones = _mm_srli_epi16(hit, 15);
            let ptr = counts.as_mut_ptr().add(8 * (16 * c + bi)) as *mut __m128i;
            _mm_storeu_si128(ptr, _mm_add_epi16(_mm_loadu_si128(ptr), ones));
        }
    }
    increment_scalar(&mut counts[8 * 16 * chunks..], &data[16 * chunks..]);
}

/// Count the query's k-mer hits in every indexed record and keep the
/// best candidates in the heap.
///
/// * `kmers`  – the query's unique k-mer sample
/// * `counts` – per-thread scratch; reallocated with slack as needed
pub fn search_topscores(
    index: &KmerIndex,
    db: &Database,
    kernel: ScanKernel,
    kmers: &[u32],
    counts: &mut Vec<u16>,
    heap: &mut MinHeap,
) {
    let n = index.indexed_count();
    counts.clear();
    counts.resize(n + 128, 0);
    heap.clear();

    for &kmer in kmers {
        match index.bitmap(kmer) {
            Some(b) => increment_counters_from_bitmap(kernel, counts, b, n),
            None => {
                for &j in index.matchlist(kmer) {
                    counts[j as usize] += 1;
                }
            }
        }
    }

    let freq_floor = MIN_MATCH_SAMPLE_FREQ * kmers.len() as f64;
    for i in 0..n {
        let count = counts[i];
        if count < MIN_MATCH_SAMPLE_COUNT {
            continue;
        }
        if (count as f64) < freq_floor {
            continue;
        }
        let seqno = index.mapping(i);
        heap.add(TopScore {
            count: count as u32,
            seqno,
            length: db.sequence_len(seqno as usize) as u32,
        });
    }
    heap.sort();
}
