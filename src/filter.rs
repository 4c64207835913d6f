//! Fast entropy/ASCII heuristic used to skip payloads unlikely to benefit
//! from compression before paying for a full codec call.

/// Bytes sampled from the head of a value when estimating entropy; bounds
/// the cost of the heuristic on large values.
const SAMPLE_BYTES: usize = 512;

/// Fraction of printable-ASCII bytes at or above which a value is presumed
/// compressible regardless of its byte-histogram entropy.
const ASCII_THRESHOLD: f64 = 0.85;

/// Shannon entropy (bits/byte) at or above which a value is presumed
/// incompressible.
const ENTROPY_NO: f64 = 7.50;

/// Shannon entropy (bits/byte) at or below which a value is presumed
/// compressible, skipping the ASCII check.
const ENTROPY_YES: f64 = 7.00;

/// Returns true if `data` looks unlikely to compress well: high byte-level
/// entropy and a low fraction of printable ASCII. Values between the two
/// entropy thresholds fall back to the ASCII ratio.
pub fn is_likely_incompressible(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    let sample = &data[..data.len().min(SAMPLE_BYTES)];

    let mut freq = [0u32; 256];
    for &b in sample {
        freq[b as usize] += 1;
    }

    let entropy = shannon_entropy(&freq, sample.len());
    if entropy >= ENTROPY_NO {
        return true;
    }
    if entropy <= ENTROPY_YES {
        return false;
    }

    let ascii_ratio = ascii_ratio(sample);
    ascii_ratio < ASCII_THRESHOLD
}

fn shannon_entropy(freq: &[u32; 256], total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    freq.iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum()
}

fn ascii_ratio(sample: &[u8]) -> f64 {
    let printable = sample
        .iter()
        .filter(|&&b| (0x20..=0x7e).contains(&b) || b == b'\n' || b == b'\t' || b == b'\r')
        .count();
    printable as f64 / sample.len() as f64
}
