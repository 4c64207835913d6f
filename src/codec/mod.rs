//! Wraps the external zstd codec's one-shot compress/decompress and
//! dictionary-training entry points behind the shapes this crate needs.

pub mod scratch;

use zstd::dict::{DecoderDictionary, EncoderDictionary};

use crate::error::{Error, Result};

const ALGORITHM: &str = "zstd";

/// Compile a compression dictionary handle from a raw dictionary blob.
pub fn compile_encoder_dict(bytes: &[u8], level: i32) -> EncoderDictionary<'static> {
    EncoderDictionary::copy(bytes, level)
}

/// Compile a decompression dictionary handle from a raw dictionary blob.
pub fn compile_decoder_dict(bytes: &[u8]) -> DecoderDictionary<'static> {
    DecoderDictionary::copy(bytes)
}

/// Compress `data` into `scratch`, growing it on demand, using `cdict` if
/// given or a dictionary-less frame at `level` otherwise. Returns the
/// number of bytes written.
pub fn compress_into(
    data: &[u8],
    level: i32,
    cdict: Option<&EncoderDictionary<'static>>,
    scratch: &mut Vec<u8>,
) -> Result<usize> {
    let mut compressor = match cdict {
        Some(d) => zstd::bulk::Compressor::with_prepared_dictionary(d)
            .map_err(|e| Error::codec(ALGORITHM, e.to_string()))?,
        None => zstd::bulk::Compressor::new(level)
            .map_err(|e| Error::codec(ALGORITHM, e.to_string()))?,
    };

    scratch.clear();
    let bound = scratch::compress_bound(data.len());
    scratch.reserve(bound.saturating_sub(scratch.capacity()));

    let mut multiplier = 1usize;
    loop {
        match compressor.compress_to_buffer(data, scratch) {
            Ok(()) => return Ok(scratch.len()),
            Err(e) => {
                if multiplier >= 5 {
                    return Err(Error::codec(ALGORITHM, e.to_string()));
                }
                scratch.clear();
                scratch.reserve(data.len() * multiplier + 64);
                multiplier += 1;
            }
        }
    }
}

/// Decompress `data` into a freshly allocated buffer, using `ddict` if
/// given. Ownership of the returned buffer transfers to the caller.
pub fn decompress_alloc(
    data: &[u8],
    ddict: Option<&DecoderDictionary<'static>>,
) -> Result<Vec<u8>> {
    let mut decompressor = match ddict {
        Some(d) => zstd::bulk::Decompressor::with_prepared_dictionary(d)
            .map_err(|e| Error::codec(ALGORITHM, e.to_string()))?,
        None => zstd::bulk::Decompressor::new().map_err(|e| Error::codec(ALGORITHM, e.to_string()))?,
    };

    let initial = zstd::bulk::Decompressor::upper_bound(data).unwrap_or(data.len() * 4);
    let mut out = Vec::with_capacity(initial.max(64));

    let mut multiplier = 1usize;
    loop {
        match decompressor.decompress_to_buffer(data, &mut out) {
            Ok(()) => return Ok(out),
            Err(e) => {
                if multiplier >= 5 {
                    return Err(Error::Corrupt(e.to_string()));
                }
                out.clear();
                out.reserve(initial * multiplier + 64);
                multiplier += 1;
            }
        }
    }
}

/// Train a dictionary from a flattened sample corpus, targeting
/// `max_size` bytes. Single-shot, default trainer parameters.
pub fn train_dictionary(samples: &[Vec<u8>], max_size: usize) -> Result<Vec<u8>> {
    zstd::dict::from_samples(samples, max_size).map_err(|e| Error::codec(ALGORITHM, e.to_string()))
}

/// Parameter-search training variant, single-threaded. The high-level
/// `zstd` crate only exposes the default (fastCover) trainer entry point,
/// so "search" here is a small sequential sweep over candidate target
/// sizes around `max_size`, keeping the first candidate that trains
/// successfully and is not larger than `max_size` — the closest analogue
/// available without dropping to the `zstd-sys` bindings directly. No
/// shrink-to-fit: a successful candidate is kept at its trained size.
pub fn train_dictionary_optimize(samples: &[Vec<u8>], max_size: usize) -> Result<Vec<u8>> {
    let candidates = [max_size, (max_size * 3) / 4, max_size / 2];
    let mut last_err = None;
    for candidate in candidates {
        if candidate == 0 {
            continue;
        }
        match zstd::dict::from_samples(samples, candidate) {
            Ok(bytes) => return Ok(bytes),
            Err(e) => last_err = Some(e),
        }
    }
    Err(Error::codec(
        ALGORITHM,
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no candidate size trained successfully".to_string()),
    ))
}
