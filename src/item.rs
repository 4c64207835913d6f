//! The boundary between this crate and the host cache's stored item type.
//!
//! The core never touches anything about an item beyond the two flag bits
//! and the dictionary id accessor described here — everything else (key,
//! value bytes, TTL, CAS, ...) belongs to the host cache.

/// A read-only view onto a stored item's compression-relevant bits.
///
/// The host cache implements this for its own item representation; this
/// crate is generic over it so it never has to know the item's layout.
pub trait StoredItem {
    /// The "compressed" flag bit.
    fn is_compressed(&self) -> bool;

    /// The "chunked" flag bit. Chunked items are always treated as
    /// plain/uncompressed by this crate, per the decompress entry point's
    /// contract.
    fn is_chunked(&self) -> bool;

    /// The 16-bit dictionary id this item was compressed with. `0` means
    /// "no dictionary" (a dictionary-less frame at the configured level).
    fn dict_id(&self) -> u16;
}

/// Status returned from the hot-path entry points. `Ok` carries the
/// resulting bytes; `NoOp` means the caller should store/return the
/// original bytes unchanged; `Err` is a propagated, counted failure.
#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    NoOp,
}
