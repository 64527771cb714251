//! Deterministic byte encodings for every entity and key (component C2).
//!
//! Every entity has a little-endian framing derived from Bitcoin wire
//! conventions for its public fields, with internal bookkeeping fields
//! (height, head id, owner addresses, availability) appended afterwards in
//! the order documented on each `encode_*`/`decode_*` pair. This module is
//! the single point that converts between byte arrays and entities; it has
//! no side effects, and `decode(encode(x)) == x` for every entity (P1,
//! exercised by this module's own tests).

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Cursor, Read, Write};

use crate::store::tags;
use crate::types::{Blk, BlkHeader, Head, KnownPeer, Tx, TxIn, TxOut, MAX_OWNERS};
use crate::types::Hash256;

/// Decode failures are carried as plain strings; the engine wraps them in
/// `EngineError::CodecError` at the call site.
pub type CodecResult<T> = Result<T, String>;

fn err<T>(msg: impl Into<String>) -> CodecResult<T> {
    Err(msg.into())
}

fn write_hash(w: &mut impl Write, h: &Hash256) -> io::Result<()> {
    w.write_all(h.as_bytes())
}

fn read_hash(r: &mut impl Read) -> io::Result<Hash256> {
    let mut buf = [0u8; 32];
    r.read_exact(&mut buf)?;
    Ok(Hash256::from_bytes(buf))
}

fn write_bytes_lp(w: &mut impl Write, bytes: &[u8]) -> io::Result<()> {
    w.write_u32::<LittleEndian>(bytes.len() as u32)?;
    w.write_all(bytes)
}

fn read_bytes_lp(r: &mut impl Read) -> io::Result<Vec<u8>> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf)
}

fn write_string_lp(w: &mut impl Write, s: &str) -> io::Result<()> {
    let bytes = s.as_bytes();
    w.write_u16::<LittleEndian>(bytes.len() as u16)?;
    w.write_all(bytes)
}

fn read_string_lp(r: &mut impl Read) -> io::Result<String> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn write_owner(w: &mut impl Write, owner: &Option<String>) -> io::Result<()> {
    match owner {
        Some(addr) => write_string_lp(w, addr),
        None => write_string_lp(w, ""),
    }
}

fn read_owner(r: &mut impl Read) -> io::Result<Option<String>> {
    let s = read_string_lp(r)?;
    if s.is_empty() {
        Ok(None)
    } else {
        Ok(Some(s))
    }
}

// ---------------------------------------------------------------------
// Block header
// ---------------------------------------------------------------------

/// `prev_hash(32) | version(u32) | merkle_root(32) | create_time(u64) |
/// bits(u32) | nonce(u32)`
pub fn encode_header(header: &BlkHeader) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32 + 4 + 32 + 8 + 4 + 4);
    write_hash(&mut buf, &header.prev_hash).expect("in-memory write");
    buf.write_u32::<LittleEndian>(header.version).unwrap();
    write_hash(&mut buf, &header.merkle_root).expect("in-memory write");
    buf.write_u64::<LittleEndian>(header.create_time).unwrap();
    buf.write_u32::<LittleEndian>(header.bits).unwrap();
    buf.write_u32::<LittleEndian>(header.nonce).unwrap();
    buf
}

pub fn decode_header(bytes: &[u8]) -> CodecResult<BlkHeader> {
    let mut c = Cursor::new(bytes);
    let prev_hash = read_hash(&mut c).map_err(|e| e.to_string())?;
    let version = c.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let merkle_root = read_hash(&mut c).map_err(|e| e.to_string())?;
    let create_time = c.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
    let bits = c.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let nonce = c.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    Ok(BlkHeader {
        prev_hash,
        version,
        merkle_root,
        create_time,
        bits,
        nonce,
    })
}

// ---------------------------------------------------------------------
// Block (header + internal bookkeeping + tx-hash list)
// ---------------------------------------------------------------------

/// `header | height(u64) | head_id(u64) | cumulative_work(u128) |
/// tx_count(u32) | tx_hash*`
///
/// The block hash itself is not encoded: it is always recomputed from the
/// header on decode (`Blk::compute_hash`), which is cheaper than storing
/// it redundantly and still satisfies `decode(encode(x)) == x` since a
/// well-formed `Blk` always has `hash == compute_hash(header)`.
pub fn encode_block(blk: &Blk) -> Vec<u8> {
    let mut buf = encode_header(&blk.header);
    buf.write_u64::<LittleEndian>(blk.height).unwrap();
    buf.write_u64::<LittleEndian>(blk.head_id).unwrap();
    buf.write_u128::<LittleEndian>(blk.cumulative_work).unwrap();
    buf.write_u32::<LittleEndian>(blk.tx_hashes.len() as u32)
        .unwrap();
    for h in &blk.tx_hashes {
        write_hash(&mut buf, h).expect("in-memory write");
    }
    buf
}

const HEADER_LEN: usize = 32 + 4 + 32 + 8 + 4 + 4;

pub fn decode_block(bytes: &[u8]) -> CodecResult<Blk> {
    if bytes.len() < HEADER_LEN {
        return err("block: truncated header");
    }
    let header = decode_header(&bytes[..HEADER_LEN])?;
    let mut c = Cursor::new(&bytes[HEADER_LEN..]);
    let height = c.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
    let head_id = c.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
    let cumulative_work = c.read_u128::<LittleEndian>().map_err(|e| e.to_string())?;
    let tx_count = c.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let mut tx_hashes = Vec::with_capacity(tx_count as usize);
    for _ in 0..tx_count {
        tx_hashes.push(read_hash(&mut c).map_err(|e| e.to_string())?);
    }
    Ok(Blk::new(header, height, head_id, cumulative_work, tx_hashes))
}

// ---------------------------------------------------------------------
// Transaction inputs / outputs
// ---------------------------------------------------------------------

fn encode_tx_in(w: &mut impl Write, input: &TxIn) {
    write_hash(w, &input.source_tx).unwrap();
    w.write_u32::<LittleEndian>(input.source_index).unwrap();
    w.write_u32::<LittleEndian>(input.sequence).unwrap();
    write_bytes_lp(w, &input.script).unwrap();
}

fn decode_tx_in(r: &mut impl Read) -> io::Result<TxIn> {
    let source_tx = read_hash(r)?;
    let source_index = r.read_u32::<LittleEndian>()?;
    let sequence = r.read_u32::<LittleEndian>()?;
    let script = read_bytes_lp(r)?;
    Ok(TxIn {
        source_tx,
        source_index,
        sequence,
        script,
    })
}

fn encode_tx_out_body(w: &mut impl Write, output: &TxOut) {
    w.write_u32::<LittleEndian>(output.index).unwrap();
    w.write_u64::<LittleEndian>(output.value).unwrap();
    write_bytes_lp(w, &output.script).unwrap();
    for owner in &output.owners {
        write_owner(w, owner).unwrap();
    }
}

fn decode_tx_out_body(r: &mut impl Read, tx_hash: Hash256, available: bool) -> io::Result<TxOut> {
    let index = r.read_u32::<LittleEndian>()?;
    let value = r.read_u64::<LittleEndian>()?;
    let script = read_bytes_lp(r)?;
    let mut owners: [Option<String>; MAX_OWNERS] = Default::default();
    for slot in owners.iter_mut() {
        *slot = read_owner(r)?;
    }
    Ok(TxOut {
        tx_hash,
        index,
        value,
        script,
        owners,
        available,
    })
}

/// Canonical bytes used to derive a transaction's hash: `version(u32) |
/// lock_time(u32) | input_count(u32) | input* | output_count(u32) |
/// output_body*`. Excludes `block_hash` (storage bookkeeping, not part of
/// the transaction's identity) and each output's `tx_hash`/`available`
/// (circular / mutable bookkeeping).
pub fn encode_tx_body(version: u32, lock_time: u32, inputs: &[TxIn], outputs: &[TxOut]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(version).unwrap();
    buf.write_u32::<LittleEndian>(lock_time).unwrap();
    buf.write_u32::<LittleEndian>(inputs.len() as u32).unwrap();
    for input in inputs {
        encode_tx_in(&mut buf, input);
    }
    buf.write_u32::<LittleEndian>(outputs.len() as u32)
        .unwrap();
    for output in outputs {
        encode_tx_out_body(&mut buf, output);
    }
    buf
}

pub fn compute_tx_hash(version: u32, lock_time: u32, inputs: &[TxIn], outputs: &[TxOut]) -> Hash256 {
    Hash256::compute(&encode_tx_body(version, lock_time, inputs, outputs))
}

/// `tx_body | block_hash(32)`, the body augmented with the one piece of
/// storage bookkeeping (`block_hash`) a persisted `Tx` carries beyond its
/// identity, plus full output bodies (availability included) instead of
/// the identity-only form `encode_tx_body` produces.
pub fn encode_tx(tx: &Tx) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_u32::<LittleEndian>(tx.version).unwrap();
    buf.write_u32::<LittleEndian>(tx.lock_time).unwrap();
    write_hash(&mut buf, &tx.block_hash).unwrap();
    buf.write_u32::<LittleEndian>(tx.inputs.len() as u32)
        .unwrap();
    for input in &tx.inputs {
        encode_tx_in(&mut buf, input);
    }
    buf.write_u32::<LittleEndian>(tx.outputs.len() as u32)
        .unwrap();
    for output in &tx.outputs {
        encode_tx_out_body(&mut buf, output);
        buf.write_u8(output.available as u8).unwrap();
    }
    buf
}

pub fn decode_tx(bytes: &[u8]) -> CodecResult<Tx> {
    let mut c = Cursor::new(bytes);
    let version = c.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let lock_time = c.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let block_hash = read_hash(&mut c).map_err(|e| e.to_string())?;

    let input_count = c.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let mut inputs = Vec::with_capacity(input_count as usize);
    for _ in 0..input_count {
        inputs.push(decode_tx_in(&mut c).map_err(|e| e.to_string())?);
    }

    let hash = compute_tx_hash(version, lock_time, &inputs, &[]);
    // Placeholder hash above only covers inputs; real hash is recomputed
    // below once outputs are known.
    let _ = hash;

    let output_count = c.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    let mut outputs = Vec::with_capacity(output_count as usize);
    let mut availability = Vec::with_capacity(output_count as usize);
    for _ in 0..output_count {
        // tx_hash is filled in once known below; available is read back
        // into a side vector since encode_tx_out_body doesn't carry it.
        let out = decode_tx_out_body(&mut c, Hash256::ZERO, false).map_err(|e| e.to_string())?;
        let available = c.read_u8().map_err(|e| e.to_string())? != 0;
        availability.push(available);
        outputs.push(out);
    }

    let tx_hash = compute_tx_hash(version, lock_time, &inputs, &outputs);
    for (out, available) in outputs.iter_mut().zip(availability.into_iter()) {
        out.tx_hash = tx_hash;
        out.available = available;
    }

    Ok(Tx {
        hash: tx_hash,
        version,
        lock_time,
        block_hash,
        inputs,
        outputs,
    })
}

// ---------------------------------------------------------------------
// Head
// ---------------------------------------------------------------------

/// `id(u64) | chain_work(u128) | height(u64) | has_previous(u8) |
/// previous_head(u64, 0 if absent)`
pub fn encode_head(head: &Head) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + 16 + 8 + 1 + 8);
    buf.write_u64::<LittleEndian>(head.id).unwrap();
    buf.write_u128::<LittleEndian>(head.chain_work).unwrap();
    buf.write_u64::<LittleEndian>(head.height).unwrap();
    match head.previous_head {
        Some(prev) => {
            buf.write_u8(1).unwrap();
            buf.write_u64::<LittleEndian>(prev).unwrap();
        }
        None => {
            buf.write_u8(0).unwrap();
            buf.write_u64::<LittleEndian>(0).unwrap();
        }
    }
    buf
}

pub fn decode_head(bytes: &[u8]) -> CodecResult<Head> {
    let mut c = Cursor::new(bytes);
    let id = c.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
    let chain_work = c.read_u128::<LittleEndian>().map_err(|e| e.to_string())?;
    let height = c.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
    let has_previous = c.read_u8().map_err(|e| e.to_string())? != 0;
    let previous_raw = c.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
    let previous_head = if has_previous { Some(previous_raw) } else { None };
    Ok(Head {
        id,
        chain_work,
        height,
        previous_head,
    })
}

// ---------------------------------------------------------------------
// Known peer
// ---------------------------------------------------------------------

/// `address(length-prefixed) | ban_until(u64) | preference(i32) |
/// response_time_ms(u32)`
pub fn encode_peer(peer: &KnownPeer) -> Vec<u8> {
    let mut buf = Vec::new();
    write_string_lp(&mut buf, &peer.address).unwrap();
    buf.write_u64::<LittleEndian>(peer.ban_until).unwrap();
    buf.write_i32::<LittleEndian>(peer.preference).unwrap();
    buf.write_u32::<LittleEndian>(peer.response_time_ms).unwrap();
    buf
}

pub fn decode_peer(bytes: &[u8]) -> CodecResult<KnownPeer> {
    let mut c = Cursor::new(bytes);
    let address = read_string_lp(&mut c).map_err(|e| e.to_string())?;
    let ban_until = c.read_u64::<LittleEndian>().map_err(|e| e.to_string())?;
    let preference = c.read_i32::<LittleEndian>().map_err(|e| e.to_string())?;
    let response_time_ms = c.read_u32::<LittleEndian>().map_err(|e| e.to_string())?;
    Ok(KnownPeer {
        address,
        ban_until,
        preference,
        response_time_ms,
    })
}

// ---------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------

pub fn key_tx(hash: &Hash256) -> Vec<u8> {
    let mut k = Vec::with_capacity(33);
    k.push(tags::TAG_TX);
    k.extend_from_slice(hash.as_bytes());
    k
}

pub fn key_block(hash: &Hash256) -> Vec<u8> {
    let mut k = Vec::with_capacity(33);
    k.push(tags::TAG_BLOCK);
    k.extend_from_slice(hash.as_bytes());
    k
}

/// Head keys carry the id big-endian so that a prefix scan over `HEAD`
/// visits heads in ascending id order.
pub fn key_head(id: u64) -> Vec<u8> {
    let mut k = Vec::with_capacity(9);
    k.push(tags::TAG_HEAD);
    k.write_u64::<BigEndian>(id).unwrap();
    k
}

pub fn key_peer(address: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + address.len());
    k.push(tags::TAG_PEER);
    k.extend_from_slice(address.as_bytes());
    k
}

/// Prefix covering every ATX entry for `address`, for prefix scans that
/// enumerate all transactions touching one address without needing its
/// tx hashes up front.
pub fn atx_prefix(address: &str) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + address.len());
    k.push(tags::TAG_ATX);
    k.extend_from_slice(address.as_bytes());
    k
}

pub fn key_atx(address: &str, tx_hash: &Hash256) -> Vec<u8> {
    let mut k = Vec::with_capacity(1 + address.len() + 32);
    k.push(tags::TAG_ATX);
    k.extend_from_slice(address.as_bytes());
    k.extend_from_slice(tx_hash.as_bytes());
    k
}

/// Splits an `ATX` key body back into `(address, tx_hash)`. The address is
/// whatever precedes the trailing 32-byte hash.
pub fn decode_atx_key(body: &[u8]) -> CodecResult<(String, Hash256)> {
    if body.len() < 32 {
        return err("atx key: too short");
    }
    let split = body.len() - 32;
    let address =
        String::from_utf8(body[..split].to_vec()).map_err(|e| format!("atx key address: {e}"))?;
    let mut hash_bytes = [0u8; 32];
    hash_bytes.copy_from_slice(&body[split..]);
    Ok((address, Hash256::from_bytes(hash_bytes)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlkHeader;

    fn sample_header() -> BlkHeader {
        BlkHeader {
            prev_hash: Hash256::compute(b"parent"),
            version: 2,
            merkle_root: Hash256::compute(b"merkle"),
            create_time: 123_456,
            bits: 0x1d00ffff,
            nonce: 9,
        }
    }

    #[test]
    fn header_round_trips() {
        let h = sample_header();
        let bytes = encode_header(&h);
        assert_eq!(decode_header(&bytes).unwrap(), h);
    }

    #[test]
    fn block_round_trips() {
        let blk = Blk::new(
            sample_header(),
            11,
            99,
            4_200,
            vec![Hash256::compute(b"t1"), Hash256::compute(b"t2")],
        );
        let bytes = encode_block(&blk);
        let decoded = decode_block(&bytes).unwrap();
        assert_eq!(decoded, blk);
    }

    fn sample_out(value: u64, owner: Option<&str>, available: bool) -> TxOut {
        TxOut {
            tx_hash: Hash256::ZERO,
            index: 0,
            value,
            script: vec![1, 2, 3],
            owners: [owner.map(|s| s.to_string()), None, None],
            available,
        }
    }

    #[test]
    fn tx_round_trips_with_owners_and_availability() {
        let input = TxIn {
            source_tx: Hash256::compute(b"src"),
            source_index: 3,
            sequence: 0xffff_ffff,
            script: vec![9, 9],
        };
        let output = sample_out(42, Some("bc1qexample"), true);
        let mut tx = Tx::new(1, 0, Hash256::compute(b"blk"), vec![input], vec![output]);
        tx.outputs[0].available = false;

        let bytes = encode_tx(&tx);
        let decoded = decode_tx(&bytes).unwrap();
        assert_eq!(decoded, tx);
    }

    #[test]
    fn missing_owner_round_trips_as_none() {
        let output = sample_out(1, None, true);
        let tx = Tx::new(1, 0, Hash256::ZERO, vec![], vec![output]);
        let bytes = encode_tx(&tx);
        let decoded = decode_tx(&bytes).unwrap();
        assert_eq!(decoded.outputs[0].owners, [None, None, None]);
    }

    #[test]
    fn head_round_trips_with_and_without_previous() {
        let h1 = Head {
            id: 7,
            chain_work: 12345,
            height: 3,
            previous_head: None,
        };
        assert_eq!(decode_head(&encode_head(&h1)).unwrap(), h1);

        let h2 = Head {
            previous_head: Some(7),
            ..h1
        };
        assert_eq!(decode_head(&encode_head(&h2)).unwrap(), h2);
    }

    #[test]
    fn peer_round_trips() {
        let p = KnownPeer {
            address: "203.0.113.4:8333".to_string(),
            ban_until: 0,
            preference: -2,
            response_time_ms: 150,
        };
        assert_eq!(decode_peer(&encode_peer(&p)).unwrap(), p);
    }

    #[test]
    fn head_key_is_big_endian_for_ordered_scans() {
        let k1 = key_head(1);
        let k2 = key_head(2);
        assert!(k1 < k2);
    }

    #[test]
    fn atx_prefix_is_a_strict_prefix_of_its_keys() {
        let address = "1BoatSLRHtKNngkdXEeobR76b53LETtpyT".to_string();
        let tx_hash = Hash256::compute(b"tx");
        let key = key_atx(&address, &tx_hash);
        let prefix = atx_prefix(&address);
        assert!(key.starts_with(&prefix));
        assert!(key.len() > prefix.len());
    }

    #[test]
    fn atx_key_round_trips_through_decode_atx_key() {
        let address = "1A1zP1eP5QGefi2DMPTfTL5SLmv7DivfNa".to_string();
        let tx_hash = Hash256::compute(b"tx");
        let key = key_atx(&address, &tx_hash);
        let (decoded_addr, decoded_hash) = decode_atx_key(&key[1..]).unwrap();
        assert_eq!(decoded_addr, address);
        assert_eq!(decoded_hash, tx_hash);
    }
}
