//! Minimal Solidity ABI codec for the tender contract binding.
//!
//! Covers exactly what the contract surface needs: `uint256` and `string` arguments,
//! static return tuples, and a dynamic array of `(address,uint256,string,uint256)`
//! tuples. Offsets read from return data are untrusted and bounds-checked.

use sha3::{Digest as _, Keccak256};

use super::UnavailableCause;

const WORD: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Uint(u128),
    String(String),
}

/// First four bytes of keccak256 of the canonical function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

pub fn event_topic(signature: &str) -> String {
    format!("0x{}", hex::encode(Keccak256::digest(signature.as_bytes())))
}

fn uint_word(v: u128) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[16..].copy_from_slice(&v.to_be_bytes());
    word
}

fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD) * WORD
}

/// Encode a contract call: selector followed by head/tail argument encoding.
pub fn encode_call(signature: &str, args: &[Token]) -> Vec<u8> {
    let head_len = args.len() * WORD;
    let mut head = Vec::with_capacity(head_len);
    let mut tail = Vec::new();

    for arg in args {
        match arg {
            Token::Uint(v) => head.extend_from_slice(&uint_word(*v)),
            Token::String(s) => {
                head.extend_from_slice(&uint_word((head_len + tail.len()) as u128));
                let bytes = s.as_bytes();
                tail.extend_from_slice(&uint_word(bytes.len() as u128));
                tail.extend_from_slice(bytes);
                tail.resize(tail.len() + padded_len(bytes.len()) - bytes.len(), 0);
            }
        }
    }

    let mut out = Vec::with_capacity(4 + head.len() + tail.len());
    out.extend_from_slice(&selector(signature));
    out.extend_from_slice(&head);
    out.extend_from_slice(&tail);
    out
}

pub fn parse_address(s: &str) -> Result<[u8; 20], UnavailableCause> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    let bytes =
        hex::decode(raw).map_err(|e| UnavailableCause::Encode(format!("address {}: {}", s, e)))?;
    bytes
        .try_into()
        .map_err(|_| UnavailableCause::Encode(format!("address {} is not 20 bytes", s)))
}

pub fn format_address(addr: &[u8; 20]) -> String {
    format!("0x{}", hex::encode(addr))
}

pub fn to_hex_data(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn from_hex_data(s: &str) -> Result<Vec<u8>, UnavailableCause> {
    hex::decode(s.strip_prefix("0x").unwrap_or(s))
        .map_err(|e| UnavailableCause::Decode(format!("hex data: {}", e)))
}

pub fn quantity(v: u64) -> String {
    format!("0x{:x}", v)
}

pub fn parse_quantity(s: &str) -> Result<u128, UnavailableCause> {
    let raw = s.strip_prefix("0x").unwrap_or(s);
    if raw.is_empty() {
        return Ok(0);
    }
    let trimmed = raw.trim_start_matches('0');
    if trimmed.len() > 32 {
        return Err(UnavailableCause::Decode(format!("quantity {} exceeds 128 bits", s)));
    }
    u128::from_str_radix(if trimmed.is_empty() { "0" } else { trimmed }, 16)
        .map_err(|e| UnavailableCause::Decode(format!("quantity {}: {}", s, e)))
}

/// `base + delta`, or a decode error if a hostile offset would overflow.
fn advance(base: usize, delta: usize) -> Result<usize, UnavailableCause> {
    base.checked_add(delta)
        .ok_or_else(|| UnavailableCause::Decode(format!("offset {} + {} overflows", base, delta)))
}

/// Read-only view over ABI-encoded return data.
pub struct Decoder<'a> {
    data: &'a [u8],
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn word_at(&self, pos: usize) -> Result<&'a [u8], UnavailableCause> {
        self.data
            .get(pos..advance(pos, WORD)?)
            .ok_or_else(|| UnavailableCause::Decode(format!("return data too short at {}", pos)))
    }

    pub fn uint_at(&self, pos: usize) -> Result<u128, UnavailableCause> {
        let word = self.word_at(pos)?;
        if word[..16].iter().any(|b| *b != 0) {
            return Err(UnavailableCause::Decode(format!(
                "uint at {} exceeds 128 bits",
                pos
            )));
        }
        let mut buf = [0u8; 16];
        buf.copy_from_slice(&word[16..]);
        Ok(u128::from_be_bytes(buf))
    }

    fn offset_at(&self, pos: usize) -> Result<usize, UnavailableCause> {
        usize::try_from(self.uint_at(pos)?)
            .map_err(|_| UnavailableCause::Decode(format!("offset at {} out of range", pos)))
    }

    pub fn address_at(&self, pos: usize) -> Result<[u8; 20], UnavailableCause> {
        let word = self.word_at(pos)?;
        let mut addr = [0u8; 20];
        addr.copy_from_slice(&word[12..]);
        Ok(addr)
    }

    /// `pos` is the absolute position of the string's length word.
    pub fn string_at(&self, pos: usize) -> Result<String, UnavailableCause> {
        let len = self.offset_at(pos)?;
        let start = advance(pos, WORD)?;
        let bytes = self
            .data
            .get(start..advance(start, len)?)
            .ok_or_else(|| UnavailableCause::Decode("string runs past return data".into()))?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| UnavailableCause::Decode(format!("string is not utf-8: {}", e)))
    }
}

/// A `(address,uint256,string,uint256)` bid tuple as returned by `getTenderBids`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBid {
    pub bidder: [u8; 20],
    pub amount: u128,
    pub bid_hash: String,
    pub timestamp: u128,
}

pub fn decode_bid_array(data: &[u8]) -> Result<Vec<RawBid>, UnavailableCause> {
    let dec = Decoder::new(data);
    let array_pos = dec.offset_at(0)?;
    let len = dec.offset_at(array_pos)?;
    let heads = advance(array_pos, WORD)?;

    let mut bids = Vec::with_capacity(len.min(1024));
    for i in 0..len {
        let head = i
            .checked_mul(WORD)
            .ok_or_else(|| UnavailableCause::Decode(format!("bid index {} out of range", i)))?;
        let tuple = advance(heads, dec.offset_at(advance(heads, head)?)?)?;
        let string_pos = advance(tuple, dec.offset_at(advance(tuple, 2 * WORD)?)?)?;
        bids.push(RawBid {
            bidder: dec.address_at(tuple)?,
            amount: dec.uint_at(advance(tuple, WORD)?)?,
            bid_hash: dec.string_at(string_pos)?,
            timestamp: dec.uint_at(advance(tuple, 3 * WORD)?)?,
        });
    }
    Ok(bids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_selectors() {
        assert_eq!(hex::encode(selector("transfer(address,uint256)")), "a9059cbb");
        assert_eq!(hex::encode(selector("balanceOf(address)")), "70a08231");
    }

    #[test]
    fn encodes_static_and_dynamic_arguments() {
        let data = encode_call(
            "submitBid(uint256,uint256,string)",
            &[Token::Uint(7), Token::Uint(900), Token::String("0xab".into())],
        );
        let body = &data[4..];
        assert_eq!(body.len(), 5 * WORD);
        let dec = Decoder::new(body);
        assert_eq!(dec.uint_at(0).unwrap(), 7);
        assert_eq!(dec.uint_at(WORD).unwrap(), 900);
        // string offset points just past the three head words
        assert_eq!(dec.uint_at(2 * WORD).unwrap(), 3 * WORD as u128);
        assert_eq!(dec.string_at(3 * WORD).unwrap(), "0xab");
    }

    #[test]
    fn decodes_right_aligned_address() {
        let addr = parse_address("0x713A6B63f783269F0AD6b31868B971FE116cC1D7").unwrap();
        let mut data = vec![0u8; 12];
        data.extend_from_slice(&addr);
        let dec = Decoder::new(&data);
        assert_eq!(dec.address_at(0).unwrap(), addr);
        assert_eq!(
            format_address(&addr),
            "0x713a6b63f783269f0ad6b31868b971fe116cc1d7"
        );
    }

    #[test]
    fn rejects_bad_addresses() {
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("not-hex").is_err());
    }

    #[test]
    fn quantities() {
        assert_eq!(quantity(2_000_000), "0x1e8480");
        assert_eq!(parse_quantity("0x1e8480").unwrap(), 2_000_000);
        assert_eq!(parse_quantity("0x").unwrap(), 0);
        assert_eq!(
            parse_quantity("0x0000000000000000000000000000000000000000000000000000000000000005")
                .unwrap(),
            5
        );
    }

    fn word(v: u128) -> Vec<u8> {
        uint_word(v).to_vec()
    }

    #[test]
    fn decodes_bid_array() {
        let bidder = [0x11u8; 20];
        let mut addr_word = vec![0u8; 12];
        addr_word.extend_from_slice(&bidder);

        // tuple: bidder, amount, string offset (4 words), timestamp, then the string
        let mut tuple = Vec::new();
        tuple.extend(addr_word);
        tuple.extend(word(900));
        tuple.extend(word(4 * WORD as u128));
        tuple.extend(word(1_700_000_000));
        tuple.extend(word(3));
        let mut s = b"abc".to_vec();
        s.resize(WORD, 0);
        tuple.extend(s);

        let mut data = Vec::new();
        data.extend(word(WORD as u128)); // offset to array
        data.extend(word(1)); // length
        data.extend(word(WORD as u128)); // offset of element 0 past the head
        data.extend(tuple);

        let bids = decode_bid_array(&data).unwrap();
        assert_eq!(
            bids,
            vec![RawBid {
                bidder,
                amount: 900,
                bid_hash: "abc".into(),
                timestamp: 1_700_000_000,
            }]
        );
    }

    #[test]
    fn huge_offsets_are_a_decode_error() {
        // Array offset that would overflow when the length word is read
        let mut data = vec![0u8; 16];
        data.extend_from_slice(&(u64::MAX as u128).to_be_bytes());
        assert!(matches!(
            decode_bid_array(&data),
            Err(UnavailableCause::Decode(_))
        ));

        // Valid array header whose element offset points far past the end
        let mut data = Vec::new();
        data.extend(word(WORD as u128));
        data.extend(word(1));
        data.extend(word(usize::MAX as u128));
        assert!(matches!(
            decode_bid_array(&data),
            Err(UnavailableCause::Decode(_))
        ));

        // String length that would overflow the end position
        let mut data = word(usize::MAX as u128);
        data.extend(word(0));
        assert!(matches!(
            Decoder::new(&data).string_at(0),
            Err(UnavailableCause::Decode(_))
        ));
    }

    #[test]
    fn truncated_data_is_a_decode_error() {
        assert!(matches!(
            decode_bid_array(&word(WORD as u128)),
            Err(UnavailableCause::Decode(_))
        ));
    }
}
