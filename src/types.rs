//! Core chain types for block production
//!
//! Hashes, targets, scripts, transactions, blocks and chained headers shared
//! by the miner, the devnet collaborators and the peer layer.

use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use primitive_types::U256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 256-bit hash (block hashes, transaction ids, merkle roots)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero hash, used as the previous hash of genesis
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Create a hash from raw bytes
    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Create from hexadecimal string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| Error::config(format!("Invalid hex in hash: {}", e)))?;
        let array: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::config(format!("Invalid hash length: expected 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(array))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl Serialize for Hash256 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash256::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Proof-of-work target a block hash must not exceed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target {
    /// 256-bit target value stored as 4 64-bit words in little-endian order
    words: [u64; 4],
}

impl Target {
    /// Create a new target from a 256-bit value
    pub fn new(words: [u64; 4]) -> Self {
        Self { words }
    }

    /// Raw little-endian words
    pub fn words(&self) -> [u64; 4] {
        self.words
    }

    /// Convert to hexadecimal string (big-endian for display)
    pub fn to_hex_be(&self) -> String {
        format!(
            "{:016x}{:016x}{:016x}{:016x}",
            self.words[3], self.words[2], self.words[1], self.words[0]
        )
    }

    /// Check if a hash meets this target
    ///
    /// The hash bytes are read as a little-endian 256-bit integer.
    pub fn meets_target(&self, hash: &Hash256) -> bool {
        let bytes = hash.as_bytes();
        for i in (0..4).rev() {
            let hash_word = (&bytes[i * 8..(i + 1) * 8])
                .read_u64::<LittleEndian>()
                .unwrap_or(u64::MAX);

            if hash_word < self.words[i] {
                return true;
            } else if hash_word > self.words[i] {
                return false;
            }
        }
        true
    }

    /// Amount of work a block at this target contributes: 2^256 / (target + 1)
    pub fn work(&self) -> U256 {
        let target = U256(self.words);
        if target.is_zero() {
            return U256::MAX;
        }
        if target == U256::MAX {
            return U256::one();
        }
        (!target / (target + U256::one())) + U256::one()
    }

    /// Maximum possible target (easiest difficulty)
    pub fn max() -> Self {
        Self::new([u64::MAX; 4])
    }

    /// Minimum possible target (hardest difficulty)
    pub fn min() -> Self {
        Self::new([0; 4])
    }

    /// Number of leading zero bits the target imposes on a hash
    pub fn difficulty_level(&self) -> u16 {
        for i in (0..4).rev() {
            if self.words[i] != 0 {
                return (256 - (i * 64 + (64 - self.words[i].leading_zeros()) as usize)) as u16;
            }
        }
        256
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() != 64 {
            return Err(Error::target(format!(
                "Invalid target hex length: expected 64 chars, got {}",
                s.len()
            )));
        }

        // Parse as big-endian hex string
        let mut words = [0u64; 4];
        for i in 0..4 {
            let start = i * 16;
            let end = start + 16;
            words[3 - i] = u64::from_str_radix(&s[start..end], 16)
                .map_err(|e| Error::target(format!("Invalid hex in target: {}", e)))?;
        }

        Ok(Self::new(words))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex_be())
    }
}

impl Serialize for Target {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex_be())
    }
}

impl<'de> Deserialize<'de> for Target {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Target::from_str(&s).map_err(serde::de::Error::custom)
    }
}

const OP_0: u8 = 0x00;
const OP_PUSHDATA1: u8 = 0x4c;
const OP_PUSHDATA2: u8 = 0x4d;
const OP_PUSHDATA4: u8 = 0x4e;
const OP_1NEGATE: u8 = 0x4f;
const OP_1: u8 = 0x51;

/// Raw script bytes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Script(Vec<u8>);

impl Script {
    /// Create a script from raw bytes
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Create from hexadecimal string
    pub fn from_hex(s: &str) -> Result<Self> {
        hex::decode(s)
            .map(Self)
            .map_err(|e| Error::config(format!("Invalid hex in script: {}", e)))
    }

    /// Coinbase input script: block height, extra nonce, then the raw flags
    pub fn coinbase(height: u64, extra_nonce: u64, flags: &[u8]) -> Self {
        let mut script = Script::default();
        script.push_int(height as i64);
        script.push_int(extra_nonce as i64);
        script.0.extend_from_slice(flags);
        script
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the script has no bytes
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Convert to hexadecimal string
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    /// Push an integer using the minimal script-number encoding
    pub fn push_int(&mut self, value: i64) -> &mut Self {
        match value {
            0 => self.0.push(OP_0),
            -1 => self.0.push(OP_1NEGATE),
            1..=16 => self.0.push(OP_1 + (value as u8) - 1),
            _ => {
                let encoded = encode_script_num(value);
                self.push_data(&encoded);
            }
        }
        self
    }

    /// Push a data blob with the smallest push opcode that fits
    pub fn push_data(&mut self, data: &[u8]) -> &mut Self {
        let len = data.len();
        if len < OP_PUSHDATA1 as usize {
            self.0.push(len as u8);
        } else if len <= u8::MAX as usize {
            self.0.push(OP_PUSHDATA1);
            self.0.push(len as u8);
        } else if len <= u16::MAX as usize {
            self.0.push(OP_PUSHDATA2);
            self.0.extend_from_slice(&(len as u16).to_le_bytes());
        } else {
            self.0.push(OP_PUSHDATA4);
            self.0.extend_from_slice(&(len as u32).to_le_bytes());
        }
        self.0.extend_from_slice(data);
        self
    }
}

/// Little-endian sign-magnitude encoding with no redundant bytes
fn encode_script_num(value: i64) -> Vec<u8> {
    if value == 0 {
        return Vec::new();
    }

    let negative = value < 0;
    let mut magnitude = value.unsigned_abs();
    let mut bytes = Vec::with_capacity(9);
    while magnitude > 0 {
        bytes.push((magnitude & 0xff) as u8);
        magnitude >>= 8;
    }

    // The top bit carries the sign, so add a byte when the magnitude uses it
    let last = bytes.len() - 1;
    if bytes[last] & 0x80 != 0 {
        bytes.push(if negative { 0x80 } else { 0x00 });
    } else if negative {
        bytes[last] |= 0x80;
    }
    bytes
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for Script {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Script::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// Transaction input
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxIn {
    /// Spent output, `None` for the coinbase input
    pub previous_output: Option<(Hash256, u32)>,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxIn {
    /// Coinbase input carrying the given script
    pub fn coinbase(script_sig: Script) -> Self {
        Self {
            previous_output: None,
            script_sig,
            sequence: u32::MAX,
        }
    }
}

/// Transaction output
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Script,
}

/// Transaction
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Whether this is a coinbase transaction
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_none()
    }

    /// Transaction id
    pub fn txid(&self) -> Hash256 {
        crate::crypto::transaction_hash(self)
    }
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_hash: Hash256,
    pub merkle_root: Hash256,
    /// Unix timestamp in seconds
    pub time: u32,
    pub target: Target,
    pub nonce: u32,
}

impl BlockHeader {
    /// Header hash
    pub fn hash(&self) -> Hash256 {
        crate::crypto::header_hash(self)
    }

    /// Whether the header hash satisfies the header's own target
    pub fn check_proof_of_work(&self) -> bool {
        self.target.meets_target(&self.hash())
    }
}

/// Block with its transactions; the first transaction is the coinbase
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Block hash
    pub fn hash(&self) -> Hash256 {
        self.header.hash()
    }

    /// Coinbase transaction, if the block has one
    pub fn coinbase(&self) -> Option<&Transaction> {
        self.transactions.first().filter(|tx| tx.is_coinbase())
    }

    /// Mutable coinbase transaction, if the block has one
    pub fn coinbase_mut(&mut self) -> Option<&mut Transaction> {
        self.transactions.first_mut().filter(|tx| tx.is_coinbase())
    }

    /// Recompute the merkle root after transactions changed
    pub fn update_merkle_root(&mut self) {
        let txids: Vec<Hash256> = self.transactions.iter().map(Transaction::txid).collect();
        self.header.merkle_root = crate::crypto::merkle_root(&txids);
    }
}

/// Header placed in the validated header tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainedHeader {
    pub header: BlockHeader,
    pub hash: Hash256,
    pub height: u64,
    /// Total work from genesis up to and including this header
    pub chain_work: U256,
}

impl ChainedHeader {
    /// Root of the chain
    pub fn genesis(header: BlockHeader) -> Self {
        Self {
            hash: header.hash(),
            chain_work: header.target.work(),
            height: 0,
            header,
        }
    }

    /// Header built on top of `previous`
    pub fn extend(previous: &ChainedHeader, header: BlockHeader) -> Self {
        Self {
            hash: header.hash(),
            chain_work: previous.chain_work.saturating_add(header.target.work()),
            height: previous.height + 1,
            header,
        }
    }

    /// Whether this is the genesis header
    pub fn is_genesis(&self) -> bool {
        self.height == 0
    }
}
