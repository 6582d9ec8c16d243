//! Minimal XDR assembly for the two Stellar structures the gateway emits:
//! ledger keys for `getLedgerEntries` lookups and the `submit_score`
//! invocation handed to the wallet relay. Only the discriminants these
//! structures reach are encoded; everything is written big-endian per XDR.

use base64::Engine;
use thiserror::Error;

const BASE32_ALPHABET: &[u8; 32] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";

const STRKEY_VERSION_ED25519: u8 = 6 << 3; // 'G'
const STRKEY_VERSION_CONTRACT: u8 = 2 << 3; // 'C'

// Union discriminants, from the Stellar XDR definitions.
const LEDGER_ENTRY_TYPE_CONTRACT_DATA: u32 = 6;
const SC_ADDRESS_TYPE_ACCOUNT: u32 = 0;
const SC_ADDRESS_TYPE_CONTRACT: u32 = 1;
const PUBLIC_KEY_TYPE_ED25519: u32 = 0;
const CONTRACT_DATA_DURABILITY_PERSISTENT: u32 = 1;
const SCV_BYTES: u32 = 13;
const SCV_SYMBOL: u32 = 15;
const SCV_VEC: u32 = 16;
const SCV_ADDRESS: u32 = 18;
const SCV_LEDGER_KEY_CONTRACT_INSTANCE: u32 = 20;
const HOST_FUNCTION_TYPE_INVOKE_CONTRACT: u32 = 0;
const SOROBAN_CREDENTIALS_SOURCE_ACCOUNT: u32 = 0;
const SOROBAN_AUTHORIZED_FUNCTION_TYPE_CONTRACT_FN: u32 = 0;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum XdrError {
    #[error("strkey has wrong length: expected 56 characters, got {0}")]
    StrkeyLength(usize),
    #[error("strkey contains a character outside the base32 alphabet")]
    StrkeyAlphabet,
    #[error("strkey checksum mismatch")]
    StrkeyChecksum,
    #[error("strkey version byte {found:#04x} is not the expected {expected:#04x}")]
    StrkeyVersion { expected: u8, found: u8 },
}

/// A decoded address ready for XDR emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScAddress {
    Account([u8; 32]),
    Contract([u8; 32]),
}

impl ScAddress {
    /// Parse a strkey: `G...` account or `C...` contract.
    pub fn from_strkey(strkey: &str) -> Result<Self, XdrError> {
        let (version, payload) = decode_strkey(strkey)?;
        match version {
            STRKEY_VERSION_ED25519 => Ok(Self::Account(payload)),
            STRKEY_VERSION_CONTRACT => Ok(Self::Contract(payload)),
            found => Err(XdrError::StrkeyVersion {
                expected: STRKEY_VERSION_ED25519,
                found,
            }),
        }
    }

    pub fn from_account_strkey(strkey: &str) -> Result<Self, XdrError> {
        match Self::from_strkey(strkey)? {
            account @ Self::Account(_) => Ok(account),
            Self::Contract(_) => Err(XdrError::StrkeyVersion {
                expected: STRKEY_VERSION_ED25519,
                found: STRKEY_VERSION_CONTRACT,
            }),
        }
    }

    pub fn from_contract_strkey(strkey: &str) -> Result<Self, XdrError> {
        match Self::from_strkey(strkey)? {
            contract @ Self::Contract(_) => Ok(contract),
            Self::Account(_) => Err(XdrError::StrkeyVersion {
                expected: STRKEY_VERSION_CONTRACT,
                found: STRKEY_VERSION_ED25519,
            }),
        }
    }
}

/// Base32-decode a 56-character strkey and verify its CRC16 checksum.
/// Returns the version byte and the 32-byte payload.
fn decode_strkey(strkey: &str) -> Result<(u8, [u8; 32]), XdrError> {
    let input = strkey.as_bytes();
    if input.len() != 56 {
        return Err(XdrError::StrkeyLength(input.len()));
    }

    let mut decoded = [0u8; 35];
    let mut bits: u32 = 0;
    let mut bit_count: u32 = 0;
    let mut out = 0;
    for &ch in input {
        let value = BASE32_ALPHABET
            .iter()
            .position(|&a| a == ch)
            .ok_or(XdrError::StrkeyAlphabet)? as u32;
        bits = (bits << 5) | value;
        bit_count += 5;
        if bit_count >= 8 {
            bit_count -= 8;
            decoded[out] = (bits >> bit_count) as u8;
            out += 1;
        }
    }

    let checksum = u16::from_le_bytes([decoded[33], decoded[34]]);
    if crc16_xmodem(&decoded[..33]) != checksum {
        return Err(XdrError::StrkeyChecksum);
    }

    let mut payload = [0u8; 32];
    payload.copy_from_slice(&decoded[1..33]);
    Ok((decoded[0], payload))
}

fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// Append-only XDR stream.
#[derive(Debug, Default)]
pub struct XdrWriter {
    buf: Vec<u8>,
}

impl XdrWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_base64(self) -> String {
        base64::engine::general_purpose::STANDARD.encode(self.buf)
    }

    fn u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    fn fixed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn var_opaque(&mut self, bytes: &[u8]) {
        self.u32(bytes.len() as u32);
        self.buf.extend_from_slice(bytes);
        // XDR pads opaque data to a 4-byte boundary.
        let pad = (4 - bytes.len() % 4) % 4;
        self.buf.extend_from_slice(&[0u8; 3][..pad]);
    }

    fn sc_address(&mut self, address: &ScAddress) {
        match address {
            ScAddress::Account(key) => {
                self.u32(SC_ADDRESS_TYPE_ACCOUNT);
                self.u32(PUBLIC_KEY_TYPE_ED25519);
                self.fixed(key);
            }
            ScAddress::Contract(hash) => {
                self.u32(SC_ADDRESS_TYPE_CONTRACT);
                self.fixed(hash);
            }
        }
    }

    fn scval_symbol(&mut self, symbol: &str) {
        self.u32(SCV_SYMBOL);
        self.var_opaque(symbol.as_bytes());
    }

    fn scval_bytes(&mut self, bytes: &[u8]) {
        self.u32(SCV_BYTES);
        self.var_opaque(bytes);
    }

    fn scval_address(&mut self, address: &ScAddress) {
        self.u32(SCV_ADDRESS);
        self.sc_address(address);
    }
}

/// `LedgerKey` for a contract's instance entry, base64-encoded for
/// `getLedgerEntries`.
pub fn contract_instance_key(contract: &ScAddress) -> String {
    let mut writer = XdrWriter::new();
    writer.u32(LEDGER_ENTRY_TYPE_CONTRACT_DATA);
    writer.sc_address(contract);
    writer.u32(SCV_LEDGER_KEY_CONTRACT_INSTANCE);
    writer.u32(CONTRACT_DATA_DURABILITY_PERSISTENT);
    writer.into_base64()
}

/// `LedgerKey` for a Stellar Asset Contract balance entry:
/// `vec![Symbol("Balance"), Address(holder)]`, persistent durability.
pub fn balance_entry_key(token: &ScAddress, holder: &ScAddress) -> String {
    let mut writer = XdrWriter::new();
    writer.u32(LEDGER_ENTRY_TYPE_CONTRACT_DATA);
    writer.sc_address(token);
    writer.u32(SCV_VEC);
    writer.u32(1); // option present
    writer.u32(2); // element count
    writer.scval_symbol("Balance");
    writer.scval_address(holder);
    writer.u32(CONTRACT_DATA_DURABILITY_PERSISTENT);
    writer.into_base64()
}

fn invoke_contract_args(
    writer: &mut XdrWriter,
    contract: &ScAddress,
    seal: &[u8],
    journal_raw: &[u8],
    claimant: &ScAddress,
) {
    writer.sc_address(contract);
    writer.var_opaque(b"submit_score");
    writer.u32(3); // argument count
    writer.scval_bytes(seal);
    writer.scval_bytes(journal_raw);
    writer.scval_address(claimant);
}

/// `HostFunction` invoking `submit_score(seal, journal_raw, claimant)`,
/// base64-encoded.
pub fn submit_score_host_function(
    contract: &ScAddress,
    seal: &[u8],
    journal_raw: &[u8],
    claimant: &ScAddress,
) -> String {
    let mut writer = XdrWriter::new();
    writer.u32(HOST_FUNCTION_TYPE_INVOKE_CONTRACT);
    invoke_contract_args(&mut writer, contract, seal, journal_raw, claimant);
    writer.into_base64()
}

/// Source-account `SorobanAuthorizationEntry` for the same invocation. The
/// relay's signing account authorizes it, so the credentials carry no
/// signature payload of their own.
pub fn submit_score_auth_entry(
    contract: &ScAddress,
    seal: &[u8],
    journal_raw: &[u8],
    claimant: &ScAddress,
) -> String {
    let mut writer = XdrWriter::new();
    writer.u32(SOROBAN_CREDENTIALS_SOURCE_ACCOUNT);
    writer.u32(SOROBAN_AUTHORIZED_FUNCTION_TYPE_CONTRACT_FN);
    invoke_contract_args(&mut writer, contract, seal, journal_raw, claimant);
    writer.u32(0); // no sub-invocations
    writer.into_base64()
}
