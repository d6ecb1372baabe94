//! TON 地址：原始形式 `wc:hex` 与用户友好形式（36 字节 base64）

use std::{fmt, str::FromStr};

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE},
    Engine as _,
};

use super::cell::{CellBuilder, CellError, CellSlice};

const TAG_BOUNCEABLE: u8 = 0x11;
const TAG_NON_BOUNCEABLE: u8 = 0x51;
const TAG_TESTNET: u8 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TonAddress {
    pub workchain: i8,
    pub hash: [u8; 32],
}

fn crc16_xmodem(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for byte in data {
        crc ^= u16::from(*byte) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

impl TonAddress {
    pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash }
    }

    /// 原始形式或用户友好形式（标准 / URL 安全 base64）
    pub fn parse(value: &str) -> Result<Self, String> {
        let value = value.trim();
        if let Some((wc, hash)) = value.split_once(':') {
            let workchain: i8 = wc.parse().map_err(|_| format!("invalid workchain: {wc}"))?;
            let bytes = hex::decode(hash).map_err(|_| "address hash is not hex".to_string())?;
            let hash: [u8; 32] = bytes
                .try_into()
                .map_err(|_| "address hash must be 32 bytes".to_string())?;
            return Ok(Self { workchain, hash });
        }

        if value.len() != 48 {
            return Err(format!("friendly address must be 48 characters, got {}", value.len()));
        }
        let bytes = URL_SAFE
            .decode(value)
            .or_else(|_| STANDARD.decode(value))
            .map_err(|_| "address is not base64".to_string())?;
        if bytes.len() != 36 {
            return Err("friendly address must decode to 36 bytes".into());
        }

        let crc = u16::from_be_bytes([bytes[34], bytes[35]]);
        if crc16_xmodem(&bytes[..34]) != crc {
            return Err("address checksum mismatch".into());
        }
        let tag = bytes[0] & !TAG_TESTNET;
        if tag != TAG_BOUNCEABLE && tag != TAG_NON_BOUNCEABLE {
            return Err(format!("unknown address tag {:#04x}", bytes[0]));
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok(Self {
            workchain: bytes[1] as i8,
            hash,
        })
    }

    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    /// 用户友好形式，URL 安全 base64
    pub fn to_friendly(&self, bounceable: bool, testnet: bool) -> String {
        let mut tag = if bounceable { TAG_BOUNCEABLE } else { TAG_NON_BOUNCEABLE };
        if testnet {
            tag |= TAG_TESTNET;
        }
        let mut bytes = Vec::with_capacity(36);
        bytes.push(tag);
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash);
        let crc = crc16_xmodem(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        URL_SAFE.encode(bytes)
    }

    /// MsgAddressInt（addr_std，无 anycast）
    pub fn store(&self, builder: &mut CellBuilder) -> Result<(), CellError> {
        builder.store_uint(0b10, 2)?;
        builder.store_bit(false)?;
        builder.store_int(i64::from(self.workchain), 8)?;
        builder.store_bytes(&self.hash)?;
        Ok(())
    }

    pub fn load(slice: &mut CellSlice<'_>) -> Result<Self, CellError> {
        if slice.load_uint(2)? != 0b10 {
            return Err(CellError::Underflow("expected addr_std"));
        }
        if slice.load_bit()? {
            return Err(CellError::Underflow("anycast addresses are not supported"));
        }
        let workchain = slice.load_uint(8)? as u8 as i8;
        let hash = slice.load_bytes::<32>()?;
        Ok(Self { workchain, hash })
    }
}

impl FromStr for TonAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TonAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_friendly(true, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_friendly_encoding() {
        let zero = TonAddress::new(0, [0u8; 32]);
        assert_eq!(zero.to_friendly(true, false), "EQAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAM9c");
        assert_eq!(zero.to_friendly(false, false), "UQAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAJKZ");
        assert_eq!(zero.to_friendly(true, true), "kQAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAHTW");

        let master = TonAddress::new(-1, [0x33; 32]);
        assert_eq!(master.to_friendly(true, false), "Ef8zMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzM0vF");
    }

    #[test]
    fn test_parse_forms() {
        let master = TonAddress::parse("Ef8zMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzM0vF").unwrap();
        assert_eq!(master.workchain, -1);
        assert_eq!(master.hash, [0x33; 32]);

        let raw = TonAddress::parse(&format!("-1:{}", "33".repeat(32))).unwrap();
        assert_eq!(raw, master);
        assert_eq!(raw.to_raw(), format!("-1:{}", "33".repeat(32)));

        assert!(TonAddress::parse("EQAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAM9d").is_err());
        assert!(TonAddress::parse("0:abcd").is_err());
        assert!(TonAddress::parse("not-an-address").is_err());
    }

    #[test]
    fn test_msg_address_int_layout() {
        let address = TonAddress::new(-1, [0xab; 32]);
        let mut b = CellBuilder::new();
        address.store(&mut b).unwrap();
        let cell = b.build();
        assert_eq!(cell.bit_len(), 267);
        assert_eq!(TonAddress::load(&mut cell.parse()).unwrap(), address);
    }
}
