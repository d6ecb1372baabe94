//! TON 单元（cell）与 BOC 编解码
//!
//! 只支持普通单元（ordinary cell）：最多 1023 位数据、4 个引用。
//! repr hash 按 TVM 规则计算：`sha256(d1 ‖ d2 ‖ data ‖ depth(refs) ‖ hash(refs))`。

use std::{collections::HashMap, sync::Arc};

use sha2::{Digest, Sha256};
use thiserror::Error;

pub const MAX_BITS: usize = 1023;
pub const MAX_REFS: usize = 4;
const BOC_MAGIC: [u8; 4] = [0xb5, 0xee, 0x9c, 0x72];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CellError {
    #[error("cell overflow: {0}")]
    Overflow(&'static str),
    #[error("cell underflow: {0}")]
    Underflow(&'static str),
    #[error("invalid boc: {0}")]
    InvalidBoc(String),
}

/// 不可变单元
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
    hash: [u8; 32],
    depth: u16,
}

impl Cell {
    fn new(data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>) -> Self {
        let depth = refs.iter().map(|r| r.depth + 1).max().unwrap_or(0);
        let mut cell = Self {
            data,
            bit_len,
            refs,
            hash: [0u8; 32],
            depth,
        };
        cell.hash = cell.compute_hash();
        cell
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), 0, Vec::new())
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    pub fn repr_hash(&self) -> [u8; 32] {
        self.hash
    }

    pub fn depth(&self) -> u16 {
        self.depth
    }

    pub fn parse(&self) -> CellSlice<'_> {
        CellSlice { cell: self, pos: 0, ref_pos: 0 }
    }

    fn descriptors(&self) -> [u8; 2] {
        let d1 = self.refs.len() as u8;
        let d2 = (self.bit_len / 8 + (self.bit_len + 7) / 8) as u8;
        [d1, d2]
    }

    /// 不足整字节时补 `1` 再补 `0`
    fn padded_data(&self) -> Vec<u8> {
        let mut data = self.data[..(self.bit_len + 7) / 8].to_vec();
        let rem = self.bit_len % 8;
        if rem != 0 {
            if let Some(last) = data.last_mut() {
                *last |= 0x80 >> rem;
            }
        }
        data
    }

    fn compute_hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.descriptors());
        hasher.update(self.padded_data());
        for r in &self.refs {
            hasher.update(r.depth.to_be_bytes());
        }
        for r in &self.refs {
            hasher.update(r.hash);
        }
        hasher.finalize().into()
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // BOC
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// 单根 BOC，无索引、无 CRC
    pub fn to_boc(&self) -> Vec<u8> {
        let mut order: Vec<&Cell> = Vec::new();
        let mut seen: HashMap<[u8; 32], ()> = HashMap::new();
        post_order(self, &mut order, &mut seen);
        order.reverse();

        let index: HashMap<[u8; 32], usize> = order
            .iter()
            .enumerate()
            .map(|(i, c)| (c.hash, i))
            .collect();

        let size_bytes = bytes_needed(order.len() as u64);
        let mut cells = Vec::new();
        for cell in &order {
            cells.extend_from_slice(&cell.descriptors());
            cells.extend_from_slice(&cell.padded_data());
            for r in &cell.refs {
                put_uint(&mut cells, index[&r.hash] as u64, size_bytes);
            }
        }
        let off_bytes = bytes_needed(cells.len() as u64);

        let mut out = Vec::with_capacity(cells.len() + 16);
        out.extend_from_slice(&BOC_MAGIC);
        out.push(size_bytes as u8);
        out.push(off_bytes as u8);
        put_uint(&mut out, order.len() as u64, size_bytes);
        put_uint(&mut out, 1, size_bytes);
        put_uint(&mut out, 0, size_bytes);
        put_uint(&mut out, cells.len() as u64, off_bytes);
        put_uint(&mut out, 0, size_bytes);
        out.extend_from_slice(&cells);
        out
    }

    /// 解析 BOC，返回第一个根单元
    pub fn from_boc(bytes: &[u8]) -> Result<Arc<Cell>, CellError> {
        let mut reader = ByteReader { bytes, pos: 0 };
        if reader.take(4)? != BOC_MAGIC {
            return Err(CellError::InvalidBoc("bad magic".into()));
        }
        let flags = reader.byte()?;
        let has_idx = flags & 0x80 != 0;
        let size_bytes = (flags & 0x07) as usize;
        let off_bytes = reader.byte()? as usize;
        if size_bytes == 0 || size_bytes > 4 || off_bytes == 0 || off_bytes > 8 {
            return Err(CellError::InvalidBoc("bad size fields".into()));
        }

        let cell_count = reader.uint(size_bytes)? as usize;
        let root_count = reader.uint(size_bytes)? as usize;
        let _absent = reader.uint(size_bytes)?;
        let _total_size = reader.uint(off_bytes)?;
        if root_count == 0 {
            return Err(CellError::InvalidBoc("no roots".into()));
        }
        let root = reader.uint(size_bytes)? as usize;
        for _ in 1..root_count {
            reader.uint(size_bytes)?;
        }
        if has_idx {
            let index_len = cell_count
                .checked_mul(off_bytes)
                .ok_or_else(|| CellError::InvalidBoc("index size overflow".into()))?;
            reader.take(index_len)?;
        }
        // 每个 cell 至少 2 字节描述符
        if cell_count > reader.remaining() / 2 {
            return Err(CellError::InvalidBoc(format!(
                "cell count {cell_count} exceeds payload of {} bytes",
                reader.remaining()
            )));
        }
        if root >= cell_count {
            return Err(CellError::InvalidBoc("root index out of range".into()));
        }

        struct Raw {
            data: Vec<u8>,
            bit_len: usize,
            refs: Vec<usize>,
        }
        let mut raws = Vec::with_capacity(cell_count);
        for i in 0..cell_count {
            let d1 = reader.byte()?;
            let d2 = reader.byte()?;
            if d1 & 0x08 != 0 {
                return Err(CellError::InvalidBoc("exotic cells are not supported".into()));
            }
            if d1 & 0x10 != 0 {
                return Err(CellError::InvalidBoc("stored cell hashes are not supported".into()));
            }
            let ref_count = (d1 & 0x07) as usize;
            if ref_count > MAX_REFS {
                return Err(CellError::InvalidBoc("too many refs".into()));
            }
            let byte_len = (d2 as usize + 1) / 2;
            let mut data = reader.take(byte_len)?.to_vec();
            let bit_len = if d2 % 2 == 0 {
                byte_len * 8
            } else {
                // 去掉补位：最后一个 1 及其后的 0
                let last = data.last().copied().unwrap_or(0);
                if last == 0 {
                    return Err(CellError::InvalidBoc("missing completion tag".into()));
                }
                let trailing = last.trailing_zeros() as usize;
                if let Some(b) = data.last_mut() {
                    *b &= !(1u8 << trailing);
                }
                byte_len * 8 - trailing - 1
            };
            let mut refs = Vec::with_capacity(ref_count);
            for _ in 0..ref_count {
                let r = reader.uint(size_bytes)? as usize;
                if r <= i || r >= cell_count {
                    return Err(CellError::InvalidBoc(format!("bad ref {r} in cell {i}")));
                }
                refs.push(r);
            }
            raws.push(Raw { data, bit_len, refs });
        }

        let mut built: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
        for i in (0..cell_count).rev() {
            let raw = &raws[i];
            let refs = raw
                .refs
                .iter()
                .map(|&r| built[r].clone().ok_or_else(|| CellError::InvalidBoc("dangling ref".into())))
                .collect::<Result<Vec<_>, _>>()?;
            built[i] = Some(Arc::new(Cell::new(raw.data.clone(), raw.bit_len, refs)));
        }

        built
            .get(root)
            .cloned()
            .flatten()
            .ok_or_else(|| CellError::InvalidBoc("root index out of range".into()))
    }
}

fn post_order<'a>(cell: &'a Cell, order: &mut Vec<&'a Cell>, seen: &mut HashMap<[u8; 32], ()>) {
    if seen.contains_key(&cell.hash) {
        return;
    }
    for r in &cell.refs {
        post_order(r, order, seen);
    }
    seen.insert(cell.hash, ());
    order.push(cell);
}

fn bytes_needed(value: u64) -> usize {
    let mut n = 1;
    while n < 8 && value >> (8 * n) != 0 {
        n += 1;
    }
    n
}

fn put_uint(out: &mut Vec<u8>, value: u64, bytes: usize) {
    out.extend_from_slice(&value.to_be_bytes()[8 - bytes..]);
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CellError> {
        let slice = self
            .pos
            .checked_add(n)
            .and_then(|end| self.bytes.get(self.pos..end))
            .ok_or_else(|| CellError::InvalidBoc("unexpected end of data".into()))?;
        self.pos += n;
        Ok(slice)
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn byte(&mut self) -> Result<u8, CellError> {
        Ok(self.take(1)?[0])
    }

    fn uint(&mut self, n: usize) -> Result<u64, CellError> {
        Ok(self.take(n)?.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// 构造与读取
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    pub fn store_bit(&mut self, bit: bool) -> Result<&mut Self, CellError> {
        if self.bit_len >= MAX_BITS {
            return Err(CellError::Overflow("data exceeds 1023 bits"));
        }
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            let idx = self.bit_len / 8;
            self.data[idx] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
        Ok(self)
    }

    /// 大端写入 `value` 的低 `bits` 位
    pub fn store_uint(&mut self, value: u128, bits: usize) -> Result<&mut Self, CellError> {
        if bits < 128 && value >> bits != 0 {
            return Err(CellError::Overflow("value does not fit in bit width"));
        }
        for i in (0..bits).rev() {
            let bit = i < 128 && (value >> i) & 1 == 1;
            self.store_bit(bit)?;
        }
        Ok(self)
    }

    pub fn store_int(&mut self, value: i64, bits: usize) -> Result<&mut Self, CellError> {
        let mask = if bits >= 128 { u128::MAX } else { (1u128 << bits) - 1 };
        self.store_uint((value as i128 as u128) & mask, bits)
    }

    pub fn store_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CellError> {
        for b in bytes {
            self.store_uint(u128::from(*b), 8)?;
        }
        Ok(self)
    }

    /// VarUInteger 16（Grams）
    pub fn store_coins(&mut self, amount: u128) -> Result<&mut Self, CellError> {
        let len = (128 - amount.leading_zeros() as usize + 7) / 8;
        if len > 15 {
            return Err(CellError::Overflow("coins amount too large"));
        }
        self.store_uint(len as u128, 4)?;
        if len > 0 {
            self.store_bytes(&amount.to_be_bytes()[16 - len..])?;
        }
        Ok(self)
    }

    pub fn store_ref(&mut self, cell: Arc<Cell>) -> Result<&mut Self, CellError> {
        if self.refs.len() >= MAX_REFS {
            return Err(CellError::Overflow("more than 4 refs"));
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// 追加另一个单元的全部位与引用
    pub fn store_cell(&mut self, cell: &Cell) -> Result<&mut Self, CellError> {
        let mut slice = cell.parse();
        while slice.remaining_bits() > 0 {
            self.store_bit(slice.load_bit()?)?;
        }
        for r in cell.refs() {
            self.store_ref(r.clone())?;
        }
        Ok(self)
    }

    pub fn build(&self) -> Cell {
        Cell::new(self.data.clone(), self.bit_len, self.refs.clone())
    }
}

/// 顺序读取单元内容
pub struct CellSlice<'a> {
    cell: &'a Cell,
    pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.pos
    }

    pub fn load_bit(&mut self) -> Result<bool, CellError> {
        if self.pos >= self.cell.bit_len {
            return Err(CellError::Underflow("no more bits"));
        }
        let bit = self.cell.data[self.pos / 8] & (0x80 >> (self.pos % 8)) != 0;
        self.pos += 1;
        Ok(bit)
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u128, CellError> {
        if bits > 128 {
            return Err(CellError::Underflow("cannot load more than 128 bits as integer"));
        }
        let mut value = 0u128;
        for _ in 0..bits {
            value = (value << 1) | u128::from(self.load_bit()?);
        }
        Ok(value)
    }

    pub fn load_bytes<const N: usize>(&mut self) -> Result<[u8; N], CellError> {
        let mut out = [0u8; N];
        for b in out.iter_mut() {
            *b = self.load_uint(8)? as u8;
        }
        Ok(out)
    }

    pub fn load_ref(&mut self) -> Result<Arc<Cell>, CellError> {
        let cell = self
            .cell
            .refs
            .get(self.ref_pos)
            .cloned()
            .ok_or(CellError::Underflow("no more refs"))?;
        self.ref_pos += 1;
        Ok(cell)
    }
}
