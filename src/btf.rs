//! BTF parsing and the CO-RE (Compile Once – Run Everywhere) relocation
//! engine: read `/sys/kernel/btf/vmlinux`, resolve named types, walk access
//! paths, and turn a relocation request into either a concrete field
//! offset/size or a "poison" sentinel the caller's generated instruction
//! stream substitutes in place of the access it could not resolve.
//!
//! There is no bindgen step here either — the BTF binary format
//! (`struct btf_header`/`struct btf_type`) is parsed by hand instead of
//! depending on a parsing crate.

use std::collections::HashMap;
use std::convert::TryInto;
use std::fs;

use log::debug;

use crate::error::{BtfError, RelocationError, Result};

const BTF_MAGIC: u16 = 0xeb9f;

// `btf_type.info` kind values (bits 24-28).
const KIND_INT: u8 = 1;
const KIND_PTR: u8 = 2;
const KIND_ARRAY: u8 = 3;
const KIND_STRUCT: u8 = 4;
const KIND_UNION: u8 = 5;
const KIND_ENUM: u8 = 6;
const KIND_FWD: u8 = 7;
const KIND_TYPEDEF: u8 = 8;
const KIND_VOLATILE: u8 = 9;
const KIND_CONST: u8 = 10;
const KIND_RESTRICT: u8 = 11;
const KIND_FUNC: u8 = 12;
const KIND_FUNC_PROTO: u8 = 13;
const KIND_VAR: u8 = 14;
const KIND_DATASEC: u8 = 15;
const KIND_ENUM64: u8 = 19;

#[derive(Debug, Clone)]
pub struct Member {
    pub name: String,
    pub type_id: u32,
    /// Bit offset from the start of the containing struct/union. For
    /// bitfields this is not byte-aligned; `bit_size` is nonzero in that
    /// case.
    pub bit_offset: u32,
    pub bit_size: u8,
}

#[derive(Debug, Clone)]
pub enum TypeKind {
    Int { bits: u8, signed: bool },
    Ptr { to: u32 },
    Array { elem: u32, len: u32 },
    Struct { members: Vec<Member>, size: u32 },
    Union { members: Vec<Member>, size: u32 },
    Enum { values: Vec<(String, i64)> },
    Typedef { of: u32 },
    Qualifier { of: u32 }, // volatile/const/restrict, offset-transparent
    Fwd,
    Func { of: u32 },
    FuncProto,
    Var { of: u32 },
    Datasec,
}

#[derive(Debug, Clone)]
pub struct BtfType {
    pub name: String,
    pub kind: TypeKind,
}

/// A parsed BTF blob: the type table plus a name -> id index for the kinds
/// CO-RE relocations actually target (struct/union/enum/typedef).
pub struct Btf {
    types: Vec<BtfType>,
    by_name: HashMap<String, u32>,
}

impl Btf {
    pub fn load_vmlinux() -> Result<Self> {
        let bytes = fs::read("/sys/kernel/btf/vmlinux")
            .map_err(|e| BtfError::NotAvailable(e.to_string()))?;
        Self::parse(&bytes)
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 24 {
            return Err(BtfError::Malformed("truncated header".into()).into());
        }
        let magic = u16::from_le_bytes([data[0], data[1]]);
        if magic != BTF_MAGIC {
            return Err(BtfError::Malformed(format!("bad magic 0x{magic:x}")).into());
        }
        let hdr_len = u32::from_le_bytes(data[4..8].try_into().unwrap()) as usize;
        let type_off = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
        let type_len = u32::from_le_bytes(data[12..16].try_into().unwrap()) as usize;
        let str_off = u32::from_le_bytes(data[16..20].try_into().unwrap()) as usize;
        let str_len = u32::from_le_bytes(data[20..24].try_into().unwrap()) as usize;

        let type_start = hdr_len + type_off;
        let type_end = type_start + type_len;
        let str_start = hdr_len + str_off;
        let str_end = str_start + str_len;
        if type_end > data.len() || str_end > data.len() {
            return Err(BtfError::Malformed("section out of bounds".into()).into());
        }
        let type_sec = &data[type_start..type_end];
        let str_sec = &data[str_start..str_end];

        let mut types = vec![BtfType { name: String::new(), kind: TypeKind::Fwd }]; // id 0 = void
        let mut cursor = 0usize;
        while cursor + 12 <= type_sec.len() {
            let name_off = u32::from_le_bytes(type_sec[cursor..cursor + 4].try_into().unwrap());
            let info = u32::from_le_bytes(type_sec[cursor + 4..cursor + 8].try_into().unwrap());
            let size_or_type = u32::from_le_bytes(type_sec[cursor + 8..cursor + 12].try_into().unwrap());
            cursor += 12;

            let kind_raw = ((info >> 24) & 0x1f) as u8;
            let vlen = (info & 0xffff) as usize;
            let kind_flag = (info >> 31) & 1 == 1;
            let name = read_str(str_sec, name_off);

            let kind = match kind_raw {
                KIND_INT => {
                    if cursor + 4 > type_sec.len() {
                        return Err(BtfError::Malformed("truncated int info".into()).into());
                    }
                    let int_info = u32::from_le_bytes(type_sec[cursor..cursor + 4].try_into().unwrap());
                    cursor += 4;
                    let bits = (int_info & 0xff) as u8;
                    let encoding = (int_info >> 24) & 0x0f;
                    TypeKind::Int { bits, signed: encoding & 0x1 != 0 }
                }
                KIND_PTR => TypeKind::Ptr { to: size_or_type },
                KIND_ARRAY => {
                    if cursor + 12 > type_sec.len() {
                        return Err(BtfError::Malformed("truncated array info".into()).into());
                    }
                    let elem = u32::from_le_bytes(type_sec[cursor..cursor + 4].try_into().unwrap());
                    let _index_type = u32::from_le_bytes(type_sec[cursor + 4..cursor + 8].try_into().unwrap());
                    let len = u32::from_le_bytes(type_sec[cursor + 8..cursor + 12].try_into().unwrap());
                    cursor += 12;
                    TypeKind::Array { elem, len }
                }
                KIND_STRUCT | KIND_UNION => {
                    let mut members = Vec::with_capacity(vlen);
                    for _ in 0..vlen {
                        if cursor + 12 > type_sec.len() {
                            return Err(BtfError::Malformed("truncated member".into()).into());
                        }
                        let m_name_off = u32::from_le_bytes(type_sec[cursor..cursor + 4].try_into().unwrap());
                        let m_type = u32::from_le_bytes(type_sec[cursor + 4..cursor + 8].try_into().unwrap());
                        let m_offset = u32::from_le_bytes(type_sec[cursor + 8..cursor + 12].try_into().unwrap());
                        cursor += 12;
                        let (bit_offset, bit_size) = if kind_flag {
                            ((m_offset & 0xffffff), (m_offset >> 24) as u8)
                        } else {
                            (m_offset, 0u8)
                        };
                        members.push(Member {
                            name: read_str(str_sec, m_name_off),
                            type_id: m_type,
                            bit_offset,
                            bit_size,
                        });
                    }
                    if kind_raw == KIND_STRUCT {
                        TypeKind::Struct { members, size: size_or_type }
                    } else {
                        TypeKind::Union { members, size: size_or_type }
                    }
                }
                KIND_ENUM => {
                    let mut values = Vec::with_capacity(vlen);
                    for _ in 0..vlen {
                        if cursor + 8 > type_sec.len() {
                            return Err(BtfError::Malformed("truncated enum value".into()).into());
                        }
                        let v_name_off = u32::from_le_bytes(type_sec[cursor..cursor + 4].try_into().unwrap());
                        let v_val = i32::from_le_bytes(type_sec[cursor + 4..cursor + 8].try_into().unwrap());
                        cursor += 8;
                        values.push((read_str(str_sec, v_name_off), v_val as i64));
                    }
                    TypeKind::Enum { values }
                }
                KIND_ENUM64 => {
                    let mut values = Vec::with_capacity(vlen);
                    for _ in 0..vlen {
                        if cursor + 12 > type_sec.len() {
                            return Err(BtfError::Malformed("truncated enum64 value".into()).into());
                        }
                        let v_name_off = u32::from_le_bytes(type_sec[cursor..cursor + 4].try_into().unwrap());
                        let lo = u32::from_le_bytes(type_sec[cursor + 4..cursor + 8].try_into().unwrap());
                        let hi = u32::from_le_bytes(type_sec[cursor + 8..cursor + 12].try_into().unwrap());
                        cursor += 12;
                        let val = ((hi as i64) << 32) | lo as i64;
                        values.push((read_str(str_sec, v_name_off), val));
                    }
                    TypeKind::Enum { values }
                }
                KIND_FWD => TypeKind::Fwd,
                KIND_TYPEDEF => TypeKind::Typedef { of: size_or_type },
                KIND_VOLATILE | KIND_CONST | KIND_RESTRICT => TypeKind::Qualifier { of: size_or_type },
                KIND_FUNC => TypeKind::Func { of: size_or_type },
                KIND_FUNC_PROTO => {
                    // vlen params of 8 bytes each, no useful info for CO-RE.
                    let skip = vlen * 8;
                    if cursor + skip > type_sec.len() {
                        return Err(BtfError::Malformed("truncated func_proto".into()).into());
                    }
                    cursor += skip;
                    TypeKind::FuncProto
                }
                KIND_VAR => {
                    if cursor + 4 > type_sec.len() {
                        return Err(BtfError::Malformed("truncated var info".into()).into());
                    }
                    cursor += 4; // linkage
                    TypeKind::Var { of: size_or_type }
                }
                KIND_DATASEC => {
                    let skip = vlen * 12;
                    if cursor + skip > type_sec.len() {
                        return Err(BtfError::Malformed("truncated datasec".into()).into());
                    }
                    cursor += skip;
                    TypeKind::Datasec
                }
                _ => TypeKind::Fwd, // unknown/unsupported kind: treat as opaque
            };

            types.push(BtfType { name, kind });
        }

        let mut by_name = HashMap::new();
        for (id, t) in types.iter().enumerate() {
            if !t.name.is_empty() {
                by_name.entry(t.name.clone()).or_insert(id as u32);
            }
        }

        debug!("parsed BTF blob: {} types", types.len());
        Ok(Btf { types, by_name })
    }

    pub fn type_by_name(&self, name: &str) -> Option<u32> {
        self.by_name.get(name).copied()
    }

    pub fn type_at(&self, id: u32) -> Option<&BtfType> {
        self.types.get(id as usize)
    }

    /// Strip typedefs/qualifiers to reach the underlying concrete type.
    pub fn resolve(&self, mut id: u32) -> Option<(u32, &BtfType)> {
        for _ in 0..64 {
            let t = self.types.get(id as usize)?;
            match &t.kind {
                TypeKind::Typedef { of } | TypeKind::Qualifier { of } | TypeKind::Var { of } => {
                    id = *of;
                }
                _ => return Some((id, t)),
            }
        }
        None
    }

    pub fn size_of(&self, id: u32) -> Option<u32> {
        let (_, t) = self.resolve(id)?;
        match &t.kind {
            TypeKind::Struct { size, .. } | TypeKind::Union { size, .. } => Some(*size),
            TypeKind::Int { bits, .. } => Some((*bits as u32 + 7) / 8),
            TypeKind::Ptr { .. } => Some(8),
            TypeKind::Array { elem, len } => self.size_of(*elem).map(|s| s * len),
            TypeKind::Enum { .. } => Some(4),
            _ => None,
        }
    }
}

fn read_str(str_sec: &[u8], offset: u32) -> String {
    let start = offset as usize;
    if start >= str_sec.len() {
        return String::new();
    }
    let end = str_sec[start..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| start + p)
        .unwrap_or(str_sec.len());
    String::from_utf8_lossy(&str_sec[start..end]).into_owned()
}

/// The kind of CO-RE relocation requested against a `(type, access path)`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RelocKind {
    FieldByteOffset,
    FieldByteSize,
    FieldExists,
    FieldSigned,
    FieldLShift64,
    FieldRShift64,
    TypeIdLocal,
    TypeIdTarget,
    TypeExists,
    TypeSize,
    TypeMatches,
    EnumvalExists,
    EnumValue,
}

/// Outcome of applying a relocation: either a concrete value to patch into
/// the instruction's immediate, or the "poison" sentinel the caller
/// substitutes so the program fails closed at runtime instead of reading
/// garbage — except `FieldExists`/`TypeExists`, which resolve to a concrete
/// `0` (not poison) since "the field is absent" is itself a valid answer.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RelocOutcome {
    Value(i64),
    Poison,
}

/// Sentinel CO-RE writes into an unresolvable relocation site. libbpf uses
/// `0xdeadc0de`; kept identical here so downstream tooling that greps for
/// that constant in a loaded program's disassembly still finds it.
pub const POISON_SENTINEL: i64 = 0xdead_c0de;

/// Resolve one relocation: `target` is the root type the access path is
/// walked against, `path` is the `:`-separated access path already split
/// into member/array indices (e.g. `"0:1:2"` -> `[0, 1, 2]`). Each step
/// indexes into the current STRUCT/UNION (by member position) or ARRAY (by
/// element position); there is no name lookup at this layer, matching how
/// a compiled relocation record only ever carries a numeric path.
///
/// `target`/`local` are the same tree here: this crate parses and matches
/// against a single BTF image rather than a separate local-object and
/// target-kernel pair, so `type-id-local` is just the type the caller
/// already has and `type-id-target`/`type-matches` degrade to an existence
/// check against that same tree.
pub fn resolve_relocation(
    btf: &Btf,
    target: u32,
    path: &[u32],
    kind: RelocKind,
) -> std::result::Result<RelocOutcome, RelocationError> {
    match kind {
        RelocKind::TypeExists | RelocKind::TypeMatches => {
            return Ok(RelocOutcome::Value(if btf.type_at(target).is_some() { 1 } else { 0 }));
        }
        RelocKind::TypeSize => {
            return match btf.size_of(target) {
                Some(s) => Ok(RelocOutcome::Value(s as i64)),
                None => Ok(RelocOutcome::Poison),
            };
        }
        RelocKind::TypeIdLocal => return Ok(RelocOutcome::Value(target as i64)),
        RelocKind::TypeIdTarget => {
            return Ok(match btf.type_at(target) {
                Some(_) => RelocOutcome::Value(target as i64),
                None => RelocOutcome::Poison,
            });
        }
        RelocKind::EnumvalExists | RelocKind::EnumValue => {
            return Ok(resolve_enumval(btf, target, path, kind));
        }
        _ => {}
    }

    let mut cur_id = target;
    let mut bit_offset: u64 = 0;
    let mut last_bit_size: u8 = 0;
    let mut saw_step = false;

    for &index in path {
        let (_, t) = match btf.resolve(cur_id) {
            Some(r) => r,
            None => return Ok(resolve_missing(kind)),
        };
        match &t.kind {
            TypeKind::Struct { members, .. } | TypeKind::Union { members, .. } => {
                let member = match members.get(index as usize) {
                    Some(m) => m,
                    None => return Ok(resolve_missing(kind)),
                };
                bit_offset += member.bit_offset as u64;
                last_bit_size = member.bit_size;
                cur_id = member.type_id;
            }
            TypeKind::Array { elem, len } => {
                if index >= *len {
                    return Ok(resolve_missing(kind));
                }
                let elem_size = match btf.size_of(*elem) {
                    Some(s) => s,
                    None => return Ok(resolve_missing(kind)),
                };
                bit_offset += index as u64 * elem_size as u64 * 8;
                last_bit_size = 0;
                cur_id = *elem;
            }
            _ => return Ok(resolve_missing(kind)),
        }
        saw_step = true;
    }

    if !saw_step {
        return Ok(resolve_missing(kind));
    }

    let outcome = match kind {
        RelocKind::FieldExists => RelocOutcome::Value(1),
        RelocKind::FieldByteOffset => RelocOutcome::Value((bit_offset / 8) as i64),
        RelocKind::FieldByteSize => match btf.size_of(cur_id) {
            Some(s) => RelocOutcome::Value(s as i64),
            None => RelocOutcome::Poison,
        },
        RelocKind::FieldSigned => match btf.resolve(cur_id) {
            Some((_, t)) => match &t.kind {
                TypeKind::Int { signed, .. } => RelocOutcome::Value(*signed as i64),
                TypeKind::Enum { .. } => RelocOutcome::Value(1),
                _ => RelocOutcome::Value(0),
            },
            None => RelocOutcome::Poison,
        },
        RelocKind::FieldLShift64 => {
            // For a bitfield of `bit_size` bits starting at `bit_offset`
            // within a byte-aligned container, libbpf's convention on
            // little-endian targets is `64 - bit_offset%8 - bit_size`.
            if last_bit_size == 0 {
                RelocOutcome::Value(0)
            } else {
                let within_byte = bit_offset % 8;
                RelocOutcome::Value(64 - within_byte as i64 - last_bit_size as i64)
            }
        }
        RelocKind::FieldRShift64 => {
            if last_bit_size == 0 {
                RelocOutcome::Value(0)
            } else {
                RelocOutcome::Value(64 - last_bit_size as i64)
            }
        }
        RelocKind::TypeIdLocal
        | RelocKind::TypeIdTarget
        | RelocKind::TypeExists
        | RelocKind::TypeSize
        | RelocKind::TypeMatches
        | RelocKind::EnumvalExists
        | RelocKind::EnumValue => unreachable!("handled above"),
    };
    Ok(outcome)
}

/// `enumval-exists`/`enumval-value`: `target` is the enum type itself and
/// `path`'s one index selects which enumerator, mirroring how the other
/// kinds index into a STRUCT/UNION/ARRAY rather than looking a name up.
fn resolve_enumval(btf: &Btf, target: u32, path: &[u32], kind: RelocKind) -> RelocOutcome {
    let idx = match path.first() {
        Some(i) => *i as usize,
        None => return resolve_missing(kind),
    };
    match btf.resolve(target) {
        Some((_, t)) => match &t.kind {
            TypeKind::Enum { values } => match values.get(idx) {
                Some((_, v)) => {
                    if kind == RelocKind::EnumvalExists {
                        RelocOutcome::Value(1)
                    } else {
                        RelocOutcome::Value(*v)
                    }
                }
                None => resolve_missing(kind),
            },
            _ => resolve_missing(kind),
        },
        None => resolve_missing(kind),
    }
}

fn resolve_missing(kind: RelocKind) -> RelocOutcome {
    match kind {
        RelocKind::FieldExists
        | RelocKind::EnumvalExists
        | RelocKind::TypeExists
        | RelocKind::TypeMatches => RelocOutcome::Value(0),
        _ => RelocOutcome::Poison,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_btf() -> Btf {
        // struct task_struct { int pid; struct task_struct *parent; };
        // Hand-assembled to avoid depending on a real vmlinux BTF blob in
        // tests: types[1] = int, types[2] = task_struct, types[3] = ptr.
        let types = vec![
            BtfType { name: String::new(), kind: TypeKind::Fwd },
            BtfType { name: "int".into(), kind: TypeKind::Int { bits: 32, signed: true } },
            BtfType {
                name: "task_struct".into(),
                kind: TypeKind::Struct {
                    members: vec![
                        Member { name: "pid".into(), type_id: 1, bit_offset: 0, bit_size: 0 },
                        Member { name: "parent".into(), type_id: 3, bit_offset: 64, bit_size: 0 },
                    ],
                    size: 16,
                },
            },
            BtfType { name: String::new(), kind: TypeKind::Ptr { to: 2 } },
        ];
        let mut by_name = HashMap::new();
        by_name.insert("task_struct".to_string(), 2);
        Btf { types, by_name }
    }

    #[test]
    fn resolves_field_offset() {
        let btf = sample_btf();
        // path 0 = pid (member index 0), path 1 = parent (member index 1)
        let out = resolve_relocation(&btf, 2, &[0], RelocKind::FieldByteOffset).unwrap();
        assert_eq!(out, RelocOutcome::Value(0));
        let out = resolve_relocation(&btf, 2, &[1], RelocKind::FieldByteOffset).unwrap();
        assert_eq!(out, RelocOutcome::Value(8));
    }

    #[test]
    fn missing_field_is_poison_except_for_exists_query() {
        let btf = sample_btf();
        let exists = resolve_relocation(&btf, 2, &[99], RelocKind::FieldExists).unwrap();
        assert_eq!(exists, RelocOutcome::Value(0));
        let offset = resolve_relocation(&btf, 2, &[99], RelocKind::FieldByteOffset).unwrap();
        assert_eq!(offset, RelocOutcome::Poison);
    }

    #[test]
    fn field_exists_for_present_field_is_one() {
        let btf = sample_btf();
        let out = resolve_relocation(&btf, 2, &[0], RelocKind::FieldExists).unwrap();
        assert_eq!(out, RelocOutcome::Value(1));
    }

    #[test]
    fn type_size_of_struct() {
        let btf = sample_btf();
        let out = resolve_relocation(&btf, 2, &[], RelocKind::TypeSize).unwrap();
        assert_eq!(out, RelocOutcome::Value(16));
    }

    #[test]
    fn steps_through_array_members() {
        // struct with a 4-element int array at member index 0, to check
        // that offset accumulates index * element-size through an ARRAY
        // step rather than just a STRUCT one.
        let mut btf = sample_btf();
        btf.types.push(BtfType { name: String::new(), kind: TypeKind::Array { elem: 1, len: 4 } });
        let arr_id = (btf.types.len() - 1) as u32;
        btf.types.push(BtfType {
            name: "with_array".into(),
            kind: TypeKind::Struct {
                members: vec![Member { name: "vals".into(), type_id: arr_id, bit_offset: 0, bit_size: 0 }],
                size: 16,
            },
        });
        let struct_id = (btf.types.len() - 1) as u32;
        let out = resolve_relocation(&btf, struct_id, &[0, 2], RelocKind::FieldByteOffset).unwrap();
        assert_eq!(out, RelocOutcome::Value(8)); // index 2 * sizeof(int)=4
    }

    #[test]
    fn type_id_local_and_target_resolve_self() {
        let btf = sample_btf();
        let local = resolve_relocation(&btf, 2, &[], RelocKind::TypeIdLocal).unwrap();
        assert_eq!(local, RelocOutcome::Value(2));
        let target = resolve_relocation(&btf, 2, &[], RelocKind::TypeIdTarget).unwrap();
        assert_eq!(target, RelocOutcome::Value(2));
        let missing = resolve_relocation(&btf, 999, &[], RelocKind::TypeIdTarget).unwrap();
        assert_eq!(missing, RelocOutcome::Poison);
    }

    #[test]
    fn enumval_exists_and_value() {
        let mut btf = sample_btf();
        btf.types.push(BtfType {
            name: "color".into(),
            kind: TypeKind::Enum { values: vec![("RED".into(), 0), ("BLUE".into(), 1)] },
        });
        let enum_id = (btf.types.len() - 1) as u32;
        let exists = resolve_relocation(&btf, enum_id, &[1], RelocKind::EnumvalExists).unwrap();
        assert_eq!(exists, RelocOutcome::Value(1));
        let value = resolve_relocation(&btf, enum_id, &[1], RelocKind::EnumValue).unwrap();
        assert_eq!(value, RelocOutcome::Value(1));
        let missing = resolve_relocation(&btf, enum_id, &[5], RelocKind::EnumvalExists).unwrap();
        assert_eq!(missing, RelocOutcome::Value(0));
    }
}
