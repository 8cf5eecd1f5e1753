use crate::config::{ProvokingVertex, Topology};
use crate::ir::{Builder, Type, Value};
use std::fmt::Debug;

pub const INDEX_BITS: u32 = 10;
pub const INDEX_MASK: u32 = (1 << INDEX_BITS) - 1;
pub const EDGE_FLAG_BIT: u32 = 9;
pub const NULL_PRIMITIVE_BIT: u32 = 31;

/// Primitive connectivity as consumed by the primitive export instruction.
///
/// Vertex `i` occupies bits `10 * i .. 10 * i + 10`; in the vertex shader path bit `10 * i + 9`
/// doubles as that vertex's edge flag. Bit 31 marks a null primitive.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq)]
pub struct ExportWord(pub u32);

/// Per-vertex bookkeeping byte written by `emit_vertex`.
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq)]
pub struct PrimitiveFlags(pub u8);

impl ExportWord {
    pub fn pack(indices: &[u32], edge_flags: Option<&[bool]>, is_null: bool) -> Self {
        debug_assert!((1..=3).contains(&indices.len()));

        let mut word = 0;
        for (i, &index) in indices.iter().enumerate() {
            debug_assert!(index <= INDEX_MASK, "vertex index {index} does not fit 10 bits");
            word |= index << (INDEX_BITS * i as u32);
        }

        if let Some(edge_flags) = edge_flags {
            for (i, &flag) in edge_flags.iter().enumerate().take(indices.len()) {
                word |= (flag as u32) << (INDEX_BITS * i as u32 + EDGE_FLAG_BIT);
            }
        }

        if is_null {
            word |= 1 << NULL_PRIMITIVE_BIT;
        }

        Self(word)
    }

    /// The `i`-th 10-bit index field, edge flag bit included.
    pub fn index(self, i: u32) -> u32 {
        (self.0 >> (INDEX_BITS * i)) & INDEX_MASK
    }

    pub fn index_without_edge_flag(self, i: u32) -> u32 {
        self.index(i) & !(1 << EDGE_FLAG_BIT)
    }

    pub fn edge_flag(self, i: u32) -> bool {
        self.0 & (1 << (INDEX_BITS * i + EDGE_FLAG_BIT)) != 0
    }

    pub fn is_null(self) -> bool {
        self.0 & (1 << NULL_PRIMITIVE_BIT) != 0
    }

    pub fn unpack(self) -> [u32; 3] {
        [self.index(0), self.index(1), self.index(2)]
    }
}

impl Debug for ExportWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_null() {
            write!(f, "ExportWord(null, {:#010x})", self.0)
        } else {
            write!(f, "ExportWord{:?}", self.unpack())
        }
    }
}

impl PrimitiveFlags {
    pub const COMPLETES_PRIMITIVE: u8 = 1 << 0;
    pub const ODD: u8 = 1 << 1;
    pub const LIVE: u8 = 1 << 2;

    /// Flags of a vertex emitted after `vertices_in_primitive` other vertices of the same strip.
    pub fn for_vertex(topology: Topology, vertices_in_primitive: u32) -> Self {
        let mut flags = Self::LIVE;
        if vertices_in_primitive >= topology.vertex_count() - 1 {
            flags |= Self::COMPLETES_PRIMITIVE;
        }
        if topology == Topology::Triangles && vertices_in_primitive & 1 != 0 {
            flags |= Self::ODD;
        }
        Self(flags)
    }

    pub fn completes_primitive(self) -> bool {
        self.0 & Self::COMPLETES_PRIMITIVE != 0
    }

    pub fn is_odd(self) -> bool {
        self.0 & Self::ODD != 0
    }

    pub fn is_live(self) -> bool {
        self.0 & Self::LIVE != 0
    }
}

impl Debug for PrimitiveFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PrimitiveFlags({}{}{})",
            if self.is_live() { "L" } else { "-" },
            if self.completes_primitive() { "C" } else { "-" },
            if self.is_odd() { "O" } else { "-" },
        )
    }
}

/// Vertex ranks of the primitive completed by the vertex at `rank`, taking the primitive
/// out of a strip into an independent list.
///
/// The last `vertex_count` vertices form the primitive. Odd triangles swap their two
/// non-provoking vertices to keep the winding of the strip.
pub fn strip_vertex_indices(topology: Topology, rank: u32, odd: bool, provoking: ProvokingVertex) -> Vec<u32> {
    let count = topology.vertex_count();
    let mut indices = (0..count).map(|i| rank.wrapping_sub(count - 1 - i)).collect::<Vec<_>>();

    if topology == Topology::Triangles && odd {
        match provoking {
            ProvokingVertex::First => indices.swap(1, 2),
            ProvokingVertex::Last => indices.swap(0, 1),
        }
    }

    indices
}

/// Emits the packing of up to three vertex indices into an export word.
pub fn emit_pack_export_word(
    b: &mut Builder,
    indices: &[Value],
    edge_flags: Option<&[Value]>,
    is_null: Option<Value>,
) -> Value {
    debug_assert!((1..=3).contains(&indices.len()));

    let mut arg = indices[0];
    for (i, &index) in indices.iter().enumerate() {
        if i != 0 {
            let shifted = b.ishl_imm(index, INDEX_BITS * i as u32);
            arg = b.ior(arg, shifted);
        }

        if let Some(flag) = edge_flags.and_then(|flags| flags.get(i)) {
            let flag = b.convert(*flag, Type::U32);
            let shifted = b.ishl_imm(flag, INDEX_BITS * i as u32 + EDGE_FLAG_BIT);
            arg = b.ior(arg, shifted);
        }
    }

    if let Some(is_null) = is_null {
        let is_null = b.convert(is_null, Type::U32);
        let shifted = b.ishl_imm(is_null, NULL_PRIMITIVE_BIT);
        arg = b.ior(arg, shifted);
    }

    arg
}

/// IR counterpart of [`strip_vertex_indices`]: `flags` is the completing vertex's
/// [`PrimitiveFlags`] byte, `rank` its compacted index.
pub fn emit_strip_vertex_indices(
    b: &mut Builder,
    topology: Topology,
    rank: Value,
    flags: Value,
    provoking: ProvokingVertex,
) -> Vec<Value> {
    let count = topology.vertex_count();
    let mut indices = (0..count)
        .map(|i| match count - 1 - i {
            0 => rank,
            back => b.isub_imm(rank, back as u64),
        })
        .collect::<Vec<_>>();

    if topology == Topology::Triangles {
        let flags = b.convert(flags, Type::U32);
        let odd = b.ubfe(flags, 1, 1);

        let (inc, dec) = match provoking {
            ProvokingVertex::First => (1, 2),
            ProvokingVertex::Last => (0, 1),
        };
        indices[inc] = b.iadd(indices[inc], odd);
        indices[dec] = b.isub(indices[dec], odd);
    }

    indices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_word_round_trip() {
        let word = ExportWord::pack(&[5, 300, 1023], None, false);
        assert_eq!(word.unpack(), [5, 300, 1023]);
        assert!(!word.is_null());

        let null = ExportWord::pack(&[5, 300, 1023], None, true);
        assert!(null.is_null());
        assert_eq!(null.0 & !(1 << 31), word.0);
        assert_eq!(null.unpack(), [5, 300, 1023]);
    }

    #[test]
    fn export_word_layout() {
        assert_eq!(ExportWord::pack(&[1, 2, 3], None, false).0, 1 | (2 << 10) | (3 << 20));
        assert_eq!(ExportWord::pack(&[7], None, false).0, 7);
        assert_eq!(ExportWord::pack(&[0], None, true).0, 1 << 31);
    }

    #[test]
    fn edge_flags_use_bit_nine_of_each_index() {
        let word = ExportWord::pack(&[1, 2, 3], Some(&[true, false, true]), false);
        assert_eq!(word.0, 1 | (1 << 9) | (2 << 10) | (3 << 20) | (1 << 29));
        assert!(word.edge_flag(0) && !word.edge_flag(1) && word.edge_flag(2));
        assert_eq!(word.index_without_edge_flag(0), 1);
        assert_eq!(word.index_without_edge_flag(2), 3);
    }

    #[test]
    fn primitive_flags() {
        let t = Topology::Triangles;
        assert_eq!(PrimitiveFlags::for_vertex(t, 0).0, PrimitiveFlags::LIVE);
        assert_eq!(PrimitiveFlags::for_vertex(t, 1).0, PrimitiveFlags::LIVE | PrimitiveFlags::ODD);
        assert_eq!(
            PrimitiveFlags::for_vertex(t, 2).0,
            PrimitiveFlags::LIVE | PrimitiveFlags::COMPLETES_PRIMITIVE
        );
        assert_eq!(PrimitiveFlags::for_vertex(t, 3).0, 0b111);

        assert!(!PrimitiveFlags::for_vertex(Topology::Lines, 1).is_odd());
        assert!(PrimitiveFlags::for_vertex(Topology::Lines, 1).completes_primitive());
        assert!(PrimitiveFlags::for_vertex(Topology::Points, 0).completes_primitive());
    }

    /// Triangle `i` of a strip, as listed by the Vulkan specification.
    fn vulkan_strip_triangle(i: u32, provoking: ProvokingVertex) -> Vec<u32> {
        match provoking {
            ProvokingVertex::First => vec![i, i + 1 + i % 2, i + 2 - i % 2],
            ProvokingVertex::Last => vec![i + i % 2, i + 1 - i % 2, i + 2],
        }
    }

    #[test]
    fn strip_parity_matches_vulkan() {
        for provoking in [ProvokingVertex::First, ProvokingVertex::Last] {
            for rank in 2..6 {
                let flags = PrimitiveFlags::for_vertex(Topology::Triangles, rank);
                assert!(flags.completes_primitive());
                assert_eq!(
                    strip_vertex_indices(Topology::Triangles, rank, flags.is_odd(), provoking),
                    vulkan_strip_triangle(rank - 2, provoking),
                    "rank {rank} {provoking:?}",
                );
            }
        }
    }

    #[test]
    fn lines_and_points_slide() {
        assert_eq!(strip_vertex_indices(Topology::Lines, 4, true, ProvokingVertex::Last), vec![3, 4]);
        assert_eq!(strip_vertex_indices(Topology::Points, 4, true, ProvokingVertex::First), vec![4]);
    }
}
