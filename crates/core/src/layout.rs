use crate::ir::{Builder, Type, Value};
use std::fmt::Debug;

/// A named, fixed byte range of the workgroup's shared memory.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub name: &'static str,
    pub offset: u32,
    pub size: u32,
}

/// Partitioning of the shared memory of one workgroup, fixed at lowering time.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SharedLayout {
    pub repack_scratch: Option<Region>,
    pub vertex_attributes: Option<Region>,
    pub prim_flags: [Option<Region>; 4],
    pub compaction_index: Option<Region>,
    pub prim_id_relay: Option<Region>,
    size: u32,
}

impl Region {
    pub fn end(&self) -> u32 {
        self.offset + self.size
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }

    /// Byte address (relative to the region) of element `index` when elements are `stride` bytes apart.
    pub fn element(&self, index: u32, stride: u32) -> u32 {
        let addr = index * stride;
        assert!(addr + stride <= self.size, "{:?}: element {index} out of bounds", self);
        addr
    }

    /// Emits the relative address of element `index`; combine with [`Region::offset`] as the access base.
    ///
    /// Constant indices are checked against the region here. Dynamic ones are only caught by
    /// the executor's check against the program's shared size.
    pub fn emit_element(&self, b: &mut Builder, index: Value, stride: u32) -> Value {
        if let Some(index) = b.program().instr(index).as_const() {
            let addr = self.element(index as u32, stride);
            return b.imm32(addr);
        }

        match stride {
            1 => index,
            _ => b.imul_imm(index, stride as u64),
        }
    }

    pub fn load(&self, b: &mut Builder, index: Value, stride: u32, field: u32, ty: Type) -> Value {
        debug_assert!(field + ty.bytes() <= stride);
        let addr = self.emit_element(b, index, stride);
        b.load_shared(addr, self.offset + field, ty)
    }

    pub fn store(&self, b: &mut Builder, value: Value, index: Value, stride: u32, field: u32) {
        debug_assert!(field + b.type_of(value).bytes() <= stride);
        let addr = self.emit_element(b, index, stride);
        b.store_shared(value, addr, self.offset + field);
    }
}

impl Debug for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{:#x}..{:#x}]", self.name, self.offset, self.end())
    }
}

impl SharedLayout {
    pub fn builder() -> SharedLayoutBuilder {
        SharedLayoutBuilder {
            layout: SharedLayout::default(),
        }
    }

    /// Total bytes required, including padding.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn regions(&self) -> impl Iterator<Item = Region> + '_ {
        [self.repack_scratch, self.vertex_attributes]
            .into_iter()
            .chain(self.prim_flags)
            .chain([self.compaction_index, self.prim_id_relay])
            .flatten()
    }
}

pub struct SharedLayoutBuilder {
    layout: SharedLayout,
}

impl SharedLayoutBuilder {
    fn allocate(&mut self, name: &'static str, size: u32, align: u32) -> Option<Region> {
        if size == 0 {
            return None;
        }

        let offset = self.layout.size.next_multiple_of(align);
        self.layout.size = offset + size;
        Some(Region { name, offset, size })
    }

    /// One count byte per wave, read back as a single 32 or 64-bit word.
    pub fn repack_scratch(mut self, max_num_waves: u32) -> Self {
        let size = if max_num_waves <= 4 { 4 } else { 8 };
        self.layout.repack_scratch = self.allocate("repack_scratch", size, 8);
        self
    }

    pub fn vertex_attributes(mut self, vertices: u32, stride: u32) -> Self {
        self.layout.vertex_attributes = self.allocate("vertex_attributes", vertices * stride, 4);
        self
    }

    pub fn prim_flags(mut self, stream: u8, vertices: u32) -> Self {
        self.layout.prim_flags[stream as usize] = self.allocate("prim_flags", vertices, 1);
        self
    }

    pub fn compaction_index(mut self, vertices: u32) -> Self {
        self.layout.compaction_index = self.allocate("compaction_index", vertices, 1);
        self
    }

    pub fn prim_id_relay(mut self, es_vertices: u32) -> Self {
        self.layout.prim_id_relay = self.allocate("prim_id_relay", es_vertices * 4, 4);
        self
    }

    pub fn build(mut self) -> SharedLayout {
        self.layout.size = self.layout.size.next_multiple_of(4);
        self.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BinOp, Instr, Program, Stage};

    #[test]
    fn regions_are_disjoint_and_aligned() {
        let layout = SharedLayout::builder()
            .repack_scratch(8)
            .vertex_attributes(64, 12)
            .prim_flags(0, 64)
            .prim_flags(2, 64)
            .compaction_index(64)
            .build();

        let regions = layout.regions().collect::<Vec<_>>();
        assert_eq!(regions.len(), 5);
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                assert!(!a.overlaps(b), "{a:?} overlaps {b:?}");
            }
        }

        assert_eq!(layout.repack_scratch.map(|r| (r.offset, r.size)), Some((0, 8)));
        assert_eq!(layout.vertex_attributes.map(|r| r.offset % 4), Some(0));
        assert!(layout.size() >= regions.iter().map(Region::end).max().unwrap_or(0));
        assert_eq!(layout.size() % 4, 0);
    }

    #[test]
    fn small_workgroups_use_narrow_scratch() {
        let layout = SharedLayout::builder().repack_scratch(2).build();
        assert_eq!(layout.repack_scratch.map(|r| r.size), Some(4));
    }

    #[test]
    fn empty_regions_are_skipped() {
        let layout = SharedLayout::builder().vertex_attributes(64, 0).build();
        assert_eq!(layout.vertex_attributes, None);
        assert_eq!(layout.size(), 0);
    }

    fn relay_load(index: u32) -> Program {
        let layout = SharedLayout::builder().prim_id_relay(4).build();
        let mut program = Program::new(Stage::Vertex);
        let mut b = Builder::new(&mut program);
        let index = b.imm32(index);
        if let Some(region) = layout.prim_id_relay {
            let value = region.load(&mut b, index, 4, 0, Type::U32);
            b.store_output(Default::default(), value);
        }
        b.finish();
        program
    }

    #[test]
    fn constant_elements_fold_to_an_address() {
        let program = relay_load(3);
        assert_eq!(program.validate(), Ok(()));

        let mut multiplies = 0;
        program.walk(|_, instr| multiplies += matches!(instr, Instr::Binary(BinOp::Mul, ..)) as usize);
        assert_eq!(multiplies, 0);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn constant_elements_are_bounds_checked() {
        relay_load(4);
    }
}
