use crate::SimError;
use nggpass_core::ir::IoSlot;
use nggpass_core::ngg::pack::ExportWord;
use nggpass_core::{Topology, WaveTarget};
use std::collections::BTreeMap;

/// What the hardware hands one primitive shader lane with an input primitive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PrimitiveInput {
    /// Workgroup-relative indices of the primitive's vertices.
    pub vertices: [u32; 3],
    pub primitive_id: u32,
    pub edge_flags: [bool; 3],
}

/// Launch parameters of one workgroup.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkgroupInputs {
    pub topology: Topology,
    pub num_lanes: u32,
    /// Lanes `0..es_vertices` have an input vertex.
    pub es_vertices: u32,
    /// Lane `i` has input primitive `primitives[i]`.
    pub primitives: Vec<PrimitiveInput>,
    /// Patch ids of the lanes with an input vertex, tessellation evaluation only.
    pub patch_ids: Vec<u32>,
    pub shader_query_enabled: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Allocation {
    pub vertices: u32,
    pub primitives: u32,
}

/// Everything a workgroup produced, with exports sorted by lane.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkgroupOutput {
    pub allocation: Option<Allocation>,
    pub primitives: Vec<(u32, ExportWord)>,
    pub vertices: Vec<(u32, BTreeMap<IoSlot, u64>)>,
    pub query_counters: [u64; 4],
    pub barriers: u32,
    pub shared_loads: u64,
    pub shared_stores: u64,
}

impl PrimitiveInput {
    pub fn new(vertices: [u32; 3], primitive_id: u32) -> Self {
        Self {
            vertices,
            primitive_id,
            edge_flags: [false; 3],
        }
    }

    pub fn with_edge_flags(mut self, edge_flags: [bool; 3]) -> Self {
        self.edge_flags = edge_flags;
        self
    }
}

impl WorkgroupInputs {
    pub fn new(num_lanes: u32) -> Self {
        Self {
            topology: Topology::Triangles,
            num_lanes,
            es_vertices: 0,
            primitives: Vec::new(),
            patch_ids: Vec::new(),
            shader_query_enabled: false,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_es_vertices(mut self, es_vertices: u32) -> Self {
        self.es_vertices = es_vertices;
        self
    }

    pub fn with_primitives(mut self, primitives: impl IntoIterator<Item = PrimitiveInput>) -> Self {
        self.primitives = primitives.into_iter().collect();
        self
    }

    pub fn with_patch_ids(mut self, patch_ids: impl IntoIterator<Item = u32>) -> Self {
        self.patch_ids = patch_ids.into_iter().collect();
        self
    }

    pub fn with_shader_query(mut self, enabled: bool) -> Self {
        self.shader_query_enabled = enabled;
        self
    }

    pub fn num_waves(&self, wave: WaveTarget) -> u32 {
        self.num_lanes.div_ceil(wave.size())
    }

    pub fn num_primitives(&self) -> u32 {
        self.primitives.len() as u32
    }

    pub fn primitive(&self, lane: u32) -> Option<&PrimitiveInput> {
        self.primitives.get(lane as usize)
    }

    pub fn validate(&self, wave: WaveTarget) -> Result<(), SimError> {
        if self.num_lanes == 0 {
            return Err(SimError::Launch("empty workgroup"));
        }
        if self.num_waves(wave) > 8 {
            return Err(SimError::Launch("more than 8 waves"));
        }
        if self.es_vertices > self.num_lanes {
            return Err(SimError::Launch("more input vertices than lanes"));
        }
        if self.num_primitives() > self.num_lanes {
            return Err(SimError::Launch("more input primitives than lanes"));
        }

        Ok(())
    }
}

impl WorkgroupOutput {
    /// Exported words of the non-null primitives, in lane order.
    pub fn live_primitives(&self) -> impl Iterator<Item = ExportWord> + '_ {
        self.primitives.iter().map(|&(_, word)| word).filter(|word| !word.is_null())
    }

    /// Value of `io` in each exported vertex, in lane order.
    pub fn vertex_outputs(&self, io: IoSlot) -> Vec<Option<u64>> {
        self.vertices.iter().map(|(_, outputs)| outputs.get(&io).copied()).collect()
    }
}
