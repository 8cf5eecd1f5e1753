use crate::subgroup::WaveTarget;
use thiserror::Error;

/// Largest workgroup the primitive shader hardware launches.
pub const MAX_WORKGROUP_SIZE: u32 = 256;
/// Compaction indices are stored in one byte per output vertex.
pub const MAX_OUTPUT_VERTICES: u32 = 256;
pub const MAX_STREAMS: u8 = 4;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum Topology {
    Points,
    Lines,
    Triangles,
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub enum ProvokingVertex {
    #[default]
    First,
    Last,
}

/// Compile-time description of one NGG lowering.
#[derive(Clone, Debug, PartialEq)]
pub struct NggConfig {
    pub topology: Topology,
    pub provoking_vertex: ProvokingVertex,
    pub wave: WaveTarget,
    pub max_workgroup_size: u32,
    /// Most ES vertices one workgroup can receive.
    pub max_es_vertices: u32,
    pub export_prim_id: bool,
    pub consider_passthrough: bool,
    pub consider_culling: bool,
    pub gs: GsConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GsConfig {
    /// Declared maximum of vertices one geometry shader invocation emits per stream.
    pub max_vertices_out: u32,
    /// Most geometry shader invocations (input primitives) per workgroup.
    pub max_input_primitives: u32,
    /// Bit `n` set when vertex stream `n` is used.
    pub active_streams: u8,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("workgroup size {0} is not in 1..=256")]
    WorkgroupSize(u32),
    #[error("workgroup of {size} lanes needs {waves} waves, at most 8 are supported")]
    TooManyWaves { size: u32, waves: u32 },
    #[error("{0} ES vertices do not fit the workgroup")]
    EsVertices(u32),
    #[error("max_vertices_out must be at least 1")]
    NoOutputVertices,
    #[error("{input_primitives} invocations x {max_vertices_out} vertices exceeds {limit} output vertices")]
    TooManyOutputVertices {
        input_primitives: u32,
        max_vertices_out: u32,
        limit: u32,
    },
    #[error("stream mask {0:#x} must enable stream 0 and only streams 0..4")]
    StreamMask(u8),
}

impl Topology {
    pub fn vertex_count(self) -> u32 {
        match self {
            Topology::Points => 1,
            Topology::Lines => 2,
            Topology::Triangles => 3,
        }
    }
}

impl ProvokingVertex {
    /// Index of the provoking vertex within one primitive.
    pub fn index(self, topology: Topology) -> u32 {
        match self {
            ProvokingVertex::First => 0,
            ProvokingVertex::Last => topology.vertex_count() - 1,
        }
    }
}

impl Default for NggConfig {
    fn default() -> Self {
        Self {
            topology: Topology::Triangles,
            provoking_vertex: ProvokingVertex::First,
            wave: WaveTarget::Wave64,
            max_workgroup_size: 128,
            max_es_vertices: 128,
            export_prim_id: false,
            consider_passthrough: false,
            consider_culling: false,
            gs: GsConfig::default(),
        }
    }
}

impl Default for GsConfig {
    fn default() -> Self {
        Self {
            max_vertices_out: 4,
            max_input_primitives: 32,
            active_streams: 0b1,
        }
    }
}

impl NggConfig {
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    pub fn with_provoking_vertex(mut self, provoking_vertex: ProvokingVertex) -> Self {
        self.provoking_vertex = provoking_vertex;
        self
    }

    pub fn with_wave(mut self, wave: WaveTarget) -> Self {
        self.wave = wave;
        self
    }

    /// Sets the workgroup size, and the ES vertex budget to match it.
    pub fn with_workgroup_size(mut self, size: u32) -> Self {
        self.max_workgroup_size = size;
        self.max_es_vertices = size;
        self
    }

    pub fn with_export_prim_id(mut self, export_prim_id: bool) -> Self {
        self.export_prim_id = export_prim_id;
        self
    }

    pub fn with_passthrough(mut self, consider_passthrough: bool) -> Self {
        self.consider_passthrough = consider_passthrough;
        self
    }

    pub fn with_culling(mut self, consider_culling: bool) -> Self {
        self.consider_culling = consider_culling;
        self
    }

    pub fn with_gs(mut self, gs: GsConfig) -> Self {
        self.gs = gs;
        self
    }

    pub fn max_num_waves(&self) -> u32 {
        self.max_workgroup_size.div_ceil(self.wave.size())
    }

    pub fn provoking_vertex_index(&self) -> u32 {
        self.provoking_vertex.index(self.topology)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_WORKGROUP_SIZE).contains(&self.max_workgroup_size) {
            return Err(ConfigError::WorkgroupSize(self.max_workgroup_size));
        }

        let waves = self.max_num_waves();
        if waves > 8 {
            return Err(ConfigError::TooManyWaves {
                size: self.max_workgroup_size,
                waves,
            });
        }

        if self.max_es_vertices == 0 || self.max_es_vertices > self.max_workgroup_size {
            return Err(ConfigError::EsVertices(self.max_es_vertices));
        }

        Ok(())
    }

    /// Validation for the geometry shader pipeline, on top of [`NggConfig::validate`].
    pub fn validate_gs(&self) -> Result<(), ConfigError> {
        self.validate()?;

        let gs = &self.gs;
        if gs.max_vertices_out == 0 {
            return Err(ConfigError::NoOutputVertices);
        }

        if gs.active_streams & 1 == 0 || gs.active_streams >> MAX_STREAMS != 0 {
            return Err(ConfigError::StreamMask(gs.active_streams));
        }

        let limit = MAX_OUTPUT_VERTICES.min(self.max_workgroup_size);
        if gs.max_input_primitives == 0 || gs.max_input_primitives.saturating_mul(gs.max_vertices_out) > limit {
            return Err(ConfigError::TooManyOutputVertices {
                input_primitives: gs.max_input_primitives,
                max_vertices_out: gs.max_vertices_out,
                limit,
            });
        }

        Ok(())
    }
}

impl GsConfig {
    pub fn max_output_vertices(&self) -> u32 {
        self.max_input_primitives * self.max_vertices_out
    }

    pub fn is_stream_active(&self, stream: u8) -> bool {
        stream < MAX_STREAMS && self.active_streams & (1 << stream) != 0
    }

    pub fn streams(&self) -> impl Iterator<Item = u8> + '_ {
        (0..MAX_STREAMS).filter(|&stream| self.is_stream_active(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert_eq!(NggConfig::default().validate(), Ok(()));
        assert_eq!(NggConfig::default().validate_gs(), Ok(()));
    }

    #[test]
    fn wave_count() {
        let config = NggConfig::default().with_wave(WaveTarget::Wave32).with_workgroup_size(100);
        assert_eq!(config.max_num_waves(), 4);
        let config = config.with_wave(WaveTarget::Wave64);
        assert_eq!(config.max_num_waves(), 2);
    }

    #[test]
    fn rejects_bad_workgroups() {
        let config = NggConfig::default().with_workgroup_size(0);
        assert_eq!(config.validate(), Err(ConfigError::WorkgroupSize(0)));

        let config = NggConfig::default().with_workgroup_size(512);
        assert_eq!(config.validate(), Err(ConfigError::WorkgroupSize(512)));

        let mut config = NggConfig::default();
        config.max_es_vertices = 0;
        assert_eq!(config.validate(), Err(ConfigError::EsVertices(0)));
    }

    #[test]
    fn rejects_bad_gs() {
        let config = NggConfig::default().with_gs(GsConfig {
            active_streams: 0b10,
            ..GsConfig::default()
        });
        assert_eq!(config.validate_gs(), Err(ConfigError::StreamMask(0b10)));

        let config = NggConfig::default().with_gs(GsConfig {
            max_vertices_out: 8,
            max_input_primitives: 64,
            active_streams: 1,
        });
        assert!(matches!(config.validate_gs(), Err(ConfigError::TooManyOutputVertices { .. })));
    }

    #[test]
    fn provoking_index() {
        assert_eq!(ProvokingVertex::Last.index(Topology::Triangles), 2);
        assert_eq!(ProvokingVertex::Last.index(Topology::Lines), 1);
        assert_eq!(ProvokingVertex::First.index(Topology::Triangles), 0);
    }
}
