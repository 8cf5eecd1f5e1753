use super::pack::{PrimitiveFlags, emit_pack_export_word, emit_strip_vertex_indices};
use super::repack::emit_repack;
use super::{NggInfo, emit_alloc};
use crate::config::NggConfig;
use crate::error::LowerError;
use crate::ir::{Block, Builder, Instr, Intrinsic, IoSlot, Node, Program, Stage, Type, Value, Var};
use crate::layout::{Region, SharedLayout};
use crate::subgroup::Subgroup;
use log::{debug, warn};
use std::collections::BTreeMap;

/// An output component of an active stream, staged in a variable until the next emit.
struct Attribute {
    io: IoSlot,
    ty: Type,
    /// Byte offset within one vertex.
    offset: u32,
    var: Var,
}

/// Facts about the body gathered before anything is rewritten.
struct OutputInfo {
    types: BTreeMap<IoSlot, Type>,
    counted: [bool; 4],
    /// Every count call of the stream passes `max_vertices_out` as a constant.
    static_count: [bool; 4],
    dropped_emits: usize,
}

struct GsState<'c> {
    config: &'c NggConfig,
    layout: SharedLayout,
    attributes: Vec<Attribute>,
    stride: u32,
}

/// Lowers a geometry program.
///
/// Emitted vertices are staged in shared memory together with a [`PrimitiveFlags`] byte
/// each. After the body, stream 0 is exported either straight from the staging area when
/// every invocation emits the declared maximum, or after compacting the live vertices.
pub fn lower_ngg_gs(program: &mut Program, config: &NggConfig) -> Result<NggInfo, LowerError> {
    config.validate_gs()?;
    if program.stage != Stage::Geometry {
        return Err(LowerError::UnsupportedStage(program.stage));
    }
    program.validate()?;

    let info = analyze(program, config);
    if !info.counted[0] {
        return Err(LowerError::MissingVertexCount { stream: 0 });
    }
    if info.dropped_emits > 0 {
        warn!(
            "dropping {} emits on streams outside {:#b}",
            info.dropped_emits, config.gs.active_streams
        );
    }

    let gs = &config.gs;
    let dynamic = !gs
        .streams()
        .all(|stream| info.counted[stream as usize] && info.static_count[stream as usize]);

    let mut attributes = Vec::new();
    let mut vertex_size = 0u32;
    for (&io, &ty) in &info.types {
        let offset = vertex_size.next_multiple_of(ty.bytes());
        vertex_size = offset + ty.bytes();
        let var = program.create_var("gs_output", ty);
        attributes.push(Attribute { io, ty, offset, var });
    }
    let stride = vertex_size.next_multiple_of(4);

    let candidates = gs.max_output_vertices();
    let max_num_waves = config.max_num_waves();
    let mut layout = SharedLayout::builder();
    if dynamic && max_num_waves > 1 {
        layout = layout.repack_scratch(max_num_waves);
    }
    layout = layout.vertex_attributes(candidates, stride);
    for stream in gs.streams() {
        layout = layout.prim_flags(stream, candidates);
    }
    if dynamic {
        layout = layout.compaction_index(candidates);
    }
    let layout = layout.build();

    debug!(
        "lowering gs: {} output components, stride {stride}, {} finale, layout {:?}",
        attributes.len(),
        if dynamic { "compacting" } else { "static" },
        layout.regions().collect::<Vec<_>>()
    );

    let shared_size = layout.size();
    let state = GsState {
        config,
        layout,
        attributes,
        stride,
    };

    let body = program.take_body();
    let mut b = Builder::new(program);

    // es outputs are handed over to the gs threads
    b.barrier();

    let gs_thread = b.has_input_primitive();
    b.push_if(gs_thread);
    state.rewrite_block(&mut b, body);
    b.pop_if();

    b.barrier();

    if dynamic {
        state.emit_dynamic_finale(&mut b);
    } else {
        state.emit_static_finale(&mut b);
    }

    b.finish();

    program.shared_size = shared_size;
    program.validate()?;

    Ok(NggInfo {
        shared_size,
        passthrough: false,
        can_cull: false,
        early_prim_export: false,
        compaction: dynamic,
    })
}

/// Shared memory type of an output component: 16-bit or narrower takes two bytes.
fn attribute_type(ty: Type) -> Type {
    match ty.bits() {
        0..=16 => Type::U16,
        17..=32 => Type::U32,
        _ => Type::U64,
    }
}

fn analyze(program: &Program, config: &NggConfig) -> OutputInfo {
    let gs = &config.gs;
    let mut info = OutputInfo {
        types: BTreeMap::new(),
        counted: [false; 4],
        static_count: [true; 4],
        dropped_emits: 0,
    };

    program.walk(|_, instr| {
        let Instr::Intrinsic(intrinsic) = instr else {
            return;
        };

        match intrinsic {
            Intrinsic::StoreOutput { io, value } if gs.is_stream_active(io.stream) => {
                let ty = attribute_type(program.type_of(value));
                let entry = info.types.entry(io).or_insert(ty);
                if ty.bits() > entry.bits() {
                    *entry = ty;
                }
            }
            Intrinsic::EmitVertex { stream, .. } if !gs.is_stream_active(stream) => info.dropped_emits += 1,
            Intrinsic::SetVertexAndPrimitiveCount {
                stream, vertex_count, ..
            } if gs.is_stream_active(stream) => {
                let stream = stream as usize;
                let constant = program.instr(vertex_count).as_const();
                info.counted[stream] = true;
                info.static_count[stream] &= constant == Some(gs.max_vertices_out as u64);
            }
            _ => {}
        }
    });

    info
}

impl GsState<'_> {
    fn rewrite_block(&self, b: &mut Builder, block: Block) {
        for node in block {
            match node {
                Node::Instr(value) => self.rewrite_instr(b, value),
                Node::If { cond, then_, else_ } => {
                    b.push_if(cond);
                    self.rewrite_block(b, then_);
                    if !else_.is_empty() {
                        b.push_else();
                        self.rewrite_block(b, else_);
                    }
                    b.pop_if();
                }
                Node::Loop(body) => {
                    b.push_loop();
                    self.rewrite_block(b, body);
                    b.pop_loop();
                }
                Node::Break => b.jump_break(),
            }
        }
    }

    fn rewrite_instr(&self, b: &mut Builder, value: Value) {
        let Instr::Intrinsic(intrinsic) = b.program().instr(value) else {
            b.insert([Node::Instr(value)]);
            return;
        };

        let gs = &self.config.gs;
        match intrinsic {
            Intrinsic::StoreOutput { io, value } => {
                if let Some(attribute) = self.attributes.iter().find(|a| a.io == io) {
                    let value = b.convert(value, attribute.ty);
                    b.store_var(attribute.var, value);
                }
            }
            Intrinsic::EmitVertex {
                stream,
                vertex_count,
                vertices_in_primitive,
            } => {
                if gs.is_stream_active(stream) {
                    self.emit_vertex(b, stream, vertex_count, vertices_in_primitive);
                }
            }
            // primitive boundaries are already in the flags of each emitted vertex
            Intrinsic::EndPrimitive { .. } => {}
            Intrinsic::SetVertexAndPrimitiveCount {
                stream,
                vertex_count,
                primitive_count,
            } => {
                if gs.is_stream_active(stream) {
                    self.set_vertex_and_primitive_count(b, stream, vertex_count, primitive_count);
                }
            }
            _ => b.insert([Node::Instr(value)]),
        }
    }

    fn stream_attributes(&self, stream: u8) -> impl Iterator<Item = &Attribute> + '_ {
        self.attributes.iter().filter(move |a| a.io.stream == stream)
    }

    fn prim_flags(&self, stream: u8) -> Region {
        match self.layout.prim_flags[stream as usize] {
            Some(region) => region,
            None => unreachable!("stream {stream} has no flags"),
        }
    }

    /// Staging slot of the lane's `index`-th vertex.
    fn emit_vertex_slot(&self, b: &mut Builder, index: Value) -> Value {
        let lane = b.local_invocation_index();
        let base = b.imul_imm(lane, self.config.gs.max_vertices_out as u64);
        b.iadd(base, index)
    }

    fn emit_primitive_flags(&self, b: &mut Builder, vertices_in_primitive: Value) -> Value {
        let topology = self.config.topology;

        let completes = b.uge_imm(vertices_in_primitive, (topology.vertex_count() - 1) as u64);
        let completes = b.convert(completes, Type::U32);
        let live = b.imm32(PrimitiveFlags::LIVE as u32);
        let mut flags = b.ior(live, completes);

        if topology.vertex_count() == 3 {
            let odd = b.iand_imm(vertices_in_primitive, 1);
            let odd = b.ishl_imm(odd, 1);
            flags = b.ior(flags, odd);
        }

        b.convert(flags, Type::U8)
    }

    fn emit_vertex(&self, b: &mut Builder, stream: u8, vertex_count: Value, vertices_in_primitive: Value) {
        let in_range = b.ult_imm(vertex_count, self.config.gs.max_vertices_out as u64);
        b.push_if(in_range);
        {
            let slot = self.emit_vertex_slot(b, vertex_count);

            if let Some(region) = self.layout.vertex_attributes {
                for attribute in self.stream_attributes(stream) {
                    let value = b.load_var(attribute.var);
                    region.store(b, value, slot, self.stride, attribute.offset);
                }
            }

            let flags = self.emit_primitive_flags(b, vertices_in_primitive);
            self.prim_flags(stream).store(b, flags, slot, 1, 0);
        }
        b.pop_if();

        for attribute in self.stream_attributes(stream) {
            let undef = b.undef(attribute.ty);
            b.store_var(attribute.var, undef);
        }
    }

    fn set_vertex_and_primitive_count(&self, b: &mut Builder, stream: u8, vertex_count: Value, primitive_count: Value) {
        let max_vertices_out = self.config.gs.max_vertices_out as u64;
        if b.program().instr(vertex_count).as_const() != Some(max_vertices_out) {
            self.emit_clear_flags(b, stream, vertex_count);
        }

        self.emit_query(b, stream, primitive_count);
    }

    /// Clears the flags of the slots `first..max_vertices_out` of the lane, so that flags left
    /// behind by an earlier workgroup never look live.
    fn emit_clear_flags(&self, b: &mut Builder, stream: u8, first: Value) {
        let region = self.prim_flags(stream);
        let index = b.create_var("clear_index", Type::U32);
        b.store_var(index, first);

        b.push_loop();
        {
            let i = b.load_var(index);
            let done = b.uge_imm(i, self.config.gs.max_vertices_out as u64);
            b.push_if(done);
            b.jump_break();
            b.pop_if();

            let slot = self.emit_vertex_slot(b, i);
            let zero = b.imm(Type::U8, 0);
            region.store(b, zero, slot, 1, 0);

            let next = b.iadd_imm(i, 1);
            b.store_var(index, next);
        }
        b.pop_loop();
    }

    /// Adds the primitives generated by the wave to the query counter of `stream`.
    fn emit_query(&self, b: &mut Builder, stream: u8, primitive_count: Value) {
        let subgroup = self.config.wave;

        let enabled = b.intrinsic(Intrinsic::ShaderQueryEnabled);
        b.push_if(enabled);
        {
            let count = match b.program().instr(primitive_count).as_const() {
                Some(count) => {
                    let active = b.imm_bool(true);
                    let ballot = subgroup.ballot(b, active);
                    let lanes = subgroup.popcount(b, ballot);
                    b.imul_imm(lanes, count)
                }
                None => subgroup.reduce_add(b, primitive_count),
            };

            let elected = subgroup.elect(b);
            b.push_if(elected);
            b.intrinsic(Intrinsic::QueryAtomicAdd { stream, value: count });
            b.pop_if();
        }
        b.pop_if();
    }

    /// Exports the primitive completed by the vertex at `rank`, or a null primitive.
    fn emit_primitive_export(&self, b: &mut Builder, rank: Value, flags: Value) {
        let flags32 = b.convert(flags, Type::U32);
        let completes = b.iand_imm(flags32, PrimitiveFlags::COMPLETES_PRIMITIVE as u64);
        let is_null = b.ieq_imm(completes, 0);

        let zero = b.imm32(0);
        let indices = emit_strip_vertex_indices(b, self.config.topology, rank, flags, self.config.provoking_vertex)
            .into_iter()
            .map(|index| b.select(is_null, zero, index))
            .collect::<Vec<_>>();

        let arg = emit_pack_export_word(b, &indices, None, Some(is_null));
        b.export_primitive(arg);
    }

    /// Exports stream 0 of the staged vertex at `source`.
    fn emit_vertex_export(&self, b: &mut Builder, source: Value) {
        if let Some(region) = self.layout.vertex_attributes {
            for attribute in self.stream_attributes(0) {
                let value = region.load(b, source, self.stride, attribute.offset, attribute.ty);
                b.store_output(attribute.io, value);
            }
        }

        b.export_vertex();
    }

    /// Every invocation emitted `max_vertices_out` vertices: lane `i` exports slot `i`.
    fn emit_static_finale(&self, b: &mut Builder) {
        let num_prims = b.intrinsic(Intrinsic::WorkgroupNumInputPrimitives);
        let max_vertices = b.imul_imm(num_prims, self.config.gs.max_vertices_out as u64);
        emit_alloc(b, self.config, max_vertices, max_vertices);

        let lane = b.local_invocation_index();
        let exports = b.ult(lane, max_vertices);
        b.push_if(exports);
        {
            let flags = self.prim_flags(0).load(b, lane, 1, 0, Type::U8);
            self.emit_primitive_export(b, lane, flags);
            self.emit_vertex_export(b, lane);
        }
        b.pop_if();
    }

    fn emit_dynamic_finale(&self, b: &mut Builder) {
        let num_prims = b.intrinsic(Intrinsic::WorkgroupNumInputPrimitives);
        let candidates = b.imul_imm(num_prims, self.config.gs.max_vertices_out as u64);
        let lane = b.local_invocation_index();

        let flags_var = b.create_var("vertex_flags", Type::U8);
        let no_flags = b.imm(Type::U8, 0);
        b.store_var(flags_var, no_flags);

        let has_vertex = b.ult(lane, candidates);
        b.push_if(has_vertex);
        {
            let flags = self.prim_flags(0).load(b, lane, 1, 0, Type::U8);
            b.store_var(flags_var, flags);
        }
        b.pop_if();

        let flags = b.load_var(flags_var);
        let live = b.iand_imm(flags, PrimitiveFlags::LIVE as u64);
        let live = b.ine_imm(live, 0);

        let repack = emit_repack(b, &self.config.wave, live, self.layout.repack_scratch);

        // no vertices means no primitives either, or the hardware hangs
        let any_vertex = b.ine_imm(repack.total, 0);
        let zero = b.imm32(0);
        let primitives = b.select(any_vertex, candidates, zero);
        emit_alloc(b, self.config, repack.total, primitives);

        let compaction = match self.layout.compaction_index {
            Some(region) => region,
            None => unreachable!("compacting without a compaction index"),
        };

        // slot `rank` learns which staged vertex it exports
        b.push_if(live);
        {
            let source = b.convert(lane, Type::U8);
            compaction.store(b, source, repack.rank, 1, 0);
        }
        b.pop_if();

        b.barrier();

        let exports_primitive = b.ult(lane, primitives);
        b.push_if(exports_primitive);
        self.emit_primitive_export(b, repack.rank, flags);
        b.pop_if();

        let exports_vertex = b.ult(lane, repack.total);
        b.push_if(exports_vertex);
        {
            let source = compaction.load(b, lane, 1, 0, Type::U8);
            let source = b.convert(source, Type::U32);
            self.emit_vertex_export(b, source);
        }
        b.pop_if();
    }
}
