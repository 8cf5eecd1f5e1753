use super::{NggInfo, emit_alloc};
use super::pack::emit_pack_export_word;
use crate::config::NggConfig;
use crate::error::LowerError;
use crate::ir::{Builder, Intrinsic, IoSlot, Program, Stage, Type, Value, Var, varying};
use crate::layout::{Region, SharedLayout};
use log::debug;

const PRIMITIVE_ID_OUTPUT: IoSlot = IoSlot {
    slot: varying::PRIMITIVE_ID,
    component: 0,
    stream: 0,
};

struct NoGsState<'c> {
    config: &'c NggConfig,
    passthrough: bool,
    /// Set when a vertex shader relays the primitive ID through shared memory.
    prim_id_relay: Option<Region>,
    prim_exp_arg: Option<Var>,
}

/// Lowers a vertex or tessellation evaluation program.
///
/// The result allocates the output space on the first lane of wave 0, exports one primitive
/// per lane with an input primitive and one vertex per lane with an input vertex. The body
/// only runs on lanes with an input vertex.
pub fn lower_ngg_nogs(program: &mut Program, config: &NggConfig) -> Result<NggInfo, LowerError> {
    config.validate()?;
    if !matches!(program.stage, Stage::Vertex | Stage::TessEval) {
        return Err(LowerError::UnsupportedStage(program.stage));
    }
    program.validate()?;

    if config.consider_culling {
        return Err(LowerError::Unimplemented("culling"));
    }
    let can_cull = false;

    let is_vs = program.stage == Stage::Vertex;
    let needs_prim_id_relay = is_vs && config.export_prim_id;
    let passthrough = config.consider_passthrough && !can_cull && !needs_prim_id_relay;
    let early_prim_export = program.is_straight_line();

    let layout = match needs_prim_id_relay {
        true => SharedLayout::builder().prim_id_relay(config.max_es_vertices).build(),
        false => SharedLayout::default(),
    };

    debug!(
        "lowering {:?} without gs: passthrough {passthrough}, early export {early_prim_export}, layout {:?}",
        program.stage,
        layout.regions().collect::<Vec<_>>()
    );

    let mut state = NoGsState {
        config,
        passthrough,
        prim_id_relay: layout.prim_id_relay,
        prim_exp_arg: None,
    };

    let body = program.take_body();
    let mut b = Builder::new(program);

    // output space comes straight from the hardware provided workgroup totals
    let vertices = b.intrinsic(Intrinsic::WorkgroupNumInputVertices);
    let primitives = b.intrinsic(Intrinsic::WorkgroupNumInputPrimitives);
    emit_alloc(&mut b, config, vertices, primitives);

    if early_prim_export {
        state.emit_prim_export(&mut b);
        if needs_prim_id_relay {
            b.barrier();
        }

        let es_thread = b.has_input_vertex();
        b.push_if(es_thread);
        b.insert(body);
        state.emit_vertex_export(&mut b);
        b.pop_if();
    } else {
        let var = b.create_var("prim_exp_arg", Type::U32);
        state.prim_exp_arg = Some(var);

        let gs_thread = b.has_input_primitive();
        b.push_if(gs_thread);
        {
            let arg = state.emit_prim_exp_arg(&mut b);
            b.store_var(var, arg);
        }
        b.pop_if();

        let es_thread = b.has_input_vertex();
        b.push_if(es_thread);
        b.insert(body);
        b.pop_if();

        // join point of the whole body
        state.emit_prim_export(&mut b);
        if needs_prim_id_relay {
            b.barrier();
        }

        let es_thread = b.has_input_vertex();
        b.push_if(es_thread);
        state.emit_vertex_export(&mut b);
        b.pop_if();
    }

    b.finish();

    program.shared_size = layout.size();
    program.validate()?;

    Ok(NggInfo {
        shared_size: layout.size(),
        passthrough,
        can_cull,
        early_prim_export,
        compaction: false,
    })
}

/// Workgroup-relative index of vertex `vertex` of the lane's input primitive.
fn emit_input_primitive_vertex_index(b: &mut Builder, vertex: u32) -> Value {
    let pair = b.intrinsic(Intrinsic::GsVertexOffset {
        base: (vertex / 2 * 2) as u8,
    });
    b.ubfe(pair, ((vertex % 2) * 16) as u8, 16)
}

impl NoGsState<'_> {
    fn emit_prim_exp_arg(&self, b: &mut Builder) -> Value {
        if self.passthrough {
            return b.intrinsic(Intrinsic::PackedPassthroughPrimitive);
        }

        let count = self.config.topology.vertex_count();
        let indices = (0..count)
            .map(|i| emit_input_primitive_vertex_index(b, i))
            .collect::<Vec<_>>();

        if self.is_vs(b) {
            let edge_flags = (0..count)
                .map(|i| b.intrinsic(Intrinsic::InitialEdgeFlag { vertex: i as u8 }))
                .collect::<Vec<_>>();
            emit_pack_export_word(b, &indices, Some(&edge_flags), None)
        } else {
            emit_pack_export_word(b, &indices, None, None)
        }
    }

    fn is_vs(&self, b: &Builder) -> bool {
        b.program().stage == Stage::Vertex
    }

    /// Exports the primitive of every lane with an input primitive, in uniform control flow.
    fn emit_prim_export(&self, b: &mut Builder) {
        let gs_thread = b.has_input_primitive();
        b.push_if(gs_thread);
        {
            let arg = match self.prim_exp_arg {
                Some(var) => b.load_var(var),
                None => self.emit_prim_exp_arg(b),
            };

            if let Some(relay) = self.prim_id_relay {
                // the provoking vertex's lane picks the id up after the barrier
                let provoking = emit_input_primitive_vertex_index(b, self.config.provoking_vertex_index());
                let prim_id = b.intrinsic(Intrinsic::PrimitiveId);
                relay.store(b, prim_id, provoking, 4, 0);
            }

            b.export_primitive(arg);
        }
        b.pop_if();
    }

    /// Runs on lanes with an input vertex, after the body.
    fn emit_vertex_export(&self, b: &mut Builder) {
        if self.config.export_prim_id {
            let prim_id = match self.prim_id_relay {
                Some(relay) => {
                    let lane = b.local_invocation_index();
                    relay.load(b, lane, 4, 0, Type::U32)
                }
                // tessellation evaluation lanes know their own patch
                None => b.intrinsic(Intrinsic::PrimitiveId),
            };
            b.store_output(PRIMITIVE_ID_OUTPUT, prim_id);
        }

        b.export_vertex();
    }
}
