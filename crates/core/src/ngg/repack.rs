use crate::ir::{Builder, Type, Value};
use crate::layout::Region;
use crate::subgroup::Subgroup;

/// Result of [`emit_repack`]: the number of surviving lanes in the whole workgroup and each
/// lane's dense index among them.
#[derive(Clone, Copy, Debug)]
pub struct Repack {
    pub total: Value,
    pub rank: Value,
}

/// Emits workgroup-wide stream compaction of the lanes where `survive` is true.
///
/// Must be emitted in uniform control flow. A workgroup of one wave passes no `scratch` and
/// never touches shared memory. Otherwise each wave publishes its survivor count in `scratch`
/// (one byte per wave, see [`SharedLayoutBuilder::repack_scratch`]) and a single barrier
/// separates the writes from the reads; afterwards every lane sums the counts of the waves
/// before its own without any loop. Ranks are ordered by wave id, then lane id.
///
/// [`SharedLayoutBuilder::repack_scratch`]: crate::layout::SharedLayoutBuilder::repack_scratch
pub fn emit_repack(b: &mut Builder, subgroup: &impl Subgroup, survive: Value, scratch: Option<Region>) -> Repack {
    let ballot = subgroup.ballot(b, survive);
    let wave_count = subgroup.popcount(b, ballot);
    let wave_rank = subgroup.exclusive_rank(b, ballot);

    let Some(scratch) = scratch else {
        return Repack {
            total: wave_count,
            rank: wave_rank,
        };
    };

    // one count byte per wave
    let elected = subgroup.elect(b);
    b.push_if(elected);
    {
        let count = b.convert(wave_count, Type::U8);
        let wave_id = b.subgroup_id();
        scratch.store(b, count, wave_id, 1, 0);
    }
    b.pop_if();

    b.barrier();

    let zero = b.imm32(0);
    let table_type = if scratch.size == 8 { Type::U64 } else { Type::U32 };
    let packed = scratch.load(b, zero, scratch.size, 0, table_type);
    let packed = b.convert(packed, Type::U64);

    let wave_id = b.subgroup_id();
    let num_waves = b.num_subgroups();
    let base = sum_first_bytes(b, packed, wave_id);
    let total = sum_first_bytes(b, packed, num_waves);

    let base = subgroup.read_first_lane(b, base);
    let total = subgroup.read_first_lane(b, total);
    let rank = b.iadd(base, wave_rank);

    Repack { total, rank }
}

/// Sum of the count bytes of waves `0..waves`.
fn sum_first_bytes(b: &mut Builder, packed: Value, waves: Value) -> Value {
    let bits = b.ishl_imm(waves, 3);
    let mask = b.bitfield_mask(bits);
    let masked = b.iand(packed, mask);
    b.byte_sum(masked)
}
