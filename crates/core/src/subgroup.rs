use crate::ir::{Builder, Intrinsic, Type, Value};

/// Cross-lane operations a backend provides to the lowering.
pub trait Subgroup {
    fn size(&self) -> u32;

    /// Bitmask of the active lanes for which `value` is true.
    fn ballot(&self, b: &mut Builder, value: Value) -> Value;

    fn popcount(&self, b: &mut Builder, mask: Value) -> Value {
        b.bit_count(mask)
    }

    /// Number of set bits in `mask` below the current lane.
    fn exclusive_rank(&self, b: &mut Builder, mask: Value) -> Value {
        b.intrinsic(Intrinsic::MaskedBitCount(mask))
    }

    fn read_lane(&self, b: &mut Builder, value: Value, lane: Value) -> Value {
        b.intrinsic(Intrinsic::ReadLane { value, lane })
    }

    fn read_first_lane(&self, b: &mut Builder, value: Value) -> Value {
        b.intrinsic(Intrinsic::ReadFirstLane(value))
    }

    /// True on exactly one active lane: the first one.
    fn elect(&self, b: &mut Builder) -> Value {
        b.intrinsic(Intrinsic::Elect)
    }

    fn reduce_add(&self, b: &mut Builder, value: Value) -> Value {
        b.intrinsic(Intrinsic::ReduceAdd(value))
    }
}

#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub enum WaveTarget {
    Wave32,
    #[default]
    Wave64,
}

impl WaveTarget {
    pub fn size(self) -> u32 {
        match self {
            WaveTarget::Wave32 => 32,
            WaveTarget::Wave64 => 64,
        }
    }

    pub fn ballot_type(self) -> Type {
        match self {
            WaveTarget::Wave32 => Type::U32,
            WaveTarget::Wave64 => Type::U64,
        }
    }
}

impl Subgroup for WaveTarget {
    fn size(&self) -> u32 {
        WaveTarget::size(*self)
    }

    fn ballot(&self, b: &mut Builder, value: Value) -> Value {
        b.intrinsic(Intrinsic::Ballot {
            value,
            ty: self.ballot_type(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Program, Stage};

    #[test]
    fn ballot_width_follows_target() {
        let mut program = Program::new(Stage::Vertex);
        let mut b = Builder::new(&mut program);
        let t = b.imm_bool(true);
        let narrow = WaveTarget::Wave32.ballot(&mut b, t);
        let wide = WaveTarget::Wave64.ballot(&mut b, t);
        let count = WaveTarget::Wave32.popcount(&mut b, narrow);
        assert_eq!(b.type_of(narrow), Type::U32);
        assert_eq!(b.type_of(wide), Type::U64);
        assert_eq!(b.type_of(count), Type::U32);
        b.finish();

        assert_eq!(program.validate(), Ok(()));
    }
}
