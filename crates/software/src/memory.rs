use crate::SimError;
use log::trace;

#[derive(Clone, Copy, Default)]
struct ByteAccess {
    write_epoch: u64,
    writer_wave: u32,
    writer_lane: u32,
    read_epoch: u64,
    /// One bit per wave that read the byte in `read_epoch`.
    readers: u8,
}

/// Shared memory of a compute unit, with the access history needed to find races.
///
/// Accesses are grouped into epochs separated by barriers. Inside one epoch a byte written
/// by one wave must not be touched by another, and must not be written by two lanes.
pub struct SharedMemory {
    bytes: Vec<u8>,
    access: Vec<ByteAccess>,
    epoch: u64,
    fill: u8,
}

impl SharedMemory {
    pub fn new(fill: u8) -> Self {
        Self {
            bytes: Vec::new(),
            access: Vec::new(),
            epoch: 1,
            fill,
        }
    }

    /// Grows the memory to at least `size` bytes; existing contents stay as they are.
    pub fn reserve(&mut self, size: u32) {
        let size = size as usize;
        if self.bytes.len() < size {
            self.bytes.resize(size, self.fill);
            self.access.resize(size, ByteAccess::default());
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Starts a new epoch: everything before is visible to everyone after.
    pub fn sync(&mut self) {
        self.epoch += 1;
    }

    fn range(&self, lane: u32, addr: u64, len: u32, size: u32) -> Result<std::ops::Range<usize>, SimError> {
        let end = addr + len as u64;
        if end > size as u64 || end > self.bytes.len() as u64 {
            return Err(SimError::OutOfBounds { lane, addr, len, size });
        }

        Ok(addr as usize..end as usize)
    }

    /// Little-endian load of `len` bytes. `size` is the workgroup's share of the memory.
    pub fn load(&mut self, wave: u32, lane: u32, addr: u64, len: u32, size: u32) -> Result<u64, SimError> {
        let range = self.range(lane, addr, len, size)?;
        let mut value = 0u64;

        for (i, at) in range.enumerate() {
            let access = &mut self.access[at];
            if access.write_epoch == self.epoch && access.writer_wave != wave {
                return Err(SimError::Race {
                    addr: at as u32,
                    wave,
                    other: access.writer_wave,
                });
            }

            if access.read_epoch != self.epoch {
                access.read_epoch = self.epoch;
                access.readers = 0;
            }
            access.readers |= 1 << wave;

            value |= (self.bytes[at] as u64) << (8 * i);
        }

        trace!("lane {lane} load {addr:#x} = {value:#x}");
        Ok(value)
    }

    pub fn store(&mut self, wave: u32, lane: u32, addr: u64, len: u32, value: u64, size: u32) -> Result<(), SimError> {
        let range = self.range(lane, addr, len, size)?;
        trace!("lane {lane} store {addr:#x} = {value:#x}");

        for (i, at) in range.enumerate() {
            let access = &mut self.access[at];
            if access.write_epoch == self.epoch && access.writer_lane != lane {
                return Err(SimError::WriteConflict {
                    addr: at as u32,
                    lane,
                    other: access.writer_lane,
                });
            }

            if access.read_epoch == self.epoch && access.readers & !(1 << wave) != 0 {
                return Err(SimError::Race {
                    addr: at as u32,
                    wave,
                    other: access.readers.trailing_zeros(),
                });
            }

            access.write_epoch = self.epoch;
            access.writer_wave = wave;
            access.writer_lane = lane;
            self.bytes[at] = (value >> (8 * i)) as u8;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn little_endian() {
        let mut memory = SharedMemory::new(0);
        memory.reserve(8);
        memory.store(0, 0, 2, 4, 0x1122_3344, 8).unwrap();
        assert_eq!(memory.bytes(), &[0, 0, 0x44, 0x33, 0x22, 0x11, 0, 0]);
        assert_eq!(memory.load(0, 1, 3, 2, 8), Ok(0x2233));
    }

    #[test]
    fn cross_wave_read_needs_a_barrier() {
        let mut memory = SharedMemory::new(0);
        memory.reserve(4);
        memory.store(0, 0, 0, 1, 7, 4).unwrap();
        assert!(matches!(memory.load(1, 64, 0, 1, 4), Err(SimError::Race { .. })));

        memory.sync();
        assert_eq!(memory.load(1, 64, 0, 1, 4), Ok(7));
        // and the other way around
        assert!(matches!(memory.store(0, 0, 0, 1, 8, 4), Err(SimError::Race { .. })));
    }

    #[test]
    fn two_writers_conflict() {
        let mut memory = SharedMemory::new(0);
        memory.reserve(4);
        memory.store(0, 0, 1, 1, 1, 4).unwrap();
        memory.store(0, 0, 1, 1, 2, 4).unwrap();
        assert!(matches!(memory.store(0, 1, 1, 1, 3, 4), Err(SimError::WriteConflict { .. })));
    }

    #[test]
    fn bounds_follow_the_workgroup_size() {
        let mut memory = SharedMemory::new(0xaa);
        memory.reserve(16);
        assert_eq!(memory.bytes()[15], 0xaa);
        assert!(matches!(memory.load(0, 0, 6, 4, 8), Err(SimError::OutOfBounds { .. })));
        assert!(memory.load(0, 0, 4, 4, 8).is_ok());
    }
}
