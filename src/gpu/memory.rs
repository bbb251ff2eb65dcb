use super::{GpuError, GpuResult};
use ash::vk;

/// Memory for the cube geometry, written once from the host.
pub const GEOMETRY_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// Memory for depth attachments.
pub const DEPTH_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;

/// Picks the first memory type, in index order, allowed by
/// `requirements.memory_type_bits` whose flags contain all of `required`.
///
/// The first acceptable index wins even when a later one is a closer fit.
pub fn find_memory_type(
    requirements: &vk::MemoryRequirements,
    properties: &vk::PhysicalDeviceMemoryProperties,
    required: vk::MemoryPropertyFlags,
) -> GpuResult<u32> {
    let count = (properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(index, memory_type)| {
            requirements.memory_type_bits & (1 << index) != 0
                && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
        .ok_or(GpuError::NoCompatibleMemoryType {
            type_bits: requirements.memory_type_bits,
            required,
        })
}

/// Builds a memory property table from per-type flags, all on heap 0.
pub fn memory_properties_from(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
    let mut properties = vk::PhysicalDeviceMemoryProperties {
        memory_type_count: types.len().min(vk::MAX_MEMORY_TYPES) as u32,
        memory_heap_count: 1,
        ..Default::default()
    };
    for (slot, flags) in properties.memory_types.iter_mut().zip(types) {
        *slot = vk::MemoryType {
            property_flags: *flags,
            heap_index: 0,
        };
    }
    properties.memory_heaps[0] = vk::MemoryHeap {
        size: 256 * 1024 * 1024,
        flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
    };
    properties
}

#[cfg(test)]
mod tests {
    use super::*;

    fn requirements(bits: u32) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 1024,
            alignment: 16,
            memory_type_bits: bits,
        }
    }

    fn mixed_table() -> vk::PhysicalDeviceMemoryProperties {
        memory_properties_from(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            GEOMETRY_MEMORY | vk::MemoryPropertyFlags::HOST_CACHED,
        ])
    }

    #[test]
    fn skips_allowed_type_missing_required_flags() {
        // Types 1 and 3 are allowed; only 3 is host visible and coherent.
        let index = find_memory_type(&requirements(0b1010), &mixed_table(), GEOMETRY_MEMORY)
            .expect("type 3 satisfies the filter");
        assert_eq!(index, 3);
    }

    #[test]
    fn first_match_wins_over_later_matches() {
        let index = find_memory_type(&requirements(0b0011), &mixed_table(), DEPTH_MEMORY)
            .expect("device local memory exists");
        assert_eq!(index, 0);
    }

    #[test]
    fn reports_no_compatible_type() {
        let err = find_memory_type(&requirements(0b0011), &mixed_table(), GEOMETRY_MEMORY)
            .unwrap_err();
        assert!(matches!(
            err,
            GpuError::NoCompatibleMemoryType { type_bits: 0b0011, .. }
        ));
    }

    #[test]
    fn ignores_bits_past_the_type_count() {
        let table = memory_properties_from(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type(&requirements(0b10), &table, DEPTH_MEMORY).unwrap_err();
        assert!(matches!(err, GpuError::NoCompatibleMemoryType { .. }));
    }
}
