//! Queue family selection and per-family queue state.

use crate::command::CommandPool;
use crate::error::{GpuError, Result};
use ash::vk;

/// Role a queue plays in the frame pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueRole {
    Graphics,
    Present,
    Transfer,
}

/// Queue families chosen for each role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilySelection {
    /// Family used for rendering and one-shot uploads.
    pub graphics: u32,
    /// Family used for presentation. `None` for headless contexts.
    pub present: Option<u32>,
    /// Family used for transfers. Same as `graphics` without a dedicated one.
    pub transfer: u32,
}

impl QueueFamilySelection {
    /// Family index serving `role`. Present falls back to graphics when headless.
    pub fn family(&self, role: QueueRole) -> u32 {
        match role {
            QueueRole::Graphics => self.graphics,
            QueueRole::Present => self.present.unwrap_or(self.graphics),
            QueueRole::Transfer => self.transfer,
        }
    }

    /// Distinct family indices, in first-seen order.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(3);
        for family in [Some(self.graphics), self.present, Some(self.transfer)]
            .into_iter()
            .flatten()
        {
            if !families.contains(&family) {
                families.push(family);
            }
        }
        families
    }

    /// Whether graphics and present run on different families.
    pub fn split_present(&self) -> bool {
        self.present.is_some_and(|p| p != self.graphics)
    }
}

/// Pick queue families from the reported family properties.
///
/// `supports_present` is asked per family index. When `require_present` is
/// false the present query is skipped entirely and no present family is chosen.
pub fn select_queue_families(
    families: &[vk::QueueFamilyProperties],
    supports_present: impl Fn(u32) -> bool,
    require_present: bool,
) -> Result<QueueFamilySelection> {
    let present_flags: Vec<bool> = (0..families.len() as u32)
        .map(|i| require_present && supports_present(i))
        .collect();

    let is_graphics = |i: usize| {
        families[i].queue_count > 0 && families[i].queue_flags.contains(vk::QueueFlags::GRAPHICS)
    };

    let graphics = (0..families.len())
        .find(|&i| is_graphics(i) && present_flags[i])
        .or_else(|| (0..families.len()).find(|&i| is_graphics(i)))
        .ok_or(GpuError::NoSuitableDevice)? as u32;

    let present = if require_present {
        let index = if present_flags[graphics as usize] {
            graphics
        } else {
            present_flags
                .iter()
                .position(|&p| p)
                .ok_or(GpuError::NoSuitableDevice)? as u32
        };
        Some(index)
    } else {
        None
    };

    let transfer = families
        .iter()
        .position(|f| {
            f.queue_count > 0
                && f.queue_flags.contains(vk::QueueFlags::TRANSFER)
                && !f
                    .queue_flags
                    .intersects(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE)
        })
        .map_or(graphics, |i| i as u32);

    Ok(QueueFamilySelection {
        graphics,
        present,
        transfer,
    })
}

/// A device queue together with the command pool that feeds it.
pub struct QueueInfo {
    /// Queue family index.
    pub family_index: u32,
    /// Capability bits reported for the family.
    pub capabilities: vk::QueueFlags,
    /// Whether the family can present to the context surface.
    pub present_supported: bool,
    /// Queue handle (index 0 of the family).
    pub queue: vk::Queue,
    /// Pool for command buffers submitted to this queue.
    pub command_pool: CommandPool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn single_universal_family() {
        let families = [family(
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        )];
        let selection = select_queue_families(&families, |_| true, true).unwrap();
        assert_eq!(selection.graphics, 0);
        assert_eq!(selection.present, Some(0));
        assert_eq!(selection.transfer, 0);
        assert_eq!(selection.unique_families(), vec![0]);
        assert!(!selection.split_present());
    }

    #[test]
    fn prefers_graphics_family_that_presents() {
        let families = [
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
        ];
        let selection = select_queue_families(&families, |i| i == 1, true).unwrap();
        assert_eq!(selection.graphics, 1);
        assert_eq!(selection.present, Some(1));
    }

    #[test]
    fn separate_present_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];
        let selection = select_queue_families(&families, |i| i == 1, true).unwrap();
        assert_eq!(selection.graphics, 0);
        assert_eq!(selection.present, Some(1));
        assert!(selection.split_present());
        assert_eq!(selection.unique_families(), vec![0, 1]);
    }

    #[test]
    fn dedicated_transfer_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ];
        let selection = select_queue_families(&families, |_| false, false).unwrap();
        assert_eq!(selection.transfer, 2);
        assert_eq!(selection.present, None);
        assert_eq!(selection.family(QueueRole::Present), 0);
        assert_eq!(selection.unique_families(), vec![0, 2]);
    }

    #[test]
    fn missing_graphics_or_present_is_unsuitable() {
        let compute_only = [family(vk::QueueFlags::COMPUTE)];
        assert!(matches!(
            select_queue_families(&compute_only, |_| true, true),
            Err(GpuError::NoSuitableDevice)
        ));

        let graphics = [family(vk::QueueFlags::GRAPHICS)];
        assert!(matches!(
            select_queue_families(&graphics, |_| false, true),
            Err(GpuError::NoSuitableDevice)
        ));
        assert!(select_queue_families(&graphics, |_| false, false).is_ok());
    }

    #[test]
    fn empty_families_are_skipped() {
        let mut empty = family(vk::QueueFlags::GRAPHICS);
        empty.queue_count = 0;
        let families = [empty, family(vk::QueueFlags::GRAPHICS)];
        let selection = select_queue_families(&families, |_| true, true).unwrap();
        assert_eq!(selection.graphics, 1);
    }
}
