//! Allocator and device configuration.

use crate::gpu::types::TexelFormat;
use crate::util::size::mb;

/// How large new memory blocks are.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockSizePolicy {
    /// Every block has the same size.
    Fixed(u64),
    /// The first block is `initial` bytes; each further block doubles the
    /// previous one until `max`.
    Doubling {
        /// Size of the first block.
        initial: u64,
        /// Upper bound for grown blocks.
        max: u64,
    },
}

impl BlockSizePolicy {
    /// Preferred size of the next block when `existing` blocks are live.
    pub fn block_size(&self, existing: usize) -> u64 {
        match *self {
            Self::Fixed(size) => size,
            Self::Doubling { initial, max } => {
                let shift = existing.min(63) as u32;
                initial.saturating_mul(1u64 << shift).min(max.max(initial))
            }
        }
    }
}

/// Configuration for the memory allocator.
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    /// Size of new blocks. Requests larger than the policy size get a block
    /// of their own, rounded up to their alignment.
    pub block_size_policy: BlockSizePolicy,

    /// Empty blocks kept alive per memory type even when
    /// `release_empty_blocks` is set.
    pub minimum_block_count: usize,

    /// Most blocks a single memory type may own (default: 64).
    pub maximum_blocks_per_collection: usize,

    /// Return empty blocks to the device when regions are freed.
    pub release_empty_blocks: bool,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            block_size_policy: BlockSizePolicy::Doubling {
                initial: mb(16),
                max: mb(256),
            },
            minimum_block_count: 0,
            maximum_blocks_per_collection: 64,
            release_empty_blocks: true,
        }
    }
}

impl AllocatorConfig {
    /// Small fixed blocks, for tests and constrained environments.
    pub fn minimal() -> Self {
        Self {
            block_size_policy: BlockSizePolicy::Fixed(mb(1)),
            minimum_block_count: 0,
            maximum_blocks_per_collection: 16,
            release_empty_blocks: true,
        }
    }

    /// Large blocks that are never released.
    pub fn high_performance() -> Self {
        Self {
            block_size_policy: BlockSizePolicy::Doubling {
                initial: mb(64),
                max: mb(512),
            },
            minimum_block_count: 1,
            maximum_blocks_per_collection: 256,
            release_empty_blocks: false,
        }
    }

    /// Builder pattern: set the block size policy.
    pub fn with_block_size_policy(mut self, policy: BlockSizePolicy) -> Self {
        self.block_size_policy = policy;
        self
    }

    /// Builder pattern: use fixed-size blocks.
    pub fn with_fixed_block_size(self, size: u64) -> Self {
        self.with_block_size_policy(BlockSizePolicy::Fixed(size))
    }

    /// Builder pattern: set the minimum block count.
    pub fn with_minimum_block_count(mut self, count: usize) -> Self {
        self.minimum_block_count = count;
        self
    }

    /// Builder pattern: set the block limit per memory type.
    pub fn with_maximum_blocks(mut self, count: usize) -> Self {
        self.maximum_blocks_per_collection = count;
        self
    }

    /// Builder pattern: release empty blocks.
    pub fn with_release_empty_blocks(mut self, release: bool) -> Self {
        self.release_empty_blocks = release;
        self
    }
}

/// Parameters for creating a [`GraphicsDevice`](crate::GraphicsDevice).
#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    /// Number of render contexts (swapchain slots). With a surface it must
    /// lie within the surface's supported image count range.
    pub context_count: u32,

    /// Preferred swapchain format. Falls back to the first supported one.
    pub render_target_format: TexelFormat,

    /// Allocator configuration.
    pub allocator: AllocatorConfig,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            context_count: 2,
            render_target_format: TexelFormat::B8G8R8A8Unorm,
            allocator: AllocatorConfig::default(),
        }
    }
}

impl DeviceDescriptor {
    /// Builder pattern: set the context count.
    pub fn with_context_count(mut self, count: u32) -> Self {
        self.context_count = count;
        self
    }

    /// Builder pattern: set the preferred render-target format.
    pub fn with_render_target_format(mut self, format: TexelFormat) -> Self {
        self.render_target_format = format;
        self
    }

    /// Builder pattern: set the allocator configuration.
    pub fn with_allocator(mut self, allocator: AllocatorConfig) -> Self {
        self.allocator = allocator;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::size::kb;

    #[test]
    fn test_doubling_policy() {
        let policy = BlockSizePolicy::Doubling {
            initial: kb(64),
            max: kb(256),
        };
        assert_eq!(policy.block_size(0), kb(64));
        assert_eq!(policy.block_size(1), kb(128));
        assert_eq!(policy.block_size(2), kb(256));
        assert_eq!(policy.block_size(10), kb(256));
        assert_eq!(policy.block_size(200), kb(256));
    }

    #[test]
    fn test_fixed_policy() {
        assert_eq!(BlockSizePolicy::Fixed(kb(4)).block_size(7), kb(4));
    }

    #[test]
    fn test_builders() {
        let config = AllocatorConfig::minimal()
            .with_fixed_block_size(kb(8))
            .with_maximum_blocks(2)
            .with_release_empty_blocks(false);
        assert_eq!(config.block_size_policy, BlockSizePolicy::Fixed(kb(8)));
        assert_eq!(config.maximum_blocks_per_collection, 2);
        assert!(!config.release_empty_blocks);
    }
}
