//! Device memory: regions, blocks, per-type collections and the allocator.
//!
//! ```text
//! MemoryAllocator
//!   └─ MemoryBlockCollection (one per memory type)
//!        └─ MemoryBlock (one native allocation, free list inside)
//!             └─ MemoryRegion<MemoryBlock> ─► GraphicsResource
//!                                                └─ MemoryRegion<GraphicsResource>
//! ```

pub mod allocator;
pub mod block;
pub mod collection;
pub mod free_list;
pub mod region;

pub use allocator::MemoryAllocator;
pub use block::MemoryBlock;
pub use collection::MemoryBlockCollection;
pub use free_list::FreeList;
pub use region::{MemoryRegion, RegionCollection};
