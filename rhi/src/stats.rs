/// Counters describing the work done by a context since it was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RhiStats {
    /// Buffer locks taken through either path.
    pub buffer_locks: u64,
    /// Locks served by mapping the driver buffer.
    pub direct_map_locks: u64,
    /// Locks served by CPU shadow memory.
    pub shadow_locks: u64,
    /// Shadow locks that reused the cached scratch allocation.
    pub scratch_reuses: u64,
    /// Backing stores replaced because a lock or update discarded the whole buffer.
    pub orphaned_buffers: u64,
    /// Individual upload calls issued for shadow flushes and updates.
    pub upload_chunks: u64,
    /// Ring buffer rotations.
    pub ring_rotations: u64,
    /// Ring buffers reallocated to a larger size.
    pub ring_reallocations: u64,
    /// Driver textures created, including restores.
    pub textures_created: u64,
    /// Textures evicted to CPU memory.
    pub texture_evictions: u64,
    /// Evicted textures brought back to the GPU.
    pub texture_restores: u64,
    /// Evictable textures demoted because the LRU list was full.
    pub lru_overflows: u64,
    /// Query results received.
    pub queries_resolved: u64,
    /// Fences observed as signaled.
    pub fences_signaled: u64,
    /// Driver handles released through the deferred release queue.
    pub deferred_releases: u64,
    /// Deferred commands executed on the context thread.
    pub commands_executed: u64,
}
