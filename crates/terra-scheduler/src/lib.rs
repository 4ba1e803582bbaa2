//! Camera-driven tile request pipeline.
//!
//! Demand flows `Scheduler -> SlotLimiter -> RateLimiter -> QuadAssembler ->
//! LayerAssembler -> TileLoader`, completions flow back the same way until a
//! finished quad lands in the scheduler's RAM cache and shows up in a
//! [`GpuDelta`]. All bookkeeping lives in [`Pipeline`], which has a single
//! owner; only loader fetches run concurrently (see [`service`]).

mod cache;
mod gpu_cache;
mod layer_assembler;
pub mod loader;
mod lru;
mod pipeline;
mod quad_assembler;
mod rate_limiter;
mod scheduler;
pub mod service;
mod slot_limiter;

pub use cache::{CacheError, RamCache};
pub use gpu_cache::{GpuCache, GpuDelta};
pub use layer_assembler::{FetchRequest, LayerAssembler, LayerLoad};
pub use loader::{RetryingLoader, StoreBackedLoader, TileLoader};
pub use pipeline::{Effects, Pipeline, PipelineStats};
pub use quad_assembler::{QuadAssembler, QuadLoad};
pub use rate_limiter::RateLimiter;
pub use scheduler::{Demand, Scheduler};
pub use service::{spawn, SchedulerHandle};
pub use slot_limiter::{SlotLimiter, Stage};
