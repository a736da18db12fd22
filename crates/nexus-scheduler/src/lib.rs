//! Fire-and-forget background task supervision shared by `UnifiedVectorStore`
//! (mirror fan-out) and `MemoryService` (graph ingest).

mod supervisor;

pub use supervisor::{BackgroundSupervisor, TaskCounters, DEFAULT_BACKGROUND_DEADLINE};
