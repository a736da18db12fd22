//! Vector provider implementations: in-memory (tests/dev), Pgvector
//! (primary, feature `pgvector`), Qdrant (mirror, feature `qdrant`).

mod memory_provider;

#[cfg(feature = "pgvector")]
mod pgvector_provider;

#[cfg(feature = "qdrant")]
mod qdrant_provider;

pub use memory_provider::InMemoryVectorProvider;
#[cfg(feature = "pgvector")]
pub use pgvector_provider::PgvectorProvider;
#[cfg(feature = "qdrant")]
pub use qdrant_provider::QdrantProvider;
