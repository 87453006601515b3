//! Local retrieval-augmented generation: ingest documents into a vector
//! store and answer questions grounded on them with a locally hosted model.

pub mod core;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod sources;
pub mod state;

#[cfg(test)]
mod test_support;
