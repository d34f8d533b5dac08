//! In-memory stream machinery: the Stream State each agent response owns,
//! and the process-wide Registry that names, locates, and reaps them.

pub mod registry;
pub mod state;
