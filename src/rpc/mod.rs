//! JSON-RPC correlation core.
//!
//! # Data flow
//!
//! ```text
//! Bridge::dispatch ──register──> Correlator ──handle──> Bridge (await)
//!        │                           ▲
//!        └── write line ──> child    │ resolve(id)
//!                            stdout ──> JsonLinesCodec
//! ```

mod correlator;
mod error;
mod framer;
mod types;

pub use correlator::*;
pub use error::*;
pub use framer::*;
pub use types::*;
