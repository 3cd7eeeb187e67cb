//! Dataset metadata grounding.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MetadataGrounder                           │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │  read_metadata()           │  per visible STRING field:   │  │
//! │  │  data_dictionary() (opt.)  │  one-field probe query,      │  │
//! │  │  strip internal ids        │  ≤4 distinct sample values   │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────┘
//!                           │
//!                           ▼
//!              Arc<DatasetMetadata> (cached with TTL)
//! ```

mod grounder;
mod types;

pub use grounder::{GroundingError, GroundingResult, MetadataGrounder};
pub use types::*;
