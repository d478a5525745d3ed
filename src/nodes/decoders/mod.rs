//! Link-layer decoder stages
//!
//! - **HDLC**: bit-level deframing with automatic polarity selection
//! - **Descrambler**: self-synchronizing ETR 192 descrambling

pub mod descrambler;
pub mod hdlc;
pub mod hdlc_sync;
pub mod types;

// Re-export common types
pub use types::{DecodeErrors, DeframerStats, HdlcSyncConfig, Polarity};

// Re-export decoders
pub use descrambler::{LfsrStage, SelfSyncLfsr};
pub use hdlc::{Decoded, HDLC_FLAG, HdlcDecoder, HdlcFramer, crc16};
pub use hdlc_sync::HdlcSync;
