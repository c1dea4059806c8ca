/// Image payload handling
///
/// This module handles:
/// - Computing decoded sizes of base64 payloads
/// - Generating compressed previews
/// - Assembling immutable image assets

pub mod asset;

pub use asset::{calculate_size, AssetCodec};
