use serde_json::error::Category;

use telemetry_runtime::{decode_snapshot_json, Snapshot};

use crate::error::DecodeError;

/// Parse one inbound frame into a [`Snapshot`].
///
/// Text that is not JSON at all is a [`DecodeError::MalformedPayload`];
/// JSON that lacks the required counts, or carries them with the wrong type,
/// is a [`DecodeError::SchemaMismatch`].
pub fn decode_snapshot(payload: &[u8]) -> Result<Snapshot, DecodeError> {
    decode_snapshot_json(payload).map_err(classify)
}

fn classify(err: serde_json::Error) -> DecodeError {
    let reason = err.to_string();
    match err.classify() {
        Category::Data => DecodeError::SchemaMismatch { reason },
        Category::Syntax | Category::Eof | Category::Io => DecodeError::MalformedPayload { reason },
    }
}
