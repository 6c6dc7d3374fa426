//! Session id validation and generation.
//!
//! Session ids end up in crop and report file names, so caller-supplied
//! ids are checked before a session is created.

use declutter_types::error::DeclutterError;

/// Maximum allowed session id length in bytes. Upload and crop file
/// names add a capture stamp, an index, a class and an extension to the
/// id and must stay under the 255-byte file name limit.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Reject ids that are empty, too long, or unsafe inside a file name.
pub fn validate_session_id(id: &str) -> Result<(), DeclutterError> {
    let reject = |reason: String| Err(DeclutterError::InvalidSessionId { reason });

    if id.is_empty() {
        return reject("session ID must not be empty".into());
    }
    if id.len() > MAX_SESSION_ID_LEN {
        return reject(format!(
            "session ID too long ({} bytes, max {MAX_SESSION_ID_LEN})",
            id.len()
        ));
    }
    if id.contains("..") {
        return reject("session ID contains path traversal sequence '..'".into());
    }
    if id.contains('/') || id.contains('\\') {
        return reject("session ID contains directory separator".into());
    }
    if id.contains('\0') {
        return reject("session ID contains null byte".into());
    }
    if let Some(byte) = id.bytes().find(|b| *b <= 0x1F || *b == 0x7F) {
        return reject(format!("session ID contains control character 0x{byte:02X}"));
    }
    Ok(())
}

/// `session_<unix_ms>_<8 hex>`.
pub fn generate_session_id() -> String {
    let ms = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("session_{ms}_{}", &suffix[..8])
}
