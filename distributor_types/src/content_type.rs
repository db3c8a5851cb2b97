use crate::DEFAULT_CONTENT_TYPE;

/// Number of leading payload bytes looked at to detect a content type
pub const CONTENT_SNIFF_LEN: usize = 4100;

/// Detect the content type of a payload from its first bytes, see [`CONTENT_SNIFF_LEN`]
pub fn sniff_content_type(head: &[u8]) -> Option<&'static str> {
    let head = &head[..head.len().min(CONTENT_SNIFF_LEN)];
    infer::get(head).map(|kind| kind.mime_type())
}

/// The content type to report for a payload.
///
/// A specific type declared by the origin wins. Otherwise the type is detected from the first
/// bytes of the payload, falling back to [`DEFAULT_CONTENT_TYPE`].
pub fn resolve_content_type(declared: Option<&str>, head: &[u8]) -> String {
    match declared.map(str::trim) {
        Some(declared) if !declared.is_empty() && declared != DEFAULT_CONTENT_TYPE => {
            declared.to_string()
        }
        _ => sniff_content_type(head)
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string(),
    }
}
