pub mod channel;
pub mod direct;
pub mod dispatcher;
pub mod presence;
pub mod rooms;
pub mod session;
pub mod throttle;

/// First ~200 bytes of a raw payload for logging. The cut is walked back
/// to a char boundary so multibyte text never panics the slice.
pub(crate) fn payload_preview(text: &str) -> &str {
    let mut end = text.len().min(200);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::payload_preview;

    #[test]
    fn payload_preview_respects_char_boundaries() {
        // 201 bytes; the é straddles the 200-byte cut.
        let text = format!("{}é", "a".repeat(199));
        let preview = payload_preview(&text);
        assert_eq!(preview.len(), 199);
        assert!(preview.chars().all(|c| c == 'a'));
    }

    #[test]
    fn payload_preview_leaves_short_text_alone() {
        assert_eq!(payload_preview("hi"), "hi");
        assert_eq!(payload_preview(""), "");
    }
}
