//! Turning panic payloads from user handlers into loggable text.

use std::any::Any;

/// Extract a readable message from a caught panic payload.
///
/// `panic!` with a literal yields a `&'static str`, with a format string a
/// `String`; anything else is reported by type only.
///
/// ```
/// use streamlink::panic::panic_message;
///
/// assert_eq!(panic_message(&"boom"), "boom");
/// assert_eq!(panic_message(&String::from("bang")), "bang");
/// assert_eq!(panic_message(&5_u32), "<non-string panic payload>");
/// ```
#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&'static str>()
        .map(|s| (*s).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "<non-string panic payload>".to_owned())
}
