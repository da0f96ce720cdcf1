//! Event-string normalization for the supplicant's control protocol.
//!
//! Events arrive in one of two framings:
//!
//! ```text
//! IFNAME=iface <N>CTRL-EVENT-XXX
//!     or
//! <N>CTRL-EVENT-XXX
//! ```
//!
//! where `<N>` is the message verbosity level. The level is of no use to
//! callers, so [`normalize`] strips it while keeping the interface prefix.

use std::borrow::Cow;

use tracing::{debug, warn};

/// Prefix carried by per-interface events.
pub const IFNAME_PREFIX: &str = "IFNAME=";

/// Marker used by the synthetic events the wait loop fabricates when the
/// channel dies.
pub const EVENT_TERMINATING: &str = "CTRL-EVENT-TERMINATING";

/// Replacement for a per-interface event whose framing cannot be parsed.
/// The trailing space matches what the daemon itself emits.
pub const EVENT_IGNORE: &str = "CTRL-EVENT-IGNORE ";

/// Format one of the synthetic terminal events of the wait loop.
pub fn terminating_event(interface: &str, reason: &str) -> String {
    format!("{IFNAME_PREFIX}{interface} {EVENT_TERMINATING} - {reason}")
}

/// Normalize a raw event string, stripping the verbosity tag.
///
/// Returns the input unchanged (borrowed) when there is nothing to strip,
/// including when a tag opener has no matching `>` — a malformed tag is
/// passed through rather than scanned past the end of the message.
pub fn normalize(raw: &str) -> Cow<'_, str> {
    if let Some(rest) = raw.strip_prefix(IFNAME_PREFIX) {
        let Some(space) = rest.find(' ') else {
            // No space after the interface name: the per-interface framing is
            // unparseable, so the whole message is replaced.
            debug!(event = raw, "unparseable per-interface event, ignoring");
            return Cow::Borrowed(EVENT_IGNORE);
        };
        let after = &rest[space + 1..];
        let Some(tagged) = after.strip_prefix('<') else {
            return Cow::Borrowed(raw);
        };
        match tagged.find('>') {
            Some(close) => {
                let mut out = String::with_capacity(raw.len());
                out.push_str(IFNAME_PREFIX);
                out.push_str(&rest[..=space]);
                out.push_str(&tagged[close + 1..]);
                Cow::Owned(out)
            }
            None => Cow::Borrowed(raw),
        }
    } else if let Some(tagged) = raw.strip_prefix('<') {
        match tagged.find('>') {
            Some(close) => {
                debug!(event = raw, "event without interface prefix");
                Cow::Borrowed(&tagged[close + 1..])
            }
            None => Cow::Borrowed(raw),
        }
    } else {
        warn!(
            event = raw,
            "event without interface and without message level"
        );
        Cow::Borrowed(raw)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn test_strips_tag_after_interface_prefix() {
        let raw = "IFNAME=wlan0 <3>CTRL-EVENT-CONNECTED";
        assert_eq!(normalize(raw), "IFNAME=wlan0 CTRL-EVENT-CONNECTED");
    }

    #[test]
    fn test_strips_leading_tag_without_interface() {
        let raw = "<2>CTRL-EVENT-DISCONNECTED";
        assert_eq!(normalize(raw), "CTRL-EVENT-DISCONNECTED");
    }

    #[test]
    fn test_interface_prefix_without_tag_is_identity() {
        let raw = "IFNAME=wlan0 CTRL-EVENT-SCAN-RESULTS";
        assert!(matches!(normalize(raw), Cow::Borrowed(s) if s == raw));
    }

    #[test]
    fn test_interface_prefix_without_space_becomes_ignore_marker() {
        assert_eq!(normalize("IFNAME=wlan0"), EVENT_IGNORE);
    }

    #[test]
    fn test_unterminated_tag_is_identity() {
        let raw = "IFNAME=wlan0 <3CTRL-EVENT-CONNECTED";
        assert_eq!(normalize(raw), raw);

        let raw = "<2CTRL-EVENT-DISCONNECTED";
        assert_eq!(normalize(raw), raw);
    }

    #[test]
    fn test_plain_message_passes_through() {
        let raw = "WPS-AP-AVAILABLE";
        assert!(matches!(normalize(raw), Cow::Borrowed(s) if s == raw));
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_trailing_space_after_interface_is_identity() {
        let raw = "IFNAME=wlan0 ";
        assert_eq!(normalize(raw), raw);
    }

    #[test]
    fn test_terminating_event_format() {
        assert_eq!(
            terminating_event("wlan0", "connection closed"),
            "IFNAME=wlan0 CTRL-EVENT-TERMINATING - connection closed"
        );
    }

    fn arb_body() -> impl Strategy<Value = String> {
        // Event bodies as the daemon produces them: printable, never starting
        // with a tag opener.
        "[A-Z][A-Za-z0-9 _=.-]{0,40}"
    }

    proptest! {
        #[test]
        fn tag_is_excised_after_interface(
            iface in "[a-z][a-z0-9]{0,7}",
            level in 0u8..=9,
            body in arb_body()
        ) {
            let raw = format!("IFNAME={iface} <{level}>{body}");
            let normalized = normalize(&raw);
            prop_assert_eq!(normalized.as_ref(), format!("IFNAME={iface} {body}"));
            prop_assert_eq!(normalized.len(), raw.len() - format!("<{level}>").len());
        }

        #[test]
        fn leading_tag_is_excised(level in 0u8..=9, body in arb_body()) {
            let raw = format!("<{level}>{body}");
            let normalized = normalize(&raw);
            prop_assert_eq!(normalized.as_ref(), body.as_str());
        }

        #[test]
        fn normalize_is_idempotent(
            iface in "[a-z][a-z0-9]{0,7}",
            level in 0u8..=9,
            body in arb_body(),
            form in 0u8..4
        ) {
            let raw = match form {
                0 => format!("IFNAME={iface} <{level}>{body}"),
                1 => format!("<{level}>{body}"),
                2 => format!("IFNAME={iface} {body}"),
                _ => body,
            };
            let once = normalize(&raw).into_owned();
            let twice = normalize(&once).into_owned();
            prop_assert_eq!(once, twice);
        }
    }
}
