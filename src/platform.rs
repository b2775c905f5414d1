//! Browser media capability detection
//!
//! Platform traits are derived once from the user agent and then injected
//! everywhere as an immutable value. Autoplay policy cannot be introspected
//! reliably ahead of time, so mobile, iOS and Safari are assumed to require a
//! user gesture before unmuted audio plays.

use serde::Serialize;

/// Platform traits relevant to media playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct PlatformCapabilities {
    pub is_mobile: bool,
    pub is_ios: bool,
    pub is_safari: bool,
    pub requires_gesture_for_audio: bool,
}

impl PlatformCapabilities {
    /// Detect capabilities from a user agent string.
    ///
    /// `max_touch_points` disambiguates iPadOS, which reports a desktop
    /// Macintosh user agent.
    pub fn detect(user_agent: &str, max_touch_points: u32) -> Self {
        let ua = user_agent.to_ascii_lowercase();

        let is_ios = ua.contains("iphone")
            || ua.contains("ipad")
            || ua.contains("ipod")
            || (ua.contains("macintosh") && max_touch_points > 1);
        let is_android = ua.contains("android");
        let is_mobile = is_ios || is_android || ua.contains("mobile");

        let other_engine = ["chrome", "chromium", "crios", "fxios", "edg", "android"]
            .iter()
            .any(|marker| ua.contains(marker));
        let is_safari = ua.contains("safari") && !other_engine;

        Self {
            is_mobile,
            is_ios,
            is_safari,
            requires_gesture_for_audio: is_mobile || is_ios || is_safari,
        }
    }

    /// Desktop browser with a permissive autoplay policy
    pub fn desktop() -> Self {
        Self::default()
    }

    /// Capabilities with the gesture requirement forced on
    pub fn gesture_required() -> Self {
        Self {
            requires_gesture_for_audio: true,
            ..Self::default()
        }
    }
}
