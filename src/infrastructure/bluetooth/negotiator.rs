//! Layout negotiation
//!
//! The telemetry stream carries no version byte, so the layout is either
//! pinned in settings or guessed from the buffer length.

use crate::domain::models::FrameLayout;
use crate::domain::settings::LayoutSelection;
use crate::infrastructure::bluetooth::protocol::{DecodeError, MAX_ATTRIBUTE_LEN};

/// Layouts eligible for length sniffing, longest first.
///
/// `DualZonePacked` and `SingleZonePid` overlap the legacy length range and
/// are only reachable through an explicit [`LayoutSelection::Fixed`].
const SNIFF_ORDER: [FrameLayout; 3] = [
    FrameLayout::DualZoneImu,
    FrameLayout::DualZone,
    FrameLayout::LegacyTemperature,
];

/// Classify a buffer purely from its length.
pub fn negotiate(len: usize) -> Result<FrameLayout, DecodeError> {
    if len > MAX_ATTRIBUTE_LEN {
        return Err(DecodeError::UnknownLayout { len });
    }

    SNIFF_ORDER
        .iter()
        .copied()
        .find(|layout| len >= layout.min_len())
        .ok_or(DecodeError::FrameTooShort {
            layout: FrameLayout::LegacyTemperature,
            expected: FrameLayout::LegacyTemperature.min_len(),
            actual: len,
        })
}

/// Pick the layout for a buffer under the configured selection.
pub fn select(len: usize, selection: LayoutSelection) -> Result<FrameLayout, DecodeError> {
    match selection {
        LayoutSelection::Auto => negotiate(len),
        LayoutSelection::Fixed(layout) => {
            if len > MAX_ATTRIBUTE_LEN {
                Err(DecodeError::UnknownLayout { len })
            } else if len < layout.min_len() {
                Err(DecodeError::FrameTooShort {
                    layout,
                    expected: layout.min_len(),
                    actual: len,
                })
            } else {
                Ok(layout)
            }
        }
    }
}
