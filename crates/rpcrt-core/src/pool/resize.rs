//! Pool size decision from observed peak load.

use super::settings::ChannelPoolSettings;

/// Size the pool should move to, or `None` when `current` is already within
/// the band implied by `peak` concurrent calls.
///
/// The band is `[ceil(peak / max_rpcs), ceil(peak / min_rpcs)]` clamped to
/// the channel count bounds. Outside it the pool heads for the band's
/// midpoint, moving at most `max_resize_delta` channels per step.
pub(super) fn target_size(current: usize, peak: usize, settings: &ChannelPoolSettings) -> Option<usize> {
    let min_channels = peak
        .div_ceil(settings.max_rpcs_per_channel.max(1))
        .max(settings.min_channel_count);
    let max_channels = if settings.min_rpcs_per_channel == 0 {
        settings.max_channel_count
    } else {
        peak.div_ceil(settings.min_rpcs_per_channel)
            .min(settings.max_channel_count)
    }
    .max(min_channels);

    if (min_channels..=max_channels).contains(&current) {
        return None;
    }

    let tentative = (min_channels + max_channels) / 2;
    let delta = settings.resize.max_resize_delta;
    let target = if tentative > current {
        tentative.min(current + delta)
    } else {
        tentative.max(current.saturating_sub(delta))
    };
    let target = target.clamp(settings.min_channel_count, settings.max_channel_count);
    (target != current).then_some(target)
}
