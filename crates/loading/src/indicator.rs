/// Renders the busy indicator.
///
/// Called only when visibility actually changes; never twice in a row with the
/// same value.
pub trait Indicator: Send + Sync {
    fn set_visible(&self, visible: bool);
}

impl<F> Indicator for F
where
    F: Fn(bool) + Send + Sync,
{
    fn set_visible(&self, visible: bool) {
        self(visible)
    }
}

/// Indicator for hosts with nothing to render.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIndicator;
impl Indicator for NoIndicator {
    fn set_visible(&self, _visible: bool) {}
}

/// Reports visibility changes as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogIndicator;
impl Indicator for LogIndicator {
    fn set_visible(&self, visible: bool) {
        if visible {
            tracing::info!("working...");
        } else {
            tracing::info!("done");
        }
    }
}
