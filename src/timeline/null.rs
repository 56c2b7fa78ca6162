use crate::app::Result;
use crate::domain::{Item, Timeline};
use crate::timeline::TimelineBackend;

/// Keeps nothing.
pub struct NullTimeline;

impl TimelineBackend for NullTimeline {
    fn items(&self, _before: Option<&str>, _after: Option<&str>) -> Result<Timeline> {
        Ok(Timeline::default())
    }

    fn count(&self) -> Result<i64> {
        Ok(0)
    }

    fn add_item(&self, _item: &Item) -> Result<bool> {
        Ok(false)
    }

    fn mark_read(&self, _ids: &[String]) -> Result<()> {
        Ok(())
    }
}
