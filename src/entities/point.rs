//! Point components: a single time on the timeline.

use serde::{Deserialize, Serialize};

use super::component::{ComponentId, ComponentKind, TimeKey, TimelineComponent, UniquenessKey};

/// Free annotation at a time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub id: ComponentId,
    pub time: f64,
    #[serde(default)]
    pub label: String,
    /// Display color as a CSS-style string ("#ff8800")
    #[serde(default)]
    pub color: Option<String>,
}

/// Beat onset. Metric position comes from the timeline's beat pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Beat {
    pub id: ComponentId,
    pub time: f64,
}

/// Harmony or key symbol ("Am", "G7", "key: D") starting at a time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Harmony {
    pub id: ComponentId,
    pub time: f64,
    pub symbol: String,
}

/// Score page turn: `page` starts at `time`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageMarker {
    pub id: ComponentId,
    pub time: f64,
    pub page: u32,
}

macro_rules! impl_point_component {
    ($ty:ident, $kind:expr, |$this:ident| $label:expr) => {
        impl TimelineComponent for $ty {
            fn id(&self) -> ComponentId {
                self.id
            }

            fn kind(&self) -> ComponentKind {
                $kind
            }

            fn start(&self) -> f64 {
                self.time
            }

            fn end(&self) -> f64 {
                self.time
            }

            fn uniqueness_key(&self) -> UniquenessKey {
                UniquenessKey::Time(TimeKey::new(self.time))
            }

            fn scale(&mut self, factor: f64) {
                self.time *= factor;
            }

            fn crop(&mut self, length: f64) -> bool {
                self.time < length
            }

            fn label(&self) -> &str {
                let $this = self;
                $label
            }
        }
    };
}

impl_point_component!(Marker, ComponentKind::Marker, |m| &m.label);
impl_point_component!(Beat, ComponentKind::Beat, |_b| "");
impl_point_component!(Harmony, ComponentKind::Harmony, |h| &h.symbol);
impl_point_component!(PageMarker, ComponentKind::PageMarker, |_p| "");

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_point_scale_and_crop() {
        let mut m = Marker {
            id: Uuid::new_v4(),
            time: 4.0,
            label: "x".into(),
            color: None,
        };
        m.scale(0.5);
        assert_eq!(m.time, 2.0);
        assert!(m.crop(2.5));
        // a point at the new length is cut like an interval starting there
        assert!(!m.crop(2.0));
        assert!(!m.crop(1.5));
    }
}
