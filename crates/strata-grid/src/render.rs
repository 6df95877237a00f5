//! Render-facing view of a cell.
//!
//! Visualisation is best-effort: a renderer asks for the [`Datum`] list of a
//! cell through a non-blocking acquire and simply skips cells that are busy.

use serde::{Deserialize, Serialize};

/// One render attribute of a cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Datum {
    /// A scalar such as an elevation or a depth.
    Scalar(f64),
    /// An RGB colour.
    Color([u8; 3]),
    /// A short classification label.
    Label(String),
}

/// A cell payload that can describe itself to a renderer.
pub trait RenderSource {
    /// The attributes a renderer needs to draw this cell.
    fn render_settings(&self) -> Vec<Datum>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn datum_serializes_tagged() {
        let json = serde_json::to_string(&Datum::Color([10, 20, 30])).unwrap();
        assert_eq!(json, r#"{"kind":"color","value":[10,20,30]}"#);
        let label: Datum = serde_json::from_str(r#"{"kind":"label","value":"basalt"}"#).unwrap();
        assert_eq!(label, Datum::Label(String::from("basalt")));
    }
}
