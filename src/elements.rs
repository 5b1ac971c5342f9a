//! Page-builder element model: flat records with position, size, style and
//! content, persisted one row per element and reconstituted on page render.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Every kind an element row may carry: the twelve editor palette kinds plus
/// the four homepage section kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Heading,
    Text,
    Button,
    Image,
    Video,
    Container,
    Form,
    Map,
    Social,
    Divider,
    Spacer,
    Icon,
    Hero,
    Slideshow,
    Gallery,
    About,
}

/// Kinds offered on the editor palette.
pub const EDITOR_KINDS: [ElementKind; 12] = [
    ElementKind::Heading,
    ElementKind::Text,
    ElementKind::Button,
    ElementKind::Image,
    ElementKind::Video,
    ElementKind::Container,
    ElementKind::Form,
    ElementKind::Map,
    ElementKind::Social,
    ElementKind::Divider,
    ElementKind::Spacer,
    ElementKind::Icon,
];

/// Kinds subject to the homepage responsive policy: forced to relative
/// percentage/viewport units on load regardless of what was stored. This is
/// a deliberate responsive-design decision, not a data repair; it is the one
/// exception to save/load round-trip idempotence.
pub const HOMEPAGE_KINDS: [ElementKind; 4] = [
    ElementKind::Hero,
    ElementKind::Slideshow,
    ElementKind::Gallery,
    ElementKind::About,
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unit {
    #[serde(rename = "px")]
    Px,
    #[serde(rename = "%")]
    Percent,
    #[serde(rename = "vh")]
    Vh,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub unit: Unit,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
    pub unit: Unit,
}

/// One placed element. Trees are expressed via `parent_id` back-references;
/// a page loads as a flat list, not a strict tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageElement {
    pub id: Uuid,
    pub page_id: String,
    pub kind: ElementKind,
    pub position: Position,
    pub size: Size,
    #[serde(default)]
    pub style: HashMap<String, String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    /// Style overrides keyed by breakpoint name (e.g. "sm", "md").
    #[serde(default)]
    pub breakpoint_styles: HashMap<String, HashMap<String, String>>,
}

impl PageElement {
    pub fn new(page_id: impl Into<String>, kind: ElementKind, position: Position, size: Size) -> Self {
        PageElement {
            id: Uuid::new_v4(),
            page_id: page_id.into(),
            kind,
            position,
            size,
            style: HashMap::new(),
            content: String::new(),
            parent_id: None,
            breakpoint_styles: HashMap::new(),
        }
    }

    /// Flatten to the column shape stored one row per element.
    pub fn to_record(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "page_id": self.page_id,
            "kind": self.kind,
            "pos_x": self.position.x,
            "pos_y": self.position.y,
            "pos_unit": self.position.unit,
            "width": self.size.width,
            "height": self.size.height,
            "size_unit": self.size.unit,
            "style": self.style,
            "content": self.content,
            "parent_id": self.parent_id,
            "breakpoint_styles": self.breakpoint_styles,
        })
    }

    /// Rebuild from a stored row. Unknown kinds and malformed fields are
    /// load errors, not silently defaulted.
    pub fn from_record(record: &Value) -> Result<Self, String> {
        fn field<'a>(record: &'a Value, name: &str) -> Result<&'a Value, String> {
            record
                .get(name)
                .ok_or_else(|| format!("element record missing '{}'", name))
        }
        fn number(record: &Value, name: &str) -> Result<f64, String> {
            field(record, name)?
                .as_f64()
                .ok_or_else(|| format!("element field '{}' is not a number", name))
        }
        let id: Uuid = serde_json::from_value(field(record, "id")?.clone())
            .map_err(|e| format!("element id: {}", e))?;
        let kind: ElementKind = serde_json::from_value(field(record, "kind")?.clone())
            .map_err(|e| format!("element kind: {}", e))?;
        let pos_unit: Unit = serde_json::from_value(field(record, "pos_unit")?.clone())
            .map_err(|e| format!("element pos_unit: {}", e))?;
        let size_unit: Unit = serde_json::from_value(field(record, "size_unit")?.clone())
            .map_err(|e| format!("element size_unit: {}", e))?;
        let style = record
            .get("style")
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| format!("element style: {}", e))?
            .unwrap_or_default();
        let breakpoint_styles = record
            .get("breakpoint_styles")
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| format!("element breakpoint_styles: {}", e))?
            .unwrap_or_default();
        let parent_id = record
            .get("parent_id")
            .filter(|v| !v.is_null())
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
            .map_err(|e| format!("element parent_id: {}", e))?;
        Ok(PageElement {
            id,
            page_id: field(record, "page_id")?
                .as_str()
                .ok_or("element page_id is not a string")?
                .to_string(),
            kind,
            position: Position {
                x: number(record, "pos_x")?,
                y: number(record, "pos_y")?,
                unit: pos_unit,
            },
            size: Size {
                width: number(record, "width")?,
                height: number(record, "height")?,
                unit: size_unit,
            },
            style,
            content: record
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            parent_id,
            breakpoint_styles,
        })
    }
}

/// Homepage responsive policy: percentage position, viewport-height size,
/// relative flow. Applied on load to `HOMEPAGE_KINDS` only.
pub fn coerce_homepage_units(element: &mut PageElement) {
    if !HOMEPAGE_KINDS.contains(&element.kind) {
        return;
    }
    element.position.unit = Unit::Percent;
    element.size.unit = Unit::Vh;
    element
        .style
        .insert("position".to_string(), "relative".to_string());
}

/// Load a page's rows back into elements, applying the homepage policy.
pub fn load_elements(records: &[Value]) -> Result<Vec<PageElement>, String> {
    let mut out = Vec::with_capacity(records.len());
    for record in records {
        let mut element = PageElement::from_record(record)?;
        coerce_homepage_units(&mut element);
        out.push(element);
    }
    Ok(out)
}

/// Default offset for elements inserted from the palette.
pub const PALETTE_INSERT_OFFSET: f64 = 40.0;

/// Translate a drop point (screen coordinates) into element coordinates by
/// subtracting the canvas origin.
pub fn position_from_drop(drop_x: f64, drop_y: f64, canvas_x: f64, canvas_y: f64) -> Position {
    Position {
        x: drop_x - canvas_x,
        y: drop_y - canvas_y,
        unit: Unit::Px,
    }
}

pub fn palette_insert_position() -> Position {
    Position {
        x: PALETTE_INSERT_OFFSET,
        y: PALETTE_INSERT_OFFSET,
        unit: Unit::Px,
    }
}

/// Exclusive selection: one element id, or none.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Selection(pub Option<Uuid>);

impl Selection {
    pub fn select(&mut self, id: Uuid) {
        self.0 = Some(id);
    }

    /// A click clears the selection only when the target is the canvas
    /// itself, not one of its children.
    pub fn click(&mut self, target_is_canvas: bool) {
        if target_is_canvas {
            self.0 = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(kind: ElementKind) -> PageElement {
        let mut e = PageElement::new(
            "home",
            kind,
            Position { x: 120.0, y: 80.0, unit: Unit::Px },
            Size { width: 300.0, height: 150.0, unit: Unit::Px },
        );
        e.content = "hello".into();
        e.style.insert("color".into(), "#333".into());
        e.breakpoint_styles
            .insert("sm".into(), HashMap::from([("display".into(), "none".into())]));
        e
    }

    #[test]
    fn round_trip_is_idempotent_for_editor_kinds() {
        let original = sample(ElementKind::Heading);
        let record = original.to_record();
        let loaded = load_elements(&[record]).unwrap();
        assert_eq!(loaded, vec![original]);
    }

    #[test]
    fn homepage_kinds_are_coerced_on_load() {
        let original = sample(ElementKind::Hero);
        let record = original.to_record();
        let loaded = load_elements(&[record]).unwrap().pop().unwrap();
        assert_eq!(loaded.position.unit, Unit::Percent);
        assert_eq!(loaded.size.unit, Unit::Vh);
        assert_eq!(loaded.style.get("position").map(String::as_str), Some("relative"));
        // numeric values survive; only units and flow change
        assert_eq!(loaded.position.x, original.position.x);
        assert_eq!(loaded.size.height, original.size.height);
    }

    #[test]
    fn unknown_kind_is_a_load_error() {
        let mut record = sample(ElementKind::Text).to_record();
        record["kind"] = Value::String("carousel3d".into());
        assert!(PageElement::from_record(&record).is_err());
    }

    #[test]
    fn drop_translation_subtracts_canvas_origin() {
        let p = position_from_drop(640.0, 410.0, 200.0, 110.0);
        assert_eq!((p.x, p.y), (440.0, 300.0));
        assert_eq!(p.unit, Unit::Px);
    }

    #[test]
    fn selection_clears_only_on_canvas_click() {
        let id = Uuid::new_v4();
        let mut sel = Selection::default();
        sel.select(id);
        sel.click(false);
        assert_eq!(sel.0, Some(id));
        sel.click(true);
        assert_eq!(sel.0, None);
    }

    #[test]
    fn unit_tags_serialize_as_stored_strings() {
        assert_eq!(serde_json::to_value(Unit::Percent).unwrap(), "%");
        assert_eq!(serde_json::to_value(Unit::Px).unwrap(), "px");
        assert_eq!(serde_json::to_value(Unit::Vh).unwrap(), "vh");
    }
}
