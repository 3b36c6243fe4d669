// ============================================================================
// spark-keyval - Structural Shape
// Tagged description of a model's fields, built once at definition time
// ============================================================================
//
// Field editors and lenses never inspect live instances. They pattern-match
// over this tree instead:
//
//   Cell { derived }      a store; writable unless derived
//   Trigger               an API event
//   Collection(nested)    a nested keyval, either with its own shape or a
//                         recursive reference to the collection being defined
// ============================================================================

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use serde_json::Value;

use crate::core::types::Key;

// =============================================================================
// KEY SPEC
// =============================================================================

/// How a collection derives the key of an item.
#[derive(Clone)]
pub enum KeySpec {
    /// The value of a named field.
    Field(String),
    /// A key function. Items for which it returns None are skipped.
    Derive(Rc<dyn Fn(&Value) -> Option<Key>>),
}

impl KeySpec {
    pub fn field(name: impl Into<String>) -> Self {
        KeySpec::Field(name.into())
    }

    pub fn derive(f: impl Fn(&Value) -> Option<Key> + 'static) -> Self {
        KeySpec::Derive(Rc::new(f))
    }

    /// Key of `item`, if one can be derived.
    pub fn extract(&self, item: &Value) -> Option<Key> {
        match self {
            KeySpec::Field(name) => item.get(name).and_then(Key::from_value),
            KeySpec::Derive(f) => f(item),
        }
    }

    /// Field name for field-based keys.
    pub fn field_name(&self) -> Option<&str> {
        match self {
            KeySpec::Field(name) => Some(name),
            KeySpec::Derive(_) => None,
        }
    }
}

impl fmt::Debug for KeySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySpec::Field(name) => f.debug_tuple("Field").field(name).finish(),
            KeySpec::Derive(_) => f.write_str("Derive(..)"),
        }
    }
}

// =============================================================================
// SHAPE NODES
// =============================================================================

/// Shape of a nested collection field.
#[derive(Debug, Clone)]
pub enum NestedShape {
    Shape(Rc<KeyvalShape>),
    /// The field holds a fork of the collection that declares it.
    Recursive,
}

/// Shape of one field.
#[derive(Debug, Clone)]
pub enum ShapeNode {
    Cell { derived: bool },
    Trigger,
    Collection(NestedShape),
}

impl ShapeNode {
    /// A writable cell.
    pub fn cell() -> Self {
        ShapeNode::Cell { derived: false }
    }

    pub fn derived_cell() -> Self {
        ShapeNode::Cell { derived: true }
    }

    pub fn collection(shape: Rc<KeyvalShape>) -> Self {
        ShapeNode::Collection(NestedShape::Shape(shape))
    }

    pub fn is_writable_cell(&self) -> bool {
        matches!(self, ShapeNode::Cell { derived: false })
    }
}

// =============================================================================
// KEYVAL SHAPE
// =============================================================================

/// Shape of a whole collection: how items are keyed and what fields they
/// have. `fields` is None for collections that declare nothing about their
/// items.
#[derive(Debug, Clone, Default)]
pub struct KeyvalShape {
    pub key: Option<KeySpec>,
    pub fields: Option<IndexMap<String, ShapeNode>>,
}

impl KeyvalShape {
    pub fn new(key: KeySpec, fields: Option<IndexMap<String, ShapeNode>>) -> Self {
        Self {
            key: Some(key),
            fields,
        }
    }

    /// Shape of a collection whose definition is unknown.
    pub fn opaque() -> Self {
        Self::default()
    }

    pub fn field(&self, name: &str) -> Option<&ShapeNode> {
        self.fields.as_ref().and_then(|fields| fields.get(name))
    }

    /// Names of writable, non-derived cells in declaration order.
    pub fn writable_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .flatten()
            .filter(|(_, node)| node.is_writable_cell())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    pub fn key_of(&self, item: &Value) -> Option<Key> {
        self.key.as_ref().and_then(|key| key.extract(item))
    }
}

/// Resolve the shape behind a nested collection field, following recursive
/// references back to `parent`.
pub fn resolve_nested(parent: &Rc<KeyvalShape>, nested: &NestedShape) -> Rc<KeyvalShape> {
    match nested {
        NestedShape::Shape(shape) => shape.clone(),
        NestedShape::Recursive => parent.clone(),
    }
}
