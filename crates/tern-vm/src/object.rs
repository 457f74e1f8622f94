//! Heap objects.
//!
//! Named properties keep insertion order for `for-in`. Arrays and
//! arguments objects keep their indexed properties in a dense element
//! vector where `None` is a hole.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use tern_bytecode::Identifier;

use crate::code_block::CodeBlock;
use crate::realm::NativeKind;
use crate::scope::ScopeRef;
use crate::value::Value;

/// Arrays nested deeper than this print as empty when converted to strings
const MAX_JOIN_DEPTH: u32 = 64;

/// Property attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    /// Value may be changed
    pub writable: bool,
    /// Visible to `for-in`
    pub enumerable: bool,
    /// Property may be deleted
    pub configurable: bool,
}

impl Attributes {
    /// Attributes of properties created by assignment
    pub const DEFAULT: Self = Self {
        writable: true,
        enumerable: true,
        configurable: true,
    };

    /// Built-in properties: not enumerable
    pub const HIDDEN: Self = Self {
        writable: true,
        enumerable: false,
        configurable: true,
    };

    /// `var` bindings on the global object
    pub const PERMANENT: Self = Self {
        writable: true,
        enumerable: true,
        configurable: false,
    };

    /// Constants such as `NaN` and `undefined`
    pub const FROZEN: Self = Self {
        writable: false,
        enumerable: false,
        configurable: false,
    };
}

/// Property payload
#[derive(Debug, Clone)]
pub enum PropertySlot {
    /// Plain value
    Data(Value),
    /// Getter/setter pair; an absent side holds `undefined`
    Accessor {
        /// Getter function
        getter: Value,
        /// Setter function
        setter: Value,
    },
}

/// Own property
#[derive(Debug, Clone)]
pub struct Property {
    /// Payload
    pub slot: PropertySlot,
    /// Attributes
    pub attributes: Attributes,
}

/// What a `[[Set]]` has to do after the object side ran
#[derive(Debug)]
pub enum SetOutcome {
    /// Value stored
    Done,
    /// Call this setter with the receiver as `this`
    Setter(Value),
    /// Non-writable or setter-less property
    Rejected,
}

/// Something that can be called
#[derive(Debug, Clone)]
pub enum Callable {
    /// Bytecode function closed over a scope
    Closure {
        /// Linked code
        code: Rc<CodeBlock>,
        /// Scope captured at creation
        scope: ScopeRef,
    },
    /// Host function
    Native(NativeKind),
}

/// Function payload
#[derive(Debug, Clone)]
pub struct FunctionData {
    /// Body
    pub callable: Callable,
    /// Never-reused identity compared by call-link records
    pub identity: u64,
}

/// Object class
#[derive(Debug, Clone)]
pub enum ObjectClass {
    /// Plain object
    Ordinary,
    /// Array with dense elements
    Array,
    /// Unmapped `arguments` snapshot
    Arguments,
    /// Error instance
    Error,
    /// Regular-expression literal
    RegExp,
    /// Function
    Function(FunctionData),
}

impl ObjectClass {
    /// Class name used in debug output
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ordinary => "Object",
            Self::Array => "Array",
            Self::Arguments => "Arguments",
            Self::Error => "Error",
            Self::RegExp => "RegExp",
            Self::Function(_) => "Function",
        }
    }

    fn has_elements(&self) -> bool {
        matches!(self, Self::Array | Self::Arguments)
    }
}

/// Object storage
#[derive(Debug)]
pub struct JsObject {
    /// Class
    pub class: ObjectClass,
    /// `[[Prototype]]`
    pub proto: Option<ObjectRef>,
    properties: IndexMap<Identifier, Property>,
    elements: Vec<Option<Value>>,
}

impl JsObject {
    /// Empty object of `class`
    pub fn new(class: ObjectClass, proto: Option<ObjectRef>) -> Self {
        Self {
            class,
            proto,
            properties: IndexMap::new(),
            elements: Vec::new(),
        }
    }
}

/// Shared handle to an object
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<JsObject>>);

impl std::fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[object {}]", self.class_name())
    }
}

/// Canonical array index of a property key
pub fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || key.len() > 10 || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse::<u32>().ok().filter(|&i| i != u32::MAX)
}

impl ObjectRef {
    /// Allocate an object
    pub fn new(object: JsObject) -> Self {
        Self(Rc::new(RefCell::new(object)))
    }

    /// Allocate an object of `class`
    pub fn with_class(class: ObjectClass, proto: Option<ObjectRef>) -> Self {
        Self::new(JsObject::new(class, proto))
    }

    /// Allocate an array holding `values`
    pub fn array(values: Vec<Value>, proto: Option<ObjectRef>) -> Self {
        let mut object = JsObject::new(ObjectClass::Array, proto);
        object.elements = values.into_iter().map(Some).collect();
        Self::new(object)
    }

    /// Borrow the storage
    pub fn borrow(&self) -> Ref<'_, JsObject> {
        self.0.borrow()
    }

    fn borrow_mut(&self) -> RefMut<'_, JsObject> {
        self.0.borrow_mut()
    }

    /// Same object
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Class name
    pub fn class_name(&self) -> &'static str {
        self.borrow().class.name()
    }

    /// Prototype
    pub fn proto(&self) -> Option<ObjectRef> {
        self.borrow().proto.clone()
    }

    /// Function payload
    pub fn function(&self) -> Option<FunctionData> {
        match &self.borrow().class {
            ObjectClass::Function(data) => Some(data.clone()),
            _ => None,
        }
    }

    /// Whether this is a function
    pub fn is_callable(&self) -> bool {
        matches!(self.borrow().class, ObjectClass::Function(_))
    }

    /// Whether this is an array
    pub fn is_array(&self) -> bool {
        matches!(self.borrow().class, ObjectClass::Array)
    }

    /// Name of a function, from its `name` property
    pub fn function_name(&self) -> String {
        match self.get_own_property(&Identifier::new("name")) {
            Some(Property {
                slot: PropertySlot::Data(Value::String(name)),
                ..
            }) => name.to_string(),
            _ => String::new(),
        }
    }

    // ==================== Own properties ====================

    /// Own property, including elements and array `length`
    pub fn get_own_property(&self, key: &Identifier) -> Option<Property> {
        let object = self.borrow();
        if object.class.has_elements() {
            if let Some(index) = array_index(key) {
                return object
                    .elements
                    .get(index as usize)
                    .cloned()
                    .flatten()
                    .map(|value| Property {
                        slot: PropertySlot::Data(value),
                        attributes: Attributes::DEFAULT,
                    });
            }
            if matches!(object.class, ObjectClass::Array) && key.as_str() == "length" {
                return Some(Property {
                    slot: PropertySlot::Data(Value::Number(object.elements.len() as f64)),
                    attributes: Attributes {
                        writable: true,
                        enumerable: false,
                        configurable: false,
                    },
                });
            }
        }
        object.properties.get(key).cloned()
    }

    /// Property found on this object or its prototype chain
    pub fn get_property(&self, key: &Identifier) -> Option<Property> {
        let mut current = Some(self.clone());
        while let Some(object) = current {
            if let Some(property) = object.get_own_property(key) {
                return Some(property);
            }
            current = object.proto();
        }
        None
    }

    /// Data value of a property; accessors read as `undefined`
    pub fn get_data(&self, key: &str) -> Value {
        match self.get_property(&Identifier::new(key)) {
            Some(Property {
                slot: PropertySlot::Data(value),
                ..
            }) => value,
            _ => Value::Undefined,
        }
    }

    /// `key in object`
    pub fn has_property(&self, key: &Identifier) -> bool {
        self.get_property(key).is_some()
    }

    /// Own property check
    pub fn has_own_property(&self, key: &Identifier) -> bool {
        self.get_own_property(key).is_some()
    }

    /// Create or replace an own data property
    pub fn define(&self, key: Identifier, value: Value, attributes: Attributes) {
        let mut object = self.borrow_mut();
        if object.class.has_elements()
            && let Some(index) = array_index(&key)
        {
            set_element(&mut object.elements, index, value);
            return;
        }
        object.properties.insert(
            key,
            Property {
                slot: PropertySlot::Data(value),
                attributes,
            },
        );
    }

    /// Define one side of an accessor, keeping the other side of an
    /// existing accessor
    pub fn define_accessor(&self, key: Identifier, getter: Value, setter: Value) {
        let mut object = self.borrow_mut();
        let (getter, setter) = match object.properties.get(&key) {
            Some(Property {
                slot:
                    PropertySlot::Accessor {
                        getter: old_getter,
                        setter: old_setter,
                    },
                ..
            }) => (
                if getter.is_undefined() { old_getter.clone() } else { getter },
                if setter.is_undefined() { old_setter.clone() } else { setter },
            ),
            _ => (getter, setter),
        };
        object.properties.insert(
            key,
            Property {
                slot: PropertySlot::Accessor { getter, setter },
                attributes: Attributes::DEFAULT,
            },
        );
    }

    /// Object side of `[[Set]]` with this object as receiver
    pub fn set(&self, key: &Identifier, value: Value) -> SetOutcome {
        if let Some(property) = self.get_own_property(key) {
            return match property.slot {
                PropertySlot::Accessor { setter, .. } if setter.is_undefined() => SetOutcome::Rejected,
                PropertySlot::Accessor { setter, .. } => SetOutcome::Setter(setter),
                PropertySlot::Data(_) if !property.attributes.writable => SetOutcome::Rejected,
                PropertySlot::Data(_) => {
                    self.store_own(key, value);
                    SetOutcome::Done
                }
            };
        }
        if let Some(property) = self.proto().and_then(|proto| proto.get_property(key)) {
            match property.slot {
                PropertySlot::Accessor { setter, .. } if setter.is_undefined() => {
                    return SetOutcome::Rejected;
                }
                PropertySlot::Accessor { setter, .. } => return SetOutcome::Setter(setter),
                PropertySlot::Data(_) if !property.attributes.writable => {
                    return SetOutcome::Rejected;
                }
                PropertySlot::Data(_) => {}
            }
        }
        self.define(key.clone(), value, Attributes::DEFAULT);
        SetOutcome::Done
    }

    fn store_own(&self, key: &Identifier, value: Value) {
        let mut object = self.borrow_mut();
        if object.class.has_elements() {
            if let Some(index) = array_index(key) {
                set_element(&mut object.elements, index, value);
                return;
            }
            if matches!(object.class, ObjectClass::Array) && key.as_str() == "length" {
                let length = value.to_uint32() as usize;
                object.elements.resize(length, None);
                return;
            }
        }
        if let Some(property) = object.properties.get_mut(key) {
            property.slot = PropertySlot::Data(value);
        }
    }

    /// `delete object[key]`
    pub fn delete(&self, key: &Identifier) -> bool {
        let mut object = self.borrow_mut();
        if object.class.has_elements() {
            if let Some(index) = array_index(key) {
                if let Some(element) = object.elements.get_mut(index as usize) {
                    *element = None;
                }
                return true;
            }
            if matches!(object.class, ObjectClass::Array) && key.as_str() == "length" {
                return false;
            }
        }
        match object.properties.get(key) {
            Some(property) if !property.attributes.configurable => false,
            Some(_) => {
                object.properties.shift_remove(key);
                true
            }
            None => true,
        }
    }

    // ==================== Elements ====================

    /// Number of element slots, holes included; zero for objects without
    /// elements
    pub fn element_count(&self) -> usize {
        let object = self.borrow();
        if object.class.has_elements() {
            object.elements.len()
        } else {
            0
        }
    }

    /// Whether element `index` is present
    pub fn has_element(&self, index: usize) -> bool {
        self.borrow()
            .elements
            .get(index)
            .is_some_and(Option::is_some)
    }

    /// Append an element
    pub fn push(&self, value: Value) {
        self.borrow_mut().elements.push(Some(value));
    }

    /// Append a hole
    pub fn push_hole(&self) {
        self.borrow_mut().elements.push(None);
    }

    /// Element values with holes read as `undefined`, for objects that
    /// store elements
    pub fn element_values(&self) -> Option<Vec<Value>> {
        let object = self.borrow();
        object.class.has_elements().then(|| {
            object
                .elements
                .iter()
                .map(|element| element.clone().unwrap_or_default())
                .collect()
        })
    }

    pub(crate) fn set_elements(&self, values: Vec<Value>) {
        self.borrow_mut().elements = values.into_iter().map(Some).collect();
    }

    // ==================== Enumeration ====================

    /// Enumerable named keys of the object and its prototypes, own keys
    /// first, each key once
    pub fn enumerable_keys(&self) -> Vec<Identifier> {
        let mut seen = FxHashSet::default();
        let mut keys = Vec::new();
        let mut current = Some(self.clone());
        while let Some(object) = current {
            {
                let storage = object.borrow();
                for (key, property) in &storage.properties {
                    if seen.insert(key.clone()) && property.attributes.enumerable {
                        keys.push(key.clone());
                    }
                }
            }
            current = object.proto();
        }
        keys
    }

    // ==================== Conversions ====================

    /// Built-in string form
    pub fn default_string(&self) -> String {
        self.string_at_depth(0)
    }

    fn string_at_depth(&self, depth: u32) -> String {
        let class = self.borrow().class.clone();
        match class {
            ObjectClass::Array => {
                if depth > MAX_JOIN_DEPTH {
                    return String::new();
                }
                let values = self.element_values().unwrap_or_default();
                let parts: Vec<String> = values
                    .iter()
                    .map(|value| match value {
                        Value::Undefined | Value::Null => String::new(),
                        Value::Object(o) => o.string_at_depth(depth + 1),
                        other => other.to_display_string(),
                    })
                    .collect();
                parts.join(",")
            }
            ObjectClass::Error => {
                let name = match self.get_data("name") {
                    Value::Undefined => "Error".to_string(),
                    name => name.to_display_string(),
                };
                match self.get_data("message") {
                    Value::Undefined => name,
                    message => {
                        let message = message.to_display_string();
                        if message.is_empty() {
                            name
                        } else {
                            format!("{name}: {message}")
                        }
                    }
                }
            }
            ObjectClass::RegExp => format!(
                "/{}/{}",
                self.get_data("source").to_display_string(),
                self.get_data("flags").to_display_string()
            ),
            ObjectClass::Function(data) => match data.callable {
                Callable::Native(_) => {
                    format!("function {}() {{ [native code] }}", self.function_name())
                }
                Callable::Closure { .. } => format!("function {}() {{ ... }}", self.function_name()),
            },
            ObjectClass::Arguments => "[object Arguments]".to_string(),
            ObjectClass::Ordinary => "[object Object]".to_string(),
        }
    }
}

fn set_element(elements: &mut Vec<Option<Value>>, index: u32, value: Value) {
    let index = index as usize;
    if index >= elements.len() {
        elements.resize(index + 1, None);
    }
    elements[index] = Some(value);
}
