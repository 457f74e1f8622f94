//! Global object and intrinsics.

use rustc_hash::FxHashMap;
use tern_bytecode::{ErrorKind, Identifier};

use crate::object::{Attributes, Callable, FunctionData, ObjectClass, ObjectRef};
use crate::scope::{Scope, ScopeRef};
use crate::value::Value;

/// Error constructors known to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    /// `Error`
    Error,
    /// `TypeError`
    TypeError,
    /// `ReferenceError`
    ReferenceError,
    /// `RangeError`
    RangeError,
    /// `SyntaxError`
    SyntaxError,
}

impl ErrorType {
    /// Every error type, base first
    pub const ALL: [ErrorType; 5] = [
        Self::Error,
        Self::TypeError,
        Self::ReferenceError,
        Self::RangeError,
        Self::SyntaxError,
    ];

    /// Constructor name
    pub fn name(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::TypeError => "TypeError",
            Self::ReferenceError => "ReferenceError",
            Self::RangeError => "RangeError",
            Self::SyntaxError => "SyntaxError",
        }
    }

    /// Type by constructor name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }
}

impl From<ErrorKind> for ErrorType {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::TypeError => Self::TypeError,
            ErrorKind::ReferenceError => Self::ReferenceError,
            ErrorKind::RangeError => Self::RangeError,
        }
    }
}

/// Host functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeKind {
    /// `print(...)`: writes its arguments separated by spaces
    Print,
    /// The intrinsic `eval`
    Eval,
    /// An error constructor; callable with or without `new`
    Error(ErrorType),
}

impl NativeKind {
    /// Whether `new` may be applied
    pub fn is_constructor(self) -> bool {
        matches!(self, Self::Error(_))
    }

    fn name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Eval => "eval",
            Self::Error(error) => error.name(),
        }
    }
}

/// Unique non-zero words for function identities and code entries
pub(crate) trait WordSource {
    fn next_word(&mut self) -> u64;
}

/// Intrinsics of one global environment
#[derive(Debug)]
pub struct Realm {
    global: ObjectRef,
    global_scope: ScopeRef,
    object_prototype: ObjectRef,
    function_prototype: ObjectRef,
    array_prototype: ObjectRef,
    error_prototypes: FxHashMap<ErrorType, ObjectRef>,
    eval_function: ObjectRef,
    native_entries: FxHashMap<NativeKind, u64>,
}

impl Realm {
    pub(crate) fn new(words: &mut impl WordSource) -> Self {
        let object_prototype = ObjectRef::with_class(ObjectClass::Ordinary, None);
        let function_prototype =
            ObjectRef::with_class(ObjectClass::Ordinary, Some(object_prototype.clone()));
        let array_prototype =
            ObjectRef::with_class(ObjectClass::Ordinary, Some(object_prototype.clone()));
        let global = ObjectRef::with_class(ObjectClass::Ordinary, Some(object_prototype.clone()));
        let global_scope = Scope::global(global.clone());

        let mut error_prototypes = FxHashMap::default();
        let base_error = ObjectRef::with_class(ObjectClass::Ordinary, Some(object_prototype.clone()));
        for error in ErrorType::ALL {
            let proto = if error == ErrorType::Error {
                base_error.clone()
            } else {
                ObjectRef::with_class(ObjectClass::Ordinary, Some(base_error.clone()))
            };
            proto.define(
                Identifier::new("name"),
                Value::string(error.name()),
                Attributes::HIDDEN,
            );
            proto.define(Identifier::new("message"), Value::string(""), Attributes::HIDDEN);
            error_prototypes.insert(error, proto);
        }

        let placeholder = ObjectRef::with_class(ObjectClass::Ordinary, None);
        let mut realm = Self {
            global,
            global_scope,
            object_prototype,
            function_prototype,
            array_prototype,
            error_prototypes,
            eval_function: placeholder,
            native_entries: FxHashMap::default(),
        };

        let frozen = [
            ("undefined", Value::Undefined),
            ("NaN", Value::Number(f64::NAN)),
            ("Infinity", Value::Number(f64::INFINITY)),
        ];
        for (name, value) in frozen {
            realm.global.define(Identifier::new(name), value, Attributes::FROZEN);
        }
        realm.global.define(
            Identifier::new("globalThis"),
            Value::Object(realm.global.clone()),
            Attributes::HIDDEN,
        );

        realm.eval_function = realm.install_native(NativeKind::Eval, 1, words);
        realm.install_native(NativeKind::Print, 0, words);
        for error in ErrorType::ALL {
            let constructor = realm.install_native(NativeKind::Error(error), 1, words);
            let proto = realm.error_prototype(error);
            constructor.define(
                Identifier::new("prototype"),
                Value::Object(proto.clone()),
                Attributes::FROZEN,
            );
            proto.define(
                Identifier::new("constructor"),
                Value::Object(constructor),
                Attributes::HIDDEN,
            );
        }
        realm
    }

    fn install_native(&mut self, kind: NativeKind, length: u32, words: &mut impl WordSource) -> ObjectRef {
        let function = self.new_function(
            Callable::Native(kind),
            words.next_word(),
            kind.name(),
            length,
        );
        self.native_entries.insert(kind, words.next_word());
        self.global.define(
            Identifier::new(kind.name()),
            Value::Object(function.clone()),
            Attributes::HIDDEN,
        );
        function
    }

    /// The global object
    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    /// Scope chain root
    pub fn global_scope(&self) -> &ScopeRef {
        &self.global_scope
    }

    /// `Object.prototype`
    pub fn object_prototype(&self) -> &ObjectRef {
        &self.object_prototype
    }

    /// `Array.prototype`
    pub fn array_prototype(&self) -> &ObjectRef {
        &self.array_prototype
    }

    /// Prototype of errors created by `error`
    pub fn error_prototype(&self, error: ErrorType) -> ObjectRef {
        self.error_prototypes
            .get(&error)
            .cloned()
            .unwrap_or_else(|| self.object_prototype.clone())
    }

    /// Whether `value` is the intrinsic `eval`
    pub fn is_eval(&self, value: &Value) -> bool {
        value.as_object().is_some_and(|o| o.ptr_eq(&self.eval_function))
    }

    /// Entry word of a host function
    pub fn native_entry(&self, kind: NativeKind) -> u64 {
        self.native_entries.get(&kind).copied().unwrap_or(0)
    }

    /// Host functions with their entry words
    pub fn native_entries(&self) -> impl Iterator<Item = (NativeKind, u64)> + '_ {
        self.native_entries.iter().map(|(&kind, &entry)| (kind, entry))
    }

    /// Allocate a function object. Closures also get a fresh `prototype`
    /// object for `new`.
    pub fn new_function(&self, callable: Callable, identity: u64, name: &str, length: u32) -> ObjectRef {
        let is_closure = matches!(callable, Callable::Closure { .. });
        let function = ObjectRef::with_class(
            ObjectClass::Function(FunctionData { callable, identity }),
            Some(self.function_prototype.clone()),
        );
        function.define(Identifier::new("name"), Value::string(name), Attributes::HIDDEN);
        function.define(
            Identifier::new("length"),
            Value::Number(f64::from(length)),
            Attributes::HIDDEN,
        );
        if is_closure {
            let prototype = self.new_object();
            prototype.define(
                Identifier::new("constructor"),
                Value::Object(function.clone()),
                Attributes::HIDDEN,
            );
            function.define(
                Identifier::new("prototype"),
                Value::Object(prototype),
                Attributes::PERMANENT,
            );
        }
        function
    }

    /// `{}`
    pub fn new_object(&self) -> ObjectRef {
        ObjectRef::with_class(ObjectClass::Ordinary, Some(self.object_prototype.clone()))
    }

    /// `[...values]`
    pub fn new_array(&self, values: Vec<Value>) -> ObjectRef {
        ObjectRef::array(values, Some(self.array_prototype.clone()))
    }

    /// Error instance with `message`
    pub fn new_error(&self, error: ErrorType, message: &str) -> ObjectRef {
        let object = ObjectRef::with_class(ObjectClass::Error, Some(self.error_prototype(error)));
        object.define(Identifier::new("message"), Value::string(message), Attributes::HIDDEN);
        object
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter(u64);

    impl WordSource for Counter {
        fn next_word(&mut self) -> u64 {
            self.0 += 1;
            self.0
        }
    }

    #[test]
    fn test_globals_installed() {
        let realm = Realm::new(&mut Counter(0));
        let global = realm.global();
        assert!(global.get_data("print").is_callable());
        assert!(realm.is_eval(&global.get_data("eval")));
        assert!(global.get_data("NaN").as_number().is_some_and(f64::is_nan));
        assert_ne!(realm.native_entry(NativeKind::Print), 0);
        assert_ne!(realm.native_entry(NativeKind::Print), realm.native_entry(NativeKind::Eval));
    }

    #[test]
    fn test_error_objects_format() {
        let realm = Realm::new(&mut Counter(0));
        let error = realm.new_error(ErrorType::TypeError, "bad");
        assert_eq!(error.default_string(), "TypeError: bad");
        let base = realm.new_error(ErrorType::Error, "");
        assert_eq!(base.default_string(), "Error");

        let constructor = realm.global().get_data("RangeError");
        let proto = constructor.as_object().unwrap().get_data("prototype");
        assert!(proto
            .as_object()
            .unwrap()
            .ptr_eq(&realm.error_prototype(ErrorType::RangeError)));
    }
}
