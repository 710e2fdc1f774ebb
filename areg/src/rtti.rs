//! Runtime type identity
//!
//! Every dispatchable object carries a [`RuntimeClass`] descriptor. Classes
//! form chains through their parent, so a consumer registered for a base
//! class receives instances of every derived class.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use crate::{Error, Result};

/// Static class descriptor: a unique name and an optional parent
pub struct RuntimeClass {
    name: &'static str,
    parent: Option<&'static RuntimeClass>,
}

impl RuntimeClass {
    pub const fn new(name: &'static str, parent: Option<&'static RuntimeClass>) -> Self {
        Self { name, parent }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn parent(&self) -> Option<&'static RuntimeClass> {
        self.parent
    }

    /// Whether this class is `class` or derives from it
    pub fn is_instance_of(&self, class: &RuntimeClass) -> bool {
        self.is_instance_of_name(class.name)
    }

    /// Same as [`is_instance_of`](Self::is_instance_of), matching by class name
    pub fn is_instance_of_name(&self, name: &str) -> bool {
        self.chain().any(|class| class.name == name)
    }

    /// This class followed by its ancestors up to the root
    pub fn chain(&self) -> impl Iterator<Item = &RuntimeClass> {
        std::iter::successors(Some(self), |class| class.parent)
    }
}

impl PartialEq for RuntimeClass {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for RuntimeClass {}

impl fmt::Debug for RuntimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.chain().map(|class| class.name).collect();
        write!(f, "RuntimeClass({})", names.join(" -> "))
    }
}

impl fmt::Display for RuntimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Declare a `static` [`RuntimeClass`].
///
/// ```
/// areg::runtime_class!(pub SHAPE = "Shape");
/// areg::runtime_class!(pub CIRCLE = "Circle" : SHAPE);
/// assert!(CIRCLE.is_instance_of(&SHAPE));
/// ```
#[macro_export]
macro_rules! runtime_class {
    ($vis:vis $ident:ident = $name:literal) => {
        $vis static $ident: $crate::rtti::RuntimeClass = $crate::rtti::RuntimeClass::new($name, None);
    };
    ($vis:vis $ident:ident = $name:literal : $parent:path) => {
        $vis static $ident: $crate::rtti::RuntimeClass =
            $crate::rtti::RuntimeClass::new($name, Some(&$parent));
    };
}

/// Objects that report their runtime class
pub trait RuntimeObject: Any {
    fn runtime_class(&self) -> &'static RuntimeClass;

    fn as_any(&self) -> &dyn Any;

    fn is_instance_of(&self, class: &RuntimeClass) -> bool {
        self.runtime_class().is_instance_of(class)
    }
}

/// Concrete types bound to a class descriptor
pub trait RuntimeType: RuntimeObject + Sized {
    const CLASS: &'static RuntimeClass;
}

/// Checked downcast: succeeds when the object is an instance of `T`'s class
/// and its concrete type is `T`
pub fn runtime_cast<T: RuntimeType>(object: &dyn RuntimeObject) -> Option<&T> {
    if object.is_instance_of(T::CLASS) {
        object.as_any().downcast_ref::<T>()
    } else {
        None
    }
}

/// Table of known classes, keyed by name.
///
/// Owned by the [`ProcessHub`](crate::ProcessHub). A name can be bound to one
/// descriptor only, which keeps class identities unique within a process.
#[derive(Debug, Clone, Default)]
pub struct ClassRegistry {
    classes: Arc<DashMap<&'static str, &'static RuntimeClass>>,
}

impl ClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in event classes
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        for class in crate::event::classes::ALL.iter().copied() {
            // names of the built-in classes are distinct
            let _ = registry.register(class);
        }
        registry
    }

    /// Register a class and all of its ancestors.
    /// Re-registering the same descriptor is a no-op.
    pub fn register(&self, class: &'static RuntimeClass) -> Result<()> {
        let mut next = Some(class);
        while let Some(class) = next {
            match self.classes.entry(class.name) {
                dashmap::mapref::entry::Entry::Occupied(entry) => {
                    if !std::ptr::eq(*entry.get(), class) {
                        return Err(Error::duplicate_name("class", class.name));
                    }
                }
                dashmap::mapref::entry::Entry::Vacant(entry) => {
                    tracing::trace!("Registered runtime class {}", class.name);
                    entry.insert(class);
                }
            }
            next = class.parent;
        }
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<&'static RuntimeClass> {
        self.classes.get(name).map(|entry| *entry.value())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.classes.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    runtime_class!(SHAPE = "Shape");
    runtime_class!(POLYGON = "Polygon" : SHAPE);
    runtime_class!(SQUARE = "Square" : POLYGON);
    runtime_class!(OTHER_SHAPE = "Shape");

    struct Square;

    impl RuntimeObject for Square {
        fn runtime_class(&self) -> &'static RuntimeClass {
            &SQUARE
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    impl RuntimeType for Square {
        const CLASS: &'static RuntimeClass = &SQUARE;
    }

    #[test]
    fn test_chain_walk() {
        assert!(SQUARE.is_instance_of(&SQUARE));
        assert!(SQUARE.is_instance_of(&SHAPE));
        assert!(SQUARE.is_instance_of_name("Polygon"));
        assert!(!SHAPE.is_instance_of(&SQUARE));
        assert!(!SQUARE.is_instance_of_name("Circle"));
        assert_eq!(format!("{:?}", SQUARE), "RuntimeClass(Square -> Polygon -> Shape)");
    }

    #[test]
    fn test_runtime_cast() {
        let square = Square;
        let object: &dyn RuntimeObject = &square;
        assert!(object.is_instance_of(&POLYGON));
        assert!(runtime_cast::<Square>(object).is_some());
    }

    #[test]
    fn test_registry_rejects_conflicting_names() {
        let registry = ClassRegistry::new();
        registry.register(&SQUARE).unwrap();
        assert_eq!(registry.len(), 3);
        registry.register(&POLYGON).unwrap();
        assert_eq!(registry.len(), 3);

        let err = registry.register(&OTHER_SHAPE).unwrap_err();
        assert!(matches!(err, Error::DuplicateName { kind: "class", .. }));
        assert!(std::ptr::eq(registry.lookup("Shape").unwrap(), &SHAPE));
    }

    #[test]
    fn test_builtin_classes_registered() {
        let registry = ClassRegistry::with_builtin();
        assert!(registry.contains("Event"));
        assert!(registry.contains("RemoteRequestEvent"));
        assert!(registry.contains("CustomEvent"));
    }
}
