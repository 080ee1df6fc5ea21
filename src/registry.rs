//! Class resolution: from a wire name to a local descriptor.
//!
//! The process-wide [`TypeRegistry`] maps wire names to descriptor lookups. Every type whose
//! descriptor has been built is known to it automatically; types that are only ever *read* must
//! be registered up front with [`register`], since nothing else would make them known.
//!
//! Input streams resolve through a [`ClassResolver`], which defaults to the global registry.

use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

use crate::builtin::{
    ClassClass, EnumBase, Object, ProxyBase, StreamClass, StringClass, WriteFailure,
};
use crate::desc::{self, ClassDesc, DescLookup, SerialType};
use crate::error::{Result, StreamError};

/// Resolves the classes named by a stream.
pub trait ClassResolver {
    /// Local descriptor for the class `name`. `suid` is the stream's version identifier, for
    /// resolvers that keep several versions around; compatibility is checked by the caller.
    fn resolve_class(&self, name: &str, suid: i64) -> Result<Arc<ClassDesc>>;

    /// Local descriptor of the proxy type implementing exactly `interfaces`, in order.
    fn resolve_proxy_class(&self, interfaces: &[Arc<str>]) -> Result<Arc<ClassDesc>>;
}

#[derive(Debug, Default)]
struct RegistryInner {
    classes: DashMap<Arc<str>, DescLookup>,
    proxies: DashMap<Vec<Arc<str>>, DescLookup>,
}

/// Concurrent map from wire names (and proxy interface lists) to descriptor lookups.
///
/// Cloning is cheap and shares the underlying maps.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    inner: Arc<RegistryInner>,
}

static GLOBAL: LazyLock<TypeRegistry> = LazyLock::new(TypeRegistry::new);

/// The process-wide registry.
pub fn global() -> &'static TypeRegistry {
    &GLOBAL
}

/// Registers `T` with the global registry and returns its descriptor.
pub fn register<T: SerialType>() -> Result<Arc<ClassDesc>> {
    global().register::<T>()
}

/// Registers the proxy type `T` with the global registry under its interface list.
pub fn register_proxy<T: SerialType>() -> Result<Arc<ClassDesc>> {
    global().register_proxy::<T>()
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// A registry knowing only the built-in classes.
    pub fn new() -> Self {
        let inner = RegistryInner::default();
        let builtins: [(&str, DescLookup); 7] = [
            ("java.lang.Object", desc::lookup::<Object>),
            ("java.lang.String", desc::lookup::<StringClass>),
            ("java.lang.Class", desc::lookup::<ClassClass>),
            ("java.io.ObjectStreamClass", desc::lookup::<StreamClass>),
            ("java.lang.Enum", desc::lookup::<EnumBase>),
            ("java.lang.reflect.Proxy", desc::lookup::<ProxyBase>),
            (WriteFailure::WIRE_NAME, desc::lookup::<WriteFailure>),
        ];
        for (name, lookup) in builtins {
            inner.classes.insert(Arc::from(name), lookup);
        }
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Registers `T` under its wire name, replacing any previous registration of that name.
    pub fn register<T: SerialType>(&self) -> Result<Arc<ClassDesc>> {
        let d = desc::lookup::<T>()?;
        self.inner
            .classes
            .insert(d.name.clone(), desc::lookup::<T>);
        if d.is_proxy() {
            self.inner
                .proxies
                .insert(d.interfaces().to_vec(), desc::lookup::<T>);
        }
        log::debug!("[desc] registered {}", d.name());
        Ok(d)
    }

    /// Registers the proxy type `T`. Fails if `T` does not declare proxy interfaces.
    pub fn register_proxy<T: SerialType>(&self) -> Result<Arc<ClassDesc>> {
        let d = desc::lookup::<T>()?;
        if !d.is_proxy() {
            return Err(StreamError::invalid_class(d.name(), "not a proxy type"));
        }
        self.register::<T>()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.classes.contains_key(name)
    }

    /// Number of registered class names.
    pub fn len(&self) -> usize {
        self.inner.classes.len()
    }

    /// Returns `true` if nothing is registered.
    ///
    /// A registry from [`TypeRegistry::new`] always holds the built-in classes.
    pub fn is_empty(&self) -> bool {
        self.inner.classes.is_empty()
    }

    fn lookup_fn(&self, name: &str) -> Option<DescLookup> {
        // Copy the fn pointer out so no map guard is held while a descriptor is built.
        self.inner.classes.get(name).map(|e| *e.value())
    }

    fn note(&self, name: &Arc<str>, lookup: DescLookup) {
        self.inner.classes.entry(name.clone()).or_insert(lookup);
    }
}

impl ClassResolver for TypeRegistry {
    fn resolve_class(&self, name: &str, _suid: i64) -> Result<Arc<ClassDesc>> {
        if name.starts_with('[') {
            return resolve_array(self, name);
        }
        match self.lookup_fn(name) {
            Some(lookup) => lookup(),
            None => Err(StreamError::ClassNotFound(name.to_string())),
        }
    }

    fn resolve_proxy_class(&self, interfaces: &[Arc<str>]) -> Result<Arc<ClassDesc>> {
        let lookup = self.inner.proxies.get(interfaces).map(|e| *e.value());
        match lookup {
            Some(lookup) => lookup(),
            None => Err(StreamError::ClassNotFound(format!(
                "proxy implementing [{}]",
                interfaces.join(", ")
            ))),
        }
    }
}

/// Resolves an array class structurally.
///
/// The component class of an object array must itself resolve through `resolver`.
pub fn resolve_array(resolver: &dyn ClassResolver, name: &str) -> Result<Arc<ClassDesc>> {
    if desc::parse_array_elem(name).is_none() {
        return Err(StreamError::ClassNotFound(name.to_string()));
    }
    if let Some(component) = desc::array_component_class(name) {
        resolver.resolve_class(component, 0)?;
    }
    desc::lookup_array(name)
}

/// Records a freshly built local descriptor in the global registry, keeping earlier entries.
pub(crate) fn note_local(name: &Arc<str>, lookup: DescLookup) {
    GLOBAL.note(name, lookup);
}

pub(crate) fn note_proxy(interfaces: &[&'static str], lookup: DescLookup) {
    let key: Vec<Arc<str>> = interfaces.iter().map(|i| Arc::from(*i)).collect();
    GLOBAL.inner.proxies.entry(key).or_insert(lookup);
}

/// Class modifiers of a registered class, used for array version identifiers.
pub(crate) fn local_modifiers(name: &str) -> Option<u16> {
    let lookup = GLOBAL.lookup_fn(name)?;
    let d = lookup().ok()?;
    d.local().map(|l| l.modifiers)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn builtins_always_resolve() {
        let r = TypeRegistry::new();
        for name in [
            "java.lang.Object",
            "java.lang.String",
            "java.lang.Enum",
            "java.lang.Class",
            "java.io.ObjectStreamClass",
            "java.lang.reflect.Proxy",
        ] {
            assert_eq!(r.resolve_class(name, 0).unwrap().name(), name);
        }
    }

    #[test]
    fn unknown_names_are_class_not_found() {
        let r = TypeRegistry::new();
        assert!(matches!(
            r.resolve_class("no.such.Type", 1),
            Err(StreamError::ClassNotFound(_))
        ));
    }

    #[test]
    fn arrays_resolve_structurally() {
        let r = TypeRegistry::new();
        assert_eq!(r.resolve_class("[[I", 0).unwrap().name(), "[[I");
        assert!(r.resolve_class("[Ljava.lang.String;", 0).is_ok());
        assert!(matches!(
            r.resolve_class("[Lno.such.Type;", 0),
            Err(StreamError::ClassNotFound(n)) if n == "no.such.Type"
        ));
        assert!(r.resolve_class("[X", 0).is_err());
    }
}
