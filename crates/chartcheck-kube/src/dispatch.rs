//! Routing rendered objects into user-declared structs
//!
//! A dispatch target is a record whose fields each collect one resource type.
//! It is declared with [`dispatch_target!`](crate::dispatch_target), which
//! generates the leaf table the dispatcher walks:
//!
//! ```ignore
//! use chartcheck_core::Unstructured;
//! use k8s_openapi::api::{apps::v1::Deployment, core::v1::ConfigMap};
//!
//! chartcheck_kube::dispatch_target! {
//!     pub struct Resources {
//!         pub deployments: Vec<Deployment>,
//!         pub config_maps: Vec<ConfigMap>,
//!         pub others: Vec<Unstructured>,
//!     }
//! }
//! ```
//!
//! Layouts are validated once per struct type and cached for the process.

use once_cell::sync::Lazy;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use chartcheck_core::Unstructured;

use crate::error::{DispatchError, Result, SignatureError, UnknownResourceError};
use crate::scheme::{Routable, Route, Scheme};

/// Converts an object and appends it to one leaf of `S`
pub type Append<S> =
    Box<dyn Fn(&mut S, &Unstructured) -> std::result::Result<(), serde_json::Error> + Send + Sync>;

/// One `Vec<T>` field of a dispatch target, addressed by its dotted path
pub struct Leaf<S> {
    pub path: String,
    pub route: Route,
    pub type_name: &'static str,
    append: Append<S>,
}

impl<S> fmt::Debug for Leaf<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("path", &self.path)
            .field("route", &self.route)
            .field("type_name", &self.type_name)
            .finish_non_exhaustive()
    }
}

/// Collects the leaves of a dispatch target
pub struct LayoutBuilder<S> {
    prefix: String,
    leaves: Vec<Leaf<S>>,
}

impl<S: 'static> LayoutBuilder<S> {
    fn with_prefix(prefix: String) -> Self {
        Self {
            prefix,
            leaves: Vec::new(),
        }
    }

    fn path(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.prefix, name)
        }
    }

    /// Add a `Vec<T>` leaf
    pub fn leaf<T: Routable>(mut self, name: &str, field: fn(&mut S) -> &mut Vec<T>) -> Self {
        let path = self.path(name);
        self.leaves.push(Leaf {
            path,
            route: T::route(),
            type_name: std::any::type_name::<T>(),
            append: Box::new(move |target, object| {
                let item = T::from_object(object)?;
                field(target).push(item);
                Ok(())
            }),
        });
        self
    }

    /// Add every leaf of a nested record under `name`
    pub fn nested<N: DispatchTarget>(mut self, name: &str, field: fn(&mut S) -> &mut N) -> Self {
        let inner = N::describe(LayoutBuilder::with_prefix(self.path(name)));
        for leaf in inner.leaves {
            let append = leaf.append;
            self.leaves.push(Leaf {
                path: leaf.path,
                route: leaf.route,
                type_name: leaf.type_name,
                append: Box::new(move |target, object| append(field(target), object)),
            });
        }
        self
    }
}

/// A record objects can be dispatched into
///
/// Implemented by [`dispatch_target!`](crate::dispatch_target); manual
/// implementations list their leaves on the builder.
pub trait DispatchTarget: Default + Send + 'static {
    fn describe(layout: LayoutBuilder<Self>) -> LayoutBuilder<Self>;
}

/// The validated leaf table of a dispatch target
pub struct Layout<S> {
    leaves: Vec<Leaf<S>>,
    typed: HashMap<TypeId, usize>,
    catch_all: Option<usize>,
}

impl<S> fmt::Debug for Layout<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layout")
            .field("leaves", &self.leaves)
            .field("catch_all", &self.catch_all())
            .finish()
    }
}

impl<S: DispatchTarget> Layout<S> {
    /// Describe `S` and check that every resource type has a single home
    pub fn build() -> std::result::Result<Self, SignatureError> {
        let leaves = S::describe(LayoutBuilder::with_prefix(String::new())).leaves;
        let mut typed: HashMap<TypeId, usize> = HashMap::new();
        let mut catch_all: Option<usize> = None;

        for (index, leaf) in leaves.iter().enumerate() {
            match leaf.route {
                Route::Typed { type_id, type_name } => {
                    if let Some(&first) = typed.get(&type_id) {
                        return Err(SignatureError::AmbiguousRoute {
                            type_name,
                            first: leaves[first].path.clone(),
                            second: leaf.path.clone(),
                        });
                    }
                    typed.insert(type_id, index);
                }
                Route::CatchAll => {
                    if let Some(first) = catch_all {
                        return Err(SignatureError::MultipleCatchAll {
                            first: leaves[first].path.clone(),
                            second: leaf.path.clone(),
                        });
                    }
                    catch_all = Some(index);
                }
            }
        }

        Ok(Self {
            leaves,
            typed,
            catch_all,
        })
    }
}

impl<S> Layout<S> {
    pub fn leaves(&self) -> &[Leaf<S>] {
        &self.leaves
    }

    /// Path of the catch-all leaf
    pub fn catch_all(&self) -> Option<&str> {
        self.catch_all.map(|index| self.leaves[index].path.as_str())
    }

    /// Leaf receiving objects of the given type
    pub fn leaf_for(&self, type_id: TypeId) -> Option<&Leaf<S>> {
        self.typed.get(&type_id).map(|&index| &self.leaves[index])
    }
}

type CachedLayout = std::result::Result<Arc<dyn Any + Send + Sync>, SignatureError>;

static LAYOUTS: Lazy<Mutex<HashMap<TypeId, CachedLayout>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The cached layout of `S`, building and validating it on first use
pub fn layout<S: DispatchTarget>() -> std::result::Result<Arc<Layout<S>>, SignatureError> {
    let key = TypeId::of::<S>();
    let mut cache = LAYOUTS.lock().unwrap_or_else(PoisonError::into_inner);

    match cache.get(&key) {
        Some(Ok(cached)) => {
            if let Ok(layout) = Arc::clone(cached).downcast::<Layout<S>>() {
                return Ok(layout);
            }
        }
        Some(Err(e)) => return Err(e.clone()),
        None => {}
    }

    match Layout::<S>::build() {
        Ok(layout) => {
            let layout = Arc::new(layout);
            let erased: Arc<dyn Any + Send + Sync> = layout.clone();
            cache.insert(key, Ok(erased));
            Ok(layout)
        }
        Err(e) => {
            cache.insert(key, Err(e.clone()));
            Err(e)
        }
    }
}

/// Route `objects` into a fresh `S`
///
/// Each object goes to the leaf whose type the scheme maps it to, else to the
/// catch-all. Objects with neither fail strict dispatch and are dropped
/// otherwise. Order is preserved within each leaf.
pub fn dispatch<'a, S, I>(objects: I, scheme: &Scheme, strict: bool) -> Result<S>
where
    S: DispatchTarget,
    I: IntoIterator<Item = &'a Unstructured>,
{
    let layout = layout::<S>()?;
    let mut target = S::default();

    for object in objects {
        let gvk = object.gvk();
        let typed = scheme
            .lookup(&gvk)
            .and_then(|registered| layout.typed.get(&registered.type_id).copied());

        let Some(index) = typed.or(layout.catch_all) else {
            if strict {
                return Err(UnknownResourceError {
                    target: std::any::type_name::<S>(),
                    object: object.describe(),
                    gvk,
                }
                .into());
            }
            tracing::debug!(object = %object.describe(), "no field accepts object, dropping");
            continue;
        };

        let leaf = &layout.leaves[index];
        (leaf.append)(&mut target, object).map_err(|source| DispatchError::Conversion {
            object: object.describe(),
            type_name: leaf.type_name,
            source,
        })?;
    }

    Ok(target)
}

/// A dispatch target holding a single resource type
#[derive(Debug, Clone)]
pub struct Only<T>(pub Vec<T>);

impl<T> Default for Only<T> {
    fn default() -> Self {
        Self(Vec::new())
    }
}

impl<T> Only<T> {
    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T: Routable> DispatchTarget for Only<T> {
    fn describe(layout: LayoutBuilder<Self>) -> LayoutBuilder<Self> {
        fn items<T>(only: &mut Only<T>) -> &mut Vec<T> {
            &mut only.0
        }
        layout.leaf("items", items::<T>)
    }
}

/// Declare dispatch targets
///
/// Leaves are `field: Vec<T>` where `T` is [`Routable`]; at most one leaf may
/// be `Vec<Unstructured>`. Nested records are declared `field: nested<Record>`
/// and must themselves be dispatch targets. `Default` is derived.
#[macro_export]
macro_rules! dispatch_target {
    ($(
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$fmeta:meta])*
                $fvis:vis $field:ident : $kind:ident<$ty:ty>
            ),* $(,)?
        }
    )+) => {
        $(
            $(#[$meta])*
            #[derive(Default)]
            $vis struct $name {
                $(
                    $(#[$fmeta])*
                    $fvis $field: $crate::__dispatch_member!(@type $kind $ty),
                )*
            }

            impl $crate::DispatchTarget for $name {
                fn describe(layout: $crate::LayoutBuilder<Self>) -> $crate::LayoutBuilder<Self> {
                    $(
                        let layout = $crate::__dispatch_member!(@add layout $name $field $kind $ty);
                    )*
                    layout
                }
            }
        )+
    };
}

#[doc(hidden)]
#[macro_export]
macro_rules! __dispatch_member {
    (@type Vec $ty:ty) => { ::std::vec::Vec<$ty> };
    (@type nested $ty:ty) => { $ty };
    (@add $layout:ident $name:ident $field:ident Vec $ty:ty) => {{
        fn $field(target: &mut $name) -> &mut ::std::vec::Vec<$ty> {
            &mut target.$field
        }
        $layout.leaf(stringify!($field), $field)
    }};
    (@add $layout:ident $name:ident $field:ident nested $ty:ty) => {{
        fn $field(target: &mut $name) -> &mut $ty {
            &mut target.$field
        }
        $layout.nested(stringify!($field), $field)
    }};
}
