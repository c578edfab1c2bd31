//! Resource type registry
//!
//! A [`Scheme`] maps an object's group/version/kind to the Rust type that
//! represents it. [`Scheme::global`] knows every built-in kind shipped by
//! `k8s-openapi`; custom resources are added to a scheme of your own.

use k8s_openapi::api::{
    admissionregistration::v1 as admissionregistration_v1, apps::v1 as apps_v1,
    autoscaling::v1 as autoscaling_v1, autoscaling::v2 as autoscaling_v2, batch::v1 as batch_v1,
    coordination::v1 as coordination_v1, core::v1 as core_v1, discovery::v1 as discovery_v1,
    networking::v1 as networking_v1, policy::v1 as policy_v1, rbac::v1 as rbac_v1,
    scheduling::v1 as scheduling_v1, storage::v1 as storage_v1,
};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1 as apiextensions_v1;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use std::any::TypeId;
use std::collections::HashMap;

use chartcheck_core::{GroupVersionKind, Unstructured};

/// Where objects of a leaf's element type are routed from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// Objects whose kind the scheme maps to this type
    Typed {
        type_id: TypeId,
        type_name: &'static str,
    },
    /// Anything no typed leaf accepts
    CatchAll,
}

impl Route {
    pub fn typed<T: 'static>() -> Self {
        Route::Typed {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// Element types a dispatch target may collect
///
/// Implemented for every built-in kind, for [`Unstructured`] (the catch-all)
/// and, through [`routable!`](crate::routable), for custom resource types.
pub trait Routable: DeserializeOwned + Send + 'static {
    fn route() -> Route;

    /// Build the typed form of a rendered object
    fn from_object(object: &Unstructured) -> Result<Self, serde_json::Error> {
        serde_json::from_value(object.to_value())
    }

    /// `metadata.name`
    fn name(&self) -> Option<&str>;

    /// `metadata.namespace`
    fn namespace(&self) -> Option<&str>;
}

impl Routable for Unstructured {
    fn route() -> Route {
        Route::CatchAll
    }

    fn from_object(object: &Unstructured) -> Result<Self, serde_json::Error> {
        Ok(object.clone())
    }

    fn name(&self) -> Option<&str> {
        Unstructured::name(self)
    }

    fn namespace(&self) -> Option<&str> {
        Unstructured::namespace(self)
    }
}

#[doc(hidden)]
pub fn object_meta<T>(resource: &T) -> &ObjectMeta
where
    T: k8s_openapi::Metadata<Ty = ObjectMeta>,
{
    resource.metadata()
}

/// Implement [`Routable`] for resource types
///
/// The type must implement `k8s_openapi::Resource` and
/// `k8s_openapi::Metadata<Ty = ObjectMeta>`, so it carries a
/// group/version/kind and object metadata like the built-in kinds.
///
/// ```ignore
/// #[derive(serde::Deserialize)]
/// struct Widget { metadata: ObjectMeta, /* ... */ }
///
/// impl k8s_openapi::Resource for Widget { /* ... */ }
/// impl k8s_openapi::Metadata for Widget { type Ty = ObjectMeta; /* ... */ }
///
/// chartcheck_kube::routable!(Widget);
/// ```
#[macro_export]
macro_rules! routable {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl $crate::Routable for $ty {
                fn route() -> $crate::Route {
                    $crate::Route::typed::<$ty>()
                }

                fn name(&self) -> Option<&str> {
                    $crate::scheme::object_meta(self).name.as_deref()
                }

                fn namespace(&self) -> Option<&str> {
                    $crate::scheme::object_meta(self).namespace.as_deref()
                }
            }
        )+
    };
}

/// A type registered for a group/version/kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisteredType {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

/// group/version/kind → Rust type
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: HashMap<GroupVersionKind, RegisteredType>,
}

static GLOBAL: Lazy<Scheme> = Lazy::new(Scheme::with_builtins);

macro_rules! builtin_kinds {
    ($($ty:ty),+ $(,)?) => {
        routable!($($ty),+);

        impl Scheme {
            fn register_builtins(&mut self) {
                $( self.register::<$ty>(); )+
            }
        }
    };
}

builtin_kinds!(
    core_v1::ConfigMap,
    core_v1::Endpoints,
    core_v1::Event,
    core_v1::LimitRange,
    core_v1::Namespace,
    core_v1::PersistentVolume,
    core_v1::PersistentVolumeClaim,
    core_v1::Pod,
    core_v1::PodTemplate,
    core_v1::ReplicationController,
    core_v1::ResourceQuota,
    core_v1::Secret,
    core_v1::Service,
    core_v1::ServiceAccount,
    apps_v1::ControllerRevision,
    apps_v1::DaemonSet,
    apps_v1::Deployment,
    apps_v1::ReplicaSet,
    apps_v1::StatefulSet,
    batch_v1::CronJob,
    batch_v1::Job,
    networking_v1::Ingress,
    networking_v1::IngressClass,
    networking_v1::NetworkPolicy,
    rbac_v1::ClusterRole,
    rbac_v1::ClusterRoleBinding,
    rbac_v1::Role,
    rbac_v1::RoleBinding,
    policy_v1::PodDisruptionBudget,
    autoscaling_v1::HorizontalPodAutoscaler,
    autoscaling_v2::HorizontalPodAutoscaler,
    storage_v1::CSIDriver,
    storage_v1::StorageClass,
    storage_v1::VolumeAttachment,
    scheduling_v1::PriorityClass,
    admissionregistration_v1::MutatingWebhookConfiguration,
    admissionregistration_v1::ValidatingWebhookConfiguration,
    apiextensions_v1::CustomResourceDefinition,
    coordination_v1::Lease,
    discovery_v1::EndpointSlice,
);

impl Scheme {
    /// An empty scheme
    pub fn new() -> Self {
        Self::default()
    }

    /// A scheme knowing every built-in kind
    pub fn with_builtins() -> Self {
        let mut scheme = Self::new();
        scheme.register_builtins();
        scheme
    }

    /// Shared scheme with the built-in kinds
    pub fn global() -> &'static Scheme {
        &GLOBAL
    }

    /// Register a `k8s-openapi` style resource under its own group/version/kind
    pub fn register<T: k8s_openapi::Resource + 'static>(&mut self) -> &mut Self {
        self.register_kind::<T>(GroupVersionKind::new(T::GROUP, T::VERSION, T::KIND))
    }

    /// Register any type for an explicit group/version/kind
    pub fn register_kind<T: 'static>(&mut self, gvk: GroupVersionKind) -> &mut Self {
        self.kinds.insert(
            gvk,
            RegisteredType {
                type_id: TypeId::of::<T>(),
                type_name: std::any::type_name::<T>(),
            },
        );
        self
    }

    /// Type registered for `gvk`
    pub fn lookup(&self, gvk: &GroupVersionKind) -> Option<RegisteredType> {
        self.kinds.get(gvk).copied()
    }

    pub fn contains(&self, gvk: &GroupVersionKind) -> bool {
        self.kinds.contains_key(gvk)
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}
