//! chartcheck Kube - typed routing of rendered objects
//!
//! This crate provides:
//! - `Scheme`: group/version/kind → Rust type, pre-populated with `k8s-openapi` kinds
//! - `dispatch_target!` / `dispatch`: fill user-declared structs from an object stream
//! - `workloads`: pod-running resources reduced to their pod template

pub mod dispatch;
pub mod error;
pub mod scheme;
pub mod workload;

pub use dispatch::{Append, DispatchTarget, Layout, LayoutBuilder, Leaf, Only, dispatch, layout};
pub use error::{DispatchError, Result, SignatureError, UnknownResourceError};
pub use scheme::{RegisteredType, Routable, Route, Scheme};
pub use workload::{Workload, WorkloadKind, workloads};

pub use k8s_openapi;
