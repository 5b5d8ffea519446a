pub mod components;
pub mod context;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod module;
pub mod plugin_reconciler;
pub mod reconciler;
pub mod registry;
pub mod status;
pub mod store;
pub mod validation;

pub use context::Context;
pub use error::{Error, Result, RetryPolicy};
pub use module::{Leaf, Module, ModuleContext, ObjectModule, Stage};
pub use plugin_reconciler::{PLUGIN_FINALIZER, PluginObject, plugin_error_policy, reconcile_plugin};
pub use reconciler::{FINALIZER, error_policy, reconcile};
pub use registry::{Registry, RegistryBuilder};
pub use status::ConditionBuilder;
pub use validation::FieldError;
