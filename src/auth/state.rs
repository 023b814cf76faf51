//! Authentication state trait and macro.

use super::engine::AuthEngine;

/// Trait for router state types that expose the authentication engine to the
/// extractors.
pub trait HasAuthBackend {
    fn engine(&self) -> &AuthEngine;
}

/// Macro to implement `HasAuthBackend` for state structs with an `engine`
/// field.
///
/// # Example
/// ```ignore
/// #[derive(Clone)]
/// pub struct MyState {
///     pub engine: AuthEngine,
///     // ... other fields
/// }
///
/// impl_has_auth_backend!(MyState);
/// ```
#[macro_export]
macro_rules! impl_has_auth_backend {
    ($state_type:ty) => {
        impl $crate::auth::HasAuthBackend for $state_type {
            fn engine(&self) -> &$crate::auth::AuthEngine {
                &self.engine
            }
        }
    };
}
