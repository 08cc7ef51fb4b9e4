//! Helper macros enforcing consistent lifecycle log fields.
//!
//! Every lifecycle event carries `event` and `resource` so log consumers can follow a
//! single resource through create, start, readiness and teardown.

/// Log a lifecycle event for a resource plus any extra fields.
#[macro_export]
macro_rules! resource_event {
    ($level:ident, $event:expr, resource = $resource:expr, role = $role:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            event = $event,
            resource = %$resource,
            role = %$role,
            $($field = %$value,)*
        )
    };
    ($level:ident, $event:expr, resource = $resource:expr $(, $field:ident = $value:expr )* $(,)?) => {
        tracing::$level!(
            event = $event,
            resource = %$resource,
            $($field = %$value,)*
        )
    };
}
