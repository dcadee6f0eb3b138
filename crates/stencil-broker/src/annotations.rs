//! Annotation and label keys the broker reads or writes.

/// Expose the value of a path expression as a plain credential.
pub const EXPOSE_PREFIX: &str = "stencil.dev/expose-";

/// Expose the value of a path expression as a base64-encoded credential.
pub const BASE64_EXPOSE_PREFIX: &str = "stencil.dev/base64-expose-";

/// Template annotation; `"false"` marks the service non-bindable.
pub const BINDABLE: &str = "stencil.dev/bindable";

pub const DESCRIPTION: &str = "description";
pub const TAGS: &str = "tags";
pub const DISPLAY_NAME: &str = "stencil.dev/display-name";
pub const ICON_CLASS: &str = "stencil.dev/icon-class";
pub const LONG_DESCRIPTION: &str = "stencil.dev/long-description";
pub const PROVIDER_DISPLAY_NAME: &str = "stencil.dev/provider-display-name";
pub const DOCUMENTATION_URL: &str = "stencil.dev/documentation-url";
pub const SUPPORT_URL: &str = "stencil.dev/support-url";

/// Label placed on every object produced by an instantiation.
pub const INSTANCE_LABEL: &str = "stencil.dev/template-instance";
