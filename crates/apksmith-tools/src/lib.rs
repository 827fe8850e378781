//! apksmith tools - locating the zipalign binary
//!
//! zipalign ships with the Android SDK build-tools. It is found through the
//! step's overrides, the `ANDROID_ZIPALIGN` and `ANDROID_HOME` environment
//! variables, or an SDK recognised on `PATH`, in that order.

pub mod error;
pub mod locator;
pub mod version;

pub use error::{Result, ToolError};
pub use locator::{
    ToolEnvironment, ToolLocation, ToolSource, ZipalignLocator, ZipalignOverrides,
    ENV_ANDROID_HOME, ENV_PATH, ENV_ZIPALIGN,
};
pub use version::DottedVersion;
