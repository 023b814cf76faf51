//! Global server configuration initialized once at startup.
//!
//! These values are immutable after initialization and shared across all
//! request handlers. In test mode, values can be overwritten to support
//! different test configurations.

// In test mode we need RwLock so different tests can use different configs.
// In production we use OnceLock for zero-overhead reads.

#[cfg(not(feature = "test-mode"))]
mod inner {
    use std::sync::OnceLock;

    static SECURE_COOKIES: OnceLock<bool> = OnceLock::new();

    pub fn init(secure_cookies: bool) {
        SECURE_COOKIES.get_or_init(|| secure_cookies);
    }

    pub fn secure_cookies() -> bool {
        *SECURE_COOKIES.get().expect("server config not initialized")
    }
}

#[cfg(feature = "test-mode")]
mod inner {
    use std::sync::RwLock;

    static SECURE_COOKIES: RwLock<Option<bool>> = RwLock::new(None);

    pub fn init(secure_cookies: bool) {
        *SECURE_COOKIES.write().unwrap() = Some(secure_cookies);
    }

    pub fn secure_cookies() -> bool {
        SECURE_COOKIES
            .read()
            .unwrap()
            .expect("server config not initialized")
    }
}

pub use inner::*;
