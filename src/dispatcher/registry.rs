//! Dispatcher registry
//!
//! Process-wide mapping from backend name to dispatcher factory, populated
//! at startup by registration calls and read for the rest of the process
//! lifetime. Re-registering a name overwrites the previous registration.
//! Tests that register their own backends should deregister them again.

use crate::dispatcher::local::LocalDispatcher;
use crate::dispatcher::text::TextDispatcher;
use crate::dispatcher::Dispatcher;
use crate::error::DispatchError;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

type DispatcherFactory = Arc<dyn Fn() -> Box<dyn Dispatcher> + Send + Sync>;

static CREATORS: Mutex<BTreeMap<String, DispatcherFactory>> = Mutex::new(BTreeMap::new());
static DEFAULT_TYPE: Mutex<String> = Mutex::new(String::new());

/// Register a backend under a name. Last writer wins.
pub fn register_dispatcher(
    name: &str,
    factory: impl Fn() -> Box<dyn Dispatcher> + Send + Sync + 'static,
) {
    CREATORS
        .lock()
        .insert(name.to_string(), Arc::new(factory));
}

/// Remove a registration. Unknown names are ignored.
pub fn deregister_dispatcher(name: &str) {
    CREATORS.lock().remove(name);
}

/// Create a dispatcher of the named type.
pub fn create(name: &str) -> Result<Box<dyn Dispatcher>, DispatchError> {
    let factory = CREATORS
        .lock()
        .get(name)
        .cloned()
        .ok_or_else(|| DispatchError::UnknownDispatcher(name.to_string()))?;
    Ok(factory())
}

/// Names of all registered backends, sorted.
pub fn registered_dispatchers() -> Vec<String> {
    CREATORS.lock().keys().cloned().collect()
}

pub fn default_dispatcher_type() -> String {
    DEFAULT_TYPE.lock().clone()
}

pub fn set_default_dispatcher_type(name: &str) {
    *DEFAULT_TYPE.lock() = name.to_string();
}

/// Register the stock backends. Safe to call more than once; the default
/// type is only set when unset.
pub fn register_builtin_dispatchers() {
    register_dispatcher("Local", || Box::new(LocalDispatcher::new()));
    register_dispatcher("Text", || Box::new(TextDispatcher::new()));

    let mut default = DEFAULT_TYPE.lock();
    if default.is_empty() {
        *default = "Local".to_string();
    }
}
